//! Providers, KEM names and certificate sets known to the harness.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::{Error, Result};

/// Prefix carried by every algorithm of the QKD-integrated provider.
pub const QKD_PREFIX: &str = "qkd_";

/// KEM families and their standard (non-QKD) members.
pub const KEM_FAMILIES: &[(&str, &[&str])] = &[
    ("mlkem", &["mlkem512", "mlkem768", "mlkem1024"]),
    ("bike", &["bikel1", "bikel3", "bikel5"]),
    (
        "frodo",
        &[
            "frodo640aes",
            "frodo640shake",
            "frodo976aes",
            "frodo976shake",
            "frodo1344aes",
            "frodo1344shake",
        ],
    ),
    ("hqc", &["hqc128", "hqc192", "hqc256"]),
];

/// Certificate families and the file base name used for each.
pub const SUPPORTED_CERTS: &[(&str, &str)] = &[
    ("rsa", "rsa_2048"),
    ("dilithium", "dilithium3"),
    ("falcon", "falcon512"),
];

/// OpenSSL provider under test.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Provider {
    /// QKD-enhanced KEM provider.
    Qkd,
    /// Baseline liboqs provider.
    Oqs,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Qkd => "qkd",
            Provider::Oqs => "oqs",
        }
    }

    /// Name passed to `-provider` / loaded from `OPENSSL_MODULES`.
    pub fn module_name(&self) -> &'static str {
        match self {
            Provider::Qkd => "qkdkemprovider",
            Provider::Oqs => "oqsprovider",
        }
    }

    /// Whether running this provider draws keys from a KME pool.
    pub fn consumes_qkd_keys(&self) -> bool {
        matches!(self, Provider::Qkd)
    }

    /// Algorithm name as it is recorded for this provider: QKD algorithms
    /// always carry the `qkd_` prefix, baseline ones never do.
    pub fn tag_algorithm(&self, name: &str) -> String {
        match self {
            Provider::Qkd if !name.starts_with(QKD_PREFIX) => format!("{QKD_PREFIX}{name}"),
            _ => name.to_string(),
        }
    }

    /// TLS group names swept when none are given on the command line.
    pub fn default_kems(&self) -> Vec<String> {
        let base = KEM_FAMILIES
            .iter()
            .find(|(family, _)| *family == "mlkem")
            .map(|(_, kems)| *kems)
            .unwrap_or_default();
        base.iter().map(|k| self.tag_algorithm(k)).collect()
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "qkd" => Ok(Provider::Qkd),
            "oqs" => Ok(Provider::Oqs),
            other => Err(Error::InvalidArgument(format!(
                "unknown provider \"{other}\" (expected qkd or oqs)"
            ))),
        }
    }
}

/// Family a KEM name belongs to, with or without the `qkd_` prefix.
pub fn kem_family(kem: &str) -> Option<&'static str> {
    let bare = kem.strip_prefix(QKD_PREFIX).unwrap_or(kem);
    KEM_FAMILIES
        .iter()
        .find(|(_, members)| members.contains(&bare))
        .map(|(family, _)| *family)
}

/// Certificate family used for the TLS server identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CertType {
    pub kind: &'static str,
    pub base: &'static str,
}

impl CertType {
    pub fn lookup(kind: &str) -> Result<Self> {
        SUPPORTED_CERTS
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(kind.trim()))
            .map(|(kind, base)| CertType { kind, base })
            .ok_or_else(|| {
                let known: Vec<&str> = SUPPORTED_CERTS.iter().map(|(k, _)| *k).collect();
                Error::InvalidArgument(format!(
                    "unsupported certificate type \"{kind}\" (expected one of {})",
                    known.join(", ")
                ))
            })
    }

    pub fn all() -> Vec<Self> {
        SUPPORTED_CERTS
            .iter()
            .map(|(kind, base)| CertType { kind, base })
            .collect()
    }

    fn file(&self, certs_dir: &Path, suffix: &str) -> PathBuf {
        certs_dir
            .join(self.kind)
            .join(format!("{}_{suffix}.pem", self.base))
    }

    pub fn entity_cert(&self, certs_dir: &Path) -> PathBuf {
        self.file(certs_dir, "entity_cert")
    }

    pub fn entity_key(&self, certs_dir: &Path) -> PathBuf {
        self.file(certs_dir, "entity_key")
    }

    pub fn root_cert(&self, certs_dir: &Path) -> PathBuf {
        self.file(certs_dir, "root_cert")
    }
}

impl fmt::Display for CertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind)
    }
}

impl FromStr for CertType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CertType::lookup(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parsing() {
        assert_eq!("qkd".parse::<Provider>().unwrap(), Provider::Qkd);
        assert_eq!("OQS".parse::<Provider>().unwrap(), Provider::Oqs);
        assert!("openssl".parse::<Provider>().is_err());
    }

    #[test]
    fn qkd_algorithms_are_prefixed_once() {
        assert_eq!(Provider::Qkd.tag_algorithm("mlkem768"), "qkd_mlkem768");
        assert_eq!(Provider::Qkd.tag_algorithm("qkd_mlkem768"), "qkd_mlkem768");
        assert_eq!(Provider::Oqs.tag_algorithm("mlkem768"), "mlkem768");
        assert_eq!(
            Provider::Qkd.default_kems(),
            vec!["qkd_mlkem512", "qkd_mlkem768", "qkd_mlkem1024"]
        );
        assert_eq!(
            Provider::Oqs.default_kems(),
            vec!["mlkem512", "mlkem768", "mlkem1024"]
        );
    }

    #[test]
    fn families() {
        assert_eq!(kem_family("qkd_frodo976shake"), Some("frodo"));
        assert_eq!(kem_family("hqc192"), Some("hqc"));
        assert_eq!(kem_family("kyber768"), None);
    }

    #[test]
    fn cert_files() {
        let c: CertType = "Dilithium".parse().unwrap();
        assert_eq!(c.base, "dilithium3");
        let dir = Path::new("./certs");
        assert_eq!(
            c.entity_cert(dir),
            Path::new("./certs/dilithium/dilithium3_entity_cert.pem")
        );
        assert_eq!(
            c.entity_key(dir),
            Path::new("./certs/dilithium/dilithium3_entity_key.pem")
        );
        assert_eq!(
            c.root_cert(dir),
            Path::new("./certs/dilithium/dilithium3_root_cert.pem")
        );
        assert!(CertType::lookup("ecdsa").is_err());
        assert_eq!(CertType::all().len(), 3);
    }
}
