//! Startup configuration read from the process environment.
//!
//! Everything is read and validated once, before the first network call or
//! child process. Call sites receive the typed structs and never go back to
//! the environment.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use etsi014::{Credentials, KmeClient, Party};
use safelog::sensitive;
use tracing::debug;

use crate::{Error, Result};

pub mod constants {
    pub const BACKEND: &str = "QKD_BACKEND";
    pub const ACCOUNT_ID: &str = "QKD_ACCOUNT_ID";
    pub const MASTER_KME_HOSTNAME: &str = "QKD_MASTER_KME_HOSTNAME";
    pub const SLAVE_KME_HOSTNAME: &str = "QKD_SLAVE_KME_HOSTNAME";
    pub const MASTER_SAE: &str = "QKD_MASTER_SAE";
    pub const SLAVE_SAE: &str = "QKD_SLAVE_SAE";
    pub const CA_CERT_PATH: &str = "QKD_CA_CERT_PATH";
    pub const MASTER_CERT_PATH: &str = "QKD_MASTER_CERT_PATH";
    pub const MASTER_KEY_PATH: &str = "QKD_MASTER_KEY_PATH";
    pub const SLAVE_CERT_PATH: &str = "QKD_SLAVE_CERT_PATH";
    pub const SLAVE_KEY_PATH: &str = "QKD_SLAVE_KEY_PATH";

    pub const OPENSSL_CONF: &str = "OPENSSL_CONF";
    pub const OPENSSL_MODULES: &str = "OPENSSL_MODULES";
    pub const LD_LIBRARY_PATH: &str = "LD_LIBRARY_PATH";
    pub const PATH: &str = "PATH";

    pub const DEFAULT_MASTER_SAE: &str = "sae-1";
    pub const DEFAULT_SLAVE_SAE: &str = "sae-2";
}

/// KME vendor the harness talks to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Backend {
    /// Locally hosted simulated KMEs, addressed by explicit hostnames.
    #[default]
    Simulated,
    /// QuKayDee cloud KMEs, addressed through an account identifier.
    Qukaydee,
}

impl Backend {
    /// Default endpoint of KME `n` (1 = master, 2 = slave) for an account.
    fn derived_endpoint(&self, account_id: &str, n: u8) -> Option<String> {
        match self {
            Backend::Simulated => None,
            Backend::Qukaydee => Some(format!(
                "https://kme-{n}.acct-{account_id}.etsi-qkd-api.qukaydee.com"
            )),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Simulated => write!(f, "simulated"),
            Backend::Qukaydee => write!(f, "qukaydee"),
        }
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulated" | "sim" => Ok(Backend::Simulated),
            "qukaydee" => Ok(Backend::Qukaydee),
            other => Err(Error::Config(format!(
                "unknown {} \"{other}\" (expected simulated or qukaydee)",
                constants::BACKEND
            ))),
        }
    }
}

/// One SAE: its identifier, the KME it talks to and its client identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaeRole {
    pub sae_id: String,
    pub kme_endpoint: String,
    pub credentials: Credentials,
}

impl SaeRole {
    pub fn client(&self) -> Result<KmeClient> {
        Ok(KmeClient::new(&self.kme_endpoint, &self.credentials)?)
    }
}

/// Both sides of the key delivery setup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KmeConfig {
    pub backend: Backend,
    pub master: SaeRole,
    pub slave: SaeRole,
    pub account_id: Option<String>,
}

impl KmeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source. Empty
    /// values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let require = |name: &str| {
            get(name).ok_or_else(|| Error::Config(format!("environment variable {name} is not set")))
        };

        let backend = match get(constants::BACKEND) {
            Some(b) => b.parse()?,
            None => Backend::default(),
        };
        let account_id = get(constants::ACCOUNT_ID);

        let endpoint = |var: &str, n: u8| -> Result<String> {
            if let Some(host) = get(var) {
                return Ok(host);
            }
            match (backend, &account_id) {
                (Backend::Qukaydee, Some(id)) => backend
                    .derived_endpoint(id, n)
                    .ok_or_else(|| Error::Config(format!("{var} is not set"))),
                (Backend::Qukaydee, None) => Err(Error::Config(format!(
                    "neither {var} nor {} is set",
                    constants::ACCOUNT_ID
                ))),
                (Backend::Simulated, _) => Err(Error::Config(format!(
                    "environment variable {var} is not set"
                ))),
            }
        };

        let ca_cert = PathBuf::from(require(constants::CA_CERT_PATH)?);
        let master = SaeRole {
            sae_id: get(constants::MASTER_SAE).unwrap_or_else(|| constants::DEFAULT_MASTER_SAE.into()),
            kme_endpoint: endpoint(constants::MASTER_KME_HOSTNAME, 1)?,
            credentials: Credentials::new(
                &ca_cert,
                require(constants::MASTER_CERT_PATH)?,
                require(constants::MASTER_KEY_PATH)?,
            ),
        };
        let slave = SaeRole {
            sae_id: get(constants::SLAVE_SAE).unwrap_or_else(|| constants::DEFAULT_SLAVE_SAE.into()),
            kme_endpoint: endpoint(constants::SLAVE_KME_HOSTNAME, 2)?,
            credentials: Credentials::new(
                &ca_cert,
                require(constants::SLAVE_CERT_PATH)?,
                require(constants::SLAVE_KEY_PATH)?,
            ),
        };

        master.credentials.validate()?;
        slave.credentials.validate()?;

        debug!(
            %backend,
            master = %sensitive(&master.kme_endpoint),
            slave = %sensitive(&slave.kme_endpoint),
            "KME configuration loaded"
        );

        Ok(Self {
            backend,
            master,
            slave,
            account_id,
        })
    }

    pub fn master_client(&self) -> Result<KmeClient> {
        self.master.client()
    }

    pub fn slave_client(&self) -> Result<KmeClient> {
        self.slave.client()
    }

    /// The (master, slave) pair for a key exchange.
    pub fn parties(&self) -> Result<(Party, Party)> {
        Ok((
            Party::new(self.master_client()?, &self.master.sae_id),
            Party::new(self.slave_client()?, &self.slave.sae_id),
        ))
    }
}

/// Environment handed to every OpenSSL based child process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpensslEnv {
    pub conf: PathBuf,
    pub modules: PathBuf,
    pub ld_library_path: String,
    pub path: String,
}

impl OpensslEnv {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::Config(format!("environment variable {name} is not set")))
        };

        let conf = PathBuf::from(require(constants::OPENSSL_CONF)?);
        let modules = PathBuf::from(require(constants::OPENSSL_MODULES)?);
        let ld_library_path = require(constants::LD_LIBRARY_PATH)?;
        let path = require(constants::PATH)?;

        if !conf.is_file() {
            return Err(Error::Config(format!(
                "{} points to {}, which is not a readable file",
                constants::OPENSSL_CONF,
                conf.display()
            )));
        }
        if !modules.is_dir() {
            return Err(Error::Config(format!(
                "{} points to {}, which is not a directory",
                constants::OPENSSL_MODULES,
                modules.display()
            )));
        }

        Ok(Self {
            conf,
            modules,
            ld_library_path,
            path,
        })
    }

    /// Resolve `program` against this environment's `PATH`.
    pub fn find_program(&self, program: &str) -> Result<PathBuf> {
        env::split_paths(&self.path)
            .map(|dir| dir.join(program))
            .find(|candidate| is_executable(candidate))
            .ok_or_else(|| Error::tool(program, "not found on PATH"))
    }

    /// The `openssl` binary the TLS drivers run.
    pub fn openssl(&self) -> Result<PathBuf> {
        self.find_program("openssl")
    }

    pub fn apply(&self, cmd: &mut tokio::process::Command) {
        cmd.env(constants::OPENSSL_CONF, &self.conf)
            .env(constants::OPENSSL_MODULES, &self.modules)
            .env(constants::LD_LIBRARY_PATH, &self.ld_library_path)
            .env(constants::PATH, &self.path);
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::fs;

    struct Fixture {
        dir: tempfile::TempDir,
        vars: HashMap<String, String>,
    }

    impl Fixture {
        fn new() -> std::io::Result<Self> {
            let dir = tempfile::tempdir()?;
            let mut vars = HashMap::new();
            for (var, file) in [
                (constants::CA_CERT_PATH, "ca.crt"),
                (constants::MASTER_CERT_PATH, "sae-1.crt"),
                (constants::MASTER_KEY_PATH, "sae-1.key"),
                (constants::SLAVE_CERT_PATH, "sae-2.crt"),
                (constants::SLAVE_KEY_PATH, "sae-2.key"),
            ] {
                let p = dir.path().join(file);
                fs::write(&p, "pem")?;
                vars.insert(var.to_string(), p.display().to_string());
            }
            Ok(Self { dir, vars })
        }

        fn set(mut self, k: &str, v: &str) -> Self {
            self.vars.insert(k.to_string(), v.to_string());
            self
        }

        fn load(&self) -> Result<KmeConfig> {
            KmeConfig::from_lookup(|k| self.vars.get(k).cloned())
        }
    }

    #[test]
    fn simulated_requires_hostnames() -> std::io::Result<()> {
        let fx = Fixture::new()?.set(constants::MASTER_KME_HOSTNAME, "localhost:8443");
        match fx.load() {
            Err(Error::Config(msg)) => {
                assert!(msg.contains(constants::SLAVE_KME_HOSTNAME), "{msg}")
            }
            other => panic!("unexpected {other:?}"),
        }

        let cfg = fx
            .set(constants::SLAVE_KME_HOSTNAME, "localhost:9443")
            .load()
            .unwrap();
        assert_eq!(cfg.backend, Backend::Simulated);
        assert_eq!(cfg.master.sae_id, "sae-1");
        assert_eq!(cfg.slave.sae_id, "sae-2");
        assert_eq!(cfg.slave.kme_endpoint, "localhost:9443");
        assert_eq!(cfg.master.credentials.ca_cert, cfg.slave.credentials.ca_cert);
        Ok(())
    }

    #[test]
    fn qukaydee_derives_endpoints() -> std::io::Result<()> {
        let cfg = Fixture::new()?
            .set(constants::BACKEND, "QuKayDee")
            .set(constants::ACCOUNT_ID, "2507")
            .set(constants::SLAVE_SAE, "bob")
            .load()
            .unwrap();
        assert_eq!(cfg.backend, Backend::Qukaydee);
        assert_eq!(
            cfg.master.kme_endpoint,
            "https://kme-1.acct-2507.etsi-qkd-api.qukaydee.com"
        );
        assert_eq!(
            cfg.slave.kme_endpoint,
            "https://kme-2.acct-2507.etsi-qkd-api.qukaydee.com"
        );
        assert_eq!(cfg.slave.sae_id, "bob");
        assert_eq!(cfg.account_id.as_deref(), Some("2507"));

        let missing = Fixture::new()?.set(constants::BACKEND, "qukaydee").load();
        assert!(matches!(missing, Err(Error::Config(_))));
        Ok(())
    }

    #[test]
    fn unknown_backend_and_missing_files() -> std::io::Result<()> {
        let fx = Fixture::new()?
            .set(constants::MASTER_KME_HOSTNAME, "a")
            .set(constants::SLAVE_KME_HOSTNAME, "b");
        let bad = Fixture::new()?.set(constants::BACKEND, "toshiba").load();
        assert!(matches!(bad, Err(Error::Config(_))));

        fs::remove_file(fx.dir.path().join("sae-2.key"))?;
        match fx.load() {
            Err(Error::Kme(etsi014::Error::Configuration(msg))) => {
                assert!(msg.contains("sae-2.key"), "{msg}")
            }
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn empty_value_counts_as_unset() -> std::io::Result<()> {
        let fx = Fixture::new()?
            .set(constants::MASTER_KME_HOSTNAME, "a")
            .set(constants::SLAVE_KME_HOSTNAME, "  ");
        assert!(matches!(fx.load(), Err(Error::Config(_))));
        Ok(())
    }

    #[test]
    #[serial_test::serial]
    fn reads_process_environment() -> std::io::Result<()> {
        let fx = Fixture::new()?
            .set(constants::MASTER_KME_HOSTNAME, "kme-1.local")
            .set(constants::SLAVE_KME_HOSTNAME, "kme-2.local");
        env::remove_var(constants::BACKEND);
        env::remove_var(constants::MASTER_SAE);
        env::remove_var(constants::SLAVE_SAE);
        for (k, v) in &fx.vars {
            env::set_var(k, v);
        }

        let cfg = KmeConfig::from_env();
        for k in fx.vars.keys() {
            env::remove_var(k);
        }
        assert_eq!(cfg.unwrap().master.kme_endpoint, "kme-1.local");
        assert!(KmeConfig::from_env().is_err());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn openssl_env_checks() -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let conf = dir.path().join("openssl.cnf");
        let modules = dir.path().join("modules");
        let bin = dir.path().join("bin");
        fs::write(&conf, "")?;
        fs::create_dir(&modules)?;
        fs::create_dir(&bin)?;

        let mut vars = HashMap::from([
            (constants::OPENSSL_CONF, conf.display().to_string()),
            (constants::OPENSSL_MODULES, modules.display().to_string()),
            (constants::LD_LIBRARY_PATH, "/opt/lib".to_string()),
            (constants::PATH, bin.display().to_string()),
        ]);
        let ossl = OpensslEnv::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert!(matches!(ossl.openssl(), Err(Error::ExternalTool { .. })));

        let openssl = bin.join("openssl");
        fs::write(&openssl, "#!/bin/sh\n")?;
        fs::set_permissions(&openssl, fs::Permissions::from_mode(0o755))?;
        assert_eq!(ossl.openssl().unwrap(), openssl);

        vars.insert(constants::OPENSSL_MODULES, conf.display().to_string());
        assert!(matches!(
            OpensslEnv::from_lookup(|k| vars.get(k).cloned()),
            Err(Error::Config(_))
        ));

        vars.remove(constants::LD_LIBRARY_PATH);
        match OpensslEnv::from_lookup(|k| vars.get(k).cloned()) {
            Err(Error::Config(msg)) => assert!(msg.contains("LD_LIBRARY_PATH"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    }
}
