//! Client identity used to reach a KME over mutually authenticated TLS.

use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// CA bundle plus the client certificate/key pair of one SAE.
///
/// Files are only checked for existence and readability. Malformed
/// certificate content surfaces later as a TLS handshake failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub ca_cert: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

impl Credentials {
    pub fn new(
        ca_cert: impl Into<PathBuf>,
        client_cert: impl Into<PathBuf>,
        client_key: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ca_cert: ca_cert.into(),
            client_cert: client_cert.into(),
            client_key: client_key.into(),
        }
    }

    /// Ensure all three files exist and can be opened for reading.
    pub fn validate(&self) -> Result<()> {
        check_readable("CA certificate", &self.ca_cert)?;
        check_readable("client certificate", &self.client_cert)?;
        check_readable("client key", &self.client_key)?;
        Ok(())
    }

    /// Load the trust anchor and the client identity for reqwest.
    pub(crate) fn load(&self) -> Result<(reqwest::Certificate, reqwest::Identity)> {
        let ca_pem = read("CA certificate", &self.ca_cert)?;
        let ca = reqwest::Certificate::from_pem(&ca_pem).map_err(|e| {
            Error::Configuration(format!(
                "CA certificate {} is not usable: {e}",
                self.ca_cert.display()
            ))
        })?;

        // rustls wants certificate and private key in a single PEM buffer
        let mut identity_pem = read("client certificate", &self.client_cert)?;
        if !identity_pem.ends_with(b"\n") {
            identity_pem.push(b'\n');
        }
        identity_pem.extend(read("client key", &self.client_key)?);
        let identity = reqwest::Identity::from_pem(&identity_pem).map_err(|e| {
            Error::Configuration(format!(
                "client identity {} / {} is not usable: {e}",
                self.client_cert.display(),
                self.client_key.display()
            ))
        })?;

        Ok((ca, identity))
    }
}

fn check_readable(what: &str, path: &Path) -> Result<()> {
    fs::File::open(path)
        .map(|_| ())
        .map_err(|e| Error::Configuration(format!("cannot read {what} {}: {e}", path.display())))
}

fn read(what: &str, path: &Path) -> Result<Vec<u8>> {
    fs::read(path)
        .map_err(|e| Error::Configuration(format!("cannot read {what} {}: {e}", path.display())))
}
