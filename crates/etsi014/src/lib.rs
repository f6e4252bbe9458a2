//! Client side of the ETSI GS QKD 014 key delivery API.
//!
//! [`KmeClient`] issues the `status`, `enc_keys` and `dec_keys` calls against
//! a single KME over mutually authenticated TLS. [`Exchange`] strings them
//! together between a master and a slave KME and checks that the key ID
//! issued by one is redeemed at the other.
//!
//! ```ignore
//! let master = Party::new(KmeClient::new("kme-1.example:443", &master_creds)?, "sae-1");
//! let slave = Party::new(KmeClient::new("kme-2.example:443", &slave_creds)?, "sae-2");
//!
//! let report = Exchange::new(&master, &slave).run().await?;
//! if let Some(w) = report.correlation() {
//!     eprintln!("{w}");
//! }
//! ```

pub mod client;
pub mod credentials;
pub mod exchange;
pub mod types;

mod error;
pub use error::{Error, Result};

pub use client::KmeClient;
pub use credentials::Credentials;
pub use exchange::{Exchange, ExchangeError, ExchangeReport, ExchangeState, Party, Step};
pub use types::{
    CorrelationWarning, DecryptionKey, DecryptionKeyRequest, EncryptionKey, KeyIdEntry,
    KeyRecord, KeyRequest, KeyStatus,
};

#[cfg(test)]
pub(crate) mod test_utils;
