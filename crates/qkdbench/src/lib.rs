//! Benchmark drivers for QKD-enhanced KEM providers.
//!
//! Two measurements are supported, each writing one CSV file through a
//! [`recorder::Recorder`]:
//!
//! - **kem**: raw keygen / encaps / decaps timings reported by an external
//!   benchmark binary built against the provider ([`kem`]).
//! - **tls**: full TLS 1.3 handshake times for every (KEM, certificate)
//!   combination using `openssl s_server` / `s_client` ([`tls`]).
//!
//! QKD-backed runs draw keys from a shared KME pool; [`backpressure`] pauses
//! the sweep when that pool runs low. The ETSI-014 exchange itself lives in
//! the `etsi014` crate.

pub mod backpressure;
pub mod catalog;
pub mod cleanup;
pub mod config;
pub mod kem;
pub mod logging;
pub mod recorder;
pub mod tls;

mod error;
pub use error::{Error, Result};
