//! Errors that can occur while talking to a KME.

use std::fmt;

use thiserror::Error;

/// Result type returning [`Error`] or `T`
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or unreadable certificate material, or an unusable endpoint.
    /// Raised before any network call is made.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// `status` returned something other than 200.
    #[error("status query to {endpoint} for SAE {sae_id} failed with HTTP {code}: {body}")]
    StatusQuery {
        endpoint: String,
        sae_id: String,
        code: u16,
        body: String,
    },

    /// `enc_keys` or `dec_keys` returned something other than 200.
    #[error("key retrieval from {endpoint} for SAE {sae_id} failed with HTTP {code}: {body}")]
    KeyRetrieval {
        endpoint: String,
        sae_id: String,
        code: u16,
        body: String,
    },

    /// A 200 response whose `keys` list is present but empty.
    #[error("{endpoint} returned an empty key list for SAE {sae_id}")]
    EmptyKeyList { endpoint: String, sae_id: String },

    /// A 200 response that cannot be used: bad JSON, missing fields, a null
    /// or stringified-null key ID, or key material that is not base64.
    #[error("malformed response from {endpoint}: {reason}")]
    MalformedResponse { endpoint: String, reason: String },

    /// The request never produced an HTTP response (connection refused, TLS
    /// handshake failure, timeout).
    #[error("transport error talking to {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// An exchange step was attempted from a state that does not allow it.
    #[error("cannot run {attempted} while exchange is {state}")]
    InvalidTransition {
        attempted: crate::exchange::Step,
        state: &'static str,
    },
}

impl Error {
    /// HTTP status code of the failing response, if the failure was an HTTP
    /// level rejection.
    pub fn http_code(&self) -> Option<u16> {
        match self {
            Error::StatusQuery { code, .. } | Error::KeyRetrieval { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Raw response body of the failing response, if one was received.
    pub fn raw_body(&self) -> Option<&str> {
        match self {
            Error::StatusQuery { body, .. } | Error::KeyRetrieval { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Faults where the KME answered 200 but the payload broke the protocol.
    pub fn is_protocol_fault(&self) -> bool {
        matches!(
            self,
            Error::EmptyKeyList { .. } | Error::MalformedResponse { .. }
        )
    }

    pub(crate) fn malformed(endpoint: impl fmt::Display, reason: impl Into<String>) -> Self {
        Error::MalformedResponse {
            endpoint: endpoint.to_string(),
            reason: reason.into(),
        }
    }
}
