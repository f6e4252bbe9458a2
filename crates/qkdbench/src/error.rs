//! Errors raised by the benchmark drivers.

use std::io;

use thiserror::Error;

/// Result type returning [`Error`] or `T`
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Unset environment value, unreadable file, unknown backend. Always
    /// detected before any network call or child process.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The external benchmark or TLS tool is missing, not executable, exited
    /// non-zero, or did not report success.
    #[error("external tool `{tool}` failed: {reason}")]
    ExternalTool { tool: String, reason: String },

    #[error(transparent)]
    Kme(#[from] etsi014::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn tool(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ExternalTool {
            tool: tool.into(),
            reason: reason.into(),
        }
    }
}
