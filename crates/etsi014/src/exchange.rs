//! The three call key exchange between a master and a slave KME.
//!
//! ```txt
//!   Init --status--> StatusOk --enc_keys--> EncKeysOk --dec_keys--> DecKeysOk
//!     \                 \                      \
//!      +-----------------+----------------------+------> Failed
//! ```
//!
//! The master KME is reached with the initiator SAE's identity and hands out
//! a key plus its ID. Only the ID is passed to the slave KME, which is
//! reached with the responder SAE's identity and must return the same key.
//! Steps are strictly ordered and never retried within one exchange; a
//! failed exchange is reported and the caller decides whether to start a
//! new one.

use std::fmt;

use tracing::{debug, info, warn};

use crate::{
    CorrelationWarning, DecryptionKey, EncryptionKey, Error, KeyStatus, KmeClient, Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Status,
    EncKeys,
    DecKeys,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Status => write!(f, "status"),
            Step::EncKeys => write!(f, "enc_keys"),
            Step::DecKeys => write!(f, "dec_keys"),
        }
    }
}

#[derive(Debug)]
pub enum ExchangeState {
    Init,
    StatusOk {
        status: KeyStatus,
    },
    EncKeysOk {
        status: KeyStatus,
        key: EncryptionKey,
    },
    DecKeysOk,
    Failed {
        step: Step,
    },
}

impl ExchangeState {
    pub fn name(&self) -> &'static str {
        match self {
            ExchangeState::Init => "INIT",
            ExchangeState::StatusOk { .. } => "STATUS_OK",
            ExchangeState::EncKeysOk { .. } => "ENC_KEYS_OK",
            ExchangeState::DecKeysOk => "DEC_KEYS_OK",
            ExchangeState::Failed { .. } => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExchangeState::DecKeysOk | ExchangeState::Failed { .. })
    }

    /// Pool status held since a successful status query.
    pub fn status(&self) -> Option<&KeyStatus> {
        match self {
            ExchangeState::StatusOk { status } | ExchangeState::EncKeysOk { status, .. } => {
                Some(status)
            }
            _ => None,
        }
    }

    /// Key handed out by the master KME, until it is redeemed.
    pub fn enc_key(&self) -> Option<&EncryptionKey> {
        match self {
            ExchangeState::EncKeysOk { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// One side of the exchange: a KME client and the SAE it speaks for.
#[derive(Clone, Debug)]
pub struct Party {
    pub client: KmeClient,
    pub sae_id: String,
}

impl Party {
    pub fn new(client: KmeClient, sae_id: impl Into<String>) -> Self {
        Self {
            client,
            sae_id: sae_id.into(),
        }
    }
}

/// Outcome of a completed exchange.
#[derive(Debug)]
pub struct ExchangeReport {
    pub status: KeyStatus,
    pub enc_key: EncryptionKey,
    pub dec_key: DecryptionKey,
}

impl ExchangeReport {
    pub fn key_id(&self) -> &str {
        self.enc_key.id()
    }

    pub fn correlation(&self) -> Option<&CorrelationWarning> {
        self.dec_key.correlation.as_ref()
    }

    /// Whether both KMEs delivered identical key material.
    pub fn material_matches(&self) -> bool {
        self.enc_key.material() == self.dec_key.key.material()
    }
}

/// An exchange that reached `Failed`, with the step that broke it.
#[derive(Debug, thiserror::Error)]
#[error("{step} step failed: {source}")]
pub struct ExchangeError {
    pub step: Step,
    #[source]
    pub source: Error,
}

pub struct Exchange<'a> {
    master: &'a Party,
    slave: &'a Party,
    state: ExchangeState,
}

impl<'a> Exchange<'a> {
    pub fn new(master: &'a Party, slave: &'a Party) -> Self {
        Self {
            master,
            slave,
            state: ExchangeState::Init,
        }
    }

    pub fn state(&self) -> &ExchangeState {
        &self.state
    }

    /// Query the master KME's pool for the slave SAE. Only valid from `Init`.
    pub async fn status(&mut self) -> Result<&KeyStatus> {
        if !matches!(self.state, ExchangeState::Init) {
            return Err(self.reject(Step::Status));
        }

        match self.master.client.get_status(&self.slave.sae_id).await {
            Ok(status) => {
                self.state = ExchangeState::StatusOk { status };
                self.state.status().ok_or_else(|| self.reject(Step::Status))
            }
            Err(e) => Err(self.fail(Step::Status, e)),
        }
    }

    /// Ask the master KME for a key toward the slave SAE. Only valid right
    /// after a successful status query.
    pub async fn enc_keys(&mut self) -> Result<&EncryptionKey> {
        let status = match std::mem::replace(&mut self.state, ExchangeState::Init) {
            ExchangeState::StatusOk { status } => status,
            other => {
                self.state = other;
                return Err(self.reject(Step::EncKeys));
            }
        };

        match self.master.client.get_enc_keys(&self.slave.sae_id).await {
            Ok(key) => {
                self.state = ExchangeState::EncKeysOk { status, key };
                self.state.enc_key().ok_or_else(|| self.reject(Step::EncKeys))
            }
            Err(e) => Err(self.fail(Step::EncKeys, e)),
        }
    }

    /// Redeem the key ID at the slave KME. Only valid right after a
    /// successful `enc_keys`.
    pub async fn dec_keys(&mut self) -> Result<ExchangeReport> {
        let (status, enc_key) = match std::mem::replace(&mut self.state, ExchangeState::Init) {
            ExchangeState::EncKeysOk { status, key } => (status, key),
            other => {
                self.state = other;
                return Err(self.reject(Step::DecKeys));
            }
        };

        let res = self
            .slave
            .client
            .get_dec_keys(&self.master.sae_id, enc_key.id(), &self.master.sae_id)
            .await;

        match res {
            Ok(dec_key) => {
                self.state = ExchangeState::DecKeysOk;
                let report = ExchangeReport {
                    status,
                    enc_key,
                    dec_key,
                };
                if !report.material_matches() {
                    warn!(key_id = report.key_id(), "key material differs between KMEs");
                }
                Ok(report)
            }
            Err(e) => Err(self.fail(Step::DecKeys, e)),
        }
    }

    /// Drive the exchange from `Init` to a terminal state.
    pub async fn run(mut self) -> std::result::Result<ExchangeReport, ExchangeError> {
        let step_err = |step: Step| move |source: Error| ExchangeError { step, source };

        self.status().await.map_err(step_err(Step::Status))?;
        self.enc_keys().await.map_err(step_err(Step::EncKeys))?;
        let report = self.dec_keys().await.map_err(step_err(Step::DecKeys))?;

        match report.correlation() {
            None => info!(key_id = report.key_id(), "key exchange completed"),
            Some(w) => warn!("key exchange completed with correlation warning: {w}"),
        }
        Ok(report)
    }

    fn fail(&mut self, step: Step, e: Error) -> Error {
        debug!(%step, "exchange failed: {e}");
        self.state = ExchangeState::Failed { step };
        e
    }

    fn reject(&self, attempted: Step) -> Error {
        Error::InvalidTransition {
            attempted,
            state: self.state.name(),
        }
    }
}
