//! TLS 1.3 handshake sweep over every (KEM, certificate) combination.
//!
//! The sweep itself knows nothing about OpenSSL: handshakes are driven
//! through a [`HandshakeRunner`], with [`openssl::OpensslRunner`] as the
//! production implementation. A failing iteration ends its combination only;
//! the sweep moves on to the next one and reports all failures at the end.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::backpressure::Backpressure;
use crate::catalog::{CertType, Provider};
use crate::recorder::{Recorder, TlsRecord};
use crate::{Error, Result};

pub mod openssl;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Combination {
    pub kem: String,
    pub cert: CertType,
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kem, self.cert)
    }
}

/// Performs the handshakes of one combination at a time.
#[async_trait]
pub trait HandshakeRunner: Send {
    /// Called once before the first iteration of `combo`.
    async fn prepare(&mut self, combo: &Combination) -> Result<()>;

    /// Run one handshake and return how long it took.
    async fn handshake(&mut self, combo: &Combination) -> Result<Duration>;

    /// Called once after the last iteration of `combo`, including after a
    /// failure.
    async fn finish(&mut self, combo: &Combination);
}

#[derive(Clone, Debug)]
pub struct TlsSweep {
    pub kems: Vec<String>,
    pub certs: Vec<CertType>,
    pub iterations: u32,
    pub provider: Provider,
    /// Pause between two combinations.
    pub delay: Duration,
}

impl TlsSweep {
    /// Cartesian product, KEM-major.
    pub fn combinations(&self) -> Vec<Combination> {
        self.kems
            .iter()
            .flat_map(|kem| {
                self.certs.iter().map(move |cert| Combination {
                    kem: kem.clone(),
                    cert: cert.clone(),
                })
            })
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(Error::InvalidArgument(
                "iterations must be a positive integer".into(),
            ));
        }
        if self.kems.is_empty() {
            return Err(Error::InvalidArgument("no KEMs to benchmark".into()));
        }
        if self.certs.is_empty() {
            return Err(Error::InvalidArgument("no certificate types to benchmark".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct CombinationFailure {
    pub combination: Combination,
    /// Iteration that failed; 0 when the combination never got started.
    pub iteration: u32,
    pub reason: String,
}

#[derive(Clone, Debug)]
pub struct SweepSummary {
    pub attempted: usize,
    pub failed: Vec<CombinationFailure>,
    pub rows: usize,
    pub output: PathBuf,
}

impl SweepSummary {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for SweepSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TLS benchmark summary")?;
        writeln!(f, "  combinations attempted: {}", self.attempted)?;
        writeln!(f, "  combinations failed:    {}", self.failed.len())?;
        for fail in &self.failed {
            match fail.iteration {
                0 => writeln!(f, "    {}: setup: {}", fail.combination, fail.reason)?,
                i => writeln!(f, "    {}: iteration {i}: {}", fail.combination, fail.reason)?,
            }
        }
        writeln!(f, "  rows written:           {}", self.rows)?;
        write!(f, "  results:                {}", self.output.display())
    }
}

/// Run `sweep.iterations` handshakes for every combination, recording each
/// success. When `backpressure` is given the key pool is checked once up
/// front and then every N recorded handshakes.
pub async fn run_tls_benchmark(
    sweep: &TlsSweep,
    runner: &mut dyn HandshakeRunner,
    recorder: &mut Recorder<TlsRecord>,
    mut backpressure: Option<&mut Backpressure>,
) -> Result<SweepSummary> {
    sweep.validate()?;

    if let Some(bp) = backpressure.as_deref() {
        bp.check_key_status().await;
    }

    let combinations = sweep.combinations();
    let mut failed = Vec::new();
    info!(
        provider = %sweep.provider,
        combinations = combinations.len(),
        iterations = sweep.iterations,
        "starting TLS sweep"
    );

    for (idx, combo) in combinations.iter().enumerate() {
        if idx > 0 && !sweep.delay.is_zero() {
            info!("waiting {:?} before {combo}", sweep.delay);
            tokio::time::sleep(sweep.delay).await;
        }
        info!("benchmarking {combo}");

        if let Err(e) = runner.prepare(combo).await {
            error!("{combo}: setup failed: {e}");
            failed.push(CombinationFailure {
                combination: combo.clone(),
                iteration: 0,
                reason: e.to_string(),
            });
            runner.finish(combo).await;
            continue;
        }

        for iteration in 1..=sweep.iterations {
            let elapsed = match runner.handshake(combo).await {
                Ok(d) => d,
                Err(e) => {
                    warn!("{combo}: iteration {iteration} failed, skipping the rest: {e}");
                    failed.push(CombinationFailure {
                        combination: combo.clone(),
                        iteration,
                        reason: e.to_string(),
                    });
                    break;
                }
            };

            recorder.append(&TlsRecord {
                kem: combo.kem.clone(),
                cert: combo.cert.kind.to_string(),
                iteration,
                time_ms: elapsed.as_secs_f64() * 1000.0,
            })?;

            if let Some(bp) = backpressure.as_deref_mut() {
                bp.tick().await;
            }
        }

        runner.finish(combo).await;
    }

    Ok(SweepSummary {
        attempted: combinations.len(),
        failed,
        rows: recorder.rows(),
        output: recorder.path().to_path_buf(),
    })
}
