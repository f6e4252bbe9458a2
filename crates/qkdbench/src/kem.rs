//! Driver for the external KEM benchmark binary.
//!
//! The binary is built against the provider under test and loops over every
//! KEM the provider exposes on its own. It is invoked as
//! `<bin> <provider_module> <config_file> <iterations>`, writes its
//! `alg,iter,keygen,encaps,decaps` rows to a CSV of its own and announces
//! that file on stdout with a `Results will be saved to: <path>` line. Once
//! the binary exits, the rows of that file are re-read and written through
//! the [`Recorder`]. Rows printed directly on stdout are accepted as well
//! when no results file is announced.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::catalog::Provider;
use crate::config::OpensslEnv;
use crate::recorder::{KemRecord, Recorder};
use crate::{Error, Result};

/// Stdout line prefix announcing the binary's own results file.
pub const RESULTS_MARKER: &str = "Results will be saved to:";

#[derive(Clone, Debug)]
pub struct KemBenchmark {
    pub bench_bin: PathBuf,
    pub config_file: PathBuf,
    pub provider: Provider,
    pub iterations: u32,
    /// Number of times the binary is run back to back.
    pub runs: u32,
    /// Pause between two runs.
    pub delay: Duration,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KemSummary {
    pub runs_completed: u32,
    pub rows: usize,
    pub algorithms: BTreeSet<String>,
    /// Exit code of the last run; 0 when every run succeeded.
    pub exit_code: i32,
}

impl KemSummary {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

impl KemBenchmark {
    fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(Error::InvalidArgument(
                "iterations must be a positive integer".into(),
            ));
        }
        if self.runs == 0 {
            return Err(Error::InvalidArgument("runs must be a positive integer".into()));
        }
        if self.iterations.checked_mul(self.runs).is_none() {
            return Err(Error::InvalidArgument(format!(
                "{} runs of {} iterations overflow the iteration counter",
                self.runs, self.iterations
            )));
        }
        if !self.bench_bin.is_file() {
            return Err(Error::tool(
                self.bench_bin.display().to_string(),
                "benchmark binary not found",
            ));
        }
        if !self.config_file.is_file() {
            return Err(Error::Config(format!(
                "OpenSSL config file {} not found",
                self.config_file.display()
            )));
        }
        Ok(())
    }

    fn command(&self, env: &OpensslEnv) -> Command {
        let mut cmd = Command::new(&self.bench_bin);
        cmd.arg(self.provider.module_name())
            .arg(&self.config_file)
            .arg(self.iterations.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        env.apply(&mut cmd);
        cmd
    }
}

/// Path announced by a `Results will be saved to: <path>` line, if `line`
/// is one. Relative paths are kept relative; the child shares our working
/// directory.
fn results_path(line: &str) -> Option<PathBuf> {
    let path = line.trim().strip_prefix(RESULTS_MARKER)?.trim();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

/// Data rows of the binary's results file. The header and anything else
/// that does not parse as a row is skipped.
async fn read_results(tool: &str, path: &Path) -> Result<Vec<KemRecord>> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::tool(tool, format!("cannot read results file {}: {e}", path.display()))
    })?;
    Ok(content.lines().filter_map(KemRecord::parse_line).collect())
}

/// Run the KEM benchmark binary `bench.runs` times, recording every row it
/// produces. A run that exits non-zero stops the loop and its exit code is
/// returned in the summary; rows already recorded are kept. A run that
/// exits cleanly without producing a single row is an error.
pub async fn run_kem_benchmark(
    bench: &KemBenchmark,
    env: &OpensslEnv,
    recorder: &mut Recorder<KemRecord>,
) -> Result<KemSummary> {
    bench.validate()?;
    let tool = bench.bench_bin.display().to_string();
    let mut summary = KemSummary::default();

    for run in 0..bench.runs {
        if run > 0 && !bench.delay.is_zero() {
            info!("waiting {:?} before run {}", bench.delay, run + 1);
            tokio::time::sleep(bench.delay).await;
        }

        info!(
            provider = %bench.provider,
            iterations = bench.iterations,
            "starting KEM benchmark run {}/{}",
            run + 1,
            bench.runs
        );

        let mut child = bench
            .command(env)
            .spawn()
            .map_err(|e| Error::tool(&tool, format!("failed to start: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::tool(&tool, "stdout was not captured"))?;

        let mut printed = Vec::new();
        let mut results_file = None;
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            // progress bars redraw with '\r' and can share a line with a row
            for segment in line.split('\r') {
                if let Some(rec) = KemRecord::parse_line(segment) {
                    printed.push(rec);
                } else if let Some(path) = results_path(segment) {
                    debug!("{tool} writes results to {}", path.display());
                    results_file = Some(path);
                } else if !segment.trim().is_empty() {
                    debug!("{tool}: {}", segment.trim());
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::tool(&tool, format!("failed to wait for exit: {e}")))?;

        let rows = match &results_file {
            Some(path) if path.is_file() || status.success() => read_results(&tool, path).await?,
            _ => printed,
        };

        // validated: run * iterations < runs * iterations fits in u32
        let offset = run * bench.iterations;
        let recorded = rows.len();
        for mut rec in rows {
            rec.algorithm = bench.provider.tag_algorithm(&rec.algorithm);
            rec.iteration = rec.iteration.checked_add(offset).ok_or_else(|| {
                Error::tool(&tool, format!("iteration {} is out of range", rec.iteration))
            })?;
            summary.algorithms.insert(rec.algorithm.clone());
            recorder.append(&rec)?;
            summary.rows += 1;
        }

        if !status.success() {
            // a signal-terminated child has no code
            summary.exit_code = status.code().unwrap_or(1);
            warn!("{tool} exited with {status}, stopping after {} run(s)", run);
            return Ok(summary);
        }
        if recorded == 0 {
            return Err(Error::tool(
                &tool,
                format!("run {} finished without producing any rows", run + 1),
            ));
        }
        summary.runs_completed += 1;
    }

    info!(
        algorithms = summary.algorithms.len(),
        rows = summary.rows,
        "KEM benchmark finished"
    );
    Ok(summary)
}
