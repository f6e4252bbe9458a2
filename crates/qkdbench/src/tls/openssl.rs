//! [`HandshakeRunner`] backed by the `openssl` command line tool.
//!
//! One `s_server` is started per combination and kept until the
//! combination is done; each iteration runs a fresh `s_client` against it
//! and times the whole client invocation.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::{Combination, HandshakeRunner};
use crate::catalog::Provider;
use crate::cleanup::own_prefix;
use crate::config::OpensslEnv;
use crate::{Error, Result};

/// Printed by `s_client` once a handshake has completed.
pub const SUCCESS_MARKER: &str = "SSL handshake has read";

pub const DEFAULT_PORT: u16 = 4433;

const READY_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct OpensslRunner {
    openssl: PathBuf,
    env: OpensslEnv,
    certs_dir: PathBuf,
    provider: Provider,
    port: u16,
    server: Option<(Child, NamedTempFile)>,
}

impl OpensslRunner {
    pub fn new(
        env: OpensslEnv,
        certs_dir: impl Into<PathBuf>,
        provider: Provider,
        port: u16,
    ) -> Result<Self> {
        let openssl = env.openssl()?;
        let certs_dir = certs_dir.into();
        if !certs_dir.is_dir() {
            return Err(Error::Config(format!(
                "certificate directory {} not found",
                certs_dir.display()
            )));
        }
        Ok(Self {
            openssl,
            env,
            certs_dir,
            provider,
            port,
            server: None,
        })
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.openssl);
        self.env.apply(&mut cmd);
        cmd.kill_on_drop(true);
        cmd
    }

    fn check_cert_files(&self, combo: &Combination) -> Result<()> {
        let files = [
            combo.cert.entity_cert(&self.certs_dir),
            combo.cert.entity_key(&self.certs_dir),
            combo.cert.root_cert(&self.certs_dir),
        ];
        match files.iter().find(|f| !f.is_file()) {
            Some(missing) => Err(Error::Config(format!(
                "{} certificate file {} not found",
                combo.cert,
                missing.display()
            ))),
            None => Ok(()),
        }
    }

    pub(crate) fn server_command(&self, combo: &Combination) -> Command {
        let mut cmd = self.base_command();
        cmd.arg("s_server")
            .arg("-cert")
            .arg(combo.cert.entity_cert(&self.certs_dir))
            .arg("-key")
            .arg(combo.cert.entity_key(&self.certs_dir))
            .args(["-www", "-tls1_3", "-groups", combo.kem.as_str()])
            .arg("-port")
            .arg(self.port.to_string())
            .args(["-provider", "default", "-provider", self.provider.module_name()])
            .stdin(Stdio::null());
        cmd
    }

    pub(crate) fn client_command(&self, combo: &Combination) -> Command {
        let mut cmd = self.base_command();
        cmd.arg("s_client")
            .arg("-connect")
            .arg(format!("localhost:{}", self.port))
            .args(["-groups", combo.kem.as_str()])
            .arg("-CAfile")
            .arg(combo.cert.root_cert(&self.certs_dir))
            .args(["-provider", "default", "-provider", self.provider.module_name()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Start `s_server` for `combo` and wait until it accepts connections.
    /// Returns the time from spawn to the first accepted connection.
    pub async fn start_server(&mut self, combo: &Combination) -> Result<Duration> {
        self.stop_server().await;
        self.check_cert_files(combo)?;
        if port_accepting(self.port).await {
            return Err(Error::Config(format!(
                "port {} in use before s_server started",
                self.port
            )));
        }

        let log = tempfile::Builder::new()
            .prefix(&format!("{}server-", own_prefix()))
            .suffix(".log")
            .tempfile()?;
        let mut cmd = self.server_command(combo);
        cmd.stdout(Stdio::from(log.reopen()?))
            .stderr(Stdio::from(log.reopen()?));

        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::tool("openssl s_server", format!("failed to start: {e}")))?;

        match wait_for_port(&mut child, self.port, READY_TIMEOUT).await {
            Ok(()) => {
                let elapsed = start.elapsed();
                debug!("{combo}: s_server ready on port {} after {elapsed:?}", self.port);
                self.server = Some((child, log));
                Ok(elapsed)
            }
            Err(reason) => {
                let _ = child.kill().await;
                let output = std::fs::read_to_string(log.path()).unwrap_or_default();
                Err(Error::tool(
                    "openssl s_server",
                    format!("{reason}; server output: {}", last_lines(&output, 5)),
                ))
            }
        }
    }

    pub async fn stop_server(&mut self) {
        if let Some((mut child, _log)) = self.server.take() {
            if let Err(e) = child.kill().await {
                warn!("failed to stop s_server: {e}");
            }
        }
    }
}

#[async_trait]
impl HandshakeRunner for OpensslRunner {
    async fn prepare(&mut self, combo: &Combination) -> Result<()> {
        self.start_server(combo).await.map(|_| ())
    }

    async fn handshake(&mut self, combo: &Combination) -> Result<Duration> {
        let start = Instant::now();
        let mut child = self
            .client_command(combo)
            .spawn()
            .map_err(|e| Error::tool("openssl s_client", format!("failed to start: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            // s_client quits on "Q"; a closed pipe just means it exited first
            let _ = stdin.write_all(b"Q\n").await;
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::tool("openssl s_client", e.to_string()))?;
        let elapsed = start.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        trace!("{combo}: s_client output:\n{stdout}{stderr}");

        if !output.status.success() {
            return Err(Error::tool(
                "openssl s_client",
                format!("exited with {}: {}", output.status, last_lines(&stderr, 3)),
            ));
        }
        if !handshake_completed(&stdout) && !handshake_completed(&stderr) {
            return Err(Error::tool(
                "openssl s_client",
                format!("\"{SUCCESS_MARKER}\" not found in output"),
            ));
        }
        Ok(elapsed)
    }

    async fn finish(&mut self, _combo: &Combination) {
        self.stop_server().await;
    }
}

pub fn handshake_completed(output: &str) -> bool {
    output.contains(SUCCESS_MARKER)
}

async fn port_accepting(port: u16) -> bool {
    TcpStream::connect(("127.0.0.1", port)).await.is_ok()
}

/// Poll `port` on localhost until something accepts, the child exits, or
/// `timeout` passes. The child must still be running once the port accepts.
async fn wait_for_port(
    child: &mut Child,
    port: u16,
    timeout: Duration,
) -> std::result::Result<(), String> {
    let deadline = Instant::now() + timeout;
    loop {
        let accepting = port_accepting(port).await;
        match child.try_wait() {
            Ok(Some(status)) => return Err(format!("exited early with {status}")),
            Ok(None) if accepting => return Ok(()),
            Ok(None) => {}
            Err(e) => return Err(format!("cannot poll process: {e}")),
        }
        if Instant::now() >= deadline {
            return Err(format!("port {port} not accepting after {timeout:?}"));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn last_lines(s: &str, n: usize) -> String {
    let lines: Vec<&str> = s.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(n)..].join(" | ")
}

/// Server startup times over repeated launches.
#[derive(Clone, Debug, Default)]
pub struct StartupStats {
    pub samples: Vec<Duration>,
}

impl StartupStats {
    pub fn average(&self) -> Option<Duration> {
        let n = u32::try_from(self.samples.len()).ok().filter(|n| *n > 0)?;
        Some(self.samples.iter().sum::<Duration>() / n)
    }

    pub fn min(&self) -> Option<Duration> {
        self.samples.iter().min().copied()
    }

    pub fn max(&self) -> Option<Duration> {
        self.samples.iter().max().copied()
    }
}

impl fmt::Display for StartupStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = |d: Option<Duration>| d.map(|d| d.as_secs_f64() * 1000.0).unwrap_or(0.0);
        writeln!(f, "Average startup time: {:.2} ms", ms(self.average()))?;
        writeln!(f, "Min: {:.2} ms", ms(self.min()))?;
        write!(f, "Max: {:.2} ms", ms(self.max()))
    }
}

/// Launch `s_server` for `combo` `n` times, timing spawn to first accepted
/// connection. Each sample is reported through `on_sample` as it is taken.
pub async fn measure_server_startup<F>(
    runner: &mut OpensslRunner,
    combo: &Combination,
    n: u32,
    mut on_sample: F,
) -> Result<StartupStats>
where
    F: FnMut(u32, Duration),
{
    if n == 0 {
        return Err(Error::InvalidArgument(
            "iterations must be a positive integer".into(),
        ));
    }

    let mut stats = StartupStats::default();
    for i in 1..=n {
        let elapsed = runner.start_server(combo).await;
        runner.stop_server().await;
        let elapsed = elapsed?;
        on_sample(i, elapsed);
        stats.samples.push(elapsed);
    }
    Ok(stats)
}
