//! # tls_bench
//!
//! Times TLS 1.3 handshakes for every (KEM, certificate) combination using
//! `openssl s_server` / `s_client` with the provider under test loaded.
//!
//! ```txt
//! Usage: tls_bench [OPTIONS]
//!
//! Options:
//!   -i, --iterations <N>              Handshakes per combination [default: 10]
//!   -p, --provider <PROVIDER>         Provider under test (qkd/oqs) [default: oqs]
//!   -d, --delay <SECS>                Pause between combinations, in seconds [default: 0]
//!   -k, --kems <KEMS>                 Comma separated TLS groups (defaults to the provider's ML-KEM set)
//!   -c, --certs <CERTS>               Comma separated certificate types [default: rsa,dilithium,falcon]
//!       --certs-dir <DIR>             Certificate tree [default: certs]
//!       --port <PORT>                 s_server port [default: 4433]
//!       --check-every <N>             Key pool check interval in handshakes, 0 disables [default: 100]
//!       --key-threshold <K>           Minimum stored keys before pausing [default: 100]
//!       --replenish-delay <SECS>      Pause when the pool is low, in seconds [default: 30]
//!   -o, --out-dir <DIR>               Directory for the CSV output [default: benchmarks]
//!   -l, --log-level <LOG_LEVEL>       Log Level (ERROR/WARN/INFO/DEBUG/TRACE) [default: INFO]
//!   -x, --unsafe-logging              Disable the address scrubber on logging
//! ```
//!
//! With `--provider qkd` the KME settings are read from the `QKD_*`
//! environment variables so the key pool can be watched during the sweep.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use qkdbench::backpressure::{Backpressure, MasterKmeMonitor};
use qkdbench::catalog::{kem_family, CertType, Provider};
use qkdbench::cleanup;
use qkdbench::config::{KmeConfig, OpensslEnv};
use qkdbench::logging::init_logging_recvr;
use qkdbench::recorder::{output_path_today, Mode, Recorder, TlsRecord};
use qkdbench::tls::openssl::{OpensslRunner, DEFAULT_PORT};
use qkdbench::tls::{run_tls_benchmark, TlsSweep};

#[derive(Parser, Debug)]
#[command(author, version, about = "TLS 1.3 handshake benchmark over KEM/certificate combinations", long_about = None)]
struct CliArgs {
    /// Handshakes per combination
    #[arg(short, long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    iterations: u32,

    /// Provider under test (qkd/oqs)
    #[arg(short, long, default_value = "oqs")]
    provider: Provider,

    /// Pause between combinations, in seconds
    #[arg(short, long, default_value_t = 0)]
    delay: u64,

    /// Comma separated TLS groups (defaults to the provider's ML-KEM set)
    #[arg(short, long, value_delimiter = ',')]
    kems: Vec<String>,

    /// Comma separated certificate types
    #[arg(short, long, value_delimiter = ',', default_value = "rsa,dilithium,falcon")]
    certs: Vec<CertType>,

    /// Certificate tree
    #[arg(long, default_value = "certs")]
    certs_dir: PathBuf,

    /// s_server port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Key pool check interval in handshakes, 0 disables
    #[arg(long, default_value_t = 100)]
    check_every: u64,

    /// Minimum stored keys before pausing
    #[arg(long, default_value_t = 100)]
    key_threshold: u64,

    /// Pause when the pool is low, in seconds
    #[arg(long, default_value_t = 30)]
    replenish_delay: u64,

    /// Directory for the CSV output
    #[arg(short, long, default_value = "benchmarks")]
    out_dir: PathBuf,

    /// Log Level (ERROR/WARN/INFO/DEBUG/TRACE)
    #[arg(short, long, default_value_t=String::from("INFO"))]
    log_level: String,

    /// Disable the address scrubber on logging
    #[arg(short = 'x', long, action)]
    unsafe_logging: bool,
}

/// Key pool watcher for QKD runs, `None` for baseline runs or when disabled.
fn backpressure(args: &CliArgs) -> Result<Option<Backpressure>> {
    if !args.provider.consumes_qkd_keys() || args.check_every == 0 {
        return Ok(None);
    }

    let kme = KmeConfig::from_env().context("KME configuration is incomplete")?;
    let monitor = MasterKmeMonitor::new(kme.master_client()?, &kme.slave.sae_id);
    info!(
        every = args.check_every,
        threshold = args.key_threshold,
        "watching master KME key pool"
    );
    Ok(Some(Backpressure::new(
        Box::new(monitor),
        args.check_every,
        args.key_threshold,
        Duration::from_secs(args.replenish_delay),
    )))
}

async fn run(args: CliArgs) -> Result<ExitCode> {
    let env = OpensslEnv::from_env().context("OpenSSL environment is incomplete")?;
    let mut backpressure = backpressure(&args)?;

    let kems = if args.kems.is_empty() {
        args.provider.default_kems()
    } else {
        args.kems.iter().map(|k| k.trim().to_string()).collect()
    };
    for kem in kems.iter().filter(|k| kem_family(k).is_none()) {
        warn!("{kem} is not a known KEM, passing it to openssl as is");
    }
    let sweep = TlsSweep {
        kems,
        certs: args.certs.clone(),
        iterations: args.iterations,
        provider: args.provider,
        delay: Duration::from_secs(args.delay),
    };

    let mut runner = OpensslRunner::new(env, &args.certs_dir, args.provider, args.port)?;

    let path = output_path_today(&args.out_dir, Mode::Tls, args.provider, args.iterations);
    let mut recorder = Recorder::<TlsRecord>::create(&path)
        .with_context(|| format!("cannot create {}", path.display()))?;

    let summary =
        run_tls_benchmark(&sweep, &mut runner, &mut recorder, backpressure.as_mut()).await?;
    println!("{summary}");

    if summary.success() {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!("{} combination(s) failed", summary.failed.len());
        Ok(ExitCode::FAILURE)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let args = CliArgs::parse();

    // launch tracing subscriber with filter level
    let _guard = init_logging_recvr(args.unsafe_logging, &args.log_level)?;

    tokio::select! {
        res = run(args) => res,
        sig = cleanup::shutdown_signal() => {
            sig?;
            Ok(ExitCode::from(130))
        }
    }
}
