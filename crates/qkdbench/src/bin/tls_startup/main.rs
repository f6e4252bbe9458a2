//! # tls_startup
//!
//! Measures how long `openssl s_server` takes to accept connections with the
//! QKD provider loaded, over `-n` fresh launches.
//!
//! ```txt
//! Usage: tls_startup [OPTIONS]
//!
//! Options:
//!   -n <N>                       Number of launches [default: 10]
//!   -k, --kem <KEM>              TLS group offered by the server [default: qkd_mlkem768]
//!   -c, --cert <CERT>            Certificate type [default: rsa]
//!   -p, --provider <PROVIDER>    Provider under test (qkd/oqs) [default: qkd]
//!       --certs-dir <DIR>        Certificate tree [default: certs]
//!       --port <PORT>            s_server port [default: 4433]
//!   -l, --log-level <LOG_LEVEL>  Log Level (ERROR/WARN/INFO/DEBUG/TRACE) [default: WARN]
//!   -x, --unsafe-logging         Disable the address scrubber on logging
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use qkdbench::catalog::{CertType, Provider};
use qkdbench::cleanup;
use qkdbench::config::OpensslEnv;
use qkdbench::logging::init_logging_recvr;
use qkdbench::tls::openssl::{measure_server_startup, OpensslRunner, DEFAULT_PORT};
use qkdbench::tls::Combination;

#[derive(Parser, Debug)]
#[command(author, version, about = "TLS server startup time with the provider loaded", long_about = None)]
struct CliArgs {
    /// Number of launches
    #[arg(short, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    n: u32,

    /// TLS group offered by the server
    #[arg(short, long, default_value = "qkd_mlkem768")]
    kem: String,

    /// Certificate type
    #[arg(short, long, default_value = "rsa")]
    cert: CertType,

    /// Provider under test (qkd/oqs)
    #[arg(short, long, default_value = "qkd")]
    provider: Provider,

    /// Certificate tree
    #[arg(long, default_value = "certs")]
    certs_dir: PathBuf,

    /// s_server port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Log Level (ERROR/WARN/INFO/DEBUG/TRACE)
    #[arg(short, long, default_value_t=String::from("WARN"))]
    log_level: String,

    /// Disable the address scrubber on logging
    #[arg(short = 'x', long, action)]
    unsafe_logging: bool,
}

async fn run(args: CliArgs) -> Result<ExitCode> {
    let env = OpensslEnv::from_env().context("OpenSSL environment is incomplete")?;
    let mut runner = OpensslRunner::new(env, &args.certs_dir, args.provider, args.port)?;
    let combo = Combination {
        kem: args.kem,
        cert: args.cert,
    };

    let stats = measure_server_startup(&mut runner, &combo, args.n, |i, d| {
        println!("Iteration {i}: {:.2} ms", d.as_secs_f64() * 1000.0);
    })
    .await
    .with_context(|| format!("s_server failed to start for {combo}"))?;

    println!();
    println!("{stats}");
    Ok(ExitCode::SUCCESS)
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
