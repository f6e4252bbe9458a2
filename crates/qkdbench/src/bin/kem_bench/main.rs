//! # kem_bench
//!
//! Runs the external KEM benchmark binary against the QKD or the baseline
//! OpenSSL provider and records keygen / encaps / decaps timings.
//!
//! ```txt
//! Usage: kem_bench [OPTIONS] --iterations <N>
//!
//! Options:
//!   -i, --iterations <N>         Iterations per algorithm
//!   -p, --provider <PROVIDER>    Provider under test (qkd/oqs) [default: qkd]
//!   -d, --delay <SECS>           Pause between runs, in seconds [default: 0]
//!   -r, --runs <RUNS>            Number of back to back runs [default: 1]
//!       --bench-bin <PATH>       KEM benchmark binary [default: ./oqs_bench_kems]
//!       --config <FILE>          OpenSSL config passed to the binary (defaults to $OPENSSL_CONF)
//!   -o, --out-dir <DIR>          Directory for the CSV output [default: benchmarks]
//!   -l, --log-level <LOG_LEVEL>  Log Level (ERROR/WARN/INFO/DEBUG/TRACE) [default: INFO]
//!   -x, --unsafe-logging         Disable the address scrubber on logging
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use qkdbench::catalog::Provider;
use qkdbench::cleanup;
use qkdbench::config::OpensslEnv;
use qkdbench::kem::{run_kem_benchmark, KemBenchmark};
use qkdbench::logging::init_logging_recvr;
use qkdbench::recorder::{output_path_today, KemRecord, Mode, Recorder};

#[derive(Parser, Debug)]
#[command(author, version, about = "KEM keygen/encaps/decaps benchmark driver", long_about = None)]
struct CliArgs {
    /// Iterations per algorithm
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    iterations: u32,

    /// Provider under test (qkd/oqs)
    #[arg(short, long, default_value = "qkd")]
    provider: Provider,

    /// Pause between runs, in seconds
    #[arg(short, long, default_value_t = 0)]
    delay: u64,

    /// Number of back to back runs
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    runs: u32,

    /// KEM benchmark binary
    #[arg(long, default_value = "./oqs_bench_kems")]
    bench_bin: PathBuf,

    /// OpenSSL config passed to the binary (defaults to $OPENSSL_CONF)
    #[arg(long)]
    config: Option<PathBuf>,

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

async fn run(args: CliArgs) -> Result<ExitCode> {
    let env = OpensslEnv::from_env().context("OpenSSL environment is incomplete")?;

    let bench = KemBenchmark {
        bench_bin: args.bench_bin,
        config_file: args.config.unwrap_or_else(|| env.conf.clone()),
        provider: args.provider,
        iterations: args.iterations,
        runs: args.runs,
        delay: Duration::from_secs(args.delay),
    };

    let path = output_path_today(&args.out_dir, Mode::Kem, bench.provider, bench.iterations);
    let mut recorder = Recorder::<KemRecord>::create(&path)
        .with_context(|| format!("cannot create {}", path.display()))?;

    let summary = run_kem_benchmark(&bench, &env, &mut recorder).await?;

    println!("KEM benchmark summary");
    println!("  runs completed: {}/{}", summary.runs_completed, bench.runs);
    println!("  algorithms:     {}", summary.algorithms.len());
    println!("  rows written:   {}", summary.rows);
    println!("  results:        {}", recorder.path().display());

    if summary.success() {
        info!("done");
        Ok(ExitCode::SUCCESS)
    } else {
        error!("benchmark binary exited with code {}", summary.exit_code);
        let code = u8::try_from(summary.exit_code).unwrap_or(1);
        Ok(ExitCode::from(code.max(1)))
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
