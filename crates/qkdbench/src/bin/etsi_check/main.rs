//! # etsi_check
//!
//! Runs one ETSI-014 key exchange (status, enc_keys, dec_keys) between the
//! configured master and slave KMEs and reports the outcome. KMEs and
//! certificates come from the `QKD_*` environment variables.
//!
//! ```txt
//! Usage: etsi_check [OPTIONS]
//!
//! Options:
//!   -l, --log-level <LOG_LEVEL>  Log Level (ERROR/WARN/INFO/DEBUG/TRACE) [default: INFO]
//!   -x, --unsafe-logging         Disable the address scrubber on logging
//! ```

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use safelog::sensitive;
use tracing::{error, info};

use etsi014::Exchange;
use qkdbench::cleanup;
use qkdbench::config::KmeConfig;
use qkdbench::logging::init_logging_recvr;

#[derive(Parser, Debug)]
#[command(author, version, about = "ETSI-014 key exchange conformance check", long_about = None)]
struct CliArgs {
    /// Log Level (ERROR/WARN/INFO/DEBUG/TRACE)
    #[arg(short, long, default_value_t=String::from("INFO"))]
    log_level: String,

    /// Disable the address scrubber on logging
    #[arg(short = 'x', long, action)]
    unsafe_logging: bool,
}

async fn run() -> Result<ExitCode> {
    let kme = KmeConfig::from_env().context("KME configuration is incomplete")?;
    let (master, slave) = kme.parties()?;
    info!(
        backend = %kme.backend,
        master = %sensitive(&kme.master.kme_endpoint),
        slave = %sensitive(&kme.slave.kme_endpoint),
        "running key exchange {} -> {}",
        master.sae_id,
        slave.sae_id
    );

    match Exchange::new(&master, &slave).run().await {
        Ok(report) => {
            println!(
                "status:   {} of {} keys stored, {} bit keys",
                report.status.stored_key_count, report.status.max_key_count, report.status.key_size
            );
            println!("enc_keys: key {} ({} bits)", report.key_id(), report.enc_key.bits());
            match report.correlation() {
                None => println!("dec_keys: key {} matches", report.dec_key.key.id()),
                Some(w) => println!("dec_keys: WARNING {w}"),
            }
            if !report.material_matches() {
                println!("WARNING: key material differs between KMEs");
            }
            println!("PASS");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("key exchange failed: {e}");
            println!("FAIL at {} step", e.step);
            if let Some(code) = e.source.http_code() {
                println!("  HTTP status: {code}");
            }
            match e.source.raw_body() {
                Some(body) => println!("  response body: {body}"),
                None => println!("  error: {}", e.source),
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let args = CliArgs::parse();

    // launch tracing subscriber with filter level
    let _guard = init_logging_recvr(args.unsafe_logging, &args.log_level)?;

    tokio::select! {
        res = run() => res,
        sig = cleanup::shutdown_signal() => {
            sig?;
            Ok(ExitCode::from(130))
        }
    }
}
