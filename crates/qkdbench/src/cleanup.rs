//! Removal of scratch files left behind by an interrupted run.

use std::fs;
use std::path::Path;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};

/// Prefix of every temporary file the harness creates.
pub const TEMP_PREFIX: &str = "qkdbench-";

/// `TEMP_PREFIX` narrowed to this process, so concurrent runs never touch
/// each other's files.
pub fn own_prefix() -> String {
    format!("{TEMP_PREFIX}{}-", std::process::id())
}

/// Best effort removal of files in `dir` whose name starts with `prefix`.
/// Returns how many were removed.
pub fn remove_temp_files(dir: &Path, prefix: &str) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warn!("cannot list {}: {e}", dir.display());
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(prefix));
        if !matches || !entry.file_type().is_ok_and(|t| t.is_file()) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!("removed {}", entry.path().display());
                removed += 1;
            }
            Err(e) => warn!("failed to remove {}: {e}", entry.path().display()),
        }
    }
    removed
}

/// Clean the system temp directory of the files this process created.
pub fn remove_own_temp_files() -> usize {
    remove_temp_files(&std::env::temp_dir(), &own_prefix())
}

/// Resolves on the first SIGINT or SIGTERM, removing the harness's temp
/// files before returning the signal name.
pub async fn shutdown_signal() -> std::io::Result<&'static str> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    };
    info!("{name} received, cleaning up");
    let removed = remove_own_temp_files();
    debug!("removed {removed} temporary file(s)");
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_prefixed_files_are_removed() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("qkdbench-server-1.log"), "x")?;
        fs::write(dir.path().join("qkdbench-server-2.log"), "x")?;
        fs::write(dir.path().join("tls_bench_oqs_20250101_10_iter.csv"), "x")?;
        fs::create_dir(dir.path().join("qkdbench-dir"))?;

        assert_eq!(remove_temp_files(dir.path(), TEMP_PREFIX), 2);
        assert!(dir.path().join("tls_bench_oqs_20250101_10_iter.csv").exists());
        assert!(dir.path().join("qkdbench-dir").exists());
        assert_eq!(remove_temp_files(dir.path(), TEMP_PREFIX), 0);
        assert_eq!(remove_temp_files(&dir.path().join("missing"), TEMP_PREFIX), 0);
        Ok(())
    }

    #[test]
    fn other_processes_files_are_kept() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let pid = std::process::id();
        let own = dir.path().join(format!("{}server-a.log", own_prefix()));
        // a pid sharing our digits as a prefix
        let other = dir.path().join(format!("{TEMP_PREFIX}{pid}0-server-b.log"));
        let foreign = dir.path().join(format!("{TEMP_PREFIX}{}-server-c.log", pid + 1));
        for f in [&own, &other, &foreign] {
            fs::write(f, "x")?;
        }

        assert_eq!(remove_temp_files(dir.path(), &own_prefix()), 1);
        assert!(!own.exists());
        assert!(other.exists());
        assert!(foreign.exists());
        Ok(())
    }
}
