//! Append-only CSV output of benchmark timings.
//!
//! A [`Recorder`] owns exactly one file. The header is written when the file
//! is created and every appended row is flushed before `append` returns, so
//! an interrupted run keeps everything measured up to that point.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::catalog::Provider;
use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Kem,
    Tls,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Kem => "kem",
            Mode::Tls => "tls",
        }
    }

    pub fn header(&self) -> &'static str {
        match self {
            Mode::Kem => "Algorithm,Iteration,KeyGen(ms),Encaps(ms),Decaps(ms)",
            Mode::Tls => "KEM,Cert,Iteration,Time",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a result file.
pub trait Row {
    const MODE: Mode;

    fn to_csv(&self) -> String;
}

/// Timings of one KEM iteration, in milliseconds.
#[derive(Clone, Debug, PartialEq)]
pub struct KemRecord {
    pub algorithm: String,
    pub iteration: u32,
    pub keygen_ms: f64,
    pub encaps_ms: f64,
    pub decaps_ms: f64,
}

impl KemRecord {
    /// Parse an `alg,iter,keygen,encaps,decaps` line as printed by the KEM
    /// benchmark binary. Anything else (banners, progress, a header) yields
    /// `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut fields = line.trim().split(',').map(str::trim);
        let algorithm = fields.next().filter(|a| !a.is_empty())?.to_string();
        let iteration = fields.next()?.parse().ok()?;
        let keygen_ms = fields.next()?.parse().ok()?;
        let encaps_ms = fields.next()?.parse().ok()?;
        let decaps_ms = fields.next()?.parse().ok()?;
        if fields.next().is_some() {
            return None;
        }
        Some(Self {
            algorithm,
            iteration,
            keygen_ms,
            encaps_ms,
            decaps_ms,
        })
    }
}

impl Row for KemRecord {
    const MODE: Mode = Mode::Kem;

    fn to_csv(&self) -> String {
        format!(
            "{},{},{:.3},{:.3},{:.3}",
            self.algorithm, self.iteration, self.keygen_ms, self.encaps_ms, self.decaps_ms
        )
    }
}

/// Duration of one successful TLS handshake, in milliseconds.
#[derive(Clone, Debug, PartialEq)]
pub struct TlsRecord {
    pub kem: String,
    pub cert: String,
    pub iteration: u32,
    pub time_ms: f64,
}

impl Row for TlsRecord {
    const MODE: Mode = Mode::Tls;

    fn to_csv(&self) -> String {
        format!(
            "{},{},{},{:.3}",
            self.kem, self.cert, self.iteration, self.time_ms
        )
    }
}

/// `{mode}_bench_{provider}_{YYYYMMDD}_{iterations}_iter.csv` under `out_dir`.
pub fn output_path(
    out_dir: &Path,
    mode: Mode,
    provider: Provider,
    iterations: u32,
    date: NaiveDate,
) -> PathBuf {
    out_dir.join(format!(
        "{mode}_bench_{provider}_{}_{iterations}_iter.csv",
        date.format("%Y%m%d")
    ))
}

pub fn output_path_today(
    out_dir: &Path,
    mode: Mode,
    provider: Provider,
    iterations: u32,
) -> PathBuf {
    let today = chrono::Local::now().date_naive();
    output_path(out_dir, mode, provider, iterations, today)
}

pub struct Recorder<R> {
    path: PathBuf,
    out: BufWriter<File>,
    rows: usize,
    _row: PhantomData<R>,
}

impl<R: Row> Recorder<R> {
    /// Create (or truncate) `path` and write the header.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut out = BufWriter::new(File::create(&path)?);
        writeln!(out, "{}", R::MODE.header())?;
        out.flush()?;
        info!("writing {} results to {}", R::MODE, path.display());

        Ok(Self {
            path,
            out,
            rows: 0,
            _row: PhantomData,
        })
    }

    pub fn append(&mut self, row: &R) -> Result<()> {
        let line = row.to_csv();
        writeln!(self.out, "{line}")?;
        self.out.flush()?;
        self.rows += 1;
        debug!("recorded {line}");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data rows written so far, header excluded.
    pub fn rows(&self) -> usize {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tls(kem: &str, iteration: u32, time_ms: f64) -> TlsRecord {
        TlsRecord {
            kem: kem.into(),
            cert: "rsa".into(),
            iteration,
            time_ms,
        }
    }

    #[test]
    fn one_header_one_row_per_append() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("tls.csv");

        let mut rec = Recorder::<TlsRecord>::create(&path)?;
        for i in 1..=3 {
            rec.append(&tls("mlkem768", i, 1.5 * i as f64))?;
            // flushed: visible to a reader before the recorder is dropped
            let lines = fs::read_to_string(&path)?.lines().count();
            assert_eq!(lines, 1 + i as usize);
        }
        assert_eq!(rec.rows(), 3);
        drop(rec);

        let content = fs::read_to_string(&path)?;
        assert_eq!(
            content,
            "KEM,Cert,Iteration,Time\n\
             mlkem768,rsa,1,1.500\n\
             mlkem768,rsa,2,3.000\n\
             mlkem768,rsa,3,4.500\n"
        );
        Ok(())
    }

    #[test]
    fn create_truncates_previous_run() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("kem.csv");
        fs::write(&path, "stale\nrows\n")?;

        let mut rec = Recorder::<KemRecord>::create(&path)?;
        rec.append(&KemRecord {
            algorithm: "qkd_mlkem512".into(),
            iteration: 1,
            keygen_ms: 0.1234,
            encaps_ms: 2.0,
            decaps_ms: 0.0005,
        })?;

        let content = fs::read_to_string(rec.path())?;
        assert_eq!(
            content,
            "Algorithm,Iteration,KeyGen(ms),Encaps(ms),Decaps(ms)\n\
             qkd_mlkem512,1,0.123,2.000,0.001\n"
        );
        Ok(())
    }

    #[test]
    fn kem_line_parsing() {
        let r = KemRecord::parse_line(" mlkem768, 4, 0.051,0.060 ,0.049\n").unwrap();
        assert_eq!(r.algorithm, "mlkem768");
        assert_eq!(r.iteration, 4);
        assert_eq!(r.encaps_ms, 0.060);

        for junk in [
            "",
            "Algorithm,Iteration,KeyGen(ms),Encaps(ms),Decaps(ms)",
            "Benchmarking mlkem768 ...",
            "mlkem768,1,0.1,0.2",
            "mlkem768,1,0.1,0.2,0.3,0.4",
            ",1,0.1,0.2,0.3",
        ] {
            assert!(KemRecord::parse_line(junk).is_none(), "{junk:?}");
        }
    }

    #[test]
    fn file_naming() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        assert_eq!(
            output_path(Path::new("out"), Mode::Kem, Provider::Qkd, 1000, date),
            Path::new("out/kem_bench_qkd_20250307_1000_iter.csv")
        );
        assert_eq!(
            output_path(Path::new("."), Mode::Tls, Provider::Oqs, 10, date),
            Path::new("./tls_bench_oqs_20250307_10_iter.csv")
        );
    }
}
