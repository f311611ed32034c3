//! Result files.
//!
//! Every record is one whitespace-separated line appended to a file named
//! after the scenario family, the process count and the scenario parameter.
//! Files are opened in append mode per record and flushed before returning,
//! so an interrupted run leaves every completed record on disk.

use crate::error::{Error, Result};
use crate::stats::Summary;
use crate::Rank;
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Significant digits of C's `%g`.
const G_PRECISION: i32 = 6;

/// Render `value` the way C's `%g` does: six significant digits, exponent
/// form for very large or small magnitudes, trailing zeros removed.
pub fn format_g(value: f64) -> String {
    if value.is_nan() {
        return "nan".into();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.into();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.into();
    }
    // Round to the final precision first; rounding can carry into the
    // exponent (999999.7 -> 1e+06).
    let sci = format!("{:.*e}", (G_PRECISION - 1) as usize, value);
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if exponent < -4 || exponent >= G_PRECISION {
        let mut out = strip_zeros(mantissa).to_string();
        let sign = if exponent < 0 { '-' } else { '+' };
        let _ = write!(out, "e{sign}{:02}", exponent.abs());
        out
    } else {
        let decimals = (G_PRECISION - 1 - exponent) as usize;
        strip_zeros(&format!("{value:.decimals$}")).to_string()
    }
}

fn strip_zeros(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}

/// One flow-trace entry: a timed send and when its receive completed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceEntry {
    /// Wall time just before the send, seconds
    pub sent: f64,
    /// Wall time just after the matching receive, seconds
    pub received: f64,
}

/// Appends records for one scenario family to files under a directory.
#[derive(Debug, Clone)]
pub struct ResultSink {
    dir: PathBuf,
    prefix: String,
    nprocs: usize,
}

impl ResultSink {
    /// Sink for `prefix` files of a job with `nprocs` ranks.
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, nprocs: usize) -> Self {
        ResultSink {
            dir: dir.into(),
            prefix: prefix.into(),
            nprocs,
        }
    }

    /// `<prefix>_<nprocs>_<parameter>.dat`
    pub fn record_path(&self, parameter: u32) -> PathBuf {
        self.dir
            .join(format!("{}_{}_{}.dat", self.prefix, self.nprocs, parameter))
    }

    /// `<prefix>_<nprocs>.dat`
    pub fn latency_path(&self) -> PathBuf {
        self.dir.join(format!("{}_{}.dat", self.prefix, self.nprocs))
    }

    /// `<prefix>_summary_<nprocs>.dat`
    pub fn latency_summary_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}_summary_{}.dat", self.prefix, self.nprocs))
    }

    /// `<prefix>_trace_<rank>.dat`
    pub fn trace_path(&self, rank: Rank) -> PathBuf {
        self.dir.join(format!("{}_trace_{}.dat", self.prefix, rank))
    }

    /// Append `<size> <min> <avg> <max>`.
    pub fn append_record(&self, parameter: u32, size: usize, summary: &Summary) -> Result<()> {
        let line = format!(
            "{size} {} {} {}\n",
            format_g(summary.min),
            format_g(summary.avg),
            format_g(summary.max)
        );
        append(&self.record_path(parameter), &line)
    }

    /// Append one `<size> <latency>` line per peer, then
    /// `<size> <min> <avg> <max> <spread>` to the summary file.
    pub fn append_latencies(&self, size: usize, latencies: &[f64]) -> Result<()> {
        let mut lines = String::new();
        for latency in latencies {
            let _ = writeln!(lines, "{size} {}", format_g(*latency));
        }
        append(&self.latency_path(), &lines)?;
        if let Some(summary) = Summary::from_samples(latencies) {
            let line = format!(
                "{size} {} {} {} {}\n",
                format_g(summary.min),
                format_g(summary.avg),
                format_g(summary.max),
                format_g(summary.spread_percent())
            );
            append(&self.latency_summary_path(), &line)?;
        }
        Ok(())
    }

    /// Append per-message bandwidth lines for a traced sender:
    /// `<param> <rank> <size> <mid_us> <bandwidth> <recv_us> <send_us>`.
    pub fn append_trace(
        &self,
        parameter: u32,
        rank: Rank,
        size: usize,
        entries: &[TraceEntry],
    ) -> Result<()> {
        let mut lines = String::new();
        for e in entries {
            let bandwidth = size as f64 / (e.received - e.sent);
            let _ = writeln!(
                lines,
                "{parameter} {rank} {size} {} {} {} {}",
                format_g(500_000.0 * (e.sent + e.received)),
                format_g(bandwidth),
                format_g(1_000_000.0 * e.received),
                format_g(1_000_000.0 * e.sent)
            );
        }
        append(&self.trace_path(rank), &lines)
    }
}

fn append(path: &Path, text: &str) -> Result<()> {
    let io_err = |source| {
        log::error!("cannot write results to {}: {source}", path.display());
        Error::OutputIo {
            path: path.to_path_buf(),
            source,
        }
    };
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err)?;
    file.write_all(text.as_bytes()).map_err(io_err)?;
    file.flush().map_err(io_err)
}
