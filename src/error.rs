//! Error types for torus-contention

use std::path::PathBuf;
use thiserror::Error;

/// Result type for benchmark operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for benchmark operations.
///
/// Every variant is fatal to the run: a benchmark sample is meaningless once
/// any participant has failed, so nothing here is retried.
#[derive(Error, Debug)]
pub enum Error {
    /// The partition shape does not satisfy a map strategy's preconditions
    #[error("Topology mismatch: {0}")]
    TopologyMismatch(String),

    /// A built map violates the pairing invariant
    #[error("Map consistency fault: map[{rank}] = {partner} but map[{partner}] = {back}")]
    MapConsistency {
        /// Rank whose entry was checked
        rank: usize,
        /// Partner recorded for `rank`
        partner: usize,
        /// What the partner maps back to, rendered (`-1` for inactive)
        back: String,
    },

    /// A line of a pairing file could not be parsed
    #[error("Map file line {line}: {reason}")]
    MapFile {
        /// 1-based line number
        line: usize,
        /// What was wrong with it
        reason: String,
    },

    /// A point-to-point or collective transfer failed
    #[error("Transfer fault during {op}: {detail}")]
    Transfer {
        /// Operation that failed
        op: &'static str,
        /// Runtime-provided detail
        detail: String,
    },

    /// Another participant failed and the job is being torn down
    #[error("Run aborted by a failure on another rank")]
    Aborted,

    /// The coordinating rank failed to build the communication map
    #[error("Coordinator failed to build the communication map")]
    RemoteBuildFailure,

    /// A result file could not be opened or written
    #[error("Cannot write results to {}: {source}", path.display())]
    OutputIo {
        /// File being written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// An input file could not be read
    #[error("Cannot read {}: {source}", path.display())]
    InputIo {
        /// File being read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A configuration value is malformed
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Invalid rank specified
    #[error("Invalid rank: {0}")]
    InvalidRank(usize),

    /// Invalid buffer provided
    #[error("Invalid buffer")]
    InvalidBuffer,

    /// MPI has already been initialized
    #[error("MPI has already been initialized")]
    AlreadyInitialized,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a transfer error from an MPI return code.
    pub fn from_code(op: &'static str, code: i32) -> Self {
        Error::Transfer {
            op,
            detail: format!("MPI error (code {code})"),
        }
    }

    /// Check an MPI return code, returning Ok(()) for success.
    pub fn check(op: &'static str, code: i32) -> Result<()> {
        if code == 0 {
            Ok(())
        } else {
            Err(Error::from_code(op, code))
        }
    }

    /// Whether this error was induced by a failure elsewhere in the job
    /// rather than originating on this rank.
    pub fn is_induced(&self) -> bool {
        matches!(self, Error::Aborted | Error::RemoteBuildFailure)
    }
}
