//! # torus-contention
//!
//! Point-to-point contention benchmarks for torus interconnects.
//!
//! A run picks a scenario family (pairs at a fixed hop count, shuffled pairs,
//! mirrored planes, interfering jobs, pairing-file streams, stencils, a
//! latency fan-out), builds its communication map on one coordinating rank,
//! distributes it, and times the traffic it describes over a sweep of
//! message sizes. Per-rank samples are reduced to min/avg/max over the
//! ranks that actually took part and appended to result files.
//!
//! The core is three pieces:
//! - [`map`]: pure map builders over a [`Topology`]
//! - [`engine`]: the phased trial (warmup, timed, cooldown, synchronized)
//! - [`stats`] and [`report`]: reduction and result files
//!
//! They talk to the parallel runtime only through the [`Communicator`]
//! trait. [`LocalWorld`] runs ranks as threads of one process; with the
//! `mpi` feature, `Mpi` runs them over a system MPI library.
//!
//! ## Quick Start
//!
//! ```
//! use torus_contention::{runner, Family, LocalWorld, Topology, TorusTopology};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let torus = TorusTopology::ring(8);
//! let mut scenario = Family::Hops.descriptor(torus.dimensions(), Default::default());
//! scenario.parameters = vec![1];
//! scenario.sizes.max = 16;
//! scenario.trials = 2;
//!
//! LocalWorld::new(8)
//!     .run(|world| runner::run_scenario(&world, &torus, &scenario, dir.path()))
//!     .unwrap();
//! assert!(dir.path().join("hops_8_1.dat").exists());
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description | Dependencies |
//! |---------|-------------|--------------|
//! | `mpi`   | MPI backend through the C shim in `csrc/` | `cc`, `pkg-config` (build) |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]

pub mod comm;
pub mod config;
mod datatype;
pub mod engine;
mod error;
pub mod map;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod stats;
mod status;
pub mod topology;

pub use comm::local::{InjectedFault, LocalComm, LocalWorld};
#[cfg(feature = "mpi")]
pub use comm::mpi::{Mpi, MpiComm};
pub use comm::{Communicator, PendingRecv, Tag};
pub use config::Config;
pub use datatype::{DatatypeTag, Element};
pub use error::{Error, Result};
pub use map::{CommunicationMap, DirectedMap, Pattern, Plan, Roster, Strategy};
pub use scenario::{Family, ScenarioDescriptor};
pub use stats::Summary;
pub use status::Status;
pub use topology::{Axis, Coordinate, Dimensions, Topology, TorusTopology};

/// Process rank within a communicator.
pub type Rank = usize;

/// Reduction operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ReduceOp {
    /// Sum of values
    Sum = 0,
    /// Maximum value
    Max = 1,
    /// Minimum value
    Min = 2,
}

impl ReduceOp {
    /// Combine two operands.
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Max => a.max(b),
            ReduceOp::Min => a.min(b),
        }
    }
}
