//! The message-passing substrate.
//!
//! Everything the benchmarks need from a parallel runtime is expressed by the
//! [`Communicator`] trait: blocking and posted point-to-point transfers,
//! barriers, broadcast, scalar all-reduce and roster-scoped sub-groups.
//!
//! Two backends implement it:
//! - [`local`]: ranks as threads of one process, always available; used by the
//!   test-suite and for single-host runs.
//! - `mpi` (feature `mpi`): a thin safe layer over a system MPI library.

pub mod local;
#[cfg(feature = "mpi")]
pub(crate) mod ffi;
#[cfg(feature = "mpi")]
pub mod mpi;

use crate::datatype::Element;
use crate::error::Result;
use crate::status::Status;
use crate::{Rank, ReduceOp};

/// Message tag.
pub type Tag = i32;

/// A communicator over a group of ranks.
///
/// All ranks passed to or returned from a communicator are local to it: rank
/// `0` is the first member of the group, not necessarily world rank `0`.
pub trait Communicator: Sized {
    /// An outstanding posted receive.
    type Pending<'a>: PendingRecv
    where
        Self: 'a;

    /// Rank of the calling process in this communicator.
    fn rank(&self) -> Rank;

    /// Number of processes in this communicator.
    fn size(&self) -> usize;

    /// Wall-clock time in seconds. Only differences are meaningful.
    fn wtime(&self) -> f64;

    /// Block until every member has entered the barrier.
    fn barrier(&self) -> Result<()>;

    /// Blocking send of `data` to `dest`.
    fn send<T: Element>(&self, data: &[T], dest: Rank, tag: Tag) -> Result<()>;

    /// Blocking receive into `data` from `source`.
    fn recv<T: Element>(&self, data: &mut [T], source: Rank, tag: Tag) -> Result<Status>;

    /// Post a receive into `buf` from `source` and return without waiting.
    ///
    /// The buffer stays borrowed until the returned handle is waited on.
    fn irecv<'a>(&'a self, buf: &'a mut [u8], source: Rank, tag: Tag) -> Result<Self::Pending<'a>>;

    /// Broadcast `data` from `root` to every member.
    fn broadcast<T: Element>(&self, data: &mut [T], root: Rank) -> Result<()>;

    /// Reduce one `f64` per member and hand the result to every member.
    fn allreduce(&self, value: f64, op: ReduceOp) -> Result<f64>;

    /// Build a communicator over `roster` (ranks of `self`, in the order given).
    ///
    /// Collective over `self`: every member must call it with the same roster,
    /// whether or not it belongs to it. Members get `Some`, others `None`.
    fn create_subgroup(&self, roster: &[Rank]) -> Result<Option<Self>>;
}

/// A receive that was posted and has not completed yet.
pub trait PendingRecv {
    /// Block until the message has landed in the posted buffer.
    fn wait(self) -> Result<()>;
}

/// Wait for every posted receive in `pending`.
pub fn wait_all<P: PendingRecv>(pending: Vec<P>) -> Result<()> {
    for request in pending {
        request.wait()?;
    }
    Ok(())
}
