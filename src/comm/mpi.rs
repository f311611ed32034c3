//! MPI backend over the C layer in `csrc/`.
//!
//! [`Mpi`] owns the library's lifetime: it initializes MPI once per process
//! and finalizes it on drop. [`MpiComm`] wraps a communicator handle from the
//! C-side table and implements [`Communicator`].
//!
//! ```no_run
//! use torus_contention::{Communicator, Mpi};
//!
//! let mpi = Mpi::init().unwrap();
//! let world = mpi.world();
//! println!("rank {} of {}", world.rank(), world.size());
//! ```

use super::ffi;
use super::{Communicator, PendingRecv, Tag};
use crate::datatype::Element;
use crate::error::{Error, Result};
use crate::status::Status;
use crate::{Rank, ReduceOp};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

/// Global flag tracking MPI initialization state
static MPI_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// MPI environment handle.
///
/// Only one may exist per process. MPI is finalized when it is dropped, so it
/// must outlive every communicator taken from it.
pub struct Mpi {
    /// Marker to make Mpi !Send and !Sync
    _marker: PhantomData<*const ()>,
}

impl Mpi {
    /// Initialize MPI.
    ///
    /// # Errors
    ///
    /// Returns an error if MPI is already initialized or if initialization fails.
    pub fn init() -> Result<Self> {
        if MPI_INITIALIZED.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyInitialized);
        }
        let mut flag: i32 = 0;
        unsafe { ffi::contention_initialized(&mut flag) };
        if flag != 0 {
            MPI_INITIALIZED.store(false, Ordering::SeqCst);
            return Err(Error::AlreadyInitialized);
        }
        let ret = unsafe { ffi::contention_init() };
        if ret != 0 {
            MPI_INITIALIZED.store(false, Ordering::SeqCst);
            return Err(Error::from_code("init", ret));
        }
        log::debug!("MPI initialized");
        Ok(Mpi {
            _marker: PhantomData,
        })
    }

    /// Communicator over every process of the job.
    pub fn world(&self) -> MpiComm {
        MpiComm {
            handle: unsafe { ffi::contention_comm_world() },
            _marker: PhantomData,
        }
    }

    /// Tear down the whole job with `code`.
    ///
    /// Used when one rank fails while its peers may be blocked on it.
    pub fn abort(&self, code: i32) -> ! {
        unsafe {
            ffi::contention_abort(ffi::contention_comm_world(), code);
        }
        // MPI_Abort does not return on conforming implementations
        std::process::abort()
    }
}

impl Drop for Mpi {
    fn drop(&mut self) {
        if MPI_INITIALIZED.load(Ordering::SeqCst) {
            unsafe {
                ffi::contention_finalize();
            }
            MPI_INITIALIZED.store(false, Ordering::SeqCst);
        }
    }
}

/// An MPI communicator.
pub struct MpiComm {
    handle: i32,
    /// Marker to prevent Send/Sync (MPI communicators are not thread-safe)
    _marker: PhantomData<*mut ()>,
}

fn c_rank(rank: Rank) -> Result<i32> {
    i32::try_from(rank).map_err(|_| Error::InvalidRank(rank))
}

impl MpiComm {
    fn check_peer(&self, rank: Rank) -> Result<i32> {
        if rank >= self.size() {
            return Err(Error::InvalidRank(rank));
        }
        c_rank(rank)
    }
}

impl Communicator for MpiComm {
    type Pending<'a> = MpiPending<'a>;

    fn rank(&self) -> Rank {
        let mut rank: i32 = 0;
        unsafe { ffi::contention_comm_rank(self.handle, &mut rank) };
        rank as Rank
    }

    fn size(&self) -> usize {
        let mut size: i32 = 0;
        unsafe { ffi::contention_comm_size(self.handle, &mut size) };
        size as usize
    }

    fn wtime(&self) -> f64 {
        unsafe { ffi::contention_wtime() }
    }

    fn barrier(&self) -> Result<()> {
        let ret = unsafe { ffi::contention_barrier(self.handle) };
        Error::check("barrier", ret)
    }

    fn send<T: Element>(&self, data: &[T], dest: Rank, tag: Tag) -> Result<()> {
        let dest = self.check_peer(dest)?;
        let ret = unsafe {
            ffi::contention_send(
                data.as_ptr().cast(),
                data.len() as i64,
                T::TAG as i32,
                dest,
                tag,
                self.handle,
            )
        };
        Error::check("send", ret)
    }

    fn recv<T: Element>(&self, data: &mut [T], source: Rank, tag: Tag) -> Result<Status> {
        let source = self.check_peer(source)?;
        let mut actual_source: i32 = 0;
        let mut actual_tag: i32 = 0;
        let mut actual_count: i64 = 0;
        let ret = unsafe {
            ffi::contention_recv(
                data.as_mut_ptr().cast(),
                data.len() as i64,
                T::TAG as i32,
                source,
                tag,
                self.handle,
                &mut actual_source,
                &mut actual_tag,
                &mut actual_count,
            )
        };
        Error::check("recv", ret)?;
        Ok(Status {
            source: actual_source as Rank,
            tag: actual_tag,
            count: actual_count as usize,
        })
    }

    fn irecv<'a>(&'a self, buf: &'a mut [u8], source: Rank, tag: Tag) -> Result<MpiPending<'a>> {
        let source = self.check_peer(source)?;
        let mut handle: i64 = 0;
        let ret = unsafe {
            ffi::contention_irecv(
                buf.as_mut_ptr().cast(),
                buf.len() as i64,
                u8::TAG as i32,
                source,
                tag,
                self.handle,
                &mut handle,
            )
        };
        Error::check("irecv", ret)?;
        Ok(MpiPending {
            handle,
            completed: false,
            _buf: PhantomData,
        })
    }

    fn broadcast<T: Element>(&self, data: &mut [T], root: Rank) -> Result<()> {
        let root = self.check_peer(root)?;
        let ret = unsafe {
            ffi::contention_bcast(
                data.as_mut_ptr().cast(),
                data.len() as i64,
                T::TAG as i32,
                root,
                self.handle,
            )
        };
        Error::check("broadcast", ret)
    }

    fn allreduce(&self, value: f64, op: ReduceOp) -> Result<f64> {
        let mut result = 0.0;
        let ret =
            unsafe { ffi::contention_allreduce_f64(value, &mut result, op as i32, self.handle) };
        Error::check("allreduce", ret)?;
        Ok(result)
    }

    fn create_subgroup(&self, roster: &[Rank]) -> Result<Option<Self>> {
        let ranks = roster
            .iter()
            .map(|&r| self.check_peer(r))
            .collect::<Result<Vec<i32>>>()?;
        let mut handle = ffi::COMM_NULL;
        let ret = unsafe {
            ffi::contention_comm_create(
                self.handle,
                ranks.as_ptr(),
                ranks.len() as i64,
                &mut handle,
            )
        };
        Error::check("create_subgroup", ret)?;
        Ok((handle != ffi::COMM_NULL).then(|| MpiComm {
            handle,
            _marker: PhantomData,
        }))
    }
}

impl Drop for MpiComm {
    fn drop(&mut self) {
        // The world handle belongs to the library
        if self.handle != 0 {
            unsafe { ffi::contention_comm_free(self.handle) };
        }
    }
}

/// A posted receive on an [`MpiComm`].
///
/// Dropping it without [`wait`](PendingRecv::wait) still blocks until the
/// message lands, since MPI keeps writing into the borrowed buffer until then.
#[must_use = "posted receives must be waited on"]
pub struct MpiPending<'a> {
    handle: i64,
    completed: bool,
    _buf: PhantomData<&'a mut [u8]>,
}

impl PendingRecv for MpiPending<'_> {
    fn wait(mut self) -> Result<()> {
        let ret = unsafe { ffi::contention_wait(self.handle) };
        self.completed = true;
        Error::check("wait", ret)
    }
}

impl Drop for MpiPending<'_> {
    fn drop(&mut self) {
        if !self.completed {
            unsafe { ffi::contention_wait(self.handle) };
        }
    }
}
