//! In-process backend: every rank is a thread of the current process.
//!
//! Messages travel over one `flume` inbox per rank. A receive matches on
//! `(communicator context, source, tag)`; envelopes that arrive before their
//! receive is posted are stashed in arrival order, so messages between a pair
//! of ranks with the same tag never overtake each other. Sends are buffered
//! and never block.
//!
//! Collectives are built from point-to-point messages rooted at rank `0` of
//! the communicator, on a channel kind that user tags cannot collide with.
//!
//! When any rank's body fails, the world is marked aborted and every rank
//! stuck in a receive gives up with [`Error::Aborted`] within one poll
//! interval, mirroring how an MPI job dies as a whole.
//!
//! # Example
//!
//! ```
//! use torus_contention::{Communicator, LocalWorld, ReduceOp};
//!
//! let sums = LocalWorld::new(4)
//!     .run(|comm| comm.allreduce(comm.rank() as f64, ReduceOp::Sum))
//!     .unwrap();
//! assert_eq!(sums, vec![6.0; 4]);
//! ```

use super::{Communicator, PendingRecv, Tag};
use crate::datatype::Element;
use crate::error::{Error, Result};
use crate::status::Status;
use crate::{Rank, ReduceOp};
use flume::{Receiver, RecvTimeoutError, Sender};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long a blocked receive waits before re-checking the abort flag.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

const WORLD_CONTEXT: u64 = 0xcbf2_9ce4_8422_2325;
const BARRIER_TAG: Tag = 1;
const BCAST_TAG: Tag = 2;
const REDUCE_TAG: Tag = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Point,
    Collective,
}

struct Envelope {
    context: u64,
    channel: Channel,
    /// World rank of the sender
    source: usize,
    tag: Tag,
    payload: Vec<u8>,
}

/// A transfer failure planted on one rank, for exercising fault handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectedFault {
    /// World rank that fails
    pub rank: Rank,
    /// Number of point-to-point sends that succeed before the failure
    pub after_sends: u64,
}

struct Shared {
    outboxes: Vec<Sender<Envelope>>,
    aborted: AtomicBool,
    epoch: Instant,
}

impl Shared {
    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// Marks the world aborted if a rank thread unwinds.
struct AbortOnUnwind(Arc<Shared>);

impl Drop for AbortOnUnwind {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.abort();
        }
    }
}

struct Inbox {
    receiver: Receiver<Envelope>,
    stash: RefCell<VecDeque<Envelope>>,
    sends: Cell<u64>,
    fault_after: Option<u64>,
}

/// A job of `size` ranks run as scoped threads.
#[derive(Debug, Clone)]
pub struct LocalWorld {
    size: usize,
    faults: Vec<InjectedFault>,
}

impl LocalWorld {
    /// A world of `size` ranks.
    pub fn new(size: usize) -> Self {
        LocalWorld {
            size,
            faults: Vec::new(),
        }
    }

    /// Plant a transfer fault on one rank.
    pub fn with_fault(mut self, fault: InjectedFault) -> Self {
        self.faults.push(fault);
        self
    }

    /// Number of ranks.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `body` once per rank, SPMD style, and collect the per-rank results
    /// in rank order.
    ///
    /// If any rank fails, the error that started the teardown is returned
    /// rather than the [`Error::Aborted`] seen by the ranks that were torn
    /// down with it.
    pub fn run<F, R>(&self, body: F) -> Result<Vec<R>>
    where
        F: Fn(LocalComm) -> Result<R> + Sync,
        R: Send,
    {
        if self.size == 0 {
            return Err(Error::Config("a local world needs at least one rank".into()));
        }
        if let Some(fault) = self.faults.iter().find(|f| f.rank >= self.size) {
            return Err(Error::InvalidRank(fault.rank));
        }

        let (outboxes, inboxes): (Vec<_>, Vec<_>) =
            (0..self.size).map(|_| flume::unbounded()).unzip();
        let shared = Arc::new(Shared {
            outboxes,
            aborted: AtomicBool::new(false),
            epoch: Instant::now(),
        });

        let outcomes: Vec<Result<R>> = std::thread::scope(|scope| {
            let handles: Vec<_> = inboxes
                .into_iter()
                .enumerate()
                .map(|(rank, receiver)| {
                    let shared = Arc::clone(&shared);
                    let fault_after = self
                        .faults
                        .iter()
                        .find(|f| f.rank == rank)
                        .map(|f| f.after_sends);
                    let body = &body;
                    scope.spawn(move || {
                        let _guard = AbortOnUnwind(Arc::clone(&shared));
                        // Keeps the inbox open until the abort flag is up, so
                        // peers see `Aborted` rather than a closed channel.
                        let keepalive = receiver.clone();
                        let comm = LocalComm::world(Arc::clone(&shared), rank, receiver, fault_after);
                        let outcome = body(comm);
                        if let Err(err) = &outcome {
                            if !err.is_induced() {
                                log::error!("rank {rank} failed: {err}");
                            }
                            shared.abort();
                        }
                        drop(keepalive);
                        outcome
                    })
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(Error::Internal(format!("rank {rank} panicked"))))
                })
                .collect()
        });

        let mut values = Vec::with_capacity(outcomes.len());
        let mut first_induced = None;
        for outcome in outcomes {
            match outcome {
                Ok(value) => values.push(value),
                Err(err) if err.is_induced() => {
                    first_induced.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
        }
        match first_induced {
            Some(err) => Err(err),
            None => Ok(values),
        }
    }
}

/// One rank's view of a communicator in a [`LocalWorld`].
///
/// Not `Send`: a communicator belongs to the thread that runs its rank.
pub struct LocalComm {
    shared: Arc<Shared>,
    inbox: Rc<Inbox>,
    /// World ranks of the members, indexed by local rank
    members: Rc<[usize]>,
    rank: Rank,
    context: u64,
    children: Cell<u64>,
}

impl LocalComm {
    fn world(
        shared: Arc<Shared>,
        rank: Rank,
        receiver: Receiver<Envelope>,
        fault_after: Option<u64>,
    ) -> Self {
        let members: Rc<[usize]> = (0..shared.outboxes.len()).collect();
        LocalComm {
            shared,
            inbox: Rc::new(Inbox {
                receiver,
                stash: RefCell::new(VecDeque::new()),
                sends: Cell::new(0),
                fault_after,
            }),
            members,
            rank,
            context: WORLD_CONTEXT,
            children: Cell::new(0),
        }
    }

    /// World rank of the calling process.
    pub fn world_rank(&self) -> usize {
        self.members[self.rank]
    }

    fn world_rank_of(&self, rank: Rank) -> Result<usize> {
        self.members.get(rank).copied().ok_or(Error::InvalidRank(rank))
    }

    fn post(&self, channel: Channel, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<()> {
        let dest = self.world_rank_of(dest)?;
        if self.shared.is_aborted() {
            return Err(Error::Aborted);
        }
        if channel == Channel::Point {
            let sent = self.inbox.sends.get();
            if self.inbox.fault_after.is_some_and(|limit| sent >= limit) {
                return Err(Error::Transfer {
                    op: "send",
                    detail: format!("injected fault after {sent} sends"),
                });
            }
            self.inbox.sends.set(sent + 1);
        }
        let envelope = Envelope {
            context: self.context,
            channel,
            source: self.world_rank(),
            tag,
            payload,
        };
        self.shared.outboxes[dest].send(envelope).map_err(|_| {
            if self.shared.is_aborted() {
                Error::Aborted
            } else {
                Error::Transfer {
                    op: "send",
                    detail: format!("rank {dest} has already left the job"),
                }
            }
        })
    }

    fn take(&self, channel: Channel, source: Rank, tag: Tag) -> Result<Vec<u8>> {
        let source = self.world_rank_of(source)?;
        let wanted = |e: &Envelope| {
            e.context == self.context && e.channel == channel && e.source == source && e.tag == tag
        };

        {
            let mut stash = self.inbox.stash.borrow_mut();
            if let Some(pos) = stash.iter().position(|e| wanted(e)) {
                if let Some(envelope) = stash.remove(pos) {
                    return Ok(envelope.payload);
                }
            }
        }

        loop {
            match self.inbox.receiver.recv_timeout(POLL_INTERVAL) {
                Ok(envelope) if wanted(&envelope) => return Ok(envelope.payload),
                Ok(envelope) => self.inbox.stash.borrow_mut().push_back(envelope),
                Err(RecvTimeoutError::Timeout) => {
                    if self.shared.is_aborted() {
                        return Err(Error::Aborted);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Internal("local inbox disconnected".into()));
                }
            }
        }
    }
}

/// Posted receive on a [`LocalComm`].
///
/// Sends are buffered, so the matching happens when the receive is waited on.
pub struct LocalPending<'a> {
    comm: &'a LocalComm,
    buf: &'a mut [u8],
    source: Rank,
    tag: Tag,
}

impl PendingRecv for LocalPending<'_> {
    fn wait(self) -> Result<()> {
        self.comm.recv(self.buf, self.source, self.tag).map(|_| ())
    }
}

impl Communicator for LocalComm {
    type Pending<'a> = LocalPending<'a>;

    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.members.len()
    }

    fn wtime(&self) -> f64 {
        self.shared.epoch.elapsed().as_secs_f64()
    }

    fn barrier(&self) -> Result<()> {
        if self.rank == 0 {
            for peer in 1..self.size() {
                self.take(Channel::Collective, peer, BARRIER_TAG)?;
            }
            for peer in 1..self.size() {
                self.post(Channel::Collective, peer, BARRIER_TAG, Vec::new())?;
            }
        } else {
            self.post(Channel::Collective, 0, BARRIER_TAG, Vec::new())?;
            self.take(Channel::Collective, 0, BARRIER_TAG)?;
        }
        Ok(())
    }

    fn send<T: Element>(&self, data: &[T], dest: Rank, tag: Tag) -> Result<()> {
        let mut payload = Vec::new();
        T::encode(data, &mut payload);
        self.post(Channel::Point, dest, tag, payload)
    }

    fn recv<T: Element>(&self, data: &mut [T], source: Rank, tag: Tag) -> Result<Status> {
        let payload = self.take(Channel::Point, source, tag)?;
        if payload.len() > data.len() * T::SIZE {
            return Err(Error::InvalidBuffer);
        }
        let count = T::decode(&payload, data);
        Ok(Status { source, tag, count })
    }

    fn irecv<'a>(&'a self, buf: &'a mut [u8], source: Rank, tag: Tag) -> Result<LocalPending<'a>> {
        self.world_rank_of(source)?;
        Ok(LocalPending {
            comm: self,
            buf,
            source,
            tag,
        })
    }

    fn broadcast<T: Element>(&self, data: &mut [T], root: Rank) -> Result<()> {
        self.world_rank_of(root)?;
        if self.rank == root {
            let mut payload = Vec::new();
            T::encode(data, &mut payload);
            for peer in (0..self.size()).filter(|&r| r != root) {
                self.post(Channel::Collective, peer, BCAST_TAG, payload.clone())?;
            }
        } else {
            let payload = self.take(Channel::Collective, root, BCAST_TAG)?;
            if payload.len() != data.len() * T::SIZE {
                return Err(Error::InvalidBuffer);
            }
            T::decode(&payload, data);
        }
        Ok(())
    }

    fn allreduce(&self, value: f64, op: ReduceOp) -> Result<f64> {
        let mut result = [value];
        if self.rank == 0 {
            for peer in 1..self.size() {
                let payload = self.take(Channel::Collective, peer, REDUCE_TAG)?;
                let mut other = [0.0f64];
                if f64::decode(&payload, &mut other) != 1 {
                    return Err(Error::InvalidBuffer);
                }
                result[0] = op.apply(result[0], other[0]);
            }
        } else {
            let mut payload = Vec::new();
            f64::encode(&result, &mut payload);
            self.post(Channel::Collective, 0, REDUCE_TAG, payload)?;
        }
        self.broadcast(&mut result, 0)?;
        Ok(result[0])
    }

    fn create_subgroup(&self, roster: &[Rank]) -> Result<Option<Self>> {
        let mut seen = vec![false; self.size()];
        for &rank in roster {
            match seen.get_mut(rank) {
                Some(slot) if !*slot => *slot = true,
                _ => return Err(Error::InvalidRank(rank)),
            }
        }

        let ordinal = self.children.get() + 1;
        self.children.set(ordinal);
        let context = (self.context ^ ordinal).wrapping_mul(0x0100_0000_01b3);

        // Creation is a synchronization point for the whole parent group.
        self.barrier()?;

        let Some(rank) = roster.iter().position(|&r| r == self.rank) else {
            return Ok(None);
        };
        let members: Rc<[usize]> = roster.iter().map(|&r| self.members[r]).collect();
        Ok(Some(LocalComm {
            shared: Arc::clone(&self.shared),
            inbox: Rc::clone(&self.inbox),
            members,
            rank,
            context,
            children: Cell::new(0),
        }))
    }
}
