//! Measurement engine: one phased trial per call.
//!
//! A trial walks `Idle -> Warmup -> Timed -> Cooldown -> Synchronized` and
//! back to `Idle`. Only the timed phase is measured; warmup and cooldown
//! exchange the same messages so transport state is primed before and
//! drained after. The synchronized phase is a barrier on the roster's
//! sub-group, so a slow pair cannot spill into the next trial of another.
//!
//! Point-to-point transfers use world ranks on `world`; barriers use
//! `group`, the communicator over the calling rank's roster.

use crate::comm::{wait_all, Communicator, Tag};
use crate::error::{Error, Result};
use crate::map::Exchange;
use crate::Rank;

/// Tag used by pairwise and one-way transfers.
pub const DATA_TAG: Tag = 1;

/// Phase of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Between trials
    Idle,
    /// Untimed priming exchanges
    Warmup,
    /// The measured transfers
    Timed,
    /// Untimed draining exchanges
    Cooldown,
    /// Waiting on the roster barrier
    Synchronized,
}

impl Phase {
    /// The only phase that may follow this one.
    pub fn successor(self) -> Phase {
        match self {
            Phase::Idle => Phase::Warmup,
            Phase::Warmup => Phase::Timed,
            Phase::Timed => Phase::Cooldown,
            Phase::Cooldown => Phase::Synchronized,
            Phase::Synchronized => Phase::Idle,
        }
    }
}

/// Number of timed transfers per trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationRule {
    /// Same count for every message size
    Fixed(usize),
    /// `small` transfers below `threshold` bytes, `large` from there up
    BySize {
        /// First size that uses the `large` count
        threshold: usize,
        /// Count for sizes below the threshold
        small: usize,
        /// Count for sizes at or above the threshold
        large: usize,
    },
}

impl IterationRule {
    /// Timed transfers for a message of `size` bytes.
    pub fn count(&self, size: usize) -> usize {
        match *self {
            IterationRule::Fixed(n) => n,
            IterationRule::BySize {
                threshold,
                small,
                large,
            } => {
                if size < threshold {
                    small
                } else {
                    large
                }
            }
        }
    }
}

/// Repetition counts of one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialShape {
    /// Untimed exchanges before timing
    pub warmup: usize,
    /// Timed transfers
    pub iterations: IterationRule,
    /// Untimed exchanges after timing
    pub cooldown: usize,
}

/// How transfers are ordered within a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    /// Mutual pairs; the lower rank sends first
    Alternation,
    /// Senders stream to receivers, which acknowledge once
    OneWay,
    /// Receives are posted before the blocking sends
    PostedReceive,
    /// A root round-trips every other rank in turn
    FanOut,
}

/// Send and receive buffers sized for the largest message.
///
/// The receive side holds one slot per simultaneous posted receive.
#[derive(Debug)]
pub struct Buffers {
    send: Vec<u8>,
    recv: Vec<u8>,
    capacity: usize,
}

impl Buffers {
    /// Buffers for messages up to `capacity` bytes and `slots` outstanding
    /// receives. Contents are filled with `i & 0xff`.
    pub fn new(capacity: usize, slots: usize) -> Self {
        let pattern = |len: usize| (0..len).map(|i| (i & 0xff) as u8).collect::<Vec<u8>>();
        Buffers {
            send: pattern(capacity),
            recv: pattern(capacity * slots.max(1)),
            capacity,
        }
    }

    /// Largest message these buffers hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn split(&mut self, size: usize) -> Result<(&[u8], &mut [u8])> {
        if size > self.capacity {
            return Err(Error::InvalidBuffer);
        }
        Ok((&self.send[..size], &mut self.recv[..size]))
    }
}

/// Tracks the phase of the running trial.
struct Trial<'a, C: Communicator> {
    group: &'a C,
    phase: Phase,
}

impl<'a, C: Communicator> Trial<'a, C> {
    fn begin(group: &'a C) -> Self {
        let mut trial = Trial {
            group,
            phase: Phase::Idle,
        };
        trial.enter(Phase::Warmup);
        trial
    }

    fn enter(&mut self, next: Phase) {
        debug_assert_eq!(self.phase.successor(), next, "illegal phase transition");
        log::trace!("{:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    fn finish(mut self) -> Result<()> {
        self.enter(Phase::Synchronized);
        self.group.barrier()?;
        self.enter(Phase::Idle);
        Ok(())
    }
}

fn alternate<C: Communicator>(
    world: &C,
    partner: Rank,
    count: usize,
    send: &[u8],
    recv: &mut [u8],
) -> Result<()> {
    if world.rank() < partner {
        for _ in 0..count {
            world.send(send, partner, DATA_TAG)?;
        }
        for _ in 0..count {
            world.recv(recv, partner, DATA_TAG)?;
        }
    } else {
        for _ in 0..count {
            world.recv(recv, partner, DATA_TAG)?;
        }
        for _ in 0..count {
            world.send(send, partner, DATA_TAG)?;
        }
    }
    Ok(())
}

/// Pairwise exchange with strict alternation.
///
/// Returns elapsed time of the timed phase divided by the transfer count.
pub fn ping_pong<C: Communicator>(
    world: &C,
    group: &C,
    partner: Rank,
    size: usize,
    shape: &TrialShape,
    buffers: &mut Buffers,
) -> Result<f64> {
    let n = shape.iterations.count(size);
    let (send, recv) = buffers.split(size)?;
    let mut trial = Trial::begin(group);
    for _ in 0..shape.warmup {
        alternate(world, partner, 1, send, recv)?;
    }

    trial.enter(Phase::Timed);
    let start = world.wtime();
    alternate(world, partner, n, send, recv)?;
    let elapsed = world.wtime() - start;

    trial.enter(Phase::Cooldown);
    for _ in 0..shape.cooldown {
        alternate(world, partner, 1, send, recv)?;
    }
    trial.finish()?;
    Ok(elapsed / n as f64)
}

/// Result of a one-way trial on one rank.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OneWaySample {
    /// Timed phase divided by the transfer count plus the acknowledgment
    pub per_transfer: f64,
    /// Local time just before each timed send (senders only)
    pub send_stamps: Vec<f64>,
    /// Time just after each timed receive, as reported by the destination
    /// (senders only)
    pub recv_stamps: Vec<f64>,
}

#[allow(clippy::too_many_arguments)]
fn stream<C: Communicator>(
    world: &C,
    dest: Option<Rank>,
    source: Option<Rank>,
    count: usize,
    send: &[u8],
    recv: &mut [u8],
    mut send_stamps: Option<&mut Vec<f64>>,
    mut recv_stamps: Option<&mut Vec<f64>>,
) -> Result<()> {
    if let Some(dest) = dest {
        for _ in 0..count {
            if let Some(stamps) = send_stamps.as_deref_mut() {
                stamps.push(world.wtime());
            }
            world.send(send, dest, DATA_TAG)?;
        }
        world.recv(recv, dest, DATA_TAG)?;
    }
    if let Some(source) = source {
        for _ in 0..count {
            world.recv(recv, source, DATA_TAG)?;
            if let Some(stamps) = recv_stamps.as_deref_mut() {
                stamps.push(world.wtime());
            }
        }
        world.send(send, source, DATA_TAG)?;
    }
    Ok(())
}

/// One-way streaming: `dest` is where this rank sends, `source` where it
/// receives from; either may be absent.
///
/// After the roster barrier every receiver returns its receive stamps to its
/// source, so senders can compute per-message bandwidth.
///
/// Sends are blocking and posted before receives, so the streams must form
/// chains: a cycle of ranks can deadlock once messages are large enough for
/// MPI to hand them over by rendezvous.
pub fn one_way<C: Communicator>(
    world: &C,
    group: &C,
    dest: Option<Rank>,
    source: Option<Rank>,
    size: usize,
    shape: &TrialShape,
    buffers: &mut Buffers,
) -> Result<OneWaySample> {
    let n = shape.iterations.count(size);
    let (send, recv) = buffers.split(size)?;
    let mut send_stamps = Vec::with_capacity(n);
    let mut local_recv = Vec::with_capacity(n);

    let mut trial = Trial::begin(group);
    for _ in 0..shape.warmup {
        stream(world, dest, source, 1, send, recv, None, None)?;
    }

    trial.enter(Phase::Timed);
    let start = world.wtime();
    stream(
        world,
        dest,
        source,
        n,
        send,
        recv,
        Some(&mut send_stamps),
        Some(&mut local_recv),
    )?;
    let elapsed = world.wtime() - start;

    trial.enter(Phase::Cooldown);
    for _ in 0..shape.cooldown {
        stream(world, dest, source, 1, send, recv, None, None)?;
    }
    trial.finish()?;

    // Send before receiving: a rank may sit on both ends of a stream.
    if let Some(source) = source {
        world.send(&local_recv, source, DATA_TAG)?;
    }
    let mut recv_stamps = Vec::new();
    if let Some(dest) = dest {
        recv_stamps = vec![0.0; n];
        world.recv(&mut recv_stamps, dest, DATA_TAG)?;
    }

    Ok(OneWaySample {
        per_transfer: elapsed / (n + 1) as f64,
        send_stamps,
        recv_stamps,
    })
}

fn exchange_all<C: Communicator>(
    world: &C,
    exchanges: &[Exchange],
    size: usize,
    buffers: &mut Buffers,
) -> Result<()> {
    let Buffers { send, recv, capacity } = buffers;
    if size > *capacity || size * exchanges.len() > recv.len() {
        return Err(Error::InvalidBuffer);
    }
    let send = &send[..size];
    let mut pending = Vec::with_capacity(exchanges.len());
    for (ex, slot) in exchanges.iter().zip(recv.chunks_mut(size)) {
        pending.push(world.irecv(slot, ex.recv_from, ex.tag)?);
    }
    for ex in exchanges {
        world.send(send, ex.send_to, ex.tag)?;
    }
    wait_all(pending)
}

/// Neighbor exchange with posted receives.
///
/// `buffers` needs one receive slot per exchange.
pub fn neighbor_exchange<C: Communicator>(
    world: &C,
    group: &C,
    exchanges: &[Exchange],
    size: usize,
    shape: &TrialShape,
    buffers: &mut Buffers,
) -> Result<f64> {
    let n = shape.iterations.count(size);
    let mut trial = Trial::begin(group);
    for _ in 0..shape.warmup {
        exchange_all(world, exchanges, size, buffers)?;
    }

    trial.enter(Phase::Timed);
    let start = world.wtime();
    for _ in 0..n {
        exchange_all(world, exchanges, size, buffers)?;
    }
    let elapsed = world.wtime() - start;

    trial.enter(Phase::Cooldown);
    for _ in 0..shape.cooldown {
        exchange_all(world, exchanges, size, buffers)?;
    }
    trial.finish()?;
    Ok(elapsed / n as f64)
}

fn round_trips<C: Communicator>(
    world: &C,
    peer: Rank,
    initiator: bool,
    count: usize,
    send: &[u8],
    recv: &mut [u8],
) -> Result<()> {
    for _ in 0..count {
        if initiator {
            world.send(send, peer, DATA_TAG)?;
            world.recv(recv, peer, DATA_TAG)?;
        } else {
            world.recv(recv, peer, DATA_TAG)?;
            world.send(send, peer, DATA_TAG)?;
        }
    }
    Ok(())
}

/// Root round-trips every other rank in turn.
///
/// Returns one-way latency per peer (ascending rank order, root skipped) on
/// the root and `None` elsewhere.
pub fn fan_out<C: Communicator>(
    world: &C,
    group: &C,
    root: Rank,
    size: usize,
    shape: &TrialShape,
    buffers: &mut Buffers,
) -> Result<Option<Vec<f64>>> {
    let n = shape.iterations.count(size);
    let (send, recv) = buffers.split(size)?;
    let me = world.rank();
    let mut trial = Trial::begin(group);

    let mut latencies = Vec::new();
    if me == root {
        for peer in (0..world.size()).filter(|&p| p != root) {
            round_trips(world, peer, true, shape.warmup, send, recv)?;
            let start = world.wtime();
            round_trips(world, peer, true, n, send, recv)?;
            latencies.push((world.wtime() - start) / (2 * n) as f64);
            round_trips(world, peer, true, shape.cooldown, send, recv)?;
        }
    } else {
        round_trips(world, root, false, shape.warmup + n + shape.cooldown, send, recv)?;
    }
    // Peers are timed one after another inside a single root-driven sweep.
    trial.enter(Phase::Timed);
    trial.enter(Phase::Cooldown);
    trial.finish()?;
    Ok((me == root).then_some(latencies))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::local::LocalWorld;
    use crate::map::StencilPattern;
    use crate::topology::{Dimensions, Topology, TorusTopology};

    const SHAPE: TrialShape = TrialShape {
        warmup: 2,
        iterations: IterationRule::Fixed(5),
        cooldown: 2,
    };

    #[test]
    fn phases_cycle() {
        let mut phase = Phase::Idle;
        let mut seen = Vec::new();
        for _ in 0..5 {
            phase = phase.successor();
            seen.push(phase);
        }
        assert_eq!(
            seen,
            vec![
                Phase::Warmup,
                Phase::Timed,
                Phase::Cooldown,
                Phase::Synchronized,
                Phase::Idle
            ]
        );
    }

    #[test]
    fn iteration_rule_threshold() {
        let rule = IterationRule::BySize {
            threshold: 2048,
            small: 100,
            large: 20,
        };
        assert_eq!(rule.count(4), 100);
        assert_eq!(rule.count(2047), 100);
        assert_eq!(rule.count(2048), 20);
        assert_eq!(IterationRule::Fixed(10).count(1 << 20), 10);
    }

    #[test]
    fn buffers_hold_the_byte_pattern() {
        let buffers = Buffers::new(300, 2);
        assert_eq!(buffers.capacity(), 300);
        assert_eq!(buffers.send[255], 255);
        assert_eq!(buffers.send[256], 0);
        assert_eq!(buffers.recv.len(), 600);
    }

    #[test]
    fn ping_pong_pairs_complete() {
        let samples = LocalWorld::new(4)
            .run(|world| {
                let partner = world.rank() ^ 1;
                let mut buffers = Buffers::new(64, 1);
                ping_pong(&world, &world, partner, 64, &SHAPE, &mut buffers)
            })
            .unwrap();
        assert!(samples.iter().all(|&s| s > 0.0));
    }

    #[test]
    fn one_way_returns_stamps_to_sender() {
        let samples = LocalWorld::new(2)
            .run(|world| {
                let (dest, source) = if world.rank() == 0 {
                    (Some(1), None)
                } else {
                    (None, Some(0))
                };
                let mut buffers = Buffers::new(16, 1);
                one_way(&world, &world, dest, source, 16, &SHAPE, &mut buffers)
            })
            .unwrap();
        assert_eq!(samples[0].send_stamps.len(), 5);
        assert_eq!(samples[0].recv_stamps.len(), 5);
        assert!(samples[1].send_stamps.is_empty());
        for (sent, got) in samples[0].send_stamps.iter().zip(&samples[0].recv_stamps) {
            assert!(got >= sent);
        }
        assert!(samples.iter().all(|s| s.per_transfer > 0.0));
    }

    #[test]
    fn one_way_chain_middle_rank_both_sends_and_receives() {
        let samples = LocalWorld::new(3)
            .run(|world| {
                let me = world.rank();
                let dest = (me < 2).then_some(me + 1);
                let source = me.checked_sub(1);
                let mut buffers = Buffers::new(64, 1);
                one_way(&world, &world, dest, source, 64, &SHAPE, &mut buffers)
            })
            .unwrap();
        assert_eq!(samples[0].recv_stamps.len(), 5);
        assert_eq!(samples[1].send_stamps.len(), 5);
        assert_eq!(samples[1].recv_stamps.len(), 5);
        assert!(samples[2].send_stamps.is_empty());
        assert!(samples[2].recv_stamps.is_empty());
    }

    #[test]
    fn stencil_exchange_on_small_torus() {
        let torus = TorusTopology::new(Dimensions::new(2, 2, 2, 1));
        let pattern = StencilPattern::Dilation(2);
        let samples = LocalWorld::new(torus.num_ranks())
            .run(|world| {
                let exchanges = pattern.exchanges(&torus, world.rank())?;
                let mut buffers = Buffers::new(32, exchanges.len());
                neighbor_exchange(&world, &world, &exchanges, 32, &SHAPE, &mut buffers)
            })
            .unwrap();
        assert_eq!(samples.len(), 8);
        assert!(samples.iter().all(|&s| s > 0.0));
    }

    #[test]
    fn fan_out_reports_on_root_only() {
        let results = LocalWorld::new(4)
            .run(|world| {
                let mut buffers = Buffers::new(8, 1);
                fan_out(&world, &world, 0, 8, &SHAPE, &mut buffers)
            })
            .unwrap();
        let root = results[0].as_ref().unwrap();
        assert_eq!(root.len(), 3);
        assert!(root.iter().all(|&l| l > 0.0));
        assert!(results[1..].iter().all(Option::is_none));
    }
}
