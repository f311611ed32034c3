//! Communication maps and the strategies that build them.
//!
//! A [`Plan`] is what the coordinating rank builds once per scenario
//! parameter and broadcasts to everyone: a [`Pattern`] saying who talks to
//! whom, and the [`Roster`]s that scope barriers and reductions.
//!
//! Rosters partition the active ranks. The first roster is the *measured*
//! one, whose reduction gets published; any further roster carries background
//! traffic that has to run but must not leak into the published numbers.

pub mod file;
pub mod hops;
pub mod interference;
pub mod shuffle;
pub mod stencil;

pub use file::RowPair;
pub use stencil::{Exchange, StencilPattern};

use crate::error::{Error, Result};
use crate::topology::Topology;
use crate::Rank;
use std::fmt::Write as _;
use std::path::PathBuf;

/// Wire value of an inactive map entry.
pub const INACTIVE: i32 = -1;

fn render(entry: Option<Rank>) -> String {
    match entry {
        Some(rank) => rank.to_string(),
        None => INACTIVE.to_string(),
    }
}

/// Partner of every rank, or `None` for ranks sitting the iteration out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunicationMap {
    partners: Vec<Option<Rank>>,
}

impl CommunicationMap {
    /// A map of `size` inactive entries.
    pub fn inactive(size: usize) -> Self {
        CommunicationMap {
            partners: vec![None; size],
        }
    }

    /// Wrap an explicit partner table.
    pub fn from_partners(partners: Vec<Option<Rank>>) -> Self {
        CommunicationMap { partners }
    }

    /// Number of entries (the job size).
    pub fn len(&self) -> usize {
        self.partners.len()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.partners.is_empty()
    }

    /// Partner of `rank`, if it is active.
    pub fn partner(&self, rank: Rank) -> Option<Rank> {
        self.partners.get(rank).copied().flatten()
    }

    /// Set the entry for `rank`.
    pub fn set(&mut self, rank: Rank, partner: Option<Rank>) {
        self.partners[rank] = partner;
    }

    /// The raw partner table.
    pub fn partners(&self) -> &[Option<Rank>] {
        &self.partners
    }

    /// Ranks with a partner, ascending.
    pub fn active_ranks(&self) -> impl Iterator<Item = Rank> + '_ {
        self.partners
            .iter()
            .enumerate()
            .filter_map(|(rank, partner)| partner.map(|_| rank))
    }

    /// Check that every active entry is part of exactly one mutual pair.
    ///
    /// A violation is logged together with the full map dump.
    pub fn check_involution(&self) -> Result<()> {
        for (rank, partner) in self.partners.iter().enumerate() {
            let Some(partner) = *partner else { continue };
            let back = self.partners.get(partner).copied();
            let consistent = partner != rank && back == Some(Some(rank));
            if !consistent {
                log::error!("inconsistent pairing map:\n{}", self.dump());
                return Err(Error::MapConsistency {
                    rank,
                    partner,
                    back: back.map_or_else(|| "<out of range>".to_string(), render),
                });
            }
        }
        Ok(())
    }

    /// One `map[rank] = partner` line per entry.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (rank, partner) in self.partners.iter().enumerate() {
            let value = partner.map_or(i64::from(INACTIVE), |p| p as i64);
            let _ = writeln!(out, "map[{rank:03}] = {value:03}");
        }
        out
    }

    fn encode(&self, out: &mut Vec<i32>) {
        out.extend(self.partners.iter().map(|p| match p {
            Some(rank) => *rank as i32,
            None => INACTIVE,
        }));
    }

    fn decode(cursor: &mut Cursor<'_>, len: usize) -> Result<Self> {
        let partners = cursor
            .take(len)?
            .iter()
            .map(|&v| match v {
                INACTIVE => Ok(None),
                v if v >= 0 && (v as usize) < len => Ok(Some(v as usize)),
                v => Err(Error::Internal(format!("map entry {v} out of range"))),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(CommunicationMap { partners })
    }
}

/// Per-rank role in a flow trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceRole {
    /// Not traced
    None,
    /// Writes per-message bandwidth lines
    Sender,
    /// Returns per-message receive stamps to its sender
    Receiver,
}

impl TraceRole {
    fn code(self) -> i32 {
        match self {
            TraceRole::None => 0,
            TraceRole::Sender => 1,
            TraceRole::Receiver => 2,
        }
    }

    fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(TraceRole::None),
            1 => Ok(TraceRole::Sender),
            2 => Ok(TraceRole::Receiver),
            other => Err(Error::Internal(format!("unknown trace role {other}"))),
        }
    }
}

/// One-way traffic where the sender and receiver roles need not mirror each
/// other: every rank has at most one destination and at most one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectedMap {
    /// Destination of each rank
    pub send: CommunicationMap,
    /// Source of each rank
    pub recv: CommunicationMap,
    /// Which ranks record per-message traces
    pub trace: Vec<TraceRole>,
}

impl DirectedMap {
    /// An all-inactive directed map.
    pub fn inactive(size: usize) -> Self {
        DirectedMap {
            send: CommunicationMap::inactive(size),
            recv: CommunicationMap::inactive(size),
            trace: vec![TraceRole::None; size],
        }
    }

    /// Check that every send has a matching receive and vice versa.
    pub fn check_consistency(&self) -> Result<()> {
        for (map, other) in [(&self.send, &self.recv), (&self.recv, &self.send)] {
            for (rank, partner) in map.partners.iter().enumerate() {
                let Some(partner) = *partner else { continue };
                let back = other.partners.get(partner).copied();
                if partner == rank || back != Some(Some(rank)) {
                    log::error!(
                        "inconsistent directed map:\nsend\n{}recv\n{}",
                        self.send.dump(),
                        self.recv.dump()
                    );
                    return Err(Error::MapConsistency {
                        rank,
                        partner,
                        back: back.map_or_else(|| "<out of range>".to_string(), render),
                    });
                }
            }
        }
        Ok(())
    }

    /// Ranks that send, receive, or both, ascending.
    pub fn active_ranks(&self) -> Vec<Rank> {
        (0..self.send.len())
            .filter(|&r| self.send.partner(r).is_some() || self.recv.partner(r).is_some())
            .collect()
    }
}

/// Ordered set of ranks that synchronize and reduce together.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Roster {
    ranks: Vec<Rank>,
}

impl Roster {
    /// Roster over `ranks`, in the order given.
    pub fn new(ranks: Vec<Rank>) -> Self {
        Roster { ranks }
    }

    /// Every rank of a job of `size`.
    pub fn everyone(size: usize) -> Self {
        Roster {
            ranks: (0..size).collect(),
        }
    }

    /// Members in order.
    pub fn ranks(&self) -> &[Rank] {
        &self.ranks
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Whether `rank` is a member.
    pub fn contains(&self, rank: Rank) -> bool {
        self.ranks.contains(&rank)
    }
}

/// Who talks to whom during an iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Mutual pairs exchanging ping-pongs
    Pairs(CommunicationMap),
    /// One-way streams from senders to receivers
    Directed(DirectedMap),
    /// Every rank exchanges with a fixed set of displaced neighbors
    Stencil(StencilPattern),
    /// One root ping-pongs every other rank in turn
    FanOut {
        /// Rank that drives all exchanges
        root: Rank,
    },
}

/// A built communication map plus the rosters it induces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// The traffic pattern
    pub pattern: Pattern,
    /// Rosters partitioning the active ranks; the first one is measured
    pub rosters: Vec<Roster>,
}

impl Plan {
    /// A pairwise plan whose single roster is every active rank.
    pub fn pairs(map: CommunicationMap) -> Result<Self> {
        map.check_involution()?;
        let roster = Roster::new(map.active_ranks().collect());
        Ok(Plan {
            pattern: Pattern::Pairs(map),
            rosters: vec![roster],
        })
    }

    /// The roster whose reduction is published.
    pub fn measured(&self) -> Option<&Roster> {
        self.rosters.first()
    }

    /// Index of the roster `rank` belongs to.
    pub fn roster_of(&self, rank: Rank) -> Option<usize> {
        self.rosters.iter().position(|r| r.contains(rank))
    }

    /// Check the roster invariant: every active rank sits in exactly one
    /// roster and no inactive rank sits in any.
    pub fn validate(&self, size: usize) -> Result<()> {
        let active: Vec<bool> = match &self.pattern {
            Pattern::Pairs(map) => map.partners.iter().map(Option::is_some).collect(),
            Pattern::Directed(map) => {
                let mut active = vec![false; map.send.len()];
                for rank in map.active_ranks() {
                    active[rank] = true;
                }
                active
            }
            Pattern::Stencil(_) | Pattern::FanOut { .. } => vec![true; size],
        };
        if active.len() != size {
            return Err(Error::TopologyMismatch(format!(
                "map covers {} ranks but the job has {size}",
                active.len()
            )));
        }
        let mut seen = vec![0usize; size];
        for rank in self.rosters.iter().flat_map(|r| r.ranks.iter().copied()) {
            match seen.get_mut(rank) {
                Some(count) => *count += 1,
                None => return Err(Error::InvalidRank(rank)),
            }
        }
        for rank in 0..size {
            let expected = usize::from(active[rank]);
            if seen[rank] != expected {
                return Err(Error::Internal(format!(
                    "rank {rank} appears in {} rosters, expected {expected}",
                    seen[rank]
                )));
            }
        }
        Ok(())
    }

    /// Flatten into the `i32` vector that gets broadcast.
    pub fn encode(&self) -> Vec<i32> {
        let mut out = Vec::new();
        match &self.pattern {
            Pattern::Pairs(map) => {
                out.extend([0, map.len() as i32]);
                map.encode(&mut out);
            }
            Pattern::Directed(map) => {
                out.extend([1, map.send.len() as i32]);
                map.send.encode(&mut out);
                map.recv.encode(&mut out);
                out.extend(map.trace.iter().map(|t| t.code()));
            }
            Pattern::Stencil(pattern) => out.extend([2, pattern.code()]),
            Pattern::FanOut { root } => out.extend([3, *root as i32]),
        }
        out.push(self.rosters.len() as i32);
        for roster in &self.rosters {
            out.push(roster.len() as i32);
            out.extend(roster.ranks.iter().map(|&r| r as i32));
        }
        out
    }

    /// Rebuild a plan from its broadcast form.
    pub fn decode(words: &[i32]) -> Result<Self> {
        let mut cursor = Cursor { words, pos: 0 };
        let pattern = match cursor.next()? {
            0 => {
                let len = cursor.next_len()?;
                Pattern::Pairs(CommunicationMap::decode(&mut cursor, len)?)
            }
            1 => {
                let len = cursor.next_len()?;
                let send = CommunicationMap::decode(&mut cursor, len)?;
                let recv = CommunicationMap::decode(&mut cursor, len)?;
                let trace = cursor
                    .take(len)?
                    .iter()
                    .map(|&c| TraceRole::from_code(c))
                    .collect::<Result<Vec<_>>>()?;
                Pattern::Directed(DirectedMap { send, recv, trace })
            }
            2 => Pattern::Stencil(StencilPattern::from_code(cursor.next()?)?),
            3 => Pattern::FanOut {
                root: cursor.next_len()?,
            },
            other => return Err(Error::Internal(format!("unknown plan kind {other}"))),
        };
        let count = cursor.next_len()?;
        let mut rosters = Vec::with_capacity(count);
        for _ in 0..count {
            let len = cursor.next_len()?;
            let ranks = cursor.take(len)?.iter().map(|&r| r as usize).collect();
            rosters.push(Roster::new(ranks));
        }
        if cursor.pos != words.len() {
            return Err(Error::Internal("trailing words after plan".into()));
        }
        Ok(Plan { pattern, rosters })
    }
}

struct Cursor<'a> {
    words: &'a [i32],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [i32]> {
        let end = self.pos + n;
        let slice = self
            .words
            .get(self.pos..end)
            .ok_or_else(|| Error::Internal("truncated plan".into()))?;
        self.pos = end;
        Ok(slice)
    }

    fn next(&mut self) -> Result<i32> {
        Ok(self.take(1)?[0])
    }

    fn next_len(&mut self) -> Result<usize> {
        let v = self.next()?;
        usize::try_from(v).map_err(|_| Error::Internal(format!("negative length {v}")))
    }
}

/// Selects how the communication map for a scenario is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Blocks of eight ranks, each rank paired four ranks over
    BlockOffset,
    /// `i ^ 1` pairing reshuffled `parameter` rounds by a seeded generator
    Shuffle {
        /// Generator seed
        seed: u64,
    },
    /// Partner `parameter` hops away along z
    FixedHops,
    /// Planes mirrored about the middle of z, widening with `parameter`
    Line,
    /// Inner brick always paired, outer shell paired at one separation
    HollowJobs,
    /// Sender/receiver rows read from a pairing file
    MapFile(PathBuf),
    /// Neighbor exchange; `parameter` is the dilation
    Stencil,
    /// Exchange with all 26 surrounding nodes
    Halo,
    /// One root against everybody
    FanOut {
        /// Driving rank
        root: Rank,
    },
}

impl Strategy {
    /// Build the plan for one scenario parameter.
    ///
    /// Pure: the same topology, parameter and strategy always give the same
    /// plan.
    pub fn build<T: Topology>(&self, topology: &T, parameter: u32) -> Result<Plan> {
        let size = topology.num_ranks();
        let plan = match self {
            Strategy::BlockOffset => Plan::pairs(shuffle::block_offset(size)?)?,
            Strategy::Shuffle { seed } => {
                Plan::pairs(shuffle::shuffled(size, parameter as usize, *seed)?)?
            }
            Strategy::FixedHops => Plan::pairs(hops::fixed_hops(topology, parameter as usize)?)?,
            Strategy::Line => interference::line(topology, parameter as usize)?,
            Strategy::HollowJobs => interference::hollow_jobs(topology, parameter as usize)?,
            Strategy::MapFile(path) => {
                let rows = file::load(path)?;
                let map = file::directed_map(topology, &rows)?;
                let roster = Roster::new(map.active_ranks());
                Plan {
                    pattern: Pattern::Directed(map),
                    rosters: vec![roster],
                }
            }
            Strategy::Stencil | Strategy::Halo => {
                let stencil = match self {
                    Strategy::Halo => StencilPattern::Halo26,
                    _ => StencilPattern::dilation(parameter)?,
                };
                stencil.check_fits(topology)?;
                Plan {
                    pattern: Pattern::Stencil(stencil),
                    rosters: vec![Roster::everyone(size)],
                }
            }
            Strategy::FanOut { root } => {
                if *root >= size {
                    return Err(Error::TopologyMismatch(format!(
                        "fan-out root {root} outside a job of {size} ranks"
                    )));
                }
                Plan {
                    pattern: Pattern::FanOut { root: *root },
                    rosters: vec![Roster::everyone(size)],
                }
            }
        };
        plan.validate(size)?;
        Ok(plan)
    }
}
