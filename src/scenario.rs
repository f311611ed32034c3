//! Compiled-in scenario descriptors.
//!
//! Each benchmark family is one [`ScenarioDescriptor`]: the map strategy, the
//! parameter sweep, the message-size sweep, the trial shape and the transfer
//! discipline. Fields are public so a run can be shrunk (fewer sizes or
//! trials) without touching the runner.

use crate::engine::{Discipline, IterationRule, TrialShape};
use crate::error::{Error, Result};
use crate::map::shuffle::DEFAULT_SEED;
use crate::map::Strategy;
use crate::topology::Dimensions;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Smallest message in a sweep, bytes.
pub const MIN_MSG_SIZE: usize = 4;
/// Largest message in a sweep, bytes.
pub const MAX_MSG_SIZE: usize = 1024 * 1024;
/// Timed transfers per trial in most families.
pub const NUM_MSGS: usize = 10;
/// Latency family: sizes below this use [`LATENCY_SMALL_MSGS`].
pub const LATENCY_THRESHOLD: usize = 2048;
/// Latency family: round trips for small messages.
pub const LATENCY_SMALL_MSGS: usize = 100;
/// Latency family: round trips for large messages.
pub const LATENCY_LARGE_MSGS: usize = 20;
/// Shuffle rounds swept by the random family.
pub const MAX_SHUFFLE_ROUNDS: u32 = 4;

/// Geometric message-size sweep, doubling or halving between `min` and `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSizes {
    /// Smallest size, bytes
    pub min: usize,
    /// Largest size, bytes
    pub max: usize,
    /// Whether the sweep starts from `max`
    pub descending: bool,
}

impl MessageSizes {
    /// `min, 2*min, ..., max`
    pub const fn ascending(min: usize, max: usize) -> Self {
        MessageSizes {
            min,
            max,
            descending: false,
        }
    }

    /// `max, max/2, ..., min`
    pub const fn descending(min: usize, max: usize) -> Self {
        MessageSizes {
            min,
            max,
            descending: true,
        }
    }

    /// Sizes in sweep order.
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::new();
        let mut size = self.min.max(1);
        while size <= self.max {
            sizes.push(size);
            size <<= 1;
        }
        if self.descending {
            sizes.reverse();
        }
        sizes
    }
}

/// Benchmark family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// Pairs four ranks apart in blocks of eight
    Nearest,
    /// Randomly shuffled pairs
    Random,
    /// Partner at a fixed hop count along z
    Hops,
    /// Mirrored planes with a measured middle line
    Line,
    /// Inner brick against an outer shell
    Jobs,
    /// One-way streams read from a pairing file
    Flow,
    /// Dilated neighbor exchange
    Stencil,
    /// 26-neighbor halo exchange
    Halo,
    /// One root against every other rank
    Latency,
}

impl Family {
    /// Every family, in documentation order.
    pub const ALL: [Family; 9] = [
        Family::Nearest,
        Family::Random,
        Family::Hops,
        Family::Line,
        Family::Jobs,
        Family::Flow,
        Family::Stencil,
        Family::Halo,
        Family::Latency,
    ];

    /// Name accepted in configuration.
    pub fn name(self) -> &'static str {
        match self {
            Family::Nearest => "nearest",
            Family::Random => "random",
            Family::Hops => "hops",
            Family::Line => "line",
            Family::Jobs => "jobs",
            Family::Flow => "flow",
            Family::Stencil => "stencil",
            Family::Halo => "halo",
            Family::Latency => "latency",
        }
    }

    /// Descriptor for a partition of `dims`. `map_file` is only read by
    /// [`Family::Flow`].
    pub fn descriptor(self, dims: Dimensions, map_file: PathBuf) -> ScenarioDescriptor {
        let ascending = MessageSizes::ascending(MIN_MSG_SIZE, MAX_MSG_SIZE);
        let descending = MessageSizes::descending(MIN_MSG_SIZE, MAX_MSG_SIZE);
        let shape = |around: usize| TrialShape {
            warmup: around,
            iterations: IterationRule::Fixed(NUM_MSGS),
            cooldown: around,
        };
        let pairs = |prefix: &str, strategy, parameters, sizes, around| ScenarioDescriptor {
            prefix: prefix.to_string(),
            strategy,
            parameters,
            sizes,
            trials: 10,
            shape: shape(around),
            discipline: Discipline::Alternation,
        };
        let half_z = (dims.z / 2) as u32;
        match self {
            Family::Nearest => pairs("nn", Strategy::BlockOffset, vec![0], descending, 10),
            Family::Random => pairs(
                "rnd",
                Strategy::Shuffle { seed: DEFAULT_SEED },
                (0..=MAX_SHUFFLE_ROUNDS).collect(),
                descending,
                10,
            ),
            Family::Hops => pairs(
                "hops",
                Strategy::FixedHops,
                (1..=half_z).collect(),
                ascending,
                2,
            ),
            Family::Line => pairs("line", Strategy::Line, (0..half_z).collect(), ascending, 2),
            Family::Jobs => pairs("job", Strategy::HollowJobs, vec![0, 1], ascending, 2),
            Family::Flow => ScenarioDescriptor {
                prefix: "flow".into(),
                strategy: Strategy::MapFile(map_file),
                parameters: vec![0],
                sizes: ascending,
                trials: 1,
                shape: shape(0),
                discipline: Discipline::OneWay,
            },
            Family::Stencil => ScenarioDescriptor {
                prefix: "dilation".into(),
                strategy: Strategy::Stencil,
                parameters: vec![1, 2, 3],
                sizes: ascending,
                trials: 10,
                shape: shape(1),
                discipline: Discipline::PostedReceive,
            },
            Family::Halo => ScenarioDescriptor {
                prefix: "halo26".into(),
                strategy: Strategy::Halo,
                parameters: vec![1],
                sizes: ascending,
                trials: 10,
                shape: shape(1),
                discipline: Discipline::PostedReceive,
            },
            Family::Latency => ScenarioDescriptor {
                prefix: "latency".into(),
                strategy: Strategy::FanOut { root: 0 },
                parameters: vec![0],
                sizes: descending,
                trials: 1,
                // One warmup and one cooldown message per peer; the fan-out
                // visits every rank in turn, so more would multiply the run.
                shape: TrialShape {
                    warmup: 1,
                    iterations: IterationRule::BySize {
                        threshold: LATENCY_THRESHOLD,
                        small: LATENCY_SMALL_MSGS,
                        large: LATENCY_LARGE_MSGS,
                    },
                    cooldown: 1,
                },
                discipline: Discipline::FanOut,
            },
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Family {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Family::ALL
            .into_iter()
            .find(|f| f.name() == wanted)
            .ok_or_else(|| {
                let known: Vec<_> = Family::ALL.iter().map(|f| f.name()).collect();
                Error::Config(format!(
                    "unknown scenario `{s}` (expected one of {})",
                    known.join(", ")
                ))
            })
    }
}

/// Everything the runner needs to drive one benchmark family.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioDescriptor {
    /// Result-file prefix
    pub prefix: String,
    /// How the map is built
    pub strategy: Strategy,
    /// Scenario parameters, swept in order
    pub parameters: Vec<u32>,
    /// Message sizes, swept for every parameter
    pub sizes: MessageSizes,
    /// Trials averaged into each published record
    pub trials: usize,
    /// Warmup, timed and cooldown counts of one trial
    pub shape: TrialShape,
    /// How transfers are ordered
    pub discipline: Discipline,
}

impl ScenarioDescriptor {
    /// Reject descriptors the runner cannot execute.
    pub fn validate(&self) -> Result<()> {
        if self.sizes.min == 0 || self.sizes.min > self.sizes.max {
            return Err(Error::Config(format!(
                "message sizes {}..{} are empty",
                self.sizes.min, self.sizes.max
            )));
        }
        if self.trials == 0 {
            return Err(Error::Config("a scenario needs at least one trial".into()));
        }
        if self.sizes.sizes().iter().any(|&s| self.shape.iterations.count(s) == 0) {
            return Err(Error::Config("a trial needs at least one timed transfer".into()));
        }
        let expected = match self.strategy {
            Strategy::MapFile(_) => Discipline::OneWay,
            Strategy::Stencil | Strategy::Halo => Discipline::PostedReceive,
            Strategy::FanOut { .. } => Discipline::FanOut,
            _ => Discipline::Alternation,
        };
        if self.discipline != expected {
            return Err(Error::Config(format!(
                "{:?} maps run with {:?}, not {:?}",
                self.strategy, expected, self.discipline
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_sweeps() {
        let up = MessageSizes::ascending(4, 64).sizes();
        assert_eq!(up, vec![4, 8, 16, 32, 64]);
        let down = MessageSizes::descending(4, 64).sizes();
        assert_eq!(down, vec![64, 32, 16, 8, 4]);
        assert_eq!(MessageSizes::ascending(MIN_MSG_SIZE, MAX_MSG_SIZE).sizes().len(), 19);
    }

    #[test]
    fn family_names_round_trip() {
        for family in Family::ALL {
            assert_eq!(family.name().parse::<Family>().unwrap(), family);
        }
        assert_eq!(" HOPS ".parse::<Family>().unwrap(), Family::Hops);
        assert!(matches!("warp".parse::<Family>(), Err(Error::Config(_))));
    }

    #[test]
    fn hops_sweep_follows_z() {
        let d = Family::Hops.descriptor(Dimensions::new(8, 8, 16, 4), PathBuf::new());
        assert_eq!(d.parameters, (1..=8).collect::<Vec<_>>());
        assert_eq!(d.prefix, "hops");
        assert_eq!(d.shape.warmup, 2);

        let line = Family::Line.descriptor(Dimensions::new(8, 8, 16, 4), PathBuf::new());
        assert_eq!(line.parameters, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn every_builtin_descriptor_is_valid() {
        let dims = Dimensions::new(4, 4, 8, 1);
        for family in Family::ALL {
            family.descriptor(dims, "2.map".into()).validate().unwrap();
        }
    }

    #[test]
    fn validate_rejects_mismatched_discipline() {
        let mut d = Family::Nearest.descriptor(Dimensions::new(1, 1, 8, 1), PathBuf::new());
        d.discipline = Discipline::PostedReceive;
        assert!(matches!(d.validate(), Err(Error::Config(_))));
        let mut d = Family::Nearest.descriptor(Dimensions::new(1, 1, 8, 1), PathBuf::new());
        d.trials = 0;
        assert!(d.validate().is_err());
    }

    #[test]
    fn latency_counts_by_size() {
        let d = Family::Latency.descriptor(Dimensions::new(1, 1, 4, 1), PathBuf::new());
        assert_eq!(d.shape.iterations.count(1024), 100);
        assert_eq!(d.shape.iterations.count(1 << 20), 20);
        assert_eq!(d.sizes.sizes()[0], MAX_MSG_SIZE);
        assert_eq!((d.shape.warmup, d.shape.cooldown), (1, 1));
    }
}
