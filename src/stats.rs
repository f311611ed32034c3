//! Reduction of per-rank samples into published summaries.

use crate::comm::Communicator;
use crate::error::Result;
use crate::ReduceOp;

/// Minimum, mean and maximum of a set of samples.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Summary {
    /// Smallest sample
    pub min: f64,
    /// Sum of samples divided by their count
    pub avg: f64,
    /// Largest sample
    pub max: f64,
}

impl Summary {
    /// Summarize locally held samples. `None` when there are none.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let (min, max, sum) = samples.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, 0.0),
            |(min, max, sum), &s| (min.min(s), max.max(s), sum + s),
        );
        Some(Summary {
            min,
            avg: sum / samples.len() as f64,
            max,
        })
    }

    /// `(max - min) * 100 / min`.
    pub fn spread_percent(&self) -> f64 {
        (self.max - self.min) * 100.0 / self.min
    }
}

/// Reduce one sample per member of `group` into a summary every member
/// receives. The mean divides by the group size, so only roster members
/// count.
pub fn reduce<C: Communicator>(group: &C, sample: f64) -> Result<Summary> {
    let min = group.allreduce(sample, ReduceOp::Min)?;
    let sum = group.allreduce(sample, ReduceOp::Sum)?;
    let max = group.allreduce(sample, ReduceOp::Max)?;
    Ok(Summary {
        min,
        avg: sum / group.size() as f64,
        max,
    })
}

/// Running mean of per-trial summaries.
#[derive(Debug, Clone, Default)]
pub struct TrialAverager {
    total: Summary,
    trials: usize,
}

impl TrialAverager {
    /// An empty averager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one trial's summary.
    pub fn push(&mut self, trial: Summary) {
        self.total.min += trial.min;
        self.total.avg += trial.avg;
        self.total.max += trial.max;
        self.trials += 1;
    }

    /// Trials pushed so far.
    pub fn trials(&self) -> usize {
        self.trials
    }

    /// Field-wise mean over the pushed trials.
    pub fn mean(&self) -> Option<Summary> {
        if self.trials == 0 {
            return None;
        }
        let n = self.trials as f64;
        Some(Summary {
            min: self.total.min / n,
            avg: self.total.avg / n,
            max: self.total.max / n,
        })
    }
}
