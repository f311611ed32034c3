//! Pairwise maps over the flat rank space.

use super::CommunicationMap;
use crate::error::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Swap passes per shuffle round.
pub const SHUFFLE_ITERATIONS: usize = 4;

/// Seed used by the `random` scenario family.
pub const DEFAULT_SEED: u64 = 33_550_336;

/// Ranks per block in the nearest-neighbor baseline.
const BLOCK: usize = 8;

/// Baseline pairing: within every block of eight ranks, rank `b + j` talks to
/// rank `b + j + 4`.
pub fn block_offset(size: usize) -> Result<CommunicationMap> {
    if size == 0 || size % BLOCK != 0 {
        return Err(Error::TopologyMismatch(format!(
            "block pairing needs a multiple of {BLOCK} ranks, got {size}"
        )));
    }
    let half = BLOCK / 2;
    let mut map = CommunicationMap::inactive(size);
    for base in (0..size).step_by(BLOCK) {
        for j in 0..half {
            map.set(base + j, Some(base + j + half));
            map.set(base + j + half, Some(base + j));
        }
    }
    map.check_involution()?;
    Ok(map)
}

/// Random pairing: start from `i ^ 1` and apply `rounds` rounds of seeded
/// partner swaps.
///
/// Each pass visits every rank `i` with partner `p`, draws a rank `k` outside
/// that pair with partner `q`, and rewires the two pairs into `(i, q)` and
/// `(p, k)`. Every rank stays paired after every swap.
pub fn shuffled(size: usize, rounds: usize, seed: u64) -> Result<CommunicationMap> {
    if size == 0 || size % 2 != 0 {
        return Err(Error::TopologyMismatch(format!(
            "random pairing needs an even number of ranks, got {size}"
        )));
    }
    let mut partners: Vec<usize> = (0..size).map(|i| i ^ 1).collect();
    if rounds > 0 {
        if size < 4 {
            return Err(Error::TopologyMismatch(format!(
                "cannot swap partners among only {size} ranks"
            )));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..rounds * SHUFFLE_ITERATIONS {
            for i in 0..size {
                let p = partners[i];
                let k = loop {
                    let k = rng.gen_range(0..size);
                    if k != i && k != p {
                        break k;
                    }
                };
                let q = partners[k];
                partners[i] = q;
                partners[p] = k;
                partners[k] = p;
                partners[q] = i;
            }
        }
    }
    let map = CommunicationMap::from_partners(partners.into_iter().map(Some).collect());
    map.check_involution()?;
    Ok(map)
}
