//! Maps where only part of the traffic is measured.
//!
//! Both strategies here put the ranks whose numbers get published in the
//! first roster and everything else that talks in a background roster.

use super::{CommunicationMap, Pattern, Plan, Roster};
use crate::error::{Error, Result};
use crate::topology::{Axis, Topology};
use crate::Rank;

/// Separation at which the outer shell of the jobs layout joins in.
pub const OUTER_SHELL_SEPARATION: usize = 1;

fn split_rosters(map: &CommunicationMap, measured: impl Fn(Rank) -> bool) -> Vec<Roster> {
    let (front, back): (Vec<Rank>, Vec<Rank>) = map.active_ranks().partition(|&r| measured(r));
    let mut rosters = vec![Roster::new(front)];
    if !back.is_empty() {
        rosters.push(Roster::new(back));
    }
    rosters
}

/// Mirror planes about the middle of z.
///
/// Plane `k` talks to plane `Z-1-k` when the two are at most `2d+1` planes
/// apart. The two middle planes are always measured; wider separations add
/// background pairs around them.
pub fn line<T: Topology + ?Sized>(topology: &T, separation: usize) -> Result<Plan> {
    let z = topology.dimensions().z;
    if z < 2 || z % 2 != 0 {
        return Err(Error::TopologyMismatch(format!(
            "mirrored planes need an even z extent, got {z}"
        )));
    }
    let reach = 2 * separation + 1;
    let mut map = CommunicationMap::inactive(topology.num_ranks());
    for rank in 0..topology.num_ranks() {
        let c = topology.rank_to_coord(rank);
        let mirror = z - 1 - c.z;
        if mirror.abs_diff(c.z) <= reach {
            map.set(rank, Some(topology.coord_to_rank(c.with(Axis::Z, mirror))));
        }
    }
    map.check_involution()?;
    let middle = [z / 2 - 1, z / 2];
    let rosters = split_rosters(&map, |r| middle.contains(&topology.rank_to_coord(r).z));
    Ok(Plan {
        pattern: Pattern::Pairs(map),
        rosters,
    })
}

/// Two concurrent jobs: an inner brick measured on planes 2 and `Z-3`, and
/// an outer shell that only joins in at [`OUTER_SHELL_SEPARATION`].
///
/// The shell pairs `(y, z)` with `(z, y)`, except the corner `(0, 0)` which
/// pairs with the far corner `(Y-1, Z-1)`.
pub fn hollow_jobs<T: Topology + ?Sized>(topology: &T, separation: usize) -> Result<Plan> {
    let dims = topology.dimensions();
    if dims.y != dims.z || dims.z < 6 {
        return Err(Error::TopologyMismatch(format!(
            "hollow jobs need a square y-z face of at least 6, got {}x{}",
            dims.y, dims.z
        )));
    }
    let edge = dims.z - 1;
    let inner = |y: usize, z: usize| (1..edge).contains(&y) && (z == 2 || z == edge - 2);
    let shell = |y: usize, z: usize| y == 0 || y == edge || z == 0 || z == edge;

    let mut map = CommunicationMap::inactive(topology.num_ranks());
    for rank in 0..topology.num_ranks() {
        let c = topology.rank_to_coord(rank);
        let partner = if inner(c.y, c.z) {
            Some(c.with(Axis::Z, edge - c.z))
        } else if separation == OUTER_SHELL_SEPARATION && shell(c.y, c.z) {
            let (y, z) = match (c.y, c.z) {
                (0, 0) => (edge, edge),
                (y, z) if y == edge && z == edge => (0, 0),
                (y, z) => (z, y),
            };
            Some(c.with(Axis::Y, y).with(Axis::Z, z))
        } else {
            None
        };
        map.set(rank, partner.map(|p| topology.coord_to_rank(p)));
    }
    map.check_involution()?;
    let rosters = split_rosters(&map, |r| {
        let c = topology.rank_to_coord(r);
        inner(c.y, c.z)
    });
    Ok(Plan {
        pattern: Pattern::Pairs(map),
        rosters,
    })
}
