//! Pairing at a fixed hop count along the z axis.
//!
//! Every rank talks to the rank `h` planes away on the same `(x, y, t)`
//! column. Ranks on the lower half of a node (`t < ceil(T/2)`) and ranks on
//! the upper half pick opposite directions, so both halves of the node load
//! the z links at the same time.

use super::CommunicationMap;
use crate::error::{Error, Result};
use crate::topology::{Axis, Topology};

#[derive(Debug, Clone, Copy)]
enum Rule {
    /// Direction flips every `width` planes; wraps on a torus.
    Alternate { width: usize },
    /// Blocks of `2h` planes pair their halves; the lower node half stays
    /// inside the block, the upper half reaches across the block boundary.
    Blocks,
}

fn rule_for(extent: usize, hops: usize) -> Result<Rule> {
    let mismatch = |why: &str| {
        Err(Error::TopologyMismatch(format!(
            "{hops}-hop pairing on a z extent of {extent}: {why}"
        )))
    };
    if hops == 0 || hops >= extent {
        return mismatch("hop count out of range");
    }
    if hops % 2 == 1 {
        if extent % 2 != 0 {
            return mismatch("odd hops need an even extent");
        }
        return Ok(Rule::Alternate { width: 1 });
    }
    if extent % (2 * hops) == 0 {
        return Ok(Rule::Blocks);
    }
    if hops % 4 == 2 && extent % 4 == 0 {
        return Ok(Rule::Alternate { width: 2 });
    }
    mismatch("extent does not split into pairable blocks")
}

/// Build the map pairing every rank with the rank `hops` planes away in z.
pub fn fixed_hops<T: Topology + ?Sized>(topology: &T, hops: usize) -> Result<CommunicationMap> {
    let dims = topology.dimensions();
    let rule = rule_for(dims.z, hops)?;
    let half = dims.lower_half_t();
    let h = hops as i64;

    let mut map = CommunicationMap::inactive(topology.num_ranks());
    for rank in 0..topology.num_ranks() {
        let c = topology.rank_to_coord(rank);
        let lower = c.t < half;
        let z = c.z as i64;
        let ahead = match rule {
            Rule::Alternate { width } => ((c.z / width) % 2 == 0) == lower,
            Rule::Blocks => (c.z % (2 * hops) < hops) == lower,
        };
        let target = topology
            .wrap(Axis::Z, if ahead { z + h } else { z - h })
            .ok_or_else(|| {
                Error::TopologyMismatch(format!(
                    "{hops}-hop partner of rank {rank} falls off the z edge of a mesh"
                ))
            })?;
        map.set(rank, Some(topology.coord_to_rank(c.with(Axis::Z, target))));
    }
    log::debug!("{hops}-hop map:\n{}", map.dump());
    map.check_involution()?;
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Dimensions, TorusTopology};

    #[test]
    fn one_hop_on_a_ring() {
        let ring = TorusTopology::ring(8);
        let map = fixed_hops(&ring, 1).unwrap();
        for rank in 0..8 {
            let expected = if rank % 2 == 0 { rank + 1 } else { rank - 1 };
            assert_eq!(map.partner(rank), Some(expected));
        }
    }

    #[test]
    fn upper_half_goes_the_other_way() {
        let torus = TorusTopology::new(Dimensions::new(1, 1, 8, 2));
        let map = fixed_hops(&torus, 1).unwrap();
        // t = 1 starts at rank 8; z = 0 there pairs backwards with z = 7
        assert_eq!(map.partner(8), Some(15));
        assert_eq!(map.partner(9), Some(10));
    }

    #[test]
    fn even_hops_use_blocks() {
        let torus = TorusTopology::new(Dimensions::new(1, 1, 8, 2));
        let map = fixed_hops(&torus, 2).unwrap();
        // lower half: z in {0,1} <-> {2,3}, unwrapped
        assert_eq!(map.partner(0), Some(2));
        assert_eq!(map.partner(3), Some(1));
        // upper half: z = 0 reaches back to z = 6
        assert_eq!(map.partner(8), Some(14));
        assert_eq!(map.partner(10), Some(12));
    }

    #[test]
    fn six_hops_alternate_plane_pairs() {
        let torus = TorusTopology::ring(16);
        let map = fixed_hops(&torus, 6).unwrap();
        assert_eq!(map.partner(0), Some(6));
        assert_eq!(map.partner(2), Some(12));
        for rank in 0..16 {
            assert_eq!(torus.hop_distance(rank, map.partner(rank).unwrap()), 6);
        }
    }

    #[test]
    fn every_partner_is_h_hops_away() {
        let torus = TorusTopology::new(Dimensions::new(2, 2, 16, 2));
        for h in 1..=8 {
            let map = fixed_hops(&torus, h).unwrap();
            for rank in 0..torus.num_ranks() {
                let partner = map.partner(rank).unwrap();
                assert_eq!(torus.hop_distance(rank, partner), h, "h = {h}");
            }
        }
    }

    #[test]
    fn mesh_partners_stay_inside() {
        let mesh = TorusTopology::mesh(Dimensions::new(1, 1, 8, 1));
        for h in [1, 2] {
            let map = fixed_hops(&mesh, h).unwrap();
            for rank in 0..8 {
                let partner = map.partner(rank).unwrap();
                assert_eq!(mesh.hop_distance(rank, partner), h, "h = {h}");
            }
        }
        // z = 6 would reach past the last plane
        assert!(matches!(
            fixed_hops(&mesh, 3),
            Err(Error::TopologyMismatch(_))
        ));
    }

    #[test]
    fn upper_half_cannot_wrap_on_a_mesh() {
        // Rank 8 (z = 0, t = 1) pairs backwards, which only a torus allows
        let mesh = TorusTopology::mesh(Dimensions::new(1, 1, 8, 2));
        assert!(matches!(
            fixed_hops(&mesh, 1),
            Err(Error::TopologyMismatch(_))
        ));
    }

    #[test]
    fn unsupported_shapes_fail_fast() {
        let odd = TorusTopology::ring(7);
        assert!(matches!(fixed_hops(&odd, 1), Err(Error::TopologyMismatch(_))));
        let ring = TorusTopology::ring(12);
        assert!(matches!(fixed_hops(&ring, 4), Err(Error::TopologyMismatch(_))));
        assert!(matches!(fixed_hops(&ring, 0), Err(Error::TopologyMismatch(_))));
        assert!(matches!(fixed_hops(&ring, 12), Err(Error::TopologyMismatch(_))));
    }
}
