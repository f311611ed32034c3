//! Property-based tests for the map builders.
//!
//! Key invariants:
//! - Every pairing map is an involution: `m[m[i]] == i` for active `i`
//! - Fixed-hop partners sit exactly `h` hops away, and the distance is symmetric
//! - Rank/coordinate conversion round-trips
//! - A seeded build is reproducible

use proptest::prelude::*;
use torus_contention::map::{hops, interference, shuffle};
use torus_contention::{
    CommunicationMap, Dimensions, Pattern, Plan, Strategy as MapStrategy, Topology, TorusTopology,
};

fn assert_involution(map: &CommunicationMap) -> Result<(), TestCaseError> {
    for rank in map.active_ranks() {
        let partner = map.partner(rank).unwrap();
        prop_assert_ne!(partner, rank);
        prop_assert_eq!(map.partner(partner), Some(rank));
    }
    Ok(())
}

fn dims() -> impl Strategy<Value = Dimensions> {
    (1..4usize, 1..4usize, 1..9usize, 1..3usize)
        .prop_map(|(x, y, z, t)| Dimensions::new(x, y, z, t))
}

proptest! {
    /// Shuffled maps pair every rank, for any seed and round count.
    #[test]
    fn shuffle_is_an_involution(half in 2..64usize, rounds in 0..5usize, seed in any::<u64>()) {
        let map = shuffle::shuffled(2 * half, rounds, seed).unwrap();
        prop_assert_eq!(map.active_ranks().count(), 2 * half);
        assert_involution(&map)?;
    }

    /// The same seed always gives the same map.
    #[test]
    fn shuffle_is_reproducible(half in 2..64usize, rounds in 0..5usize, seed in any::<u64>()) {
        let a = shuffle::shuffled(2 * half, rounds, seed).unwrap();
        let b = shuffle::shuffled(2 * half, rounds, seed).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn block_offset_is_an_involution(blocks in 1..32usize) {
        assert_involution(&shuffle::block_offset(8 * blocks).unwrap())?;
    }

    /// Every supported hop count yields an involution whose partners are
    /// exactly that many hops away on a torus.
    #[test]
    fn hop_partners_are_exact(half_z in 1..12usize, t in 1..4usize, h in 1..12usize) {
        let z = 2 * half_z;
        prop_assume!(h <= z / 2);
        let torus = TorusTopology::new(Dimensions::new(2, 1, z, t));
        if let Ok(map) = hops::fixed_hops(&torus, h) {
            assert_involution(&map)?;
            for rank in map.active_ranks() {
                let partner = map.partner(rank).unwrap();
                prop_assert_eq!(torus.hop_distance(rank, partner), h);
            }
        }
    }

    #[test]
    fn odd_hops_always_build(half_z in 1..12usize, k in 0..6usize) {
        let z = 2 * half_z;
        let h = 2 * k + 1;
        prop_assume!(h < z);
        prop_assert!(hops::fixed_hops(&TorusTopology::ring(z), h).is_ok());
    }

    #[test]
    fn line_is_an_involution(half_z in 1..10usize, xy in 1..4usize, d in 0..6usize) {
        let torus = TorusTopology::new(Dimensions::new(xy, xy, 2 * half_z, 1));
        let plan = interference::line(&torus, d).unwrap();
        let Pattern::Pairs(map) = &plan.pattern else {
            return Err(TestCaseError::fail("line builds a pairing"));
        };
        assert_involution(map)?;
        let middle = [half_z - 1, half_z];
        for &rank in plan.measured().unwrap().ranks() {
            prop_assert!(middle.contains(&torus.rank_to_coord(rank).z));
        }
    }

    #[test]
    fn hollow_jobs_is_an_involution(face in 6..10usize, x in 1..3usize, d in 0..3usize) {
        let torus = TorusTopology::new(Dimensions::new(x, face, face, 1));
        let plan = interference::hollow_jobs(&torus, d).unwrap();
        let Pattern::Pairs(map) = &plan.pattern else {
            return Err(TestCaseError::fail("hollow jobs builds a pairing"));
        };
        assert_involution(map)?;
        plan.validate(torus.num_ranks()).unwrap();
    }

    #[test]
    fn coordinates_round_trip(d in dims(), seed in any::<usize>()) {
        let torus = TorusTopology::new(d);
        let rank = seed % torus.num_ranks();
        prop_assert_eq!(torus.coord_to_rank(torus.rank_to_coord(rank)), rank);
    }

    #[test]
    fn hop_distance_is_symmetric(d in dims(), a in any::<usize>(), b in any::<usize>(), mesh in any::<bool>()) {
        let torus = if mesh { TorusTopology::mesh(d) } else { TorusTopology::new(d) };
        let (a, b) = (a % torus.num_ranks(), b % torus.num_ranks());
        prop_assert_eq!(torus.hop_distance(a, b), torus.hop_distance(b, a));
        prop_assert_eq!(torus.hop_distance(a, a), 0);
    }

    /// A plan survives the trip through its wire encoding.
    #[test]
    fn plans_decode_to_themselves(half in 2..32usize, rounds in 0..5u32, seed in any::<u64>()) {
        let ring = TorusTopology::ring(2 * half);
        let plan = MapStrategy::Shuffle { seed }.build(&ring, rounds).unwrap();
        let decoded = Plan::decode(&plan.encode()).unwrap();
        prop_assert_eq!(decoded, plan);
    }
}
