//! End-to-end scenario runs over the in-process backend.
//!
//! Each test runs a shrunken built-in family on a small partition and checks
//! the result files it leaves behind.

use std::fs;
use std::path::Path;
use torus_contention::scenario::MessageSizes;
use torus_contention::{
    runner, stats, Communicator, Dimensions, Error, Family, InjectedFault, LocalWorld,
    ScenarioDescriptor, Strategy, Topology, TorusTopology,
};

fn shrunk(family: Family, torus: &TorusTopology, max_size: usize) -> ScenarioDescriptor {
    let mut scenario = family.descriptor(torus.dimensions(), "2.map".into());
    scenario.sizes = MessageSizes {
        min: 4,
        max: max_size,
        descending: scenario.sizes.descending,
    };
    scenario.trials = scenario.trials.min(2);
    scenario
}

fn run(world: LocalWorld, torus: &TorusTopology, scenario: &ScenarioDescriptor, dir: &Path) {
    world
        .run(|comm| runner::run_scenario(&comm, torus, scenario, dir))
        .unwrap();
}

/// Parse `<size> <v1> <v2> ...` lines.
fn records(path: &Path) -> Vec<(usize, Vec<f64>)> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| {
            let mut fields = line.split_whitespace();
            let size = fields.next().unwrap().parse().unwrap();
            let values = fields.map(|v| v.parse().unwrap()).collect();
            (size, values)
        })
        .collect()
}

fn assert_ordered(values: &[f64]) {
    let [min, avg, max] = values[..3] else {
        panic!("expected min avg max, got {values:?}");
    };
    assert!(min > 0.0, "{values:?}");
    assert!(min <= avg && avg <= max, "{values:?}");
}

#[test]
fn hop_ring_publishes_one_record_per_size() {
    let dir = tempfile::tempdir().unwrap();
    let torus = TorusTopology::ring(8);
    let mut scenario = shrunk(Family::Hops, &torus, 4);
    scenario.parameters = vec![1];

    run(LocalWorld::new(8), &torus, &scenario, dir.path());

    let rows = records(&dir.path().join("hops_8_1.dat"));
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, 4);
    assert_eq!(rows[0].1.len(), 3);
    assert_ordered(&rows[0].1);
}

#[test]
fn every_hop_count_gets_its_own_file() {
    let dir = tempfile::tempdir().unwrap();
    let torus = TorusTopology::ring(8);
    let scenario = shrunk(Family::Hops, &torus, 8);

    run(LocalWorld::new(8), &torus, &scenario, dir.path());

    for hops in 1..=4 {
        let rows = records(&dir.path().join(format!("hops_8_{hops}.dat")));
        let sizes: Vec<usize> = rows.iter().map(|(s, _)| *s).collect();
        assert_eq!(sizes, vec![4, 8]);
        rows.iter().for_each(|(_, v)| assert_ordered(v));
    }
}

#[test]
fn nearest_sweeps_sizes_downwards() {
    let dir = tempfile::tempdir().unwrap();
    let torus = TorusTopology::ring(8);
    let scenario = shrunk(Family::Nearest, &torus, 16);

    run(LocalWorld::new(8), &torus, &scenario, dir.path());

    let sizes: Vec<usize> = records(&dir.path().join("nn_8_0.dat"))
        .iter()
        .map(|(s, _)| *s)
        .collect();
    assert_eq!(sizes, vec![16, 8, 4]);
}

#[test]
fn averages_cover_only_the_roster() {
    let sums = LocalWorld::new(8)
        .run(|world| {
            let group = world.create_subgroup(&[1, 3, 5, 7])?;
            match group {
                Some(group) => Ok(Some(stats::reduce(&group, world.rank() as f64)?)),
                None => Ok(None),
            }
        })
        .unwrap();
    for (rank, summary) in sums.iter().enumerate() {
        match summary {
            Some(s) => {
                assert_eq!(rank % 2, 1);
                assert_eq!((s.min, s.avg, s.max), (1.0, 4.0, 7.0));
            }
            None => assert_eq!(rank % 2, 0),
        }
    }
}

#[test]
fn line_measures_only_the_middle_planes() {
    let dir = tempfile::tempdir().unwrap();
    let torus = TorusTopology::ring(8);
    let mut scenario = shrunk(Family::Line, &torus, 4);
    scenario.parameters = vec![0, 1];

    run(LocalWorld::new(8), &torus, &scenario, dir.path());

    for separation in [0, 1] {
        let rows = records(&dir.path().join(format!("line_8_{separation}.dat")));
        assert_eq!(rows.len(), 1);
        assert_ordered(&rows[0].1);
    }
}

#[test]
fn flow_streams_and_traces_plane_zero() {
    let dir = tempfile::tempdir().unwrap();
    let map_file = dir.path().join("2.map");
    fs::write(&map_file, "0 0 0 1 0 0\n").unwrap();
    let torus = TorusTopology::new(Dimensions::new(2, 1, 2, 1));
    let mut scenario = Family::Flow.descriptor(torus.dimensions(), map_file);
    scenario.sizes.max = 8;

    run(LocalWorld::new(4), &torus, &scenario, dir.path());

    let rows = records(&dir.path().join("flow_4_0.dat"));
    assert_eq!(rows.iter().map(|(s, _)| *s).collect::<Vec<_>>(), vec![4, 8]);
    rows.iter().for_each(|(_, v)| assert_ordered(v));

    let trace = fs::read_to_string(dir.path().join("flow_trace_0.dat")).unwrap();
    assert_eq!(trace.lines().count(), 2 * 10);
    for line in trace.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        assert_eq!(fields.len(), 7);
        assert_eq!(&fields[..2], &["0", "0"]);
    }
    // Rank 2 streams on plane 1, which is not traced.
    assert!(!dir.path().join("flow_trace_2.dat").exists());
}

#[test]
fn stencil_exchange_on_a_small_torus() {
    let dir = tempfile::tempdir().unwrap();
    let torus = TorusTopology::new(Dimensions::new(2, 2, 2, 1));
    let mut scenario = shrunk(Family::Stencil, &torus, 8);
    scenario.parameters = vec![1, 2];

    run(LocalWorld::new(8), &torus, &scenario, dir.path());

    for dilation in [1, 2] {
        let rows = records(&dir.path().join(format!("dilation_8_{dilation}.dat")));
        assert_eq!(rows.len(), 2);
        rows.iter().for_each(|(_, v)| assert_ordered(v));
    }
}

#[test]
fn dilation_three_runs_on_a_small_torus() {
    let dir = tempfile::tempdir().unwrap();
    let torus = TorusTopology::new(Dimensions::new(3, 3, 3, 1));
    let mut scenario = shrunk(Family::Stencil, &torus, 4);
    scenario.parameters = vec![3];

    run(LocalWorld::new(27), &torus, &scenario, dir.path());

    let rows = records(&dir.path().join("dilation_27_3.dat"));
    assert_eq!(rows.len(), 1);
    assert_ordered(&rows[0].1);
}

#[test]
fn jobs_publish_both_separations() {
    let dir = tempfile::tempdir().unwrap();
    let torus = TorusTopology::new(Dimensions::new(1, 6, 6, 1));
    let scenario = shrunk(Family::Jobs, &torus, 8);
    assert_eq!(scenario.parameters, vec![0, 1]);

    run(LocalWorld::new(36), &torus, &scenario, dir.path());

    for separation in [0, 1] {
        let rows = records(&dir.path().join(format!("job_36_{separation}.dat")));
        assert_eq!(rows.iter().map(|(s, _)| *s).collect::<Vec<_>>(), vec![4, 8]);
        rows.iter().for_each(|(_, v)| assert_ordered(v));
    }
}

#[test]
fn jobs_average_only_the_inner_brick() {
    let torus = TorusTopology::new(Dimensions::new(1, 6, 6, 1));
    let plan = Strategy::HollowJobs.build(&torus, 1).unwrap();
    let inner = plan.measured().unwrap().ranks().to_vec();
    // y in 1..=4 on planes z = 2 and z = 3
    assert_eq!(inner, vec![13, 14, 15, 16, 19, 20, 21, 22]);

    let sums = LocalWorld::new(36)
        .run(|world| match world.create_subgroup(&inner)? {
            Some(group) => Ok(Some(stats::reduce(&group, world.rank() as f64)?)),
            None => Ok(None),
        })
        .unwrap();
    let measured: Vec<_> = sums.iter().flatten().collect();
    assert_eq!(measured.len(), 8);
    for s in measured {
        assert_eq!((s.min, s.avg, s.max), (13.0, 17.5, 22.0));
    }
}

#[test]
fn latency_fan_out_writes_per_peer_lines() {
    let dir = tempfile::tempdir().unwrap();
    let torus = TorusTopology::ring(4);
    let scenario = shrunk(Family::Latency, &torus, 8);

    run(LocalWorld::new(4), &torus, &scenario, dir.path());

    let peers = records(&dir.path().join("latency_4.dat"));
    assert_eq!(peers.len(), 3 * 2);
    assert!(peers[..3].iter().all(|(s, _)| *s == 8));
    assert!(peers[3..].iter().all(|(s, _)| *s == 4));

    let summary = records(&dir.path().join("latency_summary_4.dat"));
    assert_eq!(summary.len(), 2);
    for (_, values) in &summary {
        assert_eq!(values.len(), 4);
        assert_ordered(values);
    }
    assert!(!dir.path().join("latency_4_0.dat").exists());
}

#[test]
fn transfer_fault_fails_the_run_without_records() {
    let dir = tempfile::tempdir().unwrap();
    let torus = TorusTopology::ring(8);
    let mut scenario = shrunk(Family::Hops, &torus, 4);
    scenario.parameters = vec![1];

    let world = LocalWorld::new(8).with_fault(InjectedFault {
        rank: 3,
        after_sends: 2,
    });
    let err = world
        .run(|comm| runner::run_scenario(&comm, &torus, &scenario, dir.path()))
        .unwrap_err();

    assert!(matches!(err, Error::Transfer { .. }), "{err}");
    assert!(!dir.path().join("hops_8_1.dat").exists());
}

#[test]
fn missing_map_file_fails_every_rank() {
    let dir = tempfile::tempdir().unwrap();
    let torus = TorusTopology::new(Dimensions::new(2, 1, 2, 1));
    let scenario = Family::Flow.descriptor(torus.dimensions(), dir.path().join("absent.map"));

    let outcomes = LocalWorld::new(4)
        .run(|comm| {
            Ok(match runner::run_scenario(&comm, &torus, &scenario, dir.path()) {
                Err(Error::InputIo { .. }) => "origin",
                Err(Error::RemoteBuildFailure) => "remote",
                _ => "other",
            })
        })
        .unwrap();
    assert_eq!(outcomes, vec!["origin", "remote", "remote", "remote"]);
}
