//! Per-scenario control flow.
//!
//! For every scenario parameter the coordinating rank builds the plan and
//! broadcasts it; every rank then joins the sub-group of its roster (ranks
//! outside every roster sit the parameter out) and, for every message size,
//! runs the scenario's trials and reduces the samples. Local rank 0 of the
//! measured roster appends one record per message size.

use crate::comm::Communicator;
use crate::config::Config;
use crate::engine::{self, Buffers};
use crate::error::{Error, Result};
use crate::map::{Exchange, Pattern, Plan, TraceRole};
use crate::report::{ResultSink, TraceEntry};
use crate::scenario::ScenarioDescriptor;
use crate::stats::{self, TrialAverager};
use crate::topology::{Topology, TorusTopology};
use crate::Rank;
use std::path::Path;

/// World rank that builds maps and logs progress.
pub const COORDINATOR: Rank = 0;

/// Broadcast header announcing that the coordinator failed to build a map.
const BUILD_FAILED: i32 = -1;

/// Build a plan on the coordinator and hand it to every rank.
///
/// Collective over `world`. When the build fails, the coordinator returns its
/// own error and every other rank returns [`Error::RemoteBuildFailure`].
pub fn distribute_plan<C, F>(world: &C, build: F) -> Result<Plan>
where
    C: Communicator,
    F: FnOnce() -> Result<Plan>,
{
    let built = (world.rank() == COORDINATOR).then(build);
    let mut words = match &built {
        Some(Ok(plan)) => plan.encode(),
        _ => Vec::new(),
    };
    let mut header = [match &built {
        Some(Err(_)) => BUILD_FAILED,
        _ => words.len() as i32,
    }];
    world.broadcast(&mut header, COORDINATOR)?;
    if let Some(Err(e)) = built {
        return Err(e);
    }
    if header[0] < 0 {
        return Err(Error::RemoteBuildFailure);
    }
    words.resize(header[0] as usize, 0);
    world.broadcast(&mut words, COORDINATOR)?;
    match built {
        Some(Ok(plan)) => Ok(plan),
        _ => {
            let plan = Plan::decode(&words)?;
            plan.validate(world.size())?;
            Ok(plan)
        }
    }
}

/// Build every parameter's plan on the coordinator before anything is
/// measured, so an unsupported partition fails up front.
fn preflight<C, T>(world: &C, topology: &T, scenario: &ScenarioDescriptor) -> Result<()>
where
    C: Communicator,
    T: Topology,
{
    let outcome = (world.rank() == COORDINATOR).then(|| {
        scenario
            .parameters
            .iter()
            .try_for_each(|&p| scenario.strategy.build(topology, p).map(drop))
    });
    let mut flag = [match &outcome {
        Some(Err(_)) => BUILD_FAILED,
        _ => 0,
    }];
    world.broadcast(&mut flag, COORDINATOR)?;
    if let Some(Err(e)) = outcome {
        log::error!("scenario cannot run on this partition: {e}");
        return Err(e);
    }
    if flag[0] < 0 {
        return Err(Error::RemoteBuildFailure);
    }
    Ok(())
}

/// Run the scenario selected by `config` on `world`.
pub fn run<C: Communicator>(world: &C, config: &Config) -> Result<()> {
    let topology: TorusTopology = config.topology(world.size())?;
    let scenario = config
        .scenario
        .descriptor(topology.dimensions(), config.map_file.clone());
    if world.rank() == COORDINATOR {
        log::info!(
            "Torus dimensions {} ({} ranks), scenario {}",
            topology.dimensions(),
            world.size(),
            config.scenario
        );
    }
    run_scenario(world, &topology, &scenario, &config.output_dir)
}

/// Run every parameter and message size of `scenario`.
///
/// Collective over `world`; every rank must call it with the same arguments.
pub fn run_scenario<C, T>(
    world: &C,
    topology: &T,
    scenario: &ScenarioDescriptor,
    output_dir: &Path,
) -> Result<()>
where
    C: Communicator,
    T: Topology,
{
    scenario.validate()?;
    if topology.num_ranks() != world.size() {
        return Err(Error::TopologyMismatch(format!(
            "topology holds {} ranks but the job has {}",
            topology.num_ranks(),
            world.size()
        )));
    }
    preflight(world, topology, scenario)?;
    let sink = ResultSink::new(output_dir, scenario.prefix.as_str(), world.size());

    for &parameter in &scenario.parameters {
        if world.rank() == COORDINATOR {
            log::info!("{} parameter {parameter}", scenario.prefix);
        }
        let plan = distribute_plan(world, || scenario.strategy.build(topology, parameter))?;
        if world.rank() == COORDINATOR {
            log::debug!(
                "{} parameter {parameter}: {} rosters, measured {:?}",
                scenario.prefix,
                plan.rosters.len(),
                plan.measured().map(|r| r.len())
            );
        }

        let mut group = None;
        for roster in &plan.rosters {
            if let Some(sub) = world.create_subgroup(roster.ranks())? {
                group = Some(sub);
            }
        }
        let Some(group) = group else {
            log::trace!("rank {} inactive for parameter {parameter}", world.rank());
            continue;
        };
        let measured = plan.roster_of(world.rank()) == Some(0);
        let iteration = Iteration {
            world,
            group: &group,
            topology,
            scenario,
            sink: &sink,
            parameter,
            measured,
        };
        iteration.run(&plan.pattern)?;
    }
    Ok(())
}

/// One scenario parameter on one active rank.
struct Iteration<'a, C, T: ?Sized> {
    world: &'a C,
    group: &'a C,
    topology: &'a T,
    scenario: &'a ScenarioDescriptor,
    sink: &'a ResultSink,
    parameter: u32,
    measured: bool,
}

impl<C: Communicator, T: Topology + ?Sized> Iteration<'_, C, T> {
    fn run(&self, pattern: &Pattern) -> Result<()> {
        let me = self.world.rank();
        let exchanges: Vec<Exchange> = match pattern {
            Pattern::Stencil(stencil) => stencil.exchanges(self.topology, me)?,
            _ => Vec::new(),
        };
        let mut buffers = Buffers::new(self.scenario.sizes.max, exchanges.len());

        for size in self.scenario.sizes.sizes() {
            self.group.barrier()?;
            let mut averager = TrialAverager::new();
            for _ in 0..self.scenario.trials {
                let sample = match pattern {
                    Pattern::Pairs(map) => {
                        let partner = map.partner(me).ok_or_else(|| {
                            Error::Internal(format!("rank {me} is rostered without a partner"))
                        })?;
                        engine::ping_pong(
                            self.world,
                            self.group,
                            partner,
                            size,
                            &self.scenario.shape,
                            &mut buffers,
                        )?
                    }
                    Pattern::Directed(map) => {
                        let sample = engine::one_way(
                            self.world,
                            self.group,
                            map.send.partner(me),
                            map.recv.partner(me),
                            size,
                            &self.scenario.shape,
                            &mut buffers,
                        )?;
                        if map.trace[me] == TraceRole::Sender {
                            let entries: Vec<TraceEntry> = sample
                                .send_stamps
                                .iter()
                                .zip(&sample.recv_stamps)
                                .map(|(&sent, &received)| TraceEntry { sent, received })
                                .collect();
                            self.sink.append_trace(self.parameter, me, size, &entries)?;
                        }
                        sample.per_transfer
                    }
                    Pattern::Stencil(_) => engine::neighbor_exchange(
                        self.world,
                        self.group,
                        &exchanges,
                        size,
                        &self.scenario.shape,
                        &mut buffers,
                    )?,
                    Pattern::FanOut { root } => {
                        let latencies = engine::fan_out(
                            self.world,
                            self.group,
                            *root,
                            size,
                            &self.scenario.shape,
                            &mut buffers,
                        )?;
                        if let Some(latencies) = latencies {
                            self.sink.append_latencies(size, &latencies)?;
                        }
                        continue;
                    }
                };
                if self.measured {
                    averager.push(stats::reduce(self.group, sample)?);
                }
            }
            if let Some(mean) = averager.mean() {
                if self.group.rank() == 0 {
                    self.sink.append_record(self.parameter, size, &mean)?;
                }
            }
        }
        Ok(())
    }
}
