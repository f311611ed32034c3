//! Contention benchmark driver.
//!
//! Configuration comes from `CONTENTION_*` environment variables (see
//! [`torus_contention::config`]); logging is controlled by `RUST_LOG`.
//!
//! Without the `mpi` feature the ranks run as threads of this process:
//!
//! ```text
//! CONTENTION_SCENARIO=hops CONTENTION_LOCAL_RANKS=16 cargo run --release
//! ```
//!
//! With it, launch one process per rank:
//!
//! ```text
//! CONTENTION_TORUS_DIMS=8x8x16x4 mpiexec -n 4096 ./contention
//! ```

use std::process::ExitCode;
use torus_contention::{runner, Config, Result};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let outcome = Config::from_env().and_then(|config| execute(&config));
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(not(feature = "mpi"))]
fn execute(config: &Config) -> Result<()> {
    use torus_contention::LocalWorld;

    LocalWorld::new(config.local_ranks).run(|world| runner::run(&world, config))?;
    log::info!("Program complete");
    Ok(())
}

#[cfg(feature = "mpi")]
fn execute(config: &Config) -> Result<()> {
    use torus_contention::{Communicator, Mpi};

    let mpi = Mpi::init()?;
    let world = mpi.world();
    if let Err(e) = runner::run(&world, config) {
        // Peers may be blocked in a transfer with this rank; take the whole
        // job down instead of returning.
        log::error!("rank {}: {e}", world.rank());
        mpi.abort(1);
    }
    if world.rank() == runner::COORDINATOR {
        log::info!("Program complete");
    }
    Ok(())
}
