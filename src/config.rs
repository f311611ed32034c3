//! Run configuration from environment variables.
//!
//! The benchmark takes no command-line flags. Everything that varies between
//! runs is read from the environment; unset variables fall back to defaults.
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `CONTENTION_SCENARIO` | Scenario family name | `hops` |
//! | `CONTENTION_TORUS_DIMS` | Partition extents, `XxYxZxT` | ring `1x1xNx1` |
//! | `CONTENTION_MESH` | `1`/`true` disables wrap-around links | torus |
//! | `CONTENTION_OUTPUT_DIR` | Directory for result files | `.` |
//! | `CONTENTION_MAP_FILE` | Pairing file for the flow family | `2.map` |
//! | `CONTENTION_LOCAL_RANKS` | Ranks of the in-process backend | `8` |

use crate::error::{Error, Result};
use crate::scenario::Family;
use crate::topology::{Dimensions, TorusTopology};
use std::env;
use std::path::PathBuf;

const SCENARIO: &str = "CONTENTION_SCENARIO";
const TORUS_DIMS: &str = "CONTENTION_TORUS_DIMS";
const MESH: &str = "CONTENTION_MESH";
const OUTPUT_DIR: &str = "CONTENTION_OUTPUT_DIR";
const MAP_FILE: &str = "CONTENTION_MAP_FILE";
const LOCAL_RANKS: &str = "CONTENTION_LOCAL_RANKS";

/// Default rank count of the in-process backend.
pub const DEFAULT_LOCAL_RANKS: usize = 8;

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse `XxYxZxT` extents.
pub fn parse_dims(text: &str) -> Result<Dimensions> {
    let parts = text
        .trim()
        .split(['x', 'X'])
        .map(|p| p.trim().parse::<usize>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("{TORUS_DIMS}=`{text}`: {e}")))?;
    match parts[..] {
        [x, y, z, t] if x * y * z * t > 0 => Ok(Dimensions::new(x, y, z, t)),
        _ => Err(Error::Config(format!(
            "{TORUS_DIMS}=`{text}`: expected four non-zero extents XxYxZxT"
        ))),
    }
}

fn parse_flag(name: &str, text: &str) -> Result<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("{name}=`{other}` is not a boolean"))),
    }
}

/// Settings for one benchmark run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Family to run
    pub scenario: Family,
    /// Partition extents; `None` means a ring over all ranks
    pub dims: Option<Dimensions>,
    /// Whether links stop at the partition edges
    pub mesh: bool,
    /// Where result files go
    pub output_dir: PathBuf,
    /// Pairing file for the flow family
    pub map_file: PathBuf,
    /// Rank count when running in-process
    pub local_ranks: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scenario: Family::Hops,
            dims: None,
            mesh: false,
            output_dir: PathBuf::from("."),
            map_file: PathBuf::from("2.map"),
            local_ranks: DEFAULT_LOCAL_RANKS,
        }
    }
}

impl Config {
    /// Read the configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        if let Some(v) = var(SCENARIO) {
            config.scenario = v.parse()?;
        }
        if let Some(v) = var(TORUS_DIMS) {
            config.dims = Some(parse_dims(&v)?);
        }
        if let Some(v) = var(MESH) {
            config.mesh = parse_flag(MESH, &v)?;
        }
        if let Some(v) = var(OUTPUT_DIR) {
            config.output_dir = PathBuf::from(v);
        }
        if let Some(v) = var(MAP_FILE) {
            config.map_file = PathBuf::from(v);
        }
        if let Some(v) = var(LOCAL_RANKS) {
            config.local_ranks = match v.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(Error::Config(format!(
                        "{LOCAL_RANKS}=`{v}` is not a positive rank count"
                    )))
                }
            };
        }
        Ok(config)
    }

    /// Topology for a job of `world_size` ranks, checked against it.
    pub fn topology(&self, world_size: usize) -> Result<TorusTopology> {
        let dims = self
            .dims
            .unwrap_or_else(|| Dimensions::new(1, 1, world_size, 1));
        let topology = if self.mesh {
            TorusTopology::mesh(dims)
        } else {
            TorusTopology::new(dims)
        };
        topology.validate_against(world_size)?;
        Ok(topology)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Topology;

    #[test]
    fn dims_parsing() {
        assert_eq!(parse_dims("8x8x16x4").unwrap(), Dimensions::new(8, 8, 16, 4));
        assert_eq!(parse_dims(" 2X2x2x1 ").unwrap(), Dimensions::new(2, 2, 2, 1));
        assert!(matches!(parse_dims("8x8x16"), Err(Error::Config(_))));
        assert!(matches!(parse_dims("8x0x16x1"), Err(Error::Config(_))));
        assert!(matches!(parse_dims("8xax16x1"), Err(Error::Config(_))));
    }

    #[test]
    fn default_topology_is_a_ring() {
        let topo = Config::default().topology(8).unwrap();
        assert_eq!(topo.dimensions(), Dimensions::new(1, 1, 8, 1));
        assert!(topo.is_periodic(crate::topology::Axis::Z));
    }

    #[test]
    fn explicit_dims_must_match_job() {
        let config = Config {
            dims: Some(Dimensions::new(2, 2, 2, 1)),
            ..Config::default()
        };
        assert!(config.topology(8).is_ok());
        assert!(matches!(config.topology(6), Err(Error::TopologyMismatch(_))));
    }

    /// Tests that mutate environment variables are combined into a single
    /// test; `env::set_var` races with other tests reading the environment.
    #[test]
    fn env_var_parsing() {
        let all = [SCENARIO, TORUS_DIMS, MESH, OUTPUT_DIR, MAP_FILE, LOCAL_RANKS];
        unsafe {
            for name in all {
                std::env::remove_var(name);
            }
        }
        assert_eq!(Config::from_env().unwrap(), Config::default());

        // --- every variable set ---
        unsafe {
            std::env::set_var(SCENARIO, "stencil");
            std::env::set_var(TORUS_DIMS, "4x4x8x2");
            std::env::set_var(MESH, "true");
            std::env::set_var(OUTPUT_DIR, "/tmp/results");
            std::env::set_var(MAP_FILE, "lines.map");
            std::env::set_var(LOCAL_RANKS, "16");
        }
        let config = Config::from_env().unwrap();
        assert_eq!(config.scenario, Family::Stencil);
        assert_eq!(config.dims, Some(Dimensions::new(4, 4, 8, 2)));
        assert!(config.mesh);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/results"));
        assert_eq!(config.map_file, PathBuf::from("lines.map"));
        assert_eq!(config.local_ranks, 16);

        // --- blank values fall back to defaults ---
        unsafe {
            std::env::set_var(TORUS_DIMS, "  ");
        }
        assert_eq!(Config::from_env().unwrap().dims, None);

        // --- malformed values are configuration errors ---
        unsafe {
            std::env::set_var(MESH, "maybe");
        }
        assert!(matches!(Config::from_env(), Err(Error::Config(_))));
        unsafe {
            std::env::set_var(MESH, "0");
            std::env::set_var(LOCAL_RANKS, "0");
        }
        assert!(matches!(Config::from_env(), Err(Error::Config(_))));
        unsafe {
            std::env::set_var(LOCAL_RANKS, "4");
            std::env::set_var(SCENARIO, "bogus");
        }
        assert!(matches!(Config::from_env(), Err(Error::Config(_))));

        unsafe {
            for name in all {
                std::env::remove_var(name);
            }
        }
    }
}
