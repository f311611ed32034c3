//! Torus topology adapter.
//!
//! Processes sit on an `X × Y × Z` grid of nodes with `T` processes per node.
//! The [`Topology`] trait is the only place coordinate conversion and
//! wrap-around arithmetic happen; map builders ask it for partners instead of
//! doing modulo math themselves.
//!
//! Ranks are laid out in XYZT order: `x` varies fastest and `t` slowest.
//!
//! # Example
//!
//! ```
//! use torus_contention::{Coordinate, Dimensions, Topology, TorusTopology};
//!
//! let torus = TorusTopology::new(Dimensions::new(4, 4, 8, 2));
//! let c = torus.rank_to_coord(37);
//! assert_eq!(torus.coord_to_rank(c), 37);
//! assert_eq!(torus.hop_distance(0, torus.coord_to_rank(Coordinate::new(0, 0, 7, 0))), 1);
//! ```

use crate::error::{Error, Result};
use crate::Rank;
use std::fmt;

/// Spatial axis of the torus. The `t` axis is intra-node and never wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// First network dimension
    X,
    /// Second network dimension
    Y,
    /// Third network dimension
    Z,
}

/// Extents of the partition in each dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimensions {
    /// Nodes along x
    pub x: usize,
    /// Nodes along y
    pub y: usize,
    /// Nodes along z
    pub z: usize,
    /// Processes per node
    pub t: usize,
}

impl Dimensions {
    /// Create a new set of extents.
    pub const fn new(x: usize, y: usize, z: usize, t: usize) -> Self {
        Dimensions { x, y, z, t }
    }

    /// Total number of ranks covered by these extents.
    pub const fn product(&self) -> usize {
        self.x * self.y * self.z * self.t
    }

    /// Extent along a spatial axis.
    pub const fn along(&self, axis: Axis) -> usize {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Number of processes on the lower half of a node.
    ///
    /// Rounded up so that a single process per node counts as the lower half.
    pub const fn lower_half_t(&self) -> usize {
        self.t.div_ceil(2)
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}x{}", self.x, self.y, self.z, self.t)
    }
}

/// Position of a process in the partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Coordinate {
    /// x position
    pub x: usize,
    /// y position
    pub y: usize,
    /// z position
    pub z: usize,
    /// Process index within the node
    pub t: usize,
}

impl Coordinate {
    /// Create a new coordinate.
    pub const fn new(x: usize, y: usize, z: usize, t: usize) -> Self {
        Coordinate { x, y, z, t }
    }

    /// Component along a spatial axis.
    pub const fn along(&self, axis: Axis) -> usize {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Copy of this coordinate with one spatial component replaced.
    pub const fn with(mut self, axis: Axis, value: usize) -> Self {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
        }
        self
    }
}

/// Topology query service used by the map builders.
///
/// Implementations must be pure and consistent:
/// `coord_to_rank(rank_to_coord(r)) == r` for every valid `r`.
pub trait Topology {
    /// Extents of the partition.
    fn dimensions(&self) -> Dimensions;

    /// Coordinate of a rank.
    fn rank_to_coord(&self, rank: Rank) -> Coordinate;

    /// Rank at a coordinate.
    fn coord_to_rank(&self, coord: Coordinate) -> Rank;

    /// Number of network links on the shortest path between two ranks.
    fn hop_distance(&self, a: Rank, b: Rank) -> usize;

    /// Whether links wrap around along `axis`.
    fn is_periodic(&self, axis: Axis) -> bool;

    /// Total number of ranks.
    fn num_ranks(&self) -> usize {
        self.dimensions().product()
    }

    /// Place a possibly out-of-range position on `axis`.
    ///
    /// Periodic axes fold it back into range; on a mesh axis a position past
    /// either edge has no node and gives `None`.
    fn wrap(&self, axis: Axis, value: i64) -> Option<usize> {
        let extent = self.dimensions().along(axis) as i64;
        if self.is_periodic(axis) {
            Some(value.rem_euclid(extent) as usize)
        } else {
            (0..extent).contains(&value).then_some(value as usize)
        }
    }

    /// Rank displaced by `(dx, dy, dz)` from `rank`, or `None` when the
    /// displacement leaves a mesh.
    fn neighbor(&self, rank: Rank, dx: i64, dy: i64, dz: i64) -> Option<Rank> {
        let c = self.rank_to_coord(rank);
        Some(self.coord_to_rank(Coordinate::new(
            self.wrap(Axis::X, c.x as i64 + dx)?,
            self.wrap(Axis::Y, c.y as i64 + dy)?,
            self.wrap(Axis::Z, c.z as i64 + dz)?,
            c.t,
        )))
    }
}

/// A 3D torus (or mesh) with `t` processes per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TorusTopology {
    dims: Dimensions,
    periodic: bool,
}

impl TorusTopology {
    /// A torus: every spatial axis wraps around.
    pub fn new(dims: Dimensions) -> Self {
        TorusTopology {
            dims,
            periodic: true,
        }
    }

    /// A mesh: no wrap-around links.
    pub fn mesh(dims: Dimensions) -> Self {
        TorusTopology {
            dims,
            periodic: false,
        }
    }

    /// A 1-D ring of `n` single-process nodes laid along z.
    pub fn ring(n: usize) -> Self {
        Self::new(Dimensions::new(1, 1, n, 1))
    }

    /// Check that the extents describe exactly `world_size` processes.
    pub fn validate_against(&self, world_size: usize) -> Result<()> {
        if self.dims.product() == 0 {
            return Err(Error::TopologyMismatch(format!(
                "partition {} has an empty dimension",
                self.dims
            )));
        }
        if self.dims.product() != world_size {
            return Err(Error::TopologyMismatch(format!(
                "partition {} holds {} ranks but the job has {}",
                self.dims,
                self.dims.product(),
                world_size
            )));
        }
        Ok(())
    }

    fn axis_distance(&self, axis: Axis, a: usize, b: usize) -> usize {
        let d = a.abs_diff(b);
        if self.periodic {
            d.min(self.dims.along(axis) - d)
        } else {
            d
        }
    }
}

impl Topology for TorusTopology {
    fn dimensions(&self) -> Dimensions {
        self.dims
    }

    fn rank_to_coord(&self, rank: Rank) -> Coordinate {
        let d = &self.dims;
        let x = rank % d.x;
        let rest = rank / d.x;
        let y = rest % d.y;
        let rest = rest / d.y;
        let z = rest % d.z;
        let t = rest / d.z;
        Coordinate { x, y, z, t }
    }

    fn coord_to_rank(&self, c: Coordinate) -> Rank {
        let d = &self.dims;
        c.x + d.x * (c.y + d.y * (c.z + d.z * c.t))
    }

    fn hop_distance(&self, a: Rank, b: Rank) -> usize {
        let ca = self.rank_to_coord(a);
        let cb = self.rank_to_coord(b);
        [Axis::X, Axis::Y, Axis::Z]
            .into_iter()
            .map(|axis| self.axis_distance(axis, ca.along(axis), cb.along(axis)))
            .sum()
    }

    fn is_periodic(&self, _axis: Axis) -> bool {
        self.periodic
    }
}
