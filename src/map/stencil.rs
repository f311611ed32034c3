//! Neighbor-exchange patterns.

use crate::comm::Tag;
use crate::error::{Error, Result};
use crate::topology::Topology;
use crate::Rank;

/// Wire code for the 26-point halo.
const HALO26_CODE: i32 = 26;

/// Largest supported dilation.
pub const MAX_DILATION: u32 = 3;

/// A displacement every rank exchanges along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    /// Displacement in x, y, z
    pub offset: (i64, i64, i64),
    /// Tag carried by messages on this link
    pub tag: Tag,
}

/// One exchange a rank takes part in: send to `send_to` and receive from
/// `recv_from`, both on `tag`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exchange {
    /// Destination of the outgoing message
    pub send_to: Rank,
    /// Source of the incoming message
    pub recv_from: Rank,
    /// Tag shared by both directions
    pub tag: Tag,
}

/// Which neighbors every rank exchanges with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilPattern {
    /// Six faces, plus far diagonals as the dilation grows
    Dilation(u32),
    /// Every node of the surrounding 3x3x3 cube
    Halo26,
}

impl StencilPattern {
    /// Dilated stencil, `1..=MAX_DILATION`.
    pub fn dilation(d: u32) -> Result<Self> {
        if !(1..=MAX_DILATION).contains(&d) {
            return Err(Error::Config(format!(
                "stencil dilation must be 1..={MAX_DILATION}, got {d}"
            )));
        }
        Ok(StencilPattern::Dilation(d))
    }

    pub(crate) fn code(self) -> i32 {
        match self {
            StencilPattern::Dilation(d) => d as i32,
            StencilPattern::Halo26 => HALO26_CODE,
        }
    }

    pub(crate) fn from_code(code: i32) -> Result<Self> {
        match code {
            HALO26_CODE => Ok(StencilPattern::Halo26),
            d if d > 0 => StencilPattern::dilation(d as u32),
            other => Err(Error::Internal(format!("unknown stencil code {other}"))),
        }
    }

    /// Displacements in exchange order; tags count up from 1.
    pub fn links(self) -> Vec<Link> {
        let mut offsets = Vec::new();
        match self {
            StencilPattern::Dilation(d) => {
                offsets.extend([
                    (1, 0, 0),
                    (-1, 0, 0),
                    (0, 1, 0),
                    (0, -1, 0),
                    (0, 0, 1),
                    (0, 0, -1),
                ]);
                // The far diagonals replace each other rather than accumulate
                if d == 2 {
                    offsets.extend([(2, 2, 2), (-1, -1, -1)]);
                }
                if d >= 3 {
                    offsets.push((3, 3, 3));
                }
            }
            StencilPattern::Halo26 => {
                for dz in -1..=1 {
                    for dy in -1..=1 {
                        for dx in -1..=1 {
                            if (dx, dy, dz) != (0, 0, 0) {
                                offsets.push((dx, dy, dz));
                            }
                        }
                    }
                }
            }
        }
        offsets
            .into_iter()
            .enumerate()
            .map(|(i, offset)| Link {
                offset,
                tag: i as Tag + 1,
            })
            .collect()
    }

    /// The exchanges `rank` performs, one per link.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TopologyMismatch`] when a link leaves a mesh.
    pub fn exchanges<T: Topology + ?Sized>(
        self,
        topology: &T,
        rank: Rank,
    ) -> Result<Vec<Exchange>> {
        self.links()
            .into_iter()
            .map(|link| {
                let (dx, dy, dz) = link.offset;
                let send_to = topology.neighbor(rank, dx, dy, dz);
                let recv_from = topology.neighbor(rank, -dx, -dy, -dz);
                match (send_to, recv_from) {
                    (Some(send_to), Some(recv_from)) => Ok(Exchange {
                        send_to,
                        recv_from,
                        tag: link.tag,
                    }),
                    _ => Err(Error::TopologyMismatch(format!(
                        "stencil link {:?} of rank {rank} leaves the mesh",
                        link.offset
                    ))),
                }
            })
            .collect()
    }

    /// Check that every rank of `topology` has all of its links.
    pub fn check_fits<T: Topology + ?Sized>(self, topology: &T) -> Result<()> {
        (0..topology.num_ranks()).try_for_each(|rank| self.exchanges(topology, rank).map(drop))
    }
}
