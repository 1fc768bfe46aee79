use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Edge length of a base-grid cube in world units.
pub const BASE_CELL_EDGE: f64 = 1.0;
/// Edge length of a sub-grid cube in world units.
pub const SUB_CELL_EDGE: f64 = 0.5;

/// One occupied cube on the base grid, centered at the integer coordinate.
///
/// The cube covers world `[x - 0.5, x + 0.5)` per axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VoxelKey {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// One occupied cube on the sub grid (2x finer than the base grid),
/// identified by its minimum corner. The cube covers world
/// `[x * 0.5, x * 0.5 + 0.5)` per axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubVoxelKey {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// Cell on either grid resolution. The connectivity analyzer is generic
/// over this seam; adjacency is shared-face only (6 neighbors).
pub trait GridCell: Copy + Eq + std::hash::Hash + Ord {
    fn face_neighbors(&self) -> [Self; 6];
}

fn parse_triple(s: &str) -> Option<(i32, i32, i32)> {
    let mut parts = s.split(',');
    let x = parts.next()?.trim().parse().ok()?;
    let y = parts.next()?.trim().parse().ok()?;
    let z = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((x, y, z))
}

impl VoxelKey {
    pub const ORIGIN: Self = Self { x: 0, y: 0, z: 0 };

    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Parse the canonical `"x,y,z"` form. Fail-closed: malformed input
    /// yields `None` rather than a panic or a default key.
    pub fn parse(s: &str) -> Option<Self> {
        parse_triple(s).map(|(x, y, z)| Self { x, y, z })
    }

    /// The exact 2x2x2 sub-grid decomposition of this cube's volume.
    ///
    /// Base cell centered at `x` spans world `[x - 0.5, x + 0.5)`, so its
    /// minimum sub corner sits at sub index `2x - 1`.
    pub fn sub_cells(&self) -> [SubVoxelKey; 8] {
        let bx = 2 * self.x - 1;
        let by = 2 * self.y - 1;
        let bz = 2 * self.z - 1;
        let mut out = [SubVoxelKey { x: 0, y: 0, z: 0 }; 8];
        let mut i = 0;
        for dz in 0..2 {
            for dy in 0..2 {
                for dx in 0..2 {
                    out[i] = SubVoxelKey {
                        x: bx + dx,
                        y: by + dy,
                        z: bz + dz,
                    };
                    i += 1;
                }
            }
        }
        out
    }

    /// World-space min corner of this cube.
    pub fn world_min(&self) -> [f64; 3] {
        [
            self.x as f64 - 0.5,
            self.y as f64 - 0.5,
            self.z as f64 - 0.5,
        ]
    }

    /// World-space max corner of this cube.
    pub fn world_max(&self) -> [f64; 3] {
        [
            self.x as f64 + 0.5,
            self.y as f64 + 0.5,
            self.z as f64 + 0.5,
        ]
    }
}

impl fmt::Display for VoxelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

impl GridCell for VoxelKey {
    fn face_neighbors(&self) -> [Self; 6] {
        let Self { x, y, z } = *self;
        [
            Self { x: x + 1, y, z },
            Self { x: x - 1, y, z },
            Self { x, y: y + 1, z },
            Self { x, y: y - 1, z },
            Self { x, y, z: z + 1 },
            Self { x, y, z: z - 1 },
        ]
    }
}

impl SubVoxelKey {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Parse the canonical `"x,y,z"` form; `None` on malformed input.
    pub fn parse(s: &str) -> Option<Self> {
        parse_triple(s).map(|(x, y, z)| Self { x, y, z })
    }

    pub fn world_min(&self) -> [f64; 3] {
        [
            self.x as f64 * SUB_CELL_EDGE,
            self.y as f64 * SUB_CELL_EDGE,
            self.z as f64 * SUB_CELL_EDGE,
        ]
    }

    pub fn world_max(&self) -> [f64; 3] {
        let min = self.world_min();
        [
            min[0] + SUB_CELL_EDGE,
            min[1] + SUB_CELL_EDGE,
            min[2] + SUB_CELL_EDGE,
        ]
    }
}

impl fmt::Display for SubVoxelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

impl GridCell for SubVoxelKey {
    fn face_neighbors(&self) -> [Self; 6] {
        let Self { x, y, z } = *self;
        [
            Self { x: x + 1, y, z },
            Self { x: x - 1, y, z },
            Self { x, y: y + 1, z },
            Self { x, y: y - 1, z },
            Self { x, y, z: z + 1 },
            Self { x, y, z: z - 1 },
        ]
    }
}

/// Expand a base occupancy set into its full sub-grid footprint.
pub fn expand_to_sub_grid(base: &HashSet<VoxelKey>) -> HashSet<SubVoxelKey> {
    let mut out = HashSet::with_capacity(base.len() * 8);
    for key in base {
        out.extend(key.sub_cells());
    }
    out
}

/// An empty base model is not representable downstream; seed it with the
/// origin cube before any analysis runs.
pub fn normalize_occupancy(base: &mut HashSet<VoxelKey>) {
    if base.is_empty() {
        base.insert(VoxelKey::ORIGIN);
    }
}
