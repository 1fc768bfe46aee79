use crate::grid::{SubVoxelKey, VoxelKey};
use std::collections::HashSet;

/// World-space axis-aligned extents over a mixed base + support occupancy pair.
///
/// Always recomputed on demand; consumers must not cache it across mutations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MixedBounds {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl MixedBounds {
    /// Compute extents over both occupancy sets. An empty pair yields the
    /// degenerate unit box centered at the origin, never infinities.
    pub fn compute(base: &HashSet<VoxelKey>, support: &HashSet<SubVoxelKey>) -> Self {
        if base.is_empty() && support.is_empty() {
            return Self {
                min: [-0.5; 3],
                max: [0.5; 3],
            };
        }

        let mut min = [f64::MAX; 3];
        let mut max = [f64::MIN; 3];
        let mut fold = |lo: [f64; 3], hi: [f64; 3]| {
            for axis in 0..3 {
                min[axis] = min[axis].min(lo[axis]);
                max[axis] = max[axis].max(hi[axis]);
            }
        };
        for key in base {
            fold(key.world_min(), key.world_max());
        }
        for key in support {
            fold(key.world_min(), key.world_max());
        }
        Self { min, max }
    }

    pub fn center(&self) -> [f64; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    pub fn size(&self) -> [f64; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// Longest edge of the box in world units.
    pub fn max_dim(&self) -> f64 {
        let size = self.size();
        size[0].max(size[1]).max(size[2])
    }
}
