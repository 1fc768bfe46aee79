//! Support-bridge synthesis for disconnected models.
//!
//! Works entirely on the sub grid: the base model is expanded to its 2x2x2
//! sub-cell footprint, and proposed connector cells are half-edge support
//! cubes. The search is greedy per component; the result is reproducible but
//! not guaranteed globally minimal.

use crate::connectivity::components;
use crate::grid::{expand_to_sub_grid, GridCell, SubVoxelKey, VoxelKey};
use std::collections::{HashMap, HashSet, VecDeque};

/// Default bounding-region inflation, in base-grid cells.
pub const DEFAULT_MARGIN_BASE_CELLS: i32 = 2;

/// Result of a bridge synthesis pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BridgeOutcome {
    /// Proposed new support cells. Adding these to the model's sub-grid
    /// footprint merges every reachable component into the main body.
    pub supports: HashSet<SubVoxelKey>,
    /// Sizes (in sub cells) of components no path could reach within the
    /// bounded search region. Non-empty means the caller must retry with a
    /// larger margin or flag the model as unrepairable.
    pub unbridged: Vec<usize>,
}

impl BridgeOutcome {
    pub fn is_print_ready(&self) -> bool {
        self.unbridged.is_empty()
    }
}

/// Inclusive sub-grid search region: model extents plus margin.
#[derive(Clone, Copy, Debug)]
struct SearchRegion {
    min: [i32; 3],
    max: [i32; 3],
}

impl SearchRegion {
    fn from_base(base: &HashSet<VoxelKey>, margin_base_cells: i32) -> Self {
        let mut min = [i32::MAX; 3];
        let mut max = [i32::MIN; 3];
        for key in base {
            let cell = [key.x, key.y, key.z];
            for axis in 0..3 {
                min[axis] = min[axis].min(cell[axis]);
                max[axis] = max[axis].max(cell[axis]);
            }
        }
        let margin_sub = margin_base_cells.max(0) * 2;
        // Base cell c occupies sub indices 2c-1 ..= 2c.
        for axis in 0..3 {
            min[axis] = 2 * min[axis] - 1 - margin_sub;
            max[axis] = 2 * max[axis] + margin_sub;
        }
        Self { min, max }
    }

    fn contains(&self, cell: SubVoxelKey) -> bool {
        cell.x >= self.min[0]
            && cell.x <= self.max[0]
            && cell.y >= self.min[1]
            && cell.y <= self.max[1]
            && cell.z >= self.min[2]
            && cell.z <= self.max[2]
    }
}

/// Propose support cells that merge every disconnected component of `base`
/// into its largest component.
///
/// Components are processed largest-first (the deterministic order produced
/// by the connectivity analyzer); each is attached to the connected body by
/// a multi-source BFS through free sub cells inside the bounded region, and
/// then folds into the body so later components may bridge through it.
pub fn synthesize_bridges(base: &HashSet<VoxelKey>, margin_base_cells: i32) -> BridgeOutcome {
    let full = expand_to_sub_grid(base);
    let comps = components(&full);
    if comps.len() <= 1 {
        return BridgeOutcome::default();
    }

    let region = SearchRegion::from_base(base, margin_base_cells);

    // Connected: the main body plus everything bridged so far.
    // Occupied: every model cell plus accepted path cells; never traversable.
    let mut connected: HashSet<SubVoxelKey> = comps[0].iter().copied().collect();
    let mut occupied = full;
    let mut outcome = BridgeOutcome::default();

    for comp in &comps[1..] {
        match bridge_one(comp, &connected, &occupied, &region) {
            Some(path) => {
                for &cell in &path {
                    outcome.supports.insert(cell);
                    occupied.insert(cell);
                    connected.insert(cell);
                }
                connected.extend(comp.iter().copied());
            }
            None => outcome.unbridged.push(comp.len()),
        }
    }

    outcome
}

/// Multi-source BFS from every cell of `comp` through free cells until a
/// frontier cell touches the connected set. Returns the connector path
/// (free cells only), or `None` when the region is exhausted.
fn bridge_one(
    comp: &[SubVoxelKey],
    connected: &HashSet<SubVoxelKey>,
    occupied: &HashSet<SubVoxelKey>,
    region: &SearchRegion,
) -> Option<Vec<SubVoxelKey>> {
    let comp_cells: HashSet<SubVoxelKey> = comp.iter().copied().collect();
    let mut visited = comp_cells.clone();
    let mut parent: HashMap<SubVoxelKey, SubVoxelKey> = HashMap::new();
    let mut queue: VecDeque<SubVoxelKey> = comp.iter().copied().collect();

    while let Some(cell) = queue.pop_front() {
        for next in cell.face_neighbors() {
            if !region.contains(next) || occupied.contains(&next) || !visited.insert(next) {
                continue;
            }
            parent.insert(next, cell);
            if touches(next, connected) {
                return Some(walk_back(next, &parent, &comp_cells));
            }
            queue.push_back(next);
        }
    }
    None
}

fn touches(cell: SubVoxelKey, connected: &HashSet<SubVoxelKey>) -> bool {
    cell.face_neighbors().iter().any(|n| connected.contains(n))
}

fn walk_back(
    goal: SubVoxelKey,
    parent: &HashMap<SubVoxelKey, SubVoxelKey>,
    comp_cells: &HashSet<SubVoxelKey>,
) -> Vec<SubVoxelKey> {
    let mut path = Vec::new();
    let mut cur = goal;
    loop {
        path.push(cur);
        match parent.get(&cur) {
            Some(&prev) if !comp_cells.contains(&prev) => cur = prev,
            _ => break,
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::component_count;

    fn base_of(keys: &[(i32, i32, i32)]) -> HashSet<VoxelKey> {
        keys.iter().map(|&(x, y, z)| VoxelKey::new(x, y, z)).collect()
    }

    fn mixed(base: &HashSet<VoxelKey>, supports: &HashSet<SubVoxelKey>) -> HashSet<SubVoxelKey> {
        let mut all = expand_to_sub_grid(base);
        all.extend(supports.iter().copied());
        all
    }

    #[test]
    fn connected_model_needs_no_bridges() {
        let base = base_of(&[(0, 0, 0), (0, 0, 1), (0, 1, 1)]);
        let outcome = synthesize_bridges(&base, DEFAULT_MARGIN_BASE_CELLS);
        assert!(outcome.supports.is_empty());
        assert!(outcome.is_print_ready());
    }

    #[test]
    fn two_cubes_and_an_island_become_one_component() {
        // Two face-adjacent cubes plus an isolated cube at (5,0,0).
        let base = base_of(&[(0, 0, 0), (0, 0, 1), (5, 0, 0)]);
        assert_eq!(component_count(&expand_to_sub_grid(&base)), 2);

        let outcome = synthesize_bridges(&base, DEFAULT_MARGIN_BASE_CELLS);
        assert!(outcome.is_print_ready());
        assert!(!outcome.supports.is_empty());
        assert_eq!(component_count(&mixed(&base, &outcome.supports)), 1);
    }

    #[test]
    fn bridge_path_never_enters_occupied_cells() {
        let base = base_of(&[(0, 0, 0), (3, 0, 0)]);
        let outcome = synthesize_bridges(&base, DEFAULT_MARGIN_BASE_CELLS);
        assert!(outcome.is_print_ready());
        let model = expand_to_sub_grid(&base);
        for cell in &outcome.supports {
            assert!(!model.contains(cell));
        }
    }

    #[test]
    fn straight_gap_uses_a_minimal_path() {
        // Gap of one base cell: sub cells 1..=2 sit between the footprints,
        // so the shortest connector is exactly 2 sub cells.
        let base = base_of(&[(0, 0, 0), (2, 0, 0)]);
        let outcome = synthesize_bridges(&base, DEFAULT_MARGIN_BASE_CELLS);
        assert!(outcome.is_print_ready());
        assert_eq!(outcome.supports.len(), 2);
    }

    #[test]
    fn three_islands_all_merge() {
        let base = base_of(&[(0, 0, 0), (4, 0, 0), (0, 4, 0)]);
        let outcome = synthesize_bridges(&base, DEFAULT_MARGIN_BASE_CELLS);
        assert!(outcome.is_print_ready());
        assert_eq!(component_count(&mixed(&base, &outcome.supports)), 1);
    }

    #[test]
    fn exhausted_region_returns_no_path() {
        // Region boxed tightly around the island: the BFS runs out of free
        // cells before touching the connected set and must report failure
        // instead of searching the unbounded lattice.
        let connected: HashSet<SubVoxelKey> = [SubVoxelKey::new(0, 0, 0)].into_iter().collect();
        let comp = vec![SubVoxelKey::new(10, 0, 0)];
        let occupied: HashSet<SubVoxelKey> = connected
            .iter()
            .copied()
            .chain(comp.iter().copied())
            .collect();
        let region = SearchRegion {
            min: [9, -1, -1],
            max: [11, 1, 1],
        };
        assert_eq!(bridge_one(&comp, &connected, &occupied, &region), None);
    }

    #[test]
    fn results_are_reproducible() {
        let base = base_of(&[(0, 0, 0), (5, 0, 0), (0, 5, 0), (0, 0, 5)]);
        let a = synthesize_bridges(&base, DEFAULT_MARGIN_BASE_CELLS);
        let b = synthesize_bridges(&base, DEFAULT_MARGIN_BASE_CELLS);
        assert_eq!(a, b);
    }
}
