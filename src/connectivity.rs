use crate::grid::GridCell;
use std::collections::{HashSet, VecDeque};

/// Split an occupancy set into its maximal 6-connected components.
///
/// Components are returned largest-first. The scan is seeded from cells in
/// canonical (x, y, z) order, so both component membership and tie order are
/// stable across runs and independent of hash iteration order.
pub fn components<C: GridCell>(occupancy: &HashSet<C>) -> Vec<Vec<C>> {
    let mut seeds: Vec<C> = occupancy.iter().copied().collect();
    seeds.sort_unstable();

    let mut visited: HashSet<C> = HashSet::with_capacity(occupancy.len());
    let mut out: Vec<Vec<C>> = Vec::new();

    for seed in seeds {
        if visited.contains(&seed) {
            continue;
        }
        let mut component = Vec::new();
        let mut queue = VecDeque::new();
        visited.insert(seed);
        queue.push_back(seed);
        while let Some(cell) = queue.pop_front() {
            component.push(cell);
            for neighbor in cell.face_neighbors() {
                if occupancy.contains(&neighbor) && visited.insert(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        out.push(component);
    }

    // Largest first; equal sizes keep discovery order (stable sort).
    out.sort_by(|a, b| b.len().cmp(&a.len()));
    out
}

pub fn component_count<C: GridCell>(occupancy: &HashSet<C>) -> usize {
    components(occupancy).len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::VoxelKey;

    fn set_of(keys: &[(i32, i32, i32)]) -> HashSet<VoxelKey> {
        keys.iter().map(|&(x, y, z)| VoxelKey::new(x, y, z)).collect()
    }

    #[test]
    fn empty_set_has_no_components() {
        assert!(components(&HashSet::<VoxelKey>::new()).is_empty());
    }

    #[test]
    fn single_cell_is_one_component() {
        let comps = components(&set_of(&[(7, -2, 0)]));
        assert_eq!(comps.len(), 1);
        assert_eq!(comps[0], vec![VoxelKey::new(7, -2, 0)]);
    }

    #[test]
    fn face_adjacency_merges_diagonals_do_not() {
        // (0,0,0)-(0,0,1) share a face; (1,1,1) only touches corners.
        let comps = components(&set_of(&[(0, 0, 0), (0, 0, 1), (1, 1, 1)]));
        assert_eq!(comps.len(), 2);
        assert_eq!(comps[0].len(), 2);
        assert_eq!(comps[1].len(), 1);
    }

    #[test]
    fn components_sorted_largest_first() {
        let comps = components(&set_of(&[
            (0, 0, 0),
            (10, 0, 0),
            (10, 1, 0),
            (10, 2, 0),
            (20, 0, 0),
            (20, 0, 1),
        ]));
        let sizes: Vec<usize> = comps.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 2, 1]);
    }

    #[test]
    fn result_is_independent_of_insertion_order() {
        let keys = [
            (0, 0, 0),
            (1, 0, 0),
            (2, 0, 0),
            (5, 5, 5),
            (5, 5, 6),
            (-3, 0, 9),
        ];
        let forward: HashSet<VoxelKey> =
            keys.iter().map(|&(x, y, z)| VoxelKey::new(x, y, z)).collect();
        let reverse: HashSet<VoxelKey> = keys
            .iter()
            .rev()
            .map(|&(x, y, z)| VoxelKey::new(x, y, z))
            .collect();

        let a = components(&forward);
        let b = components(&reverse);
        assert_eq!(a, b);
        // Stable across repeated calls as well.
        assert_eq!(a, components(&forward));
    }

    #[test]
    fn long_line_is_one_component() {
        let line: HashSet<VoxelKey> = (0..500).map(|x| VoxelKey::new(x, 0, 0)).collect();
        assert_eq!(component_count(&line), 1);
    }
}
