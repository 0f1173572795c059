use std::collections::HashMap;

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;

fn small_tree(max_elements: usize) -> Octree<u32> {
    let config = OctreeConfig::default()
        .with_bounds(Aabb::cube(8.0))
        .with_max_elements_per_leaf(max_elements);
    Octree::new(config).unwrap()
}

fn root_of(tree: &Octree<u32>) -> &Octant<u32> {
    tree.octant(tree.root()).unwrap()
}

fn assert_close(actual: Vec3, expected: Vec3, tolerance: f32) {
    assert!(
        actual.distance(expected) <= tolerance,
        "expected {expected}, got {actual}"
    );
}

// -------------------------------------------------------------------------
// Construction
// -------------------------------------------------------------------------

#[test]
fn test_new_tree_is_single_empty_leaf() {
    let tree = small_tree(4);
    let root = root_of(&tree);
    assert!(root.is_leaf());
    assert_eq!(root.count(), 0);
    assert_eq!(root.weight(), 0.0);
    assert_eq!(root.centroid(), Vec3::ZERO);
    assert!(tree.is_empty());
    assert_eq!(
        tree.stats(),
        OctreeStats {
            octants: 1,
            leaves: 1,
            pooled: 0,
            max_depth: 0,
            elements: 0,
        }
    );
    tree.validate().unwrap();
}

#[test]
fn test_rejects_degenerate_configuration() {
    let flat = OctreeConfig::default().with_bounds(Aabb::new(Vec3::ZERO, Vec3::new(1.0, 1.0, 0.0)));
    assert!(matches!(
        Octree::<u32>::new(flat),
        Err(LayoutError::InvalidConfig(_))
    ));

    let no_capacity = OctreeConfig::default().with_max_elements_per_leaf(0);
    assert!(matches!(
        Octree::<u32>::new(no_capacity),
        Err(LayoutError::InvalidConfig(_))
    ));
}

// -------------------------------------------------------------------------
// Insert
// -------------------------------------------------------------------------

#[test]
fn test_insert_updates_weighted_aggregate() {
    let mut tree = small_tree(4);
    tree.insert(1, Vec3::new(2.0, 0.0, 0.0), 1.0).unwrap();
    tree.insert(2, Vec3::new(-2.0, 4.0, 0.0), 3.0).unwrap();

    let root = root_of(&tree);
    assert_eq!(root.count(), 2);
    assert_eq!(root.weight(), 4.0);
    assert_close(root.centroid(), Vec3::new(-1.0, 3.0, 0.0), 1e-6);
    assert_eq!(tree.element(&2).unwrap().weight, 3.0);
    tree.validate().unwrap();
}

#[test]
fn test_overflowing_leaf_splits_at_median() {
    let mut tree = small_tree(2);
    tree.insert(0, Vec3::new(-4.0, -4.0, -4.0), 1.0).unwrap();
    tree.insert(1, Vec3::new(4.0, 4.0, 4.0), 1.0).unwrap();
    assert!(root_of(&tree).is_leaf(), "two elements fit in one leaf");

    tree.insert(2, Vec3::new(6.0, 4.0, 4.0), 2.0).unwrap();

    let root = root_of(&tree);
    assert!(!root.is_leaf());
    assert_eq!(root.split(), Vec3::new(4.0, 4.0, 4.0));
    assert!(root.elements().is_empty());
    assert_eq!(root.child_count(), 2);
    assert_eq!(tree.find(&1), tree.find(&2));
    assert_ne!(tree.find(&0), tree.find(&1));

    insta::assert_snapshot!(tree.to_string(), @r"
    root internal depth=0 count=3 weight=4
      [0] leaf depth=1 count=1 weight=1
      [7] leaf depth=1 count=2 weight=3
    ");
    tree.validate().unwrap();
}

#[test]
fn test_split_falls_back_to_midpoint_on_boundary_median() {
    let mut tree = small_tree(2);
    for (key, y) in [(0, 1.0), (1, 2.0), (2, 3.0)] {
        tree.insert(key, Vec3::new(8.0, y, y), 1.0).unwrap();
    }

    // x median sits on the max face, so x splits at the box center instead
    assert_eq!(root_of(&tree).split(), Vec3::new(0.0, 2.0, 2.0));
    tree.validate().unwrap();
}

#[test]
fn test_coincident_points_stop_splitting_at_max_depth() {
    let config = OctreeConfig::default()
        .with_bounds(Aabb::cube(8.0))
        .with_max_elements_per_leaf(2)
        .with_max_depth(4);
    let mut tree = Octree::new(config).unwrap();
    for key in 0..12_u32 {
        tree.insert(key, Vec3::new(1.0, 1.0, 1.0), 1.0).unwrap();
    }

    let leaf = tree.octant(tree.find(&0).unwrap()).unwrap();
    assert_eq!(leaf.depth(), 4);
    assert_eq!(leaf.elements().len(), 12);
    assert_eq!(tree.stats().max_depth, 4);
    tree.validate().unwrap();
}

#[test]
fn test_duplicate_key_is_rejected() {
    let mut tree = small_tree(4);
    tree.insert(7, Vec3::ZERO, 1.0).unwrap();
    let err = tree.insert(7, Vec3::ONE, 1.0).unwrap_err();
    assert_eq!(err, LayoutError::DuplicateElement("7".to_string()));
    assert_eq!(tree.len(), 1);
}

#[test]
fn test_non_positive_weights_are_rejected() {
    let mut tree = small_tree(4);
    for weight in [0.0, -1.0, f32::NAN, f32::INFINITY] {
        assert!(matches!(
            tree.insert(1, Vec3::ZERO, weight),
            Err(LayoutError::InvalidWeight(_))
        ));
    }
    assert!(tree.is_empty());
}

#[test]
fn test_out_of_bounds_rejected_by_default() {
    let mut tree = small_tree(4);
    let err = tree.insert(1, Vec3::new(20.0, 0.0, 0.0), 1.0).unwrap_err();
    assert!(matches!(err, LayoutError::OutOfBounds { .. }));
    assert!(tree.is_empty());
    tree.validate().unwrap();
}

#[test]
fn test_clamp_policy_indexes_nearest_point() {
    let config = OctreeConfig::default()
        .with_bounds(Aabb::cube(8.0))
        .with_bounds_policy(BoundsPolicy::Clamp);
    let mut tree = Octree::new(config).unwrap();
    tree.insert(1_u32, Vec3::new(20.0, -3.0, 0.0), 1.0).unwrap();

    assert_eq!(tree.element(&1).unwrap().position, Vec3::new(8.0, -3.0, 0.0));
    tree.validate().unwrap();
}

#[test]
fn test_non_finite_position_is_rejected_even_when_clamping() {
    let config = OctreeConfig::default().with_bounds_policy(BoundsPolicy::Clamp);
    let mut tree = Octree::new(config).unwrap();
    let err = tree
        .insert(1_u32, Vec3::new(f32::NAN, 0.0, 0.0), 1.0)
        .unwrap_err();
    assert!(matches!(err, LayoutError::OutOfBounds { .. }));
}

// -------------------------------------------------------------------------
// Remove
// -------------------------------------------------------------------------

#[test]
fn test_removing_unknown_key_reports_not_found() {
    let mut tree = small_tree(4);
    tree.insert(1, Vec3::ZERO, 1.0).unwrap();
    assert_eq!(
        tree.remove(&2).unwrap_err(),
        LayoutError::ElementNotFound("2".to_string())
    );
    assert_eq!(tree.len(), 1);
}

#[test]
fn test_insert_then_remove_restores_aggregates() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut tree = small_tree(3);
    for key in 0..40_u32 {
        let position = Vec3::new(
            rng.random_range(-8.0..8.0),
            rng.random_range(-8.0..8.0),
            rng.random_range(-8.0..8.0),
        );
        tree.insert(key, position, rng.random_range(0.5..2.0)).unwrap();
    }
    let before = root_of(&tree).aggregate();
    let count = root_of(&tree).count();

    tree.insert(99, Vec3::new(7.5, -7.5, 3.0), 5.0).unwrap();
    assert_eq!(root_of(&tree).count(), count + 1);
    let removed = tree.remove(&99).unwrap();
    assert_eq!(removed.weight, 5.0);

    let after = root_of(&tree).aggregate();
    assert_eq!(root_of(&tree).count(), count);
    assert!((after.weight - before.weight).abs() < 1e-4);
    assert_close(after.position, before.position, 1e-4);
    tree.validate().unwrap();
}

#[test]
fn test_emptied_tree_resets_root_and_pools_octants() {
    let mut tree = small_tree(2);
    let points = [
        Vec3::new(-4.0, -4.0, -4.0),
        Vec3::new(4.0, 4.0, 4.0),
        Vec3::new(6.0, 4.0, 4.0),
        Vec3::new(-6.0, 5.0, 1.0),
    ];
    for (key, position) in points.iter().enumerate() {
        tree.insert(key as u32, *position, 1.0).unwrap();
    }
    let attached = tree.stats().octants;
    assert!(attached > 1);
    let capacity = tree.arena.capacity();

    for key in 0..points.len() as u32 {
        tree.remove(&key).unwrap();
        tree.validate().unwrap();
    }

    let root = root_of(&tree);
    assert!(root.is_leaf());
    assert_eq!(root.child_count(), 0);
    assert_eq!(root.split(), Vec3::ZERO);
    assert_eq!(tree.stats().octants, 1);
    assert_eq!(tree.stats().pooled, attached - 1);

    // Rebuilding the same shape draws from the pool rather than growing
    for (key, position) in points.iter().enumerate() {
        tree.insert(key as u32, *position, 1.0).unwrap();
    }
    assert_eq!(tree.arena.capacity(), capacity);
    tree.validate().unwrap();
}

#[test]
fn test_random_churn_keeps_invariants() {
    let config = OctreeConfig::default()
        .with_bounds(Aabb::cube(100.0))
        .with_max_elements_per_leaf(4)
        .with_max_depth(6);
    let mut tree = Octree::new(config).unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    let mut live = Vec::new();

    for key in 0..400_u32 {
        if !live.is_empty() && rng.random_bool(0.35) {
            let index = rng.random_range(0..live.len());
            let victim: u32 = live.swap_remove(index);
            tree.remove(&victim).unwrap();
        } else {
            let position = Vec3::new(
                rng.random_range(-100.0..100.0),
                rng.random_range(-100.0..100.0),
                rng.random_range(-100.0..100.0),
            );
            tree.insert(key, position, rng.random_range(0.1..4.0)).unwrap();
            live.push(key);
        }
        tree.validate()
            .unwrap_or_else(|err| panic!("after operation {key}: {err}"));
    }

    assert_eq!(tree.len(), live.len());
    for key in &live {
        assert!(tree.contains(key));
    }
}

// -------------------------------------------------------------------------
// Reconcile
// -------------------------------------------------------------------------

#[test]
fn test_reconcile_moves_elements_that_left_their_leaf() {
    let mut tree = small_tree(2);
    let mut positions: HashMap<u32, Vec3> = HashMap::from([
        (0, Vec3::new(-4.0, -4.0, -4.0)),
        (1, Vec3::new(4.0, 4.0, 4.0)),
        (2, Vec3::new(6.0, 4.0, 4.0)),
        (3, Vec3::new(-5.0, -5.0, -5.0)),
    ]);
    for (key, position) in &positions {
        tree.insert(*key, *position, 1.0).unwrap();
    }
    let before = tree.find(&3);

    positions.insert(3, Vec3::new(7.0, 7.0, 7.0));
    let moved = tree
        .reconcile_positions(tree.root(), true, |key| {
            positions.get(key).map(|p| PointMass::new(*p, 1.0))
        })
        .unwrap();

    assert_eq!(moved, 1);
    assert_ne!(tree.find(&3), before);
    assert_eq!(tree.element(&3).unwrap().position, Vec3::new(7.0, 7.0, 7.0));
    let expected = positions.values().copied().sum::<Vec3>() / 4.0;
    assert_close(root_of(&tree).centroid(), expected, 1e-5);
    tree.validate().unwrap();
}

#[test]
fn test_reconcile_refreshes_weights_in_place() {
    let mut tree = small_tree(4);
    tree.insert(1, Vec3::new(1.0, 0.0, 0.0), 1.0).unwrap();
    tree.insert(2, Vec3::new(-1.0, 0.0, 0.0), 1.0).unwrap();

    let moved = tree
        .reconcile_positions(tree.root(), false, |key| {
            let weight = if *key == 1 { 3.0 } else { 1.0 };
            let x = if *key == 1 { 1.0 } else { -1.0 };
            Some(PointMass::new(Vec3::new(x, 0.0, 0.0), weight))
        })
        .unwrap();

    assert_eq!(moved, 0);
    assert_eq!(root_of(&tree).weight(), 4.0);
    assert_close(root_of(&tree).centroid(), Vec3::new(0.5, 0.0, 0.0), 1e-6);
}

#[test]
fn test_non_recursive_reconcile_of_internal_octant_touches_nothing() {
    let mut tree = small_tree(1);
    tree.insert(1, Vec3::new(1.0, 1.0, 1.0), 1.0).unwrap();
    tree.insert(2, Vec3::new(-1.0, -1.0, -1.0), 1.0).unwrap();
    assert!(!root_of(&tree).is_leaf());

    let moved = tree
        .reconcile_positions(tree.root(), false, |_| None)
        .unwrap();
    assert_eq!(moved, 0);
}

#[test]
fn test_reconcile_reports_missing_source_positions() {
    let mut tree = small_tree(4);
    tree.insert(1, Vec3::ZERO, 1.0).unwrap();
    let err = tree
        .reconcile_positions(tree.root(), true, |_| None)
        .unwrap_err();
    assert_eq!(err, LayoutError::ElementNotFound("1".to_string()));
}

#[test]
fn test_reconcile_failure_leaves_stored_positions_untouched() {
    let mut tree = small_tree(4);
    tree.insert(1, Vec3::new(1.0, 1.0, 1.0), 1.0).unwrap();
    tree.insert(2, Vec3::new(-1.0, -1.0, -1.0), 2.0).unwrap();
    let before = root_of(&tree).aggregate();

    // Key 1 is read first and moves to a valid spot; key 2 leaves the box
    let err = tree
        .reconcile_positions(tree.root(), true, |key| match key {
            1 => Some(PointMass::new(Vec3::new(-7.0, 7.0, 0.0), 5.0)),
            _ => Some(PointMass::new(Vec3::new(50.0, 0.0, 0.0), 1.0)),
        })
        .unwrap_err();
    assert!(matches!(err, LayoutError::OutOfBounds { .. }));

    let first = tree.element(&1).unwrap();
    assert_eq!(first.position, Vec3::new(1.0, 1.0, 1.0));
    assert_eq!(first.weight, 1.0);
    assert_eq!(root_of(&tree).aggregate(), before);
    tree.validate().unwrap();

    let err = tree
        .reconcile_positions(tree.root(), true, |key| {
            (*key == 1).then(|| PointMass::new(Vec3::new(3.0, 3.0, 3.0), 1.0))
        })
        .unwrap_err();
    assert_eq!(err, LayoutError::ElementNotFound("2".to_string()));
    assert_eq!(tree.element(&1).unwrap().position, Vec3::new(1.0, 1.0, 1.0));
}

#[test]
fn test_reconcile_splits_leaves_after_limits_shrink() {
    let mut tree = small_tree(10);
    let mut rng = StdRng::seed_from_u64(5);
    let mut positions = HashMap::new();
    for key in 0..10_u32 {
        let position = Vec3::new(
            rng.random_range(-8.0..8.0),
            rng.random_range(-8.0..8.0),
            rng.random_range(-8.0..8.0),
        );
        positions.insert(key, position);
        tree.insert(key, position, 1.0).unwrap();
    }
    assert!(root_of(&tree).is_leaf());

    tree.set_limits(DEFAULT_MAX_DEPTH, 2).unwrap();
    tree.reconcile_positions(tree.root(), true, |key| {
        positions.get(key).map(|p| PointMass::new(*p, 1.0))
    })
    .unwrap();

    assert!(!root_of(&tree).is_leaf());
    assert_eq!(root_of(&tree).count(), 10);
    tree.validate().unwrap();
}

// -------------------------------------------------------------------------
// Queries
// -------------------------------------------------------------------------

#[test]
fn test_acceptance_uses_diagonal_over_distance() {
    let mut tree = small_tree(4);
    tree.insert(1, Vec3::ZERO, 1.0).unwrap();
    let root = tree.root();

    // Inside the box: never approximated
    assert!(!tree.accepts(root, Vec3::new(1.0, 2.0, 3.0), 10.0));

    let far = Vec3::new(1000.0, 0.0, 0.0);
    assert_eq!(tree.closest_boundary_distance_squared(root, far), 992.0 * 992.0);
    assert!(tree.accepts(root, far, 0.5));
    assert!(!tree.accepts(root, far, 0.0), "theta 0 is always exact");

    // Diagonal is sqrt(3) * 16 ~ 27.7; at distance 40 theta 0.5 is too coarse
    let near = Vec3::new(48.0, 0.0, 0.0);
    assert!(!tree.accepts(root, near, 0.5));
    assert!(tree.accepts(root, near, 1.0));
}

#[test]
fn test_children_and_depth_summaries() {
    let mut tree = small_tree(2);
    tree.insert(0, Vec3::new(-4.0, -4.0, -4.0), 1.0).unwrap();
    tree.insert(1, Vec3::new(4.0, 4.0, 4.0), 1.0).unwrap();
    tree.insert(2, Vec3::new(6.0, 4.0, 4.0), 2.0).unwrap();

    let children: Vec<OctantId> = tree.children(tree.root()).collect();
    assert_eq!(children.len(), root_of(&tree).child_count());
    assert_eq!(root_of(&tree).child(0), Some(children[0]));
    assert_eq!(root_of(&tree).child(7), Some(children[1]));
    assert_eq!(root_of(&tree).child(8), None);

    assert_eq!(tree.octants(), vec![tree.root(), children[0], children[1]]);
    assert!((tree.average_depth(false) - 2.0 / 3.0).abs() < 1e-6);
    assert_eq!(tree.average_depth(true), 1.0);
}

#[test]
fn test_attaching_under_a_leaf_is_a_topology_error() {
    let mut tree = small_tree(4);
    tree.insert(1, Vec3::ZERO, 1.0).unwrap();
    let root = tree.root();

    assert!(matches!(
        tree.child_for(root, Vec3::ONE),
        Err(LayoutError::InvalidTopology(_))
    ));

    tree.split(root).unwrap();
    assert!(matches!(
        tree.split(root),
        Err(LayoutError::InvalidTopology(_))
    ));
    tree.validate().unwrap();
}
