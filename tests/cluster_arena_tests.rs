//! Cluster Arena Tests
//!
//! Tests for:
//! - Allocation growth and exact-size free-list reuse
//! - Free-range ordering, merging and size accounting under churn
//! - Dirty marking and patch commits into a host-resident buffer
//! - Full re-upload on capacity class changes

use drawstore::renderer::core::{HostBuffer, ResidentBuffer};
use drawstore::renderer::storage::{Cluster, ClusterArena};
use drawstore::resources::BoundingSphere;
use glam::Vec3;

/// Small deterministic generator for churn sequences.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 33) as u32
    }
}

fn live_cluster(i: u32) -> Cluster {
    let mut c = Cluster {
        bucket_id: i,
        command_id: 0,
        first_meshlet: i,
        meshlet_count: 1,
        instance_id: i,
        ..Cluster::RELEASED
    };
    c.set_sphere(BoundingSphere::new(Vec3::splat(i as f32), 1.0));
    c
}

fn assert_free_list_invariants(arena: &ClusterArena, live: u32) {
    let ranges = arena.free_ranges();
    for pair in ranges.windows(2) {
        assert!(pair[0].end < pair[1].start, "ranges overlap or touch: {:?} {:?}", pair[0], pair[1]);
    }
    for r in ranges {
        assert!(r.start < r.end, "empty free range {r:?}");
        assert!(r.end <= arena.len());
    }
    assert_eq!(arena.free_count() + live, arena.len());
}

// ============================================================================
// Allocation & Reuse
// ============================================================================

#[test]
fn first_alloc_grows_from_empty() {
    let mut arena = ClusterArena::new(64);
    assert!(arena.is_empty());

    let id = arena.alloc(4);
    assert_eq!(id, 0);
    assert_eq!(arena.len(), 4);
}

#[test]
fn freed_range_is_reused_without_growth() {
    let mut arena = ClusterArena::new(64);
    let id = arena.alloc(4);
    arena.free(id, 4);

    assert_eq!(arena.alloc(4), 0);
    assert_eq!(arena.len(), 4);
    assert!(arena.free_ranges().is_empty());
}

#[test]
fn larger_run_is_split_when_no_exact_fit() {
    let mut arena = ClusterArena::new(64);
    let a = arena.alloc(8);
    let _b = arena.alloc(2);
    arena.free(a, 8);

    let c = arena.alloc(3);
    assert_eq!(c, 0);
    assert_eq!(arena.free_ranges(), &[3..8]);
    assert_eq!(arena.len(), 10);
}

#[test]
fn exact_fit_is_preferred_over_best_fit() {
    let mut arena = ClusterArena::new(64);
    let a = arena.alloc(5);
    let _keep = arena.alloc(1);
    let b = arena.alloc(3);
    let _keep2 = arena.alloc(1);
    arena.free(a, 5);
    arena.free(b, 3);

    assert_eq!(arena.alloc(3), b);
    assert_eq!(arena.free_ranges(), &[0..5]);
}

#[test]
fn adjacent_frees_merge_on_both_sides() {
    let mut arena = ClusterArena::new(64);
    let a = arena.alloc(2);
    let b = arena.alloc(2);
    let c = arena.alloc(2);
    let _tail = arena.alloc(2);

    arena.free(a, 2);
    arena.free(c, 2);
    assert_eq!(arena.free_ranges(), &[0..2, 4..6]);

    arena.free(b, 2);
    assert_eq!(arena.free_ranges(), &[0..6]);
}

#[test]
fn churn_keeps_free_list_sorted_merged_and_accounted() {
    let mut arena = ClusterArena::new(64);
    let mut rng = Lcg(7);
    let mut live: Vec<(u32, u32)> = Vec::new();

    for _ in 0..2000 {
        if live.is_empty() || rng.next() % 3 != 0 {
            let count = rng.next() % 9 + 1;
            let id = arena.alloc(count);
            live.push((id, count));
        } else {
            let index = rng.next() as usize % live.len();
            let (id, count) = live.swap_remove(index);
            arena.free(id, count);
        }
        let live_total: u32 = live.iter().map(|(_, c)| c).sum();
        assert_free_list_invariants(&arena, live_total);
    }

    // No two live allocations overlap.
    live.sort_unstable();
    for pair in live.windows(2) {
        assert!(pair[0].0 + pair[0].1 <= pair[1].0);
    }
}

// ============================================================================
// Release & Compaction
// ============================================================================

#[test]
fn freed_clusters_fail_culling() {
    let mut arena = ClusterArena::new(64);
    let id = arena.alloc(2);
    arena.set(id, live_cluster(1));
    assert!(arena.get(id).unwrap().is_live());

    arena.free(id, 2);
    assert!(!arena.get(id).unwrap().is_live());
    assert!(arena.get(id).unwrap().radius < 0.0);
}

#[test]
fn shrink_to_fit_releases_trailing_run_only() {
    let mut arena = ClusterArena::new(64);
    let a = arena.alloc(4);
    let b = arena.alloc(4);
    let c = arena.alloc(4);
    arena.free(a, 4);
    arena.free(c, 4);

    arena.shrink_to_fit();
    assert_eq!(arena.len(), 8);
    assert_eq!(arena.free_ranges(), &[0..4]);

    arena.free(b, 4);
    arena.shrink_to_fit();
    assert_eq!(arena.len(), 0);
    assert!(arena.free_ranges().is_empty());
}

// ============================================================================
// Commit
// ============================================================================

#[test]
fn first_commit_is_a_full_upload_padded_to_block() {
    let mut arena = ClusterArena::new(64);
    let id = arena.alloc(4);
    arena.set(id, live_cluster(0));

    let mut gpu = HostBuffer::new("clusters");
    assert!(arena.commit(0, &mut gpu));
    assert_eq!(gpu.size(), 64 * size_of::<Cluster>() as u64);

    let resident: Vec<Cluster> = gpu.read();
    assert_eq!(resident[0], *arena.get(0).unwrap());
    assert!(!resident[63].is_live());
    assert!(!arena.is_dirty(0));
}

#[test]
fn marked_cluster_is_scattered_alone() {
    let mut arena = ClusterArena::new(64);
    let first = arena.alloc(8);
    for i in 0..8 {
        arena.set(first + i, live_cluster(i));
    }
    let mut gpu = HostBuffer::new("clusters");
    assert!(arena.commit(0, &mut gpu));

    arena.mark_clusters(5, 1);
    assert!(arena.is_dirty(5));
    assert!(!arena.is_dirty(4));

    assert!(!arena.commit(1, &mut gpu));
    let (frame, patch) = gpu.last_patch.clone().unwrap();
    assert_eq!(frame, 1);
    assert_eq!(patch.indices, vec![5]);
    assert_eq!(patch.payload, bytemuck::bytes_of(arena.get(5).unwrap()));
    assert!(!arena.is_dirty(5));
}

#[test]
fn patch_round_trip_matches_cpu_array() {
    let mut arena = ClusterArena::new(64);
    let first = arena.alloc(20);
    let mut gpu = HostBuffer::new("clusters");
    arena.commit(0, &mut gpu);

    for i in [1, 2, 3, 9, 17] {
        arena.set(first + i, live_cluster(i * 10));
    }
    arena.free(first + 12, 2);

    assert!(!arena.commit(1, &mut gpu));
    assert_eq!(gpu.reallocations, 1);

    let resident: Vec<Cluster> = gpu.read();
    assert_eq!(&resident[..arena.len() as usize], arena.clusters());
    assert!((0..arena.len()).all(|i| !arena.is_dirty(i)));
}

#[test]
fn crossing_capacity_class_reallocates() {
    let mut arena = ClusterArena::new(64);
    arena.alloc(60);
    let mut gpu = HostBuffer::new("clusters");
    assert!(arena.commit(0, &mut gpu));

    arena.alloc(10);
    assert_eq!(arena.capacity_class(), 128);
    assert!(arena.commit(1, &mut gpu));
    assert_eq!(gpu.size(), 128 * size_of::<Cluster>() as u64);
    assert_eq!(gpu.reallocations, 2);
}

#[test]
fn concurrent_marks_are_all_observed() {
    let mut arena = ClusterArena::new(64);
    arena.alloc(256);
    let mut gpu = HostBuffer::new("clusters");
    arena.commit(0, &mut gpu);

    std::thread::scope(|scope| {
        for t in 0..4u32 {
            let arena = &arena;
            scope.spawn(move || {
                for i in (t..256).step_by(4) {
                    arena.mark_clusters(i, 1);
                }
            });
        }
    });

    arena.commit(1, &mut gpu);
    let (_, patch) = gpu.last_patch.clone().unwrap();
    assert_eq!(patch.indices, (0..256).collect::<Vec<_>>());
}
