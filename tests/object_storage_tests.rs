//! Object Storage Tests
//!
//! Tests for:
//! - Object registration: clusters, buckets, commands and instance records
//! - Item release (explicit and on drop) and object-table compaction
//! - Mutators: transform, fatness, wind, morph layers, ghosting, skeletons
//! - Animation ticking
//! - Acceleration-structure bookkeeping on ray-query devices
//! - End-to-end commits into host-resident buffers

use std::sync::Arc;

use glam::{Mat4, Vec3};
use slotmap::SlotMap;

use drawstore::renderer::DrawStorage;
use drawstore::renderer::core::{HostBackend, WorkerPool};
use drawstore::renderer::storage::{
    BINDLESS_BUCKET, Cluster, InstanceGpu, Item, ObjectStorage, PipelineId, PipelineSource,
};
use drawstore::resources::{AlphaMode, BoundingBox, BoundingSphere, Material, MeshDesc, MeshRef, MorphAnim, WindMode};
use drawstore::scene::{CameraView, GpuBufferKey, MeshKey, ObjectKind, TextureKey};
use drawstore::settings::{DeviceCaps, StorageSettings};

const EPSILON: f32 = 1e-4;

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

fn approx_vec(a: Vec3, b: Vec3) -> bool {
    (a - b).length() < EPSILON
}

/// Opaque materials draw everywhere, see-through ones only in the main view,
/// additive ones nowhere.
struct TestPipelines;

impl PipelineSource for TestPipelines {
    fn pipeline(&self, material: &Material, kind: ObjectKind, view: CameraView, _bindless: bool) -> Option<PipelineId> {
        match material.alpha {
            AlphaMode::Solid | AlphaMode::AlphaTest => Some(PipelineId(kind as u32 * 4 + view.index() as u32)),
            AlphaMode::Ghost | AlphaMode::Transparent => (view == CameraView::Main).then_some(PipelineId(100 + kind as u32)),
            _ => None,
        }
    }
}

struct Fixture {
    meshes: SlotMap<MeshKey, ()>,
}

impl Fixture {
    fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self { meshes: SlotMap::with_key() }
    }

    /// Unit cube mesh with `meshlets` meshlets of 192 indices each.
    fn mesh(&mut self, meshlets: u32, skinned: bool) -> Arc<MeshDesc> {
        let key = self.meshes.insert(());
        let mesh = if skinned { MeshRef::Skinned(key) } else { MeshRef::Static(key) };
        let mut desc = MeshDesc::new(
            mesh,
            GpuBufferKey::default(),
            GpuBufferKey::default(),
            BoundingBox::new(Vec3::splat(-1.0), Vec3::ONE),
        );
        desc.meshlet_bounds = (0..meshlets)
            .map(|i| BoundingSphere::new(Vec3::new(i as f32 - 0.5, 0.0, 0.0), 0.5))
            .collect();
        Arc::new(desc)
    }
}

fn storage_with(settings: &StorageSettings, caps: DeviceCaps) -> ObjectStorage {
    ObjectStorage::new(settings, caps, Arc::new(TestPipelines), TextureKey::default())
}

fn storage() -> ObjectStorage {
    storage_with(&StorageSettings::default(), DeviceCaps::default())
}

fn first_cluster(objects: &ObjectStorage, item: &Item) -> Cluster {
    let range = objects.record(item).unwrap().cluster_range();
    *objects.clusters().get(range.start).unwrap()
}

fn instance(objects: &ObjectStorage, item: &Item) -> InstanceGpu {
    let block = objects.record(item).unwrap().instance_block().unwrap();
    objects.instances().read(&block)
}

fn morph(anim_id: u32, duration_ms: u64) -> MorphAnim {
    MorphAnim {
        anim_id,
        first_sample: 0,
        sample_count: 10,
        fps: 30.0,
        intensity: 1.0,
        duration_ms,
    }
}

// ============================================================================
// Registration
// ============================================================================

#[test]
fn alloc_registers_clusters_bucket_and_command() {
    let mut fx = Fixture::new();
    let mut objects = storage();
    let mesh = fx.mesh(2, false);

    let item = objects.alloc(&mesh, &Material::default(), 0..384, ObjectKind::Movable);
    assert!(!item.is_empty());
    assert_eq!(objects.live_count(), 1);
    assert_eq!(objects.clusters().len(), 2);

    let rec = objects.record(&item).unwrap();
    assert_eq!(rec.cluster_range(), 0..2);
    assert_eq!(objects.commands().get(rec.command_id()).unwrap().payload_count, 2);
    assert_eq!(objects.buckets().get(rec.bucket_id()).unwrap().object_count(), 1);

    for (i, cluster) in objects.clusters().clusters().iter().enumerate() {
        assert!(cluster.is_live());
        assert_eq!(cluster.first_meshlet, i as u32);
        assert_eq!(cluster.meshlet_count, 1);
        assert_eq!(cluster.bucket_id, rec.bucket_id());
        assert_eq!(cluster.command_id, rec.command_id());
        assert_eq!(cluster.instance_id, 0);
    }
}

#[test]
fn sub_range_covers_its_own_meshlets() {
    let mut fx = Fixture::new();
    let mut objects = storage();
    let mesh = fx.mesh(3, false);

    let item = objects.alloc(&mesh, &Material::default(), 192..384, ObjectKind::Static);
    let cluster = first_cluster(&objects, &item);
    assert_eq!(objects.clusters().len(), 1);
    assert_eq!(cluster.first_meshlet, 1);
    assert_eq!(objects.mesh_slice(&item).unwrap().indices, 192..384);
}

#[test]
fn unaligned_range_keeps_its_last_meshlet() {
    let mut fx = Fixture::new();
    let mut objects = storage();
    let mesh = fx.mesh(2, false);

    let item = objects.alloc(&mesh, &Material::default(), 100..200, ObjectKind::Static);
    let rec = objects.record(&item).unwrap();
    assert_eq!(rec.cluster_range(), 0..2);
    assert_eq!(objects.commands().get(rec.command_id()).unwrap().payload_count, 2);

    let meshlets: Vec<u32> = objects.clusters().clusters().iter().map(|c| c.first_meshlet).collect();
    assert_eq!(meshlets, vec![0, 1]);
    assert!(objects.clusters().clusters().iter().all(Cluster::is_live));
}

#[test]
fn empty_range_survives_arena_compaction() {
    let mut fx = Fixture::new();
    let mut objects = storage();
    let mesh = fx.mesh(4, false);

    let b = objects.alloc(&mesh, &Material::default(), 0..768, ObjectKind::Movable);
    let a = objects.alloc(&mesh, &Material::default(), 0..0, ObjectKind::Movable);
    let c = objects.alloc(&mesh, &Material::default(), 0..768, ObjectKind::Movable);
    assert!(!a.is_empty());
    assert!(objects.record(&a).unwrap().cluster_range().is_empty());

    objects.free(b);
    objects.free(c);
    assert_eq!(objects.clusters().len(), 0);
    assert_eq!(objects.live_count(), 1);

    objects.set_obj_matrix(&a, Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0)));
    objects.set_fatness(&a, 0.5);
    objects.set_as_ghost(&a, true);
    assert!(approx_vec(objects.bounds(&a).unwrap().center(), Vec3::new(5.0, 0.0, 0.0)));
    assert!(objects.record(&a).unwrap().is_ghost());
    assert_eq!(objects.clusters().len(), 0);
}

#[test]
fn landscape_has_no_instance_record() {
    let mut fx = Fixture::new();
    let mut objects = storage();
    let item = objects.alloc(&fx.mesh(1, false), &Material::default(), 0..192, ObjectKind::Landscape);

    assert!(objects.record(&item).unwrap().instance_block().is_none());
    assert_eq!(first_cluster(&objects, &item).instance_id, u32::MAX);
    assert!(objects.instances().arena().is_empty());
}

#[test]
fn unsupported_combination_yields_empty_item() {
    let mut fx = Fixture::new();
    let mut objects = storage();
    let additive = Material::new(AlphaMode::Additive, None);

    let item = objects.alloc(&fx.mesh(1, false), &additive, 0..192, ObjectKind::Movable);
    assert!(item.is_empty());
    assert_eq!(objects.live_count(), 0);
    assert_eq!(objects.table_len(), 0);
    assert!(objects.clusters().is_empty());
    assert!(objects.buckets().is_empty());

    // A compatible bucket that already exists is kept.
    let mesh = fx.mesh(1, false);
    let _solid = objects.alloc(&mesh, &Material::default(), 0..192, ObjectKind::Movable);
    let _none = objects.alloc(&mesh, &additive, 0..192, ObjectKind::Movable);
    assert_eq!(objects.buckets().len(), 1);

    // Every call through the empty item is a no-op.
    objects.set_obj_matrix(&item, Mat4::from_translation(Vec3::X));
    objects.set_wind(&item, WindMode::Trunk);
    objects.set_as_ghost(&item, true);
    assert!(objects.bounds(&item).is_none());
    assert!(objects.material(&item).is_none());
    objects.free(item);
}

#[test]
fn full_bucket_spills_into_compatible_bucket() {
    let mut fx = Fixture::new();
    let settings = StorageSettings {
        bucket_capacity: 2,
        ..Default::default()
    };
    let mut objects = storage_with(&settings, DeviceCaps::default());
    let mesh = fx.mesh(1, false);

    let items: Vec<Item> = (0..3)
        .map(|_| objects.alloc(&mesh, &Material::default(), 0..192, ObjectKind::Static))
        .collect();
    let buckets: Vec<u32> = items.iter().map(|i| objects.record(i).unwrap().bucket_id()).collect();
    assert_eq!(buckets[0], buckets[1]);
    assert_ne!(buckets[1], buckets[2]);
    assert_eq!(objects.buckets().len(), 2);
}

#[test]
fn bindless_devices_share_commands_across_buckets() {
    let mut fx = Fixture::new();
    let caps = DeviceCaps {
        bindless: true,
        ..Default::default()
    };
    let mut objects = storage_with(&StorageSettings::default(), caps);

    let a = objects.alloc(&fx.mesh(1, false), &Material::default(), 0..192, ObjectKind::Static);
    let b = objects.alloc(&fx.mesh(2, false), &Material::default(), 0..384, ObjectKind::Static);
    let (ra, rb) = (objects.record(&a).unwrap(), objects.record(&b).unwrap());

    assert_ne!(ra.bucket_id(), rb.bucket_id());
    assert_eq!(ra.command_id(), rb.command_id());
    let cmd = objects.commands().get(ra.command_id()).unwrap();
    assert_eq!(cmd.bucket_id, BINDLESS_BUCKET);
    assert_eq!(cmd.payload_count, 3);
}

// ============================================================================
// Release & Compaction
// ============================================================================

#[test]
fn free_releases_every_resource() {
    let mut fx = Fixture::new();
    let mut objects = storage();
    let item = objects.alloc(&fx.mesh(2, false), &Material::default(), 0..384, ObjectKind::Movable);
    let rec = objects.record(&item).unwrap();
    let (bucket, command) = (rec.bucket_id(), rec.command_id());

    objects.free(item);
    assert_eq!(objects.live_count(), 0);
    assert_eq!(objects.table_len(), 0);
    assert_eq!(objects.clusters().len(), 0);
    assert_eq!(objects.buckets().get(bucket).unwrap().object_count(), 0);
    assert_eq!(objects.commands().get(command).unwrap().payload_count, 0);
    assert_eq!(objects.instances().arena().len(), 0);
}

#[test]
fn dropped_item_is_released_on_next_collection() {
    let mut fx = Fixture::new();
    let mut objects = storage();
    let item = objects.alloc(&fx.mesh(1, false), &Material::default(), 0..192, ObjectKind::Movable);

    drop(item);
    assert_eq!(objects.live_count(), 1);
    objects.collect_released();
    assert_eq!(objects.live_count(), 0);
    assert_eq!(objects.table_len(), 0);
}

#[test]
fn table_shrinks_only_past_the_last_live_slot() {
    let mut fx = Fixture::new();
    let mut objects = storage();
    let mesh = fx.mesh(1, false);
    let a = objects.alloc(&mesh, &Material::default(), 0..192, ObjectKind::Movable);
    let b = objects.alloc(&mesh, &Material::default(), 0..192, ObjectKind::Movable);
    let c = objects.alloc(&mesh, &Material::default(), 0..192, ObjectKind::Movable);
    assert_eq!(objects.table_len(), 3);

    objects.free(b);
    assert_eq!(objects.table_len(), 3);

    objects.free(c);
    assert_eq!(objects.table_len(), 1);
    assert_eq!(objects.clusters().len(), 1);

    objects.free(a);
    assert_eq!(objects.table_len(), 0);
}

#[test]
fn churn_does_not_grow_steady_state() {
    let mut fx = Fixture::new();
    let mut objects = storage();
    let mesh = fx.mesh(2, false);
    let _anchor = objects.alloc(&mesh, &Material::default(), 0..384, ObjectKind::Static);
    let anchor_bytes = objects.instances().arena().len();

    for round in 0..200 {
        let items: Vec<Item> = (0..1 + round % 4)
            .map(|_| objects.alloc(&mesh, &Material::default(), 0..384, ObjectKind::Movable))
            .collect();
        for item in items {
            objects.free(item);
        }
        assert_eq!(objects.table_len(), 1);
        assert_eq!(objects.clusters().len(), 2);
        assert_eq!(objects.instances().arena().len(), anchor_bytes);
    }
}

#[test]
fn reused_slot_gets_a_new_identity() {
    let mut fx = Fixture::new();
    let mut objects = storage();
    let mesh = fx.mesh(1, false);
    let _keep = objects.alloc(&mesh, &Material::default(), 0..192, ObjectKind::Movable);
    let first = objects.alloc(&mesh, &Material::default(), 0..192, ObjectKind::Movable);
    let first_id = first.id().unwrap();
    let _tail = objects.alloc(&mesh, &Material::default(), 0..192, ObjectKind::Movable);

    objects.free(first);
    let second = objects.alloc(&mesh, &Material::default(), 0..192, ObjectKind::Movable);
    let second_id = second.id().unwrap();
    assert_eq!(first_id.slot, second_id.slot);
    assert_ne!(first_id.generation, second_id.generation);
}

// ============================================================================
// Mutators
// ============================================================================

#[test]
fn matrix_moves_bounds_clusters_and_instance() {
    let mut fx = Fixture::new();
    let mut objects = storage();
    let item = objects.alloc(&fx.mesh(2, false), &Material::default(), 0..384, ObjectKind::Movable);
    let m = Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0));

    objects.set_obj_matrix(&item, m);

    let bounds = objects.bounds(&item).unwrap();
    assert!(approx_vec(bounds.center(), Vec3::new(10.0, 0.0, 0.0)));

    // Movable objects cull every cluster with the whole-object sphere.
    for cluster in objects.clusters().clusters() {
        assert!(approx_vec(cluster.sphere().center, Vec3::new(10.0, 0.0, 0.0)));
        assert!(approx(cluster.radius, 3.0_f32.sqrt()));
        assert!(objects.clusters().is_dirty(0));
    }
    assert_eq!(Mat4::from_cols_array_2d(&instance(&objects, &item).model), m);
}

#[test]
fn static_objects_cull_with_meshlet_bounds() {
    let mut fx = Fixture::new();
    let mut objects = storage();
    let item = objects.alloc(&fx.mesh(2, false), &Material::default(), 0..384, ObjectKind::Static);

    objects.set_obj_matrix(&item, Mat4::from_translation(Vec3::new(0.0, 5.0, 0.0)));

    let clusters = objects.clusters().clusters();
    assert!(approx_vec(clusters[0].sphere().center, Vec3::new(-0.5, 5.0, 0.0)));
    assert!(approx_vec(clusters[1].sphere().center, Vec3::new(0.5, 5.0, 0.0)));
    assert!(approx(clusters[1].radius, 0.5));
}

#[test]
fn fatness_inflates_bounds_and_instance() {
    let mut fx = Fixture::new();
    let mut objects = storage();
    let item = objects.alloc(&fx.mesh(1, false), &Material::default(), 0..192, ObjectKind::Movable);

    objects.set_fatness(&item, 0.5);

    let bounds = objects.bounds(&item).unwrap();
    assert!(approx_vec(bounds.max, Vec3::splat(1.5)));
    assert!(approx(first_cluster(&objects, &item).radius, 3.0_f32.sqrt() + 0.5));
    assert!(approx(instance(&objects, &item).fatness, 0.5));
}

#[test]
fn ghosting_migrates_bucket_and_command() {
    let mut fx = Fixture::new();
    let mut objects = storage();
    let item = objects.alloc(&fx.mesh(2, false), &Material::default(), 0..384, ObjectKind::Movable);
    let before = objects.record(&item).unwrap().clone();

    objects.set_as_ghost(&item, true);
    let ghost = objects.record(&item).unwrap().clone();
    assert!(ghost.is_ghost());
    assert_eq!(objects.material(&item).unwrap().alpha, AlphaMode::Ghost);
    assert_ne!(ghost.bucket_id(), before.bucket_id());
    assert_ne!(ghost.command_id(), before.command_id());
    assert_eq!(ghost.cluster_range(), before.cluster_range());

    assert_eq!(objects.buckets().get(before.bucket_id()).unwrap().object_count(), 0);
    assert_eq!(objects.commands().get(before.command_id()).unwrap().payload_count, 0);
    assert_eq!(objects.commands().get(ghost.command_id()).unwrap().payload_count, 2);
    let cluster = first_cluster(&objects, &item);
    assert_eq!(cluster.bucket_id, ghost.bucket_id());
    assert_eq!(cluster.command_id, ghost.command_id());

    objects.set_as_ghost(&item, false);
    let after = objects.record(&item).unwrap();
    assert_eq!(after.bucket_id(), before.bucket_id());
    assert_eq!(after.command_id(), before.command_id());
    assert_eq!(objects.material(&item).unwrap().alpha, AlphaMode::Solid);
}

#[test]
fn skeletons_get_aligned_blocks() {
    let mut fx = Fixture::new();
    let mut objects = storage();
    let mesh = fx.mesh(1, true);
    let a = objects.alloc(&mesh, &Material::default(), 0..192, ObjectKind::Animated);
    let b = objects.alloc(&mesh, &Material::default(), 0..192, ObjectKind::Animated);

    objects.set_skeleton(&a, &[Mat4::IDENTITY; 20]);
    objects.set_skeleton(&b, &[Mat4::from_scale(Vec3::splat(2.0)); 10]);

    assert_eq!(instance(&objects, &a).skin_offset, 0);
    assert_eq!(instance(&objects, &b).skin_offset, 32);

    let block = objects.record(&b).unwrap().skeleton_block().unwrap();
    let bones: Vec<Mat4> = bytemuck::pod_collect_to_vec(objects.skeletons().arena().bytes(&block));
    assert_eq!(bones[0], Mat4::from_scale(Vec3::splat(2.0)));
}

// ============================================================================
// Animation
// ============================================================================

#[test]
fn wind_phase_follows_time() {
    let mut fx = Fixture::new();
    let mut objects = storage();
    let pool = WorkerPool::single_threaded();
    let item = objects.alloc(&fx.mesh(1, false), &Material::default(), 0..192, ObjectKind::Movable);

    objects.set_wind(&item, WindMode::Leaves);
    objects.tick(600, &pool);

    let rec = instance(&objects, &item);
    assert_eq!(rec.wind, WindMode::Leaves.as_gpu());
    assert!(approx(rec.wind_phase, 0.5));
}

#[test]
fn morph_layer_advances_and_expires() {
    let mut fx = Fixture::new();
    let mut objects = storage();
    let pool = WorkerPool::single_threaded();
    let item = objects.alloc(&fx.mesh(1, false), &Material::default(), 0..192, ObjectKind::Morph);

    objects.start_mm_anim(&item, morph(7, 1000));
    objects.tick(500, &pool);

    let layer = instance(&objects, &item).morphs[0];
    assert_eq!(layer.anim_id, 7);
    assert!(approx(layer.sample, 5.0));
    assert_eq!(objects.record(&item).unwrap().active_morphs(), 1);

    objects.tick(1000, &pool);
    assert_eq!(objects.record(&item).unwrap().active_morphs(), 0);
    assert_eq!(instance(&objects, &item).morphs[0].anim_id, u32::MAX);
}

#[test]
fn morph_layers_replace_the_oldest() {
    let mut fx = Fixture::new();
    let mut objects = storage();
    let pool = WorkerPool::single_threaded();
    let item = objects.alloc(&fx.mesh(1, false), &Material::default(), 0..192, ObjectKind::Morph);

    for (i, t) in [0u64, 100, 200, 300].into_iter().enumerate() {
        objects.tick(t, &pool);
        objects.start_mm_anim(&item, morph(i as u32, 0));
    }

    let ids: Vec<u32> = instance(&objects, &item).morphs.iter().map(|m| m.anim_id).collect();
    assert_eq!(ids, vec![3, 1, 2]);
}

#[test]
fn parallel_tick_matches_single_threaded() {
    let mut fx = Fixture::new();
    let mesh = fx.mesh(1, false);
    let mut serial = storage();
    let mut parallel = storage();

    let mut items = Vec::new();
    for objects in [&mut serial, &mut parallel] {
        let batch: Vec<Item> = (0..200)
            .map(|i| {
                let item = objects.alloc(&mesh, &Material::default(), 0..192, ObjectKind::Morph);
                objects.set_wind(&item, if i % 2 == 0 { WindMode::Trunk } else { WindMode::Leaves });
                objects.start_mm_anim(&item, morph(i, 0));
                item
            })
            .collect();
        items.push(batch);
    }

    serial.tick(1234, &WorkerPool::single_threaded());
    parallel.tick(1234, &WorkerPool::new(4));

    assert_eq!(serial.instances().arena().data(), parallel.instances().arena().data());
}

// ============================================================================
// Ray Queries
// ============================================================================

#[test]
fn static_objects_share_blas_per_mesh_range() {
    let mut fx = Fixture::new();
    let caps = DeviceCaps {
        ray_query: true,
        ..Default::default()
    };
    let mut storage = DrawStorage::new(
        &StorageSettings::default(),
        caps,
        &HostBackend::new(),
        Arc::new(TestPipelines),
        TextureKey::default(),
    );
    let mesh = fx.mesh(2, false);

    let a = storage.alloc(&mesh, &Material::default(), 0..384, ObjectKind::Static);
    let b = storage.alloc(&mesh, &Material::default(), 0..384, ObjectKind::Static);
    let _moving = storage.alloc(&mesh, &Material::default(), 0..384, ObjectKind::Movable);
    storage.set_obj_matrix(&b, Mat4::from_translation(Vec3::Z));

    let pending = storage.take_pending_blas_builds();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].key.index_count, 384);

    let tlas = storage.tlas_instances();
    assert_eq!(tlas.len(), 2);
    assert_eq!(tlas[0].0, tlas[1].0);
    assert!(storage.take_pending_blas_builds().is_empty());

    storage.free(a);
    assert_eq!(storage.tlas_instances().len(), 1);
}

// ============================================================================
// Commit
// ============================================================================

#[test]
fn commit_mirrors_cpu_state_into_resident_buffers() {
    let mut fx = Fixture::new();
    let backend = HostBackend::new();
    let mut storage = DrawStorage::new(
        &StorageSettings::default(),
        DeviceCaps::default(),
        &backend,
        Arc::new(TestPipelines),
        TextureKey::default(),
    );
    let item = storage.alloc(&fx.mesh(2, false), &Material::default(), 0..384, ObjectKind::Movable);

    storage.begin_frame(None);
    assert!(storage.commit());
    assert!(!storage.commit());

    let m = Mat4::from_translation(Vec3::new(3.0, 4.0, 5.0));
    storage.set_obj_matrix(&item, m);
    storage.begin_frame(None);
    assert!(!storage.commit());
    storage.wait_uploads();

    let clusters = backend.buffer("Clusters").unwrap();
    let resident: Vec<Cluster> = clusters.lock().read();
    assert_eq!(&resident[..2], storage.objects().clusters().clusters());

    let instances = backend.buffer("Instances").unwrap();
    let instances = instances.lock();
    let offset = storage.objects().record(&item).unwrap().instance_block().unwrap().offset as usize;
    let rec: InstanceGpu = bytemuck::pod_read_unaligned(&instances.bytes()[offset..offset + size_of::<InstanceGpu>()]);
    assert_eq!(Mat4::from_cols_array_2d(&rec.model), m);
    assert!(instances.patches >= 1);
}
