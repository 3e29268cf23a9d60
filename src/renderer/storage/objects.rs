//! Object Storage
//!
//! The registry of renderable objects. Each object owns a bucket reference,
//! a draw command, a cluster range, an instance block (all kinds but
//! landscape), optionally a skeleton block and a BLAS, and a visibility
//! token. All of them are released together when its [`Item`] goes away.
//!
//! # Usage
//!
//! ```rust,ignore
//! let item = objects.alloc(&mesh, &material, 0..mesh_index_count, ObjectKind::Movable);
//! if item.is_empty() {
//!     // unsupported material/kind combination: the object is not drawn
//! }
//! objects.set_obj_matrix(&item, Mat4::from_translation(pos));
//! objects.set_wind(&item, WindMode::Leaves);
//! drop(item); // released on the next alloc/commit
//! ```
//!
//! Mutators take `&Item` and look the object up by slot and generation, so
//! calls through an empty or stale handle do nothing.

use std::ops::Range;
use std::sync::Arc;

use flume::{Receiver, Sender};
use glam::Mat4;
use rustc_hash::FxHashSet;

use super::blas::{BlasCache, BlasId};
use super::buckets::BucketRegistry;
use super::byte_arena::{ArenaBlock, ArenaSync};
use super::clusters::{Cluster, ClusterArena};
use super::commands::{DrawCommandTable, INVALID_COMMAND, PipelineSource};
use super::instances::{InstanceStorage, MorphGpu};
use super::item::{Item, ItemRef};
use super::skeletons::SkeletonStorage;
use super::StorageBuffers;
use crate::renderer::core::{SharedBuffer, UploadBatch, UploadJob, UploadWorker, WorkerPool};
use crate::renderer::visibility::{VisibilityGroup, VisibilityToken};
use crate::resources::{BoundingBox, BoundingSphere, Material, MeshDesc, MeshSlice, MorphAnim, WindMode};
use crate::scene::{Frustum, ObjectKind, TextureKey, VIEW_COUNT};
use crate::settings::{DeviceCaps, MAX_MORPH_LAYERS, StorageSettings};

/// Smallest per-view visible-cluster buffer, in entries.
const MIN_VISIBLE_CLUSTERS: u32 = 64;

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
struct MorphLayer {
    anim: MorphAnim,
    start_ms: u64,
}

impl MorphLayer {
    fn is_expired(&self, now_ms: u64) -> bool {
        self.anim.duration_ms > 0 && now_ms.saturating_sub(self.start_ms) >= self.anim.duration_ms
    }

    fn gpu(&self, now_ms: u64) -> MorphGpu {
        let elapsed = now_ms.saturating_sub(self.start_ms) as f32 / 1000.0;
        let mut sample = elapsed * self.anim.fps;
        if self.anim.sample_count > 0 {
            sample %= self.anim.sample_count as f32;
        }
        MorphGpu {
            anim_id: self.anim.anim_id,
            first_sample: self.anim.first_sample,
            sample,
            intensity: self.anim.intensity,
        }
    }
}

fn morphs_gpu(layers: &[Option<MorphLayer>; MAX_MORPH_LAYERS], now_ms: u64) -> [MorphGpu; MAX_MORPH_LAYERS] {
    layers.map(|l| l.map_or(MorphGpu::NONE, |l| l.gpu(now_ms)))
}

fn wind_phase(wind: WindMode, now_ms: u64) -> f32 {
    match wind.period_ms() {
        0 => 0.0,
        period => (now_ms % period) as f32 / period as f32,
    }
}

/// One registered object.
#[derive(Debug, Clone)]
pub struct ObjectRecord {
    generation: u32,
    pub(crate) kind: ObjectKind,
    mesh: Arc<MeshDesc>,
    pub(crate) slice: MeshSlice,
    base_material: Material,
    pub(crate) material: Material,
    ghost: bool,
    pub(crate) bucket_id: u32,
    pub(crate) command_id: u32,
    pub(crate) clusters: Range<u32>,
    first_meshlet: u32,
    pub(crate) matrix: Mat4,
    pub(crate) fatness: f32,
    wind: WindMode,
    morphs: [Option<MorphLayer>; MAX_MORPH_LAYERS],
    pub(crate) instance: Option<ArenaBlock>,
    pub(crate) skeleton: Option<ArenaBlock>,
    blas: Option<BlasId>,
    visibility: VisibilityToken,
}

impl ObjectRecord {
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn bucket_id(&self) -> u32 {
        self.bucket_id
    }

    #[inline]
    #[must_use]
    pub fn command_id(&self) -> u32 {
        self.command_id
    }

    #[inline]
    #[must_use]
    pub fn cluster_range(&self) -> Range<u32> {
        self.clusters.clone()
    }

    #[inline]
    #[must_use]
    pub fn is_ghost(&self) -> bool {
        self.ghost
    }

    #[inline]
    #[must_use]
    pub fn fatness(&self) -> f32 {
        self.fatness
    }

    #[inline]
    #[must_use]
    pub fn wind(&self) -> WindMode {
        self.wind
    }

    #[inline]
    #[must_use]
    pub fn matrix(&self) -> Mat4 {
        self.matrix
    }

    #[inline]
    #[must_use]
    pub fn blas(&self) -> Option<BlasId> {
        self.blas
    }

    /// Block of the object's [`InstanceGpu`](super::InstanceGpu) record.
    #[inline]
    #[must_use]
    pub fn instance_block(&self) -> Option<ArenaBlock> {
        self.instance
    }

    #[inline]
    #[must_use]
    pub fn skeleton_block(&self) -> Option<ArenaBlock> {
        self.skeleton
    }

    #[must_use]
    pub fn active_morphs(&self) -> usize {
        self.morphs.iter().flatten().count()
    }

    /// World-space bounds, inflated by the fatness.
    #[must_use]
    pub fn world_bounds(&self) -> BoundingBox {
        let b = self.slice.bounds.transform(&self.matrix);
        if b.is_empty() || self.fatness <= 0.0 {
            return b;
        }
        BoundingBox::new(b.min - self.fatness, b.max + self.fatness)
    }

    fn world_sphere(&self) -> BoundingSphere {
        let mut s = self.slice.bounds.bounding_sphere().transform(&self.matrix);
        if s.is_valid() {
            s.radius += self.fatness.max(0.0);
        }
        s
    }

    /// World-space sphere of each cluster.
    fn cluster_spheres(&self) -> impl Iterator<Item = BoundingSphere> + '_ {
        let whole = self.world_sphere();
        let per_meshlet = self.kind.uses_meshlet_bounds();
        (0..self.clusters.len() as u32).map(move |i| {
            let meshlet = (self.first_meshlet + i) as usize;
            match self.mesh.meshlet_bounds.get(meshlet) {
                Some(local) if per_meshlet && local.is_valid() => {
                    let mut s = local.transform(&self.matrix);
                    s.radius += self.fatness.max(0.0);
                    s
                }
                _ => whole,
            }
        })
    }
}

/// Per-object animation state advanced by [`ObjectStorage::tick`].
struct AnimState {
    slot: u32,
    wind: WindMode,
    morphs: [Option<MorphLayer>; MAX_MORPH_LAYERS],
    wind_phase: f32,
    morph_gpu: [MorphGpu; MAX_MORPH_LAYERS],
}

impl AnimState {
    fn advance(&mut self, now_ms: u64) {
        for layer in &mut self.morphs {
            if layer.is_some_and(|l| l.is_expired(now_ms)) {
                *layer = None;
            }
        }
        self.wind_phase = wind_phase(self.wind, now_ms);
        self.morph_gpu = morphs_gpu(&self.morphs, now_ms);
    }
}

// ============================================================================
// ObjectStorage
// ============================================================================

pub struct ObjectStorage {
    settings: StorageSettings,
    caps: DeviceCaps,
    records: Vec<Option<ObjectRecord>>,
    free_slots: Vec<u32>,
    live: u32,
    next_generation: u32,
    release_tx: Sender<ItemRef>,
    release_rx: Receiver<ItemRef>,

    clusters: ClusterArena,
    buckets: BucketRegistry,
    commands: DrawCommandTable,
    instances: InstanceStorage,
    skeletons: SkeletonStorage,
    blas: BlasCache,
    visibility: VisibilityGroup,

    wind_set: FxHashSet<u32>,
    morph_set: FxHashSet<u32>,
    time_ms: u64,
    /// Entries per view the visible-cluster buffers were last sized for.
    visible_capacity: Option<u32>,
}

impl ObjectStorage {
    #[must_use]
    pub fn new(
        settings: &StorageSettings,
        caps: DeviceCaps,
        pipelines: Arc<dyn PipelineSource>,
        fallback_texture: TextureKey,
    ) -> Self {
        let (release_tx, release_rx) = flume::unbounded();
        Self {
            settings: settings.clone(),
            caps,
            records: Vec::new(),
            free_slots: Vec::new(),
            live: 0,
            next_generation: 0,
            release_tx,
            release_rx,
            clusters: ClusterArena::new(settings.cluster_block),
            buckets: BucketRegistry::new(settings.bucket_capacity, fallback_texture),
            commands: DrawCommandTable::new(pipelines, caps.bindless, settings.indices_per_meshlet()),
            instances: InstanceStorage::new(settings),
            skeletons: SkeletonStorage::new(settings, caps.min_storage_offset_alignment),
            blas: BlasCache::new(),
            visibility: VisibilityGroup::new(settings.visible_set_capacity, settings.bvh_leaf_size),
            wind_set: FxHashSet::default(),
            morph_set: FxHashSet::default(),
            time_ms: 0,
            visible_capacity: None,
        }
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    #[inline]
    #[must_use]
    pub fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    /// Number of live objects.
    #[inline]
    #[must_use]
    pub fn live_count(&self) -> u32 {
        self.live
    }

    /// Length of the object table, live and free slots.
    #[inline]
    #[must_use]
    pub fn table_len(&self) -> u32 {
        self.records.len() as u32
    }

    #[must_use]
    pub fn clusters(&self) -> &ClusterArena {
        &self.clusters
    }

    #[must_use]
    pub fn buckets(&self) -> &BucketRegistry {
        &self.buckets
    }

    #[must_use]
    pub fn commands(&self) -> &DrawCommandTable {
        &self.commands
    }

    #[must_use]
    pub fn instances(&self) -> &InstanceStorage {
        &self.instances
    }

    #[must_use]
    pub fn skeletons(&self) -> &SkeletonStorage {
        &self.skeletons
    }

    #[must_use]
    pub fn visibility(&self) -> &VisibilityGroup {
        &self.visibility
    }

    pub fn blas_cache_mut(&mut self) -> &mut BlasCache {
        &mut self.blas
    }

    /// Record of the live object in `slot`.
    #[must_use]
    pub fn object(&self, slot: u32) -> Option<&ObjectRecord> {
        self.records.get(slot as usize)?.as_ref()
    }

    #[must_use]
    pub fn record(&self, item: &Item) -> Option<&ObjectRecord> {
        let r = item.id()?;
        self.object(r.slot).filter(|rec| rec.generation == r.generation)
    }

    fn resolve(&self, item: &Item) -> Option<u32> {
        let r = item.id()?;
        match self.object(r.slot) {
            Some(rec) if rec.generation == r.generation => Some(r.slot),
            _ => {
                log::warn!("Stale object handle {:?} ignored", r);
                None
            }
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// World-space bounds of the object.
    #[must_use]
    pub fn bounds(&self, item: &Item) -> Option<BoundingBox> {
        self.record(item).map(ObjectRecord::world_bounds)
    }

    /// Material the object is currently drawn with (ghost override included).
    #[must_use]
    pub fn material(&self, item: &Item) -> Option<&Material> {
        self.record(item).map(|r| &r.material)
    }

    #[must_use]
    pub fn mesh_slice(&self, item: &Item) -> Option<&MeshSlice> {
        self.record(item).map(|r| &r.slice)
    }

    // ------------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------------

    /// Registers an object drawing `indices` of `mesh` with `material`.
    ///
    /// Returns an empty item when no pipeline can draw the combination.
    pub fn alloc(&mut self, mesh: &Arc<MeshDesc>, material: &Material, indices: Range<u32>, kind: ObjectKind) -> Item {
        self.collect_released();

        let bucket_count = self.buckets.len();
        let bucket_id = self.buckets.get_bucket(material, mesh);
        let command_id = self.commands.command_id(material, kind, bucket_id);
        if command_id == INVALID_COMMAND {
            self.buckets.truncate(bucket_count);
            return Item::empty();
        }
        self.buckets.acquire(bucket_id);

        let slice = MeshSlice {
            mesh: mesh.mesh,
            indices,
            bounds: mesh.bounds,
        };
        let (first_meshlet, meshlet_count) = slice.meshlets(self.settings.indices_per_meshlet());

        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None => {
                self.records.push(None);
                self.records.len() as u32 - 1
            }
        };
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);

        let instance = kind.has_instance_data().then(|| self.instances.alloc_instance());
        let instance_id = instance.map_or(u32::MAX, |b| self.instances.record_index(&b));

        let first_cluster = self.clusters.alloc(meshlet_count);
        self.commands.add_clusters(command_id, meshlet_count);

        let blas = (self.caps.ray_query && kind.is_ray_traced()).then(|| self.blas.acquire(mesh, &slice));

        let world = slice.bounds;
        let visibility = self.visibility.insert(slot, kind.is_static(), world);

        let record = ObjectRecord {
            generation,
            kind,
            mesh: mesh.clone(),
            slice,
            base_material: material.clone(),
            material: material.clone(),
            ghost: false,
            bucket_id,
            command_id,
            clusters: first_cluster..first_cluster + meshlet_count,
            first_meshlet,
            matrix: Mat4::IDENTITY,
            fatness: 0.0,
            wind: WindMode::None,
            morphs: [None; MAX_MORPH_LAYERS],
            instance,
            skeleton: None,
            blas,
            visibility,
        };

        for (i, sphere) in record.cluster_spheres().enumerate() {
            let mut cluster = Cluster {
                bucket_id,
                command_id,
                first_meshlet: first_meshlet + i as u32,
                meshlet_count: 1,
                instance_id,
                ..Cluster::RELEASED
            };
            cluster.set_sphere(sphere);
            self.clusters.set(first_cluster + i as u32, cluster);
        }

        self.records[slot as usize] = Some(record);
        self.live += 1;

        Item::new(ItemRef { slot, generation }, self.release_tx.clone())
    }

    /// Releases the object owned by `item` immediately.
    pub fn free(&mut self, mut item: Item) {
        if let Some(r) = item.take() {
            self.release(r);
        }
    }

    /// Releases objects whose items were dropped.
    pub fn collect_released(&mut self) {
        while let Ok(r) = self.release_rx.try_recv() {
            self.release(r);
        }
    }

    fn release(&mut self, r: ItemRef) {
        let slot = r.slot as usize;
        match self.records.get(slot) {
            Some(Some(rec)) if rec.generation == r.generation => {}
            _ => return,
        }
        let Some(rec) = self.records[slot].take() else {
            return;
        };

        let count = rec.clusters.len() as u32;
        self.clusters.free(rec.clusters.start, count);
        self.commands.remove_clusters(rec.command_id, count);
        self.buckets.release(rec.bucket_id);
        if let Some(block) = rec.instance {
            self.instances.free(block);
        }
        if let Some(block) = rec.skeleton {
            self.skeletons.free(block);
        }
        if let Some(id) = rec.blas {
            self.blas.release(id);
        }
        self.visibility.remove(rec.visibility);
        self.wind_set.remove(&r.slot);
        self.morph_set.remove(&r.slot);

        self.live -= 1;
        self.free_slots.push(r.slot);

        if slot + 1 == self.records.len() {
            self.shrink_table();
        }
    }

    /// Drops trailing free slots and compacts the arenas behind them.
    fn shrink_table(&mut self) {
        while matches!(self.records.last(), Some(None)) {
            self.records.pop();
        }
        let len = self.records.len() as u32;
        self.free_slots.retain(|&s| s < len);
        self.records.shrink_to_fit();

        self.clusters.shrink_to_fit();
        self.instances.shrink_to_fit();
        self.skeletons.shrink_to_fit();
    }

    // ------------------------------------------------------------------------
    // Mutators
    // ------------------------------------------------------------------------

    /// Re-derives cluster spheres and visibility bounds after a transform or
    /// fatness change.
    fn refresh_bounds(&mut self, slot: u32) {
        let Some(rec) = self.records[slot as usize].as_ref() else {
            return;
        };
        self.clusters.set_spheres(rec.clusters.start, rec.cluster_spheres());
        self.visibility.update(rec.visibility, rec.world_bounds());
    }

    pub fn set_obj_matrix(&mut self, item: &Item, matrix: Mat4) {
        let Some(slot) = self.resolve(item) else {
            return;
        };
        let Some(rec) = self.records[slot as usize].as_mut() else {
            return;
        };
        rec.matrix = matrix;
        if let Some(block) = rec.instance {
            self.instances.set_matrix(&block, &matrix);
        }
        self.refresh_bounds(slot);
    }

    pub fn set_fatness(&mut self, item: &Item, fatness: f32) {
        let Some(slot) = self.resolve(item) else {
            return;
        };
        let Some(rec) = self.records[slot as usize].as_mut() else {
            return;
        };
        rec.fatness = fatness;
        if let Some(block) = rec.instance {
            self.instances.set_fatness(&block, fatness);
        }
        self.refresh_bounds(slot);
    }

    pub fn set_wind(&mut self, item: &Item, wind: WindMode) {
        let Some(slot) = self.resolve(item) else {
            return;
        };
        let Some(rec) = self.records[slot as usize].as_mut() else {
            return;
        };
        rec.wind = wind;
        if let Some(block) = rec.instance {
            self.instances.set_wind(&block, wind.as_gpu(), wind_phase(wind, self.time_ms));
        }
        let clusters = rec.clusters.clone();

        if wind == WindMode::None {
            self.wind_set.remove(&slot);
        } else {
            self.wind_set.insert(slot);
        }
        self.clusters.mark_clusters(clusters.start, clusters.len() as u32);
    }

    /// Starts a morph clip on a free layer, replacing the oldest when all are busy.
    pub fn start_mm_anim(&mut self, item: &Item, anim: MorphAnim) {
        let Some(slot) = self.resolve(item) else {
            return;
        };
        let now = self.time_ms;
        let Some(rec) = self.records[slot as usize].as_mut() else {
            return;
        };

        let layer = MorphLayer { anim, start_ms: now };
        let target = rec.morphs.iter().position(Option::is_none).unwrap_or_else(|| {
            rec.morphs
                .iter()
                .enumerate()
                .min_by_key(|(_, l)| l.map_or(0, |l| l.start_ms))
                .map_or(0, |(i, _)| i)
        });
        rec.morphs[target] = Some(layer);

        if let Some(block) = rec.instance {
            self.instances.set_morphs(&block, &morphs_gpu(&rec.morphs, now));
        }
        let clusters = rec.clusters.clone();
        self.morph_set.insert(slot);
        self.clusters.mark_clusters(clusters.start, clusters.len() as u32);
    }

    /// Switches the object to its see-through variant and back, moving it to
    /// the matching bucket and command.
    pub fn set_as_ghost(&mut self, item: &Item, ghost: bool) {
        let Some(slot) = self.resolve(item) else {
            return;
        };
        let Some(rec) = self.records[slot as usize].as_ref() else {
            return;
        };
        if rec.ghost == ghost {
            return;
        }

        let material = if ghost { rec.base_material.as_ghost() } else { rec.base_material.clone() };
        let kind = rec.kind;
        let mesh = rec.mesh.clone();
        let (old_bucket, old_command) = (rec.bucket_id, rec.command_id);
        let clusters = rec.clusters.clone();

        let bucket_count = self.buckets.len();
        let bucket_id = self.buckets.get_bucket(&material, &mesh);
        let command_id = self.commands.command_id(&material, kind, bucket_id);
        if command_id == INVALID_COMMAND {
            self.buckets.truncate(bucket_count);
            log::warn!("Ghost variant of {:?} {:?} has no pipeline; kept as is", material.alpha, kind);
            return;
        }

        let meshlets = clusters.len() as u32;
        self.buckets.release(old_bucket);
        self.buckets.acquire(bucket_id);
        self.commands.remove_clusters(old_command, meshlets);
        self.commands.add_clusters(command_id, meshlets);
        self.clusters.set_owner(clusters.start, meshlets, bucket_id, command_id);

        if let Some(rec) = self.records[slot as usize].as_mut() {
            rec.ghost = ghost;
            rec.material = material;
            rec.bucket_id = bucket_id;
            rec.command_id = command_id;
        }
    }

    /// Uploads bone matrices for a skinned object and points its instance
    /// record at them.
    pub fn set_skeleton(&mut self, item: &Item, bones: &[Mat4]) {
        let Some(slot) = self.resolve(item) else {
            return;
        };
        let Some(rec) = self.records[slot as usize].as_mut() else {
            return;
        };
        let Some(instance) = rec.instance else {
            return;
        };

        let count = bones.len() as u32;
        let block = match rec.skeleton {
            Some(block) => self.skeletons.realloc(block, count),
            None => self.skeletons.alloc(count),
        };
        rec.skeleton = Some(block);

        self.skeletons.write_bones(&block, bones);
        self.instances.set_skin_offset(&instance, self.skeletons.bone_offset(&block));
    }

    // ------------------------------------------------------------------------
    // Per-frame
    // ------------------------------------------------------------------------

    /// Advances wind and morph animation to `time_ms`.
    pub fn tick(&mut self, time_ms: u64, pool: &WorkerPool) {
        self.collect_released();
        self.time_ms = time_ms;

        let mut states: Vec<AnimState> = self
            .wind_set
            .union(&self.morph_set)
            .filter_map(|&slot| {
                let rec = self.object(slot)?;
                Some(AnimState {
                    slot,
                    wind: rec.wind,
                    morphs: rec.morphs,
                    wind_phase: 0.0,
                    morph_gpu: [MorphGpu::NONE; MAX_MORPH_LAYERS],
                })
            })
            .collect();

        pool.parallel_for_chunks(&mut states, |_, chunk| {
            for state in chunk {
                state.advance(time_ms);
            }
        });

        for state in states {
            let Some(rec) = self.records[state.slot as usize].as_mut() else {
                continue;
            };
            rec.morphs = state.morphs;
            if let Some(block) = rec.instance {
                if state.wind != WindMode::None {
                    self.instances.set_wind(&block, state.wind.as_gpu(), state.wind_phase);
                }
                if self.morph_set.contains(&state.slot) {
                    self.instances.set_morphs(&block, &state.morph_gpu);
                }
            }
            if rec.morphs.iter().all(Option::is_none) {
                self.morph_set.remove(&state.slot);
            }
        }
    }

    /// Runs the visibility pass over all registered objects.
    pub fn visibility_pass(&mut self, frustums: &[Option<Frustum>; VIEW_COUNT], pool: &WorkerPool) {
        self.collect_released();
        self.visibility.visibility_pass(frustums, pool);
    }

    /// `(blas, transform)` of every live ray-traced object.
    #[must_use]
    pub fn tlas_instances(&self) -> Vec<(BlasId, Mat4)> {
        self.records
            .iter()
            .flatten()
            .filter_map(|rec| rec.blas.map(|id| (id, rec.matrix)))
            .collect()
    }

    /// Flushes every dirty structure into `buffers`. Instance and skeleton
    /// patches are handed to `upload`. Returns `true` when any buffer was
    /// reallocated.
    pub fn commit(&mut self, frame: usize, buffers: &StorageBuffers, upload: &UploadWorker) -> bool {
        self.collect_released();

        let mut reallocated = self.clusters.commit(frame, &mut *buffers.clusters.lock());
        reallocated |= self.buckets.commit(frame, &mut *buffers.buckets.lock());
        reallocated |= self.commands.commit(frame, &buffers.indirect);

        let capacity = visible_cluster_capacity(self.commands.total_payload());
        if self.visible_capacity != Some(capacity) {
            let zeroed = vec![0u8; capacity as usize * size_of::<u32>()];
            for target in &buffers.visible_clusters {
                target.lock().reallocate(&zeroed);
            }
            log::info!("Visible-cluster buffers reallocated: {} entries", capacity);
            self.visible_capacity = Some(capacity);
            reallocated = true;
        }

        let mut jobs = UploadBatch::new();
        reallocated |= sync_arena(self.instances.prepare(), &buffers.instances, upload, &mut jobs);
        reallocated |= sync_arena(self.skeletons.prepare(), &buffers.skeletons, upload, &mut jobs);
        upload.submit(frame, jobs);

        reallocated
    }
}

/// Entries per view in the visible-cluster buffers for `payload` clusters.
fn visible_cluster_capacity(payload: u32) -> u32 {
    payload.next_power_of_two().max(MIN_VISIBLE_CLUSTERS)
}

fn sync_arena(sync: ArenaSync, target: &SharedBuffer, upload: &UploadWorker, jobs: &mut UploadBatch) -> bool {
    match sync {
        ArenaSync::Clean => false,
        ArenaSync::Patched(patch) => {
            jobs.push(UploadJob {
                target: target.clone(),
                patch,
            });
            false
        }
        ArenaSync::Reallocated(contents) => {
            // Queued patches predate these contents.
            upload.wait_idle();
            target.lock().reallocate(&contents);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::storage::PipelineId;
    use crate::scene::{CameraView, GpuBufferKey, MeshKey};
    use crate::resources::MeshRef;

    struct AnyPipeline;

    impl PipelineSource for AnyPipeline {
        fn pipeline(&self, _: &Material, _: ObjectKind, view: CameraView, _: bool) -> Option<PipelineId> {
            Some(PipelineId(view.index() as u32))
        }
    }

    fn mesh() -> Arc<MeshDesc> {
        let mut keys = slotmap::SlotMap::<MeshKey, ()>::with_key();
        Arc::new(MeshDesc::new(
            MeshRef::Static(keys.insert(())),
            GpuBufferKey::default(),
            GpuBufferKey::default(),
            BoundingBox::new(glam::Vec3::splat(-1.0), glam::Vec3::ONE),
        ))
    }

    fn storage() -> ObjectStorage {
        ObjectStorage::new(&StorageSettings::default(), DeviceCaps::default(), Arc::new(AnyPipeline), TextureKey::default())
    }

    #[test]
    fn stale_handle_does_not_touch_reused_slot() {
        let mut objects = storage();
        let mesh = mesh();
        let first = objects.alloc(&mesh, &Material::default(), 0..192, ObjectKind::Movable);
        let old = first.id().unwrap();
        objects.free(first);

        let second = objects.alloc(&mesh, &Material::default(), 0..192, ObjectKind::Movable);
        assert_eq!(second.id().unwrap().slot, old.slot);

        // A handle forged from the released reference must be ignored.
        let mut stale = Item::new(old, objects.release_tx.clone());
        objects.set_obj_matrix(&stale, Mat4::from_translation(glam::Vec3::X));
        assert!(objects.record(&stale).is_none());
        assert_eq!(objects.record(&second).unwrap().matrix(), Mat4::IDENTITY);

        stale.take();
        objects.collect_released();
        assert_eq!(objects.live_count(), 1);
    }

    #[test]
    fn dropping_stale_handle_releases_nothing() {
        let mut objects = storage();
        let mesh = mesh();
        let first = objects.alloc(&mesh, &Material::default(), 0..192, ObjectKind::Movable);
        let old = first.id().unwrap();
        objects.free(first);
        let _second = objects.alloc(&mesh, &Material::default(), 0..192, ObjectKind::Movable);

        drop(Item::new(old, objects.release_tx.clone()));
        objects.collect_released();
        assert_eq!(objects.live_count(), 1);
    }

    #[test]
    fn morph_sample_wraps_at_clip_length() {
        let layer = MorphLayer {
            anim: MorphAnim {
                anim_id: 1,
                first_sample: 4,
                sample_count: 10,
                fps: 10.0,
                intensity: 0.5,
                duration_ms: 0,
            },
            start_ms: 1000,
        };
        let gpu = layer.gpu(2500);
        assert!((gpu.sample - 5.0).abs() < 1e-4);
        assert_eq!(gpu.first_sample, 4);
        assert!(!layer.is_expired(u64::MAX));
    }

    #[test]
    fn wind_phase_is_zero_without_wind() {
        assert_eq!(wind_phase(WindMode::None, 1234), 0.0);
        assert!((wind_phase(WindMode::Trunk, 5000) - 0.25).abs() < 1e-6);
    }
}
