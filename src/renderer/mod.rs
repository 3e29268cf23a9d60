//! Draw Storage
//!
//! The renderer-facing entry point: object registration, per-frame
//! animation, visibility, buffer synchronization and draw submission.
//!
//! # Frame Flow
//!
//! ```text
//! begin_frame ─▶ mutate items ─▶ tick ─▶ visibility_pass ─▶ commit ─▶ draw_calls
//! ```
//!
//! All calls run on the frame-preparation thread. Animation and dynamic
//! visibility fan out over the worker pool internally; instance and skeleton
//! patches are written by the upload thread.

pub mod core;
pub mod draw;
pub mod storage;
pub mod visibility;

use std::ops::Range;
use std::sync::Arc;

use glam::Mat4;

use self::core::{FrameClock, FrameSignal, GpuBackend, UploadWorker, WorkerPool};
use self::draw::{DrawCall, DrawList};
use self::storage::{BlasBuildRequest, BlasId, Item, ObjectStorage, PipelineSource, StorageBuffers};
use crate::resources::{BoundingBox, DrawPhase, Material, MeshDesc, MeshSlice, MorphAnim, WindMode};
use crate::scene::{CameraView, Frustum, ObjectKind, TextureKey, VIEW_COUNT};
use crate::settings::{DeviceCaps, StorageSettings};

pub use self::draw::NO_INSTANCE;

pub struct DrawStorage {
    objects: ObjectStorage,
    buffers: StorageBuffers,
    lists: [DrawList; VIEW_COUNT],
    clock: FrameClock,
    pool: WorkerPool,
    upload: UploadWorker,
}

impl DrawStorage {
    #[must_use]
    pub fn new(
        settings: &StorageSettings,
        caps: DeviceCaps,
        backend: &dyn GpuBackend,
        pipelines: Arc<dyn PipelineSource>,
        fallback_texture: TextureKey,
    ) -> Self {
        log::info!(
            "Creating draw storage: {} frames in flight, bindless: {}, cluster culling: {}",
            settings.frames_in_flight,
            caps.bindless,
            caps.gpu_cluster_culling
        );
        Self {
            objects: ObjectStorage::new(settings, caps, pipelines, fallback_texture),
            buffers: StorageBuffers::new(backend),
            lists: std::array::from_fn(|_| DrawList::new()),
            clock: FrameClock::new(settings.frames_in_flight),
            pool: WorkerPool::new(settings.max_worker_threads),
            upload: UploadWorker::new(settings.frames_in_flight),
        }
    }

    /// Replaces the worker pool, e.g. with a single-threaded one.
    #[must_use]
    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = pool;
        self
    }

    #[inline]
    #[must_use]
    pub fn objects(&self) -> &ObjectStorage {
        &self.objects
    }

    #[inline]
    #[must_use]
    pub fn buffers(&self) -> &StorageBuffers {
        &self.buffers
    }

    #[inline]
    #[must_use]
    pub fn frame(&self) -> FrameSignal {
        self.clock.signal()
    }

    #[must_use]
    pub fn draw_list(&self, view: CameraView) -> &DrawList {
        &self.lists[view.index()]
    }

    // ------------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------------

    pub fn alloc(&mut self, mesh: &Arc<MeshDesc>, material: &Material, indices: Range<u32>, kind: ObjectKind) -> Item {
        self.objects.alloc(mesh, material, indices, kind)
    }

    pub fn free(&mut self, item: Item) {
        self.objects.free(item);
    }

    pub fn set_obj_matrix(&mut self, item: &Item, matrix: Mat4) {
        self.objects.set_obj_matrix(item, matrix);
    }

    pub fn set_fatness(&mut self, item: &Item, fatness: f32) {
        self.objects.set_fatness(item, fatness);
    }

    pub fn set_wind(&mut self, item: &Item, wind: WindMode) {
        self.objects.set_wind(item, wind);
    }

    pub fn start_mm_anim(&mut self, item: &Item, anim: MorphAnim) {
        self.objects.start_mm_anim(item, anim);
    }

    pub fn set_as_ghost(&mut self, item: &Item, ghost: bool) {
        self.objects.set_as_ghost(item, ghost);
    }

    pub fn set_skeleton(&mut self, item: &Item, bones: &[Mat4]) {
        self.objects.set_skeleton(item, bones);
    }

    #[must_use]
    pub fn bounds(&self, item: &Item) -> Option<BoundingBox> {
        self.objects.bounds(item)
    }

    #[must_use]
    pub fn material(&self, item: &Item) -> Option<&Material> {
        self.objects.material(item)
    }

    #[must_use]
    pub fn mesh_slice(&self, item: &Item) -> Option<&MeshSlice> {
        self.objects.mesh_slice(item)
    }

    // ------------------------------------------------------------------------
    // Frame
    // ------------------------------------------------------------------------

    /// Starts a frame. `signal` comes from the presenter; without one the
    /// internal clock advances by one frame.
    pub fn begin_frame(&mut self, signal: Option<FrameSignal>) -> FrameSignal {
        let signal = match signal {
            Some(signal) => {
                self.clock.sync(signal);
                signal
            }
            None => self.clock.advance(),
        };
        // The slot about to be written must be done uploading.
        self.upload.wait_frame(signal.frame_index);
        signal
    }

    pub fn tick(&mut self, time_ms: u64) {
        self.objects.tick(time_ms, &self.pool);
    }

    /// Culls every view and rebuilds its batched draw list. Returns `true`
    /// when a visible-object buffer was reallocated and bindings must be
    /// recreated.
    pub fn visibility_pass(&mut self, frustums: &[Option<Frustum>; VIEW_COUNT]) -> bool {
        self.objects.visibility_pass(frustums, &self.pool);

        let frame = self.clock.frame_index();
        let mut reallocated = false;
        for view in CameraView::ALL {
            let list = &mut self.lists[view.index()];
            list.build(&self.objects, self.objects.visibility().visible(view));
            reallocated |= list.upload(frame, &mut *self.buffers.visible_objects[view.index()].lock());
        }
        reallocated
    }

    /// Flushes all dirty state. Returns `true` when any resident buffer was
    /// reallocated and bindings must be recreated.
    pub fn commit(&mut self) -> bool {
        let frame = self.clock.frame_index();
        let reallocated = self.objects.commit(frame, &self.buffers, &self.upload);
        if reallocated {
            log::info!("Resident buffers reallocated in frame {}", self.clock.signal().tick);
        }
        reallocated
    }

    /// Blocks until the upload thread has written every queued patch.
    pub fn wait_uploads(&self) {
        self.upload.wait_idle();
    }

    #[must_use]
    pub fn draw_calls(&self, view: CameraView, phase: DrawPhase) -> Vec<DrawCall> {
        draw::draw_calls(&self.objects, &self.lists[view.index()], view, phase)
    }

    // ------------------------------------------------------------------------
    // Ray queries
    // ------------------------------------------------------------------------

    pub fn take_pending_blas_builds(&mut self) -> Vec<BlasBuildRequest> {
        self.objects.blas_cache_mut().take_pending_builds()
    }

    #[must_use]
    pub fn tlas_instances(&self) -> Vec<(BlasId, Mat4)> {
        self.objects.tlas_instances()
    }
}

impl Drop for DrawStorage {
    fn drop(&mut self) {
        self.upload.wait_idle();
    }
}
