//! # drawstore
//!
//! Clustered scene-object storage and GPU-driven draw compilation for wgpu
//! renderers.
//!
//! Registered objects are split into clusters (one meshlet each) that live in
//! resident GPU buffers. Per-object transforms, wind and morph parameters sit
//! in an instance arena, bone matrices in a skeleton arena. Every structure
//! tracks dirty ranges and only changed records travel to the GPU each frame.
//!
//! # Modules
//!
//! - [`renderer`]: [`DrawStorage`] facade, storage arenas, visibility, draw submission
//! - [`resources`]: mesh and material descriptions handed in by the asset layer
//! - [`scene`]: object kinds, camera views and frusta
//! - [`settings`]: tunables and device capabilities
//! - [`errors`]: setup errors
//!
//! # Example
//!
//! ```rust,ignore
//! let mut storage = DrawStorage::new(&settings, caps, &backend, pipelines, fallback_texture);
//!
//! let item = storage.alloc(&mesh, &material, 0..index_count, ObjectKind::Movable);
//! storage.set_obj_matrix(&item, transform);
//!
//! storage.begin_frame(None);
//! storage.tick(time_ms);
//! let rebind = storage.visibility_pass(&frustums);
//! if storage.commit() || rebind {
//!     // recreate bind groups
//! }
//! for call in storage.draw_calls(CameraView::Main, DrawPhase::Opaque) {
//!     // encode
//! }
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod errors;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod settings;

pub use errors::{Result, StorageError};
pub use renderer::DrawStorage;
pub use renderer::core::{FrameSignal, GpuBackend, HostBackend, WgpuBackend, WorkerPool};
pub use renderer::draw::DrawCall;
pub use renderer::storage::{Item, PipelineId, PipelineSource};
pub use resources::{AlphaMode, BoundingBox, BoundingSphere, DrawPhase, Material, MeshDesc, MeshRef, MorphAnim, WindMode};
pub use scene::{CameraView, Frustum, ObjectKind};
pub use settings::{DeviceCaps, StorageSettings};
