//! Storage core primitives
//!
//! Building blocks shared by every arena:
//! - `FreeList`: sorted, merging free-range list
//! - `DirtyBits`: lock-free dirty bitmap with run extraction
//! - `Patch`: sparse element update for resident buffers
//! - `ResidentBuffer` / `GpuBackend`: device buffer seam (host mirror or wgpu)
//! - `FrameClock`, `WorkerPool`, `UploadWorker`: frame pacing and threads

pub mod dirty;
pub mod frame;
pub mod free_list;
pub mod patch;
pub mod pool;
pub mod resident;
pub mod upload;
pub mod wgpu_backend;

pub use dirty::DirtyBits;
pub use frame::{FrameClock, FrameSignal};
pub use free_list::FreeList;
pub use patch::Patch;
pub use pool::WorkerPool;
pub use resident::{BufferRole, GpuBackend, HostBackend, HostBuffer, ResidentBuffer, SharedBuffer};
pub use upload::{UploadBatch, UploadJob, UploadWorker};
pub use wgpu_backend::{WgpuBackend, WgpuResidentBuffer};
