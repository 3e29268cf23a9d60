//! Storage Settings & Device Capabilities
//!
//! This module defines the tunables of the storage core and the device
//! capability snapshot it is configured against.
//!
//! The numeric defaults (meshlet size, bucket capacity, visible-set size) are
//! tuned to common GPU limits but are not invariants of the design: every one
//! of them can be overridden from a JSON settings file.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use drawstore::settings::{StorageSettings, DeviceCaps};
//!
//! // Defaults
//! let settings = StorageSettings::default();
//!
//! // Overrides from disk, validated
//! let settings = StorageSettings::load("storage.json")?;
//!
//! // Capabilities queried once at startup
//! let caps = DeviceCaps::from_adapter(&adapter);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, StorageError};

/// Number of morph-animation layers an object can play at once.
pub const MAX_MORPH_LAYERS: usize = 3;

// ---------------------------------------------------------------------------
// StorageSettings
// ---------------------------------------------------------------------------

/// Tunables of the cluster / instance storage.
///
/// Loaded once at startup. Changing any of these at runtime requires
/// recreating the [`DrawStorage`](crate::renderer::DrawStorage).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Primitives per meshlet. A cluster covers whole meshlets, so an object's
    /// meshlet count is `ceil(index_count / (3 * primitives_per_meshlet))`.
    pub primitives_per_meshlet: u32,

    /// Minimum GPU capacity (in clusters) of the resident cluster buffer.
    /// The buffer capacity is the next power of two of the live count,
    /// never below this value.
    pub cluster_block: u32,

    /// Maximum number of objects sharing one bucket before a new,
    /// compatible bucket is created.
    pub bucket_capacity: u32,

    /// Number of overlapping frames whose GPU work may still be executing.
    pub frames_in_flight: u32,

    /// Initial capacity of each per-view visible index list.
    pub visible_set_capacity: u32,

    /// Granularity (bytes) of dirty tracking in the byte arenas.
    pub dirty_sub_block: u32,

    /// Minimum block size and offset alignment (bytes) of instance blocks.
    pub instance_alignment: u32,

    /// Maximum bone count of a single skeleton.
    pub max_bones: u32,

    /// Maximum number of objects stored in one BVH leaf.
    pub bvh_leaf_size: u32,

    /// Upper bound on the worker pool size.
    pub max_worker_threads: u32,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            primitives_per_meshlet: 64,
            cluster_block: 64,
            bucket_capacity: 1024,
            frames_in_flight: 2,
            visible_set_capacity: 256,
            dirty_sub_block: 64,
            instance_alignment: 16,
            max_bones: 96,
            bvh_leaf_size: 4,
            max_worker_threads: 8,
        }
    }
}

impl StorageSettings {
    /// Parses settings from a JSON document. Missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads and parses a JSON settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        log::info!("Loading storage settings from {}", path.as_ref().display());
        Self::from_json_str(&text)
    }

    /// Checks structural requirements the allocators rely on.
    pub fn validate(&self) -> Result<()> {
        let pow2 = [
            ("cluster_block", self.cluster_block),
            ("dirty_sub_block", self.dirty_sub_block),
            ("instance_alignment", self.instance_alignment),
        ];
        for (name, value) in pow2 {
            if !value.is_power_of_two() {
                return Err(StorageError::InvalidSettings(format!(
                    "{name} must be a non-zero power of two, got {value}"
                )));
            }
        }

        if self.dirty_sub_block % 4 != 0 {
            return Err(StorageError::InvalidSettings(
                "dirty_sub_block must be a multiple of 4 bytes".into(),
            ));
        }

        let non_zero = [
            ("primitives_per_meshlet", self.primitives_per_meshlet),
            ("bucket_capacity", self.bucket_capacity),
            ("frames_in_flight", self.frames_in_flight),
            ("visible_set_capacity", self.visible_set_capacity),
            ("max_bones", self.max_bones),
            ("bvh_leaf_size", self.bvh_leaf_size),
            ("max_worker_threads", self.max_worker_threads),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(StorageError::InvalidSettings(format!("{name} must be non-zero")));
            }
        }

        Ok(())
    }

    /// Index count covered by one meshlet.
    #[inline]
    #[must_use]
    pub fn indices_per_meshlet(&self) -> u32 {
        self.primitives_per_meshlet * 3
    }
}

// ---------------------------------------------------------------------------
// DeviceCaps
// ---------------------------------------------------------------------------

/// Snapshot of the device capabilities the storage adapts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCaps {
    /// Descriptor-array indexing: commands are shared across buckets.
    pub bindless: bool,
    /// Hardware ray queries: static geometry gets acceleration structures.
    pub ray_query: bool,
    /// Indirect draws with GPU-side cluster culling.
    pub gpu_cluster_culling: bool,
    /// `min_storage_buffer_offset_alignment` of the device.
    pub min_storage_offset_alignment: u32,
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            bindless: false,
            ray_query: false,
            gpu_cluster_culling: false,
            min_storage_offset_alignment: 256,
        }
    }
}

impl DeviceCaps {
    /// Queries the capability snapshot from a wgpu adapter.
    ///
    /// Ray-query support is left disabled; callers that enable the
    /// experimental feature set `ray_query` themselves.
    #[must_use]
    pub fn from_adapter(adapter: &wgpu::Adapter) -> Self {
        let features = adapter.features();
        let limits = adapter.limits();

        let bindless = features.contains(
            wgpu::Features::TEXTURE_BINDING_ARRAY
                | wgpu::Features::SAMPLED_TEXTURE_AND_STORAGE_BUFFER_ARRAY_NON_UNIFORM_INDEXING,
        );
        let gpu_cluster_culling = features.contains(wgpu::Features::INDIRECT_FIRST_INSTANCE);

        Self {
            bindless,
            ray_query: false,
            gpu_cluster_culling,
            min_storage_offset_alignment: limits.min_storage_buffer_offset_alignment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(StorageSettings::default().validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let s = StorageSettings::from_json_str(r#"{ "bucket_capacity": 8 }"#).unwrap();
        assert_eq!(s.bucket_capacity, 8);
        assert_eq!(s.primitives_per_meshlet, 64);
        assert_eq!(s.visible_set_capacity, 256);
    }

    #[test]
    fn non_power_of_two_block_is_rejected() {
        let err = StorageSettings::from_json_str(r#"{ "cluster_block": 48 }"#).unwrap_err();
        assert!(matches!(err, StorageError::InvalidSettings(_)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = StorageSettings::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, StorageError::SettingsParse(_)));
    }
}
