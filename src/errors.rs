//! Error Types
//!
//! This module defines the error types used by the storage core.
//!
//! # Overview
//!
//! Per-frame operations (allocation, mutation, commit, visibility) never
//! return errors: failures are absorbed locally and degrade to "object not
//! drawn". [`StorageError`] only covers the fallible *setup* paths:
//! - Settings loading and validation
//! - GPU adapter / device acquisition
//!
//! # Usage
//!
//! ```rust,ignore
//! use drawstore::errors::{StorageError, Result};
//!
//! fn load() -> Result<StorageSettings> {
//!     StorageSettings::load("storage.json")
//! }
//! ```

use thiserror::Error;

/// The main error type for the storage core.
#[derive(Error, Debug)]
pub enum StorageError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Settings file could not be read.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Settings JSON could not be parsed.
    #[error("Settings parse error: {0}")]
    SettingsParse(#[from] serde_json::Error),

    /// Settings parsed but violate a structural requirement.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    // ========================================================================
    // GPU Errors
    // ========================================================================
    /// Failed to request a compatible GPU adapter.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// Failed to create the GPU device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),
}

/// Alias for `Result<T, StorageError>`.
pub type Result<T> = std::result::Result<T, StorageError>;
