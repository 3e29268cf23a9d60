//! wgpu Resident Buffers
//!
//! Storage buffers updated by a compute scatter pass. Each buffer keeps one
//! patch staging slot per frame in flight, so the upload for frame N never
//! overwrites header/payload data the GPU may still be reading for frame
//! N - `frames_in_flight`.

use std::borrow::Cow;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use wgpu::util::DeviceExt;

use super::patch::Patch;
use super::resident::{BufferRole, GpuBackend, ResidentBuffer, SharedBuffer, generate_resource_id};
use crate::errors::{Result, StorageError};
use crate::settings::{DeviceCaps, StorageSettings};

const SCATTER_WORKGROUP_SIZE: u32 = 64;
const MAX_SCATTER_WORKGROUPS: u32 = 1024;
/// wgpu rejects zero-sized storage bindings.
const MIN_BUFFER_SIZE: u64 = 16;

// ============================================================================
// Scatter pipeline
// ============================================================================

struct ScatterPipeline {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

impl ScatterPipeline {
    fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Patch Scatter Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("../shaders/scatter.wgsl"))),
        });

        let storage_entry = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Patch Scatter Layout"),
            entries: &[storage_entry(0, true), storage_entry(1, true), storage_entry(2, false)],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Patch Scatter Pipeline Layout"),
            bind_group_layouts: &[Some(&layout)],
            immediate_size: 0,
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Patch Scatter Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        Self { pipeline, layout }
    }
}

// ============================================================================
// Per-frame staging
// ============================================================================

struct PatchStaging {
    header: wgpu::Buffer,
    payload: wgpu::Buffer,
}

impl PatchStaging {
    fn new(device: &wgpu::Device, label: &str, header_size: u64, payload_size: u64) -> Self {
        let usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;
        let header = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{label} Patch Header")),
            size: header_size.next_power_of_two().max(MIN_BUFFER_SIZE),
            usage,
            mapped_at_creation: false,
        });
        let payload = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{label} Patch Payload")),
            size: payload_size.next_power_of_two().max(MIN_BUFFER_SIZE),
            usage,
            mapped_at_creation: false,
        });
        Self { header, payload }
    }

    fn fits(&self, header_size: u64, payload_size: u64) -> bool {
        self.header.size() >= header_size && self.payload.size() >= payload_size
    }
}

// ============================================================================
// WgpuResidentBuffer
// ============================================================================

/// A device storage buffer updated by whole reallocation or scatter patches.
pub struct WgpuResidentBuffer {
    label: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
    scatter: Arc<ScatterPipeline>,
    usage: wgpu::BufferUsages,
    buffer: wgpu::Buffer,
    resource_id: u64,
    staging: Vec<Option<PatchStaging>>,
}

impl WgpuResidentBuffer {
    /// The current device allocation.
    #[must_use]
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl ResidentBuffer for WgpuResidentBuffer {
    fn size(&self) -> u64 {
        self.buffer.size()
    }

    fn resource_id(&self) -> u64 {
        self.resource_id
    }

    fn reallocate(&mut self, contents: &[u8]) {
        log::debug!("Reallocating resident buffer {:?}: {} -> {} bytes", self.label, self.buffer.size(), contents.len());

        self.buffer = if contents.is_empty() {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&self.label),
                size: MIN_BUFFER_SIZE,
                usage: self.usage,
                mapped_at_creation: false,
            })
        } else {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&self.label),
                contents,
                usage: self.usage,
            })
        };
        self.resource_id = generate_resource_id();
    }

    fn scatter(&mut self, frame: usize, patch: &Patch) {
        if patch.is_empty() {
            return;
        }

        let header = patch.header();
        let header_bytes: &[u8] = bytemuck::cast_slice(&header);
        let header_size = header_bytes.len() as u64;
        let payload_size = patch.payload.len() as u64;

        let slot = frame % self.staging.len();
        let fits = self.staging[slot].as_ref().is_some_and(|s| s.fits(header_size, payload_size));
        if !fits {
            self.staging[slot] = Some(PatchStaging::new(&self.device, &self.label, header_size, payload_size));
        }
        let Some(staging) = self.staging[slot].as_ref() else {
            return;
        };

        self.queue.write_buffer(&staging.header, 0, header_bytes);
        self.queue.write_buffer(&staging.payload, 0, &patch.payload);

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Patch Scatter BindGroup"),
            layout: &self.scatter.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: staging.header.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: staging.payload.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.buffer.as_entire_binding(),
                },
            ],
        });

        let words = (patch.payload.len() / 4) as u32;
        let groups = words.div_ceil(SCATTER_WORKGROUP_SIZE).clamp(1, MAX_SCATTER_WORKGROUPS);

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Patch Scatter Encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Patch Scatter Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.scatter.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups, 1, 1);
        }
        self.queue.submit(Some(encoder.finish()));
    }
}

// ============================================================================
// WgpuBackend
// ============================================================================

/// Creates [`WgpuResidentBuffer`]s on one device.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    scatter: Arc<ScatterPipeline>,
    frames_in_flight: usize,
    buffers: Mutex<FxHashMap<String, Arc<Mutex<WgpuResidentBuffer>>>>,
}

impl WgpuBackend {
    #[must_use]
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, frames_in_flight: u32) -> Self {
        let scatter = Arc::new(ScatterPipeline::new(&device));
        Self {
            device,
            queue,
            scatter,
            frames_in_flight: frames_in_flight.max(1) as usize,
            buffers: Mutex::new(FxHashMap::default()),
        }
    }

    /// Requests a headless adapter and device and queries its capabilities.
    pub async fn request(settings: &StorageSettings) -> Result<(Self, DeviceCaps)> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| StorageError::AdapterRequestFailed(e.to_string()))?;

        let caps = DeviceCaps::from_adapter(&adapter);
        let mut required_features = wgpu::Features::empty();
        if caps.gpu_cluster_culling {
            required_features |= wgpu::Features::INDIRECT_FIRST_INSTANCE;
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("drawstore"),
                required_features,
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await?;

        log::info!("Storage device ready: {:?}", caps);
        Ok((Self::new(device, queue, settings.frames_in_flight), caps))
    }

    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// The buffer created under `label`, for binding in render passes.
    #[must_use]
    pub fn buffer(&self, label: &str) -> Option<Arc<Mutex<WgpuResidentBuffer>>> {
        self.buffers.lock().get(label).cloned()
    }
}

impl GpuBackend for WgpuBackend {
    fn create_buffer(&self, label: &str, role: BufferRole) -> SharedBuffer {
        let usage = role.usage();
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: MIN_BUFFER_SIZE,
            usage,
            mapped_at_creation: false,
        });

        let resident = Arc::new(Mutex::new(WgpuResidentBuffer {
            label: label.to_string(),
            device: self.device.clone(),
            queue: self.queue.clone(),
            scatter: self.scatter.clone(),
            usage,
            buffer,
            resource_id: generate_resource_id(),
            staging: (0..self.frames_in_flight).map(|_| None).collect(),
        }));

        self.buffers.lock().insert(label.to_string(), resident.clone());
        resident
    }
}
