//! Sparse element updates for resident buffers.
//!
//! A patch is a list of element indices plus their packed payload; the GPU
//! scatter pass writes `payload[i]` to `dst[indices[i]]`.

use super::dirty::DirtyBits;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
    /// Element size in bytes. Always a multiple of 4.
    pub stride: u32,
    pub indices: Vec<u32>,
    pub payload: Vec<u8>,
}

impl Patch {
    #[must_use]
    pub fn new(stride: u32) -> Self {
        debug_assert!(stride > 0 && stride % 4 == 0, "patch stride must be a positive multiple of 4");
        Self {
            stride,
            indices: Vec::new(),
            payload: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Appends one element. `bytes` must be exactly `stride` long.
    pub fn push(&mut self, index: u32, bytes: &[u8]) {
        debug_assert_eq!(bytes.len(), self.stride as usize);
        self.indices.push(index);
        self.payload.extend_from_slice(bytes);
    }

    /// Drains `dirty` and copies every marked element of `data` into a patch.
    ///
    /// Returns `None` when nothing was marked.
    pub fn gather(dirty: &mut DirtyBits, data: &[u8], stride: u32) -> Option<Self> {
        let runs = dirty.drain_runs();
        if runs.is_empty() {
            return None;
        }

        let count: u32 = runs.iter().map(|r| r.end - r.start).sum();
        let mut patch = Self::new(stride);
        patch.indices.reserve(count as usize);
        patch.payload.reserve((count * stride) as usize);

        let stride = stride as usize;
        for run in runs {
            let bytes = &data[run.start as usize * stride..run.end as usize * stride];
            patch.indices.extend(run.clone());
            patch.payload.extend_from_slice(bytes);
        }

        Some(patch)
    }

    /// Header words uploaded alongside the payload: `[count, stride_words, indices...]`.
    #[must_use]
    pub fn header(&self) -> Vec<u32> {
        let mut header = Vec::with_capacity(self.indices.len() + 2);
        header.push(self.indices.len() as u32);
        header.push(self.stride / 4);
        header.extend_from_slice(&self.indices);
        header
    }

    /// CPU reference of the scatter pass.
    pub fn apply(&self, dst: &mut [u8]) {
        let stride = self.stride as usize;
        for (i, &index) in self.indices.iter().enumerate() {
            let at = index as usize * stride;
            if at + stride > dst.len() {
                log::warn!("Patch element {} lies outside the {}-byte target, skipped", index, dst.len());
                continue;
            }
            dst[at..at + stride].copy_from_slice(&self.payload[i * stride..(i + 1) * stride]);
        }
    }
}
