//! Frame-in-flight pacing.

/// The present/frame-advance signal handed to the storage each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameSignal {
    /// Frame-in-flight slot, `tick % frames_in_flight`.
    pub frame_index: usize,
    /// Monotonic frame counter.
    pub tick: u64,
}

/// Counts frames and maps them onto frame-in-flight slots.
///
/// With `frames_in_flight > 1`, consecutive frames never share a slot, so
/// CPU writes for frame N + 1 cannot alias buffers the GPU is still reading
/// for frame N.
#[derive(Debug, Clone)]
pub struct FrameClock {
    frames_in_flight: u32,
    tick: u64,
}

impl FrameClock {
    #[must_use]
    pub fn new(frames_in_flight: u32) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            tick: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn frames_in_flight(&self) -> u32 {
        self.frames_in_flight
    }

    #[inline]
    #[must_use]
    pub fn frame_index(&self) -> usize {
        (self.tick % u64::from(self.frames_in_flight)) as usize
    }

    #[inline]
    #[must_use]
    pub fn signal(&self) -> FrameSignal {
        FrameSignal {
            frame_index: self.frame_index(),
            tick: self.tick,
        }
    }

    /// Moves to the next frame and returns its signal.
    pub fn advance(&mut self) -> FrameSignal {
        self.tick += 1;
        self.signal()
    }

    /// Adopts the tick of an external frame signal.
    pub fn sync(&mut self, signal: FrameSignal) {
        self.tick = signal.tick;
        debug_assert_eq!(self.frame_index(), signal.frame_index % self.frames_in_flight as usize);
    }
}
