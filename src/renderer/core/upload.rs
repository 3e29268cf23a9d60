//! Background upload thread.
//!
//! Patch assembly happens on the frame-preparation thread; the device writes
//! run here. Jobs are queued per frame-in-flight slot and the worker is woken
//! through a condition variable. Submitting to a slot first waits until the
//! previous upload for that slot has finished, so staging data for frame N is
//! never overwritten while frame N - `frames_in_flight` is still uploading.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use super::patch::Patch;
use super::resident::SharedBuffer;

/// One patch destined for one resident buffer.
pub struct UploadJob {
    pub target: SharedBuffer,
    pub patch: Patch,
}

/// Jobs submitted together for one frame, usually one per byte arena.
pub type UploadBatch = smallvec::SmallVec<[UploadJob; 2]>;

#[derive(Default)]
struct Slot {
    jobs: UploadBatch,
    busy: bool,
}

struct UploadState {
    slots: Vec<Slot>,
    ready: VecDeque<usize>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<UploadState>,
    work: Condvar,
    done: Condvar,
}

impl Shared {
    fn slot_idle(state: &UploadState, frame: usize) -> bool {
        let slot = &state.slots[frame];
        slot.jobs.is_empty() && !slot.busy
    }
}

pub struct UploadWorker {
    shared: Arc<Shared>,
    frames_in_flight: usize,
    thread: Option<JoinHandle<()>>,
}

impl UploadWorker {
    /// Starts the upload thread. If the thread cannot be spawned, uploads run
    /// inline on the submitting thread.
    #[must_use]
    pub fn new(frames_in_flight: u32) -> Self {
        let frames_in_flight = frames_in_flight.max(1) as usize;
        let shared = Arc::new(Shared {
            state: Mutex::new(UploadState {
                slots: (0..frames_in_flight).map(|_| Slot::default()).collect(),
                ready: VecDeque::new(),
                shutdown: false,
            }),
            work: Condvar::new(),
            done: Condvar::new(),
        });

        let worker_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name("drawstore-upload".into())
            .spawn(move || Self::run(&worker_shared));

        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::warn!("Failed to spawn upload thread, uploading inline: {}", e);
                None
            }
        };

        Self {
            shared,
            frames_in_flight,
            thread,
        }
    }

    /// Uploads on the calling thread only.
    #[must_use]
    pub fn inline(frames_in_flight: u32) -> Self {
        let frames_in_flight = frames_in_flight.max(1) as usize;
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(UploadState {
                    slots: (0..frames_in_flight).map(|_| Slot::default()).collect(),
                    ready: VecDeque::new(),
                    shutdown: true,
                }),
                work: Condvar::new(),
                done: Condvar::new(),
            }),
            frames_in_flight,
            thread: None,
        }
    }

    #[must_use]
    pub fn is_threaded(&self) -> bool {
        self.thread.is_some()
    }

    /// Queues `jobs` for frame slot `frame` and wakes the worker.
    pub fn submit(&self, frame: usize, jobs: UploadBatch) {
        if jobs.is_empty() {
            return;
        }
        let frame = frame % self.frames_in_flight;

        if self.thread.is_none() {
            for job in jobs {
                job.target.lock().scatter(frame, &job.patch);
            }
            return;
        }

        let mut state = self.shared.state.lock();
        while !Shared::slot_idle(&state, frame) {
            self.shared.done.wait(&mut state);
        }
        state.slots[frame].jobs = jobs;
        state.ready.push_back(frame);
        drop(state);

        self.shared.work.notify_one();
    }

    /// Blocks until the uploads queued for `frame` have been written.
    pub fn wait_frame(&self, frame: usize) {
        let frame = frame % self.frames_in_flight;
        let mut state = self.shared.state.lock();
        while !Shared::slot_idle(&state, frame) {
            self.shared.done.wait(&mut state);
        }
    }

    /// Blocks until every queued upload has been written.
    pub fn wait_idle(&self) {
        for frame in 0..self.frames_in_flight {
            self.wait_frame(frame);
        }
    }

    fn run(shared: &Shared) {
        loop {
            let (frame, jobs) = {
                let mut state = shared.state.lock();
                while state.ready.is_empty() && !state.shutdown {
                    shared.work.wait(&mut state);
                }
                let Some(frame) = state.ready.pop_front() else {
                    return;
                };
                let slot = &mut state.slots[frame];
                slot.busy = true;
                (frame, std::mem::take(&mut slot.jobs))
            };

            for job in &jobs {
                job.target.lock().scatter(frame, &job.patch);
            }

            let mut state = shared.state.lock();
            state.slots[frame].busy = false;
            drop(state);
            shared.done.notify_all();
        }
    }
}

impl Drop for UploadWorker {
    fn drop(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        self.shared.state.lock().shutdown = true;
        self.shared.work.notify_all();
        if handle.join().is_err() {
            log::error!("Upload thread panicked");
        }
    }
}
