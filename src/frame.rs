//! Frame pacing.
//!
//! The [`FramePacer`] bounds how far the CPU may run ahead of the GPU. It
//! owns one [`RecordingContext`] per in-flight frame slot and a shared
//! [`Fence`]; each [`end_frame`](FramePacer::end_frame) submits the current
//! slot and signals the fence, and — once more than `frames_in_flight` values
//! would be outstanding — blocks first until the oldest one completes. That
//! wait is the only blocking call in ordinary per-frame operation, and it is
//! what keeps command contexts, heap pages, and deferred queues from growing
//! without bound.
//!
//! Reclamation is driven from the same place. Every registered
//! [`ExecuteDeferredReleases`] participant is polled once per `end_frame`,
//! right after the signal, so heaps and release queues observe fence progress
//! exactly as often as frames are produced.

use smallvec::SmallVec;

use crate::{
    command::RecordingContext,
    device::{Device, DeviceResult, HasDevice},
    release::ExecuteDeferredReleases,
    sync::Fence,
};

/// Bounds the number of frames in flight and drives per-frame reclamation.
pub struct FramePacer {
    device: Device,
    fence: Fence,
    frames: SmallVec<[RecordingContext; 3]>,
    current: usize,
}

impl FramePacer {
    /// Creates a pacer with `frames_in_flight` slots.
    ///
    /// # Panics
    /// Panics if `frames_in_flight` is zero.
    pub fn new(device: Device, fence: Fence, frames_in_flight: u32) -> DeviceResult<Self> {
        assert!(frames_in_flight > 0, "at least one frame must be in flight");
        let mut frames = SmallVec::new();
        for _ in 0..frames_in_flight {
            frames.push(RecordingContext::new(device.clone())?);
        }
        Ok(Self {
            device,
            fence,
            frames,
            current: 0,
        })
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    /// The recording context for the frame currently being built.
    pub fn context(&mut self) -> &mut RecordingContext {
        &mut self.frames[self.current]
    }

    /// Finishes the current frame: submits its commands, rotates to the next
    /// slot, and signals the fence.
    ///
    /// Blocks first if signaling this frame would leave more than
    /// `frames_in_flight` fence values outstanding — with `N` slots, the
    /// `N+1`-th call waits for value `1`. After the signal, every entry in
    /// `releases` is polled once. Returns the fence value signaled for the
    /// submitted frame.
    pub fn end_frame(
        &mut self,
        releases: &mut [&mut dyn ExecuteDeferredReleases],
    ) -> DeviceResult<u64> {
        let limit = self.frames.len() as u64;
        let next = self.fence.submitted_value() + 1;
        if next > limit {
            self.fence.wait(next - limit)?;
        }

        let context = &mut self.frames[self.current];
        context.close()?;
        self.device.submit_stream(context.stream())?;

        self.current = (self.current + 1) % self.frames.len();
        self.frames[self.current].reset()?;

        let value = self.fence.signal()?;
        debug_assert_eq!(value, next);
        for participant in releases.iter_mut() {
            participant.execute_deferred_releases();
        }
        Ok(value)
    }
}

impl HasDevice for FramePacer {
    fn device(&self) -> &Device {
        &self.device
    }
}
