//! Command recording with automatic barrier emission.
//!
//! A [`RecordingContext`] wraps one backend command stream and is the only
//! way barriers and transfers enter it. Transition barriers are derived from
//! the cached state in a [`ResourceTracker`]: requesting a state the resource
//! is already in records nothing, and any other request records exactly one
//! barrier and then updates the cache — never the other way around, since a
//! cache that runs ahead of the recorded commands would desynchronize from
//! GPU-visible state.
//!
//! Barrier emission must happen in the same order as the commands that
//! reference the resource; taking the tracker by `&mut` keeps recording
//! single-writer by construction.

use crate::{
    device::{Device, DeviceResult, HasDevice, StreamHandle},
    heap::Allocation,
    tracking::{BarrierDesc, ResourceId, ResourceKind, ResourceState, ResourceTracker},
};

/// Records commands into one backend stream.
///
/// One context exists per in-flight frame slot; the frame pacer closes it at
/// the frame boundary and resets it when the slot comes around again.
pub struct RecordingContext {
    device: Device,
    stream: StreamHandle,
    /// Set once any barrier or transfer has been recorded since the last reset.
    has_pending_work: bool,
}

impl RecordingContext {
    pub fn new(device: Device) -> DeviceResult<Self> {
        let stream = device.create_stream()?;
        Ok(Self {
            device,
            stream,
            has_pending_work: false,
        })
    }

    pub fn stream(&self) -> StreamHandle {
        self.stream
    }

    /// Returns `true` if anything has been recorded since the last reset.
    pub fn has_pending_work(&self) -> bool {
        self.has_pending_work
    }

    /// Transitions a buffer resource, recording a barrier only when the
    /// cached state differs from `new_state`.
    ///
    /// Returns `true` if a barrier was recorded; `false` is the common
    /// "already there" fast path, not an error.
    ///
    /// # Panics
    /// Panics if `id` refers to a texture, or if `new_state` is not valid for
    /// buffers.
    pub fn buffer_barrier(
        &mut self,
        tracker: &mut ResourceTracker,
        id: ResourceId,
        new_state: ResourceState,
    ) -> bool {
        assert_eq!(
            tracker.kind(id),
            ResourceKind::Buffer,
            "buffer_barrier called on a texture resource"
        );
        self.request_transition(tracker, id, new_state)
    }

    /// Transitions a texture resource. See [`buffer_barrier`](Self::buffer_barrier).
    pub fn texture_barrier(
        &mut self,
        tracker: &mut ResourceTracker,
        id: ResourceId,
        new_state: ResourceState,
    ) -> bool {
        assert_eq!(
            tracker.kind(id),
            ResourceKind::Texture,
            "texture_barrier called on a buffer resource"
        );
        self.request_transition(tracker, id, new_state)
    }

    fn request_transition(
        &mut self,
        tracker: &mut ResourceTracker,
        id: ResourceId,
        new_state: ResourceState,
    ) -> bool {
        assert_ne!(
            new_state,
            ResourceState::Undefined,
            "cannot transition a resource back to Undefined"
        );
        let kind = tracker.kind(id);
        assert!(
            new_state.supported_by(kind),
            "resource state {new_state:?} is not supported by {kind:?} resources"
        );
        let current = tracker.state(id);
        if current == new_state {
            return false;
        }
        self.device.record_barrier(
            self.stream,
            BarrierDesc {
                object: tracker.handle(id),
                from: current,
                to: new_state,
            },
        );
        // Only after the barrier is in the stream may the cache move.
        tracker.set_state(id, new_state);
        self.has_pending_work = true;
        true
    }

    /// Records a copy from a transient allocation into a tracked buffer,
    /// transitioning the destination to [`ResourceState::CopyDest`] first if
    /// needed.
    ///
    /// # Panics
    /// Panics if either range is out of bounds, or if `dst` is not a buffer.
    pub fn upload_buffer(
        &mut self,
        tracker: &mut ResourceTracker,
        src: &Allocation,
        src_offset: u64,
        dst: ResourceId,
        dst_offset: u64,
        size: u64,
    ) {
        assert!(
            src_offset.checked_add(size).is_some_and(|end| end <= src.size()),
            "upload source range out of bounds"
        );
        assert!(
            dst_offset
                .checked_add(size)
                .is_some_and(|end| end <= tracker.buffer_size(dst)),
            "upload destination range out of bounds"
        );
        self.buffer_barrier(tracker, dst, ResourceState::CopyDest);
        self.device.record_upload_buffer(
            self.stream,
            src.buffer(),
            src.offset() + src_offset,
            tracker.handle(dst),
            dst_offset,
            size,
        );
        self.has_pending_work = true;
    }

    /// Records a copy from a tracked buffer into a transient readback
    /// allocation, transitioning the source to [`ResourceState::CopySource`]
    /// first if needed. The allocation's contents are valid once the frame's
    /// fence value has completed.
    ///
    /// # Panics
    /// Panics if either range is out of bounds, or if `src` is not a buffer.
    pub fn readback_buffer(
        &mut self,
        tracker: &mut ResourceTracker,
        src: ResourceId,
        src_offset: u64,
        dst: &Allocation,
        dst_offset: u64,
        size: u64,
    ) {
        assert!(
            src_offset
                .checked_add(size)
                .is_some_and(|end| end <= tracker.buffer_size(src)),
            "readback source range out of bounds"
        );
        assert!(
            dst_offset.checked_add(size).is_some_and(|end| end <= dst.size()),
            "readback destination range out of bounds"
        );
        self.buffer_barrier(tracker, src, ResourceState::CopySource);
        self.device.record_readback_buffer(
            self.stream,
            tracker.handle(src),
            src_offset,
            dst.buffer(),
            dst.offset() + dst_offset,
            size,
        );
        self.has_pending_work = true;
    }

    /// Closes the stream for submission.
    pub fn close(&mut self) -> DeviceResult<()> {
        self.device.close_stream(self.stream)
    }

    /// Resets the stream for reuse once its prior submission has retired.
    pub fn reset(&mut self) -> DeviceResult<()> {
        self.device.reset_stream(self.stream)?;
        self.has_pending_work = false;
        Ok(())
    }
}

impl HasDevice for RecordingContext {
    fn device(&self) -> &Device {
        &self.device
    }
}

impl Drop for RecordingContext {
    fn drop(&mut self) {
        self.device.destroy_stream(self.stream);
    }
}
