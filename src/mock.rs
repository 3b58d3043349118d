//! An in-memory [`DeviceBackend`] for tests.
//!
//! Fence progress is scripted: the GPU never advances on its own, tests call
//! [`complete_to`](MockDevice::complete_to) to simulate it. Waits are recorded
//! rather than slept on, and [`fail_waits`](MockDevice::fail_waits) turns
//! them into device-loss errors. Recorded commands and destroyed handles are
//! kept for assertions.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{
    device::{
        BufferHandle, DeviceBackend, DeviceError, DeviceResult, FenceHandle, MemoryKind,
        ObjectHandle, StreamHandle,
    },
    tracking::BarrierDesc,
};

/// One recorded stream command.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MockCommand {
    Barrier(BarrierDesc),
    Upload {
        src: BufferHandle,
        src_offset: u64,
        dst: ObjectHandle,
        dst_offset: u64,
        size: u64,
    },
    Readback {
        src: ObjectHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    },
}

struct MockBuffer {
    /// Backing storage; the heap data pointer stays stable across map moves.
    data: Box<[u8]>,
    kind: MemoryKind,
    mapped: bool,
}

#[derive(Default)]
struct MockFence {
    submitted: u64,
    completed: u64,
    waits: Vec<u64>,
}

#[derive(Default)]
struct MockStream {
    commands: Vec<MockCommand>,
    closed: bool,
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    buffers: HashMap<u64, MockBuffer>,
    buffers_created: u64,
    buffers_destroyed: u64,
    destroyed_objects: Vec<ObjectHandle>,
    fences: HashMap<u64, MockFence>,
    fail_waits: bool,
    streams: HashMap<u64, MockStream>,
    submissions: Vec<StreamHandle>,
}

impl MockState {
    fn mint(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

#[derive(Clone)]
pub struct MockDevice(Arc<Mutex<MockState>>);

impl MockDevice {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(MockState::default())))
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.0.lock().unwrap()
    }

    /// Advances the scripted GPU to `value` on the given fence.
    pub fn complete_to(&self, fence: FenceHandle, value: u64) {
        let mut state = self.state();
        let fence = state.fences.get_mut(&fence.0).unwrap();
        assert!(
            value <= fence.submitted,
            "cannot complete a value that was never signaled"
        );
        fence.completed = fence.completed.max(value);
    }

    /// Every value the host has blocked on for this fence, in order.
    pub fn waits(&self, fence: FenceHandle) -> Vec<u64> {
        self.state().fences[&fence.0].waits.clone()
    }

    /// When set, every subsequent wait fails with [`DeviceError::Lost`].
    pub fn fail_waits(&self, fail: bool) {
        self.state().fail_waits = fail;
    }

    pub fn destroyed_objects(&self) -> Vec<ObjectHandle> {
        self.state().destroyed_objects.clone()
    }

    pub fn buffers_created(&self) -> u64 {
        self.state().buffers_created
    }

    pub fn buffers_destroyed(&self) -> u64 {
        self.state().buffers_destroyed
    }

    pub fn buffer_size(&self, buffer: BufferHandle) -> u64 {
        self.state().buffers[&buffer.0].data.len() as u64
    }

    /// Snapshot of a live buffer's bytes.
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Vec<u8> {
        self.state().buffers[&buffer.0].data.to_vec()
    }

    /// The barriers recorded into a stream, in order.
    pub fn barriers(&self, stream: StreamHandle) -> Vec<BarrierDesc> {
        self.commands(stream)
            .into_iter()
            .filter_map(|command| match command {
                MockCommand::Barrier(barrier) => Some(barrier),
                _ => None,
            })
            .collect()
    }

    /// Everything recorded into a stream, in order.
    pub fn commands(&self, stream: StreamHandle) -> Vec<MockCommand> {
        self.state().streams[&stream.0].commands.clone()
    }

    /// Streams submitted for execution, in order.
    pub fn submissions(&self) -> Vec<StreamHandle> {
        self.state().submissions.clone()
    }
}

impl DeviceBackend for MockDevice {
    fn create_buffer(&self, size: u64, kind: MemoryKind) -> DeviceResult<BufferHandle> {
        let mut state = self.state();
        let handle = state.mint();
        state.buffers.insert(
            handle,
            MockBuffer {
                data: vec![0u8; size as usize].into_boxed_slice(),
                kind,
                mapped: false,
            },
        );
        state.buffers_created += 1;
        Ok(BufferHandle(handle))
    }

    fn map_buffer(&self, buffer: BufferHandle) -> DeviceResult<*mut u8> {
        let mut state = self.state();
        let buffer = state.buffers.get_mut(&buffer.0).unwrap();
        assert!(
            buffer.kind.is_host_visible(),
            "mapped a non-host-visible buffer"
        );
        assert!(!buffer.mapped, "buffer is already mapped");
        buffer.mapped = true;
        Ok(buffer.data.as_mut_ptr())
    }

    fn unmap_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state();
        let buffer = state.buffers.get_mut(&buffer.0).unwrap();
        assert!(buffer.mapped, "unmapped a buffer that was not mapped");
        buffer.mapped = false;
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state();
        let removed = state.buffers.remove(&buffer.0);
        assert!(removed.is_some(), "destroyed an unknown buffer");
        state.buffers_destroyed += 1;
    }

    fn destroy_object(&self, object: ObjectHandle) {
        let mut state = self.state();
        assert!(
            !state.destroyed_objects.contains(&object),
            "object destroyed twice"
        );
        state.destroyed_objects.push(object);
    }

    fn create_fence(&self) -> DeviceResult<FenceHandle> {
        let mut state = self.state();
        let handle = state.mint();
        state.fences.insert(handle, MockFence::default());
        Ok(FenceHandle(handle))
    }

    fn signal_fence(&self, fence: FenceHandle, value: u64) -> DeviceResult<()> {
        let mut state = self.state();
        let fence = state.fences.get_mut(&fence.0).unwrap();
        assert!(value > fence.submitted, "fence values must increase");
        fence.submitted = value;
        Ok(())
    }

    fn fence_completed_value(&self, fence: FenceHandle) -> u64 {
        self.state().fences[&fence.0].completed
    }

    fn wait_fence(&self, fence: FenceHandle, value: u64) -> DeviceResult<()> {
        let mut state = self.state();
        if state.fail_waits {
            return Err(DeviceError::Lost);
        }
        let fence = state.fences.get_mut(&fence.0).unwrap();
        assert!(
            value <= fence.submitted,
            "waited on a value that was never signaled"
        );
        fence.waits.push(value);
        // The scripted GPU reaches the value instead of hanging the test.
        fence.completed = fence.completed.max(value);
        Ok(())
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        let removed = self.state().fences.remove(&fence.0);
        assert!(removed.is_some(), "destroyed an unknown fence");
    }

    fn create_stream(&self) -> DeviceResult<StreamHandle> {
        let mut state = self.state();
        let handle = state.mint();
        state.streams.insert(handle, MockStream::default());
        Ok(StreamHandle(handle))
    }

    fn record_barrier(&self, stream: StreamHandle, barrier: BarrierDesc) {
        self.record(stream, MockCommand::Barrier(barrier));
    }

    fn record_upload_buffer(
        &self,
        stream: StreamHandle,
        src: BufferHandle,
        src_offset: u64,
        dst: ObjectHandle,
        dst_offset: u64,
        size: u64,
    ) {
        self.record(
            stream,
            MockCommand::Upload {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            },
        );
    }

    fn record_readback_buffer(
        &self,
        stream: StreamHandle,
        src: ObjectHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    ) {
        self.record(
            stream,
            MockCommand::Readback {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            },
        );
    }

    fn close_stream(&self, stream: StreamHandle) -> DeviceResult<()> {
        let mut state = self.state();
        let stream = state.streams.get_mut(&stream.0).unwrap();
        assert!(!stream.closed, "stream closed twice");
        stream.closed = true;
        Ok(())
    }

    fn reset_stream(&self, stream: StreamHandle) -> DeviceResult<()> {
        let mut state = self.state();
        let stream = state.streams.get_mut(&stream.0).unwrap();
        stream.commands.clear();
        stream.closed = false;
        Ok(())
    }

    fn submit_stream(&self, stream: StreamHandle) -> DeviceResult<()> {
        let mut state = self.state();
        assert!(
            state.streams[&stream.0].closed,
            "submitted a stream that was not closed"
        );
        state.submissions.push(stream);
        Ok(())
    }

    fn destroy_stream(&self, stream: StreamHandle) {
        let removed = self.state().streams.remove(&stream.0);
        assert!(removed.is_some(), "destroyed an unknown stream");
    }
}

impl MockDevice {
    fn record(&self, stream: StreamHandle, command: MockCommand) {
        let mut state = self.state();
        let stream = state.streams.get_mut(&stream.0).unwrap();
        assert!(!stream.closed, "recorded into a closed stream");
        stream.commands.push(command);
    }
}
