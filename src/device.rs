//! Device abstraction.
//!
//! This crate manages GPU resource lifetimes but does not talk to a graphics
//! API itself. Everything it needs from the driver — buffer creation and
//! mapping, the fence primitive, command streams, and object destruction —
//! is expressed through the [`DeviceBackend`] trait, and a backend is
//! supplied by the embedding renderer.
//!
//! # Key Types
//!
//! - [`DeviceBackend`]: the object-safe trait a renderer implements once per
//!   graphics API.
//! - [`Device`]: a cheap-clone handle over a backend, passed by value into
//!   everything created from it.
//! - [`HasDevice`]: implemented by types created from a device.
//! - [`BufferHandle`], [`ObjectHandle`], [`FenceHandle`], [`StreamHandle`]:
//!   opaque tokens minted by the backend. The crate never interprets their
//!   bits; it only passes them back into backend calls.

use std::{fmt::Debug, ops::Deref, sync::Arc};

use crate::tracking::BarrierDesc;

/// Errors surfaced by device-level operations.
///
/// Both variants are fatal to the device: callers are expected to tear the
/// device down rather than retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// The device connection was lost. Returned by [`crate::sync::Fence::wait`]
    /// when the awaited value will never be signaled (device removed).
    #[error("the device connection was lost")]
    Lost,
    /// The device could not satisfy an allocation request.
    #[error("the device is out of memory")]
    OutOfMemory,
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// A native buffer created through [`DeviceBackend::create_buffer`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BufferHandle(pub u64);

/// Any other native object (pipeline, texture, acceleration structure, shader
/// program) whose destruction must be deferred until the GPU is done with it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ObjectHandle(pub u64);

/// A native fence created through [`DeviceBackend::create_fence`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FenceHandle(pub u64);

/// A native command-recording stream.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct StreamHandle(pub u64);

/// The memory type a buffer is placed in.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MemoryKind {
    /// GPU-only memory, not mappable from the host.
    DeviceLocal,
    /// Host-visible write-combined memory for CPU → GPU transfers.
    Upload,
    /// Host-visible cached memory for GPU → CPU transfers.
    Readback,
}

impl MemoryKind {
    /// Returns `true` if buffers of this kind can be mapped on the host.
    pub fn is_host_visible(self) -> bool {
        matches!(self, MemoryKind::Upload | MemoryKind::Readback)
    }
}

/// The driver-facing surface consumed by this crate.
///
/// All methods are called from a single submission thread. Backends must be
/// `Send + Sync` only because the handles that hold them are shared by
/// cheap-clone wrappers; no method is ever invoked concurrently by this crate.
///
/// Creation failures are fatal ([`DeviceError`]); destruction cannot fail and
/// is called exactly once per created handle.
pub trait DeviceBackend: Send + Sync + 'static {
    /// Creates a buffer of `size` bytes in the given memory kind.
    fn create_buffer(&self, size: u64, kind: MemoryKind) -> DeviceResult<BufferHandle>;
    /// Maps a host-visible buffer, returning a pointer valid until
    /// [`unmap_buffer`](Self::unmap_buffer) or destruction.
    fn map_buffer(&self, buffer: BufferHandle) -> DeviceResult<*mut u8>;
    fn unmap_buffer(&self, buffer: BufferHandle);
    fn destroy_buffer(&self, buffer: BufferHandle);

    /// Destroys a native object. Invoked exactly once per object, and only
    /// after the fence has proven the GPU no longer references it.
    fn destroy_object(&self, object: ObjectHandle);

    fn create_fence(&self) -> DeviceResult<FenceHandle>;
    /// Enqueues a GPU-side signal of the fence to `value`. Values are
    /// monotonically increasing; the backend observes them in order.
    fn signal_fence(&self, fence: FenceHandle, value: u64) -> DeviceResult<()>;
    /// Returns the greatest value the device has finished.
    fn fence_completed_value(&self, fence: FenceHandle) -> u64;
    /// Blocks the calling thread until the fence completes `value`.
    /// Failure means the device was lost; the wait is never retried.
    fn wait_fence(&self, fence: FenceHandle, value: u64) -> DeviceResult<()>;
    fn destroy_fence(&self, fence: FenceHandle);

    fn create_stream(&self) -> DeviceResult<StreamHandle>;
    /// Records one transition barrier into the stream.
    fn record_barrier(&self, stream: StreamHandle, barrier: BarrierDesc);
    /// Records a copy from a host-visible buffer into a native buffer object.
    fn record_upload_buffer(
        &self,
        stream: StreamHandle,
        src: BufferHandle,
        src_offset: u64,
        dst: ObjectHandle,
        dst_offset: u64,
        size: u64,
    );
    /// Records a copy from a native buffer object into a host-visible buffer.
    fn record_readback_buffer(
        &self,
        stream: StreamHandle,
        src: ObjectHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    );
    /// Closes the stream for submission. No further recording until reset.
    fn close_stream(&self, stream: StreamHandle) -> DeviceResult<()>;
    /// Resets a previously closed stream so it can be recorded into again.
    fn reset_stream(&self, stream: StreamHandle) -> DeviceResult<()>;
    /// Submits a closed stream for execution.
    fn submit_stream(&self, stream: StreamHandle) -> DeviceResult<()>;
    fn destroy_stream(&self, stream: StreamHandle);
}

/// A cheap-clone handle over a [`DeviceBackend`].
///
/// Everything created from a device holds a clone of this handle, keeping the
/// backend alive for as long as any resource refers to it. Equality is
/// identity: two handles are equal if they wrap the same backend instance.
#[derive(Clone)]
pub struct Device(Arc<dyn DeviceBackend>);

impl Device {
    pub fn new(backend: Arc<dyn DeviceBackend>) -> Self {
        Self(backend)
    }

    pub fn from_backend(backend: impl DeviceBackend) -> Self {
        Self(Arc::new(backend))
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        // Compare the data pointers only; vtable pointers are not stable.
        std::ptr::eq(
            Arc::as_ptr(&self.0) as *const (),
            Arc::as_ptr(&other.0) as *const (),
        )
    }
}
impl Eq for Device {}

impl Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Device")
            .field(&(Arc::as_ptr(&self.0) as *const ()))
            .finish()
    }
}

impl Deref for Device {
    type Target = dyn DeviceBackend;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

/// A trait for types created from a device.
pub trait HasDevice {
    /// Returns the device this object was created from.
    fn device(&self) -> &Device;
}
