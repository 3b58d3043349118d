//! # Scoria
//!
//! GPU resource lifetime management: fence-epoch tracking, transient memory,
//! deferred destruction, barrier emission, and frame pacing.
//!
//! Scoria is graphics-API-agnostic. It never talks to a driver itself;
//! everything it needs — buffers, fences, command streams — comes through the
//! [`DeviceBackend`] trait, implemented once by the embedding renderer. What
//! the crate owns is the bookkeeping every renderer otherwise reinvents:
//! proving, via a monotonic fence, when the GPU is done with something, and
//! gating every reuse and destruction on that proof.
//!
//! ## Quick Start
//!
//! ```ignore
//! use scoria::prelude::*;
//!
//! let device = Device::from_backend(renderer_backend);
//! let fence = Fence::new(device.clone())?;
//!
//! let mut heap = MemoryHeap::new(device.clone(), fence.clone(), MemoryHeapDesc::default())?;
//! let mut releases = DeferredReleaseQueue::new(device.clone(), fence.clone());
//! let mut tracker = ResourceTracker::new(device.clone());
//! let mut pacer = FramePacer::new(device, fence, 3)?;
//!
//! loop {
//!     let mut staging = heap.allocate(vertex_bytes.len() as u64, 16)?;
//!     staging.as_slice_mut().copy_from_slice(&vertex_bytes);
//!     pacer.context().upload_buffer(&mut tracker, &staging, 0, vertex_buffer, 0, staging.size());
//!     drop(staging); // retired, reclaimed once the fence passes this frame
//!
//!     pacer.end_frame(&mut [&mut heap, &mut releases])?;
//! }
//! ```
//!
//! ## Overview
//!
//! ### Fence
//!
//! The [`Fence`] is a monotonic 64-bit counter over submitted work. The CPU
//! raises the submitted side once per frame; the GPU raises the completed
//! side asynchronously. Every allocation and release record in the crate is
//! tagged with the submitted value current at its creation, which totally
//! orders them by submission time.
//!
//! ### Transient Memory
//!
//! A [`MemoryHeap`] bump-allocates host-visible upload or readback memory out
//! of fixed-size pages. Individual allocations are never freed; whole pages
//! return to a reuse pool once the fence proves every allocation drawn from
//! them has retired.
//!
//! ### Deferred Destruction
//!
//! A [`DeferredReleaseQueue`] holds native objects (pipelines, textures,
//! acceleration structures) whose destructors cannot run while in-flight
//! commands may still reference them, and destroys each exactly once when its
//! fence tag has completed.
//!
//! ### State Tracking and Barriers
//!
//! A [`ResourceTracker`] caches each resource's current usage state;
//! [`RecordingContext`](command::RecordingContext) derives transition
//! barriers from the cache, recording one exactly when the state actually
//! changes and nothing otherwise.
//!
//! ### Frame Pacing
//!
//! The [`FramePacer`] rotates one recording context per in-flight frame and
//! uses the fence to stall frame `N + k` until frame `k` has retired,
//! bounding the memory held by everything above.

pub mod command;
pub mod device;
pub mod frame;
pub mod heap;
pub mod release;
pub mod sync;
pub mod tracking;
mod utils;

#[cfg(test)]
pub(crate) mod mock;

pub use command::RecordingContext;
pub use device::{Device, DeviceBackend, DeviceError, DeviceResult, HasDevice};
pub use frame::FramePacer;
pub use heap::{Allocation, HeapCreateError, MemoryHeap, MemoryHeapDesc};
pub use release::{DeferredReleaseQueue, ExecuteDeferredReleases};
pub use sync::Fence;
pub use tracking::{ResourceId, ResourceState, ResourceTracker};

pub mod prelude {
    pub use crate::{
        command::RecordingContext,
        device::{
            BufferHandle, Device, DeviceBackend, DeviceError, DeviceResult, FenceHandle,
            HasDevice, MemoryKind, ObjectHandle, StreamHandle,
        },
        frame::FramePacer,
        heap::{Allocation, HeapCreateError, MemoryHeap, MemoryHeapDesc},
        release::{DeferredReleaseQueue, ExecuteDeferredReleases},
        sync::Fence,
        tracking::{BarrierDesc, ResourceId, ResourceKind, ResourceState, ResourceTracker},
    };
}
