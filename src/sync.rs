//! Host-observable GPU progress.
//!
//! The [`Fence`] is a monotonically increasing 64-bit counter over the
//! submitted command timeline. The CPU advances the **submitted** side with
//! [`signal`](Fence::signal), once per unit of work whose completion must
//! later be detectable (typically once per frame). The GPU advances the
//! **completed** side asynchronously; [`completed_value`](Fence::completed_value)
//! queries it and [`wait`](Fence::wait) blocks on it.
//!
//! Invariants: `completed_value() <= submitted_value()` at all times, and both
//! are monotonically non-decreasing. Every allocation and deferred-release
//! record in this crate is tagged with `submitted_value()` at creation, so
//! records are totally ordered by submission time — the property that lets
//! the release queues poll only their front entry.
//!
//! # Cached Completed Value
//!
//! The completed value is cached in an [`AtomicU64`] and raised with
//! `fetch_max`, so repeated polling does not regress even if the backend
//! returns stale answers, and an already-satisfied [`wait`](Fence::wait)
//! returns without a device call.

use std::{
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::device::{Device, DeviceResult, FenceHandle, HasDevice};

/// A monotonic completion counter for submitted GPU work.
///
/// Cheap to clone; all clones observe the same counter. The fence is shared
/// by every heap, release queue, and frame pacer created against it.
#[derive(Clone)]
pub struct Fence(Arc<FenceInner>);

struct FenceInner {
    device: Device,
    handle: FenceHandle,
    /// Value of the most recent signal request.
    submitted: AtomicU64,
    /// Monotonic cache of the device-reported completed value.
    completed: AtomicU64,
}

impl Fence {
    pub fn new(device: Device) -> DeviceResult<Self> {
        let handle = device.create_fence()?;
        Ok(Self(Arc::new(FenceInner {
            device,
            handle,
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        })))
    }

    /// Returns the raw fence handle.
    pub fn handle(&self) -> FenceHandle {
        self.0.handle
    }

    /// Increments the submitted value, enqueues the device-side signal, and
    /// returns the new value.
    ///
    /// Call exactly once per unit of work whose completion must later be
    /// detectable — typically once per frame, or once per explicit
    /// synchronization point.
    pub fn signal(&self) -> DeviceResult<u64> {
        let value = self.0.submitted.fetch_add(1, Ordering::Relaxed) + 1;
        self.0.device.signal_fence(self.0.handle, value)?;
        Ok(value)
    }

    /// Returns the value of the most recent signal request.
    pub fn submitted_value(&self) -> u64 {
        self.0.submitted.load(Ordering::Relaxed)
    }

    /// Returns the greatest value the device has finished.
    ///
    /// Never decreases between calls; may lag behind
    /// [`submitted_value`](Self::submitted_value) arbitrarily.
    pub fn completed_value(&self) -> u64 {
        let fresh = self.0.device.fence_completed_value(self.0.handle);
        let cached = self.0.completed.fetch_max(fresh, Ordering::Relaxed);
        let value = fresh.max(cached);
        debug_assert!(value <= self.submitted_value());
        value
    }

    /// Blocks the calling thread until `completed_value() >= value`.
    ///
    /// No-op if already satisfied. This is the only operation in the crate
    /// permitted to block for an unbounded duration. A wait failure means the
    /// awaited value will never be signaled; the device is considered lost
    /// and the error is fatal — there is no retry.
    pub fn wait(&self, value: u64) -> DeviceResult<()> {
        if self.0.completed.load(Ordering::Relaxed) >= value {
            return Ok(());
        }
        self.0.device.wait_fence(self.0.handle, value)?;
        self.0.completed.fetch_max(value, Ordering::Relaxed);
        Ok(())
    }
}

impl Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Fence")
            .field(&self.0.handle)
            .field(&self.submitted_value())
            .finish()
    }
}

impl HasDevice for Fence {
    fn device(&self) -> &Device {
        &self.0.device
    }
}

impl Drop for FenceInner {
    fn drop(&mut self) {
        self.device.destroy_fence(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceError;
    use crate::mock::MockDevice;

    #[test]
    fn signal_is_monotonic() {
        let mock = MockDevice::new();
        let device = Device::from_backend(mock.clone());
        let fence = Fence::new(device).unwrap();
        assert_eq!(fence.submitted_value(), 0);
        assert_eq!(fence.signal().unwrap(), 1);
        assert_eq!(fence.signal().unwrap(), 2);
        assert_eq!(fence.submitted_value(), 2);
    }

    #[test]
    fn completed_value_tracks_device_progress() {
        let mock = MockDevice::new();
        let device = Device::from_backend(mock.clone());
        let fence = Fence::new(device).unwrap();
        fence.signal().unwrap();
        fence.signal().unwrap();
        assert_eq!(fence.completed_value(), 0);
        mock.complete_to(fence.handle(), 1);
        assert_eq!(fence.completed_value(), 1);
        mock.complete_to(fence.handle(), 2);
        assert_eq!(fence.completed_value(), 2);
    }

    #[test]
    fn satisfied_wait_skips_the_device() {
        let mock = MockDevice::new();
        let device = Device::from_backend(mock.clone());
        let fence = Fence::new(device).unwrap();
        fence.signal().unwrap();
        mock.complete_to(fence.handle(), 1);
        // Refresh the cache, then wait on an already-completed value.
        assert_eq!(fence.completed_value(), 1);
        fence.wait(1).unwrap();
        assert!(mock.waits(fence.handle()).is_empty());
    }

    #[test]
    fn unsatisfied_wait_blocks_on_the_device() {
        let mock = MockDevice::new();
        let device = Device::from_backend(mock.clone());
        let fence = Fence::new(device).unwrap();
        fence.signal().unwrap();
        fence.wait(1).unwrap();
        assert_eq!(mock.waits(fence.handle()), vec![1]);
        assert_eq!(fence.completed_value(), 1);
    }

    #[test]
    fn wait_failure_is_device_loss() {
        let mock = MockDevice::new();
        let device = Device::from_backend(mock.clone());
        let fence = Fence::new(device).unwrap();
        fence.signal().unwrap();
        mock.fail_waits(true);
        assert_eq!(fence.wait(1), Err(DeviceError::Lost));
    }
}
