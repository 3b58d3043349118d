//! Deferred destruction of native GPU objects.
//!
//! Destroying a pipeline, texture, or acceleration structure while in-flight
//! commands may still reference it is a device-level fault. The
//! [`DeferredReleaseQueue`] holds such objects together with the fence value
//! current when they were retired, and destroys each one exactly once — after
//! the fence has proven that every command submitted before retirement has
//! completed.
//!
//! Records are appended in submission order and their fence tags are
//! non-decreasing, so the queue only ever inspects its front entry: the first
//! not-yet-satisfied record blocks everything behind it. That front-only
//! discipline is a required invariant, not an optimization — it is what makes
//! [`execute_deferred_releases`](DeferredReleaseQueue::execute_deferred_releases)
//! O(released) instead of O(pending), and it is sound precisely because tags
//! never decrease.

use std::collections::VecDeque;

use crate::{
    device::{Device, HasDevice, ObjectHandle},
    sync::Fence,
};

/// Implemented by everything that reclaims resources on frame boundaries.
///
/// The frame pacer invokes this once per `end_frame` on every registered heap
/// and queue. Implementations never block and are idempotent when nothing is
/// reclaimable yet.
pub trait ExecuteDeferredReleases {
    fn execute_deferred_releases(&mut self);
}

struct ObjectRelease {
    fence_value: u64,
    object: ObjectHandle,
}

/// A FIFO of native objects awaiting fence-proven destruction.
pub struct DeferredReleaseQueue {
    device: Device,
    fence: Fence,
    pending: VecDeque<ObjectRelease>,
}

impl DeferredReleaseQueue {
    pub fn new(device: Device, fence: Fence) -> Self {
        Self {
            device,
            fence,
            pending: VecDeque::new(),
        }
    }

    /// Retires an object, recording the current submitted fence value.
    ///
    /// The object must not be used in any command recorded after this call.
    pub fn push(&mut self, object: ObjectHandle) {
        self.pending.push_back(ObjectRelease {
            fence_value: self.fence.submitted_value(),
            object,
        });
    }

    /// Number of objects still awaiting destruction.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Destroys every object whose recorded fence value has completed.
    ///
    /// Pops from the front only while `front.fence_value` is strictly below
    /// the fence's completed value; never blocks.
    pub fn execute_deferred_releases(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let completed = self.fence.completed_value();
        while let Some(front) = self.pending.front() {
            if front.fence_value >= completed {
                break;
            }
            let record = self.pending.pop_front().unwrap();
            self.device.destroy_object(record.object);
        }
    }
}

impl HasDevice for DeferredReleaseQueue {
    fn device(&self) -> &Device {
        &self.device
    }
}

impl ExecuteDeferredReleases for DeferredReleaseQueue {
    fn execute_deferred_releases(&mut self) {
        DeferredReleaseQueue::execute_deferred_releases(self);
    }
}

impl Drop for DeferredReleaseQueue {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            tracing::warn!(
                "deferred release queue dropped with {} pending objects; \
                 destroying them now on the assumption that the device was idled",
                self.pending.len()
            );
        }
        for record in self.pending.drain(..) {
            self.device.destroy_object(record.object);
        }
    }
}
