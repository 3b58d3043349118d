//! Resource state tracking.
//!
//! Every GPU resource is in exactly one usage state at a time on its single
//! command timeline, and moving between states requires a transition barrier
//! to be recorded. This module keeps the cached "current global state" for
//! each tracked resource so that the command recorder
//! ([`RecordingContext`](crate::command::RecordingContext)) can emit
//! barriers exactly when needed and never redundantly.
//!
//! # Why a Table
//!
//! Tracking state as a field on a reference-counted resource object invites
//! ad hoc destructor ordering and hidden shared mutation. Instead, resources
//! live in an explicit table — [`ResourceTracker`] — keyed by stable
//! [`ResourceId`]s, and the only deletion path routes the native handle
//! through a [`DeferredReleaseQueue`](crate::release::DeferredReleaseQueue).
//!
//! # Single-Writer Invariant
//!
//! The cached state models a single timeline, so barrier emission must happen
//! in the same order as the commands referencing the resource. Barrier
//! emission takes `&mut ResourceTracker`, which makes that invariant
//! compiler-enforced: two threads cannot transition resources from the same
//! tracker without external serialization. Multi-threaded recording requires
//! either a tracker per thread or an outer lock — neither is provided here.

use crate::{
    device::{Device, HasDevice, ObjectHandle},
    release::DeferredReleaseQueue,
    utils::IdAlloc,
};

/// The usage state of a resource on its command timeline.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ResourceState {
    /// Contents and layout are undefined. The creation state of most
    /// resources; never a valid transition destination.
    #[default]
    Undefined,
    /// Valid for any access, with no usage-specific optimization.
    General,
    /// Source of a copy operation.
    CopySource,
    /// Destination of a copy operation.
    CopyDest,
    /// Read-only access from shaders.
    ShaderResource,
    /// Read/write access from shaders.
    UnorderedAccess,
    /// Written as a color attachment. Textures only.
    RenderTarget,
    /// Handed to the presentation engine. Textures only.
    Present,
}

impl ResourceState {
    /// Returns `true` if the state is meaningful for resources of `kind`.
    pub fn supported_by(self, kind: ResourceKind) -> bool {
        match self {
            ResourceState::RenderTarget | ResourceState::Present => kind == ResourceKind::Texture,
            _ => true,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ResourceKind {
    Buffer,
    Texture,
}

/// One transition barrier, as handed to the backend for recording.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BarrierDesc {
    pub object: ObjectHandle,
    pub from: ResourceState,
    pub to: ResourceState,
}

/// A stable index into a [`ResourceTracker`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ResourceId(u32);

struct Resource {
    handle: ObjectHandle,
    kind: ResourceKind,
    /// Length in bytes for buffers; zero for textures.
    size: u64,
    /// Mutated only by barrier emission, after the barrier is recorded.
    state: ResourceState,
}

/// The resource table: native handles plus their cached global state.
///
/// Register resources at creation time with the state the device guarantees
/// for a fresh resource. Remove them through [`remove`](Self::remove), which
/// defers the native destruction until the fence proves the GPU is done.
pub struct ResourceTracker {
    device: Device,
    ids: IdAlloc,
    resources: Vec<Option<Resource>>,
}

impl ResourceTracker {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            ids: IdAlloc::new(),
            resources: Vec::new(),
        }
    }

    /// Registers a buffer resource of `size` bytes.
    pub fn register_buffer(
        &mut self,
        handle: ObjectHandle,
        size: u64,
        initial_state: ResourceState,
    ) -> ResourceId {
        self.insert(Resource {
            handle,
            kind: ResourceKind::Buffer,
            size,
            state: initial_state,
        })
    }

    /// Registers a texture resource.
    pub fn register_texture(
        &mut self,
        handle: ObjectHandle,
        initial_state: ResourceState,
    ) -> ResourceId {
        self.insert(Resource {
            handle,
            kind: ResourceKind::Texture,
            size: 0,
            state: initial_state,
        })
    }

    fn insert(&mut self, resource: Resource) -> ResourceId {
        let id = self.ids.alloc();
        let slot = id as usize;
        if slot == self.resources.len() {
            self.resources.push(Some(resource));
        } else {
            debug_assert!(self.resources[slot].is_none());
            self.resources[slot] = Some(resource);
        }
        ResourceId(id)
    }

    /// Removes a resource from the table and queues its native handle for
    /// deferred destruction. This is the only deletion path for tracked
    /// resources.
    pub fn remove(&mut self, id: ResourceId, releases: &mut DeferredReleaseQueue) {
        let resource = self.resources[id.0 as usize]
            .take()
            .expect("resource was already removed");
        self.ids.free(id.0);
        releases.push(resource.handle);
    }

    pub fn state(&self, id: ResourceId) -> ResourceState {
        self.get(id).state
    }

    pub fn kind(&self, id: ResourceId) -> ResourceKind {
        self.get(id).kind
    }

    pub fn handle(&self, id: ResourceId) -> ObjectHandle {
        self.get(id).handle
    }

    /// Length in bytes of a tracked buffer.
    ///
    /// # Panics
    /// Panics if `id` refers to a texture.
    pub fn buffer_size(&self, id: ResourceId) -> u64 {
        let resource = self.get(id);
        assert_eq!(
            resource.kind,
            ResourceKind::Buffer,
            "buffer_size queried on a texture resource"
        );
        resource.size
    }

    /// Updates the cached state. Called by barrier emission only, after the
    /// transition barrier has been recorded into the command stream.
    pub(crate) fn set_state(&mut self, id: ResourceId, state: ResourceState) {
        self.resources[id.0 as usize]
            .as_mut()
            .expect("resource was removed")
            .state = state;
    }

    fn get(&self, id: ResourceId) -> &Resource {
        self.resources[id.0 as usize]
            .as_ref()
            .expect("resource was removed")
    }
}

impl HasDevice for ResourceTracker {
    fn device(&self) -> &Device {
        &self.device
    }
}
