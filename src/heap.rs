//! Page-based transient memory for uploads and readbacks.
//!
//! A [`MemoryHeap`] bump-allocates short-lived host-visible memory out of
//! fixed-capacity [`Page`]s (one GPU buffer plus its mapped pointer each).
//! Allocations are cheap — an alignment round-up and an offset bump — and are
//! never reclaimed individually: the reclamation unit is a whole page, once
//! the fence proves that every allocation drawn from it is past GPU use.
//!
//! # Lifecycle
//!
//! 1. [`allocate`](MemoryHeap::allocate) returns a move-only [`Allocation`]
//!    tagged with the fence's current submitted value.
//! 2. The caller writes through the mapped pointer and records GPU commands
//!    referencing [`Allocation::buffer`].
//! 3. Dropping the handle (or calling [`Allocation::release`]) retires it:
//!    a release record is queued, but the page stays untouched.
//! 4. On each frame boundary,
//!    [`execute_deferred_releases`](MemoryHeap::execute_deferred_releases)
//!    resolves records whose fence value has completed. A page whose last
//!    outstanding allocation resolves returns to the reuse pool — or, for an
//!    oversized page, is freed outright.
//!
//! Requests larger than the configured page size get a dedicated "large"
//! page sized exactly to the request, never shared with other allocations.
//!
//! Neither allocation nor reclamation ever blocks on the GPU: the heap grows
//! when nothing reusable is proven idle, and declines to reclaim otherwise.

use std::collections::VecDeque;

use crate::{
    device::{BufferHandle, Device, DeviceResult, HasDevice, MemoryKind},
    release::ExecuteDeferredReleases,
    sync::Fence,
    utils::IdAlloc,
};

/// Configuration for a [`MemoryHeap`].
#[derive(Clone, Copy, Debug)]
pub struct MemoryHeapDesc {
    /// Must be host-visible: [`MemoryKind::Upload`] or [`MemoryKind::Readback`].
    pub kind: MemoryKind,
    /// Capacity of each regular page, in bytes. Must be nonzero.
    pub page_size: u64,
    /// Keep oversized pages in the reuse pool instead of freeing them as soon
    /// as they are proven idle.
    pub retain_large_pages: bool,
}

impl Default for MemoryHeapDesc {
    fn default() -> Self {
        Self {
            kind: MemoryKind::Upload,
            page_size: 2 * 1024 * 1024,
            retain_large_pages: false,
        }
    }
}

/// Construction-time configuration errors. Fatal: there is no partially
/// usable heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeapCreateError {
    #[error("heap page size must be nonzero")]
    ZeroPageSize,
    #[error("memory kind {0:?} is not host-visible; transient heaps require Upload or Readback")]
    NotHostVisible(MemoryKind),
}

/// One bump-allocation backing store: a buffer, its mapped pointer, and the
/// live-allocation count that gates reclamation.
struct Page {
    buffer: BufferHandle,
    ptr: *mut u8,
    capacity: u64,
    offset: u64,
    live_allocations: u32,
    /// Created for a single oversized request; never shared or made current.
    large: bool,
}

struct PageRelease {
    fence_value: u64,
    page: u32,
    size: u64,
}

/// A bump allocator over host-visible pages with fence-gated reclamation.
pub struct MemoryHeap {
    device: Device,
    fence: Fence,
    kind: MemoryKind,
    page_size: u64,
    retain_large_pages: bool,
    pages: Vec<Option<Page>>,
    page_ids: IdAlloc,
    /// Page currently accepting bump allocations, if any.
    current: Option<u32>,
    /// Pages proven GPU-idle, ready for reuse.
    reusable: VecDeque<u32>,
    /// Release records in submission order, front = oldest.
    pending: VecDeque<PageRelease>,
    release_tx: crossbeam_channel::Sender<PageRelease>,
    release_rx: crossbeam_channel::Receiver<PageRelease>,
}

// Mapped pointers are exclusively owned by the heap and its allocations.
unsafe impl Send for MemoryHeap {}

impl MemoryHeap {
    pub fn new(device: Device, fence: Fence, desc: MemoryHeapDesc) -> Result<Self, HeapCreateError> {
        if desc.page_size == 0 {
            return Err(HeapCreateError::ZeroPageSize);
        }
        if !desc.kind.is_host_visible() {
            return Err(HeapCreateError::NotHostVisible(desc.kind));
        }
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        Ok(Self {
            device,
            fence,
            kind: desc.kind,
            page_size: desc.page_size,
            retain_large_pages: desc.retain_large_pages,
            pages: Vec::new(),
            page_ids: IdAlloc::new(),
            current: None,
            reusable: VecDeque::new(),
            pending: VecDeque::new(),
            release_tx,
            release_rx,
        })
    }

    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Bump-allocates `size` bytes at the requested alignment.
    ///
    /// The returned handle is tagged with the fence's current submitted
    /// value; its backing page cannot be reused or freed until that value has
    /// completed. Never blocks: CPU-side work only.
    ///
    /// # Panics
    /// Panics on a zero size or a non-power-of-two alignment.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> DeviceResult<Allocation> {
        assert!(size != 0, "zero-size allocation");
        assert!(
            alignment.is_power_of_two(),
            "alignment must be a nonzero power of two"
        );

        // Oversized requests get a dedicated page, never shared.
        if size > self.page_size {
            let id = self.create_page(size, true)?;
            return Ok(self.record_allocation(id, 0, size));
        }

        if let Some(current) = self.current {
            let page = self.pages[current as usize].as_ref().unwrap();
            let offset = page.offset.next_multiple_of(alignment);
            if offset + size <= page.capacity {
                return Ok(self.record_allocation(current, offset, size));
            }
        }

        // The current page cannot satisfy the request (or there is none).
        // Pull a proven-idle page from the pool, or grow.
        let id = if let Some(id) = self.reusable.pop_front() {
            id
        } else {
            self.create_page(self.page_size, false)?
        };
        if let Some(retired) = self.current.replace(id) {
            // A page whose releases all resolved while it was still current
            // has no record left to reclaim it later; reclaim it now.
            let live = self.pages[retired as usize].as_ref().unwrap().live_allocations;
            if live == 0 {
                self.reclaim_page(retired);
            }
        }
        Ok(self.record_allocation(id, 0, size))
    }

    /// Resolves release records whose fence value has completed, reclaiming
    /// pages whose last outstanding allocation resolves.
    ///
    /// Records are processed strictly from the front of the FIFO: fence tags
    /// are non-decreasing in submission order, so the first unsatisfied
    /// record blocks all records behind it. Never blocks on the GPU.
    pub fn execute_deferred_releases(&mut self) {
        while let Ok(record) = self.release_rx.try_recv() {
            self.pending.push_back(record);
        }
        if self.pending.is_empty() {
            return;
        }
        let completed = self.fence.completed_value();
        while let Some(front) = self.pending.front() {
            if front.fence_value >= completed {
                break;
            }
            let record = self.pending.pop_front().unwrap();
            self.resolve_release(record);
        }
    }

    fn resolve_release(&mut self, record: PageRelease) {
        let page = self.pages[record.page as usize].as_mut().unwrap();
        debug_assert!(page.live_allocations > 0);
        page.live_allocations -= 1;
        if page.live_allocations == 0 && self.current != Some(record.page) {
            self.reclaim_page(record.page);
        }
    }

    fn reclaim_page(&mut self, id: u32) {
        let page = self.pages[id as usize].as_mut().unwrap();
        debug_assert_eq!(page.live_allocations, 0);
        if page.large && !self.retain_large_pages {
            let page = self.pages[id as usize].take().unwrap();
            self.page_ids.free(id);
            self.device.unmap_buffer(page.buffer);
            self.device.destroy_buffer(page.buffer);
        } else {
            page.offset = 0;
            self.reusable.push_back(id);
        }
    }

    fn create_page(&mut self, capacity: u64, large: bool) -> DeviceResult<u32> {
        let buffer = self.device.create_buffer(capacity, self.kind)?;
        let ptr = match self.device.map_buffer(buffer) {
            Ok(ptr) => ptr,
            Err(err) => {
                self.device.destroy_buffer(buffer);
                return Err(err);
            }
        };
        tracing::info!(
            "allocating new {:?} heap page, capacity = {}",
            self.kind,
            capacity
        );
        let id = self.page_ids.alloc();
        let page = Page {
            buffer,
            ptr,
            capacity,
            offset: 0,
            live_allocations: 0,
            large,
        };
        let slot = id as usize;
        if slot == self.pages.len() {
            self.pages.push(Some(page));
        } else {
            debug_assert!(self.pages[slot].is_none());
            self.pages[slot] = Some(page);
        }
        Ok(id)
    }

    fn record_allocation(&mut self, page_id: u32, offset: u64, size: u64) -> Allocation {
        let fence_value = self.fence.submitted_value();
        let page = self.pages[page_id as usize].as_mut().unwrap();
        page.offset = offset + size;
        page.live_allocations += 1;
        Allocation {
            buffer: page.buffer,
            page: page_id,
            offset,
            size,
            ptr: unsafe { page.ptr.add(offset as usize) },
            fence_value,
            release: self.release_tx.clone(),
        }
    }
}

impl HasDevice for MemoryHeap {
    fn device(&self) -> &Device {
        &self.device
    }
}

impl ExecuteDeferredReleases for MemoryHeap {
    fn execute_deferred_releases(&mut self) {
        MemoryHeap::execute_deferred_releases(self);
    }
}

impl Drop for MemoryHeap {
    fn drop(&mut self) {
        while let Ok(record) = self.release_rx.try_recv() {
            self.pending.push_back(record);
        }
        let unresolved: u32 = self
            .pages
            .iter()
            .flatten()
            .map(|page| page.live_allocations)
            .sum();
        if unresolved > 0 {
            tracing::warn!(
                "{:?} heap dropped with {} unresolved allocations; \
                 their handles outlived the heap's frame pacing",
                self.kind,
                unresolved
            );
        }
        for page in self.pages.drain(..).flatten() {
            self.device.unmap_buffer(page.buffer);
            self.device.destroy_buffer(page.buffer);
        }
    }
}

/// An exclusively owned slice of a heap page.
///
/// Move-only: there is exactly one owner, and ownership ends at drop — the
/// handle queues a release record for its page and must not be accessed
/// afterwards. The mapped pointer stays valid for the handle's lifetime
/// because the page cannot be reclaimed while its record is unresolved.
pub struct Allocation {
    buffer: BufferHandle,
    page: u32,
    offset: u64,
    size: u64,
    ptr: *mut u8,
    fence_value: u64,
    release: crossbeam_channel::Sender<PageRelease>,
}

// The handle is the sole owner of its byte range.
unsafe impl Send for Allocation {}

impl Allocation {
    /// The page's backing buffer, for recording GPU commands against.
    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    /// Byte offset of this allocation within [`buffer`](Self::buffer).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// The fence value current when this allocation was made. The backing
    /// page is not reused until this value has completed.
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.size as usize) }
    }

    pub fn as_slice_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.size as usize) }
    }

    /// Returns the allocation to its heap. Equivalent to dropping the handle;
    /// provided for call sites where the release should read explicitly.
    pub fn release(self) {}
}

impl Drop for Allocation {
    fn drop(&mut self) {
        // The heap may already be gone during teardown; the record is moot then.
        self.release
            .send(PageRelease {
                fence_value: self.fence_value,
                page: self.page,
                size: self.size,
            })
            .ok();
    }
}

impl std::fmt::Debug for Allocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocation")
            .field("buffer", &self.buffer)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("fence_value", &self.fence_value)
            .finish()
    }
}
