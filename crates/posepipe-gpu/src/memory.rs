use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use posepipe_core::{PoseError, Result};

use crate::buffer::{BufferUsage, SharedBuffer, SharedRegion};

static ALLOCATOR_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
static BUFFER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Round `size` up to a multiple of `align`, which must be a power of two.
pub fn align_up(size: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (size + align - 1) & !(align - 1)
}

/// Allocates memory shareable between the CPU, the graphics backend and the
/// accelerator.
pub trait SharedBufferAllocator: Send + Sync {
    fn allocate(&self, size: usize, usage: BufferUsage) -> Result<SharedBuffer>;
}

/// Allocator backed by zeroed host memory.
///
/// Each buffer is one contiguous, 8-byte aligned region. Failure to obtain
/// the memory is reported as [`PoseError::Allocation`]; there is no retry.
pub struct HostAllocator {
    id: u64,
    live: Arc<AtomicUsize>,
    total_allocated: AtomicU64,
}

impl HostAllocator {
    pub fn new() -> Self {
        Self {
            id: ALLOCATOR_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            live: Arc::new(AtomicUsize::new(0)),
            total_allocated: AtomicU64::new(0),
        }
    }

    /// Allocator identity.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Buffers allocated here whose memory has not been released yet.
    pub fn live_buffers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Total bytes handed out over the allocator's lifetime.
    pub fn total_allocated(&self) -> u64 {
        self.total_allocated.load(Ordering::Relaxed)
    }
}

impl Default for HostAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedBufferAllocator for HostAllocator {
    fn allocate(&self, size: usize, usage: BufferUsage) -> Result<SharedBuffer> {
        if size == 0 {
            return Err(PoseError::Allocation { requested: 0 });
        }
        let word_count = align_up(size, 8) / 8;

        let mut words: Vec<u64> = Vec::new();
        words
            .try_reserve_exact(word_count)
            .map_err(|_| PoseError::Allocation { requested: size })?;
        words.resize(word_count, 0);

        let id = BUFFER_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let region = SharedRegion::new(
            id,
            size,
            usage,
            words.into_boxed_slice(),
            Arc::clone(&self.live),
        );

        self.total_allocated
            .fetch_add(size as u64, Ordering::Relaxed);

        tracing::debug!(
            allocator = self.id,
            buffer = id,
            size,
            ?usage,
            "allocated shared buffer"
        );

        Ok(SharedBuffer::from_region(region))
    }
}
