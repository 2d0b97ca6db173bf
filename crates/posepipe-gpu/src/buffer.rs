use std::ops::BitOr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use posepipe_core::{PoseError, Result};

/// Usage flags requested at allocation time.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferUsage(u64);

impl BufferUsage {
    pub const CPU_READ_OFTEN: Self = Self(1 << 0);
    pub const CPU_WRITE_OFTEN: Self = Self(1 << 1);
    pub const GPU_SAMPLED_IMAGE: Self = Self(1 << 8);
    pub const GPU_DATA_BUFFER: Self = Self(1 << 24);

    const CPU_MASK: u64 = Self::CPU_READ_OFTEN.0 | Self::CPU_WRITE_OFTEN.0;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn cpu_accessible(self) -> bool {
        self.0 & Self::CPU_MASK != 0
    }
}

impl BitOr for BufferUsage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::fmt::Debug for BufferUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = [
            (Self::CPU_READ_OFTEN, "CPU_READ_OFTEN"),
            (Self::CPU_WRITE_OFTEN, "CPU_WRITE_OFTEN"),
            (Self::GPU_SAMPLED_IMAGE, "GPU_SAMPLED_IMAGE"),
            (Self::GPU_DATA_BUFFER, "GPU_DATA_BUFFER"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "BufferUsage({})", set.join(" | "))
    }
}

/// The memory behind a shared buffer. Freed when the last owner or handle
/// drops, which happens exactly once.
pub(crate) struct SharedRegion {
    id: u64,
    size: usize,
    usage: BufferUsage,
    /// Backing store in 8-byte words so f32/u64 views are always aligned.
    words: RwLock<Box<[u64]>>,
    cpu_locks: AtomicU32,
    live: Arc<AtomicUsize>,
}

impl SharedRegion {
    pub(crate) fn new(
        id: u64,
        size: usize,
        usage: BufferUsage,
        words: Box<[u64]>,
        live: Arc<AtomicUsize>,
    ) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            id,
            size,
            usage,
            words: RwLock::new(words),
            cpu_locks: AtomicU32::new(0),
            live,
        }
    }

    fn byte_range<T: bytemuck::Pod>(&self, offset: usize, len: usize) -> Result<(usize, usize)> {
        let end = len
            .checked_mul(std::mem::size_of::<T>())
            .and_then(|bytes| bytes.checked_add(offset))
            .filter(|&end| end <= self.size)
            .ok_or_else(|| {
                PoseError::InvalidInput(format!(
                    "view of {len} elements at byte {offset} exceeds buffer {} of {} bytes",
                    self.id, self.size
                ))
            })?;
        Ok((offset, end))
    }

    fn map_read<T: bytemuck::Pod>(
        &self,
        offset: usize,
        len: usize,
    ) -> Result<MappedRwLockReadGuard<'_, [T]>> {
        let (start, end) = self.byte_range::<T>(offset, len)?;
        RwLockReadGuard::try_map(self.words.read(), |words| {
            bytemuck::try_cast_slice(&bytemuck::cast_slice::<u64, u8>(&words[..])[start..end]).ok()
        })
        .map_err(|_| {
            PoseError::Contract(format!(
                "byte offset {offset} is misaligned for a {}-byte element view",
                std::mem::size_of::<T>()
            ))
        })
    }

    fn map_write<T: bytemuck::Pod>(
        &self,
        offset: usize,
        len: usize,
    ) -> Result<MappedRwLockWriteGuard<'_, [T]>> {
        let (start, end) = self.byte_range::<T>(offset, len)?;
        RwLockWriteGuard::try_map(self.words.write(), |words| {
            bytemuck::try_cast_slice_mut(
                &mut bytemuck::cast_slice_mut::<u64, u8>(&mut words[..])[start..end],
            )
            .ok()
        })
        .map_err(|_| {
            PoseError::Contract(format!(
                "byte offset {offset} is misaligned for a {}-byte element view",
                std::mem::size_of::<T>()
            ))
        })
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(buffer = self.id, size = self.size, "released shared buffer");
    }
}

/// A memory region usable as a CPU mapping, a GPU storage buffer and an
/// accelerator input, without copies between them.
///
/// The `SharedBuffer` is the owning side. Other stages receive a
/// [`SharedBufferHandle`], which refers to the same memory but carries no
/// CPU mapping. Reads and writes through either side are serialized by a
/// reader/writer lock, so a CPU read can never overlap a GPU or accelerator
/// write.
pub struct SharedBuffer {
    region: Arc<SharedRegion>,
    locked: bool,
}

impl SharedBuffer {
    pub(crate) fn from_region(region: SharedRegion) -> Self {
        Self {
            region: Arc::new(region),
            locked: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.region.id
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.region.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.region.usage
    }

    /// Non-owning handle for binding into another stage.
    pub fn handle(&self) -> SharedBufferHandle {
        SharedBufferHandle {
            region: Arc::clone(&self.region),
        }
    }

    /// Acquire the CPU mapping. The mapping is taken exactly once and kept
    /// until the buffer is dropped; locking again is a contract violation.
    pub fn lock(&mut self) -> Result<()> {
        if self.locked {
            return Err(PoseError::Contract(format!(
                "shared buffer {} is already locked",
                self.region.id
            )));
        }
        if !self.region.usage.cpu_accessible() {
            return Err(PoseError::Contract(format!(
                "shared buffer {} was allocated without CPU usage ({:?})",
                self.region.id, self.region.usage
            )));
        }
        self.region.cpu_locks.fetch_add(1, Ordering::SeqCst);
        self.locked = true;
        tracing::trace!(buffer = self.region.id, "locked shared buffer for CPU access");
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// How many times the CPU mapping was actually acquired.
    pub fn lock_count(&self) -> u32 {
        self.region.cpu_locks.load(Ordering::SeqCst)
    }

    /// Typed CPU view of `len` elements starting at byte `offset`.
    pub fn read<T: bytemuck::Pod>(
        &self,
        offset: usize,
        len: usize,
    ) -> Result<MappedRwLockReadGuard<'_, [T]>> {
        if !self.locked {
            return Err(PoseError::Contract(format!(
                "shared buffer {} read before lock",
                self.region.id
            )));
        }
        self.region.map_read(offset, len)
    }
}

impl Drop for SharedBuffer {
    fn drop(&mut self) {
        if self.locked {
            tracing::trace!(buffer = self.region.id, "unlocked shared buffer");
        }
    }
}

impl std::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("id", &self.region.id)
            .field("size", &self.region.size)
            .field("usage", &self.region.usage)
            .field("locked", &self.locked)
            .finish()
    }
}

/// Non-owning reference to a [`SharedBuffer`]'s memory, held by the stage
/// the buffer is bound into.
#[derive(Clone)]
pub struct SharedBufferHandle {
    region: Arc<SharedRegion>,
}

impl SharedBufferHandle {
    pub fn id(&self) -> u64 {
        self.region.id
    }

    pub fn size(&self) -> usize {
        self.region.size
    }

    pub fn read<T: bytemuck::Pod>(
        &self,
        offset: usize,
        len: usize,
    ) -> Result<MappedRwLockReadGuard<'_, [T]>> {
        self.region.map_read(offset, len)
    }

    pub fn write<T: bytemuck::Pod>(
        &self,
        offset: usize,
        len: usize,
    ) -> Result<MappedRwLockWriteGuard<'_, [T]>> {
        self.region.map_write(offset, len)
    }

    /// The whole region as bytes.
    pub fn write_bytes(&self) -> Result<MappedRwLockWriteGuard<'_, [u8]>> {
        self.region.map_write(0, self.region.size)
    }
}

impl std::fmt::Debug for SharedBufferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBufferHandle")
            .field("id", &self.region.id)
            .field("size", &self.region.size)
            .finish()
    }
}
