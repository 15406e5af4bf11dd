//! C2 — Buffer Pool.
//!
//! Owns the free space on every device, sliced into the device's
//! configured slab classes. Allocation is greedy largest-slab-first: to
//! satisfy a request for `n` bytes, take whole slabs starting from the
//! largest class until the request is covered, accepting internal
//! fragmentation on the last slab. A request that cannot be fully covered
//! rolls back every slab it already took and fails with `OutOfSpace` —
//! partial reservations are never left dangling. Free-list layout follows
//! the Vec-backed push/pop style used for page frames elsewhere in this
//! codebase.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::common::{BufferId, BufferRef, DeviceId};
use crate::config::DeviceInfo;
use crate::error::{HermesError, Result};

/// One slab handed out by the pool. Carries enough to build a
/// `BufferRef` once the caller knows which blob offset it backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedBuffer {
    pub buffer_id: BufferId,
    pub device_id: DeviceId,
    pub device_offset: u64,
    pub length: u64,
}

/// Anything that names one device-resident slab. Implemented by both
/// `ReservedBuffer` (what `reserve` hands out) and `BufferRef` (what a
/// Blob stores long-term) so `release` can take either without the
/// caller converting.
pub trait SlabRef {
    fn device_id(&self) -> DeviceId;
    fn device_offset(&self) -> u64;
    fn length(&self) -> u64;
}

impl SlabRef for ReservedBuffer {
    fn device_id(&self) -> DeviceId {
        self.device_id
    }
    fn device_offset(&self) -> u64 {
        self.device_offset
    }
    fn length(&self) -> u64 {
        self.length
    }
}

impl SlabRef for BufferRef {
    fn device_id(&self) -> DeviceId {
        self.device_id
    }
    fn device_offset(&self) -> u64 {
        self.device_offset
    }
    fn length(&self) -> u64 {
        self.length
    }
}

/// Per-device slab bookkeeping: one free-list stack per slab class, all
/// offsets pre-carved at registration time.
struct DeviceSlabPool {
    /// Slab sizes, strictly increasing (validated by `DeviceInfo`).
    slab_sizes: Vec<u64>,
    /// `free_lists[i]` holds free device-offsets for `slab_sizes[i]`.
    free_lists: Vec<Mutex<Vec<u64>>>,
    total_slabs: Vec<usize>,
    next_buffer_id: AtomicU64,
}

impl DeviceSlabPool {
    fn new(info: &DeviceInfo) -> Self {
        let capacity = info.capacity.unwrap_or(0);
        let mut free_lists = Vec::with_capacity(info.slab_sizes.len());
        let mut total_slabs = Vec::with_capacity(info.slab_sizes.len());
        // Evenly split the device's capacity across slab classes; the
        // original config surface leaves this distribution unspecified,
        // so an equal split is the simplest defensible default.
        let per_class = if info.slab_sizes.is_empty() {
            0
        } else {
            capacity / info.slab_sizes.len() as u64
        };
        for &slab_size in &info.slab_sizes {
            let count = if slab_size == 0 {
                0
            } else {
                (per_class / slab_size) as usize
            };
            let mut offsets = Vec::with_capacity(count);
            let mut offset = 0u64;
            for _ in 0..count {
                offsets.push(offset);
                offset += slab_size;
            }
            total_slabs.push(count);
            free_lists.push(Mutex::new(offsets));
        }
        Self {
            slab_sizes: info.slab_sizes.clone(),
            free_lists,
            total_slabs,
            next_buffer_id: AtomicU64::new(0),
        }
    }

    fn class_index(&self, length: u64) -> Option<usize> {
        self.slab_sizes.iter().position(|&s| s == length)
    }

    fn take_one(&self, class: usize) -> Option<u64> {
        self.free_lists[class].lock().pop()
    }

    fn give_back(&self, class: usize, offset: u64) {
        self.free_lists[class].lock().push(offset);
    }

    fn occupancy(&self) -> f32 {
        let mut total = 0usize;
        let mut free = 0usize;
        for (i, &count) in self.total_slabs.iter().enumerate() {
            total += count;
            free += self.free_lists[i].lock().len();
        }
        if total == 0 {
            0.0
        } else {
            1.0 - (free as f32 / total as f32)
        }
    }
}

/// Tracks free space across every registered device.
pub struct BufferPool {
    devices: DashMap<DeviceId, DeviceSlabPool>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            devices: DashMap::new(),
        }
    }

    pub fn register_device(&self, device_id: DeviceId, info: &DeviceInfo) {
        self.devices.insert(device_id, DeviceSlabPool::new(info));
    }

    /// Fraction of the device's slab capacity currently in use, in `[0, 1]`.
    pub fn occupancy(&self, device_id: DeviceId) -> Result<f32> {
        self.devices
            .get(&device_id)
            .map(|d| d.occupancy())
            .ok_or_else(|| HermesError::NotFound(format!("device {device_id}")))
    }

    /// Reserve enough slabs on `device_id` to cover `bytes_needed`,
    /// largest class first. Either fully succeeds or fully rolls back.
    pub fn reserve(&self, device_id: DeviceId, bytes_needed: u64) -> Result<Vec<ReservedBuffer>> {
        let pool = self
            .devices
            .get(&device_id)
            .ok_or_else(|| HermesError::NotFound(format!("device {device_id}")))?;

        let mut taken: Vec<ReservedBuffer> = Vec::new();
        let mut remaining = bytes_needed;

        // Largest class first, only popping a slab while its size still
        // fits within what's left — never over-allocate a big slab once
        // a smaller class would do.
        for class in (0..pool.slab_sizes.len()).rev() {
            let slab_size = pool.slab_sizes[class];
            if slab_size == 0 {
                continue;
            }
            while remaining > 0 && slab_size <= remaining {
                match pool.take_one(class) {
                    Some(offset) => {
                        let buffer_id = pool.next_buffer_id.fetch_add(1, Ordering::Relaxed);
                        taken.push(ReservedBuffer {
                            buffer_id,
                            device_id,
                            device_offset: offset,
                            length: slab_size,
                        });
                        remaining = remaining.saturating_sub(slab_size);
                    }
                    None => break,
                }
            }
        }

        // Remainder smaller than the smallest class: accept internal
        // fragmentation and take one more of the smallest class.
        if remaining > 0 {
            if let Some(class) = pool.slab_sizes.iter().position(|&s| s > 0) {
                let slab_size = pool.slab_sizes[class];
                if let Some(offset) = pool.take_one(class) {
                    let buffer_id = pool.next_buffer_id.fetch_add(1, Ordering::Relaxed);
                    taken.push(ReservedBuffer {
                        buffer_id,
                        device_id,
                        device_offset: offset,
                        length: slab_size,
                    });
                    remaining = 0;
                }
            }
        }

        if remaining > 0 {
            for buf in &taken {
                let class = pool.class_index(buf.length).expect("known slab class");
                pool.give_back(class, buf.device_offset);
            }
            return Err(HermesError::OutOfSpace);
        }

        Ok(taken)
    }

    /// Return slabs to their device's free lists. Accepts either a
    /// freshly `reserve`d batch or the long-lived `BufferRef`s a Blob
    /// carries, via `SlabRef`.
    pub fn release<T: SlabRef>(&self, buffers: &[T]) -> Result<()> {
        for buf in buffers {
            let device_id = buf.device_id();
            let length = buf.length();
            let pool = self
                .devices
                .get(&device_id)
                .ok_or_else(|| HermesError::NotFound(format!("device {device_id}")))?;
            let class = pool
                .class_index(length)
                .ok_or_else(|| HermesError::Internal("buffer length matches no slab class".into()))?;
            pool.give_back(class, buf.device_offset());
        }
        Ok(())
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}
