//! Shared identifiers and cross-component lifecycle traits.
//!
//! Every entity id in the buffering engine is a plain integer handle into
//! one of the Metadata Store's maps or the Buffer Pool's slab tables —
//! arena-style, per the "use arena + integer ids, not owning handles"
//! design note. None of these types own the data they index.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};

/// Identifies one configured storage tier (RAM slab, POSIX-backed file, ...).
pub type DeviceId = u32;

/// Identifies one fixed-size slab region on a device.
pub type BufferId = u64;

/// Identifies a Bucket (the cache entity for one logical file).
pub type BucketId = u64;

/// Identifies a Blob (one cached page, a bucket's value unit).
pub type BlobId = u64;

/// Identifies a VBucket (a cross-bucket tag carrying Traits).
pub type VBucketId = u32;

/// Identifies a registered Trait implementation.
pub type TraitId = u32;

/// Zero-based page index within a bucket; for file-backed buckets this is
/// also the blob's decimal string name.
pub type PageIndex = u64;

/// A reference to a slab-allocated byte region that a Blob's data occupies.
///
/// `length` bytes starting at `blob_offset` within the blob's logical byte
/// stream live in buffer `buffer_id` at device-local `device_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferRef {
    pub buffer_id: BufferId,
    pub device_id: DeviceId,
    pub device_offset: u64,
    pub blob_offset: u64,
    pub length: u64,
}

impl BufferRef {
    pub fn new(
        buffer_id: BufferId,
        device_id: DeviceId,
        device_offset: u64,
        blob_offset: u64,
        length: u64,
    ) -> Self {
        Self {
            buffer_id,
            device_id,
            device_offset,
            blob_offset,
            length,
        }
    }
}

/// Health status of a running component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// Base lifecycle trait implemented by each of the eight core components.
pub trait Component: Send + Sync {
    fn initialize(&mut self) -> crate::Result<()>;
    fn shutdown(&mut self) -> crate::Result<()>;
    fn health_check(&self) -> HealthStatus;
}

/// A monotonic access-stat pair tracked per blob for BORG scoring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccessStats {
    pub last_access: SystemTime,
    pub access_count: u64,
}

impl AccessStats {
    pub fn new(now: SystemTime) -> Self {
        Self {
            last_access: now,
            access_count: 0,
        }
    }

    pub fn touch(&mut self, now: SystemTime) {
        self.last_access = now;
        self.access_count += 1;
    }

    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.last_access).unwrap_or_default()
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_stats_tracks_count_and_recency() {
        let t0 = SystemTime::now();
        let mut stats = AccessStats::new(t0);
        assert_eq!(stats.access_count, 0);

        let t1 = t0 + Duration::from_secs(5);
        stats.touch(t1);
        assert_eq!(stats.access_count, 1);
        assert_eq!(stats.last_access, t1);
    }

    #[test]
    fn buffer_ref_carries_all_fields() {
        let r = BufferRef::new(1, 2, 100, 0, 64);
        assert_eq!(r.buffer_id, 1);
        assert_eq!(r.device_id, 2);
        assert_eq!(r.length, 64);
    }
}
