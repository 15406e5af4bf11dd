//! C3 — Metadata Store.
//!
//! Owns the Bucket and Blob tables: bucket-name to id lookup, blob-id to
//! record lookup, and a per-bucket name index guarded independently so a
//! lookup in one bucket never contends with an insert in another. All
//! entities are plain integer ids into these maps (arena-style, no owning
//! handles), matching the rest of the engine.

pub mod traits;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::common::{AccessStats, BlobId, BucketId, BufferRef};
use crate::config::AdapterMode;
use crate::error::{HermesError, Result};

#[derive(Debug, Clone)]
pub struct Bucket {
    pub id: BucketId,
    pub name: String,
    pub backing_path: Option<String>,
    pub mode: AdapterMode,
    /// Logical size of the file this bucket mirrors, in bytes.
    pub size: u64,
    /// Page size this bucket was opened with; needed by BORG to compute
    /// a blob's byte offset within the backing file from its page index.
    pub page_size: u64,
}

#[derive(Debug, Clone)]
pub struct Blob {
    pub id: BlobId,
    pub bucket_id: BucketId,
    pub name: String,
    pub size: u64,
    pub buffers: Vec<BufferRef>,
    pub is_dirty: bool,
    pub access: AccessStats,
}

struct BucketEntry {
    bucket: RwLock<Bucket>,
    /// Blob name -> id, scoped to this bucket only.
    blob_ids: RwLock<HashMap<String, BlobId>>,
    /// Serializes `put_or_update_blob`/`delete_blob` on this bucket so
    /// two concurrent writers to the same name can't both observe the
    /// same "old buffers" and double-release them.
    write_lock: Mutex<()>,
}

pub struct MetadataStore {
    bucket_by_name: DashMap<String, BucketId>,
    buckets: DashMap<BucketId, BucketEntry>,
    blobs: DashMap<BlobId, Blob>,
    next_bucket_id: AtomicU64,
    next_blob_id: AtomicU64,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self {
            bucket_by_name: DashMap::new(),
            buckets: DashMap::new(),
            blobs: DashMap::new(),
            next_bucket_id: AtomicU64::new(0),
            next_blob_id: AtomicU64::new(0),
        }
    }

    /// Returns the existing bucket id for `name`, creating it with
    /// `AdapterMode::Default` and no backing path if absent.
    pub fn get_or_create_bucket(&self, name: &str) -> BucketId {
        if let Some(id) = self.bucket_by_name.get(name) {
            return *id;
        }
        let id = self.next_bucket_id.fetch_add(1, Ordering::Relaxed);
        let bucket = Bucket {
            id,
            name: name.to_string(),
            backing_path: None,
            mode: AdapterMode::Default,
            size: 0,
            page_size: 1024 * 1024,
        };
        self.buckets.insert(
            id,
            BucketEntry {
                bucket: RwLock::new(bucket),
                blob_ids: RwLock::new(HashMap::new()),
                write_lock: Mutex::new(()),
            },
        );
        // Another thread may have won the race between the get above and
        // here; prefer whichever entry landed first in the name map.
        match self.bucket_by_name.entry(name.to_string()) {
            Entry::Occupied(e) => {
                self.buckets.remove(&id);
                *e.get()
            }
            Entry::Vacant(e) => {
                e.insert(id);
                id
            }
        }
    }

    pub fn get_bucket(&self, bucket_id: BucketId) -> Result<Bucket> {
        self.buckets
            .get(&bucket_id)
            .map(|e| e.bucket.read().clone())
            .ok_or_else(|| HermesError::NotFound(format!("bucket {bucket_id}")))
    }

    pub fn set_bucket_size(&self, bucket_id: BucketId, size: u64) -> Result<()> {
        let entry = self
            .buckets
            .get(&bucket_id)
            .ok_or_else(|| HermesError::NotFound(format!("bucket {bucket_id}")))?;
        entry.bucket.write().size = size;
        Ok(())
    }

    /// Record the adapter mode, backing path, and page size a bucket was
    /// opened with. Called once per fresh `open()`; a no-op field is
    /// left untouched by passing `None`.
    pub fn configure_bucket(
        &self,
        bucket_id: BucketId,
        backing_path: Option<String>,
        mode: AdapterMode,
        page_size: u64,
    ) -> Result<()> {
        let entry = self
            .buckets
            .get(&bucket_id)
            .ok_or_else(|| HermesError::NotFound(format!("bucket {bucket_id}")))?;
        let mut b = entry.bucket.write();
        b.backing_path = backing_path;
        b.mode = mode;
        b.page_size = page_size;
        Ok(())
    }

    /// Remove a bucket and every blob it owns, returning the removed
    /// blobs so the caller can release their buffers and flush dirty
    /// data before the metadata disappears.
    pub fn destroy_bucket(&self, bucket_id: BucketId) -> Result<Vec<Blob>> {
        let (_, entry) = self
            .buckets
            .remove(&bucket_id)
            .ok_or_else(|| HermesError::NotFound(format!("bucket {bucket_id}")))?;
        let name = entry.bucket.read().name.clone();
        self.bucket_by_name.remove(&name);

        let ids: Vec<BlobId> = entry.blob_ids.read().values().copied().collect();
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, blob)) = self.blobs.remove(&id) {
                removed.push(blob);
            }
        }
        Ok(removed)
    }

    /// Insert a new blob or overwrite an existing one under the same
    /// `(bucket_id, name)`, replacing its buffer list wholesale.
    ///
    /// Serialized per bucket so two concurrent writers to the same name
    /// can't both see the same "previous" buffer list: the returned
    /// `Vec<BufferRef>` is whatever the blob held immediately before this
    /// call, empty if it didn't exist. The caller releases these back to
    /// the buffer pool itself, after this call returns (i.e. once this
    /// lock is dropped), so pool release never happens under the lock.
    pub fn put_or_update_blob(
        &self,
        bucket_id: BucketId,
        name: &str,
        size: u64,
        buffers: Vec<BufferRef>,
        is_dirty: bool,
    ) -> Result<(BlobId, Vec<BufferRef>)> {
        let entry = self
            .buckets
            .get(&bucket_id)
            .ok_or_else(|| HermesError::NotFound(format!("bucket {bucket_id}")))?;
        let _guard = entry.write_lock.lock();

        let existing_id = entry.blob_ids.read().get(name).copied();
        let old_buffers = existing_id
            .and_then(|id| self.blobs.get(&id).map(|b| b.buffers.clone()))
            .unwrap_or_default();
        let id = existing_id.unwrap_or_else(|| self.next_blob_id.fetch_add(1, Ordering::Relaxed));

        let blob = Blob {
            id,
            bucket_id,
            name: name.to_string(),
            size,
            buffers,
            is_dirty,
            access: AccessStats::new(SystemTime::now()),
        };
        self.blobs.insert(id, blob);
        if existing_id.is_none() {
            entry.blob_ids.write().insert(name.to_string(), id);
        }
        Ok((id, old_buffers))
    }

    pub fn get_blob(&self, bucket_id: BucketId, name: &str) -> Result<Blob> {
        let entry = self
            .buckets
            .get(&bucket_id)
            .ok_or_else(|| HermesError::NotFound(format!("bucket {bucket_id}")))?;
        let id = *entry
            .blob_ids
            .read()
            .get(name)
            .ok_or_else(|| HermesError::NotFound(format!("blob {name}")))?;
        drop(entry);
        self.blobs
            .get(&id)
            .map(|b| b.clone())
            .ok_or_else(|| HermesError::NotFound(format!("blob {name}")))
    }

    pub fn get_blob_by_id(&self, blob_id: BlobId) -> Result<Blob> {
        self.blobs
            .get(&blob_id)
            .map(|b| b.clone())
            .ok_or_else(|| HermesError::NotFound(format!("blob {blob_id}")))
    }

    pub fn delete_blob(&self, bucket_id: BucketId, name: &str) -> Result<Blob> {
        let entry = self
            .buckets
            .get(&bucket_id)
            .ok_or_else(|| HermesError::NotFound(format!("bucket {bucket_id}")))?;
        let id = {
            let _guard = entry.write_lock.lock();
            entry
                .blob_ids
                .write()
                .remove(name)
                .ok_or_else(|| HermesError::NotFound(format!("blob {name}")))?
        };
        drop(entry);
        self.blobs
            .remove(&id)
            .map(|(_, b)| b)
            .ok_or_else(|| HermesError::NotFound(format!("blob {name}")))
    }

    /// Record an access against `blob_id`, advancing its recency/frequency
    /// stats for BORG scoring. No-op if the blob no longer exists.
    pub fn touch_blob(&self, blob_id: BlobId) {
        if let Some(mut b) = self.blobs.get_mut(&blob_id) {
            b.access.touch(SystemTime::now());
        }
    }

    /// All blobs currently owned by `bucket_id`.
    pub fn blobs_in_bucket(&self, bucket_id: BucketId) -> Result<Vec<Blob>> {
        let entry = self
            .buckets
            .get(&bucket_id)
            .ok_or_else(|| HermesError::NotFound(format!("bucket {bucket_id}")))?;
        let ids: Vec<BlobId> = entry.blob_ids.read().values().copied().collect();
        drop(entry);
        Ok(ids
            .into_iter()
            .filter_map(|id| self.blobs.get(&id).map(|b| b.clone()))
            .collect())
    }

    /// Snapshot of every blob currently tracked, for BORG sweeps.
    pub fn all_blobs(&self) -> Vec<Blob> {
        self.blobs.iter().map(|e| e.value().clone()).collect()
    }
}

impl Default for MetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_creation_is_idempotent_by_name() {
        let store = MetadataStore::new();
        let a = store.get_or_create_bucket("file.txt");
        let b = store.get_or_create_bucket("file.txt");
        assert_eq!(a, b);
    }

    #[test]
    fn put_get_delete_blob_round_trip() {
        let store = MetadataStore::new();
        let bucket = store.get_or_create_bucket("file.txt");
        let (id, old) = store
            .put_or_update_blob(bucket, "0", 4096, vec![], false)
            .unwrap();
        assert!(old.is_empty());
        let blob = store.get_blob(bucket, "0").unwrap();
        assert_eq!(blob.id, id);
        assert_eq!(blob.size, 4096);

        store.delete_blob(bucket, "0").unwrap();
        assert!(store.get_blob(bucket, "0").is_err());
    }

    #[test]
    fn put_or_update_blob_reuses_id_on_overwrite() {
        let store = MetadataStore::new();
        let bucket = store.get_or_create_bucket("file.txt");
        let (id1, _) = store
            .put_or_update_blob(bucket, "0", 4096, vec![], false)
            .unwrap();
        let (id2, _) = store
            .put_or_update_blob(bucket, "0", 8192, vec![], true)
            .unwrap();
        assert_eq!(id1, id2);
        assert_eq!(store.get_blob(bucket, "0").unwrap().size, 8192);
    }

    #[test]
    fn put_or_update_blob_returns_previous_buffers_for_caller_to_release() {
        let store = MetadataStore::new();
        let bucket = store.get_or_create_bucket("file.txt");
        let first = BufferRef::new(1, 0, 0, 0, 4096);
        store
            .put_or_update_blob(bucket, "0", 4096, vec![first], false)
            .unwrap();

        let second = BufferRef::new(2, 0, 4096, 0, 4096);
        let (_, old) = store
            .put_or_update_blob(bucket, "0", 4096, vec![second], false)
            .unwrap();
        assert_eq!(old, vec![first]);
    }

    #[test]
    fn destroy_bucket_returns_owned_blobs_and_forgets_name() {
        let store = MetadataStore::new();
        let bucket = store.get_or_create_bucket("file.txt");
        store
            .put_or_update_blob(bucket, "0", 4096, vec![], false)
            .unwrap();

        let removed = store.destroy_bucket(bucket).unwrap();
        assert_eq!(removed.len(), 1);

        let reborn = store.get_or_create_bucket("file.txt");
        assert_ne!(reborn, bucket);
    }

    #[test]
    fn touch_blob_advances_access_count() {
        let store = MetadataStore::new();
        let bucket = store.get_or_create_bucket("file.txt");
        let (id, _) = store
            .put_or_update_blob(bucket, "0", 4096, vec![], false)
            .unwrap();
        store.touch_blob(id);
        store.touch_blob(id);
        assert_eq!(store.get_blob_by_id(id).unwrap().access.access_count, 2);
    }
}
