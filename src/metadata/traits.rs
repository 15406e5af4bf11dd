//! C8 — Trait / VBucket Layer.
//!
//! A VBucket is a named, cross-bucket set of blob references with an
//! ordered list of attached Traits. Traits are callback objects invoked
//! on link/unlink and on get/put of any blob reachable through the
//! VBucket — the mechanism the rest of the system uses to bolt on
//! cross-cutting behavior (compression, replication, ...) without the
//! core components knowing about it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::common::{BlobId, BucketId, TraitId, VBucketId};
use crate::error::{HermesError, Result};

/// Callback interface implemented by anything attached to a VBucket.
/// Default methods are no-ops so a Trait only needs to override the
/// hooks it cares about.
pub trait Trait: Send + Sync {
    fn id(&self) -> TraitId;

    fn on_link(&self, _vbucket: VBucketId, _bucket: BucketId, _blob: BlobId) {}
    fn on_unlink(&self, _vbucket: VBucketId, _bucket: BucketId, _blob: BlobId) {}
    fn on_get(&self, _vbucket: VBucketId, _bucket: BucketId, _blob: BlobId, _data: &[u8]) {}
    fn on_put(&self, _vbucket: VBucketId, _bucket: BucketId, _blob: BlobId, _data: &[u8]) {}
}

struct VBucketEntry {
    name: String,
    links: RwLock<Vec<(BucketId, BlobId)>>,
    traits: RwLock<Vec<Arc<dyn Trait>>>,
}

/// Registry of Traits and VBuckets.
pub struct TraitLayer {
    traits: DashMap<TraitId, Arc<dyn Trait>>,
    vbucket_by_name: DashMap<String, VBucketId>,
    vbuckets: DashMap<VBucketId, VBucketEntry>,
    /// Reverse index: which VBuckets currently link a given blob, so a
    /// blob read/write can find everything to notify without scanning
    /// every VBucket.
    links_by_blob: DashMap<(BucketId, BlobId), Vec<VBucketId>>,
    next_vbucket_id: AtomicU32,
}

impl TraitLayer {
    pub fn new() -> Self {
        Self {
            traits: DashMap::new(),
            vbucket_by_name: DashMap::new(),
            vbuckets: DashMap::new(),
            links_by_blob: DashMap::new(),
            next_vbucket_id: AtomicU32::new(0),
        }
    }

    pub fn register_trait(&self, t: Arc<dyn Trait>) {
        self.traits.insert(t.id(), t);
    }

    pub fn get_or_create_vbucket(&self, name: &str) -> VBucketId {
        if let Some(id) = self.vbucket_by_name.get(name) {
            return *id;
        }
        let id = self.next_vbucket_id.fetch_add(1, Ordering::Relaxed);
        self.vbuckets.insert(
            id,
            VBucketEntry {
                name: name.to_string(),
                links: RwLock::new(Vec::new()),
                traits: RwLock::new(Vec::new()),
            },
        );
        self.vbucket_by_name.insert(name.to_string(), id);
        id
    }

    pub fn attach_trait(&self, vbucket_id: VBucketId, trait_id: TraitId) -> Result<()> {
        let t = self
            .traits
            .get(&trait_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| HermesError::NotFound(format!("trait {trait_id}")))?;
        let entry = self
            .vbuckets
            .get(&vbucket_id)
            .ok_or_else(|| HermesError::NotFound(format!("vbucket {vbucket_id}")))?;
        entry.traits.write().push(t);
        Ok(())
    }

    /// Link a blob into a VBucket, firing `on_link` on every attached
    /// Trait in attachment order.
    pub fn link(&self, vbucket_id: VBucketId, bucket_id: BucketId, blob_id: BlobId) -> Result<()> {
        let entry = self
            .vbuckets
            .get(&vbucket_id)
            .ok_or_else(|| HermesError::NotFound(format!("vbucket {vbucket_id}")))?;
        entry.links.write().push((bucket_id, blob_id));
        self.links_by_blob
            .entry((bucket_id, blob_id))
            .or_default()
            .push(vbucket_id);
        for t in entry.traits.read().iter() {
            t.on_link(vbucket_id, bucket_id, blob_id);
        }
        Ok(())
    }

    pub fn unlink(&self, vbucket_id: VBucketId, bucket_id: BucketId, blob_id: BlobId) -> Result<()> {
        let entry = self
            .vbuckets
            .get(&vbucket_id)
            .ok_or_else(|| HermesError::NotFound(format!("vbucket {vbucket_id}")))?;
        entry
            .links
            .write()
            .retain(|&(b, l)| !(b == bucket_id && l == blob_id));
        if let dashmap::mapref::entry::Entry::Occupied(mut e) =
            self.links_by_blob.entry((bucket_id, blob_id))
        {
            e.get_mut().retain(|&v| v != vbucket_id);
            if e.get().is_empty() {
                e.remove();
            }
        }
        for t in entry.traits.read().iter() {
            t.on_unlink(vbucket_id, bucket_id, blob_id);
        }
        Ok(())
    }

    /// VBuckets currently linking `(bucket_id, blob_id)`.
    fn vbuckets_linking(&self, bucket_id: BucketId, blob_id: BlobId) -> Vec<VBucketId> {
        self.links_by_blob
            .get(&(bucket_id, blob_id))
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Notify every VBucket that has linked this blob of a get, per
    /// spec §4.8. A no-op if nothing links it.
    pub fn notify_get_all(&self, bucket_id: BucketId, blob_id: BlobId, data: &[u8]) {
        for vbucket_id in self.vbuckets_linking(bucket_id, blob_id) {
            let _ = self.notify_get(vbucket_id, bucket_id, blob_id, data);
        }
    }

    /// Notify every VBucket that has linked this blob of a put/overwrite.
    pub fn notify_put_all(&self, bucket_id: BucketId, blob_id: BlobId, data: &[u8]) {
        for vbucket_id in self.vbuckets_linking(bucket_id, blob_id) {
            let _ = self.notify_put(vbucket_id, bucket_id, blob_id, data);
        }
    }

    /// Fire `on_get` on every Trait attached to `vbucket_id` for the
    /// data just read back from `blob_id`.
    pub fn notify_get(
        &self,
        vbucket_id: VBucketId,
        bucket_id: BucketId,
        blob_id: BlobId,
        data: &[u8],
    ) -> Result<()> {
        let entry = self
            .vbuckets
            .get(&vbucket_id)
            .ok_or_else(|| HermesError::NotFound(format!("vbucket {vbucket_id}")))?;
        for t in entry.traits.read().iter() {
            t.on_get(vbucket_id, bucket_id, blob_id, data);
        }
        Ok(())
    }

    pub fn notify_put(
        &self,
        vbucket_id: VBucketId,
        bucket_id: BucketId,
        blob_id: BlobId,
        data: &[u8],
    ) -> Result<()> {
        let entry = self
            .vbuckets
            .get(&vbucket_id)
            .ok_or_else(|| HermesError::NotFound(format!("vbucket {vbucket_id}")))?;
        for t in entry.traits.read().iter() {
            t.on_put(vbucket_id, bucket_id, blob_id, data);
        }
        Ok(())
    }

    pub fn linked_blobs(&self, vbucket_id: VBucketId) -> Result<Vec<(BucketId, BlobId)>> {
        self.vbuckets
            .get(&vbucket_id)
            .map(|e| e.links.read().clone())
            .ok_or_else(|| HermesError::NotFound(format!("vbucket {vbucket_id}")))
    }

    pub fn vbucket_name(&self, vbucket_id: VBucketId) -> Result<String> {
        self.vbuckets
            .get(&vbucket_id)
            .map(|e| e.name.clone())
            .ok_or_else(|| HermesError::NotFound(format!("vbucket {vbucket_id}")))
    }
}

impl Default for TraitLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingTrait {
        id: TraitId,
        links: AtomicUsize,
        unlinks: AtomicUsize,
        gets: AtomicUsize,
        puts: AtomicUsize,
    }

    impl Trait for CountingTrait {
        fn id(&self) -> TraitId {
            self.id
        }
        fn on_link(&self, _v: VBucketId, _b: BucketId, _l: BlobId) {
            self.links.fetch_add(1, Ordering::Relaxed);
        }
        fn on_unlink(&self, _v: VBucketId, _b: BucketId, _l: BlobId) {
            self.unlinks.fetch_add(1, Ordering::Relaxed);
        }
        fn on_get(&self, _v: VBucketId, _b: BucketId, _l: BlobId, _data: &[u8]) {
            self.gets.fetch_add(1, Ordering::Relaxed);
        }
        fn on_put(&self, _v: VBucketId, _b: BucketId, _l: BlobId, _data: &[u8]) {
            self.puts.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn link_and_unlink_fire_attached_trait_callbacks() {
        let layer = TraitLayer::new();
        let t = Arc::new(CountingTrait {
            id: 1,
            links: AtomicUsize::new(0),
            unlinks: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        });
        layer.register_trait(t.clone());

        let vb = layer.get_or_create_vbucket("mirror");
        layer.attach_trait(vb, 1).unwrap();

        layer.link(vb, 10, 100).unwrap();
        assert_eq!(t.links.load(Ordering::Relaxed), 1);
        assert_eq!(layer.linked_blobs(vb).unwrap(), vec![(10, 100)]);

        layer.unlink(vb, 10, 100).unwrap();
        assert_eq!(t.unlinks.load(Ordering::Relaxed), 1);
        assert!(layer.linked_blobs(vb).unwrap().is_empty());
    }

    #[test]
    fn vbucket_creation_is_idempotent_by_name() {
        let layer = TraitLayer::new();
        let a = layer.get_or_create_vbucket("mirror");
        let b = layer.get_or_create_vbucket("mirror");
        assert_eq!(a, b);
    }

    #[test]
    fn notify_all_reaches_every_vbucket_linking_the_blob() {
        let layer = TraitLayer::new();
        let t1 = Arc::new(CountingTrait {
            id: 1,
            links: AtomicUsize::new(0),
            unlinks: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        });
        let t2 = Arc::new(CountingTrait {
            id: 2,
            links: AtomicUsize::new(0),
            unlinks: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        });
        layer.register_trait(t1.clone());
        layer.register_trait(t2.clone());

        let mirror = layer.get_or_create_vbucket("mirror");
        let audit = layer.get_or_create_vbucket("audit");
        layer.attach_trait(mirror, 1).unwrap();
        layer.attach_trait(audit, 2).unwrap();
        layer.link(mirror, 10, 100).unwrap();
        layer.link(audit, 10, 100).unwrap();

        layer.notify_put_all(10, 100, b"data");
        assert_eq!(t1.puts.load(Ordering::Relaxed), 1);
        assert_eq!(t2.puts.load(Ordering::Relaxed), 1);

        layer.notify_get_all(10, 100, b"data");
        assert_eq!(t1.gets.load(Ordering::Relaxed), 1);
        assert_eq!(t2.gets.load(Ordering::Relaxed), 1);

        layer.unlink(mirror, 10, 100).unwrap();
        layer.notify_put_all(10, 100, b"data2");
        assert_eq!(t1.puts.load(Ordering::Relaxed), 1);
        assert_eq!(t2.puts.load(Ordering::Relaxed), 2);
    }
}
