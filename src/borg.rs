//! C7 — Buffer Organizer (BORG).
//!
//! Background service that keeps devices within their configured
//! occupancy band and keeps dirty blobs from drifting too far from
//! their backing file. Two independent periodic triggers drive it: a
//! reorganization pass that evicts the coldest blobs off devices above
//! their max threshold (and promotes the hottest blobs onto devices
//! below their min threshold), and a flush pass that writes dirty blobs
//! back to their bucket's backing file. A bucket destroyed mid-migration
//! is handled by checking bucket liveness right before the metadata
//! swap: an in-flight migration still completes its device I/O, but its
//! result is discarded rather than published if the bucket is gone.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write as _};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::buffer_pool::BufferPool;
use crate::common::{BlobId, BufferRef, DeviceId};
use crate::config::{BorgConfig, DeviceInfo, PlacementPolicy};
use crate::device::Device;
use crate::dpe::Dpe;
use crate::error::Result;
use crate::metadata::{Blob, MetadataStore};

fn normalize(value: f32, min: f32, max: f32) -> f32 {
    if max <= min {
        return 0.0;
    }
    ((value - min) / (max - min)).clamp(0.0, 1.0)
}

pub struct Borg {
    metadata: Arc<MetadataStore>,
    buffer_pool: Arc<BufferPool>,
    devices: Arc<DashMap<DeviceId, Device>>,
    device_infos: Vec<(DeviceId, DeviceInfo)>,
    dpe: Arc<Dpe>,
    config: BorgConfig,
}

impl Borg {
    pub fn new(
        metadata: Arc<MetadataStore>,
        buffer_pool: Arc<BufferPool>,
        devices: Arc<DashMap<DeviceId, Device>>,
        device_infos: Vec<(DeviceId, DeviceInfo)>,
        dpe: Arc<Dpe>,
        config: BorgConfig,
    ) -> Self {
        Self {
            metadata,
            buffer_pool,
            devices,
            device_infos,
            dpe,
            config,
        }
    }

    /// Weighted blend of a recency term (newer is higher) and a
    /// frequency term (more accesses is higher), each normalized into
    /// `[0, 1]` by the configured min/max bounds before weighting.
    pub fn score(&self, blob: &Blob, now: SystemTime) -> f32 {
        let age_s = blob.access.age(now).as_secs_f32();
        let r_score = 1.0 - normalize(age_s, self.config.recency_min, self.config.recency_max);
        let f_score = normalize(
            blob.access.access_count as f32,
            self.config.freq_min,
            self.config.freq_max,
        );
        self.config.recency_weight * r_score + self.config.freq_weight * f_score
    }

    fn device_info(&self, device_id: DeviceId) -> Option<&DeviceInfo> {
        self.device_infos
            .iter()
            .find(|(id, _)| *id == device_id)
            .map(|(_, info)| info)
    }

    /// Find blobs with at least one buffer resident on `device_id`,
    /// ascending by score (coldest first).
    fn coldest_on_device(&self, device_id: DeviceId) -> Vec<Blob> {
        let now = SystemTime::now();
        let mut blobs: Vec<Blob> = self
            .metadata
            .all_blobs()
            .into_iter()
            .filter(|b| b.buffers.iter().any(|buf| buf.device_id == device_id))
            .collect();
        blobs.sort_by(|a, b| {
            self.score(a, now)
                .partial_cmp(&self.score(b, now))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        blobs
    }

    /// Read a blob's entire contents off its current buffers, in logical
    /// (blob-offset) order.
    fn read_blob_data(&self, blob: &Blob) -> Result<Vec<u8>> {
        let total_len: u64 = blob.buffers.iter().map(|b| b.length).sum();
        let mut data = vec![0u8; total_len as usize];
        for buf in &blob.buffers {
            let dev = self
                .devices
                .get(&buf.device_id)
                .ok_or_else(|| crate::error::HermesError::NotFound(format!("device {}", buf.device_id)))?;
            let start = buf.blob_offset as usize;
            dev.read(&mut data[start..start + buf.length as usize], buf.device_offset)?;
        }
        Ok(data)
    }

    /// Highest-scoring blobs resident on a device slower (lower
    /// bandwidth) than `target`, descending by score (hottest first) —
    /// the promotion candidates for a device that has fallen below its
    /// min occupancy threshold.
    fn hottest_on_slower_devices(&self, target: DeviceId) -> Vec<Blob> {
        let Some(target_info) = self.device_info(target) else {
            return Vec::new();
        };
        let slower: Vec<DeviceId> = self
            .device_infos
            .iter()
            .filter(|(id, info)| *id != target && info.bandwidth_mbps < target_info.bandwidth_mbps)
            .map(|(id, _)| *id)
            .collect();
        if slower.is_empty() {
            return Vec::new();
        }

        let now = SystemTime::now();
        let mut blobs: Vec<Blob> = self
            .metadata
            .all_blobs()
            .into_iter()
            .filter(|b| b.buffers.iter().any(|buf| slower.contains(&buf.device_id)))
            .collect();
        blobs.sort_by(|a, b| {
            self.score(b, now)
                .partial_cmp(&self.score(a, now))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        blobs
    }

    /// Relocate a blob's buffers onto devices picked by the DPE,
    /// excluding `avoid`. Discards the migration (releasing the newly
    /// reserved buffers instead of publishing them) if the owning
    /// bucket has disappeared by the time the copy completes.
    fn migrate_blob(&self, blob: &Blob, avoid: DeviceId) -> Result<()> {
        let data = self.read_blob_data(blob)?;
        let total_len = data.len() as u64;
        if total_len == 0 {
            return Ok(());
        }

        let schedule: Vec<(DeviceId, u64)> = self
            .dpe
            .schedule(total_len, PlacementPolicy::MinimizeIoTime, false, &self.buffer_pool)?
            .into_iter()
            .filter(|(id, _)| *id != avoid)
            .collect();
        if schedule.is_empty() {
            return Ok(());
        }

        let mut new_buffers = Vec::new();
        let mut offset = 0u64;
        for (device_id, bytes) in schedule {
            let reserved = self.buffer_pool.reserve(device_id, bytes)?;
            for r in reserved {
                let dev = self
                    .devices
                    .get(&device_id)
                    .ok_or_else(|| crate::error::HermesError::NotFound(format!("device {device_id}")))?;
                let end = (offset + r.length).min(total_len);
                dev.write(&data[offset as usize..end as usize], r.device_offset)?;
                new_buffers.push(BufferRef::new(
                    r.buffer_id,
                    r.device_id,
                    r.device_offset,
                    offset,
                    end - offset,
                ));
                offset = end;
            }
        }

        // The bucket may have been destroyed while the copy above was
        // running. If so, discard the migration rather than reviving a
        // blob whose bucket no longer exists.
        if self.metadata.get_bucket(blob.bucket_id).is_err() {
            self.buffer_pool.release(&new_buffers)?;
            return Ok(());
        }

        let (_, old_buffers) = self.metadata.put_or_update_blob(
            blob.bucket_id,
            &blob.name,
            blob.size,
            new_buffers,
            blob.is_dirty,
        )?;
        self.buffer_pool.release(&old_buffers)?;
        Ok(())
    }

    /// Copy a blob's buffers onto `target` specifically, bypassing the
    /// DPE — used for promotion, where the destination is dictated by
    /// score rather than placement policy. Same discard-on-destroyed-
    /// bucket handling as `migrate_blob`.
    fn migrate_blob_to(&self, blob: &Blob, target: DeviceId) -> Result<()> {
        let data = self.read_blob_data(blob)?;
        let total_len = data.len() as u64;
        if total_len == 0 {
            return Ok(());
        }

        let reserved = self.buffer_pool.reserve(target, total_len)?;
        let mut new_buffers = Vec::new();
        let mut offset = 0u64;
        for r in reserved {
            let dev = self
                .devices
                .get(&target)
                .ok_or_else(|| crate::error::HermesError::NotFound(format!("device {target}")))?;
            let end = (offset + r.length).min(total_len);
            dev.write(&data[offset as usize..end as usize], r.device_offset)?;
            new_buffers.push(BufferRef::new(
                r.buffer_id,
                r.device_id,
                r.device_offset,
                offset,
                end - offset,
            ));
            offset = end;
        }

        if self.metadata.get_bucket(blob.bucket_id).is_err() {
            self.buffer_pool.release(&new_buffers)?;
            return Ok(());
        }

        let (_, old_buffers) = self.metadata.put_or_update_blob(
            blob.bucket_id,
            &blob.name,
            blob.size,
            new_buffers,
            blob.is_dirty,
        )?;
        self.buffer_pool.release(&old_buffers)?;
        Ok(())
    }

    /// One reorganization pass: evict the coldest blobs off every
    /// over-threshold device, migrating them elsewhere; promote the
    /// hottest blobs from a slower device onto every under-threshold
    /// device.
    pub fn reorganize(&self) -> Result<()> {
        for (device_id, info) in &self.device_infos {
            let occupancy = match self.buffer_pool.occupancy(*device_id) {
                Ok(o) => o,
                Err(_) => continue,
            };
            if occupancy > info.borg_capacity_thresh.1 {
                debug!(device = *device_id, occupancy, "device above max threshold, evicting");
                for blob in self.coldest_on_device(*device_id) {
                    if self.buffer_pool.occupancy(*device_id).unwrap_or(0.0) <= info.borg_capacity_thresh.1 {
                        break;
                    }
                    if let Err(e) = self.migrate_blob(&blob, *device_id) {
                        warn!(blob = blob.id, error = %e, "migration failed, leaving blob in place");
                    }
                }
            } else if occupancy < info.borg_capacity_thresh.0 {
                debug!(device = *device_id, occupancy, "device below min threshold, promoting");
                for blob in self.hottest_on_slower_devices(*device_id) {
                    if self.buffer_pool.occupancy(*device_id).unwrap_or(1.0) >= info.borg_capacity_thresh.0 {
                        break;
                    }
                    if let Err(e) = self.migrate_blob_to(&blob, *device_id) {
                        warn!(blob = blob.id, error = %e, "promotion failed, leaving blob in place");
                    }
                }
            }
        }
        Ok(())
    }

    /// One flush pass: write every dirty blob back to its bucket's
    /// backing file, then truncate that file to the bucket's logical
    /// size. Scratch-mode buckets and buckets without a backing path
    /// are skipped.
    pub fn flush_dirty(&self) -> Result<()> {
        for blob_id in self.dirty_blob_ids() {
            let blob = match self.metadata.get_blob_by_id(blob_id) {
                Ok(b) => b,
                Err(_) => continue,
            };
            let bucket = match self.metadata.get_bucket(blob.bucket_id) {
                Ok(b) => b,
                Err(_) => continue,
            };
            if bucket.mode == crate::config::AdapterMode::Scratch {
                continue;
            }
            let Some(path) = &bucket.backing_path else {
                continue;
            };
            let page: u64 = match blob.name.parse() {
                Ok(p) => p,
                Err(_) => continue,
            };
            let mut data = vec![0u8; blob.size as usize];
            for buf in &blob.buffers {
                let dev = match self.devices.get(&buf.device_id) {
                    Some(d) => d,
                    None => continue,
                };
                let start = buf.blob_offset as usize;
                dev.read(&mut data[start..start + buf.length as usize], buf.device_offset)?;
            }
            let mut file = OpenOptions::new().write(true).create(true).open(path)?;
            file.seek(SeekFrom::Start(page * bucket.page_size))?;
            file.write_all(&data)?;
            file.set_len(bucket.size)?;
        }
        Ok(())
    }

    fn dirty_blob_ids(&self) -> Vec<BlobId> {
        self.metadata
            .all_blobs()
            .into_iter()
            .filter(|b| b.is_dirty)
            .map(|b| b.id)
            .collect()
    }

    /// Drive the two periodic triggers until `shutdown` fires. Intended
    /// to be spawned once onto the daemon's runtime.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut reorg_tick = tokio::time::interval(self.config.blob_reorg_period);
        let mut flush_tick = tokio::time::interval(self.config.flush_period);
        info!("buffer organizer started");
        loop {
            tokio::select! {
                _ = reorg_tick.tick() => {
                    if let Err(e) = self.reorganize() {
                        warn!(error = %e, "reorganization pass failed");
                    }
                }
                _ = flush_tick.tick() => {
                    if let Err(e) = self.flush_dirty() {
                        warn!(error = %e, "flush pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("buffer organizer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IoInterface;
    use std::time::Duration;

    fn blob(age_secs: u64, access_count: u64) -> Blob {
        Blob {
            id: 0,
            bucket_id: 0,
            name: "0".to_string(),
            size: 0,
            buffers: vec![],
            is_dirty: false,
            access: crate::common::AccessStats {
                last_access: SystemTime::now() - Duration::from_secs(age_secs),
                access_count,
            },
        }
    }

    fn borg_with(config: BorgConfig) -> Borg {
        Borg::new(
            Arc::new(MetadataStore::new()),
            Arc::new(BufferPool::new()),
            Arc::new(DashMap::new()),
            vec![],
            Arc::new(Dpe::new(vec![])),
            config,
        )
    }

    #[test]
    fn fresh_frequently_accessed_blob_scores_higher_than_stale_one() {
        let cfg = BorgConfig {
            recency_min: 0.0,
            recency_max: 3600.0,
            freq_min: 0.0,
            freq_max: 100.0,
            recency_weight: 0.5,
            freq_weight: 0.5,
            ..BorgConfig::default()
        };
        let borg = borg_with(cfg);
        let now = SystemTime::now();
        let hot = blob(1, 90);
        let cold = blob(3600, 1);
        assert!(borg.score(&hot, now) > borg.score(&cold, now));
    }

    #[test]
    fn weights_of_zero_ignore_that_term() {
        let cfg = BorgConfig {
            recency_min: 0.0,
            recency_max: 3600.0,
            freq_min: 0.0,
            freq_max: 100.0,
            recency_weight: 0.0,
            freq_weight: 1.0,
            ..BorgConfig::default()
        };
        let borg = borg_with(cfg);
        let now = SystemTime::now();
        let a = blob(3600, 50);
        let b = blob(1, 50);
        assert_eq!(borg.score(&a, now), borg.score(&b, now));
    }

    #[test]
    fn device_info_lookup_is_present() {
        let info = DeviceInfo {
            dev_name: "ram0".to_string(),
            io_api: IoInterface::Ram,
            mount_dir: String::new(),
            capacity: Some(4096),
            block_size: 4096,
            slab_sizes: vec![4096],
            bandwidth_mbps: 1.0,
            latency: Duration::from_micros(1),
            is_shared_device: false,
            borg_capacity_thresh: (0.1, 0.9),
        };
        let borg = Borg::new(
            Arc::new(MetadataStore::new()),
            Arc::new(BufferPool::new()),
            Arc::new(DashMap::new()),
            vec![(0, info)],
            Arc::new(Dpe::new(vec![])),
            BorgConfig::default(),
        );
        assert!(borg.device_info(0).is_some());
        assert!(borg.device_info(1).is_none());
    }

    fn ram_dev(name: &str, bandwidth: f64, thresh: (f32, f32)) -> DeviceInfo {
        DeviceInfo {
            dev_name: name.to_string(),
            io_api: IoInterface::Ram,
            mount_dir: String::new(),
            capacity: Some(4096),
            block_size: 4096,
            slab_sizes: vec![4096],
            bandwidth_mbps: bandwidth,
            latency: Duration::from_micros(1),
            is_shared_device: false,
            borg_capacity_thresh: thresh,
        }
    }

    #[test]
    fn reorganize_promotes_hottest_blob_from_slower_device_onto_underfull_fast_device() {
        let slow = ram_dev("slow", 10.0, (0.0, 1.0));
        let fast = ram_dev("fast", 1000.0, (0.5, 1.0));
        let device_infos = vec![(0, slow.clone()), (1, fast.clone())];

        let metadata = Arc::new(MetadataStore::new());
        let buffer_pool = Arc::new(BufferPool::new());
        let devices = Arc::new(DashMap::new());
        buffer_pool.register_device(0, &slow);
        buffer_pool.register_device(1, &fast);
        devices.insert(0, Device::init(0, slow).unwrap());
        devices.insert(1, Device::init(1, fast).unwrap());
        let dpe = Arc::new(Dpe::new(device_infos.clone()));

        let bucket = metadata.get_or_create_bucket("b");
        let reserved = buffer_pool.reserve(0, 4096).unwrap();
        {
            let dev0 = devices.get(&0).unwrap();
            dev0.write(&[9u8; 4096], reserved[0].device_offset).unwrap();
        }
        let buf = BufferRef::new(
            reserved[0].buffer_id,
            reserved[0].device_id,
            reserved[0].device_offset,
            0,
            4096,
        );
        metadata
            .put_or_update_blob(bucket, "0", 4096, vec![buf], false)
            .unwrap();

        let borg = Borg::new(
            metadata.clone(),
            buffer_pool.clone(),
            devices,
            device_infos,
            dpe,
            BorgConfig::default(),
        );

        // Slow device is full (occupancy 1.0, at but not above its max
        // threshold); fast device is empty (occupancy 0.0 < its 0.5 min).
        borg.reorganize().unwrap();

        let blob = metadata.get_blob(bucket, "0").unwrap();
        assert_eq!(blob.buffers[0].device_id, 1);
        assert!(buffer_pool.occupancy(1).unwrap() > 0.0);
    }
}
