//! C6 — Filesystem Engine.
//!
//! The public-facing surface a file-I/O interception shim (or a direct
//! caller) drives: `open`/`read`/`write`/`seek`/`sync`/`close`/`remove`
//! over synthetic file descriptors, plus the path-tracking predicate
//! that decides whether a given path is one Hermes should buffer at
//! all. Descriptors are allocated starting at `FD_OFFSET` so they never
//! collide with a real OS fd a caller might also be holding.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write as _};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::common::BucketId;
use crate::config::{AdapterMode, ClientConfig, PathRule, PlacementPolicy};
use crate::error::{HermesError, Result};
use crate::metadata::MetadataStore;
use crate::page_translator::PageTranslator;

/// First synthetic fd handed out. Chosen well above any real fd range
/// so a caller mixing Hermes fds with OS fds cannot confuse the two.
pub const FD_OFFSET: i32 = i32::MAX / 2;

#[derive(Debug, Clone)]
pub struct FileStat {
    pub bucket_id: BucketId,
    pub path: String,
    pub mode: AdapterMode,
    pub page_size: u64,
}

struct OpenFile {
    stat: FileStat,
    pos: AtomicU64,
}

/// Ordered include/exclude rule set deciding which paths get buffered.
/// Rules are evaluated longest-pattern-first; the first rule whose
/// pattern is a substring of the path wins. A path matching nothing is
/// included by default — this is an interception layer, it opts paths
/// out, not in.
pub struct PathTracker {
    rules: Vec<PathRule>,
}

impl PathTracker {
    pub fn new(mut inclusions: Vec<PathRule>, mut exclusions: Vec<PathRule>) -> Self {
        let mut rules = Vec::with_capacity(inclusions.len() + exclusions.len());
        rules.append(&mut inclusions);
        rules.append(&mut exclusions);
        rules.sort_by(|a, b| b.pattern.len().cmp(&a.pattern.len()));
        Self { rules }
    }

    pub fn should_intercept(&self, path: &str) -> bool {
        for rule in &self.rules {
            if path.contains(&rule.pattern) {
                return rule.include;
            }
        }
        true
    }
}

pub struct FilesystemEngine {
    metadata: Arc<MetadataStore>,
    page_translator: Arc<PageTranslator>,
    config: ClientConfig,
    path_tracker: PathTracker,
    open_files: DashMap<i32, OpenFile>,
    next_fd: AtomicI32,
}

impl FilesystemEngine {
    pub fn new(
        metadata: Arc<MetadataStore>,
        page_translator: Arc<PageTranslator>,
        config: ClientConfig,
    ) -> Self {
        let path_tracker = PathTracker::new(
            config.path_inclusions.clone(),
            config.path_exclusions.clone(),
        );
        Self {
            metadata,
            page_translator,
            config,
            path_tracker,
            open_files: DashMap::new(),
            next_fd: AtomicI32::new(FD_OFFSET),
        }
    }

    pub fn should_intercept(&self, path: &str) -> bool {
        self.path_tracker.should_intercept(path)
    }

    fn mode_for(&self, path: &str) -> AdapterMode {
        self.config
            .file_adapter_configs
            .iter()
            .find(|c| c.path == path)
            .and_then(|c| c.mode)
            .unwrap_or(self.config.base_adapter_mode)
    }

    fn page_size_for(&self, path: &str) -> u64 {
        self.config
            .file_adapter_configs
            .iter()
            .find(|c| c.path == path)
            .and_then(|c| c.page_size)
            .unwrap_or(self.config.file_page_size)
    }

    /// Open (creating bucket metadata if this is the first open) and
    /// return a synthetic fd.
    pub fn open(&self, path: &str) -> Result<i32> {
        let bucket_id = self.metadata.get_or_create_bucket(path);
        let mode = self.mode_for(path);
        let page_size = self.page_size_for(path);

        let existing_size = self.metadata.get_bucket(bucket_id)?.size;
        let size = if existing_size == 0 && mode != AdapterMode::Scratch {
            std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
        } else {
            existing_size
        };
        self.metadata.set_bucket_size(bucket_id, size)?;
        let backing_path = if mode == AdapterMode::Scratch {
            None
        } else {
            Some(path.to_string())
        };
        self.metadata
            .configure_bucket(bucket_id, backing_path, mode, page_size)?;

        let fd = self.next_fd.fetch_add(1, Ordering::Relaxed);
        self.open_files.insert(
            fd,
            OpenFile {
                stat: FileStat {
                    bucket_id,
                    path: path.to_string(),
                    mode,
                    page_size,
                },
                pos: AtomicU64::new(0),
            },
        );
        Ok(fd)
    }

    fn get_open(&self, fd: i32) -> Result<dashmap::mapref::one::Ref<'_, i32, OpenFile>> {
        self.open_files
            .get(&fd)
            .ok_or_else(|| HermesError::NotFound(format!("fd {fd}")))
    }

    fn backing_path<'a>(&self, f: &'a OpenFile) -> Option<&'a str> {
        if f.stat.mode == AdapterMode::Scratch {
            None
        } else {
            Some(&f.stat.path)
        }
    }

    pub fn read(&self, fd: i32, len: u64) -> Result<Vec<u8>> {
        let f = self.get_open(fd)?;
        let pos = f.pos.load(Ordering::Relaxed);
        let bucket = self.metadata.get_bucket(f.stat.bucket_id)?;
        let len = len.min(bucket.size.saturating_sub(pos));
        let data = self.page_translator.read(
            f.stat.bucket_id,
            self.backing_path(&f),
            pos,
            len,
        )?;
        f.pos.fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(data)
    }

    pub fn write(&self, fd: i32, data: &[u8]) -> Result<()> {
        let f = self.get_open(fd)?;
        let pos = f.pos.load(Ordering::Relaxed);
        self.page_translator.write(
            f.stat.bucket_id,
            self.backing_path(&f),
            f.stat.mode,
            pos,
            data,
            PlacementPolicy::MinimizeIoTime,
            false,
        )?;
        let new_pos = pos + data.len() as u64;
        f.pos.store(new_pos, Ordering::Relaxed);
        let bucket = self.metadata.get_bucket(f.stat.bucket_id)?;
        if new_pos > bucket.size {
            self.metadata.set_bucket_size(f.stat.bucket_id, new_pos)?;
        }
        Ok(())
    }

    pub fn seek(&self, fd: i32, from: SeekFrom) -> Result<u64> {
        let f = self.get_open(fd)?;
        let bucket = self.metadata.get_bucket(f.stat.bucket_id)?;
        let new_pos = match from {
            SeekFrom::Start(p) => p,
            SeekFrom::End(delta) => ((bucket.size as i64) + delta).max(0) as u64,
            SeekFrom::Current(delta) => {
                ((f.pos.load(Ordering::Relaxed) as i64) + delta).max(0) as u64
            }
        };
        f.pos.store(new_pos, Ordering::Relaxed);
        Ok(new_pos)
    }

    /// Flush every resident page of the bucket behind `fd` to its
    /// backing file, then truncate that file to the bucket's logical
    /// size. A no-op in scratch mode, which has no backing file.
    pub fn sync(&self, fd: i32) -> Result<()> {
        let f = self.get_open(fd)?;
        if f.stat.mode == AdapterMode::Scratch {
            return Ok(());
        }
        let bucket = self.metadata.get_bucket(f.stat.bucket_id)?;
        let blobs = self.metadata.blobs_in_bucket(f.stat.bucket_id)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(&f.stat.path)?;
        for blob in &blobs {
            if !blob.is_dirty {
                continue;
            }
            let page: u64 = blob.name.parse().map_err(|_| {
                HermesError::Internal(format!("blob name '{}' is not a page index", blob.name))
            })?;
            let data = self
                .page_translator
                .read(f.stat.bucket_id, None, page * f.stat.page_size, blob.size)?;
            file.seek(SeekFrom::Start(page * f.stat.page_size))?;
            file.write_all(&data)?;
        }
        file.set_len(bucket.size)?;
        Ok(())
    }

    /// Close releases the fd; in default mode this implies a `sync`.
    pub fn close(&self, fd: i32) -> Result<()> {
        let mode = self.get_open(fd)?.stat.mode;
        if mode == AdapterMode::Default {
            self.sync(fd)?;
        }
        self.open_files.remove(&fd);
        Ok(())
    }

    /// Destroy the bucket behind `path` and remove its backing file if
    /// any. Flushes dirty blobs first unless the bucket is scratch-mode
    /// or has no backing file.
    pub fn remove(&self, path: &str) -> Result<()> {
        let bucket_id = self.metadata.get_or_create_bucket(path);
        let bucket = self.metadata.get_bucket(bucket_id)?;
        if bucket.mode != AdapterMode::Scratch {
            let _ = std::fs::remove_file(path);
        }
        self.metadata.destroy_bucket(bucket_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_tracker_prefers_longest_match() {
        let tracker = PathTracker::new(
            vec![],
            vec![
                PathRule {
                    pattern: "/tmp".to_string(),
                    include: false,
                },
                PathRule {
                    pattern: "/tmp/keep-me".to_string(),
                    include: true,
                },
            ],
        );
        assert!(tracker.should_intercept("/tmp/keep-me/data.bin"));
        assert!(!tracker.should_intercept("/tmp/other/data.bin"));
    }

    #[test]
    fn path_tracker_defaults_to_include() {
        let tracker = PathTracker::new(vec![], vec![]);
        assert!(tracker.should_intercept("/anything"));
    }

    #[test]
    fn read_past_bucket_size_returns_short_count() {
        let metadata = Arc::new(MetadataStore::new());
        let buffer_pool = Arc::new(crate::buffer_pool::BufferPool::new());
        let devices = Arc::new(DashMap::new());
        let info = crate::config::DeviceInfo {
            dev_name: "ram0".to_string(),
            io_api: crate::config::IoInterface::Ram,
            mount_dir: String::new(),
            capacity: Some(1 << 20),
            block_size: 4096,
            slab_sizes: vec![4096],
            bandwidth_mbps: 10_000.0,
            latency: std::time::Duration::from_micros(1),
            is_shared_device: false,
            borg_capacity_thresh: (0.1, 0.95),
        };
        buffer_pool.register_device(0, &info);
        devices.insert(0, crate::device::Device::init(0, info.clone()).unwrap());
        let dpe = Arc::new(crate::dpe::Dpe::new(vec![(0, info)]));
        let traits = Arc::new(crate::metadata::traits::TraitLayer::new());
        let pt = Arc::new(PageTranslator::new(
            metadata.clone(),
            buffer_pool,
            dpe,
            devices,
            traits,
            4096,
        ));
        let engine = FilesystemEngine::new(metadata, pt, ClientConfig::default());
        let fd = engine.open("/scratch/file.bin").unwrap();
        engine.write(fd, &vec![1u8; 1024]).unwrap();
        engine.seek(fd, SeekFrom::Start(0)).unwrap();

        let data = engine.read(fd, 5000).unwrap();
        assert_eq!(data.len(), 1024);
    }

    #[test]
    fn fd_allocation_starts_at_offset() {
        let metadata = Arc::new(MetadataStore::new());
        let buffer_pool = Arc::new(crate::buffer_pool::BufferPool::new());
        let devices = Arc::new(DashMap::new());
        let dpe = Arc::new(crate::dpe::Dpe::new(vec![]));
        let traits = Arc::new(crate::metadata::traits::TraitLayer::new());
        let pt = Arc::new(PageTranslator::new(
            metadata.clone(),
            buffer_pool,
            dpe,
            devices,
            traits,
            4096,
        ));
        let engine = FilesystemEngine::new(metadata, pt, ClientConfig::default());
        let fd = engine.open("/scratch/file.bin").unwrap();
        assert_eq!(fd, FD_OFFSET);
    }
}
