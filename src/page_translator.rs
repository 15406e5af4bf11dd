//! C5 — Page Translator.
//!
//! Translates a logical `(bucket, offset, length)` byte range into
//! page-aligned Blob operations. A write that does not land on a page
//! boundary, or does not cover a whole page, first reconstructs the
//! untouched part of that page ("read-gap-fill"): from the existing
//! resident Blob if one is cached, otherwise from the bucket's external
//! backing file, otherwise zero-filled past end-of-file. Scratch-mode
//! buckets have no backing file and skip the external-file leg of
//! gap-fill entirely — a page that isn't resident is simply new, zeroed
//! space.

use std::fs::File;
use std::io::{Read as StdRead, Seek, SeekFrom};
use std::sync::Arc;

use dashmap::DashMap;

use crate::buffer_pool::BufferPool;
use crate::common::{BucketId, BufferRef, DeviceId, PageIndex};
use crate::config::{AdapterMode, PlacementPolicy};
use crate::device::Device;
use crate::dpe::Dpe;
use crate::error::{HermesError, Result};
use crate::metadata::traits::TraitLayer;
use crate::metadata::MetadataStore;

pub struct PageTranslator {
    metadata: Arc<MetadataStore>,
    buffer_pool: Arc<BufferPool>,
    dpe: Arc<Dpe>,
    devices: Arc<DashMap<DeviceId, Device>>,
    traits: Arc<TraitLayer>,
    page_size: u64,
}

/// Which page(s) a byte range touches and how much of each.
struct PageSpan {
    page: PageIndex,
    page_local_offset: u64,
    len: u64,
}

fn split_into_pages(offset: u64, len: u64, page_size: u64) -> Vec<PageSpan> {
    let mut spans = Vec::new();
    let mut remaining = len;
    let mut pos = offset;
    while remaining > 0 {
        let page = pos / page_size;
        let page_local_offset = pos % page_size;
        let take = remaining.min(page_size - page_local_offset);
        spans.push(PageSpan {
            page,
            page_local_offset,
            len: take,
        });
        pos += take;
        remaining -= take;
    }
    spans
}

impl PageTranslator {
    pub fn new(
        metadata: Arc<MetadataStore>,
        buffer_pool: Arc<BufferPool>,
        dpe: Arc<Dpe>,
        devices: Arc<DashMap<DeviceId, Device>>,
        traits: Arc<TraitLayer>,
        page_size: u64,
    ) -> Self {
        Self {
            metadata,
            buffer_pool,
            dpe,
            devices,
            traits,
            page_size,
        }
    }

    fn read_resident(&self, buffers: &[BufferRef], page: &mut [u8]) -> Result<()> {
        for buf in buffers {
            let dev = self
                .devices
                .get(&buf.device_id)
                .ok_or_else(|| HermesError::NotFound(format!("device {}", buf.device_id)))?;
            let start = buf.blob_offset as usize;
            let end = start + buf.length as usize;
            dev.read(&mut page[start..end], buf.device_offset)?;
        }
        Ok(())
    }

    fn read_gap_fill(
        &self,
        backing_path: Option<&str>,
        page_offset: u64,
        buf: &mut [u8],
    ) -> Result<()> {
        let Some(path) = backing_path else {
            return Ok(());
        };
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let file_len = file.metadata()?.len();
        if page_offset >= file_len {
            return Ok(());
        }
        file.seek(SeekFrom::Start(page_offset))?;
        let readable = (file_len - page_offset).min(buf.len() as u64) as usize;
        file.read_exact(&mut buf[..readable])?;
        Ok(())
    }

    /// Write `data` at logical `offset` inside `bucket_id`, gap-filling
    /// each touched page as needed and placing fresh buffers via the DPE.
    pub fn write(
        &self,
        bucket_id: BucketId,
        backing_path: Option<&str>,
        mode: AdapterMode,
        offset: u64,
        data: &[u8],
        policy: PlacementPolicy,
        rr_split: bool,
    ) -> Result<()> {
        let mut cursor = 0usize;
        for span in split_into_pages(offset, data.len() as u64, self.page_size) {
            let name = span.page.to_string();
            let existing = self.metadata.get_blob(bucket_id, &name).ok();
            let whole_page = span.page_local_offset == 0 && span.len == self.page_size;

            let mut page_buf = vec![0u8; self.page_size as usize];
            if !whole_page {
                if let Some(blob) = &existing {
                    self.read_resident(&blob.buffers, &mut page_buf)?;
                } else if mode != AdapterMode::Scratch {
                    self.read_gap_fill(backing_path, span.page * self.page_size, &mut page_buf)?;
                }
            }
            let start = span.page_local_offset as usize;
            let end = start + span.len as usize;
            page_buf[start..end].copy_from_slice(&data[cursor..cursor + span.len as usize]);
            cursor += span.len as usize;

            let schedule = self
                .dpe
                .schedule(self.page_size, policy, rr_split, &self.buffer_pool)?;

            let mut new_buffers = Vec::new();
            let mut blob_offset = 0u64;
            for (device_id, bytes) in schedule {
                let reserved = match self.buffer_pool.reserve(device_id, bytes) {
                    Ok(r) => r,
                    Err(e) => {
                        for r in &new_buffers {
                            let _ = self.buffer_pool.release(std::slice::from_ref(r));
                        }
                        return Err(e);
                    }
                };
                for r in reserved {
                    let dev = self
                        .devices
                        .get(&device_id)
                        .ok_or_else(|| HermesError::NotFound(format!("device {device_id}")))?;
                    let slice_end = (blob_offset + r.length).min(self.page_size);
                    dev.write(
                        &page_buf[blob_offset as usize..slice_end as usize],
                        r.device_offset,
                    )?;
                    new_buffers.push(BufferRef::new(
                        r.buffer_id,
                        r.device_id,
                        r.device_offset,
                        blob_offset,
                        slice_end - blob_offset,
                    ));
                    blob_offset = slice_end;
                }
            }

            let (blob_id, old_buffers) = self
                .metadata
                .put_or_update_blob(bucket_id, &name, self.page_size, new_buffers, true)?;
            if !old_buffers.is_empty() {
                self.buffer_pool.release(&old_buffers)?;
            }
            self.traits.notify_put_all(bucket_id, blob_id, &page_buf);
        }
        Ok(())
    }

    /// Read `len` bytes starting at logical `offset` from `bucket_id`.
    /// Pages with no resident Blob fall back to the backing file, then
    /// to zero-fill past end-of-file.
    pub fn read(
        &self,
        bucket_id: BucketId,
        backing_path: Option<&str>,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len as usize];
        let mut cursor = 0usize;
        for span in split_into_pages(offset, len, self.page_size) {
            let name = span.page.to_string();
            let start = span.page_local_offset as usize;
            let end = start + span.len as usize;

            if let Ok(blob) = self.metadata.get_blob(bucket_id, &name) {
                let mut page_buf = vec![0u8; self.page_size as usize];
                self.read_resident(&blob.buffers, &mut page_buf)?;
                out[cursor..cursor + span.len as usize].copy_from_slice(&page_buf[start..end]);
                self.metadata.touch_blob(blob.id);
                self.traits.notify_get_all(bucket_id, blob.id, &page_buf);
            } else {
                let mut page_buf = vec![0u8; self.page_size as usize];
                self.read_gap_fill(backing_path, span.page * self.page_size, &mut page_buf)?;
                out[cursor..cursor + span.len as usize].copy_from_slice(&page_buf[start..end]);
            }
            cursor += span.len as usize;
        }
        Ok(out)
    }
}
