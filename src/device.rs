//! C1 — Device Client.
//!
//! A uniform read/write/init transport over one storage tier. No caching
//! happens here; it is a pure transport, dispatched through a tagged enum
//! (`DeviceBackend`) rather than a trait object — the set of backends is
//! small and closed, matching the "Dynamic dispatch" design note and the
//! original `BorgIoClient` interface (`Init`/`Write`/`Read` over a
//! `DeviceInfo`).

use std::fs::{File, OpenOptions};
use std::io::{Read as _, Seek, SeekFrom, Write as _};
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::config::{DeviceInfo, IoInterface};
use crate::error::{HermesError, Result};

/// One initialized storage tier instance.
pub struct Device {
    pub id: crate::common::DeviceId,
    pub info: DeviceInfo,
    backend: DeviceBackend,
}

enum DeviceBackend {
    Ram { region: Mutex<Vec<u8>> },
    Posix { file: Mutex<File> },
}

impl Device {
    /// Initialize a device from its static configuration. RAM devices
    /// allocate one contiguous region of `capacity` bytes; POSIX devices
    /// create/truncate a single backing file `{mount_dir}/slab_{name}`.
    pub fn init(id: crate::common::DeviceId, info: DeviceInfo) -> Result<Self> {
        info.validate()?;
        let capacity = info.capacity.unwrap_or(u64::MAX);
        let backend = match info.io_api {
            IoInterface::Ram => {
                let cap = usize::try_from(capacity).map_err(|_| {
                    HermesError::ConfigInvalid(format!(
                        "device {}: RAM capacity too large for this platform",
                        info.dev_name
                    ))
                })?;
                debug!(device = %info.dev_name, bytes = cap, "allocating RAM device region");
                DeviceBackend::Ram {
                    region: Mutex::new(vec![0u8; cap]),
                }
            }
            IoInterface::Posix => {
                let path: PathBuf =
                    PathBuf::from(&info.mount_dir).join(format!("slab_{}", info.dev_name));
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)?;
                file.set_len(capacity)?;
                debug!(device = %info.dev_name, path = %path.display(), "created POSIX slab file");
                DeviceBackend::Posix {
                    file: Mutex::new(file),
                }
            }
        };
        Ok(Self { id, info, backend })
    }

    /// Write `src` at device-local offset `off`. A short write is an
    /// error, never a retry trigger.
    pub fn write(&self, src: &[u8], off: u64) -> Result<()> {
        match &self.backend {
            DeviceBackend::Ram { region } => {
                let mut region = region.lock().unwrap();
                let start = off as usize;
                let end = start
                    .checked_add(src.len())
                    .ok_or_else(|| HermesError::Internal("device offset overflow".into()))?;
                if end > region.len() {
                    return Err(HermesError::ExternalIo(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "write past end of RAM device region",
                    )));
                }
                region[start..end].copy_from_slice(src);
                Ok(())
            }
            DeviceBackend::Posix { file } => {
                let mut file = file.lock().unwrap();
                file.seek(SeekFrom::Start(off))?;
                let written = file.write(src)?;
                if written != src.len() {
                    warn!(device = %self.info.dev_name, off, requested = src.len(), written, "short write");
                    return Err(HermesError::ExternalIo(std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        "short write to POSIX device",
                    )));
                }
                Ok(())
            }
        }
    }

    /// Read `dst.len()` bytes from device-local offset `off` into `dst`.
    /// A short read is an error.
    pub fn read(&self, dst: &mut [u8], off: u64) -> Result<()> {
        match &self.backend {
            DeviceBackend::Ram { region } => {
                let region = region.lock().unwrap();
                let start = off as usize;
                let end = start
                    .checked_add(dst.len())
                    .ok_or_else(|| HermesError::Internal("device offset overflow".into()))?;
                if end > region.len() {
                    return Err(HermesError::ExternalIo(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "read past end of RAM device region",
                    )));
                }
                dst.copy_from_slice(&region[start..end]);
                Ok(())
            }
            DeviceBackend::Posix { file } => {
                let mut file = file.lock().unwrap();
                file.seek(SeekFrom::Start(off))?;
                let read = file.read(dst)?;
                if read != dst.len() {
                    warn!(device = %self.info.dev_name, off, requested = dst.len(), read, "short read");
                    return Err(HermesError::ExternalIo(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "short read from POSIX device",
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn capacity(&self) -> u64 {
        self.info.capacity.unwrap_or(u64::MAX)
    }

    /// Force the backing file's data to stable storage. A no-op for
    /// RAM devices, which have no durability to speak of.
    pub fn sync(&self) -> Result<()> {
        if let DeviceBackend::Posix { file } = &self.backend {
            file.lock().unwrap().sync_data()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ram_info(name: &str, capacity: u64) -> DeviceInfo {
        DeviceInfo {
            dev_name: name.to_string(),
            io_api: IoInterface::Ram,
            mount_dir: String::new(),
            capacity: Some(capacity),
            block_size: 4096,
            slab_sizes: vec![4096, 16384],
            bandwidth_mbps: 10_000.0,
            latency: Duration::from_micros(1),
            is_shared_device: false,
            borg_capacity_thresh: (0.2, 0.8),
        }
    }

    #[test]
    fn ram_round_trip() {
        let dev = Device::init(0, ram_info("ram0", 4096)).unwrap();
        dev.write(b"hello", 10).unwrap();
        let mut buf = [0u8; 5];
        dev.read(&mut buf, 10).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn ram_write_past_end_errors() {
        let dev = Device::init(0, ram_info("ram0", 16)).unwrap();
        assert!(dev.write(b"0123456789ABCDEFGH", 0).is_err());
    }

    #[test]
    fn posix_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut info = ram_info("posix0", 4096);
        info.io_api = IoInterface::Posix;
        info.mount_dir = dir.path().display().to_string();
        let dev = Device::init(1, info).unwrap();
        dev.write(b"world", 100).unwrap();
        let mut buf = [0u8; 5];
        dev.read(&mut buf, 100).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn sync_is_a_no_op_on_ram_and_succeeds_on_posix() {
        let ram = Device::init(0, ram_info("ram0", 4096)).unwrap();
        ram.sync().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let mut info = ram_info("posix0", 4096);
        info.io_api = IoInterface::Posix;
        info.mount_dir = dir.path().display().to_string();
        let posix = Device::init(1, info).unwrap();
        posix.sync().unwrap();
    }
}
