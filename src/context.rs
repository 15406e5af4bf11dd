//! Global Hermes context.
//!
//! Every public operation is a method on `Hermes`, an explicit context
//! object threaded through the caller's code — there is no ambient
//! global state required to use this crate as a library. The one
//! exception is `global()`/`set_global()`, a thin accessor kept
//! specifically for out-of-process interception shims (an `LD_PRELOAD`
//! style adapter, say) that have no natural place to carry a `Hermes`
//! handle through and must recover one from thin air.

use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tokio::sync::watch;
use tracing::info;

use crate::borg::Borg;
use crate::buffer_pool::BufferPool;
use crate::common::DeviceId;
use crate::config::{ClientConfig, ServerConfig};
use crate::device::Device;
use crate::dpe::Dpe;
use crate::error::Result;
use crate::fs::FilesystemEngine;
use crate::metadata::traits::TraitLayer;
use crate::metadata::MetadataStore;
use crate::page_translator::PageTranslator;

static GLOBAL: OnceCell<Arc<Hermes>> = OnceCell::new();

/// The running engine: every component wired together and ready to
/// serve Bucket/Blob operations.
pub struct Hermes {
    pub metadata: Arc<MetadataStore>,
    pub buffer_pool: Arc<BufferPool>,
    pub devices: Arc<DashMap<DeviceId, Device>>,
    pub dpe: Arc<Dpe>,
    pub traits: Arc<TraitLayer>,
    pub page_translator: Arc<PageTranslator>,
    pub fs: Arc<FilesystemEngine>,
    borg: Arc<Borg>,
    borg_shutdown: watch::Sender<bool>,
}

impl Hermes {
    /// Build every component from a validated configuration. Does not
    /// spawn the BORG background loop — call `spawn_borg` once inside a
    /// Tokio runtime to do that.
    pub fn start(server: ServerConfig, client: ClientConfig) -> Result<Arc<Self>> {
        server.validate()?;

        let metadata = Arc::new(MetadataStore::new());
        let buffer_pool = Arc::new(BufferPool::new());
        let devices = Arc::new(DashMap::new());
        let next_device_id = AtomicU32::new(0);
        let mut device_infos = Vec::with_capacity(server.devices.len());

        for info in &server.devices {
            let id = next_device_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            buffer_pool.register_device(id, info);
            devices.insert(id, Device::init(id, info.clone())?);
            device_infos.push((id, info.clone()));
            info!(device = %info.dev_name, id, "device initialized");
        }

        let dpe = Arc::new(Dpe::new(device_infos.clone()));
        let traits = Arc::new(TraitLayer::new());
        let page_translator = Arc::new(PageTranslator::new(
            metadata.clone(),
            buffer_pool.clone(),
            dpe.clone(),
            devices.clone(),
            traits.clone(),
            client.file_page_size,
        ));
        let fs = Arc::new(FilesystemEngine::new(
            metadata.clone(),
            page_translator.clone(),
            client,
        ));
        let borg = Arc::new(Borg::new(
            metadata.clone(),
            buffer_pool.clone(),
            devices.clone(),
            device_infos,
            dpe.clone(),
            server.buffer_organizer,
        ));
        let (borg_shutdown, _) = watch::channel(false);

        Ok(Arc::new(Self {
            metadata,
            buffer_pool,
            devices,
            dpe,
            traits,
            page_translator,
            fs,
            borg,
            borg_shutdown,
        }))
    }

    /// Spawn the BORG periodic-reorg/periodic-flush loop onto the
    /// current Tokio runtime. Idempotent to call at most once per
    /// instance; calling it twice spawns two competing loops.
    pub fn spawn_borg(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let borg = self.borg.clone();
        let rx = self.borg_shutdown.subscribe();
        tokio::spawn(borg.run(rx))
    }

    /// Signal the BORG loop to stop. Safe to call even if `spawn_borg`
    /// was never called.
    pub fn stop(&self) -> Result<()> {
        let _ = self.borg_shutdown.send(true);
        Ok(())
    }
}

/// Install `hermes` as the process-wide instance. Returns `false` (and
/// leaves the previous instance in place) if one was already set.
pub fn set_global(hermes: Arc<Hermes>) -> bool {
    GLOBAL.set(hermes).is_ok()
}

/// Fetch the process-wide instance installed by `set_global`, if any.
pub fn global() -> Option<Arc<Hermes>> {
    GLOBAL.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceInfo, IoInterface};
    use std::time::Duration;

    fn minimal_server_config() -> ServerConfig {
        ServerConfig {
            devices: vec![DeviceInfo {
                dev_name: "ram0".to_string(),
                io_api: IoInterface::Ram,
                mount_dir: String::new(),
                capacity: Some(1 << 20),
                block_size: 4096,
                slab_sizes: vec![4096, 65536],
                bandwidth_mbps: 10_000.0,
                latency: Duration::from_micros(1),
                is_shared_device: false,
                borg_capacity_thresh: (0.1, 0.9),
            }],
            ..ServerConfig::default()
        }
    }

    #[test]
    fn start_wires_every_component() {
        let hermes = Hermes::start(minimal_server_config(), ClientConfig::default()).unwrap();
        assert_eq!(hermes.devices.len(), 1);
    }

    #[test]
    fn start_rejects_invalid_config() {
        let cfg = ServerConfig::default();
        assert!(Hermes::start(cfg, ClientConfig::default()).is_err());
    }
}
