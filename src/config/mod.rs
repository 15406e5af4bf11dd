//! Configuration records consumed by the core.
//!
//! Loading these structures from a YAML document and applying
//! `HERMES_*` environment overrides is an external collaborator's
//! responsibility (see `spec.md` §1/§6); this module only defines the
//! shape of a populated configuration and a few pure parsing helpers
//! (`units::parse_size`, `units::parse_latency`) that such a loader can
//! reuse. Field names follow the server/client config schema described
//! in the original Hermes `config_server.h` / `config_client.h`.

pub mod units;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The I/O interface a device exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoInterface {
    Ram,
    Posix,
}

/// Static, immutable description of one storage tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Human-readable name of the device (also its config-map key).
    pub dev_name: String,
    pub io_api: IoInterface,
    /// Directory the device is mounted on (POSIX variant only).
    pub mount_dir: String,
    /// Device capacity in bytes. `None` encodes the `inf` sentinel.
    pub capacity: Option<u64>,
    pub block_size: u64,
    /// Strictly increasing list of slab sizes, each a multiple of `block_size`.
    pub slab_sizes: Vec<u64>,
    /// Advertised bandwidth in MB/s.
    pub bandwidth_mbps: f64,
    /// Advertised latency.
    pub latency: Duration,
    pub is_shared_device: bool,
    /// BORG (min, max) occupancy thresholds, each in [0, 1].
    pub borg_capacity_thresh: (f32, f32),
}

impl DeviceInfo {
    pub fn validate(&self) -> crate::Result<()> {
        if self.slab_sizes.windows(2).any(|w| w[0] >= w[1]) {
            return Err(crate::HermesError::ConfigInvalid(format!(
                "device {}: slab_sizes must be strictly increasing",
                self.dev_name
            )));
        }
        if let Some(first) = self.slab_sizes.first() {
            if self.block_size == 0 || first % self.block_size != 0 {
                return Err(crate::HermesError::ConfigInvalid(format!(
                    "device {}: slab sizes must be multiples of block_size",
                    self.dev_name
                )));
            }
        }
        let (min, max) = self.borg_capacity_thresh;
        if !(0.0..=1.0).contains(&min) || !(0.0..=1.0).contains(&max) || min > max {
            return Err(crate::HermesError::ConfigInvalid(format!(
                "device {}: borg_capacity_thresh must be an ordered pair in [0,1]",
                self.dev_name
            )));
        }
        Ok(())
    }
}

/// Data placement policy selectable for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementPolicy {
    Random,
    RoundRobin,
    MinimizeIoTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DpeConfig {
    pub default_policy: PlacementPolicy,
    pub default_rr_split: bool,
}

impl Default for DpeConfig {
    fn default() -> Self {
        Self {
            default_policy: PlacementPolicy::MinimizeIoTime,
            default_rr_split: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BorgConfig {
    pub num_threads: usize,
    pub flush_period: Duration,
    pub blob_reorg_period: Duration,
    pub recency_min: f32,
    pub recency_max: f32,
    pub freq_min: f32,
    pub freq_max: f32,
    /// Weight given to the recency term of the score; defaults to 0.5 as
    /// inferred from the original config surface (see `DESIGN.md`).
    pub recency_weight: f32,
    /// Weight given to the frequency term of the score; defaults to 0.5.
    pub freq_weight: f32,
}

impl Default for BorgConfig {
    fn default() -> Self {
        Self {
            num_threads: 1,
            flush_period: Duration::from_secs(30),
            blob_reorg_period: Duration::from_secs(10),
            recency_min: 0.0,
            recency_max: 3600.0,
            freq_min: 0.0,
            freq_max: 100.0,
            recency_weight: 0.5,
            freq_weight: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdmConfig {
    pub est_blob_count: usize,
    pub est_num_traits: usize,
}

impl Default for MdmConfig {
    fn default() -> Self {
        Self {
            est_blob_count: 1 << 20,
            est_num_traits: 64,
        }
    }
}

/// RPC collaborator connection info; the core only carries the record,
/// it never dials the transport itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcInfo {
    pub host_names: Vec<String>,
    pub protocol: String,
    pub domain: String,
    pub port: u16,
    pub num_threads: usize,
}

impl Default for RpcInfo {
    fn default() -> Self {
        Self {
            host_names: vec!["localhost".to_string()],
            protocol: "tcp".to_string(),
            domain: String::new(),
            port: 8080,
            num_threads: 1,
        }
    }
}

/// Full server-side configuration record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub devices: Vec<DeviceInfo>,
    pub rpc: RpcInfo,
    pub dpe: DpeConfig,
    pub buffer_organizer: BorgConfig,
    pub mdm: MdmConfig,
}

impl ServerConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.devices.is_empty() {
            return Err(crate::HermesError::ConfigInvalid(
                "at least one device must be configured".to_string(),
            ));
        }
        for dev in &self.devices {
            dev.validate()?;
        }
        Ok(())
    }
}

/// How a bucket interacts with its backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterMode {
    Default,
    Bypass,
    Scratch,
    Workflow,
}

impl Default for AdapterMode {
    fn default() -> Self {
        AdapterMode::Default
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlushingMode {
    Sync,
    Async,
}

impl Default for FlushingMode {
    fn default() -> Self {
        FlushingMode::Sync
    }
}

/// One path-specific override entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAdapterConfig {
    pub path: String,
    pub page_size: Option<u64>,
    pub mode: Option<AdapterMode>,
}

/// A single path-inclusion/exclusion rule. The path tracker evaluates
/// rules ordered by decreasing pattern length; first match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathRule {
    pub pattern: String,
    pub include: bool,
}

/// Client-side (per-process) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub stop_daemon: bool,
    pub path_inclusions: Vec<PathRule>,
    pub path_exclusions: Vec<PathRule>,
    pub file_page_size: u64,
    pub base_adapter_mode: AdapterMode,
    pub flushing_mode: FlushingMode,
    pub file_adapter_configs: Vec<FileAdapterConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            stop_daemon: false,
            path_inclusions: Vec::new(),
            path_exclusions: Vec::new(),
            file_page_size: 1024 * 1024,
            base_adapter_mode: AdapterMode::Default,
            flushing_mode: FlushingMode::Sync,
            file_adapter_configs: Vec::new(),
        }
    }
}
