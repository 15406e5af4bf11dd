//! Hermes — a multi-tier I/O buffering engine.
//!
//! Buffers file-I/O through a hierarchy of storage devices (RAM, POSIX
//! files backed by NVMe/SSD/HDD, ...), placing and organizing data
//! across tiers to approximate the performance of the fastest tier at
//! the capacity of the slowest. See the module docs on [`context::Hermes`]
//! for how the pieces fit together.

pub mod borg;
pub mod buffer_pool;
pub mod common;
pub mod config;
pub mod context;
pub mod device;
pub mod dpe;
pub mod error;
pub mod fs;
pub mod metadata;
pub mod page_translator;

pub use context::Hermes;
pub use error::{HermesError, Result};
