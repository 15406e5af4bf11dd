//! C4 — Data Placement Engine.
//!
//! Turns a byte count into a device placement schedule. Eligibility is
//! purely occupancy-based (a device above its configured BORG max
//! threshold is skipped); the policies differ only in how they choose
//! among the eligible set. None of the policies may hand a single
//! device more than its `remaining_capacity` — `(max_threshold −
//! occupancy) · capacity` — so any policy whose first pick doesn't have
//! enough room spills the remainder onto further eligible devices,
//! failing `OutOfSpace` only once none remain. `MinimizeIoTime` is the
//! one interesting policy: true time-minimizing placement is an LP over
//! devices and split sizes, which is overkill for the device counts
//! this system runs with, so it is approximated by greedily filling
//! devices in decreasing-bandwidth order up to their remaining
//! capacity, breaking bandwidth ties at random.

use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::buffer_pool::BufferPool;
use crate::common::DeviceId;
use crate::config::{DeviceInfo, PlacementPolicy};
use crate::error::{HermesError, Result};

pub struct Dpe {
    devices: Vec<(DeviceId, DeviceInfo)>,
    rr_cursor: AtomicUsize,
}

impl Dpe {
    pub fn new(devices: Vec<(DeviceId, DeviceInfo)>) -> Self {
        Self {
            devices,
            rr_cursor: AtomicUsize::new(0),
        }
    }

    fn eligible(&self, pool: &BufferPool) -> Vec<&(DeviceId, DeviceInfo)> {
        self.devices
            .iter()
            .filter(|(id, info)| {
                pool.occupancy(*id)
                    .map(|occ| occ < info.borg_capacity_thresh.1)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// `(max_threshold − occupancy) · capacity`, in bytes. `None`
    /// capacity is treated as unbounded.
    fn remaining_capacity(dev: &(DeviceId, DeviceInfo), pool: &BufferPool) -> u64 {
        let Some(capacity) = dev.1.capacity else {
            return u64::MAX;
        };
        let occupancy = pool.occupancy(dev.0).unwrap_or(0.0) as f64;
        let max_threshold = dev.1.borg_capacity_thresh.1 as f64;
        let remaining_frac = (max_threshold - occupancy).max(0.0);
        (remaining_frac * capacity as f64) as u64
    }

    /// Produce a `(device, bytes)` schedule covering `bytes` exactly,
    /// spilling across multiple eligible devices when the first pick(s)
    /// don't have enough remaining capacity.
    pub fn schedule(
        &self,
        bytes: u64,
        policy: PlacementPolicy,
        rr_split: bool,
        pool: &BufferPool,
    ) -> Result<Vec<(DeviceId, u64)>> {
        if bytes == 0 {
            return Ok(Vec::new());
        }
        let eligible = self.eligible(pool);
        if eligible.is_empty() {
            return Err(HermesError::OutOfSpace);
        }

        match policy {
            PlacementPolicy::Random => {
                let mut candidates = eligible;
                let mut schedule = Vec::new();
                let mut remaining = bytes;
                while remaining > 0 {
                    if candidates.is_empty() {
                        return Err(HermesError::OutOfSpace);
                    }
                    let idx = rand::rng().random_range(0..candidates.len());
                    let dev = candidates.remove(idx);
                    let take = Self::remaining_capacity(dev, pool).min(remaining);
                    if take == 0 {
                        continue;
                    }
                    schedule.push((dev.0, take));
                    remaining -= take;
                }
                Ok(schedule)
            }
            PlacementPolicy::RoundRobin => {
                if rr_split {
                    Ok(split_evenly(&eligible, bytes))
                } else {
                    let mut candidates = eligible;
                    let mut schedule = Vec::new();
                    let mut remaining = bytes;
                    while remaining > 0 {
                        if candidates.is_empty() {
                            return Err(HermesError::OutOfSpace);
                        }
                        let cursor = self.rr_cursor.fetch_add(1, Ordering::Relaxed);
                        let dev = candidates.remove(cursor % candidates.len());
                        let take = Self::remaining_capacity(dev, pool).min(remaining);
                        if take == 0 {
                            continue;
                        }
                        schedule.push((dev.0, take));
                        remaining -= take;
                    }
                    Ok(schedule)
                }
            }
            PlacementPolicy::MinimizeIoTime => {
                // Decreasing-bandwidth-order greedy fill: the LP this
                // approximates would never give a slower device bytes
                // while a faster one still has room. Ties on bandwidth
                // break at random rather than favoring registration
                // order.
                let mut ranked: Vec<(&(DeviceId, DeviceInfo), f64)> = eligible
                    .into_iter()
                    .map(|dev| (dev, rand::rng().random::<f64>()))
                    .collect();
                ranked.sort_by(|a, b| {
                    b.0 .1
                        .bandwidth_mbps
                        .partial_cmp(&a.0 .1.bandwidth_mbps)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                });

                let mut schedule = Vec::new();
                let mut remaining = bytes;
                for (dev, _) in ranked {
                    if remaining == 0 {
                        break;
                    }
                    let take = Self::remaining_capacity(dev, pool).min(remaining);
                    if take == 0 {
                        continue;
                    }
                    schedule.push((dev.0, take));
                    remaining -= take;
                }
                if remaining > 0 {
                    return Err(HermesError::OutOfSpace);
                }
                Ok(schedule)
            }
        }
    }
}

fn split_evenly(devices: &[&(DeviceId, DeviceInfo)], bytes: u64) -> Vec<(DeviceId, u64)> {
    let n = devices.len() as u64;
    let base = bytes / n;
    let mut remainder = bytes % n;
    devices
        .iter()
        .map(|(id, _)| {
            let extra = if remainder > 0 {
                remainder -= 1;
                1
            } else {
                0
            };
            (*id, base + extra)
        })
        .filter(|(_, b)| *b > 0)
        .collect()
}
