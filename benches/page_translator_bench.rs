use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dashmap::DashMap;

use hermes_core::buffer_pool::BufferPool;
use hermes_core::config::{AdapterMode, DeviceInfo, IoInterface, PlacementPolicy};
use hermes_core::device::Device;
use hermes_core::dpe::Dpe;
use hermes_core::metadata::traits::TraitLayer;
use hermes_core::metadata::MetadataStore;
use hermes_core::page_translator::PageTranslator;

const PAGE_SIZE: u64 = 4096;

fn harness() -> (PageTranslator, hermes_core::common::BucketId) {
    let metadata = Arc::new(MetadataStore::new());
    let buffer_pool = Arc::new(BufferPool::new());
    let devices = Arc::new(DashMap::new());

    let info = DeviceInfo {
        dev_name: "ram0".to_string(),
        io_api: IoInterface::Ram,
        mount_dir: String::new(),
        capacity: Some(64 << 20),
        block_size: 4096,
        slab_sizes: vec![PAGE_SIZE],
        bandwidth_mbps: 10_000.0,
        latency: Duration::from_nanos(100),
        is_shared_device: false,
        borg_capacity_thresh: (0.1, 0.95),
    };
    buffer_pool.register_device(0, &info);
    devices.insert(0, Device::init(0, info.clone()).unwrap());
    let dpe = Dpe::new(vec![(0, info)]);

    let bucket = metadata.get_or_create_bucket("bench");
    let traits = Arc::new(TraitLayer::new());
    let pt = PageTranslator::new(metadata, buffer_pool, Arc::new(dpe), devices, traits, PAGE_SIZE);
    (pt, bucket)
}

fn bench_write_whole_page(c: &mut Criterion) {
    let (pt, bucket) = harness();
    let data = vec![0xABu8; PAGE_SIZE as usize];
    c.bench_function("page_translator_write_whole_page", |b| {
        b.iter(|| {
            pt.write(
                bucket,
                None,
                AdapterMode::Scratch,
                0,
                black_box(&data),
                PlacementPolicy::Random,
                false,
            )
            .unwrap();
        })
    });
}

fn bench_read_whole_page(c: &mut Criterion) {
    let (pt, bucket) = harness();
    let data = vec![0xABu8; PAGE_SIZE as usize];
    pt.write(
        bucket,
        None,
        AdapterMode::Scratch,
        0,
        &data,
        PlacementPolicy::Random,
        false,
    )
    .unwrap();

    c.bench_function("page_translator_read_whole_page", |b| {
        b.iter(|| black_box(pt.read(bucket, None, 0, PAGE_SIZE).unwrap()))
    });
}

criterion_group!(benches, bench_write_whole_page, bench_read_whole_page);
criterion_main!(benches);
