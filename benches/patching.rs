#![allow(unused)]
extern crate gpuhint;

#[path = "../src/test/image.rs"]
mod image;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use gpuhint::{
    bundle::BUNDLE_SIGNATURE,
    exports::ExportTable,
    patcher::{self, PatchOptions},
    utils::{find_pattern, KmpPattern},
    PeImage,
};
use image::{BundleSpec, ExportSpec, ImageBuilder, TestExport};
use std::hint::black_box;

/// A bundled host with 64 MiB of trailing payload, the size class of a self-contained
/// single-file application.
fn bundled_host() -> Vec<u8> {
    let payload = 64 * 1024 * 1024;
    let mut bundle = BundleSpec::new(0x1000 + payload, 6).deps_json(0x1000, 0x100);
    for index in 0..64 {
        let offset = 0x1000 + index * 0x10_0000;
        bundle = bundle.file(offset, 0x10_0000, &format!("lib{index}.dll"));
    }
    ImageBuilder::new().bundle(bundle).build()
}

/// Exact search for the bundle signature.
///
/// In a bundled host the signature sits in the data section near the start of the file,
/// so the more interesting case is a miss over a large buffer without one.
fn bench_signature_search(c: &mut Criterion) {
    let haystack: Vec<u8> = (0..32 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    let pattern = KmpPattern::new(&BUNDLE_SIGNATURE);

    let mut group = c.benchmark_group("signature_search");
    group.throughput(Throughput::Bytes(haystack.len() as u64));
    group.bench_function("kmp_miss", |b| {
        b.iter(|| black_box(pattern.find_in(black_box(&haystack))));
    });
    group.bench_function("find_pattern_miss", |b| {
        b.iter(|| black_box(find_pattern(&BUNDLE_SIGNATURE, black_box(&haystack))));
    });
    group.finish();
}

fn bench_export_table(c: &mut Criterion) {
    let mut spec = ExportSpec::new("library.dll");
    for ordinal in 1..=2000 {
        spec = spec.export(TestExport::value(ordinal, &format!("Export{ordinal:05}"), ordinal));
    }
    let data = ImageBuilder::new().exports(spec).build();
    let image = PeImage::from_mem(data).unwrap();

    c.bench_function("export_table_parse_2000", |b| {
        b.iter(|| black_box(ExportTable::parse(black_box(&image)).unwrap()));
    });
}

fn bench_enable(c: &mut Criterion) {
    let plain = ImageBuilder::new().build();
    let bundled = bundled_host();
    let options = PatchOptions::default().with_module_name("app.exe");

    let mut group = c.benchmark_group("enable");
    group.bench_function("plain", |b| {
        b.iter(|| {
            let mut image = PeImage::from_mem(plain.clone()).unwrap();
            patcher::apply(&mut image, &options, 1).unwrap();
            black_box(image.serialize().unwrap())
        });
    });

    group.throughput(Throughput::Bytes(bundled.len() as u64));
    group.sample_size(20);
    group.bench_function("bundled_64mib", |b| {
        b.iter(|| {
            let mut image = PeImage::from_mem(bundled.clone()).unwrap();
            patcher::apply(&mut image, &options, 1).unwrap();
            black_box(image.serialize().unwrap())
        });
    });
    group.finish();
}

criterion_group!(benches, bench_signature_search, bench_export_table, bench_enable);
criterion_main!(benches);
