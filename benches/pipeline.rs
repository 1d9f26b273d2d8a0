//! Benchmarks for grouping and manifest compaction.

use std::path::Path;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use bundlekit::codec::{compress_uuid, hash_array};
use bundlekit::{select_groups, Asset, Bundle, BundleOptions, CompressionType, Library, LibraryBuilder};

fn uuid(i: usize) -> String {
    format!("{:08x}-0000-4000-8000-{:012x}", i, i)
}

/// `roots` prefabs, each depending on `fanout` shared leaves.
fn library(roots: usize, fanout: usize) -> Library {
    let mut builder = LibraryBuilder::new();
    let leaves: Vec<String> = (0..roots * 2).map(|i| uuid(1_000_000 + i)).collect();
    for i in 0..roots {
        let deps: Vec<&str> = (0..fanout)
            .map(|k| leaves[(i * 3 + k) % leaves.len()].as_str())
            .collect();
        builder.add(
            Asset::new(uuid(i), "cc.Prefab")
                .with_url(format!("db://assets/main/p{}.prefab", i))
                .with_depends(&deps),
        );
    }
    for leaf in &leaves {
        builder.add(Asset::new(leaf.as_str(), "cc.Material"));
    }
    builder.build()
}

fn bundle(library: &Library, compression: CompressionType) -> Bundle {
    let options = BundleOptions::new("main", "db://assets/main").with_compression(compression);
    let mut bundle = Bundle::new(options, Path::new("/tmp/bundlekit-bench"), false, false);
    for asset in library.root_assets() {
        if asset.url.is_empty() {
            bundle.add_asset(asset);
        } else {
            bundle.add_root_asset(asset);
        }
    }
    bundle
}

fn bench_grouping(c: &mut Criterion) {
    let mut group = c.benchmark_group("grouping");

    for roots in [50, 500] {
        let library = library(roots, 8);
        let bundle = bundle(&library, CompressionType::MergeDep);
        group.bench_function(format!("merge_dep_{}", roots), |b| {
            b.iter(|| select_groups(black_box(&bundle), black_box(&library)))
        });
    }

    group.finish();
}

fn bench_compaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("compaction");

    let library = library(500, 8);
    group.bench_function("compress_manifest_500", |b| {
        b.iter_batched(
            || {
                let mut bundle = bundle(&library, CompressionType::MergeDep);
                let mut groups = select_groups(&bundle, &library);
                for g in &mut groups {
                    g.name = hash_array(&[g.uuids.clone()]);
                }
                bundle.set_groups(groups);
                bundle.init_config().unwrap();
                bundle.gen_packed_assets_config().unwrap();
                bundle
            },
            |mut bundle| bundle.compress().unwrap(),
            BatchSize::SmallInput,
        )
    });

    let ids: Vec<String> = (0..1000).map(uuid).collect();
    group.bench_function("compress_uuid_1000", |b| {
        b.iter(|| ids.iter().map(|id| compress_uuid(black_box(id))).count())
    });
    group.bench_function("hash_array_1000", |b| {
        b.iter(|| hash_array(black_box(&[ids.clone()])))
    });

    group.finish();
}

criterion_group!(benches, bench_grouping, bench_compaction);
criterion_main!(benches);
