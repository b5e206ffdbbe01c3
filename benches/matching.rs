use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::io::Cursor;
use trackmend::block::BlockSource;
use trackmend::extract::{self, ExtractOptions};
use trackmend::mapping::{self, MapOptions, Policy};
use trackmend::track::TrackSet;

const BLOCK: usize = 0x8000;

fn gen_data(size: usize, seed: u64) -> Vec<u8> {
    let mut s = seed;
    let mut out = Vec::with_capacity(size);
    for _ in 0..size {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        out.push((s >> 33) as u8);
    }
    out
}

/// `tracks` reference tracks of `blocks` blocks each, and an image holding
/// them interleaved one block per track per round.
fn interleaved(tracks: usize, blocks: usize) -> (Vec<Vec<u8>>, Vec<u8>) {
    let refs: Vec<Vec<u8>> = (0..tracks)
        .map(|t| gen_data(blocks * BLOCK, t as u64 + 1))
        .collect();
    let mut image = Vec::with_capacity(tracks * blocks * BLOCK);
    for b in 0..blocks {
        for r in &refs {
            image.extend_from_slice(&r[b * BLOCK..(b + 1) * BLOCK]);
        }
    }
    (refs, image)
}

fn bench_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("map");
    for tracks in [4usize, 16, 34] {
        let (refs, image) = interleaved(tracks, 8);
        group.throughput(Throughput::Bytes(image.len() as u64));
        for policy in [Policy::Sequential, Policy::RoundRobin] {
            group.bench_with_input(
                BenchmarkId::new(policy.to_string(), tracks),
                &(&refs, &image),
                |b, (refs, image)| {
                    b.iter(|| {
                        let mut set =
                            TrackSet::from_readers(refs.iter().cloned().map(Cursor::new), BLOCK)
                                .unwrap();
                        let mut img =
                            BlockSource::new(Cursor::new(image.as_slice()), 0, BLOCK).unwrap();
                        let opts = MapOptions {
                            block_size: BLOCK,
                            count: None,
                            policy,
                        };
                        black_box(
                            mapping::map_blocks(&mut img, &mut set, &opts, |_, _| Ok(())).unwrap(),
                        )
                    })
                },
            );
        }
    }
    group.finish();
}

fn bench_extract(c: &mut Criterion) {
    let (_, image) = interleaved(34, 4);
    let mut group = c.benchmark_group("extract");
    group.throughput(Throughput::Bytes(image.len() as u64));
    group.bench_function("session_34_tracks", |b| {
        b.iter(|| {
            let mut img = BlockSource::new(Cursor::new(image.as_slice()), 0, BLOCK).unwrap();
            let mut out = Vec::new();
            let opts = ExtractOptions {
                repetition: 1,
                selected: 17,
                ..Default::default()
            };
            black_box(extract::extract(&mut img, &mut out, &opts).unwrap())
        })
    });
    group.finish();
}

criterion_group!(benches, bench_map, bench_extract);
criterion_main!(benches);
