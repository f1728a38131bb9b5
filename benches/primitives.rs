use std::time::{Duration, Instant};

use aby::{
    bench_reexports::{OtFlavor, OtPair, eklundh_transpose},
    crypto::SecLevel,
};
use criterion::{BenchmarkId, Criterion, Throughput};
use rand::RngCore;

pub fn primitives_benchmark(c: &mut Criterion) {
    let mut g = c.benchmark_group("primitives");
    for (rows, cols) in [(128, 1024), (128, 8192), (256, 8192)] {
        let mut buf = vec![0; rows * cols / 8];
        rand::rng().fill_bytes(&mut buf);
        g.throughput(Throughput::Bytes(buf.len() as u64));
        g.bench_function(BenchmarkId::new("transpose", format!("{rows}x{cols}")), |b| {
            b.iter(|| eklundh_transpose(&mut buf, rows, cols))
        });
    }

    let mut ots = OtPair::new(SecLevel::LT, 2).expect("base OTs failed");
    for exp in [10, 13, 16] {
        let count = 2_usize.pow(exp);
        g.throughput(Throughput::Elements(count as u64));
        for (name, flavor, bitlen) in [
            ("R-OT 1 bit", OtFlavor::Random, 1),
            ("C-OT 32 bit", OtFlavor::Correlated, 32),
            ("G-OT 128 bit", OtFlavor::General, 128),
        ] {
            g.bench_function(BenchmarkId::new(name, count), |b| {
                // iter_custom keeps the task setup out of the measurement
                b.iter_custom(|iters| {
                    let mut elapsed = Duration::ZERO;
                    for _ in 0..iters {
                        let now = Instant::now();
                        ots.run(flavor, count, bitlen).expect("OTs failed");
                        elapsed += now.elapsed();
                    }
                    elapsed
                })
            });
        }
    }
}
