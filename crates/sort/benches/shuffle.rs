#![allow(missing_docs)]

use criterion::{criterion_group, criterion_main, AxisScale, BenchmarkId, Criterion, PlotConfiguration};
use distsort_sort::shuffle::shuffle;
use distsort_sort::Elem;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use std::hint::black_box;

pub fn benchmark_shuffle(c: &mut Criterion) {
  let mut group = c.benchmark_group("ORShuffle");
  let plot_config = PlotConfiguration::default().summary_scale(AxisScale::Logarithmic);
  group.plot_config(plot_config);

  for &size in &[256usize, 1_024, 4_096, 16_384] {
    group.bench_with_input(BenchmarkId::new("shuffle", size), &size, |b, &size| {
      let data: Vec<Elem> = (0..size as u64).map(Elem::with_key).collect();
      let mut marked = vec![false; size];
      let mut prefix = vec![0usize; size];
      let mut rng = ChaCha12Rng::seed_from_u64(1);
      b.iter(|| {
        let mut data_clone = black_box(data.clone());
        shuffle(&mut data_clone, &mut marked, &mut prefix, &mut rng).unwrap();
      });
    });

    group.bench_with_input(BenchmarkId::new("std::shuffle", size), &size, |b, &size| {
      use rand::seq::SliceRandom;
      let data: Vec<Elem> = (0..size as u64).map(Elem::with_key).collect();
      let mut rng = ChaCha12Rng::seed_from_u64(1);
      b.iter(|| {
        let mut data_clone = black_box(data.clone());
        data_clone.shuffle(&mut rng);
      });
    });
  }

  group.finish();
}

criterion_group!(name = benches_time;
  config = Criterion::default().warm_up_time(std::time::Duration::from_millis(1000)).measurement_time(std::time::Duration::from_secs(3));
  targets = benchmark_shuffle);
criterion_main!(benches_time);
