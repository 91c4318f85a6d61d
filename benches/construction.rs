use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use kiln::{managed, DependencyGraph, InstanceRegistry};

fn bench_warm_get_or_create(c: &mut Criterion) {
  let registry = InstanceRegistry::new();
  registry
    .get_or_create("service", |_| Ok(managed(0u64)))
    .unwrap();

  // Warm path: the finished tier answers without running the factory.
  c.bench_function("get_or_create_warm", |b| {
    b.iter(|| {
      let instance = registry
        .get_or_create(black_box("service"), |_| Ok(managed(1u64)))
        .unwrap();
      black_box(instance)
    })
  });
}

fn bench_finished_get(c: &mut Criterion) {
  let registry = InstanceRegistry::new();
  registry
    .register_finished("service", managed(0u64))
    .unwrap();

  c.bench_function("get_finished", |b| {
    b.iter(|| black_box(registry.get(black_box("service"), false)))
  });
}

fn bench_register_finished(c: &mut Criterion) {
  let mut group = c.benchmark_group("register_finished");
  for count in [100usize, 1_000] {
    let names: Vec<String> = (0..count).map(|i| format!("service{i}")).collect();
    group.throughput(Throughput::Elements(count as u64));
    group.bench_function(BenchmarkId::from_parameter(count), |b| {
      b.iter(|| {
        let registry = InstanceRegistry::new();
        for (i, name) in names.iter().enumerate() {
          registry.register_finished(name, managed(i as u64)).unwrap();
        }
        black_box(registry.count())
      })
    });
  }
  group.finish();
}

fn bench_is_dependent_chain(c: &mut Criterion) {
  let graph = DependencyGraph::new();
  for i in 0..50 {
    graph.register_dependency(&format!("node{i}"), &format!("node{}", i + 1));
  }

  // Worst case: the query walks the whole chain.
  c.bench_function("is_dependent_chain_50", |b| {
    b.iter(|| black_box(graph.is_dependent(black_box("node0"), black_box("node50"))))
  });
}

criterion_group!(
  benches,
  bench_warm_get_or_create,
  bench_finished_get,
  bench_register_finished,
  bench_is_dependent_chain
);
criterion_main!(benches);
