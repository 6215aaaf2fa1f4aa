use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use tagalloc::{Heap, MemLib};

fn alloc_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc sizes");

    for size in [16, 64, 256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut heap = Heap::new(MemLib::default()).unwrap();

            b.iter(|| {
                let ptr = heap.allocate(black_box(size)).unwrap();
                heap.release(ptr);
            });
        });
    }

    group.finish();
}

fn fragmented_first_fit(c: &mut Criterion) {
    c.bench_function("first fit over 1000 small holes", |b| {
        let mut heap = Heap::new(MemLib::default()).unwrap();
        let ptrs: Vec<_> = (0..2000).map(|_| heap.allocate(32).unwrap()).collect();

        // Free every other block so the list is full of holes too small for 64.
        for ptr in ptrs.iter().step_by(2) {
            heap.release(*ptr);
        }

        b.iter(|| {
            let ptr = heap.allocate(black_box(64)).unwrap();
            heap.release(ptr);
        });
    });
}

criterion_group!(benches, alloc_sizes, fragmented_first_fit);
criterion_main!(benches);
