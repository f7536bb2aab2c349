//! Thread lifecycle and thread-specific data costs.

use criterion::{Criterion, criterion_group, criterion_main};
use pthreadrt_core::pthread::{self, ThreadAttr, ThreadStorage};

fn bench_create_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_join");
    group.sample_size(30);
    group.bench_function("fresh", |b| {
        b.iter(|| {
            let t = pthread::create(None, || 1).unwrap();
            criterion::black_box(pthread::join(&t).unwrap());
        });
    });

    let mut attr = ThreadAttr::new();
    attr.set_storage(Some(ThreadStorage::new()));
    group.bench_function("preallocated", |b| {
        b.iter(|| {
            let t = pthread::create(Some(&attr), || 1).unwrap();
            criterion::black_box(pthread::join(&t).unwrap());
        });
    });
    group.finish();
}

fn bench_specific(c: &mut Criterion) {
    let key = pthread::key_create(None).unwrap();
    let mut value = 1usize;
    c.bench_function("setspecific_getspecific", |b| {
        b.iter(|| {
            value = value.wrapping_add(1) | 1;
            pthread::setspecific(key, value).unwrap();
            criterion::black_box(pthread::getspecific(key));
        });
    });
    pthread::setspecific(key, 0).unwrap();
    pthread::key_delete(key).unwrap();
}

criterion_group!(benches, bench_create_join, bench_specific);
criterion_main!(benches);
