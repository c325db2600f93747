use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::{criterion_group, criterion_main};
use sluice::prelude::*;

// ack every offset of every partition, committing every 100 acks
fn ack_and_commit(partitions: i32) {
    let mut table = OffsetTable::new();
    for partition in 0..partitions {
        table.assign(TopicPartition::new("benchmark", partition), 0, None, 10_000);
    }

    for offset in 0..1_000 {
        for partition in 0..partitions {
            let tp = TopicPartition::new("benchmark", partition);
            table.ack(&tp, offset).unwrap();
        }
        if offset % 100 == 99 {
            let pending = table.pending(None);
            table.mark_committed(&pending);
        }
    }
}

fn from_elem(c: &mut Criterion) {
    for partitions in [1, 16, 64] {
        c.bench_with_input(
            BenchmarkId::new("ack_and_commit", partitions),
            &partitions,
            |b, &p| b.iter(|| ack_and_commit(p)),
        );
    }
}

criterion_group!(benches, from_elem);
criterion_main!(benches);
