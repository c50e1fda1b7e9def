use criterion::{criterion_group, criterion_main, Criterion};
use readiness_gate_core::{
    run_pipeline, GateRule, QuantileThresholds, Record, RecordStore, SignalRow, SignalTable,
};

const PRIORITIES: [&str; 5] = ["Blocker", "Critical", "Major", "Minor", "Trivial"];

fn mk_store(count: usize) -> RecordStore {
    let records = (0..count)
        .map(|index| {
            Record::new(
                &format!("BENCH-{index}"),
                PRIORITIES[index % PRIORITIES.len()],
                &(1_700_000_000 + (index * 7919) % 100_000).to_string(),
            )
            .with_fields(vec!["bench".to_string()])
        })
        .collect();
    match RecordStore::new(vec!["project".to_string()], records) {
        Ok(store) => store,
        Err(err) => panic!("benchmark store failed: {err}"),
    }
}

#[allow(clippy::cast_precision_loss)]
fn mk_signals(count: usize) -> SignalTable {
    let rows = (0..count)
        .map(|index| {
            let value = |step: usize| (((index * step) % 1_000) as f64 / 1_000.0).to_string();
            let key = format!("BENCH-{index}");
            SignalRow::parse(&key, &value(31), &value(17), &value(43), Vec::new())
        })
        .collect::<Result<Vec<_>, _>>()
        .and_then(|rows| SignalTable::new(Vec::new(), rows));
    match rows {
        Ok(table) => table,
        Err(err) => panic!("benchmark signal table failed: {err}"),
    }
}

fn bench_pipeline(c: &mut Criterion) {
    let signals = mk_signals(10_000);
    let rule = GateRule::Quantile(QuantileThresholds { s_min_quantile: 0.1, v_max_quantile: 0.9 });
    let ks = [50, 100, 250, 500];

    c.bench_function("gate_pipeline_10000_records", |b| {
        b.iter(|| {
            let run = run_pipeline(mk_store(10_000), &signals, &ks, &rule);
            if let Err(err) = run {
                panic!("gate pipeline benchmark failed: {err}");
            }
        });
    });
}

criterion_group!(gate_benches, bench_pipeline);
criterion_main!(gate_benches);
