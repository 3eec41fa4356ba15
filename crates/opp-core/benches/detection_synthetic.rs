//! Criterion benchmarks for the detection hot paths in `opp-core`.
//!
//! Benchmarks trend classification, baseline computation and a full
//! `DetectionEngine` run over a synthetic page cohort.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Months, NaiveDate, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use opp_common::{EntityId, EntityType};
use opp_config::{EngineSettings, RuleCatalog, ScoringPolicy};
use opp_core::baseline::{compute, BaselineRequest};
use opp_core::engine::{CancellationToken, DetectionEngine, RunOptions};
use opp_core::rule::Rule;
use opp_core::series::MetricSeries;
use opp_core::source::{DateRange, MemoryMetricSource, MetricRow};
use opp_core::trend::classify_values;

fn month_start(i: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.checked_add_months(Months::new(i)))
        .unwrap()
}

/// 28 months of sessions per page; every third page decays at the end.
fn synthetic_rows(pages: usize) -> Vec<MetricRow> {
    let mut rows = Vec::with_capacity(pages * 28);
    for p in 0..pages {
        let base = 500.0 + (p % 97) as f64 * 40.0;
        for m in 0..28u32 {
            let start = month_start(m);
            let end = month_start(m + 1).pred_opt().unwrap();
            let decay = if p % 3 == 0 && m >= 24 { 1.0 - 0.15 * f64::from(m - 23) } else { 1.0 };
            let seasonal = 1.0 + 0.05 * f64::from(m % 12) / 12.0;
            rows.push(MetricRow {
                entity_id: EntityId::new(format!("page_{p:05}")),
                entity_type: EntityType::Page,
                period_start: start,
                period_end: end,
                metrics: BTreeMap::from([("sessions".to_string(), base * seasonal * decay)]),
            });
        }
    }
    rows
}

fn bench_trend(c: &mut Criterion) {
    let mut group = c.benchmark_group("detect/trend");
    let falling = [1000.0, 900.0, 750.0, 500.0];
    let noisy = [1000.0, 1010.0, 990.0, 1005.0];
    for (name, values) in [("falling", falling), ("noisy", noisy)] {
        group.bench_with_input(BenchmarkId::new("classify", name), &values, |b, v| {
            b.iter(|| black_box(classify_values(black_box(v), 4)))
        });
    }
    group.finish();
}

fn bench_baseline(c: &mut Criterion) {
    let mut group = c.benchmark_group("detect/baseline");
    let values: Vec<f64> = (0..36).map(|i| 1000.0 + f64::from(i % 12) * 10.0).collect();
    let series = MetricSeries::from_values(
        EntityId::new("page_1"),
        EntityType::Page,
        "sessions",
        NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(),
        7,
        &values,
    )
    .unwrap();

    for (name, request) in [
        ("trailing_3", BaselineRequest::trailing(3, 3)),
        ("prior_year_3", BaselineRequest::prior_year(3, 2)),
    ] {
        group.bench_with_input(BenchmarkId::new("compute", name), &request, |b, req| {
            b.iter(|| black_box(compute(black_box(&series), req).ok()))
        });
    }
    group.finish();
}

fn bench_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("detect/engine");
    group.sample_size(10);
    let rules = Rule::from_catalog(&RuleCatalog::builtin());
    let period = DateRange::new(month_start(27), month_start(28).pred_opt().unwrap());
    let options = RunOptions::at(Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap());

    for pages in [100usize, 1000] {
        let source = MemoryMetricSource::from_rows(synthetic_rows(pages)).unwrap();
        let entities = source.entities();
        let engine = DetectionEngine::new(
            Arc::new(source),
            ScoringPolicy::default(),
            EngineSettings::default(),
        );
        group.bench_with_input(BenchmarkId::new("run", pages), &entities, |b, entities| {
            b.iter(|| {
                let report = engine.run_with_options(
                    black_box(entities),
                    &rules,
                    period,
                    &CancellationToken::new(),
                    &options,
                );
                black_box(report.opportunities.len());
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_trend, bench_baseline, bench_engine);
criterion_main!(benches);
