use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hicobs_core::aggregation::aggregate_observable;
use hicobs_core::centrality::CentralityBin;
use hicobs_core::config::AnalysisConfig;
use hicobs_core::ensemble::VariantView;
use hicobs_core::observable::Observable;
use hicobs_core::record::{EventRecord, RecordLayout};
use num_complex::Complex64;

const CONFIG: &str = r#"
n_idf = 1
n_harmonic = 4
n_harmonic_diff = 3
species = ["pion", "kaon", "proton"]
pt_bins = [[0.2, 0.6], [0.6, 1.2], [1.2, 2.0], [2.0, 3.0]]
systems = []
"#;

/// Deterministic pseudo-random ensemble (LCG) so runs are comparable.
fn ensemble(layout: &RecordLayout, n: usize) -> Vec<EventRecord> {
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    let mut next = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 11) as f64 / (1u64 << 53) as f64
    };
    (0..n)
        .map(|_| {
            let mut record = layout.empty_record();
            let v = &mut record.variants[0];
            let m = 50.0 + 1500.0 * next();
            v.dnch_deta = m;
            v.det_deta = 1.2 * m;
            v.dn_dy = vec![0.8 * m, 0.15 * m, 0.05 * m];
            v.mean_pt = vec![0.5, 0.8, 1.2];
            v.pt_sums.n = m as i64;
            v.pt_sums.sum_pt = 0.55 * m;
            v.pt_sums.sum_pt2 = 0.6 * m;
            v.flow.n = m as i64;
            for q in v.flow.qn.iter_mut() {
                *q = Complex64::new(m.sqrt() * (next() - 0.5), m.sqrt() * (next() - 0.5));
            }
            for bin in v.diff_flow_chg.iter_mut() {
                bin.n = (0.2 * m) as i64;
                for q in bin.qn.iter_mut() {
                    *q = Complex64::new(next() - 0.5, next() - 0.5);
                }
            }
            record
        })
        .collect()
}

fn bench_aggregation(c: &mut Criterion) {
    let config = AnalysisConfig::from_toml_str(CONFIG).unwrap();
    let layout = RecordLayout::from_config(&config);
    let schedule: Vec<CentralityBin> = [0.0, 5.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0]
        .windows(2)
        .map(|w| CentralityBin::new(w[0], w[1]))
        .collect();

    let mut group = c.benchmark_group("aggregation");
    for n_events in [1_000, 10_000] {
        let events = ensemble(&layout, n_events);

        group.bench_with_input(BenchmarkId::new("sort", n_events), &events, |b, events| {
            b.iter(|| VariantView::sorted_by_multiplicity(black_box(events), 0))
        });

        let view = VariantView::sorted_by_multiplicity(&events, 0);
        for observable in config.catalogue() {
            group.bench_with_input(
                BenchmarkId::new(observable.to_string(), n_events),
                &view,
                |b, view| {
                    b.iter(|| {
                        aggregate_observable(black_box(&observable), view, &schedule, &config)
                    })
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_aggregation);
criterion_main!(benches);
