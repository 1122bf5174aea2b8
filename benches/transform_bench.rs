//! Transform pipeline performance benchmarks
//!
//! Measures the cost of the leaves-first phases that run without any
//! external collaborator (§2 items 1-5): lex/parse, preprocess, the
//! two-track transform, alignment template generation, postprocess, and
//! driver rendering. The CEGIS loop (§4.6) needs `clang`/`klee`/solver
//! binaries and is intentionally excluded.

use checkdp::config::RunOptions;
use checkdp::pipeline;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::TempDir;
use tokio::runtime::Runtime;

fn partial_sum_source() -> &'static str {
    r#"
    "q: <*, 0>; size:<0,0>; epsilon:<0,0>";
    "PRECONDITION:ALL_DIFFER";
    "CHECK:(1)";
    int f(int q[], int size, float epsilon) {
        float result;
        int i;
        result = 0;
        i = 0;
        while (i < size) {
            float eta = Lap(1);
            result = result + q[i] + eta;
            OUTPUT(result);
            i = i + 1;
        }
    }
    "#
}

fn noisy_max_source() -> &'static str {
    r#"
    "q: <*, 0>; size:<0,0>; epsilon:<0,0>";
    "PRECONDITION:ONE_DIFFER";
    "CHECK:(2)";
    int f(int q[], int size, float epsilon) {
        float max_val;
        int max_idx;
        int i;
        float eta0;
        eta0 = Lap(1);
        max_val = q[0] + eta0;
        max_idx = 0;
        i = 1;
        while (i < size) {
            float eta = Lap(1);
            if (q[i] + eta > max_val) {
                max_val = q[i] + eta;
                max_idx = i;
            } else {
                max_val = max_val;
            }
            i = i + 1;
        }
        OUTPUT(max_idx);
    }
    "#
}

fn sparse_vector_source() -> &'static str {
    r#"
    "q: <*, 0>; size:<0,0>; epsilon:<0,0>";
    "PRECONDITION:ALL_DIFFER";
    "ASSUME(size > 0)";
    "CHECK:(1)";
    int f(int q[], int size, float epsilon) {
        float eta_t;
        float t;
        int i;
        int out;
        eta_t = Lap(2);
        t = 5 + eta_t;
        i = 0;
        while (i < size) {
            float eta_i = Lap(4);
            if (q[i] + eta_i >= t) {
                out = 1;
                OUTPUT(out);
            } else {
                out = 0;
                OUTPUT(out);
            }
            i = i + 1;
        }
    }
    "#
}

fn bench_transform_only(c: &mut Criterion, name: &str, source: &'static str) {
    let rt = Runtime::new().unwrap();
    let temp_dir = TempDir::new().unwrap();
    let opts = RunOptions::new().output_dir(temp_dir.path().to_path_buf()).transform_only(true);

    c.bench_function(name, |b| {
        b.to_async(&rt).iter(|| async {
            let result = pipeline::run(black_box(source), format!("{name}.c"), &opts).await;
            black_box(result.unwrap())
        });
    });
}

fn bench_partial_sum(c: &mut Criterion) {
    bench_transform_only(c, "transform_partial_sum", partial_sum_source());
}

fn bench_noisy_max(c: &mut Criterion) {
    bench_transform_only(c, "transform_noisy_max", noisy_max_source());
}

fn bench_sparse_vector(c: &mut Criterion) {
    bench_transform_only(c, "transform_sparse_vector", sparse_vector_source());
}

criterion_group!(benches, bench_partial_sum, bench_noisy_max, bench_sparse_vector);
criterion_main!(benches);
