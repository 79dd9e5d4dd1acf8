use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use nbglm::data::{COVARIATES, ObservationTable};
use nbglm::estimate::{fit_negative_binomial, fit_poisson};
use nbglm::matrix::DesignMatrix;
use nbglm::model::FitConfig;
use nbglm::simulate::{SimulationConfig, synthesize};
use ndarray::Array1;

fn cohort(n_samples: usize) -> (DesignMatrix, Array1<f64>) {
    let config = SimulationConfig {
        n_samples,
        ..SimulationConfig::default()
    };
    let data = synthesize(&config).expect("synthesize cohort");
    let table = ObservationTable::from_simulation(&data).expect("build table");
    let covariates = table.covariates(&COVARIATES).expect("covariates");
    let design = DesignMatrix::with_constant(covariates.view(), &COVARIATES).expect("design");
    (design, table.response().expect("response"))
}

fn benchmark_fits(c: &mut Criterion) {
    let config = FitConfig::default();
    let cohorts: Vec<_> = [500_usize, 5000]
        .iter()
        .map(|&n| (n, cohort(n)))
        .collect();

    let mut group = c.benchmark_group("count_glm_fit");
    for (n, (design, y)) in cohorts.iter() {
        group.throughput(Throughput::Elements(*n as u64));

        group.bench_with_input(BenchmarkId::new("negative_binomial", n), y, |b, input| {
            b.iter(|| {
                let model = fit_negative_binomial(black_box(design), black_box(input.view()), &config)
                    .expect("negative binomial fit");
                black_box(model);
            });
        });

        group.bench_with_input(BenchmarkId::new("poisson", n), y, |b, input| {
            b.iter(|| {
                let model = fit_poisson(black_box(design), black_box(input.view()), &config)
                    .expect("poisson fit");
                black_box(model);
            });
        });
    }
    group.finish();
}

criterion_group!(count_glm_fit, benchmark_fits);
criterion_main!(count_glm_fit);
