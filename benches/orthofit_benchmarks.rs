use criterion::{black_box, criterion_group, criterion_main, Criterion};
use orthofit::data::{CausalData, RowMajorMatrix, TreatmentSpec};
use orthofit::dml::{Dml, DmlOptions, NuisanceSpec};
use orthofit::folds::{build_folds, FoldSpec};
use orthofit::models::linear::LinearRegression;
use orthofit::utils::cross_product;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

fn ols() -> NuisanceSpec {
    NuisanceSpec::Regress(Box::new(|| Box::new(LinearRegression::new(true))))
}

fn synthetic_data(n: usize, seed: u64) -> CausalData {
    let mut rng = StdRng::seed_from_u64(seed);
    let standard = Normal::new(0.0, 1.0).unwrap();
    let mut x = RowMajorMatrix::zeros(n, 3);
    let mut w = RowMajorMatrix::zeros(n, 5);
    let mut t = Vec::with_capacity(n);
    let mut y = Vec::with_capacity(n);
    for i in 0..n {
        for j in 0..3 {
            x.set(i, j, standard.sample(&mut rng));
        }
        let mut confound = 0.0;
        for j in 0..5 {
            let v: f64 = standard.sample(&mut rng);
            w.set(i, j, v);
            confound += 0.2 * v;
        }
        let ti: f64 = confound + standard.sample(&mut rng);
        let theta = 1.0 + x.get(i, 0);
        y.push(theta * ti + confound + 0.1 * standard.sample(&mut rng));
        t.push(ti);
    }
    CausalData::new(y, t).set_x(x).set_w(w)
}

pub fn estimator_benchmarks(c: &mut Criterion) {
    let n = 10_000;
    let data = synthetic_data(n, 0);

    c.bench_function("build_folds_plain", |b| {
        b.iter(|| build_folds(&FoldSpec::KFolds(5), black_box(n), None, None, 0))
    });

    let labels: Vec<usize> = (0..n).map(|i| i % 3).collect();
    c.bench_function("build_folds_stratified", |b| {
        b.iter(|| build_folds(&FoldSpec::KFolds(5), black_box(n), Some(black_box(&labels)), None, 0))
    });

    let a = RowMajorMatrix::new((0..n * 4).map(|v| v as f64).collect(), n, 4);
    let bm = RowMajorMatrix::new((0..n * 3).map(|v| v as f64).collect(), n, 3);
    c.bench_function("cross_product", |b| {
        b.iter(|| cross_product(black_box(&a), black_box(&bm)))
    });

    c.bench_function("fit_linear_dml", |b| {
        b.iter(|| {
            let mut est = Dml::linear(ols(), ols(), false, DmlOptions::default()).unwrap();
            est.fit(black_box(&data)).unwrap();
        })
    });

    let mut fitted = Dml::linear(ols(), ols(), false, DmlOptions::default()).unwrap();
    fitted.fit(&data).unwrap();
    let xq = data.x.clone().unwrap();
    c.bench_function("const_marginal_effect", |b| {
        b.iter(|| fitted.const_marginal_effect(black_box(Some(&xq))).unwrap())
    });
    c.bench_function("effect_query", |b| {
        b.iter(|| {
            fitted
                .effect(black_box(Some(&xq)), None, &TreatmentSpec::Scalar(1.0))
                .unwrap()
        })
    });
}

criterion_group!(benches, estimator_benchmarks);
criterion_main!(benches);
