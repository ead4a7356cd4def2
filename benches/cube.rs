use criterion::{black_box, Criterion};

use spectralops::arrayops::gridspace;
use spectralops::{
    ContinuumMethod, CubeArray, CubeProcessor, Kernel, MovingAverageSmoother, OutlierRemover,
    PipelineConfig, SpectralCube, Stage,
};

const ROWS: usize = 64;
const COLS: usize = 64;

fn wavelengths() -> Vec<f64> {
    gridspace(400.0, 10.0, 221)
}

fn synthetic_cube(wavelengths: &[f64]) -> CubeArray {
    let mut data = Vec::with_capacity(ROWS * COLS * wavelengths.len());
    for pixel in 0..ROWS * COLS {
        let depth = 0.1 + 0.2 * ((pixel % 17) as f64 / 17.0);
        for (k, w) in wavelengths.iter().enumerate() {
            let dip = depth * (-(w - 2300.0).powi(2) / 5000.0).exp();
            let ripple = 0.002 * ((pixel + k) as f64 * 2.39).sin();
            data.push((0.25 + 0.0001 * w) * (1.0 - dip) + ripple);
        }
    }
    // a strip of invalid pixels
    for col in 0..COLS {
        data[col * wavelengths.len()] = f64::NAN;
    }
    CubeArray::new(ROWS, COLS, wavelengths.len(), data).unwrap()
}

fn stages(c: &mut Criterion) {
    let _ = pretty_env_logger::try_init();
    let wavelengths = wavelengths();
    let cube = synthetic_cube(&wavelengths);
    let processor = CubeProcessor::default();

    let outliers = Kernel::OutlierRemoval(OutlierRemover::default());
    c.bench_function("outlier_removal", |b| {
        b.iter(|| black_box(processor.process(&cube, &outliers).unwrap()))
    });

    let smoothing = Kernel::Smoothing(MovingAverageSmoother::default());
    c.bench_function("smoothing", |b| {
        b.iter(|| black_box(processor.process(&cube, &smoothing).unwrap()))
    });

    let continuum = Kernel::ContinuumRemoval(ContinuumMethod::DoubleLine.plan(&wavelengths).unwrap());
    c.bench_function("double_line_continuum", |b| {
        b.iter(|| black_box(processor.process(&cube, &continuum).unwrap()))
    });
}

fn pipeline(c: &mut Criterion) {
    let wavelengths = wavelengths();
    let cube = synthetic_cube(&wavelengths);
    let config = PipelineConfig::default();

    c.bench_function("full_pipeline", |b| {
        b.iter(|| {
            let mut spectral_cube = SpectralCube::new(cube.clone(), wavelengths.clone()).unwrap();
            spectral_cube.run_pipeline(&config).unwrap();
            black_box(spectral_cube.stage(Stage::ContinuumRemoved).unwrap().bands())
        })
    });

    let mut spectral_cube = SpectralCube::new(cube.clone(), wavelengths.clone()).unwrap();
    spectral_cube.run_pipeline(&config).unwrap();
    c.bench_function("absorption_feature", |b| {
        b.iter(|| black_box(spectral_cube.absorption_feature(2150.0, 2450.0, 4).unwrap()))
    });
}

criterion::criterion_group!(benches, stages, pipeline);
criterion::criterion_main!(benches);
