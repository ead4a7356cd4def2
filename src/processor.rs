//! Apply a per-spectrum kernel to every pixel of a cube.
//!
//! Every pixel is processed independently. Kernels read only their own pixel's
//! spectrum and shared, read-only state such as design matrices and continuum
//! plans, and write only to their own slice of a pre-sized output buffer. The
//! result is identical however the pixels are scheduled.
//!
//! A pixel whose first band is NaN is invalid. Its outputs are all NaN and the
//! kernel is never called on it.
use std::time::Instant;

use log::{debug, trace};
use thiserror::Error;

#[cfg(feature = "parallelism")]
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::absorption::{AbsorptionFit, FeatureStatistics};
use crate::continuum::{ContinuumError, ContinuumPlan};
use crate::cube::CubeArray;
use crate::outliers::{OutlierError, OutlierRemover};
use crate::polyfit::PolyFitError;
use crate::smooth::{MovingAverageSmoother, SmoothingError};
use crate::spectrum::SpectrumError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProcessingError {
    #[error("Outlier removal failed: {0}")]
    Outliers(#[from] OutlierError),
    #[error("Smoothing failed: {0}")]
    Smoothing(#[from] SmoothingError),
    #[error("Continuum removal failed: {0}")]
    Continuum(#[from] ContinuumError),
    #[error("Polynomial fitting failed: {0}")]
    PolyFit(#[from] PolyFitError),
    #[error(transparent)]
    Spectrum(#[from] SpectrumError),
}

/// Whether `spectrum` carries the invalid pixel sentinel, a NaN first band
#[inline]
pub fn is_invalid_pixel(spectrum: &[f64]) -> bool {
    spectrum.first().map_or(true, |v| v.is_nan())
}

/// The output a kernel writes for each pixel: `planes` arrays of `bands` values,
/// laid out one plane after the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OutputShape {
    pub planes: usize,
    pub bands: usize,
}

impl OutputShape {
    pub const fn new(planes: usize, bands: usize) -> Self {
        Self { planes, bands }
    }

    /// The number of values written per pixel
    pub const fn stride(&self) -> usize {
        self.planes * self.bands
    }
}

/// An operation applied to one spectrum at a time
pub trait SpectrumKernel {
    fn name(&self) -> &'static str;

    /// Validate the kernel against spectra of `bands` bands and describe
    /// what it will write per pixel.
    fn output_shape(&self, bands: usize) -> Result<OutputShape, ProcessingError>;

    /// Process one valid spectrum into `out`, whose length is the stride of
    /// [`SpectrumKernel::output_shape`]
    fn process_into(&self, spectrum: &[f64], out: &mut [f64]) -> Result<(), ProcessingError>;
}

/// The per-pixel operations a [`CubeProcessor`] can apply
#[derive(Debug, Clone)]
pub enum Kernel {
    /// One plane, the spectrum with its outliers replaced
    OutlierRemoval(OutlierRemover),
    /// Two planes, the moving mean and the moving standard deviation
    Smoothing(MovingAverageSmoother),
    /// Two planes, the continuum-removed spectrum and the continuum
    ContinuumRemoval(ContinuumPlan),
    /// Two planes over the fit window, the fitted curve and the spectrum itself
    PolynomialFit(AbsorptionFit),
    /// One plane of three values, the area, center and depth of the feature
    FeatureStatistics(FeatureStatistics),
}

impl SpectrumKernel for Kernel {
    fn name(&self) -> &'static str {
        match self {
            Kernel::OutlierRemoval(_) => "outlier removal",
            Kernel::Smoothing(_) => "smoothing",
            Kernel::ContinuumRemoval(_) => "continuum removal",
            Kernel::PolynomialFit(_) => "polynomial fit",
            Kernel::FeatureStatistics(_) => "feature statistics",
        }
    }

    fn output_shape(&self, bands: usize) -> Result<OutputShape, ProcessingError> {
        match self {
            Kernel::OutlierRemoval(remover) => {
                remover.validate()?;
                if bands == 0 {
                    return Err(SmoothingError::EmptySpectrum.into());
                }
                Ok(OutputShape::new(1, bands))
            }
            Kernel::Smoothing(smoother) => Ok(OutputShape::new(2, smoother.output_len(bands)?)),
            Kernel::ContinuumRemoval(plan) => {
                if plan.len() != bands {
                    return Err(ContinuumError::LengthMismatch {
                        expected: plan.len(),
                        received: bands,
                    }
                    .into());
                }
                Ok(OutputShape::new(2, bands))
            }
            Kernel::PolynomialFit(fit) => {
                check_fit_bands(fit, bands)?;
                Ok(OutputShape::new(2, fit.len()))
            }
            Kernel::FeatureStatistics(stats) => {
                check_fit_bands(stats.fit(), bands)?;
                Ok(OutputShape::new(1, 3))
            }
        }
    }

    fn process_into(&self, spectrum: &[f64], out: &mut [f64]) -> Result<(), ProcessingError> {
        match self {
            Kernel::OutlierRemoval(remover) => {
                remover.remove_into(spectrum, out)?;
            }
            Kernel::Smoothing(smoother) => {
                let (mean, std) = out.split_at_mut(out.len() / 2);
                smoother.smooth_into(spectrum, mean, std)?;
            }
            Kernel::ContinuumRemoval(plan) => {
                let (removed, continuum) = out.split_at_mut(out.len() / 2);
                plan.remove_into(spectrum, removed, continuum)?;
            }
            Kernel::PolynomialFit(fit) => {
                let (fitted, restricted) = out.split_at_mut(out.len() / 2);
                fit.fit_into(spectrum, fitted)?;
                restricted.copy_from_slice(fit.restrict(spectrum)?);
            }
            Kernel::FeatureStatistics(stats) => {
                let params = stats.measure(spectrum)?;
                out.copy_from_slice(&params.as_array());
            }
        }
        Ok(())
    }
}

fn check_fit_bands(fit: &AbsorptionFit, bands: usize) -> Result<(), PolyFitError> {
    if fit.bands() != bands {
        Err(PolyFitError::LengthMismatch {
            expected: fit.bands(),
            received: bands,
        })
    } else {
        Ok(())
    }
}

fn process_pixel<K: SpectrumKernel + ?Sized>(
    kernel: &K,
    spectrum: &[f64],
    out: &mut [f64],
) -> Result<(), ProcessingError> {
    if is_invalid_pixel(spectrum) {
        out.fill(f64::NAN);
        Ok(())
    } else {
        kernel.process_into(spectrum, out)
    }
}

/// The default lower bound on the number of pixels handed to a worker at once
pub const DEFAULT_MIN_PIXELS_PER_TASK: usize = 64;

/// Dispatches a [`SpectrumKernel`] over every pixel of a [`CubeArray`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CubeProcessor {
    /// Pixels are processed in batches of at least this many per worker task
    pub min_pixels_per_task: usize,
}

impl Default for CubeProcessor {
    fn default() -> Self {
        Self {
            min_pixels_per_task: DEFAULT_MIN_PIXELS_PER_TASK,
        }
    }
}

impl CubeProcessor {
    pub fn new(min_pixels_per_task: usize) -> Self {
        Self {
            min_pixels_per_task,
        }
    }

    /// Process every pixel of `cube` one after another into `out`
    pub(crate) fn process_serial<K: SpectrumKernel + ?Sized>(
        &self,
        cube: &CubeArray,
        kernel: &K,
        stride: usize,
        out: &mut [f64],
    ) -> Result<(), ProcessingError> {
        out.chunks_mut(stride)
            .zip(cube.data().chunks(cube.bands()))
            .try_for_each(|(o, spectrum)| process_pixel(kernel, spectrum, o))
    }

    #[cfg(feature = "parallelism")]
    pub(crate) fn process_parallel<K: SpectrumKernel + Sync + ?Sized>(
        &self,
        cube: &CubeArray,
        kernel: &K,
        stride: usize,
        out: &mut [f64],
    ) -> Result<(), ProcessingError> {
        out.par_chunks_mut(stride)
            .zip(cube.data().par_chunks(cube.bands()))
            .with_min_len(self.min_pixels_per_task.max(1))
            .try_for_each(|(o, spectrum)| process_pixel(kernel, spectrum, o))
    }

    /// Apply `kernel` to every pixel of `cube`, returning one cube per output
    /// plane of the kernel.
    ///
    /// The kernel is validated against the cube before any pixel is touched.
    /// An error from any pixel fails the whole call.
    pub fn process<K: SpectrumKernel + Sync + ?Sized>(
        &self,
        cube: &CubeArray,
        kernel: &K,
    ) -> Result<Vec<CubeArray>, ProcessingError> {
        let shape = kernel.output_shape(cube.bands())?;
        let stride = shape.stride();
        let (rows, cols, _) = cube.shape();
        let start = Instant::now();
        debug!(
            "Starting {} over {rows}x{cols} pixels, {} bands in and {}x{} values out per pixel",
            kernel.name(),
            cube.bands(),
            shape.planes,
            shape.bands
        );

        let mut out = vec![f64::NAN; cube.pixels() * stride];
        process_inner(self, cube, kernel, stride, &mut out)?;

        let planes = split_planes(&out, rows, cols, shape)?;
        debug!(
            "Finished {} in {:.3} seconds",
            kernel.name(),
            start.elapsed().as_secs_f64()
        );
        Ok(planes)
    }
}

// Can't inline cfg-if
cfg_if::cfg_if! {
    if #[cfg(feature = "parallelism")] {
        fn process_inner<K: SpectrumKernel + Sync + ?Sized>(
            processor: &CubeProcessor,
            cube: &CubeArray,
            kernel: &K,
            stride: usize,
            out: &mut [f64],
        ) -> Result<(), ProcessingError> {
            processor.process_parallel(cube, kernel, stride, out)
        }
    } else {
        fn process_inner<K: SpectrumKernel + Sync + ?Sized>(
            processor: &CubeProcessor,
            cube: &CubeArray,
            kernel: &K,
            stride: usize,
            out: &mut [f64],
        ) -> Result<(), ProcessingError> {
            processor.process_serial(cube, kernel, stride, out)
        }
    }
}

/// Separate the interleaved per-pixel output into one cube per plane
fn split_planes(
    out: &[f64],
    rows: usize,
    cols: usize,
    shape: OutputShape,
) -> Result<Vec<CubeArray>, SpectrumError> {
    let stride = shape.stride();
    (0..shape.planes)
        .map(|plane| {
            let offset = plane * shape.bands;
            let mut data = Vec::with_capacity(rows * cols * shape.bands);
            for pixel in out.chunks(stride) {
                data.extend_from_slice(&pixel[offset..offset + shape.bands]);
            }
            trace!("Collected output plane {plane} of {}", shape.planes);
            CubeArray::new(rows, cols, shape.bands, data)
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::continuum::ContinuumMethod;
    use crate::smooth::EdgeMode;
    use crate::spectrum::SpectralResolution;
    use crate::test_data;

    use rstest::{fixture, rstest};

    /// A 3x4 cube of varied synthetic spectra with pixel (1, 2) invalid
    #[fixture]
    fn cube() -> (CubeArray, Vec<f64>) {
        let wavelengths = test_data::wavelengths();
        let (rows, cols) = (3, 4);
        let mut data = Vec::new();
        for i in 0..rows {
            for j in 0..cols {
                let scale = 0.8 + 0.05 * (i * cols + j) as f64;
                let ripple = 0.002 * (j as f64 + 1.0);
                let spectrum = test_data::noisy_reflectance(&wavelengths, ripple);
                if (i, j) == (1, 2) {
                    data.push(f64::NAN);
                    data.extend(spectrum[1..].iter().map(|v| v * scale));
                } else {
                    data.extend(spectrum.iter().map(|v| v * scale));
                }
            }
        }
        (CubeArray::new(rows, cols, wavelengths.len(), data).unwrap(), wavelengths)
    }

    fn kernels(wavelengths: &[f64]) -> Vec<Kernel> {
        let fit = AbsorptionFit::new(wavelengths, 2150.0, 2450.0, 4).unwrap();
        vec![
            Kernel::OutlierRemoval(OutlierRemover::default()),
            Kernel::Smoothing(MovingAverageSmoother::default()),
            Kernel::ContinuumRemoval(ContinuumMethod::DoubleLine.plan(wavelengths).unwrap()),
            Kernel::PolynomialFit(fit.clone()),
            Kernel::FeatureStatistics(
                FeatureStatistics::new(fit, SpectralResolution::Uniform(10.0)).unwrap(),
            ),
        ]
    }

    fn single(kernel: &Kernel, spectrum: &[f64]) -> Vec<f64> {
        let shape = kernel.output_shape(spectrum.len()).unwrap();
        let mut out = vec![0.0; shape.stride()];
        kernel.process_into(spectrum, &mut out).unwrap();
        out
    }

    #[rstest]
    fn test_invalid_pixel_isolated(cube: (CubeArray, Vec<f64>)) {
        let (cube, wavelengths) = cube;
        let processor = CubeProcessor::new(1);
        for kernel in kernels(&wavelengths) {
            let shape = kernel.output_shape(cube.bands()).unwrap();
            let planes = processor.process(&cube, &kernel).unwrap();
            assert_eq!(planes.len(), shape.planes);
            for i in 0..cube.rows() {
                for j in 0..cube.cols() {
                    let expected = single(&kernel, cube.pixel(i, j));
                    for (p, plane) in planes.iter().enumerate() {
                        assert_eq!(plane.bands(), shape.bands);
                        let got = plane.pixel(i, j);
                        if (i, j) == (1, 2) {
                            assert!(got.iter().all(|v| v.is_nan()), "{} at ({i}, {j})", kernel.name());
                            continue;
                        }
                        let want = &expected[p * shape.bands..(p + 1) * shape.bands];
                        for (g, w) in got.iter().zip(want) {
                            assert!(g == w || (g.is_nan() && w.is_nan()), "{} at ({i}, {j})", kernel.name());
                        }
                    }
                }
            }
        }
    }

    #[rstest]
    fn test_schedule_independent(cube: (CubeArray, Vec<f64>)) {
        let (cube, wavelengths) = cube;
        let kernels = kernels(&wavelengths);
        let kernel = &kernels[2];
        let processor = CubeProcessor::new(1);
        let stride = kernel.output_shape(cube.bands()).unwrap().stride();
        let mut serial = vec![f64::NAN; cube.pixels() * stride];
        processor.process_serial(&cube, kernel, stride, &mut serial).unwrap();
        let mut dispatched = vec![f64::NAN; cube.pixels() * stride];
        process_inner(&CubeProcessor::new(5), &cube, kernel, stride, &mut dispatched).unwrap();
        for (a, b) in serial.iter().zip(dispatched.iter()) {
            assert!(a == b || (a.is_nan() && b.is_nan()));
        }
    }

    #[rstest]
    fn test_configuration_rejected_before_dispatch(cube: (CubeArray, Vec<f64>)) {
        let (cube, _) = cube;
        let processor = CubeProcessor::default();
        let short: Vec<f64> = (0..50).map(|i| 400.0 + 10.0 * i as f64).collect();
        let kernel = Kernel::ContinuumRemoval(ContinuumMethod::DoubleLine.plan(&short).unwrap());
        assert!(matches!(
            processor.process(&cube, &kernel),
            Err(ProcessingError::Continuum(ContinuumError::LengthMismatch { .. }))
        ));

        let kernel = Kernel::Smoothing(MovingAverageSmoother::new(0, EdgeMode::Mirror));
        assert_eq!(
            processor.process(&cube, &kernel).unwrap_err(),
            ProcessingError::Smoothing(SmoothingError::WindowSizeZero)
        );

        let kernel = Kernel::OutlierRemoval(OutlierRemover::new(0.0));
        assert!(matches!(
            processor.process(&cube, &kernel),
            Err(ProcessingError::Outliers(OutlierError::InvalidThreshold(_)))
        ));
    }

    #[test]
    fn test_cut_ends_shape() {
        let kernel = Kernel::Smoothing(MovingAverageSmoother::new(5, EdgeMode::CutEnds));
        assert_eq!(kernel.output_shape(20).unwrap(), OutputShape::new(2, 16));
        assert!(is_invalid_pixel(&[f64::NAN, 1.0]));
        assert!(!is_invalid_pixel(&[1.0, f64::NAN]));
    }
}
