//! `spectralops` is a library for processing reflectance spectra from imaging
//! spectrometers, either one spectrum at a time or as whole spectral cubes.
//!
//! Processing follows a fixed pipeline of outlier removal, moving average
//! smoothing and continuum removal, after which absorption features can be fit
//! with a polynomial and measured for their area, center and depth.
//!
//! A single spectrum is handled by [`Spectrum`], which keeps the output of each
//! stage alongside the raw values. A [`SpectralCube`] does the same for a grid of
//! spectra, dispatching each stage over its pixels with a [`CubeProcessor`]. A
//! pixel whose first band is NaN is invalid: every stage leaves it NaN, and it
//! never affects any other pixel.
//!
//! # Usage
//! ```
//! use spectralops::{PipelineConfig, Spectrum};
//!
//! let wavelengths: Vec<f64> = (0..221).map(|i| 400.0 + 10.0 * i as f64).collect();
//! let values: Vec<f64> = wavelengths
//!     .iter()
//!     .map(|w| {
//!         let dip = 0.2 * (-(w - 2300.0f64).powi(2) / 5000.0).exp();
//!         (0.25 + 0.0001 * w) * (1.0 - dip)
//!     })
//!     .collect();
//!
//! let mut spectrum = Spectrum::new(values, wavelengths).unwrap();
//! spectrum.run_pipeline(&PipelineConfig::default()).unwrap();
//! let feature = spectrum.absorption_feature(2150.0, 2450.0, 4).unwrap();
//! assert!((feature.center - 2300.0).abs() <= 20.0);
//! ```
//!
//! ## Parallelism
//! The `parallelism` feature, enabled by default, processes cube pixels in
//! parallel with `rayon`. Results are identical with or without it.
pub mod absorption;
pub mod arrayops;
pub mod continuum;
pub mod cube;
pub mod outliers;
pub mod pipeline;
pub mod polyfit;
pub mod processor;
pub mod search;
pub mod smooth;
pub mod spectrum;

#[cfg(test)]
mod test_data;

pub use crate::absorption::{
    AbsorptionFeature, AbsorptionFeatureCube, AbsorptionFit, FeatureParameters, FeatureStatistics,
};
pub use crate::continuum::{ContinuumError, ContinuumMethod, ContinuumPlan, ContinuumRemoved};
pub use crate::cube::{CubeArray, CubeField, SpatialMap, SpectralCube};
pub use crate::outliers::{remove_outliers, OutlierError, OutlierRemover};
pub use crate::pipeline::{PipelineConfig, PipelineConfigBuilder};
pub use crate::polyfit::{DesignMatrix, PolyFitError, Polynomial};
pub use crate::processor::{CubeProcessor, Kernel, OutputShape, ProcessingError, SpectrumKernel};
pub use crate::search::{nearest_wavelength, FeatureWindow, WavelengthMatch};
pub use crate::smooth::{moving_average, EdgeMode, MovingAverageSmoother, MovingStatistics, SmoothingError};
pub use crate::spectrum::{SpectralResolution, Spectrum, SpectrumError, Stage};
