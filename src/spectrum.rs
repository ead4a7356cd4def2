//! A single reflectance spectrum and the outputs of each processing stage.
use std::fmt::Display;
use std::time::Instant;

use log::{debug, info};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::absorption::AbsorptionFeature;
use crate::continuum::{ContinuumMethod, ContinuumPlan, ContinuumRemoved};
use crate::outliers::OutlierRemover;
use crate::pipeline::PipelineConfig;
use crate::processor::ProcessingError;
use crate::smooth::{MovingAverageSmoother, MovingStatistics};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpectrumError {
    #[error("The spectrum has no bands")]
    Empty,
    #[error("Expected {expected} values to match the wavelength axis, received {received}")]
    LengthMismatch { expected: usize, received: usize },
    #[error("The wavelength at index {0} is not finite")]
    NonFinite(usize),
    #[error("The wavelengths must be strictly increasing, violated at index {0}")]
    NotIncreasing(usize),
    #[error("Expected a spectral resolution for each of {expected} bands, received {received}")]
    ResolutionLength { expected: usize, received: usize },
    #[error("Expected a mask of {expected} pixels, received {received}")]
    MaskShape { expected: usize, received: usize },
    #[error("A {rows}x{cols}x{bands} cube requires {expected} values, received {received}")]
    CubeShape {
        rows: usize,
        cols: usize,
        bands: usize,
        expected: usize,
        received: usize,
    },
    #[error("The {0} stage has not been computed yet")]
    StageNotComputed(Stage),
}

/// Check that `wavelengths` is a usable wavelength axis: non-empty, finite and
/// strictly increasing
pub fn validate_wavelengths(wavelengths: &[f64]) -> Result<(), SpectrumError> {
    if wavelengths.is_empty() {
        return Err(SpectrumError::Empty);
    }
    if let Some(i) = wavelengths.iter().position(|w| !w.is_finite()) {
        return Err(SpectrumError::NonFinite(i));
    }
    if let Some(i) = wavelengths.windows(2).position(|w| !(w[0] < w[1])) {
        return Err(SpectrumError::NotIncreasing(i + 1));
    }
    Ok(())
}

/// The wavelength interval each band represents
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SpectralResolution {
    Uniform(f64),
    PerBand(Vec<f64>),
}

impl SpectralResolution {
    /// The average band spacing, `(max - min) / n`
    pub fn from_wavelengths(wavelengths: &[f64]) -> Self {
        let (lo, hi) = wavelengths
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), w| {
                (lo.min(*w), hi.max(*w))
            });
        if wavelengths.is_empty() {
            return Self::Uniform(f64::NAN);
        }
        Self::Uniform((hi - lo) / wavelengths.len() as f64)
    }

    /// The resolution of band `band`, NaN if there is no such band
    #[inline]
    pub fn at(&self, band: usize) -> f64 {
        match self {
            Self::Uniform(value) => *value,
            Self::PerBand(values) => values.get(band).copied().unwrap_or(f64::NAN),
        }
    }

    pub fn validate(&self, bands: usize) -> Result<(), SpectrumError> {
        match self {
            Self::PerBand(values) if values.len() != bands => Err(SpectrumError::ResolutionLength {
                expected: bands,
                received: values.len(),
            }),
            _ => Ok(()),
        }
    }
}

/// A named processing stage, used to pick the input of the next stage
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Stage {
    #[default]
    Raw,
    NoOutliers,
    Smoothed,
    ContinuumRemoved,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Raw => "raw",
            Stage::NoOutliers => "outlier removal",
            Stage::Smoothed => "smoothing",
            Stage::ContinuumRemoved => "continuum removal",
        };
        f.write_str(name)
    }
}

/// A reflectance spectrum on a wavelength axis.
///
/// The raw values are never modified. Each processing stage stores its output
/// alongside them, reading either the raw values or an earlier stage's output.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Spectrum {
    values: Vec<f64>,
    wavelengths: Vec<f64>,
    resolution: SpectralResolution,
    no_outliers: Option<Vec<f64>>,
    smoothed: Option<MovingStatistics>,
    continuum_removed: Option<ContinuumRemoved>,
}

impl Spectrum {
    /// Build a spectrum, deriving its resolution from the wavelength spacing
    pub fn new(values: Vec<f64>, wavelengths: Vec<f64>) -> Result<Self, SpectrumError> {
        validate_wavelengths(&wavelengths)?;
        if values.len() != wavelengths.len() {
            return Err(SpectrumError::LengthMismatch {
                expected: wavelengths.len(),
                received: values.len(),
            });
        }
        let resolution = SpectralResolution::from_wavelengths(&wavelengths);
        Ok(Self {
            values,
            wavelengths,
            resolution,
            no_outliers: None,
            smoothed: None,
            continuum_removed: None,
        })
    }

    pub fn with_resolution(mut self, resolution: SpectralResolution) -> Result<Self, SpectrumError> {
        resolution.validate(self.len())?;
        self.resolution = resolution;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    pub fn resolution(&self) -> &SpectralResolution {
        &self.resolution
    }

    pub fn no_outliers(&self) -> Option<&[f64]> {
        self.no_outliers.as_deref()
    }

    pub fn smoothed(&self) -> Option<&MovingStatistics> {
        self.smoothed.as_ref()
    }

    pub fn continuum_removed(&self) -> Option<&ContinuumRemoved> {
        self.continuum_removed.as_ref()
    }

    /// The values produced by `stage`
    pub fn stage(&self, stage: Stage) -> Result<&[f64], SpectrumError> {
        let values = match stage {
            Stage::Raw => Some(self.values.as_slice()),
            Stage::NoOutliers => self.no_outliers.as_deref(),
            Stage::Smoothed => self.smoothed.as_ref().map(|s| s.mean.as_slice()),
            Stage::ContinuumRemoved => self.continuum_removed.as_ref().map(|c| c.removed.as_slice()),
        };
        values.ok_or(SpectrumError::StageNotComputed(stage))
    }

    pub fn remove_outliers(
        &mut self,
        remover: &OutlierRemover,
        source: Stage,
    ) -> Result<&[f64], ProcessingError> {
        let start = Instant::now();
        let cleaned = remover.remove(self.stage(source)?)?;
        debug!(
            "Outlier removal from the {source} stage took {:.3} seconds",
            start.elapsed().as_secs_f64()
        );
        Ok(self.no_outliers.insert(cleaned).as_slice())
    }

    pub fn smooth(
        &mut self,
        smoother: &MovingAverageSmoother,
        source: Stage,
    ) -> Result<&MovingStatistics, ProcessingError> {
        let start = Instant::now();
        let stats = smoother.smooth(self.stage(source)?)?;
        debug!(
            "Smoothing from the {source} stage took {:.3} seconds",
            start.elapsed().as_secs_f64()
        );
        Ok(&*self.smoothed.insert(stats))
    }

    pub fn remove_continuum(
        &mut self,
        method: &ContinuumMethod,
        source: Stage,
    ) -> Result<&ContinuumRemoved, ProcessingError> {
        let plan = method.plan(&self.wavelengths)?;
        self.remove_continuum_with(&plan, source)
    }

    fn remove_continuum_with(
        &mut self,
        plan: &ContinuumPlan,
        source: Stage,
    ) -> Result<&ContinuumRemoved, ProcessingError> {
        let start = Instant::now();
        let removed = plan.remove(self.stage(source)?)?;
        debug!(
            "Continuum removal from the {source} stage took {:.3} seconds",
            start.elapsed().as_secs_f64()
        );
        Ok(&*self.continuum_removed.insert(removed))
    }

    /// Fit and measure the absorption feature between `low` and `high` nm of the
    /// continuum-removed spectrum
    pub fn absorption_feature(
        &self,
        low: f64,
        high: f64,
        order: usize,
    ) -> Result<AbsorptionFeature, ProcessingError> {
        let removed = self.stage(Stage::ContinuumRemoved)?;
        AbsorptionFeature::measure(removed, &self.wavelengths, &self.resolution, low, high, order)
    }

    /// Remove outliers, smooth and remove the continuum, each stage reading the
    /// output of the one before it.
    pub fn run_pipeline(&mut self, config: &PipelineConfig) -> Result<&ContinuumRemoved, ProcessingError> {
        let start = Instant::now();
        let bands = self.len();
        let plan = config.plan(&self.wavelengths)?;
        self.remove_outliers(&config.outliers, Stage::Raw)?;
        self.smooth(&config.smoother, Stage::NoOutliers)?;
        let removed = self.remove_continuum_with(&plan, Stage::Smoothed)?;
        info!(
            "Processed a spectrum of {bands} bands in {:.3} seconds",
            start.elapsed().as_secs_f64()
        );
        Ok(removed)
    }
}
