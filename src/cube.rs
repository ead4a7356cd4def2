//! Spectral cubes: a spatial grid of spectra sharing one wavelength axis.
//!
//! Cube data is stored row-major as `(rows, cols, bands)`, so the spectrum of
//! pixel `(i, j)` is the contiguous run of `bands` values starting at
//! `(i * cols + j) * bands`.
use std::fmt::Display;
use std::slice::Chunks;
use std::time::Instant;

use log::{debug, info};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "ndarray")]
use ndarray::{Array3, ArrayView3};

use crate::absorption::{AbsorptionFeatureCube, AbsorptionFit, FeatureStatistics};
use crate::continuum::{ContinuumMethod, ContinuumPlan};
use crate::outliers::OutlierRemover;
use crate::pipeline::PipelineConfig;
use crate::processor::{is_invalid_pixel, CubeProcessor, Kernel, ProcessingError, SpectrumKernel};
use crate::smooth::MovingAverageSmoother;
use crate::spectrum::{validate_wavelengths, SpectralResolution, SpectrumError, Stage};

/// A dense `(rows, cols, bands)` array of `f64`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CubeArray {
    rows: usize,
    cols: usize,
    bands: usize,
    data: Vec<f64>,
}

impl CubeArray {
    pub fn new(rows: usize, cols: usize, bands: usize, data: Vec<f64>) -> Result<Self, SpectrumError> {
        if rows == 0 || cols == 0 || bands == 0 {
            return Err(SpectrumError::Empty);
        }
        let expected = rows * cols * bands;
        if data.len() != expected {
            return Err(SpectrumError::CubeShape {
                rows,
                cols,
                bands,
                expected,
                received: data.len(),
            });
        }
        Ok(Self {
            rows,
            cols,
            bands,
            data,
        })
    }

    pub fn filled(rows: usize, cols: usize, bands: usize, value: f64) -> Result<Self, SpectrumError> {
        Self::new(rows, cols, bands, vec![value; rows * cols * bands])
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.rows, self.cols, self.bands)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    /// The number of spatial pixels
    pub fn pixels(&self) -> usize {
        self.rows * self.cols
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.data
    }

    #[inline]
    fn offset(&self, row: usize, col: usize) -> usize {
        (row * self.cols + col) * self.bands
    }

    /// The spectrum of pixel `(row, col)`
    pub fn pixel(&self, row: usize, col: usize) -> &[f64] {
        let start = self.offset(row, col);
        &self.data[start..start + self.bands]
    }

    pub fn pixel_mut(&mut self, row: usize, col: usize) -> &mut [f64] {
        let start = self.offset(row, col);
        let bands = self.bands;
        &mut self.data[start..start + bands]
    }

    /// Iterate over pixel spectra in row-major order
    pub fn iter_pixels(&self) -> Chunks<'_, f64> {
        self.data.chunks(self.bands)
    }

    /// Whether pixel `(row, col)` carries usable data
    pub fn is_valid_pixel(&self, row: usize, col: usize) -> bool {
        !is_invalid_pixel(self.pixel(row, col))
    }

    /// A copy with every pixel flagged in `mask` set to NaN
    pub fn masked(&self, mask: &[bool]) -> Result<Self, SpectrumError> {
        check_mask(mask, self.pixels())?;
        let mut out = self.clone();
        for (pixel, excluded) in out.data.chunks_mut(self.bands).zip(mask) {
            if *excluded {
                pixel.fill(f64::NAN);
            }
        }
        Ok(out)
    }

    #[cfg(feature = "ndarray")]
    pub fn from_ndarray(array: ArrayView3<f64>) -> Result<Self, SpectrumError> {
        let (rows, cols, bands) = array.dim();
        Self::new(rows, cols, bands, array.iter().copied().collect())
    }

    #[cfg(feature = "ndarray")]
    pub fn into_ndarray(self) -> Result<Array3<f64>, ndarray::ShapeError> {
        Array3::from_shape_vec((self.rows, self.cols, self.bands), self.data)
    }
}

fn check_mask(mask: &[bool], pixels: usize) -> Result<(), SpectrumError> {
    if mask.len() != pixels {
        Err(SpectrumError::MaskShape {
            expected: pixels,
            received: mask.len(),
        })
    } else {
        Ok(())
    }
}

/// A single value per pixel, e.g. the depth of an absorption feature
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpatialMap {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl SpatialMap {
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self, SpectrumError> {
        if data.len() != rows * cols {
            return Err(SpectrumError::CubeShape {
                rows,
                cols,
                bands: 1,
                expected: rows * cols,
                received: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows && col < self.cols {
            Some(self.data[row * self.cols + col])
        } else {
            None
        }
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// A copy with every pixel flagged in `mask` set to NaN
    pub fn masked(&self, mask: &[bool]) -> Result<Self, SpectrumError> {
        check_mask(mask, self.data.len())?;
        let data = self
            .data
            .iter()
            .zip(mask)
            .map(|(v, excluded)| if *excluded { f64::NAN } else { *v })
            .collect();
        Ok(Self {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }
}

/// The arrays a [`SpectralCube`] holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CubeField {
    Raw,
    NoOutliers,
    Smoothed,
    SmoothedStd,
    ContinuumRemoved,
    Continuum,
}

impl From<Stage> for CubeField {
    fn from(value: Stage) -> Self {
        match value {
            Stage::Raw => CubeField::Raw,
            Stage::NoOutliers => CubeField::NoOutliers,
            Stage::Smoothed => CubeField::Smoothed,
            Stage::ContinuumRemoved => CubeField::ContinuumRemoved,
        }
    }
}

impl CubeField {
    /// The stage that produces this field
    pub fn stage(&self) -> Stage {
        match self {
            CubeField::Raw => Stage::Raw,
            CubeField::NoOutliers => Stage::NoOutliers,
            CubeField::Smoothed | CubeField::SmoothedStd => Stage::Smoothed,
            CubeField::ContinuumRemoved | CubeField::Continuum => Stage::ContinuumRemoved,
        }
    }
}

impl Display for CubeField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CubeField::Raw => "raw",
            CubeField::NoOutliers => "no_outliers",
            CubeField::Smoothed => "smoothed",
            CubeField::SmoothedStd => "smoothed_std",
            CubeField::ContinuumRemoved => "continuum_removed",
            CubeField::Continuum => "continuum",
        };
        f.write_str(name)
    }
}

/// A cube of reflectance spectra on a shared wavelength axis.
///
/// As with [`Spectrum`](crate::Spectrum), the raw cube is never modified and
/// each stage's output is kept alongside it. Every stage runs through a
/// [`CubeProcessor`], so pixels whose first band is NaN stay NaN throughout.
/// The optional spatial mask is not applied by any stage, only by
/// [`SpectralCube::with_mask`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpectralCube {
    cube: CubeArray,
    wavelengths: Vec<f64>,
    resolution: SpectralResolution,
    mask: Option<Vec<bool>>,
    processor: CubeProcessor,
    no_outliers: Option<CubeArray>,
    smoothed: Option<CubeArray>,
    smoothed_std: Option<CubeArray>,
    continuum_removed: Option<CubeArray>,
    continuum: Option<CubeArray>,
}

impl SpectralCube {
    pub fn new(cube: CubeArray, wavelengths: Vec<f64>) -> Result<Self, SpectrumError> {
        validate_wavelengths(&wavelengths)?;
        if cube.bands() != wavelengths.len() {
            return Err(SpectrumError::LengthMismatch {
                expected: wavelengths.len(),
                received: cube.bands(),
            });
        }
        let resolution = SpectralResolution::from_wavelengths(&wavelengths);
        Ok(Self {
            cube,
            wavelengths,
            resolution,
            mask: None,
            processor: CubeProcessor::default(),
            no_outliers: None,
            smoothed: None,
            smoothed_std: None,
            continuum_removed: None,
            continuum: None,
        })
    }

    pub fn with_resolution(mut self, resolution: SpectralResolution) -> Result<Self, SpectrumError> {
        resolution.validate(self.wavelengths.len())?;
        self.resolution = resolution;
        Ok(self)
    }

    /// Attach a row-major spatial mask, `true` marking excluded pixels
    pub fn with_spatial_mask(mut self, mask: Vec<bool>) -> Result<Self, SpectrumError> {
        check_mask(&mask, self.cube.pixels())?;
        self.mask = Some(mask);
        Ok(self)
    }

    pub fn with_processor(mut self, processor: CubeProcessor) -> Self {
        self.processor = processor;
        self
    }

    pub fn cube(&self) -> &CubeArray {
        &self.cube
    }

    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    pub fn resolution(&self) -> &SpectralResolution {
        &self.resolution
    }

    pub fn mask(&self) -> Option<&[bool]> {
        self.mask.as_deref()
    }

    pub fn field(&self, field: CubeField) -> Option<&CubeArray> {
        match field {
            CubeField::Raw => Some(&self.cube),
            CubeField::NoOutliers => self.no_outliers.as_ref(),
            CubeField::Smoothed => self.smoothed.as_ref(),
            CubeField::SmoothedStd => self.smoothed_std.as_ref(),
            CubeField::ContinuumRemoved => self.continuum_removed.as_ref(),
            CubeField::Continuum => self.continuum.as_ref(),
        }
    }

    /// The cube produced by `stage`
    pub fn stage(&self, stage: Stage) -> Result<&CubeArray, SpectrumError> {
        self.field(stage.into())
            .ok_or(SpectrumError::StageNotComputed(stage))
    }

    /// A copy of `field` with the masked pixels set to NaN. Without a mask this
    /// is a plain copy.
    pub fn with_mask(&self, field: CubeField) -> Result<CubeArray, SpectrumError> {
        let data = self
            .field(field)
            .ok_or(SpectrumError::StageNotComputed(field.stage()))?;
        match &self.mask {
            Some(mask) => data.masked(mask),
            None => Ok(data.clone()),
        }
    }

    fn run(&self, kernel: &Kernel, source: Stage) -> Result<Vec<CubeArray>, ProcessingError> {
        let input = self.stage(source)?;
        let start = Instant::now();
        let planes = self.processor.process(input, kernel)?;
        debug!(
            "Cube {} from the {source} stage took {:.3} seconds",
            kernel.name(),
            start.elapsed().as_secs_f64()
        );
        Ok(planes)
    }

    pub fn remove_outliers(
        &mut self,
        remover: &OutlierRemover,
        source: Stage,
    ) -> Result<&CubeArray, ProcessingError> {
        let mut planes = self.run(&Kernel::OutlierRemoval(*remover), source)?.into_iter();
        let cleaned = take_plane(&mut planes)?;
        Ok(&*self.no_outliers.insert(cleaned))
    }

    pub fn smooth(
        &mut self,
        smoother: &MovingAverageSmoother,
        source: Stage,
    ) -> Result<&CubeArray, ProcessingError> {
        let mut planes = self.run(&Kernel::Smoothing(*smoother), source)?.into_iter();
        let mean = take_plane(&mut planes)?;
        self.smoothed_std = Some(take_plane(&mut planes)?);
        Ok(&*self.smoothed.insert(mean))
    }

    pub fn remove_continuum(
        &mut self,
        method: &ContinuumMethod,
        source: Stage,
    ) -> Result<&CubeArray, ProcessingError> {
        let plan = method.plan(&self.wavelengths)?;
        self.remove_continuum_with(plan, source)
    }

    fn remove_continuum_with(
        &mut self,
        plan: ContinuumPlan,
        source: Stage,
    ) -> Result<&CubeArray, ProcessingError> {
        let mut planes = self.run(&Kernel::ContinuumRemoval(plan), source)?.into_iter();
        let removed = take_plane(&mut planes)?;
        self.continuum = Some(take_plane(&mut planes)?);
        Ok(&*self.continuum_removed.insert(removed))
    }

    /// Fit and measure the absorption feature between `low` and `high` nm of
    /// every pixel of the continuum-removed cube
    pub fn absorption_feature(
        &self,
        low: f64,
        high: f64,
        order: usize,
    ) -> Result<AbsorptionFeatureCube, ProcessingError> {
        let fit = AbsorptionFit::new(&self.wavelengths, low, high, order)?;
        let stats = FeatureStatistics::new(fit.clone(), self.resolution.clone())?;

        let mut planes = self
            .run(&Kernel::PolynomialFit(fit.clone()), Stage::ContinuumRemoved)?
            .into_iter();
        let fitted = take_plane(&mut planes)?;
        let restricted = take_plane(&mut planes)?;

        let measured = self
            .run(&Kernel::FeatureStatistics(stats), Stage::ContinuumRemoved)?
            .into_iter()
            .next()
            .ok_or(SpectrumError::Empty)?;
        let (rows, cols, _) = measured.shape();
        let mut maps = [Vec::new(), Vec::new(), Vec::new()];
        for pixel in measured.iter_pixels() {
            for (map, value) in maps.iter_mut().zip(pixel) {
                map.push(*value);
            }
        }
        let [area, center, depth] = maps;

        Ok(AbsorptionFeatureCube {
            fitted,
            cube: restricted,
            wavelengths: fit.wavelengths().to_vec(),
            area: SpatialMap::new(rows, cols, area)?,
            center: SpatialMap::new(rows, cols, center)?,
            depth: SpatialMap::new(rows, cols, depth)?,
            window: *fit.window(),
        })
    }

    /// Remove outliers, smooth and remove the continuum of every pixel, each
    /// stage reading the output of the one before it.
    pub fn run_pipeline(&mut self, config: &PipelineConfig) -> Result<&CubeArray, ProcessingError> {
        let start = Instant::now();
        let (rows, cols, bands) = self.cube.shape();
        let plan = config.plan(&self.wavelengths)?;
        self.remove_outliers(&config.outliers, Stage::Raw)?;
        self.smooth(&config.smoother, Stage::NoOutliers)?;
        let removed = self.remove_continuum_with(plan, Stage::Smoothed)?;
        info!(
            "Processed a {rows}x{cols} cube of {bands} bands in {:.3} seconds",
            start.elapsed().as_secs_f64()
        );
        Ok(removed)
    }
}

fn take_plane(planes: &mut impl Iterator<Item = CubeArray>) -> Result<CubeArray, SpectrumError> {
    planes.next().ok_or(SpectrumError::Empty)
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::spectrum::Spectrum;
    use crate::test_data;

    use rstest::{fixture, rstest};

    fn assert_same(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!(x == y || (x.is_nan() && y.is_nan()), "{x} != {y}");
        }
    }

    /// A 2x3 cube with pixel (0, 1) invalid and an outlier in pixel (1, 0)
    #[fixture]
    fn spectral_cube() -> SpectralCube {
        let wavelengths = test_data::wavelengths();
        let (rows, cols) = (2, 3);
        let mut data = Vec::new();
        for i in 0..rows {
            for j in 0..cols {
                let mut spectrum = test_data::noisy_reflectance(&wavelengths, 0.001 * (i + j + 1) as f64);
                spectrum.iter_mut().for_each(|v| *v *= 1.0 + 0.1 * j as f64);
                match (i, j) {
                    (0, 1) => spectrum[0] = f64::NAN,
                    (1, 0) => spectrum[40] += 0.15,
                    _ => {}
                }
                data.extend(spectrum);
            }
        }
        let cube = CubeArray::new(rows, cols, wavelengths.len(), data).unwrap();
        SpectralCube::new(cube, wavelengths)
            .unwrap()
            .with_processor(CubeProcessor::new(1))
    }

    #[rstest]
    fn test_pipeline_matches_single_spectra(mut spectral_cube: SpectralCube) {
        let config = PipelineConfig::default();
        spectral_cube.run_pipeline(&config).unwrap();
        let feature = spectral_cube.absorption_feature(2150.0, 2450.0, 4).unwrap();

        for i in 0..2 {
            for j in 0..3 {
                let fields = [
                    CubeField::NoOutliers,
                    CubeField::Smoothed,
                    CubeField::SmoothedStd,
                    CubeField::ContinuumRemoved,
                    CubeField::Continuum,
                ];
                if (i, j) == (0, 1) {
                    for field in fields {
                        let data = spectral_cube.field(field).unwrap();
                        assert!(data.pixel(i, j).iter().all(|v| v.is_nan()), "{field}");
                    }
                    assert!(feature.fitted.pixel(i, j).iter().all(|v| v.is_nan()));
                    assert!(feature.cube.pixel(i, j).iter().all(|v| v.is_nan()));
                    assert!(feature.area.get(i, j).unwrap().is_nan());
                    assert!(feature.center.get(i, j).unwrap().is_nan());
                    assert!(feature.depth.get(i, j).unwrap().is_nan());
                    continue;
                }

                let raw = spectral_cube.cube().pixel(i, j).to_vec();
                let mut spectrum = Spectrum::new(raw, spectral_cube.wavelengths().to_vec()).unwrap();
                spectrum.run_pipeline(&config).unwrap();
                assert_same(
                    spectral_cube.field(CubeField::NoOutliers).unwrap().pixel(i, j),
                    spectrum.no_outliers().unwrap(),
                );
                let smoothed = spectrum.smoothed().unwrap();
                assert_same(
                    spectral_cube.field(CubeField::Smoothed).unwrap().pixel(i, j),
                    &smoothed.mean,
                );
                assert_same(
                    spectral_cube.field(CubeField::SmoothedStd).unwrap().pixel(i, j),
                    &smoothed.std,
                );
                let removed = spectrum.continuum_removed().unwrap();
                assert_same(
                    spectral_cube.field(CubeField::ContinuumRemoved).unwrap().pixel(i, j),
                    &removed.removed,
                );
                assert_same(
                    spectral_cube.field(CubeField::Continuum).unwrap().pixel(i, j),
                    &removed.continuum,
                );

                let single = spectrum.absorption_feature(2150.0, 2450.0, 4).unwrap();
                assert_same(feature.fitted.pixel(i, j), &single.fitted);
                assert_same(feature.cube.pixel(i, j), &single.spectrum);
                assert_same(&[feature.area.get(i, j).unwrap()], &[single.area]);
                assert_same(&[feature.center.get(i, j).unwrap()], &[single.center]);
                assert_same(&[feature.depth.get(i, j).unwrap()], &[single.depth]);
            }
        }
        assert_eq!(feature.wavelengths.len(), 31);
        let cleaned = spectral_cube.field(CubeField::NoOutliers).unwrap();
        assert!(spectral_cube.cube().pixel(1, 0)[40] > cleaned.pixel(1, 0)[40] + 0.1);
    }

    #[rstest]
    fn test_with_mask(spectral_cube: SpectralCube) {
        let mut mask = vec![false; 6];
        mask[5] = true;
        let mut spectral_cube = spectral_cube.with_spatial_mask(mask).unwrap();
        let masked = spectral_cube.with_mask(CubeField::Raw).unwrap();
        assert!(masked.pixel(1, 2).iter().all(|v| v.is_nan()));
        assert_same(masked.pixel(1, 1), spectral_cube.cube().pixel(1, 1));
        // the mask is not applied by the stages themselves
        spectral_cube
            .smooth(&MovingAverageSmoother::default(), Stage::Raw)
            .unwrap();
        assert!(spectral_cube
            .field(CubeField::Smoothed)
            .unwrap()
            .pixel(1, 2)
            .iter()
            .all(|v| v.is_finite()));
        assert!(spectral_cube
            .with_mask(CubeField::SmoothedStd)
            .unwrap()
            .pixel(1, 2)[0]
            .is_nan());
        assert_eq!(
            spectral_cube.with_mask(CubeField::Continuum).unwrap_err(),
            SpectrumError::StageNotComputed(Stage::ContinuumRemoved)
        );

        let map = SpatialMap::new(2, 3, vec![1.0; 6]).unwrap();
        let masked = map.masked(spectral_cube.mask().unwrap()).unwrap();
        assert!(masked.get(1, 2).unwrap().is_nan());
        assert_eq!(masked.get(0, 0), Some(1.0));
        assert_eq!(masked.get(2, 0), None);
    }

    #[test]
    fn test_shape_validation() {
        assert!(matches!(
            CubeArray::new(2, 2, 3, vec![0.0; 11]),
            Err(SpectrumError::CubeShape { expected: 12, received: 11, .. })
        ));
        assert_eq!(CubeArray::new(0, 2, 3, vec![]).unwrap_err(), SpectrumError::Empty);
        let cube = CubeArray::filled(2, 2, 3, 0.5).unwrap();
        assert_eq!(
            SpectralCube::new(cube.clone(), vec![400.0, 410.0]).unwrap_err(),
            SpectrumError::LengthMismatch {
                expected: 2,
                received: 3
            }
        );
        let spectral_cube = SpectralCube::new(cube, vec![400.0, 410.0, 420.0]).unwrap();
        assert_eq!(
            spectral_cube.with_spatial_mask(vec![true; 3]).unwrap_err(),
            SpectrumError::MaskShape {
                expected: 4,
                received: 3
            }
        );
    }

    #[rstest]
    fn test_stage_requires_source(mut spectral_cube: SpectralCube) {
        assert_eq!(
            spectral_cube
                .remove_continuum(&ContinuumMethod::DoubleLine, Stage::Smoothed)
                .unwrap_err(),
            ProcessingError::Spectrum(SpectrumError::StageNotComputed(Stage::Smoothed))
        );
        assert!(spectral_cube.absorption_feature(2150.0, 2450.0, 4).is_err());
        spectral_cube
            .remove_continuum(&ContinuumMethod::TiePoints(vec![1500.0, 2550.0]), Stage::Raw)
            .unwrap();
        assert!(spectral_cube.absorption_feature(2150.0, 2450.0, 4).is_ok());
    }

    #[rstest]
    fn test_pipeline_fails_before_any_stage(mut spectral_cube: SpectralCube) {
        let config = PipelineConfig::builder()
            .edge_mode(crate::smooth::EdgeMode::CutEnds)
            .build();
        assert!(spectral_cube.run_pipeline(&config).is_err());
        for stage in [Stage::NoOutliers, Stage::Smoothed, Stage::ContinuumRemoved] {
            assert_eq!(
                spectral_cube.stage(stage).unwrap_err(),
                SpectrumError::StageNotComputed(stage)
            );
        }
    }

    #[cfg(feature = "ndarray")]
    #[test]
    fn test_ndarray_conversion() {
        let array = Array3::from_shape_fn((2, 3, 4), |(i, j, k)| (i * 100 + j * 10 + k) as f64);
        let cube = CubeArray::from_ndarray(array.view()).unwrap();
        assert_eq!(cube.pixel(1, 2), &[120.0, 121.0, 122.0, 123.0]);
        assert_eq!(cube.into_ndarray().unwrap(), array);
    }
}
