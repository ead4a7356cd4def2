//! Absorption feature fitting and band parameters.
//!
//! An absorption feature is described by a polynomial fit to a continuum-removed
//! spectrum over a wavelength search window, from which three parameters are
//! derived:
//!
//! - **area**: the sum of `(1 - r) * resolution` over the window's bands,
//!   excluding its upper band
//! - **center**: the wavelength of the fitted curve's minimum, NaN when the
//!   minimum falls on either end of the window
//! - **depth**: `1 - fitted minimum`, NaN whenever the center is
//!
//! [`AbsorptionFit`] and [`FeatureStatistics`] carry everything that depends only
//! on the wavelength axis, so a cube is fit by building them once and then
//! applying them pixel by pixel.
use log::trace;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::cube::{CubeArray, SpatialMap};
use crate::polyfit::{DesignMatrix, PolyFitError, Polynomial};
use crate::processor::ProcessingError;
use crate::search::{argmin, FeatureWindow};
use crate::spectrum::{SpectralResolution, SpectrumError};

/// A polynomial fit over a search window of a fixed wavelength axis
#[derive(Debug, Clone)]
pub struct AbsorptionFit {
    window: FeatureWindow,
    bands: usize,
    wavelengths: Vec<f64>,
    design: DesignMatrix,
}

impl AbsorptionFit {
    /// Prepare a polynomial fit of order `order` over the bands of `wavelengths`
    /// nearest to `low` through the band nearest to `high`.
    pub fn new(wavelengths: &[f64], low: f64, high: f64, order: usize) -> Result<Self, PolyFitError> {
        let window = FeatureWindow::new(wavelengths, low, high)?;
        let restricted = wavelengths[window.fit_range()].to_vec();
        let design = DesignMatrix::new(&restricted, order)?;
        trace!(
            "Absorption fit of order {order} over {} bands, {} to {} nm",
            restricted.len(),
            window.low.wavelength,
            window.high.wavelength
        );
        Ok(Self {
            window,
            bands: wavelengths.len(),
            wavelengths: restricted,
            design,
        })
    }

    pub fn window(&self) -> &FeatureWindow {
        &self.window
    }

    /// The wavelengths of the bands within the fit window
    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    /// The number of bands in the full spectra this fit accepts
    pub fn bands(&self) -> usize {
        self.bands
    }

    /// The number of bands within the fit window
    pub fn len(&self) -> usize {
        self.wavelengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelengths.is_empty()
    }

    pub fn order(&self) -> usize {
        self.design.order()
    }

    /// Select the bands of a full spectrum that fall within the fit window
    pub fn restrict<'a>(&self, spectrum: &'a [f64]) -> Result<&'a [f64], PolyFitError> {
        if spectrum.len() != self.bands {
            return Err(PolyFitError::LengthMismatch {
                expected: self.bands,
                received: spectrum.len(),
            });
        }
        Ok(&spectrum[self.window.fit_range()])
    }

    /// Fit a full spectrum, writing the fitted curve over the window into `out`
    pub fn fit_into(&self, spectrum: &[f64], out: &mut [f64]) -> Result<(), PolyFitError> {
        let restricted = self.restrict(spectrum)?;
        self.design.fit_into(restricted, out)
    }

    pub fn fit(&self, spectrum: &[f64]) -> Result<Vec<f64>, PolyFitError> {
        let restricted = self.restrict(spectrum)?;
        self.design.fit(restricted)
    }

    pub fn coefficients(&self, spectrum: &[f64]) -> Result<Polynomial, PolyFitError> {
        let restricted = self.restrict(spectrum)?;
        self.design.coefficients(restricted)
    }
}

/// The area, center and depth of an absorption feature
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeatureParameters {
    pub area: f64,
    pub center: f64,
    pub depth: f64,
}

impl FeatureParameters {
    pub const NAN: Self = Self {
        area: f64::NAN,
        center: f64::NAN,
        depth: f64::NAN,
    };

    pub fn as_array(&self) -> [f64; 3] {
        [self.area, self.center, self.depth]
    }
}

/// Measures [`FeatureParameters`] from continuum-removed spectra
#[derive(Debug, Clone)]
pub struct FeatureStatistics {
    fit: AbsorptionFit,
    resolution: SpectralResolution,
}

impl FeatureStatistics {
    pub fn new(fit: AbsorptionFit, resolution: SpectralResolution) -> Result<Self, SpectrumError> {
        resolution.validate(fit.bands())?;
        Ok(Self { fit, resolution })
    }

    pub fn fit(&self) -> &AbsorptionFit {
        &self.fit
    }

    pub fn resolution(&self) -> &SpectralResolution {
        &self.resolution
    }

    /// The area of the feature below the continuum. The upper band of the
    /// window does not contribute.
    pub fn area(&self, continuum_removed: &[f64]) -> Result<f64, PolyFitError> {
        self.fit.restrict(continuum_removed)?;
        Ok(self
            .fit
            .window()
            .area_range()
            .map(|i| (1.0 - continuum_removed[i]) * self.resolution.at(i))
            .sum())
    }

    /// The center wavelength and depth of the feature from its fitted curve.
    pub fn center_and_depth(&self, fitted: &[f64]) -> (f64, f64) {
        if fitted.iter().any(|v| v.is_nan()) {
            return (f64::NAN, f64::NAN);
        }
        match argmin(fitted) {
            Some(i) if i > 0 && i + 1 < fitted.len() => (self.fit.wavelengths()[i], 1.0 - fitted[i]),
            _ => (f64::NAN, f64::NAN),
        }
    }

    /// Fit `continuum_removed` and measure its feature, also returning the
    /// fitted curve
    pub fn measure_with_fit(
        &self,
        continuum_removed: &[f64],
    ) -> Result<(FeatureParameters, Vec<f64>), PolyFitError> {
        let fitted = self.fit.fit(continuum_removed)?;
        let area = self.area(continuum_removed)?;
        let (center, depth) = self.center_and_depth(&fitted);
        Ok((FeatureParameters { area, center, depth }, fitted))
    }

    pub fn measure(&self, continuum_removed: &[f64]) -> Result<FeatureParameters, PolyFitError> {
        Ok(self.measure_with_fit(continuum_removed)?.0)
    }
}

/// An absorption feature of a single spectrum
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AbsorptionFeature {
    /// The fitted curve over the window
    pub fitted: Vec<f64>,
    /// The continuum-removed spectrum over the window
    pub spectrum: Vec<f64>,
    pub wavelengths: Vec<f64>,
    pub polynomial: Polynomial,
    pub area: f64,
    pub center: f64,
    pub depth: f64,
    pub window: FeatureWindow,
}

impl AbsorptionFeature {
    /// Fit and measure the feature of `continuum_removed` within `(low, high)` nm
    pub fn measure(
        continuum_removed: &[f64],
        wavelengths: &[f64],
        resolution: &SpectralResolution,
        low: f64,
        high: f64,
        order: usize,
    ) -> Result<Self, ProcessingError> {
        let fit = AbsorptionFit::new(wavelengths, low, high, order)?;
        let polynomial = fit.coefficients(continuum_removed)?;
        let stats = FeatureStatistics::new(fit, resolution.clone())?;
        let (params, fitted) = stats.measure_with_fit(continuum_removed)?;
        let fit = stats.fit();
        Ok(Self {
            fitted,
            spectrum: fit.restrict(continuum_removed)?.to_vec(),
            wavelengths: fit.wavelengths().to_vec(),
            polynomial,
            area: params.area,
            center: params.center,
            depth: params.depth,
            window: *fit.window(),
        })
    }

    pub fn parameters(&self) -> FeatureParameters {
        FeatureParameters {
            area: self.area,
            center: self.center,
            depth: self.depth,
        }
    }
}

/// The absorption feature of every pixel of a cube
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AbsorptionFeatureCube {
    /// The fitted curve of every pixel over the window
    pub fitted: CubeArray,
    /// The continuum-removed cube over the window
    pub cube: CubeArray,
    pub wavelengths: Vec<f64>,
    pub area: SpatialMap,
    pub center: SpatialMap,
    pub depth: SpatialMap,
    pub window: FeatureWindow,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_data;
    use crate::continuum::double_line;

    use rstest::{fixture, rstest};

    #[fixture]
    fn continuum_removed() -> (Vec<f64>, Vec<f64>) {
        let wavelengths = test_data::wavelengths();
        let spectrum = test_data::reflectance(&wavelengths);
        let removed = double_line(&spectrum, &wavelengths).unwrap().removed;
        (wavelengths, removed)
    }

    #[rstest]
    fn test_feature_near_2300(continuum_removed: (Vec<f64>, Vec<f64>)) {
        let (wavelengths, removed) = continuum_removed;
        let resolution = SpectralResolution::Uniform(10.0);
        let feature =
            AbsorptionFeature::measure(&removed, &wavelengths, &resolution, 2150.0, 2450.0, 4).unwrap();
        assert_eq!(feature.wavelengths.first(), Some(&2150.0));
        assert_eq!(feature.wavelengths.last(), Some(&2450.0));
        assert_eq!(feature.fitted.len(), 31);
        assert!((feature.center - 2300.0).abs() <= 10.0, "{}", feature.center);
        assert!(feature.depth > 0.2 && feature.depth < 0.3, "{}", feature.depth);
        assert!(feature.area > 0.0);
        for (w, f) in feature.wavelengths.iter().zip(feature.fitted.iter()) {
            assert!((feature.polynomial.eval(*w) - f).abs() < 1e-9);
        }
    }

    #[rstest]
    fn test_area_excludes_upper_band(continuum_removed: (Vec<f64>, Vec<f64>)) {
        let (wavelengths, removed) = continuum_removed;
        let fit = AbsorptionFit::new(&wavelengths, 2150.0, 2450.0, 4).unwrap();
        let window = *fit.window();
        let per_band: Vec<f64> = (0..wavelengths.len()).map(|i| 1.0 + i as f64).collect();
        let stats = FeatureStatistics::new(fit, SpectralResolution::PerBand(per_band.clone())).unwrap();
        let expected: f64 = (window.low.index..window.high.index)
            .map(|i| (1.0 - removed[i]) * per_band[i])
            .sum();
        assert_eq!(stats.area(&removed).unwrap(), expected);
    }

    #[test]
    fn test_boundary_minimum_is_nan() {
        let wavelengths: Vec<f64> = (0..11).map(|i| 1000.0 + 10.0 * i as f64).collect();
        // monotonically rising, so the minimum sits on the lower edge
        let spectrum: Vec<f64> = (0..11).map(|i| 0.8 + 0.01 * i as f64).collect();
        let fit = AbsorptionFit::new(&wavelengths, 1000.0, 1100.0, 2).unwrap();
        let stats = FeatureStatistics::new(fit, SpectralResolution::Uniform(10.0)).unwrap();
        let params = stats.measure(&spectrum).unwrap();
        assert!(params.center.is_nan());
        assert!(params.depth.is_nan());
        assert!(params.area > 0.0);
    }

    #[test]
    fn test_nan_spectrum() {
        let wavelengths: Vec<f64> = (0..11).map(|i| 1000.0 + 10.0 * i as f64).collect();
        let mut spectrum = vec![0.9; 11];
        spectrum[4] = f64::NAN;
        let fit = AbsorptionFit::new(&wavelengths, 1000.0, 1100.0, 2).unwrap();
        let stats = FeatureStatistics::new(fit, SpectralResolution::Uniform(10.0)).unwrap();
        let params = stats.measure(&spectrum).unwrap();
        assert!(params.center.is_nan());
        assert!(params.area.is_nan());
    }

    #[test]
    fn test_resolution_length_checked() {
        let wavelengths: Vec<f64> = (0..11).map(|i| 1000.0 + 10.0 * i as f64).collect();
        let fit = AbsorptionFit::new(&wavelengths, 1000.0, 1100.0, 2).unwrap();
        assert_eq!(
            FeatureStatistics::new(fit, SpectralResolution::PerBand(vec![10.0; 3])).unwrap_err(),
            SpectrumError::ResolutionLength {
                expected: 11,
                received: 3
            }
        );
    }

    #[test]
    fn test_restrict_checks_length() {
        let wavelengths: Vec<f64> = (0..11).map(|i| 1000.0 + 10.0 * i as f64).collect();
        let fit = AbsorptionFit::new(&wavelengths, 1020.0, 1060.0, 2).unwrap();
        assert_eq!(fit.len(), 5);
        assert!(matches!(
            fit.restrict(&[1.0; 4]),
            Err(PolyFitError::LengthMismatch { expected: 11, received: 4 })
        ));
    }
}
