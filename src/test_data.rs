//! Synthetic reflectance spectra for tests.
use crate::arrayops::gridspace;

/// 400 to 2600 nm in 10 nm steps
pub(crate) fn wavelengths() -> Vec<f64> {
    gridspace(400.0, 10.0, 221)
}

/// A gently rising background reflectance
pub(crate) fn continuum_at(wavelength: f64) -> f64 {
    0.25 + 0.0001 * wavelength
}

fn gaussian(x: f64, center: f64, width: f64) -> f64 {
    (-(x - center).powi(2) / (2.0 * width * width)).exp()
}

/// The background with a broad absorption near 1000 nm and a deeper, narrower
/// one near 2300 nm
pub(crate) fn reflectance(wavelengths: &[f64]) -> Vec<f64> {
    wavelengths
        .iter()
        .map(|w| {
            let absorption = 0.12 * gaussian(*w, 1000.0, 80.0) + 0.25 * gaussian(*w, 2300.0, 50.0);
            continuum_at(*w) * (1.0 - absorption)
        })
        .collect()
}

/// `reflectance` with a deterministic ripple of amplitude `amplitude` added
pub(crate) fn noisy_reflectance(wavelengths: &[f64], amplitude: f64) -> Vec<f64> {
    reflectance(wavelengths)
        .into_iter()
        .enumerate()
        .map(|(i, v)| v + amplitude * ((i as f64) * 2.39).sin())
        .collect()
}
