//! Locate bands on a wavelength axis.
//!
//! Lookups never reject a target: one outside the wavelength axis is
//! snapped to the nearest endpoint. Because that can hide a caller mistake,
//! every lookup reports whether the target was actually inside the axis via
//! [`WavelengthMatch::in_range`] and logs a warning when it was not.
use std::ops::{Range, RangeInclusive};

use log::warn;
use num_traits::Float;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::polyfit::PolyFitError;

/// The result of looking up the band closest to a target wavelength
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WavelengthMatch {
    /// The index of the closest band
    pub index: usize,
    /// The wavelength of the closest band
    pub wavelength: f64,
    /// The wavelength that was asked for
    pub target: f64,
    /// Whether `target` lay within the span of the wavelength axis
    pub in_range: bool,
}

impl WavelengthMatch {
    /// The absolute distance between the requested and the matched wavelength
    pub fn offset(&self) -> f64 {
        (self.wavelength - self.target).abs()
    }
}

/// Find the index of the value in `values` closest to `target`.
///
/// Ties resolve to the lowest index. Returns `None` only when `values` is empty.
pub fn nearest_index<T: Float>(values: &[T], target: T) -> Option<usize> {
    let mut best: Option<(usize, T)> = None;
    for (i, v) in values.iter().enumerate() {
        let dist = (*v - target).abs();
        match best {
            Some((_, best_dist)) if !(dist < best_dist) => {}
            _ => best = Some((i, dist)),
        }
    }
    best.map(|(i, _)| i)
}

/// Find the band in `wavelengths` closest to `target`.
///
/// `wavelengths` is assumed to be strictly increasing, which
/// [`Spectrum`](crate::Spectrum) and [`SpectralCube`](crate::SpectralCube)
/// guarantee. Targets beyond either end of the axis resolve to that end.
/// Returns `None` only when `wavelengths` is empty.
pub fn nearest_wavelength(wavelengths: &[f64], target: f64) -> Option<WavelengthMatch> {
    let index = nearest_index(wavelengths, target)?;
    let first = wavelengths[0];
    let last = wavelengths[wavelengths.len() - 1];
    let in_range = target >= first && target <= last;
    if !in_range {
        warn!(
            "Target wavelength {target} lies outside of the wavelength axis [{first}, {last}], using {} instead",
            wavelengths[index]
        );
    }
    Some(WavelengthMatch {
        index,
        wavelength: wavelengths[index],
        target,
        in_range,
    })
}

/// A wavelength search window snapped onto a wavelength axis.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeatureWindow {
    pub low: WavelengthMatch,
    pub high: WavelengthMatch,
}

impl FeatureWindow {
    /// Snap the search window `(low, high)` onto `wavelengths`.
    pub fn new(wavelengths: &[f64], low: f64, high: f64) -> Result<Self, PolyFitError> {
        if !(low <= high) {
            return Err(PolyFitError::InvertedWindow(low, high));
        }
        match (
            nearest_wavelength(wavelengths, low),
            nearest_wavelength(wavelengths, high),
        ) {
            (Some(low), Some(high)) => Ok(Self { low, high }),
            _ => Err(PolyFitError::EmptyWindow),
        }
    }

    /// The bands the polynomial is fit over, both ends included.
    pub fn fit_range(&self) -> RangeInclusive<usize> {
        self.low.index..=self.high.index
    }

    /// The bands the feature area is summed over. The upper band is excluded.
    pub fn area_range(&self) -> Range<usize> {
        self.low.index..self.high.index
    }

    /// The number of bands in [`FeatureWindow::fit_range`]
    pub fn fit_len(&self) -> usize {
        self.high.index - self.low.index + 1
    }
}

/// The index of the largest value in `values`, skipping NaN.
///
/// Ties resolve to the lowest index. Returns `None` if every value is NaN or
/// `values` is empty.
pub fn argmax<T: Float>(values: &[T]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, T)>, (i, v)| match best {
            Some((_, b)) if !(*v > b) => best,
            _ => Some((i, *v)),
        })
        .map(|(i, _)| i)
}

/// The index of the smallest value in `values`, skipping NaN.
///
/// Ties resolve to the lowest index. Returns `None` if every value is NaN or
/// `values` is empty.
pub fn argmin<T: Float>(values: &[T]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, T)>, (i, v)| match best {
            Some((_, b)) if !(*v < b) => best,
            _ => Some((i, *v)),
        })
        .map(|(i, _)| i)
}
