//! Remove isolated spikes from a spectrum.
//!
//! A band is an outlier when it lies more than `threshold` local standard
//! deviations from the local mean, as measured by a moving window spanning
//! about 10% of the spectrum. Outliers are replaced with the mean of their
//! immediate neighbors. This copes well with isolated spikes, less so with
//! broad or clustered ones.
use log::trace;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::{force_odd, round_to_odd};
use crate::smooth::{EdgeMode, MovingAverageSmoother, SmoothingError};

/// The default z-score above which a band is an outlier
pub const DEFAULT_THRESHOLD: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OutlierError {
    #[error("The z-score threshold must be a positive finite number, received {0}")]
    InvalidThreshold(f64),
    #[error("Expected an output buffer of {expected} bands, received {received}")]
    LengthMismatch { expected: usize, received: usize },
    #[error("Failed to estimate the local statistics: {0}")]
    Smoothing(#[from] SmoothingError),
}

/// A z-score outlier detector and replacer
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OutlierRemover {
    pub threshold: f64,
}

impl Default for OutlierRemover {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl OutlierRemover {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn validate(&self) -> Result<(), OutlierError> {
        if self.threshold.is_finite() && self.threshold > 0.0 {
            Ok(())
        } else {
            Err(OutlierError::InvalidThreshold(self.threshold))
        }
    }

    /// The moving window size used for a spectrum of `len` bands.
    ///
    /// Nominally 10% of the spectrum rounded to an odd number and at least 3.
    /// A centred window of `w` bands can never produce a z-score beyond
    /// `sqrt(w - 1)`, so the window is widened further until the threshold is
    /// reachable. Widening stops at the spectrum length, and a threshold out of
    /// reach of that window flags no bands.
    pub fn window_size(&self, len: usize) -> usize {
        let nominal = round_to_odd(len as f64 * 0.1).max(3) as usize;
        let cap = force_odd(len).max(nominal);
        let needed = (self.threshold * self.threshold).floor() + 2.0;
        let reachable = if needed.is_finite() && needed < cap as f64 {
            force_odd(needed as usize)
        } else {
            cap
        };
        if reachable > nominal {
            trace!(
                "Outlier window widened from {nominal} to {reachable} to reach a z-score of {}",
                self.threshold
            );
        }
        nominal.max(reachable)
    }

    fn smoother(&self, len: usize) -> MovingAverageSmoother {
        MovingAverageSmoother::new(self.window_size(len), EdgeMode::Extrapolate)
    }

    /// The z-score of every band of `spectrum` against its local window.
    ///
    /// Bands whose local standard deviation is zero have an undefined (NaN)
    /// z-score, and so are never considered outliers.
    pub fn zscores(&self, spectrum: &[f64]) -> Result<Vec<f64>, OutlierError> {
        self.validate()?;
        let stats = self.smoother(spectrum.len()).smooth(spectrum)?;
        Ok(spectrum
            .iter()
            .zip(stats.mean.iter().zip(stats.std.iter()))
            .map(|(v, (mu, sigma))| {
                if *sigma > 0.0 {
                    (v - mu) / sigma
                } else {
                    f64::NAN
                }
            })
            .collect())
    }

    /// Write `spectrum` into `out` with its outliers replaced, returning the
    /// number of bands replaced.
    ///
    /// A replaced band takes the mean of its immediate neighbors in the input.
    /// The first and last bands have only one neighbor, which is used alone.
    pub fn remove_into(&self, spectrum: &[f64], out: &mut [f64]) -> Result<usize, OutlierError> {
        let n = spectrum.len();
        if out.len() != n {
            return Err(OutlierError::LengthMismatch {
                expected: n,
                received: out.len(),
            });
        }
        let zscores = self.zscores(spectrum)?;
        out.copy_from_slice(spectrum);
        let mut replaced = 0;
        for (i, z) in zscores.iter().enumerate() {
            if !(z.abs() > self.threshold) {
                continue;
            }
            let neighbors = [i.checked_sub(1), (i + 1 < n).then_some(i + 1)];
            let (total, count) = neighbors
                .iter()
                .flatten()
                .fold((0.0, 0usize), |(total, count), j| (total + spectrum[*j], count + 1));
            if count > 0 {
                out[i] = total / count as f64;
                replaced += 1;
            }
        }
        if replaced > 0 {
            trace!("Replaced {replaced} outliers in {n} bands");
        }
        Ok(replaced)
    }

    /// Return a copy of `spectrum` with its outliers replaced
    pub fn remove(&self, spectrum: &[f64]) -> Result<Vec<f64>, OutlierError> {
        let mut out = vec![0.0; spectrum.len()];
        self.remove_into(spectrum, &mut out)?;
        Ok(out)
    }
}

/// Replace the outliers of `spectrum` whose absolute z-score exceeds `threshold`,
/// see [`OutlierRemover`]
pub fn remove_outliers(spectrum: &[f64], threshold: f64) -> Result<Vec<f64>, OutlierError> {
    OutlierRemover::new(threshold).remove(spectrum)
}
