//! Moving average smoothing with a per-band standard deviation estimate.
//!
//! The spectrum is optionally padded at both ends according to an [`EdgeMode`],
//! then a uniform window is slid over it to compute the local mean of the values
//! and the local mean of their squares, from which the local standard deviation
//! `sqrt(mean(x²) - mean(x)²)` follows.
use std::fmt::Display;
use std::str::FromStr;

use log::trace;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::{centered_window_sums, fit_line, force_odd};
use crate::polyfit::{DesignMatrix, PolyFitError};

/// The default moving average window size
pub const DEFAULT_WINDOW_SIZE: usize = 5;

/// How the ends of a spectrum are treated where the window would run off of
/// the data
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum EdgeMode {
    /// Fit a line to the outermost 10% of the spectrum on each side and extend
    /// it by one window's width before smoothing.
    #[default]
    Extrapolate,
    /// Reflect the spectrum about its first and last bands by one window's width
    /// before smoothing.
    Mirror,
    /// Smooth without padding, then replace the half-window at each end with
    /// the raw values and zero standard deviation.
    FillEnds,
    /// Smooth without padding and drop the half-window at each end, so the
    /// output is shorter than the input.
    CutEnds,
}

impl EdgeMode {
    pub const fn name(&self) -> &'static str {
        match self {
            EdgeMode::Extrapolate => "extrapolate",
            EdgeMode::Mirror => "mirror",
            EdgeMode::FillEnds => "fill_ends",
            EdgeMode::CutEnds => "cut_ends",
        }
    }
}

impl Display for EdgeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EdgeMode {
    type Err = SmoothingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extrapolate" => Ok(EdgeMode::Extrapolate),
            "mirror" => Ok(EdgeMode::Mirror),
            "fill_ends" => Ok(EdgeMode::FillEnds),
            "cut_ends" => Ok(EdgeMode::CutEnds),
            _ => Err(SmoothingError::UnknownEdgeMode(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SmoothingError {
    #[error("The window size must be positive")]
    WindowSizeZero,
    #[error("{0:?} is not a valid edge mode, expected one of extrapolate, mirror, fill_ends, cut_ends")]
    UnknownEdgeMode(String),
    #[error("A window of {window} is too long for {len} bands with the {mode} edge mode")]
    WindowLengthTooLong {
        window: usize,
        len: usize,
        mode: EdgeMode,
    },
    #[error("Expected output buffers of {expected} bands, received {received}")]
    LengthMismatch { expected: usize, received: usize },
    #[error("Cannot smooth an empty spectrum")]
    EmptySpectrum,
    #[error("Failed to extrapolate the spectrum edges: {0}")]
    Extrapolation(#[from] PolyFitError),
}

/// The local mean and standard deviation at every band of a smoothed spectrum
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MovingStatistics {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl MovingStatistics {
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }
}

/// A moving average smoother
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MovingAverageSmoother {
    /// The width of the moving window. Forced to be odd and at least 3.
    pub window_size: usize,
    pub edge_mode: EdgeMode,
    /// The order of the polynomial extended past each end under
    /// [`EdgeMode::Extrapolate`]
    pub extrapolation_order: usize,
}

impl Default for MovingAverageSmoother {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            edge_mode: EdgeMode::Extrapolate,
            extrapolation_order: 1,
        }
    }
}

impl MovingAverageSmoother {
    pub fn new(window_size: usize, edge_mode: EdgeMode) -> Self {
        Self {
            window_size,
            edge_mode,
            ..Default::default()
        }
    }

    /// The window size actually used, odd and at least 3
    pub fn effective_window(&self) -> Result<usize, SmoothingError> {
        if self.window_size == 0 {
            return Err(SmoothingError::WindowSizeZero);
        }
        let window = force_odd(self.window_size);
        if window != self.window_size {
            trace!(
                "Moving average window {} adjusted to {window}",
                self.window_size
            );
        }
        Ok(window)
    }

    /// Check that a spectrum of `len` bands can be smoothed and return the
    /// number of bands the smoothed spectrum will have.
    pub fn output_len(&self, len: usize) -> Result<usize, SmoothingError> {
        let window = self.effective_window()?;
        if len == 0 {
            return Err(SmoothingError::EmptySpectrum);
        }
        let minimum = match self.edge_mode {
            EdgeMode::Extrapolate => 1,
            EdgeMode::Mirror => window + 1,
            EdgeMode::FillEnds | EdgeMode::CutEnds => window,
        };
        if len < minimum {
            return Err(SmoothingError::WindowLengthTooLong {
                window,
                len,
                mode: self.edge_mode,
            });
        }
        Ok(match self.edge_mode {
            EdgeMode::CutEnds => len - 2 * (window / 2),
            _ => len,
        })
    }

    /// Smooth `spectrum`, writing the local means into `mean` and standard
    /// deviations into `std`, both of length [`MovingAverageSmoother::output_len`].
    pub fn smooth_into(
        &self,
        spectrum: &[f64],
        mean: &mut [f64],
        std: &mut [f64],
    ) -> Result<(), SmoothingError> {
        let n = spectrum.len();
        let out_len = self.output_len(n)?;
        let window = self.effective_window()?;
        let half = window / 2;
        for received in [mean.len(), std.len()] {
            if received != out_len {
                return Err(SmoothingError::LengthMismatch {
                    expected: out_len,
                    received,
                });
            }
        }

        match self.edge_mode {
            EdgeMode::Extrapolate | EdgeMode::Mirror => {
                let padded = match self.edge_mode {
                    EdgeMode::Extrapolate => self.pad_extrapolate(spectrum, window)?,
                    _ => pad_mirror(spectrum, window),
                };
                let (mu, sigma) = window_statistics(&padded, window);
                mean.copy_from_slice(&mu[window..window + n]);
                std.copy_from_slice(&sigma[window..window + n]);
            }
            EdgeMode::FillEnds => {
                let (mu, sigma) = window_statistics(spectrum, window);
                mean.copy_from_slice(&mu);
                std.copy_from_slice(&sigma);
                for i in (0..half).chain(n - half..n) {
                    mean[i] = spectrum[i];
                    std[i] = 0.0;
                }
            }
            EdgeMode::CutEnds => {
                let (mu, sigma) = window_statistics(spectrum, window);
                mean.copy_from_slice(&mu[half..n - half]);
                std.copy_from_slice(&sigma[half..n - half]);
            }
        }
        Ok(())
    }

    /// Smooth `spectrum`, returning the local mean and standard deviation
    pub fn smooth(&self, spectrum: &[f64]) -> Result<MovingStatistics, SmoothingError> {
        let out_len = self.output_len(spectrum.len())?;
        let mut mean = vec![0.0; out_len];
        let mut std = vec![0.0; out_len];
        self.smooth_into(spectrum, &mut mean, &mut std)?;
        Ok(MovingStatistics { mean, std })
    }

    /// Extend `spectrum` by `window` points on each side using a polynomial fit
    /// to the outermost 10% of bands (at least one) on that side.
    fn pad_extrapolate(&self, spectrum: &[f64], window: usize) -> Result<Vec<f64>, SmoothingError> {
        let n = spectrum.len();
        let edge = ((n as f64 * 0.1).round_ties_even() as usize).clamp(1, n);

        let left_x: Vec<f64> = (0..edge).map(|i| i as f64).collect();
        let left_q: Vec<f64> = (0..window).map(|i| i as f64 - window as f64).collect();
        let right_x: Vec<f64> = (n - edge..n).map(|i| i as f64).collect();
        let right_q: Vec<f64> = (n..n + window).map(|i| i as f64).collect();

        let left = extrapolate(&left_x, &spectrum[..edge], &left_q, self.extrapolation_order)?;
        let right = extrapolate(&right_x, &spectrum[n - edge..], &right_q, self.extrapolation_order)?;

        let mut padded = Vec::with_capacity(n + 2 * window);
        padded.extend(left);
        padded.extend_from_slice(spectrum);
        padded.extend(right);
        Ok(padded)
    }
}

fn extrapolate(x: &[f64], y: &[f64], query: &[f64], order: usize) -> Result<Vec<f64>, PolyFitError> {
    match order.min(x.len().saturating_sub(1)) {
        0 => {
            let mean = y.iter().sum::<f64>() / y.len() as f64;
            Ok(vec![mean; query.len()])
        }
        1 => Ok(fit_line(x, y, query)),
        order => {
            let design = DesignMatrix::new(x, order)?;
            Ok(design.coefficients(y)?.eval_many(query))
        }
    }
}

/// Reflect `window` bands about each end of `spectrum`, not repeating the end
/// bands themselves.
fn pad_mirror(spectrum: &[f64], window: usize) -> Vec<f64> {
    let n = spectrum.len();
    let mut padded = Vec::with_capacity(n + 2 * window);
    padded.extend(spectrum[1..=window].iter().rev());
    padded.extend_from_slice(spectrum);
    padded.extend(spectrum[n - 1 - window..n - 1].iter().rev());
    padded
}

/// The centered moving mean and standard deviation of `data`, where windows
/// that run past either end are zero padded.
fn window_statistics(data: &[f64], window: usize) -> (Vec<f64>, Vec<f64>) {
    let width = window as f64;
    let squares: Vec<f64> = data.iter().map(|v| v * v).collect();
    let sums = centered_window_sums(data, window);
    let square_sums = centered_window_sums(&squares, window);
    sums.into_iter()
        .zip(square_sums)
        .map(|(s, sq)| {
            let mu = s / width;
            let variance = sq / width - mu * mu;
            // Rounding can push a flat window's variance just below zero
            let variance = if variance < 0.0 { 0.0 } else { variance };
            (mu, variance.sqrt())
        })
        .unzip()
}

/// Smooth `spectrum` with a moving average of `window_size` bands, see
/// [`MovingAverageSmoother`]
pub fn moving_average(
    spectrum: &[f64],
    window_size: usize,
    edge_mode: EdgeMode,
) -> Result<MovingStatistics, SmoothingError> {
    MovingAverageSmoother::new(window_size, edge_mode).smooth(spectrum)
}
