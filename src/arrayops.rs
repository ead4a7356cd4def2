//! Small numerical primitives shared by every processing stage.
use num_traits::{Float, FromPrimitive};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Round `value` to the nearest odd integer.
///
/// The value is first rounded to the nearest integer, ties going to the even
/// neighbor. An even result is then pushed one step in the direction `value`
/// was rounded away from, or down by one if `value` was already that integer.
pub fn round_to_odd(value: f64) -> i64 {
    let rounded = value.round_ties_even();
    let r = rounded as i64;
    if r % 2 == 0 {
        let remainder = value - rounded;
        if remainder != 0.0 {
            r + remainder.signum() as i64
        } else {
            r - 1
        }
    } else {
        r
    }
}

/// Force a window size to be odd and at least 3, growing it if needed
pub fn force_odd(window_size: usize) -> usize {
    let w = window_size.max(3);
    if w % 2 == 0 {
        w + 1
    } else {
        w
    }
}

/// An ordinary least squares straight line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LineFit {
    /// Fit a line to the `(x, y)` pairs.
    ///
    /// When all `x` coincide (including the single point case) the slope is
    /// undetermined and the fit degenerates to the constant `mean(y)`.
    pub fn fit(x: &[f64], y: &[f64]) -> Self {
        let n = x.len().min(y.len());
        if n == 0 {
            return Self {
                slope: 0.0,
                intercept: f64::NAN,
            };
        }
        let nf = n as f64;
        let x_mean = x[..n].iter().sum::<f64>() / nf;
        let y_mean = y[..n].iter().sum::<f64>() / nf;
        let (sxy, sxx) = x[..n]
            .iter()
            .zip(y[..n].iter())
            .fold((0.0, 0.0), |(sxy, sxx), (xi, yi)| {
                let dx = xi - x_mean;
                (sxy + dx * (yi - y_mean), sxx + dx * dx)
            });
        if sxx == 0.0 {
            return Self {
                slope: 0.0,
                intercept: y_mean,
            };
        }
        let slope = sxy / sxx;
        Self {
            slope,
            intercept: y_mean - slope * x_mean,
        }
    }

    #[inline]
    pub fn eval(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Fit a line to `(x, y)` and evaluate it at each of `query`
pub fn fit_line(x: &[f64], y: &[f64], query: &[f64]) -> Vec<f64> {
    let line = LineFit::fit(x, y);
    query.iter().map(|q| line.eval(*q)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum InterpolationError {
    #[error("At least two anchor points are required, received {0}")]
    TooFewAnchors(usize),
    #[error("The anchor x and y arrays differ in length, {0} and {1}")]
    LengthMismatch(usize, usize),
    #[error("The anchor x values must be strictly increasing, violated at index {0}")]
    NotIncreasing(usize),
}

/// A continuous piecewise-linear curve through a set of anchor points.
///
/// Between anchors the curve follows the segment joining them. Outside the
/// anchors it continues linearly along the first or last segment rather than
/// clamping, so the curve is defined over the whole real line.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PiecewiseLinear {
    x: Vec<f64>,
    y: Vec<f64>,
    slopes: Vec<f64>,
}

impl PiecewiseLinear {
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self, InterpolationError> {
        if x.len() != y.len() {
            return Err(InterpolationError::LengthMismatch(x.len(), y.len()));
        }
        if x.len() < 2 {
            return Err(InterpolationError::TooFewAnchors(x.len()));
        }
        if let Some(i) = x.windows(2).position(|w| !(w[0] < w[1])) {
            return Err(InterpolationError::NotIncreasing(i + 1));
        }
        let slopes = x
            .windows(2)
            .zip(y.windows(2))
            .map(|(xs, ys)| (ys[1] - ys[0]) / (xs[1] - xs[0]))
            .collect();
        Ok(Self { x, y, slopes })
    }

    pub fn anchors(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.x.iter().copied().zip(self.y.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Evaluate the curve at `at`.
    ///
    /// Each segment is evaluated relative to its left anchor, except beyond the
    /// last anchor where the last segment is evaluated relative to the last
    /// anchor. This makes the curve reproduce every anchor value exactly.
    pub fn eval(&self, at: f64) -> f64 {
        let n = self.x.len();
        let last = n - 1;
        if at >= self.x[last] {
            return self.y[last] + self.slopes[last - 1] * (at - self.x[last]);
        }
        let segment = self
            .x
            .partition_point(|x| *x <= at)
            .saturating_sub(1)
            .min(last - 1);
        self.y[segment] + self.slopes[segment] * (at - self.x[segment])
    }

    /// Evaluate the curve at each point of `at`, writing into `out`
    pub fn eval_into(&self, at: &[f64], out: &mut [f64]) {
        at.iter()
            .zip(out.iter_mut())
            .for_each(|(x, o)| *o = self.eval(*x));
    }

    pub fn eval_many(&self, at: &[f64]) -> Vec<f64> {
        at.iter().map(|x| self.eval(*x)).collect()
    }
}

/// Piecewise-linear interpolation through `(x_points, y_points)` evaluated at
/// every value of `at`, extrapolating linearly beyond the anchors.
pub fn linear_interpolation(
    x_points: &[f64],
    y_points: &[f64],
    at: &[f64],
) -> Result<Vec<f64>, InterpolationError> {
    let curve = PiecewiseLinear::new(x_points.to_vec(), y_points.to_vec())?;
    Ok(curve.eval_many(at))
}

/// Compute the sum over a centered window of `window_size` values at every
/// position of `data`, treating values beyond either end as zero.
///
/// This is the full convolution of `data` with an all-ones kernel, trimmed to
/// the length of `data`. Each window is summed directly so that identical
/// inputs always produce identical sums.
pub fn centered_window_sums<T: Float>(data: &[T], window_size: usize) -> Vec<T> {
    let half = window_size / 2;
    let n = data.len();
    (0..n)
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(n);
            data[start..end].iter().fold(T::zero(), |acc, v| acc + *v)
        })
        .collect()
}

/// Build an evenly spaced axis of `count` values beginning at `start`
pub fn gridspace<T: Float + FromPrimitive>(start: T, step: T, count: usize) -> Vec<T> {
    (0..count)
        .map(|i| start + T::from_usize(i).map_or(T::nan(), |i| i * step))
        .collect()
}
