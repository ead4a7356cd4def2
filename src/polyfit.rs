//! Linear least squares polynomial fitting over a fixed abscissa.
//!
//! A [`DesignMatrix`] is built once from the wavelengths of a fit window and
//! then reused for every spectrum fit over that window, so that fitting a whole
//! cube only changes the right-hand side of the system from pixel to pixel.
//!
//! The Vandermonde matrix is built over wavelengths centred on the window
//! midpoint and scaled to `[-1, 1]`. This spans the same polynomial space as
//! raw wavelength powers, so the fitted curve is unchanged, but keeps the
//! system well conditioned at the magnitudes wavelengths take in nanometers.
use log::warn;
use nalgebra::{DMatrix, SVD};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The default polynomial order used to fit absorption features
pub const DEFAULT_FIT_ORDER: usize = 4;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolyFitError {
    #[error("The fit window contains no bands")]
    EmptyWindow,
    #[error("The search window ({0}, {1}) has its lower bound above its upper bound")]
    InvertedWindow(f64, f64),
    #[error("Expected {expected} values to fit, received {received}")]
    LengthMismatch { expected: usize, received: usize },
    #[error("Failed to solve for coefficients: {0}")]
    FailedToSolveCoefficients(&'static str),
}

/// A polynomial over a centred and scaled abscissa, `t = (x - center) / scale`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Polynomial {
    coefficients: Vec<f64>,
    center: f64,
    scale: f64,
}

impl Polynomial {
    pub fn new(coefficients: Vec<f64>, center: f64, scale: f64) -> Self {
        Self {
            coefficients,
            center,
            scale,
        }
    }

    pub fn order(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }

    /// The abscissa shift and scale the coefficients are expressed over
    pub fn basis(&self) -> (f64, f64) {
        (self.center, self.scale)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, f64> {
        self.coefficients.iter()
    }

    pub fn eval(&self, x: f64) -> f64 {
        let t = (x - self.center) / self.scale;
        self.coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, c| acc * t + *c)
    }

    pub fn eval_many(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|v| self.eval(*v)).collect()
    }
}

impl AsRef<[f64]> for Polynomial {
    fn as_ref(&self) -> &[f64] {
        &self.coefficients
    }
}

/// A reusable least squares system for fitting polynomials of one order over
/// one set of abscissa values.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    order: usize,
    center: f64,
    scale: f64,
    /// The `n x (order + 1)` Vandermonde matrix, increasing powers
    vandermonde: DMatrix<f64>,
    /// `(XᵗX)⁻¹Xᵗ`, absent when the system is rank deficient
    pseudo_inverse: Option<DMatrix<f64>>,
}

impl DesignMatrix {
    /// Build the design matrix of a polynomial of order `order` over `x`.
    ///
    /// A rank deficient system, e.g. fewer distinct `x` than coefficients, is
    /// not an error: every fit over it is NaN.
    pub fn new(x: &[f64], order: usize) -> Result<Self, PolyFitError> {
        if x.is_empty() {
            return Err(PolyFitError::EmptyWindow);
        }
        let (lo, hi) = x
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(*v), hi.max(*v))
            });
        let center = (lo + hi) / 2.0;
        let scale = if hi > lo { (hi - lo) / 2.0 } else { 1.0 };

        let nc = order + 1;
        let nr = x.len();
        let vandermonde = DMatrix::from_fn(nr, nc, |i, j| {
            let t = (x[i] - center) / scale;
            t.powi(j as i32)
        });

        let svd = SVD::new(vandermonde.clone(), true, true);
        let largest = svd.singular_values.max();
        let eps = largest * (nr.max(nc) as f64) * f64::EPSILON;
        let pseudo_inverse = if svd.rank(eps) < nc {
            warn!(
                "A polynomial of order {order} cannot be determined from {nr} points, fits will be NaN"
            );
            None
        } else {
            Some(
                svd.pseudo_inverse(eps)
                    .map_err(PolyFitError::FailedToSolveCoefficients)?,
            )
        };

        Ok(Self {
            order,
            center,
            scale,
            vandermonde,
            pseudo_inverse,
        })
    }

    /// The number of abscissa values
    pub fn len(&self) -> usize {
        self.vandermonde.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.vandermonde.nrows() == 0
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Whether fits over this system are determined
    pub fn is_full_rank(&self) -> bool {
        self.pseudo_inverse.is_some()
    }

    fn check_length(&self, y: &[f64]) -> Result<(), PolyFitError> {
        if y.len() != self.len() {
            Err(PolyFitError::LengthMismatch {
                expected: self.len(),
                received: y.len(),
            })
        } else {
            Ok(())
        }
    }

    fn solve(&self, y: &[f64]) -> Vec<f64> {
        let nc = self.order + 1;
        match &self.pseudo_inverse {
            Some(pinv) => (0..nc)
                .map(|k| (0..y.len()).map(|j| pinv[(k, j)] * y[j]).sum())
                .collect(),
            None => vec![f64::NAN; nc],
        }
    }

    /// Solve for the polynomial coefficients fit to `y`
    pub fn coefficients(&self, y: &[f64]) -> Result<Polynomial, PolyFitError> {
        self.check_length(y)?;
        Ok(Polynomial::new(self.solve(y), self.center, self.scale))
    }

    /// Fit `y` and write the fitted curve, `Xβ`, into `out`
    pub fn fit_into(&self, y: &[f64], out: &mut [f64]) -> Result<(), PolyFitError> {
        self.check_length(y)?;
        self.check_length(out)?;
        let beta = self.solve(y);
        out.iter_mut().enumerate().for_each(|(i, o)| {
            *o = beta
                .iter()
                .enumerate()
                .map(|(k, b)| self.vandermonde[(i, k)] * b)
                .sum();
        });
        Ok(())
    }

    /// Fit `y` and return the fitted curve, `Xβ`
    pub fn fit(&self, y: &[f64]) -> Result<Vec<f64>, PolyFitError> {
        let mut out = vec![0.0; self.len()];
        self.fit_into(y, &mut out)?;
        Ok(out)
    }
}

/// Fit a polynomial of order `order` to `(x, y)` and return the fitted curve
/// and its coefficients.
pub fn polyfit(x: &[f64], y: &[f64], order: usize) -> Result<(Vec<f64>, Polynomial), PolyFitError> {
    let design = DesignMatrix::new(x, order)?;
    let poly = design.coefficients(y)?;
    let fitted = design.fit(y)?;
    Ok((fitted, poly))
}
