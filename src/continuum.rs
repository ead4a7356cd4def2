//! Continuum estimation and removal.
//!
//! The continuum is a piecewise-linear curve through a handful of anchor bands,
//! continued linearly past the first and last anchors. Dividing a spectrum by
//! its continuum leaves absorption features as dips below 1.0.
//!
//! Two methods are provided. [`ContinuumMethod::TiePoints`] anchors the curve
//! at caller-chosen wavelengths. [`ContinuumMethod::DoubleLine`] makes two
//! passes: a rough continuum through the bands nearest 700, 1550 and 2600 nm,
//! then a refined continuum through the bands where the rough continuum-removed
//! spectrum peaks within 650-1000, 1350-1600 and 2000-2600 nm, taking the
//! original spectrum's values at those bands.
use std::ops::Range;

use log::trace;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::{InterpolationError, PiecewiseLinear};
use crate::search::{argmax, nearest_wavelength};

/// The rough continuum anchor wavelengths of the double-line method, in nm
pub const ROUGH_ANCHORS: [f64; 3] = [700.0, 1550.0, 2600.0];

/// The wavelength ranges, in nm, searched for refined continuum anchors by the
/// double-line method
pub const REFINEMENT_RANGES: [(f64, f64); 3] = [(650.0, 1000.0), (1350.0, 1600.0), (2000.0, 2600.0)];

/// Continuum values at or below this magnitude are treated as zero
pub const NEAR_ZERO_CONTINUUM: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContinuumError {
    #[error("A continuum requires at least two distinct anchor bands, found {0}")]
    InsufficientAnchors(usize),
    #[error("Expected a spectrum of {expected} bands, received {received}")]
    LengthMismatch { expected: usize, received: usize },
    #[error("Failed to interpolate the continuum: {0}")]
    Interpolation(#[from] InterpolationError),
}

/// How the continuum of a spectrum is estimated
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ContinuumMethod {
    /// The two pass rough-then-refined continuum
    #[default]
    DoubleLine,
    /// A single continuum through the bands nearest each of these wavelengths
    TiePoints(Vec<f64>),
}

impl ContinuumMethod {
    /// Resolve this method's anchor wavelengths against a wavelength axis.
    ///
    /// The resulting plan depends only on the wavelengths, so it can be built
    /// once and reused for every spectrum sharing that axis.
    pub fn plan(&self, wavelengths: &[f64]) -> Result<ContinuumPlan, ContinuumError> {
        let (anchors, refinement) = match self {
            ContinuumMethod::DoubleLine => {
                let anchors = snap_anchors(wavelengths, &ROUGH_ANCHORS);
                let ranges = REFINEMENT_RANGES
                    .iter()
                    .map(|(low, high)| {
                        let lo = nearest_wavelength(wavelengths, *low).map_or(0, |m| m.index);
                        let hi = nearest_wavelength(wavelengths, *high).map_or(0, |m| m.index);
                        lo..hi.max(lo)
                    })
                    .collect();
                (anchors, Some(ranges))
            }
            ContinuumMethod::TiePoints(tie_points) => (snap_anchors(wavelengths, tie_points), None),
        };
        if anchors.len() < 2 {
            return Err(ContinuumError::InsufficientAnchors(anchors.len()));
        }
        let plan = ContinuumPlan {
            wavelengths: wavelengths.to_vec(),
            anchors,
            refinement,
        };
        // Refinement anchors collapse most when every search lands on the start
        // of its range, which is what a flat spectrum produces.
        let worst_case = plan.refine(&vec![0.0; wavelengths.len()]);
        if worst_case.len() < 2 {
            return Err(ContinuumError::InsufficientAnchors(worst_case.len()));
        }
        Ok(plan)
    }
}

fn snap_anchors(wavelengths: &[f64], targets: &[f64]) -> Vec<usize> {
    let mut anchors: Vec<usize> = targets
        .iter()
        .filter_map(|t| nearest_wavelength(wavelengths, *t))
        .map(|m| m.index)
        .collect();
    anchors.sort_unstable();
    anchors.dedup();
    anchors
}

/// A continuum method resolved against one wavelength axis
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuumPlan {
    wavelengths: Vec<f64>,
    anchors: Vec<usize>,
    refinement: Option<Vec<Range<usize>>>,
}

/// A continuum-removed spectrum together with the continuum it was divided by
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContinuumRemoved {
    pub removed: Vec<f64>,
    pub continuum: Vec<f64>,
    /// The bands the final continuum passes through
    pub anchors: Vec<usize>,
}

impl ContinuumPlan {
    pub fn len(&self) -> usize {
        self.wavelengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelengths.is_empty()
    }

    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    /// The first, or only, set of anchor bands
    pub fn initial_anchors(&self) -> &[usize] {
        &self.anchors
    }

    /// The band ranges searched for refined anchors, if this is a two pass plan
    pub fn refinement_ranges(&self) -> Option<&[Range<usize>]> {
        self.refinement.as_deref()
    }

    fn refine(&self, rough_removed: &[f64]) -> Vec<usize> {
        let mut anchors: Vec<usize> = match &self.refinement {
            Some(ranges) => ranges
                .iter()
                .map(|r| argmax(&rough_removed[r.clone()]).map_or(r.start, |i| i + r.start))
                .collect(),
            None => self.anchors.clone(),
        };
        anchors.sort_unstable();
        anchors.dedup();
        anchors
    }

    fn fit_continuum(
        &self,
        spectrum: &[f64],
        anchors: &[usize],
        continuum: &mut [f64],
    ) -> Result<(), ContinuumError> {
        if anchors.len() < 2 {
            return Err(ContinuumError::InsufficientAnchors(anchors.len()));
        }
        let curve = PiecewiseLinear::new(
            anchors.iter().map(|i| self.wavelengths[*i]).collect(),
            anchors.iter().map(|i| spectrum[*i]).collect(),
        )?;
        curve.eval_into(&self.wavelengths, continuum);
        Ok(())
    }

    /// Remove the continuum of `spectrum`, writing the normalized spectrum to
    /// `removed` and the continuum to `continuum`. Returns the anchor bands of
    /// the final continuum.
    pub fn remove_into(
        &self,
        spectrum: &[f64],
        removed: &mut [f64],
        continuum: &mut [f64],
    ) -> Result<Vec<usize>, ContinuumError> {
        let n = self.len();
        for received in [spectrum.len(), removed.len(), continuum.len()] {
            if received != n {
                return Err(ContinuumError::LengthMismatch {
                    expected: n,
                    received,
                });
            }
        }

        self.fit_continuum(spectrum, &self.anchors, continuum)?;
        normalize(spectrum, continuum, removed);
        if self.refinement.is_none() {
            return Ok(self.anchors.clone());
        }

        let anchors = self.refine(removed);
        trace!("Refined continuum anchors {:?} to {:?}", self.anchors, anchors);
        self.fit_continuum(spectrum, &anchors, continuum)?;
        normalize(spectrum, continuum, removed);
        Ok(anchors)
    }

    pub fn remove(&self, spectrum: &[f64]) -> Result<ContinuumRemoved, ContinuumError> {
        let mut removed = vec![0.0; spectrum.len()];
        let mut continuum = vec![0.0; spectrum.len()];
        let anchors = self.remove_into(spectrum, &mut removed, &mut continuum)?;
        Ok(ContinuumRemoved {
            removed,
            continuum,
            anchors,
        })
    }
}

/// Divide `spectrum` by `continuum`. Bands where the continuum is NaN or
/// effectively zero are NaN.
fn normalize(spectrum: &[f64], continuum: &[f64], out: &mut [f64]) {
    out.iter_mut()
        .zip(spectrum.iter().zip(continuum.iter()))
        .for_each(|(o, (s, c))| {
            *o = if c.is_nan() || c.abs() <= NEAR_ZERO_CONTINUUM {
                f64::NAN
            } else {
                s / c
            };
        });
}

/// Remove the continuum of `spectrum` with the double-line method
pub fn double_line(spectrum: &[f64], wavelengths: &[f64]) -> Result<ContinuumRemoved, ContinuumError> {
    ContinuumMethod::DoubleLine.plan(wavelengths)?.remove(spectrum)
}

/// Remove a continuum anchored at the bands nearest each of `tie_points`
pub fn tie_point(
    spectrum: &[f64],
    wavelengths: &[f64],
    tie_points: &[f64],
) -> Result<ContinuumRemoved, ContinuumError> {
    ContinuumMethod::TiePoints(tie_points.to_vec())
        .plan(wavelengths)?
        .remove(spectrum)
}
