//! Configuration of the full outlier removal, smoothing and continuum removal
//! pipeline.
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::continuum::{ContinuumError, ContinuumMethod, ContinuumPlan};
use crate::outliers::OutlierRemover;
use crate::processor::ProcessingError;
use crate::smooth::{EdgeMode, MovingAverageSmoother};

/// The settings of every stage run by `run_pipeline`
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PipelineConfig {
    pub outliers: OutlierRemover,
    pub smoother: MovingAverageSmoother,
    pub continuum: ContinuumMethod,
}

impl PipelineConfig {
    pub fn new(
        outliers: OutlierRemover,
        smoother: MovingAverageSmoother,
        continuum: ContinuumMethod,
    ) -> Self {
        Self {
            outliers,
            smoother,
            continuum,
        }
    }

    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::new()
    }

    /// Check the settings that do not depend on the data
    pub fn validate(&self) -> Result<(), ProcessingError> {
        self.outliers.validate()?;
        self.smoother.effective_window()?;
        Ok(())
    }

    /// Check these settings against a wavelength axis and resolve its continuum
    /// plan, so that a configuration that cannot run fails before any spectrum
    /// is processed.
    ///
    /// The smoothed output must keep every band for the continuum to be removed
    /// from it, which rules out [`EdgeMode::CutEnds`].
    pub fn plan(&self, wavelengths: &[f64]) -> Result<ContinuumPlan, ProcessingError> {
        self.validate()?;
        let bands = wavelengths.len();
        let smoothed = self.smoother.output_len(bands)?;
        if smoothed != bands {
            return Err(ContinuumError::LengthMismatch {
                expected: bands,
                received: smoothed,
            }
            .into());
        }
        Ok(self.continuum.plan(wavelengths)?)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PipelineConfigBuilder {
    threshold: Option<f64>,
    window_size: Option<usize>,
    edge_mode: Option<EdgeMode>,
    extrapolation_order: Option<usize>,
    continuum: ContinuumMethod,
}

impl PipelineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The z-score above which a band is an outlier
    pub fn threshold(&mut self, threshold: f64) -> &mut Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn window_size(&mut self, window_size: usize) -> &mut Self {
        self.window_size = Some(window_size);
        self
    }

    pub fn edge_mode(&mut self, edge_mode: EdgeMode) -> &mut Self {
        self.edge_mode = Some(edge_mode);
        self
    }

    pub fn extrapolation_order(&mut self, extrapolation_order: usize) -> &mut Self {
        self.extrapolation_order = Some(extrapolation_order);
        self
    }

    pub fn continuum(&mut self, continuum: ContinuumMethod) -> &mut Self {
        self.continuum = continuum;
        self
    }

    /// Use a single continuum through these wavelengths instead of the
    /// double-line method
    pub fn tie_points(&mut self, tie_points: Vec<f64>) -> &mut Self {
        self.continuum = ContinuumMethod::TiePoints(tie_points);
        self
    }

    pub fn build(&self) -> PipelineConfig {
        let outlier_defaults = OutlierRemover::default();
        let smoother_defaults = MovingAverageSmoother::default();
        PipelineConfig {
            outliers: OutlierRemover::new(self.threshold.unwrap_or(outlier_defaults.threshold)),
            smoother: MovingAverageSmoother {
                window_size: self.window_size.unwrap_or(smoother_defaults.window_size),
                edge_mode: self.edge_mode.unwrap_or(smoother_defaults.edge_mode),
                extrapolation_order: self
                    .extrapolation_order
                    .unwrap_or(smoother_defaults.extrapolation_order),
            },
            continuum: self.continuum.clone(),
        }
    }
}

impl From<PipelineConfigBuilder> for PipelineConfig {
    fn from(value: PipelineConfigBuilder) -> Self {
        value.build()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::outliers::OutlierError;
    use crate::smooth::SmoothingError;

    #[test]
    fn test_builder() {
        let config = PipelineConfig::builder()
            .threshold(3.0)
            .window_size(7)
            .edge_mode(EdgeMode::Mirror)
            .tie_points(vec![1000.0, 2000.0])
            .build();
        assert_eq!(config.outliers.threshold, 3.0);
        assert_eq!(config.smoother.window_size, 7);
        assert_eq!(config.smoother.edge_mode, EdgeMode::Mirror);
        assert_eq!(config.smoother.extrapolation_order, 1);
        assert_eq!(
            config.continuum,
            ContinuumMethod::TiePoints(vec![1000.0, 2000.0])
        );
        assert!(config.validate().is_ok());

        let config: PipelineConfig = PipelineConfigBuilder::new().into();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_validate() {
        let config = PipelineConfig::builder().threshold(-2.0).build();
        assert_eq!(
            config.validate(),
            Err(ProcessingError::Outliers(OutlierError::InvalidThreshold(-2.0)))
        );
        let config = PipelineConfig::builder().window_size(0).build();
        assert_eq!(
            config.validate(),
            Err(ProcessingError::Smoothing(SmoothingError::WindowSizeZero))
        );
    }

    #[test]
    fn test_plan_rejects_unchainable_settings() {
        let wavelengths = crate::test_data::wavelengths();
        let plan = PipelineConfig::default().plan(&wavelengths).unwrap();
        assert_eq!(plan.len(), wavelengths.len());

        let config = PipelineConfig::builder().edge_mode(EdgeMode::CutEnds).build();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.plan(&wavelengths).unwrap_err(),
            ProcessingError::Continuum(ContinuumError::LengthMismatch {
                expected: 221,
                received: 217
            })
        );

        let config = PipelineConfig::builder().tie_points(vec![1000.0]).build();
        assert!(matches!(
            config.plan(&wavelengths),
            Err(ProcessingError::Continuum(ContinuumError::InsufficientAnchors(_)))
        ));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde() {
        let config = PipelineConfig::builder()
            .edge_mode(EdgeMode::FillEnds)
            .tie_points(vec![1000.0, 2000.0])
            .build();
        let text = serde_json::to_string(&config).unwrap();
        assert!(text.contains("\"fill_ends\""));
        assert!(text.contains("\"tie_points\""));
        let restored: PipelineConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(restored, config);
    }
}
