use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::risk::{RiskSignal, RiskWeights};
use crate::window;

pub const DEFAULT_WINDOWS: [u32; 4] = [30, 90, 180, 365];

/// Longest accepted window, roughly a century.
pub const MAX_WINDOW_DAYS: u32 = 36_500;

/// Pipeline settings as written in a TOML file. Every field has a default, so
/// an empty file (or no file at all) yields the stock configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub windows: Vec<u32>,
    pub detectors: DetectorConfig,
    pub scoring: ScoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
    pub contamination: f64,
    pub n_neighbors: usize,
    pub n_trees: usize,
    pub max_samples: usize,
    pub seed: u64,
    pub z_threshold: f64,
    /// Columns fed to the density and isolation detectors. Defaults to every
    /// numeric panel column.
    pub feature_columns: Option<Vec<String>>,
    /// Columns tested one by one by the statistical detector.
    pub zscore_columns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScoringConfig {
    pub trend_window: u32,
    pub weights: BTreeMap<String, f64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            windows: DEFAULT_WINDOWS.to_vec(),
            detectors: DetectorConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            contamination: 0.02,
            n_neighbors: 20,
            n_trees: 400,
            max_samples: 256,
            seed: 42,
            z_threshold: 3.0,
            feature_columns: None,
            zscore_columns: None,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            trend_window: 90,
            weights: RiskSignal::ALL
                .iter()
                .map(|signal| (signal.key().to_string(), signal.default_weight()))
                .collect(),
        }
    }
}

/// Detector hyperparameters after validation, with column lists resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorParams {
    pub contamination: f64,
    pub n_neighbors: usize,
    pub n_trees: usize,
    pub max_samples: usize,
    pub seed: u64,
    pub z_threshold: f64,
    pub feature_columns: Vec<String>,
    pub zscore_columns: Vec<String>,
}

/// Configuration that passed [`PipelineConfig::validate`]. The pipeline only
/// accepts this type.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    pub windows: Vec<u32>,
    pub detectors: DetectorParams,
    pub trend_window: u32,
    pub weights: RiskWeights,
}

impl PipelineConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<ValidatedConfig> {
        validate_windows(&self.windows)?;

        let d = &self.detectors;
        if !(d.contamination > 0.0 && d.contamination <= 0.5) {
            return Err(PipelineError::InvalidConfig(format!(
                "contamination must be in (0, 0.5], got {}",
                d.contamination
            )));
        }
        if d.n_neighbors == 0 {
            return Err(invalid("n_neighbors must be at least 1"));
        }
        if d.n_trees == 0 {
            return Err(invalid("n_trees must be at least 1"));
        }
        if d.max_samples == 0 {
            return Err(invalid("max_samples must be at least 1"));
        }
        if !(d.z_threshold.is_finite() && d.z_threshold > 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "z_threshold must be a positive number, got {}",
                d.z_threshold
            )));
        }

        let trend_window = self.scoring.trend_window;
        if !window::trend_pairs(&self.windows).contains(&trend_window) {
            return Err(PipelineError::InvalidConfig(format!(
                "trend window {trend_window}d needs both {trend_window}d and {}d in the window set",
                trend_window.saturating_mul(2)
            )));
        }

        let weights = RiskWeights::from_map(&self.scoring.weights)?;

        let known_columns = window::feature_column_names(&self.windows);
        let feature_columns = resolve_columns(
            d.feature_columns.as_ref(),
            || known_columns.clone(),
            &known_columns,
            "feature_columns",
        )?;
        let zscore_columns = resolve_columns(
            d.zscore_columns.as_ref(),
            || window::default_zscore_columns(&self.windows),
            &known_columns,
            "zscore_columns",
        )?;

        Ok(ValidatedConfig {
            windows: self.windows.clone(),
            detectors: DetectorParams {
                contamination: d.contamination,
                n_neighbors: d.n_neighbors,
                n_trees: d.n_trees,
                max_samples: d.max_samples,
                seed: d.seed,
                z_threshold: d.z_threshold,
                feature_columns,
                zscore_columns,
            },
            trend_window,
            weights,
        })
    }
}

fn validate_windows(windows: &[u32]) -> Result<()> {
    if windows.is_empty() {
        return Err(invalid("at least one window length is required"));
    }
    let mut seen = HashSet::new();
    for &w in windows {
        if w == 0 {
            return Err(invalid("window lengths must be positive"));
        }
        if w > MAX_WINDOW_DAYS {
            return Err(PipelineError::InvalidConfig(format!(
                "window length {w}d exceeds the {MAX_WINDOW_DAYS}d maximum"
            )));
        }
        if !seen.insert(w) {
            return Err(PipelineError::InvalidConfig(format!(
                "window length {w}d listed twice"
            )));
        }
    }
    Ok(())
}

fn resolve_columns(
    configured: Option<&Vec<String>>,
    default: impl FnOnce() -> Vec<String>,
    known: &[String],
    field: &str,
) -> Result<Vec<String>> {
    let Some(columns) = configured else {
        return Ok(default());
    };
    if columns.is_empty() {
        return Err(PipelineError::InvalidConfig(format!(
            "{field} must name at least one column"
        )));
    }
    if let Some(unknown) = columns.iter().find(|c| !known.contains(c)) {
        return Err(PipelineError::InvalidConfig(format!(
            "{field} names `{unknown}`, which this window set does not produce"
        )));
    }
    Ok(columns.clone())
}

fn invalid(message: &str) -> PipelineError {
    PipelineError::InvalidConfig(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = PipelineConfig::default().validate().unwrap();
        assert_eq!(config.windows, vec![30, 90, 180, 365]);
        assert_eq!(config.trend_window, 90);
        assert_eq!(config.detectors.n_neighbors, 20);
        assert!(config
            .detectors
            .feature_columns
            .contains(&"claims_90d_vs_prev90d".to_string()));
        assert!(config
            .detectors
            .zscore_columns
            .contains(&"mean_zscore_allowed_365d".to_string()));
    }

    #[test]
    fn empty_toml_is_the_default() {
        let config = PipelineConfig::from_toml_str("").unwrap().validate().unwrap();
        assert_eq!(config, PipelineConfig::default().validate().unwrap());
    }

    #[test]
    fn toml_overrides_are_applied() {
        let raw = r#"
            windows = [30, 60, 90, 180]

            [detectors]
            contamination = 0.05
            zscore_columns = ["total_claims_30d"]

            [scoring]
            trend_window = 30
        "#;
        let config = PipelineConfig::from_toml_str(raw).unwrap().validate().unwrap();
        assert_eq!(config.trend_window, 30);
        assert_eq!(config.detectors.contamination, 0.05);
        assert_eq!(config.detectors.zscore_columns, vec!["total_claims_30d"]);
    }

    #[test]
    fn unknown_toml_keys_are_rejected() {
        let result = PipelineConfig::from_toml_str("windowz = [30]");
        assert!(matches!(result, Err(PipelineError::ConfigParse(_))));
    }

    #[test]
    fn trend_window_needs_its_doubling_partner() {
        let config = PipelineConfig {
            windows: vec![30, 90, 365],
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn duplicate_and_zero_windows_are_rejected() {
        for windows in [vec![], vec![0, 90, 180], vec![90, 90, 180]] {
            let config = PipelineConfig {
                windows,
                ..PipelineConfig::default()
            };
            assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));
        }
    }

    #[test]
    fn oversized_windows_are_rejected_before_any_computation() {
        let raw = r#"
            windows = [30, 200000000, 400000000]

            [scoring]
            trend_window = 200000000
        "#;
        let config = PipelineConfig::from_toml_str(raw).unwrap();
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));

        let config = PipelineConfig {
            windows: vec![90, 180, MAX_WINDOW_DAYS],
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_configured_columns_are_rejected() {
        let mut config = PipelineConfig::default();
        config.detectors.feature_columns = Some(vec!["total_claim_90d".to_string()]);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(ref m) if m.contains("total_claim_90d")));

        let mut config = PipelineConfig::default();
        config.detectors.zscore_columns = Some(vec!["total_claims_60d".to_string()]);
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn out_of_range_hyperparameters_are_rejected() {
        let mut config = PipelineConfig::default();
        config.detectors.contamination = 0.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.detectors.z_threshold = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.detectors.feature_columns = Some(vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_weights_fail_validation() {
        let mut config = PipelineConfig::default();
        config.scoring.weights.insert("isolation".to_string(), 0.9);
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidWeightConfig(_))
        ));
    }
}
