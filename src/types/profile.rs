//! Evaluation profiles: baselines, scoring bands, and message templates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::Severity;

/// Evaluation profile for a `(machine, material)` pair.
///
/// `machine_id` of `None` marks a material-default profile. At most one
/// active profile may exist per pair; the store enforces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub machine_id: Option<Uuid>,
    pub material_id: String,
    pub is_active: bool,
    pub baseline_learning: bool,
    pub baseline_ready: bool,
    pub created_at: DateTime<Utc>,
}

/// Finalized baseline statistics for one metric of one profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineStats {
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub p05: Option<f64>,
    pub p95: Option<f64>,
    pub sample_count: i64,
}

/// Scoring-band mode: absolute deviation or percent of baseline mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BandMode {
    Abs,
    Rel,
}

impl BandMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BandMode::Abs => "ABS",
            BandMode::Rel => "REL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ABS" => Some(BandMode::Abs),
            "REL" => Some(BandMode::Rel),
            _ => None,
        }
    }
}

/// Severity thresholds for one metric of one profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringBand {
    pub mode: BandMode,
    pub green_limit: Option<f64>,
    pub orange_limit: Option<f64>,
}

/// In-memory view of a profile with everything the evaluator needs,
/// loaded once per tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileContext {
    pub profile_id: Option<Uuid>,
    pub material_id: Option<String>,
    pub baseline_learning: bool,
    pub baseline_ready: bool,
    /// metric name -> finalized stats.
    pub baselines: BTreeMap<String, BaselineStats>,
    /// metric name -> scoring band.
    pub bands: BTreeMap<String, ScoringBand>,
    /// `"{metric}:{SEVERITY}"` -> operator-facing text.
    pub templates: BTreeMap<String, String>,
}

impl ProfileContext {
    pub fn template(&self, metric: &str, severity: Severity) -> Option<&str> {
        self.templates
            .get(&format!("{}:{}", metric, severity.label()))
            .map(String::as_str)
    }

    pub fn baseline_mean(&self, metric: &str) -> Option<f64> {
        self.baselines.get(metric).and_then(|b| b.mean)
    }

    pub fn baseline_std(&self, metric: &str) -> Option<f64> {
        self.baselines.get(metric).and_then(|b| b.std)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_mode_parse() {
        assert_eq!(BandMode::parse("abs"), Some(BandMode::Abs));
        assert_eq!(BandMode::parse("REL"), Some(BandMode::Rel));
        assert_eq!(BandMode::parse("zscore"), None);
    }

    #[test]
    fn template_lookup_by_metric_and_severity() {
        let mut ctx = ProfileContext::default();
        ctx.templates.insert(
            "Pressure_bar:ORANGE".into(),
            "Pressure drifting - check die".into(),
        );
        assert_eq!(
            ctx.template("Pressure_bar", Severity::Orange),
            Some("Pressure drifting - check die")
        );
        assert_eq!(ctx.template("Pressure_bar", Severity::Red), None);
    }
}
