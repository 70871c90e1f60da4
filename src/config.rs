//! Study configuration
//!
//! Loaded from TOML; every section falls back to its defaults when omitted.

use crate::assignment::AssignmentConfig;
use crate::hypothesis::{default_hypotheses, AnalysisConfig, HypothesisConfig};
use crate::metrics::BonusPolicy;
use crate::report::ReportConfig;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "STUDY_CONFIG_PATH";
pub const DATABASE_PATH_ENV: &str = "STUDY_DATABASE_PATH";
pub const OUTPUT_DIR_ENV: &str = "STUDY_OUTPUT_DIR";
pub const DEFAULT_CONFIG_PATH: &str = "study_config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyConfig {
    /// SQLite participant database
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub bonus: BonusPolicy,

    #[serde(default)]
    pub assignment: AssignmentConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Tested in order; an empty list runs no tests
    #[serde(default = "default_hypotheses")]
    pub hypotheses: Vec<HypothesisConfig>,

    #[serde(default)]
    pub report: ReportConfig,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("participants.db")
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            bonus: BonusPolicy::default(),
            assignment: AssignmentConfig::default(),
            analysis: AnalysisConfig::default(),
            hypotheses: default_hypotheses(),
            report: ReportConfig::default(),
        }
    }
}

impl StudyConfig {
    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `STUDY_CONFIG_PATH` (after reading `.env`), falling back to
    /// defaults, then apply path overrides from the environment
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = if Path::new(&path).exists() {
            Self::load(&path)?
        } else {
            tracing::debug!("Using default study config ({} not found)", path);
            Self::default()
        };

        if let Ok(db) = std::env::var(DATABASE_PATH_ENV) {
            config.database_path = PathBuf::from(db);
        }
        if let Ok(dir) = std::env::var(OUTPUT_DIR_ENV) {
            config.report.output_dir = PathBuf::from(dir);
        }
        Ok(config)
    }

    /// Save to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.analysis.alpha > 0.0 && self.analysis.alpha < 1.0) {
            bail!("analysis.alpha must be in (0, 1), got {}", self.analysis.alpha);
        }
        if !self.bonus.per_correct.is_finite() || self.bonus.per_correct < 0.0 {
            bail!(
                "bonus.per_correct must be a non-negative amount, got {}",
                self.bonus.per_correct
            );
        }
        if self.assignment.max_attempts == 0 {
            bail!("assignment.max_attempts must be at least 1");
        }

        let mut names = HashSet::new();
        for h in &self.hypotheses {
            if !names.insert(h.name.as_str()) {
                bail!("hypothesis {} is configured twice", h.name);
            }
            if h.treatment == h.control {
                bail!("hypothesis {} compares {} with itself", h.name, h.treatment);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Metric;
    use crate::hypothesis::SupportRule;
    use crate::models::Condition;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: StudyConfig = toml::from_str("").unwrap();
        assert_eq!(config, StudyConfig::default());
        assert_eq!(config.hypotheses.len(), 4);
        assert_eq!(config.bonus.per_correct, 0.02);
        assert_eq!(config.analysis.alpha, 0.05);
    }

    #[test]
    fn test_sections_override_defaults() {
        let config: StudyConfig = toml::from_str(
            r#"
database_path = "/tmp/study.db"

[bonus]
per_correct = 0.05

[analysis]
alpha = 0.01
support_rule = "any_difference"

[[hypotheses]]
name = "H5_usability"
metric = "usability_score"

[report]
output_dir = "out"
full_json = true
"#,
        )
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/study.db"));
        assert_eq!(config.bonus.per_correct, 0.05);
        assert_eq!(config.analysis.support_rule, SupportRule::AnyDifference);
        assert_eq!(config.hypotheses.len(), 1);
        assert_eq!(config.hypotheses[0].metric, Metric::UsabilityScore);
        assert_eq!(config.hypotheses[0].treatment, Condition::Adaptive);
        assert_eq!(config.report.output_dir, PathBuf::from("out"));
        assert!(config.report.full_json);
        assert_eq!(config.report.precision, 3);
        assert_eq!(config.assignment.max_attempts, 5);
        config.validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = StudyConfig::default();
        config.analysis.alpha = 1.5;
        assert!(config.validate().is_err());

        let mut config = StudyConfig::default();
        config.hypotheses[1].control = Condition::Adaptive;
        assert!(config.validate().is_err());

        let mut config = StudyConfig::default();
        config.hypotheses.push(config.hypotheses[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("study.toml");

        let mut config = StudyConfig::default();
        config.report.precision = 4;
        config.save(&path).unwrap();

        assert_eq!(StudyConfig::load(&path).unwrap(), config);
    }
}
