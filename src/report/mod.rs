//! Report export
//!
//! Every output is rendered in memory from explicit inputs, then written to
//! temporary siblings and renamed into place only after all of them were
//! written. A failed run leaves no partial output behind.

mod json;
mod summary;
mod tables;

pub use json::render_full_json;
pub use summary::{render_summary, write_summary};
pub use tables::{render_dataset_csv, render_questionnaire_csv, render_trial_csv};

use crate::dataset::Dataset;
use crate::demographics::DemographicSummary;
use crate::hypothesis::{AnalysisConfig, HypothesisResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// =============================================================================
// CONFIGURATION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub output_dir: PathBuf,
    /// Decimal places for every float in the outputs
    pub precision: usize,
    pub title: String,
    pub subtitle: String,
    pub research_question: Vec<String>,
    pub dataset_file: String,
    pub summary_file: String,
    pub trial_file: String,
    pub questionnaire_file: String,
    pub json_file: String,
    /// Also write the trial and questionnaire streams as separate CSVs
    pub dual_stream: bool,
    /// Also write the full per-participant JSON reconstruction
    pub full_json: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("analysis_output"),
            precision: 3,
            title: "PSITURK EXPERIMENT ANALYSIS SUMMARY REPORT".to_string(),
            subtitle: "Robot Tutor Adaptiveness Study".to_string(),
            research_question: vec![
                "How does the adaptiveness of a robot tutor's feedback affect".to_string(),
                "learner engagement, trust, and performance during an educational task?"
                    .to_string(),
            ],
            dataset_file: "cleaned_full_data.csv".to_string(),
            summary_file: "ANALYSIS_SUMMARY_REPORT.txt".to_string(),
            trial_file: "trial_data.csv".to_string(),
            questionnaire_file: "questionnaire_data.csv".to_string(),
            json_file: "full_data.json".to_string(),
            dual_stream: true,
            full_json: false,
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug)]
pub enum ReportError {
    Io(std::io::Error),
    Csv(csv::Error),
    Json(serde_json::Error),
    /// The text sink refused a write
    Format(fmt::Error),
    Encoding(String),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Report IO error: {}", e),
            Self::Csv(e) => write!(f, "Report CSV error: {}", e),
            Self::Json(e) => write!(f, "Report JSON error: {}", e),
            Self::Format(e) => write!(f, "Report formatting error: {}", e),
            Self::Encoding(e) => write!(f, "Report encoding error: {}", e),
        }
    }
}

impl std::error::Error for ReportError {}

impl From<std::io::Error> for ReportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<csv::Error> for ReportError {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e)
    }
}

impl From<fmt::Error> for ReportError {
    fn from(e: fmt::Error) -> Self {
        Self::Format(e)
    }
}

impl From<serde_json::Error> for ReportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

// =============================================================================
// RENDERING
// =============================================================================

/// Output files rendered in memory, in write order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedReport {
    pub files: Vec<(String, String)>,
}

impl RenderedReport {
    pub fn get(&self, file_name: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|(name, _)| name == file_name)
            .map(|(_, content)| content.as_str())
    }

    /// Writes every file into `dir`. Nothing is renamed into place until all
    /// temporaries are written. On failure the temporaries are removed, and so
    /// is any file this call already renamed into place.
    pub fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>, ReportError> {
        fs::create_dir_all(dir)?;

        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(self.files.len());
        for (name, content) in &self.files {
            let path = dir.join(name);
            let temp_path = dir.join(format!(".{}.tmp", name));
            staged.push((temp_path.clone(), path));
            if let Err(e) = write_file(&temp_path, content) {
                discard(&staged);
                return Err(e);
            }
        }

        let mut written = Vec::with_capacity(staged.len());
        for (temp_path, path) in &staged {
            if let Err(e) = fs::rename(temp_path, path) {
                remove_all(&written, "Failed to remove partially exported report file");
                discard(&staged);
                return Err(e.into());
            }
            written.push(path.clone());
        }
        Ok(written)
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), ReportError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(content.as_bytes())?;
    writer.flush()?;
    Ok(())
}

fn discard(staged: &[(PathBuf, PathBuf)]) {
    let temps: Vec<PathBuf> = staged.iter().map(|(temp, _)| temp.clone()).collect();
    remove_all(&temps, "Failed to remove temporary report file");
}

fn remove_all(paths: &[PathBuf], message: &str) {
    for path in paths {
        if path.is_file() {
            if let Err(e) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "{}", message);
            }
        }
    }
}

/// Renders every configured output. Pure: identical inputs give identical bytes.
pub fn render_report(
    dataset: &Dataset,
    demographics: &DemographicSummary,
    results: &[HypothesisResult],
    analysis: &AnalysisConfig,
    config: &ReportConfig,
) -> Result<RenderedReport, ReportError> {
    let mut rendered = RenderedReport::default();

    rendered.files.push((
        config.dataset_file.clone(),
        render_dataset_csv(dataset, config.precision)?,
    ));
    rendered.files.push((
        config.summary_file.clone(),
        render_summary(dataset, demographics, results, analysis, config)?,
    ));
    if config.dual_stream {
        rendered.files.push((
            config.trial_file.clone(),
            render_trial_csv(dataset, config.precision)?,
        ));
        rendered.files.push((
            config.questionnaire_file.clone(),
            render_questionnaire_csv(dataset)?,
        ));
    }
    if config.full_json {
        rendered
            .files
            .push((config.json_file.clone(), render_full_json(dataset)?));
    }
    Ok(rendered)
}

/// Renders, then writes into `config.output_dir`
pub fn export_report(
    dataset: &Dataset,
    demographics: &DemographicSummary,
    results: &[HypothesisResult],
    analysis: &AnalysisConfig,
    config: &ReportConfig,
) -> Result<Vec<PathBuf>, ReportError> {
    let rendered = render_report(dataset, demographics, results, analysis, config)?;
    let written = rendered.write_to(&config.output_dir)?;
    info!(
        files = written.len(),
        dir = %config.output_dir.display(),
        "Report written"
    );
    Ok(written)
}

/// Fixed-precision float, empty when missing
pub(crate) fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => String::new(),
    }
}
