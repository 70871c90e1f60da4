//! Plain-text analysis summary

use super::{fmt_opt, ReportConfig, ReportError};
use crate::dataset::Dataset;
use crate::demographics::DemographicSummary;
use crate::hypothesis::{AnalysisConfig, GroupSummary, HypothesisResult};
use crate::models::{Condition, ParticipantStatus};
use std::collections::BTreeMap;
use std::fmt::{self, Write};

const RULE: usize = 60;

pub fn render_summary(
    dataset: &Dataset,
    demographics: &DemographicSummary,
    results: &[HypothesisResult],
    analysis: &AnalysisConfig,
    config: &ReportConfig,
) -> Result<String, ReportError> {
    let mut out = String::new();
    write_summary(&mut out, dataset, demographics, results, analysis, config)?;
    Ok(out)
}

/// Writes the summary into any text sink
pub fn write_summary<W: Write>(
    out: &mut W,
    dataset: &Dataset,
    demographics: &DemographicSummary,
    results: &[HypothesisResult],
    analysis: &AnalysisConfig,
    config: &ReportConfig,
) -> fmt::Result {
    let precision = config.precision;

    writeln!(out, "{}", "=".repeat(RULE))?;
    writeln!(out, "{}", config.title)?;
    writeln!(out, "{}", config.subtitle)?;
    writeln!(out, "{}", "=".repeat(RULE))?;
    writeln!(out)?;

    if !config.research_question.is_empty() {
        writeln!(out, "RESEARCH QUESTION:")?;
        for line in &config.research_question {
            writeln!(out, "{}", line)?;
        }
        writeln!(out)?;
    }

    writeln!(out, "PARTICIPANTS:")?;
    writeln!(out, "  Total: {}", dataset.len())?;
    let mut by_condition: BTreeMap<&str, usize> = BTreeMap::new();
    let mut completed = 0;
    for row in dataset.rows() {
        *by_condition.entry(row.condition_label()).or_insert(0) += 1;
        if row.status == ParticipantStatus::Completed {
            completed += 1;
        }
    }
    writeln!(out, "  Completed: {}", completed)?;
    for (label, count) in &by_condition {
        writeln!(out, "    - {}: {}", label, count)?;
    }
    writeln!(out)?;

    writeln!(out, "DEMOGRAPHICS:")?;
    match &demographics.age {
        Some(age) => {
            let sd = age
                .sd
                .map(|s| format!("{:.2}", s))
                .unwrap_or_else(|| "n/a".to_string());
            writeln!(
                out,
                "  Age: M = {:.2}, SD = {}, Range = {:.0} - {:.0}, N = {}",
                age.mean, sd, age.min, age.max, age.n
            )?;
        }
        None => writeln!(out, "  Age: no valid responses")?,
    }
    write_counts(out, "Gender Distribution", &demographics.gender)?;
    write_counts(out, "Platform Experience", &demographics.platform_experience)?;
    write_counts(out, "Robot Experience", &demographics.robot_experience)?;
    writeln!(out)?;

    let report = &dataset.parse_report;
    writeln!(out, "DATA QUALITY:")?;
    writeln!(out, "  Log entries: {}", report.total)?;
    writeln!(out, "  Parsed: {}", report.parsed)?;
    writeln!(out, "  Repaired quoting: {}", report.repaired)?;
    writeln!(out, "  Skipped: {}", report.skipped_count())?;
    writeln!(out, "  Out-of-order trials: {}", report.out_of_order_trials)?;
    writeln!(out)?;

    writeln!(out, "HYPOTHESIS TESTING RESULTS:")?;
    writeln!(
        out,
        "  alpha = {}, rule = {}",
        analysis.alpha,
        analysis.support_rule.as_str()
    )?;
    writeln!(out, "{}", "-".repeat(RULE))?;
    for result in results {
        writeln!(out, "{} ({}):", result.name.to_uppercase(), result.metric)?;
        if let Some(description) = &result.description {
            writeln!(out, "  {}", description)?;
        }
        if let Some(test) = result.status.test() {
            writeln!(out, "  t({:.0}) = {:.3}", test.df, test.t)?;
            writeln!(out, "  p-value: {:.4}", test.p_value)?;
        }
        write_group(out, result.treatment, &result.treatment_group, precision)?;
        write_group(out, result.control, &result.control_group, precision)?;
        writeln!(out, "  Status: {}", result.status.label())?;
        writeln!(out)?;
    }
    Ok(())
}

fn write_counts<W: Write>(
    out: &mut W,
    title: &str,
    counts: &BTreeMap<String, usize>,
) -> fmt::Result {
    writeln!(out, "  {}:", title)?;
    for (key, count) in counts {
        writeln!(out, "    - {}: {}", key, count)?;
    }
    Ok(())
}

fn write_group<W: Write>(
    out: &mut W,
    condition: Condition,
    group: &GroupSummary,
    precision: usize,
) -> fmt::Result {
    let mean = fmt_opt(group.mean, precision);
    let sd = fmt_opt(group.sd, precision);
    writeln!(
        out,
        "  {} M = {}, SD = {}, N = {}, excluded = {}",
        capitalize(condition.as_str()),
        if mean.is_empty() { "n/a" } else { mean.as_str() },
        if sd.is_empty() { "n/a" } else { sd.as_str() },
        group.n,
        group.excluded
    )
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Metric;
    use crate::hypothesis::{HypothesisStatus, TTest};

    fn result(status: HypothesisStatus) -> HypothesisResult {
        HypothesisResult {
            name: "H1_performance".to_string(),
            description: None,
            metric: Metric::Accuracy,
            treatment: Condition::Adaptive,
            control: Condition::Static,
            treatment_group: GroupSummary {
                n: 20,
                mean: Some(0.82),
                sd: Some(0.1),
                excluded: 0,
            },
            control_group: GroupSummary {
                n: 1,
                mean: Some(0.71),
                sd: None,
                excluded: 2,
            },
            status,
        }
    }

    #[test]
    fn test_not_run_hypothesis_is_stated() {
        let text = render_summary(
            &Dataset::default(),
            &DemographicSummary::default(),
            &[result(HypothesisStatus::NotRun {
                reason: "insufficient data".to_string(),
            })],
            &AnalysisConfig::default(),
            &ReportConfig::default(),
        )
        .unwrap();

        assert!(text.contains("H1_PERFORMANCE (accuracy):"));
        assert!(text.contains("  Adaptive M = 0.820, SD = 0.100, N = 20, excluded = 0"));
        assert!(text.contains("  Static M = 0.710, SD = n/a, N = 1, excluded = 2"));
        assert!(text.contains("  Status: NOT RUN (insufficient data)"));
        assert!(!text.contains("p-value"));
        assert!(text.contains("  Age: no valid responses"));
    }

    #[test]
    fn test_supported_hypothesis_reports_statistic() {
        let text = render_summary(
            &Dataset::default(),
            &DemographicSummary::default(),
            &[result(HypothesisStatus::Supported(TTest {
                t: 3.1493,
                df: 38.0,
                p_value: 0.00316,
            }))],
            &AnalysisConfig::default(),
            &ReportConfig::default(),
        )
        .unwrap();

        assert!(text.contains("  t(38) = 3.149"));
        assert!(text.contains("  p-value: 0.0032"));
        assert!(text.contains("  Status: SUPPORTED"));
        assert!(text.starts_with(&"=".repeat(60)));
    }

    /// Accepts a fixed number of bytes, then fails
    struct Limited {
        left: usize,
    }

    impl fmt::Write for Limited {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            if s.len() > self.left {
                return Err(fmt::Error);
            }
            self.left -= s.len();
            Ok(())
        }
    }

    #[test]
    fn test_sink_failure_is_propagated() {
        let mut sink = Limited { left: 100 };
        let outcome = write_summary(
            &mut sink,
            &Dataset::default(),
            &DemographicSummary::default(),
            &[],
            &AnalysisConfig::default(),
            &ReportConfig::default(),
        );
        assert!(outcome.is_err());

        let mut roomy = Limited { left: usize::MAX };
        assert!(write_summary(
            &mut roomy,
            &Dataset::default(),
            &DemographicSummary::default(),
            &[],
            &AnalysisConfig::default(),
            &ReportConfig::default(),
        )
        .is_ok());
    }
}
