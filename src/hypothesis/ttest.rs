//! Student's equal-variance two-sample t-test

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use statrs::statistics::Statistics;
use std::fmt;

/// Descriptives for one arm of a comparison
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub n: usize,
    pub mean: Option<f64>,
    /// Sample standard deviation (n - 1 denominator)
    pub sd: Option<f64>,
    /// Rows in this arm dropped because the metric was missing
    pub excluded: usize,
}

impl GroupSummary {
    pub fn from_values(values: &[f64], excluded: usize) -> Self {
        let n = values.len();
        let mean = if n == 0 { None } else { Some(values.iter().mean()) };
        let sd = if n < 2 { None } else { Some(values.iter().std_dev()) };
        Self {
            n,
            mean,
            sd,
            excluded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TTest {
    pub t: f64,
    pub df: f64,
    /// Two-tailed
    pub p_value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TTestError {
    /// Fewer than two observations in a group
    InsufficientData,
    /// Pooled variance is zero, the statistic is undefined
    ZeroVariance,
    Distribution(String),
}

impl fmt::Display for TTestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientData => write!(f, "insufficient data"),
            Self::ZeroVariance => write!(f, "zero variance"),
            Self::Distribution(e) => write!(f, "t distribution unavailable: {}", e),
        }
    }
}

impl std::error::Error for TTestError {}

/// Pooled-variance t-test of `a` against `b`; a positive t means `a` is larger.
pub fn student_t_test(a: &GroupSummary, b: &GroupSummary) -> Result<TTest, TTestError> {
    let (m1, s1, m2, s2) = match (a.mean, a.sd, b.mean, b.sd) {
        (Some(m1), Some(s1), Some(m2), Some(s2)) if a.n >= 2 && b.n >= 2 => (m1, s1, m2, s2),
        _ => return Err(TTestError::InsufficientData),
    };
    let n1 = a.n as f64;
    let n2 = b.n as f64;
    let df = n1 + n2 - 2.0;

    let pooled_var = ((n1 - 1.0) * s1 * s1 + (n2 - 1.0) * s2 * s2) / df;
    if pooled_var <= f64::EPSILON * f64::EPSILON {
        return Err(TTestError::ZeroVariance);
    }

    let t = (m1 - m2) / (pooled_var * (1.0 / n1 + 1.0 / n2)).sqrt();
    let dist =
        StudentsT::new(0.0, 1.0, df).map_err(|e| TTestError::Distribution(e.to_string()))?;
    let p_value = (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0);

    Ok(TTest { t, df, p_value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_summary_descriptives() {
        let g = GroupSummary::from_values(&[2.0, 4.0, 6.0], 1);
        assert_eq!(g.n, 3);
        assert_eq!(g.mean, Some(4.0));
        assert!((g.sd.unwrap() - 2.0).abs() < 1e-12);
        assert_eq!(g.excluded, 1);
    }

    #[test]
    fn test_single_observation_has_no_sd() {
        let g = GroupSummary::from_values(&[0.5], 0);
        assert_eq!(g.mean, Some(0.5));
        assert_eq!(g.sd, None);
    }

    #[test]
    fn test_critical_value_gives_five_percent() {
        // t(0.975, df = 10) = 2.228139
        let dist = StudentsT::new(0.0, 1.0, 10.0).unwrap();
        let p = 2.0 * (1.0 - dist.cdf(2.228139));
        assert!((p - 0.05).abs() < 1e-5);
    }
}
