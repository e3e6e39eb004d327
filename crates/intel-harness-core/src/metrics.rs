//! Best-effort numeric metrics pulled out of the analysis text.
//!
//! The analyze stage is asked for a `## METRICS` and `## SWOT SCORES`
//! section with one `Label: value` line each. Models rarely follow the format
//! exactly, so extraction tolerates bullets, bold markers, square brackets
//! and `/10` suffixes. Anything missing or out of range is left as `None`;
//! extraction never fails a run.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Scores extracted from the strategic analysis.
///
/// `threat_level` is on a 1–5 scale; every other field is 1–10.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threat_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_position: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub innovation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub financial_strength: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_recognition: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strengths: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weaknesses: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opportunities: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threats: Option<f64>,
}

impl Metrics {
    pub fn is_empty(&self) -> bool {
        *self == Metrics::default()
    }
}

struct MetricPattern {
    regex: Regex,
    max: f64,
}

fn pattern(label: &str, max: f64) -> MetricPattern {
    // Line-anchored so "Threats" never matches "Competitive Threat Level".
    let source = format!(
        r"(?im)^[\s\-\*•]*{}[^:\n]*:[\s\*]*\[?\s*(\d+(?:\.\d+)?)",
        label
    );
    MetricPattern {
        regex: Regex::new(&source).unwrap_or_else(|e| panic!("bad metric pattern {label}: {e}")),
        max,
    }
}

static PATTERNS: LazyLock<[MetricPattern; 9]> = LazyLock::new(|| {
    [
        pattern(r"competitive\s+threat(?:\s+level)?", 5.0),
        pattern(r"market\s+position", 10.0),
        pattern(r"innovation", 10.0),
        pattern(r"financial\s+strength", 10.0),
        pattern(r"brand\s+recognition", 10.0),
        pattern(r"strengths", 10.0),
        pattern(r"weaknesses", 10.0),
        pattern(r"opportunities", 10.0),
        pattern(r"threats", 10.0),
    ]
});

fn find(text: &str, p: &MetricPattern) -> Option<f64> {
    let caps = p.regex.captures(text)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    (1.0..=p.max).contains(&value).then_some(value)
}

/// Extract whatever metrics the text contains.
pub fn extract_metrics(text: &str) -> Metrics {
    let p = &*PATTERNS;
    Metrics {
        threat_level: find(text, &p[0]),
        market_position: find(text, &p[1]),
        innovation: find(text, &p[2]),
        financial_strength: find(text, &p[3]),
        brand_recognition: find(text, &p[4]),
        strengths: find(text, &p[5]),
        weaknesses: find(text, &p[6]),
        opportunities: find(text, &p[7]),
        threats: find(text, &p[8]),
    }
}
