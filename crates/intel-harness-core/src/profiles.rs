//! Analysis modes and their per-stage prompt profiles.
//!
//! Each [`AnalysisMode`] maps to one static [`ModeProfile`], selected once
//! per run. A profile holds one [`StageProfile`] per stage: the system
//! prompt, the instruction preamble, and the output budget.
//!
//! | Mode | Research | Analysis | Report | Typical duration |
//! |------|----------|----------|--------|------------------|
//! | `simple` | 400 words | 400 words | 500 words | 2–3 minutes |
//! | `deep` | 1200 words | 800 words | 1000 words | 5–8 minutes |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::HarnessError;
use crate::fingerprint::FocusArea;
use crate::models::StageName;

/// How thorough the pipeline should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    #[default]
    Simple,
    Deep,
}

impl AnalysisMode {
    pub const ALL: [AnalysisMode; 2] = [AnalysisMode::Simple, AnalysisMode::Deep];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Simple => "simple",
            AnalysisMode::Deep => "deep",
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisMode {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simple" => Ok(AnalysisMode::Simple),
            "deep" => Ok(AnalysisMode::Deep),
            _ => Err(HarnessError::InvalidRequest(format!(
                "invalid analysis mode '{}'; must be 'simple' or 'deep'",
                s.trim()
            ))),
        }
    }
}

/// Prompt configuration for one stage in one mode.
#[derive(Debug)]
pub struct StageProfile {
    pub stage: StageName,
    pub system_prompt: &'static str,
    pub instructions: &'static str,
    pub word_budget: u32,
    pub max_tokens: u32,
}

/// Everything that varies between analysis modes.
#[derive(Debug)]
pub struct ModeProfile {
    pub mode: AnalysisMode,
    pub label: &'static str,
    pub description: &'static str,
    pub typical_duration: &'static str,
    stages: [StageProfile; 3],
}

impl ModeProfile {
    pub fn stage(&self, stage: StageName) -> &StageProfile {
        match stage {
            StageName::Research => &self.stages[0],
            StageName::Analyze => &self.stages[1],
            StageName::Write => &self.stages[2],
        }
    }

    /// Workflow label stored on reports (`multi_agent_simple`, ...).
    pub fn workflow(&self) -> String {
        format!("multi_agent_{}", self.mode.as_str())
    }
}

/// Look up the profile for a mode.
pub fn profile(mode: AnalysisMode) -> &'static ModeProfile {
    match mode {
        AnalysisMode::Simple => &PROFILES[0],
        AnalysisMode::Deep => &PROFILES[1],
    }
}

/// Inputs a stage prompt can draw from.
#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    pub subject: &'a str,
    pub url: Option<&'a str>,
    pub focus: FocusArea,
    pub research: Option<&'a str>,
    pub analysis: Option<&'a str>,
}

impl StageProfile {
    /// Render the user prompt for this stage.
    pub fn render(&self, input: &PromptInput<'_>) -> String {
        let mut prompt = format!("{} for \"{}\".\n", self.instructions, input.subject);
        if let Some(url) = input.url.filter(|u| !u.is_empty()) {
            prompt.push_str(&format!("Website: {}\n", url));
        }
        if input.focus != FocusArea::All {
            prompt.push_str(&format!("Focus area: {}\n", input.focus));
        }
        if let Some(research) = input.research {
            prompt.push_str("\nRESEARCH FINDINGS:\n");
            prompt.push_str(research);
            prompt.push('\n');
        }
        if let Some(analysis) = input.analysis {
            prompt.push_str("\nSTRATEGIC ANALYSIS:\n");
            prompt.push_str(analysis);
            prompt.push('\n');
        }
        prompt.push_str(&format!("\nKeep the response under {} words.", self.word_budget));
        prompt
    }
}

const METRICS_FORMAT: &str = "Structure the response with these exact sections:\n\
## METRICS\n\
- Competitive Threat Level: [1-5]\n\
- Market Position Score: [1-10]\n\
- Innovation Score: [1-10]\n\
- Financial Strength: [1-10]\n\
- Brand Recognition: [1-10]\n\
## SWOT SCORES\n\
- Strengths: [1-10]\n\
- Weaknesses: [1-10]\n\
- Opportunities: [1-10]\n\
- Threats: [1-10]\n\
## ANALYSIS";

static PROFILES: [ModeProfile; 2] = [
    ModeProfile {
        mode: AnalysisMode::Simple,
        label: "Simple",
        description: "Quick and focused analysis",
        typical_duration: "2-3 minutes",
        stages: [
            StageProfile {
                stage: StageName::Research,
                system_prompt: "You are a researcher gathering essential competitive intelligence. \
                    Focus on company overview, recent major news or funding, basic pricing and key advantages.",
                instructions: "Perform quick competitive intelligence research",
                word_budget: 400,
                max_tokens: 2000,
            },
            StageProfile {
                stage: StageName::Analyze,
                system_prompt: METRICS_FORMAT,
                instructions: "Perform a quick strategic analysis with the top three SWOT items each",
                word_budget: 400,
                max_tokens: 2000,
            },
            StageProfile {
                stage: StageName::Write,
                system_prompt: "You are a writer producing concise competitive intelligence reports: \
                    executive summary, top three insights, three to five recommended actions.",
                instructions: "Create a concise competitive intelligence report",
                word_budget: 500,
                max_tokens: 2500,
            },
        ],
    },
    ModeProfile {
        mode: AnalysisMode::Deep,
        label: "Deep Think",
        description: "Comprehensive and detailed analysis",
        typical_duration: "5-8 minutes",
        stages: [
            StageProfile {
                stage: StageName::Research,
                system_prompt: "You are a researcher gathering comprehensive competitive intelligence. \
                    Cover company history, pricing strategy, leadership, market position, customer \
                    reception, funding and growth, with source URLs.",
                instructions: "Perform comprehensive competitive intelligence research",
                word_budget: 1200,
                max_tokens: 4000,
            },
            StageProfile {
                stage: StageName::Analyze,
                system_prompt: METRICS_FORMAT,
                instructions: "Perform a comprehensive strategic analysis including SWOT with scenarios, \
                    business model, positioning and threat assessment",
                word_budget: 800,
                max_tokens: 3000,
            },
            StageProfile {
                stage: StageName::Write,
                system_prompt: "You are a writer producing comprehensive competitive intelligence reports \
                    with implementation guidance, risk assessment and action items.",
                instructions: "Create a comprehensive competitive intelligence report",
                word_budget: 1000,
                max_tokens: 4000,
            },
        ],
    },
];
