use crate::signals::{self, TextSignals};
use adkuu_core::{
    AutomationLevel, ContentStatus, CoreError, GeneratedContent, QualityThresholds,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateCheck {
    Spam,
    PromotionalLanguage,
    Length,
    Authenticity,
    Relevance,
}

impl GateCheck {
    pub const ALL: [GateCheck; 5] = [
        GateCheck::Spam,
        GateCheck::PromotionalLanguage,
        GateCheck::Length,
        GateCheck::Authenticity,
        GateCheck::Relevance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GateCheck::Spam => "spam",
            GateCheck::PromotionalLanguage => "promotional_language",
            GateCheck::Length => "length",
            GateCheck::Authenticity => "authenticity",
            GateCheck::Relevance => "relevance",
        }
    }
}

impl fmt::Display for GateCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Precomputed inputs to the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSignals {
    pub spam_score: f64,
    pub promotional_score: f64,
    pub word_count: usize,
    pub readability: f64,
    pub authenticity_score: f64,
    pub relevance_score: f64,
}

impl ContentSignals {
    pub fn from_text(text: &TextSignals, relevance_score: f64) -> Self {
        Self {
            spam_score: text.spam_score,
            promotional_score: text.promotional_score,
            word_count: text.word_count,
            readability: text.readability,
            authenticity_score: text.authenticity_score,
            relevance_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub check: GateCheck,
    pub passed: bool,
    pub signal: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub passed: bool,
    pub checks: Vec<CheckOutcome>,
    pub signals: BTreeMap<String, f64>,
}

impl GateResult {
    pub fn check(&self, check: GateCheck) -> Option<&CheckOutcome> {
        self.checks.iter().find(|outcome| outcome.check == check)
    }

    pub fn failed_checks(&self) -> Vec<GateCheck> {
        self.checks
            .iter()
            .filter(|outcome| !outcome.passed)
            .map(|outcome| outcome.check)
            .collect()
    }

    /// Share of checks that passed.
    pub fn quality_score(&self) -> f64 {
        if self.checks.is_empty() {
            return 0.0;
        }
        let passed = self.checks.iter().filter(|outcome| outcome.passed).count();
        passed as f64 / self.checks.len() as f64
    }

    /// The non-fatal error to report for a failed gate.
    pub fn advisory(&self) -> Option<CoreError> {
        if self.passed {
            return None;
        }
        Some(CoreError::GateCheckFailed {
            checks: self
                .failed_checks()
                .iter()
                .map(|check| check.as_str().to_string())
                .collect(),
        })
    }
}

/// Runs every check against `signals`. Never short-circuits: each failed check
/// is reported.
pub fn evaluate(signals: &ContentSignals, thresholds: &QualityThresholds) -> GateResult {
    let words = signals.word_count;
    let checks = vec![
        CheckOutcome {
            check: GateCheck::Spam,
            passed: signals.spam_score < thresholds.max_spam_score,
            signal: signals.spam_score,
        },
        CheckOutcome {
            check: GateCheck::PromotionalLanguage,
            passed: signals.promotional_score < thresholds.max_promotional_score,
            signal: signals.promotional_score,
        },
        CheckOutcome {
            check: GateCheck::Length,
            passed: (thresholds.min_words..=thresholds.max_words).contains(&words),
            signal: words as f64,
        },
        CheckOutcome {
            check: GateCheck::Authenticity,
            passed: signals.authenticity_score >= thresholds.min_authenticity,
            signal: signals.authenticity_score,
        },
        CheckOutcome {
            check: GateCheck::Relevance,
            passed: signals.relevance_score >= thresholds.min_relevance,
            signal: signals.relevance_score,
        },
    ];

    let mut signal_map: BTreeMap<String, f64> = checks
        .iter()
        .map(|outcome| (outcome.check.as_str().to_string(), outcome.signal))
        .collect();
    signal_map.insert("readability".to_string(), signals.readability);

    GateResult {
        passed: checks.iter().all(|outcome| outcome.passed),
        checks,
        signals: signal_map,
    }
}

/// Analyzes `content_text` and evaluates it. Always returns a result.
pub fn run_quality_gate(
    content_text: &str,
    relevance_score: f64,
    thresholds: &QualityThresholds,
) -> GateResult {
    let text = signals::analyze(content_text);
    let result = evaluate(&ContentSignals::from_text(&text, relevance_score), thresholds);
    debug!(
        "Quality gate {}: failed {:?}",
        if result.passed { "passed" } else { "failed" },
        result.failed_checks()
    );
    result
}

/// Records a gate result on `content` and advances its status.
///
/// Drafts move to pending review. Passing content is approved only when the
/// project's automation level allows it; otherwise it waits for a human with
/// the failed checks recorded. Returns the resulting status.
pub fn apply_gate(
    content: &mut GeneratedContent,
    result: &GateResult,
    automation_level: AutomationLevel,
) -> Result<ContentStatus, CoreError> {
    if content.status == ContentStatus::Draft {
        content.transition(ContentStatus::PendingReview)?;
    }
    if content.status != ContentStatus::PendingReview {
        return Err(CoreError::InvalidTransition {
            entity: "content".to_string(),
            from: content.status.as_str().to_string(),
            to: ContentStatus::PendingReview.as_str().to_string(),
        });
    }

    content.quality_score = Some(result.quality_score());
    content.authenticity_score = result.signals.get("authenticity").copied();
    content.relevance_score = result.signals.get("relevance").copied();
    content.gate_failures = result
        .failed_checks()
        .iter()
        .map(|check| check.as_str().to_string())
        .collect();

    if result.passed && automation_level.allows_auto_approval() {
        content.transition(ContentStatus::Approved)?;
        info!("Content {} auto-approved", content.id);
    }
    Ok(content.status)
}

/// One actionable hint per failed check.
pub fn suggest_improvements(result: &GateResult) -> Vec<String> {
    result
        .failed_checks()
        .into_iter()
        .map(|check| {
            let hint = match check {
                GateCheck::Spam => "Remove links, prices and all-caps words",
                GateCheck::PromotionalLanguage => {
                    "Drop calls to action; share experience instead of pitching"
                }
                GateCheck::Length => "Adjust the length to fit the subreddit's usual replies",
                GateCheck::Authenticity => {
                    "Write in a personal voice and answer the question directly"
                }
                GateCheck::Relevance => "Address the post's topic more closely",
            };
            hint.to_string()
        })
        .collect()
}

/// Gate bound to one project's thresholds.
#[derive(Debug, Clone, Default)]
pub struct QualityGate {
    thresholds: QualityThresholds,
}

impl QualityGate {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    pub fn check(&self, content_text: &str, relevance_score: f64) -> GateResult {
        run_quality_gate(content_text, relevance_score, &self.thresholds)
    }
}
