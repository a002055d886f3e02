//! Quality evaluation of checker output.
//!
//! The checker role answers in free text. Two markers are recognized:
//! - an overall score line such as `Overall Quality Score: 8.5/10`
//! - the severity words `critical`, `major` and `minor`
//!
//! Everything else in the text is opaque. A missing score is not an error:
//! the evaluation falls back to [`DEFAULT_QUALITY_SCORE`] and is flagged as
//! low confidence.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::warn;

/// Score used when no score marker can be found.
pub const DEFAULT_QUALITY_SCORE: f64 = 7.0;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 10.0;

// Matches "Quality Score: 8.5", "Overall Quality Score: 8/10",
// "**Overall Quality Score:** 9.0 / 10" and similar.
static SCORE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)quality\s+score\s*[*_]*\s*:\s*[*_]*\s*(-?\d+(?:\.\d+)?)\s*(?:/\s*10)?")
        .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Critical,
    Major,
    Minor,
}

impl IssueSeverity {
    pub const ALL: [IssueSeverity; 3] = [Self::Critical, Self::Major, Self::Minor];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Major => "major",
            Self::Minor => "minor",
        }
    }
}

impl std::fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse issue entry. The count is always 1: the evaluator only detects
/// whether a severity is mentioned, not how many issues carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: IssueSeverity,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Overall score in `[0, 10]`.
    pub score: f64,
    pub issues: Vec<Issue>,
    /// False when the score is the default because no marker was found.
    pub confident: bool,
}

impl Evaluation {
    pub fn has_severity(&self, severity: IssueSeverity) -> bool {
        self.issues.iter().any(|i| i.severity == severity)
    }
}

/// Turns checker output into a score and issue list.
///
/// The pipeline only sees this trait, so a stricter structured-output
/// evaluator can replace the free-text one without touching the phases.
pub trait QualityEvaluator: Send + Sync {
    fn evaluate(&self, text: &str) -> Evaluation;
}

/// Evaluator for free-text checker reports.
#[derive(Debug, Clone, Default)]
pub struct FreeTextEvaluator;

impl FreeTextEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl QualityEvaluator for FreeTextEvaluator {
    fn evaluate(&self, text: &str) -> Evaluation {
        let parsed = text
            .lines()
            .find_map(|line| SCORE_REGEX.captures(line))
            .and_then(|cap| cap.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .filter(|score| score.is_finite());

        let (score, confident) = match parsed {
            Some(score) => (score.clamp(MIN_SCORE, MAX_SCORE), true),
            None => {
                warn!(
                    default = DEFAULT_QUALITY_SCORE,
                    "no quality score marker in checker output, using default"
                );
                (DEFAULT_QUALITY_SCORE, false)
            }
        };

        let lowered = text.to_lowercase();
        let issues = IssueSeverity::ALL
            .into_iter()
            .filter(|sev| lowered.contains(sev.as_str()))
            .map(|severity| Issue { severity, count: 1 })
            .collect();

        Evaluation {
            score,
            issues,
            confident,
        }
    }
}

/// Convenience function to evaluate text without constructing an evaluator.
pub fn parse(text: &str) -> Evaluation {
    FreeTextEvaluator.evaluate(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_overall_score_with_denominator() {
        let eval = parse("Overall Quality Score: 8.5/10");
        assert_eq!(eval.score, 8.5);
        assert!(eval.confident);
    }

    #[test]
    fn test_parses_plain_quality_score_line() {
        let eval = parse("Summary\nQuality Score: 6\nReady for Implementation: No");
        assert_eq!(eval.score, 6.0);
    }

    #[test]
    fn test_parses_markdown_emphasis_around_score() {
        let eval = parse("7. OVERALL ASSESSMENT\n- **Overall Quality Score:** 9.2 / 10");
        assert_eq!(eval.score, 9.2);
    }

    #[test]
    fn test_first_marker_wins() {
        let eval = parse("Quality Score: 4\nOverall Quality Score: 9");
        assert_eq!(eval.score, 4.0);
    }

    #[test]
    fn test_section_scores_are_not_overall_scores() {
        let eval = parse("Completeness Score: 3/10\nClarity Score: 2/10");
        assert_eq!(eval.score, DEFAULT_QUALITY_SCORE);
        assert!(!eval.confident);
    }

    #[test]
    fn test_out_of_range_scores_are_clamped() {
        assert_eq!(parse("Overall Quality Score: 14/10").score, 10.0);
        assert_eq!(parse("Overall Quality Score: -3").score, 0.0);
    }

    #[test]
    fn test_empty_text_yields_default_without_panic() {
        let eval = parse("");
        assert_eq!(eval.score, DEFAULT_QUALITY_SCORE);
        assert!(!eval.confident);
        assert!(eval.issues.is_empty());
    }

    #[test]
    fn test_severity_words_yield_one_entry_each() {
        let eval = parse(
            "Severity: Critical - missing auth\nSeverity: critical - no backups\nSeverity: MINOR - typo",
        );
        assert_eq!(
            eval.issues,
            vec![
                Issue {
                    severity: IssueSeverity::Critical,
                    count: 1
                },
                Issue {
                    severity: IssueSeverity::Minor,
                    count: 1
                },
            ]
        );
        assert!(!eval.has_severity(IssueSeverity::Major));
    }

    #[test]
    fn test_evaluator_trait_object() {
        let evaluator: Box<dyn QualityEvaluator> = Box::new(FreeTextEvaluator::new());
        let eval = evaluator.evaluate("Overall Quality Score: 8/10\nMajor Issues Count: 1");
        assert_eq!(eval.score, 8.0);
        assert!(eval.has_severity(IssueSeverity::Major));
    }
}
