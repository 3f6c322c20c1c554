//! Failure classification for self-healing tests.
//!
//! A failed test's message is reduced to a [`Discrepancy`], turned into a
//! proposed replacement assertion, and scored. High-confidence proposals can
//! be applied automatically; everything else is queued for review.
//!
//! Classification is a pure function of the failure record and the
//! classifier settings.

pub mod extractors;

pub use extractors::{ActualPosition, Discrepancy, Extractor};

use crate::artifact::UnitSyntax;
use crate::config::HealingConfig;
use serde::{Deserialize, Serialize};

/// Default minimum confidence for applying a fix without review.
pub const DEFAULT_AUTO_APPLY_THRESHOLD: f64 = 0.75;

const MISSING_KEY_CONFIDENCE: f64 = 0.70;
const FALLBACK_CONFIDENCE: f64 = 0.60;
const UNCATEGORIZED_CONFIDENCE: f64 = 0.75;
const SERVER_ERROR_CONFIDENCE: f64 = 0.65;

/// A failed test as reported by the test runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub test_name: String,
    pub raw_message: String,
}

/// What to do with a proposed fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    AutoApply,
    NeedsReview,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AutoApply => write!(f, "auto_apply"),
            Self::NeedsReview => write!(f, "needs_review"),
        }
    }
}

/// The classifier's verdict for one failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingDecision {
    pub test_name: String,
    pub discrepancy: Discrepancy,
    pub extracted_actual: Option<String>,
    pub extracted_expected: Option<String>,
    pub proposed_fragment: String,
    pub confidence: f64,
    pub decision: Decision,
}

/// Decision counts over a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealingSummary {
    pub auto_apply: usize,
    pub needs_review: usize,
}

/// Broad class of an HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCategory {
    Success,
    ClientError,
    ServerError,
    Uncategorized,
}

impl StatusCategory {
    pub fn of(status: u16) -> Self {
        match status {
            200 | 201 | 202 | 204 => StatusCategory::Success,
            400 | 401 | 403 | 404 | 409 | 422 => StatusCategory::ClientError,
            500 | 502 | 503 | 504 => StatusCategory::ServerError,
            _ => StatusCategory::Uncategorized,
        }
    }
}

/// Confidence that pinning the test to `actual` is the right fix.
pub fn status_pair_confidence(actual: u16, expected: u16) -> f64 {
    use StatusCategory::*;

    match (StatusCategory::of(actual), StatusCategory::of(expected)) {
        (ServerError, _) | (_, ServerError) => SERVER_ERROR_CONFIDENCE,
        (Success, Success) => 0.95,
        (Success, ClientError) => 0.85,
        (ClientError, Success) => 0.88,
        (ClientError, ClientError) => 0.90,
        _ => UNCATEGORIZED_CONFIDENCE,
    }
}

/// Stateless classifier configured with a threshold and extractor order.
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    threshold: f64,
    extractors: Vec<Extractor>,
    syntax: UnitSyntax,
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_AUTO_APPLY_THRESHOLD,
            Extractor::defaults(ActualPosition::default()),
            UnitSyntax::default(),
        )
    }
}

impl FailureClassifier {
    /// Build a classifier. Thresholds outside `[0, 1]` are clamped.
    pub fn new(threshold: f64, extractors: Vec<Extractor>, syntax: UnitSyntax) -> Self {
        let threshold = if threshold.is_nan() {
            tracing::warn!("Auto-apply threshold is NaN; using {}", DEFAULT_AUTO_APPLY_THRESHOLD);
            DEFAULT_AUTO_APPLY_THRESHOLD
        } else {
            threshold.clamp(0.0, 1.0)
        };
        Self {
            threshold,
            extractors,
            syntax,
        }
    }

    pub fn from_config(config: &HealingConfig, syntax: UnitSyntax) -> Self {
        Self::new(
            config.auto_apply_threshold,
            Extractor::defaults(config.actual_position),
            syntax,
        )
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Classify one failure.
    pub fn classify(&self, record: &FailureRecord) -> HealingDecision {
        let discrepancy = extractors::extract(&self.extractors, &record.raw_message);

        let (extracted_actual, extracted_expected, proposed_fragment, confidence) = match &discrepancy {
            Discrepancy::StatusPair { actual, expected } => (
                Some(actual.to_string()),
                Some(expected.to_string()),
                self.syntax.status_assertion(*actual),
                status_pair_confidence(*actual, *expected),
            ),
            Discrepancy::MissingKey { key } => (
                None,
                Some(key.clone()),
                self.syntax.membership_assertion(key),
                MISSING_KEY_CONFIDENCE,
            ),
            Discrepancy::Unrecognized => (
                None,
                None,
                self.syntax.manual_placeholder(&record.test_name),
                FALLBACK_CONFIDENCE,
            ),
        };

        let decision = if confidence >= self.threshold {
            Decision::AutoApply
        } else {
            Decision::NeedsReview
        };

        tracing::debug!(
            "Classified failure of {}: {:?} -> {} ({:.2})",
            record.test_name,
            discrepancy,
            decision,
            confidence
        );

        HealingDecision {
            test_name: record.test_name.clone(),
            discrepancy,
            extracted_actual,
            extracted_expected,
            proposed_fragment,
            confidence,
            decision,
        }
    }

    /// Classify each record independently.
    pub fn classify_batch(&self, records: &[FailureRecord]) -> (Vec<HealingDecision>, HealingSummary) {
        let decisions: Vec<HealingDecision> = records.iter().map(|r| self.classify(r)).collect();

        let mut summary = HealingSummary::default();
        for decision in &decisions {
            match decision.decision {
                Decision::AutoApply => summary.auto_apply += 1,
                Decision::NeedsReview => summary.needs_review += 1,
            }
        }

        tracing::info!(
            "Classified {} failures: {} auto-apply, {} need review",
            decisions.len(),
            summary.auto_apply,
            summary.needs_review
        );

        (decisions, summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(name: &str, message: &str) -> FailureRecord {
        FailureRecord {
            test_name: name.to_string(),
            raw_message: message.to_string(),
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < f64::EPSILON
    }

    // =========================================================================
    // Confidence table tests
    // =========================================================================

    #[test]
    fn test_confidence_table() {
        assert!(approx(status_pair_confidence(200, 201), 0.95));
        assert!(approx(status_pair_confidence(200, 400), 0.85));
        assert!(approx(status_pair_confidence(404, 200), 0.88));
        assert!(approx(status_pair_confidence(401, 403), 0.90));
        assert!(approx(status_pair_confidence(503, 404), 0.65));
        assert!(approx(status_pair_confidence(200, 500), 0.65));
        assert!(approx(status_pair_confidence(418, 200), 0.75));
        assert!(approx(status_pair_confidence(301, 302), 0.75));
    }

    #[test]
    fn test_status_categories() {
        assert_eq!(StatusCategory::of(204), StatusCategory::Success);
        assert_eq!(StatusCategory::of(203), StatusCategory::Uncategorized);
        assert_eq!(StatusCategory::of(422), StatusCategory::ClientError);
        assert_eq!(StatusCategory::of(501), StatusCategory::Uncategorized);
        assert_eq!(StatusCategory::of(504), StatusCategory::ServerError);
    }

    // =========================================================================
    // Classification tests
    // =========================================================================

    #[test]
    fn test_success_vs_client_error_auto_applies() {
        let decision = FailureClassifier::default().classify(&record(
            "test_create_pet",
            "AssertionError: assert 200 == 400",
        ));

        assert_eq!(decision.extracted_actual.as_deref(), Some("200"));
        assert_eq!(decision.extracted_expected.as_deref(), Some("400"));
        assert!(approx(decision.confidence, 0.85));
        assert_eq!(decision.decision, Decision::AutoApply);
        assert_eq!(decision.proposed_fragment, "assert response.status_code == 200");
    }

    #[test]
    fn test_server_error_needs_review() {
        let decision =
            FailureClassifier::default().classify(&record("test_list", "assert 502 == 200"));

        assert!(approx(decision.confidence, 0.65));
        assert_eq!(decision.decision, Decision::NeedsReview);
    }

    #[test]
    fn test_uncategorized_pair_meets_threshold() {
        let decision = FailureClassifier::default().classify(&record("t", "assert 418 == 200"));
        assert!(approx(decision.confidence, 0.75));
        assert_eq!(decision.decision, Decision::AutoApply);
    }

    #[test]
    fn test_missing_key() {
        let decision = FailureClassifier::default().classify(&record("test_get", "KeyError: 'id'"));

        assert_eq!(
            decision.discrepancy,
            Discrepancy::MissingKey {
                key: "id".to_string()
            }
        );
        assert_eq!(decision.extracted_actual, None);
        assert_eq!(decision.extracted_expected.as_deref(), Some("id"));
        assert_eq!(decision.proposed_fragment, "assert \"id\" in data");
        assert!(approx(decision.confidence, 0.70));
        assert_eq!(decision.decision, Decision::NeedsReview);
    }

    #[test]
    fn test_fallback() {
        let decision =
            FailureClassifier::default().classify(&record("test_x", "ConnectionError: refused"));

        assert_eq!(decision.discrepancy, Discrepancy::Unrecognized);
        assert_eq!(decision.extracted_actual, None);
        assert_eq!(decision.extracted_expected, None);
        assert!(decision.proposed_fragment.contains("test_x"));
        assert!(approx(decision.confidence, 0.60));
        assert_eq!(decision.decision, Decision::NeedsReview);
    }

    #[test]
    fn test_non_ascii_message_falls_back() {
        let classifier = FailureClassifier::default();
        for message in ["¡==", "AssertionError: assert “ok” == “ko”", "‘status’ != “200”"] {
            let decision = classifier.classify(&record("test_smart_quotes", message));
            assert_eq!(decision.discrepancy, Discrepancy::Unrecognized);
            assert_eq!(decision.decision, Decision::NeedsReview);
        }
    }

    #[test]
    fn test_custom_threshold() {
        let lenient = FailureClassifier::new(
            0.6,
            Extractor::defaults(ActualPosition::Left),
            UnitSyntax::Pytest,
        );
        assert_eq!(
            lenient.classify(&record("t", "KeyError: 'id'")).decision,
            Decision::AutoApply
        );

        let strict = FailureClassifier::new(
            0.99,
            Extractor::defaults(ActualPosition::Left),
            UnitSyntax::Pytest,
        );
        assert_eq!(
            strict.classify(&record("t", "assert 200 == 201")).decision,
            Decision::NeedsReview
        );
    }

    #[test]
    fn test_threshold_clamped() {
        let classifier = FailureClassifier::new(7.0, vec![], UnitSyntax::Pytest);
        assert!(approx(classifier.threshold(), 1.0));
        let classifier = FailureClassifier::new(f64::NAN, vec![], UnitSyntax::Pytest);
        assert!(approx(classifier.threshold(), DEFAULT_AUTO_APPLY_THRESHOLD));
    }

    #[test]
    fn test_rust_syntax_fragment() {
        let classifier = FailureClassifier::new(
            DEFAULT_AUTO_APPLY_THRESHOLD,
            Extractor::defaults(ActualPosition::Left),
            UnitSyntax::Rust,
        );
        let decision = classifier.classify(&record(
            "get_pets_ok",
            "assertion `left == right` failed\n  left: 404\n right: 200",
        ));
        assert_eq!(
            decision.proposed_fragment,
            "assert_eq!(response.status().as_u16(), 404);"
        );
        assert!(approx(decision.confidence, 0.88));
    }

    #[test]
    fn test_classify_batch_summary() {
        let records = vec![
            record("a", "assert 200 == 400"),
            record("b", "assert 502 == 200"),
            record("c", "KeyError: 'x'"),
        ];
        let (decisions, summary) = FailureClassifier::default().classify_batch(&records);
        assert_eq!(decisions.len(), 3);
        assert_eq!(
            summary,
            HealingSummary {
                auto_apply: 1,
                needs_review: 2
            }
        );
    }

    #[test]
    fn test_decision_serializes_snake_case() {
        let decision = FailureClassifier::default().classify(&record("a", "assert 200 == 400"));
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["decision"], "auto_apply");
        assert_eq!(json["discrepancy"]["kind"], "status_pair");
    }

    proptest! {
        #[test]
        fn prop_classification_is_deterministic(name in "[a-z_]{1,20}", message in ".{0,200}") {
            let classifier = FailureClassifier::default();
            let rec = record(&name, &message);
            let first = classifier.classify(&rec);
            let second = classifier.classify(&rec);
            prop_assert_eq!(first.confidence.to_bits(), second.confidence.to_bits());
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_confidence_in_unit_interval(actual in 100u16..600, expected in 100u16..600) {
            let confidence = status_pair_confidence(actual, expected);
            prop_assert!((0.0..=1.0).contains(&confidence));
        }
    }
}
