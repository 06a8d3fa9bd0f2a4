//! Exact-match FAQ answering over a bundle's `data/faq.json`.
//!
//! The same [`FaqIndex`] answers runtime `/execute` calls and gate cases
//! run in-process by [`FaqExecutor`], so a gate verdict reflects exactly
//! what the runtime would serve.

use std::collections::HashMap;
use std::path::Path;

use bundlegate_core::BundleError;
use bundlegate_core::cache::FAQ_DATA_FILE;
use bundlegate_core::fs_safe;
use bundlegate_core::gate::{ExecutionOutcome, ExecutionRequest, RuntimeExecutor, TransportFault};
use serde::{Deserialize, Serialize};

const MAX_FAQ_FILE_SIZE: u64 = 8 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct FaqItem {
    question: String,
    answer: String,
}

/// Whether a question matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    /// The question is in the FAQ.
    Ok,
    /// No entry for the question.
    NoMatch,
}

/// Answer to one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    /// Match status.
    pub status: AnswerStatus,
    /// Answer text, empty on `NoMatch`.
    pub answer: String,
}

/// Question to answer map of one bundle.
#[derive(Debug, Clone, Default)]
pub struct FaqIndex {
    answers: HashMap<String, String>,
}

impl FaqIndex {
    /// Load `data/faq.json` from a bundle directory.
    pub fn load(bundle_dir: &Path) -> Result<Self, BundleError> {
        let path = bundle_dir.join(FAQ_DATA_FILE);
        let bytes = fs_safe::read_bounded(&path, MAX_FAQ_FILE_SIZE)?.ok_or_else(|| {
            BundleError::BundleMetadata {
                detail: format!("{} missing", path.display()),
            }
        })?;
        Self::from_json(&bytes)
    }

    /// Parse a JSON array of `{question, answer}`.
    pub fn from_json(bytes: &[u8]) -> Result<Self, BundleError> {
        let items: Vec<FaqItem> =
            serde_json::from_slice(bytes).map_err(|e| BundleError::BundleMetadata {
                detail: format!("faq data unparsable: {e}"),
            })?;
        Ok(Self {
            answers: items
                .into_iter()
                .map(|item| (item.question, item.answer))
                .collect(),
        })
    }

    /// Answer `question` by exact match.
    #[must_use]
    pub fn answer(&self, question: &str) -> Answer {
        match self.answers.get(question) {
            Some(answer) => Answer {
                status: AnswerStatus::Ok,
                answer: answer.clone(),
            },
            None => Answer {
                status: AnswerStatus::NoMatch,
                answer: String::new(),
            },
        }
    }
}

/// Gate executor answering cases in-process from the bundle under test.
///
/// A bundle whose FAQ data cannot be loaded is reported as a 500, which
/// aborts the gate run instead of failing every case.
#[derive(Debug, Default, Clone, Copy)]
pub struct FaqExecutor;

impl RuntimeExecutor for FaqExecutor {
    fn execute(&self, request: &ExecutionRequest<'_>) -> Result<ExecutionOutcome, TransportFault> {
        let index = match FaqIndex::load(request.bundle_path) {
            Ok(index) => index,
            Err(e) => {
                tracing::error!(
                    bundle_id = request.bundle_id,
                    request_id = request.request_id,
                    error = %e,
                    "cannot load faq data for gate case"
                );
                return Ok(ExecutionOutcome {
                    http_status: 500,
                    answer: None,
                });
            },
        };
        let answer = index.answer(request.question);
        Ok(ExecutionOutcome {
            http_status: 200,
            answer: (answer.status == AnswerStatus::Ok).then_some(answer.answer),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_exact_match_only() {
        let index = FaqIndex::from_json(
            br#"[{"question": "What are your hours?", "answer": "9 to 5"}]"#,
        )
        .unwrap();
        assert_eq!(
            index.answer("What are your hours?"),
            Answer {
                status: AnswerStatus::Ok,
                answer: "9 to 5".into()
            }
        );
        assert_eq!(
            index.answer("what are your hours?").status,
            AnswerStatus::NoMatch
        );
    }

    #[test]
    fn test_malformed_data_is_metadata_error() {
        assert!(matches!(
            FaqIndex::from_json(br#"{"question": "q"}"#),
            Err(BundleError::BundleMetadata { .. })
        ));
    }

    #[test]
    fn test_executor_reports_missing_data_as_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let request = ExecutionRequest {
            tenant_id: "tenant_a",
            bundle_id: "b1",
            bundle_path: dir.path(),
            question: "q",
            request_id: "req:case:0",
        };
        assert_eq!(FaqExecutor.execute(&request).unwrap().http_status, 500);

        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(
            dir.path().join(FAQ_DATA_FILE),
            r#"[{"question": "q", "answer": "a"}]"#,
        )
        .unwrap();
        let outcome = FaqExecutor.execute(&request).unwrap();
        assert_eq!(outcome.http_status, 200);
        assert_eq!(outcome.answer.as_deref(), Some("a"));
    }
}
