use std::time::Duration;

use crate::decoder::DecodeError;
use crate::template::TemplateError;

#[derive(Debug, thiserror::Error)]
pub enum ExplorerError {
    /// The backend could not be reached at all
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Backend answered with an error
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    /// JSON deserialization error
    #[error("Deserialization error: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("No series found for {selector}")]
    NoSeriesFound { selector: String },
    #[error(
        "Cardinality {cardinality} of {selector} is greater than the allowed limit {limit}, {}",
        limit_hint(.narrowed)
    )]
    CardinalityLimitExceeded {
        selector: String,
        cardinality: u64,
        limit: u64,
        /// Whether a round of relative narrowing was already applied
        narrowed: bool,
    },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),
}

fn limit_hint(narrowed: &bool) -> &'static str {
    if *narrowed {
        "even after applying relative cardinality; use a different filter label"
    } else {
        "and relative cardinality is disabled"
    }
}

impl ExplorerError {
    /// Errors confined to a single concurrent task. The task's value is treated
    /// as absent and sibling tasks carry on.
    pub fn is_task_local(&self) -> bool {
        !matches!(
            self,
            ExplorerError::BackendUnavailable(_)
                | ExplorerError::NoSeriesFound { .. }
                | ExplorerError::CardinalityLimitExceeded { .. }
        )
    }
}

pub type Result<T, E = ExplorerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_local_classification() {
        assert!(ExplorerError::Timeout(Duration::from_secs(180)).is_task_local());
        assert!(
            ExplorerError::Decode(DecodeError::MissingValue { index: 0 }).is_task_local()
        );
        assert!(
            ExplorerError::Api {
                status: 422,
                message: "bad query".to_string()
            }
            .is_task_local()
        );

        assert!(!ExplorerError::BackendUnavailable("refused".to_string()).is_task_local());
        assert!(
            !ExplorerError::NoSeriesFound {
                selector: "up".to_string()
            }
            .is_task_local()
        );
    }

    #[test]
    fn test_limit_message_suggests_other_label() {
        let err = ExplorerError::CardinalityLimitExceeded {
            selector: r#"http_requests_total{job="api"}"#.to_string(),
            cardinality: 31_000,
            limit: 30_000,
            narrowed: true,
        };

        let msg = err.to_string();
        assert!(msg.contains("31000"));
        assert!(msg.contains("different filter label"));
    }
}
