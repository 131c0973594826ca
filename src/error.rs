//! Error taxonomy for the detection pipeline.
//!
//! Every variant knows the [`Stage`] it came from and whether it should end the run.

use thiserror::Error;

/// Pipeline stage an error is attributed to in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Source,
    Extract,
    Scale,
    Score,
    Model,
    Persist,
    Alert,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Config => "config",
            Stage::Source => "source",
            Stage::Extract => "extract",
            Stage::Scale => "scale",
            Stage::Score => "score",
            Stage::Model => "model",
            Stage::Persist => "persist",
            Stage::Alert => "alert",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("transient source error: {0}")]
    TransientSource(String),

    #[error("source rejected request: {0}")]
    Rejected(String),

    #[error("schema mismatch on field `{field}`: {reason}")]
    SchemaMismatch { field: String, reason: String },

    #[error("feature dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("scoring failed: {0}")]
    Scoring(String),

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("persistence failed ({sink}): {reason}")]
    Persistence { sink: String, reason: String },

    #[error("alert delivery failed ({channel}): {reason}")]
    Alert { channel: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StreamError {
    pub fn schema(field: impl Into<String>, reason: impl Into<String>) -> Self {
        StreamError::SchemaMismatch {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn persistence(sink: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        StreamError::Persistence {
            sink: sink.into(),
            reason: reason.to_string(),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            StreamError::Authentication(_)
            | StreamError::ResourceNotFound(_)
            | StreamError::TransientSource(_)
            | StreamError::Rejected(_) => Stage::Source,
            StreamError::SchemaMismatch { .. } => Stage::Extract,
            StreamError::DimensionMismatch { .. } => Stage::Scale,
            StreamError::Scoring(_) => Stage::Score,
            StreamError::ModelLoad(_) => Stage::Model,
            StreamError::Persistence { .. } => Stage::Persist,
            StreamError::Alert { .. } => Stage::Alert,
            StreamError::Config(_) => Stage::Config,
        }
    }

    /// Fatal errors end the run; everything else is logged and the loop carries on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StreamError::Authentication(_)
                | StreamError::ResourceNotFound(_)
                | StreamError::DimensionMismatch { .. }
                | StreamError::ModelLoad(_)
                | StreamError::Config(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StreamError::TransientSource(_))
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_mismatch_display_names_field() {
        let e = StreamError::schema("eventTime", "missing");
        assert_eq!(e.to_string(), "schema mismatch on field `eventTime`: missing");
        assert_eq!(e.stage(), Stage::Extract);
        assert!(!e.is_fatal());
    }

    #[test]
    fn fatal_and_retryable_classes() {
        assert!(StreamError::Authentication("x".into()).is_fatal());
        assert!(StreamError::ResourceNotFound("trail".into()).is_fatal());
        assert!(StreamError::ModelLoad("x".into()).is_fatal());
        assert!(!StreamError::TransientSource("x".into()).is_fatal());
        assert!(StreamError::TransientSource("x".into()).is_retryable());
        assert!(!StreamError::Authentication("x".into()).is_retryable());
        assert!(!StreamError::persistence("csv", "disk full").is_fatal());
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StreamError>();
    }
}
