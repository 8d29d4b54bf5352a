use thiserror::Error;

/// Top-level error type for the Twider search service.
///
/// Variants are tagged by the stage that failed so that callers can tell an
/// embedding outage from an index outage without inspecting messages.
/// Adapter crates map their backend errors (NATS, Qdrant, ONNX Runtime) into
/// the matching variant at the boundary.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TwiderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TwiderError {
    /// True for failures of an external dependency (stream, embedding, index).
    ///
    /// The ingestion loop retries these after a backoff; the query path
    /// surfaces them to the caller immediately.
    pub fn is_dependency_failure(&self) -> bool {
        matches!(
            self,
            TwiderError::Stream(_) | TwiderError::Embedding(_) | TwiderError::Index(_)
        )
    }
}

impl From<toml::de::Error> for TwiderError {
    fn from(err: toml::de::Error) -> Self {
        TwiderError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for TwiderError {
    fn from(err: toml::ser::Error) -> Self {
        TwiderError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for TwiderError {
    fn from(err: serde_json::Error) -> Self {
        TwiderError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Twider operations.
pub type Result<T> = std::result::Result<T, TwiderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TwiderError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_error_display_stage_variants() {
        let cases: Vec<(TwiderError, &str)> = vec![
            (
                TwiderError::Stream("no responders".to_string()),
                "Stream error: no responders",
            ),
            (
                TwiderError::Decode("missing field `Id`".to_string()),
                "Decode error: missing field `Id`",
            ),
            (
                TwiderError::Embedding("model not loaded".to_string()),
                "Embedding error: model not loaded",
            ),
            (
                TwiderError::Index("collection missing".to_string()),
                "Index error: collection missing",
            ),
            (
                TwiderError::Validation("limit out of range".to_string()),
                "Validation error: limit out of range",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TwiderError = io_err.into();
        assert!(matches!(err, TwiderError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let err: TwiderError = err.unwrap_err().into();
        assert!(matches!(err, TwiderError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let err: TwiderError = err.unwrap_err().into();
        assert!(matches!(err, TwiderError::Serialization(_)));
    }

    #[test]
    fn test_dependency_failure_classification() {
        assert!(TwiderError::Stream("x".into()).is_dependency_failure());
        assert!(TwiderError::Embedding("x".into()).is_dependency_failure());
        assert!(TwiderError::Index("x".into()).is_dependency_failure());
        assert!(!TwiderError::Decode("x".into()).is_dependency_failure());
        assert!(!TwiderError::Validation("x".into()).is_dependency_failure());
        assert!(!TwiderError::Api("x".into()).is_dependency_failure());
    }
}
