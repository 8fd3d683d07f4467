use thiserror::Error;

/// Core error type for the Trellis runtime.
///
/// Expected misses (a context lookup that finds nothing, an absent popup
/// anchor) are represented as `Option` results, not as variants here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// `createModel` referenced a class that was never registered
    #[error("Unknown model type: {0}")]
    UnknownModelType(String),

    /// A flow key was invoked on a class that has no such flow registered
    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    /// A step handler returned an error; persisted params for other steps
    /// remain intact
    #[error("Step handler failed at {flow}.{step}: {message}")]
    StepHandlerFailure {
        /// Key of the flow that was executing
        flow: String,
        /// Key of the step whose handler failed
        step: String,
        /// Underlying failure message
        message: String,
    },

    /// Definition-level validation error (duplicate step keys, duplicate
    /// model uid, malformed spec)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A context name was defined twice in the same frame
    #[error("Context binding already defined: {0}")]
    DuplicateBinding(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::SerializationError(err.to_string())
    }
}

impl From<String> for EngineError {
    fn from(err: String) -> Self {
        EngineError::Other(err)
    }
}

impl From<&str> for EngineError {
    fn from(err: &str) -> Self {
        EngineError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            (
                EngineError::UnknownModelType("WidgetModel".to_string()),
                "Unknown model type: WidgetModel",
            ),
            (
                EngineError::FlowNotFound("formItemSettings".to_string()),
                "Flow not found: formItemSettings",
            ),
            (
                EngineError::StepHandlerFailure {
                    flow: "formItemSettings".to_string(),
                    step: "initialValue".to_string(),
                    message: "boom".to_string(),
                },
                "Step handler failed at formItemSettings.initialValue: boom",
            ),
            (
                EngineError::ValidationError("duplicate step key".to_string()),
                "Validation error: duplicate step key",
            ),
            (
                EngineError::DuplicateBinding("form".to_string()),
                "Context binding already defined: form",
            ),
            (
                EngineError::SerializationError("bad json".to_string()),
                "Serialization error: bad json",
            ),
            (EngineError::Other("other_err".to_string()), "other_err"),
        ];

        for (error, expected_msg) in errors {
            assert_eq!(error.to_string(), expected_msg);
        }
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let error: EngineError = json_error.into();

        match error {
            EngineError::SerializationError(msg) => {
                assert!(msg.contains("expected value"));
            }
            _ => panic!("Expected SerializationError variant"),
        }
    }

    #[test]
    fn test_from_string_and_str() {
        let error: EngineError = "test error message".to_string().into();
        assert_eq!(error, EngineError::Other("test error message".to_string()));

        let error: EngineError = "borrowed message".into();
        assert_eq!(error, EngineError::Other("borrowed message".to_string()));
    }

    #[test]
    fn test_error_clone_and_eq() {
        let original = EngineError::ValidationError("test".to_string());
        let cloned = original.clone();

        assert_eq!(original, cloned);
        assert_eq!(format!("{:?}", original), format!("{:?}", cloned));
    }
}
