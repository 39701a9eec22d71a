use std::fmt;

/// Failures surfaced at pipeline stage boundaries.
///
/// Row-level problems never reach this type: a record that cannot be coerced is dropped where it
/// is found. Everything here is recoverable by the caller, which decides whether the run goes on.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Network or HTTP status failure that survived every retry attempt.
    TransientFetch {
        url: String,
        attempts: u32,
        detail: String,
    },
    /// The markup does not contain the expected table.
    Extraction { detail: String },
    /// A single field could not be parsed into its typed form.
    Coercion { field: &'static str, value: String },
    /// The macro series has no usable observations at all.
    MergeGap { detail: String },
    /// No trained model is held in memory and none could be loaded.
    ModelUnavailable { detail: String },
    /// Training or prediction input lacks required features or is empty.
    TrainingInput { detail: String },
    /// Reading, writing or (de)serializing the model artifact failed.
    Artifact { detail: String },
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransientFetch { .. } => "transient_fetch",
            Self::Extraction { .. } => "extraction",
            Self::Coercion { .. } => "coercion",
            Self::MergeGap { .. } => "merge_gap",
            Self::ModelUnavailable { .. } => "model_unavailable",
            Self::TrainingInput { .. } => "training_input",
            Self::Artifact { .. } => "artifact",
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransientFetch {
                url,
                attempts,
                detail,
            } => write!(f, "fetch of {url} failed after {attempts} attempts: {detail}"),
            Self::Extraction { detail } => write!(f, "table extraction failed: {detail}"),
            Self::Coercion { field, value } => {
                write!(f, "cannot coerce field {field} from {value:?}")
            }
            Self::MergeGap { detail } => write!(f, "macro series has no coverage: {detail}"),
            Self::ModelUnavailable { detail } => write!(f, "model unavailable: {detail}"),
            Self::TrainingInput { detail } => write!(f, "invalid model input: {detail}"),
            Self::Artifact { detail } => write!(f, "model artifact error: {detail}"),
        }
    }
}

impl std::error::Error for PipelineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failing_field() {
        let err = PipelineError::Coercion {
            field: "close",
            value: "n/a".to_string(),
        };
        assert_eq!(err.to_string(), "cannot coerce field close from \"n/a\"");
        assert_eq!(err.kind(), "coercion");
    }

    #[test]
    fn converts_into_anyhow() {
        let err: anyhow::Error = PipelineError::ModelUnavailable {
            detail: "no artifact".to_string(),
        }
        .into();
        assert!(err.downcast_ref::<PipelineError>().is_some());
    }
}
