//! Error taxonomy for the churn pipeline

use std::path::PathBuf;

/// Broad category of a [`PipelineError`], used by callers to decide whether
/// a failure is fatal to the session or only to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The backing file is missing or unreadable.
    DataAccess,
    /// A required column or field is absent, or a value is outside the
    /// vocabulary learned during fit.
    Schema,
    /// The model could not be trained.
    Training,
    /// The configuration is inconsistent.
    Config,
}

/// Errors produced by loading, preprocessing, training and scoring.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Cannot read {path}: {reason}")]
    DataAccess { path: PathBuf, reason: String },

    #[error("Cannot write {path}: {reason}")]
    DataWrite { path: PathBuf, reason: String },

    #[error("Required column '{0}' is missing")]
    MissingColumn(String),

    #[error("Record is missing a value for '{column}'")]
    MissingField { column: String },

    #[error("Value '{value}' in column '{column}' is not numeric")]
    InvalidNumber { column: String, value: String },

    #[error("Category '{value}' in column '{column}' was not seen during fit")]
    UnknownCategory { column: String, value: String },

    #[error("No customer with identifier '{0}'")]
    UnknownCustomer(String),

    #[error("Identifier '{0}' appears more than once")]
    DuplicateIdentifier(String),

    #[error("Label value '{0}' is not a recognised binary class")]
    InvalidLabel(String),

    #[error("Feature matrix has {rows} rows but {labels} labels were supplied")]
    ShapeMismatch { rows: usize, labels: usize },

    #[error("Expected {expected} features, got {got}")]
    FeatureMismatch { expected: usize, got: usize },

    #[error("Label {0} is outside the binary classes {{0, 1}}")]
    NonBinaryLabel(f64),

    #[error("No usable rows remain for training")]
    EmptyTrainingSet,

    #[error("Feature matrix contains a non-finite value at row {row}, column {column}")]
    NonFiniteFeature { row: usize, column: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    /// Broad category of the failure, for callers that only care whether
    /// the data, the schema, training or the configuration is at fault.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::DataAccess { .. } | PipelineError::DataWrite { .. } => {
                ErrorKind::DataAccess
            }
            PipelineError::MissingColumn(_)
            | PipelineError::MissingField { .. }
            | PipelineError::InvalidNumber { .. }
            | PipelineError::UnknownCategory { .. }
            | PipelineError::UnknownCustomer(_)
            | PipelineError::DuplicateIdentifier(_)
            | PipelineError::InvalidLabel(_)
            | PipelineError::FeatureMismatch { .. } => ErrorKind::Schema,
            PipelineError::ShapeMismatch { .. }
            | PipelineError::NonBinaryLabel(_)
            | PipelineError::EmptyTrainingSet
            | PipelineError::NonFiniteFeature { .. } => ErrorKind::Training,
            PipelineError::Config(_) => ErrorKind::Config,
        }
    }

    /// Shorthand for `self.kind() == ErrorKind::Schema`.
    pub fn is_schema(&self) -> bool {
        self.kind() == ErrorKind::Schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinct() {
        let access = PipelineError::DataAccess {
            path: PathBuf::from("missing.csv"),
            reason: "not found".to_string(),
        };
        let schema = PipelineError::MissingColumn("Churn".to_string());
        let training = PipelineError::EmptyTrainingSet;

        assert_eq!(access.kind(), ErrorKind::DataAccess);
        assert_eq!(schema.kind(), ErrorKind::Schema);
        assert_eq!(training.kind(), ErrorKind::Training);
        assert!(schema.is_schema());
        assert!(!access.is_schema());
    }

    #[test]
    fn test_unknown_category_message_names_column() {
        let err = PipelineError::UnknownCategory {
            column: "Contract Length".to_string(),
            value: "Biennial".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("Contract Length"));
        assert!(message.contains("Biennial"));
    }
}
