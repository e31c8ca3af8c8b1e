use chrono::NaiveDate;

/// Errors raised by the scoring pipeline. Configuration errors are raised
/// before any snapshot is processed; the rest abort the run that hit them.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("missing feature column `{column}` for snapshot {as_of}")]
    MissingColumn { column: String, as_of: NaiveDate },

    #[error("non-finite value in column `{column}` for provider {provider_id} at snapshot {as_of}")]
    NonFiniteFeature {
        column: String,
        provider_id: String,
        as_of: NaiveDate,
    },

    #[error("{detector} produced a non-finite score for provider {provider_id} at snapshot {as_of}")]
    NonFiniteScore {
        detector: String,
        provider_id: String,
        as_of: NaiveDate,
    },

    #[error("invalid weight configuration: {0}")]
    InvalidWeightConfig(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid fact at row {row} (provider {provider_id}): {reason}")]
    InvalidFact {
        row: u64,
        provider_id: String,
        reason: String,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
