use thiserror::Error;

pub type Result<T> = std::result::Result<T, ForecastError>;

/// Errors surfaced by window building, normalization and the model entry
/// points. All of them are fatal; nothing in this crate retries.
#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("unknown scaler type '{0}'")]
    UnknownScalerType(String),

    #[error("unknown step '{0}'")]
    UnknownStep(String),

    #[error("channel '{0}' not found in schema")]
    MissingChannel(String),

    #[error("batch has no static covariates but '{0}' was configured in stat_exog_list")]
    MissingStaticSchema(String),

    #[error("no windows available for training")]
    NoTrainWindows,

    #[error("series too short for a window of {0} steps")]
    SeriesTooShort(usize),

    #[error("architecture returned no output tensors")]
    EmptyOutput,

    #[error("cannot reshape {0} forecast values into {1} output columns")]
    OutputShapeMismatch(usize, usize),

    #[error("decomposition is not supported by this architecture")]
    DecompositionUnsupported,

    #[error("loss does not support sampling distribution outputs")]
    SamplingUnsupported,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint error: {0}")]
    Record(#[from] burn::record::RecorderError),
}
