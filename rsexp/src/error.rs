use thiserror::Error;

use crate::events::Stage;

/// Failures that end a run. Everything recoverable is a
/// [`Warning`](crate::events::Warning) instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The source could not be read or is not a document.
    #[error("cannot acquire document: {0}")]
    Acquisition(#[source] anyhow::Error),

    /// Neither the text layer nor OCR produced any text.
    #[error("document contains no extractable text")]
    NoText,

    #[error("run cancelled during {stage}")]
    Cancelled { stage: Stage },

    /// A profile or one of its patterns is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[source] anyhow::Error),
}

impl PipelineError {
    /// Stage the run was in when it stopped.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Cancelled { stage } => *stage,
            _ => Stage::Failed,
        }
    }
}
