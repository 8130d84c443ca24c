//! Progress and warning events emitted while a document is processed.
//!
//! The library never prints. Every stage transition goes to
//! [`PipelineObserver::on_progress`] and every recoverable problem to
//! [`PipelineObserver::on_warning`]; [`TracingObserver`] forwards both to
//! `tracing`, and front ends install their own observer to drive progress bars.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strum::{Display, EnumString};

use crate::error::PipelineError;

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Acquiring,
    Recognizing,
    Normalizing,
    FormatDetecting,
    Segmenting,
    Extracting,
    KeyParsing,
    Assembling,
    GapRecovering,
    Done,
    Failed,
}

/// Recoverable conditions. None of them aborts a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// The text layer is shorter than the sufficiency threshold.
    InsufficientText,
    OcrFailed,
    /// The requested OCR language is missing; the fallback language was used.
    OcrLanguageUnavailable,
    /// No numbering pattern validated a single candidate; the generic pattern was used.
    NoFormatMatch,
    ZeroQuestionsDetected,
    /// The answer key produced no entries under any interpretation.
    MalformedAnswerKey,
    /// One block failed to extract and was skipped.
    PerQuestionParseFailure,
    /// A number below the highest detected one is absent from the output.
    MissingQuestion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub context: String,
}

impl Warning {
    pub fn new(kind: WarningKind, context: impl Into<String>) -> Warning {
        Warning {
            kind: kind,
            context: context.into(),
        }
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.context)
    }
}

/// Receives pipeline events. Both methods default to doing nothing.
pub trait PipelineObserver: Send + Sync {
    fn on_progress(&self, _stage: Stage, _detail: &str) {}

    fn on_warning(&self, _warning: &Warning) {}
}

/// Forwards events to `tracing`: progress at `info`, warnings at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_progress(&self, stage: Stage, detail: &str) {
        tracing::info!(stage = %stage, "{}", detail);
    }

    fn on_warning(&self, warning: &Warning) {
        tracing::warn!(kind = %warning.kind, "{}", warning.context);
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentObserver;

impl PipelineObserver for SilentObserver {}

/// Cooperative cancellation flag, checked between stages.
///
/// Clones share the same flag, so a signal handler can hold one clone while
/// the pipeline holds another.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `Err(PipelineError::Cancelled)` once [`CancelToken::cancel`] has been called.
    pub fn check(&self, stage: Stage) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            return Err(PipelineError::Cancelled { stage: stage });
        }
        Ok(())
    }
}

/// Observer wrapper that also keeps every warning it sees.
pub(crate) struct Recorder<'a> {
    observer: &'a dyn PipelineObserver,
    pub(crate) warnings: Vec<Warning>,
}

impl<'a> Recorder<'a> {
    pub(crate) fn new(observer: &'a dyn PipelineObserver) -> Recorder<'a> {
        Recorder {
            observer: observer,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn progress(&self, stage: Stage, detail: &str) {
        self.observer.on_progress(stage, detail);
    }

    pub(crate) fn warn(&mut self, kind: WarningKind, context: impl Into<String>) {
        let warning = Warning::new(kind, context);
        self.observer.on_warning(&warning);
        self.warnings.push(warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect {
        stages: Mutex<Vec<Stage>>,
    }

    impl PipelineObserver for Collect {
        fn on_progress(&self, stage: Stage, _detail: &str) {
            self.stages.lock().unwrap().push(stage);
        }
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::FormatDetecting.to_string(), "format_detecting");
        assert_eq!(Stage::from_str("gap_recovering").unwrap(), Stage::GapRecovering);
        assert_eq!(WarningKind::MissingQuestion.to_string(), "missing_question");
    }

    #[test]
    fn test_cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let handle = token.clone();
        assert!(token.check(Stage::Normalizing).is_ok());
        handle.cancel();
        match token.check(Stage::Segmenting) {
            Err(PipelineError::Cancelled { stage }) => assert_eq!(stage, Stage::Segmenting),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test_log::test]
    fn test_recorder_forwards_and_keeps_warnings() {
        let observer = Collect::default();
        let mut recorder = Recorder::new(&observer);
        recorder.progress(Stage::Normalizing, "start");
        recorder.warn(WarningKind::NoFormatMatch, "generic pattern");
        assert_eq!(*observer.stages.lock().unwrap(), vec![Stage::Normalizing]);
        assert_eq!(recorder.warnings.len(), 1);
        assert_eq!(recorder.warnings[0].to_string(), "no_format_match: generic pattern");

        TracingObserver.on_warning(&recorder.warnings[0]);
    }
}
