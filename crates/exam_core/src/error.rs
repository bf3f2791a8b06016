use shared::domain::ExamId;
use thiserror::Error;

use crate::Phase;

/// Failures while fetching the exam definition. `NotFound` and `Network` stay
/// distinguishable so the caller can decide whether a retry makes sense.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("exam {} not found", .0 .0)]
    NotFound(ExamId),
    #[error("failed to fetch exam: {0}")]
    Network(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("failed to submit answers: {0}")]
    Network(#[source] anyhow::Error),
    #[error("submission rejected by server: {0}")]
    ServerRejected(String),
}

/// `InvalidState` and `QuestionIndexOutOfRange` mark caller bugs (calling an
/// operation from the wrong phase); they are returned loudly rather than
/// silently ignored.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{operation} is not valid while the session is {phase:?}")]
    InvalidState {
        operation: &'static str,
        phase: Phase,
    },
    #[error("question index {index} out of range for an exam with {total} questions")]
    QuestionIndexOutOfRange { index: usize, total: usize },
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
}

impl SessionError {
    pub(crate) fn invalid_state(operation: &'static str, phase: Phase) -> Self {
        Self::InvalidState { operation, phase }
    }
}
