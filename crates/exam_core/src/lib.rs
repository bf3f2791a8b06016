use std::{
    collections::BTreeMap,
    sync::Arc,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{AttemptId, ExamDefinition, ExamId, ExamResult},
    protocol::{AttemptReview, AttemptSummary, GenerateExamRequest, GeneratedExam, SubmittedAnswer},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

pub mod error;
pub mod http;

pub use error::{LoadError, SessionError, SubmitError};
pub use http::HttpExamService;

/// Time budget granted per question when an exam is loaded.
pub const SECONDS_PER_QUESTION: u32 = 120;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Remote exam service boundary. Content generation, grading, and persistence
/// all live on the other side of this trait; the controller treats every
/// response as opaque.
#[async_trait]
pub trait ExamService: Send + Sync {
    async fn fetch_exam(&self, exam_id: ExamId) -> Result<ExamDefinition, LoadError>;
    async fn submit_exam(
        &self,
        exam_id: ExamId,
        answers: &[SubmittedAnswer],
    ) -> Result<ExamResult, SubmitError>;
    async fn generate_exam(&self, request: &GenerateExamRequest) -> Result<GeneratedExam>;
    async fn exam_history(&self) -> Result<Vec<AttemptSummary>>;
    async fn attempt_review(&self, attempt_id: AttemptId) -> Result<AttemptReview>;
}

pub struct MissingExamService;

#[async_trait]
impl ExamService for MissingExamService {
    async fn fetch_exam(&self, exam_id: ExamId) -> Result<ExamDefinition, LoadError> {
        Err(LoadError::Network(anyhow!(
            "exam service unavailable for exam {}",
            exam_id.0
        )))
    }

    async fn submit_exam(
        &self,
        exam_id: ExamId,
        _answers: &[SubmittedAnswer],
    ) -> Result<ExamResult, SubmitError> {
        Err(SubmitError::Network(anyhow!(
            "exam service unavailable for exam {}",
            exam_id.0
        )))
    }

    async fn generate_exam(&self, _request: &GenerateExamRequest) -> Result<GeneratedExam> {
        Err(anyhow!("exam service unavailable"))
    }

    async fn exam_history(&self) -> Result<Vec<AttemptSummary>> {
        Err(anyhow!("exam service unavailable"))
    }

    async fn attempt_review(&self, attempt_id: AttemptId) -> Result<AttemptReview> {
        Err(anyhow!(
            "exam service unavailable for attempt {}",
            attempt_id.0
        ))
    }
}

/// Emitted by a [`FullscreenHost`] every time fullscreen presence is lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullscreenExit;

/// Fullscreen capability of the hosting environment, injected so the
/// controller can be driven by a fake host that simulates exit events
/// deterministically.
#[async_trait]
pub trait FullscreenHost: Send + Sync {
    /// Best-effort; the environment may refuse.
    async fn request_fullscreen(&self) -> Result<()>;
    /// Best-effort; ignored if fullscreen is not engaged.
    async fn exit_fullscreen(&self);
    async fn is_fullscreen(&self) -> bool;
    fn subscribe_exits(&self) -> broadcast::Receiver<FullscreenExit>;
}

/// Host for environments without a fullscreen surface. Requests are refused,
/// nothing is ever fullscreen, and no exit event is ever emitted.
pub struct HeadlessFullscreenHost {
    exits: broadcast::Sender<FullscreenExit>,
}

impl HeadlessFullscreenHost {
    pub fn new() -> Self {
        let (exits, _) = broadcast::channel(1);
        Self { exits }
    }
}

impl Default for HeadlessFullscreenHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FullscreenHost for HeadlessFullscreenHost {
    async fn request_fullscreen(&self) -> Result<()> {
        Err(anyhow!("fullscreen is not available in this environment"))
    }

    async fn exit_fullscreen(&self) {}

    async fn is_fullscreen(&self) -> bool {
        false
    }

    fn subscribe_exits(&self) -> broadcast::Receiver<FullscreenExit> {
        self.exits.subscribe()
    }
}

/// Discrete lifecycle state of one exam attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loading,
    NotStarted,
    InProgress,
    Submitting,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    PhaseChanged(Phase),
    Tick { remaining_seconds: u32 },
    IntegrityViolated,
    Completed { result: ExamResult },
    SubmitFailed(String),
}

struct SessionState {
    phase: Phase,
    // Claimed before the fetch await so only one load can be in flight.
    load_in_flight: bool,
    exam: Option<ExamDefinition>,
    current_question: usize,
    remaining_seconds: u32,
    // Set after a failed submission so a retry window never costs the
    // candidate time. Stays set for the rest of the attempt.
    timer_frozen: bool,
    integrity_violated: bool,
    // BTreeMap keeps the submit payload in ascending index order by
    // construction. Entries are overwritten, never removed.
    answers: BTreeMap<usize, String>,
    result: Option<ExamResult>,
    exit_watch: Option<JoinHandle<()>>,
}

/// Drives one timed, fullscreen-proctored exam attempt from load through
/// submission. One instance per attempt; `Completed` and `Failed` are
/// terminal and a new attempt means a new controller.
///
/// Every method performs its phase check and transition inside a single lock
/// acquisition, so racing termination triggers (timeout tick, integrity
/// violation, manual submit) resolve to exactly one submission with no
/// dedicated synchronization beyond the state mutex.
pub struct ExamSessionController {
    service: Arc<dyn ExamService>,
    host: Arc<dyn FullscreenHost>,
    inner: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl ExamSessionController {
    pub fn new(service: Arc<dyn ExamService>, host: Arc<dyn FullscreenHost>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            service,
            host,
            inner: Mutex::new(SessionState {
                phase: Phase::Loading,
                load_in_flight: false,
                exam: None,
                current_question: 0,
                remaining_seconds: 0,
                timer_frozen: false,
                integrity_violated: false,
                answers: BTreeMap::new(),
                result: None,
                exit_watch: None,
            }),
            events,
        })
    }

    /// Fetches the exam definition once and seeds the time budget. On failure
    /// the attempt is terminally `Failed`; recovery is a fresh controller.
    pub async fn load(&self, exam_id: ExamId) -> Result<(), SessionError> {
        {
            let mut guard = self.inner.lock().await;
            if guard.phase != Phase::Loading || guard.load_in_flight {
                return Err(SessionError::invalid_state("load", guard.phase));
            }
            guard.load_in_flight = true;
        }

        match self.service.fetch_exam(exam_id).await {
            Ok(exam) => {
                let total_seconds = exam.questions.len() as u32 * SECONDS_PER_QUESTION;
                {
                    let mut guard = self.inner.lock().await;
                    guard.remaining_seconds = total_seconds;
                    guard.exam = Some(exam);
                    guard.phase = Phase::NotStarted;
                }
                info!(
                    exam_id = exam_id.0,
                    remaining_seconds = total_seconds,
                    "exam loaded"
                );
                let _ = self
                    .events
                    .send(SessionEvent::PhaseChanged(Phase::NotStarted));
                Ok(())
            }
            Err(err) => {
                {
                    let mut guard = self.inner.lock().await;
                    guard.phase = Phase::Failed;
                }
                warn!(exam_id = exam_id.0, "exam load failed: {err}");
                let _ = self.events.send(SessionEvent::PhaseChanged(Phase::Failed));
                Err(SessionError::Load(err))
            }
        }
    }

    /// Begins the attempt: best-effort fullscreen, then the timer and the
    /// integrity watch. A second call is a caller bug and fails loudly.
    pub async fn start(self: &Arc<Self>) -> Result<(), SessionError> {
        {
            let mut guard = self.inner.lock().await;
            if guard.phase != Phase::NotStarted {
                return Err(SessionError::invalid_state("start", guard.phase));
            }
            // Claim the transition before awaiting the host, so a second
            // start racing across the fullscreen request observes
            // InProgress and is rejected.
            guard.phase = Phase::InProgress;
            guard.exit_watch = Some(self.spawn_exit_watch());
        }

        if let Err(err) = self.host.request_fullscreen().await {
            // The client cannot force fullscreen; the exam proceeds ungated.
            warn!("fullscreen request refused, proceeding without it: {err}");
        }

        info!("exam attempt started");
        let _ = self
            .events
            .send(SessionEvent::PhaseChanged(Phase::InProgress));
        Ok(())
    }

    fn spawn_exit_watch(self: &Arc<Self>) -> JoinHandle<()> {
        let mut exits = self.host.subscribe_exits();
        let controller = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match exits.recv().await {
                    Ok(_) => {
                        let Some(controller) = controller.upgrade() else {
                            break;
                        };
                        controller.on_integrity_violation().await;
                    }
                    // Overflow drops the oldest events only; the newer ones
                    // are still queued, so keep watching.
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Writes the answer for the current question, overwriting any prior
    /// entry for that index.
    pub async fn select_answer(&self, value: impl Into<String>) -> Result<(), SessionError> {
        let mut guard = self.inner.lock().await;
        match guard.phase {
            Phase::InProgress => {}
            // Late delivery while a submission is in flight; the payload is
            // already built, so the write is dropped.
            Phase::Submitting => return Ok(()),
            phase => return Err(SessionError::invalid_state("select_answer", phase)),
        }
        let index = guard.current_question;
        guard.answers.insert(index, value.into());
        Ok(())
    }

    /// Unrestricted navigation in both directions; answering is optional per
    /// question.
    pub async fn go_to(&self, index: usize) -> Result<(), SessionError> {
        let mut guard = self.inner.lock().await;
        if guard.phase != Phase::InProgress {
            return Err(SessionError::invalid_state("go_to", guard.phase));
        }
        let total = guard.exam.as_ref().map_or(0, |exam| exam.questions.len());
        if index >= total {
            return Err(SessionError::QuestionIndexOutOfRange { index, total });
        }
        guard.current_question = index;
        Ok(())
    }

    /// Host-driven clock, one call per second. Late or out-of-phase ticks are
    /// no-ops, so the host may keep a coarse timer running across a submit.
    /// Reaching zero submits the buffered answers exactly once.
    pub async fn tick(&self) {
        let remaining = {
            let mut guard = self.inner.lock().await;
            if guard.phase != Phase::InProgress
                || guard.timer_frozen
                || guard.remaining_seconds == 0
            {
                return;
            }
            guard.remaining_seconds -= 1;
            guard.remaining_seconds
        };

        let _ = self.events.send(SessionEvent::Tick {
            remaining_seconds: remaining,
        });

        if remaining == 0 {
            info!("time budget exhausted, submitting buffered answers");
            self.auto_submit("timeout").await;
        }
    }

    /// Invoked when fullscreen presence is lost mid-attempt. Latches the
    /// violation flag and ends the attempt by submitting whatever is
    /// buffered; grading of the partial buffer stays with the server.
    pub async fn on_integrity_violation(&self) {
        {
            let mut guard = self.inner.lock().await;
            if guard.phase != Phase::InProgress {
                return;
            }
            guard.integrity_violated = true;
        }
        warn!("fullscreen exited during proctored attempt, forcing submission");
        let _ = self.events.send(SessionEvent::IntegrityViolated);
        self.auto_submit("integrity violation").await;
    }

    async fn auto_submit(&self, trigger: &str) {
        // Failures here leave the attempt open for a manual retry; the
        // SubmitFailed event has already been emitted by submit().
        if let Err(err) = self.submit().await {
            warn!("automatic submission after {trigger} failed: {err}");
        }
    }

    /// Grades the attempt. The phase check below is the single-writer guard:
    /// whichever of timeout, integrity violation, or manual submit acquires
    /// the `Submitting` transition first wins, and late callers observing
    /// `Submitting` are discarded as no-ops. On a failed submission the
    /// attempt reverts to `InProgress` with the buffer intact and the timer
    /// frozen, so a transient network error never strands the candidate.
    pub async fn submit(&self) -> Result<(), SessionError> {
        let (exam_id, payload) = {
            let mut guard = self.inner.lock().await;
            match guard.phase {
                Phase::InProgress => {}
                // Lost the race against another termination trigger.
                Phase::Submitting => return Ok(()),
                phase => return Err(SessionError::invalid_state("submit", phase)),
            }
            let Some(exam) = guard.exam.as_ref() else {
                return Err(SessionError::invalid_state("submit", guard.phase));
            };
            let exam_id = exam.id;
            let payload: Vec<SubmittedAnswer> = guard
                .answers
                .iter()
                .map(|(index, answer)| SubmittedAnswer {
                    question_index: *index as u32,
                    answer: answer.clone(),
                })
                .collect();
            guard.phase = Phase::Submitting;
            (exam_id, payload)
        };

        let _ = self
            .events
            .send(SessionEvent::PhaseChanged(Phase::Submitting));
        info!(
            exam_id = exam_id.0,
            answered = payload.len(),
            "submitting exam attempt"
        );

        match self.service.submit_exam(exam_id, &payload).await {
            Ok(result) => {
                let watch = {
                    let mut guard = self.inner.lock().await;
                    guard.result = Some(result.clone());
                    guard.phase = Phase::Completed;
                    guard.exit_watch.take()
                };
                if let Some(watch) = watch {
                    watch.abort();
                }
                if self.host.is_fullscreen().await {
                    self.host.exit_fullscreen().await;
                }
                info!(
                    exam_id = exam_id.0,
                    score = result.score,
                    total = result.total,
                    passed = result.passed,
                    "exam attempt graded"
                );
                let _ = self.events.send(SessionEvent::PhaseChanged(Phase::Completed));
                let _ = self.events.send(SessionEvent::Completed { result });
                Ok(())
            }
            Err(err) => {
                {
                    let mut guard = self.inner.lock().await;
                    guard.phase = Phase::InProgress;
                    guard.timer_frozen = true;
                }
                warn!(
                    exam_id = exam_id.0,
                    "submission failed, attempt stays open for retry: {err}"
                );
                let _ = self.events.send(SessionEvent::SubmitFailed(err.to_string()));
                let _ = self
                    .events
                    .send(SessionEvent::PhaseChanged(Phase::InProgress));
                Err(SessionError::Submit(err))
            }
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn phase(&self) -> Phase {
        self.inner.lock().await.phase
    }

    pub async fn exam(&self) -> Option<ExamDefinition> {
        self.inner.lock().await.exam.clone()
    }

    pub async fn current_question(&self) -> usize {
        self.inner.lock().await.current_question
    }

    pub async fn remaining_seconds(&self) -> u32 {
        self.inner.lock().await.remaining_seconds
    }

    pub async fn integrity_violated(&self) -> bool {
        self.inner.lock().await.integrity_violated
    }

    pub async fn answered_count(&self) -> usize {
        self.inner.lock().await.answers.len()
    }

    pub async fn result(&self) -> Option<ExamResult> {
        self.inner.lock().await.result.clone()
    }
}

impl Drop for ExamSessionController {
    fn drop(&mut self) {
        if let Some(watch) = self.inner.get_mut().exit_watch.take() {
            watch.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
