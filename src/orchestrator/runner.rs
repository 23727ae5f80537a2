//! The participant-facing loop.
//!
//! `ExperimentRunner` asks the UI for a response to each prompt, feeds it to
//! the session and plays back what changed. Interval phases are driven by a
//! `PhaseTimer`; the upload runs in the background from the moment the
//! completion phase is entered and is joined before the run ends.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::errors::ExperimentError;
use crate::experiment_config::TimingSection;
use crate::export::upload::{UploadOutcome, UploadRequest, Uploader, save_locally, spawn_upload};
use crate::gates::GateDecision;
use crate::orchestrator::sequencer::CompletionEffect;
use crate::orchestrator::session::{Prompt, Response, Session, StepReport};
use crate::orchestrator::state::TrialRecord;
use crate::orchestrator::timer::PhaseTimer;

/// Everything the runner needs from a participant-facing front end.
///
/// `ask` blocks until the participant answers. `None` means they withdrew.
pub trait ParticipantUi {
    fn ask(&mut self, prompt: &Prompt) -> Result<Option<Response>>;

    /// Show a trial's outcome, with the running score when the phase shows one.
    fn show_outcome(&mut self, trial: &TrialRecord, score: Option<i64>);

    fn wait_started(&mut self, title: &str, delay: Duration);

    fn wait_finished(&mut self);

    fn notice(&mut self, message: &str);

    fn completed(&mut self, participant_id: &str, total_score: i64, countdown: Duration);

    fn upload_result(&mut self, outcome: &UploadOutcome);
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(UploadOutcome),
    /// The participant quit; the state is kept for a later resume.
    Withdrawn,
}

pub struct ExperimentRunner<U: ParticipantUi> {
    session: Session,
    ui: U,
    uploader: Arc<dyn Uploader>,
    fallback_dir: PathBuf,
    timing: TimingSection,
    upload: Option<JoinHandle<UploadOutcome>>,
}

impl<U: ParticipantUi> ExperimentRunner<U> {
    pub fn new(
        session: Session,
        ui: U,
        uploader: Arc<dyn Uploader>,
        fallback_dir: PathBuf,
        timing: TimingSection,
    ) -> Self {
        Self {
            session,
            ui,
            uploader,
            fallback_dir,
            timing,
            upload: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    /// Run until the experiment completes or the participant withdraws.
    pub async fn run(&mut self) -> Result<RunOutcome> {
        loop {
            let prompt = self.session.prompt()?;
            match prompt {
                Prompt::Interval { title, epoch, delay } => {
                    self.wait_interval(&title, epoch, delay).await?;
                    continue;
                }
                Prompt::Completion {
                    participant_id,
                    total_score,
                } => {
                    let outcome = self.complete(&participant_id, total_score).await?;
                    return Ok(RunOutcome::Completed(outcome));
                }
                _ => {}
            }

            let Some(response) = self.ui.ask(&prompt)? else {
                info!(
                    participant = %self.session.state().participant_id(),
                    phase = %self.session.state().current_phase(),
                    "Participant withdrew"
                );
                return Ok(RunOutcome::Withdrawn);
            };

            let score_before = self.session.state().total_score();
            match self.session.respond(response) {
                Ok(report) => self.play_back(report, score_before).await,
                Err(err @ ExperimentError::InvalidInput(_))
                | Err(err @ ExperimentError::UnexpectedResponse { .. }) => {
                    warn!(error = %err, "Response rejected");
                    self.ui.notice(&err.to_string());
                }
                Err(err) => return Err(err).context("Experiment step failed"),
            }
        }
    }

    async fn play_back(&mut self, report: StepReport, score_before: i64) {
        if let Some(trial) = report.feedback_trial() {
            let shows_score = self
                .session
                .table()
                .get(trial.phase)
                .is_some_and(|def| def.show_score);
            // Taken from the step itself so a reset on the same step is not shown yet.
            let earned: i64 = report.trials.iter().filter_map(|t| t.points).sum();
            self.ui
                .show_outcome(trial, shows_score.then_some(score_before + earned));
            tokio::time::sleep(self.timing.outcome_display()).await;
        } else if !report.trials.is_empty() {
            tokio::time::sleep(self.timing.choice_pause()).await;
        }

        if report.score_reset {
            self.ui.notice("Your score has been reset for the next button.");
        }
        match report.gate {
            Some(GateDecision::Repeat) => self
                .ui
                .notice("Not quite. Let's go through the buttons once more."),
            Some(GateDecision::JumpToFinal) => self
                .ui
                .notice("Thanks for trying. Let's move on to the final questions."),
            Some(GateDecision::Advance) | None => {}
        }

        if report.completion == Some(CompletionEffect::TriggerUpload) {
            let request = UploadRequest::from_state(self.session.state(), Utc::now().date_naive());
            info!(file = %request.file_name, "Starting dataset upload");
            self.upload = Some(spawn_upload(
                Arc::clone(&self.uploader),
                request,
                self.fallback_dir.clone(),
            ));
        }
    }

    async fn wait_interval(&mut self, title: &str, epoch: u64, delay: Duration) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = PhaseTimer::new();
        timer.arm(epoch, delay, tx);
        self.ui.wait_started(title, delay);

        while let Some(fired) = rx.recv().await {
            if self.session.interval_elapsed(fired)?.is_some() {
                break;
            }
        }
        timer.cancel();
        self.ui.wait_finished();
        Ok(())
    }

    async fn complete(&mut self, participant_id: &str, total_score: i64) -> Result<UploadOutcome> {
        let countdown = self.timing.completion_countdown();
        self.ui.completed(participant_id, total_score, countdown);
        tokio::time::sleep(countdown).await;

        let outcome = match self.upload.take() {
            Some(handle) => handle.await.context("Upload task failed")?,
            None => {
                // Completed in an earlier run whose upload never reported back.
                let request =
                    UploadRequest::from_state(self.session.state(), Utc::now().date_naive());
                let path = save_locally(&request, &self.fallback_dir)?;
                warn!(path = %path.display(), "Resumed after completion; dataset saved locally");
                UploadOutcome::Deferred { path }
            }
        };
        self.ui.upload_result(&outcome);
        if matches!(outcome, UploadOutcome::Lost { .. }) {
            warn!("Dataset was neither uploaded nor saved; keeping the session state");
        } else {
            self.session.finish()?;
        }
        Ok(outcome)
    }
}
