use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::phase::PhaseId;

/// Kind of a survey question recorded as a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Probability,
    Consistency,
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuestionType::Probability => write!(f, "probability"),
            QuestionType::Consistency => write!(f, "consistency"),
        }
    }
}

/// One stimulus-response-outcome event. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialRecord {
    pub phase: PhaseId,
    pub trial_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stimulus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_type: Option<QuestionType>,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

/// A trial as submitted to the recorder: everything but the timestamp, with an
/// optional trial number.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialInput {
    pub phase: PhaseId,
    pub trial_number: Option<u32>,
    pub condition: Option<String>,
    pub stimulus: Option<String>,
    pub choice: Option<String>,
    pub outcome: Option<bool>,
    pub points: Option<i64>,
    pub question_type: Option<QuestionType>,
}

impl TrialInput {
    pub fn new(phase: PhaseId) -> Self {
        Self {
            phase,
            trial_number: None,
            condition: None,
            stimulus: None,
            choice: None,
            outcome: None,
            points: None,
            question_type: None,
        }
    }

    pub fn numbered(mut self, trial_number: u32) -> Self {
        self.trial_number = Some(trial_number);
        self
    }

    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn stimulus(mut self, stimulus: impl Into<String>) -> Self {
        self.stimulus = Some(stimulus.into());
        self
    }

    pub fn choice(mut self, choice: impl Into<String>) -> Self {
        self.choice = Some(choice.into());
        self
    }

    pub fn outcome(mut self, outcome: bool) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn points(mut self, points: i64) -> Self {
        self.points = Some(points);
        self
    }

    pub fn question(mut self, question_type: QuestionType) -> Self {
        self.question_type = Some(question_type);
        self
    }
}

/// The durable record of one participant session.
///
/// Fields are only mutated by the sequencer and recorder; everything else
/// reads through the accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentState {
    pub(crate) participant_id: String,
    pub(crate) current_phase: PhaseId,
    #[serde(default)]
    pub(crate) trials: Vec<TrialRecord>,
    #[serde(default)]
    pub(crate) total_score: i64,
    #[serde(default)]
    pub(crate) survey_responses: BTreeMap<String, String>,
    /// Failed comprehension-gate attempts so far.
    #[serde(default)]
    pub(crate) gate_attempts: u32,
    /// Index of the first trial recorded since the current phase was entered.
    #[serde(default)]
    pub(crate) block_start: usize,
    /// Index of the first trial of the current scoring window.
    #[serde(default)]
    pub(crate) score_start: usize,
    /// Set once when completion triggers the upload.
    #[serde(default)]
    pub(crate) upload_triggered: bool,
    pub(crate) created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) completed_at: Option<DateTime<Utc>>,
}

impl ExperimentState {
    pub fn new(participant_id: &str, first_phase: PhaseId) -> Self {
        Self {
            participant_id: participant_id.to_string(),
            current_phase: first_phase,
            trials: Vec::new(),
            total_score: 0,
            survey_responses: BTreeMap::new(),
            gate_attempts: 0,
            block_start: 0,
            score_start: 0,
            upload_triggered: false,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// A new session with a random participant id.
    pub fn fresh(first_phase: PhaseId) -> Self {
        Self::new(&generate_participant_id(), first_phase)
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn current_phase(&self) -> PhaseId {
        self.current_phase
    }

    pub fn trials(&self) -> &[TrialRecord] {
        &self.trials
    }

    pub fn total_score(&self) -> i64 {
        self.total_score
    }

    pub fn survey_responses(&self) -> &BTreeMap<String, String> {
        &self.survey_responses
    }

    pub fn gate_attempts(&self) -> u32 {
        self.gate_attempts
    }

    pub fn upload_triggered(&self) -> bool {
        self.upload_triggered
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Trials recorded since the current phase was last entered.
    pub fn block_trials(&self) -> &[TrialRecord] {
        let start = self.block_start.min(self.trials.len());
        &self.trials[start..]
    }

    /// Trials that count towards `total_score`.
    pub fn scoring_window(&self) -> &[TrialRecord] {
        let start = self.score_start.min(self.trials.len());
        &self.trials[start..]
    }

    /// All trials recorded in `phase`, across every visit.
    pub fn trials_in(&self, phase: PhaseId) -> impl Iterator<Item = &TrialRecord> {
        self.trials.iter().filter(move |t| t.phase == phase)
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.trials.last().map(|t| t.timestamp)
    }

    /// Start a new scoring window at the current end of the trial log.
    pub(crate) fn reset_score(&mut self) {
        self.total_score = 0;
        self.score_start = self.trials.len();
    }
}

/// Generate a participant id: 13 random lowercase base-36 characters.
pub fn generate_participant_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..13)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// How `StateStore::load_or_fresh` obtained its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No state file existed.
    Fresh,
    /// The saved session was restored.
    Restored,
    /// The state file was unreadable; it was moved to `backup`.
    Recovered { backup: PathBuf },
}

/// Reads and writes the experiment state as one pretty-printed JSON file.
pub struct StateStore {
    state_file: PathBuf,
}

impl StateStore {
    pub fn new(state_file: PathBuf) -> Self {
        Self { state_file }
    }

    pub fn path(&self) -> &Path {
        &self.state_file
    }

    pub fn exists(&self) -> bool {
        self.state_file.exists()
    }

    /// Load the saved state. Returns `Ok(None)` when no file exists and an
    /// error when the file cannot be parsed.
    pub fn load(&self) -> Result<Option<ExperimentState>> {
        if !self.state_file.exists() {
            return Ok(None);
        }

        let bytes = fs::read(&self.state_file).with_context(|| {
            format!("Failed to read state file: {}", self.state_file.display())
        })?;
        let state: ExperimentState = serde_json::from_slice(&bytes).with_context(|| {
            format!("Failed to parse state file: {}", self.state_file.display())
        })?;
        Ok(Some(state))
    }

    /// Load the saved state, falling back to a fresh one when the file is
    /// missing or malformed. A malformed file is kept aside for inspection.
    pub fn load_or_fresh(&self, first_phase: PhaseId) -> Result<(ExperimentState, LoadOutcome)> {
        if !self.state_file.exists() {
            return Ok((ExperimentState::fresh(first_phase), LoadOutcome::Fresh));
        }

        let bytes = fs::read(&self.state_file).with_context(|| {
            format!("Failed to read state file: {}", self.state_file.display())
        })?;

        match serde_json::from_slice::<ExperimentState>(&bytes) {
            Ok(state) => {
                debug!(
                    participant = %state.participant_id,
                    phase = %state.current_phase,
                    trials = state.trials.len(),
                    "Restored experiment state"
                );
                Ok((state, LoadOutcome::Restored))
            }
            Err(err) => {
                let backup = self.quarantine()?;
                warn!(
                    error = %err,
                    backup = %backup.display(),
                    "State file is malformed; starting a fresh session"
                );
                Ok((
                    ExperimentState::fresh(first_phase),
                    LoadOutcome::Recovered { backup },
                ))
            }
        }
    }

    /// Move an unreadable state file out of the way.
    pub fn quarantine(&self) -> Result<PathBuf> {
        let backup = self.state_file.with_extension(format!(
            "json.corrupt-{}",
            Utc::now().format("%Y%m%dT%H%M%S%.3f")
        ));
        fs::rename(&self.state_file, &backup)
            .with_context(|| format!("Failed to move aside {}", self.state_file.display()))?;
        Ok(backup)
    }

    /// Write the whole state. The file is replaced atomically.
    pub fn save(&self, state: &ExperimentState) -> Result<()> {
        if let Some(parent) = self.state_file.parent() {
            fs::create_dir_all(parent).context("Failed to create state directory")?;
        }

        let json = serde_json::to_string_pretty(state).context("Failed to serialize state")?;
        let tmp = self.state_file.with_extension("json.tmp");
        fs::write(&tmp, json).context("Failed to write temporary state file")?;
        fs::rename(&tmp, &self.state_file).context("Failed to replace state file")?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.state_file.exists() {
            fs::remove_file(&self.state_file).context("Failed to remove state file")?;
        }
        Ok(())
    }
}
