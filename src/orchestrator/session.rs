//! One participant session.
//!
//! `Session` owns the experiment state and is the only place it is mutated
//! from: every participant response is read-modify-write on the state
//! followed by a save. Interval phases advance through `interval_elapsed`,
//! which drops firings from an earlier phase epoch.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::blocks::survey::{self, PANEL_ID_KEY, SurveyQuestion};
use crate::blocks::{self, BlockStep};
use crate::errors::ExperimentError;
use crate::gates::{ComprehensionGate, GateDecision};
use crate::orchestrator::recorder::{Clock, TrialRecorder};
use crate::orchestrator::sequencer::{CompletionEffect, PhaseSequencer, Transition};
use crate::orchestrator::state::{ExperimentState, LoadOutcome, StateStore, TrialRecord};
use crate::phase::{ChoicePair, DEFAULT_INTERVAL_MS, PhaseDefinition, PhaseKind, PhaseTable, Stimulus};
use crate::sampler::OutcomeSampler;

/// What the participant is asked to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    Consent {
        title: String,
    },
    Instructions {
        title: String,
    },
    Forced {
        title: String,
        stimulus: Stimulus,
        /// One-based press within this stimulus's run.
        press: u32,
        presses: u32,
        score: Option<i64>,
    },
    Gate {
        title: String,
        left: Stimulus,
        right: Stimulus,
        /// One-based pair index.
        question: usize,
        questions: usize,
        attempt: u32,
        max_attempts: u32,
    },
    Choice {
        title: String,
        left: Stimulus,
        right: Stimulus,
        trial_number: u32,
        trials: u32,
        score: Option<i64>,
    },
    Description {
        title: String,
        left: Stimulus,
        right: Stimulus,
    },
    Interval {
        title: String,
        epoch: u64,
        delay: Duration,
    },
    Survey {
        title: String,
        questions: Vec<SurveyQuestion>,
    },
    Completion {
        participant_id: String,
        total_score: i64,
    },
}

/// A participant's answer to a `Prompt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Agree,
    Continue,
    /// Press the only button of a forced trial.
    Press,
    /// Pick the stimulus with this id.
    Choose(String),
    Survey(BTreeMap<String, String>),
}

impl Response {
    fn label(&self) -> String {
        match self {
            Response::Agree => "agree".to_string(),
            Response::Continue => "continue".to_string(),
            Response::Press => "press".to_string(),
            Response::Choose(id) => format!("choose {}", id),
            Response::Survey(_) => "survey answers".to_string(),
        }
    }
}

/// Everything one response changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    pub trials: Vec<TrialRecord>,
    pub transition: Option<Transition>,
    pub gate: Option<GateDecision>,
    pub completion: Option<CompletionEffect>,
    /// The score was reset within the phase (between forced stimuli).
    pub score_reset: bool,
}

impl StepReport {
    /// The trial whose outcome should be shown, if any.
    pub fn feedback_trial(&self) -> Option<&TrialRecord> {
        self.trials.last().filter(|t| t.outcome.is_some())
    }
}

pub struct Session {
    state: ExperimentState,
    store: StateStore,
    sequencer: PhaseSequencer,
    recorder: TrialRecorder,
    sampler: Box<dyn OutcomeSampler>,
    epoch: u64,
}

impl Session {
    /// Resume the saved session, or start a new one.
    pub fn open(
        table: Arc<PhaseTable>,
        store: StateStore,
        sampler: Box<dyn OutcomeSampler>,
        clock: Box<dyn Clock>,
    ) -> anyhow::Result<(Self, LoadOutcome)> {
        let (mut state, mut outcome) = store.load_or_fresh(table.first())?;

        if !table.contains(state.current_phase()) {
            warn!(
                phase = %state.current_phase(),
                "Saved phase is not in the phase table; starting a fresh session"
            );
            let backup = store.quarantine()?;
            state = ExperimentState::fresh(table.first());
            outcome = LoadOutcome::Recovered { backup };
        }

        let session = Self {
            state,
            store,
            sequencer: PhaseSequencer::new(Arc::clone(&table)),
            recorder: TrialRecorder::new(table, clock),
            sampler,
            epoch: 0,
        };
        session.persist()?;
        info!(
            participant = %session.state.participant_id(),
            phase = %session.state.current_phase(),
            ?outcome,
            "Session opened"
        );
        Ok((session, outcome))
    }

    pub fn state(&self) -> &ExperimentState {
        &self.state
    }

    pub fn table(&self) -> &PhaseTable {
        self.sequencer.table()
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Counter bumped on every phase transition.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn current(&self) -> Result<&PhaseDefinition, ExperimentError> {
        self.sequencer.current(&self.state)
    }

    /// The prompt for the current phase and block position.
    pub fn prompt(&self) -> Result<Prompt, ExperimentError> {
        let def = self.current()?;
        let title = def.title.clone();
        let score = def.show_score.then_some(self.state.total_score());

        let prompt = match def.kind {
            PhaseKind::Consent => Prompt::Consent { title },
            PhaseKind::Instructions => Prompt::Instructions { title },
            PhaseKind::Interval => Prompt::Interval {
                title,
                epoch: self.epoch,
                delay: Duration::from_millis(def.delay_ms.unwrap_or(DEFAULT_INTERVAL_MS)),
            },
            PhaseKind::Survey => Prompt::Survey {
                title,
                questions: survey::questions(),
            },
            PhaseKind::Completion => Prompt::Completion {
                participant_id: self.state.participant_id().to_string(),
                total_score: self.state.total_score(),
            },
            _ => match self.step(def) {
                BlockStep::Forced { stimulus, slot, .. } => Prompt::Forced {
                    title,
                    stimulus,
                    press: slot + 1,
                    presses: def.trials_required,
                    score,
                },
                BlockStep::Gate { pair, index } => {
                    let (left, right) = sides(def, &pair)?;
                    Prompt::Gate {
                        title,
                        left,
                        right,
                        question: index + 1,
                        questions: def.pairs.len(),
                        attempt: self.state.gate_attempts() + 1,
                        max_attempts: def.max_attempts.unwrap_or(1),
                    }
                }
                BlockStep::Choice { pair, trial_number } => {
                    let (left, right) = sides(def, &pair)?;
                    Prompt::Choice {
                        title,
                        left,
                        right,
                        trial_number,
                        trials: def.trials_required,
                        score,
                    }
                }
                BlockStep::Description { pair } => {
                    let (left, right) = sides(def, &pair)?;
                    Prompt::Description { title, left, right }
                }
                BlockStep::Done => {
                    return Err(ExperimentError::InvalidArgument(format!(
                        "block of {} is already finished",
                        def.id
                    )));
                }
            },
        };
        Ok(prompt)
    }

    fn step(&self, def: &PhaseDefinition) -> BlockStep {
        blocks::next_step(def, self.state.block_trials().len())
    }

    /// Apply one participant response and persist the result.
    ///
    /// A rejected response leaves the state untouched.
    pub fn respond(&mut self, response: Response) -> Result<StepReport, ExperimentError> {
        let def = self.current()?.clone();
        let mut report = StepReport::default();

        match (def.kind, response) {
            (PhaseKind::Consent, Response::Agree) | (PhaseKind::Instructions, Response::Continue) => {
                report.transition = Some(self.sequencer.advance(&mut self.state)?);
            }
            (PhaseKind::ForcedExposure, Response::Press) => self.press(&def, &mut report)?,
            (PhaseKind::ComprehensionGate, Response::Choose(choice)) => {
                self.answer_gate(&def, &choice, &mut report)?
            }
            (PhaseKind::Choice, Response::Choose(choice)) => {
                let BlockStep::Choice { pair, trial_number } = self.step(&def) else {
                    return Err(finished(&def));
                };
                let input = blocks::choice_trial(
                    &def,
                    &pair,
                    trial_number,
                    &choice,
                    self.sampler.as_mut(),
                )?;
                report.trials.push(self.recorder.record(&mut self.state, input)?);
                if self.step(&def) == BlockStep::Done {
                    report.transition = Some(self.sequencer.advance(&mut self.state)?);
                }
            }
            (PhaseKind::DescriptionChoice, Response::Choose(choice)) => {
                let BlockStep::Description { pair } = self.step(&def) else {
                    return Err(finished(&def));
                };
                let input = blocks::description_trial(&def, &pair, &choice)?;
                report.trials.push(self.recorder.record(&mut self.state, input)?);
                report.transition = Some(self.sequencer.advance(&mut self.state)?);
            }
            (PhaseKind::Survey, Response::Survey(answers)) => {
                self.submit_survey(&def, answers, &mut report)?
            }
            (_, response) => {
                return Err(ExperimentError::UnexpectedResponse {
                    phase: def.id,
                    response: response.label(),
                });
            }
        }

        self.after_step(&mut report)?;
        Ok(report)
    }

    fn press(&mut self, def: &PhaseDefinition, report: &mut StepReport) -> Result<(), ExperimentError> {
        let BlockStep::Forced {
            stimulus,
            slot,
            stimulus_index,
            last_of_stimulus,
        } = self.step(def)
        else {
            return Err(finished(def));
        };

        let input = blocks::forced_trial(def, &stimulus, slot, self.sampler.as_mut())?;
        report.trials.push(self.recorder.record(&mut self.state, input)?);

        let more_stimuli = stimulus_index + 1 < def.stimuli.len();
        if last_of_stimulus && more_stimuli && def.resets_score_per_stimulus {
            self.sequencer.reset_score(&mut self.state);
            report.score_reset = true;
        }
        if self.step(def) == BlockStep::Done {
            report.transition = Some(self.sequencer.advance(&mut self.state)?);
        }
        Ok(())
    }

    fn answer_gate(
        &mut self,
        def: &PhaseDefinition,
        choice: &str,
        report: &mut StepReport,
    ) -> Result<(), ExperimentError> {
        let BlockStep::Gate { pair, index } = self.step(def) else {
            return Err(finished(def));
        };
        let input = blocks::gate_trial(def, &pair, index, choice, self.sampler.as_mut())?;
        report.trials.push(self.recorder.record(&mut self.state, input)?);

        if self.step(def) == BlockStep::Done {
            let choices: Vec<&str> = self
                .state
                .block_trials()
                .iter()
                .filter_map(|t| t.choice.as_deref())
                .collect();
            let all_correct = ComprehensionGate::all_correct(def, &choices);
            let (decision, transition) = self.sequencer.resolve_gate(&mut self.state, all_correct)?;
            report.gate = Some(decision);
            report.transition = Some(transition);
        }
        Ok(())
    }

    fn submit_survey(
        &mut self,
        def: &PhaseDefinition,
        answers: BTreeMap<String, String>,
        report: &mut StepReport,
    ) -> Result<(), ExperimentError> {
        let questions = survey::questions();
        if let Some(unknown) = answers
            .keys()
            .find(|key| !questions.iter().any(|q| q.key == key.as_str()))
        {
            return Err(ExperimentError::InvalidInput(format!(
                "unknown survey question {}",
                unknown
            )));
        }

        let mut normalized = BTreeMap::new();
        for question in &questions {
            let raw = answers.get(question.key).map(String::as_str).unwrap_or("");
            let answer = survey::normalize_answer(question, raw)?;
            normalized.insert(question.key.to_string(), answer);
        }

        for input in survey::survey_trials(def.id, &normalized) {
            report.trials.push(self.recorder.record(&mut self.state, input)?);
        }
        if let Some(panel_id) = normalized.get(PANEL_ID_KEY) {
            info!(from = %self.state.participant_id, to = %panel_id, "Participant id replaced by panel id");
            self.state.participant_id = panel_id.clone();
        }
        self.state.survey_responses.extend(normalized);

        report.transition = Some(self.sequencer.advance(&mut self.state)?);
        Ok(())
    }

    fn after_step(&mut self, report: &mut StepReport) -> Result<(), ExperimentError> {
        if let Some(transition) = report.transition {
            self.epoch += 1;
            if transition.to == self.table().terminal() {
                report.completion = Some(self.sequencer.complete(&mut self.state)?);
            }
        }
        self.persist()
    }

    /// Advance an interval phase when its timer fires.
    ///
    /// Returns `None` for a stale firing: the epoch no longer matches or the
    /// current phase is not an interval.
    pub fn interval_elapsed(&mut self, epoch: u64) -> Result<Option<Transition>, ExperimentError> {
        if epoch != self.epoch || self.current()?.kind != PhaseKind::Interval {
            debug!(fired = epoch, current = self.epoch, "Ignoring stale interval timer");
            return Ok(None);
        }
        let transition = self.sequencer.advance(&mut self.state)?;
        self.epoch += 1;
        self.persist()?;
        Ok(Some(transition))
    }

    /// Clear the saved state once the upload has been attempted. The
    /// in-memory state becomes a fresh session that is not saved until the
    /// next response.
    pub fn finish(&mut self) -> Result<(), ExperimentError> {
        if !self.state.upload_triggered() {
            return Err(ExperimentError::InvalidArgument(
                "the experiment has not been completed".to_string(),
            ));
        }
        self.store.clear()?;
        info!(participant = %self.state.participant_id(), "Session finished; saved state cleared");
        self.state = ExperimentState::fresh(self.table().first());
        self.epoch += 1;
        Ok(())
    }

    fn persist(&self) -> Result<(), ExperimentError> {
        self.store
            .save(&self.state)
            .context("Failed to persist experiment state")?;
        Ok(())
    }
}

fn sides(def: &PhaseDefinition, pair: &ChoicePair) -> Result<(Stimulus, Stimulus), ExperimentError> {
    let lookup = |id: &str| {
        def.stimulus(id).cloned().ok_or_else(|| {
            ExperimentError::InvalidPhaseTable(format!("{}: unknown stimulus {}", def.id, id))
        })
    };
    Ok((lookup(&pair.left)?, lookup(&pair.right)?))
}

fn finished(def: &PhaseDefinition) -> ExperimentError {
    ExperimentError::InvalidArgument(format!("block of {} is already finished", def.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::recorder::ManualClock;
    use crate::orchestrator::sequencer::TransitionKind;
    use crate::phase::PhaseId;
    use crate::sampler::ScriptedSampler;
    use tempfile::{TempDir, tempdir};

    fn open_at(phase: PhaseId) -> (Session, TempDir) {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("experiment-data.json"));
        store.save(&ExperimentState::new("p-1", phase)).unwrap();
        let (session, _) = Session::open(
            Arc::new(PhaseTable::standard()),
            store,
            Box::new(ScriptedSampler::always(true)),
            Box::new(ManualClock::new(1_000)),
        )
        .unwrap();
        (session, dir)
    }

    fn saved_phase(session: &Session) -> PhaseId {
        session.store().load().unwrap().unwrap().current_phase()
    }

    #[test]
    fn test_open_without_file_starts_at_consent() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let (session, outcome) = Session::open(
            Arc::new(PhaseTable::standard()),
            store,
            Box::new(ScriptedSampler::always(true)),
            Box::new(ManualClock::new(0)),
        )
        .unwrap();
        assert_eq!(outcome, LoadOutcome::Fresh);
        assert_eq!(session.state().current_phase(), PhaseId::Consent);
        assert!(session.store().exists());
        assert_eq!(
            session.prompt().unwrap(),
            Prompt::Consent {
                title: "Informed consent".to_string()
            }
        );
    }

    #[test]
    fn test_consent_advances_and_persists() {
        let (mut session, _dir) = open_at(PhaseId::Consent);
        let report = session.respond(Response::Agree).unwrap();
        let transition = report.transition.unwrap();
        assert_eq!(transition.to, PhaseId::Instructions);
        assert_eq!(session.epoch(), 1);
        assert_eq!(saved_phase(&session), PhaseId::Instructions);
    }

    #[test]
    fn test_unexpected_response_changes_nothing() {
        let (mut session, _dir) = open_at(PhaseId::Consent);
        let err = session.respond(Response::Press).unwrap_err();
        assert!(matches!(err, ExperimentError::UnexpectedResponse { .. }));
        assert_eq!(session.state().current_phase(), PhaseId::Consent);
        assert!(session.state().trials().is_empty());
    }

    #[test]
    fn test_forced_block_uses_learning_curve() {
        let (mut session, _dir) = open_at(PhaseId::ForcedTrialsWithImages);
        let mut last = StepReport::default();
        for _ in 0..40 {
            last = session.respond(Response::Press).unwrap();
        }
        assert_eq!(last.transition.map(|t| t.to), Some(PhaseId::ChoiceTrialsImages));

        let trials = session.state().trials();
        assert_eq!(trials.len(), 40);
        // stimulus-d succeeds once, on its fourth press.
        let d: Vec<bool> = trials[30..].iter().filter_map(|t| t.outcome).collect();
        assert_eq!(d.iter().filter(|o| **o).count(), 1);
        assert_eq!(trials[30].condition.as_deref(), Some("forced_stimulus-d"));
        assert_eq!(trials[33].points, Some(100));
        assert_eq!(trials[30].trial_number, 1);
    }

    #[test]
    fn test_forced_prompt_reports_press_position() {
        let (mut session, _dir) = open_at(PhaseId::ForcedTrialsWithImages);
        for _ in 0..12 {
            session.respond(Response::Press).unwrap();
        }
        match session.prompt().unwrap() {
            Prompt::Forced {
                stimulus,
                press,
                presses,
                score,
                ..
            } => {
                assert_eq!(stimulus.id, "stimulus-b");
                assert_eq!(press, 3);
                assert_eq!(presses, 10);
                assert_eq!(score, Some(1_200));
            }
            other => panic!("unexpected prompt {:?}", other),
        }
    }

    #[test]
    fn test_color_block_resets_between_stimuli() {
        let (mut session, _dir) = open_at(PhaseId::ForcedBlueAndOrange);
        let mut resets = 0;
        for _ in 0..20 {
            if session.respond(Response::Press).unwrap().score_reset {
                resets += 1;
            }
        }
        assert_eq!(resets, 1);
        assert_eq!(session.state().current_phase(), PhaseId::Interval3);
        // Only the orange run counts; the sampler always succeeds.
        assert_eq!(session.state().total_score(), 1_000);
    }

    #[test]
    fn test_correct_gate_advances_to_interval() {
        let (mut session, _dir) = open_at(PhaseId::ChoiceTrialsImages);
        session.respond(Response::Choose("stimulus-a".into())).unwrap();
        let report = session.respond(Response::Choose("stimulus-b".into())).unwrap();
        assert_eq!(report.gate, Some(GateDecision::Advance));
        assert_eq!(session.state().current_phase(), PhaseId::Interval1);
        assert_eq!(session.state().trials()[1].trial_number, 2);
    }

    #[test]
    fn test_wrong_gate_answer_repeats_forced_block() {
        let (mut session, _dir) = open_at(PhaseId::ChoiceTrialsImages);
        session.respond(Response::Choose("stimulus-c".into())).unwrap();
        let report = session.respond(Response::Choose("stimulus-b".into())).unwrap();
        assert_eq!(report.gate, Some(GateDecision::Repeat));
        assert_eq!(
            report.transition.map(|t| t.kind),
            Some(TransitionKind::Repeat)
        );
        assert_eq!(session.state().gate_attempts(), 1);
        assert!(matches!(session.prompt().unwrap(), Prompt::Forced { .. }));
    }

    #[test]
    fn test_gate_rejects_choice_outside_pair() {
        let (mut session, _dir) = open_at(PhaseId::ChoiceTrialsImages);
        let err = session.respond(Response::Choose("blue".into())).unwrap_err();
        assert!(matches!(err, ExperimentError::UnexpectedResponse { .. }));
        assert!(session.state().trials().is_empty());
    }

    #[test]
    fn test_interval_ignores_stale_epoch() {
        let (mut session, _dir) = open_at(PhaseId::Interval1);
        let Prompt::Interval { epoch, .. } = session.prompt().unwrap() else {
            panic!("expected an interval prompt");
        };
        assert_eq!(session.interval_elapsed(epoch + 1).unwrap(), None);
        let transition = session.interval_elapsed(epoch).unwrap().unwrap();
        assert_eq!(transition.to, PhaseId::FirstDescChoice);
        // The same firing again is stale.
        assert_eq!(session.interval_elapsed(epoch).unwrap(), None);
        assert_eq!(session.state().current_phase(), PhaseId::FirstDescChoice);
    }

    #[test]
    fn test_description_choice_records_one_trial() {
        let (mut session, _dir) = open_at(PhaseId::FirstDescChoice);
        let report = session.respond(Response::Choose("stimulus-b".into())).unwrap();
        let trial = &report.trials[0];
        assert_eq!(trial.stimulus.as_deref(), Some("stimulus-b-vs-stimulus-a"));
        assert_eq!(trial.outcome, None);
        assert!(report.feedback_trial().is_none());
        assert_eq!(session.state().current_phase(), PhaseId::Interval2);
    }

    fn survey_answers(panel_id: &str) -> BTreeMap<String, String> {
        let mut answers = BTreeMap::new();
        answers.insert("q1B1".to_string(), "90".to_string());
        answers.insert("q2B1".to_string(), "very".to_string());
        answers.insert(PANEL_ID_KEY.to_string(), panel_id.to_string());
        answers
    }

    #[test]
    fn test_survey_requires_panel_id() {
        let (mut session, _dir) = open_at(PhaseId::FinalSurvey);
        let err = session.respond(Response::Survey(survey_answers(" "))).unwrap_err();
        assert!(matches!(err, ExperimentError::InvalidInput(_)));
        assert!(session.state().trials().is_empty());
        assert_eq!(session.state().participant_id(), "p-1");
    }

    #[test]
    fn test_survey_rejects_unknown_question() {
        let (mut session, _dir) = open_at(PhaseId::FinalSurvey);
        let mut answers = survey_answers("PANEL9");
        answers.insert("q99".to_string(), "x".to_string());
        assert!(session.respond(Response::Survey(answers)).is_err());
    }

    #[test]
    fn test_survey_completes_and_triggers_upload_once() {
        let (mut session, _dir) = open_at(PhaseId::FinalSurvey);
        let report = session.respond(Response::Survey(survey_answers("PANEL9"))).unwrap();
        assert_eq!(report.trials.len(), 8);
        assert_eq!(report.completion, Some(CompletionEffect::TriggerUpload));
        assert_eq!(session.state().participant_id(), "PANEL9");
        assert_eq!(session.state().survey_responses()["q1B1"], "90");
        assert!(session.state().upload_triggered());
        assert_eq!(
            session.prompt().unwrap(),
            Prompt::Completion {
                participant_id: "PANEL9".to_string(),
                total_score: 0
            }
        );
        let saved = session.store().load().unwrap().unwrap();
        assert!(saved.upload_triggered());
    }

    #[test]
    fn test_finish_requires_completion() {
        let (mut session, _dir) = open_at(PhaseId::FinalSurvey);
        assert!(session.finish().is_err());

        session.respond(Response::Survey(survey_answers("PANEL9"))).unwrap();
        session.finish().unwrap();
        assert!(!session.store().exists());
        assert_eq!(session.state().current_phase(), PhaseId::Consent);
        assert!(session.state().trials().is_empty());
        assert_ne!(session.state().participant_id(), "PANEL9");
    }

    #[test]
    fn test_unknown_saved_phase_starts_fresh() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("experiment-data.json"));
        store.save(&ExperimentState::new("p-1", PhaseId::Interval5)).unwrap();
        let table = PhaseTable::new(
            crate::phase::default_phases()
                .into_iter()
                .filter(|p| p.id != PhaseId::Interval5)
                .collect(),
        )
        .unwrap();
        let (session, outcome) = Session::open(
            Arc::new(table),
            store,
            Box::new(ScriptedSampler::always(true)),
            Box::new(ManualClock::new(0)),
        )
        .unwrap();
        assert!(matches!(outcome, LoadOutcome::Recovered { .. }));
        assert_eq!(session.state().current_phase(), PhaseId::Consent);
    }
}
