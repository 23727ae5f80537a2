use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::errors::ExperimentError;
use crate::gates::{ComprehensionGate, GateDecision};
use crate::orchestrator::state::ExperimentState;
use crate::phase::{PhaseDefinition, PhaseId, PhaseKind, PhaseTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Advance,
    Repeat,
    JumpToFinal,
}

/// A phase change applied to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: PhaseId,
    pub to: PhaseId,
    pub kind: TransitionKind,
    /// The running score was reset on arrival.
    pub score_reset: bool,
}

/// Result of entering the terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionEffect {
    /// First arrival: the dataset must be uploaded now.
    TriggerUpload,
    AlreadyTriggered,
}

/// Moves the state through the phase table.
///
/// The only backward edge is a comprehension gate's `repeat`. The sequencer
/// also owns the gate attempt counter; `ExperimentState::gate_attempts` is
/// where it is kept between runs.
#[derive(Debug, Clone)]
pub struct PhaseSequencer {
    table: Arc<PhaseTable>,
}

impl PhaseSequencer {
    pub fn new(table: Arc<PhaseTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &PhaseTable {
        &self.table
    }

    /// Definition of the state's current phase.
    pub fn current<'a>(
        &'a self,
        state: &ExperimentState,
    ) -> Result<&'a PhaseDefinition, ExperimentError> {
        self.table.require(state.current_phase)
    }

    /// Move to the next phase in table order.
    pub fn advance(&self, state: &mut ExperimentState) -> Result<Transition, ExperimentError> {
        let from = self.current(state)?.id;
        let to = self
            .table
            .next(from)
            .ok_or(ExperimentError::TerminalPhase(from))?;
        self.enter(state, to, TransitionKind::Advance)
    }

    /// Go back from a gate to its repeat target.
    pub fn repeat(
        &self,
        state: &mut ExperimentState,
        target: PhaseId,
    ) -> Result<Transition, ExperimentError> {
        let from = self.current(state)?;
        let legal = from.kind == PhaseKind::ComprehensionGate && from.repeat_target == Some(target);
        if !legal {
            return Err(ExperimentError::IllegalTransition {
                from: from.id,
                to: target,
            });
        }
        self.enter(state, target, TransitionKind::Repeat)
    }

    /// Skip the remaining phases and go straight to the final survey.
    pub fn jump_to_final(&self, state: &mut ExperimentState) -> Result<Transition, ExperimentError> {
        let from = self.current(state)?.id;
        let to = self.table.final_survey();
        if from == self.table.terminal() {
            return Err(ExperimentError::TerminalPhase(from));
        }
        let (Some(from_index), Some(to_index)) = (self.table.position(from), self.table.position(to))
        else {
            return Err(ExperimentError::UnknownPhase(to));
        };
        if from_index >= to_index {
            return Err(ExperimentError::IllegalTransition { from, to });
        }
        self.enter(state, to, TransitionKind::JumpToFinal)
    }

    /// Apply the outcome of one pass through the current comprehension gate.
    ///
    /// A failed pass counts as one attempt. The transition the decision calls
    /// for is applied before returning.
    pub fn resolve_gate(
        &self,
        state: &mut ExperimentState,
        all_correct: bool,
    ) -> Result<(GateDecision, Transition), ExperimentError> {
        let definition = self.current(state)?;
        let gate = ComprehensionGate::from_definition(definition)?;
        let repeat_target = definition.repeat_target;

        let decision = gate.decide(state.gate_attempts, all_correct);
        if !all_correct {
            state.gate_attempts += 1;
        }
        info!(
            phase = %definition.id,
            attempt = state.gate_attempts,
            max = gate.max_attempts(),
            all_correct,
            ?decision,
            "Comprehension gate resolved"
        );

        let transition = match decision {
            GateDecision::Advance => self.advance(state)?,
            GateDecision::Repeat => {
                let target = repeat_target.ok_or_else(|| {
                    ExperimentError::InvalidPhaseTable(format!(
                        "{} has no repeat target",
                        definition.id
                    ))
                })?;
                self.repeat(state, target)?
            }
            GateDecision::JumpToFinal => self.jump_to_final(state)?,
        };
        Ok((decision, transition))
    }

    /// Zero the running score and start a new scoring window.
    pub fn reset_score(&self, state: &mut ExperimentState) {
        state.reset_score();
    }

    /// Mark the terminal phase as reached. Only the first call asks for the upload.
    pub fn complete(&self, state: &mut ExperimentState) -> Result<CompletionEffect, ExperimentError> {
        let current = self.current(state)?;
        if current.kind != PhaseKind::Completion {
            return Err(ExperimentError::InvalidArgument(format!(
                "cannot complete the experiment from {}",
                current.id
            )));
        }
        if state.upload_triggered {
            return Ok(CompletionEffect::AlreadyTriggered);
        }
        state.upload_triggered = true;
        state.completed_at = Some(Utc::now());
        info!(participant = %state.participant_id, "Experiment complete");
        Ok(CompletionEffect::TriggerUpload)
    }

    fn enter(
        &self,
        state: &mut ExperimentState,
        to: PhaseId,
        kind: TransitionKind,
    ) -> Result<Transition, ExperimentError> {
        let definition = self.table.require(to)?;
        let from = state.current_phase;

        state.current_phase = to;
        state.block_start = state.trials.len();
        if definition.resets_score {
            state.reset_score();
        }

        info!(%from, %to, ?kind, score = state.total_score, "Phase transition");
        Ok(Transition {
            from,
            to,
            kind,
            score_reset: definition.resets_score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::state::TrialRecord;

    fn sequencer() -> PhaseSequencer {
        PhaseSequencer::new(Arc::new(PhaseTable::standard()))
    }

    fn state_at(phase: PhaseId) -> ExperimentState {
        let mut state = ExperimentState::new("p", PhaseId::Consent);
        state.current_phase = phase;
        state
    }

    fn scored_trial(phase: PhaseId, points: i64) -> TrialRecord {
        TrialRecord {
            phase,
            trial_number: 1,
            condition: None,
            stimulus: None,
            choice: None,
            outcome: None,
            points: Some(points),
            question_type: None,
            timestamp: 0,
        }
    }

    #[test]
    fn test_advance_from_consent_reaches_instructions() {
        let seq = sequencer();
        let mut state = state_at(PhaseId::Consent);
        let t = seq.advance(&mut state).unwrap();
        assert_eq!(t.to, PhaseId::Instructions);
        assert_eq!(state.current_phase(), PhaseId::Instructions);
    }

    #[test]
    fn test_advance_walks_whole_table() {
        let seq = sequencer();
        let mut state = state_at(PhaseId::Consent);
        let steps = seq.table().len() - 1;
        let mut visited = vec![state.current_phase()];
        for _ in 0..steps {
            seq.advance(&mut state).unwrap();
            visited.push(state.current_phase());
        }
        assert_eq!(state.current_phase(), PhaseId::Completion);
        assert_eq!(visited, PhaseId::all());
    }

    #[test]
    fn test_advance_from_terminal_fails() {
        let seq = sequencer();
        let mut state = state_at(PhaseId::Completion);
        assert!(matches!(
            seq.advance(&mut state),
            Err(ExperimentError::TerminalPhase(PhaseId::Completion))
        ));
    }

    #[test]
    fn test_entering_scored_phase_resets_score() {
        let seq = sequencer();
        let mut state = state_at(PhaseId::Interval3);
        state.trials.push(scored_trial(PhaseId::ForcedBlueAndOrange, 50));
        state.total_score = 500;

        let t = seq.advance(&mut state).unwrap();
        assert_eq!(t.to, PhaseId::BlueOrangeTrials);
        assert!(t.score_reset);
        assert_eq!(state.total_score(), 0);
        assert!(state.scoring_window().is_empty());
    }

    #[test]
    fn test_entering_unscored_phase_keeps_score() {
        let seq = sequencer();
        let mut state = state_at(PhaseId::BlueOrangeTrials);
        state.total_score = 300;
        seq.advance(&mut state).unwrap();
        assert_eq!(state.current_phase(), PhaseId::Interval4);
        assert_eq!(state.total_score(), 300);
    }

    #[test]
    fn test_repeat_only_from_gate_to_target() {
        let seq = sequencer();
        let mut state = state_at(PhaseId::ChoiceTrialsImages);
        let t = seq
            .repeat(&mut state, PhaseId::ForcedTrialsWithImages)
            .unwrap();
        assert_eq!(t.kind, TransitionKind::Repeat);

        let mut state = state_at(PhaseId::ChoiceTrialsImages);
        assert!(matches!(
            seq.repeat(&mut state, PhaseId::Consent),
            Err(ExperimentError::IllegalTransition { .. })
        ));

        let mut state = state_at(PhaseId::BlueOrangeTrials);
        assert!(matches!(
            seq.repeat(&mut state, PhaseId::ForcedBlueAndOrange),
            Err(ExperimentError::IllegalTransition { .. })
        ));
        assert_eq!(state.current_phase(), PhaseId::BlueOrangeTrials);
    }

    #[test]
    fn test_jump_to_final_skips_ahead() {
        let seq = sequencer();
        let mut state = state_at(PhaseId::ChoiceTrialsImages);
        let t = seq.jump_to_final(&mut state).unwrap();
        assert_eq!(t.to, PhaseId::FinalSurvey);

        let mut state = state_at(PhaseId::FinalSurvey);
        assert!(seq.jump_to_final(&mut state).is_err());
        let mut state = state_at(PhaseId::Completion);
        assert!(matches!(
            seq.jump_to_final(&mut state),
            Err(ExperimentError::TerminalPhase(_))
        ));
    }

    #[test]
    fn test_gate_failure_repeats_and_counts() {
        let seq = sequencer();
        let mut state = state_at(PhaseId::ChoiceTrialsImages);
        let (decision, t) = seq.resolve_gate(&mut state, false).unwrap();
        assert_eq!(decision, GateDecision::Repeat);
        assert_eq!(t.to, PhaseId::ForcedTrialsWithImages);
        assert_eq!(state.gate_attempts(), 1);
    }

    #[test]
    fn test_gate_success_advances_even_after_failures() {
        let seq = sequencer();
        let mut state = state_at(PhaseId::ChoiceTrialsImages);
        state.gate_attempts = 4;
        let (decision, t) = seq.resolve_gate(&mut state, true).unwrap();
        assert_eq!(decision, GateDecision::Advance);
        assert_eq!(t.to, PhaseId::Interval1);
        assert_eq!(state.gate_attempts(), 4);
    }

    #[test]
    fn test_gate_exhaustion_jumps_to_final() {
        let seq = sequencer();
        let mut state = state_at(PhaseId::ChoiceTrialsImages);
        let mut decisions = Vec::new();
        loop {
            let (decision, _) = seq.resolve_gate(&mut state, false).unwrap();
            decisions.push(decision);
            if state.current_phase() != PhaseId::ForcedTrialsWithImages {
                break;
            }
            seq.advance(&mut state).unwrap();
        }
        assert_eq!(decisions.len(), 5);
        assert_eq!(decisions.last(), Some(&GateDecision::JumpToFinal));
        assert_eq!(state.current_phase(), PhaseId::FinalSurvey);
        assert_eq!(state.gate_attempts(), 5);
    }

    #[test]
    fn test_resolve_gate_outside_gate_fails() {
        let seq = sequencer();
        let mut state = state_at(PhaseId::ChoiceTrials);
        assert!(seq.resolve_gate(&mut state, true).is_err());
    }

    #[test]
    fn test_complete_triggers_upload_once() {
        let seq = sequencer();
        let mut state = state_at(PhaseId::Completion);
        assert_eq!(
            seq.complete(&mut state).unwrap(),
            CompletionEffect::TriggerUpload
        );
        assert!(state.completed_at().is_some());
        assert_eq!(
            seq.complete(&mut state).unwrap(),
            CompletionEffect::AlreadyTriggered
        );
    }

    #[test]
    fn test_complete_outside_completion_fails() {
        let seq = sequencer();
        let mut state = state_at(PhaseId::FinalSurvey);
        assert!(seq.complete(&mut state).is_err());
        assert!(!state.upload_triggered());
    }

    #[test]
    fn test_transition_moves_block_start() {
        let seq = sequencer();
        let mut state = state_at(PhaseId::BlueOrangeTrials);
        state.trials.push(scored_trial(PhaseId::BlueOrangeTrials, 50));
        assert_eq!(state.block_trials().len(), 1);
        seq.advance(&mut state).unwrap();
        assert!(state.block_trials().is_empty());
    }
}
