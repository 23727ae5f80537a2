use crate::errors::ExperimentError;
use crate::phase::{ChoicePair, PhaseDefinition, PhaseKind};

/// What happens after one pass through the comprehension check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Every pair answered correctly.
    Advance,
    /// Go back to the exposure phase and try again.
    Repeat,
    /// Attempts are exhausted; skip to the final survey.
    JumpToFinal,
}

/// Pairwise expected-value check with a bounded number of attempts.
#[derive(Debug, Clone)]
pub struct ComprehensionGate {
    max_attempts: u32,
}

impl ComprehensionGate {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    pub fn from_definition(definition: &PhaseDefinition) -> Result<Self, ExperimentError> {
        match (definition.kind, definition.max_attempts) {
            (PhaseKind::ComprehensionGate, Some(max)) => Ok(Self::new(max)),
            _ => Err(ExperimentError::InvalidArgument(format!(
                "{} is not a comprehension gate",
                definition.id
            ))),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide the next step given the number of failed attempts before this one.
    pub fn decide(&self, failed_attempts: u32, all_correct: bool) -> GateDecision {
        if all_correct {
            GateDecision::Advance
        } else if failed_attempts < self.max_attempts.saturating_sub(1) {
            GateDecision::Repeat
        } else {
            GateDecision::JumpToFinal
        }
    }

    /// Whether `choice` is the higher expected-value side of `pair`.
    pub fn is_correct(definition: &PhaseDefinition, pair: &ChoicePair, choice: &str) -> bool {
        definition.better_of(pair) == Some(choice)
    }

    /// Score one pass: `choices[i]` answers `definition.pairs[i]`.
    /// A pass with fewer answers than pairs is not all correct.
    pub fn all_correct(definition: &PhaseDefinition, choices: &[&str]) -> bool {
        choices.len() == definition.pairs.len()
            && definition
                .pairs
                .iter()
                .zip(choices)
                .all(|(pair, choice)| Self::is_correct(definition, pair, choice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::{PhaseId, PhaseTable};

    fn gate_definition() -> PhaseDefinition {
        PhaseTable::standard()
            .require(PhaseId::ChoiceTrialsImages)
            .unwrap()
            .clone()
    }

    #[test]
    fn test_all_correct_advances_regardless_of_attempts() {
        let gate = ComprehensionGate::new(5);
        for attempts in 0..10 {
            assert_eq!(gate.decide(attempts, true), GateDecision::Advance);
        }
    }

    #[test]
    fn test_failures_repeat_until_budget_spent() {
        let gate = ComprehensionGate::new(5);
        for attempts in 0..4 {
            assert_eq!(gate.decide(attempts, false), GateDecision::Repeat);
        }
        assert_eq!(gate.decide(4, false), GateDecision::JumpToFinal);
        assert_eq!(gate.decide(9, false), GateDecision::JumpToFinal);
    }

    #[test]
    fn test_single_attempt_gate_never_repeats() {
        let gate = ComprehensionGate::new(1);
        assert_eq!(gate.decide(0, false), GateDecision::JumpToFinal);
    }

    #[test]
    fn test_correct_answers_follow_expected_value() {
        let def = gate_definition();
        assert!(ComprehensionGate::all_correct(&def, &["stimulus-a", "stimulus-b"]));
        assert!(!ComprehensionGate::all_correct(&def, &["stimulus-c", "stimulus-b"]));
        assert!(!ComprehensionGate::all_correct(&def, &["stimulus-a", "stimulus-d"]));
        assert!(!ComprehensionGate::all_correct(&def, &["stimulus-a"]));
    }

    #[test]
    fn test_from_definition_requires_gate() {
        let table = PhaseTable::standard();
        let gate = ComprehensionGate::from_definition(&gate_definition()).unwrap();
        assert_eq!(gate.max_attempts(), 5);
        assert!(
            ComprehensionGate::from_definition(table.require(PhaseId::ChoiceTrials).unwrap())
                .is_err()
        );
    }
}
