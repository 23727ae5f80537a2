//! Phase definitions and JSON loading for the experiment.
//!
//! This module provides:
//! - `PhaseId`, the closed set of phase identifiers
//! - `PhaseDefinition`, the static parameters of one phase
//! - `PhaseTable`, the validated, ordered and immutable list of phases
//! - Loading/saving of `phases.json` and the built-in standard table

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::errors::ExperimentError;

/// Identifier of a phase. The serialized form is the kebab-case name used in
/// trial records and exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseId {
    Consent,
    Instructions,
    ForcedTrialsWithImages,
    ChoiceTrialsImages,
    #[serde(rename = "interval-1")]
    Interval1,
    FirstDescChoice,
    #[serde(rename = "interval-2")]
    Interval2,
    ForcedBlueAndOrange,
    #[serde(rename = "interval-3")]
    Interval3,
    BlueOrangeTrials,
    #[serde(rename = "interval-4")]
    Interval4,
    FinalChoiceBlueOrange,
    #[serde(rename = "interval-5")]
    Interval5,
    ChoiceTrials,
    SecondDescChoice,
    FinalSurvey,
    Completion,
}

impl PhaseId {
    /// Returns all phase identifiers in their standard order.
    pub fn all() -> &'static [PhaseId] {
        &[
            PhaseId::Consent,
            PhaseId::Instructions,
            PhaseId::ForcedTrialsWithImages,
            PhaseId::ChoiceTrialsImages,
            PhaseId::Interval1,
            PhaseId::FirstDescChoice,
            PhaseId::Interval2,
            PhaseId::ForcedBlueAndOrange,
            PhaseId::Interval3,
            PhaseId::BlueOrangeTrials,
            PhaseId::Interval4,
            PhaseId::FinalChoiceBlueOrange,
            PhaseId::Interval5,
            PhaseId::ChoiceTrials,
            PhaseId::SecondDescChoice,
            PhaseId::FinalSurvey,
            PhaseId::Completion,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseId::Consent => "consent",
            PhaseId::Instructions => "instructions",
            PhaseId::ForcedTrialsWithImages => "forced-trials-with-images",
            PhaseId::ChoiceTrialsImages => "choice-trials-images",
            PhaseId::Interval1 => "interval-1",
            PhaseId::FirstDescChoice => "first-desc-choice",
            PhaseId::Interval2 => "interval-2",
            PhaseId::ForcedBlueAndOrange => "forced-blue-and-orange",
            PhaseId::Interval3 => "interval-3",
            PhaseId::BlueOrangeTrials => "blue-orange-trials",
            PhaseId::Interval4 => "interval-4",
            PhaseId::FinalChoiceBlueOrange => "final-choice-blue-orange",
            PhaseId::Interval5 => "interval-5",
            PhaseId::ChoiceTrials => "choice-trials",
            PhaseId::SecondDescChoice => "second-desc-choice",
            PhaseId::FinalSurvey => "final-survey",
            PhaseId::Completion => "completion",
        }
    }
}

impl std::fmt::Display for PhaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PhaseId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        PhaseId::all()
            .iter()
            .copied()
            .find(|id| id.as_str() == wanted)
            .ok_or_else(|| anyhow::anyhow!("Unknown phase '{}'", s))
    }
}

/// What a phase asks of the participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Consent,
    Instructions,
    /// One available action per trial; the participant learns each stimulus in turn.
    ForcedExposure,
    /// Pairwise comprehension check that can send the participant back.
    ComprehensionGate,
    /// Fixed-duration pause between conditions.
    Interval,
    /// A choice between described stimuli with no outcome feedback.
    DescriptionChoice,
    /// Repeated choice between stimuli with sampled outcomes.
    Choice,
    Survey,
    Completion,
}

impl PhaseKind {
    /// Whether phases of this kind record trials.
    pub fn records_trials(&self) -> bool {
        matches!(
            self,
            PhaseKind::ForcedExposure
                | PhaseKind::ComprehensionGate
                | PhaseKind::DescriptionChoice
                | PhaseKind::Choice
                | PhaseKind::Survey
        )
    }
}

/// Who assigns trial numbers in a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialNumbering {
    /// The phase numbers its own trials from 1.
    #[default]
    PerPhase,
    /// The recorder assigns `trials.len() + 1`.
    Global,
}

/// A button the participant can press, with its reward schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stimulus {
    pub id: String,
    /// Probability that pressing earns `points`.
    pub probability: f64,
    pub points: i64,
}

impl Stimulus {
    pub fn new(id: &str, probability: f64, points: i64) -> Self {
        Self {
            id: id.to_string(),
            probability,
            points,
        }
    }

    pub fn expected_value(&self) -> f64 {
        self.probability * self.points as f64
    }
}

/// Two stimuli presented side by side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoicePair {
    pub left: String,
    pub right: String,
}

impl ChoicePair {
    pub fn new(left: &str, right: &str) -> Self {
        Self {
            left: left.to_string(),
            right: right.to_string(),
        }
    }

    pub fn contains(&self, stimulus: &str) -> bool {
        self.left == stimulus || self.right == stimulus
    }

    /// The side that was not chosen, if `chosen` is one of the pair.
    pub fn other(&self, chosen: &str) -> Option<&str> {
        if self.left == chosen {
            Some(&self.right)
        } else if self.right == chosen {
            Some(&self.left)
        } else {
            None
        }
    }
}

/// Static parameters of one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDefinition {
    pub id: PhaseId,
    pub kind: PhaseKind,
    /// Short heading shown to the participant.
    #[serde(default)]
    pub title: String,
    /// Trials per stimulus for forced exposure, trials per block for choices.
    #[serde(default)]
    pub trials_required: u32,
    #[serde(default)]
    pub stimuli: Vec<Stimulus>,
    #[serde(default)]
    pub pairs: Vec<ChoicePair>,
    /// Attempt budget of a comprehension gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Phase a failed gate attempt returns to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_target: Option<PhaseId>,
    /// Reset the running score to 0 when this phase is entered.
    #[serde(default)]
    pub resets_score: bool,
    /// Reset the running score when a forced block moves to its next stimulus.
    #[serde(default)]
    pub resets_score_per_stimulus: bool,
    /// Whether the running score is shown during the phase.
    #[serde(default)]
    pub show_score: bool,
    /// Auto-advance delay for interval phases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    /// Condition label written into every trial of the phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub numbering: TrialNumbering,
    /// Fixed outcome per stimulus and trial slot. Stimuli without an entry are sampled.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub predetermined: BTreeMap<String, Vec<bool>>,
}

impl PhaseDefinition {
    pub fn new(id: PhaseId, kind: PhaseKind, title: &str) -> Self {
        Self {
            id,
            kind,
            title: title.to_string(),
            trials_required: 0,
            stimuli: Vec::new(),
            pairs: Vec::new(),
            max_attempts: None,
            repeat_target: None,
            resets_score: false,
            resets_score_per_stimulus: false,
            show_score: false,
            delay_ms: None,
            condition: None,
            numbering: TrialNumbering::PerPhase,
            predetermined: BTreeMap::new(),
        }
    }

    pub fn with_trials(mut self, trials_required: u32) -> Self {
        self.trials_required = trials_required;
        self
    }

    pub fn with_stimuli(mut self, stimuli: Vec<Stimulus>) -> Self {
        self.stimuli = stimuli;
        self
    }

    pub fn with_pairs(mut self, pairs: Vec<ChoicePair>) -> Self {
        self.pairs = pairs;
        self
    }

    pub fn with_gate(mut self, max_attempts: u32, repeat_target: PhaseId) -> Self {
        self.max_attempts = Some(max_attempts);
        self.repeat_target = Some(repeat_target);
        self
    }

    pub fn with_condition(mut self, condition: &str) -> Self {
        self.condition = Some(condition.to_string());
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    pub fn with_numbering(mut self, numbering: TrialNumbering) -> Self {
        self.numbering = numbering;
        self
    }

    /// Mark the phase as a scoring window: reset on entry and show the score.
    pub fn scored(mut self) -> Self {
        self.resets_score = true;
        self.show_score = true;
        self
    }

    pub fn resetting_per_stimulus(mut self) -> Self {
        self.resets_score_per_stimulus = true;
        self
    }

    pub fn with_predetermined(mut self, outcomes: BTreeMap<String, Vec<bool>>) -> Self {
        self.predetermined = outcomes;
        self
    }

    pub fn stimulus(&self, id: &str) -> Option<&Stimulus> {
        self.stimuli.iter().find(|s| s.id == id)
    }

    /// Fixed outcome for a stimulus at a zero-based slot, if the phase predetermines it.
    pub fn predetermined_outcome(&self, stimulus: &str, slot: u32) -> Option<bool> {
        self.predetermined
            .get(stimulus)
            .and_then(|outcomes| outcomes.get(slot as usize))
            .copied()
    }

    /// The stimulus of `pair` with the higher expected value. Ties go to the left.
    pub fn better_of<'a>(&self, pair: &'a ChoicePair) -> Option<&'a str> {
        let left = self.stimulus(&pair.left)?;
        let right = self.stimulus(&pair.right)?;
        if right.expected_value() > left.expected_value() {
            Some(&pair.right)
        } else {
            Some(&pair.left)
        }
    }

    /// Number of trials that complete one pass through the phase.
    pub fn block_length(&self) -> u32 {
        match self.kind {
            PhaseKind::ForcedExposure => self.trials_required * self.stimuli.len() as u32,
            PhaseKind::ComprehensionGate => self.pairs.len() as u32,
            PhaseKind::Choice => self.trials_required,
            PhaseKind::DescriptionChoice => 1,
            _ => 0,
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        for stimulus in &self.stimuli {
            if !(0.0..=1.0).contains(&stimulus.probability) {
                return Err(format!(
                    "{}: stimulus {} has probability {} outside [0, 1]",
                    self.id, stimulus.id, stimulus.probability
                ));
            }
        }
        for pair in &self.pairs {
            for side in [&pair.left, &pair.right] {
                if self.stimulus(side).is_none() {
                    return Err(format!("{}: pair references unknown stimulus {}", self.id, side));
                }
            }
        }
        for (stimulus, outcomes) in &self.predetermined {
            if self.stimulus(stimulus).is_none() {
                return Err(format!(
                    "{}: predetermined outcomes for unknown stimulus {}",
                    self.id, stimulus
                ));
            }
            if (outcomes.len() as u32) < self.trials_required {
                return Err(format!(
                    "{}: {} predetermined outcomes for {} but {} trials required",
                    self.id,
                    outcomes.len(),
                    stimulus,
                    self.trials_required
                ));
            }
        }
        match self.kind {
            PhaseKind::ForcedExposure if self.stimuli.is_empty() || self.trials_required == 0 => {
                Err(format!("{}: forced exposure needs stimuli and trials", self.id))
            }
            PhaseKind::ComprehensionGate => {
                if self.pairs.is_empty() {
                    return Err(format!("{}: comprehension gate needs choice pairs", self.id));
                }
                match (self.max_attempts, self.repeat_target) {
                    (Some(n), Some(_)) if n >= 1 => Ok(()),
                    _ => Err(format!(
                        "{}: comprehension gate needs max_attempts >= 1 and a repeat_target",
                        self.id
                    )),
                }
            }
            PhaseKind::Choice if self.pairs.is_empty() || self.trials_required == 0 => {
                Err(format!("{}: choice phase needs a pair and trials", self.id))
            }
            PhaseKind::DescriptionChoice if self.pairs.is_empty() => {
                Err(format!("{}: description choice needs a pair", self.id))
            }
            _ => Ok(()),
        }
    }
}

/// Validated, ordered list of phases. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PhasesFile", into = "PhasesFile")]
pub struct PhaseTable {
    phases: Vec<PhaseDefinition>,
}

/// On-disk shape of `phases.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PhasesFile {
    phases: Vec<PhaseDefinition>,
}

impl TryFrom<PhasesFile> for PhaseTable {
    type Error = ExperimentError;

    fn try_from(file: PhasesFile) -> Result<Self, Self::Error> {
        PhaseTable::new(file.phases)
    }
}

impl From<PhaseTable> for PhasesFile {
    fn from(table: PhaseTable) -> Self {
        PhasesFile {
            phases: table.phases,
        }
    }
}

impl PhaseTable {
    /// Build a table, checking the structural invariants:
    /// - ids are unique, the first phase is `consent` and the last is a completion phase
    /// - exactly one survey phase exists and precedes completion
    /// - every gate repeats to an earlier phase
    pub fn new(phases: Vec<PhaseDefinition>) -> Result<Self, ExperimentError> {
        let invalid = |msg: String| Err(ExperimentError::InvalidPhaseTable(msg));

        let (Some(first), Some(last)) = (phases.first(), phases.last()) else {
            return invalid("table has no phases".to_string());
        };
        if first.id != PhaseId::Consent {
            return invalid(format!("first phase must be consent, found {}", first.id));
        }
        if last.kind != PhaseKind::Completion {
            return invalid(format!("last phase {} is not a completion phase", last.id));
        }

        let mut seen = HashSet::new();
        for phase in &phases {
            if !seen.insert(phase.id) {
                return invalid(format!("phase {} appears twice", phase.id));
            }
            phase.validate().map_err(ExperimentError::InvalidPhaseTable)?;
        }

        let surveys = phases
            .iter()
            .filter(|p| p.kind == PhaseKind::Survey)
            .count();
        if surveys != 1 {
            return invalid(format!("expected exactly one survey phase, found {}", surveys));
        }
        if phases.iter().filter(|p| p.kind == PhaseKind::Completion).count() != 1 {
            return invalid("completion must be the only terminal phase".to_string());
        }

        for (index, phase) in phases.iter().enumerate() {
            if let Some(target) = phase.repeat_target {
                let target_index = phases.iter().position(|p| p.id == target);
                match target_index {
                    Some(t) if t < index => {}
                    _ => {
                        return invalid(format!(
                            "{} repeats to {}, which does not precede it",
                            phase.id, target
                        ));
                    }
                }
            }
        }

        Ok(Self { phases })
    }

    /// The standard 17-phase experiment.
    pub fn standard() -> Self {
        Self {
            phases: default_phases(),
        }
    }

    /// Load a table from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read phases file: {}", path.display()))?;

        let table: PhaseTable = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse phases JSON: {}", path.display()))?;

        Ok(table)
    }

    /// Save the table to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize phases to JSON")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write phases file: {}", path.display()))?;

        Ok(())
    }

    /// Load `phases.json` if it exists, otherwise the standard table.
    pub fn load_or_standard(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::standard())
        }
    }

    pub fn phases(&self) -> &[PhaseDefinition] {
        &self.phases
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn first(&self) -> PhaseId {
        self.phases[0].id
    }

    pub fn terminal(&self) -> PhaseId {
        self.phases[self.phases.len() - 1].id
    }

    /// The survey phase that a gate jumps to when its attempts run out.
    pub fn final_survey(&self) -> PhaseId {
        self.phases
            .iter()
            .find(|p| p.kind == PhaseKind::Survey)
            .map(|p| p.id)
            .unwrap_or_else(|| self.terminal())
    }

    pub fn contains(&self, id: PhaseId) -> bool {
        self.position(id).is_some()
    }

    pub fn position(&self, id: PhaseId) -> Option<usize> {
        self.phases.iter().position(|p| p.id == id)
    }

    pub fn get(&self, id: PhaseId) -> Option<&PhaseDefinition> {
        self.phases.iter().find(|p| p.id == id)
    }

    pub fn require(&self, id: PhaseId) -> Result<&PhaseDefinition, ExperimentError> {
        self.get(id).ok_or(ExperimentError::UnknownPhase(id))
    }

    /// The phase after `id` in table order, `None` for the terminal phase.
    pub fn next(&self, id: PhaseId) -> Option<PhaseId> {
        let index = self.position(id)?;
        self.phases.get(index + 1).map(|p| p.id)
    }

    /// Apply `f` to every definition and re-validate the result.
    pub fn map_definitions<F>(&self, mut f: F) -> Result<Self, ExperimentError>
    where
        F: FnMut(&mut PhaseDefinition),
    {
        let mut phases = self.phases.clone();
        for phase in &mut phases {
            f(phase);
        }
        Self::new(phases)
    }
}

/// Default number of comprehension-gate attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default inter-condition interval.
pub const DEFAULT_INTERVAL_MS: u64 = 5000;

fn image_stimuli() -> Vec<Stimulus> {
    vec![
        Stimulus::new("stimulus-a", 1.0, 100),
        Stimulus::new("stimulus-b", 0.85, 100),
        Stimulus::new("stimulus-c", 0.5, 100),
        Stimulus::new("stimulus-d", 0.1, 100),
    ]
}

fn color_stimuli() -> Vec<Stimulus> {
    vec![
        Stimulus::new("blue", 1.0, 50),
        Stimulus::new("orange", 0.5, 100),
    ]
}

/// Learning curve shown to every participant in the image block.
/// Success counts per ten trials track each stimulus's probability.
pub fn image_learning_curve() -> BTreeMap<String, Vec<bool>> {
    const T: bool = true;
    const F: bool = false;
    BTreeMap::from([
        ("stimulus-a".to_string(), vec![T, T, T, T, T, T, T, T, T, T]),
        ("stimulus-b".to_string(), vec![T, T, T, T, T, T, F, T, T, T]),
        ("stimulus-c".to_string(), vec![T, F, T, T, F, F, T, F, T, F]),
        ("stimulus-d".to_string(), vec![F, F, F, T, F, F, F, F, F, F]),
    ])
}

/// Get the standard phase definitions.
pub fn default_phases() -> Vec<PhaseDefinition> {
    vec![
        PhaseDefinition::new(PhaseId::Consent, PhaseKind::Consent, "Informed consent"),
        PhaseDefinition::new(PhaseId::Instructions, PhaseKind::Instructions, "Instructions"),
        PhaseDefinition::new(
            PhaseId::ForcedTrialsWithImages,
            PhaseKind::ForcedExposure,
            "Learn the buttons",
        )
        .with_trials(10)
        .with_stimuli(image_stimuli())
        .with_predetermined(image_learning_curve())
        .scored(),
        PhaseDefinition::new(
            PhaseId::ChoiceTrialsImages,
            PhaseKind::ComprehensionGate,
            "Which would you prefer?",
        )
        .with_stimuli(image_stimuli())
        .with_pairs(vec![
            ChoicePair::new("stimulus-a", "stimulus-c"),
            ChoicePair::new("stimulus-d", "stimulus-b"),
        ])
        .with_gate(DEFAULT_MAX_ATTEMPTS, PhaseId::ForcedTrialsWithImages)
        .with_condition("choice-trials-images")
        .with_numbering(TrialNumbering::Global),
        PhaseDefinition::new(PhaseId::Interval1, PhaseKind::Interval, "Short break")
            .with_delay(DEFAULT_INTERVAL_MS),
        PhaseDefinition::new(
            PhaseId::FirstDescChoice,
            PhaseKind::DescriptionChoice,
            "Which would you prefer?",
        )
        .with_stimuli(image_stimuli())
        .with_pairs(vec![ChoicePair::new("stimulus-a", "stimulus-b")])
        .with_condition("choice_a_vs_b"),
        PhaseDefinition::new(PhaseId::Interval2, PhaseKind::Interval, "Short break")
            .with_delay(DEFAULT_INTERVAL_MS),
        PhaseDefinition::new(
            PhaseId::ForcedBlueAndOrange,
            PhaseKind::ForcedExposure,
            "Learn the colors",
        )
        .with_trials(10)
        .with_stimuli(color_stimuli())
        .scored()
        .resetting_per_stimulus(),
        PhaseDefinition::new(PhaseId::Interval3, PhaseKind::Interval, "Short break")
            .with_delay(DEFAULT_INTERVAL_MS),
        PhaseDefinition::new(PhaseId::BlueOrangeTrials, PhaseKind::Choice, "Blue or orange?")
            .with_trials(40)
            .with_stimuli(color_stimuli())
            .with_pairs(vec![ChoicePair::new("blue", "orange")])
            .with_condition("blue vs orange")
            .scored(),
        PhaseDefinition::new(PhaseId::Interval4, PhaseKind::Interval, "Short break")
            .with_delay(DEFAULT_INTERVAL_MS),
        PhaseDefinition::new(
            PhaseId::FinalChoiceBlueOrange,
            PhaseKind::Choice,
            "One last color choice",
        )
        .with_trials(1)
        .with_stimuli(color_stimuli())
        .with_pairs(vec![ChoicePair::new("blue", "orange")])
        .with_condition("final-choice-blue-orange"),
        PhaseDefinition::new(PhaseId::Interval5, PhaseKind::Interval, "Short break")
            .with_delay(DEFAULT_INTERVAL_MS),
        PhaseDefinition::new(PhaseId::ChoiceTrials, PhaseKind::Choice, "Choice trial")
            .with_trials(1)
            .with_stimuli(vec![
                Stimulus::new("stimulus-a", 1.0, 100),
                Stimulus::new("stimulus-c", 0.5, 100),
            ])
            .with_pairs(vec![ChoicePair::new("stimulus-a", "stimulus-c")])
            .with_condition("final_probability_choice_p1_vs_p0.5")
            .scored(),
        PhaseDefinition::new(
            PhaseId::SecondDescChoice,
            PhaseKind::DescriptionChoice,
            "Which would you prefer?",
        )
        .with_stimuli(image_stimuli())
        .with_pairs(vec![ChoicePair::new("stimulus-a", "stimulus-b")])
        .with_condition("second-description-choice")
        .with_numbering(TrialNumbering::Global),
        PhaseDefinition::new(PhaseId::FinalSurvey, PhaseKind::Survey, "Final questions"),
        PhaseDefinition::new(PhaseId::Completion, PhaseKind::Completion, "Thank you"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_standard_table_is_valid() {
        let table = PhaseTable::new(default_phases()).unwrap();
        assert_eq!(table.len(), 17);
        assert_eq!(table.first(), PhaseId::Consent);
        assert_eq!(table.terminal(), PhaseId::Completion);
        assert_eq!(table.final_survey(), PhaseId::FinalSurvey);
    }

    #[test]
    fn test_standard_table_follows_id_order() {
        let table = PhaseTable::standard();
        let ids: Vec<PhaseId> = table.phases().iter().map(|p| p.id).collect();
        assert_eq!(ids, PhaseId::all());
    }

    #[test]
    fn test_next_walks_table_order() {
        let table = PhaseTable::standard();
        assert_eq!(table.next(PhaseId::Consent), Some(PhaseId::Instructions));
        assert_eq!(
            table.next(PhaseId::ChoiceTrialsImages),
            Some(PhaseId::Interval1)
        );
        assert_eq!(table.next(PhaseId::Completion), None);
    }

    #[test]
    fn test_phase_id_roundtrips_through_str() {
        for id in PhaseId::all() {
            let parsed: PhaseId = id.as_str().parse().unwrap();
            assert_eq!(parsed, *id);
            let json = serde_json::to_string(id).unwrap();
            assert_eq!(json, format!("\"{}\"", id.as_str()));
        }
        assert!("nonexistent".parse::<PhaseId>().is_err());
    }

    #[test]
    fn test_scored_phases_reset_and_show_score() {
        let table = PhaseTable::standard();
        let scored: Vec<PhaseId> = table
            .phases()
            .iter()
            .filter(|p| p.resets_score)
            .map(|p| p.id)
            .collect();
        assert_eq!(
            scored,
            vec![
                PhaseId::ForcedTrialsWithImages,
                PhaseId::ForcedBlueAndOrange,
                PhaseId::BlueOrangeTrials,
                PhaseId::ChoiceTrials,
            ]
        );
        assert!(table.phases().iter().all(|p| p.show_score == p.resets_score));
    }

    #[test]
    fn test_learning_curve_matches_probabilities() {
        let curve = image_learning_curve();
        let successes = |id: &str| curve[id].iter().filter(|o| **o).count();
        assert_eq!(successes("stimulus-a"), 10);
        assert_eq!(successes("stimulus-b"), 9);
        assert_eq!(successes("stimulus-c"), 5);
        assert_eq!(successes("stimulus-d"), 1);
    }

    #[test]
    fn test_better_of_prefers_higher_expected_value() {
        let table = PhaseTable::standard();
        let gate = table.require(PhaseId::ChoiceTrialsImages).unwrap();
        assert_eq!(gate.better_of(&gate.pairs[0]), Some("stimulus-a"));
        assert_eq!(gate.better_of(&gate.pairs[1]), Some("stimulus-b"));
    }

    #[test]
    fn test_better_of_borrows_from_the_pair() {
        let pair = ChoicePair::new("stimulus-d", "stimulus-b");
        let better = {
            let table = PhaseTable::standard();
            let gate = table.require(PhaseId::ChoiceTrialsImages).unwrap();
            gate.better_of(&pair)
        };
        assert_eq!(better, Some("stimulus-b"));
    }

    #[test]
    fn test_block_length_per_kind() {
        let table = PhaseTable::standard();
        let len = |id| table.require(id).unwrap().block_length();
        assert_eq!(len(PhaseId::ForcedTrialsWithImages), 40);
        assert_eq!(len(PhaseId::ChoiceTrialsImages), 2);
        assert_eq!(len(PhaseId::BlueOrangeTrials), 40);
        assert_eq!(len(PhaseId::FirstDescChoice), 1);
        assert_eq!(len(PhaseId::Consent), 0);
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let mut phases = default_phases();
        phases.insert(1, phases[1].clone());
        let err = PhaseTable::new(phases).unwrap_err();
        assert!(err.to_string().contains("appears twice"));
    }

    #[test]
    fn test_rejects_forward_repeat_target() {
        let mut phases = default_phases();
        phases[3].repeat_target = Some(PhaseId::FinalSurvey);
        let err = PhaseTable::new(phases).unwrap_err();
        assert!(err.to_string().contains("does not precede"));
    }

    #[test]
    fn test_rejects_probability_out_of_range() {
        let mut phases = default_phases();
        phases[2].stimuli[0].probability = 1.2;
        assert!(matches!(
            PhaseTable::new(phases),
            Err(ExperimentError::InvalidPhaseTable(_))
        ));
    }

    #[test]
    fn test_rejects_missing_completion() {
        let mut phases = default_phases();
        phases.pop();
        assert!(PhaseTable::new(phases).is_err());
    }

    #[test]
    fn test_rejects_short_predetermined_schedule() {
        let mut phases = default_phases();
        phases[2]
            .predetermined
            .insert("stimulus-a".to_string(), vec![true; 3]);
        let err = PhaseTable::new(phases).unwrap_err();
        assert!(err.to_string().contains("predetermined"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("phases.json");
        let table = PhaseTable::standard();
        table.save(&path).unwrap();

        let loaded = PhaseTable::load(&path).unwrap();
        assert_eq!(loaded, table);
    }

    #[test]
    fn test_load_rejects_invalid_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("phases.json");
        std::fs::write(&path, r#"{"phases": []}"#).unwrap();
        assert!(PhaseTable::load(&path).is_err());
    }

    #[test]
    fn test_load_or_standard_without_file() {
        let dir = tempdir().unwrap();
        let table = PhaseTable::load_or_standard(&dir.path().join("missing.json")).unwrap();
        assert_eq!(table.len(), 17);
    }

    #[test]
    fn test_map_definitions_revalidates() {
        let table = PhaseTable::standard();
        let relaxed = table
            .map_definitions(|p| {
                if p.kind == PhaseKind::Interval {
                    p.delay_ms = Some(0);
                }
            })
            .unwrap();
        assert_eq!(
            relaxed.require(PhaseId::Interval3).unwrap().delay_ms,
            Some(0)
        );

        let broken = table.map_definitions(|p| p.max_attempts = p.max_attempts.map(|_| 0));
        assert!(broken.is_err());
    }
}
