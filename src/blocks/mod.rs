//! Per-phase participant logic.
//!
//! Each block kind turns "where are we in the block" plus the participant's
//! action into a `TrialInput`. Nothing here touches the state directly; the
//! session records the returned input and asks for the next step.

pub mod survey;

use crate::errors::ExperimentError;
use crate::orchestrator::state::TrialInput;
use crate::phase::{ChoicePair, PhaseDefinition, PhaseKind, Stimulus, TrialNumbering};
use crate::sampler::OutcomeSampler;

/// The next thing a trial-recording phase asks of the participant.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockStep {
    /// Press the only available button.
    Forced {
        stimulus: Stimulus,
        /// Zero-based position within this stimulus's run.
        slot: u32,
        stimulus_index: usize,
        /// This press finishes the stimulus's run.
        last_of_stimulus: bool,
    },
    /// Answer one comprehension-check pair.
    Gate { pair: ChoicePair, index: usize },
    /// Pick one side of a pair and see the outcome.
    Choice { pair: ChoicePair, trial_number: u32 },
    /// Pick one side of a described pair, without feedback.
    Description { pair: ChoicePair },
    /// The block is finished.
    Done,
}

/// Work out the next step of a block after `recorded` trials in this visit.
pub fn next_step(definition: &PhaseDefinition, recorded: usize) -> BlockStep {
    let recorded = recorded as u32;
    match definition.kind {
        PhaseKind::ForcedExposure => {
            let per_stimulus = definition.trials_required.max(1);
            let stimulus_index = (recorded / per_stimulus) as usize;
            let slot = recorded % per_stimulus;
            match definition.stimuli.get(stimulus_index) {
                Some(stimulus) => BlockStep::Forced {
                    stimulus: stimulus.clone(),
                    slot,
                    stimulus_index,
                    last_of_stimulus: slot + 1 == per_stimulus,
                },
                None => BlockStep::Done,
            }
        }
        PhaseKind::ComprehensionGate => match definition.pairs.get(recorded as usize) {
            Some(pair) => BlockStep::Gate {
                pair: pair.clone(),
                index: recorded as usize,
            },
            None => BlockStep::Done,
        },
        PhaseKind::Choice if recorded < definition.trials_required => {
            match definition.pairs.first() {
                Some(pair) => BlockStep::Choice {
                    pair: pair.clone(),
                    trial_number: recorded + 1,
                },
                None => BlockStep::Done,
            }
        }
        PhaseKind::DescriptionChoice if recorded == 0 => match definition.pairs.first() {
            Some(pair) => BlockStep::Description { pair: pair.clone() },
            None => BlockStep::Done,
        },
        _ => BlockStep::Done,
    }
}

fn base_input(definition: &PhaseDefinition, trial_number: u32) -> TrialInput {
    let input = TrialInput::new(definition.id);
    match definition.numbering {
        TrialNumbering::PerPhase => input.numbered(trial_number),
        TrialNumbering::Global => input,
    }
}

fn chosen<'a>(
    definition: &'a PhaseDefinition,
    pair: &ChoicePair,
    choice: &str,
) -> Result<&'a Stimulus, ExperimentError> {
    let unexpected = || ExperimentError::UnexpectedResponse {
        phase: definition.id,
        response: choice.to_string(),
    };
    if !pair.contains(choice) {
        return Err(unexpected());
    }
    definition.stimulus(choice).ok_or_else(unexpected)
}

/// One press in a forced-exposure block. The outcome comes from the phase's
/// predetermined schedule when it has one, otherwise from the sampler.
pub fn forced_trial(
    definition: &PhaseDefinition,
    stimulus: &Stimulus,
    slot: u32,
    sampler: &mut dyn OutcomeSampler,
) -> Result<TrialInput, ExperimentError> {
    let outcome = match definition.predetermined_outcome(&stimulus.id, slot) {
        Some(fixed) => fixed,
        None => sampler.sample(stimulus.probability)?,
    };
    let condition = definition
        .condition
        .clone()
        .unwrap_or_else(|| format!("forced_{}", stimulus.id));

    Ok(base_input(definition, slot + 1)
        .condition(condition)
        .stimulus(stimulus.id.as_str())
        .choice(stimulus.id.as_str())
        .outcome(outcome)
        .points(if outcome { stimulus.points } else { 0 }))
}

/// One answer in a comprehension check. The outcome is sampled for the
/// record but earns no points.
pub fn gate_trial(
    definition: &PhaseDefinition,
    pair: &ChoicePair,
    index: usize,
    choice: &str,
    sampler: &mut dyn OutcomeSampler,
) -> Result<TrialInput, ExperimentError> {
    let stimulus = chosen(definition, pair, choice)?;
    let outcome = sampler.sample(stimulus.probability)?;
    let mut input = base_input(definition, index as u32 + 1)
        .stimulus(format!("choice_{}_vs_{}", pair.left, pair.right))
        .choice(choice)
        .outcome(outcome)
        .points(0);
    if let Some(condition) = &definition.condition {
        input = input.condition(condition.as_str());
    }
    Ok(input)
}

/// One trial of a repeated or single choice block.
pub fn choice_trial(
    definition: &PhaseDefinition,
    pair: &ChoicePair,
    trial_number: u32,
    choice: &str,
    sampler: &mut dyn OutcomeSampler,
) -> Result<TrialInput, ExperimentError> {
    let stimulus = chosen(definition, pair, choice)?;
    let outcome = sampler.sample(stimulus.probability)?;
    let mut input = base_input(definition, trial_number)
        .stimulus(stimulus.id.as_str())
        .choice(choice)
        .outcome(outcome)
        .points(if outcome { stimulus.points } else { 0 });
    if let Some(condition) = &definition.condition {
        input = input.condition(condition.as_str());
    }
    Ok(input)
}

/// The single answer of a description-based choice. No outcome is drawn.
pub fn description_trial(
    definition: &PhaseDefinition,
    pair: &ChoicePair,
    choice: &str,
) -> Result<TrialInput, ExperimentError> {
    chosen(definition, pair, choice)?;
    let other = pair.other(choice).unwrap_or_default();
    let mut input = base_input(definition, 1)
        .stimulus(format!("{}-vs-{}", choice, other))
        .choice(choice)
        .points(0);
    if let Some(condition) = &definition.condition {
        input = input.condition(condition.as_str());
    }
    Ok(input)
}
