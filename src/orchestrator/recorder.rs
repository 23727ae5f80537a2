//! Trial recording.
//!
//! The recorder is the only writer of `ExperimentState::trials` and
//! `total_score`. Persisting the result is the caller's job.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use tracing::debug;

use crate::errors::ExperimentError;
use crate::orchestrator::state::{ExperimentState, TrialInput, TrialRecord};
use crate::phase::{PhaseKind, PhaseTable};

/// Source of trial timestamps in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_ms(&self) -> i64 {
        (**self).now_ms()
    }
}

pub struct TrialRecorder {
    table: Arc<PhaseTable>,
    clock: Box<dyn Clock>,
}

impl TrialRecorder {
    pub fn new(table: Arc<PhaseTable>, clock: Box<dyn Clock>) -> Self {
        Self { table, clock }
    }

    /// Append one trial to `state`.
    ///
    /// Timestamps are strictly increasing: when the clock has not moved past
    /// the last trial, the new one is stamped one millisecond later. A missing
    /// trial number is assigned from the global sequence (`trials.len() + 1`).
    pub fn record(
        &mut self,
        state: &mut ExperimentState,
        input: TrialInput,
    ) -> Result<TrialRecord, ExperimentError> {
        self.check(&input)?;

        let now = self.clock.now_ms();
        let timestamp = match state.last_timestamp() {
            Some(last) if now <= last => last + 1,
            _ => now,
        };
        let trial_number = input
            .trial_number
            .unwrap_or(state.trials.len() as u32 + 1);

        let record = TrialRecord {
            phase: input.phase,
            trial_number,
            condition: input.condition,
            stimulus: input.stimulus,
            choice: input.choice,
            outcome: input.outcome,
            points: input.points,
            question_type: input.question_type,
            timestamp,
        };

        state.total_score += record.points.unwrap_or(0);
        state.trials.push(record.clone());

        debug!(
            phase = %record.phase,
            trial = record.trial_number,
            points = record.points.unwrap_or(0),
            total = state.total_score,
            "Recorded trial"
        );
        Ok(record)
    }

    fn check(&self, input: &TrialInput) -> Result<(), ExperimentError> {
        let definition = self.table.get(input.phase).ok_or_else(|| {
            ExperimentError::InvalidInput(format!("phase {} is not in the table", input.phase))
        })?;

        if input.trial_number == Some(0) {
            return Err(ExperimentError::InvalidInput(
                "trial numbers start at 1".to_string(),
            ));
        }

        let fields = [
            ("condition", &input.condition),
            ("stimulus", &input.stimulus),
            ("choice", &input.choice),
        ];
        for (name, value) in fields {
            if matches!(value, Some(v) if v.trim().is_empty()) {
                return Err(ExperimentError::InvalidInput(format!("{} is empty", name)));
            }
        }

        if input.question_type.is_some() && definition.kind != PhaseKind::Survey {
            return Err(ExperimentError::InvalidInput(format!(
                "question type given for non-survey phase {}",
                input.phase
            )));
        }
        Ok(())
    }
}
