//! Dataset serialization.
//!
//! Two CSV layouts exist: `Full` carries every trial field and is used for
//! manual exports; `Upload` drops the outcome column and is what the storage
//! provider receives.

pub mod upload;

use std::borrow::Cow;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat};

use crate::orchestrator::state::{ExperimentState, TrialRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvLayout {
    Full,
    Upload,
}

impl CsvLayout {
    pub fn header(&self) -> &'static [&'static str] {
        match self {
            CsvLayout::Full => &[
                "participant_id",
                "phase",
                "trial_number",
                "condition",
                "stimulus",
                "choice",
                "outcome",
                "points",
                "timestamp",
            ],
            CsvLayout::Upload => &[
                "participant_id",
                "phase",
                "trial_number",
                "condition",
                "stimulus",
                "choice",
                "points",
                "timestamp",
            ],
        }
    }
}

/// A header plus one row of raw (unescaped) cells per trial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabularRows {
    pub header: Vec<&'static str>,
    pub rows: Vec<Vec<String>>,
}

impl TabularRows {
    pub fn to_csv(&self) -> String {
        let mut out = self.header.join(",");
        out.push('\n');
        for row in &self.rows {
            let line: Vec<Cow<'_, str>> = row.iter().map(|cell| escape_field(cell)).collect();
            out.push_str(&line.join(","));
            out.push('\n');
        }
        out
    }
}

/// Rows in the upload layout.
pub fn serialize(state: &ExperimentState) -> TabularRows {
    serialize_with(state, CsvLayout::Upload)
}

pub fn serialize_with(state: &ExperimentState, layout: CsvLayout) -> TabularRows {
    TabularRows {
        header: layout.header().to_vec(),
        rows: state
            .trials()
            .iter()
            .map(|trial| row(state.participant_id(), trial, layout))
            .collect(),
    }
}

fn row(participant_id: &str, trial: &TrialRecord, layout: CsvLayout) -> Vec<String> {
    let text = |value: &Option<String>| value.clone().unwrap_or_default();
    let mut cells = vec![
        participant_id.to_string(),
        trial.phase.to_string(),
        trial.trial_number.to_string(),
        text(&trial.condition),
        text(&trial.stimulus),
        text(&trial.choice),
    ];
    if layout == CsvLayout::Full {
        cells.push(trial.outcome.map(|o| o.to_string()).unwrap_or_default());
    }
    cells.push(trial.points.unwrap_or(0).to_string());
    cells.push(format_timestamp(trial.timestamp));
    cells
}

pub fn to_csv(state: &ExperimentState, layout: CsvLayout) -> String {
    serialize_with(state, layout).to_csv()
}

/// The whole state as pretty-printed JSON.
pub fn to_json(state: &ExperimentState) -> Result<String> {
    serde_json::to_string_pretty(state).context("Failed to serialize experiment data")
}

/// Quote a CSV cell when it contains a delimiter, quote or line break.
/// Inner quotes are doubled.
pub fn escape_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Epoch milliseconds as RFC 3339 UTC with millisecond precision.
pub fn format_timestamp(ms: i64) -> String {
    match DateTime::from_timestamp_millis(ms) {
        Some(at) => at.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => ms.to_string(),
    }
}

/// `experiment-data-<participant>-<YYYY-MM-DD>.csv`
pub fn export_file_name(participant_id: &str, date: NaiveDate) -> String {
    format!(
        "experiment-data-{}-{}.csv",
        participant_id,
        date.format("%Y-%m-%d")
    )
}
