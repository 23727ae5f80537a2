//! Experiment configuration read from `<data-dir>/choicelab.toml`.
//!
//! Every section is optional. Values are layered file → environment → CLI:
//! the upload credentials can come from the environment so they never have
//! to be written to disk.
//!
//! # Configuration File Format
//!
//! ```toml
//! [experiment]
//! state_file = "experiment-data.json"
//!
//! [gate]
//! max_attempts = 5
//!
//! [timing]
//! interval_ms = 5000
//! outcome_display_ms = 1500
//! choice_pause_ms = 500
//! completion_countdown_secs = 10
//!
//! [upload]
//! base_url = "https://files.osf.io"
//! project_id = "abcde"
//!
//! [phases.overrides."forced-*"]
//! trials_required = 5
//!
//! [phases.overrides."blue-orange-trials"]
//! show_score = false
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::errors::ExperimentError;
use crate::phase::{PhaseId, PhaseKind, PhaseTable};

pub const CONFIG_FILE_NAME: &str = "choicelab.toml";

pub const ENV_UPLOAD_TOKEN: &str = "CHOICELAB_UPLOAD_TOKEN";
pub const ENV_PROJECT_ID: &str = "CHOICELAB_PROJECT_ID";
pub const ENV_NODE_ID: &str = "CHOICELAB_NODE_ID";
pub const ENV_UPLOAD_URL: &str = "CHOICELAB_UPLOAD_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSection {
    #[serde(default = "default_state_file")]
    pub state_file: String,
}

fn default_state_file() -> String {
    "experiment-data.json".to_string()
}

impl Default for ExperimentSection {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateSection {
    /// Overrides the attempt budget of every comprehension gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSection {
    /// Overrides the delay of every interval phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    #[serde(default = "default_outcome_display_ms")]
    pub outcome_display_ms: u64,
    #[serde(default = "default_choice_pause_ms")]
    pub choice_pause_ms: u64,
    #[serde(default = "default_completion_countdown_secs")]
    pub completion_countdown_secs: u64,
}

fn default_outcome_display_ms() -> u64 {
    1500
}

fn default_choice_pause_ms() -> u64 {
    500
}

fn default_completion_countdown_secs() -> u64 {
    10
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            interval_ms: None,
            outcome_display_ms: default_outcome_display_ms(),
            choice_pause_ms: default_choice_pause_ms(),
            completion_countdown_secs: default_completion_countdown_secs(),
        }
    }
}

impl TimingSection {
    pub fn outcome_display(&self) -> Duration {
        Duration::from_millis(self.outcome_display_ms)
    }

    pub fn choice_pause(&self) -> Duration {
        Duration::from_millis(self.choice_pause_ms)
    }

    pub fn completion_countdown(&self) -> Duration {
        Duration::from_secs(self.completion_countdown_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Storage node, when it differs from the project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Prefer `CHOICELAB_UPLOAD_TOKEN` over writing the token here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

fn default_base_url() -> String {
    "https://files.osf.io".to_string()
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            project_id: None,
            node_id: None,
            token: None,
        }
    }
}

/// Upload settings after environment layering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSettings {
    pub base_url: String,
    pub project_id: Option<String>,
    pub node_id: Option<String>,
    pub token: Option<String>,
}

impl UploadSettings {
    /// The node files are stored under: the node id, else the project id.
    pub fn target_node(&self) -> Option<&str> {
        self.node_id
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.project_id.as_deref().filter(|p| !p.trim().is_empty()))
    }

    pub fn is_configured(&self) -> bool {
        self.target_node().is_some() && self.token.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// Per-phase overrides for phases whose id matches the pattern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resets_score: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trials_required: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_score: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhasesSection {
    /// Glob pattern (e.g. "interval-*") to override.
    #[serde(default)]
    pub overrides: BTreeMap<String, PhaseOverride>,
}

/// The complete `choicelab.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChoicelabToml {
    #[serde(default)]
    pub experiment: ExperimentSection,
    #[serde(default)]
    pub gate: GateSection,
    #[serde(default)]
    pub timing: TimingSection,
    #[serde(default)]
    pub upload: UploadSection,
    #[serde(default)]
    pub phases: PhasesSection,
}

impl ChoicelabToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse choicelab.toml")
    }

    /// Load `choicelab.toml` from the data directory, or defaults when absent.
    pub fn load_or_default(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize choicelab.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Upload settings with environment variables taking precedence.
    pub fn upload_settings(&self) -> UploadSettings {
        self.upload_settings_from(|key| std::env::var(key).ok())
    }

    pub fn upload_settings_from<F>(&self, lookup: F) -> UploadSettings
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        UploadSettings {
            base_url: env(ENV_UPLOAD_URL).unwrap_or_else(|| self.upload.base_url.clone()),
            project_id: env(ENV_PROJECT_ID).or_else(|| self.upload.project_id.clone()),
            node_id: env(ENV_NODE_ID).or_else(|| self.upload.node_id.clone()),
            token: env(ENV_UPLOAD_TOKEN).or_else(|| self.upload.token.clone()),
        }
    }

    /// Apply the gate, timing and per-phase overrides to `table`.
    /// The result is validated like any other table.
    pub fn tune(&self, table: &PhaseTable) -> Result<PhaseTable, ExperimentError> {
        table.map_definitions(|phase| {
            match phase.kind {
                PhaseKind::ComprehensionGate => {
                    if let Some(max) = self.gate.max_attempts {
                        phase.max_attempts = Some(max);
                    }
                }
                PhaseKind::Interval => {
                    if let Some(ms) = self.timing.interval_ms {
                        phase.delay_ms = Some(ms);
                    }
                }
                _ => {}
            }

            for (pattern, overrides) in &self.phases.overrides {
                if !pattern_matches(pattern, phase.id.as_str()) {
                    continue;
                }
                if let Some(resets) = overrides.resets_score {
                    phase.resets_score = resets;
                }
                if let Some(trials) = overrides.trials_required {
                    phase.trials_required = trials;
                }
                if let Some(show) = overrides.show_score {
                    phase.show_score = show;
                }
            }
        })
    }

    /// Check the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.gate.max_attempts == Some(0) {
            warnings.push("gate.max_attempts must be at least 1".to_string());
        }

        let url = &self.upload.base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            warnings.push(format!(
                "upload.base_url '{}' should start with http:// or https://",
                url
            ));
        }

        if self.upload.token.is_some() {
            warnings.push(format!(
                "upload.token is stored in plain text; consider {} instead",
                ENV_UPLOAD_TOKEN
            ));
        }

        for (pattern, overrides) in &self.phases.overrides {
            let matched = PhaseId::all()
                .iter()
                .any(|id| pattern_matches(pattern, id.as_str()));
            if !matched {
                warnings.push(format!("Override pattern '{}' matches no phase", pattern));
            }
            if overrides.trials_required == Some(0) {
                warnings.push(format!(
                    "Override '{}' sets trials_required to 0",
                    pattern
                ));
            }
        }

        if self.experiment.state_file.trim().is_empty() {
            warnings.push("experiment.state_file is empty".to_string());
        }

        warnings
    }
}

/// Case-insensitive glob match of a phase id.
/// `*` matches any run of characters and `?` exactly one.
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let name: Vec<char> = name.to_lowercase().chars().collect();
    glob_match(&pattern, &name)
}

fn glob_match(pattern: &[char], text: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('*', rest)) => (0..=text.len()).any(|skip| glob_match(rest, &text[skip..])),
        Some(('?', rest)) => !text.is_empty() && glob_match(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && glob_match(rest, &text[1..]),
    }
}
