//! `choicelab init`: create the data directory.
//!
//! ```text
//! .choicelab/
//! ├── choicelab.toml   # Experiment configuration (defaults written out)
//! ├── phases.json      # The phase table, editable per study
//! ├── logs/            # Tracing output
//! └── exports/         # Local dataset copies and failed-upload fallbacks
//! ```
//!
//! Existing files are never overwritten, so `init` can be re-run to repair a
//! partial directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::experiment_config::ChoicelabToml;
use crate::phase::PhaseTable;

#[derive(Debug)]
pub struct InitResult {
    pub data_dir: PathBuf,
    /// Neither the config file nor the phase table existed before.
    pub created: bool,
    /// Files written by this call.
    pub written: Vec<PathBuf>,
}

pub fn init_data_dir(config: &Config) -> Result<InitResult> {
    let created = !config.config_file.exists() && !config.phases_file.exists();
    config.ensure_directories()?;

    let mut written = Vec::new();
    if !config.config_file.exists() {
        ChoicelabToml::default().save(&config.config_file)?;
        written.push(config.config_file.clone());
    }
    if !config.phases_file.exists() {
        PhaseTable::standard()
            .save(&config.phases_file)
            .with_context(|| format!("Failed to write {}", config.phases_file.display()))?;
        written.push(config.phases_file.clone());
    }

    Ok(InitResult {
        data_dir: config.data_dir.clone(),
        created,
        written,
    })
}

/// Whether `phases.json` exists and parses as a valid table.
pub fn has_phases(data_dir: &Path) -> bool {
    let phases_file = data_dir.join("phases.json");
    phases_file.exists() && PhaseTable::load(&phases_file).is_ok()
}
