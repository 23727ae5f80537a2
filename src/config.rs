use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::experiment_config::{CONFIG_FILE_NAME, ChoicelabToml, UploadSettings};
use crate::phase::PhaseTable;

pub const DEFAULT_DATA_DIR: &str = ".choicelab";

/// Runtime configuration for choicelab.
///
/// Resolves every path under the data directory and carries the parsed
/// `choicelab.toml`.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub config_file: PathBuf,
    pub phases_file: PathBuf,
    pub state_file: PathBuf,
    pub log_dir: PathBuf,
    pub export_dir: PathBuf,
    pub verbose: bool,
    toml: ChoicelabToml,
}

impl Config {
    /// Build the configuration for `data_dir`, defaulting to `./.choicelab`.
    pub fn new(data_dir: Option<PathBuf>, verbose: bool) -> Result<Self> {
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => std::env::current_dir()
                .context("Failed to get current directory")?
                .join(DEFAULT_DATA_DIR),
        };
        let toml = ChoicelabToml::load_or_default(&data_dir)?;
        Ok(Self::with_toml(data_dir, toml, verbose))
    }

    pub fn with_toml(data_dir: PathBuf, toml: ChoicelabToml, verbose: bool) -> Self {
        Self {
            config_file: data_dir.join(CONFIG_FILE_NAME),
            phases_file: data_dir.join("phases.json"),
            state_file: data_dir.join(&toml.experiment.state_file),
            log_dir: data_dir.join("logs"),
            export_dir: data_dir.join("exports"),
            data_dir,
            verbose,
            toml,
        }
    }

    pub fn toml(&self) -> &ChoicelabToml {
        &self.toml
    }

    pub fn upload_settings(&self) -> UploadSettings {
        self.toml.upload_settings()
    }

    /// The phase table for this run: `phases.json` when present, else the
    /// standard table, with the config overrides applied.
    pub fn phase_table(&self) -> Result<Arc<PhaseTable>> {
        let base = PhaseTable::load_or_standard(&self.phases_file)?;
        let tuned = self
            .toml
            .tune(&base)
            .context("choicelab.toml overrides produce an invalid phase table")?;
        Ok(Arc::new(tuned))
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir).context("Failed to create data directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        std::fs::create_dir_all(&self.export_dir).context("Failed to create export directory")?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.config_file.exists()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::PhaseId;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_paths_live_under_data_dir() {
        let dir = tempdir().unwrap();
        let config = Config::new(Some(dir.path().to_path_buf()), false).unwrap();
        assert_eq!(config.state_file, dir.path().join("experiment-data.json"));
        assert_eq!(config.phases_file, dir.path().join("phases.json"));
        assert_eq!(config.log_dir, dir.path().join("logs"));
        assert!(!config.is_initialized());
    }

    #[test]
    fn test_state_file_name_from_toml() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[experiment]\nstate_file = \"pilot.json\"\n",
        )
        .unwrap();
        let config = Config::new(Some(dir.path().to_path_buf()), true).unwrap();
        assert_eq!(config.state_file, dir.path().join("pilot.json"));
        assert!(config.verbose);
        assert!(config.is_initialized());
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("nested").join(".choicelab");
        let config = Config::new(Some(data_dir.clone()), false).unwrap();
        config.ensure_directories().unwrap();
        assert!(config.log_dir.exists());
        assert!(config.export_dir.exists());
    }

    #[test]
    fn test_phase_table_applies_overrides() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[timing]\ninterval_ms = 0\n",
        )
        .unwrap();
        let config = Config::new(Some(dir.path().to_path_buf()), false).unwrap();
        let table = config.phase_table().unwrap();
        assert_eq!(table.require(PhaseId::Interval1).unwrap().delay_ms, Some(0));
    }

    #[test]
    fn test_phase_table_reads_phases_json() {
        let dir = tempdir().unwrap();
        let config = Config::new(Some(dir.path().to_path_buf()), false).unwrap();
        let custom = PhaseTable::standard()
            .map_definitions(|p| {
                if p.id == PhaseId::BlueOrangeTrials {
                    p.trials_required = 6;
                }
            })
            .unwrap();
        custom.save(&config.phases_file).unwrap();

        let table = config.phase_table().unwrap();
        assert_eq!(
            table.require(PhaseId::BlueOrangeTrials).unwrap().trials_required,
            6
        );
    }
}
