//! Dataset export and manual upload commands.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;

use super::super::ExportFormat;
use choicelab::config::Config;
use choicelab::export::CsvLayout;
use choicelab::orchestrator::{ExperimentState, StateStore};

fn saved_state(config: &Config) -> Result<ExperimentState> {
    StateStore::new(config.state_file.clone())
        .load()?
        .with_context(|| {
            format!(
                "No experiment data found at {}",
                config.state_file.display()
            )
        })
}

pub fn cmd_export(
    config: &Config,
    format: ExportFormat,
    layout: CsvLayout,
    output: Option<&Path>,
) -> Result<()> {
    use choicelab::export::{serialize_with, to_json};

    let state = saved_state(config)?;
    let content = match format {
        ExportFormat::Csv => serialize_with(&state, layout).to_csv(),
        ExportFormat::Json => to_json(&state)?,
    };

    match output {
        Some(path) => {
            std::fs::write(path, &content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "Exported {} trials to {}",
                state.trials().len(),
                path.display()
            );
        }
        None => print!("{}", content),
    }
    Ok(())
}

pub async fn cmd_upload(config: &Config) -> Result<()> {
    use choicelab::export::upload::{OsfUploader, UploadOutcome, UploadRequest, upload_with_fallback};

    let state = saved_state(config)?;
    let request = UploadRequest::from_state(&state, Utc::now().date_naive());
    let uploader = OsfUploader::new(config.upload_settings());

    match upload_with_fallback(&uploader, &request, &config.export_dir).await {
        UploadOutcome::Uploaded(receipt) => {
            println!("Uploaded {}", receipt.file_name);
            if let Some(url) = receipt.download_url {
                println!("Download: {}", url);
            }
            Ok(())
        }
        UploadOutcome::SavedLocally { path, error } => {
            anyhow::bail!("{}; dataset saved to {}", error, path.display())
        }
        UploadOutcome::Lost {
            error,
            fallback_error,
        } => Err(fallback_error.context(format!("{}; the local copy also failed", error))),
        UploadOutcome::Deferred { path } => {
            println!("Saved to {}", path.display());
            Ok(())
        }
    }
}
