//! Interactive participant session command.

use anyhow::Result;
use std::sync::Arc;

use super::super::Cli;
use choicelab::config::Config;

pub async fn cmd_run(cli: &Cli, config: &Config, seed: Option<u64>) -> Result<()> {
    use choicelab::export::upload::{OsfUploader, UploadOutcome, Uploader};
    use choicelab::orchestrator::{
        ExperimentRunner, LoadOutcome, RunOutcome, Session, StateStore, SystemClock,
    };
    use choicelab::sampler::{OutcomeSampler, SeededSampler, ThreadSampler};
    use choicelab::ui::TerminalUi;
    use console::style;
    use dialoguer::Confirm;
    use tracing::{info, warn};

    config.ensure_directories()?;
    let table = config.phase_table()?;
    let store = StateStore::new(config.state_file.clone());

    if !cli.yes
        && let Ok(Some(saved)) = store.load()
    {
        let resume = Confirm::new()
            .with_prompt(format!(
                "Resume participant {} at {} ({} trials)?",
                saved.participant_id(),
                saved.current_phase(),
                saved.trials().len()
            ))
            .default(true)
            .interact();
        if !resume_answer(resume) {
            info!(participant = %saved.participant_id(), "Discarding saved session");
            store.clear()?;
        }
    }

    let sampler: Box<dyn OutcomeSampler> = match seed {
        Some(seed) => Box::new(SeededSampler::new(seed)),
        None => Box::new(ThreadSampler),
    };
    let (session, outcome) = Session::open(table, store, sampler, Box::new(SystemClock))?;
    match &outcome {
        LoadOutcome::Fresh => {}
        LoadOutcome::Restored => println!(
            "{}",
            style(format!(
                "Resuming at {}",
                session.state().current_phase()
            ))
            .dim()
        ),
        LoadOutcome::Recovered { backup } => println!(
            "{}",
            style(format!(
                "The saved session could not be read and was moved to {}. Starting over.",
                backup.display()
            ))
            .yellow()
        ),
    }

    let settings = config.upload_settings();
    if !settings.is_configured() {
        warn!("Upload is not configured; datasets will only be saved locally");
        println!(
            "{}",
            style(format!(
                "Upload is not configured. Datasets will be saved to {}",
                config.export_dir.display()
            ))
            .dim()
        );
    }
    let uploader: Arc<dyn Uploader> = Arc::new(OsfUploader::new(settings));

    let mut runner = ExperimentRunner::new(
        session,
        TerminalUi::new(),
        uploader,
        config.export_dir.clone(),
        config.toml().timing.clone(),
    );

    match runner.run().await? {
        RunOutcome::Withdrawn => {
            println!();
            println!("Session paused. Run `choicelab run` to resume.");
        }
        RunOutcome::Completed(UploadOutcome::Lost { error, .. }) => {
            anyhow::bail!(
                "The dataset could not be uploaded or saved ({}). The session state was kept at {}",
                error,
                config.state_file.display()
            );
        }
        RunOutcome::Completed(_) => {}
    }

    Ok(())
}

/// The participant's answer to the resume prompt. A prompt that cannot be
/// shown keeps the saved session.
fn resume_answer(answer: dialoguer::Result<bool>) -> bool {
    match answer {
        Ok(resume) => resume,
        Err(err) => {
            tracing::warn!(error = %err, "Resume prompt failed; keeping the saved session");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_answer_follows_participant() {
        assert!(resume_answer(Ok(true)));
        assert!(!resume_answer(Ok(false)));
    }

    #[test]
    fn test_failed_resume_prompt_keeps_session() {
        let err = dialoguer::Error::IO(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "not a terminal",
        ));
        assert!(resume_answer(Err(err)));
    }
}
