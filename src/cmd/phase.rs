//! Session status, phase listing and reset commands.

use anyhow::Result;
use choicelab::config::Config;

pub fn cmd_phases(config: &Config) -> Result<()> {
    let table = config.phase_table()?;

    println!();
    if config.phases_file.exists() {
        println!("Phases loaded from: {}", config.phases_file.display());
    } else {
        println!("Using the standard phase table");
    }
    println!();
    println!(
        "{:<4} {:<28} {:<20} {:<7} Notes",
        "#", "Phase", "Kind", "Trials"
    );
    println!(
        "{:<4} {:<28} {:<20} {:<7} -----",
        "--", "----------------------------", "--------------------", "------"
    );

    for (index, phase) in table.phases().iter().enumerate() {
        let mut notes = Vec::new();
        if phase.resets_score {
            notes.push("resets score".to_string());
        }
        if phase.resets_score_per_stimulus {
            notes.push("resets per button".to_string());
        }
        if let (Some(max), Some(target)) = (phase.max_attempts, phase.repeat_target) {
            notes.push(format!("{} attempts, repeats {}", max, target));
        }
        if let Some(delay) = phase.delay_ms {
            notes.push(format!("{} ms", delay));
        }
        let trials = match phase.block_length() {
            0 => "-".to_string(),
            n => n.to_string(),
        };
        println!(
            "{:<4} {:<28} {:<20} {:<7} {}",
            index + 1,
            phase.id.as_str(),
            format!("{:?}", phase.kind),
            trials,
            console::style(notes.join(", ")).dim()
        );
    }
    println!();
    println!("{} phases", table.len());
    println!();
    Ok(())
}

pub fn cmd_status(config: &Config) -> Result<()> {
    use choicelab::orchestrator::StateStore;

    println!();
    println!("choicelab Status");
    println!("================");
    println!();

    if config.is_initialized() {
        println!("Data directory: {}", config.data_dir.display());
    } else {
        println!("Data directory: Not initialized (run 'choicelab init')");
    }
    let settings = config.upload_settings();
    println!(
        "Upload:         {}",
        if settings.is_configured() {
            "Configured"
        } else {
            "Not configured (datasets are saved locally)"
        }
    );
    println!();

    let store = StateStore::new(config.state_file.clone());
    match store.load()? {
        None => {
            println!("Session: None in progress");
            println!();
            println!("Run 'choicelab run' to start a session.");
        }
        Some(state) => {
            println!("Session:");
            println!("  Participant:    {}", state.participant_id());
            println!("  Phase:          {}", state.current_phase());
            println!("  Trials:         {}", state.trials().len());
            println!("  Score:          {}", state.total_score());
            println!("  Gate attempts:  {}", state.gate_attempts());
            println!(
                "  Started:        {}",
                state.created_at().format("%Y-%m-%d %H:%M:%S")
            );
            if let Some(done) = state.completed_at() {
                println!("  Completed:      {}", done.format("%Y-%m-%d %H:%M:%S"));
            }
            if state.upload_triggered() {
                println!("  Upload:         triggered");
            }
        }
    }
    println!();
    Ok(())
}

pub fn cmd_reset(config: &Config, force: bool) -> Result<()> {
    use choicelab::orchestrator::StateStore;
    use dialoguer::Confirm;

    let store = StateStore::new(config.state_file.clone());
    if !store.exists() {
        println!("Nothing to reset");
        return Ok(());
    }

    if !force {
        let confirm = Confirm::new()
            .with_prompt("This discards the saved session and its trials. Are you sure?")
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    store.clear()?;
    tracing::info!(state_file = %config.state_file.display(), "Saved session discarded");
    println!("Reset complete");
    Ok(())
}
