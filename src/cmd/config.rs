//! Configuration view and validation commands (`choicelab config`).

use anyhow::Result;

use super::super::ConfigCommands;
use choicelab::config::Config;

pub fn cmd_config(config: &Config, command: Option<ConfigCommands>) -> Result<()> {
    use choicelab::experiment_config::ChoicelabToml;

    let config_path = &config.config_file;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("choicelab Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No choicelab.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            let toml = config.toml();
            println!("[experiment]");
            println!("  state_file = \"{}\"", toml.experiment.state_file);
            println!();

            println!("[gate]");
            match toml.gate.max_attempts {
                Some(max) => println!("  max_attempts = {}", max),
                None => println!("  max_attempts = (per phase table)"),
            }
            println!();

            println!("[timing]");
            match toml.timing.interval_ms {
                Some(ms) => println!("  interval_ms = {}", ms),
                None => println!("  interval_ms = (per phase table)"),
            }
            println!("  outcome_display_ms = {}", toml.timing.outcome_display_ms);
            println!("  choice_pause_ms = {}", toml.timing.choice_pause_ms);
            println!(
                "  completion_countdown_secs = {}",
                toml.timing.completion_countdown_secs
            );
            println!();

            if !toml.phases.overrides.is_empty() {
                println!("[phases.overrides]");
                for (pattern, overrides) in &toml.phases.overrides {
                    println!("  \"{}\":", pattern);
                    if let Some(resets) = overrides.resets_score {
                        println!("    resets_score = {}", resets);
                    }
                    if let Some(trials) = overrides.trials_required {
                        println!("    trials_required = {}", trials);
                    }
                    if let Some(show) = overrides.show_score {
                        println!("    show_score = {}", show);
                    }
                }
                println!();
            }

            // Token is never printed.
            let settings = config.upload_settings();
            println!("Effective upload settings (with env overrides):");
            println!("  base_url = \"{}\"", settings.base_url);
            println!(
                "  target = {}",
                settings.target_node().unwrap_or("(not set)")
            );
            println!(
                "  token = {}",
                if settings.token.is_some() { "(set)" } else { "(not set)" }
            );
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No choicelab.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = config.toml().validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            config.phase_table()?;
            println!("Phase table is valid.");
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("choicelab.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&config.data_dir)?;
            ChoicelabToml::default().save(config_path)?;

            println!("Created choicelab.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [gate] max_attempts");
            println!("  - [timing] interval_ms, outcome_display_ms, completion_countdown_secs");
            println!("  - [upload] base_url, project_id, node_id");
            println!("  - [phases.overrides.\"pattern-*\"] for phase-specific settings");
            println!();
        }
    }

    Ok(())
}
