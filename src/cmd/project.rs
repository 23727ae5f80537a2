//! Data directory initialization command.

use anyhow::Result;
use choicelab::config::Config;

pub fn cmd_init(config: &Config) -> Result<()> {
    use choicelab::init::init_data_dir;

    let was_initialized = config.is_initialized();
    let result = init_data_dir(config)?;

    if result.created {
        println!("Initialized choicelab at {}", result.data_dir.display());
        println!();
        println!("Created directory structure:");
        println!("  .choicelab/");
        println!("  ├── choicelab.toml   # Experiment configuration");
        println!("  ├── phases.json      # Phase table (edit to adapt the study)");
        println!("  ├── logs/            # Log files");
        println!("  └── exports/         # Local dataset copies");
        println!();
        println!("Next steps:");
        println!("  1. Set CHOICELAB_UPLOAD_TOKEN and CHOICELAB_PROJECT_ID for uploads");
        println!("  2. Run `choicelab config validate`");
        println!("  3. Run `choicelab run` to start a session");
    } else if was_initialized && result.written.is_empty() {
        println!("choicelab already initialized at {}", result.data_dir.display());
        println!("Directory structure verified.");
    } else {
        println!("Completed initialization at {}", result.data_dir.display());
        for path in &result.written {
            println!("  wrote {}", path.display());
        }
    }

    Ok(())
}
