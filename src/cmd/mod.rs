//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled              |
//! |-----------|-------------------------------|
//! | `run`     | `Run`                         |
//! | `phase`   | `Status`, `Phases`, `Reset`   |
//! | `project` | `Init`                        |
//! | `export`  | `Export`, `Upload`            |
//! | `config`  | `Config`                      |

pub mod config;
pub mod export;
pub mod phase;
pub mod project;
pub mod run;

pub use config::cmd_config;
pub use export::{cmd_export, cmd_upload};
pub use phase::{cmd_phases, cmd_reset, cmd_status};
pub use project::cmd_init;
pub use run::cmd_run;
