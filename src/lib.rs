pub mod blocks;
pub mod config;
pub mod errors;
pub mod experiment_config;
pub mod export;
pub mod gates;
pub mod init;
pub mod logging;
pub mod orchestrator;
pub mod phase;
pub mod sampler;
pub mod ui;
