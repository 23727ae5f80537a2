pub mod icons;
pub mod terminal;

pub use terminal::{TerminalUi, stimulus_label};
