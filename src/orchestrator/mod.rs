pub mod recorder;
pub mod runner;
pub mod sequencer;
pub mod session;
pub mod state;
pub mod timer;

pub use recorder::{Clock, ManualClock, SystemClock, TrialRecorder};
pub use runner::{ExperimentRunner, ParticipantUi, RunOutcome};
pub use sequencer::{CompletionEffect, PhaseSequencer, Transition, TransitionKind};
pub use session::{Prompt, Response, Session, StepReport};
pub use state::{ExperimentState, LoadOutcome, StateStore, TrialRecord};
