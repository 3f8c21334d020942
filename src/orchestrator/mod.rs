pub mod events;
pub mod recorder;
pub mod state;

pub use events::{EventBus, SessionEvent};
pub use recorder::{OrchestratorConfig, RecordingOrchestrator};
pub use state::{RecorderPhase, RecorderState, StatusHandle};
