pub mod cancel;
pub mod constants;
pub mod filename;
pub mod progress;
pub mod workspace;

pub use cancel::CancelToken;
pub use constants::*;
pub use filename::ResultsLayout;
pub use progress::ProgressReporter;
pub use workspace::{delete_sidecars, remove_dir_best_effort, Heartbeat, ScratchWorkspace};
