// Command execution backends for configuration actions

pub mod dry_run;
pub mod recording;
pub mod system_runner;

pub use dry_run::DryRunRunner;
pub use recording::{RecordedCommand, RecordingRunner};
pub use system_runner::{SystemProcess, SystemRunner};
