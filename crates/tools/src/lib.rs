//! Host side of the RT communication demo: command runners, host probes
//! and the configuration actions registered with the dispatch engine.

// Command execution backends (system, dry-run, recording)
pub mod execution;

// Required applications, hardware timestamping, target detection
pub mod probes;

// Configuration actions per top-level section
pub mod actions;

pub use actions::register_all;
pub use execution::{DryRunRunner, RecordedCommand, RecordingRunner, SystemRunner};
