//! Launcher of the real-time communication demo

pub mod args;
pub mod run;
pub mod startup;

pub use args::Cli;
pub use run::{execute, run};
