//! Configuration-tree dispatch engine of the RT communication demo
//!
//! - Handler registry over dotted configuration paths
//! - Mode-to-action table and order normalization
//! - Sequential dispatcher over the JSON configuration
//! - Environment adjustment phase (workarounds) producing a frozen plan
//! - Runtime configuration and `${name}` substitution

pub mod config_file;
pub mod contracts;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod modes;
pub mod normalize;
pub mod registry;
pub mod runtime_config;
pub mod substitution;
pub mod workaround;

pub use config_file::load_json_config;
pub use contracts::*;
pub use dispatch::{DispatchPlan, DispatchReport, Dispatcher, DESCRIPTIVE_KEYS};
pub use domain::*;
pub use error::DispatchError;
pub use modes::ModeActionTable;
pub use normalize::normalize;
pub use registry::{HandlerNode, HandlerRegistry, RegistrationConflict, RegistrationOutcome};
pub use runtime_config::RuntimeConfig;
pub use substitution::{SubstitutionList, SubstitutionPair};
pub use workaround::{apply_workarounds, HostFacts, Workaround, XdpKernelWorkaround};

/// Re-export common types
pub use anyhow::{Error, Result};
pub use serde_json::Value;
