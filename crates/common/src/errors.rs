//! Error hierarchy shared by the demo orchestrator crates.
//!
//! Library code returns these typed errors; action bodies and the binary wrap
//! them in `anyhow::Error`. Any error that reaches `main` is fatal.

use thiserror::Error;

/// Exit status used for every fatal error (`EX_SOFTWARE` from sysexits.h)
pub const EX_SOFTWARE: i32 = 70;

/// Exit status after the user interrupted a running demo with Ctrl-C
pub const EX_INTERRUPTED: i32 = 1;

/// Top-level error type
#[derive(Debug, Error)]
pub enum RtcError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Environment check failed: {0}")]
    Environment(#[from] EnvironmentError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration errors: CLI values, runtime config consistency, JSON nodes
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} not found in {node}")]
    MissingKey { node: String, key: String },

    #[error("{what} was not set")]
    NotSet { what: &'static str },

    #[error("invalid value for {key}: '{value}' - {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("{kind} {value} not supported. Use [-h] to see help information.")]
    Unsupported { kind: &'static str, value: String },

    #[error("The config file {path} does not exist")]
    FileNotFound { path: String },

    #[error("cannot load data from json config {path} ({reason})")]
    Parse { path: String, reason: String },
}

impl ConfigError {
    pub fn missing(node: impl Into<String>, key: impl Into<String>) -> Self {
        Self::MissingKey {
            node: node.into(),
            key: key.into(),
        }
    }

    pub fn invalid(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Host environment preconditions
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("Required tool \"{tool}\" is not available in the system{hint}")]
    MissingTool { tool: String, hint: String },

    #[error(
        "Cannot identify presence hardware timestamping feature on device related to \
         network interface \"{interface}\". You may check device hardware timestamping \
         settings using command \"hwstamp_ctl -i {interface}\""
    )]
    NoHardwareTimestamping { interface: String },

    #[error("Cannot auto-detect the target ({reason}). Try manually specifying the target with [-t] argument")]
    TargetDetection { reason: String },
}

/// Ожидание приложения прервано пользователем (Ctrl-C)
#[derive(Debug, Error)]
#[error("Interrupted while waiting for the {role} process")]
pub struct Interrupted {
    pub role: String,
}

impl Interrupted {
    /// `true` if any error in the chain is an interruption
    pub fn is_in(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| cause.is::<Interrupted>())
    }
}

pub type RtcResult<T> = Result<T, RtcError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
