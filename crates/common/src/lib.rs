pub mod errors;
pub mod structured_logging;

pub use structured_logging::{
    init_structured_logging,
    level_label,
    ExecutionContext,
    LoggingConfig,
    OperationTimer,
    StructuredLogEntry,
};

pub use errors::{
    ConfigError, ConfigResult,
    EnvironmentError, Interrupted,
    RtcError, RtcResult,
    EX_INTERRUPTED, EX_SOFTWARE,
};
