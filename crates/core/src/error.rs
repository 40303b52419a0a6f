use thiserror::Error;

use crate::domain::Mode;

/// Ошибки обхода дерева конфигурации. Любая из них фатальна для прогона.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("mode {0} has no entry in the action table")]
    UnknownMode(Mode),

    #[error("json config node \"{path}\" must be an object")]
    NotAnObject { path: String },

    #[error("json config node \"{path}\": {source:#}")]
    Action {
        path: String,
        #[source]
        source: anyhow::Error,
    },
}

impl DispatchError {
    /// Path of the configuration node the error relates to
    pub fn path(&self) -> Option<&str> {
        match self {
            DispatchError::UnknownMode(_) => None,
            DispatchError::NotAnObject { path } | DispatchError::Action { path, .. } => Some(path),
        }
    }
}
