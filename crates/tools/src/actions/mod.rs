//! Configuration actions of the demo and their registration.
//!
//! Each submodule owns one top-level section of the JSON configuration and
//! registers its handlers under dotted paths with explicit order numbers.

pub mod eth_if;
pub mod remote_apps;
pub mod run_apps;
pub mod stress;
pub mod sync_clocks;
pub mod tsn;

use anyhow::Result;
use std::future::Future;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{error, trace, warn};

use common::{ConfigError, Interrupted};
use rtc_core::{
    ActionContext, BackgroundProcess, CommandStatus, ConfigAction, HandlerRegistry,
    RegistrationOutcome,
};

/// Зарегистрировать все действия демо. Возвращает число отклонённых
/// регистраций (конфликтов).
pub fn register_all(registry: &mut HandlerRegistry) -> usize {
    let mut outcomes = Vec::new();
    outcomes.extend(remote_apps::register(registry));
    outcomes.extend(eth_if::register(registry));
    outcomes.extend(tsn::register(registry));
    outcomes.extend(stress::register(registry));
    outcomes.extend(sync_clocks::register(registry));
    outcomes.extend(run_apps::register(registry));

    let rejected = outcomes.iter().filter(|o| !o.is_registered()).count();
    trace!(
        "registered {} configuration actions, {} rejected",
        outcomes.len() - rejected,
        rejected
    );
    rejected
}

/// Сигнал прерывания от пользователя. Если обработчик Ctrl-C не удалось
/// установить, прерывание никогда не наступает.
pub(crate) async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Дождаться завершения процесса или прерывания. При прерывании процесс
/// останавливается и возвращается [`Interrupted`].
pub async fn wait_or_interrupt(
    role: &str,
    process: &mut dyn BackgroundProcess,
    interrupt: impl Future<Output = ()>,
) -> Result<CommandStatus> {
    tokio::select! {
        status = process.wait() => status,
        _ = interrupt => {
            warn!("Interrupted, stopping the {} process", role);
            process.terminate().await?;
            Err(Interrupted { role: role.to_string() }.into())
        }
    }
}

pub(crate) fn register_action(
    registry: &mut HandlerRegistry,
    path: &str,
    order: u32,
    action: impl ConfigAction + 'static,
) -> RegistrationOutcome {
    registry.register(path, Some(order), Arc::new(action))
}

/// Скалярное значение из JSON, подставляемое в командную строку как есть
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    pub fn as_bool(&self) -> bool {
        match self {
            Scalar::Bool(b) => *b,
            Scalar::Int(i) => *i != 0,
            Scalar::Float(f) => *f != 0.0,
            Scalar::Str(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Str(s) => f.write_str(s),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Typed view of a configuration node. A missing field becomes
/// `ConfigError::MissingKey` naming the node.
pub(crate) fn parse_node<T: DeserializeOwned>(path: &str, node: &Value) -> Result<T, ConfigError> {
    T::deserialize(node).map_err(|e| {
        let message = e.to_string();
        match missing_field(&message) {
            Some(key) => ConfigError::missing(path, key),
            None => ConfigError::invalid(path, node.to_string(), message),
        }
    })
}

fn missing_field(message: &str) -> Option<&str> {
    let rest = message.split_once("missing field `")?.1;
    rest.split_once('`').map(|(key, _)| key)
}

/// Запустить команду; ошибку или ненулевой код только залогировать
pub(crate) async fn run_lenient(ctx: &ActionContext, cmd: rtc_core::CommandSpec, what: &str) -> bool {
    match ctx.runner().run(&cmd).await {
        Ok(status) if status.success() => true,
        Ok(status) => {
            error!(
                "Cannot configure {}, jitter of transmission latency can be unpredictable. \
                 Run command \"{}\" to retry attempt of configuration manually and check output \
                 (exit code {:?}).",
                what, cmd, status.code
            );
            false
        }
        Err(e) => {
            error!(
                "Cannot configure {}, jitter of transmission latency can be unpredictable. \
                 Run command \"{}\" to retry attempt of configuration manually and check output \
                 ({:#}).",
                what, cmd, e
            );
            false
        }
    }
}

/// Run a setup command whose exit status is not checked
pub(crate) async fn run_quiet(ctx: &ActionContext, cmd: rtc_core::CommandSpec) -> Result<()> {
    ctx.runner().run(&cmd.silent()).await?;
    Ok(())
}
