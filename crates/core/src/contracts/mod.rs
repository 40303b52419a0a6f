//! Contracts between the dispatch engine and the action modules

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::{ConfigError, ConfigResult};

use crate::runtime_config::RuntimeConfig;

/// Действие, привязанное к узлу дерева конфигурации.
///
/// Действие получает JSON-поддерево своего узла. Вернуть `Err` значит
/// прервать весь прогон; локальные проблемы, после которых можно
/// продолжать, действие должно залогировать само и вернуть `Ok(())`.
#[async_trait]
pub trait ConfigAction: Send + Sync {
    /// Имя для диагностики
    fn name(&self) -> &str;

    async fn apply(&self, node: &Value, ctx: &mut ActionContext) -> Result<()>;
}

/// Synchronous closure adapter for actions that do not touch processes
pub struct FnAction<F> {
    name: String,
    func: F,
}

impl<F> FnAction<F>
where
    F: Fn(&Value, &mut ActionContext) -> Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> ConfigAction for FnAction<F>
where
    F: Fn(&Value, &mut ActionContext) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, node: &Value, ctx: &mut ActionContext) -> Result<()> {
        (self.func)(node, ctx)
    }
}

/// Куда направить вывод запускаемой команды
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMode {
    Inherit,
    Silent,
    RedirectTo(PathBuf),
}

/// Split `text` into shell words. `what` names the value in the error.
pub fn split_words(what: &str, text: &str) -> ConfigResult<Vec<String>> {
    shlex::split(text)
        .ok_or_else(|| ConfigError::invalid(what, text, "unbalanced quotes or trailing escape"))
}

/// One external command: program, argv and output routing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub output: OutputMode,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            output: OutputMode::Inherit,
        }
    }

    /// Разбор командной строки по правилам shell: кавычки и экранирование
    /// сохраняют аргумент целиком.
    pub fn line(line: &str) -> ConfigResult<Self> {
        let mut words = split_words("command", line)?.into_iter();
        let program = words
            .next()
            .ok_or_else(|| ConfigError::invalid("command", line, "empty command line"))?;
        Ok(Self {
            program,
            args: words.collect(),
            output: OutputMode::Inherit,
        })
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn silent(mut self) -> Self {
        self.output = OutputMode::Silent;
        self
    }

    pub fn redirect_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = OutputMode::RedirectTo(path.into());
        self
    }

    /// Человекочитаемая командная строка для логов
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push('\'');
                line.push_str(arg);
                line.push('\'');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Exit status of a finished command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    pub code: Option<i32>,
}

impl CommandStatus {
    pub const SUCCESS: CommandStatus = CommandStatus { code: Some(0) };

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Процесс, запущенный в фоне одним действием и ожидаемый другим
#[async_trait]
pub trait BackgroundProcess: Send + Sync {
    fn id(&self) -> Option<u32>;

    async fn wait(&mut self) -> Result<CommandStatus>;

    async fn terminate(&mut self) -> Result<()>;
}

/// Runs external commands on behalf of actions
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandStatus>;

    /// Run to completion and capture stdout
    async fn output(&self, cmd: &CommandSpec) -> Result<String>;

    /// Start in the background
    async fn spawn(&self, cmd: &CommandSpec) -> Result<Box<dyn BackgroundProcess>>;

    /// `true` when commands are only logged
    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Фоновые процессы, переданные между действиями, по ролям
#[derive(Default)]
pub struct ProcessTable {
    entries: HashMap<String, Box<dyn BackgroundProcess>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process previously stored under `role`, if any
    pub fn insert(
        &mut self,
        role: impl Into<String>,
        process: Box<dyn BackgroundProcess>,
    ) -> Option<Box<dyn BackgroundProcess>> {
        self.entries.insert(role.into(), process)
    }

    pub fn take(&mut self, role: &str) -> Option<Box<dyn BackgroundProcess>> {
        self.entries.remove(role)
    }

    pub fn contains(&self, role: &str) -> bool {
        self.entries.contains_key(role)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything an action may touch: the frozen runtime configuration, the
/// command runner and the process table shared with later actions.
pub struct ActionContext {
    config: Arc<RuntimeConfig>,
    runner: Arc<dyn CommandRunner>,
    processes: ProcessTable,
}

impl ActionContext {
    pub fn new(config: Arc<RuntimeConfig>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            processes: ProcessTable::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub fn processes(&mut self) -> &mut ProcessTable {
        &mut self.processes
    }

    /// Пауза для стабилизации внешних сервисов; в dry-run пропускается
    pub async fn settle(&self, duration: Duration) {
        if self.runner.is_dry_run() {
            tracing::debug!("dry run: skipping wait of {}s", duration.as_secs());
            return;
        }
        tokio::time::sleep(duration).await;
    }
}
