// Dry-run support: commands are logged, nothing is executed

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use rtc_core::{BackgroundProcess, CommandRunner, CommandSpec, CommandStatus, OutputMode};

/// Логирует каждую команду и сообщает об успехе.
/// Фоновые процессы считаются сразу завершившимися.
#[derive(Debug, Default, Clone)]
pub struct DryRunRunner;

impl DryRunRunner {
    pub fn new() -> Self {
        Self
    }
}

fn describe(cmd: &CommandSpec) -> String {
    match &cmd.output {
        OutputMode::RedirectTo(path) => format!("{} > {}", cmd, path.display()),
        _ => cmd.command_line(),
    }
}

#[async_trait]
impl CommandRunner for DryRunRunner {
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandStatus> {
        info!("[dry-run] {}", describe(cmd));
        Ok(CommandStatus::SUCCESS)
    }

    async fn output(&self, cmd: &CommandSpec) -> Result<String> {
        info!("[dry-run] {}", describe(cmd));
        Ok(String::new())
    }

    async fn spawn(&self, cmd: &CommandSpec) -> Result<Box<dyn BackgroundProcess>> {
        info!("[dry-run] {} &", describe(cmd));
        Ok(Box::new(FinishedProcess))
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

/// Background handle for a command that never ran
#[derive(Debug)]
pub struct FinishedProcess;

#[async_trait]
impl BackgroundProcess for FinishedProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> Result<CommandStatus> {
        Ok(CommandStatus::SUCCESS)
    }

    async fn terminate(&mut self) -> Result<()> {
        Ok(())
    }
}
