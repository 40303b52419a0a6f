// Command runner backed by tokio::process

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::fs::File;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use rtc_core::{BackgroundProcess, CommandRunner, CommandSpec, CommandStatus, OutputMode};

/// Runs commands on the host. Stdin is always closed; background
/// processes are not killed when their handle is dropped.
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(cmd: &CommandSpec) -> Result<Command> {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args).stdin(Stdio::null());
        match &cmd.output {
            OutputMode::Inherit => {}
            OutputMode::Silent => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
            OutputMode::RedirectTo(path) => {
                let file = File::create(path)
                    .with_context(|| format!("cannot open log file {}", path.display()))?;
                let err = file
                    .try_clone()
                    .with_context(|| format!("cannot open log file {}", path.display()))?;
                command.stdout(Stdio::from(file)).stderr(Stdio::from(err));
            }
        }
        Ok(command)
    }
}

fn status_of(status: std::process::ExitStatus) -> CommandStatus {
    CommandStatus {
        code: status.code(),
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandStatus> {
        debug!("Running command: {}", cmd);
        let status = Self::command(cmd)?
            .status()
            .await
            .with_context(|| format!("failed to run \"{}\"", cmd))?;
        Ok(status_of(status))
    }

    async fn output(&self, cmd: &CommandSpec) -> Result<String> {
        debug!("Running: {}", cmd);
        let output = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to run \"{}\"", cmd))?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn spawn(&self, cmd: &CommandSpec) -> Result<Box<dyn BackgroundProcess>> {
        debug!("Running command in background: {}", cmd);
        let child = Self::command(cmd)?
            .spawn()
            .with_context(|| format!("failed to start \"{}\"", cmd))?;
        Ok(Box::new(SystemProcess {
            command_line: cmd.command_line(),
            child,
        }))
    }
}

/// Handle of a process started by `SystemRunner::spawn`
pub struct SystemProcess {
    command_line: String,
    child: Child,
}

#[async_trait]
impl BackgroundProcess for SystemProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<CommandStatus> {
        let status = self
            .child
            .wait()
            .await
            .with_context(|| format!("failed to wait for \"{}\"", self.command_line))?;
        Ok(status_of(status))
    }

    /// SIGTERM, then SIGKILL if the process is still alive after 5 seconds
    async fn terminate(&mut self) -> Result<()> {
        let Some(id) = self.child.id() else {
            return Ok(());
        };
        debug!("Sending SIGTERM to process {}", id);
        #[cfg(unix)]
        {
            let pid = i32::try_from(id).map_err(|_| anyhow!("pid {} out of range", id))?;
            // SAFETY: plain signal delivery to a child we own
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        {
            self.child.start_kill()?;
        }

        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e).context("failed to reap terminated process"),
            Err(_) => {
                warn!("Process {} did not exit gracefully, force killing", id);
                self.child.kill().await.context("failed to kill process")
            }
        }
    }
}
