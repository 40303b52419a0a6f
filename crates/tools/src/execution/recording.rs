// Recording runner: keeps every command line, answers from a script

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use rtc_core::{BackgroundProcess, CommandRunner, CommandSpec, CommandStatus, OutputMode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub line: String,
    pub output: OutputMode,
    pub background: bool,
}

#[derive(Default)]
struct Script {
    log: Vec<RecordedCommand>,
    // keyed by command-line prefix
    outputs: HashMap<String, String>,
    statuses: HashMap<String, i32>,
    terminated: Vec<String>,
}

/// Test double for `CommandRunner`. Commands succeed unless a status was
/// scripted for a matching prefix; captured output comes from the script.
#[derive(Clone, Default)]
pub struct RecordingRunner {
    script: Arc<Mutex<Script>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `output()` calls whose command line starts with `prefix`
    pub fn with_output(self, prefix: &str, output: &str) -> Self {
        self.script
            .lock()
            .outputs
            .insert(prefix.to_string(), output.to_string());
        self
    }

    /// Exit code for commands whose command line starts with `prefix`
    pub fn with_status(self, prefix: &str, code: i32) -> Self {
        self.script.lock().statuses.insert(prefix.to_string(), code);
        self
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.script.lock().log.clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.script.lock().log.iter().map(|c| c.line.clone()).collect()
    }

    /// Command lines of background processes that were terminated
    pub fn terminated(&self) -> Vec<String> {
        self.script.lock().terminated.clone()
    }

    fn record(&self, cmd: &CommandSpec, background: bool) -> String {
        let line = cmd.command_line();
        self.script.lock().log.push(RecordedCommand {
            line: line.clone(),
            output: cmd.output.clone(),
            background,
        });
        line
    }

    fn status_for(&self, line: &str) -> CommandStatus {
        let script = self.script.lock();
        let code = script
            .statuses
            .iter()
            .filter(|(prefix, _)| line.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, code)| *code)
            .unwrap_or(0);
        CommandStatus { code: Some(code) }
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandStatus> {
        let line = self.record(cmd, false);
        Ok(self.status_for(&line))
    }

    async fn output(&self, cmd: &CommandSpec) -> Result<String> {
        let line = self.record(cmd, false);
        let script = self.script.lock();
        Ok(script
            .outputs
            .iter()
            .filter(|(prefix, _)| line.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, out)| out.clone())
            .unwrap_or_default())
    }

    async fn spawn(&self, cmd: &CommandSpec) -> Result<Box<dyn BackgroundProcess>> {
        let line = self.record(cmd, true);
        let status = self.status_for(&line);
        let id = u32::try_from(self.script.lock().log.len()).unwrap_or(u32::MAX);
        Ok(Box::new(RecordedProcess {
            id,
            line,
            status,
            script: Arc::clone(&self.script),
        }))
    }
}

struct RecordedProcess {
    id: u32,
    line: String,
    status: CommandStatus,
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl BackgroundProcess for RecordedProcess {
    fn id(&self) -> Option<u32> {
        Some(self.id)
    }

    async fn wait(&mut self) -> Result<CommandStatus> {
        Ok(self.status)
    }

    async fn terminate(&mut self) -> Result<()> {
        self.script.lock().terminated.push(self.line.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_longest_prefix_wins() {
        let runner = RecordingRunner::new()
            .with_status("hwstamp_ctl", 1)
            .with_status("hwstamp_ctl -i enp1s0", 0)
            .with_output("tc qdisc show", "qdisc taprio 100: root");

        let ok = runner
            .run(&CommandSpec::line("hwstamp_ctl -i enp1s0").unwrap())
            .await
            .unwrap();
        let bad = runner
            .run(&CommandSpec::line("hwstamp_ctl -i enp2s0").unwrap())
            .await
            .unwrap();
        assert!(ok.success());
        assert!(!bad.success());

        let out = runner
            .output(&CommandSpec::line("tc qdisc show dev enp1s0").unwrap())
            .await
            .unwrap();
        assert_eq!(out, "qdisc taprio 100: root");
        assert_eq!(runner.lines().len(), 3);
    }

    #[tokio::test]
    async fn test_background_termination_is_recorded() {
        let runner = RecordingRunner::new();
        let mut process = runner
            .spawn(&CommandSpec::line("tcpdump -i eth0").unwrap())
            .await
            .unwrap();
        process.terminate().await.unwrap();
        assert_eq!(runner.terminated(), ["tcpdump -i eth0"]);
        assert!(runner.commands()[0].background);
    }
}
