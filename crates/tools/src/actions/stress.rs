//! `stress-apps` section: best-effort network load with iperf3

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

use rtc_core::action_names::STRESS_APPS;
use rtc_core::{ActionContext, CommandSpec, ConfigAction, HandlerRegistry, RegistrationOutcome};

use super::{parse_node, register_action, Scalar};

pub const BEST_EFFORT_PATH: &str = "stress-apps.best-effort";

pub const IPERF_SERVER_PID_FILE: &str = "/var/run/iperf3.pid";
pub const IPERF_CLIENT_LOG: &str = "/var/log/iperf3-client.log";
pub const IPERF_SERVER_LOG: &str = "/var/log/iperf3-server.log";

pub fn register(registry: &mut HandlerRegistry) -> Vec<RegistrationOutcome> {
    vec![
        register_action(registry, STRESS_APPS, 300, StressAppsSection),
        register_action(registry, BEST_EFFORT_PATH, 10, BestEffortAction::default()),
    ]
}

struct StressAppsSection;

#[async_trait]
impl ConfigAction for StressAppsSection {
    fn name(&self) -> &str {
        "process_stress_apps"
    }

    async fn apply(&self, _node: &Value, _ctx: &mut ActionContext) -> Result<()> {
        trace!("processing stress applications section");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct BestEffortSettings {
    #[serde(default = "default_role")]
    role: String,
    #[serde(default = "default_ip")]
    ip: String,
    #[serde(default = "default_bandwidth")]
    bandwidth: Scalar,
    #[serde(default = "default_packet_length")]
    packet_length: Scalar,
    #[serde(default = "default_duration")]
    duration: Scalar,
}

fn default_role() -> String {
    "server".to_string()
}

fn default_ip() -> String {
    "169.254.0.2".to_string()
}

fn default_bandwidth() -> Scalar {
    Scalar::Str("150M".to_string())
}

fn default_packet_length() -> Scalar {
    Scalar::Int(1448)
}

fn default_duration() -> Scalar {
    Scalar::Int(30)
}

/// Сервер iperf3 переиспользуется, пока жив процесс из pid-файла
pub struct BestEffortAction {
    pid_file: PathBuf,
}

impl Default for BestEffortAction {
    fn default() -> Self {
        Self::with_pid_file(IPERF_SERVER_PID_FILE)
    }
}

impl BestEffortAction {
    pub fn with_pid_file(pid_file: impl Into<PathBuf>) -> Self {
        Self {
            pid_file: pid_file.into(),
        }
    }

    async fn start_server(&self, ctx: &mut ActionContext) -> Result<()> {
        info!("Starting iperf3 in server mode...");
        if server_running(&self.pid_file) {
            debug!("Server iperf3 is already running");
            info!("Server iperf3 listening on 5201");
            return Ok(());
        }
        let cmd = CommandSpec::new("iperf3")
            .arg("--server")
            .redirect_to(IPERF_SERVER_LOG);
        let process = ctx.runner().spawn(&cmd).await?;
        if let Some(pid) = process.id() {
            std::fs::write(&self.pid_file, format!("{}\n", pid)).with_context(|| {
                format!("cannot write iperf3 pid file {}", self.pid_file.display())
            })?;
        }
        ctx.processes().insert("iperf3-server", process);
        info!("Server iperf3 listening on 5201");
        Ok(())
    }

    async fn start_client(&self, settings: &BestEffortSettings, ctx: &mut ActionContext) -> Result<()> {
        info!("Starting iperf3 in client mode...");
        let cmd = CommandSpec::line(&format!(
            "iperf3 --client {} --udp --bandwidth {} --len {} --time {}",
            settings.ip, settings.bandwidth, settings.packet_length, settings.duration
        ))?
        .redirect_to(IPERF_CLIENT_LOG);
        let process = ctx.runner().spawn(&cmd).await?;
        ctx.processes().insert("iperf3-client", process);
        Ok(())
    }
}

#[async_trait]
impl ConfigAction for BestEffortAction {
    fn name(&self) -> &str {
        "process_best_effort_node"
    }

    async fn apply(&self, node: &Value, ctx: &mut ActionContext) -> Result<()> {
        let settings: BestEffortSettings = parse_node(BEST_EFFORT_PATH, node)?;
        if settings.role == "server" {
            self.start_server(ctx).await
        } else {
            self.start_client(&settings, ctx).await
        }
    }
}

/// Pid file exists and names a live process
pub fn server_running(pid_file: &Path) -> bool {
    let Ok(content) = std::fs::read_to_string(pid_file) else {
        return false;
    };
    let Some(pid) = content.lines().next().and_then(|l| l.trim().parse::<i32>().ok()) else {
        warn!("malformed iperf3 pid file {}", pid_file.display());
        return false;
    };
    process_alive(pid)
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    // SAFETY: signal 0 only checks that the process exists
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_or_malformed_pid_file_means_not_running() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("iperf3.pid");
        assert!(!server_running(&pid_file));
        std::fs::write(&pid_file, "not-a-pid\n").unwrap();
        assert!(!server_running(&pid_file));
    }

    #[cfg(unix)]
    #[test]
    fn test_own_pid_is_alive() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("iperf3.pid");
        std::fs::write(&pid_file, format!("{}\n", std::process::id())).unwrap();
        assert!(server_running(&pid_file));
    }

    #[test]
    fn test_best_effort_defaults() {
        let settings: BestEffortSettings = parse_node(BEST_EFFORT_PATH, &serde_json::json!({})).unwrap();
        assert_eq!(settings.role, "server");
        assert_eq!(settings.ip, "169.254.0.2");
        assert_eq!(settings.bandwidth.to_string(), "150M");
        assert_eq!(settings.packet_length.to_string(), "1448");
        assert_eq!(settings.duration.to_string(), "30");
    }
}
