//! `run-remote-apps` / `finish-remote-apps`: the peer board over ssh.
//!
//! В режиме автозапуска вторая плата запускается тем же демо с парным
//! профилем; сессия ssh живёт до `finish-remote-apps`, после чего
//! результаты копируются через scp.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, trace};

use common::ConfigError;
use rtc_core::action_names::{FINISH_REMOTE_APPS, RUN_REMOTE_APPS};
use rtc_core::runtime_config::REMOTE_WORKING_DIR;
use rtc_core::{
    ActionContext, CommandSpec, ConfigAction, HandlerRegistry, RegistrationOutcome, RuntimeConfig,
};

use super::{ctrl_c, parse_node, register_action, wait_or_interrupt};

pub const REMOTE_SESSION_ROLE: &str = "remote-session";

const REMOTE_START_SETTLE: Duration = Duration::from_secs(1);

pub fn register(registry: &mut HandlerRegistry) -> Vec<RegistrationOutcome> {
    vec![
        register_action(registry, RUN_REMOTE_APPS, 100, RunRemoteAppsAction),
        register_action(registry, FINISH_REMOTE_APPS, 9000, FinishRemoteAppsAction),
    ]
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RemoteAppSettings {
    app: String,
    #[serde(default)]
    app_args: String,
    log_file: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CopyItem {
    from: String,
    to: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FinishRemoteSettings {
    #[serde(default)]
    copy_results: Vec<CopyItem>,
}

/// Shell command executed by ssh on the peer
pub fn remote_command(config: &RuntimeConfig, app: &str, app_args: &str) -> Result<String, ConfigError> {
    let profile = config.remote_profile().ok_or(ConfigError::NotSet {
        what: "remote profile",
    })?;
    let mode = config.mode().ok_or(ConfigError::NotSet { what: "mode" })?;
    let interface = config.remote_interface().ok_or(ConfigError::NotSet {
        what: "remote interface",
    })?;

    let app = match config.remote_exec_path() {
        Some(dir) => dir.join(app).display().to_string(),
        None => app.to_string(),
    };
    let config_path = config
        .remote_config_path()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    let mut cmd = format!(
        "cd {} && {} {} --profile {} --interface {} --config-path {} --mode {}",
        REMOTE_WORKING_DIR, app, app_args, profile, interface, config_path, mode
    );
    if let Some(exec_path) = config.remote_exec_path() {
        cmd.push_str(&format!(" --exec-path {}", exec_path.display()));
    }
    if config.verbose() {
        cmd.push_str(" --verbose");
    }
    if !config.use_stresses() {
        cmd.push_str(" --no-best-effort");
    }
    Ok(cmd)
}

struct RunRemoteAppsAction;

#[async_trait]
impl ConfigAction for RunRemoteAppsAction {
    fn name(&self) -> &str {
        "process_start_remote_app_data"
    }

    async fn apply(&self, node: &Value, ctx: &mut ActionContext) -> Result<()> {
        let Some(address) = ctx.config().remote_address().map(str::to_string) else {
            debug!("Remote launch is not enabled, skipping");
            return Ok(());
        };
        let settings: RemoteAppSettings = parse_node(RUN_REMOTE_APPS, node)?;
        let remote = remote_command(ctx.config(), &settings.app, &settings.app_args)?;

        let ssh = CommandSpec::new("ssh")
            .arg(address)
            .arg(remote)
            .redirect_to(&settings.log_file);
        trace!("Starting command on remote target: \"{}\"", ssh);
        let session = ctx.runner().spawn(&ssh).await?;
        ctx.processes().insert(REMOTE_SESSION_ROLE, session);
        ctx.settle(REMOTE_START_SETTLE).await;
        Ok(())
    }
}

struct FinishRemoteAppsAction;

#[async_trait]
impl ConfigAction for FinishRemoteAppsAction {
    fn name(&self) -> &str {
        "process_finish_remote_app_data"
    }

    async fn apply(&self, node: &Value, ctx: &mut ActionContext) -> Result<()> {
        let Some(mut session) = ctx.processes().take(REMOTE_SESSION_ROLE) else {
            trace!("No active remote session");
            return Ok(());
        };
        let settings: FinishRemoteSettings = parse_node(FINISH_REMOTE_APPS, node)?;

        debug!("Waiting for the remote application to finish...");
        wait_or_interrupt(REMOTE_SESSION_ROLE, session.as_mut(), ctrl_c()).await?;
        debug!("The remote application has finished.");

        let address = ctx.config().remote_address().unwrap_or_default().to_string();
        for item in &settings.copy_results {
            let scp = CommandSpec::new("scp")
                .arg(format!("{}:{}", address, item.from))
                .arg(item.to.as_str())
                .silent();
            trace!(
                "Copy remote file from: \"{}\", to local FS: \"{}\", command: {}",
                item.from,
                item.to,
                scp
            );
            ctx.runner().run(&scp).await?;
        }
        Ok(())
    }
}
