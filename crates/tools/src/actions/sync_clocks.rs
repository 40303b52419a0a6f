//! `sync-clocks` section: PTP hardware clock and system clock synchronization

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use common::{ConfigError, EnvironmentError};
use rtc_core::action_names::SYNC_CLOCKS;
use rtc_core::{ActionContext, CommandSpec, ConfigAction, HandlerRegistry, RegistrationOutcome};

use super::{parse_node, register_action, run_quiet, Scalar};
use crate::probes;

pub const PTP4L_PATH: &str = "sync-clocks.ptp4l";
pub const PHC2SYS_PATH: &str = "sync-clocks.phc2sys";

pub const PTP4L_LOG: &str = "/var/log/ptp4l.log";
pub const PHC2SYS_LOG: &str = "/var/log/phc2sys.log";
pub const PMC_LOG: &str = "/var/log/pmc.log";

const SYNC_SETTLE: Duration = Duration::from_secs(30);

/// Grandmaster dataset pushed through pmc before phc2sys starts
const GRANDMASTER_SETTINGS: &str = "SET GRANDMASTER_SETTINGS_NP clockClass 248 \
     clockAccuracy 0xfe offsetScaledLogVariance 0xffff currentUtcOffset 37 leap61 0 \
     leap59 0 currentUtcOffsetValid 1 ptpTimescale 1 timeTraceable 1 \
     frequencyTraceable 0 timeSource 0xa0";

pub fn register(registry: &mut HandlerRegistry) -> Vec<RegistrationOutcome> {
    vec![
        register_action(registry, SYNC_CLOCKS, 400, SyncClocksSection),
        register_action(registry, PTP4L_PATH, 10, Ptp4lAction),
        register_action(registry, PHC2SYS_PATH, 20, Phc2sysAction),
    ]
}

/// Проверка аппаратных меток времени перед запуском ptp4l/phc2sys
struct SyncClocksSection;

#[async_trait]
impl ConfigAction for SyncClocksSection {
    fn name(&self) -> &str {
        "sync_clocks_main"
    }

    async fn apply(&self, _node: &Value, ctx: &mut ActionContext) -> Result<()> {
        debug!("start processing sync-clocks section");
        let interface = ctx
            .config()
            .interface()
            .ok_or(ConfigError::NotSet { what: "interface" })?
            .to_string();
        let cmd = CommandSpec::new("hwstamp_ctl")
            .args(["-i", interface.as_str()])
            .silent();
        let supported = matches!(ctx.runner().run(&cmd).await, Ok(status) if status.success());
        if !supported {
            return Err(EnvironmentError::NoHardwareTimestamping { interface }.into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Ptp4lSettings {
    interface: String,
    #[serde(default)]
    ignore_existing: bool,
    socket_prio: Option<Scalar>,
    #[serde(rename = "gPTP_file")]
    gptp_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct Phc2sysSettings {
    clock: String,
    interface: String,
    #[serde(default)]
    ignore_existing: bool,
}

/// Старый лог удаляется, все прежние экземпляры получают SIGTERM
async fn restart_service(ctx: &ActionContext, service: &str, log: &Path) -> Result<()> {
    if log.is_file() && !ctx.runner().is_dry_run() {
        if let Err(e) = std::fs::remove_file(log) {
            warn!("cannot remove old log file {}: {}", log.display(), e);
        }
    }
    run_quiet(ctx, CommandSpec::new("killall").args(["-TERM", service])).await
}

struct Ptp4lAction;

#[async_trait]
impl ConfigAction for Ptp4lAction {
    fn name(&self) -> &str {
        "process_ptp"
    }

    async fn apply(&self, node: &Value, ctx: &mut ActionContext) -> Result<()> {
        let settings: Ptp4lSettings = parse_node(PTP4L_PATH, node)?;
        if settings.ignore_existing && probes::is_running(ctx.runner(), "ptp4l").await {
            debug!("ptp4l is already running, keeping it");
            return Ok(());
        }

        let gptp_file = settings.gptp_file.unwrap_or_else(|| {
            ctx.config()
                .config_path()
                .unwrap_or_else(|| Path::new("."))
                .join("ptp")
                .join("gPTP.cfg")
        });
        let socket_prio = settings
            .socket_prio
            .map(|p| p.to_string())
            .unwrap_or_else(|| "1".to_string());

        restart_service(ctx, "ptp4l", Path::new(PTP4L_LOG)).await?;

        info!("Starting service for PTP hardware clock time synchronization over network...");
        info!(
            "You may use command \"tail -f {}\" in order to check quality of synchronization process",
            PTP4L_LOG
        );
        let cmd = CommandSpec::line(&format!(
            "taskset -c 1 ptp4l -mP2Hi {} --step_threshold=2",
            settings.interface
        ))?
        .args(["-f".to_string(), gptp_file.display().to_string()])
        .args(["--socket_priority".to_string(), socket_prio])
        .redirect_to(PTP4L_LOG);
        let process = ctx.runner().spawn(&cmd).await?;
        ctx.processes().insert("ptp4l", process);

        info!("Waiting 30sec for PTP hardware clock time synchronization...");
        ctx.settle(SYNC_SETTLE).await;
        info!(
            "Finished waiting for PTP hardware clock time synchronization over network, \
             going to next step..."
        );
        Ok(())
    }
}

struct Phc2sysAction;

#[async_trait]
impl ConfigAction for Phc2sysAction {
    fn name(&self) -> &str {
        "process_phc2sys"
    }

    async fn apply(&self, node: &Value, ctx: &mut ActionContext) -> Result<()> {
        let settings: Phc2sysSettings = parse_node(PHC2SYS_PATH, node)?;
        if settings.ignore_existing && probes::is_running(ctx.runner(), "phc2sys").await {
            debug!("phc2sys is already running, keeping it");
            return Ok(());
        }

        restart_service(ctx, "phc2sys", Path::new(PHC2SYS_LOG)).await?;

        let pmc = CommandSpec::new("pmc")
            .args(["-u", "-b", "0", "-t", "1", GRANDMASTER_SETTINGS])
            .redirect_to(PMC_LOG);
        let process = ctx.runner().spawn(&pmc).await?;
        ctx.processes().insert("pmc", process);

        let clock = settings.clock.as_str();
        info!(
            "Starting service for time synchronization between PTP hardware clock and {} system clock...",
            clock
        );
        info!(
            "You may use command \"tail -f {}\" in order to check quality of synchronization process",
            PHC2SYS_LOG
        );
        let cmd = CommandSpec::line(&format!(
            "taskset -c 1 phc2sys -s {} -c {} -w -ml 7 -O 0 --transportSpecific=1 --step_threshold=1",
            settings.interface, clock
        ))?
        .redirect_to(PHC2SYS_LOG);
        let process = ctx.runner().spawn(&cmd).await?;
        ctx.processes().insert("phc2sys", process);

        info!(
            "Waiting 30sec for time synchronization between PTP hardware clock and {} system clock...",
            clock
        );
        ctx.settle(SYNC_SETTLE).await;
        info!(
            "Finished waiting for time synchronization between PTP hardware clock and {} \
             system clock, going to next step...",
            clock
        );
        Ok(())
    }
}
