//! `run-apps` / `finish-apps`: the carrier application and optional capture

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use rtc_core::action_names::{FINISH_APPS, RUN_APPS};
use rtc_core::{
    split_words, ActionContext, CommandSpec, ConfigAction, HandlerRegistry, RegistrationOutcome,
};

use super::{ctrl_c, parse_node, register_action, wait_or_interrupt, Scalar};

/// Roles in the process table
pub const CARRIER_ROLE: &str = "carrier";
pub const CAPTURE_ROLE: &str = "capture";

pub const CAPTURE_FILE: &str = "tcc_rt_communication_demo_incoming.pcap";

const CAPTURE_SETTLE: Duration = Duration::from_secs(2);

pub fn register(registry: &mut HandlerRegistry) -> Vec<RegistrationOutcome> {
    vec![
        register_action(registry, RUN_APPS, 1000, RunAppsAction),
        register_action(registry, FINISH_APPS, 2000, FinishAppsAction),
    ]
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RunAppsSettings {
    carrier: String,
    carrier_args: String,
    tcpdump: Option<Scalar>,
}

#[derive(Debug, thiserror::Error)]
#[error(
    "Binary \"{0}\" was not found in directories provided by PATH environment variable. \
     Try to launch script with [-e] option and provide path to binary executables manually."
)]
pub struct CarrierNotFound(pub String);

struct RunAppsAction;

#[async_trait]
impl ConfigAction for RunAppsAction {
    fn name(&self) -> &str {
        "process_rt_data"
    }

    async fn apply(&self, node: &Value, ctx: &mut ActionContext) -> Result<()> {
        let settings: RunAppsSettings = parse_node(RUN_APPS, node)?;
        let verbose = ctx.config().verbose();

        let mut carrier = CommandSpec::new(settings.carrier.as_str())
            .args(split_words("run-apps.carrier-args", &settings.carrier_args)?);
        if verbose {
            carrier = carrier.arg("--log-level=debug");
        }

        if which::which(&settings.carrier).is_err() {
            if !ctx.runner().is_dry_run() {
                return Err(CarrierNotFound(settings.carrier).into());
            }
            warn!("{}", CarrierNotFound(settings.carrier.clone()));
        }

        // The capture also puts the NIC into promiscuous mode
        if let Some(capture_if) = &settings.tcpdump {
            let pcap = ctx.config().output_path().join(CAPTURE_FILE);
            let mut capture = CommandSpec::line(&format!(
                "tcpdump -i {} -q ether proto 0xb62c -Q in --time-stamp-precision=nano -j adapter_unsynced",
                capture_if
            ))?
            .args(["-w".to_string(), pcap.display().to_string()]);
            if !verbose {
                capture = capture.silent();
            }
            let process = ctx.runner().spawn(&capture).await?;
            ctx.processes().insert(CAPTURE_ROLE, process);
            ctx.settle(CAPTURE_SETTLE).await;
        }

        let process = ctx.runner().spawn(&carrier).await?;
        ctx.processes().insert(CARRIER_ROLE, process);
        Ok(())
    }
}

struct FinishAppsAction;

#[async_trait]
impl ConfigAction for FinishAppsAction {
    fn name(&self) -> &str {
        "finish_processing_rt_data"
    }

    async fn apply(&self, _node: &Value, ctx: &mut ActionContext) -> Result<()> {
        finish_apps(ctx, ctrl_c()).await
    }
}

/// Дождаться несущего приложения и остановить захват трафика. Захват
/// останавливается и при прерывании ожидания.
pub async fn finish_apps(
    ctx: &mut ActionContext,
    interrupt: impl Future<Output = ()>,
) -> Result<()> {
    let waited = match ctx.processes().take(CARRIER_ROLE) {
        Some(mut carrier) => {
            debug!("Waiting for the server...");
            wait_or_interrupt(CARRIER_ROLE, carrier.as_mut(), interrupt)
                .await
                .map(|status| debug!("The server has finished with exit code {:?}", status.code))
        }
        None => Ok(()),
    };
    if let Some(mut capture) = ctx.processes().take(CAPTURE_ROLE) {
        debug!("Terminating tcpdump process");
        capture.terminate().await?;
    }
    waited
}
