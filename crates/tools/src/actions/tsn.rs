//! `tsn-disc` section: traffic-control queue disciplines for TSN traffic.
//!
//! Последовательность: удаление корневой qdisc, taprio или mqprio,
//! затем по наличию ключей ethtool-est, cbs, etf, ethtool и vlanrx.
//! Ошибки отдельных tc-команд не фатальны, только логируются.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

use common::ConfigError;
use rtc_core::action_names::TSN_DISC;
use rtc_core::{ActionContext, CommandSpec, ConfigAction, HandlerRegistry, RegistrationOutcome};

use super::eth_if::{apply_ethtool, EthtoolSettings};
use super::{parse_node, register_action, run_lenient, run_quiet, Scalar};

/// Number of socket priorities in a tc priority map
pub const PRIORITY_MAP_LEN: usize = 16;

const CLOCK_ID: &str = "CLOCK_TAI";
const QDISC_DELETE_SETTLE: Duration = Duration::from_secs(5);

pub fn register(registry: &mut HandlerRegistry) -> Vec<RegistrationOutcome> {
    vec![register_action(registry, TSN_DISC, 300, TsnDiscAction)]
}

#[derive(Debug, Deserialize)]
struct TsnSettings {
    interface: Option<String>,
    taprio: Option<TaprioSettings>,
    mqprio: Option<MqprioSettings>,
    #[serde(rename = "ethtool-est")]
    ethtool_est: Option<EstSettings>,
    cbs: Option<CbsSettings>,
    etf: Option<Vec<EtfSettings>>,
    ethtool: Option<EthtoolSettings>,
    vlanrx: Option<Vec<VlanRxSettings>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScheduleEntry {
    gate_mask: Scalar,
    duration: Scalar,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TaprioSettings {
    num_tc: Scalar,
    queues: Scalar,
    handle: Scalar,
    mapping: BTreeMap<String, Scalar>,
    #[serde(default)]
    schedule: Vec<ScheduleEntry>,
    offload: Option<Scalar>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MqprioSettings {
    num_tc: Scalar,
    queues: Scalar,
    handle: Scalar,
    mapping: BTreeMap<String, Scalar>,
}

#[derive(Debug, Deserialize)]
struct EstSettings {
    gcl_path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CbsSettings {
    handle: Scalar,
    parent: Scalar,
    queue: u32,
    sendslope: Scalar,
    idleslope: Scalar,
    hicredit: Scalar,
    locredit: Scalar,
    offload: Scalar,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EtfSettings {
    delta: Scalar,
    queue: u32,
    parent: Option<Scalar>,
    offload: Option<Scalar>,
    deadline_mode: Option<Scalar>,
}

#[derive(Debug, Deserialize)]
struct VlanRxSettings {
    vlan_priority: Scalar,
    rx_hw_q: Scalar,
}

/// 16 записей `mapping.default`, переопределённых ключами `pN`
pub(crate) fn priority_map(
    path: &str,
    mapping: &BTreeMap<String, Scalar>,
) -> Result<String, ConfigError> {
    let default = mapping
        .get("default")
        .ok_or_else(|| ConfigError::missing(path, "default"))?;
    let mut maps = vec![default.to_string(); PRIORITY_MAP_LEN];
    for (key, queue) in mapping.iter().filter(|(k, _)| k.as_str() != "default") {
        let priority = key
            .get(1..)
            .and_then(|p| p.parse::<usize>().ok())
            .filter(|p| *p < PRIORITY_MAP_LEN)
            .ok_or_else(|| {
                ConfigError::invalid(path, key.as_str(), "expected p<priority> with priority 0..15")
            })?;
        maps[priority] = queue.to_string();
    }
    Ok(maps.join(" "))
}

pub(crate) fn taprio_command(
    iface: &str,
    maps: &str,
    taprio: &TaprioSettings,
    base_time_ns: i64,
) -> Result<CommandSpec, ConfigError> {
    let mut cmd = CommandSpec::line(&format!(
        "tc -d qdisc replace dev {} parent root handle {} taprio num_tc {} map {} queues {} base-time {}",
        iface, taprio.handle, taprio.num_tc, maps, taprio.queues, base_time_ns
    ))?;
    for entry in &taprio.schedule {
        cmd = cmd.args([
            "sched-entry".to_string(),
            "S".to_string(),
            entry.gate_mask.to_string(),
            entry.duration.to_string(),
        ]);
    }
    cmd = cmd.args(["flags", "0x2"]);
    if taprio.offload.as_ref().is_some_and(Scalar::as_bool) {
        cmd = cmd.args(["offload", "1"]);
    }
    Ok(cmd)
}

pub(crate) fn mqprio_command(
    iface: &str,
    maps: &str,
    mqprio: &MqprioSettings,
) -> Result<CommandSpec, ConfigError> {
    CommandSpec::line(&format!(
        "tc qdisc add dev {} parent root handle {} mqprio num_tc {} map {} queues {} hw 0",
        iface, mqprio.handle, mqprio.num_tc, maps, mqprio.queues
    ))
}

/// tc class of a hardware queue: queues are 0-based, classes start at 1
pub(crate) fn queue_class(path: &str, queue: u32) -> Result<u32, ConfigError> {
    queue
        .checked_add(1)
        .ok_or_else(|| ConfigError::invalid(path, queue.to_string(), "queue number is out of range"))
}

pub(crate) fn cbs_command(iface: &str, cbs: &CbsSettings) -> Result<CommandSpec, ConfigError> {
    CommandSpec::line(&format!(
        "tc qdisc replace dev {} handle {} parent {}:{} cbs idleslope {} sendslope {} \
         hicredit {} locredit {} offload {}",
        iface,
        cbs.handle,
        cbs.parent,
        queue_class("tsn-disc.cbs.queue", cbs.queue)?,
        cbs.idleslope,
        cbs.sendslope,
        cbs.hicredit,
        cbs.locredit,
        cbs.offload
    ))
}

pub(crate) fn etf_command(
    iface: &str,
    parent: &str,
    etf: &EtfSettings,
) -> Result<CommandSpec, ConfigError> {
    let mut cmd = CommandSpec::line(&format!(
        "tc qdisc replace dev {} parent {}:{} etf clockid {} delta {}",
        iface,
        parent,
        queue_class("tsn-disc.etf.queue", etf.queue)?,
        CLOCK_ID,
        etf.delta
    ))?;
    if etf.offload.as_ref().is_some_and(Scalar::as_bool) {
        cmd = cmd.arg("offload");
    }
    if etf.deadline_mode.as_ref().is_some_and(Scalar::as_bool) {
        cmd = cmd.arg("deadline_mode");
    }
    Ok(cmd)
}

/// Handle of the first qdisc line mentioning `kind`, without the colon
pub(crate) fn qdisc_parent(show_output: &str, kind: &str) -> Option<String> {
    let line = show_output.lines().find(|l| l.contains(kind))?;
    let words: Vec<&str> = line.split_whitespace().collect();
    let idx = words.iter().position(|w| *w == kind)?;
    words.get(idx + 1).map(|w| w.replace(':', ""))
}

/// Sum of the interval column of a gate control list, in seconds
pub(crate) fn gcl_cycle_time(gcl: &str) -> Result<f64> {
    let mut total: u64 = 0;
    for (n, line) in gcl.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
        let interval = line
            .split_whitespace()
            .nth(2)
            .with_context(|| format!("gate control list line {} has no interval column", n + 1))?;
        let interval_ns = interval
            .parse::<u64>()
            .with_context(|| format!("invalid interval \"{}\" at line {}", interval, n + 1))?;
        total = total.checked_add(interval_ns).ok_or_else(|| {
            ConfigError::invalid(
                "ethtool-est.gcl_path",
                format!("line {}", n + 1),
                "sum of gate control list intervals is out of range",
            )
        })?;
    }
    Ok(total as f64 / 1_000_000_000.0)
}

fn est_base_time(now: DateTime<Utc>) -> i64 {
    let ceil = now.timestamp() + i64::from(now.timestamp_subsec_nanos() > 0);
    ceil + 3
}

struct TsnDiscAction;

#[async_trait]
impl ConfigAction for TsnDiscAction {
    fn name(&self) -> &str {
        "process_tc_data"
    }

    async fn apply(&self, node: &Value, ctx: &mut ActionContext) -> Result<()> {
        info!("Setting up TSN queues disciplines...");
        let settings: TsnSettings = parse_node(TSN_DISC, node)?;
        let Some(iface) = settings.interface.as_deref() else {
            return Ok(());
        };

        debug!("deleting existing qdiscs");
        run_quiet(ctx, CommandSpec::line(&format!("tc qdisc del dev {} root", iface))?).await?;
        ctx.settle(QDISC_DELETE_SETTLE).await;

        let using_taprio = settings.taprio.is_some();
        if let Some(taprio) = &settings.taprio {
            debug!("setting up taprio qdisc");
            let maps = priority_map("tsn-disc.taprio.mapping", &taprio.mapping)?;
            let base_time_ns = (Utc::now().timestamp() + 1) * 1_000_000_000;
            let cmd = taprio_command(iface, &maps, taprio, base_time_ns)?.silent();
            run_lenient(ctx, cmd, "TAPRIO TSN qdisc").await;
        } else if let Some(mqprio) = &settings.mqprio {
            debug!("setting up mqprio qdisc");
            let maps = priority_map("tsn-disc.mqprio.mapping", &mqprio.mapping)?;
            run_lenient(ctx, mqprio_command(iface, &maps, mqprio)?.silent(), "MQPRIO TSN qdisc")
                .await;
        }

        let show_cmd = CommandSpec::line(&format!("tc qdisc show dev {}", iface))?;

        if let Some(est) = &settings.ethtool_est {
            debug!("Set up EST with ethtool");
            configure_est(ctx, iface, &est.gcl_path).await?;
        }

        if let Some(cbs) = &settings.cbs {
            let cmd = cbs_command(iface, cbs)?.silent();
            debug!("adding cbs qdisc on queue {}...", cbs.queue);
            run_lenient(ctx, cmd, "CBS TSN qdisc").await;
        }

        if let Some(etf_list) = &settings.etf {
            debug!("Set up ETF");
            let kind = if using_taprio { "taprio" } else { "mqprio" };
            for etf in etf_list {
                let parent = match &etf.parent {
                    Some(parent) => Some(parent.to_string()),
                    None => {
                        let shown = ctx.runner().output(&show_cmd).await.unwrap_or_default();
                        qdisc_parent(&shown, kind)
                    }
                };
                let Some(parent) = parent else {
                    error!("Missing parent for ETF TSN qdisc, incomplete TSN configuration.");
                    return Ok(());
                };
                let cmd = etf_command(iface, &parent, etf)?.silent();
                debug!("Adding etf qdisc on queue {}...", etf.queue);
                run_lenient(ctx, cmd, "ETF TSN qdisc").await;
            }
        }

        if let Some(ethtool) = &settings.ethtool {
            debug!("Apply ethtool configurations: \"{:?}\"", ethtool);
            apply_ethtool(ctx, ethtool, Some(iface)).await?;
        }

        if let Some(vlanrx) = &settings.vlanrx {
            debug!("Set VLAN RX steering");
            run_quiet(ctx, CommandSpec::line(&format!("tc qdisc del dev {} parent ffff:", iface))?)
                .await?;
            run_quiet(ctx, CommandSpec::line(&format!("tc qdisc add dev {} ingress", iface))?)
                .await?;
            for rule in vlanrx {
                run_quiet(
                    ctx,
                    CommandSpec::line(&format!(
                        "tc filter add dev {} parent ffff: protocol 802.1Q flower vlan_prio {} hw_tc {}",
                        iface, rule.vlan_priority, rule.rx_hw_q
                    ))?,
                )
                .await?;
            }
        }

        debug!("TC setup complete");
        let shown = ctx.runner().output(&show_cmd).await.unwrap_or_default();
        debug!("TSN discipline settings: {}", shown.trim_end());
        Ok(())
    }
}

async fn configure_est(ctx: &ActionContext, iface: &str, gcl_path: &Path) -> Result<()> {
    let gcl = std::fs::read_to_string(gcl_path)
        .with_context(|| format!("cannot read gate control list {}", gcl_path.display()))?;
    let cycle_time = gcl_cycle_time(&gcl)?;
    let base_time = est_base_time(Utc::now());
    debug!("cycle time: {} base: {}", cycle_time, base_time);

    let gcl_path = gcl_path.display();
    let commands = [
        format!("ethtool -K {} tx-est on", iface),
        format!("ethtool --set-gcl {} own admin file {}", iface, gcl_path),
        format!(
            "ethtool --set-est-info {} own admin cycle {} base {} ext 0.0",
            iface, cycle_time, base_time
        ),
        format!("ethtool --get-est-info {} own admin", iface),
    ];
    for line in commands {
        if let Err(e) = ctx.runner().run(&CommandSpec::line(&line)?.silent()).await {
            error!(
                "Cannot configure Gate Control List, jitter of transmission latency can be \
                 unpredictable ({:#})",
                e
            );
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_priority_map_overrides_default() {
        let mapping: BTreeMap<String, Scalar> =
            serde_json::from_value(json!({"default": 0, "p3": 1, "p15": 3})).unwrap();
        let maps = priority_map("tsn-disc.taprio.mapping", &mapping).unwrap();
        assert_eq!(maps, "0 0 0 1 0 0 0 0 0 0 0 0 0 0 0 3");
    }

    #[test]
    fn test_priority_map_rejects_out_of_range_priority() {
        let mapping: BTreeMap<String, Scalar> =
            serde_json::from_value(json!({"default": 0, "p16": 1})).unwrap();
        assert!(matches!(
            priority_map("m", &mapping),
            Err(ConfigError::InvalidValue { .. })
        ));
        let no_default: BTreeMap<String, Scalar> =
            serde_json::from_value(json!({"p1": 1})).unwrap();
        assert!(matches!(
            priority_map("m", &no_default),
            Err(ConfigError::MissingKey { .. })
        ));
    }

    #[test]
    fn test_taprio_command_line() {
        let taprio: TaprioSettings = serde_json::from_value(json!({
            "num_tc": 3,
            "queues": "1@0 1@1 2@2",
            "handle": 100,
            "mapping": {"default": 0},
            "schedule": [
                {"gate_mask": "01", "duration": 250000},
                {"gate_mask": "02", "duration": 750000}
            ],
            "offload": true
        }))
        .unwrap();
        let cmd = taprio_command("enp1s0", "0 0", &taprio, 1_000_000_000).unwrap();
        assert_eq!(
            cmd.command_line(),
            "tc -d qdisc replace dev enp1s0 parent root handle 100 taprio num_tc 3 map 0 0 \
             queues 1@0 1@1 2@2 base-time 1000000000 sched-entry S 01 250000 \
             sched-entry S 02 750000 flags 0x2 offload 1"
        );
    }

    #[test]
    fn test_cbs_uses_both_credits() {
        let cbs: CbsSettings = serde_json::from_value(json!({
            "handle": 200, "parent": 100, "queue": 0,
            "sendslope": -980000, "idleslope": 20000,
            "hicredit": 30, "locredit": -1470, "offload": 1
        }))
        .unwrap();
        assert_eq!(
            cbs_command("enp1s0", &cbs).unwrap().command_line(),
            "tc qdisc replace dev enp1s0 handle 200 parent 100:1 cbs idleslope 20000 \
             sendslope -980000 hicredit 30 locredit -1470 offload 1"
        );
    }

    #[test]
    fn test_etf_flags_follow_config() {
        let etf: EtfSettings = serde_json::from_value(json!({
            "delta": 500000, "queue": 1, "offload": true, "deadline_mode": false
        }))
        .unwrap();
        assert_eq!(
            etf_command("enp1s0", "100", &etf).unwrap().command_line(),
            "tc qdisc replace dev enp1s0 parent 100:2 etf clockid CLOCK_TAI delta 500000 offload"
        );
    }

    #[test]
    fn test_qdisc_parent_parsing() {
        let shown = "qdisc taprio 100: root refcnt 9 tc 4 map 3 3 3\nqdisc etf 8001: parent 100:1\n";
        assert_eq!(qdisc_parent(shown, "taprio").as_deref(), Some("100"));
        assert_eq!(qdisc_parent(shown, "mqprio"), None);
    }

    #[test]
    fn test_gcl_cycle_time_and_base() {
        let gcl = "S 01 300000\nS 02 700000\n";
        assert!((gcl_cycle_time(gcl).unwrap() - 0.001).abs() < 1e-12);
        assert!(gcl_cycle_time("S 01\n").is_err());

        let exact = Utc.timestamp_opt(1_000, 0).unwrap();
        let fractional = Utc.timestamp_opt(1_000, 5).unwrap();
        assert_eq!(est_base_time(exact), 1_003);
        assert_eq!(est_base_time(fractional), 1_004);
    }

    #[test]
    fn test_last_queue_number_is_rejected() {
        let cbs: CbsSettings = serde_json::from_value(json!({
            "handle": 200, "parent": 100, "queue": u32::MAX,
            "sendslope": -980000, "idleslope": 20000,
            "hicredit": 30, "locredit": -1470, "offload": 1
        }))
        .unwrap();
        assert!(matches!(
            cbs_command("enp1s0", &cbs),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "tsn-disc.cbs.queue"
        ));

        let etf: EtfSettings =
            serde_json::from_value(json!({"delta": 500000, "queue": u32::MAX})).unwrap();
        assert!(etf_command("enp1s0", "100", &etf).is_err());
        assert_eq!(queue_class("q", 3).unwrap(), 4);
    }

    #[test]
    fn test_gcl_interval_sum_overflow_is_a_config_error() {
        let gcl = format!("S 01 {}\nS 02 1\n", u64::MAX);
        let err = gcl_cycle_time(&gcl).unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }
}
