//! `eth-if` section: addresses, VLAN, ethtool offloads and IRQ affinity

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, error, info, trace};

use rtc_core::action_names::ETH_IF;
use rtc_core::{ActionContext, CommandSpec, ConfigAction, HandlerRegistry, RegistrationOutcome};

use super::{parse_node, register_action, run_quiet, Scalar};

pub const IP_PATH: &str = "eth-if.ip";
pub const ETHTOOL_PATH: &str = "eth-if.ethtool";
pub const IRQ_AFFINITY_PATH: &str = "eth-if.irq-affinity";

/// Helper script shipped next to the binary
pub const IRQ_AFFINITY_SCRIPT: &str = "apply_irq_affinities.sh";

/// Number of socket priorities mapped 1:1 onto VLAN priorities
const VLAN_QOS_PRIORITIES: u32 = 5;

pub fn register(registry: &mut HandlerRegistry) -> Vec<RegistrationOutcome> {
    vec![
        register_action(registry, ETH_IF, 200, EthIfSection),
        register_action(registry, IP_PATH, 10, IpAction),
        register_action(registry, ETHTOOL_PATH, 20, EthtoolAction),
        register_action(registry, IRQ_AFFINITY_PATH, 30, IrqAffinityAction),
    ]
}

struct EthIfSection;

#[async_trait]
impl ConfigAction for EthIfSection {
    fn name(&self) -> &str {
        "eth_if_main"
    }

    async fn apply(&self, _node: &Value, _ctx: &mut ActionContext) -> Result<()> {
        trace!("start processing eth-if section");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct IpSettings {
    interface: String,
    if_address: Scalar,
    if_net_bits_count: Scalar,
    if_broadcast_address: Scalar,
    if_mac_address: Scalar,
    vlan_id: Option<Scalar>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct VlanSettings {
    vlan_address: Scalar,
    vlan_net_bits_count: Scalar,
    vlan_broadcast_address: Scalar,
}

struct IpAction;

#[async_trait]
impl ConfigAction for IpAction {
    fn name(&self) -> &str {
        "process_ip_data"
    }

    async fn apply(&self, node: &Value, ctx: &mut ActionContext) -> Result<()> {
        info!("Configuring network interface(s)...");
        let ip: IpSettings = parse_node(IP_PATH, node)?;
        let vlan: Option<VlanSettings> = match ip.vlan_id {
            Some(_) => Some(parse_node(IP_PATH, node)?),
            None => None,
        };
        let iface = ip.interface.as_str();

        debug!("setting MAC address for interface \"{}\"", iface);
        run_quiet(ctx, CommandSpec::line(&format!("ip link set {} down", iface))?).await?;
        run_quiet(
            ctx,
            CommandSpec::line(&format!("ip link set dev {} address {}", iface, ip.if_mac_address))?,
        )
        .await?;
        run_quiet(ctx, CommandSpec::line(&format!("ip link set {} up", iface))?).await?;

        debug!("flushing network interface \"{}\"", iface);
        run_quiet(ctx, CommandSpec::line(&format!("ip addr flush dev {}", iface))?).await?;

        debug!("setting up addresses for interface \"{}\"", iface);
        run_quiet(
            ctx,
            CommandSpec::line(&format!(
                "ip addr add {}/{} brd {} dev {}",
                ip.if_address, ip.if_net_bits_count, ip.if_broadcast_address, iface
            ))?,
        )
        .await?;

        debug!("flush neighbours on interface \"{}\"", iface);
        run_quiet(ctx, CommandSpec::line(&format!("ip neigh flush all dev {}", iface))?).await?;

        if let (Some(vlan_id), Some(vlan)) = (&ip.vlan_id, vlan) {
            let vlan_if = format!("{}.vlan", iface);

            debug!("remove previously created vlan on \"{}\"", iface);
            run_quiet(ctx, CommandSpec::line(&format!("ip link delete dev {}", vlan_if))?).await?;

            debug!("adding vlan with id {} on interface \"{}\"", vlan_id, iface);
            run_quiet(
                ctx,
                CommandSpec::line(&format!(
                    "ip link add link {} name {} type vlan id {}",
                    iface, vlan_if, vlan_id
                ))?,
            )
            .await?;

            run_quiet(ctx, CommandSpec::line(&format!("ip addr flush dev {}", vlan_if))?).await?;
            run_quiet(
                ctx,
                CommandSpec::line(&format!(
                    "ip addr add {}/{} brd {} dev {}",
                    vlan.vlan_address, vlan.vlan_net_bits_count, vlan.vlan_broadcast_address, vlan_if
                ))?,
            )
            .await?;

            debug!("map socket priority to vlan priority");
            for prio in 1..=VLAN_QOS_PRIORITIES {
                run_quiet(
                    ctx,
                    CommandSpec::line(&format!(
                        "ip link set {} type vlan egress-qos-map {}:{}",
                        vlan_if, prio, prio
                    ))?,
                )
                .await?;
            }

            run_quiet(ctx, CommandSpec::line(&format!("ip neigh flush all dev {}", vlan_if))?)
                .await?;
        }
        Ok(())
    }
}

/// Настройки ethtool; используются и в `eth-if.ethtool`, и в `tsn-disc.ethtool`
#[derive(Debug, Default, Deserialize)]
pub(crate) struct EthtoolSettings {
    pub interface: Option<String>,
    pub tso: Option<Scalar>,
    pub rx: Option<Scalar>,
    pub tx: Option<Scalar>,
    pub rxvlan: Option<Scalar>,
}

fn on_off(value: &Scalar) -> Option<&str> {
    match value {
        Scalar::Str(s) if s == "on" || s == "off" => Some(s.as_str()),
        _ => None,
    }
}

/// Unexpected on/off values are reported and skipped
pub(crate) async fn apply_ethtool(
    ctx: &ActionContext,
    settings: &EthtoolSettings,
    iface: Option<&str>,
) -> Result<()> {
    let Some(iface) = iface else {
        return Ok(());
    };

    if let Some(tso) = &settings.tso {
        match on_off(tso) {
            Some(state) => {
                run_quiet(ctx, CommandSpec::line(&format!("ethtool -K {} tso {}", iface, state))?)
                    .await?
            }
            None => error!("Unexpected action for ethtool TSO handler: {}", tso),
        }
    }

    if let (Some(rx), Some(tx)) = (&settings.rx, &settings.tx) {
        debug!("Setting queues for interface \"{}\": rx: {}, tx: {}", iface, rx, tx);
        run_quiet(
            ctx,
            CommandSpec::line(&format!("ethtool -L {} rx {} tx {}", iface, rx, tx))?,
        )
        .await?;
    }

    if let Some(rxvlan) = &settings.rxvlan {
        match on_off(rxvlan) {
            Some(state) => {
                run_quiet(
                    ctx,
                    CommandSpec::line(&format!("ethtool -K {} rxvlan {}", iface, state))?,
                )
                .await?
            }
            None => error!("Unexpected action for ethtool rxvlan handler: {}", rxvlan),
        }
    }
    Ok(())
}

struct EthtoolAction;

#[async_trait]
impl ConfigAction for EthtoolAction {
    fn name(&self) -> &str {
        "process_ethtool_data"
    }

    async fn apply(&self, node: &Value, ctx: &mut ActionContext) -> Result<()> {
        let settings: EthtoolSettings = parse_node(ETHTOOL_PATH, node)?;
        apply_ethtool(ctx, &settings, settings.interface.as_deref()).await
    }
}

#[derive(Debug, Deserialize)]
struct IrqAffinitySettings {
    file: Option<PathBuf>,
    interface: Option<String>,
}

struct IrqAffinityAction;

#[async_trait]
impl ConfigAction for IrqAffinityAction {
    fn name(&self) -> &str {
        "process_irq_affinity_data"
    }

    async fn apply(&self, node: &Value, ctx: &mut ActionContext) -> Result<()> {
        let settings: IrqAffinitySettings = parse_node(IRQ_AFFINITY_PATH, node)?;
        let Some(file) = settings.file else {
            error!("Missing required argument \"file\" in \"{}: {}\"", IRQ_AFFINITY_PATH, node);
            return Ok(());
        };
        if !file.is_file() {
            error!(
                "The file {} provided for \"{}.file\" does not exist",
                file.display(),
                IRQ_AFFINITY_PATH
            );
            return Ok(());
        }
        let Some(iface) = settings.interface else {
            error!("Missing required argument \"interface\" in \"{}\"", IRQ_AFFINITY_PATH);
            return Ok(());
        };

        debug!(
            "Applying affinity requirements: file: {}, iface: {}",
            file.display(),
            iface
        );
        let cmd = CommandSpec::new("sh")
            .arg(IRQ_AFFINITY_SCRIPT)
            .arg(iface)
            .arg(file.display().to_string());
        if let Err(e) = ctx.runner().run(&cmd).await {
            error!("Cannot apply IRQ affinities with \"{}\": {:#}", cmd, e);
        }
        Ok(())
    }
}
