use async_trait::async_trait;
use common::{ConfigError, EnvironmentError, Interrupted};
use rtc_core::{
    apply_workarounds, ActionContext, BackgroundProcess, CommandRunner, CommandSpec,
    CommandStatus, DispatchError, DispatchPlan, Dispatcher, HandlerRegistry, HostFacts, Mode,
    ModeActionTable, OutputMode, RuntimeConfig,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tools::actions::run_apps::{finish_apps, CarrierNotFound, CAPTURE_ROLE, CARRIER_ROLE};
use tools::actions::wait_or_interrupt;
use tools::actions::stress::IPERF_CLIENT_LOG;
use tools::{register_all, DryRunRunner, RecordingRunner};

struct Fixture {
    _dir: TempDir,
    config_path: PathBuf,
    config: RuntimeConfig,
}

fn fixture(mode: &str) -> Fixture {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().to_path_buf();
    let mut config = RuntimeConfig::with_host(HostFacts::default());
    config.set_profile("basic-a-noopt").unwrap();
    config.set_interface("enp1s0").unwrap();
    config.set_config_path(&config_path).unwrap();
    config.set_output_file(None).unwrap();
    config.set_mode(mode).unwrap();
    Fixture {
        _dir: dir,
        config_path,
        config,
    }
}

fn plan(config: &mut RuntimeConfig) -> DispatchPlan {
    let mut registry = HandlerRegistry::new();
    assert_eq!(register_all(&mut registry), 0);
    apply_workarounds(registry, ModeActionTable::default(), config)
}

async fn dispatch(
    mut config: RuntimeConfig,
    runner: Arc<dyn CommandRunner>,
    doc: &Value,
    mode: Mode,
) -> Result<rtc_core::DispatchReport, DispatchError> {
    let plan = plan(&mut config);
    let mut ctx = ActionContext::new(Arc::new(config), runner);
    Dispatcher::new(&plan).dispatch(doc, mode, &mut ctx).await
}

#[tokio::test]
async fn test_eth_if_ip_with_vlan_and_ethtool() {
    let fx = fixture("setup");
    let runner = RecordingRunner::new();
    let doc = json!({
        "eth-if": {
            "ip": {
                "interface": "enp1s0",
                "if-address": "192.168.0.10",
                "if-net-bits-count": 24,
                "if-broadcast-address": "192.168.0.255",
                "if-mac-address": "aa:bb:cc:dd:ee:01",
                "vlan-id": 3,
                "vlan-address": "169.254.0.1",
                "vlan-net-bits-count": 24,
                "vlan-broadcast-address": "169.254.0.255"
            },
            "ethtool": {"interface": "enp1s0", "tso": "off", "rx": 4, "tx": 4, "rxvlan": "maybe"}
        }
    });

    let report = dispatch(fx.config, Arc::new(runner.clone()), &doc, Mode::Setup)
        .await
        .unwrap();

    assert_eq!(report.invoked, ["eth-if", "eth-if.ip", "eth-if.ethtool"]);
    let mut expected = vec![
        "ip link set enp1s0 down".to_string(),
        "ip link set dev enp1s0 address aa:bb:cc:dd:ee:01".to_string(),
        "ip link set enp1s0 up".to_string(),
        "ip addr flush dev enp1s0".to_string(),
        "ip addr add 192.168.0.10/24 brd 192.168.0.255 dev enp1s0".to_string(),
        "ip neigh flush all dev enp1s0".to_string(),
        "ip link delete dev enp1s0.vlan".to_string(),
        "ip link add link enp1s0 name enp1s0.vlan type vlan id 3".to_string(),
        "ip addr flush dev enp1s0.vlan".to_string(),
        "ip addr add 169.254.0.1/24 brd 169.254.0.255 dev enp1s0.vlan".to_string(),
    ];
    for prio in 1..=5 {
        expected.push(format!(
            "ip link set enp1s0.vlan type vlan egress-qos-map {}:{}",
            prio, prio
        ));
    }
    expected.push("ip neigh flush all dev enp1s0.vlan".to_string());
    expected.push("ethtool -K enp1s0 tso off".to_string());
    expected.push("ethtool -L enp1s0 rx 4 tx 4".to_string());
    assert_eq!(runner.lines(), expected);
    assert!(runner
        .commands()
        .iter()
        .all(|c| c.output == OutputMode::Silent));
}

#[tokio::test]
async fn test_missing_required_key_aborts_with_node_path() {
    let fx = fixture("setup");
    let runner = RecordingRunner::new();
    let doc = json!({"eth-if": {"ip": {"interface": "enp1s0", "if-mac-address": "aa"}}});

    let err = dispatch(fx.config, Arc::new(runner.clone()), &doc, Mode::Setup)
        .await
        .unwrap_err();

    assert_eq!(err.path(), Some("eth-if.ip"));
    assert!(err.to_string().contains("if-address not found in eth-if.ip"));
    assert!(runner.lines().is_empty());
}

#[tokio::test]
async fn test_irq_affinity_problems_are_not_fatal() {
    let fx = fixture("setup");
    let irq_file = fx.config_path.join("irq.txt");
    std::fs::write(&irq_file, "eth0-TxRx-0 1\n").unwrap();
    let runner = RecordingRunner::new();

    let missing = json!({"eth-if": {"irq-affinity": {"interface": "enp1s0", "file": "/nonexistent/irq.txt"}}});
    let present = json!({"eth-if": {"irq-affinity": {"interface": "enp1s0", "file": irq_file}}});

    let config = fx.config.clone();
    dispatch(config, Arc::new(runner.clone()), &missing, Mode::Setup)
        .await
        .unwrap();
    assert!(runner.lines().is_empty());

    dispatch(fx.config, Arc::new(runner.clone()), &present, Mode::Setup)
        .await
        .unwrap();
    assert_eq!(
        runner.lines(),
        [format!("sh apply_irq_affinities.sh enp1s0 {}", irq_file.display())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_tsn_mqprio_and_etf_parent_from_qdisc_listing() {
    let fx = fixture("tsn");
    let runner = RecordingRunner::new()
        .with_output("tc qdisc show dev enp1s0", "qdisc mqprio 100: root tc 3 map 2 2 1 0\n")
        .with_status("tc qdisc add dev enp1s0 parent root", 2);
    let doc = json!({
        "tsn-disc": {
            "interface": "enp1s0",
            "mqprio": {
                "num_tc": 3,
                "queues": "1@0 1@1 2@2",
                "handle": 100,
                "mapping": {"default": 2, "p2": 1, "p3": 0}
            },
            "etf": [{"queue": 0, "delta": 200000, "offload": true}]
        }
    });

    // a failing mqprio command is reported, not fatal
    dispatch(fx.config, Arc::new(runner.clone()), &doc, Mode::Tsn)
        .await
        .unwrap();

    let mut map = vec!["2"; 16];
    map[2] = "1";
    map[3] = "0";
    assert_eq!(
        runner.lines(),
        [
            "tc qdisc del dev enp1s0 root".to_string(),
            format!(
                "tc qdisc add dev enp1s0 parent root handle 100 mqprio num_tc 3 map {} queues 1@0 1@1 2@2 hw 0",
                map.join(" ")
            ),
            "tc qdisc show dev enp1s0".to_string(),
            "tc qdisc replace dev enp1s0 parent 100:1 etf clockid CLOCK_TAI delta 200000 offload"
                .to_string(),
            "tc qdisc show dev enp1s0".to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_tsn_vlanrx_rules() {
    let fx = fixture("tsn");
    let runner = RecordingRunner::new();
    let doc = json!({
        "tsn-disc": {
            "interface": "enp1s0",
            "vlanrx": [
                {"vlan_priority": 2, "rx_hw_q": 1},
                {"vlan_priority": 3, "rx_hw_q": 2}
            ]
        }
    });

    dispatch(fx.config, Arc::new(runner.clone()), &doc, Mode::Tsn)
        .await
        .unwrap();

    assert_eq!(
        runner.lines(),
        [
            "tc qdisc del dev enp1s0 root",
            "tc qdisc del dev enp1s0 parent ffff:",
            "tc qdisc add dev enp1s0 ingress",
            "tc filter add dev enp1s0 parent ffff: protocol 802.1Q flower vlan_prio 2 hw_tc 1",
            "tc filter add dev enp1s0 parent ffff: protocol 802.1Q flower vlan_prio 3 hw_tc 2",
            "tc qdisc show dev enp1s0",
        ]
    );
}

#[tokio::test]
async fn test_sync_clocks_requires_hardware_timestamping() {
    let fx = fixture("clock");
    let runner = RecordingRunner::new().with_status("hwstamp_ctl", 1);
    let doc = json!({"sync-clocks": {"ptp4l": {"interface": "enp1s0"}}});

    let err = dispatch(fx.config, Arc::new(runner.clone()), &doc, Mode::Clock)
        .await
        .unwrap_err();

    match err {
        DispatchError::Action { path, source } => {
            assert_eq!(path, "sync-clocks");
            assert!(matches!(
                source.downcast_ref::<EnvironmentError>(),
                Some(EnvironmentError::NoHardwareTimestamping { .. })
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(runner.lines(), ["hwstamp_ctl -i enp1s0"]);
}

#[tokio::test(start_paused = true)]
async fn test_sync_clocks_restarts_services() {
    let fx = fixture("clock");
    let runner = RecordingRunner::new();
    let doc = json!({
        "sync-clocks": {
            "phc2sys": {"interface": "enp1s0", "clock": "CLOCK_REALTIME"},
            "ptp4l": {"interface": "enp1s0"}
        }
    });
    let gptp = fx.config_path.join("ptp").join("gPTP.cfg");

    let report = dispatch(fx.config, Arc::new(runner.clone()), &doc, Mode::Clock)
        .await
        .unwrap();

    assert_eq!(
        report.invoked,
        ["sync-clocks", "sync-clocks.ptp4l", "sync-clocks.phc2sys"]
    );
    let lines = runner.lines();
    assert_eq!(lines[0], "hwstamp_ctl -i enp1s0");
    assert_eq!(lines[1], "killall -TERM ptp4l");
    assert_eq!(
        lines[2],
        format!(
            "taskset -c 1 ptp4l -mP2Hi enp1s0 --step_threshold=2 -f {} --socket_priority 1",
            gptp.display()
        )
    );
    assert_eq!(lines[3], "killall -TERM phc2sys");
    assert!(lines[4].starts_with("pmc -u -b 0 -t 1 'SET GRANDMASTER_SETTINGS_NP clockClass 248"));
    assert_eq!(
        lines[5],
        "taskset -c 1 phc2sys -s enp1s0 -c CLOCK_REALTIME -w -ml 7 -O 0 \
         --transportSpecific=1 --step_threshold=1"
    );

    let background: Vec<_> = runner
        .commands()
        .into_iter()
        .filter(|c| c.background)
        .map(|c| c.output)
        .collect();
    assert_eq!(
        background,
        [
            OutputMode::RedirectTo("/var/log/ptp4l.log".into()),
            OutputMode::RedirectTo("/var/log/pmc.log".into()),
            OutputMode::RedirectTo("/var/log/phc2sys.log".into()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_ptp4l_kept_when_already_running() {
    let fx = fixture("clock");
    let runner = RecordingRunner::new().with_output("pgrep ptp4l", "4242\n");
    let doc = json!({"sync-clocks": {"ptp4l": {"interface": "enp1s0", "ignore_existing": true}}});

    dispatch(fx.config, Arc::new(runner.clone()), &doc, Mode::Clock)
        .await
        .unwrap();

    assert_eq!(runner.lines(), ["hwstamp_ctl -i enp1s0", "pgrep ptp4l"]);
}

#[tokio::test(start_paused = true)]
async fn test_run_apps_starts_capture_then_carrier_and_finish_cleans_up() {
    let fx = fixture("run");
    let pcap = fx
        .config
        .output_path()
        .join("tcc_rt_communication_demo_incoming.pcap");
    let runner = RecordingRunner::new();
    let doc = json!({
        "run-apps": {"carrier": "sh", "carrier-args": "-c true", "tcpdump": "enp1s0"},
        "finish-apps": {}
    });

    let report = dispatch(fx.config, Arc::new(runner.clone()), &doc, Mode::Run)
        .await
        .unwrap();

    assert_eq!(report.invoked, ["run-apps", "finish-apps"]);
    let capture = format!(
        "tcpdump -i enp1s0 -q ether proto 0xb62c -Q in --time-stamp-precision=nano \
         -j adapter_unsynced -w {}",
        pcap.display()
    );
    assert_eq!(runner.lines(), [capture.clone(), "sh -c true".to_string()]);
    assert_eq!(runner.terminated(), [capture]);
}

#[tokio::test]
async fn test_quoted_carrier_args_stay_whole() {
    let fx = fixture("run");
    let runner = RecordingRunner::new();
    let doc = json!({"run-apps": {"carrier": "sh", "carrier-args": "-c 'echo hello world'"}});

    dispatch(fx.config, Arc::new(runner.clone()), &doc, Mode::Run)
        .await
        .unwrap();

    assert_eq!(runner.lines(), ["sh -c 'echo hello world'"]);
    let parsed = CommandSpec::line(&runner.lines()[0]).unwrap();
    assert_eq!(parsed.args, ["-c", "echo hello world"]);
}

#[tokio::test]
async fn test_unbalanced_quote_in_carrier_args_is_fatal() {
    let fx = fixture("run");
    let runner = RecordingRunner::new();
    let doc = json!({"run-apps": {"carrier": "sh", "carrier-args": "-c 'echo hello"}});

    let err = dispatch(fx.config, Arc::new(runner.clone()), &doc, Mode::Run)
        .await
        .unwrap_err();
    assert_eq!(err.path(), Some("run-apps"));
    match err {
        DispatchError::Action { source, .. } => match source.downcast_ref::<ConfigError>() {
            Some(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, "run-apps.carrier-args"),
            other => panic!("unexpected source: {other:?}"),
        },
        other => panic!("unexpected error: {other}"),
    }
    assert!(runner.lines().is_empty());
}

/// Процесс, который не завершается сам
#[derive(Clone, Default)]
struct Endless {
    terminated: Arc<AtomicBool>,
}

#[async_trait]
impl BackgroundProcess for Endless {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> anyhow::Result<CommandStatus> {
        std::future::pending().await
    }

    async fn terminate(&mut self) -> anyhow::Result<()> {
        self.terminated.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_interrupt_stops_waited_process() {
    let mut process = Endless::default();
    let err = wait_or_interrupt("remote-session", &mut process, std::future::ready(()))
        .await
        .unwrap_err();

    assert!(Interrupted::is_in(&err));
    assert!(process.terminated.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_interrupted_finish_apps_still_stops_capture() {
    let fx = fixture("run");
    let runner = RecordingRunner::new();
    let mut ctx = ActionContext::new(Arc::new(fx.config), Arc::new(runner.clone()));
    let capture = runner
        .spawn(&CommandSpec::new("tcpdump").args(["-i", "enp1s0"]))
        .await
        .unwrap();
    let carrier = Endless::default();
    ctx.processes().insert(CAPTURE_ROLE, capture);
    ctx.processes().insert(CARRIER_ROLE, Box::new(carrier.clone()));

    let err = finish_apps(&mut ctx, std::future::ready(())).await.unwrap_err();

    assert!(Interrupted::is_in(&err));
    assert!(carrier.terminated.load(Ordering::SeqCst));
    assert_eq!(runner.terminated(), ["tcpdump -i enp1s0"]);
    assert!(ctx.processes().take(CAPTURE_ROLE).is_none());
}

#[tokio::test]
async fn test_missing_carrier_is_fatal_unless_dry_run() {
    let doc = json!({"run-apps": {"carrier": "rtc-missing-carrier-binary", "carrier-args": "--x"}});

    let fx = fixture("run");
    let runner = RecordingRunner::new();
    let err = dispatch(fx.config, Arc::new(runner.clone()), &doc, Mode::Run)
        .await
        .unwrap_err();
    match err {
        DispatchError::Action { source, .. } => {
            assert!(source.downcast_ref::<CarrierNotFound>().is_some());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(runner.lines().is_empty());

    let fx = fixture("run");
    dispatch(fx.config, Arc::new(DryRunRunner::new()), &doc, Mode::Run)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_remote_session_lifecycle() {
    let mut fx = fixture("all");
    fx.config.set_remote_config_path(Some(PathBuf::from("cfg")));
    fx.config.set_remote_address(Some("192.168.0.2"));
    let log = fx.config_path.join("remote.log");
    let runner = RecordingRunner::new();
    let doc = json!({
        "run-remote-apps": {
            "app": "tcc_rt_communication_demo",
            "app-args": "--dry-run",
            "log-file": log
        },
        "finish-remote-apps": {"copy-results": [{"from": "/tmp/out/log_e2e.log", "to": "."}]}
    });

    dispatch(fx.config, Arc::new(runner.clone()), &doc, Mode::All)
        .await
        .unwrap();

    let commands = runner.commands();
    assert_eq!(commands.len(), 2);
    assert_eq!(
        commands[0].line,
        "ssh 192.168.0.2 'cd /tmp && tcc_rt_communication_demo --dry-run --profile basic-b-noopt \
         --interface enp1s0 --config-path cfg --mode all --no-best-effort'"
    );
    assert!(commands[0].background);
    assert_eq!(commands[0].output, OutputMode::RedirectTo(log));
    assert_eq!(commands[1].line, "scp 192.168.0.2:/tmp/out/log_e2e.log .");
    assert_eq!(commands[1].output, OutputMode::Silent);
}

#[tokio::test]
async fn test_remote_apps_skipped_without_address() {
    let fx = fixture("all");
    let runner = RecordingRunner::new();
    let doc = json!({"run-remote-apps": {}, "finish-remote-apps": {}});

    let report = dispatch(fx.config, Arc::new(runner.clone()), &doc, Mode::All)
        .await
        .unwrap();

    assert_eq!(report.invoked, ["run-remote-apps", "finish-remote-apps"]);
    assert!(runner.lines().is_empty());
}

#[tokio::test]
async fn test_best_effort_client_only_with_stresses() {
    let doc = json!({"stress-apps": {"best-effort": {"role": "client", "bandwidth": "100M"}}});

    let fx = fixture("run");
    let runner = RecordingRunner::new();
    let report = dispatch(fx.config, Arc::new(runner.clone()), &doc, Mode::Run)
        .await
        .unwrap();
    assert!(report.invoked.is_empty());
    assert!(runner.lines().is_empty());

    let mut fx = fixture("run");
    fx.config.set_use_stresses(true);
    let runner = RecordingRunner::new();
    dispatch(fx.config, Arc::new(runner.clone()), &doc, Mode::Run)
        .await
        .unwrap();
    let commands = runner.commands();
    assert_eq!(
        commands[0].line,
        "iperf3 --client 169.254.0.2 --udp --bandwidth 100M --len 1448 --time 30"
    );
    assert_eq!(commands[0].output, OutputMode::RedirectTo(IPERF_CLIENT_LOG.into()));
}
