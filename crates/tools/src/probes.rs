//! Host probing: required applications, hardware timestamping support,
//! network interface presence and target board detection.

use std::path::Path;
use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tracing::debug;

use common::EnvironmentError;
use rtc_core::{CommandRunner, CommandSpec, Target};

/// Инструменты, без которых демо не запускается
pub const REQUIRED_APPS: &[&str] = &[
    "ip",
    "tc",
    "ethtool",
    "ptp4l",
    "phc2sys",
    "pmc",
    "hwstamp_ctl",
    "taskset",
    "killall",
];

/// Needed only with a remote address
pub const REQUIRED_REMOTE_APPS: &[&str] = &["ssh", "scp"];

/// Needed only with best-effort load enabled
pub const REQUIRED_STRESS_APPS: &[&str] = &["iperf3"];

pub const STRESS_HINT: &str =
    ", install the missing tool or try the sample without stress, passing '--no-best-effort' argument";

const SYS_CLASS_NET: &str = "/sys/class/net";
const PTP_CLOCK_PREFIX: &str = "PTP Hardware Clock: ";

pub fn is_application_available(name: &str) -> bool {
    which::which(name).is_ok()
}

/// Fails on the first application that is not on `PATH`
pub fn check_applications(
    applications: &[&str],
    info_message: &str,
    hint: &str,
) -> Result<(), EnvironmentError> {
    debug!("{}...", info_message);
    for app in applications {
        if !is_application_available(app) {
            return Err(EnvironmentError::MissingTool {
                tool: (*app).to_string(),
                hint: hint.to_string(),
            });
        }
    }
    debug!("{}: DONE", info_message);
    Ok(())
}

/// Полный набор проверок инструментов для выбранного режима запуска
pub fn check_required_applications(remote: bool, stresses: bool) -> Result<(), EnvironmentError> {
    check_applications(REQUIRED_APPS, "Checking for required applications", "")?;
    if remote {
        check_applications(
            REQUIRED_REMOTE_APPS,
            "Checking for required applications for the remote mode",
            "",
        )?;
    }
    if stresses {
        check_applications(
            REQUIRED_STRESS_APPS,
            "Checking for required stress applications",
            STRESS_HINT,
        )?;
    }
    Ok(())
}

/// Value of the "PTP Hardware Clock" line of `ethtool --show-time-stamping`,
/// `None` when absent, empty or "none".
pub fn parse_hardware_clock(output: &str) -> Option<&str> {
    output
        .lines()
        .find_map(|line| line.strip_prefix(PTP_CLOCK_PREFIX))
        .map(str::trim)
        .filter(|clock| !clock.is_empty() && *clock != "none")
}

pub async fn check_hardware_timestamping(
    runner: &dyn CommandRunner,
    interface: &str,
) -> Result<(), EnvironmentError> {
    let cmd = CommandSpec::new("ethtool").args(["--show-time-stamping", interface]);
    let output = runner.output(&cmd).await.unwrap_or_default();
    match parse_hardware_clock(&output) {
        Some(clock) => {
            debug!("PTP hardware clock of {}: {}", interface, clock);
            Ok(())
        }
        None => Err(EnvironmentError::NoHardwareTimestamping {
            interface: interface.to_string(),
        }),
    }
}

pub fn interface_exists(name: &str) -> bool {
    interface_exists_in(Path::new(SYS_CLASS_NET), name)
}

pub fn interface_exists_in(sys_class_net: &Path, name: &str) -> bool {
    sys_class_net.join(name).exists()
}

/// `pgrep <name>` reports at least one process
pub async fn is_running(runner: &dyn CommandRunner, name: &str) -> bool {
    match runner.output(&CommandSpec::new("pgrep").arg(name)).await {
        Ok(out) => out.lines().any(|l| !l.trim().is_empty()),
        Err(_) => false,
    }
}

/// Семейство платы по строке модели процессора.
///
/// Atom x6000E -> EHL. 11th Gen Core и Xeon W-11xxx: embedded-модели
/// с суффиксом HE/RE/LE -> TGL-H, остальные -> TGL-U.
pub fn target_from_cpu_brand(brand: &str) -> Option<Target> {
    if brand.contains("Atom") {
        return Some(Target::Ehl);
    }
    if brand.contains("11th Gen") || brand.contains("Xeon(R) W-11") {
        let model = brand
            .split_whitespace()
            .find(|word| word.contains('-') && word.chars().any(|c| c.is_ascii_digit()))
            .unwrap_or_default();
        let high_power = ["HE", "RE", "LE"].iter().any(|suffix| model.ends_with(suffix));
        return Some(if high_power { Target::TglH } else { Target::TglU });
    }
    None
}

pub fn cpu_brand() -> Option<String> {
    let system =
        System::new_with_specifics(RefreshKind::new().with_cpu(CpuRefreshKind::everything()));
    system
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .filter(|brand| !brand.is_empty())
}

pub fn detect_target() -> Result<Target, EnvironmentError> {
    let brand = cpu_brand().ok_or_else(|| EnvironmentError::TargetDetection {
        reason: "processor model name is not available".to_string(),
    })?;
    let target = target_from_cpu_brand(&brand).ok_or_else(|| EnvironmentError::TargetDetection {
        reason: format!("unknown platform: {}", brand),
    })?;
    debug!("Auto-detected target: {}, processor name: {}", target, brand);
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::RecordingRunner;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("Intel(R) Atom(TM) x6425RE Processor @ 1.90GHz", Some(Target::Ehl))]
    #[case("11th Gen Intel(R) Core(TM) i7-1185GRE @ 2.80GHz", Some(Target::TglH))]
    #[case("11th Gen Intel(R) Core(TM) i5-11500HE @ 2.60GHz", Some(Target::TglH))]
    #[case("11th Gen Intel(R) Core(TM) i7-1185G7E @ 2.80GHz", Some(Target::TglU))]
    #[case("Intel(R) Xeon(R) W-11865MLE @ 1.50GHz", Some(Target::TglH))]
    #[case("AMD Ryzen 7 5800X 8-Core Processor", None)]
    fn test_target_from_cpu_brand(#[case] brand: &str, #[case] expected: Option<Target>) {
        assert_eq!(target_from_cpu_brand(brand), expected);
    }

    #[rstest]
    #[case("PTP Hardware Clock: 0\nHardware Transmit Timestamp Modes:\n", Some("0"))]
    #[case("Time stamping parameters for eth0:\nPTP Hardware Clock: none\n", None)]
    #[case("PTP Hardware Clock: \n", None)]
    #[case("Capabilities:\n\tsoftware-receive\n", None)]
    fn test_parse_hardware_clock(#[case] output: &str, #[case] expected: Option<&str>) {
        assert_eq!(parse_hardware_clock(output), expected);
    }

    #[tokio::test]
    async fn test_hardware_timestamping_check_uses_ethtool() {
        let runner = RecordingRunner::new()
            .with_output("ethtool --show-time-stamping enp1s0", "PTP Hardware Clock: 1\n");
        assert!(check_hardware_timestamping(&runner, "enp1s0").await.is_ok());

        let err = check_hardware_timestamping(&runner, "enp2s0").await.unwrap_err();
        assert!(matches!(err, EnvironmentError::NoHardwareTimestamping { .. }));
        assert_eq!(
            runner.lines(),
            [
                "ethtool --show-time-stamping enp1s0",
                "ethtool --show-time-stamping enp2s0"
            ]
        );
    }

    #[tokio::test]
    async fn test_is_running_reads_pgrep_output() {
        let runner = RecordingRunner::new().with_output("pgrep ptp4l", "1234\n");
        assert!(is_running(&runner, "ptp4l").await);
        assert!(!is_running(&runner, "phc2sys").await);
    }

    #[test]
    fn test_interface_lookup_under_sysfs_root() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("enp1s0")).unwrap();
        assert!(interface_exists_in(dir.path(), "enp1s0"));
        assert!(!interface_exists_in(dir.path(), "enp9s0"));
    }

    #[test]
    fn test_missing_application_reports_hint() {
        let err = check_applications(
            &["definitely-not-installed-rtc-tool"],
            "Checking for required stress applications",
            STRESS_HINT,
        )
        .unwrap_err();
        assert!(err.to_string().contains("--no-best-effort"));
    }
}
