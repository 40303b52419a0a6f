//! Start-up phase: validating setters in CLI order, process environment
//! and host checks.

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use common::ConfigError;
use rtc_core::{CommandRunner, RuntimeConfig, Target};
use tools::probes;

use crate::args::Cli;

/// Каталог исполняемого файла: там лежат `cfg/` и вспомогательные скрипты
pub fn exe_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

/// Relative config paths are taken from the executable's directory
pub fn resolve_config_path(path: &Path, exe_dir: Option<&Path>) -> PathBuf {
    match exe_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

fn join_paths(first: &Path, rest: Option<OsString>) -> Result<OsString> {
    let mut paths = vec![first.to_path_buf()];
    if let Some(rest) = rest {
        paths.extend(std::env::split_paths(&rest));
    }
    std::env::join_paths(paths).context("cannot build search path")
}

pub fn prepend_env_path(var: &str, dir: &Path) -> Result<()> {
    let value = join_paths(dir, std::env::var_os(var))?;
    std::env::set_var(var, value);
    Ok(())
}

pub fn append_env_path(var: &str, dir: &Path) -> Result<()> {
    let mut paths: Vec<PathBuf> = std::env::var_os(var)
        .map(|v| std::env::split_paths(&v).collect())
        .unwrap_or_default();
    paths.push(dir.to_path_buf());
    std::env::set_var(var, std::env::join_paths(paths).context("cannot build search path")?);
    Ok(())
}

/// Fill the runtime configuration from the command line.
///
/// Setters run in declaration order of the options; later setters rely on
/// values stored by earlier ones (output file needs the profile, remote
/// exec path falls back to the exec path).
pub fn build_runtime_config(cli: &Cli) -> Result<RuntimeConfig> {
    let exe_dir = exe_dir();
    let mut config = RuntimeConfig::new();

    config.set_profile(&cli.profile)?;
    config.set_interface(&cli.interface)?;
    config.set_config_path(resolve_config_path(&cli.config_path, exe_dir.as_deref()))?;
    config.set_output_file(cli.output_file.as_deref())?;
    config.set_mode(&cli.mode)?;

    config.set_exec_path(cli.exec_path.clone())?;
    if let Some(exec_path) = config.exec_path() {
        prepend_env_path("PATH", exec_path)?;
        prepend_env_path("LD_LIBRARY_PATH", exec_path)?;
        warn!(
            "directory {} has been prepended to environment variables",
            exec_path.display()
        );
    }

    config.set_use_stresses(!cli.no_best_effort);
    config.set_remote_interface(cli.remote_interface.as_deref());
    config.set_remote_config_path(Some(cli.remote_config_path.clone()));
    config.set_remote_exec_path(cli.remote_exec_path.clone());
    config.set_remote_address(cli.remote_address.as_deref());
    config.set_base_time(cli.base_time);
    config.set_remote_working_dir();
    config.set_remote_output_dir();
    config.set_verbose(cli.verbose);
    config.set_target(resolve_target(&cli.target)?);
    config.set_dry_run(cli.dry_run);

    // helper scripts such as apply_irq_affinities.sh live next to the binary
    if let Some(dir) = &exe_dir {
        append_env_path("PATH", dir)?;
    }
    Ok(config)
}

pub fn resolve_target(name: &str) -> Result<Target> {
    let target: Target = name.parse()?;
    if target != Target::Auto {
        return Ok(target);
    }
    Ok(probes::detect_target()?)
}

/// Проверки хоста перед обходом конфигурации; в dry-run не выполняются
pub async fn check_environment(config: &RuntimeConfig, runner: &dyn CommandRunner) -> Result<()> {
    if config.dry_run() {
        debug!("dry run: host environment checks skipped");
        return Ok(());
    }

    probes::check_required_applications(config.remote_address().is_some(), config.use_stresses())?;

    let interface = config
        .interface()
        .ok_or(ConfigError::NotSet { what: "interface" })?;
    if !probes::interface_exists(interface) {
        return Err(ConfigError::invalid(
            "interface",
            interface,
            "network interface does not exist",
        )
        .into());
    }
    probes::check_hardware_timestamping(runner, interface).await?;
    Ok(())
}
