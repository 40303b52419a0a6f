//! Runtime configuration of one demo run.
//!
//! Заполняется валидирующими сеттерами в порядке объявления опций CLI,
//! затем проверяется `check_consistency`. После начала обхода
//! конфигурации меняется только время старта (фаза корректировки).

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

use common::{ConfigError, ConfigResult};

use crate::domain::{Mode, Profile, Target};
use crate::substitution::SubstitutionList;
use crate::workaround::HostFacts;

pub const DEFAULT_OUTPUT_DIR: &str = "tcc_rt_communication_demo_output";
pub const REMOTE_WORKING_DIR: &str = "/tmp";
pub const REMOTE_OUTPUT_DIR: &str = "/tmp/tcc_rt_communication_demo_output";

/// Kernel series with the XDP communication defect
pub const XDP_DEFECT_KERNEL: &str = "5.10";

const BASE_TIME_DELTA_RUN: u64 = 10;
const BASE_TIME_DELTA_DEFAULT: u64 = 75;

/// First multiple of 5 seconds not earlier than `now`, plus `delta`
pub fn compute_base_time(now: DateTime<Utc>, delta: u64) -> u64 {
    let secs = u64::try_from(now.timestamp()).unwrap_or(0);
    secs.div_ceil(5) * 5 + delta
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    profile: Option<Profile>,
    interface: Option<String>,
    mode: Option<Mode>,
    config_path: Option<PathBuf>,
    output_path: PathBuf,
    output_file: Option<PathBuf>,
    exec_path: Option<PathBuf>,
    use_stresses: bool,
    remote_interface: Option<String>,
    remote_config_path: Option<PathBuf>,
    remote_exec_path: Option<PathBuf>,
    remote_address: Option<String>,
    base_time: u64,
    base_time_user_set: bool,
    verbose: bool,
    target: Target,
    dry_run: bool,
    host: HostFacts,
    substitutions: SubstitutionList,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::with_host(HostFacts::detect())
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Конфигурация с заданными фактами о хосте (для тестов и dry-run)
    pub fn with_host(host: HostFacts) -> Self {
        let mut config = Self {
            profile: None,
            interface: None,
            mode: None,
            config_path: None,
            output_path: PathBuf::from(DEFAULT_OUTPUT_DIR),
            output_file: None,
            exec_path: None,
            use_stresses: false,
            remote_interface: None,
            remote_config_path: None,
            remote_exec_path: None,
            remote_address: None,
            base_time: 0,
            base_time_user_set: false,
            verbose: false,
            target: Target::Auto,
            dry_run: false,
            host,
            substitutions: SubstitutionList::new(),
        };
        config.update_base_time(Utc::now());
        config
    }

    // ---- validating setters, in CLI declaration order ----

    pub fn set_profile(&mut self, name: &str) -> ConfigResult<Profile> {
        trace!("Profile: {}", name);
        let profile: Profile = name.parse()?;
        self.profile = Some(profile);
        Ok(profile)
    }

    pub fn set_interface(&mut self, name: &str) -> ConfigResult<()> {
        trace!("Interface: {}", name);
        if name.is_empty() || name.contains(['/', ' ']) {
            return Err(ConfigError::invalid(
                "interface",
                name,
                "Specify valid interface name (check with ip tool, for example)",
            ));
        }
        self.interface = Some(name.to_string());
        self.substitutions.push("interface", name);
        Ok(())
    }

    pub fn set_config_path(&mut self, path: impl Into<PathBuf>) -> ConfigResult<()> {
        let path = path.into();
        trace!("Config path: {}", path.display());
        if !path.is_dir() {
            return Err(ConfigError::invalid(
                "config-path",
                path.display().to_string(),
                "directory with configuration profiles does not exist",
            ));
        }
        self.substitutions
            .push("config_path", path.display().to_string());
        self.config_path = Some(path);
        Ok(())
    }

    /// Файл статистики. Без значения берётся файл по умолчанию для профиля
    /// в каталоге `tcc_rt_communication_demo_output`.
    pub fn set_output_file(&mut self, requested: Option<&Path>) -> ConfigResult<()> {
        let profile = self.profile.ok_or(ConfigError::NotSet { what: "profile" })?;

        match requested {
            Some(file) => {
                trace!("Output file: {}", file.display());
                let dir = match file.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                    _ => PathBuf::from("."),
                };
                if !dir.is_dir() {
                    return Err(ConfigError::invalid(
                        "output-file",
                        file.display().to_string(),
                        format!("path to output file ({}) does not exist", dir.display()),
                    ));
                }
                if profile.default_output_file().is_none() {
                    warn!("profile {} does not support creation of output files", profile);
                } else {
                    if file.exists() {
                        warn!("output file {} exists and may be overwritten", file.display());
                    }
                    self.output_file = Some(file.to_path_buf());
                    self.output_path = dir;
                }
            }
            None => {
                self.output_file = profile
                    .default_output_file()
                    .map(|name| self.output_path.join(name));
            }
        }

        self.substitutions
            .push("output_path", self.output_path.display().to_string());
        let output_file = self
            .output_file
            .as_ref()
            .map(|f| f.display().to_string())
            .unwrap_or_default();
        self.substitutions.push("output_file", output_file);
        Ok(())
    }

    pub fn set_mode(&mut self, name: &str) -> ConfigResult<Mode> {
        trace!("Mode: {}", name);
        let mode: Mode = name.parse()?;
        self.mode = Some(mode);
        self.substitutions.push("mode", mode.as_str());
        self.update_base_time(Utc::now());
        Ok(mode)
    }

    pub fn set_exec_path(&mut self, path: Option<PathBuf>) -> ConfigResult<()> {
        let Some(path) = path else {
            return Ok(());
        };
        trace!("Exec path: {}", path.display());
        if !path.is_dir() {
            return Err(ConfigError::invalid(
                "exec-path",
                path.display().to_string(),
                "path to directory with binary executables does not exist",
            ));
        }
        self.exec_path = Some(path);
        Ok(())
    }

    pub fn set_use_stresses(&mut self, enabled: bool) {
        self.use_stresses = enabled;
    }

    pub fn set_remote_interface(&mut self, name: Option<&str>) {
        self.remote_interface = name.map(str::to_string);
        self.substitutions
            .push("remote_interface", name.unwrap_or_default());
    }

    pub fn set_remote_config_path(&mut self, path: Option<PathBuf>) {
        self.remote_config_path = path;
    }

    /// Falls back to the local exec path
    pub fn set_remote_exec_path(&mut self, path: Option<PathBuf>) {
        self.remote_exec_path = path.or_else(|| self.exec_path.clone());
        if let Some(path) = &self.remote_exec_path {
            self.substitutions
                .push("remote_app_path", path.display().to_string());
        }
    }

    pub fn set_remote_address(&mut self, address: Option<&str>) {
        self.remote_address = address.map(str::to_string);
        if self.remote_address.is_some() {
            info!("Automatic launch mode");
        }
    }

    /// `0` means "compute from the current time"
    pub fn set_base_time(&mut self, base_time: u64) {
        if base_time != 0 {
            self.base_time = base_time;
            self.base_time_user_set = true;
            self.substitutions.push("base_time", base_time);
        } else {
            self.update_base_time(Utc::now());
        }
    }

    pub fn set_remote_working_dir(&mut self) {
        self.substitutions
            .push("remote_working_directory", REMOTE_WORKING_DIR);
    }

    pub fn set_remote_output_dir(&mut self) {
        self.substitutions.push("remote_output_path", REMOTE_OUTPUT_DIR);
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Target must already be resolved (not `AUTO`) by the caller
    pub fn set_target(&mut self, target: Target) {
        debug!("Target: {}", target);
        self.target = target;
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Final check before dispatch; returns the configuration file to load
    pub fn check_consistency(&self) -> ConfigResult<PathBuf> {
        let profile = self.profile.ok_or(ConfigError::NotSet { what: "profile" })?;
        if self.interface.is_none() {
            return Err(ConfigError::NotSet { what: "interface" });
        }
        let mode = self.mode.ok_or(ConfigError::NotSet { what: "mode" })?;
        if self.config_path.is_none() {
            return Err(ConfigError::NotSet {
                what: "config path",
            });
        }
        let config_file = self.config_file()?;
        if !config_file.exists() {
            return Err(ConfigError::FileNotFound {
                path: config_file.display().to_string(),
            });
        }

        if self.remote_address.is_some() {
            if profile.remote_counterpart().is_none() {
                return Err(ConfigError::NotSet {
                    what: "remote profile",
                });
            }
            if self.remote_interface().is_none() {
                return Err(ConfigError::NotSet {
                    what: "remote interface",
                });
            }
            if self.remote_exec_path.is_none() {
                return Err(ConfigError::NotSet {
                    what: "remote exec path",
                });
            }
        }

        trace!(
            "check of runtime config data was passed, values are: profile:{} interface:{} \
             mode:{} use_stresses:{} config_file:{} output_file:{:?} remote_address:{:?}",
            profile,
            self.interface.as_deref().unwrap_or_default(),
            mode,
            self.use_stresses,
            config_file.display(),
            self.output_file,
            self.remote_address
        );
        Ok(config_file)
    }

    /// `<config_path>/<profile file for target>`
    pub fn config_file(&self) -> ConfigResult<PathBuf> {
        let profile = self.profile.ok_or(ConfigError::NotSet { what: "profile" })?;
        let config_path = self.config_path.as_ref().ok_or(ConfigError::NotSet {
            what: "config path",
        })?;
        Ok(config_path.join(profile.config_file(self.target)))
    }

    /// XDP handler install resets the NIC on 5.10 kernels for optimized profiles
    pub fn xdp_defect_present(&self) -> bool {
        self.profile.is_some_and(|p| p.is_optimized())
            && self.host.kernel_series().as_deref() == Some(XDP_DEFECT_KERNEL)
    }

    /// Пересчитать время старта, если его не задал пользователь
    pub fn update_base_time(&mut self, now: DateTime<Utc>) {
        if self.base_time_user_set {
            return;
        }
        let delta = if self.mode == Some(Mode::Run) && !self.xdp_defect_present() {
            BASE_TIME_DELTA_RUN
        } else {
            BASE_TIME_DELTA_DEFAULT
        };
        self.base_time = compute_base_time(now, delta);
        self.substitutions.push("base_time", self.base_time);
        trace!(
            "Updated the base time: {}, time now: {}",
            self.base_time,
            now.timestamp()
        );
    }

    // ---- accessors ----

    pub fn profile(&self) -> Option<Profile> {
        self.profile
    }

    /// Профиль второй стороны для режима автозапуска
    pub fn remote_profile(&self) -> Option<Profile> {
        self.profile.and_then(|p| p.remote_counterpart())
    }

    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn mode(&self) -> Option<Mode> {
        self.mode
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn output_file(&self) -> Option<&Path> {
        self.output_file.as_deref()
    }

    pub fn exec_path(&self) -> Option<&Path> {
        self.exec_path.as_deref()
    }

    pub fn use_stresses(&self) -> bool {
        self.use_stresses
    }

    /// Remote interface, the local one when not given
    pub fn remote_interface(&self) -> Option<&str> {
        self.remote_interface.as_deref().or(self.interface.as_deref())
    }

    pub fn remote_config_path(&self) -> Option<&Path> {
        self.remote_config_path.as_deref()
    }

    pub fn remote_exec_path(&self) -> Option<&Path> {
        self.remote_exec_path.as_deref()
    }

    pub fn remote_address(&self) -> Option<&str> {
        self.remote_address.as_deref()
    }

    pub fn base_time(&self) -> u64 {
        self.base_time
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn host(&self) -> &HostFacts {
        &self.host
    }

    pub fn substitutions(&self) -> &SubstitutionList {
        &self.substitutions
    }
}
