//! Domain vocabulary of the RT communication demo: profiles, targets, modes
//! and the names of the top-level configuration actions.

use common::ConfigError;
use std::fmt;
use std::str::FromStr;

/// Имена узлов конфигурации верхнего уровня (они же имена действий)
pub mod action_names {
    pub const RUN_REMOTE_APPS: &str = "run-remote-apps";
    pub const ETH_IF: &str = "eth-if";
    pub const TSN_DISC: &str = "tsn-disc";
    pub const SYNC_CLOCKS: &str = "sync-clocks";
    pub const STRESS_APPS: &str = "stress-apps";
    pub const RUN_APPS: &str = "run-apps";
    pub const FINISH_APPS: &str = "finish-apps";
    pub const FINISH_REMOTE_APPS: &str = "finish-remote-apps";
}

/// Demo profile: topology (basic / siso-single), board side (A / B) and
/// whether the optimized data path is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    BasicANoopt,
    BasicBNoopt,
    SisoANoopt,
    SisoBNoopt,
    BasicAOpt,
    BasicBOpt,
    SisoAOpt,
    SisoBOpt,
}

impl Profile {
    pub const ALL: [Profile; 8] = [
        Profile::BasicANoopt,
        Profile::BasicBNoopt,
        Profile::SisoANoopt,
        Profile::SisoBNoopt,
        Profile::BasicAOpt,
        Profile::BasicBOpt,
        Profile::SisoAOpt,
        Profile::SisoBOpt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::BasicANoopt => "basic-a-noopt",
            Profile::BasicBNoopt => "basic-b-noopt",
            Profile::SisoANoopt => "siso-single-a-noopt",
            Profile::SisoBNoopt => "siso-single-b-noopt",
            Profile::BasicAOpt => "basic-a-opt",
            Profile::BasicBOpt => "basic-b-opt",
            Profile::SisoAOpt => "siso-single-a-opt",
            Profile::SisoBOpt => "siso-single-b-opt",
        }
    }

    pub fn is_optimized(&self) -> bool {
        matches!(
            self,
            Profile::BasicAOpt | Profile::BasicBOpt | Profile::SisoAOpt | Profile::SisoBOpt
        )
    }

    /// Профиль, который запускается на второй плате в режиме автозапуска.
    /// Для B-профилей пары нет.
    pub fn remote_counterpart(&self) -> Option<Profile> {
        match self {
            Profile::BasicANoopt => Some(Profile::BasicBNoopt),
            Profile::SisoANoopt => Some(Profile::SisoBNoopt),
            Profile::BasicAOpt => Some(Profile::BasicBOpt),
            Profile::SisoAOpt => Some(Profile::SisoBOpt),
            _ => None,
        }
    }

    /// Default statistics file written by the demo application
    pub fn default_output_file(&self) -> Option<&'static str> {
        match self {
            Profile::BasicANoopt | Profile::BasicAOpt => None,
            Profile::BasicBNoopt | Profile::BasicBOpt => Some("log_e2e.log"),
            Profile::SisoANoopt | Profile::SisoAOpt => Some("log-roundtrip.log"),
            Profile::SisoBNoopt | Profile::SisoBOpt => Some("log-compute.log"),
        }
    }

    /// Path of the JSON configuration relative to the config directory
    pub fn config_file(&self, target: Target) -> String {
        let (group, role) = match self {
            Profile::BasicANoopt | Profile::BasicAOpt => ("basic", "talker"),
            Profile::BasicBNoopt | Profile::BasicBOpt => ("basic", "listener"),
            Profile::SisoANoopt | Profile::SisoAOpt => ("siso-single", "monitor"),
            Profile::SisoBNoopt | Profile::SisoBOpt => ("siso-single", "compute"),
        };
        let flavor = if self.is_optimized() { "opt" } else { "noopt" };
        format!("{}/{}/{}-{}.json", group, target.dir_name(), role, flavor)
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Profile::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ConfigError::Unsupported {
                kind: "Profile",
                value: s.to_string(),
            })
    }
}

/// Target board family, selects the per-platform configuration directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Auto,
    Ehl,
    TglU,
    TglH,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Auto => "AUTO",
            Target::Ehl => "EHL",
            Target::TglU => "TGL-U",
            Target::TglH => "TGL-H",
        }
    }

    pub fn dir_name(&self) -> &'static str {
        match self {
            Target::Auto => "auto",
            Target::Ehl => "Elkhart_Lake",
            Target::TglU => "Tiger_Lake_U",
            Target::TglH => "Tiger_Lake_H",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AUTO" => Ok(Target::Auto),
            "EHL" => Ok(Target::Ehl),
            "TGL-U" => Ok(Target::TglU),
            "TGL-H" => Ok(Target::TglH),
            other => Err(ConfigError::Unsupported {
                kind: "Target",
                value: other.to_string(),
            }),
        }
    }
}

/// Runtime mode, selects which top-level actions are eligible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    All,
    Setup,
    Clock,
    Tsn,
    Run,
}

impl Mode {
    pub const ALL: [Mode; 5] = [Mode::All, Mode::Setup, Mode::Clock, Mode::Tsn, Mode::Run];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::All => "all",
            Mode::Setup => "setup",
            Mode::Clock => "clock",
            Mode::Tsn => "tsn",
            Mode::Run => "run",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ConfigError::Unsupported {
                kind: "Mode",
                value: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_names_roundtrip() {
        for profile in Profile::ALL {
            assert_eq!(profile.as_str().parse::<Profile>().unwrap(), profile);
        }
        assert!("basic-c-opt".parse::<Profile>().is_err());
    }

    #[test]
    fn test_only_a_side_has_remote_counterpart() {
        assert_eq!(
            Profile::SisoAOpt.remote_counterpart(),
            Some(Profile::SisoBOpt)
        );
        assert_eq!(Profile::BasicBNoopt.remote_counterpart(), None);
    }

    #[test]
    fn test_config_file_layout() {
        assert_eq!(
            Profile::BasicAOpt.config_file(Target::Ehl),
            "basic/Elkhart_Lake/talker-opt.json"
        );
        assert_eq!(
            Profile::SisoBNoopt.config_file(Target::TglH),
            "siso-single/Tiger_Lake_H/compute-noopt.json"
        );
    }

    #[test]
    fn test_unknown_mode_message() {
        let err = "bench".parse::<Mode>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Mode bench not supported. Use [-h] to see help information."
        );
    }
}
