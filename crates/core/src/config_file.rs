//! Loading of the profile's JSON configuration

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

use common::{ConfigError, RtcResult};

use crate::runtime_config::RuntimeConfig;

/// Read the profile's configuration, apply the substitution pairs and save
/// the preprocessed document into the output directory.
///
/// Returns the parsed document and the path it was saved to.
pub fn load_json_config(config: &RuntimeConfig) -> RtcResult<(Value, PathBuf)> {
    let source = config.config_file()?;
    let document = load_with_substitutions(&source, config)?;

    let output_dir = config.output_path();
    fs::create_dir_all(output_dir)?;
    let saved = match source.file_name() {
        Some(name) => output_dir.join(name),
        None => output_dir.join("config.json"),
    };
    trace!("saving preprocessed json to file {}", saved.display());
    fs::write(&saved, serde_json::to_string_pretty(&document)?)?;

    Ok((document, saved))
}

pub fn load_with_substitutions(path: &Path, config: &RuntimeConfig) -> RtcResult<Value> {
    let raw = fs::read_to_string(path).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let text = config.substitutions().apply(&raw);
    let document: Value = serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    trace!("json config data:\n{:#}", document);
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Target;
    use crate::workaround::HostFacts;
    use common::RtcError;
    use tempfile::TempDir;

    fn prepared(dir: &TempDir, body: &str) -> RuntimeConfig {
        let cfg = dir.path().join("cfg");
        let file = cfg.join("siso-single/Elkhart_Lake/compute-noopt.json");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, body).unwrap();

        let mut config = RuntimeConfig::with_host(HostFacts::default());
        config.set_profile("siso-single-b-noopt").unwrap();
        config.set_interface("enp1s0").unwrap();
        config.set_config_path(&cfg).unwrap();
        config
            .set_output_file(Some(&dir.path().join("log-compute.log")))
            .unwrap();
        config.set_mode("all").unwrap();
        config.set_target(Target::Ehl);
        config
    }

    #[test]
    fn test_substituted_document_is_saved_next_to_output() {
        let dir = TempDir::new().unwrap();
        let config = prepared(
            &dir,
            r#"{"eth-if": {"ip": {"interface": "${interface}"}}, "mode": "${mode}"}"#,
        );

        let (document, saved) = load_json_config(&config).unwrap();
        assert_eq!(document["eth-if"]["ip"]["interface"], "enp1s0");
        assert_eq!(document["mode"], "all");
        assert_eq!(saved, dir.path().join("compute-noopt.json"));

        let reread: Value = serde_json::from_str(&fs::read_to_string(saved).unwrap()).unwrap();
        assert_eq!(reread, document);
    }

    #[test]
    fn test_broken_json_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let config = prepared(&dir, r#"{"eth-if": "#);
        let err = load_json_config(&config).unwrap_err();
        assert!(matches!(err, RtcError::Config(ConfigError::Parse { .. })));
    }
}
