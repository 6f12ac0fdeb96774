//! Gateway configuration: defaults, then an optional file named by
//! `MEDSCREEN_CONFIG_FILE`, then `MEDSCREEN__*` environment overrides.

use ::config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::inference::{ScoreOptions, DEFAULT_TOP_K};
use crate::model_registry::RegistryConfig;

pub const CONFIG_FILE_ENV: &str = "MEDSCREEN_CONFIG_FILE";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GatewayConfig {
    pub app_name: String,
    pub bind_addr: String,
    pub health_port: u16,
    pub artifact_root: PathBuf,
    pub versions_file: PathBuf,
    pub load_timeout_ms: u64,
    pub top_k: usize,
    /// Domains resolved and loaded before the gateway reports ready.
    #[serde(default)]
    pub preload: Vec<String>,
}

fn environment() -> Environment {
    Environment::with_prefix("MEDSCREEN")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("preload")
        .try_parsing(true)
}

fn build(file: Option<String>, env: Environment) -> Result<GatewayConfig, ConfigError> {
    let mut builder = Config::builder()
        .set_default("app_name", "MedScreen")?
        .set_default("bind_addr", "0.0.0.0:8000")?
        .set_default("health_port", 8081_i64)?
        .set_default("artifact_root", "models")?
        .set_default("versions_file", "models/versions.yaml")?
        .set_default("load_timeout_ms", 10_000_i64)?
        .set_default("top_k", DEFAULT_TOP_K as i64)?
        .set_default("preload", Vec::<String>::new())?;
    if let Some(file) = file {
        builder = builder.add_source(File::with_name(&file).required(false));
    }
    builder.add_source(env).build()?.try_deserialize()
}

impl GatewayConfig {
    pub fn load() -> Result<Self, ConfigError> { build(std::env::var(CONFIG_FILE_ENV).ok(), environment()) }

    pub fn load_timeout(&self) -> Duration { Duration::from_millis(self.load_timeout_ms) }

    pub fn registry_config(&self) -> RegistryConfig { RegistryConfig { load_timeout: self.load_timeout() } }

    pub fn score_options(&self) -> ScoreOptions { ScoreOptions { top_k: self.top_k } }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        environment().source(Some(map))
    }

    #[test]
    fn defaults_apply() {
        let cfg = build(None, env(&[])).unwrap();
        assert_eq!(cfg.app_name, "MedScreen");
        assert_eq!(cfg.top_k, DEFAULT_TOP_K);
        assert_eq!(cfg.load_timeout(), Duration::from_secs(10));
        assert!(cfg.preload.is_empty());
    }

    #[test]
    fn file_then_env_override() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("gateway.yaml");
        std::fs::write(&path, "artifact_root: /srv/models\ntop_k: 3\nhealth_port: 9100\n").unwrap();
        let cfg = build(
            Some(path.to_string_lossy().into_owned()),
            env(&[("MEDSCREEN__TOP_K", "7"), ("MEDSCREEN__PRELOAD", "heart,diabetes")]),
        )
        .unwrap();
        assert_eq!(cfg.artifact_root, PathBuf::from("/srv/models"));
        assert_eq!(cfg.health_port, 9100);
        assert_eq!(cfg.top_k, 7);
        assert_eq!(cfg.preload, vec!["heart".to_string(), "diabetes".to_string()]);
        assert_eq!(cfg.score_options().top_k, 7);
    }
}
