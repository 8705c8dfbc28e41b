use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default = "GatewayConfig::default_modbus_bind")]
    pub modbus_bind: String,
    #[serde(default = "GatewayConfig::default_snmp_bind")]
    pub snmp_bind: String,
    #[serde(default = "GatewayConfig::default_community")]
    pub community: String,
    #[serde(default = "GatewayConfig::default_oid_prefix")]
    pub oid_prefix: String,
    #[serde(default = "GatewayConfig::default_max_bulk_repetitions")]
    pub max_bulk_repetitions: usize,
    /// Applied at startup, before the first slave-count frame arrives.
    #[serde(default)]
    pub initial_slave_counts: [u8; 4],
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            modbus_bind: Self::default_modbus_bind(),
            snmp_bind: Self::default_snmp_bind(),
            community: Self::default_community(),
            oid_prefix: Self::default_oid_prefix(),
            max_bulk_repetitions: Self::default_max_bulk_repetitions(),
            initial_slave_counts: [0; 4],
        }
    }
}

impl GatewayConfig {
    fn default_modbus_bind() -> String {
        "0.0.0.0:1502".into()
    }

    fn default_snmp_bind() -> String {
        "0.0.0.0:1161".into()
    }

    fn default_community() -> String {
        "public".into()
    }

    fn default_oid_prefix() -> String {
        armbms_lib::oid::DEFAULT_PREFIX.into()
    }

    fn default_max_bulk_repetitions() -> usize {
        64
    }

    pub fn load(config_file_path: &Path) -> Result<Self> {
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open config file {config_file_path:?}"))?;
        let config: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read config from file: {config_file_path:?}"))?;
        Ok(config)
    }

    /// Loads `path` if given, otherwise falls back to the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
