use std::{fs, path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use quacktor_distributed::{JsonEncoder, MessageEncoder, MsgpackEncoder, NodeConfig};
use serde::Deserialize;

/// Payload encoding used between machines. Every machine of a mesh has to use the same one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    #[default]
    Msgpack,
    Json,
}

impl EncoderKind {
    pub fn encoder(self) -> Arc<dyn MessageEncoder> {
        match self {
            EncoderKind::Msgpack => Arc::new(MsgpackEncoder),
            EncoderKind::Json => Arc::new(JsonEncoder),
        }
    }
}

/// Runtime settings, usually read from a `quacktor.toml` file.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QuacktorConfig {
    pub bind_host: String,
    pub advertise_host: String,
    pub qpmd_host: String,
    pub qpmd_port: u16,
    pub heartbeat_interval_secs: u64,
    pub log_level: String,
    pub encoder: EncoderKind,
}

impl Default for QuacktorConfig {
    fn default() -> Self {
        let node = NodeConfig::default();
        Self {
            bind_host: node.bind_host,
            advertise_host: node.advertise_host,
            qpmd_host: node.qpmd_host,
            qpmd_port: node.qpmd_port,
            heartbeat_interval_secs: node.heartbeat_interval.as_secs(),
            log_level: "warn".to_string(),
            encoder: EncoderKind::default(),
        }
    }
}

impl QuacktorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Loads `path` if given, the defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            bind_host: self.bind_host.clone(),
            advertise_host: self.advertise_host.clone(),
            qpmd_host: self.qpmd_host.clone(),
            qpmd_port: self.qpmd_port,
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            ..NodeConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = QuacktorConfig::parse(
            r#"
            advertise_host = "10.0.0.7"
            qpmd_port = 9000
            encoder = "json"
            "#,
        )
        .unwrap();
        assert_eq!(
            config,
            QuacktorConfig {
                advertise_host: "10.0.0.7".to_string(),
                qpmd_port: 9000,
                encoder: EncoderKind::Json,
                ..QuacktorConfig::default()
            }
        );
        let node = config.node_config();
        assert_eq!(node.bind_host, "0.0.0.0");
        assert_eq!(node.qpmd_port, 9000);
        assert_eq!(node.heartbeat_interval, Duration::from_secs(25));
        assert_eq!(node.message_gateway_port, 0);
    }

    #[test]
    fn empty_file_is_the_default() {
        assert_eq!(QuacktorConfig::parse("").unwrap(), QuacktorConfig::default());
        assert_eq!(QuacktorConfig::default().log_level, "warn");
    }

    #[test]
    fn unknown_encoders_are_rejected() {
        assert!(QuacktorConfig::parse(r#"encoder = "cbor""#).is_err());
    }
}
