//! Node configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! name = "laptop"
//! control_port = 6780
//! data_port = 6781
//! database = "/var/lib/adar/adar.db"
//! sync_timeout = 30000
//! ```

use std::net::{IpAddr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use adar_core::{PeerId, Version};
use adar_pairing::PeerIdentity;
use adar_store::DEFAULT_REDUNDANCY;
use adar_sync::ChannelSettings;

use crate::error::Result;

/// Configuration for a [`Node`](crate::Node).
///
/// Timeouts are in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Stable identity of this node.
    pub identity: PeerId,
    /// Friendly name advertised to peers.
    pub name: String,
    /// Address both channels bind to. `::` accepts IPv4 and IPv6.
    pub bind_ip: IpAddr,
    pub control_port: u16,
    pub data_port: u16,
    pub supported_versions: Vec<Version>,
    /// SQLite file holding the tree and the trust store.
    pub database: PathBuf,
    pub identify_timeout: u64,
    pub sync_timeout: u64,
    pub ready_timeout: u64,
    pub request_timeout: u64,
    pub read_timeout: u64,
    pub poll_interval: u64,
    /// Extra READ rounds for a stalled read.
    pub repair_attempts: u32,
    /// Redundant symbols stored per source symbol.
    pub redundancy: f64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            identity: PeerId::random(),
            name: "adar".to_string(),
            bind_ip: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            control_port: 6780,
            data_port: 6781,
            supported_versions: vec![1],
            database: PathBuf::from("adar.db"),
            identify_timeout: 5_000,
            sync_timeout: 30_000,
            ready_timeout: 300_000,
            request_timeout: 30_000,
            read_timeout: 5_000,
            poll_interval: 50,
            repair_attempts: 1,
            redundancy: DEFAULT_REDUNDANCY,
        }
    }
}

impl NodeConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// The identity we declare to peers.
    pub fn local_identity(&self) -> PeerIdentity {
        PeerIdentity::new(self.identity, self.name.clone(), self.supported_versions.clone())
    }

    pub fn identify_timeout(&self) -> Duration {
        Duration::from_millis(self.identify_timeout)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval)
    }

    /// Settings shared by both channels.
    pub fn channel_settings(&self) -> ChannelSettings {
        ChannelSettings {
            versions: self.supported_versions.clone(),
            identify_timeout: self.identify_timeout(),
            sync_timeout: self.sync_timeout(),
            ready_timeout: self.ready_timeout(),
            request_timeout: self.request_timeout(),
            read_timeout: self.read_timeout(),
            poll_interval: self.poll_interval(),
            repair_attempts: self.repair_attempts,
            redundancy: self.redundancy,
            local_ip: Some(self.bind_ip),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = NodeConfig::from_toml_str("").unwrap();
        assert_eq!(config.name, "adar");
        assert_eq!(config.bind_ip, IpAddr::V6(Ipv6Addr::UNSPECIFIED));
        assert_eq!(config.control_port, 6780);
        assert_eq!(config.data_port, 6781);
        assert_eq!(config.supported_versions, vec![1]);
        assert_eq!(config.ready_timeout(), Duration::from_secs(300));
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_fields_override_defaults() {
        let config = NodeConfig::from_toml_str(
            r#"
            identity = "3f2c1a6e-8b4d-4f0a-9c3e-2d1b0a9f8e7d"
            name = "desk"
            bind_ip = "127.0.0.1"
            control_port = 7000
            supported_versions = [1, 2]
            sync_timeout = 1500
            redundancy = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(
            config.identity,
            "3f2c1a6e-8b4d-4f0a-9c3e-2d1b0a9f8e7d".parse::<PeerId>().unwrap()
        );
        assert_eq!(config.name, "desk");
        assert_eq!(config.control_port, 7000);
        assert_eq!(config.data_port, 6781);

        let settings = config.channel_settings();
        assert_eq!(settings.versions, vec![1, 2]);
        assert_eq!(settings.sync_timeout, Duration::from_millis(1500));
        assert_eq!(settings.local_ip, Some("127.0.0.1".parse().unwrap()));
        assert_eq!(settings.redundancy, 0.5);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(NodeConfig::from_toml_str("colour = \"blue\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(&path, "name = \"from-file\"\n").unwrap();
        assert_eq!(NodeConfig::load(&path).unwrap().name, "from-file");
        assert!(NodeConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
