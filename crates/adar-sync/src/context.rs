//! Settings and shared handles for the channel workers.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use adar_core::{Version, SUPPORTED_VERSIONS};
use adar_pairing::Pairing;
use adar_store::{Storage, DEFAULT_REDUNDANCY};

use crate::peers::PeerDirectory;

/// Timeouts and coding parameters for both channels.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Versions we speak, offered in PAIR and CONNECT.
    pub versions: Vec<Version>,
    /// How long an inbound request waits for its source to be discovered.
    pub identify_timeout: Duration,
    /// Bound on SYNC: waiting for both channels and the data key.
    pub sync_timeout: Duration,
    /// Bound on READY: waiting for local replication to finish.
    pub ready_timeout: Duration,
    /// Bound on one control round-trip.
    pub request_timeout: Duration,
    /// How long a read session waits before asking for repair symbols.
    pub read_timeout: Duration,
    /// Retry spacing for client-side polls and the receive loop tick.
    pub poll_interval: Duration,
    /// Extra READ rounds before a read session gives up.
    pub repair_attempts: u32,
    /// Redundant symbols sent per source symbol on WRITE.
    pub redundancy: f64,
    /// Source address for outgoing control connections.
    pub local_ip: Option<IpAddr>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            versions: SUPPORTED_VERSIONS.to_vec(),
            identify_timeout: Duration::from_secs(5),
            sync_timeout: Duration::from_secs(30),
            ready_timeout: Duration::from_secs(300),
            request_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
            repair_attempts: 1,
            redundancy: DEFAULT_REDUNDANCY,
            local_ip: None,
        }
    }
}

/// Everything a channel worker needs, cheap to clone.
#[derive(Clone)]
pub struct ChannelContext {
    pub directory: Arc<PeerDirectory>,
    pub storage: Arc<dyn Storage>,
    pub pairing: Arc<Pairing>,
    pub settings: Arc<ChannelSettings>,
}

impl ChannelContext {
    pub fn new(
        directory: Arc<PeerDirectory>,
        storage: Arc<dyn Storage>,
        pairing: Arc<Pairing>,
        settings: ChannelSettings,
    ) -> Self {
        Self {
            directory,
            storage,
            pairing,
            settings: Arc::new(settings),
        }
    }
}
