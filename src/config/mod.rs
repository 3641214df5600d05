//! Delivery Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which swap network this node participates in. Threaded through
/// everywhere a protocol or topic string is built so a process never
/// mixes mainnet and testnet traffic on the same wire identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkNamespace {
    Mainnet,
    Testnet,
}

impl NetworkNamespace {
    /// DHT prefix used to scope discovery and stream protocol ids.
    pub fn dht_prefix(&self) -> &'static str {
        match self {
            NetworkNamespace::Mainnet => "/klingon",
            NetworkNamespace::Testnet => "/klingon-testnet",
        }
    }

    /// Discovery namespace used for peer-directory lookups.
    pub fn discovery_namespace(&self) -> &'static str {
        match self {
            NetworkNamespace::Mainnet => "klingon-mainnet",
            NetworkNamespace::Testnet => "klingon-testnet",
        }
    }

    /// Stream protocol identifier for direct peer-to-peer delivery.
    pub fn stream_protocol_id(&self) -> String {
        format!("{}/swap/direct/1.0.0", self.dht_prefix())
    }

    /// Public broadcast topic.
    pub fn public_topic(&self) -> String {
        format!("{}/swap/1.0.0", self.dht_prefix())
    }

    /// Encrypted broadcast topic used for sealed envelope fallback.
    pub fn encrypted_topic(&self) -> String {
        format!("{}/swap/encrypted/1.0.0", self.dht_prefix())
    }
}

/// Tunables for the Delivery Engine's retry, timeout, and cleanup
/// behaviour. Defaults match the deployed production configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    #[serde(with = "humantime_serde")]
    pub initial_retry: Duration,
    #[serde(with = "humantime_serde")]
    pub max_retry: Duration,
    pub backoff_multiplier: f64,
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub stop_before_expiry: Duration,
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub directory_lookup_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    pub batch_size: usize,
    pub max_frame: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            initial_retry: Duration::from_secs(10),
            max_retry: Duration::from_secs(600),
            backoff_multiplier: 2.0,
            ack_timeout: Duration::from_secs(30),
            stop_before_expiry: Duration::from_secs(3600),
            max_retries: 50,
            directory_lookup_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(3600),
            retention: Duration::from_secs(7 * 24 * 3600),
            batch_size: 50,
            max_frame: 1024 * 1024,
        }
    }
}
