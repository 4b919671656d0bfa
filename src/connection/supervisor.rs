//! Channel ownership and health for one client
//!
//! Maps server addresses to their channels. Channels are opened lazily
//! through the supervisor's [`Connector`] the first time an address is needed,
//! which lets the failover path reach replicas it only just learned about.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::channel::{Channel, Connector};
use crate::types::{ClientError, Result};

/// Health summary of one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    pub address: String,
    pub healthy: bool,
}

/// Owns every channel of one client, keyed by server address
pub struct ConnectionSupervisor {
    /// address → channel
    channels: DashMap<String, Arc<dyn Channel>>,
    connector: Option<Arc<dyn Connector>>,
}

impl ConnectionSupervisor {
    /// Create a supervisor that connects on demand
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { channels: DashMap::new(), connector: Some(connector) }
    }

    /// Create a supervisor around one already-open channel
    pub fn with_channel(channel: Arc<dyn Channel>) -> Self {
        let channels = DashMap::new();
        channels.insert(channel.address().to_string(), channel);
        Self { channels, connector: None }
    }

    /// Get the channel for an address, connecting if needed
    pub async fn channel(&self, address: &str) -> Result<Arc<dyn Channel>> {
        if let Some(channel) = self.get(address) {
            if !channel.is_shutdown() {
                return Ok(channel);
            }
        }

        let connector = self.connector.as_ref().ok_or_else(|| {
            ClientError::ConnectionLost(format!("No channel to {} and no connector to open one", address))
        })?;

        let channel = connector.connect(address).await?;
        debug!(address = %address, "Connected channel");

        // A concurrent caller may have connected first; keep whichever landed
        let channel = self
            .channels
            .entry(address.to_string())
            .and_modify(|existing| {
                if existing.is_shutdown() {
                    *existing = Arc::clone(&channel);
                }
            })
            .or_insert(channel)
            .value()
            .clone();
        Ok(channel)
    }

    /// Get an existing channel without connecting
    pub fn get(&self, address: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(address).map(|c| c.value().clone())
    }

    pub fn addresses(&self) -> Vec<String> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn healthy_count(&self) -> usize {
        self.channels
            .iter()
            .filter(|entry| !entry.value().is_shutdown())
            .count()
    }

    pub fn total_count(&self) -> usize {
        self.channels.len()
    }

    pub fn all_statuses(&self) -> Vec<ChannelStatus> {
        self.channels
            .iter()
            .map(|entry| ChannelStatus {
                address: entry.key().clone(),
                healthy: !entry.value().is_shutdown(),
            })
            .collect()
    }

    /// Shut every channel down, waiting at most `deadline` for each
    pub async fn shutdown_all(&self, deadline: Duration) {
        let channels: Vec<_> = self.channels.iter().map(|e| e.value().clone()).collect();
        for channel in channels {
            if channel.is_shutdown() {
                continue;
            }
            if tokio::time::timeout(deadline, channel.shutdown()).await.is_err() {
                warn!(
                    address = %channel.address(),
                    "Channel did not shut down within {:?}, continuing",
                    deadline
                );
            }
        }
        info!("Connection supervisor shut down {} channel(s)", self.channels.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::WsChannel;

    #[tokio::test]
    async fn test_health_reflects_shutdown() {
        let channel: Arc<dyn Channel> = Arc::new(WsChannel::new("127.0.0.1:1729", Duration::from_secs(1)));
        let supervisor = ConnectionSupervisor::with_channel(Arc::clone(&channel));
        assert_eq!(supervisor.healthy_count(), 1);

        supervisor.shutdown_all(Duration::from_secs(1)).await;
        assert_eq!(supervisor.healthy_count(), 0);
        assert_eq!(
            supervisor.all_statuses(),
            vec![ChannelStatus { address: "127.0.0.1:1729".into(), healthy: false }]
        );
    }

    #[tokio::test]
    async fn test_unknown_address_without_connector_fails() {
        let channel: Arc<dyn Channel> = Arc::new(WsChannel::new("a:1729", Duration::from_secs(1)));
        let supervisor = ConnectionSupervisor::with_channel(channel);
        let err = supervisor.channel("b:1729").await.err().unwrap();
        assert_eq!(err.kind(), crate::types::ErrorKind::ConnectionLost);
    }
}
