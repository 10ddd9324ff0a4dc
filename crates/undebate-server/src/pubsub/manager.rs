//! Channel manager for connection memberships and push fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;

use undebate_proto::Frame;

use super::membership::ChannelMember;
use crate::error::Error;

/// A connected peer: where its outbound frames go.
struct Peer {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

/// Manager for channel memberships and push delivery.
///
/// Lock order is `channels` before `peers`; no method holds `peers` while
/// taking `channels`.
pub struct ChannelManager {
    /// Attached connections keyed by connection id.
    peers: RwLock<HashMap<u64, Peer>>,
    /// Members of each channel, in join order.
    channels: RwLock<HashMap<String, Vec<ChannelMember>>>,
}

impl ChannelManager {
    /// Create an empty channel manager.
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection and the queue its encoded frames are written from.
    pub fn attach(&self, connection_id: u64, outbound: mpsc::UnboundedSender<Vec<u8>>) {
        self.peers.write().insert(connection_id, Peer { outbound });
        tracing::debug!(connection_id, "peer attached");
    }

    /// Remove a connection and all of its channel memberships.
    ///
    /// Returns the number of memberships removed.
    pub fn detach(&self, connection_id: u64) -> usize {
        self.peers.write().remove(&connection_id);

        let mut removed = 0;
        let mut channels = self.channels.write();
        channels.retain(|_, members| {
            let before = members.len();
            members.retain(|m| m.connection_id != connection_id);
            removed += before - members.len();
            !members.is_empty()
        });
        drop(channels);

        tracing::debug!(connection_id, memberships = removed, "peer detached");
        removed
    }

    /// Check if a connection is attached.
    pub fn is_attached(&self, connection_id: u64) -> bool {
        self.peers.read().contains_key(&connection_id)
    }

    /// Add a connection to a channel.
    ///
    /// Joining a channel the connection is already in is a no-op and returns
    /// `Ok(false)`.
    pub fn join(&self, connection_id: u64, channel: &str) -> Result<bool, Error> {
        if !self.is_attached(connection_id) {
            return Err(Error::InvalidRequest(format!(
                "connection {} is not attached",
                connection_id
            )));
        }

        let mut channels = self.channels.write();
        let members = channels.entry(channel.to_string()).or_default();
        if members.iter().any(|m| m.connection_id == connection_id) {
            return Ok(false);
        }
        members.push(ChannelMember::new(connection_id, channel));
        drop(channels);

        tracing::debug!(connection_id, channel, "joined channel");
        Ok(true)
    }

    /// Remove a connection from a channel. Returns `false` if it was not a member.
    pub fn leave(&self, connection_id: u64, channel: &str) -> bool {
        let mut channels = self.channels.write();
        let Some(members) = channels.get_mut(channel) else {
            return false;
        };
        let before = members.len();
        members.retain(|m| m.connection_id != connection_id);
        let left = members.len() != before;
        if members.is_empty() {
            channels.remove(channel);
        }
        drop(channels);

        if left {
            tracing::debug!(connection_id, channel, "left channel");
        }
        left
    }

    /// Push `payload` to every member of `channel`.
    ///
    /// The push frame is encoded once. Returns the number of members it was
    /// queued to; members whose connection is already gone are skipped.
    pub fn publish(&self, channel: &str, payload: &Value) -> Result<usize, Error> {
        let frame = Frame::push(channel, payload)?.encode()?;

        let mut channels = self.channels.write();
        let Some(members) = channels.get_mut(channel) else {
            tracing::trace!(channel, "publish with no members");
            return Ok(0);
        };

        let peers = self.peers.read();
        let mut delivered = 0;
        for member in members.iter_mut() {
            let Some(peer) = peers.get(&member.connection_id) else {
                continue;
            };
            if peer.outbound.send(frame.clone()).is_ok() {
                member.record_push();
                delivered += 1;
            }
        }
        drop(peers);
        drop(channels);

        tracing::debug!(channel, delivered, bytes = frame.len(), "published");
        Ok(delivered)
    }

    /// Connection ids in a channel, in join order.
    pub fn members(&self, channel: &str) -> Vec<u64> {
        self.channels
            .read()
            .get(channel)
            .map(|members| members.iter().map(|m| m.connection_id).collect())
            .unwrap_or_default()
    }

    /// Channels a connection has joined.
    pub fn channels_for(&self, connection_id: u64) -> Vec<String> {
        let mut joined: Vec<String> = self
            .channels
            .read()
            .iter()
            .filter(|(_, members)| members.iter().any(|m| m.connection_id == connection_id))
            .map(|(channel, _)| channel.clone())
            .collect();
        joined.sort();
        joined
    }

    /// Get a membership record.
    pub fn member(&self, connection_id: u64, channel: &str) -> Option<ChannelMember> {
        self.channels
            .read()
            .get(channel)
            .and_then(|members| members.iter().find(|m| m.connection_id == connection_id))
            .cloned()
    }

    /// Total number of memberships across all channels.
    pub fn subscription_count(&self) -> usize {
        self.channels.read().values().map(Vec::len).sum()
    }

    /// Number of channels with at least one member.
    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Number of attached connections.
    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared channel manager handle.
pub type SharedChannelManager = Arc<ChannelManager>;
