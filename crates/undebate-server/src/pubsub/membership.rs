//! Channel membership tracking.

use std::time::Instant;

/// One connection's membership in one channel.
#[derive(Debug, Clone)]
pub struct ChannelMember {
    /// Connection that joined.
    pub connection_id: u64,
    /// Channel name, `"{handle}:{id}"`.
    pub channel: String,
    /// When the connection joined.
    pub joined_at: Instant,
    /// Number of pushes queued to this member.
    pub pushes_sent: u64,
}

impl ChannelMember {
    /// Create a new membership.
    pub fn new(connection_id: u64, channel: impl Into<String>) -> Self {
        Self {
            connection_id,
            channel: channel.into(),
            joined_at: Instant::now(),
            pushes_sent: 0,
        }
    }

    /// Record a queued push.
    pub fn record_push(&mut self) {
        self.pushes_sent += 1;
    }
}
