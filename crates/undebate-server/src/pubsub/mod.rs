//! Channel fan-out for server pushes.
//!
//! Connections join channels named `"{handle}:{id}"`; publishing on a channel
//! queues one push frame to every member.

mod manager;
mod membership;

pub use manager::{ChannelManager, SharedChannelManager};
pub use membership::ChannelMember;
