//! Channel naming for per-id update pushes.
//!
//! A channel is the event name a server uses to push updates for one instance
//! of a subscribable resource. Both sides derive it from the handle and the id
//! so no registry is needed to agree on routing.
//!
//! Ids are not escaped. An id containing the separator can produce the same
//! channel as a different (handle, id) pair, e.g. `("a", "b:c")` and
//! `("a:b", "c")`. Handles never contain the separator in practice, so
//! [`split_channel_name`] splits at the first one.

/// Separator between handle and id in a channel name.
pub const CHANNEL_SEPARATOR: char = ':';

/// Derive the channel name for a (handle, id) pair.
pub fn channel_name(handle: &str, id: &str) -> String {
    let mut name = String::with_capacity(handle.len() + 1 + id.len());
    name.push_str(handle);
    name.push(CHANNEL_SEPARATOR);
    name.push_str(id);
    name
}

/// Split a channel name back into (handle, id) at the first separator.
///
/// Returns `None` if the name contains no separator.
pub fn split_channel_name(channel: &str) -> Option<(&str, &str)> {
    channel.split_once(CHANNEL_SEPARATOR)
}
