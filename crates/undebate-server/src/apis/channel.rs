//! Channel membership apis.

use serde_json::Value;

use undebate_proto::split_channel_name;

use crate::error::Error;
use crate::handler::{ApiContext, SocketApi};

/// `unsubscribe (channel)`: remove the caller from a channel.
///
/// Replies `[true]` if the caller was a member, `[false]` otherwise.
#[derive(Debug, Default)]
pub struct Unsubscribe;

impl SocketApi for Unsubscribe {
    fn handle(&self, ctx: &ApiContext<'_>, args: Vec<Value>) -> Result<Vec<Value>, Error> {
        let channel = match args.first() {
            Some(Value::String(channel)) => channel.as_str(),
            _ => return Err(Error::InvalidRequest("unsubscribe needs a channel name".to_string())),
        };
        match split_channel_name(channel) {
            Some((handle, id)) if !handle.is_empty() && !id.is_empty() => {}
            _ => {
                return Err(Error::InvalidRequest(format!(
                    "`{}` is not a handle:id channel",
                    channel
                )))
            }
        }

        Ok(vec![Value::Bool(ctx.leave(channel))])
    }
}
