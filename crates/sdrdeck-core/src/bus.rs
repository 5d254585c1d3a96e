//! # Message Bus
//!
//! Named channels over which module instances communicate without holding
//! references to each other. A channel is registered by exactly one owner
//! and supports two delivery modes:
//!
//! - [`invoke`](MessageBus::invoke): synchronous request/response against
//!   the channel's handler
//! - [`publish`](MessageBus::publish): fire-and-forget broadcast to every
//!   subscriber, in order per channel per publisher
//!
//! Payloads are JSON values, the same loosely-typed tree the configuration
//! uses, so modules can exchange structured messages without compile-time
//! knowledge of one another.
//!
//! Channel entries are reference-counted: unregistering a channel makes its
//! name unknown immediately, but an invoke already in flight runs to
//! completion against the old handler.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use thiserror::Error;

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Errors that can occur on the message bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// A channel with this name is already registered
    #[error("channel already registered: {0}")]
    DuplicateChannel(String),

    /// No channel with this name exists
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// The channel's handler reported a failure
    #[error("channel '{channel}' handler failed: {message}")]
    Handler { channel: String, message: String },
}

/// Handler invoked for synchronous requests on a channel.
pub type InvokeHandler = dyn Fn(&Value) -> Result<Value, String> + Send + Sync;

struct Channel {
    owner: String,
    handler: Box<InvokeHandler>,
    subscribers: Mutex<Vec<Sender<Value>>>,
}

/// Named-channel publish/request bus.
///
/// Cheap to clone; clones share the same channel registry.
#[derive(Clone, Default)]
pub struct MessageBus {
    channels: Arc<Mutex<HashMap<String, Arc<Channel>>>>,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.channels.lock().unwrap().keys().cloned().collect();
        f.debug_struct("MessageBus").field("channels", &names).finish()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `channel_name` with `owner` as the publishing module and
    /// `handler` answering synchronous requests.
    pub fn register_channel<F>(
        &self,
        owner: &str,
        channel_name: &str,
        handler: F,
    ) -> BusResult<()>
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        let mut channels = self.channels.lock().unwrap();
        if channels.contains_key(channel_name) {
            return Err(BusError::DuplicateChannel(channel_name.to_string()));
        }
        channels.insert(
            channel_name.to_string(),
            Arc::new(Channel {
                owner: owner.to_string(),
                handler: Box::new(handler),
                subscribers: Mutex::new(Vec::new()),
            }),
        );
        tracing::debug!("Channel '{}' registered by '{}'", channel_name, owner);
        Ok(())
    }

    /// Synchronous request/response against the channel's handler.
    pub fn invoke(&self, channel_name: &str, payload: &Value) -> BusResult<Value> {
        let channel = self.lookup(channel_name)?;
        (channel.handler)(payload).map_err(|message| BusError::Handler {
            channel: channel_name.to_string(),
            message,
        })
    }

    /// Fire-and-forget broadcast to every subscriber of the channel.
    ///
    /// Delivery is in order per channel per publisher; there is no guarantee
    /// beyond that. Subscribers whose receiving end is gone are pruned.
    pub fn publish(&self, channel_name: &str, payload: Value) -> BusResult<()> {
        let channel = self.lookup(channel_name)?;
        let mut subscribers = channel.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
        Ok(())
    }

    /// Subscribe to broadcasts on the channel. Dropping the receiver
    /// unsubscribes on the next publish.
    pub fn subscribe(&self, channel_name: &str) -> BusResult<Receiver<Value>> {
        let channel = self.lookup(channel_name)?;
        let (tx, rx) = mpsc::channel();
        channel.subscribers.lock().unwrap().push(tx);
        Ok(rx)
    }

    /// Remove the channel. Subsequent lookups fail with
    /// [`BusError::UnknownChannel`]; an invoke already in flight completes.
    pub fn unregister_channel(&self, channel_name: &str) -> BusResult<()> {
        let removed = self.channels.lock().unwrap().remove(channel_name);
        match removed {
            Some(channel) => {
                tracing::debug!(
                    "Channel '{}' unregistered (owner '{}')",
                    channel_name,
                    channel.owner
                );
                Ok(())
            }
            None => Err(BusError::UnknownChannel(channel_name.to_string())),
        }
    }

    /// Remove every channel registered by `owner`. Returns how many were
    /// removed. Used by the module host so a disabled or destroyed instance
    /// cannot leak channels.
    pub fn unregister_owner(&self, owner: &str) -> usize {
        let mut channels = self.channels.lock().unwrap();
        let before = channels.len();
        channels.retain(|name, channel| {
            if channel.owner == owner {
                tracing::debug!("Channel '{}' unregistered with owner '{}'", name, owner);
                false
            } else {
                true
            }
        });
        before - channels.len()
    }

    /// Whether a channel with this name exists.
    pub fn has_channel(&self, channel_name: &str) -> bool {
        self.channels.lock().unwrap().contains_key(channel_name)
    }

    /// Number of registered channels.
    pub fn channel_count(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    fn lookup(&self, channel_name: &str) -> BusResult<Arc<Channel>> {
        self.channels
            .lock()
            .unwrap()
            .get(channel_name)
            .cloned()
            .ok_or_else(|| BusError::UnknownChannel(channel_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_and_invoke() {
        let bus = MessageBus::new();
        bus.register_channel("radio", "radio:set_frequency", |payload| {
            let freq = payload.as_f64().ok_or("expected a number")?;
            Ok(json!({ "applied": freq }))
        })
        .unwrap();

        let reply = bus.invoke("radio:set_frequency", &json!(7_100_000.0)).unwrap();
        assert_eq!(reply["applied"], 7_100_000.0);
    }

    #[test]
    fn test_duplicate_channel_keeps_first_handler() {
        let bus = MessageBus::new();
        bus.register_channel("a", "status", |_| Ok(json!("first")))
            .unwrap();

        let err = bus
            .register_channel("b", "status", |_| Ok(json!("second")))
            .unwrap_err();
        assert!(matches!(err, BusError::DuplicateChannel(name) if name == "status"));

        let reply = bus.invoke("status", &Value::Null).unwrap();
        assert_eq!(reply, "first");
    }

    #[test]
    fn test_invoke_unknown_channel() {
        let bus = MessageBus::new();
        let err = bus.invoke("nope", &Value::Null).unwrap_err();
        assert!(matches!(err, BusError::UnknownChannel(name) if name == "nope"));
    }

    #[test]
    fn test_handler_error_propagates() {
        let bus = MessageBus::new();
        bus.register_channel("a", "fail", |_| Err("out of range".to_string()))
            .unwrap();

        let err = bus.invoke("fail", &Value::Null).unwrap_err();
        match err {
            BusError::Handler { channel, message } => {
                assert_eq!(channel, "fail");
                assert_eq!(message, "out of range");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_publish_in_order() {
        let bus = MessageBus::new();
        bus.register_channel("source", "samples", |_| Ok(Value::Null))
            .unwrap();
        let rx = bus.subscribe("samples").unwrap();

        for i in 0..10 {
            bus.publish("samples", json!(i)).unwrap();
        }
        let received: Vec<i64> = rx.try_iter().map(|v| v.as_i64().unwrap()).collect();
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = MessageBus::new();
        bus.register_channel("a", "quiet", |_| Ok(Value::Null))
            .unwrap();
        bus.publish("quiet", json!(1)).unwrap();
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let bus = MessageBus::new();
        bus.register_channel("a", "samples", |_| Ok(Value::Null))
            .unwrap();

        let rx = bus.subscribe("samples").unwrap();
        drop(rx);
        let rx2 = bus.subscribe("samples").unwrap();

        bus.publish("samples", json!(1)).unwrap();
        assert_eq!(rx2.try_iter().count(), 1);
    }

    #[test]
    fn test_unregister_channel() {
        let bus = MessageBus::new();
        bus.register_channel("a", "status", |_| Ok(Value::Null))
            .unwrap();
        bus.unregister_channel("status").unwrap();

        assert!(!bus.has_channel("status"));
        assert!(matches!(
            bus.invoke("status", &Value::Null),
            Err(BusError::UnknownChannel(_))
        ));
        assert!(matches!(
            bus.unregister_channel("status"),
            Err(BusError::UnknownChannel(_))
        ));
    }

    #[test]
    fn test_unregister_owner_removes_all() {
        let bus = MessageBus::new();
        bus.register_channel("recorder", "recorder:start", |_| Ok(Value::Null))
            .unwrap();
        bus.register_channel("recorder", "recorder:stop", |_| Ok(Value::Null))
            .unwrap();
        bus.register_channel("radio", "radio:mode", |_| Ok(Value::Null))
            .unwrap();

        assert_eq!(bus.unregister_owner("recorder"), 2);
        assert_eq!(bus.channel_count(), 1);
        assert!(bus.has_channel("radio:mode"));
    }
}
