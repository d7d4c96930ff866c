//! Delivery of relay messages into the requester and popup contexts.
//!
//! The extension runtime's messaging API is an external collaborator; the
//! relay only needs "deliver this message to that context, or tell me the
//! context is gone". [`ChannelTransport`] is an in-process binding of that
//! contract used by the CLI preview and the tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use crate::protocol::{FrameHandle, Message, RequesterId};
use crate::{Error, Result};

/// At-most-once delivery into a context
pub trait Transport {
    /// Deliver a message to the page that owns `requester`
    fn send_to_requester(&self, requester: &RequesterId, message: &Message) -> Result<()>;

    /// Deliver a message into a popup frame
    fn send_to_frame(&self, frame: &FrameHandle, message: &Message) -> Result<()>;
}

/// A delivery target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Endpoint {
    Requester(RequesterId),
    Frame(FrameHandle),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Requester(id) => write!(f, "requester {}", id),
            Endpoint::Frame(handle) => write!(f, "frame {}", handle),
        }
    }
}

/// In-process transport backed by one mpsc channel per registered context.
///
/// Cloning shares the registry. Dropping a context's receiver makes it
/// unreachable, which is how a closed popup looks to the relay.
#[derive(Clone, Default)]
pub struct ChannelTransport {
    endpoints: Arc<Mutex<HashMap<Endpoint, Sender<Message>>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a page context and get its inbox
    pub fn register_requester(&self, requester: impl Into<RequesterId>) -> Receiver<Message> {
        self.register(Endpoint::Requester(requester.into()))
    }

    /// Register a popup frame and get its inbox
    pub fn register_frame(&self, frame: impl Into<FrameHandle>) -> Receiver<Message> {
        self.register(Endpoint::Frame(frame.into()))
    }

    fn register(&self, endpoint: Endpoint) -> Receiver<Message> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut map) = self.endpoints.lock() {
            map.insert(endpoint, tx);
        }
        rx
    }

    fn deliver(&self, endpoint: Endpoint, message: &Message) -> Result<()> {
        let mut map = self
            .endpoints
            .lock()
            .map_err(|_| Error::Other("transport registry poisoned".into()))?;

        let Some(tx) = map.get(&endpoint) else {
            return Err(Error::PopupUnreachable(format!("{} is not registered", endpoint)));
        };

        if tx.send(message.clone()).is_err() {
            map.remove(&endpoint);
            return Err(Error::PopupUnreachable(format!("{} channel closed", endpoint)));
        }
        Ok(())
    }
}

impl Transport for ChannelTransport {
    fn send_to_requester(&self, requester: &RequesterId, message: &Message) -> Result<()> {
        self.deliver(Endpoint::Requester(requester.clone()), message)
    }

    fn send_to_frame(&self, frame: &FrameHandle, message: &Message) -> Result<()> {
        self.deliver(Endpoint::Frame(frame.clone()), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_to_registered_frame() {
        let transport = ChannelTransport::new();
        let inbox = transport.register_frame("frame9");
        transport.send_to_frame(&"frame9".into(), &Message::Ping).unwrap();
        assert_eq!(inbox.try_recv().unwrap(), Message::Ping);
    }

    #[test]
    fn unknown_or_dropped_endpoints_are_unreachable() {
        let transport = ChannelTransport::new();
        let err = transport.send_to_requester(&"tab1".into(), &Message::PopupReady).unwrap_err();
        assert!(matches!(err, Error::PopupUnreachable(_)));

        let inbox = transport.register_frame("frame1");
        drop(inbox);
        let err = transport.send_to_frame(&"frame1".into(), &Message::Ping).unwrap_err();
        assert!(err.to_string().contains("channel closed"));
        // The dead entry is pruned on first failure.
        let err = transport.send_to_frame(&"frame1".into(), &Message::Ping).unwrap_err();
        assert!(err.to_string().contains("not registered"));
    }
}
