//! Worker-thread facade over the relay.
//!
//! The relay is owned by one thread and driven through a command channel, so
//! badges and popups on other threads share it without locking. Replies come
//! back over oneshot channels, awaited or received blocking.

use crate::protocol::{Message, Origin, Reply, RequesterId};
use crate::relay::{Relay, SessionSnapshot};
use crate::transport::Transport;
use crate::{Error, Result};
use std::sync::mpsc::{self, Sender};
use std::sync::Mutex;
use std::thread;
use tokio::sync::oneshot;

enum Command {
    Dispatch(Origin, Message, oneshot::Sender<Reply>),
    Session(RequesterId, oneshot::Sender<Option<SessionSnapshot>>),
    ActiveSessions(oneshot::Sender<usize>),
    Shutdown(oneshot::Sender<()>),
}

/// Anything that accepts a message with its origin and answers with a [`Reply`].
///
/// Badges and popups talk to the relay only through this, so they work the
/// same against a relay on a worker thread or one behind a mutex.
pub trait RelayClient: Send + Sync {
    fn dispatch(&self, origin: &Origin, message: Message) -> Reply;
}

impl<T: Transport + Send> RelayClient for Mutex<Relay<T>> {
    fn dispatch(&self, origin: &Origin, message: Message) -> Reply {
        match self.lock() {
            Ok(mut relay) => relay.handle(origin, message),
            Err(_) => Reply::error("Relay state poisoned"),
        }
    }
}

/// Handle to a relay owned by a dedicated worker thread.
///
/// The worker processes one message at a time, so transitions never
/// interleave. Handles are cheap to clone; the worker exits after
/// [`RelayHandle::shutdown`] or once every handle is dropped.
#[derive(Clone)]
pub struct RelayHandle {
    cmd_tx: Sender<Command>,
}

impl RelayHandle {
    /// Move `relay` onto a new worker thread.
    pub fn spawn<T>(relay: Relay<T>) -> Result<Self>
    where
        T: Transport + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();

        thread::Builder::new()
            .name("comarkup-relay".into())
            .spawn(move || {
                let mut relay = relay;
                while let Ok(cmd) = cmd_rx.recv() {
                    match cmd {
                        Command::Dispatch(origin, message, resp) => {
                            let reply = relay.handle(&origin, message);
                            let _ = resp.send(reply);
                        }
                        Command::Session(requester, resp) => {
                            let _ = resp.send(relay.session(&requester));
                        }
                        Command::ActiveSessions(resp) => {
                            let _ = resp.send(relay.active_sessions());
                        }
                        Command::Shutdown(resp) => {
                            relay.shutdown();
                            let _ = resp.send(());
                            break;
                        }
                    }
                }
                // Every handle dropped without a shutdown: still send the close notices.
                relay.shutdown();
                log::debug!("relay worker stopped");
            })
            .map_err(|e| Error::InitializationError(format!("relay worker: {}", e)))?;

        Ok(Self { cmd_tx })
    }

    /// Hand a message to the relay and await its reply.
    pub async fn send(&self, origin: Origin, message: Message) -> Reply {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Dispatch(origin, message, tx)).is_err() {
            return Reply::error(relay_gone("dispatch"));
        }
        rx.await.unwrap_or_else(|_| Reply::error(relay_gone("dispatch")))
    }

    /// Snapshot of a requester's session
    pub async fn session(&self, requester: RequesterId) -> Result<Option<SessionSnapshot>> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Session(requester, tx));
        rx.await
            .map_err(|e| Error::Other(format!("Session query canceled: {}", e)))
    }

    /// Number of live sessions
    pub async fn active_sessions(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::ActiveSessions(tx));
        rx.await
            .map_err(|e| Error::Other(format!("Session count canceled: {}", e)))
    }

    /// Notify live requesters, clear state and stop the worker.
    pub async fn shutdown(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Shutdown(tx));
        rx.await
            .map_err(|e| Error::Other(format!("Shutdown canceled: {}", e)))
    }

    /// Blocking variant of [`RelayHandle::session`]; must not be called from an async context.
    pub fn session_blocking(&self, requester: RequesterId) -> Result<Option<SessionSnapshot>> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Session(requester, tx));
        rx.blocking_recv()
            .map_err(|e| Error::Other(format!("Session query canceled: {}", e)))
    }

    /// Blocking variant of [`RelayHandle::shutdown`]
    pub fn shutdown_blocking(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Shutdown(tx));
        rx.blocking_recv()
            .map_err(|e| Error::Other(format!("Shutdown canceled: {}", e)))
    }
}

/// Blocking dispatch; must not be called from an async context.
impl RelayClient for RelayHandle {
    fn dispatch(&self, origin: &Origin, message: Message) -> Reply {
        let (tx, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Dispatch(origin.clone(), message, tx))
            .is_err()
        {
            return Reply::error(relay_gone("dispatch"));
        }
        rx.blocking_recv()
            .unwrap_or_else(|_| Reply::error(relay_gone("dispatch")))
    }
}

fn relay_gone(what: &str) -> String {
    format!("Relay unavailable: {} canceled", what)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;

    #[tokio::test]
    async fn async_dispatch_reaches_worker() {
        let transport = ChannelTransport::new();
        let handle = RelayHandle::spawn(Relay::new(transport)).unwrap();

        let reply = handle
            .send(Origin::requester("tab1"), Message::OpenPopup { requester_id: "tab1".into() })
            .await;
        assert!(reply.is_success());
        assert_eq!(handle.active_sessions().await.unwrap(), 1);
        assert!(handle.session("tab1".into()).await.unwrap().is_some());

        handle.shutdown().await.unwrap();
    }

    #[test]
    fn blocking_dispatch_and_dead_worker() {
        let transport = ChannelTransport::new();
        let tab = transport.register_requester("tab1");
        let handle = RelayHandle::spawn(Relay::new(transport)).unwrap();
        let other = handle.clone();

        let reply = handle.dispatch(&Origin::requester("tab1"), Message::OpenPopup { requester_id: "tab1".into() });
        assert!(reply.is_success());

        handle.shutdown_blocking().unwrap();
        assert_eq!(tab.recv().unwrap(), Message::PopupClosed);

        let reply = other.dispatch(&Origin::requester("tab1"), Message::Ping);
        assert!(reply.error_message().unwrap().starts_with("Relay unavailable"));
    }

    #[test]
    fn dropping_every_handle_notifies_requesters() {
        let transport = ChannelTransport::new();
        let tab = transport.register_requester("tab1");
        let handle = RelayHandle::spawn(Relay::new(transport)).unwrap();
        let reply = handle.dispatch(&Origin::requester("tab1"), Message::OpenPopup { requester_id: "tab1".into() });
        assert!(reply.is_success());

        drop(handle);
        assert_eq!(tab.recv_timeout(std::time::Duration::from_secs(5)).unwrap(), Message::PopupClosed);
    }

    #[test]
    fn mutex_relay_is_a_client() {
        let relay = Mutex::new(Relay::new(ChannelTransport::new()));
        let client: &dyn RelayClient = &relay;
        let reply = client.dispatch(&Origin::requester("tab1"), Message::PopupReady);
        assert_eq!(reply.error_message(), Some(crate::protocol::NO_ACTIVE_POPUP));
    }
}
