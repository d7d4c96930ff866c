//! Relay between the page that asked for a preview and the popup rendering it.
//!
//! The page and the popup cannot message each other directly, so every
//! message goes through the relay, which tracks one session per requester:
//!
//! ```text
//! IDLE -> REQUEST_OPEN -> POPUP_LOADING -> POPUP_READY -> RENDERING -> (COMPLETE | FAILED) -> IDLE
//! ```
//!
//! IDLE is the absence of a session. Terminal transitions remove the session
//! so the next request starts from scratch. The number of live sessions is
//! capped (`max_sessions`, default 1); opening past the cap evicts the oldest
//! session without notice, so with the default a second request silently
//! replaces the first.

use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::{Clock, IdGenerator, SessionId, SystemClock, UuidIds};
use crate::protocol::{
    FrameHandle, Message, Origin, RenderPayload, Reply, RequesterId, NO_ACTIVE_POPUP,
    NO_ACTIVE_POPUP_FRAME, POPUP_NOT_READY, UNKNOWN_MESSAGE_TYPE,
};
use crate::transport::Transport;
use crate::{Error, PreviewConfig, Result};

/// Where a live session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    RequestOpen,
    PopupLoading,
    PopupReady,
    Rendering,
}

/// Copy of a session's state for inspection
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub requester: RequesterId,
    pub state: SessionState,
    pub frame: Option<FrameHandle>,
    /// Whether the popup has signalled it can receive payloads
    pub ready: bool,
    pub created_at: u64,
}

#[derive(Debug)]
struct Session {
    id: SessionId,
    requester: RequesterId,
    state: SessionState,
    frame: Option<FrameHandle>,
    created_at: u64,
    seq: u64,
}

impl Session {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            requester: self.requester.clone(),
            state: self.state,
            frame: self.frame.clone(),
            ready: matches!(self.state, SessionState::PopupReady | SessionState::Rendering),
            created_at: self.created_at,
        }
    }
}

/// Cross-context coordinator
pub struct Relay<T: Transport> {
    transport: T,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    max_sessions: usize,
    sessions: HashMap<RequesterId, Session>,
    next_seq: u64,
}

impl<T: Transport> Relay<T> {
    /// A relay tracking a single session, with the system clock and UUID ids
    pub fn new(transport: T) -> Self {
        Self::with_parts(transport, 1, Arc::new(SystemClock), Arc::new(UuidIds))
    }

    /// A relay sized by `config`, rejecting invalid settings
    pub fn from_config(transport: T, config: &PreviewConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_parts(transport, config.max_sessions, Arc::new(SystemClock), Arc::new(UuidIds)))
    }

    pub fn with_parts(
        transport: T,
        max_sessions: usize,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            transport,
            clock,
            ids,
            max_sessions: max_sessions.max(1),
            sessions: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Number of live sessions
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Snapshot of the requester's session, if one is live
    pub fn session(&self, requester: &RequesterId) -> Option<SessionSnapshot> {
        self.sessions.get(requester).map(Session::snapshot)
    }

    /// Handle one message and say how it went.
    pub fn handle(&mut self, origin: &Origin, message: Message) -> Reply {
        log::debug!(
            "{} from {}{}",
            message.kind(),
            origin.requester,
            origin.frame.as_ref().map(|f| format!("/{}", f)).unwrap_or_default()
        );

        match message {
            Message::OpenPopup { requester_id } => self.open(requester_id),
            Message::PopupLoaded { frame_handle } => self.popup_loaded(origin, frame_handle),
            Message::PopupReady => self.popup_ready(origin),
            Message::RenderCode(payload) => self.render_code(origin, payload),
            Message::RenderComplete => self.finish(origin, Message::RenderComplete),
            Message::RenderError { error } => self.finish(origin, Message::RenderError { error }),
            Message::PopupClosed => self.popup_closed(origin),
            Message::Ping => self.ping(origin),
            Message::InitPopup { .. } => Reply::error(UNKNOWN_MESSAGE_TYPE),
        }
    }

    /// Best-effort teardown: tell every live requester its popup is gone.
    pub fn shutdown(&mut self) {
        for (requester, session) in self.sessions.drain() {
            log::debug!("shutdown: closing session {} for {}", session.id, requester);
            if let Err(e) = self.transport.send_to_requester(&requester, &Message::PopupClosed) {
                log::warn!("shutdown notice to {} not delivered: {}", requester, e);
            }
        }
    }

    fn open(&mut self, requester: RequesterId) -> Reply {
        if let Some(old) = self.sessions.remove(&requester) {
            log::debug!("{} reopened; dropping session {}", requester, old.id);
        } else if self.sessions.len() >= self.max_sessions {
            if let Some(oldest) = self
                .sessions
                .values()
                .min_by_key(|s| s.seq)
                .map(|s| s.requester.clone())
            {
                if let Some(evicted) = self.sessions.remove(&oldest) {
                    log::warn!(
                        "session capacity {} reached; {} replaces {} (session {})",
                        self.max_sessions,
                        requester,
                        evicted.requester,
                        evicted.id
                    );
                }
            }
        }

        self.next_seq += 1;
        let session = Session {
            id: self.ids.next_id(),
            requester: requester.clone(),
            state: SessionState::RequestOpen,
            frame: None,
            created_at: self.clock.now_millis(),
            seq: self.next_seq,
        };
        log::debug!("session {} opened for {}", session.id, requester);
        self.sessions.insert(requester, session);
        Reply::success()
    }

    fn popup_loaded(&mut self, origin: &Origin, frame: FrameHandle) -> Reply {
        let target = match self.sessions.get(&origin.requester) {
            Some(s) if s.state == SessionState::RequestOpen => Some(s.requester.clone()),
            _ => self
                .sessions
                .values()
                .filter(|s| s.state == SessionState::RequestOpen)
                .max_by_key(|s| s.seq)
                .map(|s| s.requester.clone()),
        };
        let Some(requester) = target else {
            return Reply::error(NO_ACTIVE_POPUP);
        };

        if let Some(session) = self.sessions.get_mut(&requester) {
            session.frame = Some(frame.clone());
            session.state = SessionState::PopupLoading;
        }

        let init = Message::InitPopup { requester_id: requester.clone() };
        match self.transport.send_to_frame(&frame, &init) {
            Ok(()) => Reply::success(),
            Err(e) => self.frame_lost(&requester, e),
        }
    }

    fn popup_ready(&mut self, origin: &Origin) -> Reply {
        let Some(requester) = self.resolve_popup(origin) else {
            return Reply::error(NO_ACTIVE_POPUP);
        };
        match self.sessions.get_mut(&requester) {
            Some(session) if session.state == SessionState::PopupLoading => {
                session.state = SessionState::PopupReady;
            }
            _ => return Reply::error(NO_ACTIVE_POPUP),
        }

        match self.transport.send_to_requester(&requester, &Message::PopupReady) {
            Ok(()) => Reply::success(),
            Err(e) => self.requester_lost(&requester, e),
        }
    }

    fn render_code(&mut self, origin: &Origin, payload: RenderPayload) -> Reply {
        let frame = match self.sessions.get(&origin.requester) {
            Some(Session { state: SessionState::PopupReady, frame: Some(frame), .. }) => frame.clone(),
            _ => return Reply::error(NO_ACTIVE_POPUP_FRAME),
        };

        match self.transport.send_to_frame(&frame, &Message::RenderCode(payload)) {
            Ok(()) => {
                if let Some(session) = self.sessions.get_mut(&origin.requester) {
                    session.state = SessionState::Rendering;
                }
                Reply::success()
            }
            Err(e) => self.frame_lost(&origin.requester, e),
        }
    }

    fn finish(&mut self, origin: &Origin, notice: Message) -> Reply {
        let Some(requester) = self.resolve_popup(origin) else {
            return Reply::error(NO_ACTIVE_POPUP);
        };
        match self.sessions.get(&requester) {
            Some(session) if session.state == SessionState::Rendering => {}
            _ => return Reply::error(NO_ACTIVE_POPUP),
        }

        if let Some(session) = self.sessions.remove(&requester) {
            log::debug!("session {} finished with {}", session.id, notice.kind());
        }
        match self.transport.send_to_requester(&requester, &notice) {
            Ok(()) => Reply::success(),
            Err(e) => {
                log::warn!("{} for {} not delivered: {}", notice.kind(), requester, e);
                Reply::error(e.to_string())
            }
        }
    }

    fn popup_closed(&mut self, origin: &Origin) -> Reply {
        let Some(requester) = self.resolve_popup(origin) else {
            return Reply::success();
        };
        let Some(session) = self.sessions.remove(&requester) else {
            return Reply::success();
        };
        log::debug!("session {} closed in {:?}", session.id, session.state);

        // A close carrying a frame comes from a popup, even one the session never bound.
        let delivered = if origin.frame.is_some() {
            self.transport.send_to_requester(&requester, &Message::PopupClosed)
        } else if let Some(frame) = &session.frame {
            self.transport.send_to_frame(frame, &Message::PopupClosed)
        } else {
            Ok(())
        };
        if let Err(e) = delivered {
            log::warn!("close notice for session {} not delivered: {}", session.id, e);
        }
        Reply::success()
    }

    fn ping(&mut self, origin: &Origin) -> Reply {
        let frame = match self.sessions.get(&origin.requester) {
            Some(Session {
                state: SessionState::PopupReady | SessionState::Rendering,
                frame: Some(frame),
                ..
            }) => frame.clone(),
            Some(_) => return Reply::error(POPUP_NOT_READY),
            None => return Reply::error(NO_ACTIVE_POPUP),
        };

        match self.transport.send_to_frame(&frame, &Message::Ping) {
            Ok(()) => Reply::success(),
            Err(e) => self.frame_lost(&origin.requester, e),
        }
    }

    /// Session a popup-side message belongs to: by frame when the sender
    /// names one, otherwise by the sender's tab.
    fn resolve_popup(&self, origin: &Origin) -> Option<RequesterId> {
        if let Some(frame) = &origin.frame {
            if let Some(session) = self
                .sessions
                .values()
                .find(|s| s.frame.as_ref() == Some(frame))
            {
                return Some(session.requester.clone());
            }
        }
        self.sessions
            .get(&origin.requester)
            .filter(|s| origin.frame.is_none() || s.frame.is_none())
            .map(|s| s.requester.clone())
    }

    /// A forward into the popup failed: same as the popup closing.
    fn frame_lost(&mut self, requester: &RequesterId, err: Error) -> Reply {
        log::warn!("popup for {} unreachable: {}", requester, err);
        if let Some(session) = self.sessions.remove(requester) {
            log::debug!("session {} torn down after failed forward", session.id);
        }
        if let Err(e) = self.transport.send_to_requester(requester, &Message::PopupClosed) {
            log::warn!("close notice to {} not delivered: {}", requester, e);
        }
        Reply::error(unreachable_text(&err))
    }

    /// A forward to the requester failed: nobody is left to render for.
    fn requester_lost(&mut self, requester: &RequesterId, err: Error) -> Reply {
        log::warn!("requester {} unreachable: {}", requester, err);
        self.sessions.remove(requester);
        Reply::error(unreachable_text(&err))
    }
}

fn unreachable_text(err: &Error) -> String {
    match err {
        Error::PopupUnreachable(_) => err.to_string(),
        other => Error::PopupUnreachable(other.to_string()).to_string(),
    }
}

/// Convenience for callers that want an error instead of a reply
pub fn expect_success(reply: Reply) -> Result<()> {
    match reply {
        Reply::Error { error } => Err(Error::Relay(error)),
        Reply::Success { .. } => Ok(()),
    }
}
