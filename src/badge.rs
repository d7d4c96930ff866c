//! Requester side of the preview protocol.
//!
//! A badge sits next to a detected snippet. Activating it opens a session,
//! launches a popup, waits for the popup to report ready, sends the code and
//! waits for the render outcome.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::detector::{self, CodeAnalysis};
use crate::framework::FrameworkId;
use crate::protocol::{Message, Origin, RenderPayload, Reply, RequesterId, NO_ACTIVE_POPUP, POPUP_NOT_READY};
use crate::relay::expect_success;
use crate::relay_handle::RelayClient;
use crate::retry::{poll_until, RetryPolicy};
use crate::{Error, Result};

/// How a render session ended, as seen by the requester
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderStatus {
    Completed,
    Failed(String),
    /// The popup went away before reporting
    Closed,
}

/// Creates the popup surface for a session
pub trait PopupLauncher {
    fn launch(&self, requester: &RequesterId) -> Result<()>;
}

impl<F> PopupLauncher for F
where
    F: Fn(&RequesterId) -> Result<()>,
{
    fn launch(&self, requester: &RequesterId) -> Result<()> {
        self(requester)
    }
}

pub struct Badge {
    requester: RequesterId,
    relay: Arc<dyn RelayClient>,
    inbox: Receiver<Message>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl Badge {
    /// `inbox` receives what the relay forwards to `requester`.
    pub fn new(
        requester: RequesterId,
        relay: Arc<dyn RelayClient>,
        inbox: Receiver<Message>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        Self { requester, relay, inbox, clock, policy }
    }

    pub fn requester(&self) -> &RequesterId {
        &self.requester
    }

    /// Label data for a snippet
    pub fn analyze(&self, code: &str) -> CodeAnalysis {
        detector::analyze(code)
    }

    fn dispatch(&self, message: Message) -> Reply {
        self.relay.dispatch(&Origin::requester(self.requester.clone()), message)
    }

    /// Start a session for this requester.
    pub fn open(&self) -> Result<()> {
        expect_success(self.dispatch(Message::OpenPopup { requester_id: self.requester.clone() }))
    }

    /// Wait until the popup reports ready, probing with `PING` between checks.
    ///
    /// Returns the number of attempts it took.
    pub fn wait_ready(&self) -> Result<u32> {
        poll_until(&self.policy, self.clock.as_ref(), |attempt| {
            loop {
                match self.inbox.try_recv() {
                    Ok(Message::PopupReady) => return Ok(Some(attempt)),
                    Ok(Message::PopupClosed) => {
                        return Err(Error::PopupUnreachable("popup closed before it became ready".to_string()))
                    }
                    Ok(other) => log::debug!("{} ignoring {} while waiting", self.requester, other.kind()),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        return Err(Error::PopupUnreachable("requester inbox closed".to_string()))
                    }
                }
            }

            match self.dispatch(Message::Ping).error_message() {
                None => Ok(Some(attempt)),
                Some(POPUP_NOT_READY) => Ok(None),
                Some(NO_ACTIVE_POPUP) => Err(Error::NoActiveSession(NO_ACTIVE_POPUP.to_string())),
                Some(other) => Err(Error::Relay(other.to_string())),
            }
        })
    }

    /// Hand the snippet to the ready popup.
    pub fn send_code(&self, code: &str, framework: FrameworkId, original_content: Option<String>) -> Result<()> {
        let payload = RenderPayload { code: code.to_string(), framework, original_content };
        expect_success(self.dispatch(Message::RenderCode(payload)))
    }

    /// Block until the popup reports how the render went.
    pub fn wait_outcome(&self) -> Result<RenderStatus> {
        loop {
            let message = self
                .inbox
                .recv()
                .map_err(|_| Error::PopupUnreachable("requester inbox closed".to_string()))?;
            if let Some(status) = self.outcome_of(message) {
                return Ok(status);
            }
        }
    }

    /// Like [`Badge::wait_outcome`], giving up with `None` after `timeout`.
    pub fn wait_outcome_timeout(&self, timeout: Duration) -> Result<Option<RenderStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.inbox.recv_timeout(remaining) {
                Ok(message) => {
                    if let Some(status) = self.outcome_of(message) {
                        return Ok(Some(status));
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::PopupUnreachable("requester inbox closed".to_string()))
                }
            }
        }
    }

    fn outcome_of(&self, message: Message) -> Option<RenderStatus> {
        match message {
            Message::RenderComplete => Some(RenderStatus::Completed),
            Message::RenderError { error } => Some(RenderStatus::Failed(error)),
            Message::PopupClosed => Some(RenderStatus::Closed),
            other => {
                log::trace!("{} skipping {}", self.requester, other.kind());
                None
            }
        }
    }

    /// Close the session from the requester side.
    pub fn close(&self) -> Reply {
        self.dispatch(Message::PopupClosed)
    }

    /// Run a whole preview: detect, open, launch, handshake, render.
    pub fn preview(&self, code: &str, launcher: &dyn PopupLauncher) -> Result<RenderStatus> {
        let analysis = self.analyze(code);
        log::info!("previewing {} snippet for {}", analysis.name, self.requester);

        self.open()?;
        if let Err(e) = launcher.launch(&self.requester) {
            let _ = self.close();
            return Err(e);
        }
        let attempts = self.wait_ready()?;
        log::debug!("popup for {} ready after {} attempts", self.requester, attempts);

        self.send_code(code, analysis.framework, Some(code.to_string()))?;
        self.wait_outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::relay::Relay;
    use crate::transport::ChannelTransport;
    use std::sync::Mutex;

    fn setup() -> (Badge, Arc<Mutex<Relay<ChannelTransport>>>, Receiver<Message>, ManualClock) {
        let transport = ChannelTransport::new();
        let inbox = transport.register_requester("tab1");
        let frame = transport.register_frame("frame1");
        let relay = Arc::new(Mutex::new(Relay::new(transport)));
        let clock = ManualClock::new(0);
        let badge = Badge::new("tab1".into(), relay.clone(), inbox, Arc::new(clock.clone()), RetryPolicy::default());
        (badge, relay, frame, clock)
    }

    #[test]
    fn handshake_times_out_without_popup() {
        let (badge, _relay, _frame, clock) = setup();
        badge.open().unwrap();
        let err = badge.wait_ready().unwrap_err();
        assert!(matches!(err, Error::HandshakeTimeout { attempts: 50, waited_ms: 4900 }));
        assert_eq!(clock.now_millis(), 4900);
    }

    #[test]
    fn wait_ready_without_session_fails_fast() {
        let (badge, _relay, _frame, _clock) = setup();
        assert!(matches!(badge.wait_ready().unwrap_err(), Error::NoActiveSession(_)));
    }

    #[test]
    fn ready_notice_ends_the_wait() {
        let (badge, relay, frame, _clock) = setup();
        badge.open().unwrap();
        let popup = Origin::frame("tab1", "frame1");
        relay.dispatch(&popup, Message::PopupLoaded { frame_handle: "frame1".into() });
        assert_eq!(frame.try_recv().unwrap(), Message::InitPopup { requester_id: "tab1".into() });
        relay.dispatch(&popup, Message::PopupReady);

        assert_eq!(badge.wait_ready().unwrap(), 1);

        badge.send_code("<p>x</p>", FrameworkId::Vue, None).unwrap();
        assert!(matches!(frame.try_recv().unwrap(), Message::RenderCode(_)));
        relay.dispatch(&popup, Message::RenderError { error: "nope".into() });
        assert_eq!(badge.wait_outcome().unwrap(), RenderStatus::Failed("nope".into()));
    }

    #[test]
    fn send_code_before_ready_is_rejected() {
        let (badge, _relay, _frame, _clock) = setup();
        badge.open().unwrap();
        let err = badge.send_code("x", FrameworkId::Vanilla, None).unwrap_err();
        assert!(matches!(err, Error::Relay(ref m) if m == "No active popup frame"));
    }

    #[test]
    fn failed_launch_closes_the_session() {
        let (badge, relay, _frame, _clock) = setup();
        let launcher = |_: &RequesterId| -> Result<()> { Err(Error::Other("no window".into())) };
        assert!(badge.preview("const x = 1;", &launcher).is_err());
        assert_eq!(relay.lock().unwrap().active_sessions(), 0);
    }

    #[test]
    fn outcome_timeout_returns_none() {
        let (badge, _relay, _frame, _clock) = setup();
        assert_eq!(badge.wait_outcome_timeout(Duration::from_millis(10)).unwrap(), None);
    }
}
