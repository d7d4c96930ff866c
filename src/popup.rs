//! Popup side of the preview protocol.
//!
//! A popup announces itself with `POPUP_LOADED`, learns which requester it
//! serves from `INIT_POPUP`, answers with `POPUP_READY`, then renders every
//! `RENDER_CODE` it receives and reports `RENDER_COMPLETE` or `RENDER_ERROR`.
//! Render failures, including a panicking executor, become messages; they
//! never take the popup down.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;

use crate::detector;
use crate::executor::{Executor, RenderError, RenderOutcome, RenderStage};
use crate::framework::FrameworkId;
use crate::progress::{Progress, Step, StepStatus};
use crate::protocol::{FrameHandle, Message, Origin, RenderPayload, Reply, RequesterId};
use crate::relay_handle::RelayClient;
use crate::{Error, Result};

/// What handling one inbound message did
#[derive(Debug, Clone, PartialEq)]
pub enum PopupEvent {
    /// Correlated with a requester and signalled readiness
    Initialized(RequesterId),
    /// Rendered a payload; `Ok` if it mounted cleanly
    Rendered(std::result::Result<RenderOutcome, RenderError>),
    Pinged,
    Closed,
    /// A message the popup has no use for
    Ignored(&'static str),
}

pub struct Popup<E: Executor> {
    frame: FrameHandle,
    host: RequesterId,
    relay: Arc<dyn RelayClient>,
    inbox: Receiver<Message>,
    executor: E,
    requester: Option<RequesterId>,
    progress: Progress,
    current: Option<RenderPayload>,
    last_result: Option<std::result::Result<RenderOutcome, RenderError>>,
}

impl<E: Executor> Popup<E> {
    /// `host` is the tab the popup frame lives in; `inbox` receives what the
    /// relay forwards to `frame`.
    pub fn new(
        frame: FrameHandle,
        host: RequesterId,
        relay: Arc<dyn RelayClient>,
        inbox: Receiver<Message>,
        executor: E,
    ) -> Self {
        let mut progress = Progress::new();
        progress.success(Step::Init);
        progress.success(Step::DomReady);
        Self {
            frame,
            host,
            relay,
            inbox,
            executor,
            requester: None,
            progress,
            current: None,
            last_result: None,
        }
    }

    pub fn frame(&self) -> &FrameHandle {
        &self.frame
    }

    /// The requester this popup was correlated with, once `INIT_POPUP` arrived
    pub fn requester(&self) -> Option<&RequesterId> {
        self.requester.as_ref()
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// The payload most recently rendered (as received or as edited)
    pub fn current(&self) -> Option<&RenderPayload> {
        self.current.as_ref()
    }

    pub fn last_result(&self) -> Option<&std::result::Result<RenderOutcome, RenderError>> {
        self.last_result.as_ref()
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    fn origin(&self) -> Origin {
        Origin::frame(self.host.clone(), self.frame.clone())
    }

    /// Tell the relay the popup script is running.
    pub fn announce(&mut self) -> Result<()> {
        let reply = self.relay.dispatch(
            &self.origin(),
            Message::PopupLoaded { frame_handle: self.frame.clone() },
        );
        if let Some(error) = reply.error_message() {
            self.progress.fail(Step::PopupReady, error);
            return Err(Error::Relay(error.to_string()));
        }
        log::debug!("popup {} announced", self.frame);
        Ok(())
    }

    /// Handle the next queued message without blocking.
    pub fn step(&mut self) -> Result<Option<PopupEvent>> {
        match self.inbox.try_recv() {
            Ok(message) => self.handle(message).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Ok(Some(PopupEvent::Closed)),
        }
    }

    /// Block for the next message and handle it. A dropped transport reads as closed.
    pub fn next_event(&mut self) -> Result<PopupEvent> {
        match self.inbox.recv() {
            Ok(message) => self.handle(message),
            Err(_) => Ok(PopupEvent::Closed),
        }
    }

    /// Announce, then handle messages until the popup is closed or the
    /// transport goes away.
    pub fn run(&mut self) -> Result<()> {
        self.announce()?;
        while self.next_event()? != PopupEvent::Closed {}
        log::debug!("popup {} stopped", self.frame);
        Ok(())
    }

    pub fn handle(&mut self, message: Message) -> Result<PopupEvent> {
        match message {
            Message::InitPopup { requester_id } => {
                log::debug!("popup {} serves {}", self.frame, requester_id);
                self.requester = Some(requester_id.clone());
                let reply = self.relay.dispatch(&self.origin(), Message::PopupReady);
                if let Some(error) = reply.error_message() {
                    self.progress.fail(Step::PopupReady, error);
                    return Err(Error::Relay(error.to_string()));
                }
                self.progress.success(Step::PopupReady);
                Ok(PopupEvent::Initialized(requester_id))
            }
            Message::RenderCode(payload) => {
                self.progress.mark(
                    Step::CodeReceived,
                    StepStatus::Success,
                    Some(format!("{} ({} bytes)", payload.framework, payload.code.len())),
                );
                let result = self.render(payload);
                self.report(&result);
                Ok(PopupEvent::Rendered(result))
            }
            Message::Ping => {
                log::trace!("popup {} pinged", self.frame);
                Ok(PopupEvent::Pinged)
            }
            Message::PopupClosed => Ok(PopupEvent::Closed),
            other => {
                log::debug!("popup {} ignoring {}", self.frame, other.kind());
                Ok(PopupEvent::Ignored(other.kind()))
            }
        }
    }

    /// Re-render edited code, re-detecting its framework, and report the
    /// outcome like a fresh payload.
    pub fn edit(&mut self, code: &str) -> std::result::Result<RenderOutcome, RenderError> {
        let framework = detector::detect(code);
        let original_content = self.current.as_ref().and_then(|p| p.original_content.clone());
        let result = self.render(RenderPayload { code: code.to_string(), framework, original_content });
        self.report(&result);
        result
    }

    /// Close the popup from its own side.
    pub fn close(&mut self) -> Reply {
        self.relay.dispatch(&self.origin(), Message::PopupClosed)
    }

    fn render(&mut self, payload: RenderPayload) -> std::result::Result<RenderOutcome, RenderError> {
        self.progress.reset_render();
        self.progress.success(Step::CodeReceived);
        self.progress.success(Step::CodeProcessing);
        self.progress.mark(Step::ScriptsLoading, StepStatus::Pending, None);

        let framework: FrameworkId = payload.framework;
        let executor = &mut self.executor;
        let code = payload.code.as_str();
        let result = panic::catch_unwind(AssertUnwindSafe(|| executor.render(code, framework)))
            .unwrap_or_else(|panic| {
                Err(RenderError::new(RenderStage::Mount, format!("Renderer panicked: {}", panic_message(panic.as_ref()))))
            });

        match &result {
            Ok(_) => {
                self.progress.success(Step::ScriptsLoading);
                self.progress.success(Step::Rendering);
                self.progress.success(Step::Completion);
            }
            Err(err) if err.stage == RenderStage::ScriptLoad => {
                self.progress.fail(Step::ScriptsLoading, err.message.clone());
                self.progress.fail(Step::Completion, err.stage.as_str());
            }
            Err(err) => {
                self.progress.success(Step::ScriptsLoading);
                self.progress.fail(Step::Rendering, err.message.clone());
                self.progress.fail(Step::Completion, err.stage.as_str());
            }
        }

        self.current = Some(payload);
        self.last_result = Some(result.clone());
        result
    }

    fn report(&self, result: &std::result::Result<RenderOutcome, RenderError>) {
        let message = match result {
            Ok(_) => Message::RenderComplete,
            Err(err) => Message::RenderError { error: err.message.clone() },
        };
        let kind = message.kind();
        let reply = self.relay.dispatch(&self.origin(), message);
        if let Some(error) = reply.error_message() {
            log::warn!("{} from popup {} not accepted: {}", kind, self.frame, error);
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
