//! Cross-context message protocol.
//!
//! Messages travel as JSON objects tagged by `"type"` with camelCase payload
//! fields, e.g. `{"type":"INIT_POPUP","requesterId":"tab1"}`. Every state that
//! crosses a context boundary is copied; nothing here is shared.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::framework::FrameworkId;

/// Reply text for messages that reference no live session or arrive in the wrong state
pub const NO_ACTIVE_POPUP: &str = "No active popup";
/// Reply text for code sent before the popup signalled readiness
pub const NO_ACTIVE_POPUP_FRAME: &str = "No active popup frame";
/// Reply text for a liveness check before the popup signalled readiness
pub const POPUP_NOT_READY: &str = "Popup not ready";
/// Reply text for messages the relay never accepts
pub const UNKNOWN_MESSAGE_TYPE: &str = "Unknown message type";

/// Opaque handle to the page/tab that asked for a render
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequesterId(String);

/// Opaque handle to the popup's execution context
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameHandle(String);

macro_rules! opaque_id {
    ($ty:ident) => {
        impl $ty {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $ty {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $ty {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

opaque_id!(RequesterId);
opaque_id!(FrameHandle);

/// Where a message came from: the sender's tab and, for popup frames, its frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub requester: RequesterId,
    pub frame: Option<FrameHandle>,
}

impl Origin {
    /// A message sent by the page itself (badge side)
    pub fn requester(requester: impl Into<RequesterId>) -> Self {
        Self { requester: requester.into(), frame: None }
    }

    /// A message sent by a popup frame hosted in `requester`'s tab
    pub fn frame(requester: impl Into<RequesterId>, frame: impl Into<FrameHandle>) -> Self {
        Self { requester: requester.into(), frame: Some(frame.into()) }
    }
}

/// The snippet a requester wants rendered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderPayload {
    pub code: String,
    pub framework: FrameworkId,
    /// The snippet as it appeared on the page, before any normalization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_content: Option<String>,
}

/// Every message exchanged between badge, relay and popup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Badge -> Relay: begin a render session
    OpenPopup {
        #[serde(rename = "requesterId")]
        requester_id: RequesterId,
    },
    /// Popup -> Relay: popup script started
    PopupLoaded {
        #[serde(rename = "frameHandle")]
        frame_handle: FrameHandle,
    },
    /// Relay -> Popup: correlate the popup to its session
    InitPopup {
        #[serde(rename = "requesterId")]
        requester_id: RequesterId,
    },
    /// Popup -> Relay -> Badge: safe to send code
    PopupReady,
    /// Badge -> Relay -> Popup: payload to render
    RenderCode(RenderPayload),
    /// Popup -> Relay -> Badge: render succeeded
    RenderComplete,
    /// Popup -> Relay -> Badge: render failed
    RenderError { error: String },
    /// Either side: session teardown
    PopupClosed,
    /// Badge -> Popup: liveness check
    Ping,
}

impl Message {
    /// The wire name of this message's type
    pub fn kind(&self) -> &'static str {
        match self {
            Message::OpenPopup { .. } => "OPEN_POPUP",
            Message::PopupLoaded { .. } => "POPUP_LOADED",
            Message::InitPopup { .. } => "INIT_POPUP",
            Message::PopupReady => "POPUP_READY",
            Message::RenderCode(_) => "RENDER_CODE",
            Message::RenderComplete => "RENDER_COMPLETE",
            Message::RenderError { .. } => "RENDER_ERROR",
            Message::PopupClosed => "POPUP_CLOSED",
            Message::Ping => "PING",
        }
    }
}

/// Result of handing a message to the relay: `{"success":true}` or `{"error":"..."}`.
///
/// Rejections are ordinary values; a caller racing a closing popup gets an
/// error reply, never a panic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Error { error: String },
    Success { success: bool },
}

impl Reply {
    pub fn success() -> Self {
        Reply::Success { success: true }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error { error: message.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Reply::Success { success: true })
    }

    /// The error text, if this is an error reply
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Reply::Error { error } => Some(error),
            Reply::Success { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_code_wire_form_is_flat_camel_case() {
        let msg = Message::RenderCode(RenderPayload {
            code: "let x=1".into(),
            framework: FrameworkId::Vanilla,
            original_content: Some("let x = 1".into()),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "RENDER_CODE",
                "code": "let x=1",
                "framework": "vanilla",
                "originalContent": "let x = 1"
            })
        );
    }

    #[test]
    fn parses_messages_from_json() {
        let msg: Message =
            serde_json::from_str(r#"{"type":"OPEN_POPUP","requesterId":"tab1"}"#).unwrap();
        assert_eq!(msg, Message::OpenPopup { requester_id: "tab1".into() });

        let msg: Message = serde_json::from_str(r#"{"type":"RENDER_ERROR","error":"boom"}"#).unwrap();
        assert_eq!(msg.kind(), "RENDER_ERROR");

        let msg: Message = serde_json::from_str(r#"{"type":"POPUP_READY"}"#).unwrap();
        assert_eq!(msg, Message::PopupReady);
    }

    #[test]
    fn replies_serialize_like_the_extension_runtime_expects() {
        assert_eq!(serde_json::to_string(&Reply::success()).unwrap(), r#"{"success":true}"#);
        assert_eq!(
            serde_json::to_string(&Reply::error(NO_ACTIVE_POPUP)).unwrap(),
            r#"{"error":"No active popup"}"#
        );
        let parsed: Reply = serde_json::from_str(r#"{"error":"No active popup frame"}"#).unwrap();
        assert_eq!(parsed.error_message(), Some(NO_ACTIVE_POPUP_FRAME));
    }
}
