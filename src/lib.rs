//! CoMarkup
//!
//! Detects which UI framework a code snippet is written for, relays it from
//! the page it was found on to an isolated preview surface, and renders it
//! there.
//!
//! # Features
//!
//! - **Detection**: weighted substring scoring over React, Angular, Vue and vanilla JS
//! - **Relay**: a per-requester session map coordinating badge and popup contexts
//! - **Sandbox** (default): Boa-backed preview executor with a small DOM shim
//! - **Scan** (default): extract code blocks from static HTML
//! - **CDP**: screenshot backend for the render server via headless Chrome
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use comarkup::{Badge, ChannelTransport, PreviewConfig, Relay, RelayHandle, SystemClock};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PreviewConfig::default();
//! let transport = ChannelTransport::new();
//! let inbox = transport.register_requester("tab-1");
//! let relay = RelayHandle::spawn(Relay::from_config(transport, &config)?)?;
//!
//! let badge = Badge::new("tab-1".into(), Arc::new(relay), inbox, Arc::new(SystemClock), config.handshake);
//! badge.open()?;
//! println!("{}", badge.analyze("const [n, setN] = useState(0);").name);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod clock;
pub mod detector;
pub mod framework;
pub mod progress;
pub mod protocol;
pub mod retry;
pub mod transport;

pub mod relay;
pub mod relay_handle;

pub mod badge;
pub mod popup;

pub mod executor;
pub mod jsx;
pub mod wrappers;

// Boa interpreter + script fetching
#[cfg(feature = "sandbox")]
pub mod sandbox;

// Static page scanning
#[cfg(feature = "scan")]
pub mod scan;

pub mod server;
pub mod template;

// Headless Chrome screenshots for the render server
#[cfg(feature = "cdp")]
pub mod cdp;

pub use badge::{Badge, PopupLauncher, RenderStatus};
pub use clock::{Clock, IdGenerator, ManualClock, SequentialIds, SessionId, SystemClock, UuidIds};
pub use detector::{analyze, detect, CodeAnalysis};
pub use executor::{Executor, RenderError, RenderOutcome, RenderStage};
pub use framework::{FrameworkId, FrameworkProfile};
pub use popup::{Popup, PopupEvent};
pub use protocol::{FrameHandle, Message, Origin, RenderPayload, Reply, RequesterId};
pub use relay::{Relay, SessionSnapshot, SessionState};
pub use relay_handle::{RelayClient, RelayHandle};
pub use retry::{poll_until, RetryPolicy};
pub use transport::{ChannelTransport, Transport};

#[cfg(feature = "sandbox")]
pub use sandbox::{HttpFetcher, SandboxExecutor, ScriptFetcher, StaticFetcher};

/// Configuration for relaying and rendering previews
///
/// The defaults keep one session at a time (a new request replaces the
/// previous one), give the popup five seconds to report ready, and bound
/// every snippet's loops and recursion.
///
/// # Examples
///
/// ```
/// let cfg = comarkup::PreviewConfig::default();
/// assert_eq!(cfg.max_sessions, 1);
/// assert_eq!(cfg.handshake.max_attempts, 50);
/// ```
#[derive(Debug, Clone)]
pub struct PreviewConfig {
    /// User agent sent when fetching runtime scripts and exposed as `navigator.userAgent`
    pub user_agent: String,
    /// Size the preview reports as `window.innerWidth` / `innerHeight`
    pub viewport: Viewport,
    /// Timeout for fetching a runtime script in milliseconds
    pub fetch_timeout_ms: u64,
    /// Concurrent sessions the relay keeps before evicting the oldest
    pub max_sessions: usize,
    /// How long and how often a badge waits for its popup
    pub handshake: RetryPolicy,
    /// Maximum loop iterations before Boa throws an error (0 => disabled)
    pub script_loop_iteration_limit: u64,
    /// Maximum recursion depth before Boa throws (usize::MAX => disabled)
    pub script_recursion_limit: usize,
    /// Timer callbacks run after mount before the preview is read back
    pub timer_drain_limit: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("Mozilla/5.0 (compatible; CoMarkup/", env!("CARGO_PKG_VERSION"), ")").to_string(),
            viewport: Viewport::default(),
            fetch_timeout_ms: 30000,
            max_sessions: 1,
            handshake: RetryPolicy::default(),
            script_loop_iteration_limit: 1000000,
            script_recursion_limit: 1024,
            timer_drain_limit: 1000,
        }
    }
}

impl PreviewConfig {
    /// Reject settings the relay and handshake cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(Error::ConfigError("max_sessions must be at least 1".to_string()));
        }
        if self.handshake.max_attempts == 0 {
            return Err(Error::ConfigError("handshake max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}
