//! Error types for the preview pipeline

use thiserror::Error;

/// Result type alias for preview operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while relaying, rendering or serving previews
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to initialize a component (relay worker, browser, server socket)
    #[error("Initialization failed: {0}")]
    InitializationError(String),

    /// A message referenced a session that does not exist or already closed
    #[error("No active session: {0}")]
    NoActiveSession(String),

    /// Forwarding failed because the target context is gone
    #[error("Popup unreachable: {0}")]
    PopupUnreachable(String),

    /// The relay answered with an error reply
    #[error("Relay rejected message: {0}")]
    Relay(String),

    /// The readiness handshake ran out of attempts
    #[error("Popup did not become ready after {attempts} attempts ({waited_ms}ms)")]
    HandshakeTimeout { attempts: u32, waited_ms: u64 },

    /// Failed to render content
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// Failed to execute JavaScript
    #[error("Script execution failed: {0}")]
    ScriptError(String),

    /// Failed to build a page from a template
    #[error("Template error: {0}")]
    TemplateError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Filesystem error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}
