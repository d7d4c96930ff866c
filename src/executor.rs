//! The popup's render contract.

use std::fmt;

use crate::framework::FrameworkId;

/// Where in the render pipeline a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStage {
    /// A framework runtime script could not be fetched or evaluated
    ScriptLoad,
    /// The snippet could not be transformed into runnable code
    Transpile,
    /// The snippet threw while mounting
    Mount,
}

impl RenderStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStage::ScriptLoad => "script-load",
            RenderStage::Transpile => "transpile",
            RenderStage::Mount => "mount",
        }
    }
}

/// A failed render.
///
/// `message` is exactly what gets reported upstream in `RENDER_ERROR`; for a
/// mount failure it is the thrown exception's message. `container_html` is
/// what the preview shows instead of the component.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderError {
    pub stage: RenderStage,
    pub message: String,
    pub container_html: String,
}

impl RenderError {
    pub fn new(stage: RenderStage, message: impl Into<String>) -> Self {
        let message = message.into();
        let container_html = error_display(&message);
        Self { stage, message, container_html }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RenderError {}

/// A successful render
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOutcome {
    /// Inner HTML of the preview container after mount
    pub html: String,
    /// Text content of the preview container
    pub text: String,
    /// Console lines written while rendering
    pub console: Vec<String>,
}

/// Something that can mount a snippet into a preview container.
///
/// Implementations must turn every failure into a [`RenderError`]; the popup
/// additionally guards against panics.
pub trait Executor {
    fn render(&mut self, code: &str, framework: FrameworkId) -> Result<RenderOutcome, RenderError>;
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn render(&mut self, code: &str, framework: FrameworkId) -> Result<RenderOutcome, RenderError> {
        (**self).render(code, framework)
    }
}

/// Inline error display shown in the container when a render fails
pub fn error_display(message: &str) -> String {
    format!(
        "<div class=\"preview-error\" style=\"color: red; padding: 20px;\">Error: {}</div>",
        escape_html(message)
    )
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
