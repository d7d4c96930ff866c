//! Debug checklist of the popup's render pipeline.

use std::fmt;

/// One stage of the popup pipeline, in the order it normally happens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Init,
    DomReady,
    PopupReady,
    CodeReceived,
    CodeProcessing,
    ScriptsLoading,
    Rendering,
    Completion,
}

impl Step {
    pub const ALL: [Step; 8] = [
        Step::Init,
        Step::DomReady,
        Step::PopupReady,
        Step::CodeReceived,
        Step::CodeProcessing,
        Step::ScriptsLoading,
        Step::Rendering,
        Step::Completion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Init => "initialization",
            Step::DomReady => "dom-ready",
            Step::PopupReady => "popup-ready",
            Step::CodeReceived => "code-received",
            Step::CodeProcessing => "code-processing",
            Step::ScriptsLoading => "scripts-loading",
            Step::Rendering => "rendering",
            Step::Completion => "completion",
        }
    }

    fn is_render_step(&self) -> bool {
        matches!(
            self,
            Step::CodeReceived
                | Step::CodeProcessing
                | Step::ScriptsLoading
                | Step::Rendering
                | Step::Completion
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Success,
    Error,
}

impl StepStatus {
    fn marker(&self) -> &'static str {
        match self {
            StepStatus::Pending => "…",
            StepStatus::Success => "✓",
            StepStatus::Error => "✗",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepEntry {
    pub step: Step,
    pub status: StepStatus,
    pub detail: Option<String>,
}

/// Status of every pipeline step; all steps start pending.
#[derive(Debug, Clone)]
pub struct Progress {
    entries: Vec<StepEntry>,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            entries: Step::ALL
                .iter()
                .map(|&step| StepEntry { step, status: StepStatus::Pending, detail: None })
                .collect(),
        }
    }
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, step: Step, status: StepStatus, detail: Option<String>) {
        log::trace!("step {} -> {:?}", step.as_str(), status);
        if let Some(entry) = self.entries.iter_mut().find(|e| e.step == step) {
            entry.status = status;
            entry.detail = detail;
        }
    }

    pub fn success(&mut self, step: Step) {
        self.mark(step, StepStatus::Success, None);
    }

    pub fn fail(&mut self, step: Step, detail: impl Into<String>) {
        self.mark(step, StepStatus::Error, Some(detail.into()));
    }

    pub fn status(&self, step: Step) -> StepStatus {
        self.entries
            .iter()
            .find(|e| e.step == step)
            .map(|e| e.status)
            .unwrap_or(StepStatus::Pending)
    }

    pub fn entries(&self) -> &[StepEntry] {
        &self.entries
    }

    /// Reset the per-render steps before a new payload is processed
    pub fn reset_render(&mut self) {
        for entry in self.entries.iter_mut().filter(|e| e.step.is_render_step()) {
            entry.status = StepStatus::Pending;
            entry.detail = None;
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            write!(f, "{} {}", entry.status.marker(), entry.step.as_str())?;
            if let Some(detail) = &entry.detail {
                write!(f, ": {}", detail)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
