//! Boa-backed preview executor.
//!
//! Every executor owns its own interpreter context, preloaded with a small DOM
//! (see `preview_harness.js`). Snippets never touch the host: the only ways
//! out are the buffered console and the container HTML read back after mount.
//! Runtime scripts are fetched through a [`ScriptFetcher`] and evaluated at
//! most once per executor.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use boa_engine::{Context, JsError, Source};
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::executor::{Executor, RenderError, RenderOutcome, RenderStage};
use crate::framework::FrameworkId;
use crate::wrappers;
use crate::{Error, PreviewConfig, Result};

/// Source of framework runtime scripts
pub trait ScriptFetcher {
    fn fetch(&self, url: &str) -> Result<String>;
}

/// Fetches scripts over HTTP(S)
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &PreviewConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.fetch_timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl ScriptFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        let res = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::NetworkError(format!("HTTP GET failed: {}", e)))?;
        let res = res
            .error_for_status()
            .map_err(|e| Error::NetworkError(format!("HTTP GET failed: {}", e)))?;
        res.text()
            .map_err(|e| Error::NetworkError(format!("Failed to read response body: {}", e)))
    }
}

/// Serves scripts from memory (offline bundles, tests)
#[derive(Debug, Clone, Default)]
pub struct StaticFetcher {
    scripts: HashMap<String, String>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, url: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(url, source);
        self
    }

    pub fn insert(&mut self, url: impl Into<String>, source: impl Into<String>) {
        self.scripts.insert(url.into(), source.into());
    }
}

impl ScriptFetcher for StaticFetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        self.scripts
            .get(url)
            .cloned()
            .ok_or_else(|| Error::NetworkError(format!("no bundled copy of {}", url)))
    }
}

impl<F: ScriptFetcher + ?Sized> ScriptFetcher for Box<F> {
    fn fetch(&self, url: &str) -> Result<String> {
        (**self).fetch(url)
    }
}

#[derive(Debug, Deserialize)]
struct SandboxState {
    error: Option<String>,
    html: String,
    text: String,
    console: Vec<String>,
}

/// Sandboxed interpreter that renders snippets into a detached preview container
pub struct SandboxExecutor<F: ScriptFetcher> {
    ctx: Context,
    fetcher: F,
    loaded: HashSet<String>,
    timer_drain_limit: usize,
}

impl<F: ScriptFetcher> SandboxExecutor<F> {
    pub fn new(fetcher: F, config: &PreviewConfig) -> Result<Self> {
        let mut ctx = Context::default();
        if config.script_loop_iteration_limit > 0 {
            ctx.runtime_limits_mut()
                .set_loop_iteration_limit(config.script_loop_iteration_limit);
        }
        if config.script_recursion_limit < usize::MAX {
            ctx.runtime_limits_mut()
                .set_recursion_limit(config.script_recursion_limit);
        }

        let harness = include_str!("preview_harness.js")
            .replace(
                "__COMARKUP_USER_AGENT__",
                &serde_json::to_string(&config.user_agent).unwrap_or_else(|_| "\"\"".to_string()),
            )
            .replace("__COMARKUP_VIEWPORT_WIDTH__", &config.viewport.width.to_string())
            .replace("__COMARKUP_VIEWPORT_HEIGHT__", &config.viewport.height.to_string());

        ctx.eval(Source::from_bytes(harness.as_bytes()))
            .map_err(|e| Error::InitializationError(format!("Preview harness failed: {}", e)))?;

        Ok(Self {
            ctx,
            fetcher,
            loaded: HashSet::new(),
            timer_drain_limit: config.timer_drain_limit,
        })
    }

    /// Whether a runtime script has already been evaluated in this context
    pub fn is_loaded(&self, url: &str) -> bool {
        self.loaded.contains(url)
    }

    /// Fetch and evaluate the runtime scripts `framework` needs, skipping ones already loaded.
    pub fn load_scripts(&mut self, framework: FrameworkId) -> std::result::Result<(), RenderError> {
        for url in framework.profile().scripts {
            if self.loaded.contains(*url) {
                continue;
            }
            log::debug!("loading runtime script {}", url);
            let source = self.fetcher.fetch(url).map_err(|e| {
                RenderError::new(RenderStage::ScriptLoad, format!("Failed to load script: {} ({})", url, e))
            })?;
            if let Err(e) = self.ctx.eval(Source::from_bytes(source.as_bytes())) {
                let message = self.error_message(e);
                return Err(RenderError::new(
                    RenderStage::ScriptLoad,
                    format!("Failed to load script: {} ({})", url, message),
                ));
            }
            self.run_jobs();
            self.loaded.insert(url.to_string());
        }
        Ok(())
    }

    /// Evaluate a script in the preview context and return its value as text.
    pub fn evaluate(&mut self, script: &str) -> Result<String> {
        match self.ctx.eval(Source::from_bytes(script.as_bytes())) {
            Ok(value) => {
                self.run_jobs();
                Ok(match value.as_string() {
                    Some(s) => s.to_std_string_escaped(),
                    None => format!("{}", value.display()),
                })
            }
            Err(e) => Err(Error::ScriptError(format!("Script thrown: {}", self.error_message(e)))),
        }
    }

    fn run_jobs(&mut self) {
        let _ = self.ctx.run_jobs();
    }

    fn error_message(&mut self, err: JsError) -> String {
        match err.try_native(&mut self.ctx) {
            Ok(native) => native.message().to_string(),
            Err(_) => err.to_string(),
        }
    }

    fn state(&mut self) -> std::result::Result<SandboxState, RenderError> {
        let json = self
            .evaluate("__comarkup.state()")
            .map_err(|e| RenderError::new(RenderStage::Mount, e.to_string()))?;
        serde_json::from_str(&json)
            .map_err(|e| RenderError::new(RenderStage::Mount, format!("Unreadable preview state: {}", e)))
    }

    fn report_failure(&mut self, message: &str) {
        let literal = serde_json::Value::String(message.to_string()).to_string();
        if let Err(e) = self.evaluate(&format!("__comarkup.fail({})", literal)) {
            log::warn!("could not show render error in preview: {}", e);
        }
    }
}

impl<F: ScriptFetcher> Executor for SandboxExecutor<F> {
    fn render(&mut self, code: &str, framework: FrameworkId) -> std::result::Result<RenderOutcome, RenderError> {
        self.evaluate("__comarkup.reset()")
            .map_err(|e| RenderError::new(RenderStage::Mount, e.to_string()))?;

        self.load_scripts(framework)?;
        let wrapped = wrappers::wrap(code, framework)?;
        log::trace!("mount script for {}:\n{}", framework, wrapped);

        // Errors that escape the wrapper: syntax errors and throws from the prelude.
        if let Err(e) = self.ctx.eval(Source::from_bytes(wrapped.as_bytes())) {
            let message = self.error_message(e);
            self.report_failure(&message);
        }
        self.run_jobs();

        let drained = self
            .evaluate(&format!("__comarkup.drain({})", self.timer_drain_limit))
            .map_err(|e| RenderError::new(RenderStage::Mount, e.to_string()))?;
        log::trace!("{} timer callbacks ran after mount", drained);

        let state = self.state()?;
        for line in &state.console {
            log::debug!("preview console: {}", line);
        }
        match state.error {
            Some(message) => Err(RenderError { stage: RenderStage::Mount, message, container_html: state.html }),
            None => Ok(RenderOutcome { html: state.html, text: state.text, console: state.console }),
        }
    }
}
