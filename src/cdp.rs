//! Chrome DevTools Protocol screenshot backend

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as Base64Engine;
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};

use crate::clock::SystemClock;
use crate::framework::FrameworkId;
use crate::retry::{poll_until, RetryPolicy};
use crate::server::{Screenshotter, ServerConfig};
use crate::{Error, Result};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Captures pages with a headless Chrome instance (uses the `headless_chrome` crate)
///
/// One browser is launched up front; every capture gets a fresh tab that is
/// closed afterwards.
pub struct CdpScreenshotter {
    browser: Browser,
    navigation_timeout: Duration,
}

impl CdpScreenshotter {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .window_size(Some((config.viewport.width, config.viewport.height)))
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::InitializationError(format!("Failed to launch browser: {}", e)))?;

        Ok(Self {
            browser,
            navigation_timeout: Duration::from_millis(config.navigation_timeout_ms),
        })
    }

    fn wait_for_load(&self, tab: &Tab) -> Result<()> {
        let attempts = (self.navigation_timeout.as_millis() / READY_POLL_INTERVAL.as_millis()).max(1) as u32;
        let policy = RetryPolicy::fixed(attempts, READY_POLL_INTERVAL);
        poll_until(&policy, &SystemClock, |_| {
            let state = tab
                .evaluate("document.readyState", false)
                .map_err(|e| Error::CdpError(format!("Evaluation failed: {}", e)))?;
            Ok(state
                .value
                .as_ref()
                .and_then(|v| v.as_str())
                .filter(|s| *s == "complete")
                .map(|_| ()))
        })
    }

    fn capture_in(&self, tab: &Arc<Tab>, html: &str, framework: FrameworkId) -> Result<Vec<u8>> {
        tab.set_default_timeout(self.navigation_timeout);

        let url = format!(
            "data:text/html;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(html)
        );
        tab.navigate_to(&url)
            .map_err(|e| Error::CdpError(format!("Navigation failed: {}", e)))?;
        tab.wait_until_navigated()
            .map_err(|e| Error::CdpError(format!("Wait for navigation failed: {}", e)))?;
        self.wait_for_load(tab)?;

        // Framework bootstrap and any first animations
        std::thread::sleep(Duration::from_millis(framework.profile().settle_ms));

        tab.capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| Error::CdpError(format!("Screenshot failed: {}", e)))
    }
}

impl Screenshotter for CdpScreenshotter {
    fn capture(&self, html: &str, framework: FrameworkId) -> Result<Vec<u8>> {
        let tab = self
            .browser
            .new_tab()
            .map_err(|e| Error::CdpError(format!("Failed to create tab: {}", e)))?;

        let result = self.capture_in(&tab, html, framework);
        if let Err(e) = tab.close(true) {
            log::warn!("failed to close capture tab: {}", e);
        }
        result
    }
}
