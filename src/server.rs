//! HTTP render server.
//!
//! `POST /render/:framework` injects the request into the framework's page
//! template, captures it through a [`Screenshotter`], and stores the PNG in
//! the output directory, where `GET /rendered-<millis>.png` serves it. Only
//! the newest screenshots are kept.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde_json::json;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

use crate::clock::{Clock, SystemClock};
use crate::framework::FrameworkId;
use crate::template::{RenderRequest, Templates};
use crate::{Error, Result, Viewport};

static SCREENSHOT_PATH: OnceLock<Regex> = OnceLock::new();

fn screenshot_path() -> &'static Regex {
    SCREENSHOT_PATH.get_or_init(|| Regex::new(r"^/rendered-(\d+)\.png$").expect("SCREENSHOT_PATH should be valid"))
}

/// Configuration for the render server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to listen on
    pub bind: String,
    /// Port to listen on (0 picks a free one)
    pub port: u16,
    /// Where screenshots are written and served from
    pub output_dir: PathBuf,
    /// Replacement templates (`react.html`, `vue.html`, ...)
    pub templates_dir: Option<PathBuf>,
    /// Screenshots kept by the retention sweep
    pub keep_screenshots: usize,
    /// How often the retention sweep runs
    pub cleanup_interval: Duration,
    /// Browser viewport used for captures
    pub viewport: Viewport,
    /// Page load timeout in milliseconds
    pub navigation_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 3000,
            output_dir: PathBuf::from("."),
            templates_dir: None,
            keep_screenshots: 10,
            cleanup_interval: Duration::from_secs(5 * 60),
            viewport: Viewport { width: 1024, height: 768 },
            navigation_timeout_ms: 30000,
        }
    }
}

/// Turns a complete HTML page into PNG bytes
pub trait Screenshotter: Send + Sync {
    fn capture(&self, html: &str, framework: FrameworkId) -> Result<Vec<u8>>;
}

/// Used when no browser backend is compiled in; every capture fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableScreenshotter;

impl Screenshotter for UnavailableScreenshotter {
    fn capture(&self, _html: &str, _framework: FrameworkId) -> Result<Vec<u8>> {
        Err(Error::RenderError(
            "no screenshot backend available (build with the `cdp` feature)".to_string(),
        ))
    }
}

/// A response before it is put on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl HttpReply {
    fn json(status: u16, value: serde_json::Value) -> Self {
        Self { status, content_type: "application/json", body: value.to_string().into_bytes() }
    }

    fn html(body: &str) -> Self {
        Self { status: 200, content_type: "text/html; charset=utf-8", body: body.as_bytes().to_vec() }
    }

    fn empty(status: u16) -> Self {
        Self { status, content_type: "text/plain", body: Vec::new() }
    }
}

const INDEX: &str = r##"<h1>Framework Renderer API</h1>
<p>Available endpoints:</p>
<ul>
    <li>POST /render/vue - Render Vue.js components</li>
    <li>POST /render/react - Render React components</li>
    <li>POST /render/angular - Render Angular components</li>
    <li>POST /render/vanilla - Render vanilla JavaScript</li>
</ul>
<p>Example usage:</p>
<pre>
curl -X POST http://localhost:3000/render/vanilla \
-H "Content-Type: application/json" \
-d '{
    "content": "&lt;div id=\"counter\"&gt;&lt;h1&gt;0&lt;/h1&gt;&lt;button onclick=\"increment()\"&gt;+&lt;/button&gt;&lt;/div&gt;",
    "script": "let count = 0; function increment() { count++; document.querySelector(\"h1\").textContent = count; }",
    "style": "#counter { text-align: center; } button { padding: 10px 20px; }"
}'
</pre>
"##;

/// Request routing, independent of the socket
pub struct Renderer {
    templates: Templates,
    screenshotter: Arc<dyn Screenshotter>,
    clock: Arc<dyn Clock>,
    output_dir: PathBuf,
}

impl Renderer {
    pub fn new(config: &ServerConfig, screenshotter: Arc<dyn Screenshotter>) -> Result<Self> {
        let templates = match &config.templates_dir {
            Some(dir) => Templates::from_dir(dir)?,
            None => Templates::default(),
        };
        std::fs::create_dir_all(&config.output_dir)?;
        Ok(Self {
            templates,
            screenshotter,
            clock: Arc::new(SystemClock),
            output_dir: config.output_dir.clone(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn respond(&self, method: &Method, url: &str, body: &[u8]) -> HttpReply {
        let path = url.split('?').next().unwrap_or(url);
        match (method, path) {
            (Method::Options, _) => HttpReply::empty(204),
            (Method::Get, "/") => HttpReply::html(INDEX),
            (Method::Post, p) if p.starts_with("/render/") => {
                let framework = FrameworkId::parse_lossy(&p["/render/".len()..]);
                self.render(framework, body)
            }
            (Method::Get, p) if screenshot_path().is_match(p) => self.screenshot(&p[1..]),
            (_, "/") => HttpReply::json(405, json!({ "error": "Method not allowed" })),
            (_, p) if p.starts_with("/render/") => HttpReply::json(405, json!({ "error": "Method not allowed" })),
            _ => HttpReply::json(404, json!({ "error": "Not found" })),
        }
    }

    fn render(&self, framework: FrameworkId, body: &[u8]) -> HttpReply {
        let request: RenderRequest = if body.iter().all(u8::is_ascii_whitespace) {
            RenderRequest::default()
        } else {
            match serde_json::from_slice(body) {
                Ok(r) => r,
                Err(e) => {
                    return HttpReply::json(400, json!({ "error": "Invalid JSON", "details": e.to_string() }))
                }
            }
        };
        log::info!(
            "Rendering {} code: content={:?} script={:?}",
            framework,
            request.content.as_deref().map(|s| preview(s, 100)),
            request.script.as_deref().map(|s| preview(s, 100)),
        );

        match self.capture(framework, &request) {
            Ok(name) => {
                log::info!("Successfully rendered {} code and saved {}", framework, name);
                HttpReply::json(200, json!({ "screenshot": format!("/{}", name) }))
            }
            Err(e) => {
                log::error!("Error rendering {} code: {}", framework, e);
                HttpReply::json(500, json!({ "error": "Failed to render code", "details": e.to_string() }))
            }
        }
    }

    fn capture(&self, framework: FrameworkId, request: &RenderRequest) -> Result<String> {
        let html = self.templates.render(framework, request);
        let png = self.screenshotter.capture(&html, framework)?;

        // create_new claims the name, so concurrent captures never share a file
        let mut millis = self.clock.now_millis();
        let mut file = loop {
            let path = self.output_dir.join(screenshot_name(millis));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => break file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => millis += 1,
                Err(e) => return Err(e.into()),
            }
        };
        file.write_all(&png)?;
        Ok(screenshot_name(millis))
    }

    fn screenshot(&self, name: &str) -> HttpReply {
        match std::fs::read(self.output_dir.join(name)) {
            Ok(bytes) => HttpReply { status: 200, content_type: "image/png", body: bytes },
            Err(_) => HttpReply::json(404, json!({ "error": "Not found" })),
        }
    }
}

fn screenshot_name(millis: u64) -> String {
    format!("rendered-{}.png", millis)
}

fn preview(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// Keep the newest `keep` screenshots in `dir`; returns how many were deleted.
pub fn cleanup_screenshots(dir: &Path, keep: usize) -> Result<usize> {
    let mut shots: Vec<(u64, PathBuf)> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let millis = name.strip_prefix("rendered-")?.strip_suffix(".png")?.parse().ok()?;
            Some((millis, entry.path()))
        })
        .collect();
    if shots.len() <= keep {
        return Ok(0);
    }

    shots.sort_by(|a, b| b.0.cmp(&a.0));
    let mut deleted = 0;
    for (_, path) in shots.into_iter().skip(keep) {
        match std::fs::remove_file(&path) {
            Ok(()) => deleted += 1,
            Err(e) => log::warn!("could not delete {}: {}", path.display(), e),
        }
    }
    Ok(deleted)
}

/// Run the retention sweep on its own thread every `interval`.
pub fn spawn_retention(dir: PathBuf, keep: usize, interval: Duration) -> Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("comarkup-retention".to_string())
        .spawn(move || loop {
            std::thread::sleep(interval);
            match cleanup_screenshots(&dir, keep) {
                Ok(0) => {}
                Ok(n) => log::debug!("removed {} old screenshots", n),
                Err(e) => log::error!("Cleanup error: {}", e),
            }
        })
        .map_err(|e| Error::InitializationError(format!("Failed to spawn retention thread: {}", e)))
}

/// Largest request body accepted, matching the usual 100kb JSON limit
pub const MAX_BODY_BYTES: u64 = 100 * 1024;

/// The render server bound to its socket
pub struct RenderServer {
    server: Arc<Server>,
    renderer: Arc<Renderer>,
    config: ServerConfig,
}

/// Stops a running [`RenderServer`]
#[derive(Clone)]
pub struct StopHandle(Arc<Server>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.unblock();
    }
}

impl RenderServer {
    pub fn bind(config: ServerConfig, screenshotter: Arc<dyn Screenshotter>) -> Result<Self> {
        let renderer = Renderer::new(&config, screenshotter)?;
        Self::with_renderer(config, renderer)
    }

    pub fn with_renderer(config: ServerConfig, renderer: Renderer) -> Result<Self> {
        let addr = format!("{}:{}", config.bind, config.port);
        let server = Server::http(&addr)
            .map_err(|e| Error::InitializationError(format!("Failed to bind {}: {}", addr, e)))?;
        Ok(Self { server: Arc::new(server), renderer: Arc::new(renderer), config })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.server.clone())
    }

    /// Serve until stopped, sweeping old screenshots in the background.
    ///
    /// Every request runs on its own thread, so a slow capture does not hold
    /// up screenshot downloads or other renders.
    pub fn run(self) -> Result<()> {
        spawn_retention(self.config.output_dir.clone(), self.config.keep_screenshots, self.config.cleanup_interval)?;
        if let Some(addr) = self.local_addr() {
            log::info!("Server running on {}", addr);
        }
        for request in self.server.incoming_requests() {
            let renderer = self.renderer.clone();
            let spawned = std::thread::Builder::new()
                .name("comarkup-request".to_string())
                .spawn(move || handle(&renderer, request));
            if let Err(e) = spawned {
                log::error!("failed to spawn request thread: {}", e);
            }
        }
        log::info!("server stopped");
        Ok(())
    }
}

/// Read at most [`MAX_BODY_BYTES`]; `None` when the body is larger.
fn read_body(reader: &mut dyn Read) -> std::io::Result<Option<Vec<u8>>> {
    let mut body = Vec::new();
    reader.take(MAX_BODY_BYTES + 1).read_to_end(&mut body)?;
    if body.len() as u64 > MAX_BODY_BYTES {
        return Ok(None);
    }
    Ok(Some(body))
}

fn handle(renderer: &Renderer, mut request: Request) {
    let method = request.method().clone();
    let url = request.url().to_string();

    let reply = match read_body(request.as_reader()) {
        Ok(Some(body)) => renderer.respond(&method, &url, &body),
        Ok(None) => HttpReply::json(413, json!({ "error": "Payload too large" })),
        Err(e) => {
            log::warn!("failed to read body of {} {}: {}", method, url, e);
            HttpReply::json(400, json!({ "error": "Unreadable request body" }))
        }
    };
    log::debug!("{} {} -> {}", method, url, reply.status);

    let mut response = Response::from_data(reply.body).with_status_code(StatusCode(reply.status));
    for (name, value) in [
        ("Content-Type", reply.content_type),
        ("Access-Control-Allow-Origin", "*"),
        ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
        ("Access-Control-Allow-Headers", "Content-Type"),
    ] {
        if let Ok(header) = Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            response.add_header(header);
        }
    }
    if let Err(e) = request.respond(response) {
        log::warn!("failed to respond to {} {}: {}", method, url, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    struct EchoShot;

    impl Screenshotter for EchoShot {
        fn capture(&self, html: &str, framework: FrameworkId) -> Result<Vec<u8>> {
            Ok(format!("{}:{}", framework, html.len()).into_bytes())
        }
    }

    fn renderer(dir: &Path, shot: Arc<dyn Screenshotter>) -> Renderer {
        let config = ServerConfig { output_dir: dir.to_path_buf(), ..Default::default() };
        Renderer::new(&config, shot).unwrap().with_clock(Arc::new(ManualClock::new(1700000000000)))
    }

    #[test]
    fn render_saves_and_serves_screenshot() {
        let dir = tempfile::tempdir().unwrap();
        let r = renderer(dir.path(), Arc::new(EchoShot));

        let reply = r.respond(&Method::Post, "/render/Vue", br#"{"content":"<p>hi</p>"}"#);
        assert_eq!(reply.status, 200);
        let body: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(body["screenshot"], "/rendered-1700000000000.png");

        let shot = r.respond(&Method::Get, "/rendered-1700000000000.png", b"");
        assert_eq!(shot.content_type, "image/png");
        assert!(String::from_utf8(shot.body).unwrap().starts_with("vue:"));

        // Same millisecond: the second capture gets the next free name.
        let reply = r.respond(&Method::Post, "/render/vue", b"");
        let body: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(body["screenshot"], "/rendered-1700000000001.png");
    }

    #[test]
    fn unknown_framework_uses_vanilla_page() {
        let dir = tempfile::tempdir().unwrap();
        let r = renderer(dir.path(), Arc::new(EchoShot));
        r.respond(&Method::Post, "/render/svelte", b"{}");
        let shot = r.respond(&Method::Get, "/rendered-1700000000000.png", b"");
        assert!(String::from_utf8(shot.body).unwrap().starts_with("vanilla:"));
    }

    #[test]
    fn bad_json_and_capture_failure() {
        let dir = tempfile::tempdir().unwrap();
        let r = renderer(dir.path(), Arc::new(UnavailableScreenshotter));

        assert_eq!(r.respond(&Method::Post, "/render/react", b"{nope").status, 400);

        let reply = r.respond(&Method::Post, "/render/react", b"{}");
        assert_eq!(reply.status, 500);
        let body: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(body["error"], "Failed to render code");
        assert!(body["details"].as_str().unwrap().contains("no screenshot backend"));
    }

    #[test]
    fn routes_reject_traversal_and_unknown_paths() {
        let dir = tempfile::tempdir().unwrap();
        let r = renderer(dir.path(), Arc::new(EchoShot));
        assert_eq!(r.respond(&Method::Get, "/../secret.png", b"").status, 404);
        assert_eq!(r.respond(&Method::Get, "/rendered-1.png", b"").status, 404);
        assert_eq!(r.respond(&Method::Options, "/render/vue", b"").status, 204);
        assert_eq!(r.respond(&Method::Get, "/render/vue", b"").status, 405);
        assert_eq!(r.respond(&Method::Get, "/", b"").status, 200);
    }

    #[test]
    fn body_reader_stops_at_the_limit() {
        let small = vec![b'a'; 10];
        assert_eq!(read_body(&mut small.as_slice()).unwrap(), Some(small.clone()));

        let exact = vec![b'a'; MAX_BODY_BYTES as usize];
        assert_eq!(read_body(&mut exact.as_slice()).unwrap().map(|b| b.len()), Some(exact.len()));

        let large = vec![b'a'; MAX_BODY_BYTES as usize + 1];
        assert_eq!(read_body(&mut large.as_slice()).unwrap(), None);
    }

    #[test]
    fn cleanup_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        for millis in [5u64, 1, 3, 2, 4] {
            std::fs::write(dir.path().join(screenshot_name(millis)), b"png").unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), b"keep me").unwrap();

        assert_eq!(cleanup_screenshots(dir.path(), 2).unwrap(), 3);
        assert!(dir.path().join("rendered-5.png").exists());
        assert!(dir.path().join("rendered-4.png").exists());
        assert!(!dir.path().join("rendered-3.png").exists());
        assert!(dir.path().join("notes.txt").exists());
        assert_eq!(cleanup_screenshots(dir.path(), 2).unwrap(), 0);
    }
}
