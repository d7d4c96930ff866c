use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use comarkup::server::{RenderServer, Screenshotter, ServerConfig};
use comarkup::{FrameworkId, Result};

/// Records what it was asked to capture and returns a fixed PNG signature.
#[derive(Default)]
struct FakeScreenshotter {
    calls: AtomicUsize,
}

impl Screenshotter for FakeScreenshotter {
    fn capture(&self, html: &str, framework: FrameworkId) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut png = vec![0x89, b'P', b'N', b'G'];
        png.extend_from_slice(format!("{}|{}", framework, html).as_bytes());
        Ok(png)
    }
}

/// Holds every capture until the test releases it.
struct GatedScreenshotter {
    gate: Mutex<Receiver<()>>,
}

impl Screenshotter for GatedScreenshotter {
    fn capture(&self, _html: &str, _framework: FrameworkId) -> Result<Vec<u8>> {
        let _ = self.gate.lock().unwrap().recv();
        Ok(vec![0x89, b'P', b'N', b'G'])
    }
}

fn local_config(dir: &std::path::Path) -> ServerConfig {
    ServerConfig {
        bind: "127.0.0.1".to_string(),
        port: 0,
        output_dir: dir.to_path_buf(),
        ..Default::default()
    }
}

#[test]
fn render_and_fetch_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let config = local_config(dir.path());
    let shooter = Arc::new(FakeScreenshotter::default());
    let server = RenderServer::bind(config, shooter.clone()).unwrap();
    let addr = server.local_addr().unwrap();
    let stop = server.stop_handle();
    let worker = thread::spawn(move || server.run());

    let base = format!("http://{}", addr);
    let client = reqwest::blocking::Client::new();

    let index = client.get(format!("{}/", base)).send().unwrap();
    assert_eq!(index.status(), 200);
    assert_eq!(index.headers()["access-control-allow-origin"], "*");
    let page = index.text().unwrap();
    assert!(page.contains("POST /render/vue"));
    assert!(page.trim_end().ends_with("</pre>"), "{}", page);

    let res = client
        .post(format!("{}/render/vanilla", base))
        .json(&serde_json::json!({
            "content": "<div id=\"counter\"><h1>0</h1></div>",
            "script": "<script>let count = 0;</script>",
            "style": "h1 { color: red; }"
        }))
        .send()
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().unwrap();
    let path = body["screenshot"].as_str().unwrap().to_string();
    assert!(path.starts_with("/rendered-") && path.ends_with(".png"), "{}", path);

    let png = client.get(format!("{}{}", base, path)).send().unwrap();
    assert_eq!(png.status(), 200);
    assert_eq!(png.headers()["content-type"], "image/png");
    let bytes = png.bytes().unwrap();
    let captured = String::from_utf8_lossy(&bytes[4..]).into_owned();
    assert!(captured.starts_with("vanilla|"));
    assert!(captured.contains("<h1>0</h1>"));
    assert!(captured.contains("let count = 0;"));
    assert!(!captured.contains("<script>let"));
    assert!(captured.contains("<style>h1 { color: red; }</style>"));

    let bad = client
        .post(format!("{}/render/react", base))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .unwrap();
    assert_eq!(bad.status(), 400);

    let preflight = client.request(reqwest::Method::OPTIONS, format!("{}/render/react", base)).send().unwrap();
    assert_eq!(preflight.status(), 204);
    assert!(preflight.headers()["access-control-allow-methods"].to_str().unwrap().contains("POST"));

    assert_eq!(client.get(format!("{}/nope", base)).send().unwrap().status(), 404);
    assert_eq!(shooter.calls.load(Ordering::SeqCst), 1);

    stop.stop();
    worker.join().unwrap().unwrap();
}

#[test]
fn slow_capture_does_not_block_other_requests() {
    let dir = tempfile::tempdir().unwrap();
    let (release, gate) = mpsc::channel();
    let shooter = Arc::new(GatedScreenshotter { gate: Mutex::new(gate) });
    let server = RenderServer::bind(local_config(dir.path()), shooter).unwrap();
    let base = format!("http://{}", server.local_addr().unwrap());
    let stop = server.stop_handle();
    let worker = thread::spawn(move || server.run());

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap();
    let render = {
        let client = client.clone();
        let url = format!("{}/render/angular", base);
        thread::spawn(move || client.post(url).body("{}").send().map(|r| r.status()))
    };

    // The capture is parked on the gate; the index still answers.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(client.get(format!("{}/", base)).send().unwrap().status(), 200);
    assert!(!render.is_finished());

    release.send(()).unwrap();
    assert_eq!(render.join().unwrap().unwrap(), 200);

    stop.stop();
    worker.join().unwrap().unwrap();
}

#[test]
fn oversized_body_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let shooter = Arc::new(FakeScreenshotter::default());
    let server = RenderServer::bind(local_config(dir.path()), shooter.clone()).unwrap();
    let base = format!("http://{}", server.local_addr().unwrap());
    let stop = server.stop_handle();
    let worker = thread::spawn(move || server.run());

    let script = "x".repeat(comarkup::server::MAX_BODY_BYTES as usize);
    let res = reqwest::blocking::Client::new()
        .post(format!("{}/render/vanilla", base))
        .json(&serde_json::json!({ "script": script }))
        .send()
        .unwrap();
    assert_eq!(res.status(), 413);
    assert_eq!(shooter.calls.load(Ordering::SeqCst), 0);

    stop.stop();
    worker.join().unwrap().unwrap();
}
