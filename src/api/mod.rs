//! Dashboard HTTP API.
//!
//! A single std thread accepts connections non-blockingly and polls a shutdown flag.
//! Stream viewers are handed off to their own threads.
//! Routes:
//!
//! - `GET /health`
//! - `GET /api/events` (newest first)
//! - `GET /api/config`, `POST /api/config` (partial update, hot-swapped; may switch camera)
//! - `GET /snapshot.jpg` (latest captured frame)
//! - `GET /stream.mjpg` (live `multipart/x-mixed-replace` stream)
//! - `GET /frames/<name>` (saved motion frame)

mod stream;

pub use stream::MAX_STREAMS;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use self::stream::{spawn_stream, StreamSlots};
use crate::config::{split_csv, LiveSettings, SharedSettings};
use crate::dispatch::EventHistory;
use crate::ingest::{video_device, CaptureBackend, FrameSource};
use crate::storage::{encode_jpeg, DEFAULT_JPEG_QUALITY};

const MAX_REQUEST_BYTES: usize = 8192;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub frame_dir: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
            frame_dir: PathBuf::from("frames"),
        }
    }
}

/// Shared state the dashboard reads (and, for config, writes).
#[derive(Clone)]
pub struct ApiState {
    pub settings: SharedSettings,
    pub history: EventHistory,
    pub source: Option<Arc<FrameSource>>,
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    state: ApiState,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: ApiState) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        log::info!("dashboard api listening on http://{}", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let state = self.state;
        let join = std::thread::Builder::new()
            .name("dashboard-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, &cfg, &state, shutdown_thread) {
                    log::error!("dashboard api stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: &ApiConfig,
    state: &ApiState,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let slots = StreamSlots::default();
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, cfg, state, &slots, &shutdown) {
                    log::warn!("dashboard api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    cfg: &ApiConfig,
    state: &ApiState,
    slots: &StreamSlots,
    shutdown: &Arc<AtomicBool>,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => {
            let camera_running = state
                .source
                .as_ref()
                .is_some_and(|source| source.is_running());
            let body = serde_json::json!({ "status": "ok", "camera_running": camera_running });
            write_response(&mut stream, 200, "application/json", &serde_json::to_vec(&body)?)
        }
        ("GET", "/api/events") => {
            let body = serde_json::json!({ "events": state.history.recent() });
            write_response(&mut stream, 200, "application/json", &serde_json::to_vec(&body)?)
        }
        ("GET", "/api/config") => {
            let body = config_view(state, state.settings.snapshot())?;
            write_response(&mut stream, 200, "application/json", &body)
        }
        ("POST", "/api/config") => update_config(&mut stream, state, &request.body),
        ("GET", "/snapshot.jpg") => snapshot(&mut stream, state),
        ("GET", "/stream.mjpg") => {
            let Some(source) = state.source.clone() else {
                return write_json_response(&mut stream, 503, r#"{"error":"no_camera"}"#);
            };
            let mut overflow = stream.try_clone()?;
            if !spawn_stream(stream, source, slots, shutdown.clone())? {
                return write_json_response(&mut overflow, 503, r#"{"error":"too_many_streams"}"#);
            }
            Ok(())
        }
        ("GET", path) if path.starts_with("/frames/") => {
            serve_frame(&mut stream, &cfg.frame_dir, &path["/frames/".len()..])
        }
        (_, "/health" | "/api/events" | "/api/config" | "/snapshot.jpg" | "/stream.mjpg") => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

/// Partial update accepted by `POST /api/config`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigPatch {
    sensitivity: Option<u8>,
    min_area: Option<u32>,
    min_motion_frames: Option<u32>,
    cooldown_seconds: Option<f64>,
    persist_mode: Option<bool>,
    target_objects: Option<TargetObjects>,
    camera_index: Option<u32>,
    /// Takes precedence over `camera_index`.
    camera_device: Option<String>,
}

impl ConfigPatch {
    fn camera(&self) -> Option<String> {
        self.camera_device
            .clone()
            .or_else(|| self.camera_index.map(video_device))
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TargetObjects {
    List(Vec<String>),
    Csv(String),
}

/// Settings snapshot plus the active camera, as served by `/api/config`.
fn config_view(state: &ApiState, live: LiveSettings) -> Result<Vec<u8>> {
    let mut view = serde_json::to_value(live)?;
    if let (Some(source), Some(fields)) = (state.source.as_ref(), view.as_object_mut()) {
        fields.insert("camera".to_string(), source.describe().into());
    }
    Ok(serde_json::to_vec(&view)?)
}

fn reject(stream: &mut TcpStream, message: String) -> Result<()> {
    let body = serde_json::json!({ "error": message });
    write_response(stream, 400, "application/json", &serde_json::to_vec(&body)?)
}

/// Resolve a requested camera into a backend to switch to. `Ok(None)` means the
/// source is already on that device.
fn camera_switch(
    state: &ApiState,
    device: &str,
) -> std::result::Result<Option<(Arc<FrameSource>, Arc<dyn CaptureBackend>)>, String> {
    let source = state
        .source
        .clone()
        .ok_or_else(|| "no camera is attached to this dashboard".to_string())?;
    if source.describe() == device {
        return Ok(None);
    }
    let backend = source
        .backend_for_device(device)
        .ok_or_else(|| format!("camera source {} cannot switch devices", source.describe()))?;
    Ok(Some((source, backend)))
}

fn update_config(stream: &mut TcpStream, state: &ApiState, body: &[u8]) -> Result<()> {
    let patch: ConfigPatch = match serde_json::from_slice(body) {
        Ok(patch) => patch,
        Err(err) => return reject(stream, format!("invalid config update: {}", err)),
    };
    let switch = match patch.camera().map(|device| camera_switch(state, &device)) {
        Some(Ok(switch)) => switch,
        Some(Err(message)) => return reject(stream, message),
        None => None,
    };

    let result = state.settings.update(|live| {
        let detector = &mut live.detector;
        if let Some(value) = patch.sensitivity {
            detector.sensitivity = value;
        }
        if let Some(value) = patch.min_area {
            detector.min_area = value;
        }
        if let Some(value) = patch.min_motion_frames {
            detector.min_motion_frames = value;
        }
        if let Some(value) = patch.cooldown_seconds {
            detector.cooldown_seconds = value;
        }
        if let Some(value) = patch.persist_mode {
            detector.persist_mode = value;
        }
        match &patch.target_objects {
            Some(TargetObjects::List(labels)) => live.target_objects = labels.clone(),
            Some(TargetObjects::Csv(raw)) => live.target_objects = split_csv(raw),
            None => {}
        }
    });
    let updated = match result {
        Ok(updated) => updated,
        Err(err) => return reject(stream, err.to_string()),
    };
    log::info!("dashboard api: detector config updated: {:?}", updated.detector);

    if let Some((source, backend)) = switch {
        log::info!("dashboard api: switching camera to {}", backend.describe());
        source.replace_backend(backend)?;
    }
    let body = config_view(state, updated)?;
    write_response(stream, 200, "application/json", &body)
}

fn snapshot(stream: &mut TcpStream, state: &ApiState) -> Result<()> {
    let frame = state.source.as_ref().and_then(|source| source.get_latest());
    let Some(frame) = frame else {
        return write_json_response(stream, 503, r#"{"error":"no_frame_yet"}"#);
    };
    let jpeg = encode_jpeg(&frame, DEFAULT_JPEG_QUALITY)?;
    write_response(stream, 200, "image/jpeg", &jpeg)
}

fn serve_frame(stream: &mut TcpStream, frame_dir: &Path, name: &str) -> Result<()> {
    if !is_safe_frame_name(name) {
        return write_json_response(stream, 400, r#"{"error":"invalid_frame_name"}"#);
    }
    match std::fs::read(frame_dir.join(name)) {
        Ok(bytes) => write_response(stream, 200, "image/jpeg", &bytes),
        Err(_) => write_json_response(stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn is_safe_frame_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('%')
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let (head, rest) = read_head(stream)?;
    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let headers: HashMap<String, String> = lines
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
        .collect();
    let body = read_body(stream, rest, content_length(&headers)?)?;

    Ok(HttpRequest {
        method: method.to_string(),
        path: raw_path.split('?').next().unwrap_or(raw_path).to_string(),
        body,
    })
}

/// Read until the blank line. Returns the head text and any body bytes read with it.
fn read_head(stream: &mut TcpStream) -> Result<(String, Vec<u8>)> {
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&data[..pos]).into_owned();
            return Ok((head, data.split_off(pos + 4)));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Ok((String::from_utf8_lossy(&data).into_owned(), Vec::new()));
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
    }
}

fn content_length(headers: &HashMap<String, String>) -> Result<usize> {
    let length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    if length > MAX_REQUEST_BYTES {
        return Err(anyhow!("request too large"));
    }
    Ok(length)
}

fn read_body(stream: &mut TcpStream, mut body: Vec<u8>, length: usize) -> Result<Vec<u8>> {
    let mut buf = [0u8; 1024];
    while body.len() < length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(length);
    Ok(body)
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let header = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status,
        reason(status),
        content_type,
        body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_names_reject_traversal() {
        assert!(is_safe_frame_name("motion_2024-01-01T00-00-00.000000.jpg"));
        assert!(!is_safe_frame_name(""));
        assert!(!is_safe_frame_name("../secret"));
        assert!(!is_safe_frame_name("a/b.jpg"));
        assert!(!is_safe_frame_name("a\\b.jpg"));
        assert!(!is_safe_frame_name("%2e%2e%2fetc"));
    }

    #[test]
    fn target_objects_accept_list_or_csv() {
        let patch: ConfigPatch = serde_json::from_str(r#"{"target_objects":"dog, bird"}"#).unwrap();
        assert!(matches!(patch.target_objects, Some(TargetObjects::Csv(_))));
        let patch: ConfigPatch = serde_json::from_str(r#"{"target_objects":["dog"]}"#).unwrap();
        assert!(matches!(patch.target_objects, Some(TargetObjects::List(_))));
        assert!(serde_json::from_str::<ConfigPatch>(r#"{"sensitivity":-3}"#).is_err());
    }

    #[test]
    fn camera_device_wins_over_index() {
        let patch: ConfigPatch = serde_json::from_str(r#"{"camera_index":2}"#).unwrap();
        assert_eq!(patch.camera().as_deref(), Some("/dev/video2"));
        let patch: ConfigPatch =
            serde_json::from_str(r#"{"camera_index":2,"camera_device":"stub://b"}"#).unwrap();
        assert_eq!(patch.camera().as_deref(), Some("stub://b"));
        assert!(ConfigPatch::default().camera().is_none());
    }
}
