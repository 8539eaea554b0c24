//! HTTP collaborator for the overlay: detection log sink, remote-detect stub
//! and static host for a prebuilt UI bundle.
//!
//! Routes:
//! - `POST /api/log` appends `{"ts": <RFC3339>, "body": <json>}` as one line
//!   to the log file and answers `{"status":"ok"}`.
//! - `POST /api/detect` answers 501 until server-side inference is wired in.
//! - `GET /health` answers `{"status":"ok"}`.
//! - `GET <path>` serves the static directory with an `index.html` fallback,
//!   or a readiness message when the directory is missing.

use anyhow::{anyhow, Context, Result};
use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
pub const PLACEHOLDER_MESSAGE: &str = "Backend ready. Run frontend (npm run dev) for development.";
pub const DETECT_NOT_ENABLED: &str =
    "Server-side inference not enabled in this package. See README for instructions to enable YOLOv8 server.";

#[derive(Clone, Debug, PartialEq)]
pub struct SinkConfig {
    pub addr: String,
    pub log_path: PathBuf,
    pub static_dir: PathBuf,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
            log_path: PathBuf::from("detections.log"),
            static_dir: PathBuf::from("frontend/dist"),
        }
    }
}

#[derive(Debug)]
pub struct SinkHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl SinkHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("sink server thread panicked"))?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct LogLine<'a> {
    ts: String,
    body: &'a Value,
}

pub struct SinkServer {
    cfg: SinkConfig,
}

impl SinkServer {
    pub fn new(cfg: SinkConfig) -> Self {
        Self { cfg }
    }

    pub fn spawn(self) -> Result<SinkHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid sink address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind sink on {}", configured_addr))?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "sink configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        if self.cfg.static_dir.is_dir() {
            log::info!("sink: serving UI bundle from {}", self.cfg.static_dir.display());
        } else {
            log::info!(
                "sink: no UI bundle at {}; serving placeholder page",
                self.cfg.static_dir.display()
            );
        }
        log::info!(
            "sink: listening on http://{} (log file {})",
            addr,
            self.cfg.log_path.display()
        );

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg.clone();
        let join = std::thread::Builder::new()
            .name("objectai-sink".to_string())
            .spawn(move || {
                if let Err(err) = run_sink(listener, cfg, shutdown_thread) {
                    log::error!("sink stopped: {}", err);
                }
            })?;

        Ok(SinkHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_sink(listener: TcpListener, cfg: SinkConfig, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &cfg) {
                    log::warn!("sink request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, cfg: &SinkConfig) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(RequestError::TooLarge) => {
            write_json_response(&mut stream, 413, r#"{"error":"payload_too_large"}"#)?;
            return Ok(());
        }
        Err(RequestError::Malformed(err)) => {
            write_json_response(&mut stream, 400, r#"{"error":"bad_request"}"#)?;
            return Err(err);
        }
    };
    log::debug!("sink: {} {}", request.method, request.path);

    match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/api/log") => handle_log(&mut stream, cfg, &request.body),
        ("POST", "/api/detect") => {
            let body = serde_json::json!({ "error": DETECT_NOT_ENABLED });
            write_response(&mut stream, 501, "application/json", body.to_string().as_bytes())
        }
        ("GET", "/health") => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("GET", path) => serve_static(&mut stream, cfg, path),
        _ => write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#),
    }
}

fn handle_log(stream: &mut TcpStream, cfg: &SinkConfig, body: &[u8]) -> Result<()> {
    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(err) => {
            write_json_response(stream, 400, r#"{"error":"invalid_json"}"#)?;
            return Err(anyhow!("invalid log body: {}", err));
        }
    };
    let line = LogLine {
        ts: chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        body: &value,
    };
    append_line(&cfg.log_path, &serde_json::to_string(&line)?)?;
    write_json_response(stream, 200, r#"{"status":"ok"}"#)
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

fn serve_static(stream: &mut TcpStream, cfg: &SinkConfig, path: &str) -> Result<()> {
    if !cfg.static_dir.is_dir() {
        if path == "/" {
            return write_response(stream, 200, "text/html; charset=utf-8", PLACEHOLDER_MESSAGE.as_bytes());
        }
        return write_json_response(stream, 404, r#"{"error":"not_found"}"#);
    }

    let target = resolve_static_path(&cfg.static_dir, path)
        .filter(|candidate| candidate.is_file())
        .unwrap_or_else(|| cfg.static_dir.join("index.html"));
    match std::fs::read(&target) {
        Ok(bytes) => write_response(stream, 200, content_type(&target), &bytes),
        Err(_) => write_json_response(stream, 404, r#"{"error":"not_found"}"#),
    }
}

/// Map a URL path into `root`, refusing anything that would leave it.
fn resolve_static_path(root: &Path, url_path: &str) -> Option<PathBuf> {
    let relative = Path::new(url_path.trim_start_matches('/'));
    if relative
        .components()
        .any(|part| !matches!(part, Component::Normal(_)))
    {
        return None;
    }
    if relative.as_os_str().is_empty() {
        return Some(root.join("index.html"));
    }
    Some(root.join(relative))
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") | Some("mjs") => "text/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("ico") => "image/x-icon",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

enum RequestError {
    TooLarge,
    Malformed(anyhow::Error),
}

impl From<anyhow::Error> for RequestError {
    fn from(err: anyhow::Error) -> Self {
        RequestError::Malformed(err)
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Malformed(err.into())
    }
}

fn read_request(stream: &mut TcpStream) -> std::result::Result<HttpRequest, RequestError> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 8192];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before headers").into());
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(RequestError::TooLarge);
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length '{}'", value))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(RequestError::TooLarge);
    }
    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed mid-body").into());
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        body,
    })
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
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        501 => "HTTP/1.1 501 Not Implemented",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}
