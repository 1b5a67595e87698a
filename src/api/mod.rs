//! Minimal HTTP/1.1 transport around the engine.
//!
//! Routes:
//! - `GET /`           health and counters
//! - `POST /analyze`   multipart `image` part or raw encoded image body
//! - `POST /reset`     clear decision history
//! - `GET|POST /config` read or partially update thresholds
//!
//! Connections are served one at a time on a background thread, so history
//! appends follow request arrival order.

use crate::config::ConfigUpdate;
use crate::detect::CandidateBox;
use crate::engine::Engine;
use crate::frame::Frame;
use crate::recorder::Recorder;
use crate::smoother::Decision;
use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_HEADER_BYTES: usize = 16 * 1024;
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5000".to_string(),
        }
    }
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
    engine: Arc<Engine>,
    recorder: Option<Recorder>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, engine: Arc<Engine>) -> Self {
        Self {
            cfg,
            engine,
            recorder: None,
        }
    }

    /// Record every analyzed frame into `recorder`.
    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let service = Service {
            engine: self.engine,
            recorder: self.recorder,
        };
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &service, shutdown_thread) {
                log::error!("traffic api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

struct Service {
    engine: Arc<Engine>,
    recorder: Option<Recorder>,
}

fn run_api(listener: TcpListener, service: &Service, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, service) {
                    log::warn!("traffic api request rejected: {}", err);
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

fn handle_connection(mut stream: TcpStream, service: &Service) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            write_json(&mut stream, 400, &json!({ "error": "bad_request" }))?;
            return Err(err);
        }
    };

    let (status, body) = match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") => (200, health(service)?),
        ("POST", "/analyze") => analyze(service, &request),
        ("POST", "/reset") => {
            service.engine.reset_history()?;
            (200, json!({ "status": "history_cleared" }))
        }
        ("GET", "/config") => (200, config_body(service)?),
        ("POST", "/config") => update_config(service, &request)?,
        (_, "/" | "/analyze" | "/reset" | "/config") => {
            (405, json!({ "error": "method_not_allowed" }))
        }
        _ => (404, json!({ "error": "not_found" })),
    };
    write_json(&mut stream, status, &body)
}

fn health(service: &Service) -> Result<serde_json::Value> {
    let cfg = service.engine.config()?;
    Ok(json!({
        "status": "online",
        "detector": service.engine.detector_name(),
        "images_processed": service.engine.frames_processed(),
        "green_range": cfg.traffic_rule().describe(),
        "logs_dir": service
            .recorder
            .as_ref()
            .map(|r| r.dir().display().to_string()),
    }))
}

#[derive(Serialize)]
struct AnalyzeResponse<'a> {
    cars: usize,
    decision: Decision,
    raw_decision: Decision,
    boxes: Vec<BoxBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    saved: Option<&'a str>,
}

#[derive(Serialize)]
struct BoxBody {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    confidence: f32,
}

impl From<&CandidateBox> for BoxBody {
    fn from(c: &CandidateBox) -> Self {
        Self {
            x: c.x,
            y: c.y,
            width: c.width,
            height: c.height,
            confidence: c.confidence,
        }
    }
}

fn analyze(service: &Service, request: &HttpRequest) -> (u16, serde_json::Value) {
    let payload = match request.image_payload() {
        Some(payload) if !payload.is_empty() => payload,
        _ => return (400, json!({ "error": "no_image" })),
    };
    let frame = match Frame::decode(payload) {
        Ok(frame) => frame,
        Err(err) => {
            log::warn!("rejecting image: {:#}", err);
            return (400, json!({ "error": "invalid_image" }));
        }
    };
    log::debug!("received image {}x{}", frame.width(), frame.height());

    let analysis = match service.engine.analyze(&frame) {
        Ok(analysis) => analysis,
        Err(err) => {
            log::error!("analysis failed: {:#}", err);
            return (500, json!({ "error": "analysis_failed" }));
        }
    };

    let saved = service.recorder.as_ref().and_then(|recorder| {
        match recorder.record(&frame, &analysis) {
            Ok(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().to_string()),
            Err(err) => {
                log::warn!("recording failed: {:#}", err);
                None
            }
        }
    });

    let response = AnalyzeResponse {
        cars: analysis.cars,
        decision: analysis.decision,
        raw_decision: analysis.raw_decision,
        boxes: analysis.candidates.iter().map(BoxBody::from).collect(),
        saved: saved.as_deref(),
    };
    match serde_json::to_value(&response) {
        Ok(body) => (200, body),
        Err(err) => {
            log::error!("failed to encode response: {}", err);
            (500, json!({ "error": "encode_failed" }))
        }
    }
}

fn config_body(service: &Service) -> Result<serde_json::Value> {
    let cfg = service.engine.config()?;
    let mut body = serde_json::to_value(cfg.as_ref())?;
    if let Some(map) = body.as_object_mut() {
        map.insert(
            "history_size".to_string(),
            json!(service.engine.history_len()?),
        );
    }
    Ok(body)
}

fn update_config(service: &Service, request: &HttpRequest) -> Result<(u16, serde_json::Value)> {
    let update: ConfigUpdate = if request.body.is_empty() {
        ConfigUpdate::default()
    } else {
        match serde_json::from_slice(&request.body) {
            Ok(update) => update,
            Err(err) => {
                return Ok((400, json!({ "error": format!("invalid_config: {}", err) })));
            }
        }
    };
    if let Err(err) = service.engine.update_config(&update) {
        return Ok((400, json!({ "error": format!("{:#}", err) })));
    }
    Ok((200, config_body(service)?))
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 8192];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = find(&data, b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before headers"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(anyhow!("request body too large"));
    }
    let mut body = data.split_off(header_end + 4);
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before body"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        body,
    })
}

fn write_json(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
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
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
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
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn multipart_boundary(&self) -> Option<&str> {
        let content_type = self.headers.get("content-type")?;
        let mut params = content_type.split(';').map(str::trim);
        if !params.next()?.eq_ignore_ascii_case("multipart/form-data") {
            return None;
        }
        params
            .filter_map(|p| p.split_once('='))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case("boundary"))
            .map(|(_, v)| v.trim().trim_matches('"'))
    }

    /// Encoded image bytes: the `image` form part, or the whole body otherwise.
    fn image_payload(&self) -> Option<&[u8]> {
        match self.multipart_boundary() {
            Some(boundary) => multipart_part(&self.body, boundary, "image"),
            None => Some(&self.body),
        }
    }
}

/// Content of the form part named `name`.
fn multipart_part<'a>(body: &'a [u8], boundary: &str, name: &str) -> Option<&'a [u8]> {
    let delimiter = format!("--{}", boundary);
    let delimiter = delimiter.as_bytes();
    let wanted = format!("name=\"{}\"", name);

    let mut rest = &body[find(body, delimiter)? + delimiter.len()..];
    loop {
        if rest.starts_with(b"--") {
            return None;
        }
        let next = find(rest, delimiter)?;
        let part = &rest[..next];
        rest = &rest[next + delimiter.len()..];

        let part = part.strip_prefix(b"\r\n").unwrap_or(part);
        let header_end = find(part, b"\r\n\r\n")?;
        let headers = String::from_utf8_lossy(&part[..header_end]);
        let disposition_matches = headers.lines().any(|line| {
            line.to_ascii_lowercase().starts_with("content-disposition") && line.contains(&wanted)
        });
        if disposition_matches {
            let content = &part[header_end + 4..];
            return Some(content.strip_suffix(b"\r\n").unwrap_or(content));
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_named_multipart_part() {
        let body = b"--XyZ\r\n\
Content-Disposition: form-data; name=\"camera\"\r\n\r\n\
front\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"image\"; filename=\"f.jpg\"\r\n\
Content-Type: image/jpeg\r\n\r\n\
\x01\x02\r\n\x03\r\n\
--XyZ--\r\n";
        assert_eq!(
            multipart_part(body, "XyZ", "image"),
            Some(&b"\x01\x02\r\n\x03"[..])
        );
        assert_eq!(multipart_part(body, "XyZ", "camera"), Some(&b"front"[..]));
        assert_eq!(multipart_part(body, "XyZ", "missing"), None);
    }

    #[test]
    fn boundary_is_parsed_from_content_type() {
        let mut headers = HashMap::new();
        headers.insert(
            "content-type".to_string(),
            "multipart/form-data; boundary=\"abc123\"".to_string(),
        );
        let request = HttpRequest {
            method: "POST".to_string(),
            path: "/analyze".to_string(),
            headers,
            body: Vec::new(),
        };
        assert_eq!(request.multipart_boundary(), Some("abc123"));
    }

    #[test]
    fn raw_body_is_the_payload_without_multipart() {
        let request = HttpRequest {
            method: "POST".to_string(),
            path: "/analyze".to_string(),
            headers: HashMap::new(),
            body: vec![9, 9, 9],
        };
        assert_eq!(request.image_payload(), Some(&[9u8, 9, 9][..]));
    }
}
