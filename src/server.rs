//! Minimal HTTP/1.1 front end.
//!
//! Routes:
//! - `GET /` viewer page embedding the live stream
//! - `GET /snapshot` one annotated JPEG
//! - `GET /stream` `multipart/x-mixed-replace` over chunked transfer encoding
//! - `GET /health` JSON status
//!
//! Each connection runs on its own thread. Connections beyond `max_clients`
//! are answered with 503.

use anyhow::{anyhow, Result};
use serde_json::json;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::ServerSettings;
use crate::context::AppContext;
use crate::encode::JPEG_CONTENT_TYPE;
use crate::error::PipelineError;
use crate::stream::{ChunkedWriter, ExitReason, MultipartWriter, STREAM_CONTENT_TYPE};

const MAX_REQUEST_BYTES: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(2);
const ACCEPT_POLL: Duration = Duration::from_millis(50);

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <title>Live detection</title>
  </head>
  <body style="margin:0;background:#111;display:flex;justify-content:center">
    <img src="/stream" alt="live detection stream">
  </body>
</html>
"#;

struct ServerState {
    context: Arc<AppContext>,
    write_timeout: Duration,
    max_clients: usize,
    connections: AtomicUsize,
    live_streams: AtomicUsize,
}

pub struct HttpServer {
    settings: ServerSettings,
    context: Arc<AppContext>,
}

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    stopping: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop accepting, end every session, and wait for the camera to be released.
    pub fn stop(mut self) -> Result<()> {
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("http server thread panicked"))?;
        }
        Ok(())
    }
}

impl HttpServer {
    pub fn new(settings: ServerSettings, context: Arc<AppContext>) -> Self {
        Self { settings, context }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let configured_addr: SocketAddr = self
            .settings
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid listen address '{}': {}", self.settings.addr, e))?;
        let listener = TcpListener::bind(configured_addr)
            .map_err(|e| anyhow!("failed to bind {}: {}", configured_addr, e))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let state = Arc::new(ServerState {
            context: self.context,
            write_timeout: self.settings.write_timeout,
            max_clients: self.settings.max_clients,
            connections: AtomicUsize::new(0),
            live_streams: AtomicUsize::new(0),
        });
        let stopping = Arc::new(AtomicBool::new(false));
        let stopping_thread = stopping.clone();
        let join = std::thread::Builder::new()
            .name("http-accept".to_string())
            .spawn(move || {
                if let Err(err) = run_server(listener, &state, &stopping_thread) {
                    log::error!("http server stopped: {}", err);
                }
            })?;
        log::info!("serving on http://{}", addr);

        Ok(ServerHandle {
            addr,
            stopping,
            join: Some(join),
        })
    }
}

fn run_server(listener: TcpListener, state: &Arc<ServerState>, stopping: &AtomicBool) -> Result<()> {
    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    let result = loop {
        if stopping.load(Ordering::SeqCst) || state.context.is_shutting_down() {
            break Ok(());
        }
        workers.retain(|worker| !worker.is_finished());
        match listener.accept() {
            Ok((stream, peer)) => {
                let over_limit = state.connections.fetch_add(1, Ordering::SeqCst) >= state.max_clients;
                let slot = ConnectionSlot {
                    state: state.clone(),
                };
                let spawned = std::thread::Builder::new()
                    .name("http-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &slot.state, over_limit) {
                            log::debug!("request from {} failed: {}", peer, err);
                        }
                    });
                match spawned {
                    Ok(worker) => workers.push(worker),
                    Err(err) => log::warn!("failed to spawn connection thread: {}", err),
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => break Err(err.into()),
        }
    };

    // Sessions watch the shutdown flag; raise it before waiting on them.
    state.context.shutdown();
    for worker in workers {
        if worker.join().is_err() {
            log::warn!("connection thread panicked");
        }
    }
    result
}

/// Counts an accepted connection until its thread is done.
struct ConnectionSlot {
    state: Arc<ServerState>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.connections.fetch_sub(1, Ordering::SeqCst);
    }
}

fn handle_connection(mut stream: TcpStream, state: &ServerState, over_limit: bool) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(state.write_timeout))?;
    let request = read_request(&mut stream)?;

    if over_limit {
        log::warn!("rejecting {}: client limit {} reached", request.path, state.max_clients);
        return write_json_response(&mut stream, 503, &json!({"error": "too_many_clients"}));
    }
    if request.method != "GET" {
        return write_json_response(&mut stream, 405, &json!({"error": "method_not_allowed"}));
    }
    match request.path.as_str() {
        "/" => write_response(&mut stream, 200, "text/html; charset=utf-8", INDEX_HTML.as_bytes()),
        "/health" => write_json_response(&mut stream, 200, &health(state)),
        "/snapshot" => match state.context.snapshot() {
            Ok(image) => write_response(&mut stream, 200, JPEG_CONTENT_TYPE, image.as_bytes()),
            Err(err) => {
                log::warn!("snapshot failed: {}", err);
                write_error(&mut stream, &err)
            }
        },
        "/stream" => serve_stream(stream, state),
        _ => write_json_response(&mut stream, 404, &json!({"error": "not_found"})),
    }
}

fn serve_stream(mut stream: TcpStream, state: &ServerState) -> Result<()> {
    let session = match state.context.open_stream() {
        Ok(session) => session,
        Err(err) => {
            log::warn!("stream setup failed: {}", err);
            return write_error(&mut stream, &err);
        }
    };

    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nCache-Control: no-cache, no-store, must-revalidate\r\nPragma: no-cache\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n",
        STREAM_CONTENT_TYPE
    );
    // A failed header write drops `session`, which releases the camera.
    stream.write_all(header.as_bytes())?;

    state.live_streams.fetch_add(1, Ordering::SeqCst);
    let mut sink = MultipartWriter::new(ChunkedWriter::new(&mut stream));
    let summary = session.run(&mut sink);
    state.live_streams.fetch_sub(1, Ordering::SeqCst);

    log::info!(
        "stream closed: exit={:?} frames={}",
        summary.exit,
        summary.frames_sent
    );
    if summary.exit != ExitReason::ClientDisconnected {
        sink.into_inner().finish()?;
    }
    Ok(())
}

fn health(state: &ServerState) -> serde_json::Value {
    let ctx = &state.context;
    let camera = ctx.camera().status();
    json!({
        "status": "ok",
        "policy": ctx.policy().as_str(),
        "detector": ctx.pipeline().detector().name(),
        "camera": ctx.camera().settings().device,
        "camera_in_use": ctx.camera().in_use(),
        "camera_healthy": camera.healthy,
        "frames_captured": camera.frames_captured,
        "live_streams": state.live_streams.load(Ordering::SeqCst),
        "shared_viewers": ctx.hub().subscriber_count(),
    })
}

fn error_code(err: &PipelineError) -> &'static str {
    match err {
        PipelineError::DeviceUnavailable(_) => "device_unavailable",
        PipelineError::DeviceBusy => "device_busy",
        PipelineError::CaptureFailed(_) => "capture_failed",
        PipelineError::InferenceError(_) => "inference_error",
        PipelineError::EncodeError(_) => "encode_error",
        PipelineError::ClientDisconnected => "client_disconnected",
        PipelineError::ModelLoadError(_) => "model_load_error",
    }
}

fn write_error(stream: &mut TcpStream, err: &PipelineError) -> Result<()> {
    let status = if err.is_device_contention() { 503 } else { 500 };
    write_json_response(
        stream,
        status,
        &json!({"error": error_code(err), "detail": err.to_string()}),
    )
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
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
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
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
