//! HTTP request layer.
//!
//! Thin JSON endpoints in front of the playback controller. Bodies are parsed
//! as JSON whatever their Content-Type. Decoding, synthesis and `start` (which
//! may join a previous worker) run on the blocking pool.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use chime_common::MetricsContext;
use hyper::header::{self, HeaderValue};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::audio::volume_to_gain_db;
use crate::config::AgentConfig;
use crate::controller::{PlaybackController, PlaybackPolicy};
use crate::decode::{decode_bytes, decode_file, resolve_library_file};
use crate::error::PlaybackError;
use crate::speech::SpeechSynthesizer;

/// Volume used when a request omits it (unity gain).
pub const DEFAULT_VOLUME: i64 = 100;

/// Largest request body accepted, in bytes.
pub const MAX_BODY_BYTES: u64 = 64 * 1024;

/// Body of `POST /play` and `POST /loop`.
#[derive(Debug, Deserialize)]
struct PlayRequest {
    filename: Option<String>,
    volume: Option<i64>,
}

/// Body of `POST /beep`.
#[derive(Debug, Deserialize)]
struct BeepRequest {
    number: Option<i64>,
    volume: Option<i64>,
}

/// Body of `POST /tts`.
#[derive(Debug, Deserialize)]
struct SpeakRequest {
    message: Option<String>,
    volume: Option<i64>,
}

/// Shared state handed to every request.
#[derive(Clone)]
pub struct AgentContext {
    // ---
    pub controller: Arc<PlaybackController>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub config: Arc<AgentConfig>,
    pub metrics: MetricsContext,
}

/// Error response: status code plus a message rendered as `{"error": ...}`.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn too_large() -> Self {
        Self {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            message: format!("Request body exceeds {MAX_BODY_BYTES} bytes"),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<PlaybackError> for ApiError {
    fn from(e: PlaybackError) -> Self {
        ApiError::bad_request(e.to_string())
    }
}

type ApiResult = Result<Value, ApiError>;

/// Serves the API on `ctx.config.bind` until `shutdown` resolves.
pub async fn serve<F>(ctx: AgentContext, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    // ---
    let bind = ctx.config.bind;
    let make_svc = make_service_fn(move |_conn| {
        let ctx = ctx.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let ctx = ctx.clone();
                async move { handle_request(req, ctx).await }
            }))
        }
    });

    let server = Server::try_bind(&bind)?.serve(make_svc);
    info!("API listening on http://{}", server.local_addr());

    server
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

/// Routes one request. Never fails; errors become JSON responses.
pub async fn handle_request(
    req: Request<Body>,
    ctx: AgentContext,
) -> Result<Response<Body>, hyper::Error> {
    // ---
    let route = route_label(req.method(), req.uri().path());
    ctx.metrics.requests_total.with_label_values(&[route]).inc();

    if req.method() == Method::OPTIONS {
        return Ok(preflight_response());
    }

    let result = match (req.method(), req.uri().path()) {
        (&Method::POST, "/play") => play_library(&ctx, req, PlaybackPolicy::once()).await,
        (&Method::POST, "/loop") => play_library(&ctx, req, PlaybackPolicy::forever()).await,
        (&Method::POST, "/beep") => beep(&ctx, req).await,
        (&Method::POST, "/tts") => tts(&ctx, req).await,
        (&Method::GET, "/stop") => {
            ctx.controller.stop();
            Ok(json!({ "status": "stopped" }))
        }
        (&Method::GET, "/status") => {
            let status = if ctx.controller.status() { "running" } else { "stopped" };
            Ok(json!({ "status": status }))
        }
        (&Method::GET, "/info") => Ok(info(&ctx, &req)),
        _ => Err(ApiError {
            status: StatusCode::NOT_FOUND,
            message: "not found".into(),
        }),
    };

    let response = match result {
        Ok(body) => json_response(StatusCode::OK, &body),
        Err(e) => {
            debug!("{} -> {}: {}", route, e.status, e.message);
            ctx.metrics
                .request_errors_total
                .with_label_values(&[route])
                .inc();
            json_response(e.status, &json!({ "error": e.message }))
        }
    };
    Ok(response)
}

async fn play_library(ctx: &AgentContext, req: Request<Body>, policy: PlaybackPolicy) -> ApiResult {
    // ---
    let body: PlayRequest = read_json(req).await?;
    let filename = required(body.filename, "filename")?;
    let volume = body.volume.unwrap_or(DEFAULT_VOLUME);
    debug!("play filename {} volume {} {:?}", filename, volume, policy);

    let gain = volume_to_gain_db(volume)?;
    let ctx_blocking = ctx.clone();
    let name = filename.clone();
    run_blocking(move || {
        let timer = ctx_blocking.metrics.decode_seconds.start_timer();
        let path = resolve_library_file(&ctx_blocking.config.audio_dir, &name)?;
        let audio = decode_file(&path)?.with_gain_db(gain);
        timer.observe_duration();

        ctx_blocking.controller.start(Arc::new(audio), policy)
    })
    .await?;

    Ok(json!({ "status": "playing", "filename": filename }))
}

async fn beep(ctx: &AgentContext, req: Request<Body>) -> ApiResult {
    // ---
    let body: BeepRequest = read_json(req).await?;
    let number = required(body.number, "number")?;
    let volume = body.volume.unwrap_or(DEFAULT_VOLUME);
    debug!("beep number {} volume {}", number, volume);

    let repeat = u32::try_from(number)
        .map_err(|_| PlaybackError::InvalidPolicy(format!("invalid beep count: {number}")))?;
    let policy = PlaybackPolicy::repeat(repeat);
    policy.validate()?;
    let gain = volume_to_gain_db(volume)?;

    let ctx_blocking = ctx.clone();
    run_blocking(move || {
        let audio = ctx_blocking.config.tone.render()?.with_gain_db(gain);
        ctx_blocking.controller.start(Arc::new(audio), policy)
    })
    .await?;

    Ok(json!({ "status": "playing", "number": number }))
}

async fn tts(ctx: &AgentContext, req: Request<Body>) -> ApiResult {
    // ---
    let body: SpeakRequest = read_json(req).await?;
    let message = required(body.message, "message")?;
    let volume = body.volume.unwrap_or(DEFAULT_VOLUME);
    debug!("tts message {:?} volume {}", message, volume);

    let gain = volume_to_gain_db(volume)?;
    let ctx_blocking = ctx.clone();
    let text = message.clone();
    run_blocking(move || {
        let timer = ctx_blocking.metrics.decode_seconds.start_timer();
        let wav = ctx_blocking.synthesizer.synthesize(&text)?;
        let audio = decode_bytes(&wav, Some("wav"))?.with_gain_db(gain);
        timer.observe_duration();
        debug!(
            "tts audio: {} channels, {}Hz, {} frames",
            audio.channels(),
            audio.sample_rate(),
            audio.frame_count()
        );

        ctx_blocking
            .controller
            .start(Arc::new(audio), PlaybackPolicy::once())
    })
    .await?;

    Ok(json!({ "status": "playing", "message": message }))
}

fn info(ctx: &AgentContext, req: &Request<Body>) -> Value {
    // ---
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|e| {
            warn!("Failed to read hostname: {}", e);
            String::from("unknown")
        });
    let (ip, port) = server_name(req, ctx.config.bind);

    json!({
        "info": {
            "name": ctx.config.name,
            "host": host,
            "ip": ip,
            "port": port,
        }
    })
}

/// Address the client used to reach us: the Host header when present,
/// otherwise the bind address.
fn server_name(req: &Request<Body>, bind: SocketAddr) -> (String, u16) {
    // ---
    let from_header = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.parse::<hyper::http::uri::Authority>().ok());

    match from_header {
        Some(authority) => (
            authority.host().to_string(),
            authority.port_u16().unwrap_or(bind.port()),
        ),
        None => (bind.ip().to_string(), bind.port()),
    }
}

async fn run_blocking<F>(f: F) -> Result<(), ApiError>
where
    F: FnOnce() -> Result<(), PlaybackError> + Send + 'static,
{
    // ---
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal(format!("playback task failed: {e}")))?
        .map_err(ApiError::from)
}

/// Reads a JSON object body into `T`, refusing bodies over [`MAX_BODY_BYTES`].
async fn read_json<T: DeserializeOwned>(req: Request<Body>) -> Result<T, ApiError> {
    // ---
    let declared = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.map_or(false, |len| len > MAX_BODY_BYTES) {
        return Err(ApiError::too_large());
    }

    // Chunked bodies carry no length up front
    let bytes = hyper::body::to_bytes(req.into_body())
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    if bytes.len() as u64 > MAX_BODY_BYTES {
        return Err(ApiError::too_large());
    }
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::bad_request("Invalid content type or empty payload"));
    }

    parse_body(&bytes)
}

fn parse_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiError> {
    // ---
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| ApiError::bad_request(e.to_string()))?;
    if !value.is_object() {
        return Err(ApiError::bad_request("Invalid content type or empty payload"));
    }
    serde_json::from_value(value).map_err(|e| ApiError::bad_request(e.to_string()))
}

fn required<T>(field: Option<T>, key: &str) -> Result<T, ApiError> {
    field.ok_or_else(|| missing(key))
}

fn missing(key: &str) -> ApiError {
    ApiError::bad_request(format!("Missing '{key}'"))
}

fn route_label(method: &Method, path: &str) -> &'static str {
    // ---
    match (method, path) {
        (&Method::POST, "/play") => "/play",
        (&Method::POST, "/loop") => "/loop",
        (&Method::POST, "/beep") => "/beep",
        (&Method::POST, "/tts") => "/tts",
        (&Method::GET, "/stop") => "/stop",
        (&Method::GET, "/status") => "/status",
        (&Method::GET, "/info") => "/info",
        (&Method::OPTIONS, _) => "preflight",
        _ => "other",
    }
}

fn json_response(status: StatusCode, body: &Value) -> Response<Body> {
    // ---
    let mut resp = Response::new(Body::from(body.to_string()));
    *resp.status_mut() = status;
    let headers = resp.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    resp
}

fn preflight_response() -> Response<Body> {
    // ---
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = StatusCode::NO_CONTENT;
    let headers = resp.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    resp
}
