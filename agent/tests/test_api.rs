//! Integration tests for the HTTP request layer.
//!
//! Requests go straight into `handle_request` with a fake output device and
//! a canned speech synthesizer, so no sockets or audio hardware are needed.

mod common;

use std::fs;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent::{
    handle_request, AgentConfig, AgentContext, ControllerConfig, PlaybackController,
    PlaybackError, SpeechSynthesizer, ToneSpec, MAX_BODY_BYTES,
};
use chime_common::MetricsContext;
use common::{wait_until, FakeDevice};
use hound::{SampleFormat, WavSpec, WavWriter};
use hyper::{Body, Method, Request, StatusCode};
use serde_json::{json, Value};

/// Speaks everything as a fixed-length WAV of silence.
struct CannedSpeech {
    millis: u32,
}

impl SpeechSynthesizer for CannedSpeech {
    fn synthesize(&self, text: &str) -> Result<Vec<u8>, PlaybackError> {
        // ---
        if text.is_empty() {
            return Err(PlaybackError::Synthesis("message is empty".into()));
        }
        Ok(wav_bytes(16000, self.millis))
    }
}

fn wav_bytes(sample_rate: u32, millis: u32) -> Vec<u8> {
    // ---
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).expect("writer");
        for _ in 0..(sample_rate * millis / 1000) {
            writer.write_sample(0i16).expect("write");
        }
        writer.finalize().expect("finalize");
    }
    cursor.into_inner()
}

struct Harness {
    ctx: AgentContext,
    device: FakeDevice,
    audio_dir: PathBuf,
}

impl Harness {
    fn new(name: &str) -> Self {
        // ---
        let audio_dir =
            std::env::temp_dir().join(format!("chime-api-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&audio_dir);
        fs::create_dir_all(&audio_dir).expect("audio dir");
        fs::write(audio_dir.join("ding.wav"), wav_bytes(8000, 300)).expect("fixture");
        fs::write(audio_dir.join("broken.ogg"), b"not really ogg").expect("fixture");

        let device = FakeDevice::new();
        let config = AgentConfig {
            audio_dir: audio_dir.clone(),
            name: "hallway".into(),
            tone: ToneSpec {
                tone_ms: 40,
                gap_ms: 20,
                ..ToneSpec::default()
            },
            controller: ControllerConfig {
                max_duration: Duration::from_secs(60),
                poll_interval: Duration::from_millis(5),
            },
            ..AgentConfig::default()
        };
        let metrics = MetricsContext::new("test").expect("metrics");
        let controller = PlaybackController::new(Arc::new(device.clone()), config.controller)
            .with_metrics(metrics.clone());

        let ctx = AgentContext {
            controller: Arc::new(controller),
            synthesizer: Arc::new(CannedSpeech { millis: 200 }),
            config: Arc::new(config),
            metrics,
        };

        Self {
            ctx,
            device,
            audio_dir,
        }
    }

    async fn send(&self, method: Method, path: &str, body: &str) -> (StatusCode, Value) {
        // ---
        let req = Request::builder()
            .method(method)
            .uri(path)
            .header("host", "doorbell.local:5000")
            .body(Body::from(body.to_string()))
            .expect("request");
        let resp = handle_request(req, self.ctx.clone()).await.expect("response");

        assert_eq!(
            resp.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
        let status = resp.status();
        let bytes = hyper::body::to_bytes(resp.into_body()).await.expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.ctx.controller.stop();
        let _ = fs::remove_dir_all(&self.audio_dir);
    }
}

#[tokio::test]
async fn test_play_library_file() {
    // ---
    let h = Harness::new("play");

    let (status, body) = h
        .send(Method::POST, "/play", r#"{"filename": "ding.wav", "volume": 80}"#)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "playing", "filename": "ding.wav" }));

    let (_, body) = h.send(Method::GET, "/status", "").await;
    assert_eq!(body, json!({ "status": "running" }));

    assert!(wait_until(Duration::from_secs(2), || !h.ctx.controller.status()));
    assert_eq!(h.device.submits(), 1);

    let (_, body) = h.send(Method::GET, "/status", "").await;
    assert_eq!(body, json!({ "status": "stopped" }));
}

#[tokio::test]
async fn test_loop_runs_until_stopped() {
    // ---
    let h = Harness::new("loop");

    let (status, _) = h.send(Method::POST, "/loop", r#"{"filename": "ding.wav"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert!(wait_until(Duration::from_secs(3), || h.device.submits() >= 2));
    assert!(h.ctx.controller.status());

    let (status, body) = h.send(Method::GET, "/stop", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "stopped" }));
    assert!(!h.ctx.controller.status());
}

#[tokio::test]
async fn test_beep_repeats_number_times() {
    // ---
    let h = Harness::new("beep");

    let (status, body) = h.send(Method::POST, "/beep", r#"{"number": 3}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "playing", "number": 3 }));

    assert!(wait_until(Duration::from_secs(2), || !h.ctx.controller.status()));
    assert_eq!(h.device.submits(), 3);
}

#[tokio::test]
async fn test_beep_rejects_bad_counts() {
    // ---
    let h = Harness::new("beep-bad");

    let (status, body) = h.send(Method::POST, "/beep", r#"{"volume": 50}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Missing 'number'" }));

    for count in ["0", "-2"] {
        let (status, _) = h
            .send(Method::POST, "/beep", &format!(r#"{{"number": {count}}}"#))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
    assert_eq!(h.device.submits(), 0);
}

#[tokio::test]
async fn test_tts_plays_synthesized_speech() {
    // ---
    let h = Harness::new("tts");

    let (status, body) = h
        .send(Method::POST, "/tts", r#"{"message": "Someone is at the door"}"#)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "status": "playing", "message": "Someone is at the door" })
    );

    assert!(wait_until(Duration::from_secs(2), || !h.ctx.controller.status()));
    assert_eq!(h.device.submits(), 1);
}

#[tokio::test]
async fn test_request_validation_errors() {
    // ---
    let h = Harness::new("errors");

    let cases = [
        ("/play", "", "Invalid content type or empty payload"),
        ("/play", "[1, 2]", "Invalid content type or empty payload"),
        ("/play", r#"{"volume": 10}"#, "Missing 'filename'"),
        ("/tts", r#"{"volume": 10}"#, "Missing 'message'"),
        ("/play", r#"{"filename": "../secret.wav"}"#, "Illegal filename"),
        ("/play", r#"{"filename": "ding.flac"}"#, "Unsupported file extension"),
        ("/loop", r#"{"filename": "nope.mp3"}"#, "File not found"),
    ];
    for (path, body, expected) in cases {
        let (status, value) = h.send(Method::POST, path, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{path} {body}");
        assert_eq!(value, json!({ "error": expected }), "{path} {body}");
    }

    let (status, value) = h.send(Method::POST, "/play", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(value["error"].is_string());

    let (status, value) = h
        .send(Method::POST, "/play", r#"{"filename": "broken.ogg"}"#)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(value["error"]
        .as_str()
        .unwrap()
        .starts_with("Error decoding audio"));

    let (status, _) = h
        .send(Method::POST, "/play", r#"{"filename": "ding.wav", "volume": 500}"#)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, value) = h
        .send(Method::POST, "/play", r#"{"filename": "ding.wav", "volume": "loud"}"#)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(value["error"].is_string());

    assert_eq!(h.device.submits(), 0);
    assert!(!h.ctx.controller.status());
}

#[tokio::test]
async fn test_oversized_body_is_refused() {
    // ---
    let h = Harness::new("oversized");

    let message = "a".repeat(MAX_BODY_BYTES as usize);
    let body = json!({ "message": message }).to_string();
    let (status, value) = h.send(Method::POST, "/tts", &body).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(value["error"].is_string());

    assert_eq!(h.device.submits(), 0);
    assert!(!h.ctx.controller.status());
}

#[tokio::test]
async fn test_new_request_preempts_current_one() {
    // ---
    let h = Harness::new("preempt");

    h.send(Method::POST, "/loop", r#"{"filename": "ding.wav"}"#).await;
    assert!(wait_until(Duration::from_secs(1), || h.device.submits() == 1));

    h.send(Method::POST, "/tts", r#"{"message": "Package delivered"}"#)
        .await;
    assert!(wait_until(Duration::from_secs(2), || !h.ctx.controller.status()));

    assert_eq!(h.device.submits(), 2);
    assert_eq!(h.device.max_active(), 1);
}

#[tokio::test]
async fn test_info_and_routing() {
    // ---
    let h = Harness::new("info");

    let (status, body) = h.send(Method::GET, "/info", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["info"]["name"], "hallway");
    assert_eq!(body["info"]["ip"], "doorbell.local");
    assert_eq!(body["info"]["port"], 5000);
    assert!(body["info"]["host"].is_string());

    let (status, _) = h.send(Method::GET, "/play", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = h.send(Method::OPTIONS, "/play", "").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let rendered = String::from_utf8(h.ctx.metrics.render().expect("render")).expect("utf8");
    assert!(rendered.contains("chime_http_requests_total"));
}
