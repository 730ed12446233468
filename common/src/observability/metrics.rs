//! Prometheus metrics (Rust `prometheus` crate).
//!
//! One `MetricsContext` is intended per process. The playback controller and
//! the HTTP layer each receive a clone; all handles share one registry.

use anyhow::Result;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Configuration for the built-in Prometheus scrape endpoint.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    // ---
    /// Address to bind, e.g. `127.0.0.1:9300`.
    pub bind: SocketAddr,
}

impl MetricsServerConfig {
    // ---
    pub fn new(bind: SocketAddr) -> Self {
        // ---
        Self { bind }
    }
}

/// Prometheus metrics registry + handles.
#[derive(Clone)]
pub struct MetricsContext {
    // ---
    registry: Registry,

    // Session lifecycle
    pub sessions_started_total: IntCounter,
    pub sessions_preempted_total: IntCounter,
    pub sessions_completed_total: IntCounter,
    pub sessions_stopped_total: IntCounter,
    pub watchdog_fired_total: IntCounter,
    pub device_failures_total: IntCounter,
    pub playback_loops_total: IntCounter,
    pub session_active: IntGauge,

    // Request layer, labelled by route
    pub requests_total: IntCounterVec,
    pub request_errors_total: IntCounterVec,

    // Latency histograms (seconds)
    pub decode_seconds: Histogram,
    pub session_duration_seconds: Histogram,
}

impl MetricsContext {
    // ---
    /// Create a new registry and register the standard metrics.
    ///
    /// `process_name` is applied as a constant label (`process=<name>`).
    pub fn new(process_name: &str) -> Result<Self> {
        // ---
        let registry = Registry::new_custom(
            Some("chime".into()),
            Some(prometheus::labels! { "process".to_string() => process_name.to_string() }),
        )?;

        let sessions_started_total = IntCounter::with_opts(Opts::new(
            "sessions_started_total",
            "Playback sessions launched",
        ))?;
        let sessions_preempted_total = IntCounter::with_opts(Opts::new(
            "sessions_preempted_total",
            "Running sessions torn down by a newer start request",
        ))?;
        let sessions_completed_total = IntCounter::with_opts(Opts::new(
            "sessions_completed_total",
            "Sessions that ended because their repeat policy was satisfied",
        ))?;
        let sessions_stopped_total = IntCounter::with_opts(Opts::new(
            "sessions_stopped_total",
            "Sessions that ended on a stop signal",
        ))?;
        let watchdog_fired_total = IntCounter::with_opts(Opts::new(
            "watchdog_fired_total",
            "Sessions cut short by the maximum duration watchdog",
        ))?;
        let device_failures_total = IntCounter::with_opts(Opts::new(
            "device_failures_total",
            "Output device submissions that failed or died mid-playback",
        ))?;
        let playback_loops_total = IntCounter::with_opts(Opts::new(
            "playback_loops_total",
            "Full or interrupted plays of a session buffer",
        ))?;
        let session_active = IntGauge::with_opts(Opts::new(
            "session_active",
            "1 while a playback worker is running",
        ))?;

        let requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP requests received"),
            &["route"],
        )?;
        let request_errors_total = IntCounterVec::new(
            Opts::new("http_request_errors_total", "HTTP requests answered with an error"),
            &["route"],
        )?;

        let decode_seconds = Histogram::with_opts(HistogramOpts::new(
            "decode_seconds",
            "Time spent producing PCM for a request (seconds)",
        ))?;
        let session_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "session_duration_seconds",
                "Wall-clock lifetime of playback sessions (seconds)",
            )
            .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 600.0]),
        )?;

        registry.register(Box::new(sessions_started_total.clone()))?;
        registry.register(Box::new(sessions_preempted_total.clone()))?;
        registry.register(Box::new(sessions_completed_total.clone()))?;
        registry.register(Box::new(sessions_stopped_total.clone()))?;
        registry.register(Box::new(watchdog_fired_total.clone()))?;
        registry.register(Box::new(device_failures_total.clone()))?;
        registry.register(Box::new(playback_loops_total.clone()))?;
        registry.register(Box::new(session_active.clone()))?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_errors_total.clone()))?;
        registry.register(Box::new(decode_seconds.clone()))?;
        registry.register(Box::new(session_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            sessions_started_total,
            sessions_preempted_total,
            sessions_completed_total,
            sessions_stopped_total,
            watchdog_fired_total,
            device_failures_total,
            playback_loops_total,
            session_active,
            requests_total,
            request_errors_total,
            decode_seconds,
            session_duration_seconds,
        })
    }

    /// Gather metric families from this registry.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        // ---
        self.registry.gather()
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn render(&self) -> Result<Vec<u8>> {
        // ---
        encode_registry(&self.registry)
    }

    /// Spawns a minimal HTTP server that serves `GET /metrics`.
    ///
    /// Callers decide whether to run it; the agent only does when a bind
    /// address is configured.
    pub fn spawn_metrics_server(&self, cfg: MetricsServerConfig) -> JoinHandle<Result<()>> {
        // ---
        let registry = Arc::new(self.registry.clone());
        tokio::spawn(async move {
            // ---
            let make_svc = make_service_fn(move |_conn| {
                let registry = Arc::clone(&registry);
                async move {
                    Ok::<_, hyper::Error>(service_fn(move |req| {
                        let registry = Arc::clone(&registry);
                        async move { handle_metrics_request(req, registry).await }
                    }))
                }
            });

            tracing::info!("Metrics endpoint listening on http://{}/metrics", cfg.bind);
            Server::try_bind(&cfg.bind)?
                .serve(make_svc)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            Ok(())
        })
    }
}

fn encode_registry(registry: &Registry) -> Result<Vec<u8>> {
    // ---
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(buffer)
}

async fn handle_metrics_request(
    req: Request<Body>,
    registry: Arc<Registry>,
) -> Result<Response<Body>, hyper::Error> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => match encode_registry(&registry) {
            Ok(buffer) => {
                let mut resp = Response::new(Body::from(buffer));
                resp.headers_mut().insert(
                    hyper::header::CONTENT_TYPE,
                    hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                Ok(resp)
            }
            Err(e) => {
                let mut resp = Response::new(Body::from(format!("encode error: {e}")));
                *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                Ok(resp)
            }
        },
        _ => {
            let mut resp = Response::new(Body::from("not found"));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            Ok(resp)
        }
    }
}
