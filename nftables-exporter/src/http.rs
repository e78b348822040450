//! HTTP server for the Prometheus metrics endpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, watch};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::collector::SharedCollector;
use crate::config::ScrapeSettings;
use crate::exposition::{self, ExpositionFormat};

/// Errors returned to scraping clients.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Every in-flight slot is taken; the client may retry later.
    #[error("Limit of concurrent requests reached ({limit}), try again later.")]
    Rejected { limit: usize },

    /// Collection and rendering did not finish before the deadline.
    #[error("Exceeded configured timeout of {}.", humantime::format_duration(*.0))]
    Timeout(Duration),

    #[error("An error has occurred while serving metrics:\n\n{0}")]
    Failed(String),
}

impl IntoResponse for ScrapeError {
    fn into_response(self) -> Response {
        let status = match self {
            ScrapeError::Rejected { .. } | ScrapeError::Timeout(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ScrapeError::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, format!("{}\n", self)).into_response()
    }
}

/// Admission gate in front of the collector.
///
/// Scrapes are admitted without queueing up to the in-flight limit; each
/// admitted scrape runs collection and rendering on the blocking pool under
/// the configured deadline. The slot belongs to the request future, so it is
/// released as soon as that future completes or is dropped, even when the
/// collection keeps running in the background.
pub struct ScrapeGate {
    collector: SharedCollector,
    slots: Option<Arc<Semaphore>>,
    max_in_flight: usize,
    timeout: Option<Duration>,
    open_metrics: bool,
}

impl ScrapeGate {
    /// Create a gate from the resolved scrape settings.
    pub fn new(collector: SharedCollector, settings: &ScrapeSettings) -> Self {
        Self {
            collector,
            slots: settings.max_in_flight.map(|n| Arc::new(Semaphore::new(n))),
            max_in_flight: settings.max_in_flight.unwrap_or(0),
            timeout: settings.timeout,
            open_metrics: settings.open_metrics,
        }
    }

    /// Number of free in-flight slots, `None` when unlimited.
    pub fn available_slots(&self) -> Option<usize> {
        self.slots.as_ref().map(|slots| slots.available_permits())
    }

    /// Pick the response format for a request's `Accept` header.
    pub fn negotiate(&self, accept: Option<&str>) -> ExpositionFormat {
        ExpositionFormat::negotiate(accept, self.open_metrics)
    }

    /// Collect and render the current counters.
    pub async fn scrape(&self, format: ExpositionFormat) -> Result<String, ScrapeError> {
        let _permit = match &self.slots {
            Some(slots) => match slots.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    warn!(
                        limit = self.max_in_flight,
                        "Rejecting scrape, too many requests in flight"
                    );
                    return Err(ScrapeError::Rejected {
                        limit: self.max_in_flight,
                    });
                }
            },
            None => None,
        };

        let collector = self.collector.clone();
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        let work = tokio::task::spawn_blocking(move || {
            let samples = collector.collect_until(deadline);
            exposition::render(&collector.describe(), samples, format)
        });

        let joined = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, work).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(timeout = ?timeout, "Scrape exceeded its deadline");
                    return Err(ScrapeError::Timeout(timeout));
                }
            },
            None => work.await,
        };

        match joined {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(e)) => {
                error!(error = %e, "Failed to render metrics");
                Err(ScrapeError::Failed(format!("failed to render metrics: {}", e)))
            }
            Err(e) => {
                error!(error = %e, "Collection task failed");
                Err(ScrapeError::Failed(e.to_string()))
            }
        }
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    gate: Arc<ScrapeGate>,
}

/// Create the HTTP router.
fn create_router(gate: Arc<ScrapeGate>) -> Router {
    let state = AppState { gate };

    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handler for the /metrics endpoint.
async fn metrics_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let accept = headers.get(ACCEPT).and_then(|value| value.to_str().ok());
    let format = state.gate.negotiate(accept);

    match state.gate.scrape(format).await {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, format.content_type())],
            body,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Host of the host-less `:port` listen form.
const ANY_IPV6: &str = "[::]";

/// HTTP server configuration.
pub struct HttpServer {
    gate: Arc<ScrapeGate>,
    listen_addr: String,
}

impl HttpServer {
    /// Create a new HTTP server for a `host:port` listen address.
    pub fn new(gate: Arc<ScrapeGate>, listen_addr: impl Into<String>) -> Self {
        Self {
            gate,
            listen_addr: listen_addr.into(),
        }
    }

    /// Resolve and bind the listen address.
    ///
    /// Host names are resolved and the first address that binds is used.
    /// The every-interface address falls back to IPv4 on hosts without IPv6.
    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        let addr = self.listen_addr.as_str();

        match TcpListener::bind(addr).await {
            Ok(listener) => Ok(listener),
            Err(e) if addr.starts_with(ANY_IPV6) => {
                let fallback = addr.replacen(ANY_IPV6, "0.0.0.0", 1);
                warn!(error = %e, addr = %fallback, "IPv6 unavailable, listening on IPv4 only");
                TcpListener::bind(fallback.as_str())
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", fallback, e))
            }
            Err(e) => Err(anyhow::anyhow!("Failed to bind to {}: {}", addr, e)),
        }
    }

    /// Bind the listen address and serve until the shutdown signal is received.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until the shutdown signal is received.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        let router = create_router(self.gate);

        info!(addr = %addr, path = "/metrics", "HTTP server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
