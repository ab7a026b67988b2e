use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, middleware, routing::get};
use medcert_cid::{CidError, CidService, MemoryCache, OmsClient};
use tokio::task::JoinHandle;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::auth::{self, BearerToken};
use crate::config::AppConfig;
use crate::handlers;
use crate::rate_limit::{self, FixedWindowLimiter};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub cid: CidService,
    pub cache: MemoryCache,
    pub limiter: Arc<FixedWindowLimiter>,
    pub bearer: Option<BearerToken>,
}

impl AppState {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, CidError> {
        let cache = MemoryCache::new(&cfg.cache);
        let client = OmsClient::new(cfg.oms.clone())?;
        let cid = CidService::new(
            Arc::new(client),
            Arc::new(cache.clone()),
            cfg.oms.clone(),
            cfg.lookup.clone(),
        );
        Ok(Self {
            cid,
            cache,
            limiter: Arc::new(FixedWindowLimiter::from_config(&cfg.rate_limit)),
            bearer: cfg.auth.bearer_token.as_deref().map(BearerToken::new),
        })
    }
}

pub fn build_app(cfg: &AppConfig) -> Result<Router, CidError> {
    let state = AppState::from_config(cfg)?;
    Ok(build_router(state, cfg.rate_limit.enabled))
}

pub fn build_router(state: AppState, rate_limited: bool) -> Router {
    let mut cid_routes = Router::new()
        .route("/search", get(handlers::search_cid))
        .route("/code/{code}", get(handlers::cid_by_code));
    if rate_limited {
        cid_routes = cid_routes.layer(middleware::from_fn_with_state(
            state.limiter.clone(),
            rate_limit::rate_limit,
        ));
    }
    if let Some(token) = state.bearer.clone() {
        cid_routes =
            cid_routes.layer(middleware::from_fn_with_state(token, auth::require_bearer));
    }

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .nest("/cid", cid_routes)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = tracing::field::Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record("http.status_code", res.status().as_u16());
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
}

pub struct MedcertServer {
    addr: SocketAddr,
    state: AppState,
    app: Router,
    sweep_interval: Option<std::time::Duration>,
}

pub struct ServerBuilder {
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    pub fn build(self) -> Result<MedcertServer, CidError> {
        let state = AppState::from_config(&self.config)?;
        let app = build_router(state.clone(), self.config.rate_limit.enabled);
        Ok(MedcertServer {
            addr: self.config.addr(),
            state,
            app,
            sweep_interval: self.config.cache.sweep_interval(),
        })
    }
}

impl MedcertServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let sweeper = self.sweep_interval.map(|every| spawn_sweeper(&self.state, every));

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        if let Some(handle) = sweeper {
            handle.abort();
        }
        Ok(())
    }
}

/// Periodically drops expired cache entries and finished rate-limit windows.
fn spawn_sweeper(state: &AppState, every: std::time::Duration) -> JoinHandle<()> {
    let cache = state.cache.clone();
    let limiter = state.limiter.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            cache.purge_expired();
            limiter.prune();
            let stats = cache.stats();
            tracing::debug!(
                entries = stats.entries,
                live_entries = stats.live_entries,
                rate_limit_clients = limiter.tracked_clients(),
                "cache sweep finished"
            );
        }
    })
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
