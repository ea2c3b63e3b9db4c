use std::sync::Arc;

use anyhow::Context;
use axum::Json;
use axum::Router;
use axum::error_handling::HandleErrorLayer;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::MethodRouter;
use axum::routing::get;
use quota_limit::Bucket;
use quota_limit::FixedWindow;
use quota_limit::LimitError;
use quota_limit::MemoryStore;
use quota_limit::RemoteStore;
use quota_limit::Strategy;
use quota_limit::TokenBucket;
use quota_limit::Window;
use redis::aio::ConnectionManager;
use serde::Serialize;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_quota::HeaderKey;
use tower_quota::Identify;
use tower_quota::PeerIp;
use tower_quota::QuotaError;
use tower_quota::RateLimitLayer;
use tracing::info;
use tracing::warn;

use crate::config::Backend;
use crate::config::RedisSettings;
use crate::config::Settings;

/// The limiters guarding the routes, one per algorithm.
#[derive(Debug, Clone)]
pub struct Limiters {
    pub fixed_window: Arc<dyn Strategy>,
    pub token_bucket: Arc<dyn Strategy>,
}

impl Limiters {
    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        match settings.store {
            Backend::Memory => Ok(Self::in_memory(settings)?),
            Backend::Redis => Self::redis(settings).await,
        }
    }

    pub fn in_memory(settings: &Settings) -> Result<Self, LimitError> {
        let limits = &settings.rate_limiter;
        info!("keeping limiter state in memory");
        Ok(Self {
            fixed_window: Arc::new(FixedWindow::new(
                Arc::new(MemoryStore::<Window>::new()),
                limits.fixed_window.clone(),
            )?),
            token_bucket: Arc::new(TokenBucket::new(
                Arc::new(MemoryStore::<Bucket>::new()),
                limits.token_bucket.clone(),
            )?),
        })
    }

    /// Each algorithm gets its own connection, to its own database.
    pub async fn redis(settings: &Settings) -> anyhow::Result<Self> {
        let redis = &settings.redis;
        let limits = &settings.rate_limiter;

        let mut windows = RemoteStore::fixed_window(connect(redis, redis.fixed_window_db).await?)
            .with_namespace("fw:");
        let mut buckets = RemoteStore::token_bucket(
            connect(redis, redis.token_bucket_db).await?,
            &limits.token_bucket,
        )
        .with_namespace("tb:");
        if let Some(timeout) = redis.timeout() {
            windows = windows.with_timeout(timeout);
            buckets = buckets.with_timeout(timeout);
        }

        Ok(Self {
            fixed_window: Arc::new(FixedWindow::new(
                Arc::new(windows),
                limits.fixed_window.clone(),
            )?),
            token_bucket: Arc::new(TokenBucket::new(
                Arc::new(buckets),
                limits.token_bucket.clone(),
            )?),
        })
    }
}

async fn connect(redis: &RedisSettings, db: i64) -> anyhow::Result<ConnectionManager> {
    let client = redis::Client::open(redis.connection_info(db))?;
    let conn = ConnectionManager::new(client).await.with_context(|| {
        format!(
            "failed to connect to redis at {}:{} (db {db})",
            redis.host, redis.port
        )
    })?;
    info!(host = %redis.host, port = redis.port, db, "connected to redis");
    Ok(conn)
}

/// Builds the ping routes, each guarded by one limiter and one way of
/// identifying the caller.
pub fn router(limiters: &Limiters) -> Router {
    Router::new()
        .route(
            "/fw/apikey/ping",
            guarded(&limiters.fixed_window, HeaderKey::api_key()),
        )
        .route("/fw/ipaddress/ping", guarded(&limiters.fixed_window, PeerIp))
        .route(
            "/tb/apikey/ping",
            guarded(&limiters.token_bucket, HeaderKey::api_key()),
        )
        .route("/tb/ipaddress/ping", guarded(&limiters.token_bucket, PeerIp))
}

fn guarded<K>(limiter: &Arc<dyn Strategy>, identify: K) -> MethodRouter
where
    K: Identify<Request>,
{
    get(ping).route_layer(
        ServiceBuilder::new()
            // Outermost: turns the BoxError back into a response
            .layer(HandleErrorLayer::new(handle_error))
            .layer(RateLimitLayer::new(Arc::clone(limiter), identify))
            // The route is Infallible; the limiter wants BoxError
            .map_err(BoxError::from),
    )
}

#[derive(Debug, Serialize)]
struct Pong {
    message: &'static str,
}

async fn ping() -> Json<Pong> {
    Json(Pong { message: "pong" })
}

async fn handle_error(err: BoxError) -> Response {
    match err.downcast_ref::<QuotaError>() {
        Some(quota_err) => quota_err.clone().into_response(),
        None => {
            warn!(%err, "unhandled service error");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response()
        }
    }
}
