use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, SecondsFormat, Utc};
use civitas_core::normalize_address;
use serde::{Deserialize, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::{net::SocketAddr, str::FromStr};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::db;

const SERVICE_NAME: &str = "Civitas Backend API";
const SERVICE_DESCRIPTION: &str = "Blockchain-based welfare identity and delivery platform";

#[derive(Clone)]
struct AppState {
    db: SqlitePool,
}

/// Runtime configuration for the Civitas API server.
#[derive(Debug, Clone)]
pub struct ApiRuntimeConfig {
    database_url: String,
    port: u16,
    max_connections: u32,
    run_migrations: bool,
}

impl ApiRuntimeConfig {
    /// Build runtime configuration from environment variables.
    ///
    /// - `DATABASE_URL` (default `sqlite://civitas.db`)
    /// - `PORT` (default 4000)
    /// - `DATABASE_MAX_CONNECTIONS` (default 5)
    /// - `CIVITAS_API_MIGRATE` (default true)
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://civitas.db".to_string());

        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT '{}'", raw))?,
            Err(_) => 4000,
        };

        let max_connections = match std::env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid DATABASE_MAX_CONNECTIONS '{}'", raw))?,
            Err(_) => 5,
        };
        anyhow::ensure!(max_connections > 0, "DATABASE_MAX_CONNECTIONS must be > 0");

        let run_migrations = std::env::var("CIVITAS_API_MIGRATE")
            .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        Ok(Self {
            database_url,
            port,
            max_connections,
            run_migrations,
        })
    }

    /// Build test configuration against `database_url` with migrations enabled.
    pub fn for_test(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            port: 0,
            max_connections: 1,
            run_migrations: true,
        }
    }
}

async fn build_state(config: &ApiRuntimeConfig) -> anyhow::Result<AppState> {
    let connect_options =
        SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
    let db = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(connect_options)
        .await
        .with_context(|| format!("Failed to connect to database: {}", config.database_url))?;

    if config.run_migrations {
        db::MIGRATOR
            .run(&db)
            .await
            .context("Failed to run migrations")?;
    }

    Ok(AppState { db })
}

fn router_for_state(state: AppState) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health))
        .route("/benefits/:address", get(get_benefits_by_recipient))
        .route(
            "/transactions/vendor/:address",
            get(get_vendor_transactions),
        )
        .route("/api/users", post(post_user))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Build an in-process API router from explicit runtime config.
pub async fn build_app(config: &ApiRuntimeConfig) -> anyhow::Result<Router> {
    let state = build_state(config).await?;
    Ok(router_for_state(state))
}

/// Run the API server with explicit runtime configuration.
pub async fn run_with_config(config: ApiRuntimeConfig) -> anyhow::Result<()> {
    let state = build_state(&config).await?;
    let db_for_shutdown = state.db.clone();
    let app = router_for_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Civitas API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    db_for_shutdown.close().await;
    info!("Civitas API server shutdown complete");
    Ok(())
}

/// Run the API server using environment-driven configuration.
pub async fn run_from_env() -> anyhow::Result<()> {
    run_with_config(ApiRuntimeConfig::from_env()?).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!("Failed to install SIGTERM handler: {}", err);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(msg: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse { error: msg.into() }),
    )
}

fn internal_error(err: anyhow::Error) -> ApiError {
    error!("Store query failed: {:#}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: format!("{:#}", err),
        }),
    )
}

/// `None` when chrono cannot represent the instant (far-future expirations).
fn rfc3339(unix_secs: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(unix_secs, 0)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceEndpoints {
    benefits: &'static str,
    vendor_transactions: &'static str,
    users: &'static str,
}

#[derive(Serialize)]
struct ServiceInfo {
    service: &'static str,
    status: &'static str,
    timestamp: String,
    description: &'static str,
    endpoints: ServiceEndpoints,
}

async fn service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: SERVICE_NAME,
        status: "ok",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        description: SERVICE_DESCRIPTION,
        endpoints: ServiceEndpoints {
            benefits: "/benefits/:address",
            vendor_transactions: "/transactions/vendor/:address",
            users: "/api/users",
        },
    })
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BenefitResponse {
    benefit_id: String,
    recipient_address: String,
    value: String,
    status: String,
    issued_at: Option<String>,
    /// `null` when the expiration lies beyond what RFC 3339 can express.
    expires_at: Option<String>,
    issued_by_address: String,
    redeemed_at: Option<String>,
    redeemed_by_address: Option<String>,
}

impl From<db::DbBenefit> for BenefitResponse {
    fn from(row: db::DbBenefit) -> Self {
        Self {
            benefit_id: row.benefit_id,
            recipient_address: row.recipient_address,
            value: row.value,
            status: row.status,
            issued_at: rfc3339(row.issued_at),
            expires_at: rfc3339(row.expires_at),
            issued_by_address: row.issued_by_address,
            redeemed_at: row.redeemed_at.and_then(rfc3339),
            redeemed_by_address: row.redeemed_by_address,
        }
    }
}

async fn get_benefits_by_recipient(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<Vec<BenefitResponse>>, ApiError> {
    let rows = db::get_benefits_by_recipient(&state.db, &normalize_address(&address))
        .await
        .map_err(internal_error)?;

    Ok(Json(rows.into_iter().map(BenefitResponse::from).collect()))
}

async fn get_vendor_transactions(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<Vec<BenefitResponse>>, ApiError> {
    let rows = db::get_benefits_by_vendor(&state.db, &normalize_address(&address))
        .await
        .map_err(internal_error)?;

    Ok(Json(rows.into_iter().map(BenefitResponse::from).collect()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRequest {
    wallet_address: Option<String>,
    role: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserResponse {
    wallet_address: String,
    role: String,
    name: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl From<db::DbUser> for UserResponse {
    fn from(row: db::DbUser) -> Self {
        Self {
            wallet_address: row.wallet_address,
            role: row.role,
            name: row.name,
            created_at: rfc3339(row.created_at),
            updated_at: rfc3339(row.updated_at),
        }
    }
}

fn required(field: Option<String>) -> Option<String> {
    field
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn post_user(
    State(state): State<AppState>,
    payload: Result<Json<UserRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!("Rejected user payload: {}", rejection.body_text());
        bad_request(format!("Invalid request body: {}", rejection.body_text()))
    })?;

    let (Some(wallet_address), Some(role)) =
        (required(request.wallet_address), required(request.role))
    else {
        return Err(bad_request("walletAddress and role are required"));
    };

    let user = db::upsert_user(&state.db, &wallet_address, &role, request.name.as_deref())
        .await
        .map_err(internal_error)?;

    Ok(Json(user.into()))
}
