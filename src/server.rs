//! HTTP trigger for archive runs

use crate::app::AppContext;
use crate::constants::get_archive_types;
use crate::error::{ArchiveError, Result};
use crate::pipeline::schema::{available_schemas, get_schema};
use crate::pipeline::sql::validate_identifier;
use axum::{
    body::Bytes,
    extract::Query,
    http::{header::CONTENT_TYPE, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Extension, Router,
};
use chrono::Utc;
use hyper::Server;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct KeyQuery {
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerBody {
    pub table_id: Option<String>,
    pub schema_type: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "telemetry-archiver",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn failure(status: StatusCode, error: impl std::fmt::Display) -> Response {
    (status, Json(json!({ "success": false, "error": error.to_string() }))).into_response()
}

fn status_for(err: &ArchiveError) -> StatusCode {
    match err {
        ArchiveError::InvalidIdentifier(_) | ArchiveError::UnknownSchema(_) => StatusCode::BAD_REQUEST,
        ArchiveError::RunInProgress(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Compare digests so the check does not short-circuit on the key bytes
fn keys_match(expected: &str, provided: &str) -> bool {
    Sha256::digest(expected.as_bytes()) == Sha256::digest(provided.as_bytes())
}

fn authorize(ctx: &AppContext, provided: Option<&str>) -> std::result::Result<(), Response> {
    let Some(expected) = ctx.config().server.api_key.as_deref() else {
        return Err(failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Archive API key is not configured on the server",
        ));
    };
    match provided {
        Some(key) if keys_match(expected, key) => Ok(()),
        _ => Err(failure(StatusCode::UNAUTHORIZED, "Invalid or missing apiKey")),
    }
}

/// An empty body means "use the configured policy"; anything else must be JSON
fn parse_trigger_body(headers: &HeaderMap, body: &Bytes) -> std::result::Result<TriggerBody, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(TriggerBody::default());
    }
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ct.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false);
    if !is_json {
        return Err("Request body must be sent as application/json".to_string());
    }
    serde_json::from_slice(body).map_err(|e| format!("Invalid request body: {}", e))
}

async fn archive_info(
    Extension(ctx): Extension<Arc<AppContext>>,
    Query(query): Query<KeyQuery>,
) -> Response {
    if ctx.config().server.require_key_for_info {
        if let Err(resp) = authorize(&ctx, query.api_key.as_deref()) {
            return resp;
        }
    }
    Json(json!({
        "status": "ready",
        "availableSchemas": available_schemas(),
        "archiveTypes": get_archive_types(),
    }))
    .into_response()
}

async fn trigger_archive(
    Extension(ctx): Extension<Arc<AppContext>>,
    Query(query): Query<KeyQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(resp) = authorize(&ctx, query.api_key.as_deref()) {
        return resp;
    }
    let body = match parse_trigger_body(&headers, &body) {
        Ok(body) => body,
        Err(msg) => return failure(StatusCode::BAD_REQUEST, msg),
    };

    match run_triggered(&ctx, body).await {
        Ok(resp) => resp,
        Err(e) => {
            warn!("Triggered archive run failed: {}", e);
            failure(status_for(&e), e)
        }
    }
}

async fn run_triggered(ctx: &AppContext, body: TriggerBody) -> Result<Response> {
    let policy = ctx.policy();
    let table = body.table_id.unwrap_or(policy.table.clone());
    let schema = body.schema_type.unwrap_or(policy.schema.clone());
    validate_identifier(&table)?;
    get_schema(&schema)?;

    let archiver = ctx.archiver().await?;
    let mut request = policy.request_at(Utc::now()).schema(&schema).dry_run(body.dry_run);
    request.table = table;
    info!(
        "Archive triggered over HTTP: table={} schema={} dry_run={}",
        request.table, request.schema, request.dry_run
    );

    let report = archiver.run(&request, &CancellationToken::new()).await?;
    Ok(Json(json!({
        "success": true,
        "message": report.message(),
        "result": {
            "archived": report.archived,
            "deleted": report.deleted,
        },
        "report": report,
    }))
    .into_response())
}

pub fn create_router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/archive", get(archive_info).post(trigger_archive))
        .layer(Extension(ctx))
        .layer(cors)
}

/// Serve the trigger until `shutdown` fires
pub async fn start_server(ctx: Arc<AppContext>, shutdown: CancellationToken) -> Result<()> {
    let bind = ctx.config().server.bind.clone();
    let addr: SocketAddr = bind
        .parse()
        .map_err(|e| ArchiveError::Config(format!("Invalid server.bind '{}': {}", bind, e)))?;
    let app = create_router(ctx);

    info!("🚀 Archive trigger listening on http://{}", addr);
    info!("💚 Health check: http://{}/health", addr);
    Server::try_bind(&addr)
        .map_err(|e| ArchiveError::Config(format!("Cannot bind {}: {}", addr, e)))?
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| ArchiveError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
    Ok(())
}
