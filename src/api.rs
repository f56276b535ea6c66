//! HTTP API — alias/domain/email CRUD, the ingestion endpoint, and the
//! embedded admin page.
//!
//! Every JSON response uses the `{success, data?, error?}` envelope. CORS is
//! wide open: the admin page is the only intended consumer, but the API is
//! deliberately scriptable.

use std::sync::{Arc, LazyLock};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::error::{DatabaseError, IngestError};
use crate::pipeline::types::headers_from_raw;
use crate::pipeline::{Delivery, InboundEmail, handle_inbound};
use crate::store::Database;

/// Valid alias local part: starts alphanumeric, then alphanumerics and
/// `. _ -`.
static ALIAS_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._-]*$").unwrap());

/// Valid domain: dot-separated labels, lowercase letters/digits/hyphens.
static DOMAIN_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)+$").unwrap());

/// Shared state for all API routes.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<dyn Database>,
    /// Domain used when an alias is created without an explicit one.
    pub default_domain: String,
}

// ── Response envelope ───────────────────────────────────────────────

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn success<T: Serialize>(data: T) -> Response {
    Json(Envelope {
        success: true,
        data: Some(data),
        error: None,
    })
    .into_response()
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(Envelope::<()> {
            success: false,
            data: None,
            error: Some(message.into()),
        }),
    )
        .into_response()
}

/// Map a database error onto an API response.
fn db_failure(e: DatabaseError) -> Response {
    match e {
        DatabaseError::Conflict(_) => failure(StatusCode::CONFLICT, "Already exists"),
        DatabaseError::NotFound { entity, .. } => {
            failure(StatusCode::NOT_FOUND, format!("{entity} not found"))
        }
        e => {
            error!("API database error: {e}");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

// ── Aliases ─────────────────────────────────────────────────────────

async fn list_aliases(State(state): State<ApiState>) -> Response {
    match state.db.list_aliases().await {
        Ok(aliases) => success(aliases),
        Err(e) => db_failure(e),
    }
}

#[derive(Deserialize)]
struct CreateAliasRequest {
    alias: String,
    domain: Option<String>,
    description: Option<String>,
}

async fn create_alias(
    State(state): State<ApiState>,
    Json(req): Json<CreateAliasRequest>,
) -> Response {
    if req.alias.is_empty() {
        return failure(StatusCode::BAD_REQUEST, "Alias is required");
    }
    if !ALIAS_FORMAT.is_match(&req.alias) {
        return failure(
            StatusCode::BAD_REQUEST,
            "Invalid alias format. Use letters, numbers, dots, underscores, or hyphens.",
        );
    }

    let domain = req
        .domain
        .as_deref()
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| state.default_domain.clone());

    match state
        .db
        .create_alias(&req.alias, &domain, req.description.as_deref())
        .await
    {
        Ok(alias) => success(alias),
        Err(DatabaseError::Conflict(_)) => failure(StatusCode::CONFLICT, "Alias already exists"),
        Err(e) => db_failure(e),
    }
}

async fn alias_emails(State(state): State<ApiState>, Path(id): Path<i64>) -> Response {
    match state.db.emails_for_alias(id, 50).await {
        Ok(emails) => success(emails),
        Err(e) => db_failure(e),
    }
}

#[derive(Serialize)]
struct LatestCode {
    code: Option<String>,
}

async fn alias_latest_code(State(state): State<ApiState>, Path(id): Path<i64>) -> Response {
    match state.db.latest_code(id).await {
        Ok(code) => success(LatestCode { code }),
        Err(e) => db_failure(e),
    }
}

#[derive(Deserialize)]
struct ToggleRequest {
    is_active: bool,
}

async fn toggle_alias(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(req): Json<ToggleRequest>,
) -> Response {
    match state.db.toggle_alias(id, req.is_active).await {
        Ok(()) => success(serde_json::json!({ "updated": true })),
        Err(e) => db_failure(e),
    }
}

async fn delete_alias(State(state): State<ApiState>, Path(id): Path<i64>) -> Response {
    match state.db.delete_alias(id).await {
        Ok(()) => success(serde_json::json!({ "deleted": true })),
        Err(e) => db_failure(e),
    }
}

// ── Emails ──────────────────────────────────────────────────────────

async fn email_detail(State(state): State<ApiState>, Path(id): Path<i64>) -> Response {
    match state.db.get_email(id).await {
        Ok(Some(email)) => success(email),
        Ok(None) => failure(StatusCode::NOT_FOUND, "Email not found"),
        Err(e) => db_failure(e),
    }
}

// ── Domains ─────────────────────────────────────────────────────────

async fn list_domains(State(state): State<ApiState>) -> Response {
    match state.db.list_domains().await {
        Ok(domains) => success(domains),
        Err(e) => db_failure(e),
    }
}

#[derive(Deserialize)]
struct CreateDomainRequest {
    domain: String,
}

async fn create_domain(
    State(state): State<ApiState>,
    Json(req): Json<CreateDomainRequest>,
) -> Response {
    let domain = req.domain.trim().to_lowercase();
    if !DOMAIN_FORMAT.is_match(&domain) {
        return failure(StatusCode::BAD_REQUEST, "Invalid domain format");
    }
    match state.db.add_domain(&domain).await {
        Ok(domain) => success(domain),
        Err(e) => db_failure(e),
    }
}

async fn delete_domain(State(state): State<ApiState>, Path(id): Path<i64>) -> Response {
    match state.db.remove_domain(id).await {
        Ok(()) => success(serde_json::json!({ "deleted": true })),
        Err(e) => db_failure(e),
    }
}

// ── Ingestion ───────────────────────────────────────────────────────

/// Transport adapter: the mail gateway POSTs the raw RFC 5322 message with
/// the envelope in `X-Mail-From` / `X-Rcpt-To` headers.
///
/// Status codes carry the delivery semantics: 422 is a permanent refusal
/// (unknown mailbox — do not retry), 500 is a processing failure (the
/// gateway may redeliver the same raw message).
async fn ingest(State(state): State<ApiState>, headers: HeaderMap, body: Bytes) -> Response {
    let Some(from) = header_str(&headers, "x-mail-from") else {
        return failure(StatusCode::BAD_REQUEST, "Missing X-Mail-From header");
    };
    let Some(to) = header_str(&headers, "x-rcpt-to") else {
        return failure(StatusCode::BAD_REQUEST, "Missing X-Rcpt-To header");
    };

    let raw = body.to_vec();
    let msg = InboundEmail::from_bytes(from, to, headers_from_raw(&raw), raw);

    match handle_inbound(msg, state.db.as_ref()).await {
        Ok(Delivery::Stored {
            email_id,
            verification_code,
        }) => success(serde_json::json!({
            "email_id": email_id,
            "verification_code": verification_code,
        })),
        Ok(Delivery::Rejected { reason }) => failure(StatusCode::UNPROCESSABLE_ENTITY, reason),
        Err(e @ IngestError::Storage(_)) => {
            error!("Ingestion storage failure: {e}");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Processing failed, retry later")
        }
        Err(e) => {
            error!("Ingestion failure: {e}");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

// ── Misc ────────────────────────────────────────────────────────────

async fn health() -> Response {
    success(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn index_page() -> Html<&'static str> {
    Html(include_str!("../assets/index.html"))
}

/// Build the full application router.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_page))
        .route("/api/aliases", get(list_aliases).post(create_alias))
        .route("/api/aliases/{id}/emails", get(alias_emails))
        .route("/api/aliases/{id}/latest-code", get(alias_latest_code))
        .route("/api/aliases/{id}/toggle", put(toggle_alias))
        .route("/api/aliases/{id}", delete(delete_alias))
        .route("/api/emails/{id}", get(email_detail))
        .route("/api/domains", get(list_domains).post(create_domain))
        .route("/api/domains/{id}", delete(delete_domain))
        .route("/api/health", get(health))
        .route("/api/ingest", axum::routing::post(ingest))
        .layer(cors)
        .with_state(state)
}
