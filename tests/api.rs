//! Integration tests for the REST API.
//!
//! Each test builds the real router over an in-memory libSQL backend and
//! drives it with `tower::ServiceExt::oneshot` — no network, real handlers.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use mailbin::api::{ApiState, router};
use mailbin::store::{Database, LibSqlBackend};

const DEFAULT_DOMAIN: &str = "mailbin.dev";

async fn test_app() -> Router {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    router(ApiState {
        db,
        default_domain: DEFAULT_DOMAIN.to_string(),
    })
}

/// Send a request, return (status, parsed JSON body).
async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn json_req(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_req(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn ingest_req(from: &str, to: &str, raw: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/ingest")
        .header("X-Mail-From", from)
        .header("X-Rcpt-To", to)
        .body(Body::from(raw.to_string()))
        .unwrap()
}

fn raw_message(subject: &str, body: &str) -> String {
    format!(
        "From: sender@example.org\r\nTo: login@mailbin.dev\r\n\
         Subject: {subject}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{body}\r\n"
    )
}

async fn create_alias(app: &Router, alias: &str) -> i64 {
    let (status, body) = send(app, json_req("POST", "/api/aliases", json!({ "alias": alias }))).await;
    assert_eq!(status, StatusCode::OK, "create_alias failed: {body}");
    body["data"]["id"].as_i64().unwrap()
}

#[tokio::test]
async fn create_alias_uses_default_domain() {
    let app = test_app().await;
    let (status, body) = send(
        &app,
        json_req(
            "POST",
            "/api/aliases",
            json!({ "alias": "GitHub-Signup", "description": "for github" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["full_address"], "github-signup@mailbin.dev");
    assert_eq!(body["data"]["is_active"], json!(true));
}

#[tokio::test]
async fn create_alias_rejects_bad_format() {
    let app = test_app().await;
    for alias in [".dotfirst", "has space", "", "semi;colon"] {
        let (status, body) = send(&app, json_req("POST", "/api/aliases", json!({ "alias": alias }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "alias {alias:?}: {body}");
        assert_eq!(body["success"], json!(false));
    }
}

#[tokio::test]
async fn duplicate_alias_is_conflict() {
    let app = test_app().await;
    create_alias(&app, "login").await;

    let (status, body) = send(&app, json_req("POST", "/api/aliases", json!({ "alias": "login" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Alias already exists");
}

#[tokio::test]
async fn explicit_domain_auto_provisions() {
    let app = test_app().await;
    let (status, body) = send(
        &app,
        json_req(
            "POST",
            "/api/aliases",
            json!({ "alias": "login", "domain": "Other.Example" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["full_address"], "login@other.example");

    let (_, domains) = send(&app, get_req("/api/domains")).await;
    let listed: Vec<&str> = domains["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["domain"].as_str().unwrap())
        .collect();
    assert!(listed.contains(&"other.example"), "got {listed:?}");
}

#[tokio::test]
async fn ingest_stores_email_and_code() {
    let app = test_app().await;
    let id = create_alias(&app, "login").await;

    let (status, body) = send(
        &app,
        ingest_req(
            "sender@example.org",
            "login@mailbin.dev",
            &raw_message("Welcome", "Your code is 482913"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["verification_code"], "482913");

    let (_, latest) = send(&app, get_req(&format!("/api/aliases/{id}/latest-code"))).await;
    assert_eq!(latest["data"]["code"], "482913");

    let (_, emails) = send(&app, get_req(&format!("/api/aliases/{id}/emails"))).await;
    assert_eq!(emails["data"].as_array().unwrap().len(), 1);

    let email_id = body["data"]["email_id"].as_i64().unwrap();
    let (status, detail) = send(&app, get_req(&format!("/api/emails/{email_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["data"]["subject"], "Welcome");
    assert_eq!(detail["data"]["to_address"], "login@mailbin.dev");
}

#[tokio::test]
async fn ingest_unknown_mailbox_is_unprocessable() {
    let app = test_app().await;
    let (status, body) = send(
        &app,
        ingest_req(
            "sender@example.org",
            "nobody@mailbin.dev",
            &raw_message("Hi", "code 123456"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "Mailbox nobody does not exist");
}

#[tokio::test]
async fn ingest_to_disabled_alias_is_unprocessable() {
    let app = test_app().await;
    let id = create_alias(&app, "login").await;
    let (status, _) = send(
        &app,
        json_req(
            "PUT",
            &format!("/api/aliases/{id}/toggle"),
            json!({ "is_active": false }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        ingest_req(
            "sender@example.org",
            "login@mailbin.dev",
            &raw_message("Hi", "code 123456"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn ingest_without_envelope_headers_is_bad_request() {
    let app = test_app().await;
    let req = Request::builder()
        .method("POST")
        .uri("/api/ingest")
        .body(Body::from(raw_message("Hi", "code 123456")))
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing X-Mail-From header");
}

#[tokio::test]
async fn ingest_without_code_still_stores() {
    let app = test_app().await;
    let id = create_alias(&app, "login").await;

    let (status, body) = send(
        &app,
        ingest_req(
            "sender@example.org",
            "login@mailbin.dev",
            &raw_message("Hello", "nothing numeric in here"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["verification_code"], Value::Null);

    let (_, latest) = send(&app, get_req(&format!("/api/aliases/{id}/latest-code"))).await;
    assert_eq!(latest["data"]["code"], Value::Null);
}

#[tokio::test]
async fn delete_alias_removes_its_emails() {
    let app = test_app().await;
    let id = create_alias(&app, "login").await;
    for _ in 0..2 {
        let (status, _) = send(
            &app,
            ingest_req(
                "sender@example.org",
                "login@mailbin.dev",
                &raw_message("Hi", "Your code is 482913"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, _) = send(
        &app,
        Request::builder()
            .method("DELETE")
            .uri(format!("/api/aliases/{id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, list) = send(&app, get_req("/api/aliases")).await;
    assert_eq!(list["data"].as_array().unwrap().len(), 0);

    let (_, emails) = send(&app, get_req(&format!("/api/aliases/{id}/emails"))).await;
    assert_eq!(emails["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn list_aliases_reports_email_counts() {
    let app = test_app().await;
    create_alias(&app, "login").await;
    send(
        &app,
        ingest_req(
            "sender@example.org",
            "login@mailbin.dev",
            &raw_message("Hi", "Your code is 482913"),
        ),
    )
    .await;

    let (_, list) = send(&app, get_req("/api/aliases")).await;
    let aliases = list["data"].as_array().unwrap();
    assert_eq!(aliases.len(), 1);
    assert_eq!(aliases[0]["email_count"], 1);
    assert_eq!(aliases[0]["full_address"], "login@mailbin.dev");
}

#[tokio::test]
async fn missing_email_is_not_found() {
    let app = test_app().await;
    let (status, body) = send(&app, get_req("/api/emails/12345")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Email not found");
}

#[tokio::test]
async fn domain_soft_delete_and_readd() {
    let app = test_app().await;
    let (status, body) = send(
        &app,
        json_req("POST", "/api/domains", json!({ "domain": "alt.example" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = body["data"]["id"].as_i64().unwrap();

    let (status, _) = send(
        &app,
        Request::builder()
            .method("DELETE")
            .uri(format!("/api/domains/{id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Soft-deleted: still listed, inactive.
    let (_, list) = send(&app, get_req("/api/domains")).await;
    let row = &list["data"].as_array().unwrap()[0];
    assert_eq!(row["is_active"], json!(false));

    // Re-adding reactivates the same row.
    let (_, readd) = send(
        &app,
        json_req("POST", "/api/domains", json!({ "domain": "alt.example" })),
    )
    .await;
    assert_eq!(readd["data"]["id"].as_i64().unwrap(), id);
    assert_eq!(readd["data"]["is_active"], json!(true));
}

#[tokio::test]
async fn invalid_domain_is_bad_request() {
    let app = test_app().await;
    for domain in ["", "nodots", "has space.com", "-leading.example"] {
        let (status, _) = send(
            &app,
            json_req("POST", "/api/domains", json!({ "domain": domain })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "domain {domain:?}");
    }
}

#[tokio::test]
async fn health_reports_ok() {
    let app = test_app().await;
    let (status, body) = send(&app, get_req("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn index_serves_admin_page() {
    let app = test_app().await;
    let response = app.clone().oneshot(get_req("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(&bytes).contains("<title>mailbin</title>"));
}
