//! Integration tests for identity endpoints
//!
//! Tests cover:
//! - Health and build info (no auth)
//! - Registration, login, logout, current user
//! - Bearer middleware rejections
//! - Administrator user management and role guards

mod helpers;

use axum::http::StatusCode;
use helpers::{spawn_app, ADMIN_EMAIL, PASSWORD};
use serde_json::json;

// =============================================================================
// Health / build info
// =============================================================================

#[tokio::test]
async fn test_health_endpoint_no_auth_required() {
    let app = spawn_app().await;

    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "civitas-api");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_buildinfo() {
    let app = spawn_app().await;

    let (status, body) = app.get("/api/buildinfo", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["git_hash"].is_string());
    assert!(body["build_profile"].is_string());
    assert!(body["started_at"].is_string());
}

// =============================================================================
// Registration and sessions
// =============================================================================

#[tokio::test]
async fn test_register_login_me_logout() {
    let app = spawn_app().await;

    let (status, user) = app
        .post(
            "/api/auth/register",
            None,
            json!({
                "email": "Ana@Example.co",
                "full_name": "Ana Gómez",
                "password": PASSWORD,
                "phone": "+573001112233"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(user["email"], "ana@example.co");
    assert_eq!(user["roles"], json!(["citizen"]));
    assert!(user.get("password_hash").is_none());

    let (status, login) = app
        .post(
            "/api/auth/login",
            None,
            json!({"email": "ana@example.co", "password": PASSWORD}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = login["token"].as_str().unwrap().to_string();
    assert_eq!(token.len(), 64);
    assert!(login["expires_at"].is_string());

    let (status, me) = app.get("/api/auth/me", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["full_name"], "Ana Gómez");

    let (status, _) = app.call("POST", "/api/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app.get("/api/auth/me", Some(&token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_register_duplicate_email_conflicts() {
    let app = spawn_app().await;
    app.citizen("dup@example.co").await;

    let (status, body) = app
        .post(
            "/api/auth/register",
            None,
            json!({"email": "DUP@example.co", "full_name": "Otra", "password": PASSWORD}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_register_validation_details() {
    let app = spawn_app().await;

    let (status, body) = app
        .post(
            "/api/auth/register",
            None,
            json!({"email": "nope", "full_name": "", "password": "short"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_FAILED");
    let details = &body["error"]["details"];
    assert!(details["email"].is_string());
    assert!(details["full_name"].is_string());
    assert!(details["password"].is_string());
}

#[tokio::test]
async fn test_login_rejections() {
    let app = spawn_app().await;
    app.citizen("carlos@example.co").await;

    let (status, _) = app
        .post(
            "/api/auth/login",
            None,
            json!({"email": "carlos@example.co", "password": "wrong-password"}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .post(
            "/api/auth/login",
            None,
            json!({"email": "nobody@example.co", "password": PASSWORD}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_protected_routes_require_bearer() {
    let app = spawn_app().await;

    let (status, body) = app.get("/api/incidents", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["message"], "missing bearer token");

    let (status, _) = app.get("/api/incidents", Some("deadbeef")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Administrator user management
// =============================================================================

#[tokio::test]
async fn test_citizen_cannot_manage_users() {
    let app = spawn_app().await;
    let (_, token) = app.citizen("ciudadano@example.co").await;

    let (status, body) = app.get("/api/users", Some(&token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_admin_user_crud_and_roles() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;

    let (status, created) = app
        .post(
            "/api/users",
            Some(&admin),
            json!({
                "email": "operadora@alcaldia.gov.co",
                "full_name": "Operadora",
                "password": PASSWORD,
                "roles": ["leader", "citizen"]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["roles"], json!(["leader", "citizen"]));

    let (status, page) = app.get("/api/users?role=leader", Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["items"].as_array().unwrap().len(), 1);

    let (status, page) = app
        .get("/api/users?search=ALCALDIA&page=1&page_size=5", Some(&admin))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["items"][0]["id"], id.as_str());

    let (status, updated) = app
        .put(
            &format!("/api/users/{}", id),
            Some(&admin),
            json!({"full_name": "Operadora Municipal", "phone": "3001234567"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["full_name"], "Operadora Municipal");

    let (status, _) = app
        .put(&format!("/api/users/{}/roles", id), Some(&admin), json!({"roles": []}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, roles) = app
        .put(
            &format!("/api/users/{}/roles", id),
            Some(&admin),
            json!({"roles": ["admin"]}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(roles["roles"], json!(["admin"]));
}

#[tokio::test]
async fn test_deactivation_revokes_sessions() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;
    let (id, token) = app.citizen("temporal@example.co").await;

    let (status, _) = app
        .call("DELETE", &format!("/api/users/{}", id), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.get("/api/auth/me", Some(&token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .post(
            "/api/auth/login",
            None,
            json!({"email": "temporal@example.co", "password": PASSWORD}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_cannot_deactivate_self() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;
    let (_, me) = app.get("/api/auth/me", Some(&admin)).await;
    assert_eq!(me["email"], ADMIN_EMAIL);

    let (status, _) = app
        .call(
            "DELETE",
            &format!("/api/users/{}", me["id"].as_str().unwrap()),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}
