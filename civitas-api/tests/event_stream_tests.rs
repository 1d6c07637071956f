//! Integration tests for the SSE event stream
//!
//! Tests cover:
//! - Authentication on /api/events
//! - Content type and event frames
//! - Per-subscriber visibility of incident events

mod helpers;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
};
use helpers::{spawn_app, TestApp};
use http_body_util::BodyExt;
use serde_json::Value;
use std::time::Duration;
use tower::util::ServiceExt;

const CENTRO: (f64, f64) = (6.2518, -75.5636);

async fn open_stream(app: &TestApp, token: Option<&str>) -> Response {
    let mut builder = Request::builder().method("GET").uri("/api/events");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    app.router
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

/// Read frames until a complete `data:` event arrives; None after a quiet period
async fn next_event(body: &mut Body) -> Option<(String, Value)> {
    let mut buffer = String::new();
    loop {
        let frame = tokio::time::timeout(Duration::from_millis(500), body.frame())
            .await
            .ok()??
            .ok()?;
        if let Ok(data) = frame.into_data() {
            buffer.push_str(&String::from_utf8_lossy(&data));
        }
        if buffer.contains("data:") && buffer.ends_with("\n\n") {
            break;
        }
    }

    let mut name = String::new();
    let mut data = String::new();
    for line in buffer.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            name = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push_str(value.trim());
        }
    }
    Some((name, serde_json::from_str(&data).unwrap()))
}

#[tokio::test]
async fn test_stream_requires_authentication() {
    let app = spawn_app().await;
    let response = open_stream(&app, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = open_stream(&app, Some("not-a-session")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_stream_delivers_events() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;
    let (_, citizen) = app.citizen("stream@example.co").await;

    let response = open_stream(&app, Some(&admin)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));
    let mut body = response.into_body();

    let incident = app.submit(&citizen, CENTRO.0, CENTRO.1).await;

    let (name, event) = next_event(&mut body).await.expect("no event delivered");
    assert_eq!(name, "IncidentSubmitted");
    assert_eq!(event["type"], "IncidentSubmitted");
    assert_eq!(event["incident_id"], incident["id"]);
    assert_eq!(event["radicate_number"], incident["radicate_number"]);
}

#[tokio::test]
async fn test_stream_respects_visibility() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;
    let (_, leader) = app.leader(&admin, "lider@example.co", CENTRO.0, CENTRO.1).await;
    let (_, other_leader) = app.leader(&admin, "lejano@example.co", 6.35, -75.70).await;
    let (_, reporter) = app.citizen("reporta@example.co").await;
    let (_, bystander) = app.citizen("mira@example.co").await;

    let mut reporter_body = open_stream(&app, Some(&reporter)).await.into_body();
    let mut bystander_body = open_stream(&app, Some(&bystander)).await.into_body();
    let mut leader_body = open_stream(&app, Some(&leader)).await.into_body();
    let mut other_leader_body = open_stream(&app, Some(&other_leader)).await.into_body();

    let incident = app.submit(&reporter, CENTRO.0, CENTRO.1).await;

    let (name, event) = next_event(&mut reporter_body).await.expect("reporter got nothing");
    assert_eq!(name, "IncidentSubmitted");
    assert_eq!(event["incident_id"], incident["id"]);

    let (name, event) = next_event(&mut leader_body).await.expect("leader got nothing");
    assert_eq!(name, "IncidentSubmitted");
    assert_eq!(event["incident_id"], incident["id"]);
    let (name, _) = next_event(&mut leader_body).await.expect("no assignment event");
    assert_eq!(name, "IncidentAssigned");

    assert!(next_event(&mut bystander_body).await.is_none());
    assert!(next_event(&mut other_leader_body).await.is_none());
}
