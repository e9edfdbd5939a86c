use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use scanward_core::{
    CheckError, ScanBackends, ScanEngine,
    checks::{Check, CheckOutcome, CheckRegistry},
    orchestration::OrchestratorConfig,
};
use scanward_model::{CheckConfig, OrganizationId, ResolvedTarget, Severity, UserId};
use scanward_server::{AppState, router};
use serde_json::{Value, json};
use tower::ServiceExt;

#[derive(Debug)]
struct Fixed(u32);

#[async_trait]
impl Check for Fixed {
    async fn run(
        &self,
        target: &ResolvedTarget,
        _config: &CheckConfig,
        _timeout: Duration,
    ) -> Result<CheckOutcome, CheckError> {
        Ok(CheckOutcome::success(
            json!({ "host": target.host }),
            self.0,
            Severity::Low,
        ))
    }
}

#[derive(Debug)]
struct Stall;

#[async_trait]
impl Check for Stall {
    async fn run(
        &self,
        _target: &ResolvedTarget,
        _config: &CheckConfig,
        _timeout: Duration,
    ) -> Result<CheckOutcome, CheckError> {
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        Ok(CheckOutcome::success(json!({}), 0, Severity::Info))
    }
}

struct Harness {
    app: Router,
    _engine: Arc<ScanEngine>,
    org: OrganizationId,
    user: UserId,
}

async fn harness() -> Harness {
    let registry = CheckRegistry::builder()
        .register("ping", Fixed(0))
        .register("headers", Fixed(2))
        .register("ssl", Fixed(1))
        .register("stall", Stall)
        .build();

    let mut config = OrchestratorConfig::default();
    config.workers.parallelism = 2;
    config.workers.idle_poll_ms = 5;

    let engine = Arc::new(ScanEngine::new(config, registry, ScanBackends::in_memory()));
    engine.start().await.unwrap();

    Harness {
        app: router(AppState::new(Arc::clone(&engine))),
        _engine: engine,
        org: OrganizationId::new(),
        user: UserId::new(),
    }
}

impl Harness {
    fn request(&self, method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        self.request_as(self.org, method, uri, body)
    }

    fn request_as(
        &self,
        org: OrganizationId,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-organization-id", org.to_string())
            .header("x-user-id", self.user.to_string());
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn submit(&self, checks: &[&str]) -> Value {
        let (status, body) = self
            .send(self.request(
                "POST",
                "/api/v1/scans",
                Some(json!({ "url": "example.com", "checks": checks })),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }

    async fn wait_for_status(&self, id: &str, expected: &str) -> Value {
        for _ in 0..500 {
            let (_, body) = self
                .send(self.request("GET", &format!("/api/v1/scans/{id}/status"), None))
                .await;
            if body["status"] == expected {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never reached {expected}");
    }
}

#[tokio::test]
async fn submitted_scan_completes_and_reports() {
    let h = harness().await;
    let job = h.submit(&["ping", "headers", "ssl"]).await;
    let id = job["id"].as_str().unwrap().to_string();
    assert_eq!(job["checks"], json!(["ping", "headers", "ssl"]));

    let status = h.wait_for_status(&id, "completed").await;
    assert_eq!(status["progress"], 100);

    let (code, results) = h
        .send(h.request("GET", &format!("/api/v1/scans/{id}/results"), None))
        .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(results.as_array().unwrap().len(), 3);

    let (code, report) = h
        .send(h.request("GET", &format!("/api/v1/scans/{id}/report"), None))
        .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(report["total_findings"], 3);

    let (code, listed) = h.send(h.request("GET", "/api/v1/scans?limit=10", None)).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn cancel_running_then_reject_second_cancel() {
    let h = harness().await;
    let job = h.submit(&["stall"]).await;
    let id = job["id"].as_str().unwrap().to_string();

    let (code, body) = h
        .send(h.request("GET", &format!("/api/v1/scans/{id}/report"), None))
        .await;
    assert_eq!(code, StatusCode::CONFLICT, "{body}");

    let (code, body) = h
        .send(h.request("POST", &format!("/api/v1/scans/{id}/cancel"), None))
        .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (code, body) = h
        .send(h.request("POST", &format!("/api/v1/scans/{id}/cancel"), None))
        .await;
    assert_eq!(code, StatusCode::CONFLICT);
    assert_eq!(body["error"]["status"], 409);
}

#[tokio::test]
async fn intake_rejections_are_bad_requests() {
    let h = harness().await;

    let (code, body) = h
        .send(h.request(
            "POST",
            "/api/v1/scans",
            Some(json!({ "url": "example.com", "checks": [] })),
        ))
        .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["status"], 400);
    assert!(body["error"]["message"].as_str().unwrap().contains("check"));

    let (code, _) = h
        .send(h.request(
            "POST",
            "/api/v1/scans",
            Some(json!({ "url": "example.com", "checks": ["teleport"] })),
        ))
        .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);

    let (code, _) = h
        .send(h.request(
            "POST",
            "/api/v1/scans",
            Some(json!({ "target_id": uuid::Uuid::now_v7(), "checks": ["ping"] })),
        ))
        .await;
    assert_eq!(code, StatusCode::NOT_FOUND);

    let (code, body) = h
        .send(h.request("GET", "/api/v1/scans/not-a-uuid", None))
        .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["status"], 400);
}

#[tokio::test]
async fn requests_without_identity_are_unauthorized() {
    let h = harness().await;
    let request = Request::builder()
        .uri("/api/v1/scans")
        .body(Body::empty())
        .unwrap();
    let (code, body) = h.send(request).await;
    assert_eq!(code, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["status"], 401);
}

#[tokio::test]
async fn jobs_of_other_organizations_are_not_found() {
    let h = harness().await;
    let job = h.submit(&["ping"]).await;
    let id = job["id"].as_str().unwrap();

    let stranger = OrganizationId::new();
    for path in ["", "/status", "/results", "/report"] {
        let (code, _) = h
            .send(h.request_as(stranger, "GET", &format!("/api/v1/scans/{id}{path}"), None))
            .await;
        assert_eq!(code, StatusCode::NOT_FOUND, "GET {path}");
    }
    let (code, _) = h
        .send(h.request_as(stranger, "POST", &format!("/api/v1/scans/{id}/cancel"), None))
        .await;
    assert_eq!(code, StatusCode::NOT_FOUND);

    let (_, listed) = h
        .send(h.request_as(stranger, "GET", "/api/v1/scans", None))
        .await;
    assert_eq!(listed, json!([]));
}

#[tokio::test]
async fn health_and_check_catalogue() {
    let h = harness().await;

    let (code, body) = h.send(h.request("GET", "/health", None)).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["queue"]["ready"], 0);

    let (code, body) = h.send(h.request("GET", "/api/v1/checks", None)).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["checks"], json!(["headers", "ping", "ssl", "stall"]));
}

#[tokio::test]
async fn event_stream_of_a_finished_job_is_a_single_snapshot() {
    let h = harness().await;
    let job = h.submit(&["ping"]).await;
    let id = job["id"].as_str().unwrap().to_string();
    h.wait_for_status(&id, "completed").await;

    let response = h
        .app
        .clone()
        .oneshot(h.request("GET", &format!("/api/v1/scans/{id}/events"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("event: snapshot"), "{text}");
    assert!(text.contains(r#""status":"completed""#), "{text}");
    assert_eq!(text.matches("event:").count(), 1);
}
