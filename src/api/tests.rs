use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::*;
use crate::agent::AgentRegistry;
use crate::ca::{AdapterGateway, MockCaAdapter};
use crate::clock::ManualClock;
use crate::config::Settings;
use crate::deploy::transport::MockAgentTransport;
use crate::deploy::DeploymentOrchestrator;
use crate::lifecycle::{ExpiryThresholds, LifecycleEngine};
use crate::store::{AuditLog, CertificateStore, InstallLedger};
use crate::telemetry::MetricsCollector;

struct TestApp {
    router: Router,
    ca: Arc<MockCaAdapter>,
    clock: Arc<ManualClock>,
}

fn app() -> TestApp {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    let ca = Arc::new(MockCaAdapter::with_defaults(clock.clone()));
    let gateway = Arc::new(AdapterGateway::new(Duration::from_secs(5), clock.clone()));
    gateway.register("mock", ca.clone());

    let registry = Arc::new(AgentRegistry::new(Duration::from_secs(300), clock.clone()));
    let audit = Arc::new(AuditLog::in_memory());
    // No expectations: any transport call fails the test
    let transport = Arc::new(MockAgentTransport::new());
    let orchestrator = Arc::new(DeploymentOrchestrator::new(
        registry.clone(),
        Arc::new(InstallLedger::new()),
        audit.clone(),
        transport,
        clock.clone(),
        Duration::from_secs(5),
        4,
    ));
    let engine = Arc::new(LifecycleEngine::new(
        Arc::new(CertificateStore::in_memory()),
        audit,
        gateway,
        orchestrator,
        clock.clone(),
        ExpiryThresholds::default(),
    ));

    let state = ApiState {
        engine,
        registry,
        metrics: Arc::new(MetricsCollector::new().unwrap()),
        settings: Arc::new(Settings::default()),
        started_at: Instant::now(),
    };

    TestApp {
        router: create_test_router(state),
        ca,
        clock,
    }
}

impl TestApp {
    async fn call(&self, method: &str, uri: &str, actor: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(actor) = actor {
            builder = builder.header("x-actor-id", actor).header("x-actor-roles", "operator, admin");
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn issue(&self) -> String {
        let (status, body) = self
            .call("POST", "/api/v1/certificates", Some("alice"), Some(certificate_request()))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["data"]["certificate_id"].as_str().unwrap().to_string()
    }
}

fn certificate_request() -> Value {
    json!({
        "owner_id": "team-a",
        "common_name": "api.example.com",
        "sans": ["api.example.com", "www.example.com"],
        "key_algorithm": "ECDSA",
        "key_size": 256,
        "adapter_id": "mock"
    })
}

#[tokio::test]
async fn test_request_and_get_certificate() {
    let app = app();
    let id = app.issue().await;

    let (status, body) = app.call("GET", &format!("/api/v1/certificates/{}", id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "active");
    assert_eq!(body["data"]["days_until_expiry"], 90);
    assert_eq!(body["data"]["audit_logs"][0]["action"], "issued");
}

#[tokio::test]
async fn test_mutation_requires_actor() {
    let app = app();
    let (status, body) = app
        .call("POST", "/api/v1/certificates", None, Some(certificate_request()))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_validation_and_unknown_adapter() {
    let app = app();

    let mut request = certificate_request();
    request["key_size"] = json!(1024);
    let (status, _) = app.call("POST", "/api/v1/certificates", Some("alice"), Some(request)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut request = certificate_request();
    request["adapter_id"] = json!("vault");
    let (status, body) = app.call("POST", "/api/v1/certificates", Some("alice"), Some(request)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("vault"));
}

#[tokio::test]
async fn test_adapter_failure_is_bad_gateway() {
    let app = app();
    app.ca.fail_issue(Some("upstream refused"));

    let (status, _) = app
        .call("POST", "/api/v1/certificates", Some("alice"), Some(certificate_request()))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_list_filters() {
    let app = app();
    app.issue().await;

    let (status, body) = app.call("GET", "/api/v1/certificates?status=ACTIVE&q=WWW", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert!(body["data"][0].get("audit_logs").is_none());

    let (_, body) = app.call("GET", "/api/v1/certificates?status=expired", None, None).await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, _) = app.call("GET", "/api/v1/certificates?status=bogus", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_revoke_is_idempotent() {
    let app = app();
    let id = app.issue().await;
    let uri = format!("/api/v1/certificates/{}/revoke", id);

    for _ in 0..2 {
        let (status, body) = app
            .call("POST", &uri, Some("alice"), Some(json!({"reason": "key compromise"})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "revoked");
    }

    let (status, _) = app
        .call("POST", &format!("/api/v1/certificates/{}/renew", id), Some("alice"), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_request_record_lookup() {
    let app = app();
    let (_, body) = app
        .call("POST", "/api/v1/certificates", Some("alice"), Some(certificate_request()))
        .await;
    let request_id = body["data"]["request_id"].as_str().unwrap();

    let (status, body) = app.call("GET", &format!("/api/v1/requests/{}", request_id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "issued");

    let (status, _) = app.call("GET", "/api/v1/requests/missing", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_agent_lifecycle() {
    let app = app();

    let (status, body) = app
        .call(
            "POST",
            "/api/v1/agents",
            None,
            Some(json!({"id": "web-1", "hostname": "web-1.internal", "address": "10.0.0.5:7443", "version": "1.2.0"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["online"], true);

    let (status, _) = app
        .call("POST", "/api/v1/agents/ghost/heartbeat", None, Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.clock.advance(ChronoDuration::minutes(10));
    let (_, body) = app.call("GET", "/api/v1/agents/web-1", None, None).await;
    assert_eq!(body["data"]["online"], false);

    // Offline agents are refused before any transport call
    let id = app.issue().await;
    let (status, _) = app
        .call(
            "POST",
            "/api/v1/agents/web-1/install",
            Some("alice"),
            Some(json!({"certificate_id": id, "path": "/etc/ssl/api.pem"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .call("POST", "/api/v1/agents/web-1/heartbeat", None, Some(json!({"metrics": {"cpu_percent": 12.5}})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["heartbeat_timeout_secs"], 300);

    let (status, _) = app.call("DELETE", "/api/v1/agents/web-1", Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = app.call("GET", "/api/v1/agents", None, None).await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_inventory_and_health() {
    let app = app();
    app.issue().await;

    let (status, body) = app.call("GET", "/api/v1/inventory/summary", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["by_status"]["active"], 1);

    let (status, body) = app.call("GET", "/api/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["certificates"], 1);
    assert_eq!(body["data"]["adapters"][0], "mock");
}

#[tokio::test]
async fn test_metrics_text() {
    let app = app();
    let request = Request::builder().uri("/api/v1/metrics").body(Body::empty()).unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("certfleet_agents_online"));
}
