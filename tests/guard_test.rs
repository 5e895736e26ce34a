// Integration tests for the request guard: origin checks, CSRF
// enforcement, session presence, and security headers

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tower::ServiceExt;
use wealthdesk::api::{create_app_router, AppState};
use wealthdesk::audit::{AuditRecorder, AuditStore};
use wealthdesk::config::AppConfig;
use wealthdesk::csrf;
use wealthdesk::oauth::ConnectionManager;
use wealthdesk::session::{Connection, SessionCodec};

fn test_config() -> AppConfig {
    AppConfig {
        sf_client_id: "client123".to_string(),
        sf_client_secret: "secret456".to_string(),
        app_origin: "http://localhost:3000".to_string(),
        session_key: BASE64.encode([7u8; 32]),
        ..Default::default()
    }
}

fn create_test_app(config: AppConfig) -> (Router, SessionCodec) {
    let codec = SessionCodec::new(&config.session_key).unwrap();
    let manager = Arc::new(ConnectionManager::new(&config).unwrap());
    let audit = AuditRecorder::new(Arc::new(AuditStore::new(":memory:")));

    let state = AppState {
        config: Arc::new(config),
        manager,
        codec: codec.clone(),
        audit,
    };

    (create_app_router(state), codec)
}

fn session_blob(codec: &SessionCodec) -> String {
    let now = Utc::now();
    codec
        .encode(&Connection {
            access_token: "access-token".to_string(),
            refresh_token: "refresh-token".to_string(),
            instance_url: "https://acme.my.salesforce.com".to_string(),
            org_id: "00D5f000001abcD".to_string(),
            user_name: "Avery Advisor".to_string(),
            issued_at: now,
            expires_at: now + Duration::hours(2),
        })
        .unwrap()
}

async fn error_code(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    json["errorCode"].as_str().unwrap().to_string()
}

// Scenario: correct CSRF cookie but no header on a mutating request
#[tokio::test]
async fn test_mutating_request_without_csrf_header_is_403() {
    let (app, _) = create_test_app(test_config());
    let token = csrf::issue_token();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/salesforce/logout")
                .header("cookie", format!("wd_csrf={}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(response).await, "CSRF_ERROR");
}

#[tokio::test]
async fn test_mutating_request_with_mismatched_csrf_header_is_403() {
    let (app, _) = create_test_app(test_config());
    let token = csrf::issue_token();
    let other = csrf::issue_token();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/salesforce/logout")
                .header("cookie", format!("wd_csrf={}", token))
                .header("x-csrf-token", &other)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(response).await, "CSRF_ERROR");
}

#[tokio::test]
async fn test_mutating_request_with_matching_pair_passes() {
    let (app, _) = create_test_app(test_config());
    let token = csrf::issue_token();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/salesforce/logout")
                .header("cookie", format!("wd_csrf={}", token))
                .header("x-csrf-token", &token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

// GET requests are not CSRF-checked
#[tokio::test]
async fn test_read_request_needs_no_csrf() {
    let (app, _) = create_test_app(test_config());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/salesforce/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_foreign_origin_rejected() {
    let (app, _) = create_test_app(test_config());
    let token = csrf::issue_token();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/salesforce/logout")
                .header("origin", "https://evil.example")
                .header("cookie", format!("wd_csrf={}", token))
                .header("x-csrf-token", &token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(response).await, "FORBIDDEN_ORIGIN");
}

#[tokio::test]
async fn test_own_origin_accepted() {
    let (app, _) = create_test_app(test_config());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/salesforce/status")
                .header("origin", "http://localhost:3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

// The OAuth callback is a cross-origin navigation from Salesforce
#[tokio::test]
async fn test_callback_path_exempt_from_origin_check() {
    let (app, _) = create_test_app(test_config());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/salesforce/callback?error=access_denied&error_description=denied")
                .header("origin", "https://login.salesforce.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Redirects home instead of being blocked
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn test_protected_route_without_session_is_401() {
    let (app, _) = create_test_app(test_config());
    let token = csrf::issue_token();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/audit/pii-access")
                .header("content-type", "application/json")
                .header("cookie", format!("wd_csrf={}", token))
                .header("x-csrf-token", &token)
                .body(Body::from(
                    r#"{"field":"ssn","clientLabel":"J. Smith Household"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(response).await, "NOT_CONNECTED");
}

#[tokio::test]
async fn test_pii_access_with_session_succeeds() {
    let (app, codec) = create_test_app(test_config());
    let token = csrf::issue_token();
    let blob = session_blob(&codec);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/audit/pii-access")
                .header("content-type", "application/json")
                .header("cookie", format!("wd_session={}; wd_csrf={}", blob, token))
                .header("x-csrf-token", &token)
                .body(Body::from(
                    r#"{"field":"ssn","clientLabel":"J. Smith Household"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

// Scenario: 201-character label is rejected before any audit write
#[tokio::test]
async fn test_pii_access_overlong_label_rejected() {
    let (app, codec) = create_test_app(test_config());
    let token = csrf::issue_token();
    let blob = session_blob(&codec);
    let label = "x".repeat(201);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/audit/pii-access")
                .header("content-type", "application/json")
                .header("cookie", format!("wd_session={}; wd_csrf={}", blob, token))
                .header("x-csrf-token", &token)
                .body(Body::from(format!(
                    r#"{{"field":"ssn","clientLabel":"{}"}}"#,
                    label
                )))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_pii_access_unknown_field_rejected() {
    let (app, codec) = create_test_app(test_config());
    let token = csrf::issue_token();
    let blob = session_blob(&codec);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/audit/pii-access")
                .header("content-type", "application/json")
                .header("cookie", format!("wd_session={}; wd_csrf={}", blob, token))
                .header("x-csrf-token", &token)
                .body(Body::from(
                    r#"{"field":"dateOfBirth","clientLabel":"J. Smith Household"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "VALIDATION_ERROR");
}

// Dev mode with static credentials stands in for a session, but only
// behind the explicit flag
#[tokio::test]
async fn test_dev_mode_bypasses_session_check() {
    let config = AppConfig {
        dev_mode: true,
        dev_access_token: Some("static-token".to_string()),
        dev_instance_url: Some("https://dev.my.salesforce.com".to_string()),
        ..test_config()
    };
    let (app, _) = create_test_app(config);
    let token = csrf::issue_token();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/audit/pii-access")
                .header("content-type", "application/json")
                .header("cookie", format!("wd_csrf={}", token))
                .header("x-csrf-token", &token)
                .body(Body::from(
                    r#"{"field":"bankAcct","clientLabel":"J. Smith Household"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_credentials_without_dev_flag_do_not_bypass() {
    let config = AppConfig {
        dev_mode: false,
        dev_access_token: Some("static-token".to_string()),
        dev_instance_url: Some("https://dev.my.salesforce.com".to_string()),
        ..test_config()
    };
    let (app, _) = create_test_app(config);
    let token = csrf::issue_token();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/audit/pii-access")
                .header("content-type", "application/json")
                .header("cookie", format!("wd_csrf={}", token))
                .header("x-csrf-token", &token)
                .body(Body::from(
                    r#"{"field":"ssn","clientLabel":"J. Smith Household"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// CORS grants the configured origin only; a foreign preflight gets no
// allow-origin grant
#[tokio::test]
async fn test_cors_allows_only_configured_origin() {
    let (app, _) = create_test_app(test_config());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/salesforce/logout")
                .header("origin", "http://localhost:3000")
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "http://localhost:3000"
    );
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-credentials")
            .unwrap(),
        "true"
    );

    let response = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/salesforce/logout")
                .header("origin", "https://evil.example")
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response
        .headers()
        .get("access-control-allow-origin")
        .is_none());
}

#[tokio::test]
async fn test_security_headers_on_success_and_failure() {
    let (app, _) = create_test_app(test_config());

    // Success path
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/salesforce/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");

    // Guard rejection path
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/salesforce/logout")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert_eq!(
        response.headers().get("referrer-policy").unwrap(),
        "strict-origin-when-cross-origin"
    );
}
