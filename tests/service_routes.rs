//! Router tests against the in-memory store.

#![cfg(feature = "service")]

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use study_guide_kernel::ingest::{OcrClient, OcrConfig};
use study_guide_kernel::service::{create_router, ServiceState};
use study_guide_kernel::store::InMemoryContentStore;
use study_guide_kernel::{
    AssignmentManager, ContentStore, NewCourse, NewTopic, RefinementConfig, SessionConfig, Topic,
};

struct TestApp {
    router: axum::Router,
    store: Arc<InMemoryContentStore>,
    community: Topic,
    premium: Topic,
    assigned_user: i64,
}

async fn setup() -> TestApp {
    let store = Arc::new(InMemoryContentStore::new());
    let course = store.create_course(NewCourse::named("BIO 202")).await.unwrap();
    let community = store
        .create_topic(NewTopic::community(course.id, "Cells").with_raw_text("open text"))
        .await
        .unwrap();
    let premium = store
        .create_topic(NewTopic::premium(course.id, "Tissues").with_raw_text("secret text"))
        .await
        .unwrap();
    let reg = study_guide_kernel::register_or_login(store.as_ref(), "Ada", "AD01", None)
        .await
        .unwrap();
    AssignmentManager::new(store.clone())
        .assign(premium.id, &BTreeSet::from([reg.user.id]))
        .await
        .unwrap();

    let state = ServiceState::new(
        store.clone(),
        RefinementConfig::default(),
        Some(SessionConfig::new(b"router-test-secret".to_vec())),
        Arc::new(OcrClient::new(OcrConfig::default()).unwrap()),
    );
    state
        .admin()
        .unwrap()
        .create_admin("root", "Root", "pw", true)
        .await
        .unwrap();

    TestApp {
        router: create_router(state),
        store,
        community,
        premium,
        assigned_user: reg.user.id.get(),
    }
}

async fn send(
    app: &TestApp,
    method: Method,
    path: &str,
    headers: &[(&str, String)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(path);
    for (name, value) in headers {
        request = request.header(*name, value.as_str());
    }
    let request = match body {
        Some(json_body) => request
            .header("content-type", "application/json")
            .body(Body::from(json_body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn admin_token(app: &TestApp) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/admin/login",
        &[],
        Some(json!({"username": "root", "password": "pw"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["session"]["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = setup().await;
    let (status, body) = send(&app, Method::GET, "/health", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], true);
}

#[tokio::test]
async fn test_premium_detail_denied_with_premium_signal() {
    let app = setup().await;
    let path = format!("/api/topics/{}", app.premium.id);

    let (status, body) = send(&app, Method::GET, &path, &[], None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["premium"], true);
    assert_eq!(body["requires_login"], true);
    assert!(body.get("raw_text").is_none());

    let (status, body) = send(
        &app,
        Method::GET,
        &path,
        &[("x-user-id", app.assigned_user.to_string())],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["raw_text"], "secret text");
}

#[tokio::test]
async fn test_listing_hides_premium_from_anonymous() {
    let app = setup().await;
    let course = app.community.course_id;

    let (status, body) = send(&app, Method::GET, &format!("/api/courses/{course}/topics"), &[], None).await;
    assert_eq!(status, StatusCode::OK);
    let topics = body["topics"].as_array().unwrap();
    assert_eq!(topics.len(), 1);
    assert_eq!(topics[0]["title"], "Cells");
    assert!(topics[0].get("raw_text").is_none());

    let path = format!("/api/courses/{course}/topics?user_id={}", app.assigned_user);
    let (_, body) = send(&app, Method::GET, &path, &[], None).await;
    assert_eq!(body["topics"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_invalid_user_id_is_bad_request() {
    let app = setup().await;
    let (status, body) = send(&app, Method::GET, "/api/library?user_id=abc", &[], None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_register_then_login() {
    let app = setup().await;
    let body = json!({"name": "Jane Doe", "code": "ab12"});

    let (status, created) = send(&app, Method::POST, "/api/premium/register", &[], Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["user"]["code"], "AB12");

    let again = json!({"name": "jane doe", "code": "AB12"});
    let (status, existing) = send(&app, Method::POST, "/api/premium/register", &[], Some(again)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(existing["user"]["id"], created["user"]["id"]);

    let taken = json!({"name": "Someone Else", "code": "AB12"});
    let (status, _) = send(&app, Method::POST, "/api/premium/register", &[], Some(taken)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_bulk_endpoints_reject_before_touching_data() {
    let app = setup().await;
    let before = app.store.list_premium_users().await.unwrap().len();

    let import = json!({"users": [{"name": "Bola", "code": "BO22"}]});
    let (status, _) = send(&app, Method::POST, "/api/admin/users/import", &[], Some(import.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/admin/users/import",
        &[("authorization", "Bearer forged".to_string())],
        Some(import),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(app.store.list_premium_users().await.unwrap().len(), before);

    let (status, _) = send(&app, Method::GET, "/api/admin/export", &[], None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_export_and_import() {
    let app = setup().await;
    let token = admin_token(&app).await;
    let auth = [("authorization", format!("Bearer {token}"))];

    let import = json!({"users": [
        {"name": "Bola", "code": "bo22"},
        {"name": "Ada", "code": "AD01"},
        {"name": "Chidi", "code": "bad"}
    ]});
    let (status, report) = send(&app, Method::POST, "/api/admin/users/import", &auth, Some(import)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["created"].as_array().unwrap().len(), 1);
    assert_eq!(report["skipped"], json!(["Ada"]));
    assert_eq!(report["errors"][0]["row"], 2);

    let (status, export) = send(&app, Method::GET, "/api/admin/export", &auth, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(export["premium_users"].as_array().unwrap().len(), 2);
    assert_eq!(export["fingerprint"].as_str().unwrap().len(), 16);
}

#[tokio::test]
async fn test_admin_detail_and_assignment_rules() {
    let app = setup().await;
    let token = admin_token(&app).await;
    let session = [("x-admin-session", token)];

    let (status, me) = send(&app, Method::GET, "/api/admin/me", &session, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["username"], "root");
    assert!(me.get("password_hash").is_none());

    let path = format!("/api/topics/{}", app.premium.id);
    let (status, _) = send(&app, Method::GET, &path, &session, None).await;
    assert_eq!(status, StatusCode::OK);

    let assign = format!("/api/admin/topics/{}/assignments", app.community.id);
    let (status, body) = send(&app, Method::PUT, &assign, &session, Some(json!({"user_ids": []}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INVALID_OPERATION");
}

#[tokio::test]
async fn test_text_ingestion_creates_topic() {
    let app = setup().await;
    let token = admin_token(&app).await;
    let auth = [("authorization", format!("Bearer {token}"))];

    let body = json!({
        "course": {"course_option": "new", "name": "CHEM 101", "department": "Science"},
        "topic": {"title": "Atoms", "tier": "premium"},
        "text": "Atoms are small."
    });
    let (status, topic) = send(&app, Method::POST, "/api/admin/ingest/text", &auth, Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(topic["is_premium"], true);
    let raw = topic["raw_text"].as_str().unwrap();
    assert!(raw.starts_with("[Source: Direct Text Input | Added: "));
    assert!(raw.ends_with("Atoms are small."));
}

#[tokio::test]
async fn test_hard_delete_removes_rows() {
    let app = setup().await;
    let token = admin_token(&app).await;
    let auth = [("authorization", format!("Bearer {token}"))];
    let course = app.community.course_id;

    let soft = format!("/api/admin/topics/{}", app.community.id);
    let (status, _) = send(&app, Method::DELETE, &soft, &auth, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(app.store.get_topic(app.community.id).await.unwrap().unwrap().is_deleted);

    let hard = format!("/api/admin/topics/{}?hard=true", app.community.id);
    let (status, _) = send(&app, Method::DELETE, &hard, &auth, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(app.store.get_topic(app.community.id).await.unwrap().is_none());

    let (status, _) = send(&app, Method::DELETE, &format!("/api/admin/courses/{course}?hard=true"), &[], None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&app, Method::DELETE, &format!("/api/admin/courses/{course}?hard=true"), &auth, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(app.store.get_course(course).await.unwrap().is_none());

    let detail = format!("/api/topics/{}", app.premium.id);
    let (status, _) = send(&app, Method::GET, &detail, &auth, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, Method::DELETE, &hard, &auth, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
