use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tower::ServiceExt;

use tasklet::server::{build_router, build_state};

async fn make_app() -> (Router, NamedTempFile) {
    let db = NamedTempFile::new().unwrap();
    let state = build_state(db.path().to_str().unwrap(), "test-secret", 30)
        .await
        .unwrap();
    (build_router(state), db)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn register(app: &Router, email: &str, password: &str) -> (String, String) {
    let response = send(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "email": email, "password": password })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let token = body["token"].as_str().unwrap().to_string();
    let user_id = body["user"]["id"].as_str().unwrap().to_string();
    (token, user_id)
}

#[tokio::test]
async fn health_endpoint() {
    let (app, _db) = make_app().await;
    let response = send(&app, "GET", "/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn register_and_login_flow() {
    let (app, _db) = make_app().await;

    let response = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "email": "alice@example.com", "password": "pw123456" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert!(!body["token"].as_str().unwrap().is_empty());
    assert_eq!(body["user"]["email"], "alice@example.com");
    // The stored hash never leaves the service.
    assert!(body["user"].get("password_hash").is_none());

    let response = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "email": "alice@example.com", "password": "other" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "email": "alice@example.com", "password": "wrong" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "email": "nobody@example.com", "password": "pw123456" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "email": "alice@example.com", "password": "pw123456" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn register_rejects_empty_fields() {
    let (app, _db) = make_app().await;
    let response = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "email": "", "password": "pw123456" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn authenticated_routes_require_a_valid_token() {
    let (app, _db) = make_app().await;

    let response = send(&app, "GET", "/tasks", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(&app, "GET", "/tasks", Some("not-a-token"), None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn task_crud_flow() {
    let (app, _db) = make_app().await;
    let (token, _user_id) = register(&app, "alice@example.com", "pw123456").await;

    let response = send(
        &app,
        "POST",
        "/tasks",
        Some(&token),
        Some(json!({ "title": "Buy milk" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let task = body_json(response).await;
    let task_id = task["id"].as_str().unwrap().to_string();
    assert_eq!(task["completed"], false);
    assert_eq!(task["title"], "Buy milk");

    let response = send(
        &app,
        "PATCH",
        &format!("/tasks/{task_id}/complete?completed=true"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let task = body_json(response).await;
    assert_eq!(task["completed"], true);

    let response = send(
        &app,
        "PUT",
        &format!("/tasks/{task_id}"),
        Some(&token),
        Some(json!({ "description": "" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let task = body_json(response).await;
    assert_eq!(task["description"], "");
    assert_eq!(task["title"], "Buy milk");

    let response = send(&app, "GET", "/tasks", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let tasks = body_json(response).await;
    assert_eq!(tasks.as_array().unwrap().len(), 1);

    let response = send(
        &app,
        "DELETE",
        &format!("/tasks/{task_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Task deleted successfully");

    let response = send(
        &app,
        "GET",
        &format!("/tasks/{task_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_task_requires_a_title() {
    let (app, _db) = make_app().await;
    let (token, _user_id) = register(&app, "alice@example.com", "pw123456").await;

    let response = send(
        &app,
        "POST",
        "/tasks",
        Some(&token),
        Some(json!({ "title": "" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tasks_are_invisible_across_users() {
    let (app, _db) = make_app().await;
    let (alice_token, _alice_id) = register(&app, "alice@example.com", "pw123456").await;
    let (bob_token, _bob_id) = register(&app, "bob@example.com", "pw123456").await;

    let response = send(
        &app,
        "POST",
        "/tasks",
        Some(&alice_token),
        Some(json!({ "title": "Secret" })),
    )
    .await;
    let task = body_json(response).await;
    let task_id = task["id"].as_str().unwrap().to_string();

    // Bob sees a foreign task id exactly as a missing one.
    let response = send(
        &app,
        "GET",
        &format!("/tasks/{task_id}"),
        Some(&bob_token),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(
        &app,
        "PUT",
        &format!("/tasks/{task_id}"),
        Some(&bob_token),
        Some(json!({ "title": "Stolen" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(
        &app,
        "DELETE",
        &format!("/tasks/{task_id}"),
        Some(&bob_token),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(
        &app,
        "GET",
        &format!("/tasks/{task_id}"),
        Some(&alice_token),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let task = body_json(response).await;
    assert_eq!(task["title"], "Secret");
}

#[tokio::test]
async fn chat_turn_adds_a_task() {
    let (app, _db) = make_app().await;
    let (token, user_id) = register(&app, "alice@example.com", "pw123456").await;

    let response = send(
        &app,
        "POST",
        &format!("/users/{user_id}/chat"),
        Some(&token),
        Some(json!({ "message": "add task write report" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(
        body["response"],
        "I've added 'write report' to your todo list."
    );
    let tool_results = body["tool_results"].as_array().unwrap();
    assert_eq!(tool_results.len(), 1);
    assert_eq!(tool_results[0]["tool"], "add_task");
    assert!(!body["conversation_id"].as_str().unwrap().is_empty());

    let response = send(&app, "GET", "/tasks", Some(&token), None).await;
    let tasks = body_json(response).await;
    assert_eq!(tasks[0]["title"], "write report");
}

#[tokio::test]
async fn chat_is_denied_for_other_users() {
    let (app, _db) = make_app().await;
    let (_alice_token, alice_id) = register(&app, "alice@example.com", "pw123456").await;
    let (bob_token, _bob_id) = register(&app, "bob@example.com", "pw123456").await;

    let response = send(
        &app,
        "POST",
        &format!("/users/{alice_id}/chat"),
        Some(&bob_token),
        Some(json!({ "message": "what are my tasks" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(
        &app,
        "POST",
        &format!("/users/{alice_id}/chat"),
        None,
        Some(json!({ "message": "what are my tasks" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
