use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::agent::{TodoAssistant, ToolResult};
use crate::auth::{hash_password, verify_password, TokenService};
use crate::conversations::ConversationStore;
use crate::error::{Result, TaskletError};
use crate::tasks::{TaskPatch, TaskStore};
use crate::users::{User, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserStore>,
    pub tasks: Arc<TaskStore>,
    pub assistant: Arc<TodoAssistant>,
    pub tokens: TokenService,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Deserialize)]
struct CredentialsRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct AuthResponse {
    success: bool,
    user: User,
    token: String,
}

#[derive(Deserialize)]
struct CreateTaskRequest {
    title: String,
    description: Option<String>,
}

#[derive(Deserialize)]
struct CompleteQuery {
    completed: bool,
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
    tool_results: Vec<ToolResult>,
    conversation_id: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/tasks", get(list_tasks).post(create_task))
        .route(
            "/tasks/:task_id",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/tasks/:task_id/complete", patch(toggle_completion))
        .route("/users/:user_id/chat", post(chat))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<CredentialsRequest>,
) -> Response {
    if payload.email.is_empty() || payload.password.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Email and password are required");
    }

    match state.users.find_by_email(&payload.email).await {
        Ok(Some(_)) => return error_response(StatusCode::BAD_REQUEST, "Email already registered"),
        Ok(None) => {}
        Err(err) => return internal_error(err),
    }

    let password_hash = match hash_password(&payload.password) {
        Ok(hash) => hash,
        Err(err) => return internal_error(err),
    };
    let user = match state.users.create(&payload.email, &password_hash).await {
        Ok(user) => user,
        Err(err) => return internal_error(err),
    };

    issue_auth_response(&state, user)
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<CredentialsRequest>,
) -> Response {
    // A missing user and a bad password are reported identically.
    let user = match state.users.find_by_email(&payload.email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return error_response(StatusCode::UNAUTHORIZED, "Incorrect email or password")
        }
        Err(err) => return internal_error(err),
    };

    if !verify_password(&payload.password, &user.password_hash) {
        return error_response(StatusCode::UNAUTHORIZED, "Incorrect email or password");
    }

    issue_auth_response(&state, user)
}

fn issue_auth_response(state: &AppState, user: User) -> Response {
    match state.tokens.issue(&user.id) {
        Ok(token) => (
            StatusCode::OK,
            Json(AuthResponse {
                success: true,
                user,
                token,
            }),
        )
            .into_response(),
        Err(err) => internal_error(err),
    }
}

async fn list_tasks(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let owner_id = match authorize(&state, &headers) {
        Ok(owner_id) => owner_id,
        Err(err) => return err.into_response(),
    };

    match state.tasks.list(&owner_id).await {
        Ok(tasks) => (StatusCode::OK, Json(tasks)).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateTaskRequest>,
) -> Response {
    let owner_id = match authorize(&state, &headers) {
        Ok(owner_id) => owner_id,
        Err(err) => return err.into_response(),
    };

    if payload.title.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Title is required");
    }

    match state
        .tasks
        .create(&owner_id, &payload.title, payload.description.as_deref())
        .await
    {
        Ok(task) => (StatusCode::OK, Json(task)).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn get_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Response {
    let owner_id = match authorize(&state, &headers) {
        Ok(owner_id) => owner_id,
        Err(err) => return err.into_response(),
    };

    match state.tasks.get(&owner_id, &task_id).await {
        Ok(Some(task)) => (StatusCode::OK, Json(task)).into_response(),
        Ok(None) => not_found(),
        Err(err) => internal_error(err),
    }
}

async fn update_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> Response {
    let owner_id = match authorize(&state, &headers) {
        Ok(owner_id) => owner_id,
        Err(err) => return err.into_response(),
    };

    match state.tasks.update(&owner_id, &task_id, patch).await {
        Ok(Some(task)) => (StatusCode::OK, Json(task)).into_response(),
        Ok(None) => not_found(),
        Err(err) => internal_error(err),
    }
}

async fn delete_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Response {
    let owner_id = match authorize(&state, &headers) {
        Ok(owner_id) => owner_id,
        Err(err) => return err.into_response(),
    };

    match state.tasks.delete(&owner_id, &task_id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({ "message": "Task deleted successfully" })),
        )
            .into_response(),
        Ok(false) => not_found(),
        Err(err) => internal_error(err),
    }
}

async fn toggle_completion(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    Query(query): Query<CompleteQuery>,
) -> Response {
    let owner_id = match authorize(&state, &headers) {
        Ok(owner_id) => owner_id,
        Err(err) => return err.into_response(),
    };

    match state
        .tasks
        .set_completed(&owner_id, &task_id, query.completed)
        .await
    {
        Ok(Some(task)) => (StatusCode::OK, Json(task)).into_response(),
        Ok(None) => not_found(),
        Err(err) => internal_error(err),
    }
}

async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Json(payload): Json<ChatRequest>,
) -> Response {
    let caller_id = match authorize(&state, &headers) {
        Ok(caller_id) => caller_id,
        Err(err) => return err.into_response(),
    };

    if caller_id != user_id {
        return error_response(
            StatusCode::FORBIDDEN,
            "Not authorized to access this user's chat",
        );
    }

    match state.assistant.process_message(&user_id, &payload.message).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(ChatResponse {
                response: outcome.response,
                tool_results: outcome.tool_results,
                conversation_id: outcome.conversation_id,
            }),
        )
            .into_response(),
        Err(err) => {
            tracing::error!("chat turn failed: {err}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "An error occurred while processing your message",
            )
        }
    }
}

fn authorize(
    state: &AppState,
    headers: &HeaderMap,
) -> std::result::Result<String, (StatusCode, Json<ErrorResponse>)> {
    let header = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let bearer = header.strip_prefix("Bearer ").unwrap_or("");

    state.tokens.verify(bearer).map_err(|_| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Unauthorized".to_string(),
            }),
        )
    })
}

fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "Task not found")
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn internal_error(err: TaskletError) -> Response {
    tracing::error!("request failed: {err}");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

pub async fn run(
    host: &str,
    port: u16,
    db_path: &str,
    token_secret: &str,
    token_ttl_minutes: i64,
) -> Result<()> {
    run_with_shutdown(
        host,
        port,
        db_path,
        token_secret,
        token_ttl_minutes,
        futures::future::pending::<()>(),
    )
    .await
}

pub async fn run_with_shutdown<F>(
    host: &str,
    port: u16,
    db_path: &str,
    token_secret: &str,
    token_ttl_minutes: i64,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = build_state(db_path, token_secret, token_ttl_minutes).await?;
    let app = build_router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TaskletError::Runtime(e.to_string()))?;
    tracing::info!("listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| TaskletError::Runtime(e.to_string()))?;

    Ok(())
}

pub async fn build_state(
    db_path: &str,
    token_secret: &str,
    token_ttl_minutes: i64,
) -> Result<AppState> {
    let users = Arc::new(UserStore::new(db_path).await?);
    let tasks = Arc::new(TaskStore::new(db_path).await?);
    let conversations = Arc::new(ConversationStore::new(db_path).await?);
    let assistant = Arc::new(TodoAssistant::new(tasks.clone(), conversations.clone()));
    let tokens = TokenService::new(token_secret, token_ttl_minutes);

    Ok(AppState {
        users,
        tasks,
        assistant,
        tokens,
    })
}
