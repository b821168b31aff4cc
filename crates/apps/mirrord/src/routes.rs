//! REST routes over the mail service

use axum::extract::{Path, Query, State};
use axum::http::HeaderValue;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use log::{info, warn};
use mirror::query::parse_date_bound;
use mirror::{Email, EmailQuery, Folder, MailService, ManualSyncReport, OutgoingMessage, SessionStatus, ThreadId};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::ws;

pub type AppState = Arc<MailService>;

/// Run blocking service work off the async executor
pub async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/api/auth/status", get(auth_status))
        .route("/api/auth/login", get(login))
        .route("/api/auth/callback", get(callback))
        .route("/api/auth/logout", post(logout))
        .route("/api/emails", get(list_emails))
        .route("/api/emails/send", post(send_email))
        .route("/api/emails/thread/{thread_id}", get(get_thread))
        .route("/api/emails/{id}", get(get_email))
        .route("/api/emails/{id}/read", put(mark_read))
        .route("/api/emails/{id}/star", put(toggle_star))
        .route("/api/sync", post(manual_sync))
        .route("/api/ws", get(ws::ws_handler))
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

// ── Auth ──────────────────────────────────────────────────────────────────

async fn auth_status(State(service): State<AppState>) -> Json<SessionStatus> {
    Json(service.status())
}

async fn login(State(service): State<AppState>) -> Json<Value> {
    Json(json!({ "auth_url": service.begin_login() }))
}

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct CallbackResponse {
    token: String,
    email: String,
    expires_at: String,
}

async fn callback(
    State(service): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> ApiResult<Json<CallbackResponse>> {
    if let Some(error) = params.error {
        return Err(ApiError::BadRequest(format!("Authorization denied: {}", error)));
    }
    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing authorization code".to_string()))?;

    let svc = service.clone();
    let (session, token) = blocking(move || Ok(svc.complete_login(&code)?)).await?;

    // Initial sync runs in the background; the poller waits on the same guard
    tokio::task::spawn_blocking(move || {
        if let Some(report) = service.initial_sync() {
            info!(
                "Initial sync finished: {} inbox, {} sent",
                report.inbox.inserted, report.sent.inserted
            );
        }
    });

    Ok(Json(CallbackResponse {
        token: token.token,
        email: session.account_email,
        expires_at: token.expires_at.to_rfc3339(),
    }))
}

async fn logout(State(service): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    info!("Logging out {}", user.email);
    blocking(move || Ok(service.logout(&user.token)?)).await?;
    Ok(Json(json!({ "success": true })))
}

// ── Emails ────────────────────────────────────────────────────────────────

#[derive(Default, Deserialize)]
struct ListParams {
    folder: Option<String>,
    sender: Option<String>,
    keyword: Option<String>,
    unread_only: Option<bool>,
    date_from: Option<String>,
    date_to: Option<String>,
    limit: Option<usize>,
}

impl ListParams {
    fn into_query(self) -> ApiResult<EmailQuery> {
        let folder = match self.folder.as_deref() {
            None | Some("") => Folder::Inbox,
            Some(raw) => Folder::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("Unknown folder: {}", raw)))?,
        };
        let bound = |raw: Option<String>, upper: bool| -> ApiResult<_> {
            raw.filter(|r| !r.trim().is_empty())
                .map(|r| parse_date_bound(&r, upper))
                .transpose()
                .map_err(|e| ApiError::BadRequest(format!("{:#}", e)))
        };

        Ok(EmailQuery {
            folder: Some(folder),
            sender: self.sender.filter(|s| !s.is_empty()),
            keyword: self.keyword.filter(|k| !k.is_empty()),
            unread_only: self.unread_only.unwrap_or(false),
            date_from: bound(self.date_from, false)?,
            date_to: bound(self.date_to, true)?,
            limit: self.limit,
        })
    }
}

async fn list_emails(
    State(service): State<AppState>,
    _user: AuthUser,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Email>>> {
    let query = params.into_query()?;
    let emails = blocking(move || Ok(service.list_emails(&query)?)).await?;
    Ok(Json(emails))
}

async fn get_email(
    State(service): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Email>> {
    let key = id.clone();
    blocking(move || Ok(service.get_email(&key)?))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Email {} not found", id)))
}

async fn mark_read(
    State(service): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Email>> {
    let key = id.clone();
    blocking(move || Ok(service.mark_read(&key)?))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Email {} not found", id)))
}

async fn toggle_star(
    State(service): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Email>> {
    let key = id.clone();
    blocking(move || Ok(service.toggle_star(&key)?))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Email {} not found", id)))
}

#[derive(Deserialize)]
struct SendRequest {
    to: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
    reply_to_id: Option<String>,
}

#[derive(Serialize)]
struct SendResponse {
    success: bool,
    email: Email,
}

async fn send_email(
    State(service): State<AppState>,
    _user: AuthUser,
    Json(request): Json<SendRequest>,
) -> ApiResult<Json<SendResponse>> {
    if request.to.trim().is_empty() {
        return Err(ApiError::BadRequest("Recipient is required".to_string()));
    }

    let message = OutgoingMessage {
        to: request.to,
        subject: request.subject,
        body: request.body,
        ..OutgoingMessage::default()
    };
    let reply_to = request.reply_to_id;
    let outcome = blocking(move || Ok(service.send(message, reply_to.as_deref())?)).await?;

    Ok(Json(SendResponse {
        success: outcome.delivered,
        email: outcome.email,
    }))
}

async fn get_thread(
    State(service): State<AppState>,
    _user: AuthUser,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<Vec<Email>>> {
    let thread_id = ThreadId::new(thread_id);
    let emails = blocking(move || Ok(service.get_thread(&thread_id)?)).await?;
    Ok(Json(emails))
}

// ── Sync ──────────────────────────────────────────────────────────────────

async fn manual_sync(
    State(service): State<AppState>,
    _user: AuthUser,
) -> ApiResult<Json<ManualSyncReport>> {
    let report = blocking(move || Ok(service.manual_sync()?)).await?;
    Ok(Json(report))
}
