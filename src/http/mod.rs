//! Client API: proposes commands through consensus and exposes alarms and metrics.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use axum::{
    Json, Router,
    extract::{FromRequest, Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    apply::{ApplyReply, Dispatcher},
    command::{AlarmAction, AlarmRequest, Command, RaftRequest, RequestHeader},
    error::ApplyError,
    metrics::ApplyMetrics,
    raft::{
        app::RaftFacade,
        http_rpc::{RaftRpcState, build_raft_rpc_router},
        types::TypeConfig,
    },
    storage::{AlarmType, auth},
};

#[derive(Clone)]
pub struct AppState {
    member_id: u64,
    raft: Arc<dyn RaftFacade>,
    /// Local replica, read for proposer-side checks (passwords, tokens, alarms).
    dispatcher: Arc<Mutex<Dispatcher>>,
    metrics: Arc<ApplyMetrics>,
    request_ids: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(
        member_id: u64,
        raft: Arc<dyn RaftFacade>,
        dispatcher: Arc<Mutex<Dispatcher>>,
        metrics: Arc<ApplyMetrics>,
    ) -> Self {
        Self {
            member_id,
            raft,
            dispatcher,
            metrics,
            request_ids: Arc::new(AtomicU64::new(member_id << 48)),
        }
    }

    fn next_request_id(&self) -> u64 {
        self.request_ids.fetch_add(1, Ordering::Relaxed)
    }

    async fn propose(
        &self,
        header: RequestHeader,
        command: Command,
    ) -> Result<ApplyReply, ApiError> {
        if self.raft.metrics().borrow().current_leader.is_none() {
            return Err(ApiError::unavailable("no raft leader elected yet"));
        }
        self.raft
            .client_write(RaftRequest::with_header(header, command))
            .await
            .map_err(|e| ApiError::unavailable(format!("{e:#}")))
    }
}

#[derive(Debug)]
pub struct ApiError {
    code: &'static str,
    message: String,
    status: StatusCode,
}

impl ApiError {
    fn new(code: &'static str, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new("invalid_request", StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", StatusCode::UNAUTHORIZED, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new("unavailable", StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal", StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    axum::Json<T>: FromRequest<S>,
    <axum::Json<T> as FromRequest<S>>::Rejection: std::fmt::Display,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = axum::Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::invalid_request(e.to_string()))?;
        Ok(Self(value))
    }
}

/// A command plus the token it is proposed under. Without a token the proposal is anonymous.
#[derive(Debug, Deserialize)]
pub struct ProposeRequest {
    #[serde(default)]
    pub token: Option<String>,
    /// Pins the proposal to an older auth revision; never raised above the local one.
    #[serde(default)]
    pub auth_revision: Option<u64>,
    pub command: Command,
}

/// HTTP status for a reply; the body is always the reply itself.
fn reply_status(reply: &ApplyReply) -> StatusCode {
    let Some(err) = &reply.error else {
        return StatusCode::OK;
    };
    match err {
        ApplyError::NoSpace => StatusCode::INSUFFICIENT_STORAGE,
        ApplyError::Corrupt => StatusCode::SERVICE_UNAVAILABLE,
        ApplyError::PermissionDenied => StatusCode::FORBIDDEN,
        ApplyError::UserEmpty | ApplyError::AuthOldRevision { .. } | ApplyError::AuthFailed => {
            StatusCode::UNAUTHORIZED
        }
        ApplyError::KeyNotFound
        | ApplyError::LeaseNotFound { .. }
        | ApplyError::UserNotFound { .. }
        | ApplyError::RoleNotFound { .. } => StatusCode::NOT_FOUND,
        ApplyError::LeaseExists { .. }
        | ApplyError::UserAlreadyExist { .. }
        | ApplyError::RoleAlreadyExist { .. } => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn reply_response(reply: ApplyReply) -> Response {
    (reply_status(&reply), Json(reply)).into_response()
}

pub fn build_router(state: AppState, raft_rpc: Option<openraft::Raft<TypeConfig>>) -> Router {
    let api = Router::new()
        .route("/api/commands", post(propose_command))
        .route("/api/alarms", get(list_alarms))
        .route("/metrics", get(render_metrics))
        .with_state(state);

    match raft_rpc {
        Some(raft) => api.merge(build_raft_rpc_router(RaftRpcState { raft })),
        None => api,
    }
}

async fn propose_command(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ProposeRequest>,
) -> Result<Response, ApiError> {
    let (header, command) = match prepare(&state, req).await? {
        Prepared::Propose(header, command) => (header, command),
        Prepared::Reject(reply) => return Ok(reply_response(reply)),
    };
    let is_write = matches!(
        command,
        Command::Put(_) | Command::Txn(_) | Command::LeaseGrant(_)
    );

    let reply = state.propose(header, command).await?;
    if is_write && reply.error == Some(ApplyError::NoSpace) {
        raise_no_space(&state).await;
    }
    Ok(reply_response(reply))
}

enum Prepared {
    Propose(RequestHeader, Command),
    Reject(ApplyReply),
}

/// Proposer-side work that must not be replicated: identity resolution, password hashing and
/// verification, token and lease id generation.
async fn prepare(state: &AppState, req: ProposeRequest) -> Result<Prepared, ApiError> {
    let ProposeRequest {
        token,
        auth_revision,
        mut command,
    } = req;

    if matches!(command, Command::Unrecognized) || command.is_cluster_control() {
        return Err(ApiError::invalid_request(format!(
            "op {} cannot be proposed by clients",
            command.op_name()
        )));
    }

    let (username, local_revision, auth_enabled) = {
        let dispatcher = state.dispatcher.lock().await;
        let auth = &dispatcher.backend().auth;
        let username = match token.as_deref() {
            Some(token) => auth
                .token_owner(token)
                .map(str::to_string)
                .ok_or_else(|| ApiError::unauthorized("invalid auth token"))?,
            None => String::new(),
        };
        (username, auth.revision(), auth.is_enabled())
    };

    match &mut command {
        Command::AuthUserAdd(add) if !add.no_password && add.hashed_password.is_empty() => {
            add.hashed_password = hash_off_thread(std::mem::take(&mut add.password)).await?;
        }
        Command::AuthUserChangePassword(change) if change.hashed_password.is_empty() => {
            change.hashed_password =
                hash_off_thread(std::mem::take(&mut change.password)).await?;
        }
        Command::Authenticate(authn) => {
            let password = std::mem::take(&mut authn.password);
            if auth_enabled {
                let verified = {
                    let dispatcher = state.dispatcher.lock().await;
                    dispatcher
                        .backend()
                        .auth
                        .user(&authn.name)
                        .is_some_and(|user| auth::verify_password(user, &password))
                };
                if !verified {
                    info!(name = %authn.name, "authentication rejected");
                    return Ok(Prepared::Reject(ApplyReply {
                        response: None,
                        error: Some(ApplyError::AuthFailed),
                    }));
                }
            }
            authn.simple_token = format!("{}.{}", nanoid::nanoid!(16), state.next_request_id());
        }
        Command::LeaseGrant(grant) if grant.id == 0 => {
            grant.id = rand::thread_rng().gen_range(1..i64::MAX);
        }
        _ => {}
    }

    let header = RequestHeader {
        id: state.next_request_id(),
        username,
        auth_revision: auth_revision.map_or(local_revision, |r| r.min(local_revision)),
    };
    Ok(Prepared::Propose(header, command))
}

async fn hash_off_thread(password: String) -> Result<String, ApiError> {
    if password.is_empty() {
        // Left empty so the auth store rejects the command with `password_required`.
        return Ok(String::new());
    }
    tokio::task::spawn_blocking(move || auth::hash_password(&password))
        .await
        .map_err(|e| ApiError::internal(format!("hash task: {e}")))?
        .map_err(ApiError::internal)
}

async fn raise_no_space(state: &AppState) {
    let already_raised = {
        let dispatcher = state.dispatcher.lock().await;
        dispatcher
            .backend()
            .alarms
            .get(AlarmType::NoSpace)
            .iter()
            .any(|m| m.member_id == state.member_id)
    };
    if already_raised {
        return;
    }
    warn!(member_id = state.member_id, "backend quota exhausted, raising alarm");
    let header = RequestHeader {
        id: state.next_request_id(),
        ..RequestHeader::default()
    };
    let activate = Command::Alarm(AlarmRequest {
        action: AlarmAction::Activate,
        member_id: state.member_id,
        alarm: AlarmType::NoSpace,
    });
    if let Err(err) = state.propose(header, activate).await {
        warn!(error = %err.message, "failed to propose no-space alarm");
    }
}

async fn list_alarms(State(state): State<AppState>) -> Result<Response, ApiError> {
    let header = RequestHeader {
        id: state.next_request_id(),
        ..RequestHeader::default()
    };
    let get = Command::Alarm(AlarmRequest {
        action: AlarmAction::Get,
        member_id: 0,
        alarm: AlarmType::None,
    });
    let reply = state.propose(header, get).await?;
    Ok(reply_response(reply))
}

async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(),
    )
}

#[cfg(test)]
mod tests;
