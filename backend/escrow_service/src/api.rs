//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use escrow_protocol::{ProtocolVersion, TokenId};
use serde::{Deserialize, Serialize};

use crate::errors::{ErrorKind, ServiceError};
use crate::project::ProjectView;
use crate::service::{CreateProgress, CreateProjectRequest, EscrowService, ProjectFilters};

#[derive(Clone)]
pub struct ApiState {
    pub service: EscrowService,
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub version: Option<ProtocolVersion>,
    pub token_id: Option<TokenId>,
}

/// Signed amount: contributions are positive, refunds negative.
#[derive(Debug, Deserialize)]
pub struct ContributeBody {
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct AmountBody {
    pub amount: u64,
}

#[derive(Debug, Deserialize)]
pub struct RebalanceBody {
    pub delta: i64,
}

#[derive(Serialize)]
pub struct ProjectsResponse {
    pub count: usize,
    pub projects: Vec<ProjectView>,
}

#[derive(Serialize)]
pub struct SubmittedResponse {
    pub token_id: TokenId,
    pub tx_id: String,
}

#[derive(Serialize)]
pub struct CreateResponse {
    pub events: Vec<CreateProgress>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::BoxReserved | ErrorKind::LikelyDoubleSpend => StatusCode::CONFLICT,
        ErrorKind::PreconditionFailed | ErrorKind::InfeasibleSize | ErrorKind::InsufficientFunds => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorKind::MalformedRegister
        | ErrorKind::UnsupportedVersion
        | ErrorKind::InvalidAddress
        | ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Network | ErrorKind::Wallet | ErrorKind::UserRejected | ErrorKind::Compilation => {
            StatusCode::BAD_GATEWAY
        }
        ErrorKind::Config => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, kind: ErrorKind, error: String) -> Response {
    (status, Json(serde_json::json!(ErrorResponse { error, kind }))).into_response()
}

fn service_error(e: ServiceError) -> Response {
    let kind = e.kind();
    error_response(status_for(kind), kind, e.to_string())
}

fn parse_token(raw: &str) -> Result<TokenId, Response> {
    raw.parse::<TokenId>().map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            ErrorKind::BadRequest,
            format!("invalid token id: {e}"),
        )
    })
}

fn submitted(token_id: TokenId, result: crate::errors::Result<String>) -> Response {
    match result {
        Ok(tx_id) => (
            StatusCode::OK,
            Json(serde_json::json!(SubmittedResponse { token_id, tx_id })),
        )
            .into_response(),
        Err(e) => service_error(e),
    }
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /projects`
pub async fn list_projects(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    let filters = ProjectFilters {
        versions: query.version.map(|v| vec![v]),
        token_id: query.token_id,
    };
    let listed = async {
        let now = state.service.chain_time().await?;
        let projects = state.service.list_projects(&filters).await?;
        Ok::<_, ServiceError>(projects.iter().map(|p| p.view(&now)).collect::<Vec<_>>())
    };
    match listed.await {
        Ok(projects) => (
            StatusCode::OK,
            Json(serde_json::json!(ProjectsResponse {
                count: projects.len(),
                projects,
            })),
        )
            .into_response(),
        Err(e) => service_error(e),
    }
}

/// `GET /projects/:token_id`
pub async fn get_project(
    State(state): State<Arc<ApiState>>,
    Path(token_id): Path<String>,
) -> Response {
    let token_id = match parse_token(&token_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let found = async {
        let now = state.service.chain_time().await?;
        let project = state.service.project(&token_id).await?;
        Ok::<_, ServiceError>(project.view(&now))
    };
    match found.await {
        Ok(view) => (StatusCode::OK, Json(serde_json::json!(view))).into_response(),
        Err(e) => service_error(e),
    }
}

/// `POST /content/validate`
///
/// Size report for a draft project; a report with `is_valid: false` is
/// still a 200.
pub async fn validate_content(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateProjectRequest>,
) -> Response {
    match state.service.validate_content(&req).await {
        Ok(report) => (StatusCode::OK, Json(serde_json::json!(report))).into_response(),
        Err(e) => service_error(e),
    }
}

/// `POST /projects`
///
/// Runs creation to completion and returns every progress event.
pub async fn create_project(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateProjectRequest>,
) -> Response {
    let mut rx = state.service.create_project(req);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    let status = match events.last() {
        Some(CreateProgress::Submitted { .. }) => StatusCode::CREATED,
        Some(CreateProgress::Failed { kind, .. }) => status_for(*kind),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!(CreateResponse { events }))).into_response()
}

/// `POST /projects/:token_id/contribute`
pub async fn contribute(
    State(state): State<Arc<ApiState>>,
    Path(token_id): Path<String>,
    Json(body): Json<ContributeBody>,
) -> Response {
    match parse_token(&token_id) {
        Ok(id) => submitted(id, state.service.contribute(&id, body.amount).await),
        Err(resp) => resp,
    }
}

/// `POST /projects/:token_id/refund`
pub async fn refund(
    State(state): State<Arc<ApiState>>,
    Path(token_id): Path<String>,
    Json(body): Json<AmountBody>,
) -> Response {
    match parse_token(&token_id) {
        Ok(id) => submitted(id, state.service.refund(&id, body.amount).await),
        Err(resp) => resp,
    }
}

/// `POST /projects/:token_id/withdraw`
pub async fn withdraw(
    State(state): State<Arc<ApiState>>,
    Path(token_id): Path<String>,
    Json(body): Json<AmountBody>,
) -> Response {
    match parse_token(&token_id) {
        Ok(id) => submitted(id, state.service.withdraw(&id, body.amount).await),
        Err(resp) => resp,
    }
}

/// `POST /projects/:token_id/rebalance`
pub async fn rebalance(
    State(state): State<Arc<ApiState>>,
    Path(token_id): Path<String>,
    Json(body): Json<RebalanceBody>,
) -> Response {
    match parse_token(&token_id) {
        Ok(id) => submitted(id, state.service.rebalance(&id, body.delta).await),
        Err(resp) => resp,
    }
}

/// `POST /projects/:token_id/exchange`
pub async fn exchange(
    State(state): State<Arc<ApiState>>,
    Path(token_id): Path<String>,
    Json(body): Json<AmountBody>,
) -> Response {
    match parse_token(&token_id) {
        Ok(id) => submitted(id, state.service.exchange(&id, body.amount).await),
        Err(resp) => resp,
    }
}

/// `POST /projects/:token_id/withdraw-unsold`
pub async fn withdraw_unsold(
    State(state): State<Arc<ApiState>>,
    Path(token_id): Path<String>,
    Json(body): Json<AmountBody>,
) -> Response {
    match parse_token(&token_id) {
        Ok(id) => submitted(id, state.service.withdraw_unsold(&id, body.amount).await),
        Err(resp) => resp,
    }
}
