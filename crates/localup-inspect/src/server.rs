//! HTTP query API for the local dashboard using Axum

use crate::classify::ClassificationResult;
use crate::exchange::{ExchangeView, LogSummary, PostField, RequestView, ResponseView};
use crate::replay::ReplayRequest;
use crate::service::{InspectorService, InspectorServiceError};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use problem_details::ProblemDetails;
use serde::Deserialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info};
use utoipa::OpenApi;

/// Convert service errors to Problem Details responses
fn service_error_to_problem(error: InspectorServiceError) -> impl IntoResponse {
    let (status, title, detail) = match &error {
        InspectorServiceError::ExchangeNotFound(id) => (
            StatusCode::NOT_FOUND,
            "Exchange Not Found",
            format!("Exchange with ID '{}' was not found", id),
        ),
        InspectorServiceError::ReplayFailed(msg) => (
            StatusCode::BAD_GATEWAY,
            "Replay Failed",
            format!("Failed to replay request: {}", msg),
        ),
        InspectorServiceError::InvalidRequest(msg) => {
            (StatusCode::BAD_REQUEST, "Invalid Request", msg.clone())
        }
        InspectorServiceError::Storage(e) => {
            error!("Query API storage failure: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Storage Error",
                e.to_string(),
            )
        }
    };

    let problem = ProblemDetails::new()
        .with_status(status)
        .with_title(title)
        .with_detail(detail);

    (status, Json(problem))
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        handle_list_logs,
        handle_search_logs,
        handle_get_log,
        handle_clear_logs,
        handle_receive_log,
        handle_replay_by_id,
        handle_replay_modified,
    ),
    components(
        schemas(
            ExchangeView,
            RequestView,
            ResponseView,
            PostField,
            LogSummary,
            ClassificationResult,
            ReplayRequest,
        )
    ),
    tags(
        (name = "inspector", description = "Captured request inspection and replay")
    ),
    info(
        title = "Localup Inspector API",
        version = "1.0.0",
        description = "API for browsing, searching and replaying tunneled HTTP exchanges"
    )
)]
pub struct ApiDoc;

/// Query API server
pub struct InspectorServer {
    addr: SocketAddr,
    service: InspectorService,
}

impl InspectorServer {
    pub fn new(addr: SocketAddr, service: InspectorService) -> Self {
        Self { addr, service }
    }

    /// Bind the configured address and serve until the task is dropped
    pub async fn run(self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(&self.addr).await?;
        serve(listener, self.service).await
    }
}

/// Serve the query API on an already bound listener
pub async fn serve(listener: TcpListener, service: InspectorService) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    info!("Inspector API listening on http://{}", addr);
    info!("   Logs:    http://{}/api/logs", addr);
    info!("   OpenAPI: http://{}/api-docs/openapi.json", addr);
    info!("   Live:    ws://{}/socket", addr);

    axum::serve(listener, router(service)).await
}

/// Build the query API router
pub fn router(service: InspectorService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/api/logs",
            get(handle_list_logs)
                .delete(handle_clear_logs)
                .post(handle_receive_log),
        )
        .route("/api/logs/search", get(handle_search_logs))
        .route("/api/logs/{id}", get(handle_get_log))
        .route("/api/replay", post(handle_replay_modified))
        .route("/api/replay/{id}", post(handle_replay_by_id))
        .route("/api-docs/openapi.json", get(handle_openapi))
        .route("/socket", get(handle_socket))
        .layer(cors)
        .with_state(service)
}

#[derive(Debug, Deserialize)]
struct ListParams {
    with_responses: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    term: String,
}

async fn handle_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// List captured exchanges
#[utoipa::path(
    get,
    path = "/api/logs",
    tag = "inspector",
    summary = "List captured exchanges",
    description = "Returns every stored exchange, newest first",
    params(
        ("with_responses" = Option<bool>, Query, description = "Include responses (default: true)")
    ),
    responses(
        (status = 200, description = "Stored exchanges", body = Vec<ExchangeView>),
        (status = 500, description = "Storage failure")
    )
)]
async fn handle_list_logs(
    State(service): State<InspectorService>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ExchangeView>>, impl IntoResponse> {
    match service
        .list_exchanges(params.with_responses.unwrap_or(true))
        .await
    {
        Ok(exchanges) => Ok(Json(exchanges)),
        Err(e) => Err(service_error_to_problem(e)),
    }
}

/// Search captured exchanges
#[utoipa::path(
    get,
    path = "/api/logs/search",
    tag = "inspector",
    summary = "Search captured exchanges",
    description = "Matches the term against URIs and classifications, and against response bodies of text-like requests",
    params(
        ("term" = String, Query, description = "Substring to look for")
    ),
    responses(
        (status = 200, description = "Matching summaries", body = Vec<LogSummary>),
        (status = 500, description = "Storage failure")
    )
)]
async fn handle_search_logs(
    State(service): State<InspectorService>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<LogSummary>>, impl IntoResponse> {
    match service.search(&params.term).await {
        Ok(summaries) => Ok(Json(summaries)),
        Err(e) => Err(service_error_to_problem(e)),
    }
}

/// Get one exchange
#[utoipa::path(
    get,
    path = "/api/logs/{id}",
    tag = "inspector",
    summary = "Get exchange by ID",
    params(
        ("id" = String, Path, description = "Correlation id")
    ),
    responses(
        (status = 200, description = "Exchange found", body = ExchangeView),
        (status = 404, description = "Exchange not found")
    )
)]
async fn handle_get_log(
    State(service): State<InspectorService>,
    Path(id): Path<String>,
) -> Result<Json<ExchangeView>, impl IntoResponse> {
    match service.get_exchange(&id).await {
        Ok(view) => Ok(Json(view)),
        Err(e) => Err(service_error_to_problem(e)),
    }
}

/// Clear all exchanges
#[utoipa::path(
    delete,
    path = "/api/logs",
    tag = "inspector",
    summary = "Clear all exchanges",
    responses(
        (status = 200, description = "Store cleared"),
        (status = 500, description = "Storage failure")
    )
)]
async fn handle_clear_logs(
    State(service): State<InspectorService>,
) -> Result<StatusCode, impl IntoResponse> {
    match service.clear().await {
        Ok(()) => Ok(StatusCode::OK),
        Err(e) => Err(service_error_to_problem(e)),
    }
}

/// Accept a pushed summary
#[utoipa::path(
    post,
    path = "/api/logs",
    tag = "inspector",
    summary = "Receive a pushed exchange summary",
    request_body = LogSummary,
    responses(
        (status = 200, description = "Summary accepted")
    )
)]
async fn handle_receive_log(
    State(service): State<InspectorService>,
    Json(summary): Json<LogSummary>,
) -> StatusCode {
    service.receive_log(summary);
    StatusCode::OK
}

/// Live feed of pushed summaries for the dashboard
async fn handle_socket(
    State(service): State<InspectorService>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Subscribe before the upgrade completes so no update is missed
    let updates = service.subscribe();
    ws.on_upgrade(move |socket| stream_updates(socket, updates))
}

async fn stream_updates(mut socket: WebSocket, mut updates: broadcast::Receiver<LogSummary>) {
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(summary) => {
                    let json = match serde_json::to_string(&summary) {
                        Ok(json) => json,
                        Err(e) => {
                            debug!("Failed to encode summary {}: {}", summary.id, e);
                            continue;
                        }
                    };
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Dashboard socket lagged, skipped {} updates", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("Dashboard socket closed");
}

/// Replay a stored exchange
#[utoipa::path(
    post,
    path = "/api/replay/{id}",
    tag = "inspector",
    summary = "Replay an exchange",
    description = "Re-sends the stored request to the local target under a new correlation id",
    params(
        ("id" = String, Path, description = "Correlation id")
    ),
    responses(
        (status = 200, description = "Request replayed"),
        (status = 404, description = "Exchange not found"),
        (status = 502, description = "Local target unreachable")
    )
)]
async fn handle_replay_by_id(
    State(service): State<InspectorService>,
    Path(id): Path<String>,
) -> Result<StatusCode, impl IntoResponse> {
    match service.replay(&id).await {
        Ok(()) => Ok(StatusCode::OK),
        Err(e) => Err(service_error_to_problem(e)),
    }
}

/// Replay an edited request
#[utoipa::path(
    post,
    path = "/api/replay",
    tag = "inspector",
    summary = "Replay an edited request",
    description = "Builds a request from the given fields and sends it to the local target as new traffic",
    request_body = ReplayRequest,
    responses(
        (status = 200, description = "Request replayed"),
        (status = 400, description = "Invalid request parameters"),
        (status = 502, description = "Local target unreachable")
    )
)]
async fn handle_replay_modified(
    State(service): State<InspectorService>,
    Json(request): Json<ReplayRequest>,
) -> Result<StatusCode, impl IntoResponse> {
    match service.replay_modified(request).await {
        Ok(()) => Ok(StatusCode::OK),
        Err(e) => Err(service_error_to_problem(e)),
    }
}
