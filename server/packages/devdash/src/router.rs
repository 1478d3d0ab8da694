use std::collections::BTreeMap;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{Request, StatusCode};
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use base64::Engine;
use futures::{Stream, StreamExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::Span;
use utoipa::{Modify, OpenApi, ToSchema};

use devdash_error::{DashboardError, ErrorType, ProblemDetails};

use crate::command_validator;
use crate::config::{DashboardConfig, DEFAULT_PORT};
use crate::events::{
    AppStats, Channel, DashboardEvent, EventBroadcaster, LogEvent, StatsEvent, StatusEvent,
    Subscription,
};
use crate::format_timestamp;
use crate::port_allocator::{
    AllocationResult, KillOutcome, PortAllocation, PortAllocator, PortAssignment, PortConflict,
    PortProcess, PortRange, PortStatus,
};
use crate::process_manager::{
    LogLine, LogStream, ProcessInfo, ProcessManager, ProcessStats, ProcessStatus,
};
use crate::settings::{FavoritesSortMode, Settings, SettingsStore};
use crate::terminal::{self, TerminalConnectQuery, TerminalMessage};
use crate::terminal_sessions::{SessionInfo, TerminalManager};

const SERVER_INFO: &str = "devdash: local developer dashboard. See /openapi.json for the API.";
const DEFAULT_SESSION_LIST_LIMIT: usize = 20;

/// Every component of a running dashboard, shared by the HTTP handlers and
/// the background tasks.
#[derive(Debug)]
pub struct AppState {
    config: DashboardConfig,
    events: Arc<EventBroadcaster>,
    processes: Arc<ProcessManager>,
    ports: Arc<PortAllocator>,
    settings: Arc<SettingsStore>,
    terminals: Arc<TerminalManager>,
    shutdown: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl AppState {
    /// Build every component, loading persisted settings and sessions from the data directory.
    pub async fn open(config: DashboardConfig) -> Arc<Self> {
        let events = EventBroadcaster::new(config.events.clone());
        let processes = Arc::new(ProcessManager::new(
            config.processes.clone(),
            events.clone(),
        ));
        let ports = Arc::new(PortAllocator::new(config.ports.clone()));
        let settings = Arc::new(SettingsStore::open(config.settings_path()).await);
        let terminals = TerminalManager::open(config.terminals.clone(), config.sessions_path()).await;
        Arc::new(Self {
            config,
            events,
            processes,
            ports,
            settings,
            terminals,
            shutdown: CancellationToken::new(),
            background: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBroadcaster> {
        &self.events
    }

    pub fn processes(&self) -> &Arc<ProcessManager> {
        &self.processes
    }

    pub fn ports(&self) -> &Arc<PortAllocator> {
        &self.ports
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn terminals(&self) -> &Arc<TerminalManager> {
        &self.terminals
    }

    /// Cancelled when the dashboard begins shutting down; long-lived streams end on it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start the heartbeat sweeper, the session saver and the stats publisher.
    pub fn spawn_background(self: &Arc<Self>) {
        let handles = vec![
            self.events.spawn_sweeper(self.shutdown.clone()),
            self.terminals.spawn_saver(self.shutdown.clone()),
            self.spawn_stats_publisher(),
        ];
        if let Ok(mut background) = self.background.lock() {
            background.extend(handles);
        }
    }

    fn spawn_stats_publisher(&self) -> JoinHandle<()> {
        let events = self.events.clone();
        let processes = self.processes.clone();
        let shutdown = self.shutdown.clone();
        let period = self.config.stats_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if events.observer_count(Channel::Stats) == 0 {
                    continue;
                }
                let apps = processes.running_stats().await;
                events.broadcast(&DashboardEvent::Stats(StatsEvent {
                    apps,
                    timestamp: format_timestamp(),
                }));
            }
        })
    }

    /// Stop background work, every running app and every live terminal.
    ///
    /// Terminal records stay active on disk so the sessions are recovered on
    /// the next start.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = self
            .background
            .lock()
            .map(|mut background| background.drain(..).collect())
            .unwrap_or_default();
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "background task failed");
            }
        }
        self.processes.shutdown_all().await;
        self.terminals.shutdown().await;
        tracing::info!("dashboard shut down");
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let v1_router = Router::new()
        .route("/health", get(get_health))
        .route("/apps", get(list_apps))
        .route("/apps/:app_id", get(get_app).delete(delete_app))
        .route("/apps/:app_id/start", post(start_app))
        .route("/apps/:app_id/stop", post(stop_app))
        .route("/apps/:app_id/restart", post(restart_app))
        .route("/apps/:app_id/logs", get(get_app_logs))
        .route("/apps/:app_id/stats", get(get_app_stats))
        .route("/events/sse", get(get_events_sse))
        .route("/stats/sse", get(get_stats_sse))
        .route("/commands/validate", post(validate_command))
        .route("/ports/scan", get(scan_ports))
        .route("/ports/allocate", post(allocate_port))
        .route("/ports/configure", post(configure_ports))
        .route("/ports/allocations", get(list_allocations))
        .route(
            "/ports/allocations/:app_id",
            axum::routing::delete(release_allocation),
        )
        .route("/ports/:port", get(check_port))
        .route("/ports/:port/kill", post(kill_port))
        .route("/settings", get(get_settings))
        .route("/settings/favorites", put(reorder_favorites))
        .route("/settings/favorites/:app_id", post(toggle_favorite))
        .route("/settings/archived/:app_id", put(set_archived))
        .route("/settings/ports/:app_id", put(set_custom_port))
        .route("/settings/names/:app_id", put(set_custom_name))
        .route("/settings/sort-mode", put(set_sort_mode))
        .route("/terminals", get(list_terminals))
        .route(
            "/terminals/:session_id",
            get(get_terminal).delete(close_terminal),
        )
        .route("/terminals/:session_id/input", post(terminal_input))
        .route("/terminals/:session_id/resize", post(terminal_resize))
        .route("/terminals/:session_id/ws", get(terminal::terminal_ws_handler))
        .with_state(state);

    let mut router = Router::new()
        .route("/openapi.json", get(get_openapi))
        .nest("/v1", v1_router)
        .fallback(not_found);

    let http_logging = match std::env::var("DEVDASH_LOG_HTTP") {
        Ok(value) if value == "0" || value.eq_ignore_ascii_case("false") => false,
        _ => true,
    };
    if http_logging {
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|req: &Request<_>| {
                tracing::info_span!("http.request", method = %req.method(), uri = %req.uri())
            })
            .on_request(|_req: &Request<_>, span: &Span| {
                tracing::info!(parent: span, "request");
            })
            .on_response(|res: &Response<_>, latency: Duration, span: &Span| {
                tracing::info!(
                    parent: span,
                    status = %res.status(),
                    latency_ms = latency.as_millis()
                );
            });
        router = router.layer(trace_layer);
    }

    router
}

#[derive(OpenApi)]
#[openapi(
    paths(
        get_health,
        list_apps,
        get_app,
        delete_app,
        start_app,
        stop_app,
        restart_app,
        get_app_logs,
        get_app_stats,
        get_events_sse,
        get_stats_sse,
        validate_command,
        check_port,
        kill_port,
        scan_ports,
        allocate_port,
        configure_ports,
        list_allocations,
        release_allocation,
        get_settings,
        toggle_favorite,
        reorder_favorites,
        set_archived,
        set_custom_port,
        set_custom_name,
        set_sort_mode,
        list_terminals,
        get_terminal,
        close_terminal,
        terminal_input,
        terminal_resize,
        terminal::terminal_ws_handler
    ),
    components(
        schemas(
            HealthResponse,
            AppListResponse,
            StartAppRequest,
            LogsResponse,
            LogLine,
            LogStream,
            ProcessInfo,
            ProcessStatus,
            ProcessStats,
            StatusEvent,
            LogEvent,
            StatsEvent,
            AppStats,
            ValidateCommandRequest,
            ValidateCommandResponse,
            PortStatus,
            PortProcess,
            PortConflict,
            PortAllocation,
            PortAssignment,
            PortRange,
            AllocationResult,
            KillOutcome,
            PortScanResponse,
            AllocatePortRequest,
            ConfigurePortsRequest,
            ConfigurePortsResponse,
            AllocationListResponse,
            ReleaseAllocationResponse,
            Settings,
            FavoritesSortMode,
            FavoriteToggleResponse,
            ReorderFavoritesRequest,
            SetArchivedRequest,
            SetCustomPortRequest,
            SetCustomNameRequest,
            SetSortModeRequest,
            SessionInfo,
            SessionListResponse,
            CloseTerminalResponse,
            TerminalInputEncoding,
            TerminalInputRequest,
            TerminalResizeRequest,
            TerminalDeliveryResponse,
            TerminalConnectQuery,
            TerminalMessage,
            ProblemDetails,
            ErrorType
        )
    ),
    tags(
        (name = "meta", description = "Service metadata"),
        (name = "apps", description = "App process supervision"),
        (name = "events", description = "Server-sent event streams"),
        (name = "ports", description = "Port allocation and inspection"),
        (name = "settings", description = "Dashboard preferences"),
        (name = "terminals", description = "Interactive terminal sessions")
    ),
    modifiers(&ServerAddon)
)]
pub struct ApiDoc;

struct ServerAddon;

impl Modify for ServerAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        openapi.servers = Some(vec![utoipa::openapi::Server::new(format!(
            "http://localhost:{DEFAULT_PORT}"
        ))]);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Dashboard(#[from] DashboardError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let problem: ProblemDetails = match &self {
            ApiError::Dashboard(err) => err.to_problem_details(),
        };
        let status =
            StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(problem)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppListResponse {
    pub apps: Vec<ProcessInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartAppRequest {
    /// Project directory the command runs in.
    pub cwd: String,
    pub command: String,
    /// Preferred port; falls back to the app's custom port setting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogsQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogsResponse {
    pub app_id: String,
    pub lines: Vec<LogLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCommandRequest {
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCommandResponse {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProblemDetails>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortScanQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortScanResponse {
    pub ports: Vec<PortStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AllocatePortRequest {
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurePortsRequest {
    pub app_ids: Vec<String>,
    /// Range to assign from; defaults to the configured range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<PortRange>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurePortsResponse {
    pub assignments: Vec<PortAssignment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AllocationListResponse {
    pub allocations: Vec<PortAllocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseAllocationResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released: Option<PortAllocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteToggleResponse {
    pub app_id: String,
    pub favorite: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReorderFavoritesRequest {
    pub order: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetArchivedRequest {
    pub archived: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetCustomPortRequest {
    /// `null` clears the custom port.
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetCustomNameRequest {
    /// `null` or blank clears the custom name.
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetSortModeRequest {
    pub mode: FavoritesSortMode,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionListQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionListResponse {
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloseTerminalResponse {
    pub closed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TerminalInputEncoding {
    #[default]
    Utf8,
    Base64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TerminalInputRequest {
    pub data: String,
    #[serde(default)]
    pub encoding: TerminalInputEncoding,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TerminalResizeRequest {
    pub cols: u16,
    pub rows: u16,
}

/// Whether the request reached a live session. Unknown sessions are not an error.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TerminalDeliveryResponse {
    pub delivered: bool,
}

async fn not_found() -> (StatusCode, String) {
    (
        StatusCode::NOT_FOUND,
        format!("404 Not Found\n\n{SERVER_INFO}"),
    )
}

async fn get_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(
    get,
    path = "/v1/health",
    responses((status = 200, description = "Server is healthy", body = HealthResponse)),
    tag = "meta"
)]
/// Health Check
///
/// Returns the server health status.
async fn get_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/v1/apps",
    responses((status = 200, description = "Known apps", body = AppListResponse)),
    tag = "apps"
)]
/// List Apps
///
/// Every app the dashboard has started in this run, sorted by id.
async fn list_apps(State(state): State<Arc<AppState>>) -> Json<AppListResponse> {
    Json(AppListResponse {
        apps: state.processes.list().await,
    })
}

#[utoipa::path(
    get,
    path = "/v1/apps/{app_id}",
    params(("app_id" = String, Path, description = "App id")),
    responses(
        (status = 200, description = "App state", body = ProcessInfo),
        (status = 404, description = "Unknown app", body = ProblemDetails)
    ),
    tag = "apps"
)]
/// Get App
async fn get_app(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
) -> Result<Json<ProcessInfo>, ApiError> {
    let info = state
        .processes
        .get(&app_id)
        .await
        .ok_or(DashboardError::AppNotFound { app_id })?;
    Ok(Json(info))
}

#[utoipa::path(
    delete,
    path = "/v1/apps/{app_id}",
    params(("app_id" = String, Path, description = "App id")),
    responses((status = 204, description = "App stopped and forgotten")),
    tag = "apps"
)]
/// Remove App
///
/// Stops the app if it is running, drops its logs and releases its port.
async fn delete_app(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
) -> StatusCode {
    state.processes.remove(&app_id).await;
    state.ports.release(&app_id).await;
    StatusCode::NO_CONTENT
}

#[utoipa::path(
    post,
    path = "/v1/apps/{app_id}/start",
    params(("app_id" = String, Path, description = "App id")),
    request_body = StartAppRequest,
    responses(
        (status = 200, description = "App launched", body = ProcessInfo),
        (status = 400, description = "Command rejected", body = ProblemDetails),
        (status = 409, description = "Already running or port conflict", body = ProblemDetails),
        (status = 500, description = "Spawn failure", body = ProblemDetails)
    ),
    tag = "apps"
)]
/// Start App
///
/// Validates the command, allocates a port (request body, then the app's
/// custom port, then the configured range) and launches the command with
/// `PORT` set. A taken preferred port is reported as a conflict carrying the
/// occupying process and a suggested alternative.
async fn start_app(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    Json(request): Json<StartAppRequest>,
) -> Result<Json<ProcessInfo>, ApiError> {
    if state.processes.status(&app_id).await.is_active() {
        return Err(DashboardError::AlreadyRunning { app_id }.into());
    }
    command_validator::validate(&request.command).map_err(DashboardError::from)?;

    let preferred = match request.port {
        Some(port) => Some(port),
        None => state.settings.custom_port(&app_id).await,
    };
    let port = match state.ports.allocate(&app_id, preferred).await? {
        AllocationResult::Allocated { allocation, .. } => allocation.port,
        AllocationResult::Conflict { conflict } => {
            tracing::info!(app_id = %app_id, port = conflict.port, "preferred port is taken");
            return Err(DashboardError::from(conflict).into());
        }
    };

    let cwd = PathBuf::from(&request.cwd);
    match state
        .processes
        .start(&app_id, cwd, &request.command, Some(port))
        .await
    {
        Ok(info) => Ok(Json(info)),
        Err(err) => {
            if matches!(err, DashboardError::SpawnFailure { .. }) {
                state.ports.release(&app_id).await;
            }
            Err(err.into())
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/apps/{app_id}/stop",
    params(("app_id" = String, Path, description = "App id")),
    responses(
        (status = 200, description = "App stopped", body = ProcessInfo),
        (status = 409, description = "App is not running", body = ProblemDetails)
    ),
    tag = "apps"
)]
/// Stop App
///
/// Signals the app's whole process group. The port allocation is kept so a
/// later start reuses it.
async fn stop_app(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
) -> Result<Json<ProcessInfo>, ApiError> {
    Ok(Json(state.processes.stop(&app_id).await?))
}

#[utoipa::path(
    post,
    path = "/v1/apps/{app_id}/restart",
    params(("app_id" = String, Path, description = "App id")),
    responses(
        (status = 200, description = "App relaunched", body = ProcessInfo),
        (status = 409, description = "App was never started", body = ProblemDetails)
    ),
    tag = "apps"
)]
/// Restart App
async fn restart_app(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
) -> Result<Json<ProcessInfo>, ApiError> {
    Ok(Json(state.processes.restart(&app_id).await?))
}

#[utoipa::path(
    get,
    path = "/v1/apps/{app_id}/logs",
    params(
        ("app_id" = String, Path, description = "App id"),
        ("limit" = Option<usize>, Query, description = "Most recent lines to return")
    ),
    responses((status = 200, description = "Buffered log lines, oldest first", body = LogsResponse)),
    tag = "apps"
)]
/// Get App Logs
async fn get_app_logs(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Json<LogsResponse> {
    let lines = state.processes.get_logs(&app_id, query.limit).await;
    Json(LogsResponse { app_id, lines })
}

#[utoipa::path(
    get,
    path = "/v1/apps/{app_id}/stats",
    params(("app_id" = String, Path, description = "App id")),
    responses((status = 200, description = "CPU percent and memory in MB, zeroed when unavailable", body = ProcessStats)),
    tag = "apps"
)]
/// Get App Stats
async fn get_app_stats(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
) -> Json<ProcessStats> {
    Json(state.processes.get_stats(&app_id).await)
}

#[utoipa::path(
    get,
    path = "/v1/events/sse",
    responses((status = 200, description = "SSE stream of status, log and heartbeat events")),
    tag = "events"
)]
/// Subscribe to Process Events (SSE)
async fn get_events_sse(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.events.subscribe(Channel::Processes);
    Sse::new(observer_stream(subscription, state.shutdown_token()))
}

#[utoipa::path(
    get,
    path = "/v1/stats/sse",
    responses((status = 200, description = "SSE stream of stats and heartbeat events")),
    tag = "events"
)]
/// Subscribe to Stats (SSE)
async fn get_stats_sse(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.events.subscribe(Channel::Stats);
    Sse::new(observer_stream(subscription, state.shutdown_token()))
}

fn observer_stream(
    subscription: Subscription,
    shutdown: CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> {
    subscription
        .map(|message| {
            Ok::<Event, Infallible>(Event::default().event(message.event).data(&*message.data))
        })
        .take_until(shutdown.cancelled_owned())
}

#[utoipa::path(
    post,
    path = "/v1/commands/validate",
    request_body = ValidateCommandRequest,
    responses((status = 200, description = "Validation verdict", body = ValidateCommandResponse)),
    tag = "apps"
)]
/// Validate Command
///
/// Checks a command line against the launch allow-list without running it.
async fn validate_command(Json(request): Json<ValidateCommandRequest>) -> Json<ValidateCommandResponse> {
    let error = command_validator::validate(&request.command)
        .err()
        .map(|err| DashboardError::from(err).to_problem_details());
    Json(ValidateCommandResponse {
        valid: error.is_none(),
        error,
    })
}

#[utoipa::path(
    get,
    path = "/v1/ports/{port}",
    params(("port" = u16, Path, description = "TCP port")),
    responses((status = 200, description = "Port availability and occupant", body = PortStatus)),
    tag = "ports"
)]
/// Check Port
async fn check_port(State(state): State<Arc<AppState>>, Path(port): Path<u16>) -> Json<PortStatus> {
    Json(state.ports.check_port(port).await)
}

#[utoipa::path(
    post,
    path = "/v1/ports/{port}/kill",
    params(("port" = u16, Path, description = "TCP port")),
    responses((status = 200, description = "Kill outcome", body = KillOutcome)),
    tag = "ports"
)]
/// Kill Port Occupant
///
/// Force-kills whatever process listens on the port.
async fn kill_port(
    State(state): State<Arc<AppState>>,
    Path(port): Path<u16>,
) -> Result<Json<KillOutcome>, ApiError> {
    Ok(Json(state.ports.kill_occupant(port).await?))
}

#[utoipa::path(
    get,
    path = "/v1/ports/scan",
    params(
        ("start" = Option<u16>, Query, description = "First port; defaults to the configured range"),
        ("end" = Option<u16>, Query, description = "Last port, inclusive")
    ),
    responses(
        (status = 200, description = "Occupied ports in the range with their owning process", body = PortScanResponse),
        (status = 400, description = "Invalid range", body = ProblemDetails)
    ),
    tag = "ports"
)]
/// Scan Ports
async fn scan_ports(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PortScanQuery>,
) -> Result<Json<PortScanResponse>, ApiError> {
    let range = state.ports.config().range;
    let start = query.start.unwrap_or(range.start);
    let end = query.end.unwrap_or(range.end);
    let ports = state.ports.scan_range(start, end).await?;
    Ok(Json(PortScanResponse { ports }))
}

#[utoipa::path(
    post,
    path = "/v1/ports/allocate",
    request_body = AllocatePortRequest,
    responses(
        (status = 200, description = "Allocation or structured conflict", body = AllocationResult),
        (status = 422, description = "No free port in range", body = ProblemDetails)
    ),
    tag = "ports"
)]
/// Allocate Port
async fn allocate_port(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AllocatePortRequest>,
) -> Result<Json<AllocationResult>, ApiError> {
    Ok(Json(
        state
            .ports
            .allocate(&request.app_id, request.preferred_port)
            .await?,
    ))
}

#[utoipa::path(
    post,
    path = "/v1/ports/configure",
    request_body = ConfigurePortsRequest,
    responses(
        (status = 200, description = "Sequential assignments, saved as custom ports", body = ConfigurePortsResponse),
        (status = 422, description = "Not enough free ports", body = ProblemDetails)
    ),
    tag = "ports"
)]
/// Configure All Ports
///
/// Assigns each app its own free port in order. Concurrent requests share a
/// single run and receive the same assignments.
async fn configure_ports(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ConfigurePortsRequest>,
) -> Result<Json<ConfigurePortsResponse>, ApiError> {
    let assignments = state
        .ports
        .assign_sequential(request.app_ids, request.range)
        .await?;
    let custom_ports: BTreeMap<String, u16> = assignments
        .iter()
        .map(|assignment| (assignment.app_id.clone(), assignment.port))
        .collect();
    state.settings.set_custom_ports(&custom_ports).await;
    Ok(Json(ConfigurePortsResponse { assignments }))
}

#[utoipa::path(
    get,
    path = "/v1/ports/allocations",
    responses((status = 200, description = "Live allocations", body = AllocationListResponse)),
    tag = "ports"
)]
/// List Allocations
async fn list_allocations(State(state): State<Arc<AppState>>) -> Json<AllocationListResponse> {
    Json(AllocationListResponse {
        allocations: state.ports.allocations().await,
    })
}

#[utoipa::path(
    delete,
    path = "/v1/ports/allocations/{app_id}",
    params(("app_id" = String, Path, description = "App id")),
    responses((status = 200, description = "The dropped allocation, if any", body = ReleaseAllocationResponse)),
    tag = "ports"
)]
/// Release Allocation
async fn release_allocation(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
) -> Json<ReleaseAllocationResponse> {
    Json(ReleaseAllocationResponse {
        released: state.ports.release(&app_id).await,
    })
}

#[utoipa::path(
    get,
    path = "/v1/settings",
    responses((status = 200, description = "Current settings", body = Settings)),
    tag = "settings"
)]
/// Get Settings
async fn get_settings(State(state): State<Arc<AppState>>) -> Json<Settings> {
    Json(state.settings.get().await)
}

#[utoipa::path(
    post,
    path = "/v1/settings/favorites/{app_id}",
    params(("app_id" = String, Path, description = "App id")),
    responses((status = 200, description = "Favorite state after the toggle", body = FavoriteToggleResponse)),
    tag = "settings"
)]
/// Toggle Favorite
async fn toggle_favorite(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
) -> Json<FavoriteToggleResponse> {
    let favorite = state.settings.toggle_favorite(&app_id).await;
    Json(FavoriteToggleResponse { app_id, favorite })
}

#[utoipa::path(
    put,
    path = "/v1/settings/favorites",
    request_body = ReorderFavoritesRequest,
    responses((status = 200, description = "Updated settings", body = Settings)),
    tag = "settings"
)]
/// Reorder Favorites
///
/// Sets the manual favorites order. Unknown ids are ignored and favorites
/// missing from the request keep their relative order at the end.
async fn reorder_favorites(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ReorderFavoritesRequest>,
) -> Json<Settings> {
    Json(state.settings.reorder_favorites(&request.order).await)
}

#[utoipa::path(
    put,
    path = "/v1/settings/archived/{app_id}",
    params(("app_id" = String, Path, description = "App id")),
    request_body = SetArchivedRequest,
    responses((status = 200, description = "Updated settings", body = Settings)),
    tag = "settings"
)]
/// Set Archived
///
/// Archiving an app also stops it and releases its port.
async fn set_archived(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    Json(request): Json<SetArchivedRequest>,
) -> Json<Settings> {
    if request.archived {
        match state.processes.stop(&app_id).await {
            Ok(_) | Err(DashboardError::NotRunning { .. }) => {}
            Err(err) => tracing::warn!(app_id = %app_id, error = %err, "failed to stop archived app"),
        }
        state.ports.release(&app_id).await;
    }
    Json(state.settings.set_archived(&app_id, request.archived).await)
}

#[utoipa::path(
    put,
    path = "/v1/settings/ports/{app_id}",
    params(("app_id" = String, Path, description = "App id")),
    request_body = SetCustomPortRequest,
    responses((status = 200, description = "Updated settings", body = Settings)),
    tag = "settings"
)]
/// Set Custom Port
async fn set_custom_port(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    Json(request): Json<SetCustomPortRequest>,
) -> Result<Json<Settings>, ApiError> {
    if request.port == Some(0) {
        return Err(DashboardError::InvalidRequest {
            message: "port must be between 1 and 65535".to_string(),
        }
        .into());
    }
    Ok(Json(state.settings.set_custom_port(&app_id, request.port).await))
}

#[utoipa::path(
    put,
    path = "/v1/settings/names/{app_id}",
    params(("app_id" = String, Path, description = "App id")),
    request_body = SetCustomNameRequest,
    responses((status = 200, description = "Updated settings", body = Settings)),
    tag = "settings"
)]
/// Set Custom Name
async fn set_custom_name(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    Json(request): Json<SetCustomNameRequest>,
) -> Json<Settings> {
    Json(state.settings.set_custom_name(&app_id, request.name).await)
}

#[utoipa::path(
    put,
    path = "/v1/settings/sort-mode",
    request_body = SetSortModeRequest,
    responses((status = 200, description = "Updated settings", body = Settings)),
    tag = "settings"
)]
/// Set Favorites Sort Mode
async fn set_sort_mode(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SetSortModeRequest>,
) -> Json<Settings> {
    Json(state.settings.set_sort_mode(request.mode).await)
}

#[utoipa::path(
    get,
    path = "/v1/terminals",
    params(("limit" = Option<usize>, Query, description = "Maximum sessions to return")),
    responses((status = 200, description = "Sessions, most recently active first", body = SessionListResponse)),
    tag = "terminals"
)]
/// List Recent Terminals
async fn list_terminals(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionListQuery>,
) -> Json<SessionListResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_SESSION_LIST_LIMIT);
    Json(SessionListResponse {
        sessions: state.terminals.get_recent_sessions(limit).await,
    })
}

#[utoipa::path(
    get,
    path = "/v1/terminals/{session_id}",
    params(("session_id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session details", body = SessionInfo),
        (status = 404, description = "Unknown session", body = ProblemDetails)
    ),
    tag = "terminals"
)]
/// Get Terminal
async fn get_terminal(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    Ok(Json(state.terminals.get(&session_id).await?))
}

#[utoipa::path(
    delete,
    path = "/v1/terminals/{session_id}",
    params(("session_id" = String, Path, description = "Session id")),
    responses((status = 200, description = "Whether a session was closed", body = CloseTerminalResponse)),
    tag = "terminals"
)]
/// Close Terminal
///
/// Kills the shell and marks the session inactive so it is not recovered.
async fn close_terminal(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Json<CloseTerminalResponse> {
    Json(CloseTerminalResponse {
        closed: state.terminals.close(&session_id).await,
    })
}

#[utoipa::path(
    post,
    path = "/v1/terminals/{session_id}/input",
    params(("session_id" = String, Path, description = "Session id")),
    request_body = TerminalInputRequest,
    responses(
        (status = 200, description = "Delivery result", body = TerminalDeliveryResponse),
        (status = 400, description = "Undecodable input", body = ProblemDetails)
    ),
    tag = "terminals"
)]
/// Write Terminal Input
async fn terminal_input(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(request): Json<TerminalInputRequest>,
) -> Result<Json<TerminalDeliveryResponse>, ApiError> {
    let bytes = match request.encoding {
        TerminalInputEncoding::Utf8 => request.data.into_bytes(),
        TerminalInputEncoding::Base64 => base64::engine::general_purpose::STANDARD
            .decode(request.data.as_bytes())
            .map_err(|err| DashboardError::InvalidRequest {
                message: format!("invalid base64 input: {err}"),
            })?,
    };
    Ok(Json(TerminalDeliveryResponse {
        delivered: state.terminals.write(&session_id, &bytes).await,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/terminals/{session_id}/resize",
    params(("session_id" = String, Path, description = "Session id")),
    request_body = TerminalResizeRequest,
    responses((status = 200, description = "Delivery result", body = TerminalDeliveryResponse)),
    tag = "terminals"
)]
/// Resize Terminal
async fn terminal_resize(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(request): Json<TerminalResizeRequest>,
) -> Json<TerminalDeliveryResponse> {
    Json(TerminalDeliveryResponse {
        delivered: state
            .terminals
            .resize(&session_id, request.cols, request.rows)
            .await,
    })
}
