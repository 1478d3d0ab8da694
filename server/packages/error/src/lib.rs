//! Error taxonomy shared by the devdash server and its clients.
//!
//! Every failure the orchestration core can surface maps to a stable
//! [`ErrorType`] and renders as RFC 7807 [`ProblemDetails`].

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;

/// Stable, machine-readable error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    InvalidRequest,
    CommandNotAllowed,
    ScriptNotAllowed,
    ForbiddenCharacter,
    AlreadyRunning,
    NotRunning,
    AppNotFound,
    SpawnFailure,
    PortConflict,
    PortRangeExhausted,
    SessionNotFound,
    StorageError,
    StreamError,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::InvalidRequest => "invalid_request",
            ErrorType::CommandNotAllowed => "command_not_allowed",
            ErrorType::ScriptNotAllowed => "script_not_allowed",
            ErrorType::ForbiddenCharacter => "forbidden_character",
            ErrorType::AlreadyRunning => "already_running",
            ErrorType::NotRunning => "not_running",
            ErrorType::AppNotFound => "app_not_found",
            ErrorType::SpawnFailure => "spawn_failure",
            ErrorType::PortConflict => "port_conflict",
            ErrorType::PortRangeExhausted => "port_range_exhausted",
            ErrorType::SessionNotFound => "session_not_found",
            ErrorType::StorageError => "storage_error",
            ErrorType::StreamError => "stream_error",
        }
    }

    pub fn urn(&self) -> String {
        format!("urn:devdash:error:{}", self.as_str())
    }

    pub fn title(&self) -> &'static str {
        match self {
            ErrorType::InvalidRequest => "Invalid Request",
            ErrorType::CommandNotAllowed => "Command Not Allowed",
            ErrorType::ScriptNotAllowed => "Script Not Allowed",
            ErrorType::ForbiddenCharacter => "Forbidden Character",
            ErrorType::AlreadyRunning => "App Already Running",
            ErrorType::NotRunning => "App Not Running",
            ErrorType::AppNotFound => "App Not Found",
            ErrorType::SpawnFailure => "Spawn Failure",
            ErrorType::PortConflict => "Port Conflict",
            ErrorType::PortRangeExhausted => "Port Range Exhausted",
            ErrorType::SessionNotFound => "Session Not Found",
            ErrorType::StorageError => "Storage Error",
            ErrorType::StreamError => "Stream Error",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            ErrorType::InvalidRequest
            | ErrorType::CommandNotAllowed
            | ErrorType::ScriptNotAllowed
            | ErrorType::ForbiddenCharacter => 400,
            ErrorType::AppNotFound | ErrorType::SessionNotFound => 404,
            ErrorType::AlreadyRunning
            | ErrorType::NotRunning
            | ErrorType::PortConflict => 409,
            ErrorType::PortRangeExhausted => 422,
            ErrorType::SpawnFailure | ErrorType::StorageError | ErrorType::StreamError => 500,
        }
    }

    /// Whether a UI should offer a plain retry.
    pub fn retryable(&self) -> bool {
        matches!(self, ErrorType::PortConflict | ErrorType::SpawnFailure)
    }
}

/// RFC 7807 problem details body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_: String,
    pub title: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub extensions: BTreeMap<String, Value>,
}

impl ProblemDetails {
    pub fn new(error_type: ErrorType, detail: Option<String>) -> Self {
        Self {
            type_: error_type.urn(),
            title: error_type.title().to_string(),
            status: error_type.status(),
            detail,
            instance: None,
            extensions: BTreeMap::new(),
        }
    }

    pub fn with_extension(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DashboardError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("command not allowed: {executable}")]
    CommandNotAllowed { executable: String },
    #[error("script not allowed: {script}")]
    ScriptNotAllowed { script: String },
    #[error("command contains forbidden character {character:?}")]
    ForbiddenCharacter { character: String },
    #[error("app {app_id} is already running")]
    AlreadyRunning { app_id: String },
    #[error("app {app_id} is not running")]
    NotRunning { app_id: String },
    #[error("app not found: {app_id}")]
    AppNotFound { app_id: String },
    #[error("failed to start {app_id}: {message}")]
    SpawnFailure { app_id: String, message: String },
    #[error("port {port} is in use")]
    PortConflict {
        port: u16,
        pid: Option<u32>,
        process_name: Option<String>,
        reserved_by: Option<String>,
        suggested_port: Option<u16>,
    },
    #[error("port range {start}-{end} exhausted: {message}")]
    PortRangeExhausted { start: u16, end: u16, message: String },
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },
    #[error("storage error: {message}")]
    StorageError { message: String },
    #[error("stream error: {message}")]
    StreamError { message: String },
}

impl DashboardError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            DashboardError::InvalidRequest { .. } => ErrorType::InvalidRequest,
            DashboardError::CommandNotAllowed { .. } => ErrorType::CommandNotAllowed,
            DashboardError::ScriptNotAllowed { .. } => ErrorType::ScriptNotAllowed,
            DashboardError::ForbiddenCharacter { .. } => ErrorType::ForbiddenCharacter,
            DashboardError::AlreadyRunning { .. } => ErrorType::AlreadyRunning,
            DashboardError::NotRunning { .. } => ErrorType::NotRunning,
            DashboardError::AppNotFound { .. } => ErrorType::AppNotFound,
            DashboardError::SpawnFailure { .. } => ErrorType::SpawnFailure,
            DashboardError::PortConflict { .. } => ErrorType::PortConflict,
            DashboardError::PortRangeExhausted { .. } => ErrorType::PortRangeExhausted,
            DashboardError::SessionNotFound { .. } => ErrorType::SessionNotFound,
            DashboardError::StorageError { .. } => ErrorType::StorageError,
            DashboardError::StreamError { .. } => ErrorType::StreamError,
        }
    }

    pub fn to_problem_details(&self) -> ProblemDetails {
        let error_type = self.error_type();
        let mut problem = ProblemDetails::new(error_type, Some(self.to_string()))
            .with_extension("kind", error_type.as_str())
            .with_extension("retryable", error_type.retryable());

        match self {
            DashboardError::AlreadyRunning { app_id }
            | DashboardError::NotRunning { app_id }
            | DashboardError::AppNotFound { app_id }
            | DashboardError::SpawnFailure { app_id, .. } => {
                problem = problem.with_extension("appId", app_id.as_str());
            }
            DashboardError::SessionNotFound { session_id } => {
                problem = problem.with_extension("sessionId", session_id.as_str());
            }
            DashboardError::PortConflict {
                port,
                pid,
                process_name,
                reserved_by,
                suggested_port,
            } => {
                problem = problem
                    .with_extension("port", *port)
                    .with_extension("forceKillable", pid.is_some());
                if let Some(pid) = pid {
                    problem = problem.with_extension("pid", *pid);
                }
                if let Some(name) = process_name {
                    problem = problem.with_extension("processName", name.as_str());
                }
                if let Some(app_id) = reserved_by {
                    problem = problem.with_extension("reservedBy", app_id.as_str());
                }
                if let Some(suggested) = suggested_port {
                    problem = problem.with_extension("suggestedPort", *suggested);
                }
            }
            _ => {}
        }
        problem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_conflict_carries_retry_hints() {
        let err = DashboardError::PortConflict {
            port: 5000,
            pid: Some(4242),
            process_name: Some("node".to_string()),
            reserved_by: None,
            suggested_port: Some(5001),
        };
        let problem = err.to_problem_details();
        assert_eq!(problem.status, 409);
        assert_eq!(problem.type_, "urn:devdash:error:port_conflict");
        assert_eq!(problem.extensions.get("suggestedPort"), Some(&Value::from(5001)));
        assert_eq!(problem.extensions.get("forceKillable"), Some(&Value::Bool(true)));
        assert_eq!(problem.extensions.get("retryable"), Some(&Value::Bool(true)));

        let json = serde_json::to_value(&problem).unwrap();
        assert_eq!(json["type"], "urn:devdash:error:port_conflict");
        assert_eq!(json["processName"], "node");
        assert_eq!(json["kind"], "port_conflict");
    }

    #[test]
    fn state_conflicts_are_not_retryable() {
        let problem = DashboardError::AlreadyRunning {
            app_id: "web".to_string(),
        }
        .to_problem_details();
        assert_eq!(problem.status, 409);
        assert_eq!(problem.extensions.get("retryable"), Some(&Value::Bool(false)));
        assert_eq!(problem.extensions.get("appId"), Some(&Value::from("web")));
    }

    #[test]
    fn validation_kinds_are_bad_requests() {
        for err in [
            DashboardError::CommandNotAllowed {
                executable: "rm".to_string(),
            },
            DashboardError::ScriptNotAllowed {
                script: "run evil".to_string(),
            },
            DashboardError::ForbiddenCharacter {
                character: ";".to_string(),
            },
        ] {
            assert_eq!(err.to_problem_details().status, 400);
        }
    }
}
