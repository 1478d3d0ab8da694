//! Terminal WebSocket bridge.
//!
//! A connection opens (or recovers) the named session, replays its buffered
//! output and then relays pty output and client input until either side goes
//! away. Disconnecting leaves the session running for a later reattach.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::router::{ApiError, AppState};
use crate::terminal_sessions::{OpenSession, TerminalManager, TerminalOutput};

/// Frames exchanged over the terminal socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TerminalMessage {
    /// Client keystrokes.
    Input { data: String },
    Resize { cols: u16, rows: u16 },
    /// Pty output, including the replayed buffer right after connecting.
    Output { data: String },
    #[serde(rename_all = "camelCase")]
    Exit {
        exit_code: Option<i32>,
        signal: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Connected {
        session_id: String,
        pid: Option<u32>,
        shell: String,
        recovered: bool,
    },
    Error { message: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TerminalConnectQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cols: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u16>,
}

#[utoipa::path(
    get,
    path = "/v1/terminals/{session_id}/ws",
    params(
        ("session_id" = String, Path, description = "Client-chosen session id"),
        ("cwd" = Option<String>, Query, description = "Working directory for a new session"),
        ("shell" = Option<String>, Query, description = "Shell for a new session"),
        ("appId" = Option<String>, Query, description = "App the session belongs to"),
        ("cols" = Option<u16>, Query, description = "Initial columns"),
        ("rows" = Option<u16>, Query, description = "Initial rows")
    ),
    responses(
        (status = 101, description = "Switching to the terminal WebSocket protocol"),
        (status = 400, description = "Invalid working directory", body = devdash_error::ProblemDetails)
    ),
    tag = "terminals"
)]
/// Connect Terminal
///
/// Opens the session if needed (recovering a persisted one when possible) and
/// upgrades to a WebSocket carrying `TerminalMessage` frames.
pub async fn terminal_ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    Query(query): Query<TerminalConnectQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let terminals = state.terminals().clone();
    let info = terminals
        .create(OpenSession {
            session_id,
            cwd: query.cwd.map(PathBuf::from),
            shell: query.shell,
            app_id: query.app_id,
            cols: query.cols,
            rows: query.rows,
        })
        .await?;
    let shutdown = state.shutdown_token();
    Ok(ws.on_upgrade(move |socket| {
        handle_terminal_socket(socket, terminals, info.session_id, shutdown)
    }))
}

type WsSender = SplitSink<WebSocket, Message>;

async fn handle_terminal_socket(
    socket: WebSocket,
    terminals: Arc<TerminalManager>,
    session_id: String,
    shutdown: CancellationToken,
) {
    let (mut sender, mut receiver) = socket.split();

    let Some(mut attachment) = terminals.attach(&session_id).await else {
        let message = TerminalMessage::Error {
            message: format!("session {session_id} is no longer running"),
        };
        let _ = send_message(&mut sender, &message).await;
        let _ = sender.close().await;
        return;
    };

    let connected = TerminalMessage::Connected {
        session_id: session_id.clone(),
        pid: attachment.info.pid,
        shell: attachment.info.shell.clone(),
        recovered: attachment.info.recovered,
    };
    if send_message(&mut sender, &connected).await.is_err() {
        return;
    }
    let replay = attachment.replay_text();
    if !replay.is_empty()
        && send_message(&mut sender, &TerminalMessage::Output { data: replay })
            .await
            .is_err()
    {
        return;
    }
    tracing::debug!(session_id = %session_id, lines = attachment.lines.len(), "terminal attached");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            output = attachment.output.recv() => match output {
                Ok(TerminalOutput::Data(data)) => {
                    if send_message(&mut sender, &TerminalMessage::Output { data }).await.is_err() {
                        break;
                    }
                }
                Ok(TerminalOutput::Exit(exit)) => {
                    let message = TerminalMessage::Exit {
                        exit_code: exit.exit_code,
                        signal: exit.signal,
                    };
                    let _ = send_message(&mut sender, &message).await;
                    break;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(session_id = %session_id, skipped, "terminal observer lagged");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<TerminalMessage>(&text) {
                        Ok(TerminalMessage::Input { data }) => {
                            terminals.write(&session_id, data.as_bytes()).await;
                        }
                        Ok(TerminalMessage::Resize { cols, rows }) => {
                            terminals.resize(&session_id, cols, rows).await;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            let message = TerminalMessage::Error {
                                message: format!("invalid terminal message: {err}"),
                            };
                            if send_message(&mut sender, &message).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                // Raw bytes are keystrokes.
                Some(Ok(Message::Binary(data))) => {
                    terminals.write(&session_id, &data).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = attachment.closed.cancelled() => break,
        }
    }

    let _ = sender.close().await;
    tracing::debug!(session_id = %session_id, "terminal detached");
}

async fn send_message(sender: &mut WsSender, message: &TerminalMessage) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).map_err(axum::Error::new)?;
    sender.send(Message::Text(text)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_message_wire_shape() {
        let json = serde_json::to_value(TerminalMessage::Exit {
            exit_code: Some(0),
            signal: None,
        })
        .unwrap();
        assert_eq!(json["type"], "exit");
        assert_eq!(json["exitCode"], 0);

        let json = serde_json::to_value(TerminalMessage::Connected {
            session_id: "t1".to_string(),
            pid: Some(42),
            shell: "/bin/sh".to_string(),
            recovered: false,
        })
        .unwrap();
        assert_eq!(json["type"], "connected");
        assert_eq!(json["sessionId"], "t1");

        let parsed: TerminalMessage =
            serde_json::from_str(r#"{"type":"resize","cols":120,"rows":40}"#).unwrap();
        assert_eq!(parsed, TerminalMessage::Resize { cols: 120, rows: 40 });
    }

    #[test]
    fn unknown_frames_are_rejected() {
        assert!(serde_json::from_str::<TerminalMessage>(r#"{"type":"launch"}"#).is_err());
    }
}
