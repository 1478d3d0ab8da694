//! Interactive shell sessions on pseudo-terminals.
//!
//! Sessions are keyed by a caller-chosen id and outlive any single observer:
//! a WebSocket may disconnect and reattach, getting the buffered output
//! replayed. Buffers are flushed to a JSON session table on a fixed interval,
//! and a session still marked active there is recovered with a fresh shell
//! after a dashboard restart.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use devdash_error::DashboardError;

use crate::persistence::JsonFile;
use crate::{format_timestamp, parse_timestamp};

const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;
/// An unterminated line longer than this is flushed as a line of its own.
const MAX_PARTIAL_LINE: usize = 64 * 1024;
const READER_DRAIN: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct TerminalConfig {
    pub buffer_lines: usize,
    pub save_interval: Duration,
    pub session_expiry: Duration,
    /// Shell used when a session does not name one.
    pub shell: String,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            buffer_lines: 10_000,
            save_interval: Duration::from_secs(30),
            session_expiry: Duration::from_secs(24 * 60 * 60),
            shell: default_shell(),
        }
    }
}

pub fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|shell| !shell.trim().is_empty())
        .unwrap_or_else(|| {
            if cfg!(windows) {
                "cmd.exe".to_string()
            } else {
                "/bin/sh".to_string()
            }
        })
}

/// Bounded line buffer with FIFO eviction.
///
/// Chunks are split on `\n`; a trailing `\r` is dropped. The unterminated
/// tail is kept aside until its newline arrives.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    capacity: usize,
    lines: VecDeque<String>,
    partial: String,
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lines: VecDeque::new(),
            partial: String::new(),
        }
    }

    pub fn with_lines(capacity: usize, lines: impl IntoIterator<Item = String>) -> Self {
        let mut buffer = Self::new(capacity);
        for line in lines {
            buffer.push_line(line);
        }
        buffer
    }

    pub fn push_str(&mut self, chunk: &str) {
        let mut rest = chunk;
        while let Some(newline) = rest.find('\n') {
            let mut line = std::mem::take(&mut self.partial);
            line.push_str(&rest[..newline]);
            if line.ends_with('\r') {
                line.pop();
            }
            self.push_line(line);
            rest = &rest[newline + 1..];
        }
        self.partial.push_str(rest);
        if self.partial.len() > MAX_PARTIAL_LINE {
            let line = std::mem::take(&mut self.partial);
            self.push_line(line);
        }
    }

    fn push_line(&mut self, line: String) {
        while self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Retained lines, including the unterminated tail, never more than `capacity`.
    pub fn lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.lines.iter().cloned().collect();
        if !self.partial.is_empty() {
            if lines.len() >= self.capacity {
                lines.remove(0);
            }
            lines.push(self.partial.clone());
        }
        lines
    }

    pub fn len(&self) -> usize {
        self.lines.len() + usize::from(!self.partial.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Incremental UTF-8 decoding across read boundaries.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            let (valid, invalid) = match std::str::from_utf8(&self.pending) {
                Ok(_) => (self.pending.len(), None),
                Err(err) => (err.valid_up_to(), err.error_len()),
            };
            out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
            match invalid {
                Some(len) => {
                    out.push(char::REPLACEMENT_CHARACTER);
                    self.pending.drain(..valid + len);
                }
                None => {
                    // Either fully decoded or an incomplete sequence awaiting more bytes.
                    self.pending.drain(..valid);
                    return out;
                }
            }
        }
    }
}

/// Durable record of a session, one entry of the session table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub cwd: String,
    pub shell: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    pub created_at: String,
    pub last_activity: String,
    pub is_active: bool,
    #[serde(default)]
    pub output_buffer: Vec<String>,
    #[serde(default)]
    pub buffer_size: usize,
}

type SessionTable = BTreeMap<String, SessionRecord>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    pub cwd: String,
    pub shell: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub created_at: String,
    pub last_activity: String,
    pub is_active: bool,
    /// A shell is attached to this session in the running dashboard.
    pub live: bool,
    /// The session was restored from the session table rather than opened fresh.
    pub recovered: bool,
    pub buffer_size: usize,
}

impl SessionInfo {
    fn from_record(session_id: &str, record: &SessionRecord) -> Self {
        Self {
            session_id: session_id.to_string(),
            app_id: record.app_id.clone(),
            cwd: record.cwd.clone(),
            shell: record.shell.clone(),
            pid: None,
            created_at: record.created_at.clone(),
            last_activity: record.last_activity.clone(),
            is_active: record.is_active,
            live: false,
            recovered: false,
            buffer_size: record.buffer_size,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TerminalExit {
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOutput {
    Data(String),
    Exit(TerminalExit),
}

#[derive(Debug, Clone, Default)]
pub struct OpenSession {
    pub session_id: String,
    pub cwd: Option<PathBuf>,
    pub shell: Option<String>,
    pub app_id: Option<String>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

/// An observer's view of a session: the buffered output at attach time plus
/// everything produced afterwards, with no gap or overlap between the two.
#[derive(Debug)]
pub struct Attachment {
    pub info: SessionInfo,
    pub lines: Vec<String>,
    pub output: broadcast::Receiver<TerminalOutput>,
    pub closed: CancellationToken,
}

impl Attachment {
    pub fn replay_text(&self) -> String {
        let mut text = self.lines.join("\r\n");
        if !text.is_empty() {
            text.push_str("\r\n");
        }
        text
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SaveReport {
    pub saved: usize,
    pub reaped: usize,
}

#[derive(Debug)]
struct SessionState {
    buffer: OutputBuffer,
    last_activity: String,
}

struct LiveSession {
    id: String,
    app_id: Option<String>,
    cwd: String,
    shell: String,
    pid: Option<u32>,
    created_at: String,
    recovered: bool,
    state: std::sync::Mutex<SessionState>,
    writer: std::sync::Mutex<Box<dyn Write + Send>>,
    master: std::sync::Mutex<Box<dyn MasterPty + Send>>,
    killer: std::sync::Mutex<Box<dyn ChildKiller + Send + Sync>>,
    output: broadcast::Sender<TerminalOutput>,
    closed: CancellationToken,
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("shell", &self.shell)
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

impl LiveSession {
    fn record_output(&self, text: &str) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.buffer.push_str(text);
        state.last_activity = format_timestamp();
        // No receivers is fine; the buffer keeps the output for later observers.
        let _ = self.output.send(TerminalOutput::Data(text.to_string()));
    }

    fn touch(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.last_activity = format_timestamp();
        }
    }

    fn info(&self) -> SessionInfo {
        let (last_activity, buffer_size) = self
            .state
            .lock()
            .map(|state| (state.last_activity.clone(), state.buffer.len()))
            .unwrap_or_default();
        SessionInfo {
            session_id: self.id.clone(),
            app_id: self.app_id.clone(),
            cwd: self.cwd.clone(),
            shell: self.shell.clone(),
            pid: self.pid,
            created_at: self.created_at.clone(),
            last_activity,
            is_active: !self.closed.is_cancelled(),
            live: true,
            recovered: self.recovered,
            buffer_size,
        }
    }

    fn record(&self, is_active: bool) -> SessionRecord {
        let (lines, last_activity) = self
            .state
            .lock()
            .map(|state| (state.buffer.lines(), state.last_activity.clone()))
            .unwrap_or_default();
        SessionRecord {
            cwd: self.cwd.clone(),
            shell: self.shell.clone(),
            app_id: self.app_id.clone(),
            created_at: self.created_at.clone(),
            last_activity,
            is_active,
            buffer_size: lines.len(),
            output_buffer: lines,
        }
    }

    fn write(&self, data: &[u8]) -> bool {
        let Ok(mut writer) = self.writer.lock() else {
            return false;
        };
        match writer.write_all(data).and_then(|_| writer.flush()) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(session_id = %self.id, error = %err, "terminal write failed");
                false
            }
        }
    }

    fn resize(&self, cols: u16, rows: u16) -> bool {
        let Ok(master) = self.master.lock() else {
            return false;
        };
        match master.resize(pty_size(cols, rows)) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(session_id = %self.id, error = %err, "terminal resize failed");
                false
            }
        }
    }

    fn kill(&self) {
        if let Ok(mut killer) = self.killer.lock() {
            if let Err(err) = killer.kill() {
                tracing::debug!(session_id = %self.id, error = %err, "terminal kill failed");
            }
        }
    }
}

/// The session table on disk. Writers are serialized by the table lock.
#[derive(Debug)]
struct SessionStore {
    file: JsonFile<SessionTable>,
    table: Mutex<SessionTable>,
}

impl SessionStore {
    async fn open(path: PathBuf) -> Self {
        let file = JsonFile::new(path);
        let table = match file.load().await {
            Ok(table) => table,
            Err(err) => {
                tracing::warn!(error = %err, "failed to load terminal sessions, starting empty");
                SessionTable::default()
            }
        };
        Self {
            file,
            table: Mutex::new(table),
        }
    }

    async fn update<R>(&self, mutate: impl FnOnce(&mut SessionTable) -> R) -> R {
        let mut table = self.table.lock().await;
        let mut next = table.clone();
        let result = mutate(&mut next);
        if next != *table {
            if let Err(err) = self.file.save(&next).await {
                tracing::warn!(error = %err, "failed to persist terminal sessions");
            }
            *table = next;
        }
        result
    }

    async fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.table.lock().await.get(session_id).cloned()
    }

    async fn snapshot(&self) -> SessionTable {
        self.table.lock().await.clone()
    }
}

#[derive(Debug)]
pub struct TerminalManager {
    config: TerminalConfig,
    store: SessionStore,
    sessions: Mutex<HashMap<String, Arc<LiveSession>>>,
}

impl TerminalManager {
    /// Open the manager over the session table at `path`.
    pub async fn open(config: TerminalConfig, path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            config,
            store: SessionStore::open(path.into()).await,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    /// Return the live session with this id, recover it from the session
    /// table, or start a fresh shell.
    pub async fn create(self: &Arc<Self>, request: OpenSession) -> Result<SessionInfo, DashboardError> {
        if request.session_id.trim().is_empty() {
            return Err(DashboardError::InvalidRequest {
                message: "session id must not be empty".to_string(),
            });
        }
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&request.session_id) {
            if !session.closed.is_cancelled() {
                return Ok(session.info());
            }
        }

        let now = OffsetDateTime::now_utc();
        let stored = self
            .store
            .get(&request.session_id)
            .await
            .filter(|record| record.is_active && !is_expired(record, now, self.config.session_expiry));

        let session = match stored {
            Some(record) => {
                tracing::info!(session_id = %request.session_id, lines = record.output_buffer.len(), "recovering terminal session");
                let spawn = SpawnSpec {
                    cwd: record.cwd.clone(),
                    shell: record.shell.clone(),
                    app_id: record.app_id.clone().or(request.app_id),
                    created_at: record.created_at.clone(),
                    seed: record.output_buffer,
                    recovered: true,
                };
                self.spawn(&request.session_id, spawn, request.cols, request.rows)?
            }
            None => {
                let cwd = match request.cwd {
                    Some(cwd) => cwd,
                    None => std::env::current_dir().map_err(|err| DashboardError::InvalidRequest {
                        message: format!("no working directory: {err}"),
                    })?,
                };
                if !cwd.is_dir() {
                    return Err(DashboardError::InvalidRequest {
                        message: format!("working directory does not exist: {}", cwd.display()),
                    });
                }
                let spawn = SpawnSpec {
                    cwd: cwd.display().to_string(),
                    shell: request.shell.unwrap_or_else(|| self.config.shell.clone()),
                    app_id: request.app_id,
                    created_at: format_timestamp(),
                    seed: Vec::new(),
                    recovered: false,
                };
                self.spawn(&request.session_id, spawn, request.cols, request.rows)?
            }
        };

        sessions.insert(session.id.clone(), session.clone());
        drop(sessions);
        let record = session.record(true);
        self.store
            .update(|table| table.insert(session.id.clone(), record))
            .await;
        Ok(session.info())
    }

    fn spawn(
        self: &Arc<Self>,
        session_id: &str,
        spec: SpawnSpec,
        cols: Option<u16>,
        rows: Option<u16>,
    ) -> Result<Arc<LiveSession>, DashboardError> {
        let pair = native_pty_system()
            .openpty(pty_size(cols.unwrap_or(DEFAULT_COLS), rows.unwrap_or(DEFAULT_ROWS)))
            .map_err(|err| stream_error("failed to open pty", err))?;

        let mut command = CommandBuilder::new(&spec.shell);
        command.cwd(&spec.cwd);
        command.env("TERM", "xterm-256color");
        let mut child = pair
            .slave
            .spawn_command(command)
            .map_err(|err| stream_error("failed to spawn shell", err))?;
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|err| stream_error("failed to open pty writer", err))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| stream_error("failed to open pty reader", err))?;

        let (output, _) = broadcast::channel(1024);
        let session = Arc::new(LiveSession {
            id: session_id.to_string(),
            app_id: spec.app_id,
            cwd: spec.cwd,
            shell: spec.shell,
            pid: child.process_id(),
            created_at: spec.created_at,
            recovered: spec.recovered,
            state: std::sync::Mutex::new(SessionState {
                buffer: OutputBuffer::with_lines(self.config.buffer_lines, spec.seed),
                last_activity: format_timestamp(),
            }),
            writer: std::sync::Mutex::new(writer),
            master: std::sync::Mutex::new(pair.master),
            killer: std::sync::Mutex::new(child.clone_killer()),
            output,
            closed: CancellationToken::new(),
        });
        tracing::info!(session_id, pid = ?session.pid, shell = %session.shell, cwd = %session.cwd, "terminal session started");

        let (drained_tx, drained_rx) = std::sync::mpsc::channel::<()>();
        let reading = session.clone();
        std::thread::spawn(move || {
            let mut decoder = Utf8Decoder::default();
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let text = decoder.decode(&buf[..n]);
                        if !text.is_empty() {
                            reading.record_output(&text);
                        }
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        tracing::debug!(session_id = %reading.id, error = %err, "pty read ended");
                        break;
                    }
                }
            }
            let _ = drained_tx.send(());
        });

        let runtime = tokio::runtime::Handle::current();
        let manager = Arc::downgrade(self);
        let exited = session.clone();
        std::thread::spawn(move || {
            let exit = match child.wait() {
                Ok(status) => TerminalExit {
                    exit_code: i32::try_from(status.exit_code()).ok(),
                    signal: status.signal().map(str::to_string),
                },
                Err(err) => {
                    tracing::debug!(session_id = %exited.id, error = %err, "failed to wait for shell");
                    TerminalExit::default()
                }
            };
            let _ = drained_rx.recv_timeout(READER_DRAIN);
            runtime.spawn(async move {
                match manager.upgrade() {
                    Some(manager) => manager.finish(exited, exit).await,
                    None => {
                        let _ = exited.output.send(TerminalOutput::Exit(exit));
                    }
                }
            });
        });

        Ok(session)
    }

    /// Record a shell exit and mark the session inactive.
    async fn finish(&self, session: Arc<LiveSession>, exit: TerminalExit) {
        let _ = session.output.send(TerminalOutput::Exit(exit.clone()));
        if session.closed.is_cancelled() {
            return;
        }
        {
            let mut sessions = self.sessions.lock().await;
            if sessions
                .get(&session.id)
                .is_some_and(|current| Arc::ptr_eq(current, &session))
            {
                sessions.remove(&session.id);
            }
        }
        session.closed.cancel();
        let record = session.record(false);
        self.store
            .update(|table| table.insert(session.id.clone(), record))
            .await;
        tracing::info!(session_id = %session.id, exit_code = ?exit.exit_code, signal = ?exit.signal, "terminal session exited");
    }

    /// Attach an observer to a live session.
    pub async fn attach(&self, session_id: &str) -> Option<Attachment> {
        let session = self.sessions.lock().await.get(session_id).cloned()?;
        let info = session.info();
        let state = session.state.lock().ok()?;
        // Subscribing under the state lock means no chunk is both replayed and delivered.
        let output = session.output.subscribe();
        Some(Attachment {
            info,
            lines: state.buffer.lines(),
            output,
            closed: session.closed.clone(),
        })
    }

    /// Forward input to the shell. Unknown sessions are a no-op returning false.
    pub async fn write(&self, session_id: &str, data: &[u8]) -> bool {
        let Some(session) = self.live(session_id).await else {
            return false;
        };
        session.touch();
        session.write(data)
    }

    pub async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> bool {
        match self.live(session_id).await {
            Some(session) => session.resize(cols, rows),
            None => false,
        }
    }

    /// Persist a final snapshot, mark the session inactive and kill its shell.
    /// Returns false when there was nothing to close.
    pub async fn close(&self, session_id: &str) -> bool {
        let session = self.sessions.lock().await.remove(session_id);
        match session {
            Some(session) => {
                session.closed.cancel();
                let record = session.record(false);
                self.store
                    .update(|table| table.insert(session_id.to_string(), record))
                    .await;
                session.kill();
                tracing::info!(session_id, "terminal session closed");
                true
            }
            None => {
                self.store
                    .update(|table| match table.get_mut(session_id) {
                        Some(record) if record.is_active => {
                            record.is_active = false;
                            true
                        }
                        _ => false,
                    })
                    .await
            }
        }
    }

    pub async fn get(&self, session_id: &str) -> Result<SessionInfo, DashboardError> {
        if let Some(session) = self.live(session_id).await {
            return Ok(session.info());
        }
        self.store
            .get(session_id)
            .await
            .map(|record| SessionInfo::from_record(session_id, &record))
            .ok_or_else(|| DashboardError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Sessions from the session table, most recently active first.
    pub async fn get_recent_sessions(&self, limit: usize) -> Vec<SessionInfo> {
        let table = self.store.snapshot().await;
        let live: HashMap<String, Arc<LiveSession>> = self.sessions.lock().await.clone();
        let mut sessions: Vec<SessionInfo> = table
            .iter()
            .map(|(session_id, record)| match live.get(session_id) {
                Some(session) => session.info(),
                None => SessionInfo::from_record(session_id, record),
            })
            .collect();
        sessions.sort_by_key(|info| {
            std::cmp::Reverse(parse_timestamp(&info.last_activity).unwrap_or(OffsetDateTime::UNIX_EPOCH))
        });
        sessions.truncate(limit);
        sessions
    }

    /// Flush every live session's buffer and reap expired records.
    pub async fn save_all(&self) -> SaveReport {
        let live: Vec<Arc<LiveSession>> = self.sessions.lock().await.values().cloned().collect();
        let now = OffsetDateTime::now_utc();
        let expiry = self.config.session_expiry;
        let report = self
            .store
            .update(|table| {
                let mut report = SaveReport::default();
                for session in &live {
                    if session.closed.is_cancelled() {
                        continue;
                    }
                    table.insert(session.id.clone(), session.record(true));
                    report.saved += 1;
                }
                for (session_id, record) in table.iter_mut() {
                    let is_live = live.iter().any(|session| &session.id == session_id);
                    if record.is_active && !is_live && is_expired(record, now, expiry) {
                        record.is_active = false;
                        report.reaped += 1;
                    }
                }
                report
            })
            .await;
        if report.reaped > 0 {
            tracing::info!(reaped = report.reaped, "reaped expired terminal sessions");
        }
        report
    }

    pub fn spawn_saver(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        let period = self.config.save_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(manager) = manager.upgrade() else { break };
                        manager.save_all().await;
                    }
                }
            }
        })
    }

    /// Save everything and kill the shells, leaving sessions active in the
    /// table so they are recovered on the next start.
    pub async fn shutdown(&self) {
        self.save_all().await;
        let sessions: Vec<Arc<LiveSession>> = self
            .sessions
            .lock()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();
        for session in sessions {
            session.closed.cancel();
            session.kill();
        }
    }

    async fn live(&self, session_id: &str) -> Option<Arc<LiveSession>> {
        self.sessions.lock().await.get(session_id).cloned()
    }
}

struct SpawnSpec {
    cwd: String,
    shell: String,
    app_id: Option<String>,
    created_at: String,
    seed: Vec<String>,
    recovered: bool,
}

fn pty_size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows: rows.max(1),
        cols: cols.max(1),
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn is_expired(record: &SessionRecord, now: OffsetDateTime, expiry: Duration) -> bool {
    match parse_timestamp(&record.last_activity) {
        Some(last_activity) => now - last_activity > expiry,
        None => true,
    }
}

fn stream_error(context: &str, err: impl std::fmt::Display) -> DashboardError {
    DashboardError::StreamError {
        message: format!("{context}: {err}"),
    }
}
