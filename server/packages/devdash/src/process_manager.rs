//! Process registry - supervises one dev-server child process per app.
//!
//! Every mutating operation on an app (start, stop, restart, exit handling)
//! runs under that app's own lock, so status transitions for an app are
//! strictly ordered while different apps proceed in parallel. Read-only
//! queries use a snapshot that is refreshed on every transition and never
//! wait on an in-progress mutation.

use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Weak};
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use devdash_error::DashboardError;

use crate::command_validator::{self, split_command};
use crate::events::{AppStats, DashboardEvent, EventBroadcaster, LogEvent, StatusEvent};
use crate::format_timestamp;

/// Lifecycle state of a managed app.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Restarting,
    Error,
}

impl ProcessStatus {
    /// A child exists or is about to.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ProcessStatus::Starting | ProcessStatus::Running | ProcessStatus::Restarting
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
    /// Lines produced by the dashboard itself (spawn failures, stop notices).
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogLine {
    pub stream: LogStream,
    pub text: String,
    pub timestamp: String,
}

/// Live resource usage. `memory` is resident memory in megabytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStats {
    pub cpu: f32,
    pub memory: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub app_id: String,
    pub cwd: String,
    pub command: String,
    pub status: ProcessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_signal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProcessManagerConfig {
    /// Log lines retained per app.
    pub log_capacity: usize,
    /// Pause between stopping and starting again on restart, so the port is released.
    pub restart_delay: Duration,
}

impl Default for ProcessManagerConfig {
    fn default() -> Self {
        Self {
            log_capacity: 100,
            restart_delay: Duration::from_secs(1),
        }
    }
}

const READER_DRAIN: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
struct LaunchSpec {
    cwd: PathBuf,
    command: String,
    program: String,
    args: Vec<String>,
    port: Option<u16>,
}

/// Bounded log ring for one app. Lines are published while the buffer lock
/// is held so observers see them in production order.
#[derive(Debug)]
struct LogBuffer {
    app_id: String,
    capacity: usize,
    lines: std::sync::Mutex<VecDeque<LogLine>>,
    events: Arc<EventBroadcaster>,
}

impl LogBuffer {
    fn new(app_id: &str, capacity: usize, events: Arc<EventBroadcaster>) -> Self {
        Self {
            app_id: app_id.to_string(),
            capacity: capacity.max(1),
            lines: std::sync::Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            events,
        }
    }

    fn push(&self, stream: LogStream, text: impl Into<String>) {
        let line = LogLine {
            stream,
            text: text.into(),
            timestamp: format_timestamp(),
        };
        let Ok(mut lines) = self.lines.lock() else {
            return;
        };
        while lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.clone());
        self.events.broadcast(&DashboardEvent::Log(LogEvent {
            app_id: self.app_id.clone(),
            stream: line.stream,
            message: line.text,
            timestamp: line.timestamp,
        }));
    }

    fn tail(&self, limit: Option<usize>) -> Vec<LogLine> {
        let Ok(lines) = self.lines.lock() else {
            return Vec::new();
        };
        let skip = limit.map_or(0, |limit| lines.len().saturating_sub(limit));
        lines.iter().skip(skip).cloned().collect()
    }

    fn clear(&self) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.clear();
        }
    }
}

#[derive(Debug)]
struct RunHandle {
    id: u64,
    pid: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
    stop_requested: bool,
}

#[derive(Debug)]
struct ManagedProcess {
    app_id: String,
    spec: Option<LaunchSpec>,
    status: ProcessStatus,
    pid: Option<u32>,
    start_time: Option<String>,
    exit_code: Option<i32>,
    exit_signal: Option<String>,
    error: Option<String>,
    run: Option<RunHandle>,
    next_run_id: u64,
}

impl ManagedProcess {
    fn new(app_id: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            spec: None,
            status: ProcessStatus::Stopped,
            pid: None,
            start_time: None,
            exit_code: None,
            exit_signal: None,
            error: None,
            run: None,
            next_run_id: 1,
        }
    }

    fn is_active(&self) -> bool {
        self.status.is_active()
    }

    fn info(&self) -> ProcessInfo {
        ProcessInfo {
            app_id: self.app_id.clone(),
            cwd: self
                .spec
                .as_ref()
                .map(|spec| spec.cwd.display().to_string())
                .unwrap_or_default(),
            command: self
                .spec
                .as_ref()
                .map(|spec| spec.command.clone())
                .unwrap_or_default(),
            status: self.status,
            pid: self.pid,
            port: self.spec.as_ref().and_then(|spec| spec.port),
            start_time: self.start_time.clone(),
            exit_code: self.exit_code,
            exit_signal: self.exit_signal.clone(),
            error: self.error.clone(),
        }
    }

    /// Signal the current run to terminate and mark the exit as requested.
    fn signal_stop(&mut self) {
        let app_id = self.app_id.clone();
        let Some(run) = self.run.as_mut() else {
            return;
        };
        run.stop_requested = true;
        terminate(&app_id, run);
    }
}

#[derive(Debug)]
struct AppEntry {
    logs: Arc<LogBuffer>,
    snapshot: std::sync::RwLock<ProcessInfo>,
    process: Mutex<ManagedProcess>,
}

impl AppEntry {
    fn new(app_id: &str, capacity: usize, events: Arc<EventBroadcaster>) -> Self {
        let process = ManagedProcess::new(app_id);
        Self {
            logs: Arc::new(LogBuffer::new(app_id, capacity, events)),
            snapshot: std::sync::RwLock::new(process.info()),
            process: Mutex::new(process),
        }
    }

    fn snapshot(&self) -> Option<ProcessInfo> {
        self.snapshot.read().ok().map(|info| info.clone())
    }

    /// Refresh the read snapshot and emit a status event. Callers hold the app lock.
    fn publish(&self, managed: &ManagedProcess, events: &EventBroadcaster) {
        let info = managed.info();
        if let Ok(mut snapshot) = self.snapshot.write() {
            *snapshot = info.clone();
        }
        events.broadcast(&DashboardEvent::Status(StatusEvent {
            app_id: info.app_id,
            status: info.status,
            pid: info.pid,
            exit_code: info.exit_code,
            exit_signal: info.exit_signal,
            error: info.error,
        }));
    }
}

#[derive(Debug)]
pub struct ProcessManager {
    config: ProcessManagerConfig,
    events: Arc<EventBroadcaster>,
    processes: RwLock<HashMap<String, Arc<AppEntry>>>,
}

impl ProcessManager {
    pub fn new(config: ProcessManagerConfig, events: Arc<EventBroadcaster>) -> Self {
        Self {
            config,
            events,
            processes: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ProcessManagerConfig {
        &self.config
    }

    /// Validate `command` and launch it for `app_id` in `cwd`.
    ///
    /// The child gets `PORT` when a port is given and prefers binaries from
    /// `cwd/node_modules/.bin`. A spawn failure leaves the app in `error`.
    pub async fn start(
        &self,
        app_id: &str,
        cwd: impl Into<PathBuf>,
        command: &str,
        port: Option<u16>,
    ) -> Result<ProcessInfo, DashboardError> {
        command_validator::validate(command)?;
        let (program, args) = split_command(command).ok_or_else(|| DashboardError::InvalidRequest {
            message: "command is empty".to_string(),
        })?;
        self.start_spec(
            app_id,
            LaunchSpec {
                cwd: cwd.into(),
                command: command.trim().to_string(),
                program,
                args,
                port,
            },
        )
        .await
    }

    async fn start_spec(&self, app_id: &str, spec: LaunchSpec) -> Result<ProcessInfo, DashboardError> {
        let entry = self.entry(app_id).await;
        let mut managed = entry.process.lock().await;
        if managed.is_active() {
            return Err(DashboardError::AlreadyRunning {
                app_id: app_id.to_string(),
            });
        }
        entry.logs.clear();
        managed.spec = Some(spec);
        launch(&entry, &mut managed, &self.events)
    }

    /// Terminate the app's whole process group and mark it stopped.
    pub async fn stop(&self, app_id: &str) -> Result<ProcessInfo, DashboardError> {
        let entry = self.lookup(app_id).await.ok_or_else(|| not_running(app_id))?;
        let mut managed = entry.process.lock().await;
        if managed.status != ProcessStatus::Running || managed.run.is_none() {
            return Err(not_running(app_id));
        }
        stop_locked(&entry, &mut managed, &self.events);
        Ok(managed.info())
    }

    /// Stop if running, wait for the settle delay, then start again with the
    /// recorded working directory and command.
    pub async fn restart(&self, app_id: &str) -> Result<ProcessInfo, DashboardError> {
        let entry = self.lookup(app_id).await.ok_or_else(|| not_running(app_id))?;
        let mut managed = entry.process.lock().await;
        if managed.spec.is_none() {
            return Err(not_running(app_id));
        }

        let was_running = managed.status == ProcessStatus::Running;
        managed.status = ProcessStatus::Restarting;
        managed.error = None;
        entry.publish(&managed, &self.events);
        if was_running {
            managed.signal_stop();
            entry.logs.push(LogStream::System, "Restarting");
        }
        tracing::info!(app_id, delay_ms = self.config.restart_delay.as_millis() as u64, "restarting app");

        tokio::time::sleep(self.config.restart_delay).await;
        launch(&entry, &mut managed, &self.events)
    }

    /// Stop the app if needed and forget it entirely.
    pub async fn remove(&self, app_id: &str) -> Option<ProcessInfo> {
        let entry = self.processes.write().await.remove(app_id)?;
        let mut managed = entry.process.lock().await;
        if managed.status == ProcessStatus::Running {
            stop_locked(&entry, &mut managed, &self.events);
        } else {
            managed.signal_stop();
        }
        Some(managed.info())
    }

    pub async fn get(&self, app_id: &str) -> Option<ProcessInfo> {
        self.lookup(app_id).await.and_then(|entry| entry.snapshot())
    }

    pub async fn status(&self, app_id: &str) -> ProcessStatus {
        self.get(app_id)
            .await
            .map(|info| info.status)
            .unwrap_or_default()
    }

    pub async fn list(&self) -> Vec<ProcessInfo> {
        let entries: Vec<Arc<AppEntry>> = self.processes.read().await.values().cloned().collect();
        let mut infos: Vec<ProcessInfo> = entries.iter().filter_map(|entry| entry.snapshot()).collect();
        infos.sort_by(|a, b| a.app_id.cmp(&b.app_id));
        infos
    }

    /// The most recent `limit` log lines (all retained lines when `None`).
    pub async fn get_logs(&self, app_id: &str, limit: Option<usize>) -> Vec<LogLine> {
        match self.lookup(app_id).await {
            Some(entry) => entry.logs.tail(limit),
            None => Vec::new(),
        }
    }

    /// Live CPU and memory for the app's process; zeroed when not running or
    /// when the host query fails.
    pub async fn get_stats(&self, app_id: &str) -> ProcessStats {
        let Some(pid) = self.get(app_id).await.and_then(running_pid) else {
            return ProcessStats::default();
        };
        sample_usage(vec![pid])
            .await
            .remove(&pid)
            .unwrap_or_default()
    }

    /// Stats for every running app, sampled in one pass.
    pub async fn running_stats(&self) -> Vec<AppStats> {
        let running: Vec<(String, u32)> = self
            .list()
            .await
            .into_iter()
            .filter_map(|info| running_pid(info.clone()).map(|pid| (info.app_id, pid)))
            .collect();
        if running.is_empty() {
            return Vec::new();
        }
        let usage = sample_usage(running.iter().map(|(_, pid)| *pid).collect()).await;
        running
            .into_iter()
            .map(|(app_id, pid)| AppStats {
                app_id,
                stats: usage.get(&pid).copied().unwrap_or_default(),
            })
            .collect()
    }

    /// Best-effort stop of every running app, used on shutdown.
    pub async fn shutdown_all(&self) {
        let entries: Vec<Arc<AppEntry>> = self.processes.read().await.values().cloned().collect();
        for entry in entries {
            let mut managed = entry.process.lock().await;
            if managed.status == ProcessStatus::Running {
                stop_locked(&entry, &mut managed, &self.events);
            }
        }
    }

    async fn lookup(&self, app_id: &str) -> Option<Arc<AppEntry>> {
        self.processes.read().await.get(app_id).cloned()
    }

    async fn entry(&self, app_id: &str) -> Arc<AppEntry> {
        if let Some(entry) = self.lookup(app_id).await {
            return entry;
        }
        let mut processes = self.processes.write().await;
        processes
            .entry(app_id.to_string())
            .or_insert_with(|| {
                Arc::new(AppEntry::new(
                    app_id,
                    self.config.log_capacity,
                    self.events.clone(),
                ))
            })
            .clone()
    }
}

fn not_running(app_id: &str) -> DashboardError {
    DashboardError::NotRunning {
        app_id: app_id.to_string(),
    }
}

fn running_pid(info: ProcessInfo) -> Option<u32> {
    (info.status == ProcessStatus::Running).then_some(info.pid).flatten()
}

fn stop_locked(entry: &AppEntry, managed: &mut ManagedProcess, events: &EventBroadcaster) {
    managed.signal_stop();
    managed.status = ProcessStatus::Stopped;
    managed.pid = None;
    entry.logs.push(LogStream::System, "Process terminated");
    entry.publish(managed, events);
    tracing::info!(app_id = %managed.app_id, "app stopped");
}

/// Spawn the recorded command. Callers hold the app lock.
fn launch(
    entry: &Arc<AppEntry>,
    managed: &mut ManagedProcess,
    events: &Arc<EventBroadcaster>,
) -> Result<ProcessInfo, DashboardError> {
    let Some(spec) = managed.spec.clone() else {
        return Err(not_running(&managed.app_id));
    };
    managed.status = ProcessStatus::Starting;
    managed.pid = None;
    managed.start_time = None;
    managed.exit_code = None;
    managed.exit_signal = None;
    managed.error = None;
    entry.publish(managed, events);

    let mut child = match build_command(&spec).spawn() {
        Ok(child) => child,
        Err(err) => {
            let message = err.to_string();
            tracing::warn!(app_id = %managed.app_id, command = %spec.command, error = %message, "failed to spawn app");
            managed.status = ProcessStatus::Error;
            managed.error = Some(message.clone());
            managed.run = None;
            entry.logs.push(LogStream::System, format!("Failed to start: {message}"));
            entry.publish(managed, events);
            return Err(DashboardError::SpawnFailure {
                app_id: managed.app_id.clone(),
                message,
            });
        }
    };

    let run_id = managed.next_run_id;
    managed.next_run_id += 1;
    let pid = child.id();
    let cancel = CancellationToken::new();
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, LogStream::Stdout, entry.logs.clone(), cancel.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, LogStream::Stderr, entry.logs.clone(), cancel.clone()));
    }
    let (kill_tx, kill_rx) = oneshot::channel();
    managed.run = Some(RunHandle {
        id: run_id,
        pid,
        kill: Some(kill_tx),
        stop_requested: false,
    });
    managed.status = ProcessStatus::Running;
    managed.pid = pid;
    managed.start_time = Some(format_timestamp());
    entry.publish(managed, events);
    tracing::info!(app_id = %managed.app_id, pid = ?pid, command = %spec.command, port = ?spec.port, "app started");

    tokio::spawn(watch_exit(
        child,
        readers,
        kill_rx,
        Arc::downgrade(entry),
        run_id,
        cancel,
        events.clone(),
    ));
    Ok(managed.info())
}

fn build_command(spec: &LaunchSpec) -> Command {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .env("PATH", local_bin_path(&spec.cwd))
        .env("FORCE_COLOR", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(port) = spec.port {
        command.env("PORT", port.to_string());
    }
    #[cfg(unix)]
    command.process_group(0);
    command
}

fn local_bin_path(cwd: &Path) -> OsString {
    let existing = std::env::var_os("PATH").unwrap_or_default();
    let local = cwd.join("node_modules").join(".bin");
    let joined = std::env::join_paths(std::iter::once(local).chain(std::env::split_paths(&existing)));
    match joined {
        Ok(path) => path,
        Err(_) => existing,
    }
}

fn spawn_reader<R>(
    reader: R,
    stream: LogStream,
    logs: Arc<LogBuffer>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            tokio::select! {
                biased;
                line = lines.next_line() => match line {
                    Ok(Some(line)) => logs.push(stream, line),
                    Ok(None) => break,
                    Err(err) => {
                        tracing::debug!(app_id = %logs.app_id, ?stream, error = %err, "log stream closed");
                        break;
                    }
                },
                _ = cancel.cancelled() => break,
            }
        }
    })
}

async fn watch_exit(
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    kill: oneshot::Receiver<()>,
    entry: Weak<AppEntry>,
    run_id: u64,
    cancel: CancellationToken,
    events: Arc<EventBroadcaster>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = kill => {
            if let Err(err) = child.start_kill() {
                tracing::debug!(error = %err, "start_kill failed");
            }
            child.wait().await
        }
    };
    // Let readers drain what the child wrote before it exited. Grandchildren
    // holding the pipes open are cut off after the grace period.
    if tokio::time::timeout(READER_DRAIN, futures::future::join_all(readers))
        .await
        .is_err()
    {
        tracing::debug!(run_id, "log readers still open after exit, cancelling");
    }
    cancel.cancel();

    let Some(entry) = entry.upgrade() else {
        return;
    };
    let mut managed = entry.process.lock().await;
    let stop_requested = match managed.run.as_ref() {
        Some(run) if run.id == run_id => run.stop_requested,
        _ => {
            tracing::debug!(app_id = %managed.app_id, run_id, "ignoring exit of a superseded run");
            return;
        }
    };
    managed.run = None;

    let (exit_code, exit_signal) = match &status {
        Ok(status) => (status.code(), exit_signal(status)),
        Err(err) => {
            tracing::warn!(app_id = %managed.app_id, error = %err, "failed to wait for app");
            (None, None)
        }
    };
    managed.exit_code = exit_code;
    managed.exit_signal = exit_signal.clone();
    if stop_requested {
        if let Ok(mut snapshot) = entry.snapshot.write() {
            *snapshot = managed.info();
        }
        return;
    }

    managed.pid = None;
    managed.status = if exit_code == Some(0) {
        ProcessStatus::Stopped
    } else {
        ProcessStatus::Error
    };
    let reason = match (exit_code, exit_signal) {
        (Some(code), _) => format!("code {code}"),
        (None, Some(signal)) => format!("signal {signal}"),
        (None, None) => "unknown status".to_string(),
    };
    tracing::info!(app_id = %managed.app_id, %reason, "app exited");
    entry.logs.push(LogStream::System, format!("Process exited with {reason}"));
    entry.publish(&managed, &events);
}

fn terminate(app_id: &str, run: &mut RunHandle) {
    #[cfg(unix)]
    if let Some(pid) = run.pid {
        let pid = pid as libc::pid_t;
        // The child leads its own process group, so this also reaches grandchildren.
        if unsafe { libc::killpg(pid, libc::SIGTERM) } == 0 {
            return;
        }
        let err = std::io::Error::last_os_error();
        tracing::warn!(
            app_id,
            pid,
            error = %err,
            "process group signal failed, signaling the direct child only; grandchildren may be orphaned"
        );
        if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
            return;
        }
    }
    if let Some(kill) = run.kill.take() {
        let _ = kill.send(());
    } else {
        tracing::debug!(app_id, "no way left to signal app");
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;

    status.signal().map(|signal| match signal {
        libc::SIGTERM => "SIGTERM".to_string(),
        libc::SIGKILL => "SIGKILL".to_string(),
        libc::SIGINT => "SIGINT".to_string(),
        libc::SIGHUP => "SIGHUP".to_string(),
        libc::SIGQUIT => "SIGQUIT".to_string(),
        libc::SIGSEGV => "SIGSEGV".to_string(),
        libc::SIGABRT => "SIGABRT".to_string(),
        other => format!("signal {other}"),
    })
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<String> {
    None
}

async fn sample_usage(pids: Vec<u32>) -> HashMap<u32, ProcessStats> {
    tokio::task::spawn_blocking(move || {
        use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

        let pids: Vec<Pid> = pids.into_iter().map(Pid::from_u32).collect();
        let kind = ProcessRefreshKind::new().with_cpu().with_memory();
        let mut system = System::new();
        // CPU usage is a delta between two refreshes.
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&pids), true, kind);
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&pids), true, kind);
        pids.iter()
            .filter_map(|pid| {
                system.process(*pid).map(|process| {
                    (
                        pid.as_u32(),
                        ProcessStats {
                            cpu: process.cpu_usage(),
                            memory: process.memory() as f64 / (1024.0 * 1024.0),
                        },
                    )
                })
            })
            .collect()
    })
    .await
    .unwrap_or_else(|err| {
        tracing::debug!(error = %err, "stats sampling task failed");
        HashMap::new()
    })
}
