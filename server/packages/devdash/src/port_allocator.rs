//! TCP port probing, advisory allocation and conflict resolution.
//!
//! Allocations are bookkeeping only: the child process binds the port itself.
//! Availability is always re-checked against the OS by binding
//! `127.0.0.1:<port>` and releasing it immediately.

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use devdash_error::DashboardError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::net::TcpSocket;
use tokio::sync::Mutex;
use utoipa::ToSchema;

use crate::format_timestamp;
use crate::single_flight::SingleFlight;

/// Extra ports scanned past a conflicting preferred port when looking for a suggestion.
const SUGGESTION_WINDOW: u16 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self, DashboardError> {
        if start == 0 || start > end {
            return Err(DashboardError::InvalidRequest {
                message: format!("invalid port range {start}-{end}"),
            });
        }
        Ok(Self { start, end })
    }

    pub fn len(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    /// A constructed range always holds at least one port.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 3000,
            end: 3999,
        }
    }
}

/// Whether an app keeps its previous port across restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AllocationPolicy {
    /// Reuse the app's last allocation while the port is still free.
    #[default]
    Sticky,
    /// Always scan for a port.
    Fresh,
}

#[derive(Debug, Clone)]
pub struct PortAllocatorConfig {
    pub range: PortRange,
    pub policy: AllocationPolicy,
    /// Wait after a forced kill before re-probing the port.
    pub kill_settle: Duration,
    /// Percentage of extra ports a bulk assignment assumes will be taken.
    pub conflict_headroom_percent: usize,
}

impl Default for PortAllocatorConfig {
    fn default() -> Self {
        Self {
            range: PortRange::default(),
            policy: AllocationPolicy::Sticky,
            kill_settle: Duration::from_millis(500),
            conflict_headroom_percent: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortAllocation {
    pub app_id: String,
    pub port: u16,
    pub allocated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortProcess {
    pub pid: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortStatus {
    pub port: u16,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<PortProcess>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortConflict {
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<PortProcess>,
    /// Another app already holds an allocation for this port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_port: Option<u16>,
}

impl From<PortConflict> for DashboardError {
    fn from(conflict: PortConflict) -> Self {
        DashboardError::PortConflict {
            port: conflict.port,
            pid: conflict.process.as_ref().map(|process| process.pid),
            process_name: conflict.process.map(|process| process.name),
            reserved_by: conflict.reserved_by,
            suggested_port: conflict.suggested_port,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum AllocationResult {
    #[serde(rename_all = "camelCase")]
    Allocated {
        allocation: PortAllocation,
        /// The app's previous allocation was kept.
        reused: bool,
    },
    #[serde(rename_all = "camelCase")]
    Conflict { conflict: PortConflict },
}

impl AllocationResult {
    pub fn port(&self) -> Option<u16> {
        match self {
            AllocationResult::Allocated { allocation, .. } => Some(allocation.port),
            AllocationResult::Conflict { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum KillOutcome {
    /// The occupant was killed and the port is free.
    #[serde(rename_all = "camelCase")]
    Killed { port: u16, process: PortProcess },
    /// The port was already free.
    #[serde(rename_all = "camelCase")]
    NothingOccupying { port: u16 },
    /// The port is still bound after the kill attempt.
    #[serde(rename_all = "camelCase")]
    StillOccupied {
        port: u16,
        #[serde(skip_serializing_if = "Option::is_none")]
        process: Option<PortProcess>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortAssignment {
    pub app_id: String,
    pub port: u16,
}

type AllocationTable = Arc<Mutex<HashMap<String, PortAllocation>>>;

#[derive(Debug)]
pub struct PortAllocator {
    config: PortAllocatorConfig,
    allocations: AllocationTable,
    bulk: SingleFlight<Result<Vec<PortAssignment>, DashboardError>>,
}

impl PortAllocator {
    pub fn new(config: PortAllocatorConfig) -> Self {
        Self {
            config,
            allocations: Arc::new(Mutex::new(HashMap::new())),
            bulk: SingleFlight::new(),
        }
    }

    pub fn config(&self) -> &PortAllocatorConfig {
        &self.config
    }

    /// Probe `127.0.0.1:<port>`. Never fails; any bind error means unavailable.
    pub async fn is_available(&self, port: u16) -> bool {
        probe_port(port)
    }

    /// First available port in `[start, end]`.
    pub async fn find_available(&self, start: u16, end: u16) -> Option<u16> {
        scan_ports(move || (start..=end).find(|port| probe_port(*port)))
            .await
            .flatten()
    }

    pub async fn check_port(&self, port: u16) -> PortStatus {
        let available = probe_port(port);
        let process = if available {
            None
        } else {
            process_on_port(port).await
        };
        PortStatus {
            port,
            available,
            process,
        }
    }

    /// Reserve a port for `app_id`.
    ///
    /// Returns a structured conflict (not an error) when `preferred` is taken.
    pub async fn allocate(
        &self,
        app_id: &str,
        preferred: Option<u16>,
    ) -> Result<AllocationResult, DashboardError> {
        let mut allocations = self.allocations.lock().await;

        if self.config.policy == AllocationPolicy::Sticky {
            if let Some(existing) = allocations.get(app_id) {
                let wanted = preferred.map_or(true, |port| port == existing.port);
                if wanted && probe_port(existing.port) {
                    tracing::debug!(app_id, port = existing.port, "reusing port allocation");
                    return Ok(AllocationResult::Allocated {
                        allocation: existing.clone(),
                        reused: true,
                    });
                }
            }
        }

        if let Some(port) = preferred {
            if port == 0 {
                return Err(DashboardError::InvalidRequest {
                    message: "port must be between 1 and 65535".to_string(),
                });
            }
            let reserved_by = reserved_by_other(&allocations, port, app_id);
            if reserved_by.is_none() && probe_port(port) {
                let allocation = reserve(&mut allocations, app_id, port);
                return Ok(AllocationResult::Allocated {
                    allocation,
                    reused: false,
                });
            }

            let process = if reserved_by.is_none() {
                process_on_port(port).await
            } else {
                None
            };
            let window_end = port
                .saturating_add(SUGGESTION_WINDOW)
                .max(self.config.range.end);
            let suggested_port = next_free(&allocations, app_id, port.saturating_add(1), window_end)
                .await
                .filter(|suggested| *suggested > port);
            tracing::info!(
                app_id,
                port,
                pid = process.as_ref().map(|p| p.pid),
                suggested_port,
                "preferred port unavailable"
            );
            return Ok(AllocationResult::Conflict {
                conflict: PortConflict {
                    port,
                    process,
                    reserved_by,
                    suggested_port,
                },
            });
        }

        let range = self.config.range;
        match next_free(&allocations, app_id, range.start, range.end).await {
            Some(port) => Ok(AllocationResult::Allocated {
                allocation: reserve(&mut allocations, app_id, port),
                reused: false,
            }),
            None => Err(DashboardError::PortRangeExhausted {
                start: range.start,
                end: range.end,
                message: "no free port left in range".to_string(),
            }),
        }
    }

    pub async fn allocation(&self, app_id: &str) -> Option<PortAllocation> {
        self.allocations.lock().await.get(app_id).cloned()
    }

    pub async fn allocations(&self) -> Vec<PortAllocation> {
        let mut list: Vec<PortAllocation> =
            self.allocations.lock().await.values().cloned().collect();
        list.sort_by_key(|allocation| allocation.port);
        list
    }

    pub async fn release(&self, app_id: &str) -> Option<PortAllocation> {
        let released = self.allocations.lock().await.remove(app_id);
        if let Some(allocation) = &released {
            tracing::debug!(app_id, port = allocation.port, "released port allocation");
        }
        released
    }

    /// Forcefully kill whatever is listening on `port` and confirm it is free.
    pub async fn kill_occupant(&self, port: u16) -> Result<KillOutcome, DashboardError> {
        let Some(process) = process_on_port(port).await else {
            if probe_port(port) {
                return Ok(KillOutcome::NothingOccupying { port });
            }
            return Ok(KillOutcome::StillOccupied {
                port,
                process: None,
            });
        };

        force_kill(process.pid)?;
        tracing::info!(port, pid = process.pid, name = %process.name, "killed port occupant");
        tokio::time::sleep(self.config.kill_settle).await;

        if probe_port(port) {
            Ok(KillOutcome::Killed { port, process })
        } else {
            Ok(KillOutcome::StillOccupied {
                port,
                process: Some(process),
            })
        }
    }

    /// Occupied ports in `[start, end]` with their owning process where it can be resolved.
    pub async fn scan_range(&self, start: u16, end: u16) -> Result<Vec<PortStatus>, DashboardError> {
        let range = PortRange::new(start, end)?;
        let occupied: Vec<u16> = scan_ports(move || {
            (range.start..=range.end)
                .filter(|port| !probe_port(*port))
                .collect()
        })
        .await
        .unwrap_or_default();
        if occupied.is_empty() {
            return Ok(Vec::new());
        }
        let table = listener_table().await;
        Ok(occupied
            .into_iter()
            .map(|port| PortStatus {
                port,
                available: false,
                process: table.get(&port).cloned(),
            })
            .collect())
    }

    /// Assign strictly increasing ports to `app_ids`, skipping occupied ones.
    ///
    /// Concurrent calls join the run already in flight.
    pub async fn assign_sequential(
        &self,
        app_ids: Vec<String>,
        range: Option<PortRange>,
    ) -> Result<Vec<PortAssignment>, DashboardError> {
        let allocations = self.allocations.clone();
        let range = range.unwrap_or(self.config.range);
        let headroom = self.config.conflict_headroom_percent;
        self.bulk
            .run(move || assign_sequential_inner(allocations, app_ids, range, headroom))
            .await
    }
}

async fn assign_sequential_inner(
    allocations: AllocationTable,
    app_ids: Vec<String>,
    range: PortRange,
    headroom_percent: usize,
) -> Result<Vec<PortAssignment>, DashboardError> {
    let count = app_ids.len();
    let needed = count + (count * headroom_percent).div_ceil(100);
    if range.len() < needed {
        return Err(DashboardError::PortRangeExhausted {
            start: range.start,
            end: range.end,
            message: format!(
                "{count} apps need about {needed} ports but the range only has {}",
                range.len()
            ),
        });
    }

    let mut allocations = allocations.lock().await;
    let mut assignments = Vec::with_capacity(count);
    let mut next = Some(range.start);

    for app_id in app_ids {
        let found = match next.filter(|port| *port <= range.end) {
            Some(start) => next_free(&allocations, &app_id, start, range.end).await,
            None => None,
        };
        let Some(port) = found else {
            return Err(DashboardError::PortRangeExhausted {
                start: range.start,
                end: range.end,
                message: format!(
                    "ran out of ports after assigning {} of {count} apps",
                    assignments.len()
                ),
            });
        };
        next = port.checked_add(1);
        reserve(&mut allocations, &app_id, port);
        assignments.push(PortAssignment { app_id, port });
    }
    Ok(assignments)
}

fn reserve(
    allocations: &mut HashMap<String, PortAllocation>,
    app_id: &str,
    port: u16,
) -> PortAllocation {
    let allocation = PortAllocation {
        app_id: app_id.to_string(),
        port,
        allocated_at: format_timestamp(),
    };
    allocations.insert(app_id.to_string(), allocation.clone());
    allocation
}

fn reserved_by_other(
    allocations: &HashMap<String, PortAllocation>,
    port: u16,
    app_id: &str,
) -> Option<String> {
    allocations
        .values()
        .find(|allocation| allocation.port == port && allocation.app_id != app_id)
        .map(|allocation| allocation.app_id.clone())
}

/// First port in `[start, end]` that is free on the host and not reserved by another app.
async fn next_free(
    allocations: &HashMap<String, PortAllocation>,
    app_id: &str,
    start: u16,
    end: u16,
) -> Option<u16> {
    let reserved: HashSet<u16> = allocations
        .values()
        .filter(|allocation| allocation.app_id != app_id)
        .map(|allocation| allocation.port)
        .collect();
    scan_ports(move || (start..=end).find(|port| !reserved.contains(port) && probe_port(*port)))
        .await
        .flatten()
}

/// Run a port scan on the blocking pool. A range can span thousands of binds.
async fn scan_ports<T, F>(scan: F) -> Option<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(scan).await {
        Ok(found) => Some(found),
        Err(err) => {
            tracing::warn!(error = %err, "port scan task failed");
            None
        }
    }
}

/// Bind and immediately release `127.0.0.1:<port>`.
///
/// `SO_REUSEADDR` is set the way dev servers set it, so a port that only has
/// TIME_WAIT connections left counts as free. A live listener on loopback or
/// the wildcard address still makes the bind fail.
fn probe_port(port: u16) -> bool {
    if port == 0 {
        return false;
    }
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
    let Ok(socket) = TcpSocket::new_v4() else {
        return false;
    };
    #[cfg(unix)]
    if socket.set_reuseaddr(true).is_err() {
        return false;
    }
    socket.bind(addr).is_ok()
}

/// Resolve the process listening on `port`.
pub async fn process_on_port(port: u16) -> Option<PortProcess> {
    listener_table().await.remove(&port)
}

async fn listener_table() -> HashMap<u16, PortProcess> {
    let listeners =
        tokio::task::spawn_blocking(|| listeners::get_all().map_err(|err| err.to_string())).await;
    match listeners {
        Ok(Ok(listeners)) => listeners
            .into_iter()
            .map(|listener| {
                (
                    listener.socket.port(),
                    PortProcess {
                        pid: listener.process.pid,
                        name: listener.process.name,
                    },
                )
            })
            .collect(),
        Ok(Err(err)) => {
            tracing::debug!(error = %err, "failed to list socket listeners");
            HashMap::new()
        }
        Err(err) => {
            tracing::debug!(error = %err, "listener lookup task failed");
            HashMap::new()
        }
    }
}

#[cfg(unix)]
fn force_kill(pid: u32) -> Result<(), DashboardError> {
    let pid = i32::try_from(pid).map_err(|_| DashboardError::InvalidRequest {
        message: format!("invalid pid {pid}"),
    })?;
    let rc = unsafe { libc::kill(pid, libc::SIGKILL) };
    if rc == 0 {
        Ok(())
    } else {
        Err(DashboardError::StreamError {
            message: format!(
                "failed to kill pid {pid}: {}",
                std::io::Error::last_os_error()
            ),
        })
    }
}

#[cfg(not(unix))]
fn force_kill(pid: u32) -> Result<(), DashboardError> {
    Err(DashboardError::InvalidRequest {
        message: format!("killing pid {pid} is only supported on Unix hosts"),
    })
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    /// Bind `count` consecutive loopback ports and return them with their listeners.
    fn bind_consecutive(count: u16) -> (u16, Vec<TcpListener>) {
        let mut base = 41000u16;
        loop {
            let listeners: Vec<TcpListener> = (base..base + count)
                .filter_map(|port| TcpListener::bind(("127.0.0.1", port)).ok())
                .collect();
            if listeners.len() == usize::from(count) {
                return (base, listeners);
            }
            base += count + 1;
        }
    }

    fn allocator() -> PortAllocator {
        PortAllocator::new(PortAllocatorConfig::default())
    }

    #[tokio::test]
    async fn bound_port_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!allocator().is_available(port).await);
        drop(listener);
        assert!(allocator().is_available(port).await);
        assert!(!allocator().is_available(0).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn port_left_in_time_wait_is_available() {
        use std::io::Read;
        use std::net::TcpStream;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        // Server side closes first, so it is the side left in TIME_WAIT.
        drop(accepted);
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
        drop(client);
        drop(listener);
        std::thread::sleep(Duration::from_millis(50));

        let allocator = allocator();
        assert!(allocator.is_available(port).await);
        let result = allocator.allocate("web", Some(port)).await.unwrap();
        assert!(matches!(result, AllocationResult::Allocated { reused: false, .. }));
        assert_eq!(result.port(), Some(port));

        // A live listener still counts as occupied.
        let _rebound = TcpListener::bind(("127.0.0.1", port)).unwrap();
        assert!(!allocator.is_available(port).await);
    }

    #[tokio::test]
    async fn find_available_skips_bound_ports() {
        let (base, mut listeners) = bind_consecutive(3);
        let allocator = allocator();

        // Free the last of the three: the first two remain bound.
        drop(listeners.pop());
        assert_eq!(allocator.find_available(base, base + 2).await, Some(base + 2));

        let _third = TcpListener::bind(("127.0.0.1", base + 2)).unwrap();
        assert_eq!(allocator.find_available(base, base + 2).await, None);
    }

    #[tokio::test]
    async fn conflict_suggests_a_later_free_port() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let allocator = allocator();

        let result = allocator.allocate("app2", Some(port)).await.unwrap();
        let AllocationResult::Conflict { conflict } = result else {
            panic!("expected conflict, got {result:?}");
        };
        assert_eq!(conflict.port, port);
        let suggested = conflict.suggested_port.expect("suggested port");
        assert!(suggested > port);
        assert!(allocator.is_available(suggested).await);
        assert!(allocator.allocation("app2").await.is_none());
    }

    #[tokio::test]
    async fn allocated_port_bound_by_child_is_seen_by_second_allocator() {
        let allocator = allocator();
        let port = {
            let probe = TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        let result = allocator.allocate("web", Some(port)).await.unwrap();
        assert_eq!(result.port(), Some(port));

        let _child_binding = TcpListener::bind(("127.0.0.1", port)).unwrap();
        let other = PortAllocator::new(PortAllocatorConfig::default());
        assert!(!other.is_available(port).await);
    }

    #[tokio::test]
    async fn sticky_allocation_is_reused() {
        let (base, listeners) = bind_consecutive(4);
        drop(listeners);
        let config = PortAllocatorConfig {
            range: PortRange::new(base, base + 3).unwrap(),
            ..PortAllocatorConfig::default()
        };
        let allocator = PortAllocator::new(config.clone());

        let first = allocator.allocate("web", None).await.unwrap();
        let second = allocator.allocate("web", None).await.unwrap();
        assert_eq!(first.port(), second.port());
        assert!(matches!(second, AllocationResult::Allocated { reused: true, .. }));

        let fresh = PortAllocator::new(PortAllocatorConfig {
            policy: AllocationPolicy::Fresh,
            ..config
        });
        fresh.allocate("web", None).await.unwrap();
        let again = fresh.allocate("web", None).await.unwrap();
        assert!(matches!(again, AllocationResult::Allocated { reused: false, .. }));
    }

    #[tokio::test]
    async fn one_allocation_per_port() {
        let (base, listeners) = bind_consecutive(3);
        drop(listeners);
        let allocator = PortAllocator::new(PortAllocatorConfig {
            range: PortRange::new(base, base + 2).unwrap(),
            ..PortAllocatorConfig::default()
        });

        let a = allocator.allocate("a", None).await.unwrap().port().unwrap();
        let b = allocator.allocate("b", None).await.unwrap().port().unwrap();
        assert_ne!(a, b);

        let result = allocator.allocate("c", Some(a)).await.unwrap();
        let AllocationResult::Conflict { conflict } = result else {
            panic!("expected conflict");
        };
        assert_eq!(conflict.reserved_by.as_deref(), Some("a"));

        allocator.release("a").await;
        assert_eq!(allocator.allocate("c", Some(a)).await.unwrap().port(), Some(a));
    }

    #[tokio::test]
    async fn bulk_assignment_is_strictly_increasing_and_skips_occupied() {
        let (base, mut listeners) = bind_consecutive(12);
        // Keep base + 1 bound, free everything else.
        let occupied = listeners.remove(1);
        drop(listeners);

        let allocator = allocator();
        let apps: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let assignments = allocator
            .assign_sequential(apps, Some(PortRange::new(base, base + 11).unwrap()))
            .await
            .unwrap();
        let ports: Vec<u16> = assignments.iter().map(|a| a.port).collect();
        assert_eq!(ports, vec![base, base + 2, base + 3]);
        assert!(ports.windows(2).all(|pair| pair[0] < pair[1]));
        drop(occupied);
    }

    #[tokio::test]
    async fn bulk_assignment_fails_fast_when_range_is_too_small() {
        let allocator = allocator();
        let apps: Vec<String> = (0..5).map(|i| format!("app{i}")).collect();
        let err = allocator
            .assign_sequential(apps, Some(PortRange::new(45000, 45004).unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, DashboardError::PortRangeExhausted { .. }));
        assert!(allocator.allocations().await.is_empty());
    }

    #[tokio::test]
    async fn kill_reports_free_port_distinctly() {
        let port = {
            let probe = TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        let outcome = allocator().kill_occupant(port).await.unwrap();
        assert_eq!(outcome, KillOutcome::NothingOccupying { port });
    }

    #[tokio::test]
    async fn scan_range_reports_only_occupied_ports() {
        let (base, mut listeners) = bind_consecutive(3);
        drop(listeners.remove(1));
        let occupied = allocator().scan_range(base, base + 2).await.unwrap();
        let ports: Vec<u16> = occupied.iter().map(|status| status.port).collect();
        assert_eq!(ports, vec![base, base + 2]);
        assert!(occupied.iter().all(|status| !status.available));
        assert!(allocator().scan_range(10, 5).await.is_err());
    }

    #[test]
    fn allocation_result_serializes_with_status_tag() {
        let result = AllocationResult::Conflict {
            conflict: PortConflict {
                port: 5000,
                process: Some(PortProcess {
                    pid: 7,
                    name: "node".to_string(),
                }),
                reserved_by: None,
                suggested_port: Some(5001),
            },
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "conflict");
        assert_eq!(json["conflict"]["suggestedPort"], 5001);
        assert_eq!(json["conflict"]["process"]["pid"], 7);
    }
}
