//! Aggregated runtime configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::events::BroadcasterConfig;
use crate::port_allocator::PortAllocatorConfig;
use crate::process_manager::ProcessManagerConfig;
use crate::terminal_sessions::TerminalConfig;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 7070;

const SETTINGS_FILE: &str = "settings.json";
const SESSIONS_FILE: &str = "terminal-sessions.json";

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub host: String,
    pub port: u16,
    /// Directory holding the settings document and the session table.
    pub data_dir: PathBuf,
    pub ports: PortAllocatorConfig,
    pub processes: ProcessManagerConfig,
    pub terminals: TerminalConfig,
    pub events: BroadcasterConfig,
    /// How often running apps are sampled for the stats channel.
    pub stats_interval: Duration,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            data_dir: default_data_dir(),
            ports: PortAllocatorConfig::default(),
            processes: ProcessManagerConfig::default(),
            terminals: TerminalConfig::default(),
            events: BroadcasterConfig::default(),
            stats_interval: Duration::from_secs(5),
        }
    }
}

impl DashboardConfig {
    /// Defaults with state kept under `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.data_dir.join(SESSIONS_FILE)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("devdash"))
        .unwrap_or_else(|| PathBuf::from(".devdash"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_files_live_under_data_dir() {
        let config = DashboardConfig::with_data_dir("/tmp/devdash-test");
        assert_eq!(
            config.settings_path(),
            PathBuf::from("/tmp/devdash-test/settings.json")
        );
        assert_eq!(
            config.sessions_path(),
            PathBuf::from("/tmp/devdash-test/terminal-sessions.json")
        );
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.stats_interval, Duration::from_secs(5));
    }
}
