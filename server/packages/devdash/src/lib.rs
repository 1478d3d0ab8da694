//! devdash core: process supervision, port allocation, terminal sessions and
//! the event fan-out that a local developer dashboard is built on.

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub mod cli;
pub mod command_validator;
pub mod config;
pub mod events;
pub mod persistence;
pub mod port_allocator;
pub mod process_manager;
pub mod router;
pub mod settings;
mod single_flight;
pub mod terminal;
pub mod terminal_sessions;

pub(crate) fn format_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

pub(crate) fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339).ok()
}
