//! # Instance Inspection
//!
//! Pure helpers for reasoning about a fleet of game server instances from
//! the outside: classifying the management tool's status text, reading
//! player lists, and keeping port assignments collision free. Nothing in
//! this crate performs I/O.
//!
//! ## Modules
//!
//! - `status`: lifecycle state plus PID, player counts, name and version
//! - `players`: online players from `listplayers` output
//! - `ports`: uniqueness and range checks, and free-port suggestions

pub mod players;
pub mod ports;
pub mod status;

pub use players::{parse_player_list, OnlinePlayer};
pub use ports::{
    suggest_assignment, validate_against_existing, validate_all, validate_range, PortAssignment,
    PortError, PortRole, RangeReport, ValidationReport,
};
pub use status::{
    parse_instance_list, parse_status, strip_ansi, InstanceStatus, LifecycleState, StatusSignals,
};
