//! Classifies an instance from the management tool's `status` text
//!
//! The tool prints something like:
//!
//! ```text
//! Running command 'status' for instance 'island'
//!  Server running:   Yes
//!  Server PID:   48213
//!  Server listening:   Yes
//! Server Name: Island PvE - (v358.24)
//! Steam Players: 3 / 70
//! ```
//!
//! The lifecycle state comes from three signals, checked in order: the
//! process is running, the port is listening, and the server answers
//! queries. Everything else is optional and never fails the parse.

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

lazy_static! {
    // CSI sequences; the tool colours Yes/No values
    static ref ANSI_ESCAPE: Regex = Regex::new(r"\x1B\[[0-9;?]*[A-Za-z]").unwrap();

    static ref RUNNING: Regex = Regex::new(r"(?i)Server running:\s+(Yes|No)").unwrap();
    static ref LISTENING: Regex = Regex::new(r"(?i)Server listening:\s+(Yes|No)").unwrap();
    static ref PID: Regex = Regex::new(r"(?i)Server PID:\s*(\d+)").unwrap();
    static ref STEAM_PLAYERS: Regex =
        Regex::new(r"(?i)Steam Players:\s*(\d+)\s*/\s*(\d+)").unwrap();
    // "Server Name: Island PvE - (v358.24)"
    static ref SERVER_NAME: Regex =
        Regex::new(r"(?i)Server Name:\s*(.+?)\s*-\s*\(v([\d.]+)\)").unwrap();
}

const PLAYER_COUNT_MARKER: &str = "Steam Players:";
const UNQUERYABLE_MARKER: &str = "Unable to query";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    /// Set by whoever issued a stop command; no status text maps to it
    Stopping,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
        })
    }
}

/// The evidence a state is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusSignals {
    pub process_running: bool,
    pub listening: bool,
    /// Player counts were reported and nothing said the query failed
    pub queryable: bool,
}

impl StatusSignals {
    /// Reads the signals from text that has already had escapes removed
    pub fn from_text(text: &str) -> Self {
        Self {
            process_running: affirmative(&RUNNING, text),
            listening: affirmative(&LISTENING, text),
            queryable: text.contains(PLAYER_COUNT_MARKER) && !text.contains(UNQUERYABLE_MARKER),
        }
    }

    pub fn state(&self) -> LifecycleState {
        if !self.process_running {
            LifecycleState::Stopped
        } else if !self.listening || !self.queryable {
            LifecycleState::Starting
        } else {
            LifecycleState::Running
        }
    }
}

fn affirmative(pattern: &Regex, text: &str) -> bool {
    pattern
        .captures(text)
        .map_or(false, |caps| caps[1].eq_ignore_ascii_case("yes"))
}

/// One instance's state at the moment its status was read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    #[serde(rename = "status")]
    pub state: LifecycleState,
    /// Only reported while the process is up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub online_players: u32,
    pub max_players: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Removes terminal colour and cursor sequences
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    ANSI_ESCAPE.replace_all(text, "")
}

/// Parses raw status output. `configured_max_players` is used when the
/// server did not report its own player limit.
pub fn parse_status(raw: &str, configured_max_players: u32) -> InstanceStatus {
    let text = strip_ansi(raw);
    let signals = StatusSignals::from_text(&text);
    let state = signals.state();
    debug!("status signals {:?} -> {}", signals, state);

    let pid = match state {
        LifecycleState::Running | LifecycleState::Starting => PID
            .captures(&text)
            .and_then(|caps| caps[1].parse().ok()),
        _ => None,
    };

    let (online_players, max_players) = STEAM_PLAYERS
        .captures(&text)
        .and_then(|caps| Some((caps[1].parse().ok()?, caps[2].parse().ok()?)))
        .unwrap_or((0, configured_max_players));

    let (server_name, version) = match SERVER_NAME.captures(&text) {
        Some(caps) => (
            Some(caps[1].trim().to_string()),
            Some(caps[2].to_string()),
        ),
        None => (None, None),
    };

    InstanceStatus {
        state,
        pid,
        online_players,
        max_players,
        server_name,
        version,
    }
}

/// Instance names from `list-instances --brief`
pub fn parse_instance_list(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}
