//! Port assignment checks
//!
//! Every instance binds a game port, a query port and an RCON port. Two
//! instances sharing any port number, in any role, crash or hang at 0/0
//! players, so a number may appear only once across the whole fleet.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_GAME_PORT: u16 = 7778;
pub const DEFAULT_QUERY_PORT: u16 = 27015;
pub const DEFAULT_RCON_PORT: u16 = 32330;
/// Lowest port recommended for a game server; lower ones only warn
pub const RECOMMENDED_MIN_PORT: u16 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortRole {
    Game,
    Query,
    Rcon,
}

impl PortRole {
    /// Name used in the instance configuration files
    pub fn label(self) -> &'static str {
        match self {
            PortRole::Game => "Port",
            PortRole::Query => "QueryPort",
            PortRole::Rcon => "RCONPort",
        }
    }
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("expected name:game:query:rcon, got '{0}'")]
    Malformed(String),

    #[error("'{value}' is not a valid {role}")]
    InvalidPort { role: PortRole, value: String },

    #[error("no free {role} at or above {base}")]
    Exhausted { role: PortRole, base: u16 },
}

/// The three ports one instance binds
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortAssignment {
    pub instance: String,
    pub port: u16,
    pub query_port: u16,
    pub rcon_port: u16,
}

impl PortAssignment {
    pub fn new(instance: &str, port: u16, query_port: u16, rcon_port: u16) -> Self {
        Self {
            instance: instance.to_string(),
            port,
            query_port,
            rcon_port,
        }
    }

    pub fn get(&self, role: PortRole) -> u16 {
        match role {
            PortRole::Game => self.port,
            PortRole::Query => self.query_port,
            PortRole::Rcon => self.rcon_port,
        }
    }

    pub fn ports(&self) -> [(PortRole, u16); 3] {
        [
            (PortRole::Game, self.port),
            (PortRole::Query, self.query_port),
            (PortRole::Rcon, self.rcon_port),
        ]
    }
}

impl fmt::Display for PortAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.instance, self.port, self.query_port, self.rcon_port
        )
    }
}

impl FromStr for PortAssignment {
    type Err = PortError;

    /// Parses `name:game:query:rcon`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim().split(':').collect();
        let &[instance, port, query_port, rcon_port] = fields.as_slice() else {
            return Err(PortError::Malformed(s.to_string()));
        };
        if instance.is_empty() {
            return Err(PortError::Malformed(s.to_string()));
        }

        let parse = |role: PortRole, value: &str| {
            value.parse::<u16>().map_err(|_| PortError::InvalidPort {
                role,
                value: value.to_string(),
            })
        };

        Ok(Self {
            instance: instance.to_string(),
            port: parse(PortRole::Game, port)?,
            query_port: parse(PortRole::Query, query_port)?,
            rcon_port: parse(PortRole::Rcon, rcon_port)?,
        })
    }
}

/// Outcome of a uniqueness check
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub conflicts: Vec<String>,
}

impl ValidationReport {
    fn from_conflicts(conflicts: Vec<String>) -> Self {
        Self {
            valid: conflicts.is_empty(),
            conflicts,
        }
    }
}

/// Outcome of a range check; warnings never make it invalid
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RangeReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// One message per port number bound more than once, listing every user
pub fn validate_all(assignments: &[PortAssignment]) -> ValidationReport {
    let mut usage: BTreeMap<u16, Vec<String>> = BTreeMap::new();

    for assignment in assignments {
        for (role, port) in assignment.ports() {
            usage
                .entry(port)
                .or_default()
                .push(format!("{} ({})", assignment.instance, role));
        }
    }

    let conflicts = usage
        .into_iter()
        .filter(|(_, users)| users.len() > 1)
        .map(|(port, users)| {
            format!(
                "Port {} is used by multiple instances: {}",
                port,
                users.join(", ")
            )
        })
        .collect();

    ValidationReport::from_conflicts(conflicts)
}

/// Checks a new instance's ports against those already configured.
/// An existing entry with the same instance name is the instance itself and is skipped.
pub fn validate_against_existing(
    candidate: &PortAssignment,
    existing: &[PortAssignment],
) -> ValidationReport {
    let mut conflicts = Vec::new();

    for other in existing.iter().filter(|o| o.instance != candidate.instance) {
        for (role, port) in candidate.ports() {
            for (other_role, other_port) in other.ports() {
                if port != other_port {
                    continue;
                }
                if role == other_role {
                    conflicts.push(format!(
                        "{} {} is already used by instance {}",
                        role, port, other.instance
                    ));
                } else {
                    conflicts.push(format!(
                        "{} {} is already used by instance {} as {}",
                        role, port, other.instance, other_role
                    ));
                }
            }
        }
    }

    ValidationReport::from_conflicts(conflicts)
}

/// Lowest free port at or above each default, never reusing a port across roles
pub fn suggest_assignment(existing: &[PortAssignment]) -> Result<PortAssignment, PortError> {
    let mut used: HashSet<u16> = existing
        .iter()
        .flat_map(|a| a.ports().map(|(_, port)| port))
        .collect();

    let mut claim = |role: PortRole, base: u16| -> Result<u16, PortError> {
        let port = (base..=u16::MAX)
            .find(|port| !used.contains(port))
            .ok_or(PortError::Exhausted { role, base })?;
        used.insert(port);
        Ok(port)
    };

    Ok(PortAssignment {
        instance: "new".to_string(),
        port: claim(PortRole::Game, DEFAULT_GAME_PORT)?,
        query_port: claim(PortRole::Query, DEFAULT_QUERY_PORT)?,
        rcon_port: claim(PortRole::Rcon, DEFAULT_RCON_PORT)?,
    })
}

pub fn validate_range(assignment: &PortAssignment) -> RangeReport {
    let mut report = RangeReport {
        valid: true,
        ..RangeReport::default()
    };

    for (role, port) in assignment.ports() {
        if port == 0 {
            report.valid = false;
            report.errors.push(format!("{} 0 is not a usable port", role));
        } else if port < RECOMMENDED_MIN_PORT {
            report.warnings.push(format!(
                "{} {} is below the recommended range (1024-65535)",
                role, port
            ));
        }
    }

    report
}
