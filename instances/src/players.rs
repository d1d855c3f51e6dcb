//! Parses `listplayers` console output

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    // "0. Survivor Name, 76561198000000001"
    static ref PLAYER_LINE: Regex = Regex::new(r"^\d+\.\s*(.+?),\s*(\d+)$").unwrap();
}

/// Lines that are chatter from the console wrapper rather than players
const NOISE: [&str; 3] = ["No Players", "Running", "command:"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlinePlayer {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steam_id: Option<String>,
}

pub fn parse_player_list(text: &str) -> Vec<OnlinePlayer> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !NOISE.iter().any(|noise| line.contains(noise)))
        .map(|line| match PLAYER_LINE.captures(line) {
            Some(caps) => OnlinePlayer {
                name: caps[1].to_string(),
                steam_id: Some(caps[2].to_string()),
            },
            None => OnlinePlayer {
                name: line.to_string(),
                steam_id: None,
            },
        })
        .collect()
}
