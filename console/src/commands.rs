//! Quick admin actions rendered to console command text

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Broadcast(String),
    SaveWorld,
    ListPlayers,
    KickPlayer(String),
    BanPlayer(String),
    UnbanPlayer(String),
    DestroyWildDinos,
    /// In-game clock, 24h
    SetTimeOfDay { hour: u8, minute: u8 },
}

impl fmt::Display for AdminCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminCommand::Broadcast(message) => write!(f, "broadcast {}", message),
            AdminCommand::SaveWorld => f.write_str("saveworld"),
            AdminCommand::ListPlayers => f.write_str("listplayers"),
            AdminCommand::KickPlayer(player_id) => write!(f, "kickplayer {}", player_id),
            AdminCommand::BanPlayer(player_id) => write!(f, "banplayer {}", player_id),
            AdminCommand::UnbanPlayer(player_id) => write!(f, "unbanplayer {}", player_id),
            AdminCommand::DestroyWildDinos => f.write_str("destroywilddinos"),
            AdminCommand::SetTimeOfDay { hour, minute } => {
                write!(f, "settimeofday {:02}:{:02}", hour, minute)
            }
        }
    }
}
