// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The closed control-plane command set.

use serde::{Deserialize, Serialize};

/// Commands a client may issue, dotted notation. This enumeration is a
/// stable contract; anything else is a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    #[serde(rename = "sessions.list")]
    SessionsList,
    #[serde(rename = "engagement.start")]
    EngagementStart,
    #[serde(rename = "engagement.attach")]
    EngagementAttach,
    #[serde(rename = "engagement.detach")]
    EngagementDetach,
    #[serde(rename = "engagement.pause")]
    EngagementPause,
    #[serde(rename = "engagement.resume")]
    EngagementResume,
    #[serde(rename = "engagement.stop")]
    EngagementStop,
    #[serde(rename = "daemon.stop")]
    DaemonStop,
}

impl Command {
    pub const ALL: [Command; 8] = [
        Command::SessionsList,
        Command::EngagementStart,
        Command::EngagementAttach,
        Command::EngagementDetach,
        Command::EngagementPause,
        Command::EngagementResume,
        Command::EngagementStop,
        Command::DaemonStop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::SessionsList => "sessions.list",
            Command::EngagementStart => "engagement.start",
            Command::EngagementAttach => "engagement.attach",
            Command::EngagementDetach => "engagement.detach",
            Command::EngagementPause => "engagement.pause",
            Command::EngagementResume => "engagement.resume",
            Command::EngagementStop => "engagement.stop",
            Command::DaemonStop => "daemon.stop",
        }
    }

    /// Parse a wire command name. `None` for anything outside the set.
    pub fn parse(name: &str) -> Option<Command> {
        Command::ALL.iter().copied().find(|c| c.as_str() == name)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
