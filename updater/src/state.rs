//! Mutable state owned by the update loop
//!
//! A single `EngineState` lives inside the loop and is handed by reference to
//! every step. Nothing here touches the clock or the network.

use chrono::NaiveDate;
use std::fmt;
use std::time::SystemTime;

/// Phase of the update cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Normal service: health checks and update detection
    Running,
    /// Warning players that a reboot is coming
    Announce,
    /// Asking the server to shut down for the update
    Upgrade,
    /// Waiting for the server to come back on the new build
    Reboot,
    /// Shutdown requested, the loop exits
    Stop,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Running => "RUNNING",
            Operation::Announce => "ANNOUNCE",
            Operation::Upgrade => "UPGRADE",
            Operation::Reboot => "REBOOT",
            Operation::Stop => "STOP",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineState {
    pub operation: Operation,
    /// Build id from the installed app manifest
    pub local_build: Option<String>,
    /// Branch the installation follows
    pub local_branch: Option<String>,
    /// Latest published build id for `local_branch`
    pub remote_build: Option<String>,
    /// Modification time of the manifest when it was last parsed
    pub descriptor_modified: Option<SystemTime>,
    /// Consecutive failed health checks
    pub unavailable_ticks: u32,
    /// In-game warnings sent for `announced_build`
    pub announce_ticks_sent: u32,
    /// Remote build the current announcement run is about
    pub announced_build: Option<String>,
    /// Day the map seed was last rotated
    pub seed_change_date: Option<NaiveDate>,
    next_identifier: i32,
}

impl EngineState {
    pub fn new(seed_change_date: Option<NaiveDate>) -> Self {
        Self {
            operation: Operation::Running,
            local_build: None,
            local_branch: None,
            remote_build: None,
            descriptor_modified: None,
            unavailable_ticks: 0,
            announce_ticks_sent: 0,
            announced_build: None,
            seed_change_date,
            next_identifier: 1,
        }
    }

    /// True when both builds are known and differ
    pub fn update_available(&self) -> bool {
        match (&self.local_build, &self.remote_build) {
            (Some(local), Some(remote)) => local != remote,
            _ => false,
        }
    }

    /// Hands out correlation ids, skipping the broadcast id and zero on wrap
    pub fn next_identifier(&mut self) -> i32 {
        let identifier = self.next_identifier;
        self.next_identifier = match self.next_identifier.checked_add(1) {
            Some(next) => next,
            None => 1,
        };
        identifier
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new(None)
    }
}
