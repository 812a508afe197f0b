//! Presence — house-level presence tracking from doors, phones, and a
//! leaving switch.
//!
//! `leaving` decays into `absence` after a short grace period, `absence`
//! decays into `long_absence` after roughly a day and a half. Any door
//! opening or phone appearing snaps back to `presence`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::machine::{DefinitionError, Machine, MachineBuilder, MachineDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresenceState {
    Presence,
    Leaving,
    Absence,
    LongAbsence,
}

impl PresenceState {
    /// Whether the presence output switch should be on.
    #[must_use]
    pub fn is_present(self) -> bool {
        matches!(self, Self::Presence)
    }
}

impl fmt::Display for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Presence => f.write_str("presence"),
            Self::Leaving => f.write_str("leaving"),
            Self::Absence => f.write_str("absence"),
            Self::LongAbsence => f.write_str("long_absence"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceTrigger {
    /// A door opened, a phone appeared, or the leaving switch reset.
    PresenceDetected,
    /// The leaving switch was pressed.
    LeavingDetected,
    /// Phones have been silent long enough to assume an empty house.
    AbsenceDetected,
    LeavingTimedOut,
    AbsenceTimedOut,
}

impl fmt::Display for PresenceTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PresenceDetected => "presence_detected",
            Self::LeavingDetected => "leaving_detected",
            Self::AbsenceDetected => "absence_detected",
            Self::LeavingTimedOut => "leaving_timed_out",
            Self::AbsenceTimedOut => "absence_timed_out",
        };
        f.write_str(name)
    }
}

fn default_leaving_timeout() -> u64 {
    300
}

fn default_absence_timeout() -> u64 {
    // A day and a half.
    129_600
}

fn default_phone_silence_timeout() -> u64 {
    1200
}

/// Timing settings, all in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSettings {
    /// How long `leaving` lasts before decaying into `absence`.
    #[serde(default = "default_leaving_timeout")]
    pub leaving_timeout: u64,
    /// How long `absence` lasts before decaying into `long_absence`.
    #[serde(default = "default_absence_timeout")]
    pub absence_timeout: u64,
    /// How long all phones must be gone before assuming absence.
    #[serde(default = "default_phone_silence_timeout")]
    pub phone_silence_timeout: u64,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            leaving_timeout: default_leaving_timeout(),
            absence_timeout: default_absence_timeout(),
            phone_silence_timeout: default_phone_silence_timeout(),
        }
    }
}

impl PresenceSettings {
    pub fn configure_timeouts(&self, machine: &mut Machine<PresenceState, PresenceTrigger, ()>) {
        machine.set_timeout(
            PresenceState::Leaving,
            Some(Duration::from_secs(self.leaving_timeout)),
        );
        machine.set_timeout(
            PresenceState::Absence,
            Some(Duration::from_secs(self.absence_timeout)),
        );
    }

    #[must_use]
    pub fn phone_silence(&self) -> Duration {
        Duration::from_secs(self.phone_silence_timeout)
    }
}

/// Build the presence state graph.
///
/// # Errors
///
/// Returns a [`DefinitionError`] only if the graph itself is inconsistent,
/// which would be a bug in this module.
pub fn presence_graph() -> Result<MachineDef<PresenceState, PresenceTrigger, ()>, DefinitionError> {
    let mut builder = MachineBuilder::new(PresenceState::Presence);
    builder.state(PresenceState::Presence);
    builder.state_with_timeout(
        PresenceState::Leaving,
        Duration::ZERO,
        PresenceTrigger::LeavingTimedOut,
    );
    builder.state_with_timeout(
        PresenceState::Absence,
        Duration::ZERO,
        PresenceTrigger::AbsenceTimedOut,
    );
    builder.state(PresenceState::LongAbsence);

    builder.transition(
        PresenceTrigger::PresenceDetected,
        [
            PresenceState::Leaving,
            PresenceState::Absence,
            PresenceState::LongAbsence,
        ],
        PresenceState::Presence,
    );
    builder.transition(
        PresenceTrigger::LeavingDetected,
        [PresenceState::Presence],
        PresenceState::Leaving,
    );
    builder.transition(
        PresenceTrigger::AbsenceDetected,
        [PresenceState::Presence, PresenceState::Leaving],
        PresenceState::Absence,
    );
    builder.transition(
        PresenceTrigger::LeavingTimedOut,
        [PresenceState::Leaving],
        PresenceState::Absence,
    );
    builder.transition(
        PresenceTrigger::AbsenceTimedOut,
        [PresenceState::Absence],
        PresenceState::LongAbsence,
    );

    builder.build()
}
