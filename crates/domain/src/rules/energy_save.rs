//! Energy save — a controlled outlet that waits for its device to finish.
//!
//! The outlet follows an external on/off request (typically presence or
//! sleep), but never cuts power while the attached device still draws
//! current: an off request while the device is busy parks the rule in
//! `auto.wait_current` until the measured current drops below the
//! threshold. A manual toggle of the outlet suspends the automatic behavior
//! in `hand` until its timeout.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::machine::{DefinitionError, Machine, MachineBuilder, MachineDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnergySaveState {
    Hand,
    Auto,
    On,
    Off,
    WaitCurrent,
}

impl EnergySaveState {
    /// Whether the outlet should be powered.
    #[must_use]
    pub fn is_on(self) -> bool {
        matches!(self, Self::On | Self::WaitCurrent)
    }
}

impl fmt::Display for EnergySaveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hand => f.write_str("hand"),
            Self::Auto => f.write_str("auto"),
            Self::On => f.write_str("auto.on"),
            Self::Off => f.write_str("auto.off"),
            Self::WaitCurrent => f.write_str("auto.wait_current"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergySaveTrigger {
    /// A human toggled the outlet directly.
    HandDetected,
    HandTimedOut,
    OnRequested,
    OffRequested,
    /// The measured current dropped below the threshold.
    CurrentLow,
}

impl fmt::Display for EnergySaveTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HandDetected => "hand_detected",
            Self::HandTimedOut => "hand_timed_out",
            Self::OnRequested => "on_requested",
            Self::OffRequested => "off_requested",
            Self::CurrentLow => "current_low",
        };
        f.write_str(name)
    }
}

/// Guard context, assembled by the rule right before each fire.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnergySaveContext {
    /// The measured current is above the threshold (device busy).
    pub current_high: bool,
}

fn current_high(ctx: &EnergySaveContext) -> bool {
    ctx.current_high
}

fn default_current_threshold() -> f64 {
    0.03
}

fn default_current_hysteresis() -> f64 {
    0.01
}

fn default_hand_timeout() -> u64 {
    86_400
}

/// Current threshold (amperes) and the hand timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergySaveSettings {
    #[serde(default = "default_current_threshold")]
    pub current_threshold: f64,
    /// Width of the current dead-band around the threshold.
    #[serde(default = "default_current_hysteresis")]
    pub current_hysteresis: f64,
    /// Seconds a manual toggle suspends the automatic behavior.
    #[serde(default = "default_hand_timeout")]
    pub hand_timeout: u64,
}

impl Default for EnergySaveSettings {
    fn default() -> Self {
        Self {
            current_threshold: default_current_threshold(),
            current_hysteresis: default_current_hysteresis(),
            hand_timeout: default_hand_timeout(),
        }
    }
}

impl EnergySaveSettings {
    pub fn configure_timeouts(
        &self,
        machine: &mut Machine<EnergySaveState, EnergySaveTrigger, EnergySaveContext>,
    ) {
        machine.set_timeout(
            EnergySaveState::Hand,
            Some(Duration::from_secs(self.hand_timeout)),
        );
    }
}

/// Build the energy-save state graph.
///
/// # Errors
///
/// Returns a [`DefinitionError`] only if the graph itself is inconsistent,
/// which would be a bug in this module.
pub fn energy_save_graph()
-> Result<MachineDef<EnergySaveState, EnergySaveTrigger, EnergySaveContext>, DefinitionError> {
    let mut builder = MachineBuilder::new(EnergySaveState::Auto);
    builder.state_with_timeout(
        EnergySaveState::Hand,
        Duration::ZERO,
        EnergySaveTrigger::HandTimedOut,
    );
    builder.composite(EnergySaveState::Auto, EnergySaveState::On);
    builder.child(EnergySaveState::Auto, EnergySaveState::On);
    builder.child(EnergySaveState::Auto, EnergySaveState::Off);
    builder.child(EnergySaveState::Auto, EnergySaveState::WaitCurrent);

    builder.transition(
        EnergySaveTrigger::HandDetected,
        [EnergySaveState::Auto],
        EnergySaveState::Hand,
    );
    builder.transition(
        EnergySaveTrigger::HandTimedOut,
        [EnergySaveState::Hand],
        EnergySaveState::Auto,
    );

    builder.transition(
        EnergySaveTrigger::OnRequested,
        [EnergySaveState::Off, EnergySaveState::WaitCurrent],
        EnergySaveState::On,
    );
    builder
        .transition(
            EnergySaveTrigger::OffRequested,
            [EnergySaveState::On],
            EnergySaveState::WaitCurrent,
        )
        .when(current_high);
    builder
        .transition(EnergySaveTrigger::OffRequested, [EnergySaveState::On], EnergySaveState::Off)
        .unless(current_high);
    builder.transition(
        EnergySaveTrigger::CurrentLow,
        [EnergySaveState::WaitCurrent],
        EnergySaveState::Off,
    );

    builder.build()
}
