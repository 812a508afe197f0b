//! Current switch — signals that an appliance is running, with a cooldown.
//!
//! The output switch turns on while the measured current is above a
//! threshold (a washing machine drum turning, a TV drawing power) and stays
//! on through an `extended` cooldown after the current drops, bridging the
//! short pauses appliances make mid-cycle. The threshold comparison itself
//! runs through a hysteresis switch upstream, so this graph only sees clean
//! high/low edges.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::machine::{DefinitionError, Machine, MachineBuilder, MachineDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CurrentSwitchState {
    Off,
    On,
    Extended,
}

impl CurrentSwitchState {
    /// Whether the output switch should be on.
    #[must_use]
    pub fn is_on(self) -> bool {
        matches!(self, Self::On | Self::Extended)
    }
}

impl fmt::Display for CurrentSwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => f.write_str("off"),
            Self::On => f.write_str("on"),
            Self::Extended => f.write_str("extended"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentSwitchTrigger {
    CurrentHigh,
    CurrentLow,
    ExtendedTimedOut,
}

impl fmt::Display for CurrentSwitchTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CurrentHigh => "current_high",
            Self::CurrentLow => "current_low",
            Self::ExtendedTimedOut => "extended_timed_out",
        };
        f.write_str(name)
    }
}

/// Guard context, assembled by the rule right before each fire.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentSwitchContext {
    pub extended_enabled: bool,
}

fn extended_enabled(ctx: &CurrentSwitchContext) -> bool {
    ctx.extended_enabled
}

fn default_current_threshold() -> f64 {
    0.2
}

fn default_current_hysteresis() -> f64 {
    0.1
}

fn default_extended_timeout() -> u64 {
    0
}

/// Current threshold (amperes) and the cooldown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentSwitchSettings {
    #[serde(default = "default_current_threshold")]
    pub current_threshold: f64,
    /// Width of the current dead-band around the threshold.
    #[serde(default = "default_current_hysteresis")]
    pub current_hysteresis: f64,
    /// Seconds the output stays on after the current drops. Zero switches
    /// off immediately.
    #[serde(default = "default_extended_timeout")]
    pub extended_timeout: u64,
}

impl Default for CurrentSwitchSettings {
    fn default() -> Self {
        Self {
            current_threshold: default_current_threshold(),
            current_hysteresis: default_current_hysteresis(),
            extended_timeout: default_extended_timeout(),
        }
    }
}

impl CurrentSwitchSettings {
    /// Assemble the guard context.
    #[must_use]
    pub fn guard_context(&self) -> CurrentSwitchContext {
        CurrentSwitchContext {
            extended_enabled: self.extended_timeout > 0,
        }
    }

    pub fn configure_timeouts(
        &self,
        machine: &mut Machine<CurrentSwitchState, CurrentSwitchTrigger, CurrentSwitchContext>,
    ) {
        machine.set_timeout(
            CurrentSwitchState::Extended,
            Some(Duration::from_secs(self.extended_timeout)),
        );
    }
}

/// Build the current-switch state graph.
///
/// # Errors
///
/// Returns a [`DefinitionError`] only if the graph itself is inconsistent,
/// which would be a bug in this module.
pub fn current_switch_graph()
-> Result<MachineDef<CurrentSwitchState, CurrentSwitchTrigger, CurrentSwitchContext>, DefinitionError>
{
    let mut builder = MachineBuilder::new(CurrentSwitchState::Off);
    builder.state(CurrentSwitchState::Off);
    builder.state(CurrentSwitchState::On);
    builder.state_with_timeout(
        CurrentSwitchState::Extended,
        Duration::ZERO,
        CurrentSwitchTrigger::ExtendedTimedOut,
    );

    builder.transition(
        CurrentSwitchTrigger::CurrentHigh,
        [CurrentSwitchState::Off, CurrentSwitchState::Extended],
        CurrentSwitchState::On,
    );
    builder
        .transition(
            CurrentSwitchTrigger::CurrentLow,
            [CurrentSwitchState::On],
            CurrentSwitchState::Extended,
        )
        .when(extended_enabled);
    builder
        .transition(
            CurrentSwitchTrigger::CurrentLow,
            [CurrentSwitchState::On],
            CurrentSwitchState::Off,
        )
        .unless(extended_enabled);
    builder.transition(
        CurrentSwitchTrigger::ExtendedTimedOut,
        [CurrentSwitchState::Extended],
        CurrentSwitchState::Off,
    );

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_cooldown() -> CurrentSwitchSettings {
        CurrentSwitchSettings {
            extended_timeout: 120,
            ..CurrentSwitchSettings::default()
        }
    }

    fn machine(settings: &CurrentSwitchSettings)
    -> Machine<CurrentSwitchState, CurrentSwitchTrigger, CurrentSwitchContext> {
        let mut machine = Machine::new(current_switch_graph().unwrap());
        settings.configure_timeouts(&mut machine);
        machine
    }

    #[test]
    fn should_follow_current_edges() {
        let settings = CurrentSwitchSettings::default();
        let ctx = settings.guard_context();
        let mut machine = machine(&settings);
        assert!(!machine.current().is_on());

        machine.fire(CurrentSwitchTrigger::CurrentHigh, &ctx);
        assert_eq!(machine.current(), CurrentSwitchState::On);

        machine.fire(CurrentSwitchTrigger::CurrentLow, &ctx);
        assert_eq!(machine.current(), CurrentSwitchState::Off);
    }

    #[test]
    fn should_bridge_pauses_through_the_cooldown() {
        let settings = settings_with_cooldown();
        let ctx = settings.guard_context();
        let mut machine = machine(&settings);

        machine.fire(CurrentSwitchTrigger::CurrentHigh, &ctx);
        machine.fire(CurrentSwitchTrigger::CurrentLow, &ctx);
        assert_eq!(machine.current(), CurrentSwitchState::Extended);
        assert!(machine.current().is_on());
        assert_eq!(
            machine.active_timeout().map(|t| t.after),
            Some(Duration::from_secs(120))
        );

        // The appliance resumes mid-cycle.
        machine.fire(CurrentSwitchTrigger::CurrentHigh, &ctx);
        assert_eq!(machine.current(), CurrentSwitchState::On);

        machine.fire(CurrentSwitchTrigger::CurrentLow, &ctx);
        machine.fire(CurrentSwitchTrigger::ExtendedTimedOut, &ctx);
        assert_eq!(machine.current(), CurrentSwitchState::Off);
    }

    #[test]
    fn should_ignore_repeated_edges() {
        let settings = CurrentSwitchSettings::default();
        let ctx = settings.guard_context();
        let mut machine = machine(&settings);

        machine.fire(CurrentSwitchTrigger::CurrentHigh, &ctx);
        let fired = machine.fire(CurrentSwitchTrigger::CurrentHigh, &ctx);
        assert!(!fired.did_transition());
    }

    #[test]
    fn should_deserialize_settings_with_defaults() {
        let settings: CurrentSwitchSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, CurrentSwitchSettings::default());
        assert!(!settings.guard_context().extended_enabled);
    }
}
