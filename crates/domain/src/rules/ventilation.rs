//! Ventilation — fan level control with power boosts and a long-absence
//! fallback.
//!
//! Inside `auto`, the fan runs at its `normal` level. Several things can
//! boost it to the power level: a hand request (with its own timeout), high
//! humidity (detected upstream through a hysteresis switch), or an external
//! request (a second bathroom, a dryer). During a long absence the fan drops
//! to a minimal level. Boost sources are independent; declaration order
//! decides which one wins when several apply at once.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::machine::{DefinitionError, Machine, MachineBuilder, MachineDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VentilationState {
    Manual,
    Auto,
    Init,
    Normal,
    PowerHand,
    PowerHumidity,
    PowerExternal,
    LongAbsence,
}

impl fmt::Display for VentilationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => f.write_str("manual"),
            Self::Auto => f.write_str("auto"),
            Self::Init => f.write_str("auto.init"),
            Self::Normal => f.write_str("auto.normal"),
            Self::PowerHand => f.write_str("auto.power_hand"),
            Self::PowerHumidity => f.write_str("auto.power_humidity"),
            Self::PowerExternal => f.write_str("auto.power_external"),
            Self::LongAbsence => f.write_str("auto.long_absence"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VentilationTrigger {
    ManualOn,
    ManualOff,
    /// The hand switch requested a power boost.
    HandOn,
    /// The hand switch withdrew the request.
    HandOff,
    HandTimedOut,
    HumidityHigh,
    HumidityLow,
    ExternalOn,
    ExternalOff,
    LongAbsenceStarted,
    LongAbsenceEnded,
    /// Re-derive the correct auto sub-state after entering `auto.init`.
    Resolve,
}

impl fmt::Display for VentilationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ManualOn => "manual_on",
            Self::ManualOff => "manual_off",
            Self::HandOn => "hand_on",
            Self::HandOff => "hand_off",
            Self::HandTimedOut => "hand_timed_out",
            Self::HumidityHigh => "humidity_high",
            Self::HumidityLow => "humidity_low",
            Self::ExternalOn => "external_on",
            Self::ExternalOff => "external_off",
            Self::LongAbsenceStarted => "long_absence_started",
            Self::LongAbsenceEnded => "long_absence_ended",
            Self::Resolve => "resolve",
        };
        f.write_str(name)
    }
}

/// Guard context, assembled by the rule right before each fire.
#[derive(Debug, Clone, Copy, Default)]
pub struct VentilationContext {
    pub humidity_high: bool,
    pub external_on: bool,
    pub long_absence: bool,
}

fn humidity_high(ctx: &VentilationContext) -> bool {
    ctx.humidity_high
}

fn external_on(ctx: &VentilationContext) -> bool {
    ctx.external_on
}

fn long_absence(ctx: &VentilationContext) -> bool {
    ctx.long_absence
}

fn default_normal_level() -> f64 {
    1.0
}

fn default_power_level() -> f64 {
    2.0
}

fn default_long_absence_level() -> f64 {
    0.0
}

fn default_hand_timeout() -> u64 {
    3600
}

fn default_humidity_threshold() -> f64 {
    65.0
}

fn default_humidity_hysteresis() -> f64 {
    5.0
}

/// Fan levels and timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VentilationSettings {
    #[serde(default = "default_normal_level")]
    pub normal_level: f64,
    #[serde(default = "default_power_level")]
    pub power_level: f64,
    #[serde(default = "default_long_absence_level")]
    pub long_absence_level: f64,
    /// Seconds a hand request boosts the fan.
    #[serde(default = "default_hand_timeout")]
    pub hand_timeout: u64,
    /// Relative humidity (percent) above which the fan boosts.
    #[serde(default = "default_humidity_threshold")]
    pub humidity_threshold: f64,
    /// Width of the humidity dead-band around the threshold.
    #[serde(default = "default_humidity_hysteresis")]
    pub humidity_hysteresis: f64,
}

impl Default for VentilationSettings {
    fn default() -> Self {
        Self {
            normal_level: default_normal_level(),
            power_level: default_power_level(),
            long_absence_level: default_long_absence_level(),
            hand_timeout: default_hand_timeout(),
            humidity_threshold: default_humidity_threshold(),
            humidity_hysteresis: default_humidity_hysteresis(),
        }
    }
}

impl VentilationSettings {
    pub fn configure_timeouts(
        &self,
        machine: &mut Machine<VentilationState, VentilationTrigger, VentilationContext>,
    ) {
        machine.set_timeout(
            VentilationState::PowerHand,
            Some(Duration::from_secs(self.hand_timeout)),
        );
    }
}

/// Build the ventilation state graph.
///
/// # Errors
///
/// Returns a [`DefinitionError`] only if the graph itself is inconsistent,
/// which would be a bug in this module.
pub fn ventilation_graph()
-> Result<MachineDef<VentilationState, VentilationTrigger, VentilationContext>, DefinitionError> {
    let mut builder = MachineBuilder::new(VentilationState::Auto);
    builder.state(VentilationState::Manual);
    builder.composite(VentilationState::Auto, VentilationState::Init);
    builder.child(VentilationState::Auto, VentilationState::Init);
    builder.child(VentilationState::Auto, VentilationState::Normal);
    builder.child_with_timeout(
        VentilationState::Auto,
        VentilationState::PowerHand,
        Duration::ZERO,
        VentilationTrigger::HandTimedOut,
    );
    builder.child(VentilationState::Auto, VentilationState::PowerHumidity);
    builder.child(VentilationState::Auto, VentilationState::PowerExternal);
    builder.child(VentilationState::Auto, VentilationState::LongAbsence);

    builder.transition(
        VentilationTrigger::ManualOn,
        [VentilationState::Auto],
        VentilationState::Manual,
    );
    builder.transition(
        VentilationTrigger::ManualOff,
        [VentilationState::Manual],
        VentilationState::Auto,
    );

    // Priority chain after entering `auto.init`: declaration order decides.
    builder
        .transition(
            VentilationTrigger::Resolve,
            [VentilationState::Init],
            VentilationState::PowerExternal,
        )
        .when(external_on);
    builder
        .transition(
            VentilationTrigger::Resolve,
            [VentilationState::Init],
            VentilationState::PowerHumidity,
        )
        .when(humidity_high);
    builder
        .transition(
            VentilationTrigger::Resolve,
            [VentilationState::Init],
            VentilationState::LongAbsence,
        )
        .when(long_absence);
    builder.transition(
        VentilationTrigger::Resolve,
        [VentilationState::Init],
        VentilationState::Normal,
    );

    builder.transition(
        VentilationTrigger::HandOn,
        [VentilationState::Normal, VentilationState::LongAbsence],
        VentilationState::PowerHand,
    );
    builder.transition(
        VentilationTrigger::HandOff,
        [VentilationState::PowerHand],
        VentilationState::Init,
    );
    builder.transition(
        VentilationTrigger::HandTimedOut,
        [VentilationState::PowerHand],
        VentilationState::Init,
    );

    builder.transition(
        VentilationTrigger::HumidityHigh,
        [VentilationState::Normal, VentilationState::LongAbsence],
        VentilationState::PowerHumidity,
    );
    builder.transition(
        VentilationTrigger::HumidityLow,
        [VentilationState::PowerHumidity],
        VentilationState::Init,
    );

    builder.transition(
        VentilationTrigger::ExternalOn,
        [
            VentilationState::Normal,
            VentilationState::PowerHumidity,
            VentilationState::LongAbsence,
        ],
        VentilationState::PowerExternal,
    );
    builder.transition(
        VentilationTrigger::ExternalOff,
        [VentilationState::PowerExternal],
        VentilationState::Init,
    );

    builder.transition(
        VentilationTrigger::LongAbsenceStarted,
        [VentilationState::Normal],
        VentilationState::LongAbsence,
    );
    builder.transition(
        VentilationTrigger::LongAbsenceEnded,
        [VentilationState::LongAbsence],
        VentilationState::Init,
    );

    builder.build()
}

/// Target fan level after entering `state`, if the rule should move at all.
#[must_use]
pub fn target_level(settings: &VentilationSettings, state: VentilationState) -> Option<f64> {
    match state {
        VentilationState::Manual | VentilationState::Auto | VentilationState::Init => None,
        VentilationState::Normal => Some(settings.normal_level),
        VentilationState::PowerHand
        | VentilationState::PowerHumidity
        | VentilationState::PowerExternal => Some(settings.power_level),
        VentilationState::LongAbsence => Some(settings.long_absence_level),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> Machine<VentilationState, VentilationTrigger, VentilationContext> {
        let mut machine = Machine::new(ventilation_graph().unwrap());
        VentilationSettings::default().configure_timeouts(&mut machine);
        machine
    }

    #[test]
    fn should_resolve_external_over_humidity_over_absence() {
        let everything = VentilationContext {
            humidity_high: true,
            external_on: true,
            long_absence: true,
        };

        let mut machine = machine();
        machine.fire(VentilationTrigger::Resolve, &everything);
        assert_eq!(machine.current(), VentilationState::PowerExternal);

        let mut machine = self::machine();
        machine.fire(
            VentilationTrigger::Resolve,
            &VentilationContext {
                external_on: false,
                ..everything
            },
        );
        assert_eq!(machine.current(), VentilationState::PowerHumidity);

        let mut machine = self::machine();
        machine.fire(
            VentilationTrigger::Resolve,
            &VentilationContext {
                long_absence: true,
                ..VentilationContext::default()
            },
        );
        assert_eq!(machine.current(), VentilationState::LongAbsence);

        let mut machine = self::machine();
        machine.fire(VentilationTrigger::Resolve, &VentilationContext::default());
        assert_eq!(machine.current(), VentilationState::Normal);
    }

    #[test]
    fn should_boost_by_hand_and_fall_back_after_timeout() {
        let ctx = VentilationContext::default();
        let mut machine = machine();
        machine.fire(VentilationTrigger::Resolve, &ctx);

        machine.fire(VentilationTrigger::HandOn, &ctx);
        assert_eq!(machine.current(), VentilationState::PowerHand);
        assert_eq!(
            machine.active_timeout().map(|t| t.after),
            Some(Duration::from_secs(3600))
        );

        machine.fire(VentilationTrigger::HandTimedOut, &ctx);
        assert_eq!(machine.current(), VentilationState::Init);
        machine.fire(VentilationTrigger::Resolve, &ctx);
        assert_eq!(machine.current(), VentilationState::Normal);
    }

    #[test]
    fn should_route_humidity_drop_through_init() {
        // Resolving after a humidity drop picks the external boost when one
        // is still pending.
        let ctx = VentilationContext {
            humidity_high: true,
            external_on: true,
            long_absence: false,
        };
        let mut machine = machine();
        machine.restore(VentilationState::PowerHumidity);

        machine.fire(VentilationTrigger::HumidityLow, &ctx);
        assert_eq!(machine.current(), VentilationState::Init);
        machine.fire(VentilationTrigger::Resolve, &ctx);
        assert_eq!(machine.current(), VentilationState::PowerExternal);
    }

    #[test]
    fn should_report_levels_per_state() {
        let settings = VentilationSettings::default();
        assert_eq!(target_level(&settings, VentilationState::Normal), Some(1.0));
        assert_eq!(target_level(&settings, VentilationState::PowerHand), Some(2.0));
        assert_eq!(target_level(&settings, VentilationState::PowerHumidity), Some(2.0));
        assert_eq!(target_level(&settings, VentilationState::LongAbsence), Some(0.0));
        assert_eq!(target_level(&settings, VentilationState::Manual), None);
    }

    #[test]
    fn should_stay_out_of_auto_while_manual() {
        let ctx = VentilationContext::default();
        let mut machine = machine();
        machine.fire(VentilationTrigger::ManualOn, &ctx);
        assert_eq!(machine.current(), VentilationState::Manual);

        let fired = machine.fire(VentilationTrigger::HandOn, &ctx);
        assert!(!fired.did_transition());

        machine.fire(VentilationTrigger::ManualOff, &ctx);
        assert_eq!(machine.current(), VentilationState::Init);
    }

    #[test]
    fn should_deserialize_settings_with_defaults() {
        let settings: VentilationSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, VentilationSettings::default());
        assert_eq!(settings.humidity_threshold, 65.0);
    }
}
