//! Shading — roller shutters and blinds with wind alarm, sun protection,
//! and door handling.
//!
//! Inside `auto`, the shutter rests `open`, closes for the night or for
//! sleeping, and partially closes for sun protection. An opening door lifts
//! the shutter out of the way (`auto.door_open`) and keeps it there for a
//! grace period after the door closes. A manual position change parks the
//! rule in `hand` until its timeout; a wind alarm overrides everything
//! except the explicit `manual` mode.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::machine::{DefinitionError, Machine, MachineBuilder, MachineDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadingState {
    Manual,
    Hand,
    WindAlarm,
    Auto,
    Init,
    Open,
    NightClose,
    SleepingClose,
    SunProtection,
    DoorOpen,
    DoorOpenActive,
    DoorOpenPost,
}

impl fmt::Display for ShadingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => f.write_str("manual"),
            Self::Hand => f.write_str("hand"),
            Self::WindAlarm => f.write_str("wind_alarm"),
            Self::Auto => f.write_str("auto"),
            Self::Init => f.write_str("auto.init"),
            Self::Open => f.write_str("auto.open"),
            Self::NightClose => f.write_str("auto.night_close"),
            Self::SleepingClose => f.write_str("auto.sleeping_close"),
            Self::SunProtection => f.write_str("auto.sun_protection"),
            Self::DoorOpen => f.write_str("auto.door_open"),
            Self::DoorOpenActive => f.write_str("auto.door_open.open"),
            Self::DoorOpenPost => f.write_str("auto.door_open.post"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadingTrigger {
    ManualOn,
    ManualOff,
    /// A human moved the shutter.
    HandDetected,
    HandTimedOut,
    WindAlarmOn,
    WindAlarmOff,
    NightStarted,
    DayStarted,
    SleepStarted,
    SleepEnded,
    SunStarted,
    SunEnded,
    DoorOpened,
    DoorClosed,
    DoorPostTimedOut,
    /// Re-derive the correct auto sub-state after entering `auto.init`.
    Resolve,
}

impl fmt::Display for ShadingTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ManualOn => "manual_on",
            Self::ManualOff => "manual_off",
            Self::HandDetected => "hand_detected",
            Self::HandTimedOut => "hand_timed_out",
            Self::WindAlarmOn => "wind_alarm_on",
            Self::WindAlarmOff => "wind_alarm_off",
            Self::NightStarted => "night_started",
            Self::DayStarted => "day_started",
            Self::SleepStarted => "sleep_started",
            Self::SleepEnded => "sleep_ended",
            Self::SunStarted => "sun_started",
            Self::SunEnded => "sun_ended",
            Self::DoorOpened => "door_opened",
            Self::DoorClosed => "door_closed",
            Self::DoorPostTimedOut => "door_post_timed_out",
            Self::Resolve => "resolve",
        };
        f.write_str(name)
    }
}

/// Guard context, assembled by the rule right before each fire.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShadingContext {
    pub night: bool,
    pub sleeping: bool,
    pub sun_active: bool,
    pub night_close_enabled: bool,
    pub sleeping_close_enabled: bool,
    pub sun_protection_enabled: bool,
}

fn sleeping_close(ctx: &ShadingContext) -> bool {
    ctx.sleeping && ctx.sleeping_close_enabled
}

fn night_close(ctx: &ShadingContext) -> bool {
    ctx.night && ctx.night_close_enabled
}

fn sun_protection(ctx: &ShadingContext) -> bool {
    ctx.sun_active && ctx.sun_protection_enabled
}

fn default_open_position() -> f64 {
    0.0
}

fn default_close_position() -> Option<f64> {
    Some(100.0)
}

fn default_door_open_position() -> Option<f64> {
    Some(0.0)
}

fn default_hand_timeout() -> u64 {
    86_400
}

fn default_door_post_timeout() -> u64 {
    300
}

/// Positions (percent, 0 = open, 100 = closed) and timings.
///
/// A `None` position disables the corresponding sub-state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadingSettings {
    #[serde(default = "default_open_position")]
    pub open_position: f64,
    #[serde(default = "default_close_position")]
    pub night_close_position: Option<f64>,
    #[serde(default = "default_close_position")]
    pub sleeping_close_position: Option<f64>,
    #[serde(default)]
    pub sun_protection_position: Option<f64>,
    #[serde(default = "default_door_open_position")]
    pub door_open_position: Option<f64>,
    /// Seconds a manual move suspends the automatic behavior.
    #[serde(default = "default_hand_timeout")]
    pub hand_timeout: u64,
    /// Seconds the shutter stays up after the door closed.
    #[serde(default = "default_door_post_timeout")]
    pub door_post_timeout: u64,
}

impl Default for ShadingSettings {
    fn default() -> Self {
        Self {
            open_position: default_open_position(),
            night_close_position: default_close_position(),
            sleeping_close_position: default_close_position(),
            sun_protection_position: None,
            door_open_position: default_door_open_position(),
            hand_timeout: default_hand_timeout(),
            door_post_timeout: default_door_post_timeout(),
        }
    }
}

impl ShadingSettings {
    /// Assemble the guard context for the current situation.
    #[must_use]
    pub fn guard_context(&self, night: bool, sleeping: bool, sun_active: bool) -> ShadingContext {
        ShadingContext {
            night,
            sleeping,
            sun_active,
            night_close_enabled: self.night_close_position.is_some(),
            sleeping_close_enabled: self.sleeping_close_position.is_some(),
            sun_protection_enabled: self.sun_protection_position.is_some(),
        }
    }

    pub fn configure_timeouts(
        &self,
        machine: &mut Machine<ShadingState, ShadingTrigger, ShadingContext>,
    ) {
        machine.set_timeout(
            ShadingState::Hand,
            Some(Duration::from_secs(self.hand_timeout)),
        );
        machine.set_timeout(
            ShadingState::DoorOpenPost,
            Some(Duration::from_secs(self.door_post_timeout)),
        );
    }
}

/// Build the shading state graph.
///
/// # Errors
///
/// Returns a [`DefinitionError`] only if the graph itself is inconsistent,
/// which would be a bug in this module.
pub fn shading_graph()
-> Result<MachineDef<ShadingState, ShadingTrigger, ShadingContext>, DefinitionError> {
    let mut builder = MachineBuilder::new(ShadingState::Auto);
    builder.state(ShadingState::Manual);
    builder.state_with_timeout(
        ShadingState::Hand,
        Duration::ZERO,
        ShadingTrigger::HandTimedOut,
    );
    builder.state(ShadingState::WindAlarm);
    builder.composite(ShadingState::Auto, ShadingState::Init);
    builder.child(ShadingState::Auto, ShadingState::Init);
    builder.child(ShadingState::Auto, ShadingState::Open);
    builder.child(ShadingState::Auto, ShadingState::NightClose);
    builder.child(ShadingState::Auto, ShadingState::SleepingClose);
    builder.child(ShadingState::Auto, ShadingState::SunProtection);
    builder.child_composite(
        ShadingState::Auto,
        ShadingState::DoorOpen,
        ShadingState::DoorOpenActive,
    );
    builder.child(ShadingState::DoorOpen, ShadingState::DoorOpenActive);
    builder.child_with_timeout(
        ShadingState::DoorOpen,
        ShadingState::DoorOpenPost,
        Duration::ZERO,
        ShadingTrigger::DoorPostTimedOut,
    );

    builder.transition(
        ShadingTrigger::ManualOn,
        [ShadingState::Auto, ShadingState::Hand, ShadingState::WindAlarm],
        ShadingState::Manual,
    );
    builder.transition(ShadingTrigger::ManualOff, [ShadingState::Manual], ShadingState::Auto);

    builder.transition(ShadingTrigger::HandDetected, [ShadingState::Auto], ShadingState::Hand);
    builder.transition(ShadingTrigger::HandTimedOut, [ShadingState::Hand], ShadingState::Auto);

    builder.transition(
        ShadingTrigger::WindAlarmOn,
        [ShadingState::Auto, ShadingState::Hand],
        ShadingState::WindAlarm,
    );
    builder.transition(
        ShadingTrigger::WindAlarmOff,
        [ShadingState::WindAlarm],
        ShadingState::Auto,
    );

    // Priority chain after entering `auto.init`: declaration order decides.
    builder
        .transition(ShadingTrigger::Resolve, [ShadingState::Init], ShadingState::SleepingClose)
        .when(sleeping_close);
    builder
        .transition(ShadingTrigger::Resolve, [ShadingState::Init], ShadingState::NightClose)
        .when(night_close);
    builder
        .transition(ShadingTrigger::Resolve, [ShadingState::Init], ShadingState::SunProtection)
        .when(sun_protection);
    builder.transition(ShadingTrigger::Resolve, [ShadingState::Init], ShadingState::Open);

    builder
        .transition(
            ShadingTrigger::SleepStarted,
            [
                ShadingState::Open,
                ShadingState::NightClose,
                ShadingState::SunProtection,
            ],
            ShadingState::SleepingClose,
        )
        .when(sleeping_close);
    builder.transition(
        ShadingTrigger::SleepEnded,
        [ShadingState::SleepingClose],
        ShadingState::Init,
    );

    builder
        .transition(
            ShadingTrigger::NightStarted,
            [ShadingState::Open, ShadingState::SunProtection],
            ShadingState::NightClose,
        )
        .when(night_close);
    builder.transition(
        ShadingTrigger::DayStarted,
        [ShadingState::NightClose],
        ShadingState::Init,
    );

    builder
        .transition(ShadingTrigger::SunStarted, [ShadingState::Open], ShadingState::SunProtection)
        .when(sun_protection);
    builder.transition(
        ShadingTrigger::SunEnded,
        [ShadingState::SunProtection],
        ShadingState::Init,
    );

    builder.transition(
        ShadingTrigger::DoorOpened,
        [
            ShadingState::Open,
            ShadingState::NightClose,
            ShadingState::SleepingClose,
            ShadingState::SunProtection,
            ShadingState::DoorOpenPost,
        ],
        ShadingState::DoorOpen,
    );
    builder.transition(
        ShadingTrigger::DoorClosed,
        [ShadingState::DoorOpenActive],
        ShadingState::DoorOpenPost,
    );
    builder.transition(
        ShadingTrigger::DoorPostTimedOut,
        [ShadingState::DoorOpenPost],
        ShadingState::Init,
    );

    builder.build()
}

/// Target shutter position after entering `state`, if the rule should move
/// at all.
#[must_use]
pub fn target_position(settings: &ShadingSettings, state: ShadingState) -> Option<f64> {
    match state {
        ShadingState::Manual
        | ShadingState::Hand
        | ShadingState::Auto
        | ShadingState::Init
        | ShadingState::DoorOpen
        | ShadingState::DoorOpenPost => None,
        // Wind alarm drives the shutter fully open so gusts cannot damage it.
        ShadingState::WindAlarm => Some(0.0),
        ShadingState::Open => Some(settings.open_position),
        ShadingState::NightClose => settings.night_close_position,
        ShadingState::SleepingClose => settings.sleeping_close_position,
        ShadingState::SunProtection => settings.sun_protection_position,
        ShadingState::DoorOpenActive => settings.door_open_position,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_sun() -> ShadingSettings {
        ShadingSettings {
            sun_protection_position: Some(85.0),
            ..ShadingSettings::default()
        }
    }

    fn machine() -> Machine<ShadingState, ShadingTrigger, ShadingContext> {
        let mut machine = Machine::new(shading_graph().unwrap());
        settings_with_sun().configure_timeouts(&mut machine);
        machine
    }

    #[test]
    fn should_start_in_init() {
        assert_eq!(machine().current(), ShadingState::Init);
    }

    #[test]
    fn should_resolve_by_priority_sleeping_over_night_over_sun() {
        let settings = settings_with_sun();

        let mut machine = machine();
        machine.fire(ShadingTrigger::Resolve, &settings.guard_context(true, true, true));
        assert_eq!(machine.current(), ShadingState::SleepingClose);

        let mut machine = self::machine();
        machine.fire(ShadingTrigger::Resolve, &settings.guard_context(true, false, true));
        assert_eq!(machine.current(), ShadingState::NightClose);

        let mut machine = self::machine();
        machine.fire(ShadingTrigger::Resolve, &settings.guard_context(false, false, true));
        assert_eq!(machine.current(), ShadingState::SunProtection);

        let mut machine = self::machine();
        machine.fire(ShadingTrigger::Resolve, &settings.guard_context(false, false, false));
        assert_eq!(machine.current(), ShadingState::Open);
    }

    #[test]
    fn should_lift_for_door_and_hold_after_close() {
        let settings = settings_with_sun();
        let ctx = settings.guard_context(true, false, false);

        let mut machine = machine();
        machine.fire(ShadingTrigger::Resolve, &ctx);
        assert_eq!(machine.current(), ShadingState::NightClose);

        machine.fire(ShadingTrigger::DoorOpened, &ctx);
        assert_eq!(machine.current(), ShadingState::DoorOpenActive);
        assert_eq!(target_position(&settings, machine.current()), Some(0.0));

        machine.fire(ShadingTrigger::DoorClosed, &ctx);
        assert_eq!(machine.current(), ShadingState::DoorOpenPost);
        assert_eq!(
            machine.active_timeout().map(|t| t.after),
            Some(Duration::from_secs(300))
        );
        // Holding: no movement while waiting.
        assert_eq!(target_position(&settings, machine.current()), None);

        // Re-opening the door returns to the active child.
        machine.fire(ShadingTrigger::DoorOpened, &ctx);
        assert_eq!(machine.current(), ShadingState::DoorOpenActive);

        machine.fire(ShadingTrigger::DoorClosed, &ctx);
        machine.fire(ShadingTrigger::DoorPostTimedOut, &ctx);
        assert_eq!(machine.current(), ShadingState::Init);
    }

    #[test]
    fn should_override_hand_with_wind_alarm_but_not_manual() {
        let settings = settings_with_sun();
        let ctx = settings.guard_context(false, false, false);

        let mut machine = machine();
        machine.fire(ShadingTrigger::HandDetected, &ctx);
        assert_eq!(machine.current(), ShadingState::Hand);

        machine.fire(ShadingTrigger::WindAlarmOn, &ctx);
        assert_eq!(machine.current(), ShadingState::WindAlarm);
        assert_eq!(target_position(&settings, machine.current()), Some(0.0));

        machine.fire(ShadingTrigger::WindAlarmOff, &ctx);
        assert_eq!(machine.current(), ShadingState::Init);

        machine.fire(ShadingTrigger::ManualOn, &ctx);
        assert_eq!(machine.current(), ShadingState::Manual);
        let fired = machine.fire(ShadingTrigger::WindAlarmOn, &ctx);
        assert!(!fired.did_transition());
    }

    #[test]
    fn should_skip_sun_protection_when_not_configured() {
        let settings = ShadingSettings::default();
        let mut machine = machine();
        machine.fire(ShadingTrigger::Resolve, &settings.guard_context(false, false, false));
        assert_eq!(machine.current(), ShadingState::Open);

        let fired = machine.fire(
            ShadingTrigger::SunStarted,
            &settings.guard_context(false, false, true),
        );
        assert!(!fired.did_transition());
    }

    #[test]
    fn should_leave_hand_after_timeout() {
        let settings = settings_with_sun();
        let ctx = settings.guard_context(false, false, false);

        let mut machine = machine();
        machine.fire(ShadingTrigger::HandDetected, &ctx);
        assert_eq!(
            machine.active_timeout().map(|t| t.after),
            Some(Duration::from_secs(86_400))
        );

        machine.fire(ShadingTrigger::HandTimedOut, &ctx);
        assert_eq!(machine.current(), ShadingState::Init);
    }

    #[test]
    fn should_deserialize_settings_with_defaults() {
        let settings: ShadingSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, ShadingSettings::default());
        assert_eq!(settings.night_close_position, Some(100.0));
        assert_eq!(settings.sun_protection_position, None);
    }
}
