//! Light — automatic lights with manual override, pre-off dimming, and
//! leaving/sleep handling.
//!
//! The graph has a `manual` state (rule hands off) and an `auto` composite.
//! Inside `auto`, the light is `on` with a context-dependent brightness and
//! timeout, dims to `preoff` as a warning before switching `off`, and enters
//! `leaving`/`presleep` when the house empties or goes to sleep. Aborting
//! leaving or falling asleep returns to `on` only if the light was on
//! before.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::machine::{DefinitionError, Machine, MachineBuilder, MachineDef};

/// Leaf and composite states of the light graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightState {
    Manual,
    Auto,
    Init,
    On,
    Preoff,
    Off,
    Leaving,
    Presleep,
}

impl fmt::Display for LightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => f.write_str("manual"),
            Self::Auto => f.write_str("auto"),
            Self::Init => f.write_str("auto.init"),
            Self::On => f.write_str("auto.on"),
            Self::Preoff => f.write_str("auto.preoff"),
            Self::Off => f.write_str("auto.off"),
            Self::Leaving => f.write_str("auto.leaving"),
            Self::Presleep => f.write_str("auto.presleep"),
        }
    }
}

/// Everything that can drive the light graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightTrigger {
    /// The manual-mode switch was turned on.
    ManualOn,
    /// The manual-mode switch was turned off.
    ManualOff,
    /// A human turned the light on.
    HandOn,
    /// A human turned the light off.
    HandOff,
    /// A human changed the brightness.
    HandChanged,
    OnTimeout,
    PreoffTimeout,
    LeavingTimeout,
    PresleepTimeout,
    /// The house started emptying.
    LeavingStarted,
    /// Somebody came back while leaving.
    LeavingAborted,
    /// The house is falling asleep.
    SleepStarted,
    /// Sleep ended (or was aborted).
    SleepAborted,
    /// Re-derive on/off after entering `auto.init`.
    Resolve,
}

impl fmt::Display for LightTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ManualOn => "manual_on",
            Self::ManualOff => "manual_off",
            Self::HandOn => "hand_on",
            Self::HandOff => "hand_off",
            Self::HandChanged => "hand_changed",
            Self::OnTimeout => "on_timeout",
            Self::PreoffTimeout => "preoff_timeout",
            Self::LeavingTimeout => "leaving_timeout",
            Self::PresleepTimeout => "presleep_timeout",
            Self::LeavingStarted => "leaving_started",
            Self::LeavingAborted => "leaving_aborted",
            Self::SleepStarted => "sleep_started",
            Self::SleepAborted => "sleep_aborted",
            Self::Resolve => "resolve",
        };
        f.write_str(name)
    }
}

/// Guard context, assembled by the rule right before each fire.
#[derive(Debug, Clone, Copy, Default)]
pub struct LightContext {
    /// The light currently emits light (brightness above zero).
    pub light_on: bool,
    /// The remembered brightness before dimming/leaving was above zero.
    pub was_on_before: bool,
    pub pre_off_enabled: bool,
    pub leaving_enabled: bool,
    pub pre_sleep_enabled: bool,
}

fn light_is_on(ctx: &LightContext) -> bool {
    ctx.light_on
}

fn was_on_before(ctx: &LightContext) -> bool {
    ctx.was_on_before
}

fn pre_off_enabled(ctx: &LightContext) -> bool {
    ctx.pre_off_enabled
}

fn leaving_enabled(ctx: &LightContext) -> bool {
    ctx.leaving_enabled
}

fn pre_sleep_enabled(ctx: &LightContext) -> bool {
    ctx.pre_sleep_enabled
}

/// Brightness and timeout of one functional state, for one context.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FunctionSetting {
    /// Target brightness in percent.
    pub brightness: f64,
    /// Timeout in seconds; zero disables the function.
    pub timeout: u64,
}

impl FunctionSetting {
    fn timeout_duration(self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Day/night/sleeping variants of one functional setting.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ContextTable {
    #[serde(default)]
    pub day: Option<FunctionSetting>,
    #[serde(default)]
    pub night: Option<FunctionSetting>,
    #[serde(default)]
    pub sleeping: Option<FunctionSetting>,
}

impl ContextTable {
    /// The setting for the current context: `sleeping` wins over the
    /// day/night pair.
    #[must_use]
    pub fn resolve(&self, day: bool, sleeping: bool) -> Option<FunctionSetting> {
        if sleeping {
            self.sleeping
        } else if day {
            self.day
        } else {
            self.night
        }
    }
}

/// Per-rule behavior settings for a light.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LightSettings {
    /// Brightness/timeout while on.
    #[serde(default)]
    pub on: ContextTable,
    /// Dim-as-warning before switching off. Missing means no pre-off phase.
    #[serde(default)]
    pub pre_off: Option<ContextTable>,
    /// Behavior when the house empties. Missing means leaving is ignored.
    #[serde(default)]
    pub leaving: Option<ContextTable>,
    /// Behavior while falling asleep. Missing means sleep is ignored.
    #[serde(default)]
    pub pre_sleep: Option<ContextTable>,
}

impl LightSettings {
    #[must_use]
    pub fn on_setting(&self, day: bool, sleeping: bool) -> Option<FunctionSetting> {
        self.on.resolve(day, sleeping)
    }

    #[must_use]
    pub fn pre_off_setting(&self, day: bool, sleeping: bool) -> Option<FunctionSetting> {
        self.pre_off.as_ref().and_then(|table| table.resolve(day, sleeping))
    }

    #[must_use]
    pub fn leaving_setting(&self, day: bool, sleeping: bool) -> Option<FunctionSetting> {
        self.leaving.as_ref().and_then(|table| table.resolve(day, sleeping))
    }

    /// Pre-sleep starts from an awake house, so only day/night apply.
    #[must_use]
    pub fn pre_sleep_setting(&self, day: bool) -> Option<FunctionSetting> {
        self.pre_sleep.as_ref().and_then(|table| table.resolve(day, false))
    }

    /// Assemble the guard context for the current situation.
    #[must_use]
    pub fn guard_context(
        &self,
        day: bool,
        sleeping: bool,
        light_on: bool,
        was_on_before: bool,
    ) -> LightContext {
        let enabled = |setting: Option<FunctionSetting>| setting.is_some_and(|s| s.timeout > 0);
        LightContext {
            light_on,
            was_on_before,
            pre_off_enabled: enabled(self.pre_off_setting(day, sleeping)),
            leaving_enabled: enabled(self.leaving_setting(day, sleeping)),
            pre_sleep_enabled: enabled(self.pre_sleep_setting(day)),
        }
    }

    /// Push the context-dependent timeouts into a machine instance.
    pub fn configure_timeouts(
        &self,
        machine: &mut Machine<LightState, LightTrigger, LightContext>,
        day: bool,
        sleeping: bool,
    ) {
        let duration = |setting: Option<FunctionSetting>| setting.map(FunctionSetting::timeout_duration);
        machine.set_timeout(LightState::On, duration(self.on_setting(day, sleeping)));
        machine.set_timeout(LightState::Preoff, duration(self.pre_off_setting(day, sleeping)));
        machine.set_timeout(LightState::Leaving, duration(self.leaving_setting(day, sleeping)));
        machine.set_timeout(LightState::Presleep, duration(self.pre_sleep_setting(day)));
    }
}

/// Build the light state graph.
///
/// # Errors
///
/// Returns a [`DefinitionError`] only if the graph itself is inconsistent,
/// which would be a bug in this module.
pub fn light_graph() -> Result<MachineDef<LightState, LightTrigger, LightContext>, DefinitionError>
{
    let mut builder = MachineBuilder::new(LightState::Auto);
    builder.state(LightState::Manual);
    builder.composite(LightState::Auto, LightState::Init);
    builder.child(LightState::Auto, LightState::Init);
    builder.child_with_timeout(
        LightState::Auto,
        LightState::On,
        Duration::ZERO,
        LightTrigger::OnTimeout,
    );
    builder.child_with_timeout(
        LightState::Auto,
        LightState::Preoff,
        Duration::ZERO,
        LightTrigger::PreoffTimeout,
    );
    builder.child(LightState::Auto, LightState::Off);
    builder.child_with_timeout(
        LightState::Auto,
        LightState::Leaving,
        Duration::ZERO,
        LightTrigger::LeavingTimeout,
    );
    builder.child_with_timeout(
        LightState::Auto,
        LightState::Presleep,
        Duration::ZERO,
        LightTrigger::PresleepTimeout,
    );

    builder.transition(LightTrigger::ManualOn, [LightState::Auto], LightState::Manual);
    builder.transition(LightTrigger::ManualOff, [LightState::Manual], LightState::Auto);

    builder
        .transition(LightTrigger::Resolve, [LightState::Init], LightState::On)
        .when(light_is_on);
    builder
        .transition(LightTrigger::Resolve, [LightState::Init], LightState::Off)
        .unless(light_is_on);

    builder.transition(
        LightTrigger::HandOn,
        [LightState::Off, LightState::Preoff],
        LightState::On,
    );
    builder.transition(
        LightTrigger::HandOff,
        [LightState::On, LightState::Leaving, LightState::Presleep],
        LightState::Off,
    );
    builder.transition(LightTrigger::HandChanged, [LightState::Preoff], LightState::On);

    builder
        .transition(LightTrigger::OnTimeout, [LightState::On], LightState::Preoff)
        .when(pre_off_enabled);
    builder
        .transition(LightTrigger::OnTimeout, [LightState::On], LightState::Off)
        .unless(pre_off_enabled);
    builder.transition(LightTrigger::PreoffTimeout, [LightState::Preoff], LightState::Off);

    builder
        .transition(
            LightTrigger::LeavingStarted,
            [LightState::On, LightState::Off, LightState::Preoff],
            LightState::Leaving,
        )
        .when(leaving_enabled);
    builder
        .transition(LightTrigger::LeavingAborted, [LightState::Leaving], LightState::On)
        .when(was_on_before);
    builder
        .transition(LightTrigger::LeavingAborted, [LightState::Leaving], LightState::Off)
        .unless(was_on_before);
    builder.transition(LightTrigger::LeavingTimeout, [LightState::Leaving], LightState::Off);

    builder
        .transition(
            LightTrigger::SleepStarted,
            [LightState::On, LightState::Off, LightState::Preoff],
            LightState::Presleep,
        )
        .when(pre_sleep_enabled);
    builder
        .transition(LightTrigger::SleepAborted, [LightState::Presleep], LightState::On)
        .when(was_on_before);
    builder
        .transition(LightTrigger::SleepAborted, [LightState::Presleep], LightState::Off)
        .unless(was_on_before);
    builder.transition(LightTrigger::PresleepTimeout, [LightState::Presleep], LightState::Off);

    builder.build()
}

/// What the rule should do with the light after a transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightTarget {
    Brightness(f64),
    Off,
}

/// Derive the target brightness after entering `to` from `from`.
///
/// `None` means "leave the light alone": manual mode, and either outcome
/// of resolving `auto.init` (the light already matches the state it
/// resolved into). Resuming `on` from
/// `preoff`, `leaving`, or `presleep` restores `brightness_before`;
/// entering `preoff` dims to the configured level, capped at half the
/// prior brightness when the prior brightness was below the configured
/// level.
#[must_use]
pub fn target_brightness(
    settings: &LightSettings,
    to: LightState,
    from: LightState,
    day: bool,
    sleeping: bool,
    brightness_before: f64,
) -> Option<LightTarget> {
    match to {
        LightState::Manual | LightState::Auto | LightState::Init => None,
        LightState::On => match from {
            LightState::Preoff | LightState::Leaving | LightState::Presleep => {
                Some(LightTarget::Brightness(brightness_before))
            }
            LightState::Init => None,
            _ => settings
                .on_setting(day, sleeping)
                .map(|s| LightTarget::Brightness(s.brightness)),
        },
        LightState::Preoff => settings.pre_off_setting(day, sleeping).map(|s| {
            if brightness_before > 0.0 && brightness_before < s.brightness {
                LightTarget::Brightness(brightness_before / 2.0)
            } else {
                LightTarget::Brightness(s.brightness)
            }
        }),
        LightState::Off => (from != LightState::Init).then_some(LightTarget::Off),
        LightState::Leaving => settings
            .leaving_setting(day, sleeping)
            .map(|s| LightTarget::Brightness(s.brightness)),
        LightState::Presleep => settings
            .pre_sleep_setting(day)
            .map(|s| LightTarget::Brightness(s.brightness)),
    }
}
