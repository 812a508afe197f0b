//! Motion — filters a raw motion sensor into a calmed output switch.
//!
//! The raw sensor chatters: it drops out for a few seconds while somebody
//! sits still, and it reports motion in bright daylight when nobody needs a
//! light. The filtered output stays on through an `motion_extended` grace
//! period after the raw sensor drops, and the whole sensor can be locked
//! manually, by sleep (with a post-sleep cooldown), or by a brightness
//! threshold.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::machine::{DefinitionError, Machine, MachineBuilder, MachineDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionState {
    Locked,
    SleepLocked,
    PostSleepLocked,
    Unlocked,
    Wait,
    Motion,
    MotionExtended,
    TooBright,
}

impl MotionState {
    /// Whether the filtered output switch should be on.
    #[must_use]
    pub fn is_motion(self) -> bool {
        matches!(self, Self::Motion | Self::MotionExtended)
    }
}

impl fmt::Display for MotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locked => f.write_str("locked"),
            Self::SleepLocked => f.write_str("sleep_locked"),
            Self::PostSleepLocked => f.write_str("post_sleep_locked"),
            Self::Unlocked => f.write_str("unlocked"),
            Self::Wait => f.write_str("unlocked.wait"),
            Self::Motion => f.write_str("unlocked.motion"),
            Self::MotionExtended => f.write_str("unlocked.motion_extended"),
            Self::TooBright => f.write_str("unlocked.too_bright"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionTrigger {
    LockOn,
    LockOff,
    SleepStarted,
    SleepEnded,
    PostSleepTimedOut,
    /// The raw sensor reported motion.
    MotionOn,
    /// The raw sensor dropped.
    MotionOff,
    ExtendedTimedOut,
    BrightnessHigh,
    BrightnessLow,
}

impl fmt::Display for MotionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LockOn => "lock_on",
            Self::LockOff => "lock_off",
            Self::SleepStarted => "sleep_started",
            Self::SleepEnded => "sleep_ended",
            Self::PostSleepTimedOut => "post_sleep_timed_out",
            Self::MotionOn => "motion_on",
            Self::MotionOff => "motion_off",
            Self::ExtendedTimedOut => "extended_timed_out",
            Self::BrightnessHigh => "brightness_high",
            Self::BrightnessLow => "brightness_low",
        };
        f.write_str(name)
    }
}

/// Guard context, assembled by the rule right before each fire.
#[derive(Debug, Clone, Copy, Default)]
pub struct MotionContext {
    pub extended_enabled: bool,
}

fn extended_enabled(ctx: &MotionContext) -> bool {
    ctx.extended_enabled
}

fn default_extended_timeout() -> u64 {
    90
}

fn default_post_sleep_timeout() -> u64 {
    600
}

fn default_brightness_hysteresis() -> f64 {
    50.0
}

/// Timings and the optional brightness lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionSettings {
    /// Seconds the filtered output stays on after the raw sensor drops.
    /// Zero switches the output off immediately.
    #[serde(default = "default_extended_timeout")]
    pub extended_timeout: u64,
    /// Seconds the sensor stays locked after sleep ends.
    #[serde(default = "default_post_sleep_timeout")]
    pub post_sleep_timeout: u64,
    /// Lux above which motion is ignored. Missing disables the lock.
    #[serde(default)]
    pub brightness_threshold: Option<f64>,
    /// Width of the brightness dead-band around the threshold.
    #[serde(default = "default_brightness_hysteresis")]
    pub brightness_hysteresis: f64,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            extended_timeout: default_extended_timeout(),
            post_sleep_timeout: default_post_sleep_timeout(),
            brightness_threshold: None,
            brightness_hysteresis: default_brightness_hysteresis(),
        }
    }
}

impl MotionSettings {
    /// Assemble the guard context.
    #[must_use]
    pub fn guard_context(&self) -> MotionContext {
        MotionContext {
            extended_enabled: self.extended_timeout > 0,
        }
    }

    pub fn configure_timeouts(
        &self,
        machine: &mut Machine<MotionState, MotionTrigger, MotionContext>,
    ) {
        machine.set_timeout(
            MotionState::MotionExtended,
            Some(Duration::from_secs(self.extended_timeout)),
        );
        machine.set_timeout(
            MotionState::PostSleepLocked,
            Some(Duration::from_secs(self.post_sleep_timeout)),
        );
    }
}

/// Build the motion state graph.
///
/// # Errors
///
/// Returns a [`DefinitionError`] only if the graph itself is inconsistent,
/// which would be a bug in this module.
pub fn motion_graph() -> Result<MachineDef<MotionState, MotionTrigger, MotionContext>, DefinitionError>
{
    let mut builder = MachineBuilder::new(MotionState::Unlocked);
    builder.state(MotionState::Locked);
    builder.state(MotionState::SleepLocked);
    builder.state_with_timeout(
        MotionState::PostSleepLocked,
        Duration::ZERO,
        MotionTrigger::PostSleepTimedOut,
    );
    builder.composite(MotionState::Unlocked, MotionState::Wait);
    builder.child(MotionState::Unlocked, MotionState::Wait);
    builder.child(MotionState::Unlocked, MotionState::Motion);
    builder.child_with_timeout(
        MotionState::Unlocked,
        MotionState::MotionExtended,
        Duration::ZERO,
        MotionTrigger::ExtendedTimedOut,
    );
    builder.child(MotionState::Unlocked, MotionState::TooBright);

    builder.transition(
        MotionTrigger::LockOn,
        [
            MotionState::Unlocked,
            MotionState::SleepLocked,
            MotionState::PostSleepLocked,
        ],
        MotionState::Locked,
    );
    builder.transition(MotionTrigger::LockOff, [MotionState::Locked], MotionState::Unlocked);

    builder.transition(
        MotionTrigger::SleepStarted,
        [MotionState::Unlocked, MotionState::PostSleepLocked],
        MotionState::SleepLocked,
    );
    builder.transition(
        MotionTrigger::SleepEnded,
        [MotionState::SleepLocked],
        MotionState::PostSleepLocked,
    );
    builder.transition(
        MotionTrigger::PostSleepTimedOut,
        [MotionState::PostSleepLocked],
        MotionState::Unlocked,
    );

    builder.transition(MotionTrigger::MotionOn, [MotionState::Wait], MotionState::Motion);
    builder.transition(
        MotionTrigger::MotionOn,
        [MotionState::MotionExtended],
        MotionState::Motion,
    );
    builder
        .transition(MotionTrigger::MotionOff, [MotionState::Motion], MotionState::MotionExtended)
        .when(extended_enabled);
    builder
        .transition(MotionTrigger::MotionOff, [MotionState::Motion], MotionState::Wait)
        .unless(extended_enabled);
    builder.transition(
        MotionTrigger::ExtendedTimedOut,
        [MotionState::MotionExtended],
        MotionState::Wait,
    );

    // The brightness lock takes the sensor out of service only while idle;
    // running motion phases finish normally.
    builder.transition(
        MotionTrigger::BrightnessHigh,
        [MotionState::Wait],
        MotionState::TooBright,
    );
    builder.transition(
        MotionTrigger::BrightnessLow,
        [MotionState::TooBright],
        MotionState::Wait,
    );

    builder.build()
}
