//! Speaker — background playback following presence, sleep, and daytime.
//!
//! The speaker plays while somebody is home and awake, at a volume that
//! depends on day or night. Absence and sleep stop the playback. A human
//! using the speaker directly parks the rule in `hand` until its timeout.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::machine::{DefinitionError, Machine, MachineBuilder, MachineDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpeakerState {
    Hand,
    Auto,
    Init,
    Standby,
    Playing,
    PlayingDay,
    PlayingNight,
}

impl fmt::Display for SpeakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hand => f.write_str("hand"),
            Self::Auto => f.write_str("auto"),
            Self::Init => f.write_str("auto.init"),
            Self::Standby => f.write_str("auto.standby"),
            Self::Playing => f.write_str("auto.playing"),
            Self::PlayingDay => f.write_str("auto.playing.day"),
            Self::PlayingNight => f.write_str("auto.playing.night"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerTrigger {
    /// A human used the speaker directly.
    HandDetected,
    HandTimedOut,
    PresenceArrived,
    AbsenceStarted,
    SleepStarted,
    DayStarted,
    NightStarted,
    /// Re-derive the correct auto sub-state after entering `auto.init`.
    Resolve,
}

impl fmt::Display for SpeakerTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HandDetected => "hand_detected",
            Self::HandTimedOut => "hand_timed_out",
            Self::PresenceArrived => "presence_arrived",
            Self::AbsenceStarted => "absence_started",
            Self::SleepStarted => "sleep_started",
            Self::DayStarted => "day_started",
            Self::NightStarted => "night_started",
            Self::Resolve => "resolve",
        };
        f.write_str(name)
    }
}

/// Guard context, assembled by the rule right before each fire.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpeakerContext {
    pub present: bool,
    pub sleeping: bool,
    pub day: bool,
}

fn should_play(ctx: &SpeakerContext) -> bool {
    ctx.present && !ctx.sleeping
}

fn is_day(ctx: &SpeakerContext) -> bool {
    ctx.day
}

fn default_day_volume() -> f64 {
    40.0
}

fn default_night_volume() -> f64 {
    20.0
}

fn default_hand_timeout() -> u64 {
    7200
}

/// Volumes (percent) and the hand timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerSettings {
    #[serde(default = "default_day_volume")]
    pub day_volume: f64,
    #[serde(default = "default_night_volume")]
    pub night_volume: f64,
    /// Seconds a hand interaction suspends the automatic behavior.
    #[serde(default = "default_hand_timeout")]
    pub hand_timeout: u64,
}

impl Default for SpeakerSettings {
    fn default() -> Self {
        Self {
            day_volume: default_day_volume(),
            night_volume: default_night_volume(),
            hand_timeout: default_hand_timeout(),
        }
    }
}

impl SpeakerSettings {
    pub fn configure_timeouts(
        &self,
        machine: &mut Machine<SpeakerState, SpeakerTrigger, SpeakerContext>,
    ) {
        machine.set_timeout(
            SpeakerState::Hand,
            Some(Duration::from_secs(self.hand_timeout)),
        );
    }
}

/// Build the speaker state graph.
///
/// # Errors
///
/// Returns a [`DefinitionError`] only if the graph itself is inconsistent,
/// which would be a bug in this module.
pub fn speaker_graph()
-> Result<MachineDef<SpeakerState, SpeakerTrigger, SpeakerContext>, DefinitionError> {
    let mut builder = MachineBuilder::new(SpeakerState::Auto);
    builder.state_with_timeout(
        SpeakerState::Hand,
        Duration::ZERO,
        SpeakerTrigger::HandTimedOut,
    );
    builder.composite(SpeakerState::Auto, SpeakerState::Init);
    builder.child(SpeakerState::Auto, SpeakerState::Init);
    builder.child(SpeakerState::Auto, SpeakerState::Standby);
    builder.child_composite(SpeakerState::Auto, SpeakerState::Playing, SpeakerState::PlayingDay);
    builder.child(SpeakerState::Playing, SpeakerState::PlayingDay);
    builder.child(SpeakerState::Playing, SpeakerState::PlayingNight);

    builder.transition(SpeakerTrigger::HandDetected, [SpeakerState::Auto], SpeakerState::Hand);
    builder.transition(SpeakerTrigger::HandTimedOut, [SpeakerState::Hand], SpeakerState::Auto);

    builder
        .transition(SpeakerTrigger::Resolve, [SpeakerState::Init], SpeakerState::PlayingDay)
        .when(should_play)
        .when(is_day);
    builder
        .transition(SpeakerTrigger::Resolve, [SpeakerState::Init], SpeakerState::PlayingNight)
        .when(should_play)
        .unless(is_day);
    builder.transition(SpeakerTrigger::Resolve, [SpeakerState::Init], SpeakerState::Standby);

    builder
        .transition(SpeakerTrigger::PresenceArrived, [SpeakerState::Standby], SpeakerState::PlayingDay)
        .when(should_play)
        .when(is_day);
    builder
        .transition(
            SpeakerTrigger::PresenceArrived,
            [SpeakerState::Standby],
            SpeakerState::PlayingNight,
        )
        .when(should_play)
        .unless(is_day);

    builder.transition(
        SpeakerTrigger::AbsenceStarted,
        [SpeakerState::Playing],
        SpeakerState::Standby,
    );
    builder.transition(
        SpeakerTrigger::SleepStarted,
        [SpeakerState::Playing],
        SpeakerState::Standby,
    );

    builder.transition(
        SpeakerTrigger::DayStarted,
        [SpeakerState::PlayingNight],
        SpeakerState::PlayingDay,
    );
    builder.transition(
        SpeakerTrigger::NightStarted,
        [SpeakerState::PlayingDay],
        SpeakerState::PlayingNight,
    );

    builder.build()
}

/// What the rule should do with the speaker after a transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeakerTarget {
    Play { volume: f64 },
    Stop,
}

/// Target playback after entering `state`, if the rule should act at all.
#[must_use]
pub fn target_playback(settings: &SpeakerSettings, state: SpeakerState) -> Option<SpeakerTarget> {
    match state {
        SpeakerState::Hand | SpeakerState::Auto | SpeakerState::Init | SpeakerState::Playing => None,
        SpeakerState::Standby => Some(SpeakerTarget::Stop),
        SpeakerState::PlayingDay => Some(SpeakerTarget::Play {
            volume: settings.day_volume,
        }),
        SpeakerState::PlayingNight => Some(SpeakerTarget::Play {
            volume: settings.night_volume,
        }),
    }
}
