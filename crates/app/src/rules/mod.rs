//! Reactive rules — items, observers, and a machine wired together.
//!
//! Each module pairs one domain state graph with its platform items: the
//! rule declares subscriptions, translates incoming events into triggers,
//! and recomputes its outputs after an actual state change. Rules chain
//! through persisted state items: the light rule, for example, follows the
//! text item the presence rule writes its leaf names to.

use rulehub_domain::error::RulehubError;
use rulehub_domain::event::{ItemEvent, ItemEventKind, Subscription};
use rulehub_domain::item::{ItemName, OnOff};

use crate::ports::Platform;
use crate::timers::{RuleId, TimerService, TimerSlot};

mod current_switch;
mod energy_save;
mod light;
mod motion;
mod presence;
mod shading;
mod sleep;
mod speaker;
mod ventilation;

pub use current_switch::{CurrentSwitchConfig, CurrentSwitchRule};
pub use energy_save::{EnergySaveConfig, EnergySaveRule};
pub use light::{LightConfig, LightRule};
pub use motion::{MotionConfig, MotionRule};
pub use presence::{PresenceConfig, PresenceRule};
pub use shading::{ShadingConfig, ShadingRule};
pub use sleep::{SleepConfig, SleepRule};
pub use speaker::{SpeakerConfig, SpeakerRule};
pub use ventilation::{VentilationConfig, VentilationRule};

/// All rule families the engine can run.
pub enum Rule {
    Light(LightRule),
    Presence(PresenceRule),
    Sleep(SleepRule),
    Shading(ShadingRule),
    Ventilation(VentilationRule),
    Motion(MotionRule),
    Speaker(SpeakerRule),
    EnergySave(EnergySaveRule),
    CurrentSwitch(CurrentSwitchRule),
}

impl Rule {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Light(rule) => rule.name(),
            Self::Presence(rule) => rule.name(),
            Self::Sleep(rule) => rule.name(),
            Self::Shading(rule) => rule.name(),
            Self::Ventilation(rule) => rule.name(),
            Self::Motion(rule) => rule.name(),
            Self::Speaker(rule) => rule.name(),
            Self::EnergySave(rule) => rule.name(),
            Self::CurrentSwitch(rule) => rule.name(),
        }
    }

    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        match self {
            Self::Light(rule) => rule.subscriptions(),
            Self::Presence(rule) => rule.subscriptions(),
            Self::Sleep(rule) => rule.subscriptions(),
            Self::Shading(rule) => rule.subscriptions(),
            Self::Ventilation(rule) => rule.subscriptions(),
            Self::Motion(rule) => rule.subscriptions(),
            Self::Speaker(rule) => rule.subscriptions(),
            Self::EnergySave(rule) => rule.subscriptions(),
            Self::CurrentSwitch(rule) => rule.subscriptions(),
        }
    }

    /// Resume the rule from its persisted state and derive initial outputs.
    ///
    /// # Errors
    ///
    /// Propagates platform errors.
    pub async fn init<P: Platform>(
        &mut self,
        platform: &P,
        timers: &mut TimerService,
        id: RuleId,
    ) -> Result<(), RulehubError> {
        match self {
            Self::Light(rule) => rule.init(platform, timers, id).await,
            Self::Presence(rule) => rule.init(platform, timers, id).await,
            Self::Sleep(rule) => rule.init(platform, timers, id).await,
            Self::Shading(rule) => rule.init(platform, timers, id).await,
            Self::Ventilation(rule) => rule.init(platform, timers, id).await,
            Self::Motion(rule) => rule.init(platform, timers, id).await,
            Self::Speaker(rule) => rule.init(platform, timers, id).await,
            Self::EnergySave(rule) => rule.init(platform, timers, id).await,
            Self::CurrentSwitch(rule) => rule.init(platform, timers, id).await,
        }
    }

    /// React to one delivered item event.
    ///
    /// # Errors
    ///
    /// Propagates platform and protocol errors; the engine logs and
    /// isolates them.
    pub async fn handle_event<P: Platform>(
        &mut self,
        event: &ItemEvent,
        platform: &P,
        timers: &mut TimerService,
        id: RuleId,
    ) -> Result<(), RulehubError> {
        match self {
            Self::Light(rule) => rule.handle_event(event, platform, timers, id).await,
            Self::Presence(rule) => rule.handle_event(event, platform, timers, id).await,
            Self::Sleep(rule) => rule.handle_event(event, platform, timers, id).await,
            Self::Shading(rule) => rule.handle_event(event, platform, timers, id).await,
            Self::Ventilation(rule) => rule.handle_event(event, platform, timers, id).await,
            Self::Motion(rule) => rule.handle_event(event, platform, timers, id).await,
            Self::Speaker(rule) => rule.handle_event(event, platform, timers, id).await,
            Self::EnergySave(rule) => rule.handle_event(event, platform, timers, id).await,
            Self::CurrentSwitch(rule) => rule.handle_event(event, platform, timers, id).await,
        }
    }

    /// React to one of the rule's countdowns expiring.
    ///
    /// # Errors
    ///
    /// Propagates platform errors; the engine logs and isolates them.
    pub async fn handle_timer<P: Platform>(
        &mut self,
        slot: TimerSlot,
        platform: &P,
        timers: &mut TimerService,
        id: RuleId,
    ) -> Result<(), RulehubError> {
        match self {
            Self::Light(rule) => rule.handle_timer(slot, platform, timers, id).await,
            Self::Presence(rule) => rule.handle_timer(slot, platform, timers, id).await,
            Self::Sleep(rule) => rule.handle_timer(slot, platform, timers, id).await,
            Self::Shading(rule) => rule.handle_timer(slot, platform, timers, id).await,
            Self::Ventilation(rule) => rule.handle_timer(slot, platform, timers, id).await,
            Self::Motion(rule) => rule.handle_timer(slot, platform, timers, id).await,
            Self::Speaker(rule) => rule.handle_timer(slot, platform, timers, id).await,
            Self::EnergySave(rule) => rule.handle_timer(slot, platform, timers, id).await,
            Self::CurrentSwitch(rule) => rule.handle_timer(slot, platform, timers, id).await,
        }
    }
}

/// The new value of a switch input, when `event` is a state change of
/// `item`.
pub(crate) fn switch_changed(event: &ItemEvent, item: Option<&ItemName>) -> Option<OnOff> {
    if item.is_none_or(|item| event.item != *item) {
        return None;
    }
    match &event.kind {
        ItemEventKind::StateChanged { to, .. } => to.as_on_off(),
        _ => None,
    }
}

/// The new text of a text input, when `event` is a state change of `item`.
pub(crate) fn text_changed<'a>(event: &'a ItemEvent, item: Option<&ItemName>) -> Option<&'a str> {
    if item.is_none_or(|item| event.item != *item) {
        return None;
    }
    match &event.kind {
        ItemEventKind::StateChanged {
            to: rulehub_domain::item::Value::Text(text),
            ..
        } => Some(text),
        _ => None,
    }
}

/// The new number of a numeric input, when `event` is a state change of
/// `item`.
pub(crate) fn number_changed(event: &ItemEvent, item: Option<&ItemName>) -> Option<f64> {
    if item.is_none_or(|item| event.item != *item) {
        return None;
    }
    match &event.kind {
        ItemEventKind::StateChanged { to, .. } => to.as_number(),
        _ => None,
    }
}

/// The new value of a contact input, when `event` is a state change of
/// `item`.
pub(crate) fn contact_changed(
    event: &ItemEvent,
    item: Option<&ItemName>,
) -> Option<rulehub_domain::item::OpenClosed> {
    if item.is_none_or(|item| event.item != *item) {
        return None;
    }
    match &event.kind {
        ItemEventKind::StateChanged {
            to: rulehub_domain::item::Value::OpenClosed(state),
            ..
        } => Some(*state),
        _ => None,
    }
}

/// Whether a persisted sleep-rule leaf name means "the house is sleeping".
pub(crate) fn sleep_state_is_sleeping(leaf: &str) -> bool {
    matches!(leaf, "pre_sleeping" | "sleeping")
}
