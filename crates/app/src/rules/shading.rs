//! Shading rule — drives one roller shutter through the shading graph.

use serde::Deserialize;

use rulehub_domain::error::{RulehubError, SettingsError};
use rulehub_domain::event::{EventFilter, ItemEvent, Subscription};
use rulehub_domain::item::{ItemName, OnOff, Value};
use rulehub_domain::machine::{Fired, Machine};
use rulehub_domain::rules::shading::{
    ShadingContext, ShadingSettings, ShadingState, ShadingTrigger, shading_graph, target_position,
};

use crate::fsm::RuleFsm;
use crate::observer::ShutterObserver;
use crate::ports::Platform;
use crate::timers::{RuleId, TimerService, TimerSlot};

use super::{contact_changed, sleep_state_is_sleeping, switch_changed, text_changed};

/// Items and settings of one shading rule.
#[derive(Debug, Clone, Deserialize)]
pub struct ShadingConfig {
    pub name: String,
    /// The roller shutter the rule drives.
    pub shutter_item: ItemName,
    /// Wall controls whose travel commands always count as manual.
    #[serde(default)]
    pub control_items: Vec<ItemName>,
    /// Switch that parks the rule in `manual`.
    #[serde(default)]
    pub manual_item: Option<ItemName>,
    /// Switch raised by the weather station on dangerous wind.
    #[serde(default)]
    pub wind_alarm_item: Option<ItemName>,
    /// Switch that is on during the day; off means night.
    #[serde(default)]
    pub day_item: Option<ItemName>,
    /// Text item the sleep rule persists its leaf names to.
    #[serde(default)]
    pub sleep_state_item: Option<ItemName>,
    /// Switch that is on while the facade is in the sun.
    #[serde(default)]
    pub sun_item: Option<ItemName>,
    /// Contact of the door or window behind the shutter.
    #[serde(default)]
    pub door_item: Option<ItemName>,
    #[serde(default)]
    pub settings: ShadingSettings,
}

/// One shutter under automatic control.
pub struct ShadingRule {
    name: String,
    settings: ShadingSettings,
    output: ShutterObserver,
    manual_item: Option<ItemName>,
    wind_alarm_item: Option<ItemName>,
    day_item: Option<ItemName>,
    sleep_state_item: Option<ItemName>,
    sun_item: Option<ItemName>,
    door_item: Option<ItemName>,
    fsm: RuleFsm<ShadingState, ShadingTrigger, ShadingContext>,
    night: bool,
    sleeping: bool,
    sun_active: bool,
}

impl ShadingRule {
    /// Validate the configured items and assemble the rule.
    ///
    /// # Errors
    ///
    /// Fails when the name is empty or the shutter item has the wrong kind.
    pub async fn new<P: Platform>(
        platform: &P,
        config: ShadingConfig,
    ) -> Result<Self, RulehubError> {
        if config.name.is_empty() {
            return Err(SettingsError::EmptyName.into());
        }
        let kind = platform.item_kind(&config.shutter_item).await?;
        let mut output = ShutterObserver::new(config.shutter_item, kind)?;
        for control in &config.control_items {
            let control_kind = platform.item_kind(control).await?;
            output = output.with_control(control.clone(), control_kind)?;
        }
        let mut machine = Machine::new(shading_graph()?);
        config.settings.configure_timeouts(&mut machine);
        Ok(Self {
            name: config.name.clone(),
            settings: config.settings,
            output,
            manual_item: config.manual_item,
            wind_alarm_item: config.wind_alarm_item,
            day_item: config.day_item,
            sleep_state_item: config.sleep_state_item,
            sun_item: config.sun_item,
            door_item: config.door_item,
            fsm: RuleFsm::new(&config.name, machine),
            night: false,
            sleeping: false,
            sun_active: false,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn current(&self) -> ShadingState {
        self.fsm.current()
    }

    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let mut subs = self.output.subscriptions();
        for item in [
            &self.manual_item,
            &self.wind_alarm_item,
            &self.day_item,
            &self.sleep_state_item,
            &self.sun_item,
            &self.door_item,
        ]
        .into_iter()
        .flatten()
        {
            subs.push(Subscription::new(item.clone(), EventFilter::Changed));
        }
        subs
    }

    /// Read the current flags and shutter position, resume, and resolve.
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
        if let Some(item) = &self.day_item {
            self.night = !platform
                .current_value(item)
                .await?
                .as_on_off()
                .is_some_and(OnOff::is_on);
        }
        if let Some(item) = &self.sleep_state_item
            && let Value::Text(leaf) = platform.current_value(item).await?
        {
            self.sleeping = sleep_state_is_sleeping(&leaf);
        }
        if let Some(item) = &self.sun_item {
            self.sun_active = platform
                .current_value(item)
                .await?
                .as_on_off()
                .is_some_and(OnOff::is_on);
        }
        let value = platform.current_value(self.output.item()).await?;
        self.output.sync(&value);
        self.fsm.init(platform, timers, id).await?;
        if self.fsm.current() == ShadingState::Init {
            self.fire(ShadingTrigger::Resolve, platform, timers, id).await?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Propagates platform and protocol errors.
    pub async fn handle_event<P: Platform>(
        &mut self,
        event: &ItemEvent,
        platform: &P,
        timers: &mut TimerService,
        id: RuleId,
    ) -> Result<(), RulehubError> {
        if let Some(on_off) = switch_changed(event, self.manual_item.as_ref()) {
            let trigger = match on_off {
                OnOff::On => ShadingTrigger::ManualOn,
                OnOff::Off => ShadingTrigger::ManualOff,
            };
            return self.fire(trigger, platform, timers, id).await;
        }
        if let Some(on_off) = switch_changed(event, self.wind_alarm_item.as_ref()) {
            let trigger = match on_off {
                OnOff::On => ShadingTrigger::WindAlarmOn,
                OnOff::Off => ShadingTrigger::WindAlarmOff,
            };
            return self.fire(trigger, platform, timers, id).await;
        }
        if let Some(on_off) = switch_changed(event, self.day_item.as_ref()) {
            self.night = !on_off.is_on();
            let trigger = if self.night {
                ShadingTrigger::NightStarted
            } else {
                ShadingTrigger::DayStarted
            };
            return self.fire(trigger, platform, timers, id).await;
        }
        if let Some(leaf) = text_changed(event, self.sleep_state_item.as_ref()) {
            let sleeping = sleep_state_is_sleeping(leaf);
            if sleeping != self.sleeping {
                self.sleeping = sleeping;
                let trigger = if sleeping {
                    ShadingTrigger::SleepStarted
                } else {
                    ShadingTrigger::SleepEnded
                };
                return self.fire(trigger, platform, timers, id).await;
            }
            return Ok(());
        }
        if let Some(on_off) = switch_changed(event, self.sun_item.as_ref()) {
            self.sun_active = on_off.is_on();
            let trigger = if self.sun_active {
                ShadingTrigger::SunStarted
            } else {
                ShadingTrigger::SunEnded
            };
            return self.fire(trigger, platform, timers, id).await;
        }
        if let Some(state) = contact_changed(event, self.door_item.as_ref()) {
            let trigger = if state.is_open() {
                ShadingTrigger::DoorOpened
            } else {
                ShadingTrigger::DoorClosed
            };
            return self.fire(trigger, platform, timers, id).await;
        }
        if self.output.handle_event(event)?.is_some() {
            // Any hand interaction parks the rule, whatever its direction.
            return self
                .fire(ShadingTrigger::HandDetected, platform, timers, id)
                .await;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Propagates platform errors.
    pub async fn handle_timer<P: Platform>(
        &mut self,
        slot: TimerSlot,
        platform: &P,
        timers: &mut TimerService,
        id: RuleId,
    ) -> Result<(), RulehubError> {
        if slot == TimerSlot::State
            && let Some(trigger) = self.fsm.timeout_trigger()
        {
            return self.fire(trigger, platform, timers, id).await;
        }
        Ok(())
    }

    async fn fire<P: Platform>(
        &mut self,
        trigger: ShadingTrigger,
        platform: &P,
        timers: &mut TimerService,
        id: RuleId,
    ) -> Result<(), RulehubError> {
        let mut trigger = trigger;
        loop {
            let ctx = self
                .settings
                .guard_context(self.night, self.sleeping, self.sun_active);
            let fired = self.fsm.fire(trigger, &ctx, platform, timers, id).await?;
            let Fired::Transitioned { from, to } = fired else {
                return Ok(());
            };
            if from != to
                && let Some(position) = target_position(&self.settings, to)
            {
                self.output.send_position(platform, position).await?;
            }
            // Entering `auto.init` immediately re-derives the real state.
            if to == ShadingState::Init {
                trigger = ShadingTrigger::Resolve;
                continue;
            }
            return Ok(());
        }
    }
}
