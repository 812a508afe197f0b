//! Presence rule — doors, phones, and a leaving switch drive house-level
//! presence.

use std::collections::HashMap;

use serde::Deserialize;

use rulehub_domain::error::{ItemError, RulehubError, SettingsError};
use rulehub_domain::event::{EventFilter, ItemEvent, Subscription};
use rulehub_domain::item::{ItemKind, ItemName, OnOff};
use rulehub_domain::machine::Machine;
use rulehub_domain::rules::presence::{
    PresenceSettings, PresenceState, PresenceTrigger, presence_graph,
};

use crate::fsm::RuleFsm;
use crate::observer::{ManualAction, SwitchObserver};
use crate::ports::Platform;
use crate::timers::{RuleId, TimerService, TimerSlot};

use super::{contact_changed, switch_changed};

/// Items and settings of the presence rule.
#[derive(Debug, Clone, Deserialize)]
pub struct PresenceConfig {
    pub name: String,
    /// Output switch reflecting "somebody is home".
    pub presence_item: ItemName,
    /// Door contacts; any opening snaps back to presence.
    #[serde(default)]
    pub door_items: Vec<ItemName>,
    /// Phone switches; all of them disappearing starts the silence countdown.
    #[serde(default)]
    pub phone_items: Vec<ItemName>,
    /// Switch pressed on the way out.
    #[serde(default)]
    pub leaving_item: Option<ItemName>,
    #[serde(default)]
    pub settings: PresenceSettings,
}

/// House-level presence tracking.
pub struct PresenceRule {
    name: String,
    settings: PresenceSettings,
    output: SwitchObserver,
    door_items: Vec<ItemName>,
    leaving_item: Option<ItemName>,
    phones: HashMap<ItemName, bool>,
    fsm: RuleFsm<PresenceState, PresenceTrigger, ()>,
}

impl PresenceRule {
    /// Validate the configured items and assemble the rule.
    ///
    /// # Errors
    ///
    /// Fails when the name is empty or an item has the wrong kind.
    pub async fn new<P: Platform>(
        platform: &P,
        config: PresenceConfig,
    ) -> Result<Self, RulehubError> {
        if config.name.is_empty() {
            return Err(SettingsError::EmptyName.into());
        }
        let kind = platform.item_kind(&config.presence_item).await?;
        let output = SwitchObserver::new(config.presence_item, kind)?;
        for door in &config.door_items {
            let kind = platform.item_kind(door).await?;
            if kind != ItemKind::Contact {
                return Err(ItemError::UnsupportedKind {
                    name: door.clone(),
                    actual: kind,
                    expected: "contact",
                }
                .into());
            }
        }
        let mut phones = HashMap::new();
        for phone in &config.phone_items {
            let kind = platform.item_kind(phone).await?;
            if kind != ItemKind::Switch {
                return Err(ItemError::UnsupportedKind {
                    name: phone.clone(),
                    actual: kind,
                    expected: "switch",
                }
                .into());
            }
            phones.insert(phone.clone(), false);
        }
        let mut machine = Machine::new(presence_graph()?);
        config.settings.configure_timeouts(&mut machine);
        Ok(Self {
            name: config.name.clone(),
            settings: config.settings,
            output,
            door_items: config.door_items,
            leaving_item: config.leaving_item,
            phones,
            fsm: RuleFsm::new(&config.name, machine),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn current(&self) -> PresenceState {
        self.fsm.current()
    }

    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let mut subs = self.output.subscriptions();
        for item in self
            .door_items
            .iter()
            .chain(self.phones.keys())
            .chain(self.leaving_item.as_ref())
        {
            subs.push(Subscription::new(item.clone(), EventFilter::Changed));
        }
        subs
    }

    /// # Errors
    ///
    /// Propagates platform errors.
    pub async fn init<P: Platform>(
        &mut self,
        platform: &P,
        timers: &mut TimerService,
        id: RuleId,
    ) -> Result<(), RulehubError> {
        let phones: Vec<ItemName> = self.phones.keys().cloned().collect();
        for phone in phones {
            let on = platform
                .current_value(&phone)
                .await?
                .as_on_off()
                .is_some_and(OnOff::is_on);
            self.phones.insert(phone, on);
        }
        let value = platform.current_value(self.output.item()).await?;
        self.output.sync(&value);
        self.fsm.init(platform, timers, id).await?;
        self.apply_output(platform).await
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
        for door in &self.door_items {
            if let Some(state) = contact_changed(event, Some(door)) {
                if state.is_open() {
                    return self
                        .fire(PresenceTrigger::PresenceDetected, platform, timers, id)
                        .await;
                }
                return Ok(());
            }
        }
        if self.phones.contains_key(&event.item)
            && let Some(on_off) = switch_changed(event, Some(&event.item))
        {
            self.phones.insert(event.item.clone(), on_off.is_on());
            if on_off.is_on() {
                timers.cancel(id, TimerSlot::Aux);
                return self
                    .fire(PresenceTrigger::PresenceDetected, platform, timers, id)
                    .await;
            }
            if self.phones.values().all(|on| !on) {
                timers.arm(id, TimerSlot::Aux, self.settings.phone_silence());
            }
            return Ok(());
        }
        if let Some(on_off) = switch_changed(event, self.leaving_item.as_ref()) {
            let trigger = match on_off {
                OnOff::On => PresenceTrigger::LeavingDetected,
                OnOff::Off => PresenceTrigger::PresenceDetected,
            };
            return self.fire(trigger, platform, timers, id).await;
        }
        if let Some(action) = self.output.handle_event(event)? {
            // A manual toggle of the presence switch counts as evidence.
            let trigger = match action {
                ManualAction::On | ManualAction::Changed => PresenceTrigger::PresenceDetected,
                ManualAction::Off => PresenceTrigger::LeavingDetected,
            };
            return self.fire(trigger, platform, timers, id).await;
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
        match slot {
            TimerSlot::State => {
                if let Some(trigger) = self.fsm.timeout_trigger() {
                    return self.fire(trigger, platform, timers, id).await;
                }
                Ok(())
            }
            // Phones have been silent long enough.
            TimerSlot::Aux => {
                self.fire(PresenceTrigger::AbsenceDetected, platform, timers, id)
                    .await
            }
        }
    }

    async fn fire<P: Platform>(
        &mut self,
        trigger: PresenceTrigger,
        platform: &P,
        timers: &mut TimerService,
        id: RuleId,
    ) -> Result<(), RulehubError> {
        let fired = self.fsm.fire(trigger, &(), platform, timers, id).await?;
        if fired.changed() {
            self.apply_output(platform).await?;
        }
        Ok(())
    }

    async fn apply_output<P: Platform>(&mut self, platform: &P) -> Result<(), RulehubError> {
        let desired = OnOff::from(self.fsm.current().is_present());
        if self.output.value() != Some(desired) {
            self.output.send_command(platform, desired).await?;
        }
        Ok(())
    }
}
