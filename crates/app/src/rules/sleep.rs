//! Sleep rule — a request switch walks the house through its sleep cycle.

use serde::Deserialize;

use rulehub_domain::error::{ItemError, RulehubError, SettingsError};
use rulehub_domain::event::{EventFilter, ItemEvent, Subscription};
use rulehub_domain::item::{ItemKind, ItemName, OnOff, Value};
use rulehub_domain::machine::Machine;
use rulehub_domain::rules::sleep::{
    SleepContext, SleepSettings, SleepState, SleepTrigger, sleep_graph,
};

use crate::fsm::RuleFsm;
use crate::ports::Platform;
use crate::timers::{RuleId, TimerService, TimerSlot};

use super::switch_changed;

/// Items and settings of the sleep rule.
#[derive(Debug, Clone, Deserialize)]
pub struct SleepConfig {
    pub name: String,
    /// Switch requesting sleep (on) or wake (off).
    pub request_item: ItemName,
    /// Switch keeping the house from re-entering sleep.
    #[serde(default)]
    pub lock_request_item: Option<ItemName>,
    /// Output switch mirroring "the house is sleeping".
    #[serde(default)]
    pub sleeping_item: Option<ItemName>,
    /// Output switch mirroring "sleep is locked".
    #[serde(default)]
    pub lock_item: Option<ItemName>,
    #[serde(default)]
    pub settings: SleepSettings,
}

/// House-level sleep cycle with transition phases and a lock.
pub struct SleepRule {
    name: String,
    request_item: ItemName,
    lock_request_item: Option<ItemName>,
    sleeping_item: Option<ItemName>,
    lock_item: Option<ItemName>,
    lock_requested: bool,
    fsm: RuleFsm<SleepState, SleepTrigger, SleepContext>,
}

impl SleepRule {
    /// Validate the configured items and assemble the rule.
    ///
    /// # Errors
    ///
    /// Fails when the name is empty or an item has the wrong kind.
    pub async fn new<P: Platform>(platform: &P, config: SleepConfig) -> Result<Self, RulehubError> {
        if config.name.is_empty() {
            return Err(SettingsError::EmptyName.into());
        }
        for item in [Some(&config.request_item), config.lock_request_item.as_ref()]
            .into_iter()
            .flatten()
        {
            let kind = platform.item_kind(item).await?;
            if kind != ItemKind::Switch {
                return Err(ItemError::UnsupportedKind {
                    name: item.clone(),
                    actual: kind,
                    expected: "switch",
                }
                .into());
            }
        }
        let mut machine = Machine::new(sleep_graph()?);
        config.settings.configure_timeouts(&mut machine);
        Ok(Self {
            name: config.name.clone(),
            request_item: config.request_item,
            lock_request_item: config.lock_request_item,
            sleeping_item: config.sleeping_item,
            lock_item: config.lock_item,
            lock_requested: false,
            fsm: RuleFsm::new(&config.name, machine),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn current(&self) -> SleepState {
        self.fsm.current()
    }

    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        [Some(&self.request_item), self.lock_request_item.as_ref()]
            .into_iter()
            .flatten()
            .map(|item| Subscription::new(item.clone(), EventFilter::Changed))
            .collect()
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
        if let Some(item) = &self.lock_request_item {
            self.lock_requested = platform
                .current_value(item)
                .await?
                .as_on_off()
                .is_some_and(OnOff::is_on);
        }
        self.fsm.init(platform, timers, id).await?;
        self.apply_outputs(platform).await
    }

    /// # Errors
    ///
    /// Propagates platform errors.
    pub async fn handle_event<P: Platform>(
        &mut self,
        event: &ItemEvent,
        platform: &P,
        timers: &mut TimerService,
        id: RuleId,
    ) -> Result<(), RulehubError> {
        if let Some(on_off) = switch_changed(event, Some(&self.request_item)) {
            let trigger = match on_off {
                OnOff::On => SleepTrigger::SleepRequested,
                OnOff::Off => SleepTrigger::WakeRequested,
            };
            return self.fire(trigger, platform, timers, id).await;
        }
        if let Some(on_off) = switch_changed(event, self.lock_request_item.as_ref()) {
            self.lock_requested = on_off.is_on();
            let trigger = match on_off {
                OnOff::On => SleepTrigger::LockRequested,
                OnOff::Off => SleepTrigger::UnlockRequested,
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
        if slot == TimerSlot::State
            && let Some(trigger) = self.fsm.timeout_trigger()
        {
            return self.fire(trigger, platform, timers, id).await;
        }
        Ok(())
    }

    async fn fire<P: Platform>(
        &mut self,
        trigger: SleepTrigger,
        platform: &P,
        timers: &mut TimerService,
        id: RuleId,
    ) -> Result<(), RulehubError> {
        let ctx = SleepContext {
            lock_requested: self.lock_requested,
        };
        let fired = self.fsm.fire(trigger, &ctx, platform, timers, id).await?;
        if fired.changed() {
            self.apply_outputs(platform).await?;
        }
        Ok(())
    }

    async fn apply_outputs<P: Platform>(&mut self, platform: &P) -> Result<(), RulehubError> {
        let state = self.fsm.current();
        if let Some(item) = &self.sleeping_item {
            let desired = Value::OnOff(OnOff::from(state.is_sleeping()));
            if platform.current_value(item).await? != desired {
                platform.post_update(item, desired).await?;
            }
        }
        if let Some(item) = &self.lock_item {
            let desired = Value::OnOff(OnOff::from(state.is_locked()));
            if platform.current_value(item).await? != desired {
                platform.post_update(item, desired).await?;
            }
        }
        Ok(())
    }
}
