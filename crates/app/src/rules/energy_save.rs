//! Energy-save rule — a controlled outlet that waits for its device to
//! finish.

use serde::Deserialize;

use rulehub_domain::error::{ItemError, RulehubError, SettingsError};
use rulehub_domain::event::{EventFilter, ItemEvent, Subscription};
use rulehub_domain::hysteresis::HysteresisSwitch;
use rulehub_domain::item::{ItemKind, ItemName, OnOff};
use rulehub_domain::machine::Machine;
use rulehub_domain::rules::energy_save::{
    EnergySaveContext, EnergySaveSettings, EnergySaveState, EnergySaveTrigger, energy_save_graph,
};

use crate::fsm::RuleFsm;
use crate::observer::SwitchObserver;
use crate::ports::Platform;
use crate::timers::{RuleId, TimerService, TimerSlot};

use super::{number_changed, switch_changed};

/// Items and settings of one energy-save rule.
#[derive(Debug, Clone, Deserialize)]
pub struct EnergySaveConfig {
    pub name: String,
    /// The switched outlet the rule drives.
    pub outlet_item: ItemName,
    /// Switch requesting the outlet on or off.
    pub request_item: ItemName,
    /// Current measurement (amperes) of the attached device.
    #[serde(default)]
    pub current_item: Option<ItemName>,
    #[serde(default)]
    pub settings: EnergySaveSettings,
}

/// One outlet under automatic control.
pub struct EnergySaveRule {
    name: String,
    output: SwitchObserver,
    request_item: ItemName,
    current_item: Option<ItemName>,
    fsm: RuleFsm<EnergySaveState, EnergySaveTrigger, EnergySaveContext>,
    current: HysteresisSwitch,
}

impl EnergySaveRule {
    /// Validate the configured items and assemble the rule.
    ///
    /// # Errors
    ///
    /// Fails when the name is empty or an item has the wrong kind.
    pub async fn new<P: Platform>(
        platform: &P,
        config: EnergySaveConfig,
    ) -> Result<Self, RulehubError> {
        if config.name.is_empty() {
            return Err(SettingsError::EmptyName.into());
        }
        let kind = platform.item_kind(&config.outlet_item).await?;
        let output = SwitchObserver::new(config.outlet_item, kind)?;
        let kind = platform.item_kind(&config.request_item).await?;
        if kind != ItemKind::Switch {
            return Err(ItemError::UnsupportedKind {
                name: config.request_item,
                actual: kind,
                expected: "switch",
            }
            .into());
        }
        let mut machine = Machine::new(energy_save_graph()?);
        config.settings.configure_timeouts(&mut machine);
        let current = HysteresisSwitch::new(
            config.settings.current_threshold,
            config.settings.current_hysteresis,
        );
        Ok(Self {
            name: config.name.clone(),
            output,
            request_item: config.request_item,
            current_item: config.current_item,
            fsm: RuleFsm::new(&config.name, machine),
            current,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn current(&self) -> EnergySaveState {
        self.fsm.current()
    }

    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let mut subs = self.output.subscriptions();
        subs.push(Subscription::new(self.request_item.clone(), EventFilter::Changed));
        if let Some(item) = &self.current_item {
            subs.push(Subscription::new(item.clone(), EventFilter::Changed));
        }
        subs
    }

    /// Read the measured current and the outlet state, then resume.
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
        if let Some(item) = &self.current_item
            && let Some(amperes) = platform.current_value(item).await?.as_number()
        {
            self.current.update(amperes);
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
        if let Some(on_off) = switch_changed(event, Some(&self.request_item)) {
            let trigger = match on_off {
                OnOff::On => EnergySaveTrigger::OnRequested,
                OnOff::Off => EnergySaveTrigger::OffRequested,
            };
            return self.fire(trigger, platform, timers, id).await;
        }
        if let Some(amperes) = number_changed(event, self.current_item.as_ref()) {
            let was_high = self.current.is_on();
            let high = self.current.update(amperes);
            if was_high && !high {
                return self
                    .fire(EnergySaveTrigger::CurrentLow, platform, timers, id)
                    .await;
            }
            return Ok(());
        }
        if self.output.handle_event(event)?.is_some() {
            // A manual toggle suspends the automatic behavior.
            return self
                .fire(EnergySaveTrigger::HandDetected, platform, timers, id)
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
        trigger: EnergySaveTrigger,
        platform: &P,
        timers: &mut TimerService,
        id: RuleId,
    ) -> Result<(), RulehubError> {
        let ctx = EnergySaveContext {
            current_high: self.current.is_on(),
        };
        let fired = self.fsm.fire(trigger, &ctx, platform, timers, id).await?;
        if fired.changed() {
            self.apply_output(platform).await?;
        }
        Ok(())
    }

    async fn apply_output<P: Platform>(&mut self, platform: &P) -> Result<(), RulehubError> {
        let state = self.fsm.current();
        // `hand` leaves the outlet exactly as the human left it.
        if state == EnergySaveState::Hand {
            return Ok(());
        }
        let desired = OnOff::from(state.is_on());
        if self.output.value() != Some(desired) {
            self.output.send_command(platform, desired).await?;
        }
        Ok(())
    }
}
