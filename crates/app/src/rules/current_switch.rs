//! Current-switch rule — signals that an appliance is running, with a
//! cooldown.

use serde::Deserialize;

use rulehub_domain::error::{ItemError, RulehubError, SettingsError};
use rulehub_domain::event::{EventFilter, ItemEvent, Subscription};
use rulehub_domain::hysteresis::HysteresisSwitch;
use rulehub_domain::item::{ItemKind, ItemName, OnOff, Value};
use rulehub_domain::machine::Machine;
use rulehub_domain::rules::current_switch::{
    CurrentSwitchContext, CurrentSwitchSettings, CurrentSwitchState, CurrentSwitchTrigger,
    current_switch_graph,
};

use crate::fsm::RuleFsm;
use crate::ports::Platform;
use crate::timers::{RuleId, TimerService, TimerSlot};

use super::number_changed;

/// Items and settings of one current-switch rule.
#[derive(Debug, Clone, Deserialize)]
pub struct CurrentSwitchConfig {
    pub name: String,
    /// Current measurement (amperes) of the appliance.
    pub current_item: ItemName,
    /// Output switch reflecting "the appliance is running".
    pub output_item: ItemName,
    #[serde(default)]
    pub settings: CurrentSwitchSettings,
}

/// One appliance signal derived from its power draw.
pub struct CurrentSwitchRule {
    name: String,
    settings: CurrentSwitchSettings,
    current_item: ItemName,
    output_item: ItemName,
    fsm: RuleFsm<CurrentSwitchState, CurrentSwitchTrigger, CurrentSwitchContext>,
    current: HysteresisSwitch,
}

impl CurrentSwitchRule {
    /// Validate the configured items and assemble the rule.
    ///
    /// # Errors
    ///
    /// Fails when the name is empty or an item has the wrong kind.
    pub async fn new<P: Platform>(
        platform: &P,
        config: CurrentSwitchConfig,
    ) -> Result<Self, RulehubError> {
        if config.name.is_empty() {
            return Err(SettingsError::EmptyName.into());
        }
        let kind = platform.item_kind(&config.current_item).await?;
        if kind != ItemKind::Number {
            return Err(ItemError::UnsupportedKind {
                name: config.current_item,
                actual: kind,
                expected: "number",
            }
            .into());
        }
        let kind = platform.item_kind(&config.output_item).await?;
        if kind != ItemKind::Switch {
            return Err(ItemError::UnsupportedKind {
                name: config.output_item,
                actual: kind,
                expected: "switch",
            }
            .into());
        }
        let mut machine = Machine::new(current_switch_graph()?);
        config.settings.configure_timeouts(&mut machine);
        let current = HysteresisSwitch::new(
            config.settings.current_threshold,
            config.settings.current_hysteresis,
        );
        Ok(Self {
            name: config.name.clone(),
            settings: config.settings,
            current_item: config.current_item,
            output_item: config.output_item,
            fsm: RuleFsm::new(&config.name, machine),
            current,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn current(&self) -> CurrentSwitchState {
        self.fsm.current()
    }

    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        vec![Subscription::new(self.current_item.clone(), EventFilter::Changed)]
    }

    /// Read the measured current, resume, and derive the initial output.
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
        if let Some(amperes) = platform.current_value(&self.current_item).await?.as_number() {
            self.current.update(amperes);
        }
        self.fsm.init(platform, timers, id).await?;
        // The persisted state may disagree with the measured current.
        let trigger = if self.current.is_on() {
            CurrentSwitchTrigger::CurrentHigh
        } else {
            CurrentSwitchTrigger::CurrentLow
        };
        self.fire(trigger, platform, timers, id).await?;
        self.apply_output(platform).await
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
        if let Some(amperes) = number_changed(event, Some(&self.current_item)) {
            let was_high = self.current.is_on();
            let high = self.current.update(amperes);
            if high != was_high {
                let trigger = if high {
                    CurrentSwitchTrigger::CurrentHigh
                } else {
                    CurrentSwitchTrigger::CurrentLow
                };
                return self.fire(trigger, platform, timers, id).await;
            }
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
        trigger: CurrentSwitchTrigger,
        platform: &P,
        timers: &mut TimerService,
        id: RuleId,
    ) -> Result<(), RulehubError> {
        let ctx = self.settings.guard_context();
        let fired = self.fsm.fire(trigger, &ctx, platform, timers, id).await?;
        if fired.changed() {
            self.apply_output(platform).await?;
        }
        Ok(())
    }

    /// The output switch is posted, not commanded; nothing acts on it.
    async fn apply_output<P: Platform>(&mut self, platform: &P) -> Result<(), RulehubError> {
        let desired = Value::OnOff(OnOff::from(self.fsm.current().is_on()));
        if platform.current_value(&self.output_item).await? != desired {
            platform.post_update(&self.output_item, desired).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::FakePlatform;

    fn config() -> CurrentSwitchConfig {
        CurrentSwitchConfig {
            name: "washer_running".into(),
            current_item: ItemName::from("washer_current"),
            output_item: ItemName::from("washer_running"),
            settings: CurrentSwitchSettings {
                extended_timeout: 120,
                ..CurrentSwitchSettings::default()
            },
        }
    }

    fn platform() -> FakePlatform {
        let platform = FakePlatform::default();
        platform.seed("washer_current", ItemKind::Number, Value::Decimal(0.0));
        platform.seed("washer_running", ItemKind::Switch, Value::OnOff(OnOff::Off));
        platform
    }

    async fn rule(platform: &FakePlatform) -> (CurrentSwitchRule, TimerService) {
        let (mut timers, _fired) = TimerService::channel();
        let mut rule = CurrentSwitchRule::new(platform, config()).await.unwrap();
        rule.init(platform, &mut timers, RuleId(0)).await.unwrap();
        (rule, timers)
    }

    async fn deliver(
        rule: &mut CurrentSwitchRule,
        platform: &FakePlatform,
        timers: &mut TimerService,
        amperes: f64,
    ) {
        let event = platform.change_state("washer_current", Value::Decimal(amperes));
        rule.handle_event(&event, platform, timers, RuleId(0))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn should_bridge_mid_cycle_pauses() {
        let platform = platform();
        let (mut rule, mut timers) = rule(&platform).await;
        assert_eq!(rule.current(), CurrentSwitchState::Off);

        deliver(&mut rule, &platform, &mut timers, 1.0).await;
        assert_eq!(rule.current(), CurrentSwitchState::On);
        assert_eq!(
            platform.current_value(&ItemName::from("washer_running")).await.unwrap(),
            Value::OnOff(OnOff::On)
        );

        deliver(&mut rule, &platform, &mut timers, 0.0).await;
        assert_eq!(rule.current(), CurrentSwitchState::Extended);
        // Output stays on through the cooldown.
        assert_eq!(
            platform.current_value(&ItemName::from("washer_running")).await.unwrap(),
            Value::OnOff(OnOff::On)
        );

        deliver(&mut rule, &platform, &mut timers, 1.0).await;
        assert_eq!(rule.current(), CurrentSwitchState::On);

        deliver(&mut rule, &platform, &mut timers, 0.0).await;
        rule.handle_timer(TimerSlot::State, &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        assert_eq!(rule.current(), CurrentSwitchState::Off);
        assert_eq!(
            platform.current_value(&ItemName::from("washer_running")).await.unwrap(),
            Value::OnOff(OnOff::Off)
        );
    }

    #[tokio::test]
    async fn should_ignore_changes_inside_the_dead_band() {
        let platform = platform();
        let (mut rule, mut timers) = rule(&platform).await;

        deliver(&mut rule, &platform, &mut timers, 0.24).await;
        assert_eq!(rule.current(), CurrentSwitchState::Off);

        deliver(&mut rule, &platform, &mut timers, 0.3).await;
        assert_eq!(rule.current(), CurrentSwitchState::On);

        deliver(&mut rule, &platform, &mut timers, 0.2).await;
        assert_eq!(rule.current(), CurrentSwitchState::On);
    }

    #[tokio::test]
    async fn should_correct_a_stale_persisted_state_on_startup() {
        let platform = platform();
        platform.seed("washer_running_state", ItemKind::Text, Value::Text("on".into()));
        platform.seed("washer_running", ItemKind::Switch, Value::OnOff(OnOff::On));

        // A dead appliance resumed as "on" walks out through the cooldown.
        let (mut rule, mut timers) = rule(&platform).await;
        assert_eq!(rule.current(), CurrentSwitchState::Extended);

        rule.handle_timer(TimerSlot::State, &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        assert_eq!(rule.current(), CurrentSwitchState::Off);
        assert_eq!(
            platform.current_value(&ItemName::from("washer_running")).await.unwrap(),
            Value::OnOff(OnOff::Off)
        );
    }
}
