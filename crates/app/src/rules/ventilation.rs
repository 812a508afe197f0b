//! Ventilation rule — drives one fan-level number through the ventilation
//! graph.

use serde::Deserialize;

use rulehub_domain::error::{RulehubError, SettingsError};
use rulehub_domain::event::{EventFilter, ItemEvent, Subscription};
use rulehub_domain::hysteresis::HysteresisSwitch;
use rulehub_domain::item::{ItemName, OnOff, Value};
use rulehub_domain::machine::{Fired, Machine};
use rulehub_domain::rules::ventilation::{
    VentilationContext, VentilationSettings, VentilationState, VentilationTrigger,
    target_level, ventilation_graph,
};

use crate::fsm::RuleFsm;
use crate::observer::NumberObserver;
use crate::ports::Platform;
use crate::timers::{RuleId, TimerService, TimerSlot};

use super::{number_changed, switch_changed, text_changed};

/// Items and settings of one ventilation rule.
#[derive(Debug, Clone, Deserialize)]
pub struct VentilationConfig {
    pub name: String,
    /// The fan-level number the rule drives.
    pub level_item: ItemName,
    /// Switch that parks the rule in `manual`.
    #[serde(default)]
    pub manual_item: Option<ItemName>,
    /// Switch requesting a hand boost.
    #[serde(default)]
    pub hand_item: Option<ItemName>,
    /// Relative-humidity number of the room.
    #[serde(default)]
    pub humidity_item: Option<ItemName>,
    /// Switch raised by an external boost source (dryer, second bathroom).
    #[serde(default)]
    pub external_item: Option<ItemName>,
    /// Text item the presence rule persists its leaf names to.
    #[serde(default)]
    pub presence_state_item: Option<ItemName>,
    #[serde(default)]
    pub settings: VentilationSettings,
}

/// One fan under automatic control.
pub struct VentilationRule {
    name: String,
    settings: VentilationSettings,
    output: NumberObserver,
    manual_item: Option<ItemName>,
    hand_item: Option<ItemName>,
    humidity_item: Option<ItemName>,
    external_item: Option<ItemName>,
    presence_state_item: Option<ItemName>,
    fsm: RuleFsm<VentilationState, VentilationTrigger, VentilationContext>,
    humidity: HysteresisSwitch,
    external_on: bool,
    long_absence: bool,
}

impl VentilationRule {
    /// Validate the configured items and assemble the rule.
    ///
    /// # Errors
    ///
    /// Fails when the name is empty or the level item has the wrong kind.
    pub async fn new<P: Platform>(
        platform: &P,
        config: VentilationConfig,
    ) -> Result<Self, RulehubError> {
        if config.name.is_empty() {
            return Err(SettingsError::EmptyName.into());
        }
        let kind = platform.item_kind(&config.level_item).await?;
        let output = NumberObserver::new(config.level_item, kind)?;
        let mut machine = Machine::new(ventilation_graph()?);
        config.settings.configure_timeouts(&mut machine);
        let humidity = HysteresisSwitch::new(
            config.settings.humidity_threshold,
            config.settings.humidity_hysteresis,
        );
        Ok(Self {
            name: config.name.clone(),
            settings: config.settings,
            output,
            manual_item: config.manual_item,
            hand_item: config.hand_item,
            humidity_item: config.humidity_item,
            external_item: config.external_item,
            presence_state_item: config.presence_state_item,
            fsm: RuleFsm::new(&config.name, machine),
            humidity,
            external_on: false,
            long_absence: false,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn current(&self) -> VentilationState {
        self.fsm.current()
    }

    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let mut subs = self.output.subscriptions();
        for item in [
            &self.manual_item,
            &self.hand_item,
            &self.humidity_item,
            &self.external_item,
            &self.presence_state_item,
        ]
        .into_iter()
        .flatten()
        {
            subs.push(Subscription::new(item.clone(), EventFilter::Changed));
        }
        subs
    }

    /// Read the current flags and fan level, resume, and resolve.
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
        if let Some(item) = &self.humidity_item
            && let Some(humidity) = platform.current_value(item).await?.as_number()
        {
            self.humidity.update(humidity);
        }
        if let Some(item) = &self.external_item {
            self.external_on = platform
                .current_value(item)
                .await?
                .as_on_off()
                .is_some_and(OnOff::is_on);
        }
        if let Some(item) = &self.presence_state_item
            && let Value::Text(leaf) = platform.current_value(item).await?
        {
            self.long_absence = leaf == "long_absence";
        }
        let value = platform.current_value(self.output.item()).await?;
        self.output.sync(&value);
        self.fsm.init(platform, timers, id).await?;
        if self.fsm.current() == VentilationState::Init {
            self.fire(VentilationTrigger::Resolve, platform, timers, id).await?;
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
                OnOff::On => VentilationTrigger::ManualOn,
                OnOff::Off => VentilationTrigger::ManualOff,
            };
            return self.fire(trigger, platform, timers, id).await;
        }
        if let Some(on_off) = switch_changed(event, self.hand_item.as_ref()) {
            let trigger = match on_off {
                OnOff::On => VentilationTrigger::HandOn,
                OnOff::Off => VentilationTrigger::HandOff,
            };
            return self.fire(trigger, platform, timers, id).await;
        }
        if let Some(humidity) = number_changed(event, self.humidity_item.as_ref()) {
            let was_high = self.humidity.is_on();
            let high = self.humidity.update(humidity);
            if high != was_high {
                let trigger = if high {
                    VentilationTrigger::HumidityHigh
                } else {
                    VentilationTrigger::HumidityLow
                };
                return self.fire(trigger, platform, timers, id).await;
            }
            return Ok(());
        }
        if let Some(on_off) = switch_changed(event, self.external_item.as_ref()) {
            self.external_on = on_off.is_on();
            let trigger = if self.external_on {
                VentilationTrigger::ExternalOn
            } else {
                VentilationTrigger::ExternalOff
            };
            return self.fire(trigger, platform, timers, id).await;
        }
        if let Some(leaf) = text_changed(event, self.presence_state_item.as_ref()) {
            let long_absence = leaf == "long_absence";
            if long_absence != self.long_absence {
                self.long_absence = long_absence;
                let trigger = if long_absence {
                    VentilationTrigger::LongAbsenceStarted
                } else {
                    VentilationTrigger::LongAbsenceEnded
                };
                return self.fire(trigger, platform, timers, id).await;
            }
            return Ok(());
        }
        if self.output.handle_event(event)?.is_some() {
            // A manual level change takes the fan out of automatic control.
            return self
                .fire(VentilationTrigger::ManualOn, platform, timers, id)
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
        trigger: VentilationTrigger,
        platform: &P,
        timers: &mut TimerService,
        id: RuleId,
    ) -> Result<(), RulehubError> {
        let mut trigger = trigger;
        loop {
            let ctx = VentilationContext {
                humidity_high: self.humidity.is_on(),
                external_on: self.external_on,
                long_absence: self.long_absence,
            };
            let fired = self.fsm.fire(trigger, &ctx, platform, timers, id).await?;
            let Fired::Transitioned { from, to } = fired else {
                return Ok(());
            };
            if from != to
                && let Some(level) = target_level(&self.settings, to)
            {
                self.output.send_number(platform, level).await?;
            }
            // Entering `auto.init` immediately re-derives the real state.
            if to == VentilationState::Init {
                trigger = VentilationTrigger::Resolve;
                continue;
            }
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::FakePlatform;
    use rulehub_domain::item::ItemKind;

    fn config() -> VentilationConfig {
        VentilationConfig {
            name: "bathroom_fan".into(),
            level_item: ItemName::from("fan_level"),
            manual_item: None,
            hand_item: Some(ItemName::from("fan_boost")),
            humidity_item: Some(ItemName::from("bathroom_humidity")),
            external_item: None,
            presence_state_item: Some(ItemName::from("presence_state")),
            settings: VentilationSettings::default(),
        }
    }

    fn platform() -> FakePlatform {
        let platform = FakePlatform::default();
        platform.seed("fan_level", ItemKind::Number, Value::Decimal(1.0));
        platform.seed("fan_boost", ItemKind::Switch, Value::OnOff(OnOff::Off));
        platform.seed("bathroom_humidity", ItemKind::Number, Value::Decimal(50.0));
        platform.seed("presence_state", ItemKind::Text, Value::Text("presence".into()));
        platform
    }

    async fn rule(platform: &FakePlatform) -> (VentilationRule, TimerService) {
        let (mut timers, _fired) = TimerService::channel();
        let mut rule = VentilationRule::new(platform, config()).await.unwrap();
        rule.init(platform, &mut timers, RuleId(0)).await.unwrap();
        (rule, timers)
    }

    #[tokio::test]
    async fn should_resolve_to_normal_and_set_the_level() {
        let platform = platform();
        let (rule, _timers) = rule(&platform).await;
        assert_eq!(rule.current(), VentilationState::Normal);
        assert_eq!(
            platform.last_command(),
            Some((ItemName::from("fan_level"), Value::Decimal(1.0)))
        );
    }

    #[tokio::test]
    async fn should_boost_on_high_humidity_and_settle_after_the_drop() {
        let platform = platform();
        let (mut rule, mut timers) = rule(&platform).await;

        let event = platform.change_state("bathroom_humidity", Value::Decimal(70.0));
        rule.handle_event(&event, &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        assert_eq!(rule.current(), VentilationState::PowerHumidity);
        assert_eq!(
            platform.last_command(),
            Some((ItemName::from("fan_level"), Value::Decimal(2.0)))
        );

        // Still inside the dead-band: no change.
        let event = platform.change_state("bathroom_humidity", Value::Decimal(64.0));
        rule.handle_event(&event, &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        assert_eq!(rule.current(), VentilationState::PowerHumidity);

        let event = platform.change_state("bathroom_humidity", Value::Decimal(60.0));
        rule.handle_event(&event, &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        assert_eq!(rule.current(), VentilationState::Normal);
        assert_eq!(
            platform.last_command(),
            Some((ItemName::from("fan_level"), Value::Decimal(1.0)))
        );
    }

    #[tokio::test]
    async fn should_boost_by_hand_and_fall_back_on_timeout() {
        let platform = platform();
        let (mut rule, mut timers) = rule(&platform).await;

        let event = platform.change_state("fan_boost", Value::OnOff(OnOff::On));
        rule.handle_event(&event, &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        assert_eq!(rule.current(), VentilationState::PowerHand);

        rule.handle_timer(TimerSlot::State, &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        assert_eq!(rule.current(), VentilationState::Normal);
    }

    #[tokio::test]
    async fn should_drop_to_minimum_during_long_absence() {
        let platform = platform();
        let (mut rule, mut timers) = rule(&platform).await;

        let event = platform.change_state("presence_state", Value::Text("long_absence".into()));
        rule.handle_event(&event, &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        assert_eq!(rule.current(), VentilationState::LongAbsence);
        assert_eq!(
            platform.last_command(),
            Some((ItemName::from("fan_level"), Value::Decimal(0.0)))
        );

        let event = platform.change_state("presence_state", Value::Text("presence".into()));
        rule.handle_event(&event, &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        assert_eq!(rule.current(), VentilationState::Normal);
    }

    #[tokio::test]
    async fn should_park_in_manual_after_a_hand_level_change() {
        let platform = platform();
        let (mut rule, mut timers) = rule(&platform).await;
        // Deliver the echo of the resolve command first.
        let echo = platform.change_state("fan_level", Value::Decimal(1.0));
        rule.handle_event(&echo, &platform, &mut timers, RuleId(0))
            .await
            .unwrap();

        let event = platform.change_state("fan_level", Value::Decimal(3.0));
        rule.handle_event(&event, &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        assert_eq!(rule.current(), VentilationState::Manual);
    }
}
