//! Motion rule — filters a raw motion sensor into a calmed output switch.

use serde::Deserialize;

use rulehub_domain::error::{ItemError, RulehubError, SettingsError};
use rulehub_domain::event::{EventFilter, ItemEvent, Subscription};
use rulehub_domain::hysteresis::HysteresisSwitch;
use rulehub_domain::item::{ItemKind, ItemName, OnOff, Value};
use rulehub_domain::machine::Machine;
use rulehub_domain::rules::motion::{
    MotionContext, MotionSettings, MotionState, MotionTrigger, motion_graph,
};

use crate::fsm::RuleFsm;
use crate::ports::Platform;
use crate::timers::{RuleId, TimerService, TimerSlot};

use super::{number_changed, sleep_state_is_sleeping, switch_changed, text_changed};

/// Items and settings of one motion rule.
#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    pub name: String,
    /// The raw, chattering motion sensor.
    pub raw_item: ItemName,
    /// Output switch carrying the filtered motion signal.
    pub filtered_item: ItemName,
    /// Switch that locks the sensor manually.
    #[serde(default)]
    pub lock_item: Option<ItemName>,
    /// Text item the sleep rule persists its leaf names to.
    #[serde(default)]
    pub sleep_state_item: Option<ItemName>,
    /// Lux measurement for the brightness lock.
    #[serde(default)]
    pub brightness_item: Option<ItemName>,
    #[serde(default)]
    pub settings: MotionSettings,
}

/// One motion sensor under filtering.
pub struct MotionRule {
    name: String,
    settings: MotionSettings,
    raw_item: ItemName,
    filtered_item: ItemName,
    lock_item: Option<ItemName>,
    sleep_state_item: Option<ItemName>,
    brightness_item: Option<ItemName>,
    fsm: RuleFsm<MotionState, MotionTrigger, MotionContext>,
    /// Present only when a brightness threshold is configured.
    brightness: Option<HysteresisSwitch>,
}

impl MotionRule {
    /// Validate the configured items and assemble the rule.
    ///
    /// # Errors
    ///
    /// Fails when the name is empty or an item has the wrong kind.
    pub async fn new<P: Platform>(
        platform: &P,
        config: MotionConfig,
    ) -> Result<Self, RulehubError> {
        if config.name.is_empty() {
            return Err(SettingsError::EmptyName.into());
        }
        for item in [&config.raw_item, &config.filtered_item]
            .into_iter()
            .chain(config.lock_item.as_ref())
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
        let brightness = config
            .settings
            .brightness_threshold
            .map(|threshold| HysteresisSwitch::new(threshold, config.settings.brightness_hysteresis));
        let mut machine = Machine::new(motion_graph()?);
        config.settings.configure_timeouts(&mut machine);
        Ok(Self {
            name: config.name.clone(),
            settings: config.settings,
            raw_item: config.raw_item,
            filtered_item: config.filtered_item,
            lock_item: config.lock_item,
            sleep_state_item: config.sleep_state_item,
            brightness_item: config.brightness_item,
            fsm: RuleFsm::new(&config.name, machine),
            brightness,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn current(&self) -> MotionState {
        self.fsm.current()
    }

    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let mut subs = vec![Subscription::new(self.raw_item.clone(), EventFilter::Changed)];
        for item in [
            &self.lock_item,
            &self.sleep_state_item,
            &self.brightness_item,
        ]
        .into_iter()
        .flatten()
        {
            subs.push(Subscription::new(item.clone(), EventFilter::Changed));
        }
        subs
    }

    /// Read the brightness, resume, and derive the initial output.
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
        if let Some(switch) = &mut self.brightness
            && let Some(item) = &self.brightness_item
            && let Some(lux) = platform.current_value(item).await?.as_number()
        {
            switch.update(lux);
        }
        self.fsm.init(platform, timers, id).await?;
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
        if let Some(on_off) = switch_changed(event, Some(&self.raw_item)) {
            let trigger = match on_off {
                OnOff::On => MotionTrigger::MotionOn,
                OnOff::Off => MotionTrigger::MotionOff,
            };
            return self.fire(trigger, platform, timers, id).await;
        }
        if let Some(on_off) = switch_changed(event, self.lock_item.as_ref()) {
            let trigger = match on_off {
                OnOff::On => MotionTrigger::LockOn,
                OnOff::Off => MotionTrigger::LockOff,
            };
            return self.fire(trigger, platform, timers, id).await;
        }
        if let Some(leaf) = text_changed(event, self.sleep_state_item.as_ref()) {
            let trigger = if sleep_state_is_sleeping(leaf) {
                MotionTrigger::SleepStarted
            } else {
                MotionTrigger::SleepEnded
            };
            return self.fire(trigger, platform, timers, id).await;
        }
        if let Some(lux) = number_changed(event, self.brightness_item.as_ref())
            && let Some(switch) = &mut self.brightness
        {
            let was_high = switch.is_on();
            let high = switch.update(lux);
            if high != was_high {
                let trigger = if high {
                    MotionTrigger::BrightnessHigh
                } else {
                    MotionTrigger::BrightnessLow
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
        trigger: MotionTrigger,
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

    /// The filtered switch is an output only; it is posted, not commanded.
    async fn apply_output<P: Platform>(&mut self, platform: &P) -> Result<(), RulehubError> {
        let desired = Value::OnOff(OnOff::from(self.fsm.current().is_motion()));
        if platform.current_value(&self.filtered_item).await? != desired {
            platform.post_update(&self.filtered_item, desired).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::FakePlatform;

    fn config() -> MotionConfig {
        MotionConfig {
            name: "hall_motion".into(),
            raw_item: ItemName::from("hall_motion_raw"),
            filtered_item: ItemName::from("hall_motion_filtered"),
            lock_item: Some(ItemName::from("hall_motion_lock")),
            sleep_state_item: Some(ItemName::from("sleep_state")),
            brightness_item: Some(ItemName::from("hall_lux")),
            settings: MotionSettings {
                brightness_threshold: Some(400.0),
                ..MotionSettings::default()
            },
        }
    }

    fn platform() -> FakePlatform {
        let platform = FakePlatform::default();
        platform.seed("hall_motion_raw", ItemKind::Switch, Value::OnOff(OnOff::Off));
        platform.seed("hall_motion_filtered", ItemKind::Switch, Value::OnOff(OnOff::Off));
        platform.seed("hall_motion_lock", ItemKind::Switch, Value::OnOff(OnOff::Off));
        platform.seed("sleep_state", ItemKind::Text, Value::Text("awake".into()));
        platform.seed("hall_lux", ItemKind::Number, Value::Decimal(100.0));
        platform
    }

    async fn rule(platform: &FakePlatform) -> (MotionRule, TimerService) {
        let (mut timers, _fired) = TimerService::channel();
        let mut rule = MotionRule::new(platform, config()).await.unwrap();
        rule.init(platform, &mut timers, RuleId(0)).await.unwrap();
        (rule, timers)
    }

    async fn deliver(
        rule: &mut MotionRule,
        platform: &FakePlatform,
        timers: &mut TimerService,
        item: &str,
        value: Value,
    ) {
        let event = platform.change_state(item, value);
        rule.handle_event(&event, platform, timers, RuleId(0))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn should_hold_the_output_through_the_grace_period() {
        let platform = platform();
        let (mut rule, mut timers) = rule(&platform).await;

        deliver(&mut rule, &platform, &mut timers, "hall_motion_raw", Value::OnOff(OnOff::On))
            .await;
        assert_eq!(rule.current(), MotionState::Motion);
        assert_eq!(
            platform
                .current_value(&ItemName::from("hall_motion_filtered"))
                .await
                .unwrap(),
            Value::OnOff(OnOff::On)
        );

        deliver(&mut rule, &platform, &mut timers, "hall_motion_raw", Value::OnOff(OnOff::Off))
            .await;
        assert_eq!(rule.current(), MotionState::MotionExtended);
        // Output stays on while extended.
        assert_eq!(
            platform
                .current_value(&ItemName::from("hall_motion_filtered"))
                .await
                .unwrap(),
            Value::OnOff(OnOff::On)
        );

        rule.handle_timer(TimerSlot::State, &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        assert_eq!(rule.current(), MotionState::Wait);
        assert_eq!(
            platform
                .current_value(&ItemName::from("hall_motion_filtered"))
                .await
                .unwrap(),
            Value::OnOff(OnOff::Off)
        );
    }

    #[tokio::test]
    async fn should_ignore_the_sensor_in_bright_daylight() {
        let platform = platform();
        let (mut rule, mut timers) = rule(&platform).await;

        deliver(&mut rule, &platform, &mut timers, "hall_lux", Value::Decimal(500.0)).await;
        assert_eq!(rule.current(), MotionState::TooBright);

        deliver(&mut rule, &platform, &mut timers, "hall_motion_raw", Value::OnOff(OnOff::On))
            .await;
        assert_eq!(rule.current(), MotionState::TooBright);

        deliver(&mut rule, &platform, &mut timers, "hall_lux", Value::Decimal(300.0)).await;
        assert_eq!(rule.current(), MotionState::Wait);
    }

    #[tokio::test]
    async fn should_lock_for_sleep_and_cool_down_afterwards() {
        let platform = platform();
        let (mut rule, mut timers) = rule(&platform).await;

        deliver(
            &mut rule,
            &platform,
            &mut timers,
            "sleep_state",
            Value::Text("pre_sleeping".into()),
        )
        .await;
        assert_eq!(rule.current(), MotionState::SleepLocked);

        deliver(&mut rule, &platform, &mut timers, "hall_motion_raw", Value::OnOff(OnOff::On))
            .await;
        assert_eq!(rule.current(), MotionState::SleepLocked);

        deliver(
            &mut rule,
            &platform,
            &mut timers,
            "sleep_state",
            Value::Text("post_sleeping".into()),
        )
        .await;
        assert_eq!(rule.current(), MotionState::PostSleepLocked);

        rule.handle_timer(TimerSlot::State, &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        assert_eq!(rule.current(), MotionState::Wait);
    }

    #[tokio::test]
    async fn should_obey_the_manual_lock() {
        let platform = platform();
        let (mut rule, mut timers) = rule(&platform).await;

        deliver(&mut rule, &platform, &mut timers, "hall_motion_lock", Value::OnOff(OnOff::On))
            .await;
        assert_eq!(rule.current(), MotionState::Locked);

        deliver(&mut rule, &platform, &mut timers, "hall_motion_raw", Value::OnOff(OnOff::On))
            .await;
        assert_eq!(rule.current(), MotionState::Locked);

        deliver(&mut rule, &platform, &mut timers, "hall_motion_lock", Value::OnOff(OnOff::Off))
            .await;
        assert_eq!(rule.current(), MotionState::Wait);
    }
}
