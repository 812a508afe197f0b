//! Light rule — drives one dimmer or switch through the light graph.

use serde::Deserialize;

use rulehub_domain::error::{ItemError, RulehubError, SettingsError};
use rulehub_domain::event::{EventFilter, ItemEvent, Subscription};
use rulehub_domain::item::{ItemKind, ItemName, OnOff, Value};
use rulehub_domain::machine::{Fired, Machine};
use rulehub_domain::rules::light::{
    LightContext, LightSettings, LightState, LightTarget, LightTrigger, light_graph,
    target_brightness,
};

use crate::fsm::RuleFsm;
use crate::observer::{DimmerObserver, ManualAction, SwitchObserver};
use crate::ports::Platform;
use crate::timers::{RuleId, TimerService, TimerSlot};

use super::{sleep_state_is_sleeping, switch_changed, text_changed};

/// Items and settings of one light rule.
#[derive(Debug, Clone, Deserialize)]
pub struct LightConfig {
    pub name: String,
    /// The dimmer or switch the rule drives.
    pub light_item: ItemName,
    /// Wall controls whose commands always count as manual.
    #[serde(default)]
    pub control_items: Vec<ItemName>,
    /// Switch that parks the rule in `manual`.
    #[serde(default)]
    pub manual_item: Option<ItemName>,
    /// Switch that is on during the day.
    #[serde(default)]
    pub day_item: Option<ItemName>,
    /// Text item the presence rule persists its leaf names to.
    #[serde(default)]
    pub presence_state_item: Option<ItemName>,
    /// Text item the sleep rule persists its leaf names to.
    #[serde(default)]
    pub sleep_state_item: Option<ItemName>,
    #[serde(default)]
    pub settings: LightSettings,
}

/// The observed output, dimmer- or switch-backed.
#[derive(Debug)]
enum LightOutput {
    Dimmer(DimmerObserver),
    Switch(SwitchObserver),
}

impl LightOutput {
    fn subscriptions(&self) -> Vec<Subscription> {
        match self {
            Self::Dimmer(observer) => observer.subscriptions(),
            Self::Switch(observer) => observer.subscriptions(),
        }
    }

    fn sync(&mut self, value: &Value) {
        match self {
            Self::Dimmer(observer) => observer.sync(value),
            Self::Switch(observer) => observer.sync(value),
        }
    }

    fn handle_event(&mut self, event: &ItemEvent) -> Result<Option<ManualAction>, RulehubError> {
        match self {
            Self::Dimmer(observer) => observer.handle_event(event),
            Self::Switch(observer) => observer.handle_event(event),
        }
    }

    /// Current brightness; a plain switch reads as 0 or 100.
    fn brightness(&self) -> f64 {
        match self {
            Self::Dimmer(observer) => observer.value().unwrap_or(0.0),
            Self::Switch(observer) => match observer.value() {
                Some(OnOff::On) => 100.0,
                _ => 0.0,
            },
        }
    }

    async fn send<P: Platform>(
        &mut self,
        platform: &P,
        target: LightTarget,
    ) -> Result<(), RulehubError> {
        match (self, target) {
            (Self::Dimmer(observer), LightTarget::Brightness(brightness)) => {
                observer.send_brightness(platform, brightness).await
            }
            (Self::Dimmer(observer), LightTarget::Off) => {
                observer.send_brightness(platform, 0.0).await
            }
            (Self::Switch(observer), LightTarget::Brightness(brightness)) => {
                observer
                    .send_command(platform, OnOff::from(brightness > 0.0))
                    .await
            }
            (Self::Switch(observer), LightTarget::Off) => {
                observer.send_command(platform, OnOff::Off).await
            }
        }
    }
}

/// One light under automatic control.
#[derive(Debug)]
pub struct LightRule {
    name: String,
    settings: LightSettings,
    output: LightOutput,
    manual_item: Option<ItemName>,
    day_item: Option<ItemName>,
    presence_state_item: Option<ItemName>,
    sleep_state_item: Option<ItemName>,
    fsm: RuleFsm<LightState, LightTrigger, LightContext>,
    day: bool,
    sleeping: bool,
    /// Brightness the light had before it left `auto.on`.
    brightness_before: f64,
}

impl LightRule {
    /// Validate the configured items and assemble the rule.
    ///
    /// # Errors
    ///
    /// Fails when the name is empty, an item is missing, or the light item
    /// is neither a dimmer nor a switch.
    pub async fn new<P: Platform>(
        platform: &P,
        config: LightConfig,
    ) -> Result<Self, RulehubError> {
        if config.name.is_empty() {
            return Err(SettingsError::EmptyName.into());
        }
        let kind = platform.item_kind(&config.light_item).await?;
        let output = match kind {
            ItemKind::Dimmer => {
                let mut observer = DimmerObserver::new(config.light_item.clone(), kind)?;
                for control in &config.control_items {
                    let control_kind = platform.item_kind(control).await?;
                    observer = observer.with_control(control.clone(), control_kind)?;
                }
                LightOutput::Dimmer(observer)
            }
            ItemKind::Switch => {
                let mut observer = SwitchObserver::new(config.light_item.clone(), kind)?;
                for control in &config.control_items {
                    let control_kind = platform.item_kind(control).await?;
                    observer = observer.with_control(control.clone(), control_kind)?;
                }
                LightOutput::Switch(observer)
            }
            other => {
                return Err(ItemError::UnsupportedKind {
                    name: config.light_item,
                    actual: other,
                    expected: "switch or dimmer",
                }
                .into());
            }
        };
        let fsm = RuleFsm::new(&config.name, Machine::new(light_graph()?));
        Ok(Self {
            name: config.name,
            settings: config.settings,
            output,
            manual_item: config.manual_item,
            day_item: config.day_item,
            presence_state_item: config.presence_state_item,
            sleep_state_item: config.sleep_state_item,
            fsm,
            day: false,
            sleeping: false,
            brightness_before: 0.0,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn current(&self) -> LightState {
        self.fsm.current()
    }

    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let mut subs = self.output.subscriptions();
        for item in [
            &self.manual_item,
            &self.day_item,
            &self.presence_state_item,
            &self.sleep_state_item,
        ]
        .into_iter()
        .flatten()
        {
            subs.push(Subscription::new(item.clone(), EventFilter::Changed));
        }
        subs
    }

    /// Read the current flags and light value, resume, and resolve.
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
            self.day = platform
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
        let value = platform.current_value(self.light_item()).await?;
        self.output.sync(&value);
        self.settings
            .configure_timeouts(self.fsm.machine_mut(), self.day, self.sleeping);
        self.fsm.init(platform, timers, id).await?;
        if self.fsm.current() == LightState::Init {
            self.fire(LightTrigger::Resolve, platform, timers, id).await?;
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
                OnOff::On => LightTrigger::ManualOn,
                OnOff::Off => LightTrigger::ManualOff,
            };
            return self.fire(trigger, platform, timers, id).await;
        }
        if let Some(on_off) = switch_changed(event, self.day_item.as_ref()) {
            self.day = on_off.is_on();
            self.settings
                .configure_timeouts(self.fsm.machine_mut(), self.day, self.sleeping);
            return Ok(());
        }
        if let Some(leaf) = text_changed(event, self.sleep_state_item.as_ref()) {
            let sleeping = sleep_state_is_sleeping(leaf);
            if sleeping != self.sleeping {
                self.sleeping = sleeping;
                self.settings
                    .configure_timeouts(self.fsm.machine_mut(), self.day, self.sleeping);
                let trigger = if sleeping {
                    LightTrigger::SleepStarted
                } else {
                    LightTrigger::SleepAborted
                };
                return self.fire(trigger, platform, timers, id).await;
            }
            return Ok(());
        }
        if let Some(leaf) = text_changed(event, self.presence_state_item.as_ref()) {
            return match leaf {
                "leaving" => self.fire(LightTrigger::LeavingStarted, platform, timers, id).await,
                "presence" => self.fire(LightTrigger::LeavingAborted, platform, timers, id).await,
                _ => Ok(()),
            };
        }
        if let Some(action) = self.output.handle_event(event)? {
            let trigger = match action {
                ManualAction::On => LightTrigger::HandOn,
                ManualAction::Off => LightTrigger::HandOff,
                ManualAction::Changed => LightTrigger::HandChanged,
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

    fn light_item(&self) -> &ItemName {
        match &self.output {
            LightOutput::Dimmer(observer) => observer.item(),
            LightOutput::Switch(observer) => observer.item(),
        }
    }

    async fn fire<P: Platform>(
        &mut self,
        trigger: LightTrigger,
        platform: &P,
        timers: &mut TimerService,
        id: RuleId,
    ) -> Result<(), RulehubError> {
        let mut trigger = trigger;
        loop {
            let ctx = self.settings.guard_context(
                self.day,
                self.sleeping,
                self.output.brightness() > 0.0,
                self.brightness_before > 0.0,
            );
            let fired = self.fsm.fire(trigger, &ctx, platform, timers, id).await?;
            let Fired::Transitioned { from, to } = fired else {
                return Ok(());
            };
            if from != to {
                if from == LightState::On {
                    self.brightness_before = self.output.brightness();
                }
                if let Some(target) = target_brightness(
                    &self.settings,
                    to,
                    from,
                    self.day,
                    self.sleeping,
                    self.brightness_before,
                ) {
                    self.output.send(platform, target).await?;
                }
            }
            // Entering `auto.init` immediately re-derives the real state.
            if to == LightState::Init {
                trigger = LightTrigger::Resolve;
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
    use rulehub_domain::rules::light::{ContextTable, FunctionSetting};

    fn night_settings() -> LightSettings {
        LightSettings {
            on: ContextTable {
                night: Some(FunctionSetting {
                    brightness: 80.0,
                    timeout: 5,
                }),
                ..ContextTable::default()
            },
            pre_off: Some(ContextTable {
                night: Some(FunctionSetting {
                    brightness: 40.0,
                    timeout: 4,
                }),
                ..ContextTable::default()
            }),
            ..LightSettings::default()
        }
    }

    fn config() -> LightConfig {
        LightConfig {
            name: "kitchen".into(),
            light_item: ItemName::from("kitchen_light"),
            control_items: Vec::new(),
            manual_item: Some(ItemName::from("kitchen_manual")),
            day_item: None,
            presence_state_item: None,
            sleep_state_item: None,
            settings: night_settings(),
        }
    }

    fn platform() -> FakePlatform {
        let platform = FakePlatform::default();
        platform.seed("kitchen_light", ItemKind::Dimmer, Value::Percent(0.0));
        platform.seed("kitchen_manual", ItemKind::Switch, Value::OnOff(OnOff::Off));
        platform
    }

    async fn rule(platform: &FakePlatform) -> (LightRule, TimerService) {
        let (mut timers, _fired) = TimerService::channel();
        let mut rule = LightRule::new(platform, config()).await.unwrap();
        rule.init(platform, &mut timers, RuleId(0)).await.unwrap();
        (rule, timers)
    }

    #[tokio::test]
    async fn should_reject_non_light_output_items() {
        let platform = FakePlatform::default();
        platform.seed("kitchen_light", ItemKind::Number, Value::Decimal(0.0));
        let error = LightRule::new(&platform, config()).await.unwrap_err();
        assert!(matches!(
            error,
            RulehubError::Item(ItemError::UnsupportedKind { .. })
        ));
    }

    #[tokio::test]
    async fn should_resolve_to_off_when_light_is_dark() {
        let platform = platform();
        let (rule, _timers) = rule(&platform).await;
        assert_eq!(rule.current(), LightState::Off);
        assert_eq!(
            platform.current_value(&ItemName::from("kitchen_state")).await.unwrap(),
            Value::Text("auto.off".into())
        );
        // The light is already dark, so resolving must not command it.
        assert_eq!(platform.sent_commands(), Vec::new());
    }

    #[tokio::test]
    async fn should_light_up_when_hand_switches_on() {
        let platform = platform();
        let (mut rule, mut timers) = rule(&platform).await;

        let event = platform.change_state("kitchen_light", Value::Percent(30.0));
        rule.handle_event(&event, &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        assert_eq!(rule.current(), LightState::On);
        // Hand-on drives the configured night brightness.
        assert_eq!(
            platform.last_command(),
            Some((ItemName::from("kitchen_light"), Value::Percent(80.0)))
        );
    }

    #[tokio::test]
    async fn should_dim_then_switch_off_on_timeouts() {
        let platform = platform();
        let (mut rule, mut timers) = rule(&platform).await;

        let event = platform.change_state("kitchen_light", Value::Percent(30.0));
        rule.handle_event(&event, &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        // Deliver the echo of the 80 % command.
        let echo = platform.change_state("kitchen_light", Value::Percent(80.0));
        rule.handle_event(&echo, &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        assert_eq!(rule.current(), LightState::On);

        rule.handle_timer(TimerSlot::State, &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        assert_eq!(rule.current(), LightState::Preoff);
        assert_eq!(
            platform.last_command(),
            Some((ItemName::from("kitchen_light"), Value::Percent(40.0)))
        );

        rule.handle_timer(TimerSlot::State, &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        assert_eq!(rule.current(), LightState::Off);
        assert_eq!(
            platform.last_command(),
            Some((ItemName::from("kitchen_light"), Value::Percent(0.0)))
        );
    }

    #[tokio::test]
    async fn should_park_in_manual_and_resolve_on_release() {
        let platform = platform();
        let (mut rule, mut timers) = rule(&platform).await;

        let event = platform.change_state("kitchen_manual", Value::OnOff(OnOff::On));
        rule.handle_event(&event, &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        assert_eq!(rule.current(), LightState::Manual);

        // While manual, hand actions do not drive the machine.
        let event = platform.change_state("kitchen_light", Value::Percent(55.0));
        rule.handle_event(&event, &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        assert_eq!(rule.current(), LightState::Manual);
        assert_eq!(platform.sent_commands(), Vec::new());

        // Releasing manual resolves from the actual light value.
        let event = platform.change_state("kitchen_manual", Value::OnOff(OnOff::Off));
        rule.handle_event(&event, &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        assert_eq!(rule.current(), LightState::On);
        // Resolve keeps whatever the human had set.
        assert_eq!(platform.sent_commands(), Vec::new());
    }
}
