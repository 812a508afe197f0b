//! Speaker rule — background playback following presence, sleep, and
//! daytime.

use serde::Deserialize;

use rulehub_domain::error::{RulehubError, SettingsError};
use rulehub_domain::event::{EventFilter, ItemEvent, Subscription};
use rulehub_domain::item::{ItemName, OnOff, Value};
use rulehub_domain::machine::{Fired, Machine};
use rulehub_domain::rules::speaker::{
    SpeakerContext, SpeakerSettings, SpeakerState, SpeakerTarget, SpeakerTrigger, speaker_graph,
    target_playback,
};

use crate::fsm::RuleFsm;
use crate::observer::{NumberObserver, SwitchObserver};
use crate::ports::Platform;
use crate::timers::{RuleId, TimerService, TimerSlot};

use super::{sleep_state_is_sleeping, switch_changed, text_changed};

/// Items and settings of one speaker rule.
#[derive(Debug, Clone, Deserialize)]
pub struct SpeakerConfig {
    pub name: String,
    /// Switch that starts and stops the playback.
    pub play_item: ItemName,
    /// Number carrying the playback volume.
    #[serde(default)]
    pub volume_item: Option<ItemName>,
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
    pub settings: SpeakerSettings,
}

/// One speaker under automatic control.
pub struct SpeakerRule {
    name: String,
    settings: SpeakerSettings,
    play: SwitchObserver,
    volume: Option<NumberObserver>,
    day_item: Option<ItemName>,
    presence_state_item: Option<ItemName>,
    sleep_state_item: Option<ItemName>,
    fsm: RuleFsm<SpeakerState, SpeakerTrigger, SpeakerContext>,
    present: bool,
    sleeping: bool,
    day: bool,
}

impl SpeakerRule {
    /// Validate the configured items and assemble the rule.
    ///
    /// # Errors
    ///
    /// Fails when the name is empty or an item has the wrong kind.
    pub async fn new<P: Platform>(
        platform: &P,
        config: SpeakerConfig,
    ) -> Result<Self, RulehubError> {
        if config.name.is_empty() {
            return Err(SettingsError::EmptyName.into());
        }
        let kind = platform.item_kind(&config.play_item).await?;
        let play = SwitchObserver::new(config.play_item, kind)?;
        let volume = match config.volume_item {
            Some(item) => {
                let kind = platform.item_kind(&item).await?;
                Some(NumberObserver::new(item, kind)?)
            }
            None => None,
        };
        let mut machine = Machine::new(speaker_graph()?);
        config.settings.configure_timeouts(&mut machine);
        Ok(Self {
            name: config.name.clone(),
            settings: config.settings,
            play,
            volume,
            day_item: config.day_item,
            presence_state_item: config.presence_state_item,
            sleep_state_item: config.sleep_state_item,
            fsm: RuleFsm::new(&config.name, machine),
            present: false,
            sleeping: false,
            day: false,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn current(&self) -> SpeakerState {
        self.fsm.current()
    }

    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let mut subs = self.play.subscriptions();
        if let Some(volume) = &self.volume {
            subs.extend(volume.subscriptions());
        }
        for item in [
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

    /// Read the current flags and speaker state, resume, and resolve.
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
        if let Some(item) = &self.presence_state_item
            && let Value::Text(leaf) = platform.current_value(item).await?
        {
            self.present = leaf == "presence";
        }
        if let Some(item) = &self.sleep_state_item
            && let Value::Text(leaf) = platform.current_value(item).await?
        {
            self.sleeping = sleep_state_is_sleeping(&leaf);
        }
        let value = platform.current_value(self.play.item()).await?;
        self.play.sync(&value);
        if let Some(volume) = &mut self.volume {
            let value = platform.current_value(volume.item()).await?;
            volume.sync(&value);
        }
        self.fsm.init(platform, timers, id).await?;
        if self.fsm.current() == SpeakerState::Init {
            self.fire(SpeakerTrigger::Resolve, platform, timers, id).await?;
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
        if let Some(on_off) = switch_changed(event, self.day_item.as_ref()) {
            self.day = on_off.is_on();
            let trigger = if self.day {
                SpeakerTrigger::DayStarted
            } else {
                SpeakerTrigger::NightStarted
            };
            return self.fire(trigger, platform, timers, id).await;
        }
        if let Some(leaf) = text_changed(event, self.presence_state_item.as_ref()) {
            self.present = leaf == "presence";
            let trigger = if self.present {
                SpeakerTrigger::PresenceArrived
            } else {
                SpeakerTrigger::AbsenceStarted
            };
            return self.fire(trigger, platform, timers, id).await;
        }
        if let Some(leaf) = text_changed(event, self.sleep_state_item.as_ref()) {
            let sleeping = sleep_state_is_sleeping(leaf);
            if sleeping != self.sleeping {
                self.sleeping = sleeping;
                if sleeping {
                    return self.fire(SpeakerTrigger::SleepStarted, platform, timers, id).await;
                }
                // Waking re-evaluates playback like an arrival would.
                if self.present {
                    return self
                        .fire(SpeakerTrigger::PresenceArrived, platform, timers, id)
                        .await;
                }
            }
            return Ok(());
        }
        let manual = self.play.handle_event(event)?.is_some()
            || match &mut self.volume {
                Some(volume) => volume.handle_event(event)?.is_some(),
                None => false,
            };
        if manual {
            return self
                .fire(SpeakerTrigger::HandDetected, platform, timers, id)
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
        trigger: SpeakerTrigger,
        platform: &P,
        timers: &mut TimerService,
        id: RuleId,
    ) -> Result<(), RulehubError> {
        let mut trigger = trigger;
        loop {
            let ctx = SpeakerContext {
                present: self.present,
                sleeping: self.sleeping,
                day: self.day,
            };
            let fired = self.fsm.fire(trigger, &ctx, platform, timers, id).await?;
            let Fired::Transitioned { from, to } = fired else {
                return Ok(());
            };
            if from != to
                && let Some(target) = target_playback(&self.settings, to)
            {
                self.apply(platform, target).await?;
            }
            // Entering `auto.init` immediately re-derives the real state.
            if to == SpeakerState::Init {
                trigger = SpeakerTrigger::Resolve;
                continue;
            }
            return Ok(());
        }
    }

    async fn apply<P: Platform>(
        &mut self,
        platform: &P,
        target: SpeakerTarget,
    ) -> Result<(), RulehubError> {
        match target {
            SpeakerTarget::Play { volume } => {
                if let Some(observer) = &mut self.volume {
                    observer.send_number(platform, volume).await?;
                }
                self.play.send_command(platform, OnOff::On).await
            }
            SpeakerTarget::Stop => self.play.send_command(platform, OnOff::Off).await,
        }
    }
}
