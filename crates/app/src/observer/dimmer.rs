//! Observer for a dimmer output.
//!
//! Dimmers are the richest case: manual actions arrive as absolute
//! percentages, as ON/OFF, or as INCREASE/DECREASE steps, and whether a
//! value means "switched on", "switched off", or "adjusted" depends on the
//! brightness the item had before.

use rulehub_domain::error::{ItemError, ProtocolError, RulehubError};
use rulehub_domain::event::{EventFilter, ItemEvent, ItemEventKind, Subscription};
use rulehub_domain::item::{ItemKind, ItemName, OnOff, Step, Value};
use rulehub_domain::time;
use rulehub_domain::timeout_list::TimeoutList;

use crate::ports::Platform;

use super::{ECHO_TTL, ManualAction};

/// Watches one dimmer item, suppressing the echoes of its own commands.
#[derive(Debug)]
pub struct DimmerObserver {
    item: ItemName,
    controls: Vec<ItemName>,
    expected: TimeoutList<Value>,
    value: Option<f64>,
    last_manual: Option<ManualAction>,
}

impl DimmerObserver {
    /// Wrap `item`, which must be a dimmer.
    ///
    /// # Errors
    ///
    /// Returns [`ItemError::UnsupportedKind`] for any other item kind.
    pub fn new(item: ItemName, kind: ItemKind) -> Result<Self, ItemError> {
        if kind != ItemKind::Dimmer {
            return Err(ItemError::UnsupportedKind {
                name: item,
                actual: kind,
                expected: "dimmer",
            });
        }
        Ok(Self {
            item,
            controls: Vec::new(),
            expected: TimeoutList::new(),
            value: None,
            last_manual: None,
        })
    }

    /// Add a control item whose commands are always treated as manual.
    ///
    /// # Errors
    ///
    /// Returns [`ItemError::UnsupportedKind`] when the control is neither a
    /// switch nor a dimmer.
    pub fn with_control(mut self, item: ItemName, kind: ItemKind) -> Result<Self, ItemError> {
        if !matches!(kind, ItemKind::Switch | ItemKind::Dimmer) {
            return Err(ItemError::UnsupportedKind {
                name: item,
                actual: kind,
                expected: "switch or dimmer",
            });
        }
        self.controls.push(item);
        Ok(self)
    }

    /// The subscriptions this observer needs delivered.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let mut subs = vec![Subscription::new(self.item.clone(), EventFilter::Changed)];
        subs.extend(
            self.controls
                .iter()
                .map(|control| Subscription::new(control.clone(), EventFilter::Command)),
        );
        subs
    }

    #[must_use]
    pub fn item(&self) -> &ItemName {
        &self.item
    }

    /// Adopt the item's current value without classifying it.
    pub fn sync(&mut self, value: &Value) {
        self.value = value.as_number();
    }

    /// Send a brightness to the item, remembering it as an expected echo.
    ///
    /// # Errors
    ///
    /// Propagates platform errors from the command.
    pub async fn send_brightness<P: Platform>(
        &mut self,
        platform: &P,
        brightness: f64,
    ) -> Result<(), RulehubError> {
        self.expected
            .push(Value::Percent(brightness), ECHO_TTL, time::now());
        platform
            .send_command(&self.item, Value::Percent(brightness))
            .await
    }

    /// Classify an event, consuming expected echoes silently.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] when the event value is outside the
    /// dimmer vocabulary.
    pub fn handle_event(
        &mut self,
        event: &ItemEvent,
    ) -> Result<Option<ManualAction>, RulehubError> {
        if self.controls.contains(&event.item) {
            if let ItemEventKind::Command(value) = &event.kind {
                let action = self.classify_command(&event.item, value)?;
                if action.is_some() {
                    self.last_manual = action;
                }
                return Ok(action);
            }
            return Ok(None);
        }
        if event.item != self.item {
            return Ok(None);
        }
        let ItemEventKind::StateChanged { to, .. } = &event.kind else {
            return Ok(None);
        };

        if self.expected.take(to, time::now()).is_ok() {
            self.value = to.as_number();
            return Ok(None);
        }
        if to.is_undef() {
            tracing::warn!(item = %self.item, "dimmer state changed to UNDEF, ignoring");
            self.value = None;
            return Ok(None);
        }
        let Some(brightness) = to.as_number() else {
            return Err(self.protocol_error(&self.item, to).into());
        };
        let action = classify_move(self.current(), brightness);
        self.value = Some(brightness);
        if action.is_some() {
            self.last_manual = action;
        }
        Ok(action)
    }

    /// The last brightness seen on the item, echo or manual.
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// The most recent manual action, if any happened yet.
    #[must_use]
    pub fn last_manual(&self) -> Option<ManualAction> {
        self.last_manual
    }

    fn current(&self) -> f64 {
        self.value.unwrap_or(0.0)
    }

    fn classify_command(
        &self,
        item: &ItemName,
        value: &Value,
    ) -> Result<Option<ManualAction>, RulehubError> {
        let current = self.current();
        let action = match value {
            Value::OnOff(OnOff::On) if current == 0.0 => Some(ManualAction::On),
            Value::OnOff(OnOff::On) => None,
            Value::OnOff(OnOff::Off) if current > 0.0 => Some(ManualAction::Off),
            Value::OnOff(OnOff::Off) => None,
            Value::Percent(target) | Value::Decimal(target) => classify_move(current, *target),
            Value::Step(Step::Increase) if current == 0.0 => Some(ManualAction::On),
            Value::Step(Step::Increase) => Some(ManualAction::Changed),
            Value::Step(Step::Decrease) if current > 0.0 => Some(ManualAction::Changed),
            Value::Step(Step::Decrease) => None,
            Value::Undef => {
                tracing::warn!(item = %item, "dimmer command UNDEF, ignoring");
                None
            }
            other => return Err(self.protocol_error(item, other).into()),
        };
        Ok(action)
    }

    fn protocol_error(&self, item: &ItemName, value: &Value) -> ProtocolError {
        ProtocolError {
            item: item.clone(),
            value: value.clone(),
            expected: "ON, OFF, INCREASE, DECREASE or a percentage",
        }
    }
}

fn classify_move(from: f64, to: f64) -> Option<ManualAction> {
    if from == 0.0 && to > 0.0 {
        Some(ManualAction::On)
    } else if from > 0.0 && to == 0.0 {
        Some(ManualAction::Off)
    } else if from > 0.0 && to > 0.0 && from != to {
        Some(ManualAction::Changed)
    } else {
        None
    }
}
