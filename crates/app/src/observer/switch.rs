//! Observer for a binary switch output.

use rulehub_domain::error::{ItemError, ProtocolError, RulehubError};
use rulehub_domain::event::{EventFilter, ItemEvent, ItemEventKind, Subscription};
use rulehub_domain::item::{ItemKind, ItemName, OnOff, Value};
use rulehub_domain::time;
use rulehub_domain::timeout_list::TimeoutList;

use crate::ports::Platform;

use super::{ECHO_TTL, ManualAction};

/// Watches one switch item, suppressing the echoes of its own commands.
#[derive(Debug)]
pub struct SwitchObserver {
    item: ItemName,
    controls: Vec<ItemName>,
    expected: TimeoutList<Value>,
    value: Option<OnOff>,
    last_manual: Option<ManualAction>,
}

impl SwitchObserver {
    /// Wrap `item`, which must be a switch.
    ///
    /// # Errors
    ///
    /// Returns [`ItemError::UnsupportedKind`] for any other item kind.
    pub fn new(item: ItemName, kind: ItemKind) -> Result<Self, ItemError> {
        if kind != ItemKind::Switch {
            return Err(ItemError::UnsupportedKind {
                name: item,
                actual: kind,
                expected: "switch",
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
    /// Returns [`ItemError::UnsupportedKind`] when the control is not a
    /// switch.
    pub fn with_control(mut self, item: ItemName, kind: ItemKind) -> Result<Self, ItemError> {
        if kind != ItemKind::Switch {
            return Err(ItemError::UnsupportedKind {
                name: item,
                actual: kind,
                expected: "switch",
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
        self.value = value.as_on_off();
    }

    /// Send `value` to the item, remembering it as an expected echo.
    ///
    /// # Errors
    ///
    /// Propagates platform errors from the command.
    pub async fn send_command<P: Platform>(
        &mut self,
        platform: &P,
        value: OnOff,
    ) -> Result<(), RulehubError> {
        self.expected
            .push(Value::OnOff(value), ECHO_TTL, time::now());
        platform.send_command(&self.item, Value::OnOff(value)).await
    }

    /// Classify an event, consuming expected echoes silently.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] when the event value is outside the
    /// switch vocabulary.
    pub fn handle_event(
        &mut self,
        event: &ItemEvent,
    ) -> Result<Option<ManualAction>, RulehubError> {
        if self.controls.contains(&event.item) {
            if let ItemEventKind::Command(value) = &event.kind {
                let action = match value.as_on_off() {
                    Some(OnOff::On) => ManualAction::On,
                    Some(OnOff::Off) => ManualAction::Off,
                    None => return Err(self.protocol_error(&event.item, value).into()),
                };
                self.last_manual = Some(action);
                return Ok(Some(action));
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
            self.value = to.as_on_off();
            return Ok(None);
        }
        let Some(on_off) = to.as_on_off() else {
            return Err(self.protocol_error(&self.item, to).into());
        };
        let action = if self.value == Some(on_off) {
            None
        } else {
            match on_off {
                OnOff::On => Some(ManualAction::On),
                OnOff::Off => Some(ManualAction::Off),
            }
        };
        self.value = Some(on_off);
        if action.is_some() {
            self.last_manual = action;
        }
        Ok(action)
    }

    /// The last value seen on the item, echo or manual.
    #[must_use]
    pub fn value(&self) -> Option<OnOff> {
        self.value
    }

    /// The most recent manual action, if any happened yet.
    #[must_use]
    pub fn last_manual(&self) -> Option<ManualAction> {
        self.last_manual
    }

    fn protocol_error(&self, item: &ItemName, value: &Value) -> ProtocolError {
        ProtocolError {
            item: item.clone(),
            value: value.clone(),
            expected: "ON or OFF",
        }
    }
}
