//! Observer for a roller-shutter output.
//!
//! Shading rules only need to know *that* a human moved the blind, not how:
//! any hand interaction parks the rule in its hand state. Every manual
//! position change therefore classifies as [`ManualAction::Changed`], and
//! travel commands (UP, DOWN, STOP, a target position) on control items
//! count as manual too.

use rulehub_domain::error::{ItemError, ProtocolError, RulehubError};
use rulehub_domain::event::{EventFilter, ItemEvent, ItemEventKind, Subscription};
use rulehub_domain::item::{ItemKind, ItemName, Value};
use rulehub_domain::time;
use rulehub_domain::timeout_list::TimeoutList;

use crate::ports::Platform;

use super::{ECHO_TTL, ManualAction};

/// Watches one roller-shutter item, suppressing the echoes of its own
/// commands.
#[derive(Debug)]
pub struct ShutterObserver {
    item: ItemName,
    controls: Vec<ItemName>,
    expected: TimeoutList<Value>,
    position: Option<f64>,
    last_manual: Option<ManualAction>,
}

impl ShutterObserver {
    /// Wrap `item`, which must be a roller shutter.
    ///
    /// # Errors
    ///
    /// Returns [`ItemError::UnsupportedKind`] for any other item kind.
    pub fn new(item: ItemName, kind: ItemKind) -> Result<Self, ItemError> {
        if kind != ItemKind::RollerShutter {
            return Err(ItemError::UnsupportedKind {
                name: item,
                actual: kind,
                expected: "rollershutter",
            });
        }
        Ok(Self {
            item,
            controls: Vec::new(),
            expected: TimeoutList::new(),
            position: None,
            last_manual: None,
        })
    }

    /// Add a control item whose commands are always treated as manual.
    ///
    /// # Errors
    ///
    /// Returns [`ItemError::UnsupportedKind`] when the control is not a
    /// roller shutter.
    pub fn with_control(mut self, item: ItemName, kind: ItemKind) -> Result<Self, ItemError> {
        if kind != ItemKind::RollerShutter {
            return Err(ItemError::UnsupportedKind {
                name: item,
                actual: kind,
                expected: "rollershutter",
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

    /// Adopt the item's current position without classifying it.
    pub fn sync(&mut self, value: &Value) {
        self.position = value.as_number();
    }

    /// Send a target position, remembering it as an expected echo.
    ///
    /// # Errors
    ///
    /// Propagates platform errors from the command.
    pub async fn send_position<P: Platform>(
        &mut self,
        platform: &P,
        position: f64,
    ) -> Result<(), RulehubError> {
        self.expected
            .push(Value::Percent(position), ECHO_TTL, time::now());
        platform
            .send_command(&self.item, Value::Percent(position))
            .await
    }

    /// Classify an event, consuming expected echoes silently.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] when the event value is outside the
    /// shutter vocabulary.
    pub fn handle_event(
        &mut self,
        event: &ItemEvent,
    ) -> Result<Option<ManualAction>, RulehubError> {
        if self.controls.contains(&event.item) {
            if let ItemEventKind::Command(value) = &event.kind {
                let manual = matches!(
                    value,
                    Value::UpDown(_) | Value::Stop | Value::Percent(_) | Value::Decimal(_)
                );
                if !manual {
                    return Err(RulehubError::Protocol(ProtocolError {
                        item: event.item.clone(),
                        value: value.clone(),
                        expected: "UP, DOWN, STOP or a position",
                    }));
                }
                self.last_manual = Some(ManualAction::Changed);
                return Ok(Some(ManualAction::Changed));
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
            self.position = to.as_number();
            return Ok(None);
        }
        if to.is_undef() {
            tracing::warn!(item = %self.item, "shutter position changed to UNDEF, ignoring");
            self.position = None;
            return Ok(None);
        }
        let Some(position) = to.as_number() else {
            return Err(RulehubError::Protocol(ProtocolError {
                item: self.item.clone(),
                value: to.clone(),
                expected: "a position",
            }));
        };
        let action = if self.position == Some(position) {
            None
        } else {
            Some(ManualAction::Changed)
        };
        self.position = Some(position);
        if action.is_some() {
            self.last_manual = action;
        }
        Ok(action)
    }

    /// The last position seen on the item, echo or manual.
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        self.position
    }

    /// The most recent manual action, if any happened yet.
    #[must_use]
    pub fn last_manual(&self) -> Option<ManualAction> {
        self.last_manual
    }
}
