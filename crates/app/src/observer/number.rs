//! Observer for a numeric output (ventilation levels, setpoints).

use rulehub_domain::error::{ItemError, ProtocolError, RulehubError};
use rulehub_domain::event::{EventFilter, ItemEvent, ItemEventKind, Subscription};
use rulehub_domain::item::{ItemKind, ItemName, Value};
use rulehub_domain::time;
use rulehub_domain::timeout_list::TimeoutList;

use crate::ports::Platform;

use super::{ECHO_TTL, ManualAction};

/// Watches one number item, suppressing the echoes of its own commands.
///
/// Numbers carry no on/off notion; every manual move classifies as
/// [`ManualAction::Changed`].
#[derive(Debug)]
pub struct NumberObserver {
    item: ItemName,
    expected: TimeoutList<Value>,
    value: Option<f64>,
    last_manual: Option<ManualAction>,
}

impl NumberObserver {
    /// Wrap `item`, which must be a number.
    ///
    /// # Errors
    ///
    /// Returns [`ItemError::UnsupportedKind`] for any other item kind.
    pub fn new(item: ItemName, kind: ItemKind) -> Result<Self, ItemError> {
        if kind != ItemKind::Number {
            return Err(ItemError::UnsupportedKind {
                name: item,
                actual: kind,
                expected: "number",
            });
        }
        Ok(Self {
            item,
            expected: TimeoutList::new(),
            value: None,
            last_manual: None,
        })
    }

    /// The subscriptions this observer needs delivered.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        vec![Subscription::new(self.item.clone(), EventFilter::Changed)]
    }

    #[must_use]
    pub fn item(&self) -> &ItemName {
        &self.item
    }

    /// Adopt the item's current value without classifying it.
    pub fn sync(&mut self, value: &Value) {
        self.value = value.as_number();
    }

    /// Send a number to the item, remembering it as an expected echo.
    ///
    /// # Errors
    ///
    /// Propagates platform errors from the command.
    pub async fn send_number<P: Platform>(
        &mut self,
        platform: &P,
        number: f64,
    ) -> Result<(), RulehubError> {
        self.expected
            .push(Value::Decimal(number), ECHO_TTL, time::now());
        platform.send_command(&self.item, Value::Decimal(number)).await
    }

    /// Classify an event, consuming expected echoes silently.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] when the event value is not numeric.
    pub fn handle_event(
        &mut self,
        event: &ItemEvent,
    ) -> Result<Option<ManualAction>, RulehubError> {
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
            tracing::warn!(item = %self.item, "number state changed to UNDEF, ignoring");
            self.value = None;
            return Ok(None);
        }
        let Some(number) = to.as_number() else {
            return Err(RulehubError::Protocol(ProtocolError {
                item: self.item.clone(),
                value: to.clone(),
                expected: "a number",
            }));
        };
        let action = if self.value == Some(number) {
            None
        } else {
            Some(ManualAction::Changed)
        };
        self.value = Some(number);
        if action.is_some() {
            self.last_manual = action;
        }
        Ok(action)
    }

    /// The last number seen on the item, echo or manual.
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// The most recent manual action, if any happened yet.
    #[must_use]
    pub fn last_manual(&self) -> Option<ManualAction> {
        self.last_manual
    }
}
