//! # rulehub-adapter-virtual
//!
//! In-memory platform standing in for a real automation bus, for the daemon
//! and for demonstrations. Items live in a map, events go out on a
//! broadcast channel.
//!
//! Unlike the bare test fakes in the app crate, this adapter applies
//! command semantics per item kind: a dimmer receives `ON` as 100 %,
//! `INCREASE` as a 10 % step, a shutter receives `UP` as position 0, and
//! commands outside an item's vocabulary are rejected. This mirrors how a
//! real platform normalizes commands before reflecting them as state.
//!
//! ## Dependency rule
//!
//! Depends on `rulehub-app` (the platform port) and `rulehub-domain` only.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use rulehub_app::ports::Platform;
use rulehub_domain::error::{ItemError, ProtocolError, RulehubError};
use rulehub_domain::event::ItemEvent;
use rulehub_domain::item::{ItemKind, ItemName, ItemSpec, OnOff, Step, UpDown, Value};

/// Events buffered per subscriber before the stream reports a lag.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Item {
    kind: ItemKind,
    value: Value,
}

/// An in-memory item registry with platform command semantics.
pub struct VirtualPlatform {
    items: Mutex<HashMap<ItemName, Item>>,
    sender: broadcast::Sender<ItemEvent>,
}

impl Default for VirtualPlatform {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            items: Mutex::new(HashMap::new()),
            sender,
        }
    }
}

impl VirtualPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered items.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.items().len()
    }

    fn items(&self) -> MutexGuard<'_, HashMap<ItemName, Item>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: ItemEvent) {
        // A send error only means nobody is subscribed yet.
        let _ = self.sender.send(event);
    }

    fn apply(&self, name: &ItemName, value: Value) {
        let from = {
            let mut items = self.items();
            let Some(item) = items.get_mut(name) else {
                return;
            };
            std::mem::replace(&mut item.value, value.clone())
        };
        if from == value {
            self.publish(ItemEvent::state_updated(name.clone(), value));
        } else {
            self.publish(ItemEvent::state_changed(name.clone(), from, value));
        }
    }

    /// Translate a command into the resulting state per item kind.
    fn normalize(
        name: &ItemName,
        kind: ItemKind,
        current: &Value,
        command: &Value,
    ) -> Result<Value, RulehubError> {
        let protocol = |expected: &'static str| {
            RulehubError::Protocol(ProtocolError {
                item: name.clone(),
                value: command.clone(),
                expected,
            })
        };
        match kind {
            ItemKind::Switch => match command {
                Value::OnOff(state) => Ok(Value::OnOff(*state)),
                _ => Err(protocol("ON or OFF")),
            },
            ItemKind::Dimmer => {
                let brightness = current.as_number().unwrap_or(0.0);
                let target = match command {
                    Value::Percent(value) | Value::Decimal(value) => *value,
                    Value::OnOff(OnOff::On) => 100.0,
                    Value::OnOff(OnOff::Off) => 0.0,
                    Value::Step(Step::Increase) => brightness + 10.0,
                    Value::Step(Step::Decrease) => brightness - 10.0,
                    _ => return Err(protocol("ON, OFF, INCREASE, DECREASE or a percentage")),
                };
                Ok(Value::Percent(target.clamp(0.0, 100.0)))
            }
            ItemKind::RollerShutter => {
                let position = current.as_number().unwrap_or(0.0);
                let target = match command {
                    Value::Percent(value) | Value::Decimal(value) => *value,
                    Value::UpDown(UpDown::Up) => 0.0,
                    Value::UpDown(UpDown::Down) => 100.0,
                    // The virtual shutter moves instantly; STOP holds where
                    // it already is.
                    Value::Stop => position,
                    _ => return Err(protocol("UP, DOWN, STOP or a position")),
                };
                Ok(Value::Percent(target.clamp(0.0, 100.0)))
            }
            ItemKind::Number => match command {
                Value::Decimal(value) | Value::Percent(value) => Ok(Value::Decimal(*value)),
                _ => Err(protocol("a number")),
            },
            ItemKind::Text => match command {
                Value::Text(text) => Ok(Value::Text(text.clone())),
                _ => Err(protocol("a string")),
            },
            ItemKind::Contact => Err(RulehubError::Item(ItemError::NotCommandable {
                name: name.clone(),
                kind,
            })),
        }
    }
}

impl Platform for VirtualPlatform {
    fn ensure_item(&self, spec: &ItemSpec) -> impl Future<Output = Result<(), RulehubError>> + Send {
        let mut items = self.items();
        items.entry(spec.name.clone()).or_insert_with(|| {
            tracing::debug!(item = %spec.name, kind = ?spec.kind, "item created");
            Item {
                kind: spec.kind,
                value: Value::Undef,
            }
        });
        async { Ok(()) }
    }

    fn item_kind(
        &self,
        name: &ItemName,
    ) -> impl Future<Output = Result<ItemKind, RulehubError>> + Send {
        let result = self
            .items()
            .get(name)
            .map(|item| item.kind)
            .ok_or_else(|| ItemError::NotFound { name: name.clone() }.into());
        async move { result }
    }

    fn current_value(
        &self,
        name: &ItemName,
    ) -> impl Future<Output = Result<Value, RulehubError>> + Send {
        let result = self
            .items()
            .get(name)
            .map(|item| item.value.clone())
            .ok_or_else(|| ItemError::NotFound { name: name.clone() }.into());
        async move { result }
    }

    fn send_command(
        &self,
        name: &ItemName,
        value: Value,
    ) -> impl Future<Output = Result<(), RulehubError>> + Send {
        let normalized = {
            let items = self.items();
            match items.get(name) {
                Some(item) => Self::normalize(name, item.kind, &item.value, &value),
                None => Err(ItemError::NotFound { name: name.clone() }.into()),
            }
        };
        let result = match normalized {
            Ok(normalized) => {
                self.publish(ItemEvent::command(name.clone(), value));
                self.apply(name, normalized);
                Ok(())
            }
            Err(error) => Err(error),
        };
        async move { result }
    }

    fn post_update(
        &self,
        name: &ItemName,
        value: Value,
    ) -> impl Future<Output = Result<(), RulehubError>> + Send {
        let known = self.items().contains_key(name);
        let result = if known {
            self.apply(name, value);
            Ok(())
        } else {
            Err(ItemError::NotFound { name: name.clone() }.into())
        };
        async move { result }
    }

    fn subscribe(&self) -> broadcast::Receiver<ItemEvent> {
        self.sender.subscribe()
    }
}
