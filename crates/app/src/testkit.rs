//! In-memory platform fake for unit tests.
//!
//! Stores items in a map and publishes events on a broadcast channel, like
//! the virtual adapter, but without command normalization: a command is
//! applied verbatim as the new state, and every command is recorded so
//! tests can assert on what the rules sent.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio::sync::broadcast;

use rulehub_domain::error::{ItemError, RulehubError};
use rulehub_domain::event::ItemEvent;
use rulehub_domain::item::{ItemKind, ItemName, ItemSpec, Value};

use crate::ports::Platform;

pub struct FakePlatform {
    items: Mutex<HashMap<ItemName, (ItemKind, Value)>>,
    sender: broadcast::Sender<ItemEvent>,
    commands: Mutex<Vec<(ItemName, Value)>>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            items: Mutex::new(HashMap::new()),
            sender,
            commands: Mutex::new(Vec::new()),
        }
    }
}

impl FakePlatform {
    /// Register an item with an initial value.
    pub fn seed(&self, name: &str, kind: ItemKind, value: Value) {
        self.items
            .lock()
            .unwrap()
            .insert(ItemName::from(name), (kind, value));
    }

    /// Inject an externally caused state change, as the platform would
    /// deliver it.
    pub fn change_state(&self, name: &str, to: Value) -> ItemEvent {
        let name = ItemName::from(name);
        let from = {
            let mut items = self.items.lock().unwrap();
            let entry = items.get_mut(&name).expect("item not seeded");
            std::mem::replace(&mut entry.1, to.clone())
        };
        let event = ItemEvent::state_changed(name, from, to);
        let _ = self.sender.send(event.clone());
        event
    }

    /// Inject an externally caused command, as a wall controller would.
    pub fn send_external_command(&self, name: &str, value: Value) -> ItemEvent {
        let event = ItemEvent::command(ItemName::from(name), value);
        let _ = self.sender.send(event.clone());
        event
    }

    /// All commands sent through [`Platform::send_command`], oldest first.
    pub fn sent_commands(&self) -> Vec<(ItemName, Value)> {
        self.commands.lock().unwrap().clone()
    }

    /// The most recent command, if any.
    pub fn last_command(&self) -> Option<(ItemName, Value)> {
        self.commands.lock().unwrap().last().cloned()
    }

    pub fn clear_commands(&self) {
        self.commands.lock().unwrap().clear();
    }
}

impl Platform for FakePlatform {
    fn ensure_item(&self, spec: &ItemSpec) -> impl Future<Output = Result<(), RulehubError>> + Send {
        let mut items = self.items.lock().unwrap();
        items
            .entry(spec.name.clone())
            .or_insert((spec.kind, Value::Undef));
        async { Ok(()) }
    }

    fn item_kind(
        &self,
        name: &ItemName,
    ) -> impl Future<Output = Result<ItemKind, RulehubError>> + Send {
        let items = self.items.lock().unwrap();
        let result = items
            .get(name)
            .map(|(kind, _)| *kind)
            .ok_or_else(|| ItemError::NotFound { name: name.clone() }.into());
        async move { result }
    }

    fn current_value(
        &self,
        name: &ItemName,
    ) -> impl Future<Output = Result<Value, RulehubError>> + Send {
        let items = self.items.lock().unwrap();
        let result = items
            .get(name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| ItemError::NotFound { name: name.clone() }.into());
        async move { result }
    }

    fn send_command(
        &self,
        name: &ItemName,
        value: Value,
    ) -> impl Future<Output = Result<(), RulehubError>> + Send {
        self.commands
            .lock()
            .unwrap()
            .push((name.clone(), value.clone()));
        let from = {
            let mut items = self.items.lock().unwrap();
            items
                .get_mut(name)
                .map(|entry| std::mem::replace(&mut entry.1, value.clone()))
        };
        let result = match from {
            Some(from) => {
                let _ = self.sender.send(ItemEvent::command(name.clone(), value.clone()));
                if from == value {
                    let _ = self.sender.send(ItemEvent::state_updated(name.clone(), value));
                } else {
                    let _ = self
                        .sender
                        .send(ItemEvent::state_changed(name.clone(), from, value));
                }
                Ok(())
            }
            None => Err(ItemError::NotFound { name: name.clone() }.into()),
        };
        async move { result }
    }

    fn post_update(
        &self,
        name: &ItemName,
        value: Value,
    ) -> impl Future<Output = Result<(), RulehubError>> + Send {
        let from = {
            let mut items = self.items.lock().unwrap();
            items
                .get_mut(name)
                .map(|entry| std::mem::replace(&mut entry.1, value.clone()))
        };
        let result = match from {
            Some(from) if from == value => {
                let _ = self.sender.send(ItemEvent::state_updated(name.clone(), value));
                Ok(())
            }
            Some(from) => {
                let _ = self
                    .sender
                    .send(ItemEvent::state_changed(name.clone(), from, value));
                Ok(())
            }
            None => Err(ItemError::NotFound { name: name.clone() }.into()),
        };
        async move { result }
    }

    fn subscribe(&self) -> broadcast::Receiver<ItemEvent> {
        self.sender.subscribe()
    }
}
