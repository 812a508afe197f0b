//! Platform port — the automation platform the rules live on.
//!
//! The platform owns the item registry and the event bus. Rules read and
//! write items only through this port; the in-memory virtual adapter
//! implements it for tests and for the daemon.

use std::future::Future;

use tokio::sync::broadcast;

use rulehub_domain::error::RulehubError;
use rulehub_domain::event::ItemEvent;
use rulehub_domain::item::{ItemKind, ItemName, ItemSpec, Value};

/// Item registry, command/update primitives, and event subscription.
pub trait Platform {
    /// Create `spec` if no item of that name exists yet. Idempotent.
    fn ensure_item(&self, spec: &ItemSpec) -> impl Future<Output = Result<(), RulehubError>> + Send;

    /// The kind of a registered item.
    ///
    /// Fails with an item error when the name is unknown; rules use this at
    /// construction time to validate their configuration.
    fn item_kind(&self, name: &ItemName)
    -> impl Future<Output = Result<ItemKind, RulehubError>> + Send;

    /// The last known value of a registered item.
    fn current_value(&self, name: &ItemName)
    -> impl Future<Output = Result<Value, RulehubError>> + Send;

    /// Ask the item to change (command semantics; the platform may
    /// normalize or reject the value).
    fn send_command(
        &self,
        name: &ItemName,
        value: Value,
    ) -> impl Future<Output = Result<(), RulehubError>> + Send;

    /// Overwrite the item state without command semantics.
    fn post_update(
        &self,
        name: &ItemName,
        value: Value,
    ) -> impl Future<Output = Result<(), RulehubError>> + Send;

    /// Subscribe to all item events published after this call.
    fn subscribe(&self) -> broadcast::Receiver<ItemEvent>;
}

impl<T: Platform + Send + Sync> Platform for std::sync::Arc<T> {
    fn ensure_item(&self, spec: &ItemSpec) -> impl Future<Output = Result<(), RulehubError>> + Send {
        (**self).ensure_item(spec)
    }

    fn item_kind(
        &self,
        name: &ItemName,
    ) -> impl Future<Output = Result<ItemKind, RulehubError>> + Send {
        (**self).item_kind(name)
    }

    fn current_value(
        &self,
        name: &ItemName,
    ) -> impl Future<Output = Result<Value, RulehubError>> + Send {
        (**self).current_value(name)
    }

    fn send_command(
        &self,
        name: &ItemName,
        value: Value,
    ) -> impl Future<Output = Result<(), RulehubError>> + Send {
        (**self).send_command(name, value)
    }

    fn post_update(
        &self,
        name: &ItemName,
        value: Value,
    ) -> impl Future<Output = Result<(), RulehubError>> + Send {
        (**self).post_update(name, value)
    }

    fn subscribe(&self) -> broadcast::Receiver<ItemEvent> {
        (**self).subscribe()
    }
}
