//! Item events — what the platform bus delivers to the rules.
//!
//! Three kinds travel on the bus: *commands* (someone asked an item to do
//! something), *state changes* (the item's value moved), and *state updates*
//! (the item's value was written, possibly without moving). Rules subscribe
//! per item and per kind.

use serde::{Deserialize, Serialize};

use crate::id::EventId;
use crate::item::{ItemName, Value};
use crate::time::{self, Timestamp};

/// A single occurrence on the platform event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemEvent {
    pub id: EventId,
    pub item: ItemName,
    pub kind: ItemEventKind,
    pub at: Timestamp,
}

impl ItemEvent {
    /// A command was issued against `item`.
    #[must_use]
    pub fn command(item: impl Into<ItemName>, value: Value) -> Self {
        Self::new(item, ItemEventKind::Command(value))
    }

    /// The state of `item` moved from `from` to `to`.
    #[must_use]
    pub fn state_changed(item: impl Into<ItemName>, from: Value, to: Value) -> Self {
        Self::new(item, ItemEventKind::StateChanged { from, to })
    }

    /// The state of `item` was written without necessarily changing.
    #[must_use]
    pub fn state_updated(item: impl Into<ItemName>, value: Value) -> Self {
        Self::new(item, ItemEventKind::StateUpdated(value))
    }

    fn new(item: impl Into<ItemName>, kind: ItemEventKind) -> Self {
        Self {
            id: EventId::new(),
            item: item.into(),
            kind,
            at: time::now(),
        }
    }

    /// The value this event carries: the commanded value, the new state, or
    /// the updated state.
    #[must_use]
    pub fn value(&self) -> &Value {
        match &self.kind {
            ItemEventKind::Command(value) | ItemEventKind::StateUpdated(value) => value,
            ItemEventKind::StateChanged { to, .. } => to,
        }
    }
}

/// What happened to the item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemEventKind {
    /// A command was sent to the item (by a rule or by a human frontend).
    Command(Value),
    /// The item state moved. `from` is [`Value::Undef`] before the first write.
    StateChanged { from: Value, to: Value },
    /// The item state was rewritten with the same or a new value.
    StateUpdated(Value),
}

/// Which event kinds a subscription is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventFilter {
    Command,
    Changed,
    Updated,
}

impl EventFilter {
    /// Whether an event of this kind passes the filter.
    #[must_use]
    pub fn matches(self, kind: &ItemEventKind) -> bool {
        matches!(
            (self, kind),
            (Self::Command, ItemEventKind::Command(_))
                | (Self::Changed, ItemEventKind::StateChanged { .. })
                | (Self::Updated, ItemEventKind::StateUpdated(_))
        )
    }
}

/// One item-and-filter pair a rule wants delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub item: ItemName,
    pub filter: EventFilter,
}

impl Subscription {
    #[must_use]
    pub fn new(item: impl Into<ItemName>, filter: EventFilter) -> Self {
        Self {
            item: item.into(),
            filter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::OnOff;

    #[test]
    fn should_extract_value_from_each_event_kind() {
        let cmd = ItemEvent::command("light", Value::OnOff(OnOff::On));
        assert_eq!(cmd.value(), &Value::OnOff(OnOff::On));

        let changed = ItemEvent::state_changed("light", Value::Percent(0.0), Value::Percent(80.0));
        assert_eq!(changed.value(), &Value::Percent(80.0));

        let updated = ItemEvent::state_updated("light", Value::Percent(80.0));
        assert_eq!(updated.value(), &Value::Percent(80.0));
    }

    #[test]
    fn should_match_filter_only_against_its_kind() {
        let command = ItemEventKind::Command(Value::Stop);
        let changed = ItemEventKind::StateChanged {
            from: Value::Undef,
            to: Value::Percent(1.0),
        };
        let updated = ItemEventKind::StateUpdated(Value::Percent(1.0));

        assert!(EventFilter::Command.matches(&command));
        assert!(!EventFilter::Command.matches(&changed));
        assert!(EventFilter::Changed.matches(&changed));
        assert!(!EventFilter::Changed.matches(&updated));
        assert!(EventFilter::Updated.matches(&updated));
        assert!(!EventFilter::Updated.matches(&command));
    }

    #[test]
    fn should_stamp_events_with_unique_ids() {
        let a = ItemEvent::command("light", Value::Stop);
        let b = ItemEvent::command("light", Value::Stop);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn should_roundtrip_event_through_serde_json() {
        let event = ItemEvent::state_changed("door", Value::Undef, Value::Text("open".into()));
        let json = serde_json::to_string(&event).unwrap();
        let parsed: ItemEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
