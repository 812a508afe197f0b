//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into [`RulehubError`]
//! via `#[from]`. Construction-time problems (bad graphs, bad settings,
//! missing items) abort building the affected rule; protocol problems
//! surface from event handling and are isolated per event by the engine.

use crate::item::{ItemKind, ItemName, Value};

/// Top-level error for the rulehub workspace.
#[derive(Debug, thiserror::Error)]
pub enum RulehubError {
    #[error("State graph definition error")]
    Definition(#[from] crate::machine::DefinitionError),

    #[error("Item error")]
    Item(#[from] ItemError),

    #[error("Protocol error")]
    Protocol(#[from] ProtocolError),

    #[error("Rule settings error")]
    Settings(#[from] SettingsError),
}

/// Problems reported by the platform about an item, or by a rule about an
/// item it was configured with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ItemError {
    #[error("item `{name}` does not exist")]
    NotFound { name: ItemName },

    #[error("item `{name}` is a {actual} item, expected {expected}")]
    UnsupportedKind {
        name: ItemName,
        actual: ItemKind,
        expected: &'static str,
    },

    #[error("item `{name}` ({kind}) does not accept this command")]
    NotCommandable { name: ItemName, kind: ItemKind },
}

/// An event carried a value outside the vocabulary of its item kind.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("item `{item}` delivered `{value}`, expected {expected}")]
pub struct ProtocolError {
    pub item: ItemName,
    pub value: Value,
    pub expected: &'static str,
}

/// Rule settings that cannot describe a runnable rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("rule name must not be empty")]
    EmptyName,

    #[error("rule `{rule}` needs {input} to be configured")]
    MissingInput { rule: String, input: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_render_item_error_with_context() {
        let error = ItemError::UnsupportedKind {
            name: ItemName::from("kitchen_light"),
            actual: ItemKind::Number,
            expected: "switch or dimmer",
        };
        assert_eq!(
            error.to_string(),
            "item `kitchen_light` is a number item, expected switch or dimmer"
        );
    }

    #[test]
    fn should_convert_sub_errors_into_rulehub_error() {
        let error: RulehubError = ItemError::NotFound {
            name: ItemName::from("ghost"),
        }
        .into();
        assert!(matches!(error, RulehubError::Item(_)));

        let error: RulehubError = SettingsError::EmptyName.into();
        assert!(matches!(error, RulehubError::Settings(_)));
    }

    #[test]
    fn should_render_protocol_error_with_value() {
        let error = ProtocolError {
            item: ItemName::from("hall_switch"),
            value: Value::Percent(12.0),
            expected: "ON or OFF",
        };
        assert_eq!(
            error.to_string(),
            "item `hall_switch` delivered `12`, expected ON or OFF"
        );
    }
}
