//! # rulehub-domain
//!
//! Pure domain model for the rulehub home automation rule engine.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps
//! - Define **Items** (named platform values: switches, dimmers, sensors, …)
//! - Define **Item events** (commands, state changes, state updates)
//! - The **hierarchical state machine** (composite states, timeouts, guards)
//! - **TimeoutList** (expiring value list backing command-echo detection)
//! - **HysteresisSwitch** (threshold switching without chatter)
//! - Per-family **rule graphs** (states, triggers, settings, output logic)
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod event;
pub mod hysteresis;
pub mod item;
pub mod machine;
pub mod rules;
pub mod timeout_list;
