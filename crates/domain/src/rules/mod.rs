//! Rule families — one module per kind of automation.
//!
//! Each module defines its state and trigger enums, the guard context, the
//! serde-deserializable settings, a graph factory returning a
//! [`MachineDef`](crate::machine::MachineDef), and the pure functions that
//! derive output commands from state changes. Wiring these graphs to real
//! items lives in the app crate.

pub mod current_switch;
pub mod energy_save;
pub mod light;
pub mod motion;
pub mod presence;
pub mod shading;
pub mod sleep;
pub mod speaker;
pub mod ventilation;
