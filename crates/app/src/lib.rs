//! # rulehub-app
//!
//! Application layer — the platform port and the rule runtime.
//!
//! ## Responsibilities
//! - Define the **platform port** (trait) adapters must implement:
//!   item registry, command/update primitives, event subscription
//! - **State observers** that tell a rule's own command echoes from manual
//!   actions (switch, dimmer, number, shutter variants)
//! - The **rule FSM runtime**: binding a domain state machine to a
//!   persisted state item, with restore-on-start and timeout arming
//! - The **timer service** feeding one-shot timeouts back into the queue
//! - The **rule engine**: routing platform events to rules, one at a time
//! - The **reactive rules** wiring observers, machines, and outputs
//!
//! ## Dependency rule
//! Depends on `rulehub-domain` only (plus `tokio::sync`/`tokio::time` for
//! channels and timers). Never imports adapter crates. Adapters depend on
//! *this* crate, not the reverse.

pub mod engine;
pub mod fsm;
pub mod observer;
pub mod ports;
pub mod rules;
pub mod timers;

#[cfg(test)]
pub(crate) mod testkit;
