//! Hierarchical state machine with per-state timeouts.
//!
//! Every rule family declares its graph once ([`MachineBuilder`] →
//! [`MachineDef`]) and runs one [`Machine`] instance per configured rule.
//! States form a tree: composite states are entered through their initial
//! children, and the machine always rests in a leaf. Transitions carry
//! typed triggers and guard predicates; firing a trigger that has no
//! matching transition is not an error, it is an observable no-op.
//!
//! The machine itself is pure. Timeouts are described
//! ([`Machine::active_timeout`]) but arming real timers and feeding the
//! resulting triggers back in is the caller's responsibility.

mod builder;
mod def;
mod error;

pub use builder::{MachineBuilder, TransitionGuards};
pub use def::{Guard, MachineDef, StateTimeout};
pub use error::DefinitionError;

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::time::Duration;

/// Outcome of [`Machine::fire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fired<S> {
    /// A transition ran. `from == to` is a legal re-entry; it re-arms the
    /// state's timeout without changing derived outputs.
    Transitioned { from: S, to: S },
    /// No transition matched the trigger in the current state.
    Ignored,
}

impl<S: Copy + PartialEq> Fired<S> {
    /// Whether any transition ran (including re-entries).
    #[must_use]
    pub fn did_transition(&self) -> bool {
        matches!(self, Self::Transitioned { .. })
    }

    /// Whether the machine rests in a different leaf than before.
    #[must_use]
    pub fn changed(&self) -> bool {
        matches!(self, Self::Transitioned { from, to } if from != to)
    }
}

/// A running instance of a state graph.
#[derive(Debug, Clone)]
pub struct Machine<S, T, C> {
    def: MachineDef<S, T, C>,
    current: S,
    timeout_overrides: HashMap<S, Option<Duration>>,
}

impl<S, T, C> Machine<S, T, C>
where
    S: Copy + Eq + Hash + fmt::Display,
    T: Copy + Eq,
{
    /// Instantiate `def`, starting in its initial leaf.
    #[must_use]
    pub fn new(def: MachineDef<S, T, C>) -> Self {
        let current = def.resolve_leaf(def.initial());
        Self {
            def,
            current,
            timeout_overrides: HashMap::new(),
        }
    }

    /// The leaf the machine currently rests in.
    #[must_use]
    pub fn current(&self) -> S {
        self.current
    }

    /// Whether the machine rests in `state` or one of its descendants.
    #[must_use]
    pub fn is_in(&self, state: S) -> bool {
        self.def.match_depth(state, self.current).is_some()
    }

    /// Jump to a previously persisted leaf, bypassing transitions.
    ///
    /// Returns false (leaving the machine untouched) when `leaf` is not a
    /// declared leaf state.
    pub fn restore(&mut self, leaf: S) -> bool {
        if self.def.is_leaf(leaf) {
            self.current = leaf;
            true
        } else {
            false
        }
    }

    /// Find a declared leaf by its rendered name (e.g. `"auto.on"`).
    #[must_use]
    pub fn leaf_named(&self, name: &str) -> Option<S> {
        self.def.leaves().find(|leaf| leaf.to_string() == name)
    }

    /// Fire `trigger` against the current state.
    ///
    /// Candidate transitions are those whose source list contains the
    /// current leaf or one of its ancestors; the deepest source wins, ties
    /// go to the earliest declaration. Guards filter candidates: a rejected
    /// candidate falls through to the next. The destination descends
    /// through initial children to a leaf.
    pub fn fire(&mut self, trigger: T, ctx: &C) -> Fired<S> {
        let mut candidates: Vec<(usize, usize)> = Vec::new();
        for (order, transition) in self.def.transitions.iter().enumerate() {
            if transition.trigger != trigger {
                continue;
            }
            let depth = transition
                .sources
                .iter()
                .filter_map(|&source| self.def.match_depth(source, self.current))
                .max();
            if let Some(depth) = depth {
                candidates.push((depth, order));
            }
        }
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        for (_, order) in candidates {
            let transition = &self.def.transitions[order];
            if !transition.conditions.iter().all(|guard| guard(ctx)) {
                continue;
            }
            if transition.unless.iter().any(|guard| guard(ctx)) {
                continue;
            }
            let from = self.current;
            let to = self.def.resolve_leaf(transition.dest);
            self.current = to;
            return Fired::Transitioned { from, to };
        }
        Fired::Ignored
    }

    /// Override the timeout duration of `state` for this instance.
    ///
    /// `None` (and zero) disables the timeout. Only states declared with a
    /// timeout trigger can be armed; overrides on other states have no
    /// effect.
    pub fn set_timeout(&mut self, state: S, timeout: Option<Duration>) {
        self.timeout_overrides.insert(state, timeout);
    }

    /// The timeout to arm for the current leaf, if any.
    #[must_use]
    pub fn active_timeout(&self) -> Option<StateTimeout<T>> {
        let declared = self.def.node(self.current)?.timeout?;
        let after = match self.timeout_overrides.get(&self.current) {
            Some(override_) => (*override_)?,
            None => declared.after,
        };
        if after.is_zero() {
            return None;
        }
        Some(StateTimeout {
            after,
            trigger: declared.trigger,
        })
    }
}
