//! Validated, immutable state graph definitions.
//!
//! A [`MachineDef`] is produced by the
//! [`MachineBuilder`](crate::machine::MachineBuilder) and consumed by
//! [`Machine`](crate::machine::Machine) instances. Everything here is
//! checked at construction time, so lookups during dispatch are total.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// A transition guard: a pure predicate over the rule's context.
pub type Guard<C> = fn(&C) -> bool;

/// A leaf state's timeout: how long to stay before firing `trigger`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTimeout<T> {
    pub after: Duration,
    pub trigger: T,
}

#[derive(Debug, Clone)]
pub(crate) struct StateNode<S, T> {
    pub id: S,
    pub parent: Option<S>,
    pub initial_child: Option<S>,
    pub timeout: Option<StateTimeout<T>>,
}

#[derive(Debug, Clone)]
pub(crate) struct TransitionDef<S, T, C> {
    pub trigger: T,
    pub sources: Vec<S>,
    pub dest: S,
    pub conditions: Vec<Guard<C>>,
    pub unless: Vec<Guard<C>>,
}

/// An immutable, validated state graph shared by all instances of a rule
/// family.
#[derive(Debug, Clone)]
pub struct MachineDef<S, T, C> {
    pub(crate) states: Vec<StateNode<S, T>>,
    pub(crate) index: HashMap<S, usize>,
    pub(crate) transitions: Vec<TransitionDef<S, T, C>>,
    pub(crate) initial: S,
}

impl<S, T, C> MachineDef<S, T, C>
where
    S: Copy + Eq + Hash,
{
    /// The declared initial state (possibly composite).
    #[must_use]
    pub fn initial(&self) -> S {
        self.initial
    }

    pub(crate) fn node(&self, state: S) -> Option<&StateNode<S, T>> {
        self.index.get(&state).map(|&i| &self.states[i])
    }

    /// Distance of `state` from the root; root states have depth zero.
    pub(crate) fn depth(&self, state: S) -> usize {
        let mut depth = 0;
        let mut cursor = state;
        while let Some(parent) = self.node(cursor).and_then(|node| node.parent) {
            depth += 1;
            cursor = parent;
        }
        depth
    }

    /// Descend through initial children until a leaf is reached.
    pub(crate) fn resolve_leaf(&self, state: S) -> S {
        let mut cursor = state;
        while let Some(child) = self.node(cursor).and_then(|node| node.initial_child) {
            cursor = child;
        }
        cursor
    }

    /// Depth of the deepest match when `source` is `leaf` itself or one of
    /// its ancestors; `None` when it is neither.
    pub(crate) fn match_depth(&self, source: S, leaf: S) -> Option<usize> {
        let mut cursor = leaf;
        loop {
            if cursor == source {
                return Some(self.depth(source));
            }
            cursor = self.node(cursor).and_then(|node| node.parent)?;
        }
    }

    /// Whether `state` is a leaf (has no children).
    pub(crate) fn is_leaf(&self, state: S) -> bool {
        self.node(state)
            .is_some_and(|node| node.initial_child.is_none())
    }

    /// All declared leaf states, in declaration order.
    pub fn leaves(&self) -> impl Iterator<Item = S> + '_ {
        self.states
            .iter()
            .filter(|node| node.initial_child.is_none())
            .map(|node| node.id)
    }
}
