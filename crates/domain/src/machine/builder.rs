//! Builder for state graph definitions.
//!
//! Declarations are collected in any order; everything is validated in
//! [`build`](MachineBuilder::build) so a rule module can lay out its graph
//! in whatever order reads best.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use super::def::{Guard, MachineDef, StateNode, StateTimeout, TransitionDef};
use super::error::DefinitionError;

/// Collects states and transitions, then validates them into a
/// [`MachineDef`].
#[derive(Debug)]
pub struct MachineBuilder<S, T, C> {
    states: Vec<StateNode<S, T>>,
    transitions: Vec<TransitionDef<S, T, C>>,
    initial: S,
}

impl<S, T, C> MachineBuilder<S, T, C>
where
    S: Copy + Eq + Hash + fmt::Display,
    T: Copy + Eq + fmt::Display,
{
    /// Start a graph whose instances begin in `initial` (descending through
    /// initial children when `initial` is composite).
    #[must_use]
    pub fn new(initial: S) -> Self {
        Self {
            states: Vec::new(),
            transitions: Vec::new(),
            initial,
        }
    }

    /// Declare a root-level leaf state.
    pub fn state(&mut self, id: S) -> &mut Self {
        self.push_state(id, None, None, None)
    }

    /// Declare a root-level leaf state with a timeout.
    pub fn state_with_timeout(&mut self, id: S, after: Duration, on_timeout: T) -> &mut Self {
        self.push_state(
            id,
            None,
            None,
            Some(StateTimeout {
                after,
                trigger: on_timeout,
            }),
        )
    }

    /// Declare a root-level composite state entered through `initial_child`.
    pub fn composite(&mut self, id: S, initial_child: S) -> &mut Self {
        self.push_state(id, None, Some(initial_child), None)
    }

    /// Declare a leaf state below `parent`.
    pub fn child(&mut self, parent: S, id: S) -> &mut Self {
        self.push_state(id, Some(parent), None, None)
    }

    /// Declare a leaf state below `parent` with a timeout.
    ///
    /// A zero duration declares the timeout trigger without arming it; the
    /// effective duration can be changed per instance at runtime.
    pub fn child_with_timeout(
        &mut self,
        parent: S,
        id: S,
        after: Duration,
        on_timeout: T,
    ) -> &mut Self {
        self.push_state(
            id,
            Some(parent),
            None,
            Some(StateTimeout {
                after,
                trigger: on_timeout,
            }),
        )
    }

    /// Declare a composite state below `parent`, entered through
    /// `initial_child`.
    pub fn child_composite(&mut self, parent: S, id: S, initial_child: S) -> &mut Self {
        self.push_state(id, Some(parent), Some(initial_child), None)
    }

    /// Declare a transition. Sources may be composite (matching any
    /// descendant leaf); the destination may be composite (entered through
    /// its initial children). Guards attach to the returned handle.
    pub fn transition(
        &mut self,
        trigger: T,
        sources: impl IntoIterator<Item = S>,
        dest: S,
    ) -> TransitionGuards<'_, S, T, C> {
        self.transitions.push(TransitionDef {
            trigger,
            sources: sources.into_iter().collect(),
            dest,
            conditions: Vec::new(),
            unless: Vec::new(),
        });
        let index = self.transitions.len() - 1;
        TransitionGuards {
            transition: &mut self.transitions[index],
        }
    }

    fn push_state(
        &mut self,
        id: S,
        parent: Option<S>,
        initial_child: Option<S>,
        timeout: Option<StateTimeout<T>>,
    ) -> &mut Self {
        self.states.push(StateNode {
            id,
            parent,
            initial_child,
            timeout,
        });
        self
    }

    /// Validate all declarations and produce the immutable definition.
    ///
    /// # Errors
    ///
    /// Returns the first [`DefinitionError`] found: duplicate states,
    /// unknown parents or transition endpoints, parent cycles, composites
    /// without initial children, initial children that are not children of
    /// their composite, timeouts on composites, or an undeclared initial
    /// state.
    pub fn build(self) -> Result<MachineDef<S, T, C>, DefinitionError> {
        let mut index = HashMap::new();
        for (position, node) in self.states.iter().enumerate() {
            if index.insert(node.id, position).is_some() {
                return Err(DefinitionError::DuplicateState {
                    state: node.id.to_string(),
                });
            }
        }

        let declared = |state: S| index.contains_key(&state);

        for node in &self.states {
            if let Some(parent) = node.parent {
                if !declared(parent) {
                    return Err(DefinitionError::UnknownParent {
                        state: node.id.to_string(),
                        parent: parent.to_string(),
                    });
                }
            }
        }

        // Parent chains must terminate at a root.
        for node in &self.states {
            let mut seen = HashSet::new();
            let mut cursor = node.id;
            while let Some(parent) = index.get(&cursor).and_then(|&i| self.states[i].parent) {
                if !seen.insert(parent) {
                    return Err(DefinitionError::ParentCycle {
                        state: node.id.to_string(),
                    });
                }
                cursor = parent;
            }
        }

        let parents: HashSet<S> = self.states.iter().filter_map(|node| node.parent).collect();

        for node in &self.states {
            let is_parent = parents.contains(&node.id);
            // A timed state that acquired children is a timeout problem,
            // not a missing-initial-child one.
            if node.timeout.is_some() && is_parent {
                return Err(DefinitionError::TimeoutOnComposite {
                    state: node.id.to_string(),
                });
            }
            match node.initial_child {
                None if is_parent => {
                    return Err(DefinitionError::MissingInitialChild {
                        state: node.id.to_string(),
                    });
                }
                Some(child) => {
                    let child_of_node = index
                        .get(&child)
                        .is_some_and(|&i| self.states[i].parent == Some(node.id));
                    if !child_of_node {
                        return Err(DefinitionError::InitialNotChild {
                            state: node.id.to_string(),
                            child: child.to_string(),
                        });
                    }
                }
                None => {}
            }
        }

        for transition in &self.transitions {
            if transition.sources.is_empty() {
                return Err(DefinitionError::NoSources {
                    trigger: transition.trigger.to_string(),
                });
            }
            for &source in &transition.sources {
                if !declared(source) {
                    return Err(DefinitionError::UnknownSource {
                        trigger: transition.trigger.to_string(),
                        state: source.to_string(),
                    });
                }
            }
            if !declared(transition.dest) {
                return Err(DefinitionError::UnknownDest {
                    trigger: transition.trigger.to_string(),
                    state: transition.dest.to_string(),
                });
            }
        }

        if !declared(self.initial) {
            return Err(DefinitionError::UnknownInitial {
                state: self.initial.to_string(),
            });
        }

        Ok(MachineDef {
            states: self.states,
            index,
            transitions: self.transitions,
            initial: self.initial,
        })
    }
}

/// Handle for attaching guards to the transition just declared.
#[derive(Debug)]
pub struct TransitionGuards<'a, S, T, C> {
    transition: &'a mut TransitionDef<S, T, C>,
}

impl<S, T, C> TransitionGuards<'_, S, T, C> {
    /// The transition fires only when `guard` returns true.
    pub fn when(self, guard: Guard<C>) -> Self {
        self.transition.conditions.push(guard);
        self
    }

    /// The transition fires only when `guard` returns false.
    pub fn unless(self, guard: Guard<C>) -> Self {
        self.transition.unless.push(guard);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum S {
        A,
        B,
        C,
    }

    impl fmt::Display for S {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::A => f.write_str("a"),
                Self::B => f.write_str("b"),
                Self::C => f.write_str("c"),
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum T {
        Go,
    }

    impl fmt::Display for T {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("go")
        }
    }

    fn builder() -> MachineBuilder<S, T, ()> {
        MachineBuilder::new(S::A)
    }

    #[test]
    fn should_build_valid_graph() {
        let mut builder = builder();
        builder.composite(S::A, S::B);
        builder.child(S::A, S::B);
        builder.child_with_timeout(S::A, S::C, Duration::from_secs(1), T::Go);
        builder.transition(T::Go, [S::B], S::C);
        assert!(builder.build().is_ok());
    }

    #[test]
    fn should_reject_duplicate_state() {
        let mut builder = builder();
        builder.state(S::A);
        builder.state(S::A);
        assert_eq!(
            builder.build().unwrap_err(),
            DefinitionError::DuplicateState {
                state: "a".to_owned()
            }
        );
    }

    #[test]
    fn should_reject_unknown_parent() {
        let mut builder = builder();
        builder.state(S::A);
        builder.child(S::B, S::C);
        assert_eq!(
            builder.build().unwrap_err(),
            DefinitionError::UnknownParent {
                state: "c".to_owned(),
                parent: "b".to_owned()
            }
        );
    }

    #[test]
    fn should_reject_parent_cycle() {
        let mut builder = builder();
        builder.child_composite(S::B, S::A, S::B);
        builder.child_composite(S::A, S::B, S::A);
        assert!(matches!(
            builder.build().unwrap_err(),
            DefinitionError::ParentCycle { .. }
        ));
    }

    #[test]
    fn should_reject_parent_without_initial_child() {
        let mut builder = builder();
        builder.state(S::A);
        builder.child(S::A, S::B);
        assert_eq!(
            builder.build().unwrap_err(),
            DefinitionError::MissingInitialChild {
                state: "a".to_owned()
            }
        );
    }

    #[test]
    fn should_reject_initial_child_that_is_not_a_child() {
        let mut builder = builder();
        builder.composite(S::A, S::B);
        builder.state(S::B);
        assert_eq!(
            builder.build().unwrap_err(),
            DefinitionError::InitialNotChild {
                state: "a".to_owned(),
                child: "b".to_owned()
            }
        );
    }

    #[test]
    fn should_reject_timeout_on_composite_state() {
        let mut builder = builder();
        builder.state_with_timeout(S::A, Duration::from_secs(1), T::Go);
        builder.child(S::A, S::B);
        assert_eq!(
            builder.build().unwrap_err(),
            DefinitionError::TimeoutOnComposite {
                state: "a".to_owned()
            }
        );
    }

    #[test]
    fn should_reject_transition_without_sources() {
        let mut builder = builder();
        builder.state(S::A);
        builder.transition(T::Go, [], S::A);
        assert_eq!(
            builder.build().unwrap_err(),
            DefinitionError::NoSources {
                trigger: "go".to_owned()
            }
        );
    }

    #[test]
    fn should_reject_transition_with_unknown_source() {
        let mut builder = builder();
        builder.state(S::A);
        builder.transition(T::Go, [S::B], S::A);
        assert_eq!(
            builder.build().unwrap_err(),
            DefinitionError::UnknownSource {
                trigger: "go".to_owned(),
                state: "b".to_owned()
            }
        );
    }

    #[test]
    fn should_reject_transition_with_unknown_dest() {
        let mut builder = builder();
        builder.state(S::A);
        builder.transition(T::Go, [S::A], S::B);
        assert_eq!(
            builder.build().unwrap_err(),
            DefinitionError::UnknownDest {
                trigger: "go".to_owned(),
                state: "b".to_owned()
            }
        );
    }

    #[test]
    fn should_reject_undeclared_initial_state() {
        let mut builder = builder();
        builder.state(S::B);
        assert_eq!(
            builder.build().unwrap_err(),
            DefinitionError::UnknownInitial {
                state: "a".to_owned()
            }
        );
    }
}
