//! Rule FSM runtime — a machine bound to its persisted state item.
//!
//! Every rule persists the name of its current leaf in a text item
//! (`<rule>_state`). On startup the machine resumes from that item when the
//! persisted name still matches a declared leaf, and falls back to the
//! default initial state otherwise. After every transition the new name is
//! posted (only when it actually changed) and the state timeout is re-armed
//! through the timer service.

use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use rulehub_domain::error::RulehubError;
use rulehub_domain::item::{ItemKind, ItemName, ItemSpec, Value};
use rulehub_domain::machine::{Fired, Machine};

use crate::ports::Platform;
use crate::timers::{RuleId, TimerService, TimerSlot};

/// A running machine plus its durability and timeout wiring.
#[derive(Debug)]
pub struct RuleFsm<S, T, C> {
    state_item: ItemName,
    machine: Machine<S, T, C>,
    posted: Option<String>,
}

impl<S, T, C> RuleFsm<S, T, C>
where
    S: Copy + Eq + Hash + fmt::Display,
    T: Copy + Eq,
{
    /// Bind `machine` to the state item of the rule named `rule_name`.
    #[must_use]
    pub fn new(rule_name: &str, machine: Machine<S, T, C>) -> Self {
        Self {
            state_item: ItemName::new(format!("{rule_name}_state")),
            machine,
            posted: None,
        }
    }

    #[must_use]
    pub fn state_item(&self) -> &ItemName {
        &self.state_item
    }

    #[must_use]
    pub fn current(&self) -> S {
        self.machine.current()
    }

    #[must_use]
    pub fn is_in(&self, state: S) -> bool {
        self.machine.is_in(state)
    }

    /// The machine itself, for per-instance timeout overrides.
    pub fn machine_mut(&mut self) -> &mut Machine<S, T, C> {
        &mut self.machine
    }

    /// Ensure the state item exists, resume from it when possible, post the
    /// resolved name, and arm the state timeout.
    ///
    /// A persisted value that no longer names a declared leaf is ignored;
    /// the machine starts from its default initial state.
    ///
    /// # Errors
    ///
    /// Propagates platform errors; resume mismatches are not errors.
    pub async fn init<P: Platform>(
        &mut self,
        platform: &P,
        timers: &mut TimerService,
        rule: RuleId,
    ) -> Result<(), RulehubError> {
        platform
            .ensure_item(&ItemSpec::new(self.state_item.clone(), ItemKind::Text))
            .await?;
        if let Value::Text(persisted) = platform.current_value(&self.state_item).await?
            && let Some(leaf) = self.machine.leaf_named(&persisted)
        {
            self.machine.restore(leaf);
        }
        self.post_state(platform).await?;
        self.arm_state_timeout(timers, rule);
        Ok(())
    }

    /// Fire `trigger`, persisting and re-arming on any transition.
    ///
    /// Re-entries (`from == to`) re-arm the timeout without re-posting the
    /// state name.
    ///
    /// # Errors
    ///
    /// Propagates platform errors from the state-item write.
    pub async fn fire<P: Platform>(
        &mut self,
        trigger: T,
        ctx: &C,
        platform: &P,
        timers: &mut TimerService,
        rule: RuleId,
    ) -> Result<Fired<S>, RulehubError> {
        let fired = self.machine.fire(trigger, ctx);
        if fired.did_transition() {
            self.post_state(platform).await?;
            self.arm_state_timeout(timers, rule);
        }
        Ok(fired)
    }

    /// The trigger to fire when the state timeout expires, if one is armed.
    #[must_use]
    pub fn timeout_trigger(&self) -> Option<T> {
        self.machine.active_timeout().map(|timeout| timeout.trigger)
    }

    fn arm_state_timeout(&self, timers: &mut TimerService, rule: RuleId) {
        match self.machine.active_timeout() {
            Some(timeout) if timeout.after > Duration::ZERO => {
                timers.arm(rule, TimerSlot::State, timeout.after);
            }
            _ => timers.cancel(rule, TimerSlot::State),
        }
    }

    async fn post_state<P: Platform>(&mut self, platform: &P) -> Result<(), RulehubError> {
        let name = self.machine.current().to_string();
        if self.posted.as_deref() == Some(name.as_str()) {
            return Ok(());
        }
        platform
            .post_update(&self.state_item, Value::Text(name.clone()))
            .await?;
        self.posted = Some(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::FakePlatform;
    use rulehub_domain::machine::{MachineBuilder, MachineDef};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum State {
        Auto,
        Idle,
        Busy,
    }

    impl fmt::Display for State {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::Auto => f.write_str("auto"),
                Self::Idle => f.write_str("auto.idle"),
                Self::Busy => f.write_str("auto.busy"),
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Trigger {
        Start,
        TimedOut,
    }

    impl fmt::Display for Trigger {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::Start => f.write_str("start"),
                Self::TimedOut => f.write_str("timed_out"),
            }
        }
    }

    fn graph() -> MachineDef<State, Trigger, ()> {
        let mut builder = MachineBuilder::new(State::Auto);
        builder.composite(State::Auto, State::Idle);
        builder.child(State::Auto, State::Idle);
        builder.child_with_timeout(
            State::Auto,
            State::Busy,
            Duration::from_secs(30),
            Trigger::TimedOut,
        );
        builder.transition(Trigger::Start, [State::Idle], State::Busy);
        builder.transition(Trigger::TimedOut, [State::Busy], State::Idle);
        builder.build().unwrap()
    }

    fn fsm() -> RuleFsm<State, Trigger, ()> {
        RuleFsm::new("washer", Machine::new(graph()))
    }

    #[tokio::test]
    async fn should_create_state_item_and_post_initial_leaf() {
        let platform = FakePlatform::default();
        let (mut timers, _fired) = TimerService::channel();
        let mut fsm = fsm();

        fsm.init(&platform, &mut timers, RuleId(0)).await.unwrap();
        assert_eq!(
            platform.current_value(fsm.state_item()).await.unwrap(),
            Value::Text("auto.idle".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn should_resume_from_persisted_leaf_name() {
        let platform = FakePlatform::default();
        platform.seed("washer_state", ItemKind::Text, Value::Text("auto.busy".into()));
        let (mut timers, mut fired) = TimerService::channel();
        let mut fsm = fsm();

        fsm.init(&platform, &mut timers, RuleId(0)).await.unwrap();
        assert_eq!(fsm.current(), State::Busy);
        // Resuming into a timed state arms its timeout.
        let delivery = fired.recv().await.unwrap();
        assert!(timers.accepts(&delivery));
    }

    #[tokio::test]
    async fn should_fall_back_to_default_when_persisted_name_is_unknown() {
        let platform = FakePlatform::default();
        platform.seed("washer_state", ItemKind::Text, Value::Text("gone".into()));
        let (mut timers, _fired) = TimerService::channel();
        let mut fsm = fsm();

        fsm.init(&platform, &mut timers, RuleId(0)).await.unwrap();
        assert_eq!(fsm.current(), State::Idle);
        assert_eq!(
            platform.current_value(fsm.state_item()).await.unwrap(),
            Value::Text("auto.idle".into())
        );
    }

    #[tokio::test]
    async fn should_post_new_leaf_name_only_on_change() {
        let platform = FakePlatform::default();
        let (mut timers, _fired) = TimerService::channel();
        let mut fsm = fsm();
        fsm.init(&platform, &mut timers, RuleId(0)).await.unwrap();

        let fired = fsm
            .fire(Trigger::Start, &(), &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        assert!(fired.changed());
        assert_eq!(
            platform.current_value(fsm.state_item()).await.unwrap(),
            Value::Text("auto.busy".into())
        );

        let fired = fsm
            .fire(Trigger::Start, &(), &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        assert!(!fired.did_transition());
    }

    #[tokio::test]
    async fn should_expose_timeout_trigger_for_timed_states_only() {
        let platform = FakePlatform::default();
        let (mut timers, _fired) = TimerService::channel();
        let mut fsm = fsm();
        fsm.init(&platform, &mut timers, RuleId(0)).await.unwrap();
        assert_eq!(fsm.timeout_trigger(), None);

        fsm.fire(Trigger::Start, &(), &platform, &mut timers, RuleId(0))
            .await
            .unwrap();
        assert_eq!(fsm.timeout_trigger(), Some(Trigger::TimedOut));
    }
}
