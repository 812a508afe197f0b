//! Sleep — house-level sleep tracking with short transition phases and an
//! optional lock.
//!
//! The `pre_sleeping`/`post_sleeping` phases give other rules a moment to
//! react (dim lights, lock motion sensors) before the steady state is
//! reached. A lock request keeps the house from re-entering sleep, applied
//! as soon as `post_sleeping` finishes.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::machine::{DefinitionError, Machine, MachineBuilder, MachineDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SleepState {
    Awake,
    PreSleeping,
    Sleeping,
    PostSleeping,
    Locked,
}

impl SleepState {
    /// Whether the sleeping output switch should be on.
    #[must_use]
    pub fn is_sleeping(self) -> bool {
        matches!(self, Self::PreSleeping | Self::Sleeping)
    }

    /// Whether the lock output switch should be on.
    #[must_use]
    pub fn is_locked(self) -> bool {
        matches!(self, Self::Locked)
    }
}

impl fmt::Display for SleepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Awake => f.write_str("awake"),
            Self::PreSleeping => f.write_str("pre_sleeping"),
            Self::Sleeping => f.write_str("sleeping"),
            Self::PostSleeping => f.write_str("post_sleeping"),
            Self::Locked => f.write_str("locked"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepTrigger {
    /// The sleep switch was turned on.
    SleepRequested,
    /// The sleep switch was turned off.
    WakeRequested,
    PreSleepTimedOut,
    PostSleepTimedOut,
    /// The lock switch was turned on while awake.
    LockRequested,
    /// The lock switch was turned off.
    UnlockRequested,
}

impl fmt::Display for SleepTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SleepRequested => "sleep_requested",
            Self::WakeRequested => "wake_requested",
            Self::PreSleepTimedOut => "pre_sleep_timed_out",
            Self::PostSleepTimedOut => "post_sleep_timed_out",
            Self::LockRequested => "lock_requested",
            Self::UnlockRequested => "unlock_requested",
        };
        f.write_str(name)
    }
}

/// Guard context: whether a lock is being requested right now.
#[derive(Debug, Clone, Copy, Default)]
pub struct SleepContext {
    pub lock_requested: bool,
}

fn lock_requested(ctx: &SleepContext) -> bool {
    ctx.lock_requested
}

fn default_transition_timeout() -> u64 {
    3
}

/// Timing settings, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepSettings {
    #[serde(default = "default_transition_timeout")]
    pub pre_sleep_timeout: u64,
    #[serde(default = "default_transition_timeout")]
    pub post_sleep_timeout: u64,
}

impl Default for SleepSettings {
    fn default() -> Self {
        Self {
            pre_sleep_timeout: default_transition_timeout(),
            post_sleep_timeout: default_transition_timeout(),
        }
    }
}

impl SleepSettings {
    pub fn configure_timeouts(&self, machine: &mut Machine<SleepState, SleepTrigger, SleepContext>) {
        machine.set_timeout(
            SleepState::PreSleeping,
            Some(Duration::from_secs(self.pre_sleep_timeout)),
        );
        machine.set_timeout(
            SleepState::PostSleeping,
            Some(Duration::from_secs(self.post_sleep_timeout)),
        );
    }
}

/// Build the sleep state graph.
///
/// # Errors
///
/// Returns a [`DefinitionError`] only if the graph itself is inconsistent,
/// which would be a bug in this module.
pub fn sleep_graph() -> Result<MachineDef<SleepState, SleepTrigger, SleepContext>, DefinitionError>
{
    let mut builder = MachineBuilder::new(SleepState::Awake);
    builder.state(SleepState::Awake);
    builder.state_with_timeout(
        SleepState::PreSleeping,
        Duration::ZERO,
        SleepTrigger::PreSleepTimedOut,
    );
    builder.state(SleepState::Sleeping);
    builder.state_with_timeout(
        SleepState::PostSleeping,
        Duration::ZERO,
        SleepTrigger::PostSleepTimedOut,
    );
    builder.state(SleepState::Locked);

    builder.transition(
        SleepTrigger::SleepRequested,
        [SleepState::Awake],
        SleepState::PreSleeping,
    );
    builder.transition(
        SleepTrigger::PreSleepTimedOut,
        [SleepState::PreSleeping],
        SleepState::Sleeping,
    );
    builder.transition(
        SleepTrigger::WakeRequested,
        [SleepState::PreSleeping, SleepState::Sleeping],
        SleepState::PostSleeping,
    );
    builder
        .transition(
            SleepTrigger::PostSleepTimedOut,
            [SleepState::PostSleeping],
            SleepState::Locked,
        )
        .when(lock_requested);
    builder
        .transition(
            SleepTrigger::PostSleepTimedOut,
            [SleepState::PostSleeping],
            SleepState::Awake,
        )
        .unless(lock_requested);
    builder.transition(
        SleepTrigger::LockRequested,
        [SleepState::Awake],
        SleepState::Locked,
    );
    builder.transition(
        SleepTrigger::UnlockRequested,
        [SleepState::Locked],
        SleepState::Awake,
    );

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> Machine<SleepState, SleepTrigger, SleepContext> {
        let mut machine = Machine::new(sleep_graph().unwrap());
        SleepSettings::default().configure_timeouts(&mut machine);
        machine
    }

    #[test]
    fn should_walk_full_sleep_cycle() {
        let mut machine = machine();
        let ctx = SleepContext::default();

        machine.fire(SleepTrigger::SleepRequested, &ctx);
        assert_eq!(machine.current(), SleepState::PreSleeping);
        assert!(machine.current().is_sleeping());
        assert_eq!(
            machine.active_timeout().map(|t| t.after),
            Some(Duration::from_secs(3))
        );

        machine.fire(SleepTrigger::PreSleepTimedOut, &ctx);
        assert_eq!(machine.current(), SleepState::Sleeping);

        machine.fire(SleepTrigger::WakeRequested, &ctx);
        assert_eq!(machine.current(), SleepState::PostSleeping);
        assert!(!machine.current().is_sleeping());

        machine.fire(SleepTrigger::PostSleepTimedOut, &ctx);
        assert_eq!(machine.current(), SleepState::Awake);
    }

    #[test]
    fn should_abort_pre_sleeping_when_switch_turns_off() {
        let mut machine = machine();
        machine.fire(SleepTrigger::SleepRequested, &SleepContext::default());
        machine.fire(SleepTrigger::WakeRequested, &SleepContext::default());
        assert_eq!(machine.current(), SleepState::PostSleeping);
    }

    #[test]
    fn should_lock_after_post_sleeping_when_lock_requested() {
        let mut machine = machine();
        machine.restore(SleepState::PostSleeping);
        machine.fire(
            SleepTrigger::PostSleepTimedOut,
            &SleepContext {
                lock_requested: true,
            },
        );
        assert_eq!(machine.current(), SleepState::Locked);
        assert!(machine.current().is_locked());
    }

    #[test]
    fn should_refuse_sleep_while_locked() {
        let mut machine = machine();
        machine.restore(SleepState::Locked);
        let fired = machine.fire(SleepTrigger::SleepRequested, &SleepContext::default());
        assert!(!fired.did_transition());
        assert_eq!(machine.current(), SleepState::Locked);
    }

    #[test]
    fn should_unlock_back_to_awake() {
        let mut machine = machine();
        machine.fire(
            SleepTrigger::LockRequested,
            &SleepContext {
                lock_requested: true,
            },
        );
        assert_eq!(machine.current(), SleepState::Locked);

        machine.fire(SleepTrigger::UnlockRequested, &SleepContext::default());
        assert_eq!(machine.current(), SleepState::Awake);
    }
}
