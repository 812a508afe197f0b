//! Timer service — one-shot countdowns feeding the engine queue.
//!
//! Rules never sleep; they arm a timer and get the expiry delivered through
//! the same queue as the platform events, so every mutation still happens
//! inside one sequentially dispatched input. Arming a slot replaces the
//! previous countdown: each slot carries a generation, and a fired timer
//! whose generation is no longer current is dropped by the engine.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;

/// Engine-assigned identity of a rule instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleId(pub usize);

/// Which countdown of a rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerSlot {
    /// The timeout of the current machine state.
    State,
    /// An auxiliary countdown (e.g. presence phone silence).
    Aux,
}

/// Delivered into the engine queue when a countdown expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub rule: RuleId,
    pub slot: TimerSlot,
    pub generation: u64,
}

/// Arms and cancels per-(rule, slot) one-shot timers.
pub struct TimerService {
    sender: mpsc::UnboundedSender<TimerFired>,
    generations: HashMap<(RuleId, TimerSlot), u64>,
}

impl TimerService {
    /// A service plus the receiving end the engine merges into its loop.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                generations: HashMap::new(),
            },
            receiver,
        )
    }

    /// Start (or restart) the countdown of `slot` for `rule`.
    pub fn arm(&mut self, rule: RuleId, slot: TimerSlot, after: Duration) {
        let generation = self.bump(rule, slot);
        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            // The engine may be gone during shutdown.
            let _ = sender.send(TimerFired {
                rule,
                slot,
                generation,
            });
        });
    }

    /// Invalidate any running countdown of `slot` for `rule`.
    ///
    /// The spawned sleep still completes, but its delivery no longer passes
    /// [`TimerService::accepts`].
    pub fn cancel(&mut self, rule: RuleId, slot: TimerSlot) {
        self.bump(rule, slot);
    }

    /// Whether `fired` belongs to the currently armed countdown.
    #[must_use]
    pub fn accepts(&self, fired: &TimerFired) -> bool {
        self.generations.get(&(fired.rule, fired.slot)) == Some(&fired.generation)
    }

    fn bump(&mut self, rule: RuleId, slot: TimerSlot) -> u64 {
        let generation = self.generations.entry((rule, slot)).or_insert(0);
        *generation += 1;
        *generation
    }
}
