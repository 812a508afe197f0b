//! The rule engine — one sequential loop over item events and timers.
//!
//! Rules never see the event stream directly: the engine routes each event
//! to the rules that subscribed to its item, and each expired timer to the
//! rule that armed it. Processing is strictly sequential, so a rule never
//! observes a half-applied change from another rule. A failing rule is
//! logged and skipped; it does not take the loop down.

use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, UnboundedReceiverStream};
use tokio_stream::StreamExt;

use rulehub_domain::event::{EventFilter, ItemEvent};
use rulehub_domain::item::ItemName;

use crate::ports::Platform;
use crate::rules::Rule;
use crate::timers::{RuleId, TimerFired, TimerService};

/// One input of the engine loop.
enum Input {
    Event(Result<ItemEvent, BroadcastStreamRecvError>),
    Timer(TimerFired),
}

/// Runs a set of rules against one platform.
pub struct RuleEngine<P> {
    platform: P,
    rules: Vec<Rule>,
    routes: HashMap<ItemName, Vec<(usize, EventFilter)>>,
    timers: TimerService,
    timer_rx: Option<UnboundedReceiver<TimerFired>>,
}

impl<P: Platform> RuleEngine<P> {
    #[must_use]
    pub fn new(platform: P) -> Self {
        let (timers, timer_rx) = TimerService::channel();
        Self {
            platform,
            rules: Vec::new(),
            routes: HashMap::new(),
            timers,
            timer_rx: Some(timer_rx),
        }
    }

    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    #[must_use]
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Initialize every rule and build the routing table.
    ///
    /// A rule that fails to initialize is logged and kept out of the
    /// routing table; the others still run.
    pub async fn init(&mut self) {
        for (index, rule) in self.rules.iter_mut().enumerate() {
            let id = RuleId(index);
            if let Err(error) = rule.init(&self.platform, &mut self.timers, id).await {
                tracing::error!(rule = rule.name(), %error, "rule failed to initialize");
                continue;
            }
            for subscription in rule.subscriptions() {
                self.routes
                    .entry(subscription.item)
                    .or_default()
                    .push((index, subscription.filter));
            }
            tracing::info!(rule = rule.name(), "rule initialized");
        }
    }

    /// Run the engine loop until the platform closes its event stream.
    ///
    /// Rule failures are logged, never propagated.
    pub async fn run(&mut self) {
        let Some(timer_rx) = self.timer_rx.take() else {
            tracing::warn!("engine loop already consumed, refusing to run twice");
            return;
        };
        let events = BroadcastStream::new(self.platform.subscribe()).map(Input::Event);
        let timers = UnboundedReceiverStream::new(timer_rx).map(Input::Timer);
        let mut inputs = events.merge(timers);

        tracing::info!(rules = self.rules.len(), "engine running");
        while let Some(input) = inputs.next().await {
            match input {
                Input::Event(Ok(event)) => self.process_event(&event).await,
                Input::Event(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "event stream lagged, dropping events");
                }
                Input::Timer(fired) => self.process_timer(&fired).await,
            }
        }
        tracing::info!("event stream closed, engine stopping");
    }

    /// Deliver one event to every rule subscribed to its item.
    pub async fn process_event(&mut self, event: &ItemEvent) {
        let Some(routes) = self.routes.get(&event.item) else {
            return;
        };
        // Routes are rebuilt only at init; clone to release the borrow.
        let routes = routes.clone();
        for (index, filter) in routes {
            if !filter.matches(&event.kind) {
                continue;
            }
            let rule = &mut self.rules[index];
            if let Err(error) = rule
                .handle_event(event, &self.platform, &mut self.timers, RuleId(index))
                .await
            {
                tracing::error!(rule = rule.name(), %error, "rule failed to handle event");
            }
        }
    }

    /// Deliver one expired timer to the rule that armed it.
    ///
    /// Deliveries from stale generations (re-armed or cancelled since) are
    /// dropped.
    pub async fn process_timer(&mut self, fired: &TimerFired) {
        if !self.timers.accepts(fired) {
            return;
        }
        let Some(rule) = self.rules.get_mut(fired.rule.0) else {
            return;
        };
        if let Err(error) = rule
            .handle_timer(fired.slot, &self.platform, &mut self.timers, fired.rule)
            .await
        {
            tracing::error!(rule = rule.name(), %error, "rule failed to handle timer");
        }
    }
}
