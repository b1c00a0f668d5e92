//! The relay's main loop.
//!
//! Every replica runs the whole loop: wait on the feed, keep the lease
//! fresh, recompute verdicts. Only the replica holding the lease at the
//! moment of publishing sends a vote, so failover needs no handover.

use std::time::Duration;

use log::{debug, error, info, warn};

use crate::aggregate::{Evaluation, SkipReason, StateAggregator, StructuralJobRule};
use crate::clock::Clock;
use crate::context::LogContext;
use crate::election::LeaderElector;
use crate::error::FeedError;
use crate::feed::ChangeFeed;
use crate::model::{ChangeEvent, ChangeKind, Verdict};
use crate::publish::{ReviewTransport, VotePublisher};
use crate::store::{BuildStore, LeaseStore, Outbox};

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub channel: String,
    pub wait_timeout: Duration,
    /// Outbox rows older than this are pruned by the leader. `None`
    /// disables pruning.
    pub notification_retention: Option<Duration>,
    pub structural_rule: StructuralJobRule,
}

/// What happened to one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Not an update; nothing was read.
    Ignored(ChangeKind),
    Skipped(SkipReason),
    /// A verdict was computed but is not one that gets published.
    Held(Verdict),
    /// Publishable, but another replica holds the lease.
    Follower(Verdict),
    Published(Verdict),
    /// Every publish attempt failed; the vote was dropped.
    PublishFailed(Verdict),
    /// The snapshot could not be read.
    StoreFailed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Outcome of the latest lease claim attempted this tick, if any.
    pub renewed: Option<bool>,
    pub outcomes: Vec<EventOutcome>,
}

pub struct Supervisor<S, F, T, C: Clock> {
    store: S,
    feed: F,
    elector: LeaderElector<C>,
    publisher: VotePublisher<T>,
    clock: C,
    options: SupervisorOptions,
    subscribed: bool,
    log: LogContext,
}

impl<S, F, T, C> Supervisor<S, F, T, C>
where
    S: LeaseStore + BuildStore + Outbox,
    F: ChangeFeed,
    T: ReviewTransport,
    C: Clock + Clone,
{
    pub fn new(
        store: S,
        feed: F,
        elector: LeaderElector<C>,
        publisher: VotePublisher<T>,
        clock: C,
        options: SupervisorOptions,
        log: &LogContext,
    ) -> Self {
        let log = log
            .for_component("supervisor")
            .with("channel", &options.channel);
        Self {
            store,
            feed,
            elector,
            publisher,
            clock,
            options,
            subscribed: false,
            log,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn publisher(&self) -> &VotePublisher<T> {
        &self.publisher
    }

    pub fn elector(&self) -> &LeaderElector<C> {
        &self.elector
    }

    pub async fn subscribe(&mut self) -> Result<(), FeedError> {
        self.feed.subscribe(&self.options.channel).await?;
        self.subscribed = true;
        info!("{}: waiting for job updates", self.log);
        Ok(())
    }

    /// Runs until the feed closes. Transient store failures on the feed
    /// are logged and waited out.
    pub async fn run(&mut self) -> Result<(), FeedError> {
        if !self.subscribed {
            self.subscribe().await?;
        }
        loop {
            match self.tick().await {
                Ok(_) => {}
                Err(FeedError::Store(err)) => {
                    warn!("{}: feed read failed: {}", self.log, err);
                    tokio::time::sleep(self.options.wait_timeout).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One loop iteration: renew the lease if due, wait for notifications,
    /// handle each in delivery order. The lease is renewed again before
    /// any event that starts after a renewal came due, so a slow batch
    /// cannot outlive it.
    pub async fn tick(&mut self) -> Result<TickReport, FeedError> {
        let mut renewed = self.renew().await;

        // Wake no later than the next claim attempt.
        let wait = self.options.wait_timeout.min(self.elector.next_attempt_in());
        let events = self.feed.wait_and_drain(wait).await?;
        let mut outcomes = Vec::with_capacity(events.len());
        for event in &events {
            if let Some(held) = self.renew().await {
                renewed = Some(held);
            }
            outcomes.push(self.handle_event(event).await);
        }
        Ok(TickReport { renewed, outcomes })
    }

    async fn renew(&mut self) -> Option<bool> {
        let renewed = self.elector.renew_if_due(&self.store).await;
        if renewed == Some(true) {
            self.prune_outbox().await;
        }
        renewed
    }

    pub async fn handle_event(&self, event: &ChangeEvent) -> EventOutcome {
        let log = self.log.with("job_id", event.entity_id);
        if event.kind != ChangeKind::Update {
            debug!("{}: ignoring {} notification", log, event.kind);
            return EventOutcome::Ignored(event.kind);
        }

        let aggregator = StateAggregator::new(&self.store, &self.options.structural_rule);
        let assessment = match aggregator.evaluate(event.entity_id).await {
            Ok(Evaluation::Assessed(assessment)) => assessment,
            Ok(Evaluation::Skipped(reason)) => {
                debug!("{}: no vote ({:?})", log, reason);
                return EventOutcome::Skipped(reason);
            }
            Err(err) => {
                warn!("{}: snapshot read failed: {}", log, err);
                return EventOutcome::StoreFailed;
            }
        };

        let log = log
            .with("build_id", assessment.build.id)
            .with("verdict", assessment.verdict);
        let Some(verdict) = assessment.publishable() else {
            debug!("{}: holding verdict until the build settles", log);
            return EventOutcome::Held(assessment.verdict);
        };

        // Leadership may have moved while the snapshot was read.
        if !self.elector.is_leader(&self.store).await {
            debug!("{}: not leader, leaving the vote to the lease holder", log);
            return EventOutcome::Follower(verdict);
        }

        match self
            .publisher
            .publish(verdict, &assessment.build, &assessment.project)
            .await
        {
            Ok(_) => EventOutcome::Published(verdict),
            Err(exhausted) => {
                error!("{}: vote dropped: {}", log, exhausted);
                EventOutcome::PublishFailed(verdict)
            }
        }
    }

    async fn prune_outbox(&self) {
        let Some(retention) = self.options.notification_retention else {
            return;
        };
        let cutoff = self
            .clock
            .now_ms()
            .saturating_sub(retention.as_millis().min(i64::MAX as u128) as i64);
        match self.store.prune_notifications(cutoff).await {
            Ok(0) => {}
            Ok(removed) => debug!("{}: pruned {} notifications", self.log, removed),
            Err(err) => warn!("{}: notification pruning failed: {}", self.log, err),
        }
    }
}
