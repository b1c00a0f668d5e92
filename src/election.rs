//! Lease-based leader election over the shared store.
//!
//! A single row per resource name decides which replica may publish.
//! There is no consensus protocol: failover takes up to one lease TTL,
//! in exchange for needing nothing beyond the store every replica
//! already talks to.

use std::time::Duration;

use log::{info, warn};

use crate::clock::Clock;
use crate::context::LogContext;
use crate::store::LeaseStore;

#[derive(Debug, Clone)]
pub struct ElectionConfig {
    pub resource_name: String,
    pub holder_id: String,
    /// A lease not renewed within this window may be taken over.
    pub lease_ttl: Duration,
    /// Must be strictly shorter than `lease_ttl`.
    ///
    /// A follower also retries as soon as the lease it last saw expires,
    /// so a silent leader is replaced within `lease_ttl` of its last
    /// renewal, plus however late the caller polls `renew_if_due`.
    pub renew_interval: Duration,
}

impl ElectionConfig {
    pub fn new(resource_name: impl Into<String>, holder_id: impl Into<String>) -> Self {
        Self {
            resource_name: resource_name.into(),
            holder_id: holder_id.into(),
            lease_ttl: Duration::from_secs(25),
            renew_interval: Duration::from_secs(5),
        }
    }
}

pub struct LeaderElector<C: Clock> {
    config: ElectionConfig,
    clock: C,
    log: LogContext,
    last_attempt_ns: Option<u64>,
    holding: bool,
    /// First instant at which the lease held by someone else is claimable.
    claimable_at_ms: Option<i64>,
}

impl<C: Clock> LeaderElector<C> {
    pub fn new(config: ElectionConfig, clock: C, log: &LogContext) -> Self {
        let log = log
            .for_component("election")
            .with("resource", &config.resource_name)
            .with("holder", &config.holder_id);
        Self {
            config,
            clock,
            log,
            last_attempt_ns: None,
            holding: false,
            claimable_at_ms: None,
        }
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// Claims or renews the lease. Store failures count as "not leader".
    pub async fn acquire_or_renew<S: LeaseStore>(&mut self, store: &S) -> bool {
        let now_ns = self.clock.now();
        self.last_attempt_ns = Some(now_ns);
        let now_ms = (now_ns / 1_000_000) as i64;
        let ttl_ms = ttl_ms(&self.config);
        let stale_before_ms = now_ms.saturating_sub(ttl_ms);

        let held = match store
            .try_claim_lease(
                &self.config.resource_name,
                &self.config.holder_id,
                now_ms,
                stale_before_ms,
            )
            .await
        {
            Ok(held) => held,
            Err(err) => {
                warn!("{}: lease claim failed, treating as follower: {}", self.log, err);
                false
            }
        };

        self.claimable_at_ms = None;
        if !held {
            match store.read_lease(&self.config.resource_name).await {
                // A claim succeeds once renewed_at < now - ttl.
                Ok(Some(lease)) => {
                    self.claimable_at_ms =
                        Some(lease.renewed_at_ms.saturating_add(ttl_ms).saturating_add(1));
                }
                Ok(None) => {}
                Err(err) => warn!("{}: lease read failed: {}", self.log, err),
            }
        }

        if held != self.holding {
            if held {
                info!("{}: became leader", self.log);
            } else {
                info!("{}: lost leadership", self.log);
            }
        }
        self.holding = held;
        held
    }

    /// Time until the next claim attempt is due. Zero when one is due now.
    pub fn next_attempt_in(&self) -> Duration {
        let Some(last) = self.last_attempt_ns else {
            return Duration::ZERO;
        };
        let mut due_ns = last.saturating_add(self.config.renew_interval.as_nanos() as u64);
        if let Some(claimable_at_ms) = self.claimable_at_ms {
            let claimable_ns = (claimable_at_ms.max(0) as u64).saturating_mul(1_000_000);
            due_ns = due_ns.min(claimable_ns);
        }
        Duration::from_nanos(due_ns.saturating_sub(self.clock.now()))
    }

    /// Claims only when an attempt is due: the renewal interval has passed
    /// since the last attempt, or the lease last seen held by another
    /// replica has expired. Returns `Some(held)` when an attempt was made.
    pub async fn renew_if_due<S: LeaseStore>(&mut self, store: &S) -> Option<bool> {
        if self.next_attempt_in().is_zero() {
            Some(self.acquire_or_renew(store).await)
        } else {
            None
        }
    }

    /// Reads the lease row and checks it names us and is unexpired.
    /// Performs no write.
    pub async fn is_leader<S: LeaseStore>(&self, store: &S) -> bool {
        match store.read_lease(&self.config.resource_name).await {
            Ok(Some(lease)) => {
                lease.holder_id == self.config.holder_id
                    && lease.is_live(self.clock.now_ms(), ttl_ms(&self.config))
            }
            Ok(None) => false,
            Err(err) => {
                warn!("{}: lease read failed: {}", self.log, err);
                false
            }
        }
    }

    /// Outcome of the most recent claim attempt, without touching the store.
    pub fn believes_leader(&self) -> bool {
        self.holding
    }
}

fn ttl_ms(config: &ElectionConfig) -> i64 {
    config.lease_ttl.as_millis().min(i64::MAX as u128) as i64
}
