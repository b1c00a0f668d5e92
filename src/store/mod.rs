//! Access to the shared data store.
//!
//! The relay owns exactly one kind of row, the lease. Everything else is
//! read as a committed snapshot and never written.

pub mod postgres;
pub mod schema;
pub mod sqlite;

use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Build, Job, JobState, Project};

pub use postgres::{PgConnectConfig, PgStore};
pub use sqlite::SqliteStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub resource_name: String,
    pub holder_id: String,
    /// When the current holder took the lease over.
    pub acquired_at_ms: i64,
    /// Last successful renewal by the current holder.
    pub renewed_at_ms: i64,
}

impl Lease {
    pub fn is_live(&self, now_ms: i64, ttl_ms: i64) -> bool {
        self.renewed_at_ms > now_ms.saturating_sub(ttl_ms)
    }
}

#[allow(async_fn_in_trait)]
pub trait LeaseStore {
    /// Atomically claims or renews `resource` for `holder`.
    ///
    /// Succeeds when no row exists, when the row already belongs to
    /// `holder`, or when its last renewal is older than `stale_before_ms`.
    /// Must be a single conditional write, never read-then-write.
    async fn try_claim_lease(
        &self,
        resource: &str,
        holder: &str,
        now_ms: i64,
        stale_before_ms: i64,
    ) -> Result<bool, StoreError>;

    async fn read_lease(&self, resource: &str) -> Result<Option<Lease>, StoreError>;
}

#[allow(async_fn_in_trait)]
pub trait BuildStore {
    async fn job(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    async fn project(&self, id: Uuid) -> Result<Option<Project>, StoreError>;

    async fn build(&self, id: Uuid) -> Result<Option<Build>, StoreError>;

    /// Job states present in a build with their counts. Order is
    /// unspecified.
    async fn job_state_counts(&self, build_id: Uuid) -> Result<Vec<(JobState, u64)>, StoreError>;
}

/// Notifications that persist after delivery.
#[allow(async_fn_in_trait)]
pub trait Outbox {
    /// Deletes notifications created before `older_than_ms`. Stores whose
    /// notifications are not persisted report zero.
    async fn prune_notifications(&self, older_than_ms: i64) -> Result<usize, StoreError>;
}
