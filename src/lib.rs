//! Leader-elected relay from job state changes to code-review votes.
//!
//! Replicas contend for a lease row in the shared store, listen for job
//! notifications, fold each affected build's job states into a verdict and,
//! while holding the lease, publish that verdict as a review label.

pub mod aggregate;
pub mod clock;
pub mod config;
pub mod context;
pub mod election;
pub mod error;
pub mod feed;
pub mod model;
pub mod publish;
pub mod retry;
pub mod store;
pub mod supervisor;

pub use aggregate::{StateAggregator, StructuralJobRule};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RelayConfig;
pub use context::LogContext;
pub use election::{ElectionConfig, LeaderElector};
pub use error::{Error, Result};
pub use feed::{ChangeFeed, MemoryChangeFeed, PgChangeFeed, SqliteChangeFeed};
pub use model::{Build, ChangeEvent, ChangeKind, Job, JobState, Project, ProjectKind, Verdict};
pub use publish::{ReviewCommand, ReviewTransport, SshTransport, VotePublisher};
pub use retry::{retry, RetryPolicy};
pub use store::{PgStore, SqliteStore};
pub use supervisor::{EventOutcome, Supervisor, SupervisorOptions};
