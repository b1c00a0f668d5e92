#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use rusqlite::params;
use tempfile::TempDir;
use url::Url;
use uuid::Uuid;

use vote_relay::error::PublishError;
use vote_relay::store::{schema, BuildStore, LeaseStore, Outbox, SqliteStore};
use vote_relay::{
    ChangeFeed, ElectionConfig, LeaderElector, LogContext, ManualClock, ReviewCommand,
    ReviewTransport, RetryPolicy, StructuralJobRule, Supervisor, SupervisorOptions, VotePublisher,
};

pub const DASHBOARD: &str = "https://ci.example.com";

/// A bootstrapped database file plus a connection for arranging rows.
pub struct Fixture {
    _dir: TempDir,
    pub path: PathBuf,
    pub store: SqliteStore,
}

impl Fixture {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("relay.db");
        let store = SqliteStore::open(&path)?;
        schema::bootstrap(store.connection())?;
        Ok(Self {
            _dir: dir,
            path,
            store,
        })
    }

    pub fn project(&self, name: &str, kind: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.store.connection().execute(
            "INSERT INTO project(id, name, type) VALUES (?1, ?2, ?3)",
            params![id.to_string(), name, kind],
        )?;
        Ok(id)
    }

    pub fn build(&self, project: Uuid, build_number: i64, commit: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.store.connection().execute(
            "INSERT INTO build(id, project_id, build_number, restart_counter, commit_id) VALUES (?1, ?2, ?3, 1, ?4)",
            params![id.to_string(), project.to_string(), build_number, commit],
        )?;
        Ok(id)
    }

    pub fn job(&self, project: Uuid, build: Uuid, name: &str, state: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.store.connection().execute(
            "INSERT INTO job(id, build_id, project_id, name, state) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id.to_string(), build.to_string(), project.to_string(), name, state],
        )?;
        Ok(id)
    }

    pub fn set_state(&self, job: Uuid, state: &str) -> Result<()> {
        self.store.connection().execute(
            "UPDATE job SET state = ?2 WHERE id = ?1",
            params![job.to_string(), state],
        )?;
        Ok(())
    }

    pub fn open_store(&self) -> Result<SqliteStore> {
        Ok(SqliteStore::open(&self.path)?)
    }
}

/// Records every command and keeps the last vote per (commit, label), the
/// way the review system overwrites a label.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<ReviewCommand>>>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<ReviewCommand> {
        self.sent.lock().unwrap().clone()
    }

    pub fn votes(&self) -> HashMap<(String, String), &'static str> {
        let mut votes = HashMap::new();
        for command in self.sent() {
            votes.insert((command.commit, command.label), command.vote);
        }
        votes
    }
}

impl ReviewTransport for RecordingTransport {
    async fn execute(&self, command: &ReviewCommand) -> Result<(), PublishError> {
        self.sent.lock().unwrap().push(command.clone());
        Ok(())
    }
}

/// An endpoint that never answers.
#[derive(Clone, Default)]
pub struct UnreachableTransport {
    attempts: Arc<Mutex<u32>>,
}

impl UnreachableTransport {
    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }
}

impl ReviewTransport for UnreachableTransport {
    async fn execute(&self, _command: &ReviewCommand) -> Result<(), PublishError> {
        *self.attempts.lock().unwrap() += 1;
        Err(PublishError::Remote {
            status: "exit status: 255".to_string(),
            stderr: "ssh: connect to host review.example.com port 29418: Connection refused"
                .to_string(),
        })
    }
}

pub fn elector(holder: &str, clock: &ManualClock) -> LeaderElector<ManualClock> {
    LeaderElector::new(
        ElectionConfig::new("gerrit-review", holder),
        clock.clone(),
        &LogContext::new("test"),
    )
}

pub fn supervisor<S, F, T>(
    store: S,
    feed: F,
    transport: T,
    holder: &str,
    clock: &ManualClock,
) -> Result<Supervisor<S, F, T, ManualClock>>
where
    S: LeaseStore + BuildStore + Outbox,
    F: ChangeFeed,
    T: ReviewTransport,
{
    let log = LogContext::new("test").with("holder", holder);
    let publisher = VotePublisher::new(
        transport,
        Url::parse(DASHBOARD)?,
        "InfraBox",
        RetryPolicy::immediate(3),
        &log,
    );
    let options = SupervisorOptions {
        channel: schema::JOB_UPDATE_CHANNEL.to_string(),
        wait_timeout: Duration::from_millis(200),
        notification_retention: None,
        structural_rule: StructuralJobRule::default(),
    };
    Ok(Supervisor::new(
        store,
        feed,
        elector(holder, clock),
        publisher,
        clock.clone(),
        options,
        &log,
    ))
}
