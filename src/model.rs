//! Entities read by the relay and the values derived from them.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobState {
    Queued,
    Scheduled,
    Running,
    Finished,
    Failure,
    Error,
    Killed,
    Skipped,
    Unstable,
    Other(String),
}

impl JobState {
    /// States a job passes through before it has an outcome.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, JobState::Queued | JobState::Scheduled | JobState::Running)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Finished)
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobState::Queued => "queued",
            JobState::Scheduled => "scheduled",
            JobState::Running => "running",
            JobState::Finished => "finished",
            JobState::Failure => "failure",
            JobState::Error => "error",
            JobState::Killed => "killed",
            JobState::Skipped => "skipped",
            JobState::Unstable => "unstable",
            JobState::Other(raw) => raw,
        }
    }
}

impl From<&str> for JobState {
    fn from(raw: &str) -> Self {
        match raw {
            "queued" => JobState::Queued,
            "scheduled" => JobState::Scheduled,
            "running" => JobState::Running,
            "finished" => JobState::Finished,
            "failure" => JobState::Failure,
            "error" => JobState::Error,
            "killed" => JobState::Killed,
            "skipped" => JobState::Skipped,
            "unstable" => JobState::Unstable,
            other => JobState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: Uuid,
    pub build_id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub state: JobState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Build {
    pub id: Uuid,
    pub project_id: Uuid,
    pub build_number: i64,
    /// Bumped each time the same commit is rebuilt.
    pub restart_counter: i64,
    pub commit_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectKind {
    Gerrit,
    Github,
    Upload,
    Test,
    Other(String),
}

impl ProjectKind {
    /// Only projects reviewed through Gerrit receive votes.
    pub fn is_code_reviewed(&self) -> bool {
        matches!(self, ProjectKind::Gerrit)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProjectKind::Gerrit => "gerrit",
            ProjectKind::Github => "github",
            ProjectKind::Upload => "upload",
            ProjectKind::Test => "test",
            ProjectKind::Other(raw) => raw,
        }
    }
}

impl From<&str> for ProjectKind {
    fn from(raw: &str) -> Self {
        match raw {
            "gerrit" => ProjectKind::Gerrit,
            "github" => ProjectKind::Github,
            "upload" => ProjectKind::Upload,
            "test" => ProjectKind::Test,
            other => ProjectKind::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub kind: ProjectKind,
}

/// Aggregate outcome of a build, as a review vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Approve,
    Pending,
    Reject,
    NoOp,
}

impl Verdict {
    /// Label value sent to the review system, `None` for `NoOp`.
    pub fn vote(self) -> Option<i8> {
        match self {
            Verdict::Approve => Some(1),
            Verdict::Pending => Some(0),
            Verdict::Reject => Some(-1),
            Verdict::NoOp => None,
        }
    }

    pub fn vote_label(self) -> Option<&'static str> {
        match self {
            Verdict::Approve => Some("+1"),
            Verdict::Pending => Some("0"),
            Verdict::Reject => Some("-1"),
            Verdict::NoOp => None,
        }
    }

    pub fn summary(self) -> &'static str {
        match self {
            Verdict::Approve => "Build finished",
            Verdict::Pending => "Build running",
            Verdict::Reject => "Build failed",
            Verdict::NoOp => "No vote",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verdict::Approve => "approve",
            Verdict::Pending => "pending",
            Verdict::Reject => "reject",
            Verdict::NoOp => "no-op",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl FromStr for ChangeKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "CREATE" => Ok(ChangeKind::Create),
            "UPDATE" => Ok(ChangeKind::Update),
            "DELETE" => Ok(ChangeKind::Delete),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Create => "CREATE",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A decoded notification. Carries only the identity of the mutated
/// entity; current state is always re-read from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub entity_id: Uuid,
    pub raw_payload: Value,
}
