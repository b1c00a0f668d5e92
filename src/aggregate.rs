//! Folding a build's job states into one review verdict.
//!
//! The verdict is always recomputed from the current snapshot, never from
//! the event that triggered it, so re-delivered or reordered events yield
//! the same answer for the same store contents.

use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Build, Job, JobState, Project, Verdict};
use crate::store::BuildStore;

/// Names the jobs that fan out the rest of a build's job graph.
///
/// A build stays `pending` for as long as that graph is being expanded;
/// when one of these jobs triggers the evaluation, the pending verdict is
/// published instead of being held until a terminal one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralJobRule {
    names: Vec<String>,
}

impl StructuralJobRule {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, job_name: &str) -> bool {
        self.names.iter().any(|name| name == job_name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Default for StructuralJobRule {
    fn default() -> Self {
        Self::new(["Create Jobs"])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    JobMissing,
    JobInProgress,
    ProjectMissing,
    ProjectNotReviewed,
    BuildMissing,
    EmptyBuild,
}

/// A computed verdict together with the rows it was computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub verdict: Verdict,
    pub trigger: Job,
    pub build: Build,
    pub project: Project,
    /// Whether the triggering job is a graph-generation step.
    pub structural_trigger: bool,
}

impl Assessment {
    /// The verdict to publish, if any. Pending is only reported when the
    /// generation step itself triggered the evaluation.
    pub fn publishable(&self) -> Option<Verdict> {
        match self.verdict {
            Verdict::Approve | Verdict::Reject => Some(self.verdict),
            Verdict::Pending if self.structural_trigger => Some(Verdict::Pending),
            Verdict::Pending | Verdict::NoOp => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Skipped(SkipReason),
    Assessed(Assessment),
}

impl Evaluation {
    pub fn verdict(&self) -> Verdict {
        match self {
            Evaluation::Skipped(_) => Verdict::NoOp,
            Evaluation::Assessed(assessment) => assessment.verdict,
        }
    }
}

pub struct StateAggregator<'a, S> {
    store: &'a S,
    rule: &'a StructuralJobRule,
}

impl<'a, S: BuildStore> StateAggregator<'a, S> {
    pub fn new(store: &'a S, rule: &'a StructuralJobRule) -> Self {
        Self { store, rule }
    }

    /// Verdict for the build owning `job_id`.
    pub async fn compute_verdict(&self, job_id: Uuid) -> Result<Verdict, StoreError> {
        Ok(self.evaluate(job_id).await?.verdict())
    }

    pub async fn evaluate(&self, job_id: Uuid) -> Result<Evaluation, StoreError> {
        let Some(trigger) = self.store.job(job_id).await? else {
            return Ok(Evaluation::Skipped(SkipReason::JobMissing));
        };
        if trigger.state.is_in_progress() {
            return Ok(Evaluation::Skipped(SkipReason::JobInProgress));
        }

        let Some(project) = self.store.project(trigger.project_id).await? else {
            return Ok(Evaluation::Skipped(SkipReason::ProjectMissing));
        };
        if !project.kind.is_code_reviewed() {
            return Ok(Evaluation::Skipped(SkipReason::ProjectNotReviewed));
        }

        let Some(build) = self.store.build(trigger.build_id).await? else {
            return Ok(Evaluation::Skipped(SkipReason::BuildMissing));
        };

        let counts = self.store.job_state_counts(build.id).await?;
        let states = counts
            .iter()
            .filter(|(_, count)| *count > 0)
            .map(|(state, _)| state);
        let Some(verdict) = fold_states(states) else {
            return Ok(Evaluation::Skipped(SkipReason::EmptyBuild));
        };

        let structural_trigger = self.rule.matches(&trigger.name);
        Ok(Evaluation::Assessed(Assessment {
            verdict,
            trigger,
            build,
            project,
            structural_trigger,
        }))
    }
}

/// Folds the distinct job states of a build. `None` for an empty build.
///
/// Any state that is neither finished nor in progress rejects the build,
/// regardless of what else is still running; otherwise any in-progress
/// state keeps it pending.
pub fn fold_states<'s, I>(states: I) -> Option<Verdict>
where
    I: IntoIterator<Item = &'s JobState>,
{
    let mut seen = false;
    let mut in_progress = false;
    for state in states {
        seen = true;
        if state.is_in_progress() {
            in_progress = true;
        } else if !state.is_finished() {
            return Some(Verdict::Reject);
        }
    }
    match (seen, in_progress) {
        (false, _) => None,
        (true, true) => Some(Verdict::Pending),
        (true, false) => Some(Verdict::Approve),
    }
}
