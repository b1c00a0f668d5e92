//! Turning a verdict into a review vote on the remote review system.

pub mod ssh;

use std::borrow::Cow;

use log::info;
use url::form_urlencoded;
use url::Url;

use crate::context::LogContext;
use crate::error::PublishError;
use crate::model::{Build, Project, Verdict};
use crate::retry::{retry, Exhausted, RetryPolicy};

pub use ssh::{SshConfig, SshTransport};

/// A single `gerrit review` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewCommand {
    pub project: String,
    pub commit: String,
    pub label: String,
    pub vote: &'static str,
    pub message: String,
}

impl ReviewCommand {
    /// Renders the command line run on the remote side. Every argument is
    /// quoted, so project names and messages cannot break out of it.
    pub fn to_remote_command(&self) -> String {
        let label = format!("{}={}", self.label, self.vote);
        format!(
            "gerrit review --project {} -m {} --label {} {}",
            quote(&self.project),
            quote(&self.message),
            quote(&label),
            quote(&self.commit),
        )
    }
}

fn quote(value: &str) -> String {
    shell_escape::escape(Cow::Borrowed(value)).into_owned()
}

/// Executes review commands against the remote endpoint.
///
/// Running the same command twice must leave the same vote in place; the
/// review system overwrites a label on the same commit.
#[allow(async_fn_in_trait)]
pub trait ReviewTransport {
    async fn execute(&self, command: &ReviewCommand) -> Result<(), PublishError>;
}

/// Dashboard link for a build. The project name is form-encoded with
/// spaces as `%20`.
pub fn build_url(dashboard: &Url, project: &Project, build: &Build) -> String {
    let encoded: String = form_urlencoded::byte_serialize(project.name.as_bytes())
        .collect::<String>()
        .replace('+', "%20");
    format!(
        "{}/dashboard/#/project/{}/build/{}/{}",
        dashboard.as_str().trim_end_matches('/'),
        encoded,
        build.build_number,
        build.restart_counter
    )
}

pub struct VotePublisher<T> {
    transport: T,
    dashboard: Url,
    label: String,
    retry: RetryPolicy,
    log: LogContext,
}

impl<T: ReviewTransport> VotePublisher<T> {
    pub fn new(
        transport: T,
        dashboard: Url,
        label: impl Into<String>,
        retry: RetryPolicy,
        log: &LogContext,
    ) -> Self {
        Self {
            transport,
            dashboard,
            label: label.into(),
            retry,
            log: log.for_component("publish"),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The command for `verdict`, or `None` for `NoOp`.
    pub fn render(&self, verdict: Verdict, build: &Build, project: &Project) -> Option<ReviewCommand> {
        let vote = verdict.vote_label()?;
        let url = build_url(&self.dashboard, project, build);
        Some(ReviewCommand {
            project: project.name.clone(),
            commit: build.commit_id.clone(),
            label: self.label.clone(),
            vote,
            message: format!("{}: {}", verdict.summary(), url),
        })
    }

    /// Publishes `verdict` with retries. Returns whether a command was
    /// sent; a `NoOp` verdict sends nothing.
    pub async fn publish(
        &self,
        verdict: Verdict,
        build: &Build,
        project: &Project,
    ) -> Result<bool, Exhausted<PublishError>> {
        let Some(command) = self.render(verdict, build, project) else {
            return Ok(false);
        };
        let log = self
            .log
            .with("project", &project.name)
            .with("build", build.build_number)
            .with("commit", &build.commit_id)
            .with("vote", command.vote);

        info!("{}: setting {}={}", log, command.label, command.vote);
        let transport = &self.transport;
        let command = &command;
        retry(&self.retry, &log, |_| transport.execute(command)).await?;
        Ok(true)
    }
}
