use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use vote_relay::election::LeaderElector;
use vote_relay::feed::PgChangeFeed;
use vote_relay::publish::{SshConfig, SshTransport, VotePublisher};
use vote_relay::store::{PgConnectConfig, PgStore};
use vote_relay::{LogContext, RelayConfig, Supervisor, SupervisorOptions, SystemClock};

#[derive(Parser, Debug)]
#[command(name = "vote-relay")]
#[command(about = "Publish build verdicts as review votes while holding the relay lease")]
struct Args {
    /// Service name, used as the holder id prefix
    #[arg(long, env = "INFRABOX_SERVICE")]
    service: String,

    /// Service version, logged at startup
    #[arg(long = "service-version", env = "INFRABOX_VERSION")]
    service_version: String,

    #[arg(long, env = "INFRABOX_DATABASE_HOST")]
    database_host: String,

    #[arg(long, env = "INFRABOX_DATABASE_PORT")]
    database_port: u16,

    #[arg(long, env = "INFRABOX_DATABASE_USER")]
    database_user: String,

    #[arg(long, env = "INFRABOX_DATABASE_PASSWORD", hide_env_values = true)]
    database_password: String,

    /// Database every replica connects to
    #[arg(long, env = "INFRABOX_DATABASE_DB")]
    database_db: String,

    /// Pooled connections, including the one held by the listener
    #[arg(long, default_value_t = 4)]
    database_max_connections: u32,

    #[arg(long, env = "INFRABOX_GERRIT_HOSTNAME")]
    gerrit_hostname: String,

    #[arg(long, env = "INFRABOX_GERRIT_PORT")]
    gerrit_port: u16,

    #[arg(long, env = "INFRABOX_GERRIT_USERNAME")]
    gerrit_username: String,

    /// Private key used for the review connection
    #[arg(long, env = "INFRABOX_GERRIT_KEY_FILENAME")]
    gerrit_key_filename: PathBuf,

    /// Externally reachable dashboard base URL
    #[arg(long, env = "INFRABOX_ROOT_URL")]
    root_url: String,

    /// Lease name; one per deployment of the relay
    #[arg(long, default_value = vote_relay::config::DEFAULT_LEASE_NAME)]
    lease_name: String,

    /// Explicit holder id (default: <service>-<random uuid>)
    #[arg(long, env = "VOTE_RELAY_HOLDER_ID")]
    holder_id: Option<String>,

    /// Notification channel carrying job updates
    #[arg(long, default_value = vote_relay::store::schema::JOB_UPDATE_CHANNEL)]
    channel: String,

    /// Longest wait on the feed per loop iteration, in seconds
    #[arg(long, default_value_t = 5)]
    wait_timeout_secs: u64,

    /// Interval between lease renewals, in seconds
    #[arg(long, default_value_t = 5)]
    renew_interval_secs: u64,

    /// Lease expiry window, in seconds
    #[arg(long, default_value_t = 25)]
    lease_ttl_secs: u64,

    /// Review label to vote on
    #[arg(long, default_value = vote_relay::config::DEFAULT_REVIEW_LABEL)]
    review_label: String,

    /// Attempts per vote before it is dropped
    #[arg(long, default_value_t = 3)]
    publish_attempts: u32,

    /// Job names that fan out a build's job graph (comma-separated)
    #[arg(long, value_delimiter = ',', default_value = "Create Jobs")]
    structural_jobs: Vec<String>,

    /// Directory for the SSH control socket
    #[arg(long)]
    ssh_control_dir: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> RelayConfig {
        let mut ssh = SshConfig::new(
            self.gerrit_hostname,
            self.gerrit_port,
            self.gerrit_username,
            self.gerrit_key_filename,
        );
        if let Some(dir) = self.ssh_control_dir {
            ssh.control_dir = dir;
        }

        let mut database = PgConnectConfig::new(
            self.database_host,
            self.database_port,
            self.database_user,
            self.database_password,
            self.database_db,
        );
        database.max_connections = self.database_max_connections;

        let mut config = RelayConfig::new(self.service, database, ssh, self.root_url);
        config.service_version = self.service_version;
        if let Some(holder_id) = self.holder_id {
            config.holder_id = holder_id;
        }
        config.lease_name = self.lease_name;
        config.channel = self.channel;
        config.wait_timeout = Duration::from_secs(self.wait_timeout_secs);
        config.renew_interval = Duration::from_secs(self.renew_interval_secs);
        config.lease_ttl = Duration::from_secs(self.lease_ttl_secs);
        config.review_label = self.review_label;
        config.publish_attempts = self.publish_attempts;
        config.structural_jobs = self.structural_jobs;
        config
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = args.into_config();
    config.validate().context("invalid configuration")?;
    let dashboard = config.dashboard()?;

    let log = LogContext::new("relay").with("service", &config.service);
    info!(
        "{}: starting version {} as {}",
        log, config.service_version, config.holder_id
    );

    let target = format!(
        "{}:{}/{}",
        config.database.host, config.database.port, config.database.database
    );
    let store = PgStore::connect(&config.database)
        .await
        .with_context(|| format!("connect to database {target}"))?;
    info!("{}: connected to database {}", log, target);

    let feed = PgChangeFeed::connect(store.pool(), &log)
        .await
        .with_context(|| format!("open listener on {target}"))?;
    let elector = LeaderElector::new(config.election(), SystemClock, &log);
    let transport = SshTransport::new(config.ssh.clone(), &log);
    let publisher = VotePublisher::new(
        transport,
        dashboard,
        config.review_label.clone(),
        config.retry_policy(),
        &log,
    );
    let options = SupervisorOptions {
        channel: config.channel.clone(),
        wait_timeout: config.wait_timeout,
        notification_retention: None,
        structural_rule: config.structural_rule(),
    };

    let mut supervisor = Supervisor::new(store, feed, elector, publisher, SystemClock, options, &log);
    supervisor.run().await.context("change feed stopped")?;
    Ok(())
}
