use std::time::Duration;

use url::Url;

use crate::aggregate::StructuralJobRule;
use crate::election::ElectionConfig;
use crate::error::ConfigError;
use crate::publish::SshConfig;
use crate::retry::RetryPolicy;
use crate::store::PgConnectConfig;
use crate::store::schema::JOB_UPDATE_CHANNEL;

pub const DEFAULT_LEASE_NAME: &str = "gerrit-review";
pub const DEFAULT_REVIEW_LABEL: &str = "InfraBox";

/// Everything the relay needs to start. Built by the binary from the
/// environment and checked with [`RelayConfig::validate`] before any
/// connection is opened.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub service: String,
    pub service_version: String,
    pub database: PgConnectConfig,
    pub holder_id: String,
    pub lease_name: String,
    pub channel: String,
    pub wait_timeout: Duration,
    pub lease_ttl: Duration,
    pub renew_interval: Duration,
    pub ssh: SshConfig,
    pub dashboard_url: String,
    pub review_label: String,
    pub publish_attempts: u32,
    pub structural_jobs: Vec<String>,
}

impl RelayConfig {
    /// Defaults for everything but the required settings.
    pub fn new(
        service: impl Into<String>,
        database: PgConnectConfig,
        ssh: SshConfig,
        dashboard_url: impl Into<String>,
    ) -> Self {
        let service = service.into();
        let holder_id = format!("{}-{}", service, uuid::Uuid::new_v4());
        Self {
            service,
            service_version: "unknown".to_string(),
            database,
            holder_id,
            lease_name: DEFAULT_LEASE_NAME.to_string(),
            channel: JOB_UPDATE_CHANNEL.to_string(),
            wait_timeout: Duration::from_secs(5),
            lease_ttl: Duration::from_secs(25),
            renew_interval: Duration::from_secs(5),
            ssh,
            dashboard_url: dashboard_url.into(),
            review_label: DEFAULT_REVIEW_LABEL.to_string(),
            publish_attempts: 3,
            structural_jobs: vec!["Create Jobs".to_string()],
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require("service", &self.service)?;
        require("database.host", &self.database.host)?;
        require("database.user", &self.database.user)?;
        require("database.database", &self.database.database)?;
        require("holder_id", &self.holder_id)?;
        require("lease_name", &self.lease_name)?;
        require("channel", &self.channel)?;
        require("ssh.hostname", &self.ssh.hostname)?;
        require("ssh.username", &self.ssh.username)?;
        require("ssh.key_file", &self.ssh.key_file.to_string_lossy())?;
        require("review_label", &self.review_label)?;
        require("dashboard_url", &self.dashboard_url)?;

        if self.database.port == 0 {
            return Err(invalid("database.port", "must be between 1 and 65535"));
        }
        if self.database.max_connections < 2 {
            return Err(invalid(
                "database.max_connections",
                "must be at least 2, one is held by the listener",
            ));
        }
        if self.ssh.port == 0 {
            return Err(invalid("ssh.port", "must be between 1 and 65535"));
        }
        self.dashboard()?;
        if self.renew_interval.is_zero() {
            return Err(invalid("renew_interval", "must be positive"));
        }
        if self.renew_interval >= self.lease_ttl {
            return Err(invalid(
                "renew_interval",
                format!(
                    "{:?} must be shorter than lease_ttl {:?}",
                    self.renew_interval, self.lease_ttl
                ),
            ));
        }
        if self.wait_timeout > self.renew_interval {
            return Err(invalid(
                "wait_timeout",
                format!(
                    "{:?} must not exceed renew_interval {:?}",
                    self.wait_timeout, self.renew_interval
                ),
            ));
        }
        if self.publish_attempts == 0 {
            return Err(invalid("publish_attempts", "must be at least 1"));
        }
        Ok(())
    }

    pub fn dashboard(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.dashboard_url)
            .map_err(|err| invalid("dashboard_url", err.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("dashboard_url", "scheme must be http or https"));
        }
        Ok(url)
    }

    pub fn election(&self) -> ElectionConfig {
        ElectionConfig {
            resource_name: self.lease_name.clone(),
            holder_id: self.holder_id.clone(),
            lease_ttl: self.lease_ttl,
            renew_interval: self.renew_interval,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::immediate(self.publish_attempts)
    }

    pub fn structural_rule(&self) -> StructuralJobRule {
        StructuralJobRule::new(self.structural_jobs.iter().map(|name| name.trim().to_string()))
    }
}

fn require(name: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing(name));
    }
    Ok(())
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RelayConfig {
        RelayConfig::new(
            "gerrit-review",
            PgConnectConfig::new("db.internal", 5432, "infrabox", "secret", "infrabox"),
            SshConfig::new("review.example.com", 29418, "relay", "/keys/id_rsa"),
            "https://ci.example.com",
        )
    }

    #[test]
    fn defaults_validate() {
        let config = config();
        config.validate().unwrap();
        assert!(config.holder_id.starts_with("gerrit-review-"));
        assert_eq!(config.lease_ttl, config.renew_interval * 5);
    }

    #[test]
    fn empty_required_value_is_missing() {
        let mut config = config();
        config.ssh.hostname = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("ssh.hostname"))
        ));
    }

    #[test]
    fn renew_interval_must_be_shorter_than_ttl() {
        let mut config = config();
        config.renew_interval = config.lease_ttl;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { name: "renew_interval", .. })
        ));
    }

    #[test]
    fn dashboard_must_be_http() {
        let mut config = config();
        config.dashboard_url = "ftp://ci.example.com".to_string();
        assert!(config.validate().is_err());
        config.dashboard_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn port_zero_is_rejected() {
        let mut config = config();
        config.ssh.port = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { name: "ssh.port", .. })
        ));
    }

    #[test]
    fn wait_timeout_must_not_exceed_renew_interval() {
        let mut config = config();
        config.wait_timeout = config.renew_interval + Duration::from_millis(1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { name: "wait_timeout", .. })
        ));
        config.wait_timeout = config.renew_interval;
        config.validate().unwrap();
    }

    #[test]
    fn publish_attempts_must_be_positive() {
        let mut config = config();
        config.publish_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { name: "publish_attempts", .. })
        ));
        config.publish_attempts = 1;
        assert_eq!(config.retry_policy().max_attempts, 1);
    }

    #[test]
    fn database_settings_are_required() {
        let mut config = config();
        config.database.host = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("database.host"))
        ));

        let mut config = self::config();
        config.database.port = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { name: "database.port", .. })
        ));
    }
}
