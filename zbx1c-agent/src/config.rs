//! Agent configuration
//!
//! Handles:
//! - rac location, RAS endpoint and cluster credentials
//! - Activity thresholds
//! - Zabbix trapper settings
//! - Environment overrides (the `.env` keys used by existing installs)

use crate::activity::{ActivityPolicies, JobPolicy, SessionPolicy};
use crate::error::ConfigError;
use crate::execution::{ProcessRunner, RacEndpoint};
use crate::repository::{JobsSource, RepositoryOptions};
use crate::trapper::TrapperClient;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for minute thresholds: one year
pub const MAX_MINUTES: i64 = 525_600;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub rac: RacConfig,
    pub activity: ActivityConfig,
    pub zabbix: ZabbixConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RacConfig {
    pub path: PathBuf,
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    #[serde(skip_serializing)] // Never write passwords back out
    pub password: Option<String>,
    pub timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub jobs_source: JobsSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    pub session_threshold_minutes: i64,
    pub min_calls: Option<u64>,
    pub min_bytes: Option<u64>,
    pub job_max_duration_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZabbixConfig {
    pub server: String,
    pub port: u16,
    /// Host name items are reported under in Zabbix
    pub host_name: String,
    pub send_interval_secs: u64,
    pub timeout_secs: u64,
    pub item_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for RacConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("rac"),
            host: "127.0.0.1".to_string(),
            port: 1545,
            user: None,
            password: None,
            timeout_secs: 30,
            probe_timeout_secs: 5,
            jobs_source: JobsSource::default(),
        }
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        let session = SessionPolicy::default();
        Self {
            session_threshold_minutes: session.threshold_minutes,
            min_calls: session.min_calls,
            min_bytes: session.min_bytes,
            job_max_duration_minutes: JobPolicy::default().max_duration_minutes,
        }
    }
}

impl Default for ZabbixConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1".to_string(),
            port: 10051,
            host_name: hostname::get().unwrap_or_default().to_string_lossy().to_string(),
            send_interval_secs: 60,
            timeout_secs: 10,
            item_prefix: "zbx1c.cluster".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AgentConfig {
    /// Load from `path`, or from the OS config location when `None`.
    /// An explicit path must exist; a missing default file means defaults.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_file_path()?,
        };

        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("reading {}", config_path.display()))?;
            Self::from_toml_str(&content)
                .with_context(|| format!("parsing {}", config_path.display()))?
        } else if path.is_some() {
            anyhow::bail!("config file {} does not exist", config_path.display());
        } else {
            Self::default()
        };

        config.apply_env()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn config_file_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("no config directory on this platform")?;
        Ok(config_dir.join("zbx1c").join("config.toml"))
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`. Empty values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(path) = get("RAC_PATH") {
            self.rac.path = PathBuf::from(path);
        }
        if let Some(host) = get("RAC_HOST") {
            self.rac.host = host;
        }
        if let Some(port) = get("RAC_PORT") {
            self.rac.port = parse_env("RAC_PORT", port)?;
        }
        if let Some(user) = get("USER_NAME") {
            self.rac.user = Some(user);
        }
        if let Some(password) = get("USER_PASS") {
            self.rac.password = Some(password);
        }
        if let Some(timeout) = get("RAC_TIMEOUT") {
            self.rac.timeout_secs = parse_env("RAC_TIMEOUT", timeout)?;
        }
        if let Some(server) = get("ZABBIX_SERVER") {
            self.zabbix.server = server;
        }
        if let Some(port) = get("ZABBIX_PORT") {
            self.zabbix.port = parse_env("ZABBIX_PORT", port)?;
        }
        if let Some(host) = get("ZABBIX_HOST") {
            self.zabbix.host_name = host;
        }
        Ok(())
    }

    /// Every problem found, in declaration order
    pub fn problems(&self) -> Vec<ConfigError> {
        let mut problems = Vec::new();
        if self.rac.host.trim().is_empty() {
            problems.push(ConfigError::EmptyHost);
        }
        if self.rac.port == 0 {
            problems.push(ConfigError::ZeroPort { field: "rac.port" });
        }
        if self.rac.timeout_secs == 0 {
            problems.push(ConfigError::ZeroTimeout { field: "rac.timeout_secs" });
        }
        if self.rac.probe_timeout_secs == 0 {
            problems.push(ConfigError::ZeroTimeout { field: "rac.probe_timeout_secs" });
        }
        problems.extend(check_minutes(
            "activity.session_threshold_minutes",
            self.activity.session_threshold_minutes,
        ));
        problems.extend(check_minutes(
            "activity.job_max_duration_minutes",
            self.activity.job_max_duration_minutes,
        ));
        if self.zabbix.port == 0 {
            problems.push(ConfigError::ZeroPort { field: "zabbix.port" });
        }
        if self.zabbix.send_interval_secs == 0 {
            problems.push(ConfigError::ZeroTimeout { field: "zabbix.send_interval_secs" });
        }
        problems
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.problems().into_iter().next() {
            Some(problem) => Err(problem),
            None => Ok(()),
        }
    }

    pub fn endpoint(&self) -> RacEndpoint {
        let endpoint = RacEndpoint::new(self.rac.host.clone(), self.rac.port);
        match &self.rac.user {
            Some(user) => endpoint.with_credentials(user.clone(), self.rac.password.clone()),
            None => endpoint,
        }
    }

    pub fn policies(&self) -> ActivityPolicies {
        ActivityPolicies {
            session: SessionPolicy {
                threshold_minutes: self.activity.session_threshold_minutes,
                min_calls: self.activity.min_calls,
                min_bytes: self.activity.min_bytes,
            },
            job: JobPolicy {
                max_duration_minutes: self.activity.job_max_duration_minutes,
            },
        }
    }

    pub fn repository_options(&self) -> RepositoryOptions {
        RepositoryOptions {
            endpoint: self.endpoint(),
            policies: self.policies(),
            jobs_source: self.rac.jobs_source,
            probe_timeout: Duration::from_secs(self.rac.probe_timeout_secs),
        }
    }

    pub fn process_runner(&self) -> ProcessRunner {
        ProcessRunner::new(self.rac.path.clone(), Duration::from_secs(self.rac.timeout_secs))
    }

    pub fn trapper_client(&self) -> TrapperClient {
        TrapperClient::new(
            self.zabbix.server.clone(),
            self.zabbix.port,
            Duration::from_secs(self.zabbix.timeout_secs),
        )
    }
}

fn check_minutes(field: &'static str, value: i64) -> Option<ConfigError> {
    if value < 0 {
        Some(ConfigError::NegativeMinutes { field, value })
    } else if value > MAX_MINUTES {
        Some(ConfigError::MinutesTooLarge { field, value })
    } else {
        None
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { name, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = AgentConfig::default();
        assert_eq!(config.rac.port, 1545);
        assert_eq!(config.rac.timeout_secs, 30);
        assert_eq!(config.activity.session_threshold_minutes, 5);
        assert_eq!(config.activity.job_max_duration_minutes, 60);
        assert_eq!(config.rac.jobs_source, JobsSource::Connections);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = AgentConfig::from_toml_str(
            r#"
            [rac]
            host = "srv-1c"
            jobs_source = "job-list"

            [activity]
            min_calls = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.rac.host, "srv-1c");
        assert_eq!(config.rac.port, 1545);
        assert_eq!(config.rac.jobs_source, JobsSource::JobList);
        assert_eq!(config.policies().session.min_calls, Some(1));
        assert_eq!(config.zabbix.port, 10051);
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = AgentConfig::default();
        config
            .apply_env_with(env(&[
                ("RAC_HOST", "ras.local"),
                ("RAC_PORT", "1645"),
                ("USER_NAME", "admin"),
                ("USER_PASS", "secret"),
                ("RAC_TIMEOUT", ""),
                ("ZABBIX_HOST", "1c-prod"),
            ]))
            .unwrap();
        assert_eq!(config.rac.host, "ras.local");
        assert_eq!(config.rac.port, 1645);
        assert_eq!(config.rac.timeout_secs, 30);
        assert_eq!(config.zabbix.host_name, "1c-prod");

        let endpoint = config.endpoint();
        assert_eq!(endpoint.address(), "ras.local:1645");
        assert_eq!(endpoint.credentials.unwrap().password.as_deref(), Some("secret"));
    }

    #[test]
    fn bad_env_value_is_reported() {
        let mut config = AgentConfig::default();
        let err = config.apply_env_with(env(&[("RAC_PORT", "fifteen")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidEnv {
                name: "RAC_PORT",
                value: "fifteen".into()
            }
        );
    }

    #[test]
    fn validation_collects_problems() {
        let mut config = AgentConfig::default();
        config.rac.host = " ".into();
        config.rac.timeout_secs = 0;
        config.activity.session_threshold_minutes = -1;
        let problems = config.problems();
        assert_eq!(problems.len(), 3);
        assert_eq!(config.validate(), Err(ConfigError::EmptyHost));
    }

    #[test]
    fn oversized_minutes_are_rejected() {
        let mut config = AgentConfig::default();
        config.activity.session_threshold_minutes = i64::MAX / 2;
        assert_eq!(
            config.validate(),
            Err(ConfigError::MinutesTooLarge {
                field: "activity.session_threshold_minutes",
                value: i64::MAX / 2,
            })
        );

        config.activity.session_threshold_minutes = MAX_MINUTES;
        config.activity.job_max_duration_minutes = MAX_MINUTES + 1;
        assert_eq!(config.problems().len(), 1);
    }

    #[test]
    fn password_is_not_serialized() {
        let mut config = AgentConfig::default();
        config.rac.user = Some("admin".into());
        config.rac.password = Some("secret".into());
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("admin"));
        assert!(!text.contains("secret"));
    }

    #[tokio::test]
    async fn load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[zabbix]\nserver = \"zbx.local\"\n").unwrap();

        let config = AgentConfig::load(Some(&path)).await.unwrap();
        assert_eq!(config.zabbix.server, "zbx.local");

        let missing = dir.path().join("missing.toml");
        assert!(AgentConfig::load(Some(&missing)).await.is_err());
    }
}
