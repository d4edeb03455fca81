use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use zbx1c_agent::AgentConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub listen: String,
    /// Background metric polling; 0 disables it
    pub snapshot_interval_secs: u64,
    #[serde(flatten)]
    pub agent: AgentConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".into(),
            snapshot_interval_secs: 60,
            agent: AgentConfig::default(),
        }
    }
}

pub fn parse_config(txt: &str) -> Result<KernelConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt)
}

/// `ZBX1C_KERNEL_CONFIG` (default `kernel.yaml`), then environment overrides.
/// A missing file means defaults; a broken one is an error.
pub async fn load_config() -> anyhow::Result<KernelConfig> {
    let path = std::env::var("ZBX1C_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {path}"))?;
        parse_config(&txt).with_context(|| format!("parsing {path}"))?
    } else {
        KernelConfig::default()
    };
    cfg.agent.apply_env()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_sections_flatten_into_agent_config() {
        let cfg = parse_config(
            "listen: 127.0.0.1:9090\n\
             rac:\n  host: srv-1c\n  port: 1645\n\
             activity:\n  session_threshold_minutes: 10\n",
        )
        .unwrap();
        assert_eq!(cfg.listen, "127.0.0.1:9090");
        assert_eq!(cfg.snapshot_interval_secs, 60);
        assert_eq!(cfg.agent.rac.host, "srv-1c");
        assert_eq!(cfg.agent.rac.port, 1645);
        assert_eq!(cfg.agent.activity.session_threshold_minutes, 10);
        assert_eq!(cfg.agent.zabbix.port, 10051);
    }

    #[test]
    fn empty_yaml_means_defaults() {
        assert_eq!(parse_config("").unwrap().listen, "0.0.0.0:8080");
        assert_eq!(parse_config("  \n").unwrap().snapshot_interval_secs, 60);
    }

    #[test]
    fn broken_yaml_is_an_error() {
        assert!(parse_config("listen: [unclosed").is_err());
        assert!(parse_config("rac:\n  port: not-a-number\n").is_err());
    }
}
