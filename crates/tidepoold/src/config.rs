//! tidepoold.toml configuration and command-line overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Args;
use serde::{Deserialize, Serialize};

use tidepool_state::Policy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Cluster node this daemon runs on; never chosen for scale-in.
    pub node_id: Option<String>,
    /// Topology feed: a file path, or `-` for stdin.
    pub feed: Option<String>,
    pub autoscaler: AutoscalerSection,
    pub providers: ProvidersSection,
    pub storage: StorageSection,
    /// Policies written to the policy backend at startup.
    pub policies: Vec<Policy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscalerSection {
    pub enabled: bool,
    pub interval_secs: u64,
    pub threads: usize,
}

impl Default for AutoscalerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 180,
            threads: 3,
        }
    }
}

impl AutoscalerSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersSection {
    pub aws_asg: bool,
    pub noop: bool,
}

impl Default for ProvidersSection {
    fn default() -> Self {
        Self {
            aws_asg: false,
            noop: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// redb file for policies and activities. In-memory when unset.
    pub path: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reject settings the daemon cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.autoscaler.interval_secs == 0 {
            bail!("autoscaler interval_secs must be at least 1");
        }
        if self.autoscaler.threads == 0 {
            bail!("autoscaler threads must be at least 1");
        }
        Ok(())
    }
}

/// Flags of the `server` subcommand. Set flags win over the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct ServerArgs {
    /// Path to a tidepoold.toml config file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Cluster node ID of this daemon.
    #[arg(long)]
    pub node_id: Option<String>,

    /// Topology feed file, or `-` for stdin.
    #[arg(long)]
    pub feed: Option<String>,

    /// redb file for persistent state.
    #[arg(long)]
    pub state_path: Option<PathBuf>,

    /// Autoscaler evaluation interval in seconds.
    #[arg(long)]
    pub autoscale_interval: Option<u64>,

    /// Autoscaler worker pool size.
    #[arg(long)]
    pub autoscale_threads: Option<usize>,

    /// Run without the autoscaler.
    #[arg(long)]
    pub disable_autoscaler: bool,

    /// Enable the AWS AutoScaling provider.
    #[arg(long)]
    pub enable_aws_asg: bool,

    /// Disable the no-op provider.
    #[arg(long)]
    pub disable_noop: bool,
}

impl ServerArgs {
    /// Load the config file, if any, then apply the flags on top.
    pub fn load(&self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut ServerConfig) {
        if let Some(node_id) = &self.node_id {
            config.node_id = Some(node_id.clone());
        }
        if let Some(feed) = &self.feed {
            config.feed = Some(feed.clone());
        }
        if let Some(path) = &self.state_path {
            config.storage.path = Some(path.clone());
        }
        if let Some(interval) = self.autoscale_interval {
            config.autoscaler.interval_secs = interval;
        }
        if let Some(threads) = self.autoscale_threads {
            config.autoscaler.threads = threads;
        }
        if self.disable_autoscaler {
            config.autoscaler.enabled = false;
        }
        if self.enable_aws_asg {
            config.providers.aws_asg = true;
        }
        if self.disable_noop {
            config.providers.noop = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidepool_state::{ComparisonAction, ProviderKind, ScaleResource};

    #[test]
    fn defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert!(config.autoscaler.enabled);
        assert_eq!(config.autoscaler.interval(), Duration::from_secs(180));
        assert_eq!(config.autoscaler.threads, 3);
        assert!(config.providers.noop);
        assert!(!config.providers.aws_asg);
        assert!(config.storage.path.is_none());
        assert!(config.policies.is_empty());
    }

    #[test]
    fn parse_full() {
        let toml_str = r#"
node_id = "server-1"
feed = "-"

[autoscaler]
interval_secs = 30
threads = 5

[providers]
aws_asg = true

[storage]
path = "/var/lib/tidepool/state.redb"

[[policies]]
class = "batch"
enabled = true
min_count = 2
max_count = 10
scale_in_count = 1
scale_out_count = 2
provider = "aws-autoscaling"

[policies.provider_config]
asg-name = "batch-asg"

[policies.checks.cpu-high]
enabled = true
resource = "cpu"
comparison_operator = "greater-than"
comparison_percentage = 80.0
action = "scale-out"
"#;
        let config = ServerConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.node_id.as_deref(), Some("server-1"));
        assert_eq!(config.feed.as_deref(), Some("-"));
        assert_eq!(config.autoscaler.interval_secs, 30);
        assert_eq!(config.autoscaler.threads, 5);
        assert!(config.autoscaler.enabled);
        assert!(config.providers.aws_asg);
        assert!(config.providers.noop);

        let policy = &config.policies[0];
        assert_eq!(policy.provider, ProviderKind::AwsAutoscaling);
        assert_eq!(policy.provider_config["asg-name"], "batch-asg");
        let check = &policy.checks["cpu-high"];
        assert_eq!(check.resource, ScaleResource::Cpu);
        assert_eq!(check.action, ComparisonAction::ScaleOut);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let toml_str = r#"
[[policies]]
class = "batch"
enabled = true
min_count = 1
max_count = 2
scale_in_count = 1
scale_out_count = 1
provider = "gce"
"#;
        assert!(ServerConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn flags_override_file() {
        let mut config = ServerConfig::from_toml(
            r#"
node_id = "from-file"

[autoscaler]
interval_secs = 30
"#,
        )
        .unwrap();

        let args = ServerArgs {
            node_id: Some("from-flag".to_string()),
            autoscale_threads: Some(8),
            disable_autoscaler: true,
            disable_noop: true,
            ..Default::default()
        };
        args.apply(&mut config);

        assert_eq!(config.node_id.as_deref(), Some("from-flag"));
        assert_eq!(config.autoscaler.interval_secs, 30);
        assert_eq!(config.autoscaler.threads, 8);
        assert!(!config.autoscaler.enabled);
        assert!(!config.providers.noop);
    }

    #[test]
    fn zero_interval_or_threads_rejected() {
        let args = ServerArgs {
            autoscale_interval: Some(0),
            ..Default::default()
        };
        assert!(args.load().is_err());

        let args = ServerArgs {
            autoscale_threads: Some(0),
            ..Default::default()
        };
        assert!(args.load().is_err());

        let config = ServerConfig::from_toml("[autoscaler]\ninterval_secs = 0\n").unwrap();
        assert!(config.validate().is_err());
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn load_reads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tidepoold.toml");
        std::fs::write(&path, "[autoscaler]\nthreads = 7\n").unwrap();

        let args = ServerArgs {
            config: Some(path),
            ..Default::default()
        };
        assert_eq!(args.load().unwrap().autoscaler.threads, 7);
    }
}
