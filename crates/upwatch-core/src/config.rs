//! upwatch.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::duration::parse_duration;

/// Time between the end of one monitoring cycle and the start of the next.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
/// Upper bound for a single HTTP probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound for a single state store call made by the monitor.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);
/// Minimum time a raw status must hold before a transition is confirmed.
pub const DEFAULT_MIN_DOWNTIME: Duration = Duration::from_secs(30);
/// Upper bound for a single webhook delivery.
pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);
/// Where the state store lives when `monitor.data_dir` is unset.
pub const DEFAULT_DATA_DIR: &str = "/var/lib/upwatch";

/// Errors raised while loading or validating a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: String, value: String },

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: String },

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("duplicate target id: {0}")]
    DuplicateTarget(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpwatchConfig {
    pub monitor: Option<MonitorConfig>,
    pub notifications: Option<NotificationsConfig>,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub interval: Option<String>,
    pub probe_timeout: Option<String>,
    pub store_timeout: Option<String>,
    /// Overrides the built-in 30s debounce for every target without its own.
    pub min_downtime: Option<String>,
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Seeds the stored template when set.
    pub template: Option<String>,
    pub webhooks: Option<Vec<String>>,
    pub webhook_timeout: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub id: String,
    pub name: String,
    pub public_url: String,
    pub check_url: Option<String>,
    pub min_downtime_seconds: Option<u64>,
}

impl UpwatchConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a config document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: UpwatchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject unparsable durations, a zero interval or timeout, blank
    /// identities, and duplicate ids.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(monitor) = &self.monitor {
            check_nonzero_duration("monitor.interval", monitor.interval.as_deref())?;
            check_nonzero_duration("monitor.probe_timeout", monitor.probe_timeout.as_deref())?;
            check_nonzero_duration("monitor.store_timeout", monitor.store_timeout.as_deref())?;
            check_duration("monitor.min_downtime", monitor.min_downtime.as_deref())?;
        }
        if let Some(notifications) = &self.notifications {
            check_duration(
                "notifications.webhook_timeout",
                notifications.webhook_timeout.as_deref(),
            )?;
        }

        let mut seen = HashSet::new();
        for target in &self.targets {
            if target.id.trim().is_empty() {
                return Err(ConfigError::InvalidTarget(format!(
                    "target {:?} has an empty id",
                    target.name
                )));
            }
            if target.id.contains(':') {
                return Err(ConfigError::InvalidTarget(format!(
                    "target id {:?} must not contain ':'",
                    target.id
                )));
            }
            if target.public_url.trim().is_empty() {
                return Err(ConfigError::InvalidTarget(format!(
                    "target {} has an empty public_url",
                    target.id
                )));
            }
            if !seen.insert(target.id.as_str()) {
                return Err(ConfigError::DuplicateTarget(target.id.clone()));
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        self.monitor_duration(|m| m.interval.as_deref(), DEFAULT_INTERVAL)
    }

    pub fn probe_timeout(&self) -> Duration {
        self.monitor_duration(|m| m.probe_timeout.as_deref(), DEFAULT_PROBE_TIMEOUT)
    }

    pub fn store_timeout(&self) -> Duration {
        self.monitor_duration(|m| m.store_timeout.as_deref(), DEFAULT_STORE_TIMEOUT)
    }

    /// Global debounce threshold, before per-target overrides.
    pub fn min_downtime(&self) -> Duration {
        self.monitor_duration(|m| m.min_downtime.as_deref(), DEFAULT_MIN_DOWNTIME)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.monitor
            .as_ref()
            .and_then(|m| m.data_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
    }

    pub fn webhooks(&self) -> &[String] {
        self.notifications
            .as_ref()
            .and_then(|n| n.webhooks.as_deref())
            .unwrap_or(&[])
    }

    pub fn webhook_timeout(&self) -> Duration {
        self.notifications
            .as_ref()
            .and_then(|n| n.webhook_timeout.as_deref())
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_WEBHOOK_TIMEOUT)
    }

    /// Template to seed into the settings store, if one is configured.
    pub fn template(&self) -> Option<&str> {
        self.notifications
            .as_ref()
            .and_then(|n| n.template.as_deref())
            .filter(|t| !t.trim().is_empty())
    }

    /// Scaffold a config with a single example target.
    pub fn scaffold(id: &str, name: &str, public_url: &str) -> Self {
        UpwatchConfig {
            monitor: Some(MonitorConfig {
                interval: Some("60s".to_string()),
                probe_timeout: Some("5s".to_string()),
                store_timeout: Some("5s".to_string()),
                min_downtime: Some("30s".to_string()),
                data_dir: Some(PathBuf::from(DEFAULT_DATA_DIR)),
            }),
            notifications: None,
            targets: vec![TargetConfig {
                id: id.to_string(),
                name: name.to_string(),
                public_url: public_url.to_string(),
                check_url: None,
                min_downtime_seconds: None,
            }],
        }
    }

    fn monitor_duration(
        &self,
        field: impl Fn(&MonitorConfig) -> Option<&str>,
        default: Duration,
    ) -> Duration {
        self.monitor
            .as_ref()
            .and_then(field)
            .and_then(parse_duration)
            .unwrap_or(default)
    }
}

fn check_duration(field: &str, value: Option<&str>) -> Result<(), ConfigError> {
    match value {
        Some(v) if parse_duration(v).is_none() => Err(ConfigError::InvalidDuration {
            field: field.to_string(),
            value: v.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Loop periods and timeouts must be positive.
fn check_nonzero_duration(field: &str, value: Option<&str>) -> Result<(), ConfigError> {
    check_duration(field, value)?;
    if value.and_then(parse_duration).is_some_and(|d| d.is_zero()) {
        return Err(ConfigError::ZeroDuration {
            field: field.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaffold() {
        let config = UpwatchConfig::scaffold("api", "API", "https://api.example.com");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("api.example.com"));
        assert!(toml_str.contains("[[targets]]"));

        let reparsed = UpwatchConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(reparsed.targets, config.targets);
    }

    #[test]
    fn test_parse_minimal() {
        let config = UpwatchConfig::from_toml_str("").unwrap();
        assert!(config.targets.is_empty());
        assert_eq!(config.interval(), DEFAULT_INTERVAL);
        assert_eq!(config.probe_timeout(), DEFAULT_PROBE_TIMEOUT);
        assert_eq!(config.store_timeout(), DEFAULT_STORE_TIMEOUT);
        assert_eq!(config.min_downtime(), DEFAULT_MIN_DOWNTIME);
        assert_eq!(config.data_dir(), PathBuf::from(DEFAULT_DATA_DIR));
        assert!(config.webhooks().is_empty());
        assert!(config.template().is_none());
    }

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
[monitor]
interval = "2m"
probe_timeout = "1500ms"
min_downtime = "45s"
data_dir = "/tmp/upwatch"

[notifications]
template = "!name is !status"
webhooks = ["https://hooks.example.com/a"]

[[targets]]
id = "api"
name = "API"
public_url = "https://api.example.com"
check_url = "https://10.0.0.5/healthz"
min_downtime_seconds = 120

[[targets]]
id = "web"
name = "Website"
public_url = "https://www.example.com"
"#;
        let config = UpwatchConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.interval(), Duration::from_secs(120));
        assert_eq!(config.probe_timeout(), Duration::from_millis(1500));
        assert_eq!(config.min_downtime(), Duration::from_secs(45));
        assert_eq!(config.data_dir(), PathBuf::from("/tmp/upwatch"));
        assert_eq!(config.template(), Some("!name is !status"));
        assert_eq!(config.webhooks(), ["https://hooks.example.com/a".to_string()]);
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.targets[0].min_downtime_seconds, Some(120));
        assert_eq!(config.targets[1].check_url, None);
    }

    #[test]
    fn blank_template_is_ignored() {
        let config = UpwatchConfig::from_toml_str("[notifications]\ntemplate = \"  \"\n").unwrap();
        assert!(config.template().is_none());
    }

    #[test]
    fn invalid_duration_is_rejected() {
        let err = UpwatchConfig::from_toml_str("[monitor]\ninterval = \"often\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration { ref field, .. } if field == "monitor.interval"));
    }

    #[test]
    fn zero_interval_and_timeouts_are_rejected() {
        for field in ["interval", "probe_timeout", "store_timeout"] {
            for zero in ["0s", "0ms", "0"] {
                let err = UpwatchConfig::from_toml_str(&format!("[monitor]\n{field} = \"{zero}\"\n"))
                    .unwrap_err();
                assert!(
                    matches!(err, ConfigError::ZeroDuration { field: ref f } if *f == format!("monitor.{field}")),
                    "{field} = {zero} should be rejected"
                );
            }
        }
        // A zero debounce is a valid choice.
        let config = UpwatchConfig::from_toml_str("[monitor]\nmin_downtime = \"0s\"\n").unwrap();
        assert_eq!(config.min_downtime(), Duration::ZERO);
    }

    #[test]
    fn duplicate_target_ids_are_rejected() {
        let toml_str = r#"
[[targets]]
id = "api"
name = "A"
public_url = "https://a.example.com"

[[targets]]
id = "api"
name = "B"
public_url = "https://b.example.com"
"#;
        let err = UpwatchConfig::from_toml_str(toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateTarget(ref id) if id == "api"));
    }

    #[test]
    fn empty_target_id_is_rejected() {
        let toml_str = r#"
[[targets]]
id = ""
name = "A"
public_url = "https://a.example.com"
"#;
        let err = UpwatchConfig::from_toml_str(toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTarget(_)));
    }

    #[test]
    fn target_id_with_separator_is_rejected() {
        let toml_str = r#"
[[targets]]
id = "prod:api"
name = "A"
public_url = "https://a.example.com"
"#;
        let err = UpwatchConfig::from_toml_str(toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTarget(_)));
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upwatch.toml");
        std::fs::write(&path, "[monitor]\ninterval = \"10s\"\n").unwrap();

        let config = UpwatchConfig::from_file(&path).unwrap();
        assert_eq!(config.interval(), Duration::from_secs(10));

        let missing = UpwatchConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}
