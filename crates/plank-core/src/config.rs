use crate::error::{PlankError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// OutboundEndpoint
// ---------------------------------------------------------------------------

/// An HTTP endpoint that receives local domain events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEndpoint {
    pub name: String,
    pub url: String,
    /// HMAC-SHA256 signing key. Unsigned deliveries when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Total delivery attempts before dead-lettering.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff unit; retry `k` (counting from 1) waits
    /// `retry_delay_ms * 2^(k-1)` after the previous attempt.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Event types to deliver. Empty matches every event.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_filters: Vec<String>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_enabled() -> bool {
    true
}

impl OutboundEndpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            secret: None,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            enabled: default_enabled(),
            event_filters: Vec::new(),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Attempts actually made; a zero budget still gets one try.
    pub fn attempt_budget(&self) -> u32 {
        self.max_retries.max(1)
    }

    pub fn matches(&self, event_type: &str) -> bool {
        self.event_filters.is_empty() || self.event_filters.iter().any(|f| f == event_type)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PlankError::InvalidEndpoint {
                name: self.name.clone(),
                reason: "name must not be empty".into(),
            });
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(PlankError::InvalidEndpoint {
                name: self.name.clone(),
                reason: format!("url must start with http:// or https://, got '{}'", self.url),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WebhooksConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhooksConfig {
    #[serde(default)]
    pub endpoints: Vec<OutboundEndpoint>,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub webhooks: WebhooksConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            webhooks: WebhooksConfig::default(),
        }
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(PlankError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// Like [`Config::load`], but a project without a config file gets defaults.
    pub fn load_or_default(root: &Path) -> Result<Self> {
        match Self::load(root) {
            Err(PlankError::NotInitialized) => Ok(Self::default()),
            other => other,
        }
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Endpoint registry
    // -----------------------------------------------------------------------

    pub fn endpoint(&self, name: &str) -> Result<&OutboundEndpoint> {
        self.webhooks
            .endpoints
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| PlankError::EndpointNotFound(name.to_string()))
    }

    pub fn add_endpoint(&mut self, endpoint: OutboundEndpoint) -> Result<()> {
        endpoint.validate()?;
        if self.webhooks.endpoints.iter().any(|e| e.name == endpoint.name) {
            return Err(PlankError::EndpointExists(endpoint.name));
        }
        self.webhooks.endpoints.push(endpoint);
        Ok(())
    }

    pub fn remove_endpoint(&mut self, name: &str) -> Result<OutboundEndpoint> {
        let idx = self
            .webhooks
            .endpoints
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| PlankError::EndpointNotFound(name.to_string()))?;
        Ok(self.webhooks.endpoints.remove(idx))
    }

    pub fn enabled_endpoints(&self) -> impl Iterator<Item = &OutboundEndpoint> {
        self.webhooks.endpoints.iter().filter(|e| e.enabled)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for ep in &self.webhooks.endpoints {
            if !seen.insert(ep.name.as_str()) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("duplicate endpoint name '{}'", ep.name),
                });
            }
            if let Err(e) = ep.validate() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: e.to_string(),
                });
            }
            if ep.max_retries == 0 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "endpoint '{}' has max_retries = 0; it will be attempted once",
                        ep.name
                    ),
                });
            }
            if ep.secret.is_none() && ep.url.starts_with("https://") {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("endpoint '{}' has no secret; deliveries are unsigned", ep.name),
                });
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        let mut ep = OutboundEndpoint::new("slack", "https://hooks.example.com/T1");
        ep.secret = Some("s3cret".into());
        ep.event_filters = vec!["task.status_changed".into()];
        cfg.add_endpoint(ep.clone()).unwrap();
        cfg.save(dir.path()).unwrap();

        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.webhooks.endpoints, vec![ep]);
    }

    #[test]
    fn missing_config_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(PlankError::NotInitialized)
        ));
        assert!(Config::load_or_default(dir.path())
            .unwrap()
            .webhooks
            .endpoints
            .is_empty());
    }

    #[test]
    fn defaults_applied_to_sparse_yaml() {
        let yaml = "webhooks:\n  endpoints:\n    - name: ci\n      url: http://localhost:9000/hook\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let ep = cfg.endpoint("ci").unwrap();
        assert_eq!(ep.max_retries, 3);
        assert_eq!(ep.retry_delay(), Duration::from_secs(1));
        assert!(ep.enabled);
        assert!(ep.event_filters.is_empty());
    }

    #[test]
    fn duplicate_endpoint_rejected() {
        let mut cfg = Config::default();
        cfg.add_endpoint(OutboundEndpoint::new("a", "http://x")).unwrap();
        assert!(matches!(
            cfg.add_endpoint(OutboundEndpoint::new("a", "http://y")),
            Err(PlankError::EndpointExists(_))
        ));
    }

    #[test]
    fn invalid_url_rejected() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.add_endpoint(OutboundEndpoint::new("a", "ftp://x")),
            Err(PlankError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn remove_endpoint() {
        let mut cfg = Config::default();
        cfg.add_endpoint(OutboundEndpoint::new("a", "http://x")).unwrap();
        assert_eq!(cfg.remove_endpoint("a").unwrap().name, "a");
        assert!(matches!(
            cfg.remove_endpoint("a"),
            Err(PlankError::EndpointNotFound(_))
        ));
    }

    #[test]
    fn filters_match() {
        let mut ep = OutboundEndpoint::new("a", "http://x");
        assert!(ep.matches("anything"));
        ep.event_filters = vec!["task.status_changed".into()];
        assert!(ep.matches("task.status_changed"));
        assert!(!ep.matches("plan.created"));
    }

    #[test]
    fn zero_retries_still_attempts_once() {
        let mut ep = OutboundEndpoint::new("a", "http://x");
        ep.max_retries = 0;
        assert_eq!(ep.attempt_budget(), 1);
    }

    #[test]
    fn validate_flags_problems() {
        let mut cfg = Config::default();
        let mut ep = OutboundEndpoint::new("a", "https://x");
        ep.max_retries = 0;
        cfg.webhooks.endpoints.push(ep.clone());
        cfg.webhooks.endpoints.push(ep);
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("duplicate")));
        assert!(warnings.iter().any(|w| w.message.contains("max_retries")));
        assert!(warnings.iter().any(|w| w.message.contains("unsigned")));
    }
}
