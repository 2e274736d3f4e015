//! Configuration management
//!
//! Provides configuration loading (YAML or JSON), validation, and
//! environment-based overrides for the engine's tunables: reconciliation,
//! SSE fan-out, database pooling, worker coordination, and error policies.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{DomainFlowError, EngineResult, ErrorCategory, ErrorPolicy, ErrorSeverity, PolicyRegistry};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML or JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> EngineResult<AppConfig> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| DomainFlowError::Validation(format!("Failed to read config {}: {}", path.display(), e)))?;
        let is_json = path.extension().map(|ext| ext == "json").unwrap_or(false);
        Self::load_from_str(&content, is_json)
    }

    /// Load configuration from a string
    pub fn load_from_str(content: &str, json: bool) -> EngineResult<AppConfig> {
        let config: AppConfig = if json {
            serde_json::from_str(content)
                .map_err(|e| DomainFlowError::Validation(format!("Invalid JSON config: {}", e)))?
        } else {
            serde_yaml::from_str(content)
                .map_err(|e| DomainFlowError::Validation(format!("Invalid YAML config: {}", e)))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to a loaded config
    pub fn apply_env(mut config: AppConfig) -> EngineResult<AppConfig> {
        if let Ok(val) = std::env::var("DOMAINFLOW_DATA_DIR") {
            config.server.data_dir = val;
        }
        if let Ok(val) = std::env::var("DOMAINFLOW_LISTEN_ADDR") {
            config.server.listen_addr = val;
        }
        if let Ok(val) = std::env::var("DOMAINFLOW_SSE_MAX_CLIENTS") {
            config.sse.max_clients = val
                .parse()
                .map_err(|_| DomainFlowError::Validation("DOMAINFLOW_SSE_MAX_CLIENTS must be an integer".into()))?;
        }
        if let Ok(val) = std::env::var("DOMAINFLOW_RECONCILIATION_ENABLED") {
            config.reconciliation.enabled = val == "1" || val.eq_ignore_ascii_case("true");
        }
        config.validate()?;
        Ok(config)
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    /// Server process configuration
    pub server: ServerConfig,
    /// Counter reconciliation configuration
    pub reconciliation: ReconciliationConfig,
    /// SSE broadcaster configuration
    pub sse: SseConfig,
    /// Database pool configuration
    pub database: DatabaseConfig,
    /// Worker coordination configuration
    pub worker_coordination: WorkerCoordinationConfig,
    /// Error policy overrides
    pub error_policies: Vec<ErrorPolicyOverride>,
}

impl AppConfig {
    /// Validate all sections
    pub fn validate(&self) -> EngineResult<()> {
        self.server.validate()?;
        self.reconciliation.validate()?;
        self.sse.validate()?;
        self.database.validate()?;
        self.worker_coordination.validate()?;
        for policy in &self.error_policies {
            policy.validate()?;
        }
        Ok(())
    }

    /// Build the policy registry with configured overrides applied
    pub fn policy_registry(&self) -> PolicyRegistry {
        let mut registry = PolicyRegistry::new();
        for o in &self.error_policies {
            registry.set(
                o.category,
                o.severity,
                ErrorPolicy {
                    retryable: o.retryable,
                    base_delay_ms: o.base_delay_ms,
                    max_attempts: o.max_attempts,
                    escalate: o.escalate,
                    audit: o.audit,
                },
            );
        }
        registry
    }
}

/// Server process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Directory for the embedded state store
    pub data_dir: String,
    /// Listen address for the HTTP surface
    pub listen_addr: String,
    /// CORS origin echoed back on SSE responses when configured
    pub allowed_origin: Option<String>,
}

impl ServerConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.data_dir.is_empty() {
            return Err(DomainFlowError::Validation("server.dataDir cannot be empty".into()));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            listen_addr: "127.0.0.1:8080".to_string(),
            allowed_origin: None,
        }
    }
}

/// How counter drift is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftMode {
    /// Deviation divided by the authoritative count
    Ratio,
    /// Raw difference in items
    Absolute,
}

/// Counter reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconciliationConfig {
    /// Whether the background job runs at all
    pub enabled: bool,
    /// Interval between runs, in minutes
    pub interval_minutes: u64,
    /// Drift threshold; a ratio in [0,1] for `ratio` mode, an item count for `absolute`
    pub drift_threshold_pct: f64,
    /// Drift measurement mode
    pub drift_mode: DriftMode,
    /// Whether detected drift is corrected automatically
    pub auto_correct: bool,
    /// Cap on corrections applied per run
    pub max_corrections_per_run: usize,
}

impl ReconciliationConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.interval_minutes == 0 {
            return Err(DomainFlowError::Validation("reconciliation.intervalMinutes must be positive".into()));
        }
        if self.drift_threshold_pct < 0.0 {
            return Err(DomainFlowError::Validation("reconciliation.driftThresholdPct cannot be negative".into()));
        }
        Ok(())
    }

    /// Interval between runs
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 24 * 60,
            drift_threshold_pct: 1e-4,
            drift_mode: DriftMode::Ratio,
            auto_correct: true,
            max_corrections_per_run: 5000,
        }
    }
}

/// SSE broadcaster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SseConfig {
    /// Seconds between synthetic keep-alive events
    pub keep_alive_interval: u64,
    /// Seconds of silence after which a client is stale
    #[serde(rename = "staleClientTTL")]
    pub stale_client_ttl: u64,
    /// Seconds between reaper sweeps
    pub cleanup_interval: u64,
    /// Concurrent client cap
    pub max_clients: usize,
    /// Whether events are also appended to the durable event log
    pub persist_events: bool,
}

impl SseConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.max_clients == 0 {
            return Err(DomainFlowError::Validation("sse.maxClients must be positive".into()));
        }
        if self.keep_alive_interval == 0 || self.cleanup_interval == 0 {
            return Err(DomainFlowError::Validation("sse intervals must be positive".into()));
        }
        Ok(())
    }

    /// Keep-alive period
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval)
    }

    /// Stale client TTL
    pub fn stale_ttl(&self) -> Duration {
        Duration::from_secs(self.stale_client_ttl)
    }

    /// Reaper sweep period
    pub fn cleanup(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval)
    }
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval: 12,
            stale_client_ttl: 45,
            cleanup_interval: 30,
            max_clients: 1000,
            persist_events: false,
        }
    }
}

/// Database pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// Maximum open connections
    pub max_open_connections: u32,
    /// Maximum idle connections
    pub max_idle_connections: u32,
    /// Connection lifetime cap, in minutes
    pub connection_max_lifetime: u64,
    /// Idle connection cap, in minutes
    pub connection_max_idle_time: u64,
}

impl DatabaseConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.max_open_connections == 0 {
            return Err(DomainFlowError::Validation("database.maxOpenConnections must be positive".into()));
        }
        if self.max_idle_connections > self.max_open_connections {
            return Err(DomainFlowError::Validation(
                "database.maxIdleConnections cannot exceed maxOpenConnections".into(),
            ));
        }
        Ok(())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_open_connections: 100,
            max_idle_connections: 50,
            connection_max_lifetime: 30,
            connection_max_idle_time: 15,
        }
    }
}

/// Worker coordination configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkerCoordinationConfig {
    /// Seconds between heartbeat updates
    pub heartbeat_interval: u64,
    /// Seconds of heartbeat freshness that qualifies a worker as active
    pub liveness_window: u64,
    /// Seconds between stale-worker sweeps
    pub cleanup_interval: u64,
}

impl WorkerCoordinationConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.heartbeat_interval == 0 || self.liveness_window == 0 || self.cleanup_interval == 0 {
            return Err(DomainFlowError::Validation("workerCoordination intervals must be positive".into()));
        }
        if self.heartbeat_interval >= self.liveness_window {
            return Err(DomainFlowError::Validation(
                "workerCoordination.heartbeatInterval must be below livenessWindow".into(),
            ));
        }
        Ok(())
    }

    /// Heartbeat period
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    /// Liveness window
    pub fn liveness(&self) -> Duration {
        Duration::from_secs(self.liveness_window)
    }

    /// Workers silent for longer than this are purged
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.liveness_window * 4)
    }

    /// Sweep period
    pub fn cleanup(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval)
    }
}

impl Default for WorkerCoordinationConfig {
    fn default() -> Self {
        Self { heartbeat_interval: 10, liveness_window: 30, cleanup_interval: 30 }
    }
}

/// One policy override from configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPolicyOverride {
    /// Category the override applies to
    pub category: ErrorCategory,
    /// Severity the override applies to
    pub severity: ErrorSeverity,
    /// Whether the pair is retryable
    pub retryable: bool,
    /// Base retry delay in milliseconds
    #[serde(default)]
    pub base_delay_ms: u64,
    /// Maximum attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Whether exhaustion escalates
    #[serde(default)]
    pub escalate: bool,
    /// Whether every occurrence audits
    #[serde(default)]
    pub audit: bool,
}

fn default_max_attempts() -> u32 {
    1
}

impl ErrorPolicyOverride {
    fn validate(&self) -> EngineResult<()> {
        if self.max_attempts == 0 {
            return Err(DomainFlowError::Validation("errorPolicies.maxAttempts must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.sse.keep_alive_interval, 12);
        assert_eq!(config.sse.stale_client_ttl, 45);
        assert_eq!(config.sse.cleanup_interval, 30);
        assert_eq!(config.sse.max_clients, 1000);
        assert_eq!(config.database.max_open_connections, 100);
        assert_eq!(config.database.max_idle_connections, 50);
        assert_eq!(config.worker_coordination.heartbeat_interval, 10);
        assert_eq!(config.worker_coordination.liveness_window, 30);
        assert_eq!(config.reconciliation.max_corrections_per_run, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_camel_case_yaml() {
        let yaml = r#"
sse:
  keepAliveInterval: 5
  staleClientTTL: 20
  cleanupInterval: 10
  maxClients: 10
reconciliation:
  enabled: true
  intervalMinutes: 60
  driftThresholdPct: 0.001
  driftMode: absolute
  autoCorrect: false
  maxCorrectionsPerRun: 100
workerCoordination:
  heartbeatInterval: 2
  livenessWindow: 6
  cleanupInterval: 4
"#;
        let config = ConfigLoader::load_from_str(yaml, false).unwrap();
        assert_eq!(config.sse.keep_alive_interval, 5);
        assert_eq!(config.sse.max_clients, 10);
        assert_eq!(config.reconciliation.drift_mode, DriftMode::Absolute);
        assert!(!config.reconciliation.auto_correct);
        assert_eq!(config.worker_coordination.liveness_window, 6);
    }

    #[test]
    fn rejects_zero_liveness_window() {
        let yaml = r#"
workerCoordination:
  heartbeatInterval: 10
  livenessWindow: 0
  cleanupInterval: 30
"#;
        assert!(ConfigLoader::load_from_str(yaml, false).is_err());
    }

    #[test]
    fn policy_overrides_reach_the_registry() {
        let yaml = r#"
errorPolicies:
  - category: network
    severity: medium
    retryable: false
"#;
        let config = ConfigLoader::load_from_str(yaml, false).unwrap();
        let registry = config.policy_registry();
        assert!(!registry.decide(ErrorCategory::Network, ErrorSeverity::Medium, 1).should_retry);
    }
}
