//! Configuration for MailRouter

use crate::types::{DomainConfig, EmailAddress, RouteEntry, Workstream};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "MAILROUTER_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Key-value store configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Domain and route tables
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Per-sender rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Spam heuristics
    #[serde(default)]
    pub spam: SpamConfig,

    /// Inference service used for classification
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Workstream intake endpoints
    #[serde(default)]
    pub workstreams: WorkstreamsConfig,

    /// Analytics and alert webhooks
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Outbound SMTP relay used for forwarding
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address of the ingest API
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Upper bound for one message invocation in milliseconds
    #[serde(default = "default_processing_timeout")]
    pub processing_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            processing_timeout_ms: default_processing_timeout(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0:8025".to_string()
}

fn default_processing_timeout() -> u64 {
    30_000
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Key-value store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Backend: "sqlite" or "memory"
    #[serde(default = "default_db_backend")]
    pub backend: String,

    /// SQLite database path
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Interval between expired-entry sweeps in seconds
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_db_backend(),
            path: default_db_path(),
            max_connections: default_max_connections(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}

fn default_db_backend() -> String {
    "sqlite".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/mailrouter/kv.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_purge_interval() -> u64 {
    600
}

/// Domain and route tables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Destination for escalations and failed dispatches
    #[serde(default = "default_management_address")]
    pub management_address: String,

    /// Last-resort destination when processing fails unexpectedly
    #[serde(default = "default_safe_fallback")]
    pub safe_fallback_address: String,

    /// Forward target for unconfigured domains; when absent those are rejected
    pub default_forward: Option<String>,

    /// Senders whose mail is always marked priority
    #[serde(default)]
    pub trusted_senders: Vec<String>,

    /// Local-parts exempt from urgency escalation
    #[serde(default = "default_personal_exemptions")]
    pub personal_exemptions: Vec<String>,

    /// Managed domains, keyed by domain name
    #[serde(default)]
    pub domains: HashMap<String, DomainConfig>,

    /// Static routes, keyed by local-part
    #[serde(default)]
    pub routes: HashMap<String, RouteEntry>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            management_address: default_management_address(),
            safe_fallback_address: default_safe_fallback(),
            default_forward: None,
            trusted_senders: Vec::new(),
            personal_exemptions: default_personal_exemptions(),
            domains: HashMap::new(),
            routes: HashMap::new(),
        }
    }
}

fn default_management_address() -> String {
    "postmaster@localhost".to_string()
}

fn default_safe_fallback() -> String {
    "postmaster@localhost".to_string()
}

fn default_personal_exemptions() -> Vec<String> {
    vec![
        "personal".to_string(),
        "private".to_string(),
        "family".to_string(),
    ]
}

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Window length in seconds
    #[serde(default = "default_window")]
    pub window_secs: u64,

    /// Sends allowed per window
    #[serde(default = "default_threshold")]
    pub threshold: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: default_window(),
            threshold: default_threshold(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_window() -> u64 {
    3600
}

fn default_threshold() -> u32 {
    50
}

/// Spam heuristic configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamConfig {
    /// Subject keywords; the built-in list is used when empty
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Reject messages the classifier labels as spam
    #[serde(default = "default_true")]
    pub ai_check: bool,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            ai_check: true,
        }
    }
}

/// Inference service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Inference endpoint; classification uses fallbacks only when unset
    pub endpoint: Option<String>,

    /// Bearer token
    pub api_key: Option<String>,

    /// Model identifier passed through to the service
    #[serde(default = "default_model")]
    pub model: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_inference_timeout")]
    pub timeout_ms: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: default_model(),
            timeout_ms: default_inference_timeout(),
        }
    }
}

fn default_model() -> String {
    "@cf/meta/llama-3.1-8b-instruct".to_string()
}

fn default_inference_timeout() -> u64 {
    8000
}

/// Intake endpoint for one workstream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkstreamEndpoint {
    /// Intake URL
    pub url: String,

    /// HMAC secret for request signing
    pub secret: Option<String>,

    /// Request timeout in milliseconds
    #[serde(default = "default_dispatch_timeout")]
    pub timeout_ms: u64,
}

fn default_dispatch_timeout() -> u64 {
    10_000
}

/// Workstream intake endpoints; an absent entry means "not configured"
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkstreamsConfig {
    pub litigation: Option<WorkstreamEndpoint>,
    pub finance: Option<WorkstreamEndpoint>,
    pub compliance: Option<WorkstreamEndpoint>,
}

impl WorkstreamsConfig {
    pub fn endpoint(&self, workstream: Workstream) -> Option<&WorkstreamEndpoint> {
        match workstream {
            Workstream::Litigation => self.litigation.as_ref(),
            Workstream::Finance => self.finance.as_ref(),
            Workstream::Compliance => self.compliance.as_ref(),
        }
    }

    pub fn is_configured(&self, workstream: Workstream) -> bool {
        self.endpoint(workstream).is_some()
    }
}

/// Analytics and alert configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Write routing events to the key-value store
    #[serde(default = "default_true")]
    pub analytics_enabled: bool,

    /// Retention of analytics entries in seconds
    #[serde(default = "default_analytics_ttl")]
    pub analytics_ttl_secs: u64,

    /// Alert webhook URL
    pub webhook_url: Option<String>,

    /// HMAC secret for webhook signing
    pub webhook_secret: Option<String>,

    /// Send an alert for every priority message
    #[serde(default = "default_true")]
    pub alert_on_priority: bool,

    /// Allow webhook targets on loopback/private networks
    #[serde(default)]
    pub allow_private: bool,

    /// Webhook timeout in milliseconds
    #[serde(default = "default_webhook_timeout")]
    pub timeout_ms: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            analytics_enabled: true,
            analytics_ttl_secs: default_analytics_ttl(),
            webhook_url: None,
            webhook_secret: None,
            alert_on_priority: true,
            allow_private: false,
            timeout_ms: default_webhook_timeout(),
        }
    }
}

fn default_analytics_ttl() -> u64 {
    30 * 24 * 3600
}

fn default_webhook_timeout() -> u64 {
    5000
}

/// Outbound SMTP relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_host")]
    pub host: String,

    #[serde(default = "default_relay_port")]
    pub port: u16,

    pub username: Option<String>,

    pub password: Option<String>,

    /// Implicit TLS
    #[serde(default)]
    pub use_tls: bool,

    #[serde(default = "default_true")]
    pub use_starttls: bool,

    /// Envelope sender override for relayed mail
    pub envelope_from: Option<String>,

    #[serde(default = "default_relay_timeout")]
    pub timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_relay_host(),
            port: default_relay_port(),
            username: None,
            password: None,
            use_tls: false,
            use_starttls: true,
            envelope_from: None,
            timeout_secs: default_relay_timeout(),
        }
    }
}

fn default_relay_host() -> String {
    "localhost".to_string()
}

fn default_relay_port() -> u16 {
    25
}

fn default_relay_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        info!(path = %path.display(), "Loading configuration");
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `$MAILROUTER_CONFIG` or the default locations
    pub fn load() -> crate::Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::from_file(Path::new(&path));
        }

        let paths = [
            PathBuf::from("./config.toml"),
            PathBuf::from("/etc/mailrouter/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }

    /// Validate addresses, domain keys and backend settings
    pub fn validate(&self) -> crate::Result<()> {
        let routing = &self.routing;

        require_address("routing.management_address", &routing.management_address)?;
        require_address("routing.safe_fallback_address", &routing.safe_fallback_address)?;

        if let Some(ref address) = routing.default_forward {
            require_address("routing.default_forward", address)?;
        }

        for (domain, domain_config) in &routing.domains {
            if domain.to_lowercase() != *domain {
                return Err(crate::Error::Config(format!(
                    "Domain keys must be lowercase: {}",
                    domain
                )));
            }
            if let Some(ref address) = domain_config.default_forward {
                require_address(&format!("routing.domains.{}.default_forward", domain), address)?;
            }
        }

        // Route keys match case-insensitively, so two keys may not fold together
        let mut route_keys = std::collections::HashSet::new();
        for local in routing.routes.keys() {
            if !route_keys.insert(local.trim().to_lowercase()) {
                return Err(crate::Error::Config(format!(
                    "Duplicate route for local-part: {}",
                    local
                )));
            }
        }

        if self.rate_limit.enabled && self.rate_limit.window_secs == 0 {
            return Err(crate::Error::Config(
                "rate_limit.window_secs must be positive".to_string(),
            ));
        }

        match self.database.backend.as_str() {
            "sqlite" | "memory" => {}
            other => {
                return Err(crate::Error::Config(format!(
                    "Unsupported database backend: {}",
                    other
                )))
            }
        }

        Ok(())
    }
}

fn require_address(field: &str, value: &str) -> crate::Result<()> {
    EmailAddress::parse(value)
        .map(|_| ())
        .ok_or_else(|| crate::Error::Config(format!("{} is not an email address: {}", field, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:8025");
        assert_eq!(config.rate_limit.window_secs, 3600);
        assert_eq!(config.rate_limit.threshold, 50);
        assert!(config.inference.endpoint.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[routing]
management_address = "ops@example.com"
safe_fallback_address = "catchall@example.com"
trusted_senders = ["ceo@partner.com"]

[routing.domains."example.com"]
priority = true

[routing.domains."example.org"]
default_forward = "inbox@example.org"

[routing.routes]
postmaster = "ops@example.com"
bounce = "discard"
receipts = "workstream:finance"

[workstreams.finance]
url = "https://intake.example.com/finance"
secret = "s3cret"

[logging]
format = "text"
"#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.routing.management_address, "ops@example.com");
        assert!(config.routing.domains["example.com"].priority);
        assert_eq!(
            config.routing.domains["example.org"].default_forward.as_deref(),
            Some("inbox@example.org")
        );
        assert_eq!(config.routing.routes["bounce"], RouteEntry::Discard);
        assert_eq!(
            config.routing.routes["receipts"],
            RouteEntry::Workstream(Workstream::Finance)
        );
        assert!(config.workstreams.is_configured(Workstream::Finance));
        assert!(!config.workstreams.is_configured(Workstream::Litigation));
        assert_eq!(config.workstreams.finance.unwrap().timeout_ms, 10_000);
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    fn test_invalid_route_entry_rejected() {
        let toml = r#"
[routing.routes]
sales = "not-an-address"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_invalid_management_address_rejected() {
        let toml = r#"
[routing]
management_address = "nobody"
"#;
        let err = Config::from_toml(toml).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_route_keys_colliding_by_case_rejected() {
        let toml = r#"
[routing.routes]
Sales = "team@example.com"
sales = "other@example.com"
"#;
        let err = Config::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("Duplicate route"));
    }

    #[test]
    fn test_uppercase_domain_key_rejected() {
        let toml = r#"
[routing.domains."Example.com"]
priority = true
"#;
        assert!(Config::from_toml(toml).is_err());
    }
}
