//! Configuration loading: TOML file with defaults, overridden by
//! environment variables, read once at startup (spec §6.3).

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// `broker.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerTransportKind {
    Memory,
    External,
}

/// `broker.backpressure.policy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicyKind {
    DropOldest,
    DropNewest,
    BlockPublisher,
}

/// `replication.consistency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationConsistency {
    Strong,
    Eventual,
}

/// The full recognized configuration surface.
#[derive(Debug, Clone)]
pub struct AmcpConfig {
    pub broker_type: BrokerTransportKind,
    pub broker_backpressure_policy: BackpressurePolicyKind,
    pub broker_delivery_retry_max: u32,
    pub migration_timeout: Duration,
    pub migration_retry_max: u32,
    pub replication_consistency: ReplicationConsistency,
    pub llm_model: String,
    pub llm_base_url: Option<String>,
    pub llm_timeout: Duration,
    pub llm_max_retries: u32,
    pub cache_max_size: usize,
    pub cache_ttl: Duration,
    pub fallback_min_confidence: u8,
    pub fallback_max_rules: usize,
    pub fallback_rules_dir: PathBuf,
    pub registry_heartbeat_interval: Duration,
    pub registry_heartbeat_ttl: Duration,
}

impl Default for AmcpConfig {
    fn default() -> Self {
        Self {
            broker_type: BrokerTransportKind::Memory,
            broker_backpressure_policy: BackpressurePolicyKind::DropOldest,
            broker_delivery_retry_max: 5,
            migration_timeout: Duration::from_secs(30),
            migration_retry_max: 3,
            replication_consistency: ReplicationConsistency::Eventual,
            llm_model: "default".to_string(),
            llm_base_url: None,
            llm_timeout: Duration::from_secs(30),
            llm_max_retries: 3,
            cache_max_size: 1000,
            cache_ttl: Duration::from_secs(3600),
            fallback_min_confidence: 70,
            fallback_max_rules: 500,
            fallback_rules_dir: default_home().join("rules"),
            registry_heartbeat_interval: Duration::from_secs(30),
            registry_heartbeat_ttl: Duration::from_secs(90),
        }
    }
}

/// Load configuration from a TOML file, falling back to defaults on any
/// failure, then apply `AMCP_*` environment variable overrides.
pub fn load_config(path: Option<&Path>) -> AmcpConfig {
    let config_path = path.map(|p| p.to_path_buf()).unwrap_or_else(default_config_path);
    let mut config = if config_path.exists() {
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<toml::Value>(&contents) {
                Ok(value) => {
                    info!(path = %config_path.display(), "loaded configuration");
                    apply_toml(AmcpConfig::default(), &value)
                }
                Err(e) => {
                    warn!(error = %e, path = %config_path.display(), "failed to parse config, using defaults");
                    AmcpConfig::default()
                }
            },
            Err(e) => {
                warn!(error = %e, path = %config_path.display(), "failed to read config file, using defaults");
                AmcpConfig::default()
            }
        }
    } else {
        info!(path = %config_path.display(), "config file not found, using defaults");
        AmcpConfig::default()
    };
    apply_env_overrides(&mut config);
    config
}

fn apply_toml(mut config: AmcpConfig, value: &toml::Value) -> AmcpConfig {
    let table = match value.as_table() {
        Some(t) => t,
        None => return config,
    };
    if let Some(broker) = table.get("broker").and_then(|v| v.as_table()) {
        if let Some(kind) = broker.get("type").and_then(|v| v.as_str()) {
            config.broker_type = parse_broker_kind(kind).unwrap_or(config.broker_type);
        }
        if let Some(bp) = broker.get("backpressure").and_then(|v| v.as_table()) {
            if let Some(policy) = bp.get("policy").and_then(|v| v.as_str()) {
                config.broker_backpressure_policy =
                    parse_backpressure(policy).unwrap_or(config.broker_backpressure_policy);
            }
        }
        if let Some(delivery) = broker.get("delivery").and_then(|v| v.as_table()) {
            if let Some(retry) = delivery.get("retry").and_then(|v| v.as_table()) {
                if let Some(max) = retry.get("max").and_then(|v| v.as_integer()) {
                    config.broker_delivery_retry_max = max.max(0) as u32;
                }
            }
        }
    }
    if let Some(migration) = table.get("migration").and_then(|v| v.as_table()) {
        if let Some(secs) = migration.get("timeout").and_then(|v| v.as_integer()) {
            config.migration_timeout = Duration::from_secs(secs.max(0) as u64);
        }
        if let Some(retry) = migration.get("retry").and_then(|v| v.as_table()) {
            if let Some(max) = retry.get("max").and_then(|v| v.as_integer()) {
                config.migration_retry_max = max.max(0) as u32;
            }
        }
    }
    if let Some(replication) = table.get("replication").and_then(|v| v.as_table()) {
        if let Some(consistency) = replication.get("consistency").and_then(|v| v.as_str()) {
            config.replication_consistency =
                parse_consistency(consistency).unwrap_or(config.replication_consistency);
        }
    }
    if let Some(llm) = table.get("llm").and_then(|v| v.as_table()) {
        if let Some(model) = llm.get("model").and_then(|v| v.as_str()) {
            config.llm_model = model.to_string();
        }
        if let Some(url) = llm.get("base-url").and_then(|v| v.as_str()) {
            config.llm_base_url = Some(url.to_string());
        }
        if let Some(secs) = llm.get("timeout").and_then(|v| v.as_integer()) {
            config.llm_timeout = Duration::from_secs(secs.max(0) as u64);
        }
        if let Some(max) = llm.get("max-retries").and_then(|v| v.as_integer()) {
            config.llm_max_retries = max.max(0) as u32;
        }
    }
    if let Some(cache) = table.get("cache").and_then(|v| v.as_table()) {
        if let Some(size) = cache.get("max-size").and_then(|v| v.as_integer()) {
            config.cache_max_size = size.max(0) as usize;
        }
        if let Some(secs) = cache.get("ttl").and_then(|v| v.as_integer()) {
            config.cache_ttl = Duration::from_secs(secs.max(0) as u64);
        }
    }
    if let Some(fallback) = table.get("fallback").and_then(|v| v.as_table()) {
        if let Some(conf) = fallback.get("min-confidence").and_then(|v| v.as_integer()) {
            config.fallback_min_confidence = conf.clamp(0, 100) as u8;
        }
        if let Some(max) = fallback.get("max-rules").and_then(|v| v.as_integer()) {
            config.fallback_max_rules = max.max(0) as usize;
        }
        if let Some(dir) = fallback.get("rules-dir").and_then(|v| v.as_str()) {
            config.fallback_rules_dir = PathBuf::from(dir);
        }
    }
    if let Some(registry) = table.get("registry").and_then(|v| v.as_table()) {
        if let Some(heartbeat) = registry.get("heartbeat").and_then(|v| v.as_table()) {
            if let Some(secs) = heartbeat.get("interval").and_then(|v| v.as_integer()) {
                config.registry_heartbeat_interval = Duration::from_secs(secs.max(0) as u64);
            }
            if let Some(secs) = heartbeat.get("ttl").and_then(|v| v.as_integer()) {
                config.registry_heartbeat_ttl = Duration::from_secs(secs.max(0) as u64);
            }
        }
    }
    config
}

fn apply_env_overrides(config: &mut AmcpConfig) {
    if let Ok(v) = std::env::var("AMCP_BROKER_TYPE") {
        if let Some(kind) = parse_broker_kind(&v) {
            config.broker_type = kind;
        }
    }
    if let Ok(v) = std::env::var("AMCP_BROKER_BACKPRESSURE_POLICY") {
        if let Some(policy) = parse_backpressure(&v) {
            config.broker_backpressure_policy = policy;
        }
    }
    if let Ok(v) = std::env::var("AMCP_BROKER_DELIVERY_RETRY_MAX") {
        if let Ok(n) = v.parse() {
            config.broker_delivery_retry_max = n;
        }
    }
    if let Ok(v) = std::env::var("AMCP_MIGRATION_TIMEOUT_SECS") {
        if let Ok(n) = v.parse() {
            config.migration_timeout = Duration::from_secs(n);
        }
    }
    if let Ok(v) = std::env::var("AMCP_LLM_MODEL") {
        config.llm_model = v;
    }
    if let Ok(v) = std::env::var("AMCP_LLM_BASE_URL") {
        config.llm_base_url = Some(v);
    }
    if let Ok(v) = std::env::var("AMCP_LLM_TIMEOUT_SECS") {
        if let Ok(n) = v.parse() {
            config.llm_timeout = Duration::from_secs(n);
        }
    }
    if let Ok(v) = std::env::var("AMCP_LLM_MAX_RETRIES") {
        if let Ok(n) = v.parse() {
            config.llm_max_retries = n;
        }
    }
    if let Ok(v) = std::env::var("AMCP_CACHE_MAX_SIZE") {
        if let Ok(n) = v.parse() {
            config.cache_max_size = n;
        }
    }
    if let Ok(v) = std::env::var("AMCP_FALLBACK_MIN_CONFIDENCE") {
        if let Ok(n) = v.parse::<u8>() {
            config.fallback_min_confidence = n.min(100);
        }
    }
    if let Ok(v) = std::env::var("AMCP_FALLBACK_RULES_DIR") {
        config.fallback_rules_dir = PathBuf::from(v);
    }
}

fn parse_broker_kind(s: &str) -> Option<BrokerTransportKind> {
    match s {
        "memory" => Some(BrokerTransportKind::Memory),
        "external" => Some(BrokerTransportKind::External),
        _ => None,
    }
}

fn parse_backpressure(s: &str) -> Option<BackpressurePolicyKind> {
    match s {
        "drop-oldest" => Some(BackpressurePolicyKind::DropOldest),
        "drop-newest" => Some(BackpressurePolicyKind::DropNewest),
        "block-publisher" => Some(BackpressurePolicyKind::BlockPublisher),
        _ => None,
    }
}

fn parse_consistency(s: &str) -> Option<ReplicationConsistency> {
    match s {
        "strong" => Some(ReplicationConsistency::Strong),
        "eventual" => Some(ReplicationConsistency::Eventual),
        _ => None,
    }
}

fn default_home() -> PathBuf {
    std::env::var("AMCP_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            std::env::var("HOME")
                .map(|h| PathBuf::from(h).join(".amcp"))
                .unwrap_or_else(|_| std::env::temp_dir().join(".amcp"))
        })
}

/// Default config file path: `$AMCP_HOME/config.toml`, or `~/.amcp/config.toml`.
pub fn default_config_path() -> PathBuf {
    default_home().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AmcpConfig::default();
        assert_eq!(config.fallback_min_confidence, 70);
        assert_eq!(config.broker_backpressure_policy, BackpressurePolicyKind::DropOldest);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/amcp-config-test.toml")));
        assert_eq!(config.llm_model, "default");
    }

    #[test]
    fn toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [llm]
            model = "gpt-4"
            timeout = 10

            [fallback]
            min-confidence = 55
            "#,
        )
        .unwrap();
        let config = load_config(Some(&path));
        assert_eq!(config.llm_model, "gpt-4");
        assert_eq!(config.llm_timeout, Duration::from_secs(10));
        assert_eq!(config.fallback_min_confidence, 55);
    }
}
