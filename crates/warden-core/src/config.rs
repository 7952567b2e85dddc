use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};

pub const DEFAULT_PORT: u16 = 18080;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Top-level config (`warden.toml` + `WARDEN_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            store: StoreConfig::default(),
            agent: AgentConfig::default(),
            memory: MemoryConfig::default(),
            channel: ChannelConfig::default(),
            tracker: TrackerConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { port: default_port(), bind: default_bind() }
    }
}

/// Root directory for MemoryStore's on-disk layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_root")]
    pub root: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { root: default_store_root() }
    }
}

/// How the AgentRunner invokes the agent CLI subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_binary")]
    pub binary: String,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default = "default_max_compact_retries")]
    pub max_compact_retries: u32,
    #[serde(default = "default_compact_retry_timeout_secs")]
    pub compact_retry_read_timeout_secs: u64,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: default_agent_binary(),
            progress_interval_ms: default_progress_interval_ms(),
            max_compact_retries: default_max_compact_retries(),
            compact_retry_read_timeout_secs: default_compact_retry_timeout_secs(),
            log_dir: default_log_dir(),
        }
    }
}

/// Thresholds for the ObservationPipeline (E), in TokenCounter units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub min_turn_tokens: u32,
    #[serde(default = "default_reflection_threshold")]
    pub reflection_threshold: u32,
    #[serde(default = "default_promotion_threshold")]
    pub promotion_threshold: u32,
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: u32,
    #[serde(default = "default_compaction_target")]
    pub compaction_target: u32,
    #[serde(default = "default_max_persistent_tokens")]
    pub max_persistent_tokens: u32,
    /// Cadence of the background Promoter/Compactor sweep (reflection runs
    /// per-turn instead, right after Observer).
    #[serde(default = "default_consolidation_interval_secs")]
    pub consolidation_interval_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            min_turn_tokens: 0,
            reflection_threshold: default_reflection_threshold(),
            promotion_threshold: default_promotion_threshold(),
            compaction_threshold: default_compaction_threshold(),
            compaction_target: default_compaction_target(),
            max_persistent_tokens: default_max_persistent_tokens(),
            consolidation_interval_secs: default_consolidation_interval_secs(),
        }
    }
}

/// Thresholds for the ChannelObserver pipeline (G)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_threshold_a")]
    pub threshold_a: u32,
    #[serde(default = "default_threshold_b")]
    pub threshold_b: u32,
    #[serde(default = "default_digest_max_tokens")]
    pub digest_max_tokens: u32,
    #[serde(default = "default_digest_target_tokens")]
    pub digest_target_tokens: u32,
    #[serde(default = "default_intervention_threshold")]
    pub intervention_threshold: f64,
    #[serde(default = "default_burst_floor")]
    pub burst_floor: u32,
    #[serde(default = "default_burst_gap_minutes")]
    pub burst_gap_minutes: i64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            threshold_a: default_threshold_a(),
            threshold_b: default_threshold_b(),
            digest_max_tokens: default_digest_max_tokens(),
            digest_target_tokens: default_digest_target_tokens(),
            intervention_threshold: default_intervention_threshold(),
            burst_floor: default_burst_floor(),
            burst_gap_minutes: default_burst_gap_minutes(),
        }
    }
}

/// TrackerWatcher polling cadence (I).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_stale_threshold_secs")]
    pub stale_threshold_secs: i64,
    #[serde(default = "default_compact_timeout_secs")]
    pub compact_timeout_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            stale_threshold_secs: default_stale_threshold_secs(),
            compact_timeout_secs: default_compact_timeout_secs(),
        }
    }
}

/// Supervisor/Deployer cadence (J).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_git_poll_interval_secs")]
    pub git_poll_interval_secs: u64,
    #[serde(default = "default_waiting_sessions_timeout_secs")]
    pub waiting_sessions_timeout_secs: u64,
    #[serde(default = "default_restart_cooldown_secs")]
    pub restart_cooldown_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_health_check_interval_secs(),
            git_poll_interval_secs: default_git_poll_interval_secs(),
            waiting_sessions_timeout_secs: default_waiting_sessions_timeout_secs(),
            restart_cooldown_secs: default_restart_cooldown_secs(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_store_root() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.warden/store")
}
fn default_agent_binary() -> String {
    "claude".to_string()
}
fn default_progress_interval_ms() -> u64 {
    2_000
}
fn default_max_compact_retries() -> u32 {
    3
}
fn default_compact_retry_timeout_secs() -> u64 {
    30
}
fn default_log_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.warden/logs")
}
fn default_reflection_threshold() -> u32 {
    4_000
}
fn default_promotion_threshold() -> u32 {
    20
}
fn default_compaction_threshold() -> u32 {
    8_000
}
fn default_compaction_target() -> u32 {
    4_000
}
fn default_max_persistent_tokens() -> u32 {
    8_000
}
fn default_consolidation_interval_secs() -> u64 {
    600
}
fn default_threshold_a() -> u32 {
    500
}
fn default_threshold_b() -> u32 {
    2_000
}
fn default_digest_max_tokens() -> u32 {
    1_500
}
fn default_digest_target_tokens() -> u32 {
    800
}
fn default_intervention_threshold() -> f64 {
    0.3
}
fn default_burst_floor() -> u32 {
    3
}
fn default_burst_gap_minutes() -> i64 {
    5
}
fn default_poll_interval_secs() -> u64 {
    30
}
fn default_stale_threshold_secs() -> i64 {
    2 * 60 * 60
}
fn default_compact_timeout_secs() -> u64 {
    60
}
fn default_health_check_interval_secs() -> u64 {
    5
}
fn default_git_poll_interval_secs() -> u64 {
    60
}
fn default_waiting_sessions_timeout_secs() -> u64 {
    10 * 60
}
fn default_restart_cooldown_secs() -> u64 {
    60
}

impl WardenConfig {
    /// Load config from a TOML file with `WARDEN_*` env var overrides.
    ///
    /// Checks in order: explicit path argument, then `~/.warden/warden.toml`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path.map(String::from).unwrap_or_else(default_config_path);

        let config: WardenConfig = Figment::from(figment::providers::Serialized::defaults(
            WardenConfig::default(),
        ))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("WARDEN_").split("_"))
        .extract()
        .map_err(|e| WardenError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.warden/warden.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let cfg = WardenConfig::default();
        assert!(cfg.memory.compaction_target < cfg.memory.compaction_threshold);
        assert!(cfg.channel.digest_target_tokens < cfg.channel.digest_max_tokens);
        assert!(cfg.channel.threshold_a < cfg.channel.threshold_b);
    }
}
