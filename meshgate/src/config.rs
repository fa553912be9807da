use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// When set, unauthenticated connections are rejected at dispatch time.
    #[serde(default)]
    pub auth_required: bool,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth_required: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EncryptionConfig {
    /// Master key mixed with the tenant id to derive per-tenant keys.
    /// Overridable via `MESHGATE_MASTER_KEY`.
    #[serde(default)]
    pub master_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_tool_list_ttl_secs")]
    pub tool_list_ttl_secs: u64,
    #[serde(default = "default_health_ttl_secs")]
    pub health_ttl_secs: u64,
}

fn default_tool_list_ttl_secs() -> u64 {
    300
}
fn default_health_ttl_secs() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tool_list_ttl_secs: default_tool_list_ttl_secs(),
            health_ttl_secs: default_health_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_timeout_secs")]
    pub total_timeout_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
    #[serde(default = "default_crawl_max_pages")]
    pub crawl_max_pages: usize,
    #[serde(default = "default_crawl_max_depth")]
    pub crawl_max_depth: usize,
    #[serde(default = "default_max_operations_per_group")]
    pub max_operations_per_group: usize,
    /// AI-optimised schema synthesis; on unless explicitly disabled.
    #[serde(default = "default_enhance")]
    pub enhance: bool,
}

fn default_discovery_timeout_secs() -> u64 {
    60
}
fn default_probe_timeout_secs() -> u64 {
    5
}
fn default_max_concurrent_probes() -> usize {
    4
}
fn default_crawl_max_pages() -> usize {
    10
}
fn default_crawl_max_depth() -> usize {
    2
}
fn default_max_operations_per_group() -> usize {
    50
}
fn default_enhance() -> bool {
    true
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            total_timeout_secs: default_discovery_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            max_concurrent_probes: default_max_concurrent_probes(),
            crawl_max_pages: default_crawl_max_pages(),
            crawl_max_depth: default_crawl_max_depth(),
            max_operations_per_group: default_max_operations_per_group(),
            enhance: default_enhance(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpClientConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    3
}
fn default_cooldown_secs() -> u64 {
    30
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthSchedulerConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_max_parallel_checks")]
    pub max_parallel_checks: usize,
}

fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_max_parallel_checks() -> usize {
    4
}

impl Default for HealthSchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            max_parallel_checks: default_max_parallel_checks(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    /// Stable node id; a random one is generated when absent.
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default = "default_stream_partitions")]
    pub stream_partitions: u32,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_election_timeout_secs")]
    pub election_timeout_secs: u64,
    #[serde(default = "default_leader_timeout_secs")]
    pub leader_timeout_secs: u64,
    #[serde(default = "default_rebalance_interval_secs")]
    pub rebalance_interval_secs: u64,
}

fn default_stream_partitions() -> u32 {
    16
}
fn default_heartbeat_interval_secs() -> u64 {
    5
}
fn default_election_timeout_secs() -> u64 {
    10
}
fn default_leader_timeout_secs() -> u64 {
    15
}
fn default_rebalance_interval_secs() -> u64 {
    30
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            stream_partitions: default_stream_partitions(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            election_timeout_secs: default_election_timeout_secs(),
            leader_timeout_secs: default_leader_timeout_secs(),
            rebalance_interval_secs: default_rebalance_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub http: HttpClientConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub health: HealthSchedulerConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

impl GatewayConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let mut config: GatewayConfig = serde_yaml::from_str(&raw)?;
        config.apply_env();
        Ok(config)
    }

    /// Environment overrides applied after file loading.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("MESHGATE_MASTER_KEY") {
            if !key.is_empty() {
                self.encryption.master_key = Some(key);
            }
        }
        if let Ok(host) = std::env::var("MESHGATE_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Ok(port) = std::env::var("MESHGATE_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(url) = std::env::var("MESHGATE_REDIS_URL") {
            if !url.is_empty() {
                self.redis = Some(RedisConfig { url, prefix: None });
            }
        }
    }

    /// Master key as secret material; errors when unset.
    pub fn master_key(&self) -> anyhow::Result<SecretString> {
        self.encryption
            .master_key
            .as_ref()
            .filter(|k| !k.is_empty())
            .map(|k| SecretString::from(k.clone()))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "encryption master key not configured (set encryption.master_key or MESHGATE_MASTER_KEY)"
                )
            })
    }
}
