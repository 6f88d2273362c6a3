//! Configuration module for the Scathat scanner
//!
//! Every setting is read from the environment (a `.env` file is loaded by
//! the binaries). Optional integrations are `None` when their credentials
//! are absent; the service registry then skips or substitutes them.
//! Secrets are never logged.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::models::errors::{AppError, AppResult};
use crate::utils::constants::{
    BASE_RETRY_MS, CHAIN_ID_BASE_SEPOLIA, CHAIN_ID_ETHEREUM, DEFAULT_API_PORT,
    DEFAULT_CACHE_MAX_SIZE, DEFAULT_CACHE_TTL_SECS, DEFAULT_EXPLORER_MAX_RETRIES,
    DEFAULT_EXPLORER_TIMEOUT_SECS, DEFAULT_EXPLORER_URL, DEFAULT_MODEL_TIMEOUT_MS,
    DEFAULT_MODEL_WEIGHT, DEFAULT_MODEL_WEIGHTS, DEFAULT_RATE_LIMIT_REQUESTS,
    DEFAULT_RATE_LIMIT_WINDOW_SECS, DEFAULT_RPC_URL, DEFAULT_SERVICE_TIMEOUT_SECS,
    ENGINE_BEHAVIOR_WEIGHT, ENGINE_BYTECODE_WEIGHT, ENGINE_SOURCE_WEIGHT,
};

// ============================================
// Env helpers
// ============================================

/// Non-empty env value, ignoring common placeholders
fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != "YOUR_API_KEY" && v != "changeme")
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    match env_string(name) {
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("⚠️ Ignoring invalid value for {}", name);
                default
            }
        },
        None => default,
    }
}

fn env_flag(name: &str) -> bool {
    env_string(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

// ============================================
// Model weights
// ============================================

/// Confidence-weighted aggregation table: model name -> weight
#[derive(Debug, Clone, PartialEq)]
pub struct ModelWeights {
    weights: BTreeMap<String, f64>,
    default_weight: f64,
}

impl Default for ModelWeights {
    fn default() -> Self {
        Self {
            weights: DEFAULT_MODEL_WEIGHTS
                .iter()
                .map(|(name, w)| (name.to_string(), *w))
                .collect(),
            default_weight: DEFAULT_MODEL_WEIGHT,
        }
    }
}

impl ModelWeights {
    /// Build a table, rejecting negative or non-finite weights
    pub fn new<I, S>(weights: I, default_weight: f64) -> AppResult<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        check_weight("default", default_weight)?;
        let mut table = BTreeMap::new();
        for (name, weight) in weights {
            let name = name.into();
            check_weight(&name, weight)?;
            table.insert(name, weight);
        }
        Ok(Self {
            weights: table,
            default_weight,
        })
    }

    /// Parse `"agentkit=0.4,venice=0.3"`. `*=0.05` overrides the default weight.
    pub fn parse(raw: &str) -> AppResult<Self> {
        let mut default_weight = DEFAULT_MODEL_WEIGHT;
        let mut pairs = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = part.split_once('=').ok_or_else(|| {
                AppError::invalid_config(format!("Expected name=weight, got '{}'", part))
            })?;
            let weight: f64 = value.trim().parse().map_err(|_| {
                AppError::invalid_config(format!("Invalid weight for '{}': {}", name.trim(), value))
            })?;
            if name.trim() == "*" {
                default_weight = weight;
            } else {
                pairs.push((name.trim().to_string(), weight));
            }
        }
        Self::new(pairs, default_weight)
    }

    /// Weight for a model, falling back to the default weight
    pub fn weight_for(&self, model_name: &str) -> f64 {
        self.weights
            .get(model_name)
            .copied()
            .unwrap_or(self.default_weight)
    }

    pub fn default_weight(&self) -> f64 {
        self.default_weight
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.weights.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

fn check_weight(name: &str, weight: f64) -> AppResult<()> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(AppError::invalid_config(format!(
            "Weight for '{}' must be finite and non-negative, got {}",
            name, weight
        )));
    }
    Ok(())
}

/// Fixed engine weights for the source / bytecode / behavior slots
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedWeights {
    pub source: f64,
    pub bytecode: f64,
    pub behavior: f64,
}

impl Default for FixedWeights {
    fn default() -> Self {
        Self {
            source: ENGINE_SOURCE_WEIGHT,
            bytecode: ENGINE_BYTECODE_WEIGHT,
            behavior: ENGINE_BEHAVIOR_WEIGHT,
        }
    }
}

// ============================================
// Engine
// ============================================

/// AI engine settings (cache + model deadline)
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cache_max_size: usize,
    pub cache_ttl: Duration,
    /// Single deadline shared by the three engine models
    pub model_timeout: Duration,
    pub weights: FixedWeights,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_max_size: env_parse("SCATHAT_CACHE_MAX_SIZE", DEFAULT_CACHE_MAX_SIZE),
            cache_ttl: Duration::from_secs(env_parse(
                "SCATHAT_CACHE_TTL_SECS",
                DEFAULT_CACHE_TTL_SECS,
            )),
            model_timeout: Duration::from_millis(env_parse(
                "SCATHAT_MODEL_TIMEOUT_MS",
                DEFAULT_MODEL_TIMEOUT_MS,
            )),
            weights: FixedWeights::default(),
        }
    }
}

// ============================================
// Explorer
// ============================================

/// Etherscan-compatible explorer settings
#[derive(Clone)]
pub struct ExplorerConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub chain_id: u64,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_base: Duration,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        let api_key = env_string("ETHERSCAN_API_KEY").or_else(|| env_string("EXPLORER_API_KEY"));
        if api_key.is_some() {
            info!("🔑 Explorer API key configured (key hidden for security)");
        }
        Self {
            base_url: env_string("EXPLORER_API_URL")
                .unwrap_or_else(|| DEFAULT_EXPLORER_URL.to_string()),
            api_key,
            chain_id: env_parse("EXPLORER_CHAIN_ID", CHAIN_ID_ETHEREUM),
            timeout: Duration::from_secs(env_parse(
                "EXPLORER_TIMEOUT_SECS",
                DEFAULT_EXPLORER_TIMEOUT_SECS,
            )),
            max_retries: env_parse("EXPLORER_MAX_RETRIES", DEFAULT_EXPLORER_MAX_RETRIES),
            retry_base: Duration::from_millis(BASE_RETRY_MS),
        }
    }
}

impl fmt::Debug for ExplorerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExplorerConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<hidden>"))
            .field("chain_id", &self.chain_id)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

// ============================================
// Remote AI services
// ============================================

/// Venice inference API
#[derive(Clone)]
pub struct VeniceConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl VeniceConfig {
    pub fn from_env() -> Option<Self> {
        let api_key = env_string("VENICE_API_KEY")?;
        Some(Self {
            base_url: env_string("VENICE_API_URL")
                .unwrap_or_else(|| "https://api.venice.ai/api/v1".to_string()),
            api_key,
            model: env_string("VENICE_MODEL").unwrap_or_else(|| "security-audit".to_string()),
            timeout: Duration::from_secs(env_parse("VENICE_TIMEOUT_SECS", 30)),
        })
    }
}

impl fmt::Debug for VeniceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VeniceConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Local code-analyzer model server (`POST /analyze`)
#[derive(Debug, Clone)]
pub struct ModelServerConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl ModelServerConfig {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            base_url: env_string("MODEL_SERVER_URL")?,
            timeout: Duration::from_secs(env_parse("MODEL_SERVER_TIMEOUT_SECS", 10)),
        })
    }
}

/// AgentKit analysis API
#[derive(Clone)]
pub struct AgentKitConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl AgentKitConfig {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            base_url: env_string("AGENTKIT_API_URL")?,
            api_key: env_string("AGENTKIT_API_KEY"),
            timeout: Duration::from_secs(env_parse("AGENTKIT_TIMEOUT_SECS", 15)),
        })
    }
}

impl fmt::Debug for AgentKitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentKitConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<hidden>"))
            .finish_non_exhaustive()
    }
}

// ============================================
// Vector store
// ============================================

/// Pinecone index settings
#[derive(Clone)]
pub struct PineconeConfig {
    /// Index host, e.g. `https://contracts-abc123.svc.us-east1-gcp.pinecone.io`
    pub index_host: String,
    pub api_key: String,
    pub namespace: Option<String>,
    pub timeout: Duration,
}

impl PineconeConfig {
    /// `None` without an API key. A key without an index host is an error.
    pub fn from_env() -> AppResult<Option<Self>> {
        Self::from_parts(
            env_string("PINECONE_API_KEY"),
            env_string("PINECONE_INDEX_HOST"),
            env_string("PINECONE_NAMESPACE"),
            Duration::from_secs(env_parse("PINECONE_TIMEOUT_SECS", 10)),
        )
    }

    pub fn from_parts(
        api_key: Option<String>,
        index_host: Option<String>,
        namespace: Option<String>,
        timeout: Duration,
    ) -> AppResult<Option<Self>> {
        let Some(api_key) = api_key else {
            return Ok(None);
        };
        let index_host = index_host.ok_or_else(|| AppError::missing_env("PINECONE_INDEX_HOST"))?;
        Ok(Some(Self {
            index_host,
            api_key,
            namespace,
            timeout,
        }))
    }
}

impl fmt::Debug for PineconeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PineconeConfig")
            .field("index_host", &self.index_host)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

// ============================================
// Chain
// ============================================

/// Registry contract connection
#[derive(Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub registry_address: Option<String>,
    /// Hex private key of the deployer; write path is disabled without it
    pub signer_key: Option<String>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        let signer_key = env_string("DEPLOYER_PRIVATE_KEY");
        if signer_key.is_some() {
            info!("🔑 Registry signer configured (key hidden for security)");
        }
        Self {
            rpc_url: env_string("WEB3_RPC_URL")
                .or_else(|| env_string("RPC_URL"))
                .unwrap_or_else(|| DEFAULT_RPC_URL.to_string()),
            chain_id: env_parse("CHAIN_ID", CHAIN_ID_BASE_SEPOLIA),
            registry_address: env_string("RESULTS_REGISTRY_ADDRESS"),
            signer_key,
        }
    }
}

impl ChainConfig {
    /// Registry reads need only the address
    pub fn can_read(&self) -> bool {
        self.registry_address.is_some()
    }

    /// Writes need both registry address and signer
    pub fn can_write(&self) -> bool {
        self.registry_address.is_some() && self.signer_key.is_some()
    }
}

impl fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainConfig")
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("registry_address", &self.registry_address)
            .field("signer_key", &self.signer_key.as_ref().map(|_| "<hidden>"))
            .finish()
    }
}

// ============================================
// API
// ============================================

/// HTTP server settings
#[derive(Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Accepted `X-API-Key` values; empty disables auth
    pub api_keys: Vec<String>,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: env_string("SCATHAT_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_string("PORT")
                .or_else(|| env_string("SCATHAT_PORT"))
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_API_PORT),
            api_keys: env_string("SCATHAT_API_KEYS")
                .map(|keys| {
                    keys.split(',')
                        .map(|k| k.trim().to_string())
                        .filter(|k| !k.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            rate_limit_requests: env_parse("SCATHAT_RATE_LIMIT", DEFAULT_RATE_LIMIT_REQUESTS),
            rate_limit_window: Duration::from_secs(env_parse(
                "SCATHAT_RATE_LIMIT_WINDOW_SECS",
                DEFAULT_RATE_LIMIT_WINDOW_SECS,
            )),
        }
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_keys", &self.api_keys.len())
            .field("rate_limit_requests", &self.rate_limit_requests)
            .field("rate_limit_window", &self.rate_limit_window)
            .finish()
    }
}

// ============================================
// Top-level
// ============================================

/// Everything needed to wire a scanner process
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub explorer: ExplorerConfig,
    pub venice: Option<VeniceConfig>,
    pub model_server: Option<ModelServerConfig>,
    pub agentkit: Option<AgentKitConfig>,
    /// Register the deterministic demo analyzer
    pub demo_analyzer: bool,
    pub pinecone: Option<PineconeConfig>,
    pub chain: ChainConfig,
    pub engine: EngineConfig,
    pub api: ApiConfig,
    pub model_weights: ModelWeights,
    /// `None` keeps the analysis log in memory
    pub database_path: Option<PathBuf>,
    pub service_timeout: Duration,
    pub telemetry_dir: PathBuf,
}

impl ScannerConfig {
    /// Read the full configuration from the environment
    pub fn from_env() -> AppResult<Self> {
        let model_weights = match env_string("SCATHAT_MODEL_WEIGHTS") {
            Some(raw) => ModelWeights::parse(&raw)?,
            None => ModelWeights::default(),
        };

        let config = Self {
            explorer: ExplorerConfig::default(),
            venice: VeniceConfig::from_env(),
            model_server: ModelServerConfig::from_env(),
            agentkit: AgentKitConfig::from_env(),
            demo_analyzer: env_flag("SCATHAT_DEMO_ANALYZER"),
            pinecone: PineconeConfig::from_env()?,
            chain: ChainConfig::default(),
            engine: EngineConfig::default(),
            api: ApiConfig::default(),
            model_weights,
            database_path: env_string("DATABASE_PATH").map(PathBuf::from),
            service_timeout: Duration::from_secs(env_parse(
                "SCATHAT_SERVICE_TIMEOUT_SECS",
                DEFAULT_SERVICE_TIMEOUT_SECS,
            )),
            telemetry_dir: env_string("SCATHAT_TELEMETRY_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./telemetry")),
        };

        if config.explorer.api_key.is_none() {
            warn!("⚠️ ETHERSCAN_API_KEY not set, explorer requests may be throttled");
        }
        Ok(config)
    }
}
