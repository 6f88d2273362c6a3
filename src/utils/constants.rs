//! Constants Module - Single Source of Truth
//!
//! Thresholds, limits, default endpoints and default weights used across
//! the scanner. Other modules import from here instead of repeating values.

// ============================================
// APPLICATION CONSTANTS
// ============================================

/// Application name
pub const APP_NAME: &str = "Scathat Scanner";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent for outbound HTTP requests
pub const USER_AGENT: &str = "ScathatScanner/0.1.0";

// ============================================
// RISK THRESHOLDS
// ============================================

/// Upper bound of the Safe bucket
pub const SAFE_THRESHOLD: f64 = 0.3;

/// Upper bound of the Warning bucket
pub const WARNING_THRESHOLD: f64 = 0.7;

/// Minimum explanation length accepted from an analyzer
pub const MIN_EXPLANATION_LEN: usize = 10;

// ============================================
// MODEL WEIGHTS
// ============================================

/// Weight for model names missing from the weight table
pub const DEFAULT_MODEL_WEIGHT: f64 = 0.1;

/// Default confidence-weighted table
pub const DEFAULT_MODEL_WEIGHTS: [(&str, f64); 4] = [
    ("agentkit", 0.4),
    ("venice", 0.3),
    ("local_llm", 0.2),
    ("heuristics", 0.1),
];

/// Fixed engine weights (source, bytecode, behavior)
pub const ENGINE_SOURCE_WEIGHT: f64 = 0.5;
pub const ENGINE_BYTECODE_WEIGHT: f64 = 0.3;
pub const ENGINE_BEHAVIOR_WEIGHT: f64 = 0.2;

/// Engine model slot names
pub const SLOT_SOURCE: &str = "source";
pub const SLOT_BYTECODE: &str = "bytecode";
pub const SLOT_BEHAVIOR: &str = "behavior";

// ============================================
// EMBEDDING
// ============================================

/// Fixed embedding dimension for the vector store
pub const EMBEDDING_DIM: usize = 128;

/// Source length that maps to feature value 1.0
pub const SOURCE_LENGTH_NORMALIZER: f64 = 10_000.0;

// ============================================
// ENGINE / CACHE
// ============================================

/// Engine result cache capacity
pub const DEFAULT_CACHE_MAX_SIZE: usize = 5000;

/// Engine result cache TTL (seconds)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 600;

/// Single deadline across the three engine models (milliseconds)
pub const DEFAULT_MODEL_TIMEOUT_MS: u64 = 150;

/// Source prefix hashed into the cache key
pub const CACHE_KEY_SOURCE_PREFIX: usize = 1000;

/// Bytecode prefix hashed into the cache key
pub const CACHE_KEY_BYTECODE_PREFIX: usize = 100;

/// Bytecode length (hex chars) above which the size heuristic fires
pub const LARGE_BYTECODE_HEX_LEN: usize = 10_000;

// ============================================
// ORCHESTRATOR
// ============================================

/// Per AI-service call budget (seconds)
pub const DEFAULT_SERVICE_TIMEOUT_SECS: u64 = 30;

// ============================================
// EXPLORER
// ============================================

/// Etherscan-compatible API endpoint
pub const DEFAULT_EXPLORER_URL: &str = "https://api.etherscan.io/api";

/// Explorer request timeout (seconds)
pub const DEFAULT_EXPLORER_TIMEOUT_SECS: u64 = 30;

/// Explorer retries after the first attempt
pub const DEFAULT_EXPLORER_MAX_RETRIES: u32 = 3;

// ============================================
// RETRY
// ============================================

/// First backoff step (milliseconds)
pub const BASE_RETRY_MS: u64 = 1000;

/// Backoff cap (milliseconds)
pub const MAX_RETRY_MS: u64 = 16_000;

/// Jitter applied to each delay, percent of the delay
pub const RETRY_JITTER_PERCENT: u64 = 20;

// ============================================
// CHAIN
// ============================================

/// Ethereum Mainnet
pub const CHAIN_ID_ETHEREUM: u64 = 1;

/// Base Sepolia (registry deployment default)
pub const CHAIN_ID_BASE_SEPOLIA: u64 = 84532;

/// Public RPC for the default registry network
pub const DEFAULT_RPC_URL: &str = "https://sepolia.base.org";

// ============================================
// API
// ============================================

/// Default API port
pub const DEFAULT_API_PORT: u16 = 8080;

/// Requests per rate-limit window
pub const DEFAULT_RATE_LIMIT_REQUESTS: u32 = 100;

/// Rate-limit window (seconds)
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Default lookback for risk history queries
pub const DEFAULT_HISTORY_DAYS: u32 = 30;

/// Default similarity query size
pub const DEFAULT_SIMILAR_TOP_K: usize = 5;

// ============================================
// HELPERS
// ============================================

/// `0x` followed by exactly 40 hex characters
pub fn is_valid_address(address: &str) -> bool {
    match address.strip_prefix("0x").or_else(|| address.strip_prefix("0X")) {
        Some(hex_part) => hex_part.len() == 40 && hex::decode(hex_part).is_ok(),
        None => false,
    }
}

/// Explorer convention for "no code at this address"
pub fn is_empty_bytecode(bytecode: &str) -> bool {
    let trimmed = bytecode.trim();
    trimmed.is_empty() || trimmed == "0x" || trimmed == "0x0"
}
