//! Centralized Error Handling Module
//!
//! Every failure in the scanner carries a unique error code so logs and
//! API responses can be filtered per failure class.
//!
//! Error codes follow pattern: CATEGORY_SPECIFIC_ERROR
//! - EXPLORER_xxx: block explorer errors
//! - ANALYZER_xxx: AI analyzer errors
//! - STORE_xxx: vector store / database errors
//! - CHAIN_xxx: registry contract errors
//! - API_xxx: API errors
//! - CFG_xxx: Configuration errors

use std::fmt;

/// Application-wide error type
#[derive(Debug)]
pub struct AppError {
    /// Unique error code for logging/monitoring
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Optional underlying error
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new AppError
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create AppError with source error
    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get error code as string (for logging)
    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Unique error codes for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // ============================================
    // Explorer Errors
    // ============================================
    /// Explorer unreachable or returned an HTTP error
    ExplorerUnavailable,
    /// Explorer rate limited (HTTP 429 or NOTOK rate limit message)
    ExplorerRateLimited,
    /// Explorer payload could not be interpreted
    ExplorerInvalidResponse,

    // ============================================
    // Analyzer Errors
    // ============================================
    /// Analyzer call failed
    AnalyzerFailed,
    /// Analyzer exceeded its time budget
    AnalyzerTimeout,
    /// Required analyzer input (source or bytecode) missing
    AnalyzerMissingInput,
    /// Analyzer output failed validation
    AnalyzerInvalidOutput,

    // ============================================
    // Aggregation Errors
    // ============================================
    /// Aggregation could not produce a verdict
    AggregationFailed,

    // ============================================
    // Persistence Errors
    // ============================================
    /// Vector store request failed
    VectorStoreError,
    /// Database operation failed
    DatabaseError,

    // ============================================
    // Chain Errors
    // ============================================
    /// Registry write transaction failed
    ChainWriteFailed,
    /// Registry read call failed
    ChainReadFailed,

    // ============================================
    // API Errors
    // ============================================
    /// Invalid request format
    ApiBadRequest,
    /// Unauthorized (invalid API key)
    ApiUnauthorized,
    /// Rate limit exceeded
    ApiRateLimited,
    /// Internal server error
    ApiInternalError,
    /// Resource not found
    ApiNotFound,

    // ============================================
    // Configuration Errors
    // ============================================
    /// Missing environment variable
    ConfigMissingEnv,
    /// Invalid configuration value
    ConfigInvalidValue,

    // ============================================
    // Generic Errors
    // ============================================
    /// External service timeout
    ExternalTimeout,
    /// Unknown error
    Unknown,
}

impl ErrorCode {
    /// Get string representation of error code
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExplorerUnavailable => "EXPLORER_UNAVAILABLE",
            Self::ExplorerRateLimited => "EXPLORER_RATE_LIMITED",
            Self::ExplorerInvalidResponse => "EXPLORER_INVALID_RESPONSE",

            Self::AnalyzerFailed => "ANALYZER_FAILED",
            Self::AnalyzerTimeout => "ANALYZER_TIMEOUT",
            Self::AnalyzerMissingInput => "ANALYZER_MISSING_INPUT",
            Self::AnalyzerInvalidOutput => "ANALYZER_INVALID_OUTPUT",

            Self::AggregationFailed => "AGGREGATION_FAILED",

            Self::VectorStoreError => "STORE_VECTOR_ERROR",
            Self::DatabaseError => "STORE_DATABASE_ERROR",

            Self::ChainWriteFailed => "CHAIN_WRITE_FAILED",
            Self::ChainReadFailed => "CHAIN_READ_FAILED",

            Self::ApiBadRequest => "API_BAD_REQUEST",
            Self::ApiUnauthorized => "API_UNAUTHORIZED",
            Self::ApiRateLimited => "API_RATE_LIMITED",
            Self::ApiInternalError => "API_INTERNAL_ERROR",
            Self::ApiNotFound => "API_NOT_FOUND",

            Self::ConfigMissingEnv => "CFG_MISSING_ENV",
            Self::ConfigInvalidValue => "CFG_INVALID_VALUE",

            Self::ExternalTimeout => "EXTERNAL_TIMEOUT",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// Get HTTP status code for API responses
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ApiBadRequest | Self::ConfigInvalidValue => 400,
            Self::ApiUnauthorized => 401,
            Self::ApiNotFound => 404,
            Self::ApiRateLimited | Self::ExplorerRateLimited => 429,
            Self::ExplorerUnavailable | Self::ChainReadFailed | Self::ChainWriteFailed => 502,
            Self::ExternalTimeout | Self::AnalyzerTimeout => 504,
            _ => 500,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ExplorerUnavailable
                | Self::ExplorerRateLimited
                | Self::AnalyzerTimeout
                | Self::ExternalTimeout
        )
    }
}

// ============================================
// Convenience constructors
// ============================================

impl AppError {
    pub fn explorer_unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExplorerUnavailable, msg)
    }

    pub fn explorer_rate_limited() -> Self {
        Self::new(ErrorCode::ExplorerRateLimited, "Explorer rate limit reached")
    }

    pub fn explorer_invalid(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExplorerInvalidResponse, msg)
    }

    pub fn analyzer_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::AnalyzerFailed, msg)
    }

    pub fn analyzer_timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::AnalyzerTimeout, msg)
    }

    /// Required input for an analyzer is absent
    pub fn missing_input(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::AnalyzerMissingInput, msg)
    }

    pub fn invalid_output(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::AnalyzerInvalidOutput, msg)
    }

    pub fn aggregation_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::AggregationFailed, msg)
    }

    pub fn vector_store(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::VectorStoreError, msg)
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, msg)
    }

    pub fn chain_write(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ChainWriteFailed, msg)
    }

    pub fn chain_read(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ChainReadFailed, msg)
    }

    pub fn missing_env(name: &str) -> Self {
        Self::new(
            ErrorCode::ConfigMissingEnv,
            format!("Missing environment variable: {}", name),
        )
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigInvalidValue, msg)
    }

    /// API bad request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ApiBadRequest, msg)
    }

    /// API not found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ApiNotFound, msg)
    }

    /// API internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ApiInternalError, msg)
    }
}

// ============================================
// Result type alias
// ============================================

/// Application Result type
pub type AppResult<T> = Result<T, AppError>;

// ============================================
// Conversion from common error types
// ============================================

impl From<eyre::Report> for AppError {
    fn from(err: eyre::Report) -> Self {
        Self::new(ErrorCode::Unknown, err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(ErrorCode::Unknown, "IO error", err)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::new(ErrorCode::ExternalTimeout, "Request timeout")
        } else if err.is_connect() {
            Self::new(ErrorCode::ExplorerUnavailable, "Connection failed")
        } else if err.status().map(|s| s.as_u16()) == Some(429) {
            Self::new(ErrorCode::ExplorerRateLimited, "Rate limited (HTTP 429)")
        } else {
            Self::new(ErrorCode::Unknown, err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(ErrorCode::ExplorerInvalidResponse, "JSON parse error", err)
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        Self::with_source(ErrorCode::DatabaseError, "SQLite error", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = AppError::analyzer_timeout("venice exceeded 10s");
        assert_eq!(err.code, ErrorCode::AnalyzerTimeout);
        assert_eq!(err.code_str(), "ANALYZER_TIMEOUT");
        assert_eq!(err.to_string(), "[ANALYZER_TIMEOUT] venice exceeded 10s");
    }

    #[test]
    fn test_retryable() {
        assert!(ErrorCode::ExplorerRateLimited.is_retryable());
        assert!(ErrorCode::ExternalTimeout.is_retryable());
        assert!(!ErrorCode::AnalyzerInvalidOutput.is_retryable());
        assert!(!ErrorCode::DatabaseError.is_retryable());
    }

    #[test]
    fn test_http_status() {
        assert_eq!(ErrorCode::ApiBadRequest.http_status(), 400);
        assert_eq!(ErrorCode::ApiNotFound.http_status(), 404);
        assert_eq!(ErrorCode::ApiRateLimited.http_status(), 429);
        assert_eq!(ErrorCode::ChainReadFailed.http_status(), 502);
        assert_eq!(ErrorCode::AggregationFailed.http_status(), 500);
    }
}
