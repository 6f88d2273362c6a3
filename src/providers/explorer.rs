//! Etherscan-compatible explorer client.
//!
//! `contract/getsourcecode` for verified source + compiler metadata and
//! `proxy/eth_getCode` for deployed bytecode. The explorer signals rate
//! limiting either with HTTP 429 or with a `NOTOK` envelope whose `result`
//! mentions "rate limit"; both are retried with backoff.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::models::config::ExplorerConfig;
use crate::models::errors::{AppError, AppResult};
use crate::models::types::SourceInfo;
use crate::providers::http::{build_client, status_error, with_retry, Upstream};
use crate::providers::traits::ContractExplorer;
use crate::utils::constants::is_empty_bytecode;

#[derive(Clone)]
pub struct EtherscanExplorer {
    client: reqwest::Client,
    config: ExplorerConfig,
}

impl EtherscanExplorer {
    pub fn new(config: ExplorerConfig) -> AppResult<Self> {
        let client = build_client(config.timeout)?;
        info!(
            "🔍 Explorer client ready ({}, chain {})",
            config.base_url, config.chain_id
        );
        Ok(Self { client, config })
    }

    async fn request(&self, module: &str, action: &str, address: &str) -> AppResult<Value> {
        let label = format!("explorer {}/{}", module, action);
        with_retry(&label, self.config.max_retries, self.config.retry_base, move || {
            self.request_once(module, action, address)
        })
        .await
    }

    async fn request_once(&self, module: &str, action: &str, address: &str) -> AppResult<Value> {
        let chain_id = self.config.chain_id.to_string();
        let mut params = vec![
            ("module", module),
            ("action", action),
            ("address", address),
            ("chainid", chain_id.as_str()),
        ];
        if action == "eth_getCode" {
            params.push(("tag", "latest"));
        }
        if let Some(key) = self.config.api_key.as_deref() {
            params.push(("apikey", key));
        }

        let response = self
            .client
            .get(&self.config.base_url)
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(Upstream::Explorer, "explorer", status));
        }

        let body: Value = response.json().await?;
        if is_rate_limited(&body) {
            return Err(AppError::explorer_rate_limited());
        }
        Ok(body)
    }
}

#[async_trait]
impl ContractExplorer for EtherscanExplorer {
    async fn get_source(&self, address: &str) -> AppResult<Option<SourceInfo>> {
        let body = self.request("contract", "getsourcecode", address).await?;
        let info = parse_source_response(&body)?;
        match &info {
            Some(i) => debug!("📄 Verified source for {} ({})", address, i.contract_name),
            None => debug!("📄 No verified source for {}", address),
        }
        Ok(info)
    }

    async fn get_bytecode(&self, address: &str) -> AppResult<Option<String>> {
        let body = self.request("proxy", "eth_getCode", address).await?;
        let code = parse_code_response(&body)?;
        if code.is_none() {
            warn!("⚠️ No bytecode deployed at {}", address);
        }
        Ok(code)
    }
}

fn is_rate_limited(body: &Value) -> bool {
    let notok = body.get("message").and_then(Value::as_str) == Some("NOTOK")
        || body.get("status").and_then(Value::as_str) == Some("0");
    let result_text = body
        .get("result")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();
    notok && result_text.contains("rate limit")
}

fn field<'a>(entry: &'a Value, name: &str) -> &'a str {
    entry.get(name).and_then(Value::as_str).unwrap_or_default().trim()
}

/// Interpret a `getsourcecode` envelope; `None` when the contract is unverified
pub fn parse_source_response(body: &Value) -> AppResult<Option<SourceInfo>> {
    let status = body.get("status").and_then(Value::as_str).unwrap_or("0");
    let entry = match body.get("result") {
        Some(Value::Array(items)) => items.first(),
        _ => None,
    };

    let entry = match (status, entry) {
        ("1", Some(entry)) => entry,
        ("1", None) => {
            return Err(AppError::explorer_invalid("getsourcecode returned no result entry"))
        }
        _ => {
            let message = body
                .get("result")
                .and_then(Value::as_str)
                .or_else(|| body.get("message").and_then(Value::as_str))
                .unwrap_or("unknown error");
            // Invalid address / not verified are normal "no source" answers
            debug!("Explorer getsourcecode status {}: {}", status, message);
            return Ok(None);
        }
    };

    let source_code = field(entry, "SourceCode");
    if source_code.is_empty() {
        return Ok(None);
    }

    let optional = |name: &str| Some(field(entry, name).to_string()).filter(|v| !v.is_empty());

    Ok(Some(SourceInfo {
        source_code: source_code.to_string(),
        contract_name: field(entry, "ContractName").to_string(),
        compiler_version: field(entry, "CompilerVersion").to_string(),
        verified: true,
        optimization_used: field(entry, "OptimizationUsed") == "1",
        runs: field(entry, "Runs").parse().unwrap_or(0),
        is_proxy: field(entry, "Proxy") == "1",
        implementation: optional("Implementation"),
        library: optional("Library"),
        license: optional("LicenseType"),
        evm_version: optional("EVMVersion"),
    }))
}

/// Interpret a `proxy/eth_getCode` JSON-RPC envelope; `None` when no code is deployed
pub fn parse_code_response(body: &Value) -> AppResult<Option<String>> {
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown RPC error");
        return Err(AppError::explorer_invalid(format!("eth_getCode failed: {}", message)));
    }

    let code = body
        .get("result")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::explorer_invalid("eth_getCode returned no result"))?;

    if !code.starts_with("0x") {
        return Err(AppError::explorer_invalid(format!(
            "eth_getCode returned non-hex result: {}",
            code.chars().take(64).collect::<String>()
        )));
    }
    if is_empty_bytecode(code) {
        return Ok(None);
    }
    Ok(Some(code.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_verified_source() {
        let body = json!({
            "status": "1",
            "message": "OK",
            "result": [{
                "SourceCode": "pragma solidity ^0.8.0; contract Token { }",
                "ABI": "[]",
                "ContractName": "Token",
                "CompilerVersion": "v0.8.19+commit.7dd6d404",
                "OptimizationUsed": "1",
                "Runs": "200",
                "EVMVersion": "paris",
                "Library": "",
                "LicenseType": "MIT",
                "Proxy": "1",
                "Implementation": "0x1111111111111111111111111111111111111111"
            }]
        });

        let info = parse_source_response(&body).unwrap().unwrap();
        assert_eq!(info.contract_name, "Token");
        assert!(info.verified);
        assert!(info.optimization_used);
        assert_eq!(info.runs, 200);
        assert!(info.is_proxy);
        assert_eq!(
            info.implementation.as_deref(),
            Some("0x1111111111111111111111111111111111111111")
        );
        assert_eq!(info.library, None);
        assert_eq!(info.license.as_deref(), Some("MIT"));
        assert_eq!(info.evm_version.as_deref(), Some("paris"));
    }

    #[test]
    fn test_parse_unverified_source() {
        let body = json!({
            "status": "1",
            "message": "OK",
            "result": [{
                "SourceCode": "",
                "ABI": "Contract source code not verified",
                "ContractName": "",
                "CompilerVersion": ""
            }]
        });
        assert!(parse_source_response(&body).unwrap().is_none());

        let invalid = json!({"status": "0", "message": "NOTOK", "result": "Invalid Address format"});
        assert!(parse_source_response(&invalid).unwrap().is_none());
    }

    #[test]
    fn test_rate_limit_detection() {
        let limited = json!({"status": "0", "message": "NOTOK", "result": "Max rate limit reached"});
        assert!(is_rate_limited(&limited));

        let other = json!({"status": "0", "message": "NOTOK", "result": "Invalid API Key"});
        assert!(!is_rate_limited(&other));
    }

    #[test]
    fn test_parse_code() {
        let code = json!({"jsonrpc": "2.0", "id": 1, "result": "0x6080604052"});
        assert_eq!(parse_code_response(&code).unwrap().as_deref(), Some("0x6080604052"));

        let empty = json!({"jsonrpc": "2.0", "id": 1, "result": "0x"});
        assert!(parse_code_response(&empty).unwrap().is_none());

        let error = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32602, "message": "invalid argument"}});
        assert!(parse_code_response(&error).is_err());

        let notok = json!({"status": "0", "message": "NOTOK", "result": "Invalid API Key"});
        assert!(parse_code_response(&notok).is_err());
    }
}
