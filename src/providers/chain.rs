//! Results registry contract client (alloy).
//!
//! `writeRiskScore(address,string)` is signed with the deployer key and sent
//! through a filler-enabled HTTP provider; `riskScores(address)` is a plain
//! `eth_call`.

use alloy::network::EthereumWallet;
use alloy::providers::ProviderBuilder;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::transports::http::reqwest::Url;
use alloy_primitives::Address;
use async_trait::async_trait;
use std::str::FromStr;
use tracing::{info, warn};

use crate::models::config::ChainConfig;
use crate::models::errors::{AppError, AppResult};
use crate::providers::traits::RegistryClient;

sol! {
    #[sol(rpc)]
    interface ResultsRegistry {
        function writeRiskScore(address contractAddress, string riskScore) external;
        function riskScores(address contractAddress) external view returns (string);
    }
}

pub struct AlloyRegistryClient {
    rpc_url: Url,
    chain_id: u64,
    registry: Option<Address>,
    signer: Option<PrivateKeySigner>,
}

impl AlloyRegistryClient {
    pub fn new(config: &ChainConfig) -> AppResult<Self> {
        let rpc_url = config
            .rpc_url
            .parse::<Url>()
            .map_err(|e| AppError::invalid_config(format!("Invalid RPC URL: {}", e)))?;

        let registry = config
            .registry_address
            .as_deref()
            .map(|a| {
                Address::from_str(a)
                    .map_err(|e| AppError::invalid_config(format!("Invalid registry address: {}", e)))
            })
            .transpose()?;

        let signer = config
            .signer_key
            .as_deref()
            .map(|key| {
                PrivateKeySigner::from_str(key.trim().trim_start_matches("0x"))
                    .map_err(|e| AppError::invalid_config(format!("Invalid signer key: {}", e)))
            })
            .transpose()?;

        match (&registry, &signer) {
            (Some(r), Some(s)) => info!(
                "⛓️ Registry {} on chain {} (signer {})",
                r,
                config.chain_id,
                s.address()
            ),
            (Some(r), None) => info!("⛓️ Registry {} on chain {} (read-only)", r, config.chain_id),
            _ => warn!("⚠️ RESULTS_REGISTRY_ADDRESS not set, on-chain registry disabled"),
        }

        Ok(Self {
            rpc_url,
            chain_id: config.chain_id,
            registry,
            signer,
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

fn parse_target(address: &str) -> AppResult<Address> {
    Address::from_str(address)
        .map_err(|e| AppError::bad_request(format!("Invalid contract address {}: {}", address, e)))
}

#[async_trait]
impl RegistryClient for AlloyRegistryClient {
    fn can_write(&self) -> bool {
        self.registry.is_some() && self.signer.is_some()
    }

    async fn write_score(&self, address: &str, score: &str) -> AppResult<Option<String>> {
        let (Some(registry), Some(signer)) = (self.registry, self.signer.clone()) else {
            return Ok(None);
        };
        let target = parse_target(address)?;

        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(EthereumWallet::from(signer))
            .on_http(self.rpc_url.clone());
        let contract = ResultsRegistry::new(registry, provider);

        let pending = contract
            .writeRiskScore(target, score.to_string())
            .send()
            .await
            .map_err(|e| AppError::chain_write(format!("writeRiskScore failed: {}", e)))?;
        let tx_hash = format!("{:#x}", pending.tx_hash());

        info!("⛓️ Risk score '{}' for {} submitted: {}", score, address, tx_hash);
        Ok(Some(tx_hash))
    }

    async fn read_score(&self, address: &str) -> AppResult<Option<String>> {
        let registry = self
            .registry
            .ok_or_else(|| AppError::chain_read("Registry address not configured"))?;
        let target = parse_target(address)?;

        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        let contract = ResultsRegistry::new(registry, provider);
        let stored = contract
            .riskScores(target)
            .call()
            .await
            .map_err(|e| AppError::chain_read(format!("riskScores failed: {}", e)))?
            ._0;

        Ok(Some(stored).filter(|s| !s.is_empty()))
    }
}
