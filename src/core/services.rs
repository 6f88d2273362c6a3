//! Service wiring
//!
//! Builds every collaborator from [`ScannerConfig`] and hands the binaries a
//! ready orchestrator. Optional integrations without credentials are skipped
//! (or replaced by the demo analyzer / in-memory stores) with a warning.

use std::sync::Arc;
use tracing::{info, warn};

use crate::core::aggregator::AiAggregator;
use crate::core::engine::AiEngine;
use crate::core::orchestrator::ScanOrchestrator;
use crate::models::config::ScannerConfig;
use crate::models::errors::AppResult;
use crate::providers::ai_services::{
    AgentKitService, DemoAnalyzer, ModelServerService, VeniceService, AGENTKIT_SERVICE_NAME,
};
use crate::providers::chain::AlloyRegistryClient;
use crate::providers::database::SqliteRepository;
use crate::providers::explorer::EtherscanExplorer;
use crate::providers::traits::{AiService, AnalysisRepository, RegistryClient, VectorStore};
use crate::providers::vector_store::{InMemoryVectorStore, PineconeStore};
use crate::utils::telemetry::ScanTelemetry;

/// Everything a scanner process shares between requests
#[derive(Clone)]
pub struct ScannerServices {
    pub orchestrator: Arc<ScanOrchestrator>,
    /// Local engine, for cache stats and maintenance
    pub engine: Option<Arc<AiEngine>>,
    pub registry: Option<Arc<dyn RegistryClient>>,
    pub telemetry: Arc<ScanTelemetry>,
}

impl ScannerServices {
    pub fn from_config(config: &ScannerConfig) -> AppResult<Self> {
        let aggregator = Arc::new(
            AiAggregator::new(config.model_weights.clone()).with_fixed_weights(config.engine.weights),
        );
        let engine = Arc::new(AiEngine::new(&config.engine, Arc::clone(&aggregator)));
        let telemetry = Arc::new(ScanTelemetry::new(config.telemetry_dir.clone()));

        let services = build_services(config, &engine)?;
        let names: Vec<&str> = services.iter().map(|s| s.name()).collect();
        info!("🤖 AI services: {}", names.join(", "));

        let vector_store: Arc<dyn VectorStore> = match &config.pinecone {
            Some(pinecone) => {
                info!("🧭 Vector store: Pinecone ({})", pinecone.index_host);
                Arc::new(PineconeStore::new(pinecone.clone())?)
            }
            None => {
                warn!("⚠️ PINECONE_API_KEY not set, using in-memory vector store");
                Arc::new(InMemoryVectorStore::new())
            }
        };

        let repository: Arc<dyn AnalysisRepository> = match &config.database_path {
            Some(path) => {
                info!("🗄️ Analysis database: {}", path.display());
                Arc::new(SqliteRepository::open(path)?)
            }
            None => {
                warn!("⚠️ DATABASE_PATH not set, analysis log kept in memory");
                Arc::new(SqliteRepository::open_in_memory()?)
            }
        };

        let registry: Option<Arc<dyn RegistryClient>> = if config.chain.can_read() {
            Some(Arc::new(AlloyRegistryClient::new(&config.chain)?))
        } else {
            warn!("⚠️ RESULTS_REGISTRY_ADDRESS not set, on-chain registry disabled");
            None
        };

        let explorer = Arc::new(EtherscanExplorer::new(config.explorer.clone())?);
        let orchestrator = ScanOrchestrator::new(explorer, aggregator)
            .with_services(services)
            .with_vector_store(vector_store)
            .with_repository(repository)
            .with_telemetry(Arc::clone(&telemetry))
            .with_service_timeout(config.service_timeout);

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            engine: Some(engine),
            registry,
            telemetry,
        })
    }
}

/// Remote services first, local engine last
fn build_services(config: &ScannerConfig, engine: &Arc<AiEngine>) -> AppResult<Vec<Arc<dyn AiService>>> {
    let mut services: Vec<Arc<dyn AiService>> = Vec::new();

    match &config.agentkit {
        Some(agentkit) => services.push(Arc::new(
            AgentKitService::new(agentkit.clone())?.with_chain_id(config.chain.chain_id),
        )),
        None if config.demo_analyzer => {
            warn!("⚠️ AGENTKIT_API_URL not set, using deterministic demo analyzer");
            services.push(Arc::new(DemoAnalyzer::new(AGENTKIT_SERVICE_NAME)));
        }
        None => warn!("⚠️ AGENTKIT_API_URL not set, AgentKit analysis disabled"),
    }

    match &config.venice {
        Some(venice) => services.push(Arc::new(VeniceService::new(venice.clone())?)),
        None => warn!("⚠️ VENICE_API_KEY not set, Venice analysis disabled"),
    }

    match &config.model_server {
        Some(server) => services.push(Arc::new(ModelServerService::new(server.clone())?)),
        None => warn!("⚠️ MODEL_SERVER_URL not set, local model analysis disabled"),
    }

    services.push(Arc::clone(engine) as Arc<dyn AiService>);
    Ok(services)
}
