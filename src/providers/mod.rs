//! Providers Module - External Collaborators
//!
//! Explorer, AI services, vector store, analysis database and the on-chain
//! registry. The pipeline only sees the traits in [`traits`].

pub mod ai_services;
pub mod chain;
pub mod database;
pub mod explorer;
pub mod http;
pub mod traits;
pub mod vector_store;

pub use ai_services::{AgentKitService, DemoAnalyzer, ModelServerService, VeniceService};
pub use chain::AlloyRegistryClient;
pub use database::SqliteRepository;
pub use explorer::EtherscanExplorer;
pub use traits::*;
pub use vector_store::{InMemoryVectorStore, PineconeStore};
