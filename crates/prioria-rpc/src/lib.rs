//! Prioria RPC - HTTP API
//!
//! This crate provides the operator-facing HTTP surface of a node and the
//! endpoint peers deliver consensus traffic to.

pub mod error;
pub mod http;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use prioria_consensus::PbftEngine;
use tracing::info;

use http::{create_router, AppState};

pub use error::RpcError;
pub use http::handlers::{
    ChainResponse, EntryResponse, EntrySubmitResponse, MempoolResponse, ProofResponse,
    ValidatorsResponse,
};

/// RPC server configuration
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// HTTP bind address
    pub http_addr: SocketAddr,
}

impl Default for RpcConfig {
    fn default() -> Self {
        RpcConfig {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

/// RPC server
pub struct RpcServer {
    config: RpcConfig,
    app_state: Arc<AppState>,
}

impl RpcServer {
    pub fn new(config: RpcConfig, engine: Arc<PbftEngine>) -> Self {
        RpcServer {
            config,
            app_state: Arc::new(AppState { engine }),
        }
    }

    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.app_state))
    }

    /// Run the RPC server
    pub async fn run(self) -> Result<(), std::io::Error> {
        let router = self.router();
        let addr = self.config.http_addr;

        info!("Starting RPC server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await
    }
}
