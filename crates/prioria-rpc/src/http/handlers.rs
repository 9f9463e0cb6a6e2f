use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use prioria_chain::{BlockView, ChainStats, EntryProof};
use prioria_consensus::{FaultParams, HandleOutcome, NetMessage, NodeStats, PbftEngine, ScoredValidator};
use prioria_core::{LedgerEntry, PriorityBand};
use prioria_mempool::MempoolStats;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::RpcError;

/// Application state shared with handlers
pub struct AppState {
    pub engine: Arc<PbftEngine>,
}

// Response types

#[derive(Debug, Serialize)]
pub struct ChainResponse {
    pub stats: ChainStats,
    pub blocks: Vec<BlockView>,
}

#[derive(Debug, Serialize)]
pub struct EntrySubmitResponse {
    pub id: String,
    pub status: String,
    pub priority: f64,
    pub band: PriorityBand,
}

#[derive(Debug, Serialize)]
pub struct EntryResponse {
    /// "pending" or "finalized"
    pub status: String,
    pub block_index: Option<u64>,
    pub band: PriorityBand,
    pub entry: LedgerEntry,
}

#[derive(Debug, Serialize)]
pub struct ProofResponse {
    #[serde(flatten)]
    pub proof: EntryProof,
    pub verified: bool,
}

#[derive(Debug, Serialize)]
pub struct PendingSummary {
    pub id: String,
    pub priority: f64,
    pub band: PriorityBand,
    pub created_at: u64,
}

#[derive(Debug, Serialize)]
pub struct MempoolResponse {
    pub stats: MempoolStats,
    pub pending: Vec<PendingSummary>,
}

#[derive(Debug, Serialize)]
pub struct ValidatorsResponse {
    pub fault: FaultParams,
    pub primary: String,
    pub validators: Vec<ScoredValidator>,
}

// Request types

#[derive(Debug, Deserialize)]
pub struct EntrySubmitRequest {
    pub entry: LedgerEntry,
}

#[derive(Debug, Deserialize)]
pub struct MempoolQuery {
    pub limit: Option<usize>,
}

const DEFAULT_PENDING_LIMIT: usize = 20;

// Handlers

/// GET /status - Node statistics
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<NodeStats> {
    Json(state.engine.stats().await)
}

/// GET /chain - Full chain export
pub async fn get_chain(State(state): State<Arc<AppState>>) -> Json<ChainResponse> {
    let chain = state.engine.chain().read().await;
    Json(ChainResponse {
        stats: chain.stats(),
        blocks: chain.export(),
    })
}

/// GET /block/{index} - Block by index
pub async fn get_block(
    State(state): State<Arc<AppState>>,
    Path(index): Path<u64>,
) -> Result<Json<BlockView>, RpcError> {
    let chain = state.engine.chain().read().await;
    chain
        .block(index)
        .map(|block| Json(BlockView::from(block)))
        .ok_or_else(|| RpcError::NotFound(format!("Block {} not found", index)))
}

/// POST /entry - Admit an entry and gossip it
pub async fn submit_entry(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EntrySubmitRequest>,
) -> Result<Json<EntrySubmitResponse>, RpcError> {
    let id = state.engine.submit(request.entry).await?;
    let priority = state
        .engine
        .mempool()
        .get(&id)
        .await
        .map(|entry| entry.priority)
        .unwrap_or_default();

    info!("Entry {} submitted with priority {:.3}", id, priority);

    Ok(Json(EntrySubmitResponse {
        id,
        status: "pending".to_string(),
        priority,
        band: PriorityBand::of(priority),
    }))
}

/// GET /entry/{id} - Pending or finalized entry
pub async fn get_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<EntryResponse>, RpcError> {
    if let Some(entry) = state.engine.mempool().get(&id).await {
        return Ok(Json(EntryResponse {
            status: "pending".to_string(),
            block_index: None,
            band: PriorityBand::of(entry.priority),
            entry,
        }));
    }

    let chain = state.engine.chain().read().await;
    let (index, entry) = chain
        .find_entry(&id)
        .ok_or_else(|| RpcError::NotFound(format!("Entry {} not found", id)))?;
    Ok(Json(EntryResponse {
        status: "finalized".to_string(),
        block_index: Some(index),
        band: PriorityBand::of(entry.priority),
        entry: entry.clone(),
    }))
}

/// GET /entry/{id}/proof - Merkle inclusion proof for a finalized entry
pub async fn get_entry_proof(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ProofResponse>, RpcError> {
    let chain = state.engine.chain().read().await;
    let proof = chain
        .entry_proof(&id)?
        .ok_or_else(|| RpcError::NotFound(format!("Entry {} is not finalized", id)))?;
    let verified = proof.verify();
    Ok(Json(ProofResponse { proof, verified }))
}

/// GET /mempool - Priority statistics and the head of the queue
pub async fn get_mempool(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MempoolQuery>,
) -> Json<MempoolResponse> {
    let mempool = state.engine.mempool();
    let limit = query.limit.unwrap_or(DEFAULT_PENDING_LIMIT);
    let pending = mempool
        .peek(limit)
        .await
        .into_iter()
        .map(|entry| PendingSummary {
            band: PriorityBand::of(entry.priority),
            priority: entry.priority,
            created_at: entry.created_at,
            id: entry.id,
        })
        .collect();

    Json(MempoolResponse {
        stats: mempool.stats().await,
        pending,
    })
}

/// GET /validators - Validator set with current scores
pub async fn get_validators(State(state): State<Arc<AppState>>) -> Json<ValidatorsResponse> {
    let registry = state.engine.registry().read().await;
    Json(ValidatorsResponse {
        fault: state.engine.fault_params(),
        primary: registry.primary(state.engine.view()).id.clone(),
        validators: registry.scored(),
    })
}

/// POST /p2p/message - Inbound peer message
pub async fn p2p_message(
    State(state): State<Arc<AppState>>,
    Json(message): Json<NetMessage>,
) -> Json<HandleOutcome> {
    let kind = message.kind_name();
    let outcome = state.engine.handle_message(message).await;
    debug!("Peer {} handled: {:?}", kind, outcome);
    Json(outcome)
}
