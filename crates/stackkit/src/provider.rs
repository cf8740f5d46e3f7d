//! Provider traits - the seams between the engine and the real world.
//!
//! The executor never talks to a cloud API directly. It hands fully
//! resolved inputs to a [`ResourceProvider`], waits through a [`Waiter`],
//! and persists through a [`StateSink`]. Tests swap all three.

use crate::error::Result;
use crate::state::{ResourceRecord, StackState};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

// ============================================================================
// Requests and responses
// ============================================================================

/// A resource the executor wants created.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub urn: String,
    pub name: String,
    pub type_token: String,
    /// Inputs with every deferred value resolved
    pub inputs: Map<String, Value>,
    /// Account to operate in, when not the ambient one
    pub target_account: Option<String>,
}

/// A resource the executor wants updated in place.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub urn: String,
    pub name: String,
    pub type_token: String,
    pub inputs: Map<String, Value>,
    /// The record being replaced, including the physical id
    pub previous: ResourceRecord,
    pub target_account: Option<String>,
}

/// A resource the executor wants gone.
#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub urn: String,
    pub name: String,
    pub type_token: String,
    /// Physical identifier from state
    pub id: String,
    /// Inputs the resource was last converged with
    pub inputs: Value,
    pub target_account: Option<String>,
}

/// What the provider reports back after a create or update.
#[derive(Debug, Clone)]
pub struct CreatedResource {
    /// Physical identifier, also surfaced as the `id` output
    pub id: String,
    /// Additional named outputs
    pub outputs: Map<String, Value>,
}

impl CreatedResource {
    /// A resource whose only output is its identifier.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outputs: Map::new(),
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Creates, updates, and deletes physical resources.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn create(&self, request: CreateRequest) -> Result<CreatedResource>;

    async fn update(&self, request: UpdateRequest) -> Result<CreatedResource>;

    async fn delete(&self, request: DeleteRequest) -> Result<()>;
}

/// Sits out propagation barriers.
#[async_trait]
pub trait Waiter: Send + Sync {
    async fn wait(&self, name: &str, duration: Duration);
}

/// Real clock. Barriers block the executor for their full duration.
pub struct TokioWaiter;

#[async_trait]
impl Waiter for TokioWaiter {
    async fn wait(&self, name: &str, duration: Duration) {
        log::info!("barrier '{}': waiting {}s", name, duration.as_secs());
        tokio::time::sleep(duration).await;
    }
}

/// Persists state after every converged step, so an aborted run
/// loses at most the step in flight.
#[async_trait]
pub trait StateSink: Send + Sync {
    async fn persist(&self, state: &StackState) -> Result<()>;
}

/// Discards state. Used by previews and tests.
pub struct NullSink;

#[async_trait]
impl StateSink for NullSink {
    async fn persist(&self, _state: &StackState) -> Result<()> {
        Ok(())
    }
}
