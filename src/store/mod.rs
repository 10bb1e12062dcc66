//! Record store adapter.
//!
//! [`RecordStore`] is the async trait every query runs against.
//! [`MongoStore`] talks to the document store; [`MemoryStore`] evaluates the
//! same pipelines over records held in memory.

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::{MongoStore, StoreConfig};

use crate::pipeline::{Filter, Pipeline, SortSpec};
use async_trait::async_trait;
use mongodb::bson::Document;
use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached within the configured timeout.
    #[error("record store unavailable: {0}")]
    Connection(String),
    #[error("query rejected by record store: {0}")]
    Query(String),
    #[error("unexpected document shape: {0}")]
    Decode(String),
}

impl From<mongodb::bson::de::Error> for StoreError {
    fn from(e: mongodb::bson::de::Error) -> Self {
        StoreError::Decode(e.to_string())
    }
}

/// Read-only access to one collection of patient-visit documents.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Short tag for logs.
    fn backend(&self) -> &'static str;

    async fn count(&self, filter: &Filter) -> Result<u64, StoreError>;

    async fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Document>, StoreError>;

    /// All documents ordered by `sort`, truncated to `limit`.
    async fn find_sorted(&self, sort: &SortSpec, limit: usize)
    -> Result<Vec<Document>, StoreError>;
}

/// Decodes raw result documents into typed rows.
pub fn decode_rows<T: DeserializeOwned>(docs: Vec<Document>) -> Result<Vec<T>, StoreError> {
    docs.into_iter()
        .map(|d| mongodb::bson::from_document(d).map_err(StoreError::from))
        .collect()
}
