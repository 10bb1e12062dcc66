use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{Document, doc};
use mongodb::error::ErrorKind;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use std::time::Duration;
use tracing::{debug, info};

use super::{RecordStore, StoreError};
use crate::pipeline::{Filter, Pipeline, SortSpec};

/// Where the patient-visit collection lives.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub uri: String,
    pub database: String,
    pub collection: String,
    /// Upper bound for server selection and connection setup.
    pub timeout: Duration,
}

/// A live handle on the patient-visit collection.
///
/// Created once at startup and shared by reference; the collection keeps the
/// driver's connection pool alive.
pub struct MongoStore {
    collection: Collection<Document>,
}

fn classify(e: mongodb::error::Error) -> StoreError {
    match *e.kind {
        ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) | ErrorKind::DnsResolve { .. } => {
            StoreError::Connection(e.to_string())
        }
        _ => StoreError::Query(e.to_string()),
    }
}

impl MongoStore {
    /// Connects and pings the deployment, failing if it is not reachable
    /// within `config.timeout`.
    #[tracing::instrument(skip(config), fields(database = %config.database, collection = %config.collection, timeout_ms = config.timeout.as_millis() as u64))]
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(&config.uri)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        options.server_selection_timeout = Some(config.timeout);
        options.connect_timeout = Some(config.timeout);
        options.app_name = Some(env!("CARGO_PKG_NAME").to_string());

        let client = Client::with_options(options).map_err(classify)?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let collection = client
            .database(&config.database)
            .collection::<Document>(&config.collection);

        info!("Record store connection established");
        Ok(Self { collection })
    }

    pub fn collection(&self) -> &Collection<Document> {
        &self.collection
    }
}

#[async_trait]
impl RecordStore for MongoStore {
    fn backend(&self) -> &'static str {
        "mongodb"
    }

    #[tracing::instrument(skip(self))]
    async fn count(&self, filter: &Filter) -> Result<u64, StoreError> {
        self.collection
            .count_documents(filter.to_document())
            .await
            .map_err(classify)
    }

    #[tracing::instrument(skip_all, fields(stages = pipeline.stages().len()))]
    async fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Document>, StoreError> {
        let stages = pipeline.to_documents();
        debug!(?stages, "Running aggregation");

        let cursor = self.collection.aggregate(stages).await.map_err(classify)?;
        cursor.try_collect::<Vec<_>>().await.map_err(classify)
    }

    #[tracing::instrument(skip(self))]
    async fn find_sorted(
        &self,
        sort: &SortSpec,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let cursor = self
            .collection
            .find(Document::new())
            .sort(sort.to_document())
            .limit(limit as i64)
            .await
            .map_err(classify)?;
        cursor.try_collect::<Vec<_>>().await.map_err(classify)
    }
}
