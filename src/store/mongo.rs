//! MongoDB client and typed collection wrapper
//!
//! Collections declare their own indexes; deletes are soft so the audit
//! trail survives admin mistakes. Driver errors map to retryable store
//! unavailability.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::{
    options::{IndexOptions, UpdateModifications},
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, info};

use crate::store::schemas::Metadata;
use crate::types::StoreError;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and verify with a ping; bounded so an unreachable server
    /// fails fast instead of hanging startup.
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, StoreError> {
        info!("Connecting to MongoDB at {}", uri);

        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| StoreError::unavailable(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::unavailable(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection, creating its declared indexes
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, StoreError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }
}

/// Typed MongoDB collection with automatic indexing and soft deletes
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
{
    async fn new(client: &Client, db_name: &str, collection_name: &str) -> Result<Self, StoreError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let wrapped = MongoCollection { inner: collection };
        wrapped.apply_indexes().await?;
        Ok(wrapped)
    }

    async fn apply_indexes(&self) -> Result<(), StoreError> {
        let schema_indices = T::into_indices();
        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| StoreError::unavailable(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Insert a document, stamping metadata timestamps
    pub async fn insert_one(&self, mut item: T) -> Result<ObjectId, StoreError> {
        let metadata = item.mut_metadata();
        metadata.is_deleted = false;
        metadata.created_at = Some(DateTime::now());
        metadata.updated_at = Some(DateTime::now());

        let result = self
            .inner
            .insert_one(item)
            .await
            .map_err(|e| StoreError::unavailable(format!("Insert failed: {}", e)))?;

        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| StoreError::unavailable("Failed to get inserted ID"))
    }

    /// Find one live document by filter
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, StoreError> {
        let mut full_filter = filter;
        full_filter.insert("metadata.is_deleted", doc! { "$ne": true });

        self.inner
            .find_one(full_filter)
            .await
            .map_err(|e| StoreError::unavailable(format!("Find failed: {}", e)))
    }

    /// Find live documents by filter, optionally sorted
    pub async fn find_many(
        &self,
        filter: Document,
        sort: Option<Document>,
    ) -> Result<Vec<T>, StoreError> {
        use futures_util::StreamExt;

        let mut full_filter = filter;
        full_filter.insert("metadata.is_deleted", doc! { "$ne": true });

        let mut find = self.inner.find(full_filter);
        if let Some(sort) = sort {
            find = find.sort(sort);
        }
        let cursor = find
            .await
            .map_err(|e| StoreError::unavailable(format!("Find failed: {}", e)))?;

        let results: Vec<T> = cursor
            .filter_map(|item| async {
                match item {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(results)
    }

    /// Update one document, stamping `updated_at`
    pub async fn update_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<u64, StoreError> {
        let result = self
            .inner
            .update_one(filter, update.into())
            .await
            .map_err(|e| StoreError::unavailable(format!("Update failed: {}", e)))?;
        Ok(result.matched_count)
    }

    /// Soft delete matching documents
    pub async fn soft_delete(&self, filter: Document) -> Result<u64, StoreError> {
        let update = doc! {
            "$set": {
                "metadata.is_deleted": true,
                "metadata.deleted_at": DateTime::now(),
                "metadata.updated_at": DateTime::now(),
            }
        };
        self.update_one(filter, update).await
    }

    /// Get the underlying collection for advanced operations
    pub fn inner(&self) -> &Collection<T> {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    // Collection behavior is covered by integration tests against the
    // in-memory store; exercising this wrapper needs a running MongoDB.
}
