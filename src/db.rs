use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};
use thiserror::Error;

use crate::config::StoreConfig;
use crate::models::{CareLogEntry, CareLogUpdate, Tree, TreeUpdate};

pub const TREES_COLLECTION: &str = "trees";
pub const CARE_LOGS_COLLECTION: &str = "careLogs";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] mongodb::bson::ser::Error),

    #[error("Invalid document id '{id}': {reason}")]
    InvalidId { id: String, reason: String },

    #[error("Store did not return an ObjectId for the new document")]
    MissingInsertedId,

    #[error("Write rejected: {0}")]
    Rejected(String),
}

/// Typed access to the `trees` collection.
///
/// Tree identifiers are user-assigned and not unique: creating a tree with
/// an existing `tree_id` adds another document.
#[async_trait]
pub trait TreeRepository: Send + Sync {
    /// Returns the new document id.
    async fn create_tree(&self, tree: Tree) -> Result<String, StoreError>;
    async fn list_trees(&self) -> Result<Vec<Tree>, StoreError>;
    async fn trees_by_tree_id(&self, tree_id: &str) -> Result<Vec<Tree>, StoreError>;
    /// Looks a tree up by document id.
    async fn tree_by_id(&self, id: &str) -> Result<Option<Tree>, StoreError>;
    /// Returns whether a document with `id` existed.
    async fn update_tree(&self, id: &str, update: &TreeUpdate) -> Result<bool, StoreError>;
}

/// Typed access to the `careLogs` collection. `tree_id` is not checked
/// against `trees`.
#[async_trait]
pub trait CareLogRepository: Send + Sync {
    async fn create_care_log(&self, entry: CareLogEntry) -> Result<String, StoreError>;
    async fn list_care_logs(&self) -> Result<Vec<CareLogEntry>, StoreError>;
    async fn care_logs_for_tree(&self, tree_id: &str) -> Result<Vec<CareLogEntry>, StoreError>;
    async fn update_care_log(&self, id: &str, update: &CareLogUpdate) -> Result<bool, StoreError>;
}

pub struct MongoStore {
    trees: Collection<Tree>,
    care_logs: Collection<CareLogEntry>,
}

impl MongoStore {
    /// Connects and pings the server so a bad URI fails early.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let mut client_options = ClientOptions::parse(&config.uri).await?;
        client_options.server_selection_timeout =
            Some(Duration::from_secs(config.server_selection_timeout_secs));
        client_options.app_name = Some("arbolado".to_string());

        let client = Client::with_options(client_options)?;
        let db = client.database(&config.database);

        db.run_command(doc! { "ping": 1 }).await?;
        tracing::info!(database = %config.database, "Connected to MongoDB");

        Ok(Self::new(&db))
    }

    pub fn new(db: &Database) -> Self {
        Self {
            trees: db.collection::<Tree>(TREES_COLLECTION),
            care_logs: db.collection::<CareLogEntry>(CARE_LOGS_COLLECTION),
        }
    }
}

fn parse_object_id(id: &str) -> Result<ObjectId, StoreError> {
    ObjectId::parse_str(id).map_err(|e| StoreError::InvalidId {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

fn inserted_id(id: mongodb::bson::Bson) -> Result<String, StoreError> {
    id.as_object_id()
        .map(|oid| oid.to_hex())
        .ok_or(StoreError::MissingInsertedId)
}

fn tree_set_document(update: &TreeUpdate) -> Result<Document, StoreError> {
    let mut set_ops = doc! {};

    if let Some(ref species) = update.species {
        set_ops.insert("species", species);
    }
    if let Some(ref location) = update.location {
        set_ops.insert("location", location);
    }
    if let Some(ref caretaker) = update.caretaker {
        set_ops.insert("caretaker", caretaker);
    }
    if let Some(health) = update.health {
        set_ops.insert("health", mongodb::bson::to_bson(&health)?);
    }
    if let Some(last_watered) = update.last_watered {
        set_ops.insert("lastWatered", mongodb::bson::to_bson(&last_watered)?);
    }
    if let Some(survival) = update.survival_probability {
        set_ops.insert("survivalProb", i32::from(survival.min(100)));
    }
    if let Some(ref image_url) = update.image_url {
        set_ops.insert("imageUrl", image_url);
    }
    set_ops.insert("updatedAt", mongodb::bson::to_bson(&Utc::now())?);

    Ok(set_ops)
}

fn care_log_set_document(update: &CareLogUpdate) -> Result<Document, StoreError> {
    let mut set_ops = doc! {};

    if let Some(ref caretaker) = update.caretaker {
        set_ops.insert("caretaker", caretaker);
    }
    if let Some(ref notes) = update.notes {
        set_ops.insert("notes", notes);
    }
    if let Some(ref status) = update.status {
        set_ops.insert("status", status);
    }
    if let Some(ref image_url) = update.image_url {
        set_ops.insert("imageUrl", image_url);
    }
    set_ops.insert("updatedAt", mongodb::bson::to_bson(&Utc::now())?);

    Ok(set_ops)
}

#[async_trait]
impl TreeRepository for MongoStore {
    async fn create_tree(&self, tree: Tree) -> Result<String, StoreError> {
        let result = self.trees.insert_one(tree).await?;
        inserted_id(result.inserted_id)
    }

    async fn list_trees(&self) -> Result<Vec<Tree>, StoreError> {
        let cursor = self.trees.find(doc! {}).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn trees_by_tree_id(&self, tree_id: &str) -> Result<Vec<Tree>, StoreError> {
        let cursor = self.trees.find(doc! { "treeId": tree_id }).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn tree_by_id(&self, id: &str) -> Result<Option<Tree>, StoreError> {
        let oid = parse_object_id(id)?;
        Ok(self.trees.find_one(doc! { "_id": oid }).await?)
    }

    async fn update_tree(&self, id: &str, update: &TreeUpdate) -> Result<bool, StoreError> {
        let oid = parse_object_id(id)?;
        let update_ops = doc! { "$set": tree_set_document(update)? };
        let result = self.trees.update_one(doc! { "_id": oid }, update_ops).await?;
        Ok(result.matched_count > 0)
    }
}

#[async_trait]
impl CareLogRepository for MongoStore {
    async fn create_care_log(&self, entry: CareLogEntry) -> Result<String, StoreError> {
        let result = self.care_logs.insert_one(entry).await?;
        inserted_id(result.inserted_id)
    }

    async fn list_care_logs(&self) -> Result<Vec<CareLogEntry>, StoreError> {
        let cursor = self.care_logs.find(doc! {}).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn care_logs_for_tree(&self, tree_id: &str) -> Result<Vec<CareLogEntry>, StoreError> {
        let cursor = self.care_logs.find(doc! { "treeId": tree_id }).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn update_care_log(&self, id: &str, update: &CareLogUpdate) -> Result<bool, StoreError> {
        let oid = parse_object_id(id)?;
        let update_ops = doc! { "$set": care_log_set_document(update)? };
        let result = self.care_logs.update_one(doc! { "_id": oid }, update_ops).await?;
        Ok(result.matched_count > 0)
    }
}
