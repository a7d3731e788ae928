//! MongoDB event sink.
//!
//! Events are stored as their camelCase serde document in an `events`
//! collection, plus a `naturalKey` field that carries the same
//! `(title, start date)` identity the DuckDB table uses as its primary key.

use super::{EventSink, SaveOutcome};
use crate::config::{OnDuplicate, StorageConfig};
use crate::models::Event;
use anyhow::{Context, Result};
use async_trait::async_trait;
use mongodb::bson::{doc, to_document, Document};
use mongodb::{Client, Collection};
use tracing::{debug, info};

const COLLECTION: &str = "events";

pub struct MongoStore {
    events: Collection<Document>,
}

impl MongoStore {
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let Some(uri) = config.mongodb_uri.as_deref() else {
            anyhow::bail!("MongoDB storage needs storage.mongodb_uri or MONGODB_URI");
        };
        let client = Client::with_uri_str(uri)
            .await
            .context("Failed to connect to MongoDB")?;
        let db = client
            .default_database()
            .unwrap_or_else(|| client.database(&config.mongodb_database));
        info!("Writing events to MongoDB database {}", db.name());

        Ok(Self { events: db.collection(COLLECTION) })
    }

    pub async fn event_count(&self) -> Result<u64> {
        Ok(self.events.count_documents(doc! {}).await?)
    }
}

/// The stored shape of one event.
pub fn event_document(event: &Event) -> Result<Document> {
    let mut document = to_document(event).context("Failed to encode event")?;
    document.insert("naturalKey", event.natural_key());
    Ok(document)
}

#[async_trait(?Send)]
impl EventSink for MongoStore {
    fn name(&self) -> &'static str {
        "mongodb"
    }

    async fn store(&self, events: &[Event], mode: OnDuplicate) -> Result<SaveOutcome> {
        let mut outcome = SaveOutcome::default();

        for event in events {
            let key = event.natural_key();
            let filter = doc! { "naturalKey": key.as_str() };
            let existing = self
                .events
                .find_one(filter.clone())
                .await
                .with_context(|| format!("lookup event {}", key))?;

            match (existing.is_some(), mode) {
                (true, OnDuplicate::Skip) => {
                    debug!("skip duplicate {}", key);
                    outcome.skipped += 1;
                }
                (true, OnDuplicate::Overwrite) => {
                    self.events
                        .replace_one(filter, event_document(event)?)
                        .await
                        .with_context(|| format!("replace event {}", key))?;
                    outcome.updated += 1;
                }
                (false, _) => {
                    self.events
                        .insert_one(event_document(event)?)
                        .await
                        .with_context(|| format!("insert event {}", key))?;
                    outcome.inserted += 1;
                }
            }
        }
        Ok(outcome)
    }
}
