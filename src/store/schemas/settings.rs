//! System settings document schema
//!
//! Opaque key/value pairs shared with adjacent subsystems. This service
//! reads only `prestart_weeks`.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::store::mongo::{IntoIndexes, MutMetadata};
use crate::store::schemas::Metadata;

/// Collection name for system settings
pub const SETTINGS_COLLECTION: &str = "system_settings";

/// One setting entry
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SettingsDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub key: String,
    pub value: serde_json::Value,
}

impl IntoIndexes for SettingsDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "key": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("settings_key_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for SettingsDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
