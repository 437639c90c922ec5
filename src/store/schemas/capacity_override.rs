//! Capacity override document schema
//!
//! An override replaces an adviser's profile monthly limit from its
//! effective date forward; the one with the greatest effective date at or
//! before a given week wins.

use bson::{doc, oid::ObjectId, Document};
use chrono::NaiveDate;
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::store::mongo::{IntoIndexes, MutMetadata};
use crate::store::schemas::Metadata;
use crate::store::CapacityOverride;

/// Collection name for capacity overrides
pub const CAPACITY_OVERRIDE_COLLECTION: &str = "capacity_overrides";

/// Capacity override document
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CapacityOverrideDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub adviser_email: String,
    pub effective_date: NaiveDate,
    pub client_limit_monthly: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl CapacityOverrideDoc {
    pub fn from_override(value: &CapacityOverride) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            adviser_email: value.adviser_email.clone(),
            effective_date: value.effective_date,
            client_limit_monthly: value.client_limit_monthly,
            pod_type: value.pod_type.clone(),
            notes: value.notes.clone(),
        }
    }

    pub fn into_override(self) -> CapacityOverride {
        CapacityOverride {
            id: self._id.map(|id| id.to_hex()).unwrap_or_default(),
            adviser_email: self.adviser_email,
            effective_date: self.effective_date,
            client_limit_monthly: self.client_limit_monthly,
            pod_type: self.pod_type,
            notes: self.notes,
        }
    }
}

impl IntoIndexes for CapacityOverrideDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "adviser_email": 1, "effective_date": -1 },
            Some(
                IndexOptions::builder()
                    .name("override_email_effective".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for CapacityOverrideDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
