//! Allocation record document schema
//!
//! Append-only audit log of deal assignments. One live record per deal:
//! re-allocating a deal overwrites the record in place, keeping the
//! original record id.

use std::collections::BTreeMap;

use bson::{doc, oid::ObjectId, Document};
use chrono::{DateTime, NaiveDate, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::store::mongo::{IntoIndexes, MutMetadata};
use crate::store::schemas::Metadata;
use crate::store::AllocationRecord;

/// Collection name for allocation records
pub const ALLOCATION_RECORD_COLLECTION: &str = "allocation_records";

/// Allocation record document
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AllocationRecordDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Stable record identifier, preserved across overwrites
    pub record_id: String,

    pub deal_id: String,
    pub adviser_id: String,
    pub adviser_email: String,
    pub service_package: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub household_type: Option<String>,

    pub earliest_week_anchor: NaiveDate,
    pub decided_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub requester_ip: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub requester_user_agent: Option<String>,

    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl AllocationRecordDoc {
    pub fn from_record(record: &AllocationRecord) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            record_id: record.id.clone(),
            deal_id: record.deal_id.clone(),
            adviser_id: record.adviser_id.clone(),
            adviser_email: record.adviser_email.clone(),
            service_package: record.service_package.clone(),
            household_type: record.household_type.clone(),
            earliest_week_anchor: record.earliest_week_anchor,
            decided_at: record.decided_at,
            requester_ip: record.requester_ip.clone(),
            requester_user_agent: record.requester_user_agent.clone(),
            extra: record.extra.clone(),
        }
    }

    pub fn into_record(self) -> AllocationRecord {
        AllocationRecord {
            id: self.record_id,
            deal_id: self.deal_id,
            adviser_id: self.adviser_id,
            adviser_email: self.adviser_email,
            service_package: self.service_package,
            household_type: self.household_type,
            earliest_week_anchor: self.earliest_week_anchor,
            decided_at: self.decided_at,
            requester_ip: self.requester_ip,
            requester_user_agent: self.requester_user_agent,
            extra: self.extra,
        }
    }
}

impl IntoIndexes for AllocationRecordDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // The per-deal uniqueness guarantee behind idempotent puts
            (
                doc! { "deal_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("record_deal_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "adviser_email": 1, "decided_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("record_adviser_decided".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for AllocationRecordDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
