//! Synced leave request document schema
//!
//! The HR sync job (outside this service) writes these; the capacity
//! engine only reads them. Statuses are persisted as synced; reads
//! filter down to approved leave.

use bson::{doc, oid::ObjectId, Document};
use chrono::NaiveDate;
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::hr::{LeaveRequest, LeaveStatus};
use crate::store::mongo::{IntoIndexes, MutMetadata};
use crate::store::schemas::Metadata;

/// Collection name for synced leave requests
pub const LEAVE_REQUEST_COLLECTION: &str = "leave_requests";

/// Leave request document
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct LeaveRequestDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub employee_id: String,
    /// Company email, the join key against CRM advisers
    pub employee_email: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: String,
}

impl LeaveRequestDoc {
    pub fn from_request(email: &str, request: &LeaveRequest) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            employee_id: request.employee_id.clone(),
            employee_email: email.to_string(),
            start_date: request.start_date,
            end_date: request.end_date,
            status: request.status.as_str().to_string(),
        }
    }

    pub fn into_request(self) -> LeaveRequest {
        LeaveRequest {
            employee_id: self.employee_id,
            start_date: self.start_date,
            end_date: self.end_date,
            status: LeaveStatus::parse(&self.status),
        }
    }
}

impl IntoIndexes for LeaveRequestDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "employee_email": 1, "start_date": 1 },
            Some(
                IndexOptions::builder()
                    .name("leave_email_start".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for LeaveRequestDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(status: LeaveStatus) -> LeaveRequest {
        LeaveRequest {
            employee_id: "e1".to_string(),
            start_date: NaiveDate::from_ymd_opt(2026, 2, 2).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 2, 6).unwrap(),
            status,
        }
    }

    #[test]
    fn test_status_survives_persistence() {
        for status in [
            LeaveStatus::Approved,
            LeaveStatus::Pending,
            LeaveStatus::Declined,
            LeaveStatus::Other,
        ] {
            let doc = LeaveRequestDoc::from_request("a@example.com", &request(status));
            assert_eq!(doc.status, status.as_str());
            assert_eq!(doc.into_request().status, status);
        }
    }
}
