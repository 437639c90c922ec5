//! Office closure document schema
//!
//! Global closures apply to every adviser; adviser-scoped closures carry
//! the adviser's email. Civil dates are stored as `YYYY-MM-DD` strings,
//! which keeps range filters plain lexicographic comparisons.

use bson::{doc, oid::ObjectId, Document};
use chrono::NaiveDate;
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::store::mongo::{IntoIndexes, MutMetadata};
use crate::store::schemas::Metadata;
use crate::store::{ClosureScope, OfficeClosure};

/// Collection name for office closures
pub const CLOSURE_COLLECTION: &str = "office_closures";

/// Office closure document
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ClosureDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub description: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// None for global closures; Some(email) scopes to one adviser
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adviser_email: Option<String>,
}

impl ClosureDoc {
    pub fn from_closure(closure: &OfficeClosure) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            start_date: closure.start_date,
            end_date: closure.end_date,
            description: closure.description.clone(),
            tags: closure.tags.clone(),
            adviser_email: match &closure.scope {
                ClosureScope::Global => None,
                ClosureScope::Adviser { email } => Some(email.clone()),
            },
        }
    }

    pub fn into_closure(self) -> OfficeClosure {
        OfficeClosure {
            id: self._id.map(|id| id.to_hex()).unwrap_or_default(),
            start_date: self.start_date,
            end_date: self.end_date,
            description: self.description,
            tags: self.tags,
            scope: match self.adviser_email {
                None => ClosureScope::Global,
                Some(email) => ClosureScope::Adviser { email },
            },
        }
    }
}

impl IntoIndexes for ClosureDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "adviser_email": 1, "start_date": 1 },
                Some(
                    IndexOptions::builder()
                        .name("closure_scope_start".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "end_date": 1 },
                Some(IndexOptions::builder().name("closure_end".to_string()).build()),
            ),
        ]
    }
}

impl MutMetadata for ClosureDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
