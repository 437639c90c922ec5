//! Common document metadata

use bson::DateTime;
use serde::{Deserialize, Serialize};

/// Bookkeeping fields shared by every document
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Metadata {
    #[serde(default)]
    pub is_deleted: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime>,
}

impl Metadata {
    pub fn new() -> Self {
        Self {
            is_deleted: false,
            created_at: Some(DateTime::now()),
            updated_at: Some(DateTime::now()),
            deleted_at: None,
        }
    }
}
