//! HR platform gateway
//!
//! Approved leave comes from the HR system. The OAuth handshake lives
//! outside this service; `AccessTokenProvider` hands over whatever token
//! the handshake produced, and the client refreshes it once per call on
//! a 401 before giving up.

pub mod client;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub use client::{HttpHrClient, StaticTokenProvider};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaveStatus {
    Approved,
    Pending,
    Declined,
    Other,
}

impl LeaveStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "approved" => Self::Approved,
            "pending" => Self::Pending,
            "declined" | "rejected" => Self::Declined,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Pending => "pending",
            Self::Declined => "declined",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub employee_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: LeaveStatus,
}

/// HR failure; persistent failures surface as store unavailability
#[derive(Debug, thiserror::Error)]
pub enum HrError {
    #[error("HR unavailable: {0}")]
    Unavailable(String),

    #[error("HR authentication failed: {0}")]
    Unauthorized(String),
}

/// Source of the HR access token. The refresh flow itself is external;
/// `refresh` returns whatever the external handshake has made current.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, HrError>;

    /// Called once per request after a 401
    async fn refresh(&self) -> Result<String, HrError>;
}

/// Read contract against the HR platform
#[async_trait]
pub trait HrApi: Send + Sync {
    async fn list_employees(&self) -> Result<Vec<Employee>, HrError>;

    /// Approved leave only, overlapping `[from, to]`
    async fn list_approved_leave(
        &self,
        employee_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<LeaveRequest>, HrError>;
}
