//! CRM gateway
//!
//! Advisers, meetings and deals live in the CRM; Usher reads them and
//! writes exactly one thing back (the deal owner). The `CrmApi` trait is
//! the seam tests substitute with an in-memory fake.

pub mod client;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub use client::HttpCrmClient;

/// Adviser profile as held by the CRM. Immutable within one allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adviser {
    pub id: String,
    pub email: String,
    pub service_packages: BTreeSet<String>,
    pub household_types: BTreeSet<String>,
    pub pod_type: PodType,
    pub client_limit_monthly: u32,
    pub adviser_start_date: Option<NaiveDate>,
    pub taking_on_clients: bool,
}

/// Pod arrangement the adviser works in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodType {
    Solo,
    Team,
    Other(String),
}

impl PodType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "solo" | "solo adviser" => Self::Solo,
            "team" | "full pod" => Self::Team,
            "" => Self::Other(String::new()),
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Solo => "Solo Adviser",
            Self::Team => "Team",
            Self::Other(s) => s.as_str(),
        }
    }
}

/// Onboarding meeting kinds. Only Clarify counts toward occupancy;
/// KickOff is reported for table parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeetingKind {
    Clarify,
    KickOff,
    Other,
}

impl MeetingKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "clarify" => Self::Clarify,
            "kick off" | "kickoff" | "kick-off" => Self::KickOff,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meeting {
    pub adviser_id: String,
    pub kind: MeetingKind,
    pub start_date: NaiveDate,
    pub deal_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub id: String,
    pub service_package: Option<String>,
    pub household_type: Option<String>,
    pub agreement_start_date: Option<NaiveDate>,
    pub owner_id: Option<String>,
    /// Derived from meetings: true once a Clarify has been booked or held
    pub has_clarify: bool,
}

/// CRM failure with retryability carried explicitly
#[derive(Debug, thiserror::Error)]
pub enum CrmError {
    /// Worth retrying with backoff
    #[error("CRM transient error: {0}")]
    Transient(String),

    /// The CRM rejected the request; retrying will not help
    #[error("CRM permanent error: {0}")]
    Permanent(String),

    #[error("CRM object not found: {0}")]
    NotFound(String),
}

impl CrmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Read/write contract against the CRM
#[async_trait]
pub trait CrmApi: Send + Sync {
    /// Fetch one deal; `Ok(None)` when the CRM has no such deal
    async fn get_deal(&self, deal_id: &str) -> Result<Option<Deal>, CrmError>;

    /// All advisers, unfiltered; callers apply eligibility filters
    async fn list_advisers(&self) -> Result<Vec<Adviser>, CrmError>;

    /// Meetings for one adviser with a start date in `[from, to)`
    async fn list_meetings(
        &self,
        adviser_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Meeting>, CrmError>;

    /// Open deals owned by the adviser that have no Clarify yet, with
    /// `agreement_start_date` before `before` (or unset)
    async fn list_deals_without_first_meeting(
        &self,
        adviser_id: &str,
        before: NaiveDate,
    ) -> Result<Vec<Deal>, CrmError>;

    /// Assign the deal owner. Transient failures are retried internally;
    /// the error returned here is final.
    async fn set_deal_owner(&self, deal_id: &str, adviser_id: &str) -> Result<(), CrmError>;
}
