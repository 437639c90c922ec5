//! HTTP HR client
//!
//! Reads employees and leave requests from the HR platform's v1 API.
//! A 401 triggers exactly one token refresh and replay per call.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::warn;

use super::{AccessTokenProvider, Employee, HrApi, HrError, LeaveRequest, LeaveStatus};

/// Token provider over a token minted outside this service
pub struct StaticTokenProvider {
    token: RwLock<String>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(token.into()),
        }
    }

    /// Swap in a new token (e.g. after an external refresh cycle)
    pub async fn set_token(&self, token: impl Into<String>) {
        *self.token.write().await = token.into();
    }
}

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String, HrError> {
        Ok(self.token.read().await.clone())
    }

    async fn refresh(&self) -> Result<String, HrError> {
        // No handshake of our own: the freshest token we can offer is the
        // one last handed to us.
        Ok(self.token.read().await.clone())
    }
}

/// Reqwest-backed HR client
pub struct HttpHrClient {
    base_url: String,
    tokens: Box<dyn AccessTokenProvider>,
    http: reqwest::Client,
}

impl HttpHrClient {
    pub fn new(
        base_url: &str,
        tokens: Box<dyn AccessTokenProvider>,
        timeout: Duration,
    ) -> Result<Self, HrError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HrError::Unavailable(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
            http,
        })
    }

    /// GET with one refresh-and-replay on 401
    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, HrError> {
        let mut token = self.tokens.access_token().await?;
        let mut refreshed = false;

        loop {
            let response = self
                .http
                .get(url)
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|e| HrError::Unavailable(e.to_string()))?;

            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED && !refreshed {
                warn!("HR returned 401, refreshing token once");
                token = self.tokens.refresh().await?;
                refreshed = true;
                continue;
            }

            let body = response
                .text()
                .await
                .map_err(|e| HrError::Unavailable(e.to_string()))?;

            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(HrError::Unauthorized(format!("HR returned 401: {}", body)));
            }
            if !status.is_success() {
                return Err(HrError::Unavailable(format!("HR returned {}: {}", status, body)));
            }
            return serde_json::from_str(&body)
                .map_err(|e| HrError::Unavailable(format!("HR response parse error: {}", e)));
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct EmployeeList {
    #[serde(default)]
    data: EmployeePage,
}

#[derive(Debug, Default, Deserialize)]
struct EmployeePage {
    #[serde(default)]
    items: Vec<EmployeeItem>,
}

#[derive(Debug, Deserialize)]
struct EmployeeItem {
    id: String,
    #[serde(default)]
    company_email: Option<String>,
    #[serde(default)]
    personal_email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LeaveList {
    #[serde(default)]
    data: LeavePage,
}

#[derive(Debug, Default, Deserialize)]
struct LeavePage {
    #[serde(default)]
    items: Vec<LeaveItem>,
}

#[derive(Debug, Deserialize)]
struct LeaveItem {
    start_date: Option<String>,
    end_date: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

fn parse_hr_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

#[async_trait]
impl HrApi for HttpHrClient {
    async fn list_employees(&self) -> Result<Vec<Employee>, HrError> {
        let url = format!("{}/api/v1/organisations/default/employees", self.base_url);
        let list: EmployeeList = self.get_json(&url).await?;

        let employees = list
            .data
            .items
            .into_iter()
            .filter_map(|item| {
                let email = item.company_email.or(item.personal_email)?;
                Some(Employee {
                    id: item.id,
                    email,
                })
            })
            .collect();
        Ok(employees)
    }

    async fn list_approved_leave(
        &self,
        employee_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<LeaveRequest>, HrError> {
        let url = format!(
            "{}/api/v1/organisations/default/employees/{}/leave_requests",
            self.base_url, employee_id
        );
        let list: LeaveList = self.get_json(&url).await?;

        let leave = list
            .data
            .items
            .into_iter()
            .filter_map(|item| {
                let start_date = parse_hr_date(item.start_date.as_deref()?)?;
                let end_date = parse_hr_date(item.end_date.as_deref()?)?;
                let status = LeaveStatus::parse(item.status.as_deref().unwrap_or(""));
                if status != LeaveStatus::Approved {
                    return None;
                }
                // Keep only requests overlapping the asked-for window
                if end_date < from || start_date > to {
                    return None;
                }
                Some(LeaveRequest {
                    employee_id: employee_id.to_string(),
                    start_date,
                    end_date,
                    status,
                })
            })
            .collect();
        Ok(leave)
    }
}
