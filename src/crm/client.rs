//! HTTP CRM client
//!
//! Talks to the CRM's v3 object API: adviser users, meeting search, deal
//! search and the deal-owner patch. Transient responses (429 and 5xx) are
//! retried with exponential backoff; everything else surfaces immediately.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::retry::{retry_with_backoff, BackoffPolicy};

use super::{Adviser, CrmApi, CrmError, Deal, Meeting, MeetingKind, PodType};

/// Reqwest-backed CRM client
pub struct HttpCrmClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
    list_http: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpCrmClient {
    /// Create a client with split deadlines: point reads/writes and bulk
    /// list operations carry their own timeouts.
    pub fn new(
        base_url: &str,
        token: &str,
        call_timeout: Duration,
        list_timeout: Duration,
    ) -> Result<Self, CrmError> {
        let http = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|e| CrmError::Permanent(format!("Failed to build HTTP client: {}", e)))?;
        let list_http = reqwest::Client::builder()
            .timeout(list_timeout)
            .build()
            .map_err(|e| CrmError::Permanent(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http,
            list_http,
            backoff: BackoffPolicy::default(),
        })
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> CrmError {
        if status.as_u16() == 429 || status.is_server_error() {
            CrmError::Transient(format!("CRM returned {}: {}", status, body))
        } else if status == reqwest::StatusCode::NOT_FOUND {
            CrmError::NotFound(format!("CRM returned 404: {}", body))
        } else {
            CrmError::Permanent(format!("CRM returned {}: {}", status, body))
        }
    }

    fn classify_request_error(err: reqwest::Error) -> CrmError {
        if err.is_timeout() || err.is_connect() {
            CrmError::Transient(err.to_string())
        } else {
            CrmError::Permanent(err.to_string())
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, CrmError> {
        retry_with_backoff(self.backoff, "CRM GET", CrmError::is_transient, || {
            let request = self.list_http.get(url).bearer_auth(&self.token);
            async move { execute_json(request).await }
        })
        .await
    }

    async fn search_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        payload: serde_json::Value,
    ) -> Result<T, CrmError> {
        let url = format!("{}{}", self.base_url, path);
        retry_with_backoff(self.backoff, "CRM search", CrmError::is_transient, || {
            let request = self
                .list_http
                .post(url.as_str())
                .bearer_auth(&self.token)
                .json(&payload);
            async move { execute_json(request).await }
        })
        .await
    }
}

/// Send a prepared request and parse a JSON body, classifying failures
async fn execute_json<T: for<'de> Deserialize<'de>>(
    request: reqwest::RequestBuilder,
) -> Result<T, CrmError> {
    let response = request
        .send()
        .await
        .map_err(HttpCrmClient::classify_request_error)?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(HttpCrmClient::classify_request_error)?;
    if !status.is_success() {
        return Err(HttpCrmClient::classify_status(status, &body));
    }
    serde_json::from_str(&body)
        .map_err(|e| CrmError::Permanent(format!("CRM response parse error: {}", e)))
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct SearchResponse<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct UserObject {
    #[serde(default)]
    properties: UserProperties,
}

#[derive(Debug, Default, Deserialize)]
struct UserProperties {
    hubspot_owner_id: Option<String>,
    hs_email: Option<String>,
    taking_on_clients: Option<String>,
    client_types: Option<String>,
    household_type: Option<String>,
    pod_type: Option<String>,
    client_limit_monthly: Option<String>,
    adviser_start_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MeetingObject {
    #[serde(default)]
    properties: MeetingProperties,
}

#[derive(Debug, Default, Deserialize)]
struct MeetingProperties {
    hubspot_owner_id: Option<String>,
    hs_meeting_start_time: Option<String>,
    hs_activity_type: Option<String>,
    hs_deal_record_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DealObject {
    id: String,
    #[serde(default)]
    properties: DealProperties,
}

#[derive(Debug, Default, Deserialize)]
struct DealProperties {
    service_package: Option<String>,
    household_type: Option<String>,
    agreement_start_date: Option<String>,
    advisor: Option<String>,
    most_recent_clarify_booked_date: Option<String>,
    most_recent_clarify_call_date: Option<String>,
}

/// Parse a CRM date value: plain date or ISO-8601 datetime
fn parse_crm_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    let cleaned = trimmed.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(cleaned, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(cleaned, "%Y-%m-%dT%H:%M:%S%.f"))
        .map(|dt| dt.date())
        .ok()
}

/// Split a multi-select property into its values
fn split_multi(raw: &str) -> BTreeSet<String> {
    raw.split([';', ','])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn epoch_millis(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or(0)
}

impl UserObject {
    fn into_adviser(self) -> Option<Adviser> {
        let props = self.properties;
        let id = props.hubspot_owner_id?;
        let email = props.hs_email?;
        Some(Adviser {
            id,
            email,
            service_packages: props.client_types.as_deref().map(split_multi).unwrap_or_default(),
            household_types: props.household_type.as_deref().map(split_multi).unwrap_or_default(),
            pod_type: PodType::parse(props.pod_type.as_deref().unwrap_or("")),
            client_limit_monthly: props
                .client_limit_monthly
                .as_deref()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
            adviser_start_date: props.adviser_start_date.as_deref().and_then(parse_crm_date),
            taking_on_clients: props
                .taking_on_clients
                .as_deref()
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }
}

impl DealObject {
    fn into_deal(self) -> Deal {
        let props = self.properties;
        let has_clarify = props
            .most_recent_clarify_booked_date
            .as_deref()
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
            || props
                .most_recent_clarify_call_date
                .as_deref()
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false);

        Deal {
            id: self.id,
            service_package: props.service_package.filter(|v| !v.trim().is_empty()),
            household_type: props.household_type.filter(|v| !v.trim().is_empty()),
            agreement_start_date: props.agreement_start_date.as_deref().and_then(parse_crm_date),
            owner_id: props.advisor.filter(|v| !v.trim().is_empty()),
            has_clarify,
        }
    }
}

#[async_trait]
impl CrmApi for HttpCrmClient {
    async fn get_deal(&self, deal_id: &str) -> Result<Option<Deal>, CrmError> {
        let url = format!(
            "{}/crm/v3/objects/deals/{}?properties=service_package,household_type,agreement_start_date,advisor,most_recent_clarify_booked_date,most_recent_clarify_call_date",
            self.base_url, deal_id
        );

        match self.get_json::<DealObject>(&url).await {
            Ok(object) => Ok(Some(object.into_deal())),
            Err(CrmError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn list_advisers(&self) -> Result<Vec<Adviser>, CrmError> {
        let url = format!(
            "{}/crm/v3/objects/users?properties=taking_on_clients,hs_email,hubspot_owner_id,adviser_start_date,pod_type,client_types,household_type,client_limit_monthly&limit=100",
            self.base_url
        );
        let response: SearchResponse<UserObject> = self.get_json(&url).await?;
        let advisers = response
            .results
            .into_iter()
            .filter_map(UserObject::into_adviser)
            .collect();
        Ok(advisers)
    }

    async fn list_meetings(
        &self,
        adviser_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Meeting>, CrmError> {
        let payload = json!({
            "filterGroups": [{
                "filters": [
                    {"propertyName": "hubspot_owner_id", "operator": "EQ", "value": adviser_id},
                    {"propertyName": "hs_meeting_start_time", "operator": "GTE", "value": epoch_millis(from).to_string()},
                    {"propertyName": "hs_meeting_start_time", "operator": "LT", "value": epoch_millis(to).to_string()},
                    {"propertyName": "hs_activity_type", "operator": "IN", "values": ["Clarify", "Kick Off"]},
                ]
            }],
            "properties": ["hs_meeting_start_time", "hs_activity_type", "hubspot_owner_id", "hs_deal_record_id"],
            "sorts": [{"propertyName": "hs_meeting_start_time", "direction": "ASCENDING"}],
            "limit": 200,
        });

        let response: SearchResponse<MeetingObject> =
            self.search_json("/crm/v3/objects/meetings/search", payload).await?;

        debug!(
            "CRM returned {} meetings for adviser {}",
            response.results.len(),
            adviser_id
        );

        let meetings = response
            .results
            .into_iter()
            .filter_map(|m| {
                let start_date = m.properties.hs_meeting_start_time.as_deref().and_then(parse_crm_date)?;
                Some(Meeting {
                    adviser_id: m
                        .properties
                        .hubspot_owner_id
                        .unwrap_or_else(|| adviser_id.to_string()),
                    kind: MeetingKind::parse(m.properties.hs_activity_type.as_deref().unwrap_or("")),
                    start_date,
                    deal_id: m.properties.hs_deal_record_id,
                })
            })
            .collect();
        Ok(meetings)
    }

    async fn list_deals_without_first_meeting(
        &self,
        adviser_id: &str,
        before: NaiveDate,
    ) -> Result<Vec<Deal>, CrmError> {
        let payload = json!({
            "filterGroups": [{
                "filters": [
                    {"propertyName": "advisor", "operator": "EQ", "value": adviser_id},
                    {"propertyName": "most_recent_clarify_booked_date", "operator": "NOT_HAS_PROPERTY"},
                    {"propertyName": "most_recent_clarify_call_date", "operator": "NOT_HAS_PROPERTY"},
                    {"propertyName": "agreement_start_date", "operator": "LT", "value": epoch_millis(before).to_string()},
                ]
            }],
            "properties": ["service_package", "household_type", "agreement_start_date", "advisor", "most_recent_clarify_booked_date", "most_recent_clarify_call_date"],
            "limit": 200,
        });

        let response: SearchResponse<DealObject> =
            self.search_json("/crm/v3/objects/deals/search", payload).await?;
        Ok(response.results.into_iter().map(DealObject::into_deal).collect())
    }

    async fn set_deal_owner(&self, deal_id: &str, adviser_id: &str) -> Result<(), CrmError> {
        let url = format!("{}/crm/v3/objects/deals/{}", self.base_url, deal_id);
        let payload = json!({"properties": {"advisor": adviser_id}});

        retry_with_backoff(self.backoff, "CRM owner update", CrmError::is_transient, || {
            let request = self
                .http
                .patch(url.as_str())
                .bearer_auth(&self.token)
                .json(&payload);
            async move {
                let response = request
                    .send()
                    .await
                    .map_err(HttpCrmClient::classify_request_error)?;

                let status = response.status();
                if status.is_success() {
                    return Ok(());
                }
                let body = response.text().await.unwrap_or_default();
                Err(HttpCrmClient::classify_status(status, &body))
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_crm_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2026, 1, 12).unwrap();
        assert_eq!(parse_crm_date("2026-01-12"), Some(expected));
        assert_eq!(parse_crm_date("2026-01-12T09:30:00Z"), Some(expected));
        assert_eq!(parse_crm_date("2026-01-12T09:30:00.000Z"), Some(expected));
        assert_eq!(parse_crm_date(""), None);
        assert_eq!(parse_crm_date("not-a-date"), None);
    }

    #[test]
    fn test_split_multi_select() {
        let set = split_multi("Series A; Series B,IPO ;");
        assert_eq!(set.len(), 3);
        assert!(set.contains("Series A"));
        assert!(set.contains("Series B"));
        assert!(set.contains("IPO"));
    }

    #[test]
    fn test_deal_clarify_derivation() {
        let object = DealObject {
            id: "d1".into(),
            properties: DealProperties {
                most_recent_clarify_booked_date: Some("2026-01-05".into()),
                ..Default::default()
            },
        };
        assert!(object.into_deal().has_clarify);

        let object = DealObject {
            id: "d2".into(),
            properties: DealProperties::default(),
        };
        assert!(!object.into_deal().has_clarify);
    }

    #[test]
    fn test_meeting_kind_parse() {
        assert_eq!(MeetingKind::parse("Clarify"), MeetingKind::Clarify);
        assert_eq!(MeetingKind::parse("Kick Off"), MeetingKind::KickOff);
        assert_eq!(MeetingKind::parse("Review"), MeetingKind::Other);
    }
}
