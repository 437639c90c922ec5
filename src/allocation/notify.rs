//! Allocation notifications
//!
//! Posts a chat card summarising each allocation: the deal, every eligible
//! adviser with their earliest week, and the chosen adviser. Notification
//! failures are logged and swallowed; they never abort an allocation.

use async_trait::async_trait;
use serde_json::json;
use tracing::{error, info};

use super::allocator::CandidateSummary;

/// Payload handed to the notifier after a successful allocation
#[derive(Debug, Clone)]
pub struct AllocationAlert {
    pub deal_id: String,
    pub service_package: String,
    pub household_type: Option<String>,
    pub selected: CandidateSummary,
    pub candidates: Vec<CandidateSummary>,
}

/// One titled section of a chat card
#[derive(Debug, Clone)]
pub struct CardSection {
    pub header: String,
    pub lines: Vec<String>,
}

/// Notification hook
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &AllocationAlert) -> Result<(), String>;
}

/// Notifier that drops everything (dev mode, tests)
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _alert: &AllocationAlert) -> Result<(), String> {
        Ok(())
    }
}

/// Chat webhook notifier
pub struct ChatWebhookNotifier {
    url: Option<String>,
    http: reqwest::Client,
}

impl ChatWebhookNotifier {
    pub fn new(url: Option<String>, timeout: std::time::Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { url, http }
    }
}

#[async_trait]
impl Notifier for ChatWebhookNotifier {
    async fn notify(&self, alert: &AllocationAlert) -> Result<(), String> {
        let Some(ref url) = self.url else {
            info!("Chat webhook not configured; skipping allocation alert");
            return Ok(());
        };

        let payload = build_alert_payload(alert);
        let response = self
            .http
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if response.status().is_client_error() || response.status().is_server_error() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Chat webhook returned {}: {}", status, body);
            return Err(format!("chat webhook returned {}", status));
        }

        info!("Sent allocation alert for deal {}", alert.deal_id);
        Ok(())
    }
}

/// Build the chat card JSON for one allocation
pub fn build_alert_payload(alert: &AllocationAlert) -> serde_json::Value {
    let deal_section = CardSection {
        header: "Deal Details".to_string(),
        lines: vec![
            format!("<b>Deal ID:</b> `{}`", alert.deal_id),
            format!(
                "<b>Service Package:</b> {}",
                format_tag_list(&alert.service_package).join(", ")
            ),
            format!(
                "<b>Household Type:</b> {}",
                alert
                    .household_type
                    .as_deref()
                    .map(|h| format_tag_list(h).join(", "))
                    .unwrap_or_else(|| "Not provided".to_string())
            ),
        ],
    };

    let candidate_lines: Vec<String> = if alert.candidates.is_empty() {
        vec!["No eligible advisers".to_string()]
    } else {
        alert.candidates.iter().map(candidate_line).collect()
    };
    let candidates_section = CardSection {
        header: "Eligible Advisers".to_string(),
        lines: candidate_lines,
    };

    let selected_section = CardSection {
        header: "Selected Adviser".to_string(),
        lines: vec![candidate_line(&alert.selected)],
    };

    build_card_payload(
        "Deal Allocation",
        &[deal_section, candidates_section, selected_section],
    )
}

fn candidate_line(candidate: &CandidateSummary) -> String {
    let services = if candidate.service_packages.is_empty() {
        "Not specified".to_string()
    } else {
        candidate.service_packages.join(", ")
    };
    let households = if candidate.household_types.is_empty() {
        "Not specified".to_string()
    } else {
        candidate.household_types.join(", ")
    };
    let earliest = candidate
        .earliest_week_label
        .clone()
        .unwrap_or_else(|| "No availability".to_string());
    format!(
        "<b>{}</b> ({})<br><i>Services:</i> {}<br><i>Households:</i> {}<br><i>Earliest Week:</i> {}",
        format_display_name(&candidate.adviser_email),
        candidate.adviser_email,
        services,
        households,
        earliest
    )
}

/// Assemble a chat card document from titled sections
pub fn build_card_payload(title: &str, sections: &[CardSection]) -> serde_json::Value {
    let card_sections: Vec<serde_json::Value> = sections
        .iter()
        .map(|section| {
            json!({
                "header": section.header,
                "widgets": section
                    .lines
                    .iter()
                    .map(|text| json!({"textParagraph": {"text": text}}))
                    .collect::<Vec<_>>(),
            })
        })
        .collect();

    json!({
        "cards": [{
            "header": {"title": title},
            "sections": card_sections,
        }]
    })
}

/// Prettify an email's local part into a display name
pub fn format_display_name(email: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    let name: Vec<String> = local
        .split(['.', '_', '-'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    if name.is_empty() {
        email.to_string()
    } else {
        name.join(" ")
    }
}

/// Split a raw tag string and title-case each entry; acronym tags stay upper
pub fn format_tag_list(raw: &str) -> Vec<String> {
    raw.split([';', ',', '/', '|'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            if part.eq_ignore_ascii_case("ipo") {
                "IPO".to_string()
            } else {
                part.split_whitespace()
                    .map(|word| {
                        let mut chars = word.chars();
                        match chars.next() {
                            Some(first) => {
                                first.to_uppercase().collect::<String>()
                                    + &chars.as_str().to_lowercase()
                            }
                            None => String::new(),
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            }
        })
        .collect()
}
