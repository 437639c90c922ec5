//! Deal allocation
//!
//! End-to-end handling of one inbound deal: eligibility filter, concurrent
//! per-adviser capacity projection, ranking, CRM owner update, audit record
//! and the notification hook.

pub mod allocator;
pub mod notify;

pub use allocator::{
    AllocationOutcome, AllocationRequest, Allocator, AllocatorConfig, CandidateSummary,
    RequesterMeta,
};
pub use notify::{
    build_card_payload, format_display_name, format_tag_list, AllocationAlert, CardSection,
    ChatWebhookNotifier, NoopNotifier, Notifier,
};
