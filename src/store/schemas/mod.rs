//! Database schemas for Usher
//!
//! Document structures for office closures, capacity overrides,
//! allocation records, synced leave requests and system settings.

mod allocation_record;
mod capacity_override;
mod closure;
mod leave;
mod metadata;
mod settings;

pub use allocation_record::{AllocationRecordDoc, ALLOCATION_RECORD_COLLECTION};
pub use capacity_override::{CapacityOverrideDoc, CAPACITY_OVERRIDE_COLLECTION};
pub use closure::{ClosureDoc, CLOSURE_COLLECTION};
pub use leave::{LeaveRequestDoc, LEAVE_REQUEST_COLLECTION};
pub use metadata::Metadata;
pub use settings::{SettingsDoc, SETTINGS_COLLECTION};
