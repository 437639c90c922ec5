//! Store gateway
//!
//! Typed read/write access to everything the capacity engine and the admin
//! surface touch: advisers, meetings and deals (read through the CRM),
//! employee leave (HR, cached), office closures, capacity overrides,
//! allocation records and system settings (MongoDB).
//!
//! Runs in one of two modes:
//! - MongoDB-backed (production)
//! - memory-only (dev mode and tests), same behavior over process-local maps
//!
//! Every operation carries a deadline; optional reads coerce "not found"
//! to empty rather than failing the caller.

pub mod mongo;
pub mod schemas;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bson::doc;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::{spawn_sweep_task, TtlCache};
use crate::crm::{Adviser, CrmApi, CrmError, Deal, Meeting};
use crate::hr::{Employee, HrApi, HrError, LeaveRequest, LeaveStatus};
use crate::types::{StoreError, StoreErrorKind};

pub use mongo::MongoClient;
use schemas::{
    AllocationRecordDoc, CapacityOverrideDoc, ClosureDoc, LeaveRequestDoc, SettingsDoc,
    ALLOCATION_RECORD_COLLECTION, CAPACITY_OVERRIDE_COLLECTION, CLOSURE_COLLECTION,
    LEAVE_REQUEST_COLLECTION, SETTINGS_COLLECTION,
};

// ============================================================================
// Store-owned entities
// ============================================================================

/// Who an office closure applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClosureScope {
    Global,
    Adviser { email: String },
}

impl ClosureScope {
    pub fn adviser(email: impl Into<String>) -> Self {
        Self::Adviser {
            email: email.into(),
        }
    }
}

/// Full or partial out-of-office period owned by admins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfficeClosure {
    pub id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub description: String,
    pub tags: Vec<String>,
    pub scope: ClosureScope,
}

/// Date-effective replacement for an adviser's monthly client limit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityOverride {
    pub id: String,
    pub adviser_email: String,
    pub effective_date: NaiveDate,
    pub client_limit_monthly: u32,
    pub pod_type: Option<String>,
    pub notes: Option<String>,
}

/// Audit record of one deal assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub id: String,
    pub deal_id: String,
    pub adviser_id: String,
    pub adviser_email: String,
    pub service_package: String,
    pub household_type: Option<String>,
    pub earliest_week_anchor: NaiveDate,
    pub decided_at: DateTime<Utc>,
    pub requester_ip: Option<String>,
    pub requester_user_agent: Option<String>,
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Settings this service reads (the collection itself is shared and opaque)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SystemSettings {
    pub prestart_weeks: u32,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self { prestart_weeks: 3 }
    }
}

/// Eligibility filter for adviser listings
#[derive(Debug, Clone, Default)]
pub struct AdviserFilter {
    pub service_package: Option<String>,
    pub household_type: Option<String>,
    pub include_not_taking: bool,
}

impl AdviserFilter {
    fn matches(&self, adviser: &Adviser) -> bool {
        if !adviser.taking_on_clients && !self.include_not_taking {
            return false;
        }
        if let Some(ref package) = self.service_package {
            if !adviser.service_packages.contains(package) {
                return false;
            }
        }
        if let Some(ref household) = self.household_type {
            if !adviser.household_types.contains(household) {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// Store
// ============================================================================

/// Store deadlines and cache freshness
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    pub call_timeout: Duration,
    pub list_timeout: Duration,
    pub cache_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            list_timeout: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

/// In-memory collections backing dev mode and tests
#[derive(Default)]
struct MemCollections {
    closures: DashMap<String, OfficeClosure>,
    overrides: DashMap<String, CapacityOverride>,
    /// Keyed by deal id: the uniqueness guarantee behind idempotent puts
    records: DashMap<String, AllocationRecord>,
    /// Keyed by employee email
    leave: DashMap<String, Vec<LeaveRequest>>,
    settings: RwLock<BTreeMap<String, serde_json::Value>>,
}

/// The store gateway
pub struct Store {
    mongo: Option<MongoClient>,
    mem: MemCollections,
    crm: Arc<dyn CrmApi>,
    hr: Option<Arc<dyn HrApi>>,
    config: StoreConfig,
    adviser_cache: Arc<TtlCache<(), Vec<Adviser>>>,
    employee_cache: Arc<TtlCache<(), Vec<Employee>>>,
    leave_cache: Arc<TtlCache<String, Vec<LeaveRequest>>>,
}

impl Store {
    /// MongoDB-backed store
    pub fn with_mongo(
        mongo: MongoClient,
        crm: Arc<dyn CrmApi>,
        hr: Option<Arc<dyn HrApi>>,
        config: StoreConfig,
    ) -> Self {
        Self {
            mongo: Some(mongo),
            mem: MemCollections::default(),
            crm,
            hr,
            config,
            adviser_cache: Arc::new(TtlCache::new(config.cache_ttl)),
            employee_cache: Arc::new(TtlCache::new(config.cache_ttl)),
            leave_cache: Arc::new(TtlCache::new(config.cache_ttl)),
        }
    }

    /// Memory-only store for dev mode and tests
    pub fn memory(crm: Arc<dyn CrmApi>, hr: Option<Arc<dyn HrApi>>, config: StoreConfig) -> Self {
        info!("Store running in memory-only mode");
        Self {
            mongo: None,
            mem: MemCollections::default(),
            crm,
            hr,
            config,
            adviser_cache: Arc::new(TtlCache::new(config.cache_ttl)),
            employee_cache: Arc::new(TtlCache::new(config.cache_ttl)),
            leave_cache: Arc::new(TtlCache::new(config.cache_ttl)),
        }
    }

    pub fn has_mongo(&self) -> bool {
        self.mongo.is_some()
    }

    /// Start the periodic sweeps that keep the TTL caches bounded
    pub fn spawn_cache_sweeps(&self) {
        let sweep_every = Duration::from_secs(60);
        spawn_sweep_task(Arc::clone(&self.adviser_cache), sweep_every);
        spawn_sweep_task(Arc::clone(&self.employee_cache), sweep_every);
        spawn_sweep_task(Arc::clone(&self.leave_cache), sweep_every);
    }

    async fn with_deadline<T>(
        &self,
        timeout: Duration,
        label: &str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::unavailable(format!("{} timed out", label))),
        }
    }

    fn map_crm_err(err: CrmError) -> StoreError {
        match err {
            CrmError::NotFound(msg) => StoreError::not_found(msg),
            CrmError::Transient(msg) | CrmError::Permanent(msg) => {
                StoreError::unavailable(format!("CRM: {}", msg))
            }
        }
    }

    fn map_hr_err(err: HrError) -> StoreError {
        StoreError::unavailable(format!("HR: {}", err))
    }

    // ========================================================================
    // CRM-backed reads
    // ========================================================================

    /// Advisers matching the eligibility filter, via a TTL-cached CRM read
    pub async fn list_advisers(&self, filter: &AdviserFilter) -> Result<Vec<Adviser>, StoreError> {
        let advisers = match self.adviser_cache.get(&()) {
            Some(cached) => cached,
            None => {
                let fresh = self
                    .with_deadline(self.config.list_timeout, "CRM adviser list", async {
                        self.crm.list_advisers().await.map_err(Self::map_crm_err)
                    })
                    .await?;
                self.adviser_cache.insert((), fresh.clone());
                fresh
            }
        };

        Ok(advisers.into_iter().filter(|a| filter.matches(a)).collect())
    }

    /// Find one adviser by email (case-insensitive)
    pub async fn find_adviser_by_email(&self, email: &str) -> Result<Option<Adviser>, StoreError> {
        let all = self
            .list_advisers(&AdviserFilter {
                include_not_taking: true,
                ..Default::default()
            })
            .await?;
        Ok(all.into_iter().find(|a| a.email.eq_ignore_ascii_case(email)))
    }

    /// Meetings for one adviser with start dates in `[from, to)`
    pub async fn get_meetings(
        &self,
        adviser_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Meeting>, StoreError> {
        self.with_deadline(self.config.list_timeout, "CRM meeting search", async {
            self.crm
                .list_meetings(adviser_id, from, to)
                .await
                .map_err(Self::map_crm_err)
        })
        .await
    }

    /// Open deals without a Clarify for one adviser, with agreement start
    /// before `before` (or unset)
    pub async fn get_deals_without_clarify(
        &self,
        adviser_id: &str,
        before: NaiveDate,
    ) -> Result<Vec<Deal>, StoreError> {
        self.with_deadline(self.config.list_timeout, "CRM deal search", async {
            self.crm
                .list_deals_without_first_meeting(adviser_id, before)
                .await
                .map_err(Self::map_crm_err)
        })
        .await
    }

    // ========================================================================
    // Leave
    // ========================================================================

    /// Approved leave for an adviser (by company email) overlapping
    /// `[from, to]`. Non-approved requests never leave this method, on
    /// either path; callers need no further status filtering.
    ///
    /// With an HR client configured this is a TTL-cached read-through; in
    /// its absence the synced collection serves. Unknown employees read as
    /// no leave.
    pub async fn get_leave_for_adviser(
        &self,
        email: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<LeaveRequest>, StoreError> {
        let email = email.to_ascii_lowercase();

        let Some(ref hr) = self.hr else {
            // Synced records are local and always read fresh, so sync
            // writes are visible immediately
            let leave = self.read_synced_leave(&email).await?;
            return Ok(clip_leave(leave, from, to));
        };

        // The HR read-through is cached per requested window
        let key = format!("{}|{}|{}", email, from, to);
        if let Some(cached) = self.leave_cache.get(&key) {
            return Ok(cached);
        }

        let employee = match self.find_employee(hr.as_ref(), &email).await? {
            Some(e) => e,
            None => {
                debug!("No HR employee for {}, treating as no leave", email);
                return Ok(Vec::new());
            }
        };
        let leave = self
            .with_deadline(self.config.list_timeout, "HR leave list", async {
                hr.list_approved_leave(&employee.id, from, to)
                    .await
                    .map_err(Self::map_hr_err)
            })
            .await?;
        let leave = clip_leave(leave, from, to);

        self.leave_cache.insert(key, leave.clone());
        Ok(leave)
    }

    async fn find_employee(
        &self,
        hr: &dyn HrApi,
        email: &str,
    ) -> Result<Option<Employee>, StoreError> {
        let employees = match self.employee_cache.get(&()) {
            Some(cached) => cached,
            None => {
                let fresh = self
                    .with_deadline(self.config.list_timeout, "HR employee list", async {
                        hr.list_employees().await.map_err(Self::map_hr_err)
                    })
                    .await?;
                self.employee_cache.insert((), fresh.clone());
                fresh
            }
        };
        Ok(employees
            .into_iter()
            .find(|e| e.email.eq_ignore_ascii_case(email)))
    }

    /// Read the synced collection, keeping only approved requests. The
    /// sync job persists every status it sees; only approved leave may
    /// count as out-of-office.
    async fn read_synced_leave(&self, email: &str) -> Result<Vec<LeaveRequest>, StoreError> {
        let records = match self.mongo {
            Some(ref mongo) => {
                let collection = mongo
                    .collection::<LeaveRequestDoc>(LEAVE_REQUEST_COLLECTION)
                    .await?;
                let docs = collection
                    .find_many(doc! { "employee_email": email }, Some(doc! { "start_date": 1 }))
                    .await?;
                docs.into_iter().map(LeaveRequestDoc::into_request).collect()
            }
            None => self.mem.leave.get(email).map(|v| v.clone()).unwrap_or_default(),
        };

        Ok(records
            .into_iter()
            .filter(|l| l.status == LeaveStatus::Approved)
            .collect())
    }

    /// Replace the synced leave records for one adviser. The periodic HR
    /// sync (outside this service) is the production caller.
    pub async fn put_leave_requests(
        &self,
        email: &str,
        requests: Vec<LeaveRequest>,
    ) -> Result<(), StoreError> {
        let key = email.to_ascii_lowercase();
        match self.mongo {
            Some(ref mongo) => {
                let collection = mongo
                    .collection::<LeaveRequestDoc>(LEAVE_REQUEST_COLLECTION)
                    .await?;
                collection.soft_delete(doc! { "employee_email": &key }).await?;
                for request in &requests {
                    collection
                        .insert_one(LeaveRequestDoc::from_request(&key, request))
                        .await?;
                }
            }
            None => {
                self.mem.leave.insert(key, requests);
            }
        }
        Ok(())
    }

    // ========================================================================
    // Closures
    // ========================================================================

    /// Global closures overlapping `[from, to]`
    pub async fn get_global_closures(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<OfficeClosure>, StoreError> {
        let all = self.list_closures().await?;
        Ok(all
            .into_iter()
            .filter(|c| c.scope == ClosureScope::Global && overlaps(c.start_date, c.end_date, from, to))
            .collect())
    }

    /// Adviser-scoped closures overlapping `[from, to]`
    pub async fn get_adviser_closures(
        &self,
        email: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<OfficeClosure>, StoreError> {
        let all = self.list_closures().await?;
        Ok(all
            .into_iter()
            .filter(|c| {
                matches!(&c.scope, ClosureScope::Adviser { email: e } if e.eq_ignore_ascii_case(email))
                    && overlaps(c.start_date, c.end_date, from, to)
            })
            .collect())
    }

    /// All closures, soonest first. Always a direct read: admin writes must
    /// be visible to the very next capacity run.
    pub async fn list_closures(&self) -> Result<Vec<OfficeClosure>, StoreError> {
        match self.mongo {
            Some(ref mongo) => {
                let collection = mongo.collection::<ClosureDoc>(CLOSURE_COLLECTION).await?;
                let docs = collection
                    .find_many(doc! {}, Some(doc! { "start_date": 1 }))
                    .await?;
                Ok(docs.into_iter().map(ClosureDoc::into_closure).collect())
            }
            None => {
                let mut items: Vec<OfficeClosure> =
                    self.mem.closures.iter().map(|e| e.value().clone()).collect();
                items.sort_by_key(|c| (c.start_date, c.id.clone()));
                Ok(items)
            }
        }
    }

    pub async fn create_closure(&self, mut closure: OfficeClosure) -> Result<OfficeClosure, StoreError> {
        match self.mongo {
            Some(ref mongo) => {
                let collection = mongo.collection::<ClosureDoc>(CLOSURE_COLLECTION).await?;
                let id = collection.insert_one(ClosureDoc::from_closure(&closure)).await?;
                closure.id = id.to_hex();
            }
            None => {
                closure.id = Uuid::new_v4().to_string();
                self.mem.closures.insert(closure.id.clone(), closure.clone());
            }
        }
        Ok(closure)
    }

    pub async fn update_closure(
        &self,
        id: &str,
        mut closure: OfficeClosure,
    ) -> Result<OfficeClosure, StoreError> {
        closure.id = id.to_string();
        match self.mongo {
            Some(ref mongo) => {
                let oid = parse_object_id(id)?;
                let collection = mongo.collection::<ClosureDoc>(CLOSURE_COLLECTION).await?;
                let update = doc! { "$set": {
                    "start_date": closure.start_date.to_string(),
                    "end_date": closure.end_date.to_string(),
                    "description": &closure.description,
                    "tags": &closure.tags,
                    "adviser_email": match &closure.scope {
                        ClosureScope::Global => bson::Bson::Null,
                        ClosureScope::Adviser { email } => bson::Bson::String(email.clone()),
                    },
                    "metadata.updated_at": bson::DateTime::now(),
                }};
                let matched = collection.update_one(doc! { "_id": oid }, update).await?;
                if matched == 0 {
                    return Err(StoreError::not_found(format!("closure {} not found", id)));
                }
            }
            None => {
                if !self.mem.closures.contains_key(id) {
                    return Err(StoreError::not_found(format!("closure {} not found", id)));
                }
                self.mem.closures.insert(id.to_string(), closure.clone());
            }
        }
        Ok(closure)
    }

    pub async fn delete_closure(&self, id: &str) -> Result<(), StoreError> {
        match self.mongo {
            Some(ref mongo) => {
                let oid = parse_object_id(id)?;
                let collection = mongo.collection::<ClosureDoc>(CLOSURE_COLLECTION).await?;
                let matched = collection.soft_delete(doc! { "_id": oid }).await?;
                if matched == 0 {
                    return Err(StoreError::not_found(format!("closure {} not found", id)));
                }
            }
            None => {
                if self.mem.closures.remove(id).is_none() {
                    return Err(StoreError::not_found(format!("closure {} not found", id)));
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Capacity overrides
    // ========================================================================

    /// Overrides, optionally restricted to one adviser, newest-effective first
    pub async fn list_capacity_overrides(
        &self,
        adviser_email: Option<&str>,
    ) -> Result<Vec<CapacityOverride>, StoreError> {
        match self.mongo {
            Some(ref mongo) => {
                let collection = mongo
                    .collection::<CapacityOverrideDoc>(CAPACITY_OVERRIDE_COLLECTION)
                    .await?;
                let filter = match adviser_email {
                    Some(email) => doc! { "adviser_email": email.to_ascii_lowercase() },
                    None => doc! {},
                };
                let docs = collection
                    .find_many(filter, Some(doc! { "effective_date": -1 }))
                    .await?;
                Ok(docs.into_iter().map(CapacityOverrideDoc::into_override).collect())
            }
            None => {
                let mut items: Vec<CapacityOverride> = self
                    .mem
                    .overrides
                    .iter()
                    .map(|e| e.value().clone())
                    .filter(|o| match adviser_email {
                        Some(email) => o.adviser_email.eq_ignore_ascii_case(email),
                        None => true,
                    })
                    .collect();
                items.sort_by(|a, b| b.effective_date.cmp(&a.effective_date));
                Ok(items)
            }
        }
    }

    /// The override with the greatest `effective_date <= as_of`, if any
    pub async fn get_active_capacity_override(
        &self,
        adviser_email: &str,
        as_of: NaiveDate,
    ) -> Result<Option<CapacityOverride>, StoreError> {
        let overrides = self.list_capacity_overrides(Some(adviser_email)).await?;
        Ok(overrides.into_iter().find(|o| o.effective_date <= as_of))
    }

    pub async fn create_capacity_override(
        &self,
        mut value: CapacityOverride,
    ) -> Result<CapacityOverride, StoreError> {
        value.adviser_email = value.adviser_email.to_ascii_lowercase();
        match self.mongo {
            Some(ref mongo) => {
                let collection = mongo
                    .collection::<CapacityOverrideDoc>(CAPACITY_OVERRIDE_COLLECTION)
                    .await?;
                let id = collection
                    .insert_one(CapacityOverrideDoc::from_override(&value))
                    .await?;
                value.id = id.to_hex();
            }
            None => {
                value.id = Uuid::new_v4().to_string();
                self.mem.overrides.insert(value.id.clone(), value.clone());
            }
        }
        Ok(value)
    }

    pub async fn update_capacity_override(
        &self,
        id: &str,
        mut value: CapacityOverride,
    ) -> Result<CapacityOverride, StoreError> {
        value.id = id.to_string();
        value.adviser_email = value.adviser_email.to_ascii_lowercase();
        match self.mongo {
            Some(ref mongo) => {
                let oid = parse_object_id(id)?;
                let collection = mongo
                    .collection::<CapacityOverrideDoc>(CAPACITY_OVERRIDE_COLLECTION)
                    .await?;
                let update = doc! { "$set": {
                    "adviser_email": &value.adviser_email,
                    "effective_date": value.effective_date.to_string(),
                    "client_limit_monthly": value.client_limit_monthly,
                    "pod_type": value.pod_type.as_deref().map(bson::Bson::from).unwrap_or(bson::Bson::Null),
                    "notes": value.notes.as_deref().map(bson::Bson::from).unwrap_or(bson::Bson::Null),
                    "metadata.updated_at": bson::DateTime::now(),
                }};
                let matched = collection.update_one(doc! { "_id": oid }, update).await?;
                if matched == 0 {
                    return Err(StoreError::not_found(format!("override {} not found", id)));
                }
            }
            None => {
                if !self.mem.overrides.contains_key(id) {
                    return Err(StoreError::not_found(format!("override {} not found", id)));
                }
                self.mem.overrides.insert(id.to_string(), value.clone());
            }
        }
        Ok(value)
    }

    pub async fn delete_capacity_override(&self, id: &str) -> Result<(), StoreError> {
        match self.mongo {
            Some(ref mongo) => {
                let oid = parse_object_id(id)?;
                let collection = mongo
                    .collection::<CapacityOverrideDoc>(CAPACITY_OVERRIDE_COLLECTION)
                    .await?;
                let matched = collection.soft_delete(doc! { "_id": oid }).await?;
                if matched == 0 {
                    return Err(StoreError::not_found(format!("override {} not found", id)));
                }
            }
            None => {
                if self.mem.overrides.remove(id).is_none() {
                    return Err(StoreError::not_found(format!("override {} not found", id)));
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Allocation records
    // ========================================================================

    /// Idempotent put keyed on deal id. A later `decided_at` overwrites in
    /// place (keeping the original record id); an earlier one loses and the
    /// stored record is returned unchanged.
    pub async fn put_allocation_record(
        &self,
        record: AllocationRecord,
    ) -> Result<AllocationRecord, StoreError> {
        match self.mongo {
            Some(ref mongo) => self.put_record_mongo(mongo, record).await,
            None => Ok(self.put_record_memory(record)),
        }
    }

    fn put_record_memory(&self, mut record: AllocationRecord) -> AllocationRecord {
        use dashmap::mapref::entry::Entry;
        match self.mem.records.entry(record.deal_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get();
                if existing.decided_at > record.decided_at {
                    return existing.clone();
                }
                record.id = existing.id.clone();
                occupied.insert(record.clone());
                record
            }
            Entry::Vacant(vacant) => {
                vacant.insert(record.clone());
                record
            }
        }
    }

    async fn put_record_mongo(
        &self,
        mongo: &MongoClient,
        record: AllocationRecord,
    ) -> Result<AllocationRecord, StoreError> {
        let collection = mongo
            .collection::<AllocationRecordDoc>(ALLOCATION_RECORD_COLLECTION)
            .await?;

        // Two passes: the unique deal_id index turns an insert race into a
        // duplicate-key error, which the second pass resolves as an update.
        for _ in 0..2 {
            match collection.find_one(doc! { "deal_id": &record.deal_id }).await? {
                Some(existing) => {
                    if existing.decided_at > record.decided_at {
                        return Ok(existing.into_record());
                    }
                    let mut updated = record.clone();
                    updated.id = existing.record_id.clone();
                    let encode =
                        |e: bson::ser::Error| StoreError::unavailable(format!("BSON encode failed: {}", e));
                    let extra = bson::to_bson(&updated.extra).map_err(encode)?;
                    // decided_at goes through serde so stored and queried
                    // representations stay identical
                    let decided_at = bson::to_bson(&updated.decided_at).map_err(encode)?;
                    let update = doc! { "$set": {
                        "adviser_id": &updated.adviser_id,
                        "adviser_email": &updated.adviser_email,
                        "service_package": &updated.service_package,
                        "household_type": updated.household_type.as_deref().map(bson::Bson::from).unwrap_or(bson::Bson::Null),
                        "earliest_week_anchor": updated.earliest_week_anchor.to_string(),
                        "decided_at": decided_at,
                        "requester_ip": updated.requester_ip.as_deref().map(bson::Bson::from).unwrap_or(bson::Bson::Null),
                        "requester_user_agent": updated.requester_user_agent.as_deref().map(bson::Bson::from).unwrap_or(bson::Bson::Null),
                        "extra": extra,
                        "metadata.updated_at": bson::DateTime::now(),
                    }};
                    collection
                        .update_one(doc! { "deal_id": &record.deal_id }, update)
                        .await?;
                    return Ok(updated);
                }
                None => {
                    match collection.insert_one(AllocationRecordDoc::from_record(&record)).await {
                        Ok(_) => return Ok(record),
                        Err(err) => {
                            // Lost the insert race; loop resolves via update
                            debug!("Allocation record insert conflicted, retrying as update: {}", err);
                            continue;
                        }
                    }
                }
            }
        }

        Err(StoreError::new(
            StoreErrorKind::Conflict,
            format!("allocation record for deal {} kept conflicting", record.deal_id),
        ))
    }

    /// Current allocation record for a deal, if any
    pub async fn get_allocation_record(
        &self,
        deal_id: &str,
    ) -> Result<Option<AllocationRecord>, StoreError> {
        match self.mongo {
            Some(ref mongo) => {
                let collection = mongo
                    .collection::<AllocationRecordDoc>(ALLOCATION_RECORD_COLLECTION)
                    .await?;
                let found = collection.find_one(doc! { "deal_id": deal_id }).await?;
                Ok(found.map(AllocationRecordDoc::into_record))
            }
            None => Ok(self.mem.records.get(deal_id).map(|r| r.clone())),
        }
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Settings this service consumes; missing keys fall back to defaults
    pub async fn get_settings(&self) -> Result<SystemSettings, StoreError> {
        let value = match self.mongo {
            Some(ref mongo) => {
                let collection = mongo.collection::<SettingsDoc>(SETTINGS_COLLECTION).await?;
                collection
                    .find_one(doc! { "key": "prestart_weeks" })
                    .await?
                    .map(|d| d.value)
            }
            None => self
                .mem
                .settings
                .read()
                .ok()
                .and_then(|map| map.get("prestart_weeks").cloned()),
        };

        let mut settings = SystemSettings::default();
        if let Some(raw) = value {
            if let Some(weeks) = raw.as_u64() {
                settings.prestart_weeks = weeks as u32;
            }
        }
        Ok(settings)
    }

    /// Set one settings key (memory mode only; production writes go through
    /// the subsystem that owns the collection)
    pub fn set_setting_mem(&self, key: &str, value: serde_json::Value) {
        if let Ok(mut map) = self.mem.settings.write() {
            map.insert(key.to_string(), value);
        }
    }
}

fn parse_object_id(id: &str) -> Result<bson::oid::ObjectId, StoreError> {
    bson::oid::ObjectId::parse_str(id)
        .map_err(|_| StoreError::not_found(format!("no record with id {}", id)))
}

fn overlaps(start: NaiveDate, end: NaiveDate, from: NaiveDate, to: NaiveDate) -> bool {
    start <= to && end >= from
}

fn clip_leave(leave: Vec<LeaveRequest>, from: NaiveDate, to: NaiveDate) -> Vec<LeaveRequest> {
    leave
        .into_iter()
        .filter(|l| overlaps(l.start_date, l.end_date, from, to))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NullCrm;

    #[async_trait]
    impl CrmApi for NullCrm {
        async fn get_deal(&self, _deal_id: &str) -> Result<Option<Deal>, CrmError> {
            Ok(None)
        }
        async fn list_advisers(&self) -> Result<Vec<Adviser>, CrmError> {
            Ok(Vec::new())
        }
        async fn list_meetings(
            &self,
            _adviser_id: &str,
            _from: NaiveDate,
            _to: NaiveDate,
        ) -> Result<Vec<Meeting>, CrmError> {
            Ok(Vec::new())
        }
        async fn list_deals_without_first_meeting(
            &self,
            _adviser_id: &str,
            _before: NaiveDate,
        ) -> Result<Vec<Deal>, CrmError> {
            Ok(Vec::new())
        }
        async fn set_deal_owner(&self, _deal_id: &str, _adviser_id: &str) -> Result<(), CrmError> {
            Ok(())
        }
    }

    fn memory_store() -> Store {
        Store::memory(Arc::new(NullCrm), None, StoreConfig::default())
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn sample_closure() -> OfficeClosure {
        OfficeClosure {
            id: String::new(),
            start_date: d("2026-01-26"),
            end_date: d("2026-01-30"),
            description: "Office shutdown".to_string(),
            tags: vec!["holiday".to_string()],
            scope: ClosureScope::Global,
        }
    }

    fn sample_record(deal_id: &str, decided_at: DateTime<Utc>) -> AllocationRecord {
        AllocationRecord {
            id: Uuid::new_v4().to_string(),
            deal_id: deal_id.to_string(),
            adviser_id: "a1".to_string(),
            adviser_email: "a@example.com".to_string(),
            service_package: "Series A".to_string(),
            household_type: None,
            earliest_week_anchor: d("2026-01-26"),
            decided_at,
            requester_ip: None,
            requester_user_agent: None,
            extra: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_closure_crud_memory() {
        let store = memory_store();

        let created = store.create_closure(sample_closure()).await.unwrap();
        assert!(!created.id.is_empty());

        let listed = store.list_closures().await.unwrap();
        assert_eq!(listed.len(), 1);

        let mut updated = created.clone();
        updated.description = "Renovation".to_string();
        let updated = store.update_closure(&created.id, updated).await.unwrap();
        assert_eq!(updated.description, "Renovation");

        store.delete_closure(&created.id).await.unwrap();
        assert!(store.list_closures().await.unwrap().is_empty());

        let missing = store.delete_closure(&created.id).await;
        assert!(matches!(missing, Err(e) if e.kind == StoreErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_closure_scope_filters() {
        let store = memory_store();
        store.create_closure(sample_closure()).await.unwrap();

        let mut personal = sample_closure();
        personal.scope = ClosureScope::adviser("b@example.com");
        store.create_closure(personal).await.unwrap();

        let global = store
            .get_global_closures(d("2026-01-01"), d("2026-12-31"))
            .await
            .unwrap();
        assert_eq!(global.len(), 1);

        let scoped = store
            .get_adviser_closures("B@EXAMPLE.COM", d("2026-01-01"), d("2026-12-31"))
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);

        // Disjoint window sees nothing
        let none = store
            .get_global_closures(d("2026-03-01"), d("2026-03-31"))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_active_override_picks_greatest_effective_date() {
        let store = memory_store();
        for (date, limit) in [("2026-01-01", 4), ("2026-02-01", 8), ("2026-03-01", 2)] {
            store
                .create_capacity_override(CapacityOverride {
                    id: String::new(),
                    adviser_email: "a@example.com".to_string(),
                    effective_date: d(date),
                    client_limit_monthly: limit,
                    pod_type: None,
                    notes: None,
                })
                .await
                .unwrap();
        }

        let active = store
            .get_active_capacity_override("a@example.com", d("2026-02-15"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.client_limit_monthly, 8);

        let before_any = store
            .get_active_capacity_override("a@example.com", d("2025-12-31"))
            .await
            .unwrap();
        assert!(before_any.is_none());
    }

    #[tokio::test]
    async fn test_record_put_is_idempotent_per_deal() {
        let store = memory_store();
        let first = store
            .put_allocation_record(sample_record("deal-1", Utc::now()))
            .await
            .unwrap();

        let mut second = sample_record("deal-1", Utc::now() + chrono::Duration::seconds(5));
        second.adviser_email = "b@example.com".to_string();
        let second = store.put_allocation_record(second).await.unwrap();

        // Overwrite in place, original id preserved
        assert_eq!(second.id, first.id);
        let stored = store.get_allocation_record("deal-1").await.unwrap().unwrap();
        assert_eq!(stored.adviser_email, "b@example.com");
    }

    #[tokio::test]
    async fn test_record_put_last_writer_wins_by_decided_at() {
        let store = memory_store();
        let later = Utc::now();
        let earlier = later - chrono::Duration::minutes(10);

        store
            .put_allocation_record(sample_record("deal-2", later))
            .await
            .unwrap();

        let mut stale = sample_record("deal-2", earlier);
        stale.adviser_email = "stale@example.com".to_string();
        let result = store.put_allocation_record(stale).await.unwrap();

        // The stale write loses; stored state is untouched
        assert_eq!(result.adviser_email, "a@example.com");
        let stored = store.get_allocation_record("deal-2").await.unwrap().unwrap();
        assert_eq!(stored.adviser_email, "a@example.com");
    }

    #[tokio::test]
    async fn test_settings_default_and_memory_write() {
        let store = memory_store();
        assert_eq!(store.get_settings().await.unwrap().prestart_weeks, 3);

        store.set_setting_mem("prestart_weeks", serde_json::json!(5));
        assert_eq!(store.get_settings().await.unwrap().prestart_weeks, 5);
    }

    fn leave(start: &str, end: &str, status: LeaveStatus) -> LeaveRequest {
        LeaveRequest {
            employee_id: "e1".to_string(),
            start_date: d(start),
            end_date: d(end),
            status,
        }
    }

    #[tokio::test]
    async fn test_synced_leave_round_trip() {
        let store = memory_store();
        store
            .put_leave_requests(
                "A@Example.com",
                vec![leave("2026-01-28", "2026-01-29", LeaveStatus::Approved)],
            )
            .await
            .unwrap();

        let leave = store
            .get_leave_for_adviser("a@example.com", d("2026-01-01"), d("2026-12-31"))
            .await
            .unwrap();
        assert_eq!(leave.len(), 1);

        // Outside the window the same record is invisible
        let none = store
            .get_leave_for_adviser("a@example.com", d("2026-03-01"), d("2026-03-31"))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_synced_leave_only_approved_counts() {
        // The sync job hands over whatever the HR platform holds; only
        // approved requests may surface as leave
        let store = memory_store();
        store
            .put_leave_requests(
                "a@example.com",
                vec![
                    leave("2026-01-28", "2026-01-29", LeaveStatus::Approved),
                    leave("2026-02-02", "2026-02-06", LeaveStatus::Pending),
                    leave("2026-02-09", "2026-02-13", LeaveStatus::Declined),
                    leave("2026-02-16", "2026-02-20", LeaveStatus::Other),
                ],
            )
            .await
            .unwrap();

        let visible = store
            .get_leave_for_adviser("a@example.com", d("2026-01-01"), d("2026-12-31"))
            .await
            .unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].status, LeaveStatus::Approved);
        assert_eq!(visible[0].start_date, d("2026-01-28"));
    }
}
