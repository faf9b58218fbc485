//! Persistence for leads, clinics, claims and reservations.
//!
//! Both backends enforce the same rules: one lead per phone, forward-only
//! status, and at most one succeeded claim per lead. The claim and reserve
//! operations run their check-and-write as one atomic unit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::PricingConfig;
use crate::errors::AppError;
use crate::models::{
    Clinic, ClinicUpdate, DashboardStats, LeadClaim, LeadFilter, LeadLock, LeadMetadata,
    LeadRecord, NewClinic, NewLead, NewLeadMetadata,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgLeadStore;

/// Outcome of writing a freshly ingested lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created(Uuid),
    /// Another lead already holds this phone.
    Duplicate,
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Whether a lead with this digits-only phone exists.
    async fn phone_exists(&self, phone: &str) -> Result<bool, AppError>;

    /// Write the lead, its primary photo and its metadata in one transaction.
    async fn insert_lead(
        &self,
        lead: NewLead,
        photo_url: String,
        metadata: NewLeadMetadata,
    ) -> Result<InsertOutcome, AppError>;

    async fn get_lead(&self, lead_id: Uuid) -> Result<Option<LeadRecord>, AppError>;

    /// Newest first.
    async fn list_leads(&self, filter: LeadFilter) -> Result<Vec<LeadRecord>, AppError>;

    async fn lead_metadata(&self, lead_id: Uuid) -> Result<Option<LeadMetadata>, AppError>;

    async fn find_clinic(&self, external_id: &str) -> Result<Option<Clinic>, AppError>;

    /// Return the clinic for `external_id`, creating it if missing.
    async fn upsert_clinic(&self, clinic: NewClinic) -> Result<Clinic, AppError>;

    async fn update_clinic(&self, clinic_id: Uuid, update: ClinicUpdate)
        -> Result<Clinic, AppError>;

    /// Atomically check claimability, record the claim and mark the lead claimed.
    async fn claim_lead(
        &self,
        lead_id: Uuid,
        clinic_id: Uuid,
        pricing: &PricingConfig,
        now: DateTime<Utc>,
    ) -> Result<LeadClaim, AppError>;

    /// Place or refresh a reservation and mark the lead `being_claimed`.
    async fn reserve_lead(
        &self,
        lead_id: Uuid,
        clinic_id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<LeadLock, AppError>;

    /// Drop the clinic's own reservation. Returns whether one was removed.
    async fn release_lead(&self, lead_id: Uuid, clinic_id: Uuid) -> Result<bool, AppError>;

    async fn dashboard_stats(&self, now: DateTime<Utc>) -> Result<DashboardStats, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}
