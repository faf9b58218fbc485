//! In-process store. Every operation takes the one mutex, so each
//! check-and-write is atomic with respect to every other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{InsertOutcome, LeadStore};
use crate::claims::{ensure_available_to, PriceBreakdown};
use crate::config::PricingConfig;
use crate::errors::AppError;
use crate::models::{
    Clinic, ClinicUpdate, DashboardStats, Lead, LeadClaim, LeadFilter, LeadLock, LeadMetadata,
    LeadPhoto, LeadRecord, LeadStatus, NewClinic, NewLead, NewLeadMetadata,
    CLAIM_STATUS_SUCCEEDED,
};

#[derive(Default)]
struct Tables {
    leads: HashMap<Uuid, Lead>,
    phones: HashMap<String, Uuid>,
    photos: Vec<LeadPhoto>,
    metadata: HashMap<Uuid, LeadMetadata>,
    clinics: HashMap<Uuid, Clinic>,
    claims: Vec<LeadClaim>,
    locks: HashMap<Uuid, LeadLock>,
}

impl Tables {
    fn record(&self, lead: &Lead) -> LeadRecord {
        LeadRecord {
            lead: lead.clone(),
            photos: self
                .photos
                .iter()
                .filter(|p| p.lead_id == lead.id)
                .cloned()
                .collect(),
            claim: self
                .claims
                .iter()
                .find(|c| c.lead_id == lead.id && c.succeeded())
                .cloned(),
            lock: self.locks.get(&lead.id).cloned(),
        }
    }

    fn all_records(&self) -> Vec<LeadRecord> {
        let mut leads: Vec<&Lead> = self.leads.values().collect();
        leads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        leads.into_iter().map(|l| self.record(l)).collect()
    }
}

fn advance(lead: &mut Lead, next: LeadStatus) -> Result<(), AppError> {
    if !lead.status.can_transition_to(next) {
        return Err(AppError::Conflict("Lead is no longer available".to_string()));
    }
    lead.status = next;
    Ok(())
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of claim records for a lead, succeeded or not.
    pub async fn claim_count(&self, lead_id: Uuid) -> usize {
        let tables = self.tables.lock().await;
        tables.claims.iter().filter(|c| c.lead_id == lead_id).count()
    }

    pub async fn lead_count(&self) -> usize {
        self.tables.lock().await.leads.len()
    }
}

#[async_trait]
impl LeadStore for MemoryStore {
    async fn phone_exists(&self, phone: &str) -> Result<bool, AppError> {
        Ok(self.tables.lock().await.phones.contains_key(phone))
    }

    async fn insert_lead(
        &self,
        lead: NewLead,
        photo_url: String,
        metadata: NewLeadMetadata,
    ) -> Result<InsertOutcome, AppError> {
        let mut tables = self.tables.lock().await;

        if tables.phones.contains_key(&lead.phone) {
            return Ok(InsertOutcome::Duplicate);
        }

        let id = Uuid::new_v4();
        tables.phones.insert(lead.phone.clone(), id);
        tables.photos.push(LeadPhoto {
            id: Uuid::new_v4(),
            lead_id: id,
            url: photo_url,
            is_primary: true,
        });
        tables.metadata.insert(
            id,
            LeadMetadata {
                lead_id: id,
                transcript: metadata.transcript,
                call_summary: metadata.call_summary,
                call_direction: metadata.call_direction,
                created_at: lead.created_at,
            },
        );
        tables.leads.insert(
            id,
            Lead {
                id,
                tier: lead.tier,
                status: LeadStatus::Available,
                price_cents: lead.price_cents,
                score: lead.score,
                city: lead.city,
                region: lead.region,
                summary: lead.summary,
                name: lead.name,
                email: lead.email,
                phone: Some(lead.phone),
                created_at: lead.created_at,
            },
        );

        Ok(InsertOutcome::Created(id))
    }

    async fn get_lead(&self, lead_id: Uuid) -> Result<Option<LeadRecord>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables.leads.get(&lead_id).map(|l| tables.record(l)))
    }

    async fn list_leads(&self, filter: LeadFilter) -> Result<Vec<LeadRecord>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .all_records()
            .into_iter()
            .filter(|r| match filter {
                LeadFilter::All => true,
                LeadFilter::Tier(tier) => r.lead.tier == tier,
                LeadFilter::ClaimedBy(clinic_id) => r.owner() == Some(clinic_id),
            })
            .collect())
    }

    async fn lead_metadata(&self, lead_id: Uuid) -> Result<Option<LeadMetadata>, AppError> {
        Ok(self.tables.lock().await.metadata.get(&lead_id).cloned())
    }

    async fn find_clinic(&self, external_id: &str) -> Result<Option<Clinic>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .clinics
            .values()
            .find(|c| c.external_id == external_id)
            .cloned())
    }

    async fn upsert_clinic(&self, clinic: NewClinic) -> Result<Clinic, AppError> {
        let mut tables = self.tables.lock().await;

        if let Some(existing) = tables
            .clinics
            .values_mut()
            .find(|c| c.external_id == clinic.external_id)
        {
            if existing.email.is_none() {
                existing.email = clinic.email;
            }
            return Ok(existing.clone());
        }

        let created = Clinic {
            id: Uuid::new_v4(),
            external_id: clinic.external_id,
            clinic_name: clinic.clinic_name,
            email: clinic.email,
            phone: None,
            logo_url: None,
            location: None,
            created_at: Utc::now(),
        };
        tables.clinics.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_clinic(
        &self,
        clinic_id: Uuid,
        update: ClinicUpdate,
    ) -> Result<Clinic, AppError> {
        let mut tables = self.tables.lock().await;
        let clinic = tables
            .clinics
            .get_mut(&clinic_id)
            .ok_or_else(|| AppError::NotFound("Clinic not found".to_string()))?;

        if let Some(name) = update.clinic_name {
            clinic.clinic_name = name;
        }
        if update.email.is_some() {
            clinic.email = update.email;
        }
        if update.phone.is_some() {
            clinic.phone = update.phone;
        }
        if update.logo_url.is_some() {
            clinic.logo_url = update.logo_url;
        }
        if update.location.is_some() {
            clinic.location = update.location;
        }

        Ok(clinic.clone())
    }

    async fn claim_lead(
        &self,
        lead_id: Uuid,
        clinic_id: Uuid,
        pricing: &PricingConfig,
        now: DateTime<Utc>,
    ) -> Result<LeadClaim, AppError> {
        let mut tables = self.tables.lock().await;

        let lead = tables
            .leads
            .get(&lead_id)
            .ok_or_else(|| AppError::NotFound("Lead not found".to_string()))?;
        ensure_available_to(lead, tables.locks.get(&lead_id), clinic_id, now)?;
        let breakdown = PriceBreakdown::compute(lead.price_cents, pricing)?;

        let claim = LeadClaim {
            id: Uuid::new_v4(),
            lead_id,
            clinic_id,
            amount_cents: breakdown.amount_cents,
            tax_cents: breakdown.tax_cents,
            fee_cents: breakdown.fee_cents,
            total_cents: breakdown.total_cents,
            status: CLAIM_STATUS_SUCCEEDED.to_string(),
            created_at: now,
        };

        if let Some(lead) = tables.leads.get_mut(&lead_id) {
            advance(lead, LeadStatus::Claimed)?;
        }
        tables.claims.push(claim.clone());
        tables.locks.remove(&lead_id);

        Ok(claim)
    }

    async fn reserve_lead(
        &self,
        lead_id: Uuid,
        clinic_id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<LeadLock, AppError> {
        let mut tables = self.tables.lock().await;

        let lead = tables
            .leads
            .get(&lead_id)
            .ok_or_else(|| AppError::NotFound("Lead not found".to_string()))?;
        ensure_available_to(lead, tables.locks.get(&lead_id), clinic_id, now)?;

        let lock = LeadLock {
            lead_id,
            locked_by: clinic_id,
            locked_at: now,
            expires_at,
        };
        if let Some(lead) = tables.leads.get_mut(&lead_id) {
            advance(lead, LeadStatus::BeingClaimed)?;
        }
        tables.locks.insert(lead_id, lock.clone());

        Ok(lock)
    }

    async fn release_lead(&self, lead_id: Uuid, clinic_id: Uuid) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;

        if !tables.leads.contains_key(&lead_id) {
            return Err(AppError::NotFound("Lead not found".to_string()));
        }

        match tables.locks.get(&lead_id) {
            Some(lock) if lock.locked_by == clinic_id => {
                tables.locks.remove(&lead_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn dashboard_stats(&self, now: DateTime<Utc>) -> Result<DashboardStats, AppError> {
        let tables = self.tables.lock().await;
        Ok(DashboardStats::from_records(&tables.all_records(), now))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}
