//! Claim coordination: pricing, availability checks, reservations and the
//! exclusive claim itself.

use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::ClinicIdentity;
use crate::config::PricingConfig;
use crate::errors::{AppError, ResultExt};
use crate::models::{
    Clinic, Lead, LeadClaim, LeadLock, LeadStatus, NewClinic, PriceBreakdownView,
};
use crate::store::LeadStore;

pub const CLAIM_CLINIC_NAME: &str = "New Clinic";
pub const PROFILE_CLINIC_NAME: &str = "My Clinic";
const UNAVAILABLE: &str = "Lead is no longer available";

/// Amounts charged for one claim, all in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceBreakdown {
    pub amount_cents: i64,
    pub tax_cents: i64,
    pub fee_cents: i64,
    pub total_cents: i64,
}

impl PriceBreakdown {
    /// `tax = round_half_up(price * rate)`, `total = price + tax + fee`.
    pub fn compute(price_cents: i64, pricing: &PricingConfig) -> Result<Self, AppError> {
        let tax_cents = (BigDecimal::from(price_cents) * &pricing.tax_rate)
            .with_scale_round(0, RoundingMode::HalfUp)
            .to_i64()
            .ok_or_else(|| AppError::InternalError("Tax amount out of range".to_string()))?;
        let fee_cents = pricing.flat_fee_cents;
        let total_cents = price_cents
            .checked_add(tax_cents)
            .and_then(|sum| sum.checked_add(fee_cents))
            .ok_or_else(|| AppError::InternalError("Claim total out of range".to_string()))?;

        Ok(Self {
            amount_cents: price_cents,
            tax_cents,
            fee_cents,
            total_cents,
        })
    }
}

impl From<&LeadClaim> for PriceBreakdown {
    fn from(claim: &LeadClaim) -> Self {
        Self {
            amount_cents: claim.amount_cents,
            tax_cents: claim.tax_cents,
            fee_cents: claim.fee_cents,
            total_cents: claim.total_cents,
        }
    }
}

impl From<PriceBreakdown> for PriceBreakdownView {
    fn from(b: PriceBreakdown) -> Self {
        Self {
            amount_cents: b.amount_cents,
            tax_cents: b.tax_cents,
            fee_cents: b.fee_cents,
            total_cents: b.total_cents,
        }
    }
}

/// Whether `clinic_id` may reserve or claim `lead` right now.
///
/// Claimed leads are never available. A live lock held by another clinic
/// blocks; an expired lock counts as no lock.
pub fn ensure_available_to(
    lead: &Lead,
    lock: Option<&LeadLock>,
    clinic_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    match lead.effective_status(lock, now) {
        LeadStatus::Available => Ok(()),
        LeadStatus::BeingClaimed if lock.is_some_and(|l| l.locked_by == clinic_id) => Ok(()),
        LeadStatus::BeingClaimed | LeadStatus::Claimed => {
            Err(AppError::Conflict(UNAVAILABLE.to_string()))
        }
    }
}

/// Parse a lead id supplied by a client.
pub fn parse_lead_id(raw: &str) -> Result<Uuid, AppError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::Validation("Lead ID required".to_string()));
    }
    Uuid::parse_str(raw).map_err(|_| AppError::Validation(format!("Invalid lead ID '{}'", raw)))
}

#[derive(Debug, Clone)]
pub struct ClaimOutcome {
    pub clinic_id: Uuid,
    pub claim: LeadClaim,
    pub breakdown: PriceBreakdown,
}

/// Runs claims and reservations on behalf of authenticated clinics.
#[derive(Clone)]
pub struct ClaimCoordinator {
    store: Arc<dyn LeadStore>,
    lock_ttl: chrono::Duration,
}

impl ClaimCoordinator {
    pub fn new(store: Arc<dyn LeadStore>, lock_ttl: chrono::Duration) -> Self {
        Self { store, lock_ttl }
    }

    /// Clinic for this identity, created on first use.
    pub async fn resolve_clinic(
        &self,
        identity: &ClinicIdentity,
        default_name: &str,
    ) -> Result<Clinic, AppError> {
        let clinic_name = identity
            .display_name
            .clone()
            .unwrap_or_else(|| default_name.to_string());

        self.store
            .upsert_clinic(NewClinic {
                external_id: identity.external_id.clone(),
                clinic_name,
                email: identity.email.clone(),
            })
            .await
            .with_context(|| format!("resolving clinic {}", identity.external_id))
    }

    /// Clinic id for the identity if it has a record, without creating one.
    pub async fn viewer_id(&self, identity: &ClinicIdentity) -> Result<Option<Uuid>, AppError> {
        Ok(self
            .store
            .find_clinic(&identity.external_id)
            .await?
            .map(|c| c.id))
    }

    /// Claim with pricing read from the environment.
    pub async fn claim(
        &self,
        lead_id: Uuid,
        identity: &ClinicIdentity,
    ) -> Result<ClaimOutcome, AppError> {
        let pricing = PricingConfig::from_env()?;
        self.claim_with_pricing(lead_id, identity, &pricing).await
    }

    pub async fn claim_with_pricing(
        &self,
        lead_id: Uuid,
        identity: &ClinicIdentity,
        pricing: &PricingConfig,
    ) -> Result<ClaimOutcome, AppError> {
        let clinic = self.resolve_clinic(identity, CLAIM_CLINIC_NAME).await?;

        let claim = self
            .store
            .claim_lead(lead_id, clinic.id, pricing, Utc::now())
            .await;

        match claim {
            Ok(claim) => {
                tracing::info!(
                    "Lead {} claimed by clinic {} (total {} cents)",
                    lead_id,
                    clinic.id,
                    claim.total_cents
                );
                Ok(ClaimOutcome {
                    clinic_id: clinic.id,
                    breakdown: PriceBreakdown::from(&claim),
                    claim,
                })
            }
            Err(e) => {
                if e.is_conflict() {
                    tracing::info!("Claim of lead {} by clinic {} rejected: {}", lead_id, clinic.id, e);
                } else {
                    tracing::warn!("Claim of lead {} by clinic {} failed: {}", lead_id, clinic.id, e);
                }
                Err(e)
            }
        }
    }

    /// Reserve the lead for this clinic for the configured lock lifetime.
    pub async fn reserve(
        &self,
        lead_id: Uuid,
        identity: &ClinicIdentity,
    ) -> Result<LeadLock, AppError> {
        let clinic = self.resolve_clinic(identity, CLAIM_CLINIC_NAME).await?;
        let now = Utc::now();

        let lock = self
            .store
            .reserve_lead(lead_id, clinic.id, now + self.lock_ttl, now)
            .await?;

        tracing::debug!(
            "Lead {} reserved by clinic {} until {}",
            lead_id,
            clinic.id,
            lock.expires_at
        );
        Ok(lock)
    }

    pub async fn release(&self, lead_id: Uuid, identity: &ClinicIdentity) -> Result<(), AppError> {
        let clinic_id = self
            .viewer_id(identity)
            .await?
            .ok_or_else(|| AppError::Conflict("No reservation held for this lead".to_string()))?;

        if !self.store.release_lead(lead_id, clinic_id).await? {
            return Err(AppError::Conflict(
                "No reservation held for this lead".to_string(),
            ));
        }

        tracing::debug!("Lead {} released by clinic {}", lead_id, clinic_id);
        Ok(())
    }
}
