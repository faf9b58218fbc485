use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

// ============ Enumerations ============

/// Coarse quality bucket driving the price of a lead.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[sqlx(type_name = "lead_tier", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LeadTier {
    Warm,
    Hot,
    Platinum,
}

impl LeadTier {
    /// Fixed list price in minor currency units.
    pub fn price_cents(self) -> i64 {
        match self {
            LeadTier::Warm => 2500,
            LeadTier::Hot => 4500,
            LeadTier::Platinum => 7500,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LeadTier::Warm => "warm",
            LeadTier::Hot => "hot",
            LeadTier::Platinum => "platinum",
        }
    }
}

impl fmt::Display for LeadTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadTier {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "warm" => Ok(LeadTier::Warm),
            "hot" => Ok(LeadTier::Hot),
            "platinum" => Ok(LeadTier::Platinum),
            other => Err(AppError::Validation(format!("Unknown tier '{}'", other))),
        }
    }
}

/// Lead lifecycle. Forward-only: a lead never returns to an earlier state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[sqlx(type_name = "lead_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Available,
    BeingClaimed,
    Claimed,
}

impl LeadStatus {
    /// Whether the stored status may move from `self` to `next`.
    ///
    /// `BeingClaimed -> BeingClaimed` covers a fresh reservation replacing an
    /// expired one.
    pub fn can_transition_to(self, next: LeadStatus) -> bool {
        matches!(
            (self, next),
            (LeadStatus::Available, LeadStatus::BeingClaimed)
                | (LeadStatus::Available, LeadStatus::Claimed)
                | (LeadStatus::BeingClaimed, LeadStatus::BeingClaimed)
                | (LeadStatus::BeingClaimed, LeadStatus::Claimed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LeadStatus::Available => "available",
            LeadStatus::BeingClaimed => "being_claimed",
            LeadStatus::Claimed => "claimed",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============ Database Models ============

/// A sellable, scored contact opportunity derived from a call record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Lead {
    pub id: Uuid,
    pub tier: LeadTier,
    pub status: LeadStatus,
    pub price_cents: i64,
    /// Quality score in [0, 100].
    pub score: f64,
    pub city: Option<String>,
    pub region: Option<String>,
    pub summary: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    /// Digits only.
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    /// Status as the rest of the system should see it: a reservation whose lock
    /// is gone or expired no longer holds the lead.
    pub fn effective_status(&self, lock: Option<&LeadLock>, now: DateTime<Utc>) -> LeadStatus {
        match self.status {
            LeadStatus::BeingClaimed if !lock.is_some_and(|l| l.is_live(now)) => {
                LeadStatus::Available
            }
            status => status,
        }
    }
}

/// Lead row as built by the ingestion pipeline, before the store assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLead {
    pub tier: LeadTier,
    pub price_cents: i64,
    pub score: f64,
    pub city: Option<String>,
    pub region: Option<String>,
    pub summary: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct LeadPhoto {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub url: String,
    pub is_primary: bool,
}

/// Private call details. Only the clinic that bought the lead may read these.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct LeadMetadata {
    pub lead_id: Uuid,
    pub transcript: String,
    pub call_summary: String,
    pub call_direction: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewLeadMetadata {
    pub transcript: String,
    pub call_summary: String,
    pub call_direction: String,
}

/// A subscriber (buyer) of leads, one-to-one with an external identity.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Clinic {
    pub id: Uuid,
    /// Identity reference issued by the authentication provider.
    pub external_id: String,
    pub clinic_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub logo_url: Option<String>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Values used when a clinic record has to be created lazily.
#[derive(Debug, Clone)]
pub struct NewClinic {
    pub external_id: String,
    pub clinic_name: String,
    pub email: Option<String>,
}

/// Partial profile update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ClinicUpdate {
    pub clinic_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub logo_url: Option<String>,
    pub location: Option<String>,
}

impl ClinicUpdate {
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(name) = &self.clinic_name {
            if name.trim().is_empty() {
                return Err(AppError::Validation(
                    "clinic_name cannot be empty".to_string(),
                ));
            }
        }
        if let Some(email) = &self.email {
            if !email.is_empty() && !email.contains('@') {
                return Err(AppError::Validation(format!("Invalid email '{}'", email)));
            }
        }
        Ok(())
    }
}

pub const CLAIM_STATUS_SUCCEEDED: &str = "succeeded";

/// Record of a completed purchase. Immutable once written.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct LeadClaim {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub clinic_id: Uuid,
    pub amount_cents: i64,
    pub tax_cents: i64,
    pub fee_cents: i64,
    pub total_cents: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl LeadClaim {
    pub fn succeeded(&self) -> bool {
        self.status == CLAIM_STATUS_SUCCEEDED
    }
}

/// Short-lived reservation backing the `being_claimed` status.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct LeadLock {
    pub lead_id: Uuid,
    /// Clinic id of the holder.
    pub locked_by: Uuid,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LeadLock {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Everything the store knows about one lead, as read in one go.
#[derive(Debug, Clone)]
pub struct LeadRecord {
    pub lead: Lead,
    pub photos: Vec<LeadPhoto>,
    pub claim: Option<LeadClaim>,
    pub lock: Option<LeadLock>,
}

impl LeadRecord {
    /// Clinic holding the succeeded claim, if any.
    pub fn owner(&self) -> Option<Uuid> {
        self.claim
            .as_ref()
            .filter(|c| c.succeeded())
            .map(|c| c.clinic_id)
    }
}

/// Listing filter, mirroring the dashboard tabs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadFilter {
    All,
    Tier(LeadTier),
    /// Leads claimed by the requesting clinic.
    ClaimedBy(Uuid),
}

/// Aggregates for the subscriber dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DashboardStats {
    pub new_leads_24h: i64,
    pub available_now: i64,
    pub average_score: f64,
    /// Sum of list prices of claimed leads.
    pub total_revenue_cents: i64,
}

impl DashboardStats {
    pub fn from_records(records: &[LeadRecord], now: DateTime<Utc>) -> Self {
        let since = now - chrono::Duration::hours(24);
        let total = records.len();

        let average_score = if total > 0 {
            records.iter().map(|r| r.lead.score).sum::<f64>() / total as f64
        } else {
            0.0
        };

        Self {
            new_leads_24h: records
                .iter()
                .filter(|r| r.lead.created_at > since)
                .count() as i64,
            available_now: records
                .iter()
                .filter(|r| {
                    r.lead.effective_status(r.lock.as_ref(), now) == LeadStatus::Available
                })
                .count() as i64,
            average_score,
            total_revenue_cents: records
                .iter()
                .filter(|r| r.lead.status == LeadStatus::Claimed)
                .map(|r| r.lead.price_cents)
                .sum(),
        }
    }
}

// ============ API Views ============

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PhotoView {
    pub id: Uuid,
    pub is_primary: bool,
    /// Withheld until the viewer owns the lead.
    pub url: Option<String>,
}

/// Lead as shown to one particular clinic.
///
/// Contact fields and photo URLs are only present when `contact_visible` is
/// true, i.e. the viewer holds the succeeded claim.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeadView {
    pub id: Uuid,
    pub tier: LeadTier,
    pub status: LeadStatus,
    pub price_cents: i64,
    pub score: f64,
    pub city: Option<String>,
    pub region: Option<String>,
    pub summary: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub photos: Vec<PhotoView>,
    pub contact_visible: bool,
    pub created_at: DateTime<Utc>,
}

impl LeadView {
    pub fn for_viewer(record: &LeadRecord, viewer: Option<Uuid>, now: DateTime<Utc>) -> Self {
        let lead = &record.lead;
        let visible = viewer.is_some() && record.owner() == viewer;

        let (name, email, phone) = if visible {
            (lead.name.clone(), lead.email.clone(), lead.phone.clone())
        } else {
            (
                lead.name.as_deref().map(mask_name),
                lead.email.as_deref().map(mask_email),
                lead.phone.as_deref().map(mask_phone),
            )
        };

        Self {
            id: lead.id,
            tier: lead.tier,
            status: lead.effective_status(record.lock.as_ref(), now),
            price_cents: lead.price_cents,
            score: lead.score,
            city: lead.city.clone(),
            region: lead.region.clone(),
            summary: lead.summary.clone(),
            name,
            email,
            phone,
            photos: record
                .photos
                .iter()
                .map(|p| PhotoView {
                    id: p.id,
                    is_primary: p.is_primary,
                    url: visible.then(|| p.url.clone()),
                })
                .collect(),
            contact_visible: visible,
            created_at: lead.created_at,
        }
    }
}

/// "Sarah" -> "S****"
pub fn mask_name(name: &str) -> String {
    let mut chars = name.trim().chars();
    match chars.next() {
        Some(first) => format!("{}{}", first, "*".repeat(chars.count().max(3))),
        None => String::new(),
    }
}

/// "sarah@clinic.ca" -> "s***@clinic.ca"
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{}***@{}", first, domain)
        }
        None => "***".to_string(),
    }
}

/// Keeps the area code, which the city/region already reveals.
pub fn mask_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() >= 3 {
        format!("{}-***-****", &digits[..3])
    } else {
        "***-***-****".to_string()
    }
}

// ============ Request / Response Models ============

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ClaimRequest {
    #[serde(default, alias = "leadId")]
    pub lead_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PriceBreakdownView {
    pub amount_cents: i64,
    pub tax_cents: i64,
    pub fee_cents: i64,
    pub total_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClaimResponse {
    pub success: bool,
    pub clinic_id: Uuid,
    pub claim_id: Uuid,
    pub pricing: PriceBreakdownView,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReservationResponse {
    pub lead_id: Uuid,
    pub status: LeadStatus,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeadListQuery {
    pub filter: Option<String>,
}
