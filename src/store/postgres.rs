use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use super::{InsertOutcome, LeadStore};
use crate::claims::{ensure_available_to, PriceBreakdown};
use crate::config::PricingConfig;
use crate::errors::{AppError, ResultExt};
use crate::models::{
    Clinic, ClinicUpdate, DashboardStats, Lead, LeadClaim, LeadFilter, LeadLock, LeadMetadata,
    LeadPhoto, LeadRecord, NewClinic, NewLead, NewLeadMetadata, CLAIM_STATUS_SUCCEEDED,
};

const LEAD_COLUMNS: &str = "l.id, l.tier, l.status, l.price_cents, l.score, l.city, l.region, \
     l.summary, l.name, l.email, l.phone, l.created_at";
const CLAIM_COLUMNS: &str =
    "id, lead_id, clinic_id, amount_cents, tax_cents, fee_cents, total_cents, status, created_at";
const CLINIC_COLUMNS: &str =
    "id, external_id, clinic_name, email, phone, logo_url, location, created_at";

/// Index that keeps a lead from having two succeeded claims.
const ONE_SUCCESS_INDEX: &str = "lead_claims_one_success";

/// Postgres-backed lead store
pub struct PgLeadStore {
    pool: PgPool,
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attach photos, succeeded claims and locks to a page of leads.
    async fn hydrate(&self, leads: Vec<Lead>) -> Result<Vec<LeadRecord>, AppError> {
        if leads.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = leads.iter().map(|l| l.id).collect();

        let photos: Vec<LeadPhoto> = sqlx::query_as(
            "SELECT id, lead_id, url, is_primary FROM lead_photos \
             WHERE lead_id = ANY($1) ORDER BY is_primary DESC",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .context("loading lead photos")?;

        let claims: Vec<LeadClaim> = sqlx::query_as(&format!(
            "SELECT {} FROM lead_claims WHERE lead_id = ANY($1) AND status = $2",
            CLAIM_COLUMNS
        ))
        .bind(&ids)
        .bind(CLAIM_STATUS_SUCCEEDED)
        .fetch_all(&self.pool)
        .await
        .context("loading lead claims")?;

        let locks: Vec<LeadLock> = sqlx::query_as(
            "SELECT lead_id, locked_by, locked_at, expires_at FROM lead_locks \
             WHERE lead_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .context("loading lead locks")?;

        let mut photos_by_lead: HashMap<Uuid, Vec<LeadPhoto>> = HashMap::new();
        for photo in photos {
            photos_by_lead.entry(photo.lead_id).or_default().push(photo);
        }
        let mut claims_by_lead: HashMap<Uuid, LeadClaim> =
            claims.into_iter().map(|c| (c.lead_id, c)).collect();
        let mut locks_by_lead: HashMap<Uuid, LeadLock> =
            locks.into_iter().map(|l| (l.lead_id, l)).collect();

        Ok(leads
            .into_iter()
            .map(|lead| LeadRecord {
                photos: photos_by_lead.remove(&lead.id).unwrap_or_default(),
                claim: claims_by_lead.remove(&lead.id),
                lock: locks_by_lead.remove(&lead.id),
                lead,
            })
            .collect())
    }

    /// Load the lead and its lock with the lead row locked for the rest of `tx`.
    async fn lock_lead(
        tx: &mut Transaction<'_, Postgres>,
        lead_id: Uuid,
    ) -> Result<(Lead, Option<LeadLock>), AppError> {
        let lead: Lead = sqlx::query_as(&format!(
            "SELECT {} FROM leads l WHERE l.id = $1 FOR UPDATE",
            LEAD_COLUMNS
        ))
        .bind(lead_id)
        .fetch_optional(&mut **tx)
        .await
        .context("locking lead row")?
        .ok_or_else(|| AppError::NotFound("Lead not found".to_string()))?;

        let lock: Option<LeadLock> = sqlx::query_as(
            "SELECT lead_id, locked_by, locked_at, expires_at FROM lead_locks WHERE lead_id = $1",
        )
        .bind(lead_id)
        .fetch_optional(&mut **tx)
        .await
        .context("loading lead lock")?;

        Ok((lead, lock))
    }
}

fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation() && db.constraint() == Some(constraint))
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn phone_exists(&self, phone: &str) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM leads WHERE phone = $1)")
            .bind(phone)
            .fetch_one(&self.pool)
            .await
            .context("checking phone")?;
        Ok(exists)
    }

    async fn insert_lead(
        &self,
        lead: NewLead,
        photo_url: String,
        metadata: NewLeadMetadata,
    ) -> Result<InsertOutcome, AppError> {
        let mut tx = self.pool.begin().await.context("starting ingestion tx")?;
        let lead_id = Uuid::new_v4();

        let inserted = sqlx::query(
            r#"
            INSERT INTO leads (id, tier, status, price_cents, score, city, region, summary,
                               name, email, phone, created_at)
            VALUES ($1, $2, 'available', $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (phone) DO NOTHING
            "#,
        )
        .bind(lead_id)
        .bind(lead.tier)
        .bind(lead.price_cents)
        .bind(lead.score)
        .bind(&lead.city)
        .bind(&lead.region)
        .bind(&lead.summary)
        .bind(&lead.name)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(lead.created_at)
        .execute(&mut *tx)
        .await
        .context("inserting lead")?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await.context("rolling back duplicate lead")?;
            return Ok(InsertOutcome::Duplicate);
        }

        sqlx::query(
            "INSERT INTO lead_photos (id, lead_id, url, is_primary) VALUES ($1, $2, $3, true)",
        )
        .bind(Uuid::new_v4())
        .bind(lead_id)
        .bind(&photo_url)
        .execute(&mut *tx)
        .await
        .context("inserting lead photo")?;

        sqlx::query(
            r#"
            INSERT INTO lead_metadata (lead_id, transcript, call_summary, call_direction, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(lead_id)
        .bind(&metadata.transcript)
        .bind(&metadata.call_summary)
        .bind(&metadata.call_direction)
        .bind(lead.created_at)
        .execute(&mut *tx)
        .await
        .context("inserting lead metadata")?;

        tx.commit().await.context("committing lead")?;
        Ok(InsertOutcome::Created(lead_id))
    }

    async fn get_lead(&self, lead_id: Uuid) -> Result<Option<LeadRecord>, AppError> {
        let lead: Option<Lead> = sqlx::query_as(&format!(
            "SELECT {} FROM leads l WHERE l.id = $1",
            LEAD_COLUMNS
        ))
        .bind(lead_id)
        .fetch_optional(&self.pool)
        .await
        .context("loading lead")?;

        match lead {
            Some(lead) => Ok(self.hydrate(vec![lead]).await?.into_iter().next()),
            None => Ok(None),
        }
    }

    async fn list_leads(&self, filter: LeadFilter) -> Result<Vec<LeadRecord>, AppError> {
        let leads: Vec<Lead> = match filter {
            LeadFilter::All => {
                sqlx::query_as::<_, Lead>(&format!(
                    "SELECT {} FROM leads l ORDER BY l.created_at DESC",
                    LEAD_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await
            }
            LeadFilter::Tier(tier) => {
                sqlx::query_as::<_, Lead>(&format!(
                    "SELECT {} FROM leads l WHERE l.tier = $1 ORDER BY l.created_at DESC",
                    LEAD_COLUMNS
                ))
                .bind(tier)
                .fetch_all(&self.pool)
                .await
            }
            LeadFilter::ClaimedBy(clinic_id) => {
                sqlx::query_as::<_, Lead>(&format!(
                    "SELECT {} FROM leads l \
                     JOIN lead_claims c ON c.lead_id = l.id AND c.status = $2 \
                     WHERE c.clinic_id = $1 ORDER BY l.created_at DESC",
                    LEAD_COLUMNS
                ))
                .bind(clinic_id)
                .bind(CLAIM_STATUS_SUCCEEDED)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("listing leads")?;

        self.hydrate(leads).await
    }

    async fn lead_metadata(&self, lead_id: Uuid) -> Result<Option<LeadMetadata>, AppError> {
        let metadata = sqlx::query_as(
            "SELECT lead_id, transcript, call_summary, call_direction, created_at \
             FROM lead_metadata WHERE lead_id = $1",
        )
        .bind(lead_id)
        .fetch_optional(&self.pool)
        .await
        .context("loading lead metadata")?;
        Ok(metadata)
    }

    async fn find_clinic(&self, external_id: &str) -> Result<Option<Clinic>, AppError> {
        let clinic = sqlx::query_as(&format!(
            "SELECT {} FROM clinics WHERE external_id = $1",
            CLINIC_COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .context("loading clinic")?;
        Ok(clinic)
    }

    async fn upsert_clinic(&self, clinic: NewClinic) -> Result<Clinic, AppError> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = sqlx::query_as(&format!(
            r#"
            INSERT INTO clinics (id, external_id, clinic_name, email)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (external_id)
            DO UPDATE SET email = COALESCE(clinics.email, EXCLUDED.email)
            RETURNING {}
            "#,
            CLINIC_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&clinic.external_id)
        .bind(&clinic.clinic_name)
        .bind(&clinic.email)
        .fetch_one(&self.pool)
        .await
        .context("upserting clinic")?;
        Ok(row)
    }

    async fn update_clinic(
        &self,
        clinic_id: Uuid,
        update: ClinicUpdate,
    ) -> Result<Clinic, AppError> {
        let clinic: Option<Clinic> = sqlx::query_as(&format!(
            r#"
            UPDATE clinics SET
                clinic_name = COALESCE($2, clinic_name),
                email = COALESCE($3, email),
                phone = COALESCE($4, phone),
                logo_url = COALESCE($5, logo_url),
                location = COALESCE($6, location)
            WHERE id = $1
            RETURNING {}
            "#,
            CLINIC_COLUMNS
        ))
        .bind(clinic_id)
        .bind(&update.clinic_name)
        .bind(&update.email)
        .bind(&update.phone)
        .bind(&update.logo_url)
        .bind(&update.location)
        .fetch_optional(&self.pool)
        .await
        .context("updating clinic")?;

        clinic.ok_or_else(|| AppError::NotFound("Clinic not found".to_string()))
    }

    async fn claim_lead(
        &self,
        lead_id: Uuid,
        clinic_id: Uuid,
        pricing: &PricingConfig,
        now: DateTime<Utc>,
    ) -> Result<LeadClaim, AppError> {
        let mut tx = self.pool.begin().await.context("starting claim tx")?;

        let (lead, lock) = Self::lock_lead(&mut tx, lead_id).await?;
        ensure_available_to(&lead, lock.as_ref(), clinic_id, now)?;
        let breakdown = PriceBreakdown::compute(lead.price_cents, pricing)?;

        let claim: LeadClaim = sqlx::query_as(&format!(
            r#"
            INSERT INTO lead_claims (id, lead_id, clinic_id, amount_cents, tax_cents,
                                     fee_cents, total_cents, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            CLAIM_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(lead_id)
        .bind(clinic_id)
        .bind(breakdown.amount_cents)
        .bind(breakdown.tax_cents)
        .bind(breakdown.fee_cents)
        .bind(breakdown.total_cents)
        .bind(CLAIM_STATUS_SUCCEEDED)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e, ONE_SUCCESS_INDEX) {
                AppError::Conflict("Lead is no longer available".to_string())
            } else {
                AppError::DatabaseError(e)
            }
        })?;

        let updated = sqlx::query(
            "UPDATE leads SET status = 'claimed' WHERE id = $1 AND status <> 'claimed'",
        )
        .bind(lead_id)
        .execute(&mut *tx)
        .await
        .context("marking lead claimed")?
        .rows_affected();

        if updated != 1 {
            // Dropping the transaction rolls back the claim insert.
            return Err(AppError::Conflict(
                "Lead is no longer available".to_string(),
            ));
        }

        sqlx::query("DELETE FROM lead_locks WHERE lead_id = $1")
            .bind(lead_id)
            .execute(&mut *tx)
            .await
            .context("clearing lead lock")?;

        tx.commit()
            .await
            .map_err(|e| AppError::Persistence(format!("committing claim: {}", e)))?;

        Ok(claim)
    }

    async fn reserve_lead(
        &self,
        lead_id: Uuid,
        clinic_id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<LeadLock, AppError> {
        let mut tx = self.pool.begin().await.context("starting reserve tx")?;

        let (lead, lock) = Self::lock_lead(&mut tx, lead_id).await?;
        ensure_available_to(&lead, lock.as_ref(), clinic_id, now)?;

        let lock: LeadLock = sqlx::query_as(
            r#"
            INSERT INTO lead_locks (lead_id, locked_by, locked_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (lead_id) DO UPDATE SET
                locked_by = EXCLUDED.locked_by,
                locked_at = EXCLUDED.locked_at,
                expires_at = EXCLUDED.expires_at
            RETURNING lead_id, locked_by, locked_at, expires_at
            "#,
        )
        .bind(lead_id)
        .bind(clinic_id)
        .bind(now)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await
        .context("writing lead lock")?;

        sqlx::query(
            "UPDATE leads SET status = 'being_claimed' WHERE id = $1 AND status <> 'claimed'",
        )
        .bind(lead_id)
        .execute(&mut *tx)
        .await
        .context("marking lead being claimed")?;

        tx.commit().await.context("committing reservation")?;
        Ok(lock)
    }

    async fn release_lead(&self, lead_id: Uuid, clinic_id: Uuid) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM leads WHERE id = $1)")
            .bind(lead_id)
            .fetch_one(&self.pool)
            .await
            .context("checking lead")?;
        if !exists {
            return Err(AppError::NotFound("Lead not found".to_string()));
        }

        let removed = sqlx::query("DELETE FROM lead_locks WHERE lead_id = $1 AND locked_by = $2")
            .bind(lead_id)
            .bind(clinic_id)
            .execute(&self.pool)
            .await
            .context("releasing lead lock")?
            .rows_affected();

        Ok(removed > 0)
    }

    async fn dashboard_stats(&self, now: DateTime<Utc>) -> Result<DashboardStats, AppError> {
        let (new_leads_24h, available_now, average_score, total_revenue_cents): (
            i64,
            i64,
            f64,
            i64,
        ) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE l.created_at > $1),
                COUNT(*) FILTER (WHERE l.status = 'available'
                    OR (l.status = 'being_claimed' AND (k.expires_at IS NULL OR k.expires_at <= $2))),
                COALESCE(AVG(l.score), 0)::float8,
                COALESCE(SUM(l.price_cents) FILTER (WHERE l.status = 'claimed'), 0)::int8
            FROM leads l
            LEFT JOIN lead_locks k ON k.lead_id = l.id
            "#,
        )
        .bind(now - chrono::Duration::hours(24))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("computing dashboard stats")?;

        Ok(DashboardStats {
            new_leads_24h,
            available_now,
            average_score,
            total_revenue_cents,
        })
    }

    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("database health check")?;
        Ok(())
    }
}
