//! One ingestion cycle: fetch, parse, dedup, classify, price, persist.
//!
//! Row failures never abort the cycle; they are collected into the report.

use chrono::{DateTime, Utc};
use moka::future::Cache;
use rand::seq::SliceRandom;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

use crate::classifier::{classify, Classification};
use crate::errors::AppError;
use crate::feed_client::FeedClient;
use crate::feed_parser::{records, CallRow};
use crate::models::{NewLead, NewLeadMetadata};
use crate::store::{InsertOutcome, LeadStore};

pub const DEFAULT_SUMMARY: &str = "Phone inquiry about services";
pub const DEFAULT_DIRECTION: &str = "inbound";

/// Stock portraits; one is attached to each new lead as its primary photo.
pub const PLACEHOLDER_PHOTOS: [&str; 5] = [
    "https://images.unsplash.com/photo-1494790108755-2616b612b786?w=400&h=400&fit=crop&crop=face",
    "https://images.unsplash.com/photo-1438761681033-6461ffad8d80?w=400&h=400&fit=crop&crop=face",
    "https://images.unsplash.com/photo-1544005313-94ddf0286df2?w=400&h=400&fit=crop&crop=face",
    "https://images.unsplash.com/photo-1500648767791-00dcc994a43e?w=400&h=400&fit=crop&crop=face",
    "https://images.unsplash.com/photo-1507003211169-0a1dd7228f2d?w=400&h=400&fit=crop&crop=face",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RowStage {
    DedupCheck,
    Persist,
}

/// A row that passed parsing but could not be turned into a lead.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RowError {
    pub line: u64,
    pub phone: String,
    pub stage: RowStage,
    pub message: String,
}

/// Summary of one cycle.
///
/// `rows_seen == created + skipped_as_duplicate + errored`. Rows dropped by the
/// phone gate are counted in `rows_rejected` only.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IngestionReport {
    pub rows_seen: usize,
    pub rows_rejected: usize,
    pub created: usize,
    pub skipped_as_duplicate: usize,
    pub errored: usize,
    pub errors: Vec<RowError>,
    pub feed_bytes: usize,
    /// Hex SHA-256 of the feed body, for spotting unchanged feeds in logs.
    pub feed_sha256: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl IngestionReport {
    fn new(text: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            rows_seen: 0,
            rows_rejected: 0,
            created: 0,
            skipped_as_duplicate: 0,
            errored: 0,
            errors: Vec::new(),
            feed_bytes: text.len(),
            feed_sha256: hex::encode(Sha256::digest(text.as_bytes())),
            started_at,
            finished_at: started_at,
        }
    }
}

enum RowOutcome {
    Created,
    Duplicate,
}

/// Build the lead and its private metadata for a row that passed dedup.
pub fn build_lead(
    row: &CallRow,
    classification: Classification,
    now: DateTime<Utc>,
) -> (NewLead, NewLeadMetadata) {
    let summary = if row.summary.is_empty() {
        DEFAULT_SUMMARY.to_string()
    } else {
        row.summary.clone()
    };
    let direction = if row.direction.is_empty() {
        DEFAULT_DIRECTION.to_string()
    } else {
        row.direction.clone()
    };

    let lead = NewLead {
        tier: classification.tier,
        price_cents: classification.tier.price_cents(),
        score: classification.score,
        city: Some(classification.location.city),
        region: Some(classification.location.region),
        summary: Some(summary.clone()),
        name: classification.name,
        email: None,
        phone: row.from_number.clone(),
        created_at: now,
    };
    let metadata = NewLeadMetadata {
        transcript: row.transcript.clone(),
        call_summary: summary,
        call_direction: direction,
    };

    (lead, metadata)
}

pub fn pick_photo() -> &'static str {
    PLACEHOLDER_PHOTOS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(PLACEHOLDER_PHOTOS[0])
}

/// Runs ingestion cycles against one store.
pub struct Ingestor {
    store: Arc<dyn LeadStore>,
    feed: FeedClient,
    /// Phones confirmed persisted. Saves a store round trip for rows seen
    /// in earlier cycles.
    known_phones: Cache<String, ()>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn LeadStore>, feed: FeedClient) -> Self {
        let known_phones = Cache::builder()
            .time_to_live(Duration::from_secs(3600))
            .max_capacity(100_000)
            .build();

        Self {
            store,
            feed,
            known_phones,
        }
    }

    /// Fetch the feed and ingest it. Fails only when the feed cannot be
    /// fetched, in which case nothing is written.
    pub async fn run_cycle(&self) -> Result<IngestionReport, AppError> {
        let started_at = Utc::now();
        tracing::debug!("Starting ingestion cycle from {}", self.feed.url());
        let text = self.feed.fetch().await?;
        Ok(self.ingest_text(&text, started_at).await)
    }

    pub async fn ingest_text(&self, text: &str, started_at: DateTime<Utc>) -> IngestionReport {
        let mut report = IngestionReport::new(text, started_at);

        for item in records(text) {
            let row = match item {
                Ok(row) => row,
                Err(rejected) => {
                    tracing::debug!("Feed line {} rejected: {}", rejected.line, rejected.reason);
                    report.rows_rejected += 1;
                    continue;
                }
            };

            report.rows_seen += 1;
            match self.ingest_row(&row).await {
                Ok(RowOutcome::Created) => report.created += 1,
                Ok(RowOutcome::Duplicate) => report.skipped_as_duplicate += 1,
                Err(e) => {
                    tracing::error!(
                        "Failed to ingest feed line {} ({}): {}",
                        e.line,
                        e.phone,
                        e.message
                    );
                    report.errored += 1;
                    report.errors.push(e);
                }
            }
        }

        report.finished_at = Utc::now();
        tracing::info!(
            "Ingestion cycle: {} rows, {} created, {} duplicates, {} errors, {} rejected (sha256 {})",
            report.rows_seen,
            report.created,
            report.skipped_as_duplicate,
            report.errored,
            report.rows_rejected,
            &report.feed_sha256[..12]
        );

        report
    }

    async fn ingest_row(&self, row: &CallRow) -> Result<RowOutcome, RowError> {
        let phone = &row.from_number;
        let row_error = |stage: RowStage, e: AppError| RowError {
            line: row.line,
            phone: phone.clone(),
            stage,
            message: e.to_string(),
        };

        if self.known_phones.contains_key(phone) {
            return Ok(RowOutcome::Duplicate);
        }
        if self
            .store
            .phone_exists(phone)
            .await
            .map_err(|e| row_error(RowStage::DedupCheck, e))?
        {
            self.known_phones.insert(phone.clone(), ()).await;
            return Ok(RowOutcome::Duplicate);
        }

        let classification = classify(row);
        let (lead, metadata) = build_lead(row, classification, Utc::now());
        let tier = lead.tier;

        let outcome = self
            .store
            .insert_lead(lead, pick_photo().to_string(), metadata)
            .await
            .map_err(|e| row_error(RowStage::Persist, e))?;

        self.known_phones.insert(phone.clone(), ()).await;

        match outcome {
            InsertOutcome::Created(id) => {
                tracing::debug!("Created {} lead {} from feed line {}", tier, id, row.line);
                Ok(RowOutcome::Created)
            }
            InsertOutcome::Duplicate => Ok(RowOutcome::Duplicate),
        }
    }
}
