use bigdecimal::{BigDecimal, Signed};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::AppError;

/// Default feed: the call log sheet exported as CSV.
pub const DEFAULT_FEED_URL: &str = "https://docs.google.com/spreadsheets/d/1-l9EGEHTA5JacoOLSUBEjOXKL_Orwg5_gkHdau_3zao/gviz/tq?tqx=out:csv&sheet=Sheet1";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub feed_url: String,
    /// Seconds between background ingestion cycles. Zero disables the poller.
    pub sync_interval_secs: u64,
    pub initial_sync_delay_secs: u64,
    pub feed_timeout_secs: u64,
    /// Lifetime of a lead reservation.
    pub lead_lock_ttl_secs: i64,
    pub gateway_shared_secret: Option<String>,
    pub sync_trigger_token: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            feed_url: std::env::var("FEED_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map_or_else(|| Ok(DEFAULT_FEED_URL.to_string()), validate_feed_url)?,
            sync_interval_secs: env_number("SYNC_INTERVAL_SECS", 30)?,
            initial_sync_delay_secs: env_number("INITIAL_SYNC_DELAY_SECS", 5)?,
            feed_timeout_secs: env_number("FEED_TIMEOUT_SECS", 30)?,
            lead_lock_ttl_secs: env_number("LEAD_LOCK_TTL_SECS", 120)?,
            gateway_shared_secret: std::env::var("GATEWAY_SHARED_SECRET")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            sync_trigger_token: std::env::var("SYNC_TRIGGER_TOKEN")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        };

        validate_lock_ttl(config.lead_lock_ttl_secs)?;

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Feed URL: {}", config.feed_url);
        tracing::debug!(
            "Sync interval: {}s (initial delay {}s)",
            config.sync_interval_secs,
            config.initial_sync_delay_secs
        );
        if config.gateway_shared_secret.is_none() {
            tracing::warn!("GATEWAY_SHARED_SECRET not set; identity headers are trusted as-is");
        }
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_timeout_secs)
    }

    pub fn lock_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lead_lock_ttl_secs)
    }
}

/// Reservations last at most a day.
pub const MAX_LOCK_TTL_SECS: i64 = 86_400;

fn validate_lock_ttl(secs: i64) -> anyhow::Result<()> {
    if secs <= 0 {
        anyhow::bail!("LEAD_LOCK_TTL_SECS must be positive");
    }
    if secs > MAX_LOCK_TTL_SECS {
        anyhow::bail!("LEAD_LOCK_TTL_SECS must be at most {}", MAX_LOCK_TTL_SECS);
    }
    Ok(())
}

fn validate_feed_url(raw: String) -> anyhow::Result<String> {
    let parsed = url::Url::parse(&raw)
        .map_err(|e| anyhow::anyhow!("FEED_URL is not a valid URL: {}", e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        anyhow::bail!("FEED_URL must start with http:// or https://");
    }
    Ok(raw)
}

fn env_number<T: FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a non-negative integer", key)),
        _ => Ok(default),
    }
}

/// Claim pricing inputs. Read fresh from the environment for every claim so
/// operators can change rates without a restart.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingConfig {
    /// Decimal fraction, e.g. `0.05` for 5%.
    pub tax_rate: BigDecimal,
    /// Flat fee in minor currency units.
    pub flat_fee_cents: i64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            tax_rate: BigDecimal::from(0),
            flat_fee_cents: 0,
        }
    }
}

impl PricingConfig {
    pub fn new(tax_rate: &str, flat_fee_cents: i64) -> Result<Self, AppError> {
        let tax_rate = BigDecimal::from_str(tax_rate.trim()).map_err(|_| {
            AppError::InternalError(format!("Invalid tax rate '{}'", tax_rate))
        })?;
        if tax_rate.is_negative() {
            return Err(AppError::InternalError(
                "Tax rate cannot be negative".to_string(),
            ));
        }
        if flat_fee_cents < 0 {
            return Err(AppError::InternalError(
                "Flat fee cannot be negative".to_string(),
            ));
        }
        Ok(Self {
            tax_rate,
            flat_fee_cents,
        })
    }

    /// `LEAD_CLAIM_TAX_RATE` (default `0.00`) and `LEAD_CLAIM_FEE_FLAT` (default `0`).
    pub fn from_env() -> Result<Self, AppError> {
        let rate = std::env::var("LEAD_CLAIM_TAX_RATE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "0.00".to_string());
        let fee = match std::env::var("LEAD_CLAIM_FEE_FLAT") {
            Ok(raw) if !raw.trim().is_empty() => raw.trim().parse::<i64>().map_err(|_| {
                AppError::InternalError(format!("Invalid flat fee '{}'", raw))
            })?,
            _ => 0,
        };
        Self::new(&rate, fee)
    }
}
