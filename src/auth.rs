//! Caller identity as forwarded by the upstream session gateway.

use axum::{extract::FromRequestParts, http::request::Parts, http::HeaderMap};
use std::sync::Arc;

use crate::errors::AppError;
use crate::handlers::AppState;

pub const IDENTITY_HEADER: &str = "x-clinic-identity";
pub const NAME_HEADER: &str = "x-clinic-name";
pub const EMAIL_HEADER: &str = "x-clinic-email";
pub const GATEWAY_TOKEN_HEADER: &str = "x-gateway-token";
pub const SYNC_TOKEN_HEADER: &str = "x-sync-token";

/// The authenticated subscriber making the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClinicIdentity {
    /// Identity reference from the authentication provider.
    pub external_id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl ClinicIdentity {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            display_name: None,
            email: None,
        }
    }

    /// Read the identity headers, checking the gateway token when a shared
    /// secret is configured.
    pub fn from_headers(headers: &HeaderMap, shared_secret: Option<&str>) -> Result<Self, AppError> {
        if let Some(expected) = shared_secret {
            let token = header_str(headers, GATEWAY_TOKEN_HEADER).ok_or_else(|| {
                AppError::Unauthorized("Missing X-Gateway-Token header".to_string())
            })?;
            if !constant_time_compare(token, expected) {
                tracing::warn!("Invalid gateway token received");
                return Err(AppError::Unauthorized("Invalid gateway token".to_string()));
            }
        }

        let external_id = header_str(headers, IDENTITY_HEADER)
            .ok_or_else(|| AppError::Unauthorized("Missing X-Clinic-Identity header".to_string()))?;

        Ok(Self {
            external_id: external_id.to_string(),
            display_name: header_str(headers, NAME_HEADER).map(str::to_string),
            email: header_str(headers, EMAIL_HEADER).map(str::to_string),
        })
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for ClinicIdentity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        ClinicIdentity::from_headers(&parts.headers, state.config.gateway_shared_secret.as_deref())
    }
}

/// Guard for the manual sync trigger. Open when no token is configured.
pub fn validate_sync_token(headers: &HeaderMap, expected: Option<&str>) -> Result<(), AppError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let token = header_str(headers, SYNC_TOKEN_HEADER)
        .ok_or_else(|| AppError::Unauthorized("Missing X-Sync-Token header".to_string()))?;

    if !constant_time_compare(token, expected) {
        tracing::warn!("Invalid sync token received");
        return Err(AppError::Unauthorized("Invalid sync token".to_string()));
    }

    Ok(())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Constant-time string comparison
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
