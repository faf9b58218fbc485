use crate::errors::AppError;
use std::time::Duration;

/// Client for downloading the call log feed.
#[derive(Clone)]
pub struct FeedClient {
    client: reqwest::Client,
    url: String,
}

impl FeedClient {
    /// Creates a new `FeedClient`.
    ///
    /// # Arguments
    ///
    /// * `url` - Location of the CSV export.
    /// * `timeout` - Upper bound for one whole fetch.
    pub fn new(url: String, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AppError::InternalError(format!("Failed to create feed client: {}", e))
            })?;

        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetches the raw feed text.
    ///
    /// # Returns
    ///
    /// * `Result<String, AppError>` - The body, or `UpstreamFetch` on any
    ///   transport failure or non-success status.
    pub async fn fetch(&self) -> Result<String, AppError> {
        tracing::debug!("Fetching feed: {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .header("Accept", "text/csv")
            .send()
            .await
            .map_err(|e| AppError::UpstreamFetch(format!("Feed request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::UpstreamFetch(format!(
                "Feed returned {}: {}",
                status,
                error_text.chars().take(200).collect::<String>()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| AppError::UpstreamFetch(format!("Failed to read feed body: {}", e)))
    }
}
