//! Collection loop for Azure AD audit content.
//!
//! Lists the available content blobs for a time window, fetches each blob's
//! events and streams them into [`RotatingOutput`]. Any HTTP failure aborts
//! the run; whatever was written before it stays on disk.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use reqwest::header::ACCEPT;
use reqwest::Response;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::client::ActivityClient;
use crate::config::Config;
use crate::error::{CollectorError, Result};
use crate::output::{RotatingOutput, DEFAULT_MAX_FILE_SIZE};
use crate::token::TokenSource;

/// Content type requested from the activity feed.
pub const CONTENT_TYPE_AZURE_AD: &str = "Audit.AzureActiveDirectory";

/// Timestamp format expected by the API for `startTime` and `endTime`.
pub const API_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Default length of a computed query window.
pub const DEFAULT_QUERY_WINDOW_MINUTES: i64 = 60;

/// Response header carrying the next listing page.
const NEXT_PAGE_HEADER: &str = "nextpageuri";

/// Upper bound on listing pages followed in one run.
const MAX_LISTING_PAGES: usize = 10_000;

/// Query window passed verbatim to the listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: String,
    pub end: String,
}

impl TimeWindow {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Window of `minutes` ending at `end`.
    pub fn ending_at(end: DateTime<Utc>, minutes: i64) -> Self {
        let start = end - Duration::minutes(minutes);
        Self::new(
            start.format(API_TIMESTAMP_FORMAT).to_string(),
            end.format(API_TIMESTAMP_FORMAT).to_string(),
        )
    }

    /// Window of `minutes` ending now.
    pub fn last_minutes(minutes: i64) -> Self {
        Self::ending_at(Utc::now(), minutes)
    }
}

/// One entry of the content listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentMetadata {
    #[serde(default)]
    pub content_uri: Option<String>,

    #[serde(default)]
    pub content_id: Option<String>,

    #[serde(default)]
    pub content_type: Option<String>,

    #[serde(default)]
    pub content_created: Option<String>,

    #[serde(default)]
    pub content_expiration: Option<String>,
}

/// Fetches audit content for a tenant and writes it to rotating files.
pub struct LogCollector<'a> {
    client: &'a ActivityClient,
    api_url: String,
    follow_pagination: bool,
    max_file_size: u64,
}

impl<'a> LogCollector<'a> {
    pub fn new(client: &'a ActivityClient, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            follow_pagination: true,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    pub fn from_config(client: &'a ActivityClient, config: &Config) -> Self {
        Self::new(client, config.api_url.as_str())
            .with_pagination(config.follow_pagination)
            .with_max_file_size(config.max_file_size_bytes)
    }

    /// Whether to follow `NextPageUri` on listing responses.
    pub fn with_pagination(mut self, follow: bool) -> Self {
        self.follow_pagination = follow;
        self
    }

    /// Rotation threshold in bytes.
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Subscription-content endpoint for a tenant.
    pub fn listing_url(&self, tenant_id: &str) -> String {
        format!(
            "{}/api/v1.0/{}/activity/feed/subscriptions/content",
            self.api_url, tenant_id
        )
    }

    /// Collect all events for `window` into `{output_base}_{n}{output_extension}`
    /// files and return how many events were written.
    ///
    /// # Errors
    ///
    /// - `CollectorError::Listing` if a listing request returns a non-2xx status
    /// - `CollectorError::ContentFetch` if a content blob returns a non-2xx status
    /// - `CollectorError::MalformedResponse` if a body is not the expected JSON array
    /// - `CollectorError::Output` if an output file cannot be written
    /// - any error of the token source or the client's retry layer
    #[instrument(skip(self, tokens), fields(start = %window.start, end = %window.end))]
    pub async fn collect<T: TokenSource>(
        &self,
        tokens: &mut T,
        tenant_id: &str,
        window: &TimeWindow,
        output_base: &str,
        output_extension: &str,
    ) -> Result<u64> {
        let listing_url = self.listing_url(tenant_id);
        let params = [
            ("contentType", CONTENT_TYPE_AZURE_AD),
            ("startTime", window.start.as_str()),
            ("endTime", window.end.as_str()),
        ];

        let mut output = RotatingOutput::new(output_base, output_extension, self.max_file_size);
        let mut total_events: u64 = 0;
        let mut next_page: Option<String> = None;
        let mut visited: HashSet<String> = HashSet::new();
        let mut pages = 0;

        loop {
            pages += 1;
            let bearer = tokens.bearer().await?;

            let response = match next_page.as_deref() {
                None => {
                    self.client
                        .execute(|http| {
                            http.get(listing_url.as_str())
                                .query(&params)
                                .bearer_auth(&bearer)
                                .header(ACCEPT, "application/json")
                        })
                        .await?
                }
                Some(page_uri) => {
                    self.client
                        .execute(|http| {
                            http.get(page_uri)
                                .bearer_auth(&bearer)
                                .header(ACCEPT, "application/json")
                        })
                        .await?
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(CollectorError::Listing { status, body });
            }

            visited.insert(response.url().to_string());

            let following = if self.follow_pagination {
                next_page_uri(&response)
            } else {
                None
            };

            let entries: Vec<ContentMetadata> = response
                .json()
                .await
                .map_err(|e| CollectorError::body_error("content listing", e))?;

            debug!(page = pages, entries = entries.len(), "Fetched content listing");

            for entry in entries {
                let content_uri = entry.content_uri.as_deref().filter(|uri| !uri.trim().is_empty());
                let Some(content_uri) = content_uri else {
                    debug!(content_id = ?entry.content_id, "Skipping listing entry without contentUri");
                    continue;
                };

                let events = self.fetch_content(tokens, content_uri).await?;
                debug!(
                    content_id = ?entry.content_id,
                    content_created = ?entry.content_created,
                    events = events.len(),
                    "Fetched content blob"
                );

                for event in &events {
                    output.write_event(event)?;
                    total_events += 1;
                }
                output.flush()?;
            }

            let Some(uri) = following else {
                break;
            };
            if pages >= MAX_LISTING_PAGES {
                return Err(CollectorError::malformed(
                    "content listing",
                    format!("more than {} listing pages", MAX_LISTING_PAGES),
                ));
            }
            if visited.contains(&uri) {
                return Err(CollectorError::malformed(
                    "content listing",
                    format!("NextPageUri {} was already visited", uri),
                ));
            }
            next_page = Some(uri);
        }

        let files = output.finish()?;

        info!(
            total_events,
            pages,
            files = files.len(),
            "Collected {} Azure AD audit logs from {} to {}",
            total_events,
            window.start,
            window.end
        );

        Ok(total_events)
    }

    /// Fetch the event array behind one content URI.
    async fn fetch_content<T: TokenSource>(&self, tokens: &mut T, uri: &str) -> Result<Vec<Value>> {
        let bearer = tokens.bearer().await?;

        let response = self
            .client
            .execute(|http| {
                http.get(uri)
                    .bearer_auth(&bearer)
                    .header(ACCEPT, "application/json")
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollectorError::ContentFetch {
                status,
                uri: uri.to_string(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| CollectorError::body_error(format!("content {}", uri), e))
    }
}

fn next_page_uri(response: &Response) -> Option<String> {
    response
        .headers()
        .get(NEXT_PAGE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|uri| !uri.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_ending_at() {
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 0, 30, 0).unwrap();
        let window = TimeWindow::ending_at(end, DEFAULT_QUERY_WINDOW_MINUTES);
        assert_eq!(window.start, "2024-02-29T23:30:00Z");
        assert_eq!(window.end, "2024-03-01T00:30:00Z");
    }

    #[test]
    fn test_window_is_passed_verbatim() {
        let window = TimeWindow::new("yesterday", "today");
        assert_eq!(window.start, "yesterday");
        assert_eq!(window.end, "today");
    }

    #[test]
    fn test_content_metadata_deserialization() {
        let json = r#"[
            {
                "contentType": "Audit.AzureActiveDirectory",
                "contentId": "20240301-abc",
                "contentUri": "https://manage.office.com/api/v1.0/t/activity/feed/audit/20240301-abc",
                "contentCreated": "2024-03-01T00:10:00.000Z",
                "contentExpiration": "2024-03-08T00:10:00.000Z"
            },
            { "contentId": "no-uri" }
        ]"#;

        let entries: Vec<ContentMetadata> = serde_json::from_str(json).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0].content_type.as_deref(),
            Some(CONTENT_TYPE_AZURE_AD)
        );
        assert!(entries[0].content_uri.as_deref().unwrap().ends_with("20240301-abc"));
        assert!(entries[1].content_uri.is_none());
    }

    #[test]
    fn test_listing_url() {
        let client = ActivityClient::with_settings(
            std::time::Duration::from_secs(5),
            crate::client::RetryPolicy::default(),
        )
        .unwrap();
        let collector = LogCollector::new(&client, "https://manage.office.com/");
        assert_eq!(
            collector.listing_url("tenant-1"),
            "https://manage.office.com/api/v1.0/tenant-1/activity/feed/subscriptions/content"
        );
    }
}
