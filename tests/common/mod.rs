//! Shared helpers for integration tests against a wiremock server.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};

use management_activity_collector::client::{ActivityClient, RetryPolicy};
use management_activity_collector::token::AccessToken;

pub const TENANT_ID: &str = "contoso-tenant";
pub const TOKEN: &str = "test-token";

/// Client with fast backoff so retry tests stay quick.
pub fn test_client() -> ActivityClient {
    test_client_with_attempts(5)
}

pub fn test_client_with_attempts(max_attempts: u32) -> ActivityClient {
    let policy = RetryPolicy {
        max_attempts,
        backoff_base: Duration::from_millis(10),
        ..RetryPolicy::default()
    };
    ActivityClient::with_settings(Duration::from_secs(5), policy).expect("client builds")
}

pub fn fixed_token() -> AccessToken {
    AccessToken::new(TOKEN, Utc::now() + chrono::Duration::hours(1))
}

pub fn bearer() -> String {
    format!("Bearer {}", TOKEN)
}

pub fn listing_path() -> String {
    format!("/api/v1.0/{}/activity/feed/subscriptions/content", TENANT_ID)
}

/// An Azure AD audit record of roughly 130 bytes.
pub fn audit_event(id: usize) -> Value {
    json!({
        "Id": format!("evt-{:04}", id),
        "Operation": "UserLoggedIn",
        "UserId": "user@contoso.com",
        "Workload": "AzureActiveDirectory",
        "ResultStatus": "Success"
    })
}

pub fn audit_events(range: std::ops::Range<usize>) -> Value {
    Value::Array(range.map(audit_event).collect())
}

pub fn listing_entry(uri: &str) -> Value {
    json!({
        "contentType": "Audit.AzureActiveDirectory",
        "contentId": uri.rsplit('/').next().unwrap_or_default(),
        "contentUri": uri,
        "contentCreated": "2024-03-01T00:10:00.000Z",
        "contentExpiration": "2024-03-08T00:10:00.000Z"
    })
}

/// Output base inside `dir`.
pub fn output_base(dir: &Path) -> String {
    dir.join("management_activity_event_output")
        .to_string_lossy()
        .into_owned()
}

/// Output files in `dir`, sorted by rotation index.
pub fn output_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<(u32, PathBuf)> = fs::read_dir(dir)
        .expect("output dir readable")
        .map(|entry| entry.expect("dir entry").path())
        .filter_map(|path| {
            let stem = path.file_stem()?.to_str()?;
            let index = stem.rsplit('_').next()?.parse().ok()?;
            Some((index, path))
        })
        .collect();
    files.sort();
    files.into_iter().map(|(_, path)| path).collect()
}

/// Every event written to `files`, in order.
pub fn read_events(files: &[PathBuf]) -> Vec<Value> {
    files
        .iter()
        .flat_map(|file| {
            fs::read_to_string(file)
                .expect("output readable")
                .lines()
                .map(|line| serde_json::from_str(line).expect("each line is JSON"))
                .collect::<Vec<Value>>()
        })
        .collect()
}
