//! Management Activity Collector Library
//!
//! This library pulls Azure AD audit events from the Office 365 Management
//! Activity API and stores them as newline-delimited JSON:
//!
//! - **config**: Environment-based configuration and credentials
//! - **client**: HTTP client with connection pooling and retry logic
//! - **token**: OAuth2 client-credentials token acquisition and refresh
//! - **collector**: Content listing and blob fetching for a time window
//! - **output**: Size-based rotation of the output files
//! - **error**: Error kinds shared by all of the above
//!
//! # Example
//!
//! ```no_run
//! use management_activity_collector::client::ActivityClient;
//! use management_activity_collector::collector::{LogCollector, TimeWindow};
//! use management_activity_collector::config::Config;
//! use management_activity_collector::token::TokenProvider;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Load configuration from environment
//!     let config = Config::from_env().expect("Failed to load config");
//!
//!     // Create HTTP client
//!     let client = ActivityClient::new(&config).expect("Failed to create client");
//!
//!     // Tokens are acquired on first use and refreshed before expiry
//!     let mut tokens = TokenProvider::new(&client, config.login_url.clone(), config.credentials.clone());
//!
//!     let collector = LogCollector::from_config(&client, &config);
//!     let window = TimeWindow::new("2024-03-01T00:00:00Z", "2024-03-01T01:00:00Z");
//!     let total = collector
//!         .collect(
//!             &mut tokens,
//!             &config.credentials.tenant_id,
//!             &window,
//!             &config.output_base,
//!             &config.output_extension,
//!         )
//!         .await
//!         .expect("Collection failed");
//!     println!("Collected {} events", total);
//! }
//! ```

// Module declarations
pub mod client;
pub mod collector;
pub mod config;
pub mod error;
pub mod output;
pub mod token;

// Re-export commonly used types at crate root for convenience
pub use client::{ActivityClient, ClientStats, RetryPolicy};
pub use collector::{ContentMetadata, LogCollector, TimeWindow};
pub use config::{Config, ConfigError, Credentials};
pub use error::{CollectorError, Result};
pub use output::RotatingOutput;
pub use token::{acquire_token, AccessToken, TokenProvider, TokenSource};
