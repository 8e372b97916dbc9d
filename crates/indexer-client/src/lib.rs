//! HTTP client for the corpus indexing service.
//!
//! `HttpIndexerClient` implements the orchestrator's `BatchExecutor` and
//! `StatusProvider` traits over JSON/HTTP:
//!
//! - `POST {endpoint}/jobs/{job_type}/batches` runs or enqueues one batch
//! - `POST {endpoint}/jobs/{job_id}/stop` drops queued work
//! - `GET {endpoint}/jobs/{job_id}/status` reports progress and activity
//! - `GET {endpoint}/jobs/{job_type}/active` answers the resume check
//!
//! # Example
//!
//! ```rust,no_run
//! use indexer_client::{ClientConfig, HttpIndexerClient};
//!
//! let config = ClientConfig::new("http://127.0.0.1:3000/indexing").with_api_key("token");
//! let client = HttpIndexerClient::new(config)?;
//! # Ok::<(), indexer_client::ClientError>(())
//! ```

pub mod client;
pub mod error;

pub use client::{ClientConfig, HttpIndexerClient};
pub use error::ClientError;
