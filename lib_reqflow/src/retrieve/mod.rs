//! # Data Retrieval Module
//!
//! The HTTP plumbing transport senders are built on.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: a generic HTTP `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, with automatic retries and exponential backoff for
//!   transient failures.

/// Generic HTTP API client with retry middleware for resilient network requests.
pub mod ky_http;
