//! # Transport Senders
//!
//! Ready-made `TransportSender` implementations.
//!
//! - **`http_sender`**: POSTs each payload body as JSON through the retrying
//!   `ApiClient` and compares the answer with an expected status.

/// HTTP transport sender built on `retrieve::ky_http`.
pub mod http_sender;
