//! # cgov-runtime — Runtime Client
//!
//! Thin client for the external policy-evaluation service. The service is
//! consumed, never reimplemented: this crate pushes compiled bundles, asks
//! for decisions and checks health.
//!
//! ## Wire protocol
//!
//! | Operation | Request |
//! |---|---|
//! | push | `PUT /v1/policies/<namespace>`, text body, `X-Bundle-Version` header |
//! | query | `POST /v1/data/cgov/<namespace>/decision` with `{"input": ...}` |
//! | health | `GET /health` |
//!
//! ## Retry
//!
//! Every operation goes through one [`RetryPolicy`]: a bounded number of
//! attempts with exponential backoff, retrying only transient failures
//! (transport errors, timeouts, 5xx, 429). The policy also carries the
//! [`FailurePolicy`] the enforcement path applies once retries are spent.

pub mod client;
pub mod config;
pub mod error;
pub mod fake;
pub mod retry;

pub use client::{HttpRuntimeClient, PolicyRuntime, RuntimeDecision};
pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use fake::FakeRuntime;
pub use retry::{Backoff, FailureMode, FailurePolicy, RetryPolicy};
