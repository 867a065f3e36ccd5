//! `http-retry` is an async HTTP client that retries transient failures.
//!
//! Each request runs as its own retry loop:
//! - transport failures (DNS, connect, timeout) are retried with exponential backoff
//! - redirect exhaustion, statuses of 400 and above, and incomplete documents fail at once
//! - the caller gets one [`CallResult`] with the final error and the last response
//!
//! Entry points live on [`HttpRetryClient`]; [`run`] drives a single
//! [`RequestSpec`] over any [`Transport`].

mod backoff;
mod classify;
mod client;
mod driver;
mod error;
mod options;
mod transport;
mod types;

pub use backoff::{Backoff, RetryDecision};
pub use classify::{classify, Classification, FailureReason};
pub use client::HttpRetryClient;
pub use driver::run;
pub use error::{HttpRetryError, TransportError, TransportErrorKind};
pub use options::{
    RequestOptions, RetryOptions, ServerErrorPolicy, TransportOptions, ValidationOptions,
};
pub use transport::{ReqwestTransport, Transport};
pub use types::{AttemptOutcome, CallResult, RequestSpec, Response};

pub type Result<T> = std::result::Result<T, HttpRetryError>;
