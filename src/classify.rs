//! Classify a completed attempt into success, retryable or fatal failure.

use reqwest::StatusCode;

use crate::{AttemptOutcome, ServerErrorPolicy, TransportErrorKind, ValidationOptions};

/// Why an attempt did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The transport produced no response.
    Transport,
    /// A 301/302 reached the client, so the transport ran out of redirects.
    TooManyRedirects(StatusCode),
    /// Status of 400 or above.
    Status(StatusCode),
    /// Body lacks the configured closing document marker.
    IncompleteDocument,
}

/// Verdict for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    /// Consumes one unit of retry budget.
    Retryable(FailureReason),
    /// Stops the request regardless of remaining budget.
    Fatal(FailureReason),
}

/// Classifies an attempt outcome. Rules apply in order, first match wins.
pub fn classify(outcome: &AttemptOutcome, validation: &ValidationOptions) -> Classification {
    let response = match outcome {
        Ok(response) => response,
        Err(err) if err.kind() == TransportErrorKind::InvalidRequest => {
            return Classification::Fatal(FailureReason::Transport)
        }
        Err(_) => return Classification::Retryable(FailureReason::Transport),
    };

    let status = response.status();
    if status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND {
        return Classification::Fatal(FailureReason::TooManyRedirects(status));
    }
    if status.is_server_error() && validation.server_errors == ServerErrorPolicy::Retry {
        return Classification::Retryable(FailureReason::Status(status));
    }
    if status.as_u16() >= 400 {
        return Classification::Fatal(FailureReason::Status(status));
    }
    if validation.full_document && !response.body().contains(&validation.document_marker) {
        return Classification::Fatal(FailureReason::IncompleteDocument);
    }

    Classification::Success
}
