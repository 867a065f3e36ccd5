//! Retry loop: send, classify, and either return or back off and send again.

use reqwest::Url;
use tokio::time::{sleep, Instant};

use crate::{
    backoff::{Backoff, RetryDecision},
    classify::{classify, Classification, FailureReason},
    AttemptOutcome, CallResult, HttpRetryError, RequestSpec, Response, Result, RetryOptions,
    Transport, ValidationOptions,
};

/// Drives one logical request to completion.
///
/// Attempts are strictly sequential. Fatal classifications return at once;
/// retryable ones wait out the backoff delay and try again until the budget
/// in `retry` is spent. The returned [`CallResult`] always carries the last
/// response observed, if any.
///
/// Dropping the future cancels the pending backoff sleep or transport call.
pub async fn run(
    transport: &dyn Transport,
    spec: &RequestSpec,
    retry: &RetryOptions,
    validation: &ValidationOptions,
) -> CallResult {
    if let Err(err) = preflight(spec, retry, validation) {
        return CallResult {
            error: Some(err),
            response: None,
            attempts: 0,
        };
    }

    let backoff = Backoff::from(retry);
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            method = %spec.method(),
            url = spec.url(),
            attempt,
            max_attempts = backoff.max_attempts(),
            "sending request"
        );

        let outcome = transport.send(spec).await;
        let classification = classify(&outcome, validation);
        let reason = match classification {
            Classification::Success => {
                return CallResult {
                    error: None,
                    response: outcome.ok(),
                    attempts: attempt,
                };
            }
            Classification::Retryable(reason) | Classification::Fatal(reason) => reason,
        };
        let (error, response) = failure(reason, outcome);

        if matches!(classification, Classification::Fatal(_)) {
            #[cfg(feature = "tracing")]
            tracing::warn!(url = spec.url(), attempt, error = %error, "request failed");

            return CallResult {
                error: Some(error),
                response,
                attempts: attempt,
            };
        }

        match backoff.decide(attempt, started.elapsed()) {
            RetryDecision::NoRetry => {
                #[cfg(feature = "tracing")]
                tracing::warn!(url = spec.url(), attempts = attempt, error = %error, "retries exhausted");

                return CallResult {
                    error: Some(HttpRetryError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(error),
                    }),
                    response,
                    attempts: attempt,
                };
            }
            RetryDecision::RetryAfter(delay) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    url = spec.url(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying request after backoff"
                );

                sleep(delay).await;
            }
        }
    }
}

/// Rejects requests that no number of attempts could send.
fn preflight(
    spec: &RequestSpec,
    retry: &RetryOptions,
    validation: &ValidationOptions,
) -> Result<()> {
    Url::parse(spec.url()).map_err(|err| {
        HttpRetryError::InvalidRequest(format!("invalid URL '{}': {err}", spec.url()))
    })?;
    spec.transport_options().validate()?;
    retry.validate()?;
    validation.validate()
}

fn failure(reason: FailureReason, outcome: AttemptOutcome) -> (HttpRetryError, Option<Response>) {
    let response = match outcome {
        Ok(response) => response,
        Err(err) => return (HttpRetryError::Transport(err), None),
    };
    let error = match reason {
        FailureReason::TooManyRedirects(status) => HttpRetryError::TooManyRedirects {
            status: status.as_u16(),
        },
        FailureReason::IncompleteDocument => HttpRetryError::IncompleteDocument,
        FailureReason::Status(_) | FailureReason::Transport => HttpRetryError::Status {
            status: response.status().as_u16(),
        },
    };
    (error, Some(response))
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicU32, Ordering},
            Mutex,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use reqwest::{header::HeaderMap, Method, StatusCode};

    use super::run;
    use crate::{
        AttemptOutcome, HttpRetryError, RequestSpec, Response, RetryOptions, ServerErrorPolicy,
        Transport, TransportError, TransportErrorKind, TransportOptions, ValidationOptions,
    };

    #[derive(Clone, Copy)]
    enum Step {
        Fail,
        Unbuildable,
        Status(u16, &'static str),
    }

    /// Replays scripted steps, repeating the last one once the script runs out.
    struct ScriptedTransport {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, spec: &RequestSpec) -> AttemptOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut steps = self.steps.lock().expect("steps mutex must not be poisoned");
            let step = if steps.len() > 1 {
                steps.pop_front()
            } else {
                steps.front().copied()
            };
            match step.expect("script must not be empty") {
                Step::Fail => Err(TransportError::new(
                    TransportErrorKind::Connect,
                    "connection refused",
                )
                .with_host("localhost")),
                Step::Unbuildable => Err(TransportError::new(
                    TransportErrorKind::InvalidRequest,
                    "builder error",
                )),
                Step::Status(code, body) => Ok(Response::new(
                    StatusCode::from_u16(code).expect("valid status"),
                    HeaderMap::new(),
                    spec.url(),
                    body,
                )),
            }
        }
    }

    fn spec() -> RequestSpec {
        RequestSpec::new(Method::GET, "http://localhost:1337/200")
    }

    fn no_delay(retries: u32) -> RetryOptions {
        RetryOptions {
            retries,
            min_timeout_ms: 0,
            max_timeout_ms: Some(0),
            ..RetryOptions::default()
        }
    }

    #[tokio::test]
    async fn success_returns_after_one_attempt() {
        let transport = ScriptedTransport::new(vec![Step::Status(200, "<p>Hello World</p>")]);

        let result = run(&transport, &spec(), &no_delay(5), &ValidationOptions::default()).await;

        assert!(result.error.is_none());
        assert_eq!(result.status(), Some(StatusCode::OK));
        assert_eq!(result.body(), Some("<p>Hello World</p>"));
        assert_eq!(result.attempts, 1);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn transport_failures_use_whole_budget() {
        let transport = ScriptedTransport::new(vec![Step::Fail]);

        let result = run(&transport, &spec(), &no_delay(3), &ValidationOptions::default()).await;

        assert_eq!(transport.calls(), 4);
        assert_eq!(result.attempts, 4);
        assert!(result.response.is_none());
        let err = result.error.expect("must fail");
        assert_eq!(err.attempts(), Some(4));
        let transport_err = err.transport_error().expect("must carry transport error");
        assert_eq!(transport_err.kind(), TransportErrorKind::Connect);
    }

    #[tokio::test]
    async fn single_attempt_budget_makes_one_call() {
        let transport = ScriptedTransport::new(vec![Step::Fail]);

        let result = run(&transport, &spec(), &no_delay(0), &ValidationOptions::default()).await;

        assert_eq!(transport.calls(), 1);
        assert!(matches!(
            result.error,
            Some(HttpRetryError::RetriesExhausted { attempts: 1, .. })
        ));
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let transport = ScriptedTransport::new(vec![
            Step::Fail,
            Step::Fail,
            Step::Status(200, "<p>Hello World</p>"),
        ]);

        let result = run(&transport, &spec(), &no_delay(2), &ValidationOptions::default()).await;

        assert!(result.is_success());
        assert_eq!(result.body(), Some("<p>Hello World</p>"));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn fatal_failure_short_circuits() {
        let transport = ScriptedTransport::new(vec![Step::Status(302, "<p>Moved</p>")]);

        let result = run(&transport, &spec(), &no_delay(5), &ValidationOptions::default()).await;

        assert_eq!(transport.calls(), 1);
        assert_eq!(result.status(), Some(StatusCode::FOUND));
        assert_eq!(
            result.error.expect("must fail").to_string(),
            "Too many redirects. Increase in needle options."
        );
    }

    #[tokio::test]
    async fn fatal_after_retryable_keeps_latest_response() {
        let transport =
            ScriptedTransport::new(vec![Step::Fail, Step::Status(404, "<p>Not found</p>")]);

        let result = run(&transport, &spec(), &no_delay(5), &ValidationOptions::default()).await;

        assert_eq!(transport.calls(), 2);
        assert_eq!(result.status(), Some(StatusCode::NOT_FOUND));
        assert!(matches!(
            result.error,
            Some(HttpRetryError::Status { status: 404 })
        ));
    }

    #[tokio::test]
    async fn server_errors_retry_when_enabled() {
        let transport = ScriptedTransport::new(vec![
            Step::Status(500, "<p>Server error!</p>"),
            Step::Status(500, "<p>Server error!</p>"),
            Step::Status(200, "<p>Hello World</p>"),
        ]);
        let validation = ValidationOptions {
            server_errors: ServerErrorPolicy::Retry,
            ..ValidationOptions::default()
        };

        let result = run(&transport, &spec(), &no_delay(5), &validation).await;

        assert!(result.is_success());
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_server_errors_keep_last_response() {
        let transport = ScriptedTransport::new(vec![Step::Status(503, "busy")]);
        let validation = ValidationOptions {
            server_errors: ServerErrorPolicy::Retry,
            ..ValidationOptions::default()
        };

        let result = run(&transport, &spec(), &no_delay(1), &validation).await;

        assert_eq!(transport.calls(), 2);
        assert_eq!(result.body(), Some("busy"));
        let err = result.error.expect("must fail");
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.attempts(), Some(2));
    }

    #[tokio::test]
    async fn invalid_options_make_no_attempt() {
        let transport = ScriptedTransport::new(vec![Step::Status(200, "")]);
        let retry = RetryOptions {
            factor: 0.0,
            ..RetryOptions::default()
        };

        let result = run(&transport, &spec(), &retry, &ValidationOptions::default()).await;

        assert_eq!(transport.calls(), 0);
        assert!(matches!(
            result.error,
            Some(HttpRetryError::InvalidOptions(_))
        ));
    }

    #[tokio::test]
    async fn malformed_url_makes_no_attempt() {
        let transport = ScriptedTransport::new(vec![Step::Status(200, "")]);
        let spec = RequestSpec::new(Method::GET, "http://exa mple.com/");

        let result = run(&transport, &spec, &no_delay(4), &ValidationOptions::default()).await;

        assert_eq!(transport.calls(), 0);
        assert_eq!(result.attempts, 0);
        assert!(matches!(
            result.error,
            Some(HttpRetryError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn bad_header_in_spec_makes_no_attempt() {
        let transport = ScriptedTransport::new(vec![Step::Status(200, "")]);
        let mut options = TransportOptions::default();
        options
            .headers
            .insert("bad header".to_owned(), "value".to_owned());
        let spec = spec().with_transport_options(options);

        let result = run(&transport, &spec, &no_delay(4), &ValidationOptions::default()).await;

        assert_eq!(transport.calls(), 0);
        assert!(matches!(
            result.error,
            Some(HttpRetryError::InvalidOptions(_))
        ));
    }

    #[tokio::test]
    async fn unbuildable_request_from_transport_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Step::Unbuildable]);

        let result = run(&transport, &spec(), &no_delay(4), &ValidationOptions::default()).await;

        assert_eq!(transport.calls(), 1);
        let err = result.error.expect("must fail");
        assert!(err.attempts().is_none());
        assert_eq!(
            err.transport_error().map(|err| err.kind()),
            Some(TransportErrorKind::InvalidRequest)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn waits_backoff_delay_between_attempts() {
        let transport = ScriptedTransport::new(vec![Step::Fail, Step::Fail, Step::Status(200, "")]);
        let retry = RetryOptions {
            retries: 2,
            min_timeout_ms: 1_000,
            factor: 2.0,
            ..RetryOptions::default()
        };

        let started = tokio::time::Instant::now();
        let result = run(&transport, &spec(), &retry, &ValidationOptions::default()).await;

        assert!(result.is_success());
        assert!(started.elapsed() >= Duration::from_millis(3_000));
    }

    #[tokio::test(start_paused = true)]
    async fn max_retry_time_stops_early() {
        let transport = ScriptedTransport::new(vec![Step::Fail]);
        let retry = RetryOptions {
            retries: 10,
            min_timeout_ms: 1_000,
            factor: 1.0,
            max_retry_time_ms: Some(2_500),
            ..RetryOptions::default()
        };

        let result = run(&transport, &spec(), &retry, &ValidationOptions::default()).await;

        // Attempts start at 0s, 1s, 2s and 3s; the check after the fourth sees 3s elapsed.
        assert_eq!(transport.calls(), 4);
        assert!(result.error.is_some());
    }
}
