use std::collections::BTreeMap;

use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::{HttpRetryError, Result};

/// Options for one logical request, grouped the way they are consumed:
/// by the transport, by the response classifier, and by the backoff scheduler.
///
/// Every field has a default, so partial JSON documents are accepted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    #[serde(alias = "needle")]
    pub transport: TransportOptions,
    #[serde(alias = "needleRetry")]
    pub validation: ValidationOptions,
    pub retry: RetryOptions,
}

impl RequestOptions {
    /// Parses options from JSON and validates them.
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)
            .map_err(|err| HttpRetryError::InvalidOptions(format!("malformed options: {err}")))?;
        options.validate()?;
        Ok(options)
    }

    /// Rejects option combinations that cannot produce a sensible request.
    pub fn validate(&self) -> Result<()> {
        self.transport.validate()?;
        self.validation.validate()?;
        self.retry.validate()
    }
}

/// Options handed through to the transport for every attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// Maximum number of redirects followed before the redirect response
    /// itself is returned.
    #[serde(alias = "follow")]
    pub follow_max: u32,
    /// Connect timeout in milliseconds.
    #[serde(alias = "open_timeout")]
    pub connect_timeout_ms: Option<u64>,
    /// Whole-request timeout in milliseconds, body read included.
    #[serde(alias = "response_timeout")]
    pub timeout_ms: Option<u64>,
    pub headers: BTreeMap<String, String>,
    /// Proxy URL used for all schemes.
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            follow_max: 20,
            connect_timeout_ms: Some(10_000),
            timeout_ms: None,
            headers: BTreeMap::new(),
            proxy: None,
            user_agent: None,
        }
    }
}

impl TransportOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
                HttpRetryError::InvalidOptions(format!("invalid header name '{name}': {err}"))
            })?;
            HeaderValue::from_str(value).map_err(|err| {
                HttpRetryError::InvalidOptions(format!("invalid value for header '{name}': {err}"))
            })?;
        }
        if let Some(proxy) = &self.proxy {
            reqwest::Proxy::all(proxy.as_str()).map_err(|err| {
                HttpRetryError::InvalidOptions(format!("invalid proxy '{proxy}': {err}"))
            })?;
        }
        if let Some(user_agent) = &self.user_agent {
            HeaderValue::from_str(user_agent).map_err(|err| {
                HttpRetryError::InvalidOptions(format!("invalid user agent: {err}"))
            })?;
        }
        Ok(())
    }
}

/// How 5xx responses are classified.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerErrorPolicy {
    /// 5xx fails immediately like any other status of 400 or above.
    #[default]
    Fatal,
    /// 5xx consumes retry budget like a transport error.
    Retry,
}

/// Checks applied to completed responses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationOptions {
    /// Require the body of a successful response to contain `document_marker`.
    #[serde(alias = "fullDocument")]
    pub full_document: bool,
    #[serde(alias = "documentMarker")]
    pub document_marker: String,
    #[serde(alias = "serverErrors")]
    pub server_errors: ServerErrorPolicy,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            full_document: false,
            document_marker: "</html>".to_owned(),
            server_errors: ServerErrorPolicy::Fatal,
        }
    }
}

impl ValidationOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.full_document && self.document_marker.is_empty() {
            return Err(HttpRetryError::InvalidOptions(
                "document_marker must not be empty when full_document is set".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Exponential backoff parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Retries after the initial attempt.
    pub retries: u32,
    /// Growth factor applied per retry.
    pub factor: f64,
    /// Delay before the first retry, in milliseconds.
    #[serde(alias = "minTimeout")]
    pub min_timeout_ms: u64,
    /// Upper bound on any single delay; `None` leaves delays unbounded.
    #[serde(alias = "maxTimeout")]
    pub max_timeout_ms: Option<u64>,
    /// Multiply each delay by a random factor in `[1, 2)`.
    pub randomize: bool,
    /// Stop retrying once this much time has passed since the first attempt.
    #[serde(alias = "maxRetryTime")]
    pub max_retry_time_ms: Option<u64>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            retries: 5,
            factor: 2.0,
            min_timeout_ms: 1_000,
            max_timeout_ms: None,
            randomize: false,
            max_retry_time_ms: None,
        }
    }
}

impl RetryOptions {
    /// Total transport calls allowed for one logical request.
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(HttpRetryError::InvalidOptions(format!(
                "factor must be a finite number >= 1, got {}",
                self.factor
            )));
        }
        if let Some(max) = self.max_timeout_ms {
            if self.min_timeout_ms > max {
                return Err(HttpRetryError::InvalidOptions(format!(
                    "min_timeout_ms ({}) exceeds max_timeout_ms ({max})",
                    self.min_timeout_ms
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{RequestOptions, RetryOptions, ServerErrorPolicy};
    use crate::HttpRetryError;

    #[test]
    fn defaults_match_documented_values() {
        let options = RequestOptions::default();
        assert_eq!(options.transport.follow_max, 20);
        assert_eq!(options.retry.retries, 5);
        assert_eq!(options.retry.max_attempts(), 6);
        assert!(!options.validation.full_document);
        assert_eq!(options.validation.server_errors, ServerErrorPolicy::Fatal);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn from_json_accepts_camel_case_aliases() {
        let options = RequestOptions::from_json(
            r#"{
                "needle": { "follow_max": 0 },
                "needleRetry": { "fullDocument": true },
                "retry": { "minTimeout": 0, "maxTimeout": 0 }
            }"#,
        )
        .expect("options must parse");

        assert_eq!(options.transport.follow_max, 0);
        assert!(options.validation.full_document);
        assert_eq!(options.validation.document_marker, "</html>");
        assert_eq!(options.retry.min_timeout_ms, 0);
        assert_eq!(options.retry.max_timeout_ms, Some(0));
        assert_eq!(options.retry.retries, 5);
    }

    #[test]
    fn from_json_rejects_malformed_input() {
        let err = RequestOptions::from_json("{ not json").expect_err("must fail");
        assert!(matches!(err, HttpRetryError::InvalidOptions(_)));
    }

    #[test]
    fn validate_rejects_inverted_timeouts() {
        let mut options = RequestOptions::default();
        options.retry = RetryOptions {
            min_timeout_ms: 500,
            max_timeout_ms: Some(100),
            ..RetryOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(HttpRetryError::InvalidOptions(_))
        ));
    }

    #[test]
    fn validate_rejects_shrinking_factor() {
        let mut options = RequestOptions::default();
        options.retry.factor = 0.5;
        assert!(options.validate().is_err());
        options.retry.factor = f64::NAN;
        assert!(options.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_headers_and_proxy() {
        let mut options = RequestOptions::default();
        options
            .transport
            .headers
            .insert("bad header".to_owned(), "value".to_owned());
        assert!(options.validate().is_err());

        let mut options = RequestOptions::default();
        options.transport.proxy = Some("::not a url::".to_owned());
        assert!(options.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_marker_with_full_document() {
        let mut options = RequestOptions::default();
        options.validation.full_document = true;
        options.validation.document_marker.clear();
        assert!(options.validate().is_err());
    }
}
