use bytes::Bytes;
use reqwest::{header::HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;

use crate::{HttpRetryError, Result, TransportError, TransportOptions};

/// Description of one logical request. Every attempt replays the same spec.
#[derive(Clone, Debug)]
pub struct RequestSpec {
    method: Method,
    url: String,
    body: Option<Bytes>,
    transport: TransportOptions,
}

impl RequestSpec {
    /// Creates a spec for `method` and `url`.
    ///
    /// A URL without an `http://` or `https://` scheme is sent over plain HTTP.
    pub fn new(method: Method, url: impl AsRef<str>) -> Self {
        Self {
            method,
            url: with_default_scheme(url.as_ref()),
            body: None,
            transport: TransportOptions::default(),
        }
    }

    /// Creates a spec from a case-insensitive method name such as `"get"`.
    pub fn parse(method: &str, url: impl AsRef<str>) -> Result<Self> {
        let normalized = method.trim().to_ascii_uppercase();
        let method = Method::from_bytes(normalized.as_bytes()).map_err(|_| {
            HttpRetryError::InvalidRequest(format!("invalid HTTP method '{method}'"))
        })?;
        Ok(Self::new(method, url))
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_transport_options(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn transport_options(&self) -> &TransportOptions {
        &self.transport
    }
}

fn with_default_scheme(url: &str) -> String {
    let trimmed = url.trim();
    let has_scheme = ["http://", "https://"].iter().any(|scheme| {
        trimmed
            .get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    });
    if has_scheme {
        trimmed.to_owned()
    } else {
        format!("http://{trimmed}")
    }
}

/// Completed HTTP exchange: status, headers and the body as text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    url: String,
    body: String,
}

impl Response {
    pub fn new(
        status: StatusCode,
        headers: HeaderMap,
        url: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            status,
            headers,
            url: url.into(),
            body: body.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Final URL after any redirects the transport followed.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn into_body(self) -> String {
        self.body
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|err| {
            HttpRetryError::Decode(format!("invalid JSON response body: {err}"))
        })
    }
}

/// Result of a single transport call.
pub type AttemptOutcome = std::result::Result<Response, TransportError>;

/// Final outcome of a logical request.
///
/// `error` is `None` only when the request succeeded. `response` is the last
/// response observed, kept on failure too so callers can inspect the status
/// and body of a rejected exchange. It is `None` when the last attempt never
/// produced a response.
#[derive(Debug)]
pub struct CallResult {
    pub error: Option<HttpRetryError>,
    pub response: Option<Response>,
    /// Transport calls made on behalf of this request.
    pub attempts: u32,
}

impl CallResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.response.as_ref().map(Response::status)
    }

    pub fn body(&self) -> Option<&str> {
        self.response.as_ref().map(Response::body)
    }

    /// Converts into a `Result`, discarding the response on failure.
    pub fn into_result(self) -> Result<Response> {
        match (self.error, self.response) {
            (Some(err), _) => Err(err),
            (None, Some(response)) => Ok(response),
            (None, None) => Err(HttpRetryError::InvalidRequest(
                "request completed without a response".to_owned(),
            )),
        }
    }
}
