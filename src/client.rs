use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::{header, Method};
use serde::Serialize;

use crate::{
    driver, CallResult, HttpRetryError, ReqwestTransport, RequestOptions, RequestSpec, Result,
    Transport,
};

#[derive(Clone)]
/// HTTP client that retries transient failures and validates responses.
///
/// Every method resolves exactly once to a [`CallResult`] holding the final
/// error (if any) and the last response observed. Calls share no mutable
/// state, so one client can serve many concurrent requests.
pub struct HttpRetryClient {
    transport: Arc<dyn Transport>,
    options: RequestOptions,
}

impl fmt::Debug for HttpRetryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRetryClient")
            .field("transport", &"<dyn Transport>")
            .field("options", &self.options)
            .finish()
    }
}

impl Default for HttpRetryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRetryClient {
    /// Creates a client that sends requests with `reqwest` and uses default options.
    pub fn new() -> Self {
        Self::with_transport(ReqwestTransport)
    }

    /// Creates a client around a custom transport.
    pub fn with_transport(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Arc::new(transport),
            options: RequestOptions::default(),
        }
    }

    /// Applies options to every request made through the returned client.
    ///
    /// Options are validated here, so a bad header name or backoff factor is
    /// reported before any request is attempted.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use http_retry::{HttpRetryClient, RequestOptions};
    ///
    /// let mut options = RequestOptions::default();
    /// options.retry.retries = 2;
    /// options.validation.full_document = true;
    /// let client = HttpRetryClient::new().with_options(options).expect("valid options");
    /// ```
    pub fn with_options(mut self, options: RequestOptions) -> Result<Self> {
        options.validate()?;
        self.options = options;
        Ok(self)
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    pub async fn get(&self, url: impl AsRef<str>) -> CallResult {
        self.execute(&self.spec(Method::GET, url)).await
    }

    pub async fn head(&self, url: impl AsRef<str>) -> CallResult {
        self.execute(&self.spec(Method::HEAD, url)).await
    }

    pub async fn delete(&self, url: impl AsRef<str>) -> CallResult {
        self.execute(&self.spec(Method::DELETE, url)).await
    }

    pub async fn put(&self, url: impl AsRef<str>, body: impl Into<Bytes>) -> CallResult {
        self.execute(&self.spec(Method::PUT, url).with_body(body))
            .await
    }

    pub async fn post(&self, url: impl AsRef<str>, body: impl Into<Bytes>) -> CallResult {
        self.execute(&self.spec(Method::POST, url).with_body(body))
            .await
    }

    pub async fn patch(&self, url: impl AsRef<str>, body: impl Into<Bytes>) -> CallResult {
        self.execute(&self.spec(Method::PATCH, url).with_body(body))
            .await
    }

    /// Posts `value` serialized as JSON with a `Content-Type: application/json` header.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: impl AsRef<str>,
        value: &T,
    ) -> CallResult {
        let body = match serde_json::to_vec(value) {
            Ok(body) => body,
            Err(err) => {
                return rejected(HttpRetryError::InvalidRequest(format!(
                    "failed to serialize JSON body: {err}"
                )))
            }
        };

        let mut transport = self.options.transport.clone();
        let has_content_type = transport
            .headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case(header::CONTENT_TYPE.as_str()));
        if !has_content_type {
            transport.headers.insert(
                header::CONTENT_TYPE.as_str().to_owned(),
                "application/json".to_owned(),
            );
        }

        let spec = RequestSpec::new(Method::POST, url)
            .with_body(body)
            .with_transport_options(transport);
        self.execute(&spec).await
    }

    /// Sends a request with an arbitrary, case-insensitive method name.
    pub async fn request(
        &self,
        method: &str,
        url: impl AsRef<str>,
        body: Option<Bytes>,
    ) -> CallResult {
        let spec = match RequestSpec::parse(method, url) {
            Ok(spec) => spec.with_transport_options(self.options.transport.clone()),
            Err(err) => return rejected(err),
        };
        let spec = match body {
            Some(body) => spec.with_body(body),
            None => spec,
        };
        self.execute(&spec).await
    }

    /// Runs a prepared spec through the retry loop.
    ///
    /// The spec's own transport options are used as given; the client's
    /// retry and validation options apply.
    pub async fn execute(&self, spec: &RequestSpec) -> CallResult {
        driver::run(
            self.transport.as_ref(),
            spec,
            &self.options.retry,
            &self.options.validation,
        )
        .await
    }

    fn spec(&self, method: Method, url: impl AsRef<str>) -> RequestSpec {
        RequestSpec::new(method, url).with_transport_options(self.options.transport.clone())
    }
}

fn rejected(error: HttpRetryError) -> CallResult {
    CallResult {
        error: Some(error),
        response: None,
        attempts: 0,
    }
}
