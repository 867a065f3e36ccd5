use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect, Url};

use crate::{
    AttemptOutcome, RequestSpec, Response, TransportError, TransportErrorKind, TransportOptions,
};

/// Performs one HTTP exchange for a [`RequestSpec`].
///
/// Implementations must cap redirect following at
/// [`TransportOptions::follow_max`] and hand back the last redirect response
/// as an ordinary [`Response`] when the cap is reached. A response with any
/// status, 4xx and 5xx included, is `Ok`; only failures that produced no
/// response are `Err`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, spec: &RequestSpec) -> AttemptOutcome;
}

/// [`Transport`] backed by `reqwest`.
///
/// A client is built for every call from that call's transport options, so
/// nothing is shared between requests.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReqwestTransport;

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, spec: &RequestSpec) -> AttemptOutcome {
        let options = spec.transport_options();
        let client = build_client(options).map_err(|err| transport_error(err, spec.url()))?;

        let mut request = client.request(spec.method().clone(), spec.url());
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(timeout_ms) = options.timeout_ms {
            request = request.timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(body) = spec.body() {
            request = request.body(body.clone());
        }

        let response = request
            .send()
            .await
            .map_err(|err| transport_error(err, spec.url()))?;
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|err| transport_error(err, &url))?;

        Ok(Response::new(status, headers, url, body))
    }
}

fn build_client(options: &TransportOptions) -> reqwest::Result<reqwest::Client> {
    let follow_max = options.follow_max as usize;
    // `previous` holds every URL visited so far, so its length is the number
    // of redirects that would have been followed after this one.
    let policy = redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() > follow_max {
            attempt.stop()
        } else {
            attempt.follow()
        }
    });

    let mut builder = reqwest::Client::builder().redirect(policy);
    if let Some(connect_timeout_ms) = options.connect_timeout_ms {
        builder = builder.connect_timeout(Duration::from_millis(connect_timeout_ms));
    }
    if let Some(proxy) = &options.proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
    }
    if let Some(user_agent) = &options.user_agent {
        builder = builder.user_agent(user_agent.as_str());
    }
    builder.build()
}

fn transport_error(err: reqwest::Error, url: &str) -> TransportError {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_builder() {
        TransportErrorKind::InvalidRequest
    } else if err.is_connect() {
        if is_dns_failure(&err) {
            TransportErrorKind::Dns
        } else {
            TransportErrorKind::Connect
        }
    } else if err.is_body() || err.is_decode() {
        TransportErrorKind::Body
    } else {
        TransportErrorKind::Other
    };

    let host = err
        .url()
        .and_then(|url| url.host_str().map(str::to_owned))
        .or_else(|| Url::parse(url).ok()?.host_str().map(str::to_owned));

    let mut error = TransportError::new(kind, err.to_string());
    if let Some(host) = host {
        error = error.with_host(host);
    }
    error.with_source(err)
}

// The resolver failure is only visible in the rendered source chain.
fn is_dns_failure(err: &(dyn StdError + 'static)) -> bool {
    let mut source = err.source();
    while let Some(inner) = source {
        if inner.to_string().contains("dns error") {
            return true;
        }
        source = inner.source();
    }
    false
}
