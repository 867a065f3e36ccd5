use std::fmt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse category of a transport-level failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Host name could not be resolved.
    Dns,
    /// TCP/TLS connection could not be established.
    Connect,
    /// Connect or response deadline elapsed.
    Timeout,
    /// Response body could not be read.
    Body,
    /// Request could not be built from the supplied URL or options.
    InvalidRequest,
    /// Anything the transport could not categorize.
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::Body => "body",
            Self::InvalidRequest => "invalid request",
            Self::Other => "other",
        };
        f.write_str(text)
    }
}

/// Failure reported by a [`Transport`](crate::Transport) instead of a response.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    host: Option<String>,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            host: None,
            message: message.into(),
            source: None,
        }
    }

    /// Attaches the host the transport was trying to reach.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum HttpRetryError {
    /// Network failure reported by the transport (DNS, connect, timeout, body read).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// Redirect status surfaced because the transport hit its follow limit.
    #[error("Too many redirects. Increase in needle options.")]
    TooManyRedirects { status: u16 },
    /// Response status of 400 or above.
    #[error("Request failed. Status code: {status}.")]
    Status { status: u16 },
    /// Document validation was requested and the body lacks its closing marker.
    #[error("fullDocument: not full document.")]
    IncompleteDocument,
    /// Every permitted attempt ended in a retryable failure.
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        /// Reason the final attempt failed.
        #[source]
        last: Box<HttpRetryError>,
    },
    /// Options rejected before any attempt was made.
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    /// Request rejected before any attempt was made (bad method, unserializable body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl HttpRetryError {
    /// Returns the transport error behind this error, looking through
    /// [`HttpRetryError::RetriesExhausted`].
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(err) => Some(err),
            Self::RetriesExhausted { last, .. } => last.transport_error(),
            _ => None,
        }
    }

    /// Returns the HTTP status that caused this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::TooManyRedirects { status } | Self::Status { status } => Some(*status),
            Self::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Number of attempts made before giving up, when retries were exhausted.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetriesExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}
