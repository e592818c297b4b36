use std::{error::Error as StdError, time::Duration};

use bytes::{Bytes, BytesMut};
use hyper::ext::ReasonPhrase;
use reqwest::{Method, StatusCode, header::HeaderMap};
use thiserror::Error;
use url::Url;

use crate::common::{SourceError, TransportKind};

/// One HTTP exchange as it goes on the wire.
#[derive(Debug, Clone)]
pub struct InFlightRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

impl InFlightRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
        }
    }

    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }
}

/// Redirect observed while sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectRecord {
    pub uri: Url,
    /// 301 or 308.
    pub permanent: bool,
}

/// A response whose headers arrived; the body is still unread.
#[derive(Debug)]
pub struct Exchange {
    pub request: InFlightRequest,
    pub response: reqwest::Response,
    /// Last hop, if any redirect was followed.
    pub redirect: Option<RedirectRecord>,
}

impl Exchange {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// Reason phrase as sent by the server, when it differs from the
    /// canonical one for the status.
    pub fn reason_phrase(&self) -> Option<String> {
        let phrase = self.response.extensions().get::<ReasonPhrase>()?;
        std::str::from_utf8(phrase.as_bytes())
            .ok()
            .map(str::to_string)
    }

    pub fn response_headers(&self) -> &HeaderMap {
        self.response.headers()
    }
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("no data for {0:?}")]
    Timeout(Duration),
    #[error("redirect to invalid location: {0}")]
    BadRedirect(String),
    #[error("too many redirects")]
    TooManyRedirects,
}

impl ExchangeError {
    /// Places a failure below the HTTP layer into the error taxonomy.
    pub fn classify(&self) -> SourceError {
        match self {
            Self::Timeout(limit) => {
                SourceError::TransportTransient(format!("no data received for {limit:?}"))
            }
            Self::BadRedirect(_) | Self::TooManyRedirects => {
                SourceError::Protocol(self.to_string())
            }
            Self::Http(err) => classify_reqwest(err),
        }
    }
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}

fn classify_reqwest(err: &reqwest::Error) -> SourceError {
    let message = error_chain(err);
    let lower = message.to_ascii_lowercase();

    if err.is_connect() {
        let kind = if lower.contains("dns") || lower.contains("resolve") {
            TransportKind::Resolve
        } else if lower.contains("certificate")
            || lower.contains("tls")
            || lower.contains("handshake")
        {
            TransportKind::Tls
        } else {
            TransportKind::Connect
        };
        return SourceError::Transport { kind, message };
    }

    if err.is_builder() || lower.contains("invalid http") || lower.contains("parse") {
        return SourceError::Protocol(message);
    }

    // Resets, truncated bodies and timeouts are worth another attempt.
    SourceError::TransportTransient(message)
}

/// Pulls fixed-size blocks out of a response body.
#[derive(Debug)]
pub struct BodyReader {
    response: reqwest::Response,
    pending: Bytes,
    /// Failure seen after some bytes of a block were already collected.
    deferred: Option<ExchangeError>,
    finished: bool,
}

impl BodyReader {
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            pending: Bytes::new(),
            deferred: None,
            finished: false,
        }
    }

    /// Reads until `size` bytes are collected or the body ends. An empty
    /// block means end of body. `idle_timeout` bounds each wait for data.
    pub async fn read_block(
        &mut self,
        size: usize,
        idle_timeout: Option<Duration>,
    ) -> Result<Bytes, ExchangeError> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }

        let mut out = BytesMut::with_capacity(size);
        if !self.pending.is_empty() {
            let take = size.min(self.pending.len());
            out.extend_from_slice(&self.pending.split_to(take));
        }

        while out.len() < size && !self.finished {
            let next = match idle_timeout {
                Some(limit) => tokio::time::timeout(limit, self.response.chunk())
                    .await
                    .map_err(|_| ExchangeError::Timeout(limit))
                    .and_then(|r| r.map_err(ExchangeError::from)),
                None => self.response.chunk().await.map_err(ExchangeError::from),
            };

            match next {
                Ok(Some(mut chunk)) => {
                    let take = (size - out.len()).min(chunk.len());
                    out.extend_from_slice(&chunk.split_to(take));
                    self.pending = chunk;
                }
                Ok(None) => self.finished = true,
                Err(err) if out.is_empty() => return Err(err),
                Err(err) => {
                    self.deferred = Some(err);
                    break;
                }
            }
        }

        Ok(out.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_transient() {
        let err = ExchangeError::Timeout(Duration::from_secs(15)).classify();
        assert!(err.is_retryable());
    }

    #[test]
    fn redirect_loops_are_protocol_errors() {
        let err = ExchangeError::TooManyRedirects.classify();
        assert!(matches!(err, SourceError::Protocol(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn head_detection() {
        let url = Url::parse("http://example.com/").unwrap();
        assert!(InFlightRequest::new(Method::HEAD, url.clone()).is_head());
        assert!(!InFlightRequest::new(Method::GET, url).is_head());
    }
}
