use std::time::Duration;

use reqwest::StatusCode;

use super::constants::MAX_BACKOFF_EXPONENT;
use crate::common::SourceError;

/// What a completed (or failed) exchange turned out to be.
#[derive(Debug)]
pub enum Outcome {
    Cancelled,
    /// No response: DNS, connect, TLS, reset or timeout.
    Transport(SourceError),
    Response(StatusCode),
}

/// Request-side facts the classification depends on.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExchangeContext {
    /// HEAD sent by the seekability check; its outcome never fails or
    /// retries anything.
    pub seekability_check: bool,
    /// Attempts made since the last successful read, this one included.
    pub retry_count: u32,
    pub have_body: bool,
    pub have_size: bool,
    /// A byte range starting past zero was requested.
    pub range_requested: bool,
    pub time_seek_requested: bool,
}

#[derive(Debug)]
pub enum Verdict {
    Proceed,
    Retry(SourceError),
    Eos,
    Flushing,
    Fail(SourceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// -1 means unlimited.
    max_retries: i32,
    backoff_base: Duration,
    tolerate_ignored_range: bool,
}

impl RetryPolicy {
    pub fn new(max_retries: i32, backoff_base: Duration) -> Self {
        Self {
            max_retries,
            backoff_base,
            tolerate_ignored_range: false,
        }
    }

    /// Accept a plain 200 to a ranged request instead of failing the seek.
    pub fn tolerate_ignored_range(mut self, tolerate: bool) -> Self {
        self.tolerate_ignored_range = tolerate;
        self
    }

    fn unlimited(&self) -> bool {
        self.max_retries < 0
    }

    /// Whether one more request may be issued after `retry_count` attempts
    /// that did not deliver data.
    pub fn allows_attempt(&self, retry_count: u32) -> bool {
        self.unlimited() || i64::from(retry_count) <= i64::from(self.max_retries)
    }

    /// Whether a transient failure on attempt `retry_count` is retried.
    pub fn can_retry(&self, retry_count: u32) -> bool {
        self.allows_attempt(retry_count)
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// with the exponent capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.backoff_base.is_zero() {
            return Duration::ZERO;
        }
        let exponent = (attempt - 1).min(MAX_BACKOFF_EXPONENT);
        self.backoff_base.saturating_mul(1 << exponent)
    }

    pub fn classify(&self, outcome: Outcome, ctx: &ExchangeContext) -> Verdict {
        let status = match outcome {
            Outcome::Cancelled => return Verdict::Flushing,
            // A seekability check only learns capabilities; whatever happened
            // stays local.
            _ if ctx.seekability_check => return Verdict::Proceed,
            Outcome::Transport(err) if err.is_retryable() => {
                return if self.can_retry(ctx.retry_count) {
                    Verdict::Retry(err)
                } else {
                    Verdict::Fail(err)
                };
            }
            Outcome::Transport(err) => return Verdict::Fail(err),
            Outcome::Response(status) => status,
        };

        if status == StatusCode::RANGE_NOT_SATISFIABLE && ctx.have_body && !ctx.have_size {
            return Verdict::Eos;
        }

        if !status.is_success() {
            return Verdict::Fail(SourceError::from_status(status));
        }

        if ctx.time_seek_requested && status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT
        {
            return Verdict::Fail(SourceError::SeekUnsupported {
                message: "Server does not accept the time seek range header".into(),
                status: Some(status.as_u16()),
            });
        }

        if ctx.range_requested && status != StatusCode::PARTIAL_CONTENT {
            if self.tolerate_ignored_range && status == StatusCode::OK {
                return Verdict::Proceed;
            }
            return Verdict::Fail(SourceError::SeekUnsupported {
                message: "Server does not accept Range HTTP header".into(),
                status: Some(status.as_u16()),
            });
        }

        Verdict::Proceed
    }
}
