use std::time::Duration;

use reqwest::Method;

use super::{
    events::Tags,
    headers::{AcceptRanges, ContentType, ResponseInfo, StreamFormat},
    request::{BodyReader, RedirectRecord},
};
use crate::configs::SeekCapability;

/// Where the current exchange stands.
///
/// ```text
///   Idle ──► RequestPending ──► HeadersReceived ──► Streaming ──► Idle
///     └──────────────┴──────────────┴─────────────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestState {
    #[default]
    Idle,
    RequestPending,
    HeadersReceived,
    Streaming,
    Cancelled,
}

/// What keeps the source from issuing another request right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InFlight {
    /// Sent and waiting for its headers.
    Request(Method),
    /// Sleeping before the next attempt of a failed request.
    Backoff,
}

/// What applying a response's headers changed.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct HeaderEffects {
    pub duration_changed: bool,
    pub format: Option<StreamFormat>,
    pub tags: Option<Tags>,
}

/// Mutable request/position state, guarded by the source mutex.
#[derive(Debug, Default)]
pub(crate) struct SourceState {
    pub request_state: RequestState,
    pub started: bool,

    /// Offset of the next byte handed out.
    pub read_position: u64,
    /// Offset the next request targets; differs from `read_position` while a
    /// seek is pending.
    pub request_position: u64,
    /// Exclusive end of the current segment.
    pub stop_position: Option<u64>,
    pub content_size: u64,
    pub have_size: bool,
    pub seekable: bool,
    pub got_headers: bool,
    /// The last exchange's body was consumed completely.
    pub have_body: bool,
    pub retry_count: u32,

    pub in_flight: Option<InFlight>,
    pub body: Option<BodyReader>,

    pub time_seek_pending: bool,
    pub request_time: Option<Duration>,

    pub redirect: Option<RedirectRecord>,
    pub format: Option<StreamFormat>,
}

impl SourceState {
    /// Back to the state of a freshly created source. Redirect and format
    /// knowledge survive.
    pub fn reset(&mut self) {
        self.request_state = RequestState::Idle;
        self.started = false;
        self.read_position = 0;
        self.request_position = 0;
        self.stop_position = None;
        self.content_size = 0;
        self.have_size = false;
        self.seekable = false;
        self.got_headers = false;
        self.have_body = false;
        self.retry_count = 0;
        self.in_flight = None;
        self.body = None;
        self.time_seek_pending = false;
        self.request_time = None;
    }

    pub fn seek_pending(&self) -> bool {
        self.request_position != self.read_position || self.time_seek_pending
    }

    /// Accounts for `n` delivered bytes. Returns `true` when the content size
    /// had to grow to cover them.
    pub fn update_position(&mut self, n: u64) -> bool {
        let new_position = self.read_position + n;
        if self.request_position == self.read_position {
            self.request_position = new_position;
        }
        self.read_position = new_position;

        if self.have_size && new_position > self.content_size {
            self.content_size = new_position;
            return true;
        }
        false
    }

    /// Folds a successful response's headers into the state.
    pub fn apply_response(
        &mut self,
        info: &ResponseInfo,
        capability: SeekCapability,
        time_seek: bool,
    ) -> HeaderEffects {
        let mut effects = HeaderEffects::default();
        let may_seek = capability != SeekCapability::None;

        if let Some(length) = info.content_length {
            // A time seek answers with the remaining length; derive where in
            // the entity that puts us.
            if time_seek && self.have_size && self.content_size > 0 {
                self.request_position = self.content_size.saturating_sub(length);
                self.read_position = self.request_position;
                effects.duration_changed = true;
            }

            let new_size = self.request_position + length;
            if !self.have_size || self.content_size != new_size {
                self.content_size = new_size;
                self.have_size = true;
                if may_seek {
                    self.seekable = true;
                }
                effects.duration_changed = true;
            }
        } else if info.chunked && time_seek {
            if let Some(range) = info.time_seek_range {
                self.request_position = if self.content_size > range.start {
                    range.start
                } else {
                    0
                };
                self.read_position = self.request_position;
            }
        }

        if let Some(range) = info.content_range {
            if may_seek {
                self.seekable = true;
            }
            if let Some(total) = range.total {
                if !self.have_size || self.content_size != total {
                    self.content_size = total;
                    self.have_size = true;
                    effects.duration_changed = true;
                }
            }
        }

        if info.accept_ranges == AcceptRanges::None && capability == SeekCapability::Unknown {
            self.seekable = false;
        }

        let mut format = match info.icy.metadata_interval {
            Some(metadata_interval) => Some(StreamFormat::Icy {
                metadata_interval,
                content_type: None,
            }),
            None => self.format.clone(),
        };
        match &info.content_type {
            Some(ContentType::L16 { channels, rate }) if *channels > 0 && *rate > 0 => {
                format = Some(StreamFormat::RawAudio {
                    channels: *channels,
                    rate: *rate,
                });
            }
            Some(ContentType::L16 { .. }) | None => {}
            Some(ContentType::Other(content_type)) => {
                format = Some(match format {
                    Some(known) => known.with_content_type(content_type),
                    None => StreamFormat::Other {
                        content_type: content_type.clone(),
                    },
                });
            }
        }
        if format.is_some() && format != self.format {
            self.format = format.clone();
            effects.format = format;
        }

        if info.has_icy_tags() {
            effects.tags = Some(Tags {
                organization: info.icy.name.clone(),
                genre: info.icy.genre.clone(),
                location: info.icy.url.clone(),
            });
        }

        effects
    }
}
