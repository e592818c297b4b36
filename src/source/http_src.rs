//! Pull-mode HTTP source.
//!
//! ```text
//!   host worker thread                       control thread
//!   ──────────────────                       ──────────────
//!   create()                                 seek() / is_seekable()
//!     ├─ seek pending? drop body               └─ check_seekable ─► HEAD once
//!     ├─ no body? do_request ──► headers ──► classify                or wait on
//!     │                           │                                  have_headers
//!     │                           └─► notify have_headers
//!     └─ read_buffer ──► Buffer | Retry (backoff, loop) | Eos | Error
//!                                                        unlock() ─► abort wait
//! ```
//!
//! All state lives behind one mutex. Network waits run with the lock
//! released so that `unlock`, `seek` and queries stay responsive.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};
use reqwest::{
    Method, StatusCode,
    header::{ACCEPT_ENCODING, CONNECTION, COOKIE, HeaderName, HeaderValue, RANGE, USER_AGENT},
};
use tracing::{debug, error, info, trace, warn};

use super::{
    PushSource,
    auth::AuthHook,
    cancel::{Canceller, WaitError, wait},
    constants::{ICY_METADATA_HEADER, RANGE_DRAIN_PROBE_SIZE},
    events::{EventSink, HeaderEntry, HttpHeadersDump, NullSink, SourceEvent, dump_headers},
    headers::HeaderParser,
    range::RangeRequestBuilder,
    request::{BodyReader, Exchange, InFlightRequest},
    retry::{ExchangeContext, Outcome, Verdict},
    session::{SessionManager, SessionProvider, SessionRegistry},
    settings::{Settings, parse_location},
    state::{InFlight, RequestState, SourceState},
};
use crate::{
    common::{
        Buffer, ErrorMessage, FlowError, Query, QueryResponse, Segment, SourceError, UriInfo,
    },
    configs::SourceConfig,
};

/// Why a step of `create` did not produce data.
#[derive(Debug)]
enum Halt {
    Retry(SourceError),
    Eos,
    Flushing,
    Error(SourceError),
}

type StateGuard<'a> = MutexGuard<'a, SourceState>;

pub struct HttpSrcBuilder {
    config: SourceConfig,
    provider: Option<Arc<dyn SessionProvider>>,
    events: Option<Arc<dyn EventSink>>,
    auth: Option<Arc<dyn AuthHook>>,
}

impl HttpSrcBuilder {
    /// Where shared sessions come from. Without one, the source never shares.
    pub fn session_provider(mut self, provider: Arc<dyn SessionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Replaces the configured `user-id`/`proxy-id` credentials.
    pub fn auth_hook(mut self, hook: Arc<dyn AuthHook>) -> Self {
        self.auth = Some(hook);
        self
    }

    pub fn build(self) -> Result<HttpSrc, SourceError> {
        let settings = Settings::try_from(&self.config)?;
        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(SessionRegistry::new()));

        Ok(HttpSrc {
            settings: Mutex::new(settings),
            state: Mutex::new(SourceState::default()),
            have_headers: Condvar::new(),
            canceller: Mutex::new(Canceller::default()),
            sessions: Mutex::new(SessionManager::new(provider)),
            auth: self.auth,
            events: self.events.unwrap_or_else(|| Arc::new(NullSink)),
        })
    }
}

/// HTTP source with range/time seeking, retries and session sharing.
///
/// Locks are always taken in the order `state`, then `sessions` or
/// `canceller`; `settings` is never held together with another lock.
pub struct HttpSrc {
    settings: Mutex<Settings>,
    state: Mutex<SourceState>,
    have_headers: Condvar,
    canceller: Mutex<Canceller>,
    sessions: Mutex<SessionManager>,
    auth: Option<Arc<dyn AuthHook>>,
    events: Arc<dyn EventSink>,
}

impl HttpSrc {
    pub fn builder(config: SourceConfig) -> HttpSrcBuilder {
        HttpSrcBuilder {
            config,
            provider: None,
            events: None,
            auth: None,
        }
    }

    pub fn new(config: SourceConfig) -> Result<Self, SourceError> {
        Self::builder(config).build()
    }

    fn settings(&self) -> Settings {
        self.settings.lock().clone()
    }

    /// Changes the target. Only allowed while stopped; forgets any redirect.
    pub fn set_location(&self, location: &str) -> Result<(), SourceError> {
        if self.state.lock().started {
            return Err(SourceError::Config(
                "cannot change the location of a running source".into(),
            ));
        }
        let url = parse_location(location)?;
        debug!("Location set to {}", url);
        self.settings.lock().location = Some(url);
        self.state.lock().redirect = None;
        Ok(())
    }

    pub fn location(&self) -> Option<String> {
        self.settings.lock().location.as_ref().map(ToString::to_string)
    }

    pub fn is_live(&self) -> bool {
        self.settings.lock().is_live
    }

    pub fn request_state(&self) -> RequestState {
        self.state.lock().request_state
    }

    pub fn retry_count(&self) -> u32 {
        self.state.lock().retry_count
    }

    pub fn read_position(&self) -> u64 {
        self.state.lock().read_position
    }

    fn is_cancelled(&self, state: &SourceState) -> bool {
        state.request_state == RequestState::Cancelled || self.canceller.lock().is_cancelled()
    }

    fn report(&self, state: &SourceState, settings: &Settings, err: &SourceError) -> ErrorMessage {
        let location = settings.location.as_ref().map(|u| u.as_str());
        let redirect = state.redirect.as_ref().map(|r| r.uri.as_str());
        let message = ErrorMessage::new(err, location, redirect);
        error!("{}", message);
        self.events.post(SourceEvent::Error(message.clone()));
        message
    }

    fn finish_in_flight(&self, state: &mut SourceState) {
        state.in_flight = None;
        self.have_headers.notify_all();
    }

    /// Blocks until no other request or retry backoff is outstanding, so at
    /// most one exchange is ever on the wire.
    fn wait_idle(&self, state: &mut StateGuard<'_>) -> Result<(), Halt> {
        while let Some(busy) = &state.in_flight {
            if self.is_cancelled(state) {
                return Err(Halt::Flushing);
            }
            trace!("Waiting for {:?} to finish", busy);
            self.have_headers.wait(state);
        }
        Ok(())
    }

    fn build_request(
        &self,
        state: &mut SourceState,
        settings: &Settings,
        method: Method,
    ) -> Result<(InFlightRequest, bool, bool), SourceError> {
        let url = settings
            .location
            .clone()
            .ok_or_else(|| SourceError::Config("no location set".into()))?;
        let is_head = method == Method::HEAD;
        let mut request = InFlightRequest::new(method, url);
        let headers = &mut request.headers;

        if !settings.keep_alive {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }
        let agent = HeaderValue::from_str(&settings.user_agent)
            .map_err(|e| SourceError::Config(format!("user agent: {e}")))?;
        headers.insert(USER_AGENT, agent);
        if !settings.compress {
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        }
        if settings.iradio_mode {
            headers.insert(
                HeaderName::from_static(ICY_METADATA_HEADER),
                HeaderValue::from_static("1"),
            );
        }
        for cookie in &settings.cookies {
            headers.append(COOKIE, cookie.clone());
        }
        for (name, value) in &settings.extra_headers {
            headers.append(name.clone(), value.clone());
        }

        // The probe never consumes a pending time seek.
        let time_seek = !is_head && state.time_seek_pending;
        if time_seek {
            state.time_seek_pending = false;
            RangeRequestBuilder::apply_time_seek(headers, state.request_time);
        } else {
            settings
                .range
                .apply(headers, state.request_position, state.stop_position)?;
        }
        let range_requested = !time_seek && state.request_position > 0 && headers.contains_key(RANGE);

        Ok((request, range_requested, time_seek))
    }

    /// Issues one request and waits for its headers. On success a data
    /// request leaves its body on the state.
    ///
    /// A `seekability_check` HEAD stays outside the retry budget and its
    /// failures are swallowed.
    fn do_request(
        &self,
        state: &mut StateGuard<'_>,
        settings: &Settings,
        method: Method,
        seekability_check: bool,
    ) -> Result<(), Halt> {
        self.wait_idle(state)?;

        if !seekability_check {
            if !settings.retry.allows_attempt(state.retry_count) {
                return Err(Halt::Error(SourceError::RetriesExhausted {
                    attempts: state.retry_count,
                }));
            }
            state.retry_count += 1;
        }

        let is_head = method == Method::HEAD;
        if !is_head && state.stop_position == Some(state.request_position) {
            debug!("Reached end of segment at {}", state.request_position);
            return Err(Halt::Eos);
        }

        let (request, range_requested, time_seek) = self
            .build_request(state, settings, method)
            .map_err(Halt::Error)?;

        state.read_position = state.request_position;
        state.in_flight = Some(InFlight::Request(request.method.clone()));
        state.request_state = RequestState::RequestPending;

        if self.is_cancelled(state) {
            self.finish_in_flight(state);
            return Err(Halt::Flushing);
        }

        let session = match self.sessions.lock().current().cloned() {
            Some(session) => session,
            None => {
                self.finish_in_flight(state);
                return Err(Halt::Error(SourceError::Session("source is not started".into())));
            }
        };

        debug!(
            "{} {} (attempt {}, position {}, stop {:?})",
            request.method, request.url, state.retry_count, state.request_position, state.stop_position
        );
        let request_headers = dump_headers(&request.headers);
        let auth: Arc<dyn AuthHook> = match &self.auth {
            Some(hook) => hook.clone(),
            None => Arc::new(settings.auth_hook()),
        };
        let follow = settings.automatic_redirect;
        let timeout = settings.timeout();

        let result = MutexGuard::unlocked(state, || {
            wait(&self.canceller, None, async move {
                session.send(request, auth.as_ref(), follow, timeout).await
            })
        });

        self.finish_in_flight(state);

        let ctx = ExchangeContext {
            seekability_check,
            retry_count: state.retry_count,
            have_body: state.have_body,
            have_size: state.have_size,
            range_requested,
            time_seek_requested: time_seek,
        };

        let (outcome, exchange) = match result {
            Ok(Ok(exchange)) => (Outcome::Response(exchange.status()), Some(exchange)),
            Ok(Err(err)) => (Outcome::Transport(err.classify()), None),
            Err(WaitError::Cancelled) => (Outcome::Cancelled, None),
            Err(WaitError::Timeout(limit)) => (
                Outcome::Transport(SourceError::TransportTransient(format!(
                    "no response within {limit:?}"
                ))),
                None,
            ),
            Err(WaitError::Runtime(err)) => return Err(Halt::Error(err)),
        };

        if let Some(exchange) = &exchange {
            self.got_headers(state, settings, exchange, request_headers, time_seek);
        }

        match settings.retry.classify(outcome, &ctx) {
            Verdict::Proceed => match exchange {
                Some(exchange) if !is_head => {
                    state.body = Some(BodyReader::new(exchange.response));
                    state.request_state = RequestState::HeadersReceived;
                    Ok(())
                }
                _ if seekability_check => {
                    state.request_state = RequestState::Idle;
                    Ok(())
                }
                _ => {
                    // HEAD as the data method: the headers are all there is.
                    debug!("HEAD answered, nothing to stream");
                    state.retry_count = 0;
                    state.have_body = true;
                    state.request_state = RequestState::Idle;
                    Err(Halt::Eos)
                }
            },
            Verdict::Retry(err) => {
                state.request_state = RequestState::Idle;
                Err(Halt::Retry(err))
            }
            Verdict::Eos => {
                debug!("Range not satisfiable after a complete body, treating as EOS");
                state.request_state = RequestState::Idle;
                Err(Halt::Eos)
            }
            Verdict::Flushing => Err(Halt::Flushing),
            Verdict::Fail(err) => {
                let err = match exchange.as_ref().and_then(Exchange::reason_phrase) {
                    Some(reason) => err.with_reason(reason),
                    None => err,
                };
                if matches!(err, SourceError::SeekUnsupported { .. }) {
                    state.seekable = false;
                }
                state.request_state = RequestState::Idle;
                Err(Halt::Error(err))
            }
        }
    }

    /// Header bookkeeping for a response that arrived, whatever its status.
    fn got_headers(
        &self,
        state: &mut SourceState,
        settings: &Settings,
        exchange: &Exchange,
        request_headers: Vec<HeaderEntry>,
        time_seek: bool,
    ) {
        let status = exchange.status();
        if let Some(redirect) = &exchange.redirect {
            state.redirect = Some(redirect.clone());
        }

        self.events.post(SourceEvent::HttpHeaders(HttpHeadersDump {
            uri: exchange.request.url.to_string(),
            status: status.as_u16(),
            redirect_uri: state.redirect.as_ref().map(|r| r.uri.to_string()),
            request_headers,
            response_headers: dump_headers(exchange.response_headers()),
        }));

        // An unanswered challenge is not a real answer yet.
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            return;
        }
        state.got_headers = true;

        let mut info = None;
        if status.is_success() {
            let parsed = HeaderParser::new(settings.tag_encoding).parse(exchange.response_headers());
            trace!("Parsed response headers: {:?}", parsed);
            let effects = state.apply_response(&parsed, settings.seek_capability, time_seek);

            if effects.duration_changed {
                debug!("Content size is now {}", state.content_size);
                self.events.post(SourceEvent::DurationChanged {
                    content_size: state.content_size,
                });
            }
            if let Some(format) = effects.format {
                debug!("Format changed to {:?}", format);
                self.events.post(SourceEvent::FormatChanged(format));
            }
            if let Some(tags) = effects.tags {
                self.events.post(SourceEvent::Tags(tags));
            }
            info = Some(parsed);
        }

        let range = info.as_ref().and_then(|i| i.content_range);
        self.events.post(SourceEvent::GotHeaders {
            content_size: state.content_size,
            start: range.map(|r| r.start),
            end: range.map(|r| r.end),
            total: range.and_then(|r| r.total),
        });
    }

    /// Reads one block from the open body.
    fn read_buffer(&self, state: &mut StateGuard<'_>, settings: &Settings) -> Result<Buffer, Halt> {
        let Some(mut body) = state.body.take() else {
            return Err(Halt::Error(SourceError::Protocol(
                "response carries no body to read from".into(),
            )));
        };
        state.request_state = RequestState::Streaming;

        let blocksize = settings.blocksize;
        let timeout = settings.timeout();
        let result = MutexGuard::unlocked(state, || {
            wait(&self.canceller, None, body.read_block(blocksize, timeout))
        });

        let data = match result {
            Ok(Ok(data)) => data,
            Ok(Err(err)) => {
                let err = err.classify();
                debug!("Read failed at {}: {}", state.read_position, err);
                state.request_state = RequestState::Idle;
                return Err(Halt::Retry(err));
            }
            Err(WaitError::Cancelled) => return Err(Halt::Flushing),
            Err(WaitError::Timeout(limit)) => {
                return Err(Halt::Retry(SourceError::TransportTransient(format!(
                    "no data within {limit:?}"
                ))));
            }
            Err(WaitError::Runtime(err)) => return Err(Halt::Error(err)),
        };

        if data.is_empty() {
            state.request_state = RequestState::Idle;
            if state.have_size && state.read_position < state.content_size {
                return Err(Halt::Retry(SourceError::TransportTransient(format!(
                    "connection closed at {} of {} bytes",
                    state.read_position, state.content_size
                ))));
            }
            debug!("Body complete at {}", state.read_position);
            state.have_body = true;
            return Err(Halt::Eos);
        }

        let offset = state.read_position;
        if state.update_position(data.len() as u64) {
            self.events.post(SourceEvent::DurationChanged {
                content_size: state.content_size,
            });
        }
        state.retry_count = 0;
        self.events.post(SourceEvent::GotChunk { size: data.len() });
        trace!("Read {} bytes at {}", data.len(), offset);

        match state.stop_position {
            Some(stop) if state.read_position >= stop => {
                state.have_body = true;
                // Leave the connection clean for reuse.
                let probe = MutexGuard::unlocked(state, || {
                    wait(
                        &self.canceller,
                        None,
                        body.read_block(RANGE_DRAIN_PROBE_SIZE, timeout),
                    )
                });
                if let Ok(Ok(extra)) = probe {
                    if !extra.is_empty() {
                        error!(
                            "Range ending at {} delivered {} unexpected trailing bytes",
                            stop,
                            extra.len()
                        );
                    }
                }
                state.request_state = RequestState::Idle;
            }
            _ => state.body = Some(body),
        }

        Ok(Buffer::new(offset, data))
    }

    fn create_step(&self, state: &mut StateGuard<'_>, settings: &Settings) -> Result<Buffer, Halt> {
        if state.body.is_some() && state.seek_pending() {
            debug!(
                "Seek from {} to {} pending, dropping current body",
                state.read_position, state.request_position
            );
            state.body = None;
        }

        if self.is_cancelled(state) {
            return Err(Halt::Flushing);
        }

        if state.body.is_none() {
            let method = settings.method.clone().unwrap_or(Method::GET);
            self.do_request(state, settings, method, false)?;
        }

        self.read_buffer(state, settings)
    }

    /// Makes sure seekability is known, probing with one HEAD if nothing has
    /// answered yet.
    fn check_seekable(&self, state: &mut StateGuard<'_>, settings: &Settings) {
        if state.got_headers || !state.started {
            return;
        }

        let mut probed = false;
        loop {
            if self.is_cancelled(state) || state.got_headers {
                return;
            }
            if let Some(busy) = &state.in_flight {
                trace!("Waiting for {:?} before checking seekability", busy);
                self.have_headers.wait(state);
                continue;
            }
            if probed || state.body.is_some() {
                return;
            }

            probed = true;
            if let Err(halt) = self.do_request(state, settings, Method::HEAD, true) {
                debug!("Seekability probe ended with {:?}", halt);
            }
        }
    }

    fn session_close(&self, state: &mut SourceState) {
        state.body = None;
        self.finish_in_flight(state);
        self.sessions.lock().close();
    }
}

impl PushSource for HttpSrc {
    fn start(&self) -> Result<(), ErrorMessage> {
        let settings = self.settings();
        let mut state = self.state.lock();

        let Some(location) = settings.location.as_ref() else {
            let err = SourceError::Config("no location set".into());
            return Err(self.report(&state, &settings, &err));
        };
        info!("Starting source for {}", location);

        if let Err(err) = self.sessions.lock().open(&settings.session) {
            return Err(self.report(&state, &settings, &err));
        }

        state.reset();
        state.started = true;
        state.seekable = settings.seek_capability.initially_seekable();
        if let Some(hint) = settings.content_size_hint {
            state.content_size = hint;
            state.have_size = true;
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), ErrorMessage> {
        let keep_alive = self.settings.lock().keep_alive;
        let mut state = self.state.lock();
        debug!("Stopping");

        let shared = self
            .sessions
            .lock()
            .current()
            .is_some_and(|session| session.is_shared());
        if keep_alive && state.in_flight.is_none() && state.body.is_none() && !shared {
            debug!("Keeping session alive");
            self.canceller.lock().abort();
        } else {
            self.session_close(&mut state);
        }

        state.reset();
        self.canceller.lock().reset();
        Ok(())
    }

    fn create(&self) -> Result<Buffer, FlowError> {
        let settings = self.settings();
        let mut state = self.state.lock();

        loop {
            match self.create_step(&mut state, &settings) {
                Ok(buffer) => return Ok(buffer),
                Err(Halt::Retry(err)) => {
                    state.body = None;
                    let delay = settings.retry.delay_for_attempt(state.retry_count);
                    warn!(
                        "Retrying request (attempt {}) in {:?}: {}",
                        state.retry_count, delay, err
                    );
                    if delay.is_zero() {
                        continue;
                    }
                    state.in_flight = Some(InFlight::Backoff);
                    let slept = MutexGuard::unlocked(&mut state, || {
                        wait(&self.canceller, None, async move {
                            tokio::time::sleep(delay).await
                        })
                    });
                    self.finish_in_flight(&mut state);
                    if let Err(WaitError::Cancelled) = slept {
                        state.retry_count = 0;
                        return Err(FlowError::Flushing);
                    }
                }
                Err(Halt::Eos) => {
                    state.body = None;
                    return Err(FlowError::Eos);
                }
                Err(Halt::Flushing) => {
                    debug!("Flushing");
                    state.body = None;
                    state.retry_count = 0;
                    return Err(FlowError::Flushing);
                }
                Err(Halt::Error(err)) => {
                    state.body = None;
                    state.request_state = RequestState::Idle;
                    self.report(&state, &settings, &err);
                    return Err(FlowError::Error);
                }
            }
        }
    }

    fn seek(&self, segment: Segment) -> bool {
        let settings = self.settings();
        let capability = settings.seek_capability;
        let mut state = self.state.lock();

        let (start, stop) = match segment {
            Segment::Time { start, .. } if capability.allows_time() => {
                if state.read_position == 0 && start.is_zero() {
                    debug!("Time seek to 0 at position 0, nothing to do");
                    return true;
                }
                debug!("Time seek to {:?}", start);
                state.time_seek_pending = true;
                state.request_time = Some(start);
                return true;
            }
            Segment::Bytes { start, stop } => (start, stop),
            Segment::Time { .. } => {
                warn!("Time seeking is not supported by this server");
                return false;
            }
        };

        debug!("Seek to {}..{:?}", start, stop);
        if state.read_position == start
            && state.request_position == state.read_position
            && state.stop_position == stop
            && !state.time_seek_pending
        {
            debug!("Seek to current read/end position and no seek pending");
            return true;
        }

        self.check_seekable(&mut state, &settings);
        if state.got_headers && !state.seekable {
            warn!("Not seekable");
            return false;
        }
        if !capability.allows_bytes() {
            warn!("Byte seeking is not supported by this server");
            return false;
        }
        if state.have_size && start >= state.content_size {
            warn!(
                "Potentially seeking beyond end of file ({} >= {}), might EOS immediately",
                start, state.content_size
            );
        }

        state.request_position = start;
        state.stop_position = stop;
        true
    }

    fn is_seekable(&self) -> bool {
        let settings = self.settings();
        let mut state = self.state.lock();
        self.check_seekable(&mut state, &settings);
        state.seekable
    }

    fn size(&self) -> Option<u64> {
        let settings = self.settings();
        let mut state = self.state.lock();
        self.check_seekable(&mut state, &settings);
        state.have_size.then_some(state.content_size)
    }

    fn query(&self, query: Query) -> Option<QueryResponse> {
        match query {
            Query::Uri => {
                let uri = self.location()?;
                let state = self.state.lock();
                Some(QueryResponse::Uri(UriInfo {
                    uri,
                    redirect_uri: state.redirect.as_ref().map(|r| r.uri.to_string()),
                    permanent: state.redirect.as_ref().is_some_and(|r| r.permanent),
                }))
            }
            Query::Duration => {
                let state = self.state.lock();
                (state.have_size && state.content_size > 0)
                    .then_some(QueryResponse::Duration(state.content_size))
            }
            Query::Scheduling => Some(QueryResponse::Scheduling {
                bandwidth_limited: true,
            }),
        }
    }

    fn unlock(&self) {
        debug!("unlock()");
        self.canceller.lock().abort();
        let mut state = self.state.lock();
        state.request_state = RequestState::Cancelled;
        self.have_headers.notify_all();
    }

    fn unlock_stop(&self) {
        debug!("unlock_stop()");
        self.canceller.lock().reset();
        let mut state = self.state.lock();
        if state.request_state == RequestState::Cancelled {
            state.request_state = RequestState::Idle;
        }
    }
}
