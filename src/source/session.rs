//! HTTP client sessions and how sources share them.
//!
//! A [`Session`] wraps one `reqwest::Client` (connection pool, cookie jar,
//! TLS and proxy setup). Sources whose network settings are all defaults
//! share one session through a [`SessionProvider`]; anything else gets a
//! private session that dies with its source.

use std::{
    path::PathBuf,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use reqwest::{
    Method, StatusCode,
    header::{AUTHORIZATION, LOCATION, PROXY_AUTHORIZATION},
};
use tracing::{debug, trace};
use url::Url;

use super::{
    auth::{AuthChallenge, AuthHook, Credentials},
    constants::{DEFAULT_TIMEOUT_SECS, MAX_REDIRECTS},
    request::{Exchange, ExchangeError, InFlightRequest, RedirectRecord},
};
use crate::common::SourceError;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Network settings that shape a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub timeout: Option<Duration>,
    pub ssl_strict: bool,
    pub ssl_ca_file: Option<PathBuf>,
    pub ssl_use_system_ca: bool,
    pub tls_database: Option<PathBuf>,
    pub proxy: Option<Url>,
    pub proxy_credentials: Option<Credentials>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            ssl_strict: true,
            ssl_ca_file: None,
            ssl_use_system_ca: true,
            tls_database: None,
            proxy: None,
            proxy_credentials: None,
        }
    }
}

impl SessionSettings {
    /// Only sessions built from default settings may be shared.
    pub fn is_shareable(&self) -> bool {
        let defaults = Self::default();
        self.timeout == defaults.timeout
            && self.ssl_strict == defaults.ssl_strict
            && self.ssl_use_system_ca == defaults.ssl_use_system_ca
            && self.ssl_ca_file.is_none()
            && self.tls_database.is_none()
            && self.proxy.is_none()
    }

    fn build_client(&self) -> Result<reqwest::Client, SourceError> {
        let mut builder = reqwest::Client::builder()
            // Redirects and auth are handled in `Session::send`.
            .redirect(reqwest::redirect::Policy::none())
            .cookie_store(true)
            .tcp_nodelay(true)
            .tcp_keepalive(Duration::from_secs(25))
            .danger_accept_invalid_certs(!self.ssl_strict);

        if let Some(timeout) = self.timeout {
            builder = builder.connect_timeout(timeout);
        }

        // tls-database > ssl-ca-file > system store
        match self.tls_database.as_ref().or(self.ssl_ca_file.as_ref()) {
            Some(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    SourceError::Session(format!("reading {}: {e}", path.display()))
                })?;
                let certs = reqwest::Certificate::from_pem_bundle(&pem)
                    .map_err(|e| SourceError::Session(format!("{}: {e}", path.display())))?;
                builder = builder.tls_built_in_root_certs(false);
                for cert in certs {
                    builder = builder.add_root_certificate(cert);
                }
            }
            None => builder = builder.tls_built_in_root_certs(self.ssl_use_system_ca),
        }

        match &self.proxy {
            Some(url) => {
                let mut proxy = reqwest::Proxy::all(url.as_str())
                    .map_err(|e| SourceError::Session(format!("proxy {url}: {e}")))?;
                if let Some(creds) = &self.proxy_credentials {
                    proxy = proxy.basic_auth(&creds.user, &creds.password);
                }
                builder = builder.proxy(proxy);
            }
            None => builder = builder.no_proxy(),
        }

        builder
            .build()
            .map_err(|e| SourceError::Session(e.to_string()))
    }
}

#[derive(Debug)]
struct SessionInner {
    id: u64,
    client: reqwest::Client,
    shared: bool,
}

/// Reference-counted handle to an HTTP client.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(settings: &SessionSettings, shared: bool) -> Result<Self, SourceError> {
        let client = settings.build_client()?;
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        debug!("Created {} session {}", if shared { "shared" } else { "private" }, id);
        Ok(Self {
            inner: Arc::new(SessionInner { id, client, shared }),
        })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_shared(&self) -> bool {
        self.inner.shared
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.inner.client
    }

    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    async fn dispatch(
        &self,
        request: &InFlightRequest,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, ExchangeError> {
        let send = self
            .inner
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .send();

        match timeout {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .map_err(|_| ExchangeError::Timeout(limit))?
                .map_err(ExchangeError::from),
            None => send.await.map_err(ExchangeError::from),
        }
    }

    /// Sends `request` until a response that is neither an answered
    /// authentication challenge nor a followed redirect comes back.
    ///
    /// `auth` is consulted at most once per challenge kind; the replay that
    /// carries the credentials is marked as retrying.
    pub async fn send(
        &self,
        request: InFlightRequest,
        auth: &dyn AuthHook,
        follow_redirects: bool,
        timeout: Option<Duration>,
    ) -> Result<Exchange, ExchangeError> {
        let mut current = request;
        let mut redirect = None;
        let mut answered_origin = false;
        let mut answered_proxy = false;

        for _ in 0..=MAX_REDIRECTS {
            let response = self.dispatch(&current, timeout).await?;
            let status = response.status();
            trace!("{} {} -> {}", current.method, current.url, status);

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::PROXY_AUTHENTICATION_REQUIRED
            {
                let proxy = status == StatusCode::PROXY_AUTHENTICATION_REQUIRED;
                let retrying = if proxy { answered_proxy } else { answered_origin };
                let challenge =
                    AuthChallenge::from_response(&current.url, proxy, retrying, response.headers());

                if let Some(value) = auth
                    .authenticate(&challenge)
                    .and_then(|creds| creds.basic_header())
                {
                    debug!(
                        "Answering {} challenge for {}",
                        if proxy { "proxy" } else { "origin" },
                        current.url
                    );
                    if proxy {
                        answered_proxy = true;
                        current.headers.insert(PROXY_AUTHORIZATION, value);
                    } else {
                        answered_origin = true;
                        current.headers.insert(AUTHORIZATION, value);
                    }
                    continue;
                }

                return Ok(Exchange {
                    request: current,
                    response,
                    redirect,
                });
            }

            let location = response
                .headers()
                .get(LOCATION)
                .map(|v| v.to_str().map(str::to_string));
            let follow = follow_redirects
                && status.is_redirection()
                && status != StatusCode::NOT_MODIFIED
                && location.is_some();

            if !follow {
                return Ok(Exchange {
                    request: current,
                    response,
                    redirect,
                });
            }

            let target = location
                .and_then(Result::ok)
                .and_then(|loc| current.url.join(&loc).ok())
                .ok_or_else(|| ExchangeError::BadRedirect(current.url.to_string()))?;

            let switch_to_get = match status {
                StatusCode::SEE_OTHER => current.method != Method::HEAD,
                StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => current.method == Method::POST,
                _ => false,
            };
            if switch_to_get {
                current.method = Method::GET;
            }

            if target.origin() != current.url.origin() {
                current.headers.remove(AUTHORIZATION);
                answered_origin = false;
            }

            debug!("Redirected ({}) from {} to {}", status, current.url, target);
            redirect = Some(RedirectRecord {
                uri: target.clone(),
                permanent: matches!(
                    status,
                    StatusCode::MOVED_PERMANENTLY | StatusCode::PERMANENT_REDIRECT
                ),
            });
            current.url = target;
        }

        Err(ExchangeError::TooManyRedirects)
    }
}

/// Source of sessions shared between sources.
pub trait SessionProvider: Send + Sync {
    /// A session the application insists on, used whatever the settings.
    fn forced_session(&self) -> Option<Session> {
        None
    }

    /// The currently published shared session, if still alive.
    fn shared_session(&self) -> Option<Session>;

    fn publish(&self, session: &Session);
}

/// Default provider. Holds the shared session weakly so it is released with
/// the last source using it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    shared: Mutex<Weak<SessionInner>>,
    forced: Option<Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every source opened through this registry uses `session`.
    pub fn forced(session: Session) -> Self {
        Self {
            shared: Mutex::new(Weak::new()),
            forced: Some(session),
        }
    }
}

impl SessionProvider for SessionRegistry {
    fn forced_session(&self) -> Option<Session> {
        self.forced.clone()
    }

    fn shared_session(&self) -> Option<Session> {
        self.shared.lock().upgrade().map(|inner| Session { inner })
    }

    fn publish(&self, session: &Session) {
        *self.shared.lock() = Arc::downgrade(&session.inner);
    }
}

/// Per-source session ownership.
pub struct SessionManager {
    provider: Arc<dyn SessionProvider>,
    session: Option<Session>,
}

impl SessionManager {
    pub fn new(provider: Arc<dyn SessionProvider>) -> Self {
        Self {
            provider,
            session: None,
        }
    }

    pub fn current(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn open(&mut self, settings: &SessionSettings) -> Result<Session, SourceError> {
        if let Some(session) = &self.session {
            debug!("Re-using session {}", session.id());
            return Ok(session.clone());
        }

        let session = if let Some(forced) = self.provider.forced_session() {
            debug!("Using forced session {}", forced.id());
            forced
        } else if settings.is_shareable() {
            match self.provider.shared_session() {
                Some(shared) => {
                    debug!("Using shared session {}", shared.id());
                    shared
                }
                None => {
                    let session = Session::new(settings, true)?;
                    self.provider.publish(&session);
                    session
                }
            }
        } else {
            Session::new(settings, false)?
        };

        self.session = Some(session.clone());
        Ok(session)
    }

    /// Drops this source's reference. A private session's pool goes away
    /// with it; a shared one stays alive for the other holders.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            if session.is_shared() {
                debug!("Releasing shared session {}", session.id());
            } else {
                debug!("Aborting private session {}", session.id());
            }
        }
    }
}
