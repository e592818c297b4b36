use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::header::{HeaderMap, HeaderValue, PROXY_AUTHENTICATE, WWW_AUTHENTICATE};
use url::Url;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Both halves have to be configured for credentials to be usable.
    pub fn from_parts(user: Option<&str>, password: Option<&str>) -> Option<Self> {
        match (user, password) {
            (Some(u), Some(p)) => Some(Self::new(u, p)),
            _ => None,
        }
    }

    pub fn basic_header(&self) -> Option<HeaderValue> {
        let token = STANDARD.encode(format!("{}:{}", self.user, self.password));
        let mut value = HeaderValue::from_str(&format!("Basic {token}")).ok()?;
        value.set_sensitive(true);
        Some(value)
    }
}

/// A 401 or 407 received while sending a request.
#[derive(Debug, Clone)]
pub struct AuthChallenge<'a> {
    pub url: &'a Url,
    /// 407 from a proxy rather than 401 from the origin.
    pub proxy: bool,
    /// The request being answered already carried credentials for this
    /// challenge.
    pub retrying: bool,
    /// First token of `WWW-Authenticate` / `Proxy-Authenticate`.
    pub scheme: Option<String>,
    pub realm: Option<String>,
}

impl<'a> AuthChallenge<'a> {
    pub fn from_response(url: &'a Url, proxy: bool, retrying: bool, headers: &HeaderMap) -> Self {
        let name = if proxy {
            PROXY_AUTHENTICATE
        } else {
            WWW_AUTHENTICATE
        };
        let raw = headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("");
        let scheme = raw.split_whitespace().next().map(str::to_string);
        let realm = raw.split("realm=").nth(1).map(|rest| {
            rest.trim_start_matches('"')
                .split(['"', ','])
                .next()
                .unwrap_or_default()
                .to_string()
        });

        Self {
            url,
            proxy,
            retrying,
            scheme,
            realm,
        }
    }
}

/// Decides which credentials answer an authentication challenge.
///
/// Called synchronously while a request is being sent, only for the request
/// that received the challenge.
pub trait AuthHook: Send + Sync {
    fn authenticate(&self, challenge: &AuthChallenge<'_>) -> Option<Credentials>;
}

/// Answers each challenge once with the configured user or proxy
/// credentials, and never on the replay.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredCredentials {
    pub user: Option<Credentials>,
    pub proxy: Option<Credentials>,
}

impl AuthHook for ConfiguredCredentials {
    fn authenticate(&self, challenge: &AuthChallenge<'_>) -> Option<Credentials> {
        if challenge.retrying {
            return None;
        }
        if challenge.proxy {
            self.proxy.clone()
        } else {
            self.user.clone()
        }
    }
}
