use std::time::Duration;

use reqwest::{
    Method,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use url::Url;

use super::{
    auth::{ConfiguredCredentials, Credentials},
    constants::LIBRARY_USER_AGENT,
    headers::TagEncoding,
    range::RangeRequestBuilder,
    retry::RetryPolicy,
    session::SessionSettings,
};
use crate::{
    common::SourceError,
    configs::{SeekCapability, SourceConfig},
};

const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "icy", "icyx"];

/// Validated, typed form of [`SourceConfig`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub location: Option<Url>,
    pub user_agent: String,
    pub automatic_redirect: bool,
    pub user_credentials: Option<Credentials>,
    pub proxy_credentials: Option<Credentials>,
    pub cookies: Vec<HeaderValue>,
    pub is_live: bool,
    pub extra_headers: HeaderMap,
    pub iradio_mode: bool,
    pub compress: bool,
    pub keep_alive: bool,
    pub method: Option<Method>,
    pub blocksize: usize,
    pub seek_capability: SeekCapability,
    pub content_size_hint: Option<u64>,
    pub tag_encoding: TagEncoding,
    pub range: RangeRequestBuilder,
    pub retry: RetryPolicy,
    pub session: SessionSettings,
}

impl Settings {
    pub fn timeout(&self) -> Option<Duration> {
        self.session.timeout
    }

    pub fn auth_hook(&self) -> ConfiguredCredentials {
        ConfiguredCredentials {
            user: self.user_credentials.clone(),
            proxy: self.proxy_credentials.clone(),
        }
    }
}

/// `icy://` and `icyx://` are plain HTTP underneath.
pub fn parse_location(location: &str) -> Result<Url, SourceError> {
    let location = location.trim();
    if location.is_empty() {
        return Err(SourceError::Config("empty location".into()));
    }

    let rewritten = ["icy://", "icyx://"]
        .iter()
        .find_map(|prefix| {
            location
                .get(..prefix.len())
                .filter(|head| head.eq_ignore_ascii_case(prefix))
                .map(|_| format!("http://{}", &location[prefix.len()..]))
        })
        .unwrap_or_else(|| location.to_string());

    let url = Url::parse(&rewritten)
        .map_err(|e| SourceError::Config(format!("invalid location '{location}': {e}")))?;

    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(SourceError::Config(format!(
            "unsupported URI scheme '{}'",
            url.scheme()
        )));
    }
    Ok(url)
}

/// Proxies given without a scheme are taken as HTTP proxies.
pub fn parse_proxy(proxy: &str) -> Result<Option<Url>, SourceError> {
    let proxy = proxy.trim();
    if proxy.is_empty() {
        return Ok(None);
    }
    let with_scheme = if proxy.contains("://") {
        proxy.to_string()
    } else {
        format!("http://{proxy}")
    };
    Url::parse(&with_scheme)
        .map(Some)
        .map_err(|e| SourceError::Config(format!("invalid proxy '{proxy}': {e}")))
}

/// Empty agents get the library name; agents ending in a space get it
/// appended.
pub fn resolve_user_agent(user_agent: &str) -> String {
    if user_agent.is_empty() {
        LIBRARY_USER_AGENT.to_string()
    } else if user_agent.ends_with(' ') {
        format!("{user_agent}{LIBRARY_USER_AGENT}")
    } else {
        user_agent.to_string()
    }
}

impl TryFrom<&SourceConfig> for Settings {
    type Error = SourceError;

    fn try_from(config: &SourceConfig) -> Result<Self, Self::Error> {
        config.validate()?;

        let location = config
            .location
            .as_deref()
            .map(parse_location)
            .transpose()?;

        let proxy = match config.proxy.as_deref() {
            Some(p) => parse_proxy(p)?,
            None => None,
        };

        let mut extra_headers = HeaderMap::new();
        for header in &config.extra_headers {
            let name = HeaderName::from_bytes(header.name.as_bytes())
                .map_err(|e| SourceError::Config(format!("header '{}': {e}", header.name)))?;
            for value in header.value.iter() {
                let value = HeaderValue::from_str(value)
                    .map_err(|e| SourceError::Config(format!("header '{}': {e}", header.name)))?;
                extra_headers.append(name.clone(), value);
            }
        }

        let cookies = config
            .cookies
            .iter()
            .map(|c| {
                HeaderValue::from_str(c)
                    .map_err(|e| SourceError::Config(format!("cookie '{c}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let method = config
            .method
            .as_deref()
            .map(|m| {
                Method::from_bytes(m.as_bytes())
                    .map_err(|_| SourceError::Config(format!("invalid method '{m}'")))
            })
            .transpose()?;

        let tag_encoding = TagEncoding::from_label(&config.icy_tag_encoding).ok_or_else(|| {
            SourceError::Config(format!(
                "unknown tag encoding '{}'",
                config.icy_tag_encoding
            ))
        })?;

        let proxy_credentials =
            Credentials::from_parts(config.proxy_id.as_deref(), config.proxy_pw.as_deref());

        Ok(Self {
            location,
            user_agent: resolve_user_agent(&config.user_agent),
            automatic_redirect: config.automatic_redirect,
            user_credentials: Credentials::from_parts(
                config.user_id.as_deref(),
                config.user_pw.as_deref(),
            ),
            proxy_credentials: proxy_credentials.clone(),
            cookies,
            is_live: config.is_live,
            extra_headers,
            iradio_mode: config.iradio_mode,
            compress: config.compress,
            keep_alive: config.keep_alive,
            method,
            blocksize: config.blocksize,
            seek_capability: config.seek_capability,
            content_size_hint: config.content_size_hint,
            tag_encoding,
            range: RangeRequestBuilder::new(config.start_offset, config.end_offset),
            retry: RetryPolicy::new(
                config.retries,
                Duration::from_millis(config.retry_backoff_ms),
            )
            .tolerate_ignored_range(config.tolerate_ignored_range),
            session: SessionSettings {
                timeout: (config.timeout > 0).then(|| Duration::from_secs(config.timeout)),
                ssl_strict: config.ssl_strict,
                ssl_ca_file: config.ssl_ca_file.clone(),
                ssl_use_system_ca: config.ssl_use_system_ca_file,
                tls_database: config.tls_database.clone(),
                proxy,
                proxy_credentials,
            },
        })
    }
}
