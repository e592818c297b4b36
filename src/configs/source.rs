use std::path::PathBuf;

use reqwest::{
    Method,
    header::{HeaderName, HeaderValue},
};
use serde::{Deserialize, Serialize};

use crate::{common::SourceError, source::constants::*};

/// What the serving side advertised about seeking before any request was
/// made (typically learned from a DLNA `opval`).
#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SeekCapability {
    /// Nothing known; response headers decide.
    #[default]
    Unknown,
    None,
    Bytes,
    Time,
    BytesAndTime,
}

impl SeekCapability {
    pub fn allows_time(self) -> bool {
        matches!(self, Self::Time | Self::BytesAndTime)
    }

    pub fn allows_bytes(self) -> bool {
        !matches!(self, Self::None | Self::Time)
    }

    /// Seekability assumed at start, before any header arrived.
    pub fn initially_seekable(self) -> bool {
        !matches!(self, Self::Unknown | Self::None)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum HeaderValues {
    One(String),
    Many(Vec<String>),
}

impl HeaderValues {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            Self::One(v) => std::slice::from_ref(v),
            Self::Many(vs) => vs,
        };
        values.iter().map(String::as_str)
    }
}

/// One `extra-headers` entry. A list value produces one header line per
/// element, in order.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ExtraHeader {
    pub name: String,
    pub value: HeaderValues,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct SourceConfig {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_true")]
    pub automatic_redirect: bool,
    /// Defaults to `$http_proxy`. An empty string disables the proxy.
    #[serde(default = "default_proxy")]
    pub proxy: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_pw: Option<String>,
    #[serde(default)]
    pub proxy_id: Option<String>,
    #[serde(default)]
    pub proxy_pw: Option<String>,
    #[serde(default)]
    pub cookies: Vec<String>,
    #[serde(default)]
    pub is_live: bool,
    /// Seconds, 0 disables the timeout.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub extra_headers: Vec<ExtraHeader>,
    #[serde(default = "default_true")]
    pub iradio_mode: bool,
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub keep_alive: bool,
    #[serde(default = "default_true")]
    pub ssl_strict: bool,
    #[serde(default)]
    pub ssl_ca_file: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub ssl_use_system_ca_file: bool,
    /// PEM bundle that replaces every other trust setting.
    #[serde(default)]
    pub tls_database: Option<PathBuf>,
    /// -1 retries forever.
    #[serde(default = "default_retries")]
    pub retries: i32,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub start_offset: u64,
    #[serde(default)]
    pub end_offset: u64,
    #[serde(default = "default_blocksize")]
    pub blocksize: usize,
    #[serde(default)]
    pub seek_capability: SeekCapability,
    #[serde(default)]
    pub content_size_hint: Option<u64>,
    #[serde(default)]
    pub tolerate_ignored_range: bool,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_icy_tag_encoding")]
    pub icy_tag_encoding: String,
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_proxy() -> Option<String> {
    std::env::var("http_proxy").ok().filter(|p| !p.is_empty())
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_retries() -> i32 {
    DEFAULT_RETRIES
}

fn default_blocksize() -> usize {
    DEFAULT_BLOCKSIZE
}

fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

fn default_icy_tag_encoding() -> String {
    DEFAULT_ICY_TAG_ENCODING.to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            location: None,
            user_agent: default_user_agent(),
            automatic_redirect: true,
            proxy: default_proxy(),
            user_id: None,
            user_pw: None,
            proxy_id: None,
            proxy_pw: None,
            cookies: Vec::new(),
            is_live: false,
            timeout: default_timeout(),
            extra_headers: Vec::new(),
            iradio_mode: true,
            compress: false,
            keep_alive: false,
            ssl_strict: true,
            ssl_ca_file: None,
            ssl_use_system_ca_file: true,
            tls_database: None,
            retries: default_retries(),
            method: None,
            start_offset: 0,
            end_offset: 0,
            blocksize: default_blocksize(),
            seek_capability: SeekCapability::Unknown,
            content_size_hint: None,
            tolerate_ignored_range: false,
            retry_backoff_ms: default_retry_backoff_ms(),
            icy_tag_encoding: default_icy_tag_encoding(),
        }
    }
}

impl SourceConfig {
    pub fn with_location(location: impl Into<String>) -> Self {
        Self {
            location: Some(location.into()),
            ..Self::default()
        }
    }

    /// Rejects values that would only fail later, mid-stream.
    pub fn validate(&self) -> Result<(), SourceError> {
        if self.end_offset > 0 && self.start_offset > self.end_offset {
            return Err(SourceError::InvalidRange {
                start: self.start_offset,
                end: self.end_offset,
            });
        }
        if self.retries < -1 {
            return Err(SourceError::Config(format!(
                "retries must be -1 or positive, got {}",
                self.retries
            )));
        }
        if self.blocksize == 0 {
            return Err(SourceError::Config("blocksize must be positive".into()));
        }
        if let Some(method) = &self.method {
            Method::from_bytes(method.as_bytes())
                .map_err(|_| SourceError::Config(format!("invalid method '{method}'")))?;
        }
        for header in &self.extra_headers {
            HeaderName::from_bytes(header.name.as_bytes()).map_err(|_| {
                SourceError::Config(format!("invalid header name '{}'", header.name))
            })?;
            for value in header.value.iter() {
                HeaderValue::from_str(value).map_err(|_| {
                    SourceError::Config(format!("invalid value for header '{}'", header.name))
                })?;
            }
        }
        for cookie in &self.cookies {
            HeaderValue::from_str(cookie)
                .map_err(|_| SourceError::Config(format!("invalid cookie '{cookie}'")))?;
        }
        Ok(())
    }
}
