//! Defaults and tuning numbers for the HTTP source.

// ── Defaults ─────────────────────────────────────────────────────────────────

/// Library identifier, also appended to user agents that end in a space.
pub const LIBRARY_USER_AGENT: &str = concat!("httpsrc/", env!("CARGO_PKG_VERSION"));

/// Default user agent; the trailing space asks for the library suffix.
pub const DEFAULT_USER_AGENT: &str = "httpsrc (compatible) ";

/// Seconds of socket inactivity before a send or read is abandoned.
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

pub const DEFAULT_RETRIES: i32 = 2;

/// Bytes requested from the body per pull (24 KiB).
pub const DEFAULT_BLOCKSIZE: usize = 24 * 1_024;

/// Base delay between retries, doubled per attempt.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;

/// Encoding assumed for Icecast header text that is not valid UTF-8.
pub const DEFAULT_ICY_TAG_ENCODING: &str = "iso-8859-1";

// ── Retry ────────────────────────────────────────────────────────────────────

/// Highest exponent applied to the backoff base (8x).
pub const MAX_BACKOFF_EXPONENT: u32 = 3;

// ── Streaming ────────────────────────────────────────────────────────────────

/// Bytes read after a bounded range completes, to leave the connection clean.
pub const RANGE_DRAIN_PROBE_SIZE: usize = 128;

/// Redirect hops followed before the exchange is treated as malformed.
pub const MAX_REDIRECTS: usize = 20;

// ── Header names ─────────────────────────────────────────────────────────────

pub const TIME_SEEK_RANGE_HEADER: &str = "timeseekrange.dlna.org";
pub const ICY_METADATA_HEADER: &str = "icy-metadata";
pub const ICY_METAINT_HEADER: &str = "icy-metaint";
pub const ICY_NAME_HEADER: &str = "icy-name";
pub const ICY_GENRE_HEADER: &str = "icy-genre";
pub const ICY_URL_HEADER: &str = "icy-url";

/// NPT value used when a time cannot be expressed.
pub const NPT_INVALID: &str = "99:99:99.999";
