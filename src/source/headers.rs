//! Response header interpretation.
//!
//! Everything here is pure: [`HeaderParser::parse`] turns a header map into a
//! [`ResponseInfo`] and the state machine decides what to do with it.

use std::sync::LazyLock;

use headers::{ContentLength, HeaderMapExt, TransferEncoding};
use regex::Regex;
use reqwest::header::{ACCEPT_RANGES, CONTENT_RANGE, CONTENT_TYPE, HeaderMap};
use serde::Serialize;

use super::constants::{
    ICY_GENRE_HEADER, ICY_METAINT_HEADER, ICY_NAME_HEADER, ICY_URL_HEADER, TIME_SEEK_RANGE_HEADER,
};

/// `bytes <start>-<end>[/<total>]`, also accepting `=` after `bytes`.
static BYTE_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"bytes[ =]\s*(\d+)\s*-\s*(\d+)\s*(?:/\s*(\d+|\*))?").unwrap()
});

const L16_DEFAULT_CHANNELS: u32 = 2;
const L16_DEFAULT_RATE: u32 = 44_100;
const L16_MAX_CHANNELS: u32 = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
    /// `None` when the server sent `*` or omitted the total.
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AcceptRanges {
    #[default]
    Unknown,
    Bytes,
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IcyInfo {
    pub metadata_interval: Option<u32>,
    pub name: Option<String>,
    pub genre: Option<String>,
    pub url: Option<String>,
}

/// Output format implied by the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StreamFormat {
    /// Metadata interleaved every `metadata_interval` bytes.
    Icy {
        metadata_interval: u32,
        content_type: Option<String>,
    },
    /// Big-endian signed 16 bit interleaved PCM.
    RawAudio { channels: u32, rate: u32 },
    Other { content_type: String },
}

impl StreamFormat {
    /// Merges a plain content type into an already known format.
    pub fn with_content_type(self, content_type: &str) -> Self {
        match self {
            Self::Icy {
                metadata_interval, ..
            } => Self::Icy {
                metadata_interval,
                content_type: Some(content_type.to_string()),
            },
            Self::RawAudio { .. } | Self::Other { .. } => Self::Other {
                content_type: content_type.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentType {
    L16 { channels: u32, rate: u32 },
    Other(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseInfo {
    /// Only set for non-chunked responses.
    pub content_length: Option<u64>,
    pub content_range: Option<ByteRange>,
    pub accept_ranges: AcceptRanges,
    pub icy: IcyInfo,
    pub content_type: Option<ContentType>,
    /// Byte clause of a `TimeSeekRange.dlna.org` response header.
    pub time_seek_range: Option<ByteRange>,
    pub chunked: bool,
}

impl ResponseInfo {
    pub fn has_icy_tags(&self) -> bool {
        self.icy.name.is_some() || self.icy.genre.is_some() || self.icy.url.is_some()
    }
}

/// Legacy charset used to decode Icecast header text that is not UTF-8.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TagEncoding {
    #[default]
    Latin1,
    /// Invalid sequences are replaced.
    Utf8Lossy,
}

impl TagEncoding {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" | "l1" => Some(Self::Latin1),
            "utf-8" | "utf8" => Some(Self::Utf8Lossy),
            _ => None,
        }
    }

    /// Valid UTF-8 passes through untouched; anything else is decoded with
    /// this encoding.
    pub fn decode(self, raw: &[u8]) -> String {
        if let Ok(s) = std::str::from_utf8(raw) {
            return s.to_string();
        }
        match self {
            Self::Latin1 => raw.iter().map(|&b| char::from(b)).collect(),
            Self::Utf8Lossy => String::from_utf8_lossy(raw).into_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderParser {
    tag_encoding: TagEncoding,
}

impl HeaderParser {
    pub fn new(tag_encoding: TagEncoding) -> Self {
        Self { tag_encoding }
    }

    pub fn parse(&self, headers: &HeaderMap) -> ResponseInfo {
        let chunked = headers
            .typed_get::<TransferEncoding>()
            .is_some_and(|te| te.is_chunked());

        let content_length = if chunked {
            None
        } else {
            headers.typed_get::<ContentLength>().map(|ContentLength(n)| n)
        };

        let content_range = headers
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_byte_range);

        let accept_ranges = match headers.get(ACCEPT_RANGES).and_then(|v| v.to_str().ok()) {
            Some(v) if v.trim().eq_ignore_ascii_case("none") => AcceptRanges::None,
            Some(v) if v.to_ascii_lowercase().contains("bytes") => AcceptRanges::Bytes,
            _ => AcceptRanges::Unknown,
        };

        let time_seek_range = headers
            .get(TIME_SEEK_RANGE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_byte_range);

        let icy = IcyInfo {
            metadata_interval: headers
                .get(ICY_METAINT_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u32>().ok())
                .filter(|&n| n > 0),
            name: self.icy_text(headers, ICY_NAME_HEADER),
            genre: self.icy_text(headers, ICY_GENRE_HEADER),
            url: self.icy_text(headers, ICY_URL_HEADER),
        };

        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(parse_content_type);

        ResponseInfo {
            content_length,
            content_range,
            accept_ranges,
            icy,
            content_type,
            time_seek_range,
            chunked,
        }
    }

    fn icy_text(&self, headers: &HeaderMap, name: &str) -> Option<String> {
        let raw = headers.get(name)?.as_bytes();
        let text = self.tag_encoding.decode(raw);
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

/// Parses `bytes <start>-<end>[/<total>]` out of any header value, e.g. a
/// `Content-Range` or the byte clause of a time-seek response.
pub fn parse_byte_range(value: &str) -> Option<ByteRange> {
    let caps = BYTE_RANGE_RE.captures(value)?;
    let start = caps.get(1)?.as_str().parse().ok()?;
    let end = caps.get(2)?.as_str().parse().ok()?;
    let total = caps
        .get(3)
        .and_then(|m| m.as_str().parse::<u64>().ok());

    Some(ByteRange { start, end, total })
}

fn parse_content_type(value: &str) -> ContentType {
    let Ok(mime) = value.parse::<mime::Mime>() else {
        return ContentType::Other(value.to_string());
    };

    if mime.type_() != mime::AUDIO || !mime.subtype().as_str().eq_ignore_ascii_case("l16") {
        return ContentType::Other(value.to_string());
    }

    let channels = mime
        .get_param("channels")
        .map(|v| v.as_str().parse::<u32>().unwrap_or(0))
        .unwrap_or(L16_DEFAULT_CHANNELS);
    let channels = if channels > L16_MAX_CHANNELS { 0 } else { channels };

    let rate = mime
        .get_param("rate")
        .map(|v| v.as_str().parse::<u32>().unwrap_or(0))
        .unwrap_or(L16_DEFAULT_RATE);

    ContentType::L16 { channels, rate }
}
