use reqwest::header::HeaderMap;
use serde::Serialize;

use super::headers::StreamFormat;
use crate::common::ErrorMessage;

/// A header and its value(s); repeated names collapse into one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderEntry {
    pub name: String,
    pub value: HeaderField,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum HeaderField {
    Single(String),
    Multiple(Vec<String>),
}

pub fn dump_headers(headers: &HeaderMap) -> Vec<HeaderEntry> {
    headers
        .keys()
        .map(|name| {
            let mut values: Vec<String> = headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect();
            let value = if values.len() == 1 {
                HeaderField::Single(values.remove(0))
            } else {
                HeaderField::Multiple(values)
            };
            HeaderEntry {
                name: name.as_str().to_string(),
                value,
            }
        })
        .collect()
}

/// The request and response headers of one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpHeadersDump {
    pub uri: String,
    pub status: u16,
    pub redirect_uri: Option<String>,
    pub request_headers: Vec<HeaderEntry>,
    pub response_headers: Vec<HeaderEntry>,
}

impl HttpHeadersDump {
    pub fn response_header(&self, name: &str) -> Option<&HeaderField> {
        self.response_headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| &h.value)
    }

    pub fn request_header(&self, name: &str) -> Option<&HeaderField> {
        self.request_headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| &h.value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Tags {
    pub organization: Option<String>,
    pub genre: Option<String>,
    pub location: Option<String>,
}

/// Notifications posted to the host while the source runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SourceEvent {
    /// Content size as known after this response, plus the Content-Range.
    GotHeaders {
        content_size: u64,
        start: Option<u64>,
        end: Option<u64>,
        total: Option<u64>,
    },
    GotChunk {
        size: usize,
    },
    HttpHeaders(HttpHeadersDump),
    Tags(Tags),
    DurationChanged {
        content_size: u64,
    },
    FormatChanged(StreamFormat),
    Error(ErrorMessage),
}

pub trait EventSink: Send + Sync {
    fn post(&self, event: SourceEvent);
}

impl EventSink for flume::Sender<SourceEvent> {
    fn post(&self, event: SourceEvent) {
        // A host that dropped its receiver no longer cares.
        let _ = self.send(event);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn post(&self, _event: SourceEvent) {}
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    #[test]
    fn repeated_headers_become_lists() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        headers.append("content-type", HeaderValue::from_static("audio/mpeg"));

        let dump = dump_headers(&headers);
        let cookie = dump.iter().find(|h| h.name == "set-cookie").unwrap();
        assert_eq!(
            cookie.value,
            HeaderField::Multiple(vec!["a=1".into(), "b=2".into()])
        );
        let ct = dump.iter().find(|h| h.name == "content-type").unwrap();
        assert_eq!(ct.value, HeaderField::Single("audio/mpeg".into()));
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let json = serde_json::to_value(SourceEvent::GotChunk { size: 12 }).unwrap();
        assert_eq!(json["event"], "got-chunk");
        assert_eq!(json["size"], 12);
    }

    #[test]
    fn flume_sink_delivers() {
        let (tx, rx) = flume::unbounded();
        tx.post(SourceEvent::DurationChanged { content_size: 10 });
        assert_eq!(
            rx.try_recv().unwrap(),
            SourceEvent::DurationChanged { content_size: 10 }
        );
    }
}
