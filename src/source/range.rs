use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RANGE};

use super::constants::{NPT_INVALID, TIME_SEEK_RANGE_HEADER};
use crate::common::SourceError;

/// Shapes the `Range` / time-seek headers of an outgoing request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeRequestBuilder {
    start_offset: u64,
    /// Inclusive, 0 means "to the end".
    end_offset: u64,
}

impl RangeRequestBuilder {
    pub fn new(start_offset: u64, end_offset: u64) -> Self {
        Self {
            start_offset,
            end_offset,
        }
    }

    fn has_configured_range(&self) -> bool {
        self.start_offset > 0 || self.end_offset > 0
    }

    /// Returns the `Range` value for a request at `request_position`, or `None`
    /// when the whole entity is wanted.
    ///
    /// `stop_position` is exclusive.
    pub fn byte_range(
        &self,
        request_position: u64,
        stop_position: Option<u64>,
    ) -> Result<Option<String>, SourceError> {
        if request_position == 0 && self.has_configured_range() {
            return match self.end_offset {
                0 => Ok(Some(format!("bytes={}-", self.start_offset))),
                end if self.start_offset > end => Err(SourceError::InvalidRange {
                    start: self.start_offset,
                    end,
                }),
                end => Ok(Some(format!("bytes={}-{}", self.start_offset, end))),
            };
        }

        match stop_position {
            Some(stop) if stop > request_position => {
                Ok(Some(format!("bytes={}-{}", request_position, stop - 1)))
            }
            // An empty segment never reaches the wire; keep the header well-formed.
            Some(_) => Ok(Some(format!("bytes={}-{}", request_position, request_position))),
            None if request_position > 0 => Ok(Some(format!("bytes={}-", request_position))),
            None => Ok(None),
        }
    }

    /// Replaces any previous `Range` header on `headers`.
    pub fn apply(
        &self,
        headers: &mut HeaderMap,
        request_position: u64,
        stop_position: Option<u64>,
    ) -> Result<(), SourceError> {
        headers.remove(RANGE);
        if let Some(value) = self.byte_range(request_position, stop_position)? {
            let value = HeaderValue::from_str(&value)
                .map_err(|e| SourceError::Config(format!("range header: {e}")))?;
            headers.insert(RANGE, value);
        }
        Ok(())
    }

    /// `npt=H:MM:SS.mmm-` for `offset`, with the invalid tuple when the time
    /// cannot be represented.
    pub fn time_seek_range(offset: Option<Duration>) -> String {
        format!("npt={}-", format_npt(offset))
    }

    /// Replaces any previous time-seek header on `headers`.
    pub fn apply_time_seek(headers: &mut HeaderMap, offset: Option<Duration>) {
        let name = HeaderName::from_static(TIME_SEEK_RANGE_HEADER);
        headers.remove(&name);
        headers.remove(RANGE);
        if let Ok(value) = HeaderValue::from_str(&Self::time_seek_range(offset)) {
            headers.insert(name, value);
        }
    }
}

fn format_npt(time: Option<Duration>) -> String {
    let Some(time) = time else {
        return NPT_INVALID.to_string();
    };

    let total_secs = time.as_secs();
    let Ok(hours) = u32::try_from(total_secs / 3_600) else {
        return NPT_INVALID.to_string();
    };

    format!(
        "{}:{:02}:{:02}.{:03}",
        hours,
        (total_secs / 60) % 60,
        total_secs % 60,
        time.subsec_millis()
    )
}
