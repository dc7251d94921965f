//! Millisecond timestamps used as versions, ETags and `Last-Modified` values.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Epoch(pub i64);

impl Epoch {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn millis(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Quoted form used in `ETag`, `If-Match` and `If-None-Match`.
    pub fn etag(self) -> String {
        format!("\"{}\"", self.0)
    }

    /// RFC 7231 date, second precision.
    pub fn http_date(self) -> String {
        match Utc.timestamp_millis_opt(self.0).single() {
            Some(dt) => dt.format(HTTP_DATE_FORMAT).to_string(),
            None => String::new(),
        }
    }

    /// Parse an HTTP date header into an epoch.
    pub fn from_http_date(raw: &str) -> Option<Self> {
        DateTime::parse_from_rfc2822(raw.trim())
            .ok()
            .map(|dt| Self(dt.with_timezone(&Utc).timestamp_millis()))
    }

    /// Truncate to whole seconds, for comparisons against HTTP dates.
    pub fn seconds(self) -> i64 {
        self.0.div_euclid(1000)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
