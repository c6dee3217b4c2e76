use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::http::{Headers, Response, CACHE_CONTROL};

/// One stored response. Records are replaced whole, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub key: String,
    pub status: u16,
    pub headers: Headers,
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,
    pub stored_at: DateTime<Utc>,
}

impl CacheRecord {
    pub fn new(key: impl Into<String>, status: u16, headers: Headers, body: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            status,
            headers,
            body,
            stored_at: Utc::now(),
        }
    }

    pub fn from_response(key: impl Into<String>, response: &Response) -> Self {
        Self::new(
            key,
            response.status(),
            response.headers().clone(),
            response.body().to_vec(),
        )
    }

    pub fn to_response(&self) -> Response {
        Response::from_parts(self.status, self.headers.clone(), self.body.clone())
    }

    /// `max-age` from the stored `cache-control` header. Negative or
    /// out-of-range values count as no hint.
    pub fn max_age(&self) -> Option<Duration> {
        let cache_control = self.headers.get(CACHE_CONTROL)?;
        cache_control
            .split(',')
            .map(str::trim)
            .find_map(|directive| directive.strip_prefix("max-age="))
            .and_then(|secs| secs.trim().parse::<i64>().ok())
            .filter(|secs| *secs >= 0)
            .and_then(Duration::try_seconds)
    }

    /// Informational only: nothing evicts a record when this passes.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.max_age()
            .and_then(|age| self.stored_at.checked_add_signed(age))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().map(|at| now > at).unwrap_or(false)
    }

    /// Time since the record was stored, e.g. "5m ago".
    pub fn age_display_at(&self, now: DateTime<Utc>) -> String {
        let age = now.signed_duration_since(self.stored_at);
        if age < Duration::minutes(1) {
            // Clock skew lands here too
            "just now".to_string()
        } else {
            format!("{} ago", compact_span(age))
        }
    }

    /// Position relative to the expiry hint: "fresh for 25m" or
    /// "expired 3h ago". `None` without a usable hint.
    pub fn freshness_at(&self, now: DateTime<Utc>) -> Option<String> {
        let remaining = self.expires_at()?.signed_duration_since(now);
        Some(if remaining > Duration::zero() {
            format!("fresh for {}", compact_span(remaining))
        } else {
            format!("expired {} ago", compact_span(-remaining))
        })
    }
}

/// Largest whole unit of a non-negative span: `45s`, `12m`, `3h`, `2d`.
fn compact_span(span: Duration) -> String {
    if span.num_days() > 0 {
        format!("{}d", span.num_days())
    } else if span.num_hours() > 0 {
        format!("{}h", span.num_hours())
    } else if span.num_minutes() > 0 {
        format!("{}m", span.num_minutes())
    } else {
        format!("{}s", span.num_seconds().max(0))
    }
}

mod body_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
