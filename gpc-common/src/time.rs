//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Parse an RFC 3339 timestamp stored as TEXT
pub fn parse_rfc3339(value: &str) -> crate::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            crate::Error::Internal(format!("Failed to parse timestamp '{}': {}", value, e))
        })
}
