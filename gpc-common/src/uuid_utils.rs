//! UUID utilities

use uuid::Uuid;

/// Parse a UUID read back from a TEXT column
pub fn parse_column(s: &str) -> crate::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| crate::Error::Internal(format!("Invalid UUID '{}': {}", s, e)))
}
