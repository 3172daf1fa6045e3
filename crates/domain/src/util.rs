use crate::error::DomainError;
use serde::Serialize;
use sha2::{Digest, Sha256};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

pub fn uuid_v7_without_dashes() -> String {
    Uuid::now_v7().simple().to_string()
}

pub fn format_ms_rfc3339(epoch_ms: i64) -> String {
    let fallback = OffsetDateTime::from_unix_timestamp(0).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let value =
        OffsetDateTime::from_unix_timestamp_nanos(epoch_ms as i128 * 1_000_000).unwrap_or(fallback);
    value
        .format(&Rfc3339)
        .unwrap_or("1970-01-01T00:00:00Z".to_string())
}

/// Hex SHA-256 over the JSON encoding of an audit payload.
pub fn audit_digest<T>(value: &T) -> crate::DomainResult<String>
where
    T: Serialize,
{
    let payload = serde_json::to_vec(value)
        .map_err(|err| DomainError::Internal(format!("failed to serialize audit payload: {err}")))?;
    let digest = Sha256::digest(&payload);
    Ok(hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rfc3339_formats_epoch_millis() {
        assert_eq!(format_ms_rfc3339(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_ms_rfc3339(86_400_000), "1970-01-02T00:00:00Z");
    }

    #[test]
    fn audit_digest_is_stable_for_equal_payloads() {
        let first = audit_digest(&json!({"action": "delete_message", "target": "m1"})).unwrap();
        let second = audit_digest(&json!({"action": "delete_message", "target": "m1"})).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }
}
