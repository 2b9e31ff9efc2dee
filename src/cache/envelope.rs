use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Self-describing header stored next to every cached value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    pub version: u32,
    pub namespace: String,
    #[serde(with = "time::serde::rfc3339")]
    pub cached_at: OffsetDateTime,
    /// Advisory; the store's TTL is what actually expires the entry.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// The persisted unit: metadata plus the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEnvelope<T> {
    pub metadata: EnvelopeMetadata,
    pub data: T,
}

/// An envelope whose payload has not been narrowed into a concrete type yet.
///
/// Reads parse into this first so a version mismatch is detected before the
/// payload shape is looked at.
pub(crate) type RawEnvelope = CacheEnvelope<serde_json::Value>;

/// Header-only view used by read-only inspection.
#[derive(Debug, Deserialize)]
pub(crate) struct MetadataOnly {
    pub metadata: EnvelopeMetadata,
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn serializes_camel_case_rfc3339_metadata() {
        let envelope = CacheEnvelope {
            metadata: EnvelopeMetadata {
                version: 2,
                namespace: "activity-feed".to_string(),
                cached_at: datetime!(2026-01-01 00:00:00 UTC),
                expires_at: datetime!(2026-01-01 00:15:00 UTC),
            },
            data: vec!["a1"],
        };

        let json = serde_json::to_value(&envelope).expect("envelope serializes");

        assert_eq!(json["metadata"]["version"], 2);
        assert_eq!(json["metadata"]["cachedAt"], "2026-01-01T00:00:00Z");
        assert_eq!(json["metadata"]["expiresAt"], "2026-01-01T00:15:00Z");
        assert_eq!(json["data"][0], "a1");
    }

    #[test]
    fn raw_envelope_keeps_payload_untyped() {
        let raw = r#"{"metadata":{"version":1,"namespace":"ns","cachedAt":"2026-01-01T00:00:00Z","expiresAt":"2026-01-01T01:00:00Z"},"data":{"anything":[1,2]}}"#;
        let parsed: RawEnvelope = serde_json::from_str(raw).expect("raw envelope parses");
        assert_eq!(parsed.metadata.version, 1);
        assert_eq!(parsed.data["anything"][1], 2);
    }
}
