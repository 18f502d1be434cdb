//! Tag constants and provenance predicates for cavalier-managed resources
//!
//! Every destructive or mutating operation is gated on these tags, so the
//! predicates never error: a missing or unparsable tag simply means "not
//! ours".
//!
//! ## Tag Schema
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `CREATED_BY_CAVALIER` | Boolean ownership marker on DB instances |
//! | `CAVALIER_DB_INSTANCE_IDENTIFIER` | Links a snapshot to the instance it was taken for |
//! | `USE_SNAPSHOT_CREATED_BY_CAVALIER` | Boolean marker that an instance was restored from a cavalier snapshot |
//! | `CAVALIER_CREATED_AT` | RFC 3339 creation timestamp (informational only) |

/// Tag key for instance ownership - cavalier only mutates instances carrying this
pub const TAG_CREATED_BY: &str = "CREATED_BY_CAVALIER";

/// Tag key linking a snapshot back to the DB instance it was taken for
pub const TAG_INSTANCE_IDENTIFIER: &str = "CAVALIER_DB_INSTANCE_IDENTIFIER";

/// Tag key marking that an instance was restored from a cavalier-managed snapshot
pub const TAG_USES_CAVALIER_SNAPSHOT: &str = "USE_SNAPSHOT_CREATED_BY_CAVALIER";

/// Tag key for creation timestamp (RFC 3339 format, informational)
pub const TAG_CREATED_AT: &str = "CAVALIER_CREATED_AT";

/// Suffix appended to the target instance identifier to name its snapshot
const SNAPSHOT_SUFFIX: &str = "-cavalier";

/// A resource tag as cavalier sees it, independent of any SDK type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Deterministic snapshot name for a DB instance identifier.
///
/// Makes snapshot lookup reproducible without keeping a separate index.
pub fn snapshot_name(instance_identifier: &str) -> String {
    format!("{instance_identifier}{SNAPSHOT_SUFFIX}")
}

/// True iff the instance carries the ownership tag with a true value.
pub fn is_created_by_cavalier(tags: &[Tag]) -> bool {
    tag_value(tags, TAG_CREATED_BY).is_some_and(parse_bool)
}

/// True iff the snapshot's link tag names exactly this instance identifier.
pub fn is_snapshot_linked_to(instance_identifier: &str, tags: &[Tag]) -> bool {
    tag_value(tags, TAG_INSTANCE_IDENTIFIER).is_some_and(|v| v == instance_identifier)
}

/// True iff the instance was restored from a cavalier-managed snapshot.
pub fn uses_cavalier_snapshot(tags: &[Tag]) -> bool {
    tag_value(tags, TAG_USES_CAVALIER_SNAPSHOT).is_some_and(parse_bool)
}

/// Format a creation timestamp for the informational tag.
pub fn format_created_at(time: chrono::DateTime<chrono::Utc>) -> String {
    time.to_rfc3339()
}

fn tag_value<'a>(tags: &'a [Tag], key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|t| t.key == key)
        .map(|t| t.value.as_str())
}

/// Boolean tag parsing: "1", "t", "T", "true", "TRUE", "True" are true,
/// anything else is false. Malformed values never error.
fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "t" | "T" | "true" | "TRUE" | "True")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_name() {
        assert_eq!(snapshot_name("test"), "test-cavalier");
        assert_eq!(snapshot_name("prod-clone"), "prod-clone-cavalier");
    }

    #[test]
    fn test_ownership_requires_true_value() {
        assert!(is_created_by_cavalier(&[Tag::new(TAG_CREATED_BY, "true")]));
        assert!(is_created_by_cavalier(&[Tag::new(TAG_CREATED_BY, "TRUE")]));
        assert!(is_created_by_cavalier(&[Tag::new(TAG_CREATED_BY, "1")]));
    }

    #[test]
    fn test_ownership_false_for_missing_or_malformed() {
        assert!(!is_created_by_cavalier(&[]));
        assert!(!is_created_by_cavalier(&[Tag::new(TAG_CREATED_BY, "false")]));
        assert!(!is_created_by_cavalier(&[Tag::new(TAG_CREATED_BY, "yes")]));
        assert!(!is_created_by_cavalier(&[Tag::new(TAG_CREATED_BY, "truthy")]));
        assert!(!is_created_by_cavalier(&[Tag::new(TAG_CREATED_BY, "")]));
        assert!(!is_created_by_cavalier(&[Tag::new("SOME_OTHER_TAG", "true")]));
    }

    #[test]
    fn test_ownership_ignores_unrelated_tags() {
        let tags = vec![
            Tag::new("Name", "db-test"),
            Tag::new(TAG_CREATED_AT, "2024-01-01T00:00:00Z"),
            Tag::new(TAG_CREATED_BY, "true"),
        ];
        assert!(is_created_by_cavalier(&tags));
    }

    #[test]
    fn test_snapshot_link_exact_match() {
        let tags = vec![Tag::new(TAG_INSTANCE_IDENTIFIER, "test")];
        assert!(is_snapshot_linked_to("test", &tags));
        assert!(!is_snapshot_linked_to("test-2", &tags));
        assert!(!is_snapshot_linked_to("test", &[]));
    }

    #[test]
    fn test_uses_cavalier_snapshot() {
        assert!(uses_cavalier_snapshot(&[Tag::new(
            TAG_USES_CAVALIER_SNAPSHOT,
            "true"
        )]));
        assert!(!uses_cavalier_snapshot(&[Tag::new(
            TAG_USES_CAVALIER_SNAPSHOT,
            "nope"
        )]));
        assert!(!uses_cavalier_snapshot(&[]));
    }

    #[test]
    fn test_format_created_at() {
        let formatted = format_created_at(chrono::Utc::now());
        assert!(chrono::DateTime::parse_from_rfc3339(&formatted).is_ok());
    }
}
