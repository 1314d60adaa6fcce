use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::ops::Deref;
use uuid::Uuid;

/// Deterministic point identifier derived from an item's natural key.
///
/// Name-based (v5) UUID in the DNS namespace, so the same uid maps to the
/// same point in every run and every process. Re-upserting a catalog
/// replaces points instead of duplicating them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(transparent)]
pub struct PointId(Uuid);

impl Display for PointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl Deref for PointId {
    type Target = Uuid;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&str> for PointId {
    fn from(uid: &str) -> Self {
        PointId::from_uid(uid)
    }
}

impl PointId {
    #[inline]
    pub fn from_uid(uid: &str) -> PointId {
        PointId(Uuid::new_v5(&Uuid::NAMESPACE_DNS, uid.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_uid_same_id() {
        assert_eq!(PointId::from_uid("sku-123"), PointId::from_uid("sku-123"));
        assert_ne!(PointId::from_uid("sku-123"), PointId::from_uid("sku-124"));
    }

    #[test]
    fn test_matches_reference_uuid5() {
        // uuid5(NAMESPACE_DNS, "python.org")
        assert_eq!(
            PointId::from_uid("python.org").to_string(),
            "886313e1-3b8a-5372-9b90-0c9aee199e5d"
        );
    }

    #[test]
    fn test_is_version_5() {
        assert_eq!(PointId::from_uid("x").get_version_num(), 5);
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = PointId::from("python.org");
        assert_eq!(
            serde_json::to_string(&id).unwrap(),
            "\"886313e1-3b8a-5372-9b90-0c9aee199e5d\""
        );
    }
}
