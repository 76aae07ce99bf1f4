use std::fmt;

use serde::{Deserialize, Serialize};

/// Server-assigned job identifier.
pub type JobId = i64;

/// Server-assigned annotation identifier.
pub type BackendId = i64;

/// Server-assigned label identifier.
pub type LabelId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Primary image id: the shared id when the image has one, else the
/// job-scoped id. Every record in the working set uses this id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(pub i64);

/// Image id valid only inside one job's annotation API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobImageId(pub i64);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for JobImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Prefix of ephemeral ids derived for records created by other clients.
const REMOTE_PREFIX: &str = "remote-";

/// Client-generated annotation identifier, stable for the session and never
/// reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EphemeralId(String);

impl EphemeralId {
    /// Wrap an existing identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Mint a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Deterministic id for a server record that carries no client marker.
    ///
    /// Reloading the same record always yields the same id, which keeps
    /// repeated merges free of duplicates.
    pub fn for_backend(backend_id: BackendId) -> Self {
        Self(format!("{REMOTE_PREFIX}{backend_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EphemeralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = EphemeralId::generate();
        let b = EphemeralId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn backend_derived_id_is_deterministic() {
        assert_eq!(EphemeralId::for_backend(42), EphemeralId::for_backend(42));
        assert_eq!(EphemeralId::for_backend(42).as_str(), "remote-42");
    }

    #[test]
    fn image_ids_serialize_transparently() {
        let json = serde_json::to_string(&JobImageId(7)).unwrap();
        assert_eq!(json, "7");
        let id: ImageId = serde_json::from_str("12").unwrap();
        assert_eq!(id, ImageId(12));
    }
}
