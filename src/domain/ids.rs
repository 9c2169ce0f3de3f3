//! Type-safe document and user identifiers.
//!
//! [`DocumentId`] is a newtype wrapper around [`uuid::Uuid`] (v4) so that
//! document identifiers cannot be confused with version or row ids.
//! [`UserId`] wraps the opaque string the relay resolves from the
//! connection's auth parameters.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Unique identifier for a collaboratively edited document.
///
/// Used as the room key on the relay, the tag on every document-scoped
/// wire frame, and the key of the persistence collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String, format = Uuid)]
pub struct DocumentId(uuid::Uuid);

impl DocumentId {
    /// Creates a new random `DocumentId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Creates a `DocumentId` from an existing [`uuid::Uuid`].
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<uuid::Uuid> for DocumentId {
    fn from(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifier of a participant as seen by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String)]
pub struct UserId(String);

impl UserId {
    /// Wraps a user identifier string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Presence colour for this user: `hsl(h, 70%, 50%)` with the hue derived
    /// from the identifier, stable across sessions.
    #[must_use]
    pub fn color(&self) -> String {
        let hue = self.0.chars().map(u32::from).sum::<u32>() % 360;
        format!("hsl({hue}, 70%, 50%)")
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn new_generates_unique_ids() {
        assert_ne!(DocumentId::new(), DocumentId::new());
    }

    #[test]
    fn document_id_serializes_as_bare_uuid() {
        let uuid = uuid::Uuid::new_v4();
        let id = DocumentId::from_uuid(uuid);
        let Ok(json) = serde_json::to_string(&id) else {
            panic!("serialization failed");
        };
        assert_eq!(json, format!("\"{uuid}\""));
    }

    #[test]
    fn color_is_stable_per_user() {
        let alice = UserId::from("alice");
        assert_eq!(alice.color(), UserId::from("alice").color());
        // a=97 l=108 i=105 c=99 e=101 -> 510 % 360
        assert_eq!(alice.color(), "hsl(150, 70%, 50%)");
    }

    #[test]
    fn user_id_display_is_raw_string() {
        assert_eq!(UserId::new("u-1").to_string(), "u-1");
    }
}
