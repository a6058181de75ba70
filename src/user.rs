//! The signed-in user record.
//!
//! The server identifies users by a numeric `id` and sends any number of
//! extra fields alongside it. Two ids carry meaning on their own:
//! `-1` is an explicit signed-out (anonymous) user and a missing or zero id
//! is an unknown user, produced by failed requests.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::casing::keys_to_camel_case;

pub type UserId = i64;

/// Id the server uses for an anonymous, signed-out visitor.
pub const SIGNED_OUT_ID: UserId = -1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Option<UserId>,
    /// Every other field the server returned, camelCased.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl User {
    #[must_use]
    pub fn with_id(id: UserId) -> Self {
        Self { id: Some(id), fields: Map::new() }
    }

    #[must_use]
    pub fn signed_out() -> Self {
        Self::with_id(SIGNED_OUT_ID)
    }

    /// A user with no id; committing it clears the session.
    #[must_use]
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Parse a server response body, normalizing keys to camelCase first.
    ///
    /// # Errors
    ///
    /// Returns an error if the (normalized) JSON is not an object or `id` is
    /// not an integer.
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(keys_to_camel_case(value))
    }

    /// A present, non-zero id. `-1` counts as an id.
    #[must_use]
    pub fn has_id(&self) -> bool {
        self.id.is_some_and(|id| id != 0)
    }

    #[must_use]
    pub fn is_signed_out(&self) -> bool {
        self.id == Some(SIGNED_OUT_ID)
    }

    #[must_use]
    pub fn is_authorized(&self) -> bool {
        self.has_id() && !self.is_signed_out()
    }

    /// Look up an extra field by its camelCase name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}
