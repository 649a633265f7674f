use nanoid::nanoid;
use serde::{Deserialize, Serialize};

/// Generate a 12-character nanoid for entity IDs
#[must_use]
pub fn generate_id() -> String {
    nanoid!(12)
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub const fn from_string(id: String) -> Self {
                Self(id)
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// User ID as issued by the upstream identity provider
    UserId
);

string_id!(
    /// Room (broadcast group) ID
    RoomId
);

string_id!(
    /// Server-generated ID of one live client stream.
    ///
    /// IDs are never reused: a reconnect always produces a fresh one.
    ConnectionId
);

impl ConnectionId {
    /// Allocate a new random connection ID
    #[must_use]
    pub fn generate() -> Self {
        Self(nanoid!(16))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_connection_ids_are_unique() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_eq!(a.as_str().len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let room = RoomId::from("lobby");
        let json = serde_json::to_string(&room).unwrap();
        assert_eq!(json, "\"lobby\"");

        let parsed: RoomId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, room);
        assert_eq!(parsed.to_string(), "lobby");
    }
}
