//! Strongly-typed identifiers.
//!
//! Rooms, users, messages and live connections are all UUID-backed, but they are
//! never interchangeable: the registry indexes by `(RoomId, UserId)` and a mixed-up
//! argument order should fail to compile rather than silently miss.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// A chat room.
    RoomId
);

uuid_id!(
    /// A chat user (human or bot).
    UserId
);

uuid_id!(
    /// A stored chat message. Assigned by the message store.
    MessageId
);

uuid_id!(
    /// One live WebSocket connection. Assigned by the server on upgrade.
    ConnectionId
);

impl RoomId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl MessageId {
    /// Time-ordered (v7) so ids sort in creation order.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_hyphenated_uuid() {
        let raw = "6f1c2a0e-3b7d-4c1e-9a2f-0d5e8b7c6a41";
        let room: RoomId = raw.parse().unwrap();
        assert_eq!(room.to_string(), raw);
    }

    #[test]
    fn parse_trims_whitespace() {
        let room: RoomId = " 6f1c2a0e-3b7d-4c1e-9a2f-0d5e8b7c6a41 ".parse().unwrap();
        assert_eq!(room.to_string(), "6f1c2a0e-3b7d-4c1e-9a2f-0d5e8b7c6a41");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("general".parse::<RoomId>().is_err());
        assert!("".parse::<UserId>().is_err());
    }

    #[test]
    fn serializes_as_bare_string() {
        let id = UserId::from_uuid(Uuid::nil());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn message_ids_sort_by_creation() {
        let a = MessageId::new();
        let b = MessageId::new();
        assert!(a <= b);
    }
}
