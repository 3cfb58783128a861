//! Branded ID newtypes.
//!
//! Every addressable entity gets its own wrapper around `String` so a user ID
//! can never be passed where a task ID is expected. Generated IDs are UUID v7
//! (time-ordered); IDs coming from collaborators are accepted verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
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
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Identity of an authenticated user.
    UserId
}

branded_id! {
    /// Unique identifier for one live client connection.
    ConnectionId
}

branded_id! {
    /// Unique identifier for a notification event.
    NotificationId
}

branded_id! {
    /// Identifier of a task owned by the task service.
    TaskId
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn new_ids_are_unique() {
        let ids: HashSet<NotificationId> = (0..100).map(|_| NotificationId::new()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn new_ids_are_uuid_v7() {
        let id = ConnectionId::new();
        let parsed = Uuid::parse_str(id.as_str()).unwrap();
        assert_eq!(parsed.get_version_num(), 7);
    }

    #[test]
    fn from_str_preserves_value() {
        let id = UserId::from("user-42");
        assert_eq!(id.as_str(), "user-42");
        assert_eq!(id.to_string(), "user-42");
        assert_eq!(String::from(id), "user-42");
    }

    #[test]
    fn serializes_transparently() {
        let id = TaskId::from("t1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"t1\"");
        let back: TaskId = serde_json::from_str("\"t1\"").unwrap();
        assert_eq!(back, id);
    }
}
