use std::fmt;

use crate::model::ids::UserId;

/// Who the shelf currently belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Session {
    #[default]
    Anonymous,
    Authenticated(UserId),
    Demo,
}

impl Session {
    /// Storage partition this session reads and writes, if any.
    #[must_use]
    pub fn partition(&self) -> Option<PartitionKey> {
        match self {
            Session::Anonymous => None,
            Session::Authenticated(user) => Some(PartitionKey::User(*user)),
            Session::Demo => Some(PartitionKey::Demo),
        }
    }

    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Session::Authenticated(user) => Some(*user),
            Session::Anonymous | Session::Demo => None,
        }
    }

    #[must_use]
    pub fn is_demo(&self) -> bool {
        matches!(self, Session::Demo)
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Session::Anonymous)
    }
}

/// Namespace for one session's books in the key-value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKey {
    User(UserId),
    Demo,
}

impl PartitionKey {
    /// Demo partitions live only in memory.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, PartitionKey::Demo)
    }

    /// Key under which the partition's book list is stored, e.g. `books_1700000000000`.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("books_{self}")
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::User(user) => write!(f, "{user}"),
            PartitionKey::Demo => f.write_str("demo"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_has_no_partition() {
        assert_eq!(Session::Anonymous.partition(), None);
        assert_eq!(Session::default(), Session::Anonymous);
    }

    #[test]
    fn partition_is_derived_from_session() {
        let user = UserId::new(42);
        let key = Session::Authenticated(user).partition().unwrap();
        assert_eq!(key, PartitionKey::User(user));
        assert_eq!(key.storage_key(), "books_42");
        assert!(!key.is_ephemeral());

        let demo = Session::Demo.partition().unwrap();
        assert_eq!(demo.storage_key(), "books_demo");
        assert!(demo.is_ephemeral());
    }

    #[test]
    fn different_users_never_share_a_partition() {
        let a = Session::Authenticated(UserId::new(1)).partition();
        let b = Session::Authenticated(UserId::new(2)).partition();
        assert_ne!(a, b);
    }
}
