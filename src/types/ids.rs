//! Strongly typed entity identifiers.
//!
//! Every entity is keyed by a database-assigned `i64`. The newtypes keep a
//! `TopicId` from being passed where a `CourseId` is expected and give all
//! identifiers a total order for deterministic iteration.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw database identifier.
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Get the raw database identifier.
            pub const fn get(&self) -> i64 {
                self.0
            }

            /// Parse an identifier from its decimal string form.
            pub fn parse(s: &str) -> Option<Self> {
                s.trim().parse::<i64>().ok().filter(|v| *v > 0).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

entity_id!(
    /// Identifier of a [`Department`](super::Department).
    DepartmentId
);
entity_id!(
    /// Identifier of a [`Course`](super::Course).
    CourseId
);
entity_id!(
    /// Identifier of a [`Topic`](super::Topic).
    TopicId
);
entity_id!(
    /// Identifier of a [`PremiumUser`](super::PremiumUser).
    PremiumUserId
);
entity_id!(
    /// Identifier of an [`AdminUser`](super::AdminUser).
    AdminId
);
entity_id!(
    /// Identifier of a [`RefinementRecord`](super::RefinementRecord).
    RefinementId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_garbage_and_non_positive() {
        assert_eq!(TopicId::parse("42"), Some(TopicId::new(42)));
        assert_eq!(TopicId::parse(" 7 "), Some(TopicId::new(7)));
        assert_eq!(TopicId::parse("0"), None);
        assert_eq!(TopicId::parse("-3"), None);
        assert_eq!(TopicId::parse("abc"), None);
    }

    #[test]
    fn test_ordering_follows_raw_value() {
        assert!(CourseId::new(1) < CourseId::new(2));
    }
}
