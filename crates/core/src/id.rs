//! Strongly-typed identifiers used across the engine.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Leading character reserved for internal/system streams.
pub const INTERNAL_STREAM_SENTINEL: char = '$';

/// Separator between a category and the rest of a stream name (`orders-42`).
pub const CATEGORY_SEPARATOR: char = '-';

/// Name of one append-only stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

/// Unique name of a projection instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectionName(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $t {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $t {
            type Err = EngineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.is_empty() {
                    return Err(EngineError::invalid_config(format!("{} must not be empty", $name)));
                }
                Ok(Self(s.to_string()))
            }
        }
    };
}

impl_string_newtype!(StreamId, "StreamId");
impl_string_newtype!(ProjectionName, "ProjectionName");

impl StreamId {
    /// Internal streams are skipped by "all streams" selection.
    pub fn is_internal(&self) -> bool {
        self.0.starts_with(INTERNAL_STREAM_SENTINEL)
    }

    /// Lexical category membership: `orders-1` belongs to `orders`, `orders` does not.
    pub fn in_category(&self, category: &str) -> bool {
        self.0
            .strip_prefix(category)
            .is_some_and(|rest| rest.starts_with(CATEGORY_SEPARATOR))
    }

    /// Category part of the name, if it has one.
    pub fn category(&self) -> Option<&str> {
        self.0.split_once(CATEGORY_SEPARATOR).map(|(c, _)| c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn category_membership_requires_separator() {
        let s = StreamId::new("orders-1");
        assert!(s.in_category("orders"));
        assert!(!s.in_category("order"));
        assert!(!StreamId::new("orders").in_category("orders"));
        assert!(!StreamId::new("ordersX-1").in_category("orders"));
    }

    #[test]
    fn category_is_prefix_before_first_separator() {
        assert_eq!(StreamId::new("orders-1-a").category(), Some("orders"));
        assert_eq!(StreamId::new("plain").category(), None);
    }

    #[test]
    fn sentinel_marks_internal_streams() {
        assert!(StreamId::new("$internal-sys").is_internal());
        assert!(!StreamId::new("orders-1").is_internal());
    }

    #[test]
    fn empty_names_do_not_parse() {
        assert!("".parse::<StreamId>().is_err());
        assert_eq!("a".parse::<ProjectionName>().unwrap().as_str(), "a");
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: membership is exactly "starts with prefix followed by the separator".
        #[test]
        fn in_category_matches_prefix_and_separator(
            prefix in "[a-z$]{0,4}",
            stream in "[a-z$-]{0,8}",
        ) {
            let id = StreamId::new(stream.clone());
            let expected = stream.starts_with(&format!("{prefix}-"));
            prop_assert_eq!(id.in_category(&prefix), expected);
        }
    }
}
