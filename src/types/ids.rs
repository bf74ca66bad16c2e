//! Strongly-typed identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Defines a strongly-typed ID newtype wrapper.
///
/// Generates: struct, `from_string()`, `as_str()`, Display, Serialize,
/// Deserialize. The `uuid` arm additionally generates `new()` (UUID v4) and
/// `Default`.
macro_rules! define_id {
    ($name:ident, uuid) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            /// Construct from a literal known to be valid. Intended for tests
            /// and call sites that already enforce non-emptiness.
            pub fn must(s: impl Into<String>) -> Self {
                Self::from_string(s.into()).expect("must: non-empty id")
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::must(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::must(s)
            }
        }
    };
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            pub fn must(s: impl Into<String>) -> Self {
                Self::from_string(s.into()).expect("must: non-empty id")
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::must(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::must(s)
            }
        }
    };
}

define_id!(SessionId, uuid);
define_id!(RequestId, uuid);
define_id!(GateId, uuid);
define_id!(UserId);
define_id!(AgentName);
