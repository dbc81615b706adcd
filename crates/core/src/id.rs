// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prefixed random identifiers.
//!
//! Every entity ID is `{prefix}{nanoid}`: a short type tag followed by a
//! 12-character random suffix. IDs are opaque strings on the wire and in
//! the store; the prefix only aids humans reading logs.

/// Returns a string slice truncated to at most `n` characters.
pub fn short(s: &str, n: usize) -> &str {
    if s.len() <= n {
        s
    } else {
        &s[..n]
    }
}

/// Define a newtype ID wrapper with a fixed type prefix.
///
/// Generates `new()` for random generation, `from_string()`, `as_str()`,
/// `suffix()`, `short()`, plus `Display`, `From<&str>`, `From<String>`,
/// `PartialEq<str>`, `Borrow<str>`, and `Deref` implementations.
#[macro_export]
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident($prefix:literal);
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Generate a new random ID with the type prefix.
            pub fn new() -> Self {
                Self(format!("{}{}", Self::PREFIX, nanoid::nanoid!(12)))
            }

            /// Wrap an existing string (parsing, store hydration).
            pub fn from_string(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// The ID without its type prefix.
            pub fn suffix(&self) -> &str {
                self.0.strip_prefix(Self::PREFIX).unwrap_or(&self.0)
            }

            /// The suffix truncated to at most `n` characters, for log and
            /// file names.
            pub fn short(&self, n: usize) -> &str {
                $crate::id::short(self.suffix(), n)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::from_string(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::from_string(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id! {
    /// Background job identifier.
    pub struct JobId("job-");
}

define_id! {
    /// Captured patch (diff) identifier.
    pub struct DiffId("diff-");
}

define_id! {
    /// Sandbox container identifier as tracked by the engine.
    pub struct BoxId("box-");
}

define_id! {
    /// Conversation session identifier.
    pub struct SessionId("sess-");
}

define_id! {
    /// Task identifier allocated by the engine when a run has no manifest task.
    pub struct TaskId("task-");
}

define_id! {
    /// Execution log reference identifier.
    pub struct LogId("log-");
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
