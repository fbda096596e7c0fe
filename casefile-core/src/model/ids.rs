//! Type-safe identifiers for engine records.
//!
//! Uses the newtype pattern so a snapshot id can never be passed where a
//! project id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random ID.
            #[inline]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Get the underlying UUID.
            #[inline]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.0.to_string()[..8])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

define_id!(
    /// Unique identifier for a project.
    ProjectId
);

define_id!(
    /// Unique identifier for a project's truth document.
    TruthId
);

define_id!(
    /// Unique identifier for an immutable truth snapshot.
    SnapshotId
);

define_id!(
    /// Unique identifier for a module entry (role, clue, timeline item, chapter).
    EntryId
);

define_id!(
    /// Unique identifier for a consistency issue.
    IssueId
);

define_id!(
    /// Unique identifier for a staged candidate.
    CandidateId
);

define_id!(
    /// Unique identifier for a generation log record.
    GenerationId
);

/// Identity of an authenticated caller, as supplied by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
