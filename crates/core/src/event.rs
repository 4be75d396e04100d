//! Lifecycle event kinds observed by triggers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle transition of a canonical instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A canonical instance came into existence
    Created,
    /// A canonical instance's values changed
    Updated,
    /// A canonical instance was removed
    Deleted,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Created => write!(f, "created"),
            EventKind::Updated => write!(f, "updated"),
            EventKind::Deleted => write!(f, "deleted"),
        }
    }
}
