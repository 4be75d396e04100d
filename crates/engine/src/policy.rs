//! Cache policy resolution
//!
//! A [`CachePolicy`] is a per-call directive. Given a policy and a cache,
//! the planners below decide which requested keys are served locally and
//! which must be fetched from the backend. The store executes the plan:
//! at most one backend round trip per plan.
//!
//! | Policy | Keyed lookup | Full-table lookup |
//! |---|---|---|
//! | `CacheOnly` | hits only | local snapshot |
//! | `CacheFirst` | hits + fetch of misses | local if synced, else backend |
//! | `ForceRefresh` | fetch of every key | backend |

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tessera_core::{EntityKey, Error, Result};
use tessera_storage::{IdentityCache, Instance};

/// Local-versus-backend precedence for one lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Never touch the backend
    CacheOnly,
    /// Serve hits locally, fetch misses
    #[default]
    CacheFirst,
    /// Always re-read from the backend, then serve
    ForceRefresh,
}

impl CachePolicy {
    /// Whether a lookup under this policy may issue backend calls
    pub fn may_fetch(self) -> bool {
        !matches!(self, CachePolicy::CacheOnly)
    }

    /// Config-file spelling
    pub fn as_str(self) -> &'static str {
        match self {
            CachePolicy::CacheOnly => "cache_only",
            CachePolicy::CacheFirst => "cache_first",
            CachePolicy::ForceRefresh => "force_refresh",
        }
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CachePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "cache_only" => Ok(CachePolicy::CacheOnly),
            "cache_first" => Ok(CachePolicy::CacheFirst),
            "force_refresh" => Ok(CachePolicy::ForceRefresh),
            other => Err(Error::Config(format!("unknown cache policy '{}'", other))),
        }
    }
}

/// Plan for a keyed lookup
#[derive(Debug, Default)]
pub struct LookupPlan {
    /// Requested keys, deduplicated in first-seen order
    pub keys: Vec<EntityKey>,
    /// Instances served from the cache
    pub hits: Vec<Arc<Instance>>,
    /// Keys to fetch in a single backend round trip
    pub fetch: Vec<EntityKey>,
    /// Keys not cached and not fetched
    pub absent: usize,
}

/// Split a keyed lookup between cache and backend
pub fn plan_lookup(cache: &IdentityCache, keys: &[EntityKey], policy: CachePolicy) -> LookupPlan {
    let keys = dedup_keys(keys);
    match policy {
        CachePolicy::CacheOnly => {
            let (hits, misses) = cache.partition(&keys);
            LookupPlan {
                keys,
                hits,
                fetch: Vec::new(),
                absent: misses.len(),
            }
        }
        CachePolicy::CacheFirst => {
            let (hits, fetch) = cache.partition(&keys);
            LookupPlan {
                keys,
                hits,
                fetch,
                absent: 0,
            }
        }
        CachePolicy::ForceRefresh => LookupPlan {
            fetch: keys.clone(),
            keys,
            hits: Vec::new(),
            absent: 0,
        },
    }
}

/// Where a full-table lookup is served from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableSource {
    /// The local snapshot is authoritative
    Local,
    /// Load the table and replace the local snapshot
    Backend,
}

/// Decide the source for `get_all`/`get_size`
///
/// An unsynced cache is never trusted under `CacheFirst`, even when it
/// holds instances: it only knows the keys someone asked for.
pub fn plan_table(cache: &IdentityCache, policy: CachePolicy) -> TableSource {
    match policy {
        CachePolicy::CacheOnly => TableSource::Local,
        CachePolicy::CacheFirst if cache.is_synced() => TableSource::Local,
        CachePolicy::CacheFirst | CachePolicy::ForceRefresh => TableSource::Backend,
    }
}

/// Keys in first-seen order, duplicates dropped
pub(crate) fn dedup_keys(keys: &[EntityKey]) -> Vec<EntityKey> {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.iter()
        .filter(|k| seen.insert(*k))
        .cloned()
        .collect()
}
