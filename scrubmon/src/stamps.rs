use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Identifier of a placement group, e.g. `1.2f`. The id is an opaque, stable string assigned by
/// the cluster; no structure is assumed beyond equality and ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PgId(String);

impl PgId {
    /// Create a new [`PgId`] from the cluster-assigned identifier.
    pub fn new(id: String) -> PgId {
        PgId(id)
    }

    /// View the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PgId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PgId {
    fn from(id: &str) -> Self {
        PgId(id.to_string())
    }
}

impl FromStr for PgId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PgId(s.to_string()))
    }
}

/// The kind of scrub operation being monitored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrubKind {
    /// A shallow scrub, checking object metadata only.
    Scrub,
    /// A deep scrub, additionally verifying object data.
    DeepScrub,
}

impl ScrubKind {
    /// Name of the pg stat field holding the timestamp of the last completed operation of this
    /// kind.
    pub fn stamp_field(&self) -> &'static str {
        match self {
            ScrubKind::Scrub => "last_scrub_stamp",
            ScrubKind::DeepScrub => "last_deep_scrub_stamp",
        }
    }
}

impl fmt::Display for ScrubKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ScrubKind::Scrub => "scrub",
                ScrubKind::DeepScrub => "deep-scrub",
            }
        )
    }
}

/// The last completed scrub and deep scrub timestamps of a single PG, as reported by the cluster.
/// Stamps are opaque strings, only compared for equality; a missing stamp means the cluster did
/// not report one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PgStamps {
    last_scrub_stamp: Option<String>,
    last_deep_scrub_stamp: Option<String>,
}

impl PgStamps {
    /// Create new stamps from the reported last scrub and last deep scrub timestamps.
    pub fn new(last_scrub_stamp: Option<String>, last_deep_scrub_stamp: Option<String>) -> Self {
        Self {
            last_scrub_stamp,
            last_deep_scrub_stamp,
        }
    }

    /// Get the stamp tracking the given scrub kind, if the cluster reported one.
    pub fn stamp(&self, kind: ScrubKind) -> Option<&str> {
        match kind {
            ScrubKind::Scrub => self.last_scrub_stamp.as_deref(),
            ScrubKind::DeepScrub => self.last_deep_scrub_stamp.as_deref(),
        }
    }
}

/// A mapping from PG id to its scrub stamps, taken at one instant. Two snapshots taken at
/// different times are compared per PG, by stamp equality only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StampSnapshot {
    stamps: HashMap<PgId, PgStamps>,
}

impl StampSnapshot {
    /// Create a new, empty snapshot.
    pub fn new() -> StampSnapshot {
        StampSnapshot {
            stamps: HashMap::new(),
        }
    }

    /// Record the stamps observed for a PG.
    pub fn insert(&mut self, pg: PgId, stamps: PgStamps) {
        self.stamps.insert(pg, stamps);
    }

    /// Get the recorded stamps for a PG, if it is part of this snapshot.
    pub fn get(&self, pg: &PgId) -> Option<&PgStamps> {
        self.stamps.get(pg)
    }

    /// Return the ids of all PGs tracked in this snapshot, in stable order.
    pub fn pg_ids(&self) -> Vec<PgId> {
        let mut ids: Vec<_> = self.stamps.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The amount of PGs tracked in this snapshot.
    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    /// Check if the snapshot tracks no PGs at all.
    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    /// Return the PGs in this (baseline) snapshot whose stamp of the given kind cannot be shown
    /// to have changed in `later`. A PG missing from `later`, or reporting no stamp on either
    /// side, counts as unchanged, since progress cannot be proven for it. The result is sorted
    /// and does not depend on insertion order.
    pub fn unchanged_in(&self, later: &StampSnapshot, kind: ScrubKind) -> Vec<PgId> {
        let mut unchanged = Vec::new();
        for (pg, before) in &self.stamps {
            let after = match later.stamps.get(pg) {
                Some(after) => after,
                None => {
                    unchanged.push(pg.clone());
                    continue;
                }
            };
            match (before.stamp(kind), after.stamp(kind)) {
                (Some(b), Some(a)) if b != a => {}
                _ => unchanged.push(pg.clone()),
            }
        }
        unchanged.sort();
        unchanged
    }
}
