use crate::stamps::{PgId, ScrubKind, StampSnapshot};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The scheduling detail the cluster keeps for one PG in its scrub queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrubDetails {
    forced: bool,
    sched_time: String,
}

impl ScrubDetails {
    /// Create new details from the forced flag and scheduled time reported by the cluster.
    pub fn new(forced: bool, sched_time: String) -> Self {
        Self { forced, sched_time }
    }

    /// Whether an operator-requested scrub is pending for the PG, taking priority over the
    /// periodic schedule.
    pub fn forced(&self) -> bool {
        self.forced
    }

    /// The time the next scrub is scheduled for. Opaque, only compared for equality.
    pub fn sched_time(&self) -> &str {
        &self.sched_time
    }
}

#[async_trait]
/// ClusterStateSource defines `something` which can answer questions about the scrub state of a
/// live cluster and apply scrub related configuration to it. How the answers are obtained is an
/// internal detail of the source; the verification logic only sees the typed snapshots.
///
/// Configuration changes are expected to be idempotent: applying the same value or removing an
/// already removed option must succeed, so a teardown can always sweep everything it might have
/// applied.
pub trait ClusterStateSource {
    /// The current time according to the cluster, used as the reference for window computation.
    async fn reference_time(&self) -> Result<NaiveDateTime, SourceError>;

    /// Take a snapshot of the last scrub and last deep scrub stamps of the given PGs. PGs the
    /// cluster does not report on are simply absent from the snapshot.
    async fn scrub_stamps(&self, pgs: &[PgId]) -> Result<StampSnapshot, SourceError>;

    /// Fetch the current scrub schedule description of the given PGs. PGs without a reported
    /// schedule are absent from the result.
    async fn scrub_schedules(&self, pgs: &[PgId]) -> Result<HashMap<PgId, String>, SourceError>;

    /// Fetch the scrub queue detail of a single PG from its primary OSD.
    async fn scrub_details(&self, pg: &PgId) -> Result<ScrubDetails, SourceError>;

    /// The amount of inconsistent objects currently recorded for a PG.
    async fn inconsistent_object_count(&self, pg: &PgId) -> Result<u64, SourceError>;

    /// Ask the cluster to scrub the given PG.
    async fn request_scrub(&self, pg: &PgId, kind: ScrubKind) -> Result<(), SourceError>;

    /// Set an OSD configuration option cluster wide.
    async fn set_osd_config(&self, name: &str, value: &str) -> Result<(), SourceError>;

    /// Remove an OSD configuration option cluster wide, reverting it to its default.
    async fn remove_osd_config(&self, name: &str) -> Result<(), SourceError>;

    /// Set a cluster wide OSD flag such as noscrub.
    async fn set_osd_flag(&self, flag: &str) -> Result<(), SourceError>;

    /// Unset a cluster wide OSD flag.
    async fn unset_osd_flag(&self, flag: &str) -> Result<(), SourceError>;
}

/// A high lvl error returned by a cluster state source
#[derive(Debug)]
pub struct SourceError {
    error: Box<dyn std::error::Error + Send>,
}

impl SourceError {
    /// Create a new source error which wraps an existing error
    pub fn new(error: Box<dyn std::error::Error + Send>) -> Self {
        Self { error }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.error)
    }
}

/// The result type for the cluster state source interface
pub type SourceResult<T> = Result<T, SourceError>;
