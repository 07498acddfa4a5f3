use crate::source::ClusterStateSource;
use crate::stamps::{PgId, ScrubKind, StampSnapshot};
use crate::ScrubResult;
use log::{debug, info, warn};
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// The outcome of waiting for scrub stamps to change. A deadline running out is a reportable
/// outcome, not an error: the caller gets told exactly which PGs never showed progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampWait {
    all_changed: bool,
    changed: Vec<PgId>,
    unchanged: Vec<PgId>,
}

impl StampWait {
    /// Whether every tracked PG showed a changed stamp before the deadline.
    pub fn all_changed(&self) -> bool {
        self.all_changed
    }

    /// The PGs whose stamp changed relative to the baseline.
    pub fn changed(&self) -> &[PgId] {
        &self.changed
    }

    /// The PGs whose stamp never changed before the deadline.
    pub fn unchanged(&self) -> &[PgId] {
        &self.unchanged
    }
}

/// Repeatedly poll the source until every PG tracked in the baseline shows a changed stamp of
/// the given kind, or the timeout elapses. PGs are never dropped from tracking while polling; a
/// PG the source stops reporting on simply stays unchanged. The first poll happens immediately,
/// later ones are spaced by `interval`, so the deadline is honored to within one interval.
///
/// Source errors are propagated: a poll that cannot be answered leaves the verdict undecidable,
/// which is different from a poll that answers "no progress yet".
pub async fn wait_for_stamp_change(
    source: &dyn ClusterStateSource,
    baseline: &StampSnapshot,
    kind: ScrubKind,
    timeout: Duration,
    interval: Duration,
) -> ScrubResult<StampWait> {
    let pgs = baseline.pg_ids();
    let deadline = Instant::now() + timeout;
    debug!(
        "waiting up to {:?} for the {} stamp of {} PGs to change",
        timeout,
        kind,
        pgs.len()
    );
    loop {
        let current = source.scrub_stamps(&pgs).await?;
        let unchanged = baseline.unchanged_in(&current, kind);
        if unchanged.is_empty() {
            info!("all {} PGs completed a {}", pgs.len(), kind);
            return Ok(StampWait {
                all_changed: true,
                changed: pgs,
                unchanged,
            });
        }
        if Instant::now() >= deadline {
            warn!(
                "{} of {} PGs did not complete a {} before the deadline: {:?}",
                unchanged.len(),
                pgs.len(),
                kind,
                unchanged
            );
            let changed = pgs
                .into_iter()
                .filter(|pg| !unchanged.contains(pg))
                .collect();
            return Ok(StampWait {
                all_changed: false,
                changed,
                unchanged,
            });
        }
        debug!(
            "{} of {} PGs still pending a {}",
            unchanged.len(),
            pgs.len(),
            kind
        );
        sleep(interval).await;
    }
}

/// Repeatedly poll the scrub queue detail of a PG until its forced flag matches `expected`, or
/// the timeout elapses. Returns whether the expected value was reached in time. How fast the
/// flag settles depends on cluster load, which is why the timeout is a parameter and not a
/// constant.
pub async fn wait_for_forced_flag(
    source: &dyn ClusterStateSource,
    pg: &PgId,
    expected: bool,
    timeout: Duration,
    interval: Duration,
) -> ScrubResult<bool> {
    let deadline = Instant::now() + timeout;
    debug!(
        "waiting up to {:?} for the forced flag of pg {} to become {}",
        timeout, pg, expected
    );
    loop {
        let details = source.scrub_details(pg).await?;
        if details.forced() == expected {
            debug!("forced flag of pg {} is now {}", pg, expected);
            return Ok(true);
        }
        if Instant::now() >= deadline {
            warn!(
                "forced flag of pg {} did not become {} before the deadline",
                pg, expected
            );
            return Ok(false);
        }
        sleep(interval).await;
    }
}
