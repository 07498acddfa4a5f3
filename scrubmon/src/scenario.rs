use crate::actors::collector::{CollectEvents, CollectorActor};
use crate::config::Config;
use crate::poller::{wait_for_forced_flag, wait_for_stamp_change, StampWait};
use crate::repair::RepairPolicy;
use crate::sequence::{verify_sequence, EventsByPg, SequenceVerdict};
use crate::source::ClusterStateSource;
use crate::stamps::{PgId, ScrubKind};
use crate::window::{ScrubWindow, SCHEDULE_PARAMS};
use crate::{ScrubError, ScrubErrorKind, ScrubResult};
use actix::Actor;
use futures::stream::{self, StreamExt};
use log::{error, info, warn};
use prettytable::{row, Table};
use std::io;
use std::sync::Arc;

/// The flags set to suppress scheduled scrubs, in the order they are unset again at teardown.
const SUPPRESSION_FLAGS: [&str; 2] = ["noscrub", "nodeep-scrub"];

/// The auto-repair options a scenario may apply, removed again at teardown.
const AUTO_REPAIR_PARAMS: [&str; 2] = ["osd_scrub_auto_repair", "osd_scrub_auto_repair_num_errors"];

/// The outcome of the queue timing scenario: the window that was applied, whether all monitored
/// PGs completed the scheduled operation, and whether some PG exhibited the full scheduling
/// cycle.
#[derive(Debug, Clone)]
pub struct QueueTimingReport {
    window: ScrubWindow,
    wait: StampWait,
    verdict: SequenceVerdict,
}

impl QueueTimingReport {
    /// Whether the scenario as a whole passed.
    pub fn passed(&self) -> bool {
        self.wait.all_changed() && self.verdict.is_match()
    }

    /// The scrub window that was applied for the run.
    pub fn window(&self) -> &ScrubWindow {
        &self.window
    }

    /// The stamp wait outcome, listing PGs which never completed the operation.
    pub fn wait(&self) -> &StampWait {
        &self.wait
    }

    /// The sequence verification verdict, with per-PG diagnostics on failure.
    pub fn verdict(&self) -> &SequenceVerdict {
        &self.verdict
    }
}

/// The outcome of the flag suppression scenario.
#[derive(Debug, Clone)]
pub struct FlagSuppressionReport {
    violations: Vec<PgId>,
    resumed: StampWait,
}

impl FlagSuppressionReport {
    /// Whether the scenario as a whole passed: nothing scrubbed while the flags were set, and
    /// deep scrubbing resumed once the nodeep-scrub flag was lifted.
    pub fn passed(&self) -> bool {
        self.violations.is_empty() && self.resumed.all_changed()
    }

    /// PGs which completed a scrub even though the suppression flags were set.
    pub fn violations(&self) -> &[PgId] {
        &self.violations
    }

    /// The deep scrub stamp wait outcome after lifting the nodeep-scrub flag.
    pub fn resumed(&self) -> &StampWait {
        &self.resumed
    }
}

/// The outcome of the auto-repair scenario.
#[derive(Debug, Clone)]
pub struct AutoRepairReport {
    policy: RepairPolicy,
    inconsistent_before: u64,
    inconsistent_after: u64,
    forced_observed: bool,
    scrub_completed: bool,
}

impl AutoRepairReport {
    /// Whether the scenario as a whole passed: the requested scrub completed and the
    /// inconsistent object count moved exactly as the policy dictates.
    pub fn passed(&self) -> bool {
        self.scrub_completed && self.policy_followed()
    }

    /// Whether the observed count change matches the configured policy.
    pub fn policy_followed(&self) -> bool {
        self.policy
            .verify(self.inconsistent_before, self.inconsistent_after)
    }

    /// The policy that was applied for the run.
    pub fn policy(&self) -> &RepairPolicy {
        &self.policy
    }

    /// Inconsistent object count before the scrub.
    pub fn inconsistent_before(&self) -> u64 {
        self.inconsistent_before
    }

    /// Inconsistent object count after the scrub.
    pub fn inconsistent_after(&self) -> u64 {
        self.inconsistent_after
    }

    /// Whether the forced flag was observed while the requested scrub was pending. On a fast
    /// cluster the scrub can finish before the flag is sampled, so this is informational.
    pub fn forced_observed(&self) -> bool {
        self.forced_observed
    }

    /// Whether the requested scrub completed within its deadline.
    pub fn scrub_completed(&self) -> bool {
        self.scrub_completed
    }
}

/// Verify that the scrub queue schedules, executes and re-arms periodic scrubs inside a freshly
/// applied allowance window.
///
/// The window and interval parameters are computed from the cluster clock, applied, and always
/// removed again before this returns, regardless of the outcome. The scrub stamps of the given
/// PGs are polled until all of them complete the operation or the deadline passes, while a
/// collector samples the per-PG schedule descriptions; afterwards the collected events are
/// checked for the canonical scheduling cycle.
pub async fn run_queue_timing(
    source: Arc<dyn ClusterStateSource + Send + Sync>,
    cfg: &Config,
    kind: ScrubKind,
    pgs: &[PgId],
) -> ScrubResult<QueueTimingReport> {
    let reference = source.reference_time().await?;
    let window = ScrubWindow::compute(
        reference,
        cfg.window_begin_offset_hours(),
        cfg.window_end_offset_hours(),
    );
    info!("computed scrub window from reference {}: {}", reference, window);

    forced_scrub_precheck(&source, pgs, cfg.query_concurrency()).await;

    let outcome = monitor_queue_timing(&source, cfg, kind, pgs, window).await;
    remove_schedule_params(source.as_ref()).await;
    outcome
}

async fn monitor_queue_timing(
    source: &Arc<dyn ClusterStateSource + Send + Sync>,
    cfg: &Config,
    kind: ScrubKind,
    pgs: &[PgId],
    window: ScrubWindow,
) -> ScrubResult<QueueTimingReport> {
    apply_schedule_params(source.as_ref(), cfg, kind, &window).await?;

    let baseline = source.scrub_stamps(pgs).await?;
    if baseline.is_empty() {
        return Err(no_stamps_error(pgs));
    }
    info!(
        "baseline taken, monitoring {} PGs for a {} for up to {:?}",
        baseline.len(),
        kind,
        cfg.monitor_timeout(kind)
    );

    let collector =
        CollectorActor::new(source.clone(), pgs.to_vec(), cfg.poll_interval()).start();

    let wait = wait_for_stamp_change(
        source.as_ref(),
        &baseline,
        kind,
        cfg.monitor_timeout(kind),
        cfg.poll_interval(),
    )
    .await?;

    let events = collector.send(CollectEvents).await?;
    log_event_table(&events);

    let verdict = verify_sequence(&events);
    match verdict.matched() {
        Some(matched) => info!(
            "pg {} completed a full scheduling cycle (periodic={}, main={}, scrubbing={}, rearm={})",
            matched.pg(),
            matched.periodic_index(),
            matched.main_index(),
            matched.scrubbing_index(),
            matched.rearm_index()
        ),
        None => {
            error!(
                "no PG exhibited the periodic, queued, scrubbing, periodic cycle within {:?}",
                cfg.monitor_timeout(kind)
            );
            for (pg, reason) in verdict.failures() {
                warn!("pg {}: {}", pg, reason);
            }
        }
    }

    Ok(QueueTimingReport {
        window,
        wait,
        verdict,
    })
}

/// Verify that the noscrub and nodeep-scrub flags suppress scheduled scrubs, and that lifting
/// the nodeep-scrub flag lets deep scrubs resume. Flags and interval parameters are always
/// removed again before this returns.
pub async fn run_flag_suppression(
    source: Arc<dyn ClusterStateSource + Send + Sync>,
    cfg: &Config,
    pgs: &[PgId],
) -> ScrubResult<FlagSuppressionReport> {
    let outcome = flag_suppression_inner(&source, cfg, pgs).await;
    for flag in SUPPRESSION_FLAGS {
        if let Err(e) = source.unset_osd_flag(flag).await {
            warn!("could not unset flag {}: {}", flag, e);
        }
    }
    remove_schedule_params(source.as_ref()).await;
    outcome
}

async fn flag_suppression_inner(
    source: &Arc<dyn ClusterStateSource + Send + Sync>,
    cfg: &Config,
    pgs: &[PgId],
) -> ScrubResult<FlagSuppressionReport> {
    for flag in SUPPRESSION_FLAGS {
        source.set_osd_flag(flag).await?;
        info!("flag {} set", flag);
    }

    // keep the intervals short, so a scrub would certainly be due if the flags failed
    let interval_value = cfg.suppression_interval_secs().to_string();
    source
        .set_osd_config("osd_scrub_min_interval", &interval_value)
        .await?;
    source
        .set_osd_config("osd_deep_scrub_interval", &interval_value)
        .await?;

    let baseline = source.scrub_stamps(pgs).await?;
    if baseline.is_empty() {
        return Err(no_stamps_error(pgs));
    }

    info!(
        "watching {} PGs for {:?}, no stamp may move while the flags are set",
        baseline.len(),
        cfg.suppression_window()
    );
    let shallow = wait_for_stamp_change(
        source.as_ref(),
        &baseline,
        ScrubKind::Scrub,
        cfg.suppression_window(),
        cfg.poll_interval(),
    )
    .await?;
    let mut violations: Vec<PgId> = shallow.changed().to_vec();

    let current = source.scrub_stamps(&baseline.pg_ids()).await?;
    let deep_unchanged = baseline.unchanged_in(&current, ScrubKind::DeepScrub);
    for pg in baseline.pg_ids() {
        if !deep_unchanged.contains(&pg) && !violations.contains(&pg) {
            violations.push(pg);
        }
    }
    violations.sort();

    if violations.is_empty() {
        info!("no PG scrubbed while the suppression flags were set");
    } else {
        error!(
            "scrub started on PGs {:?} after the noscrub and nodeep-scrub flags were set",
            violations
        );
    }

    source.unset_osd_flag("nodeep-scrub").await?;
    info!("nodeep-scrub flag unset, waiting for deep scrubs to resume");
    let resumed = wait_for_stamp_change(
        source.as_ref(),
        &current,
        ScrubKind::DeepScrub,
        cfg.monitor_timeout(ScrubKind::DeepScrub),
        cfg.poll_interval(),
    )
    .await?;

    Ok(FlagSuppressionReport {
        violations,
        resumed,
    })
}

/// Verify the auto-repair policy on a single PG holding inconsistent objects: apply the policy,
/// request a scrub, wait for it to complete, and check that the inconsistent object count moved
/// exactly as the policy dictates. The policy options are always removed again before this
/// returns.
pub async fn run_auto_repair(
    source: Arc<dyn ClusterStateSource + Send + Sync>,
    cfg: &Config,
    kind: ScrubKind,
    pg: &PgId,
    policy: RepairPolicy,
) -> ScrubResult<AutoRepairReport> {
    let outcome = auto_repair_inner(&source, cfg, kind, pg, policy).await;
    for name in AUTO_REPAIR_PARAMS {
        if let Err(e) = source.remove_osd_config(name).await {
            warn!("could not remove configuration {}: {}", name, e);
        }
    }
    outcome
}

async fn auto_repair_inner(
    source: &Arc<dyn ClusterStateSource + Send + Sync>,
    cfg: &Config,
    kind: ScrubKind,
    pg: &PgId,
    policy: RepairPolicy,
) -> ScrubResult<AutoRepairReport> {
    source
        .set_osd_config(
            "osd_scrub_auto_repair",
            if policy.auto_repair() { "true" } else { "false" },
        )
        .await?;
    source
        .set_osd_config(
            "osd_scrub_auto_repair_num_errors",
            &policy.num_errors_threshold().to_string(),
        )
        .await?;

    let inconsistent_before = source.inconsistent_object_count(pg).await?;
    info!(
        "pg {} holds {} inconsistent objects under policy {}, repair expected: {}",
        pg,
        inconsistent_before,
        policy,
        policy.repair_expected(inconsistent_before)
    );

    let baseline = source.scrub_stamps(std::slice::from_ref(pg)).await?;
    if baseline.is_empty() {
        return Err(no_stamps_error(std::slice::from_ref(pg)));
    }

    source.request_scrub(pg, kind).await?;
    info!("{} requested on pg {}", kind, pg);

    let forced_observed = wait_for_forced_flag(
        source.as_ref(),
        pg,
        true,
        cfg.forced_flag_timeout(),
        cfg.poll_interval(),
    )
    .await?;
    if !forced_observed {
        // a fast scrub can complete before the flag is ever sampled
        warn!("the requested {} was never observed as forced on pg {}", kind, pg);
    }

    let wait = wait_for_stamp_change(
        source.as_ref(),
        &baseline,
        kind,
        cfg.monitor_timeout(kind),
        cfg.poll_interval(),
    )
    .await?;
    let scrub_completed = wait.all_changed();

    let inconsistent_after = source.inconsistent_object_count(pg).await?;
    let report = AutoRepairReport {
        policy,
        inconsistent_before,
        inconsistent_after,
        forced_observed,
        scrub_completed,
    };
    if report.policy_followed() {
        info!(
            "pg {} went from {} to {} inconsistent objects, as the policy dictates",
            pg, inconsistent_before, inconsistent_after
        );
    } else {
        error!(
            "pg {} went from {} to {} inconsistent objects, which violates the policy ({})",
            pg, inconsistent_before, inconsistent_after, policy
        );
    }

    Ok(report)
}

/// Check upfront whether any monitored PG already has an operator requested scrub pending, since
/// that would bias a verdict about the periodic scheduler. Advisory only: problems are logged,
/// never fatal.
async fn forced_scrub_precheck(
    source: &Arc<dyn ClusterStateSource + Send + Sync>,
    pgs: &[PgId],
    concurrency: usize,
) {
    let checks = stream::iter(pgs.iter().map(|pg| {
        let source = source.clone();
        async move {
            match source.scrub_details(pg).await {
                Ok(details) if details.forced() => Some(pg.clone()),
                Ok(_) => None,
                Err(e) => {
                    warn!("could not fetch scrub details for pg {}: {}", pg, e);
                    None
                }
            }
        }
    }))
    .buffer_unordered(concurrency)
    .collect::<Vec<_>>()
    .await;

    let mut forced: Vec<PgId> = checks.into_iter().flatten().collect();
    if !forced.is_empty() {
        forced.sort();
        warn!(
            "PGs {:?} already have an operator requested scrub pending, the verdict may be biased",
            forced
        );
    }
}

async fn apply_schedule_params(
    source: &dyn ClusterStateSource,
    cfg: &Config,
    kind: ScrubKind,
    window: &ScrubWindow,
) -> ScrubResult<()> {
    for (name, value) in window.config_params() {
        source.set_osd_config(name, &value.to_string()).await?;
        info!("applied {}={}", name, value);
    }
    source
        .set_osd_config(
            "osd_scrub_min_interval",
            &cfg.scrub_min_interval_secs().to_string(),
        )
        .await?;
    match kind {
        ScrubKind::Scrub => {
            source
                .set_osd_config(
                    "osd_scrub_max_interval",
                    &cfg.scrub_max_interval_secs().to_string(),
                )
                .await?;
        }
        ScrubKind::DeepScrub => {
            source
                .set_osd_config(
                    "osd_deep_scrub_interval",
                    &cfg.deep_scrub_interval_secs().to_string(),
                )
                .await?;
        }
    }
    Ok(())
}

/// Remove every schedule parameter a scenario may have applied. Removal is idempotent on the
/// cluster side, so the full list is always swept; failures are logged and skipped, the
/// remaining parameters still get removed.
pub async fn remove_schedule_params(source: &dyn ClusterStateSource) {
    for name in SCHEDULE_PARAMS {
        if let Err(e) = source.remove_osd_config(name).await {
            warn!("could not remove configuration {}: {}", name, e);
        }
    }
}

fn log_event_table(events: &EventsByPg) {
    if events.is_empty() {
        info!("no scrub schedule events were collected");
        return;
    }
    let mut pgs: Vec<_> = events.keys().collect();
    pgs.sort();
    let mut table = Table::new();
    table.add_row(row!["PG", "observed schedule events"]);
    for pg in pgs {
        table.add_row(row![pg, events[pg].messages().join("\n")]);
    }
    info!("collected scrub schedule events:\n{}", table);
}

fn no_stamps_error(pgs: &[PgId]) -> ScrubError {
    ScrubError::new(
        ScrubErrorKind::Source,
        Box::new(io::Error::new(
            io::ErrorKind::NotFound,
            format!("the cluster reported no scrub stamps for PGs {:?}", pgs),
        )),
    )
}
