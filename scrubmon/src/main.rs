use chrono::Local;
use log::{error, info, LevelFilter};
use log4rs::append::rolling_file::policy::compound::{
    roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
};
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config as LogConfig, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::filter::{Filter, Response};
use scrubmon::ceph::CephCli;
use scrubmon::config::Config;
use scrubmon::repair::RepairPolicy;
use scrubmon::scenario;
use scrubmon::source::ClusterStateSource;
use scrubmon::stamps::{PgId, ScrubKind};
use scrubmon::window::ScrubWindow;
use scrubmon::{ScrubError, ScrubResult};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use structopt::StructOpt;

const MIB: u64 = 1 << 20;

#[derive(StructOpt, Debug)]
#[structopt(about = "scrub schedule verifier")]
/// Scrub schedule verifier
///
/// Drives a storage cluster through scrub scheduling scenarios and verifies the observed
/// behavior: periodic scheduling inside a time window, suppression through the noscrub flags,
/// and the automatic repair policy. Scenarios always remove the configuration they applied,
/// regardless of their outcome.
struct Opts {
    /// Path to the config file to use for this invocation.
    #[structopt(
        name = "config",
        default_value = "scrubmon_config.toml",
        long,
        short,
        parse(from_os_str)
    )]
    config: PathBuf,
    /// Path to the log file to use. The logfile will automatically roll over if the size
    /// increases beyond 10MiB.
    #[structopt(
        name = "log_file",
        default_value = "scrubmon.log",
        long,
        parse(from_os_str)
    )]
    log_file: PathBuf,
    #[structopt(subcommand)]
    cmd: Cmd,
}

#[derive(StructOpt, Debug)]
enum Cmd {
    /// Print the scrub window which would be applied right now
    ///
    /// Computes the scrub allowance window from the local clock and the hour offsets in the
    /// config file, without touching the cluster. Useful to inspect the hour and weekday values
    /// (Sunday is 0) a scenario would apply.
    Window,
    /// Verify periodic scrub scheduling inside a fresh time window
    ///
    /// Computes a scrub allowance window from the cluster clock, applies it together with
    /// shortened scrub intervals, and monitors the given placement groups until all of them
    /// complete the operation or the deadline passes. The schedule descriptions observed along
    /// the way must show at least one PG going through the full cycle: periodic scheduled,
    /// queued, scrubbing, periodic scheduled again.
    QueueTiming {
        /// Verify deep scrubs instead of shallow scrubs.
        #[structopt(name = "deep", long, short)]
        deep: bool,
        /// The placement groups to monitor.
        #[structopt(name = "pg", required = true)]
        pgs: Vec<PgId>,
    },
    /// Verify that the noscrub flags suppress scheduled scrubs
    ///
    /// Sets the noscrub and nodeep-scrub flags, shortens the scrub intervals so a scrub would
    /// certainly be due, and watches the given placement groups: no scrub stamp may move while
    /// the flags are set. Afterwards the nodeep-scrub flag is lifted and every PG must complete
    /// a deep scrub within the deadline.
    FlagSuppression {
        /// The placement groups to monitor.
        #[structopt(name = "pg", required = true)]
        pgs: Vec<PgId>,
    },
    /// Verify the auto-repair policy on a PG holding inconsistent objects
    ///
    /// Applies the given auto-repair policy, requests a scrub of the PG and waits for it to
    /// complete. When repair is expected the inconsistent object count must drop to zero,
    /// otherwise it must be untouched. Note that a count equal to the threshold is not
    /// repaired.
    AutoRepair {
        /// The placement group holding the inconsistent objects.
        #[structopt(name = "pg")]
        pg: PgId,
        /// Enable automatic repair for the run.
        #[structopt(name = "enable", long, short)]
        enable: bool,
        /// The osd_scrub_auto_repair_num_errors value to apply.
        #[structopt(name = "threshold", long, short, default_value = "5")]
        threshold: u64,
        /// Use a deep scrub instead of a shallow scrub.
        #[structopt(name = "deep", long, short)]
        deep: bool,
    },
}

/// ModuleFilter is a naive log filter which only allows (child modules of) a given module.
#[derive(Debug)]
struct ModuleFilter {
    module: String,
}

impl Filter for ModuleFilter {
    fn filter(&self, record: &log::Record) -> Response {
        if let Some(mod_path) = record.module_path() {
            // this is technically not correct but sufficient for our purposes
            if mod_path.starts_with(self.module.as_str()) {
                return Response::Neutral;
            }
        }
        Response::Reject
    }
}

#[actix_rt::main]
async fn main() -> ScrubResult<()> {
    if let Err(e) = real_main().await {
        error!("{}", e);
        return Err(e);
    }

    Ok(())
}

async fn real_main() -> ScrubResult<()> {
    let opts = Opts::from_args();

    let mut rolled_log_file = opts.log_file.clone();
    let name = if let Some(ext) = rolled_log_file.extension() {
        format!(
            "{}.{{}}.{}",
            rolled_log_file.file_stem().unwrap().to_str().unwrap(),
            ext.to_str().unwrap(),
        )
    } else {
        format!(
            "{}.{{}}",
            rolled_log_file.file_stem().unwrap().to_str().unwrap(),
        )
    };
    rolled_log_file.set_file_name(name);

    // init logger
    let policy = CompoundPolicy::new(
        Box::new(SizeTrigger::new(10 * MIB)),
        Box::new(
            FixedWindowRoller::builder()
                .build(rolled_log_file.to_str().unwrap(), 5)
                .unwrap(),
        ),
    );
    let log_file = RollingFileAppender::builder()
        .append(true)
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S %Z)(local)}: {l} {m}{n}",
        )))
        .build(&opts.log_file, Box::new(policy))
        .unwrap();
    let log_config = LogConfig::builder()
        .appender(
            Appender::builder()
                .filter(Box::new(ModuleFilter {
                    module: "scrubmon".to_string(),
                }))
                .build("logfile", Box::new(log_file)),
        )
        .logger(Logger::builder().build("filelogger", LevelFilter::Debug))
        .build(
            Root::builder()
                .appender("logfile")
                .build(log::LevelFilter::Debug),
        )
        .unwrap();
    log4rs::init_config(log_config).unwrap();

    let cfg = read_cfg(&opts.config)?;

    match opts.cmd {
        Cmd::Window => {
            let window = ScrubWindow::compute(
                Local::now().naive_local(),
                cfg.window_begin_offset_hours(),
                cfg.window_end_offset_hours(),
            );
            println!("{}", window);
        }
        Cmd::QueueTiming { deep, pgs } => {
            let kind = scrub_kind(deep);
            info!("starting queue timing verification ({}) for {} PGs", kind, pgs.len());
            let report = scenario::run_queue_timing(build_source(&cfg), &cfg, kind, &pgs).await?;
            if report.passed() {
                // unwrap is safe, a passing report always carries a match
                println!(
                    "queue timing verification passed, pg {} exhibited the full scheduling cycle",
                    report.verdict().matched().unwrap().pg()
                );
            } else {
                if !report.wait().all_changed() {
                    println!(
                        "PGs without a completed {}: {:?}",
                        kind,
                        report.wait().unchanged()
                    );
                }
                if !report.verdict().is_match() {
                    println!("no PG exhibited the full scheduling cycle");
                }
                println!("queue timing verification failed, see the log for details");
                process::exit(1);
            }
        }
        Cmd::FlagSuppression { pgs } => {
            info!("starting flag suppression verification for {} PGs", pgs.len());
            let report = scenario::run_flag_suppression(build_source(&cfg), &cfg, &pgs).await?;
            if report.passed() {
                println!("flag suppression verification passed");
            } else {
                if !report.violations().is_empty() {
                    println!(
                        "PGs scrubbed while the flags were set: {:?}",
                        report.violations()
                    );
                }
                if !report.resumed().all_changed() {
                    println!(
                        "PGs without a deep scrub after lifting nodeep-scrub: {:?}",
                        report.resumed().unchanged()
                    );
                }
                println!("flag suppression verification failed, see the log for details");
                process::exit(1);
            }
        }
        Cmd::AutoRepair {
            pg,
            enable,
            threshold,
            deep,
        } => {
            let kind = scrub_kind(deep);
            let repair_policy = RepairPolicy::new(enable, threshold);
            info!(
                "starting auto-repair verification ({}) on pg {} with policy {}",
                kind, pg, repair_policy
            );
            let report =
                scenario::run_auto_repair(build_source(&cfg), &cfg, kind, &pg, repair_policy)
                    .await?;
            if report.passed() {
                println!(
                    "auto-repair verification passed, {} inconsistent objects before, {} after",
                    report.inconsistent_before(),
                    report.inconsistent_after()
                );
            } else {
                if !report.scrub_completed() {
                    println!("the requested {} never completed on pg {}", kind, pg);
                }
                if !report.policy_followed() {
                    println!(
                        "inconsistent object count went from {} to {}, violating the policy",
                        report.inconsistent_before(),
                        report.inconsistent_after()
                    );
                }
                println!("auto-repair verification failed, see the log for details");
                process::exit(1);
            }
        }
    };

    Ok(())
}

fn scrub_kind(deep: bool) -> ScrubKind {
    if deep {
        ScrubKind::DeepScrub
    } else {
        ScrubKind::Scrub
    }
}

fn build_source(cfg: &Config) -> Arc<dyn ClusterStateSource + Send + Sync> {
    Arc::new(CephCli::new(
        cfg.ceph_bin_path().clone(),
        cfg.rados_bin_path().clone(),
    ))
}

fn read_cfg(config: &Path) -> ScrubResult<Config> {
    let mut cfg_file = File::open(config)
        .map_err(|e| ScrubError::new_io("could not open config file".to_string(), e))?;
    let mut cfg_str = String::new();
    cfg_file
        .read_to_string(&mut cfg_str)
        .map_err(|e| ScrubError::new_io("could not read config file".to_string(), e))?;

    let cfg: Config = toml::from_str(&cfg_str)?;
    cfg.validate()?;
    Ok(cfg)
}
