use crate::source::{ClusterStateSource, ScrubDetails, SourceError};
use crate::stamps::{PgId, PgStamps, ScrubKind, StampSnapshot};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use log::trace;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// The result type for ceph command line invocations
pub type CephCliResult<T> = Result<T, CephCliError>;

/// A cluster state source backed by the ceph and rados command line tools. Every query spawns
/// the tool with json output and parses the result; every configuration change spawns it and
/// checks the exit code.
///
/// The reference time is taken from the local clock, so the harness is expected to run on a
/// node whose clock is synchronized with the cluster, the way an admin node is.
#[derive(Debug, Clone)]
pub struct CephCli {
    ceph_bin: PathBuf,
    rados_bin: PathBuf,
}

impl CephCli {
    /// Create a new instance using the given ceph and rados binaries.
    pub fn new(ceph_bin: PathBuf, rados_bin: PathBuf) -> CephCli {
        CephCli {
            ceph_bin,
            rados_bin,
        }
    }

    /// Path of the ceph binary being invoked.
    pub fn ceph_bin(&self) -> &Path {
        &self.ceph_bin
    }

    /// Path of the rados binary being invoked.
    pub fn rados_bin(&self) -> &Path {
        &self.rados_bin
    }

    /// Run a command with json output and parse its stdout.
    async fn run_json<T: DeserializeOwned>(&self, bin: &Path, args: &[&str]) -> CephCliResult<T> {
        trace!("running {:?} {:?} --format json", bin, args);
        let output = Command::new(bin)
            .args(args)
            .args(["--format", "json"])
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(CephCliError {
                kind: ErrorKind::Runtime,
                internal: InternalError::Message(format!(
                    "{:?} {:?} finished with none zero exit code: {}",
                    bin,
                    args,
                    String::from_utf8_lossy(&output.stderr).trim()
                )),
            });
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    /// Run a command for its side effect only, checking the exit code.
    async fn run_checked(&self, bin: &Path, args: &[&str]) -> CephCliResult<()> {
        trace!("running {:?} {:?}", bin, args);
        if Command::new(bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?
            .wait()
            .await?
            .success()
        {
            Ok(())
        } else {
            Err(CephCliError {
                kind: ErrorKind::Runtime,
                internal: InternalError::Message(format!(
                    "{:?} {:?} finished with none zero exit code",
                    bin, args
                )),
            })
        }
    }

    async fn pg_dump(&self) -> CephCliResult<PgDump> {
        self.run_json(&self.ceph_bin, &["pg", "dump", "pgs"]).await
    }
}

fn source_err(e: CephCliError) -> SourceError {
    SourceError::new(Box::new(e))
}

#[async_trait]
impl ClusterStateSource for CephCli {
    async fn reference_time(&self) -> Result<NaiveDateTime, SourceError> {
        Ok(Local::now().naive_local())
    }

    async fn scrub_stamps(&self, pgs: &[PgId]) -> Result<StampSnapshot, SourceError> {
        let dump = self.pg_dump().await.map_err(source_err)?;
        let wanted: HashSet<&str> = pgs.iter().map(|pg| pg.as_str()).collect();
        let mut snapshot = StampSnapshot::new();
        for stat in dump.pg_stats {
            if !wanted.contains(stat.pgid.as_str()) {
                continue;
            }
            snapshot.insert(
                PgId::new(stat.pgid),
                PgStamps::new(stat.last_scrub_stamp, stat.last_deep_scrub_stamp),
            );
        }
        Ok(snapshot)
    }

    async fn scrub_schedules(&self, pgs: &[PgId]) -> Result<HashMap<PgId, String>, SourceError> {
        let dump = self.pg_dump().await.map_err(source_err)?;
        let wanted: HashSet<&str> = pgs.iter().map(|pg| pg.as_str()).collect();
        Ok(dump
            .pg_stats
            .into_iter()
            .filter(|stat| wanted.contains(stat.pgid.as_str()))
            .filter_map(|stat| stat.scrub_schedule.map(|s| (PgId::new(stat.pgid), s)))
            .collect())
    }

    async fn scrub_details(&self, pg: &PgId) -> Result<ScrubDetails, SourceError> {
        let query: PgQuery = self
            .run_json(&self.ceph_bin, &["pg", pg.as_str(), "query"])
            .await
            .map_err(source_err)?;
        if query.acting_primary < 0 {
            return Err(source_err(CephCliError {
                kind: ErrorKind::Runtime,
                internal: InternalError::Message(format!("pg {} has no acting primary", pg)),
            }));
        }
        let osd = format!("osd.{}", query.acting_primary);
        let scrubs: Vec<DumpScrubsEntry> = self
            .run_json(&self.ceph_bin, &["tell", &osd, "dump_scrubs"])
            .await
            .map_err(source_err)?;
        scrubs
            .into_iter()
            .find(|entry| entry.pgid == pg.as_str())
            .map(|entry| ScrubDetails::new(entry.forced, entry.sched_time))
            .ok_or_else(|| {
                source_err(CephCliError {
                    kind: ErrorKind::Runtime,
                    internal: InternalError::Message(format!(
                        "pg {} not present in dump_scrubs of its primary {}",
                        pg, osd
                    )),
                })
            })
    }

    async fn inconsistent_object_count(&self, pg: &PgId) -> Result<u64, SourceError> {
        let listing: InconsistentListing = self
            .run_json(&self.rados_bin, &["list-inconsistent-obj", pg.as_str()])
            .await
            .map_err(source_err)?;
        Ok(listing.inconsistents.len() as u64)
    }

    async fn request_scrub(&self, pg: &PgId, kind: ScrubKind) -> Result<(), SourceError> {
        let op = match kind {
            ScrubKind::Scrub => "scrub",
            ScrubKind::DeepScrub => "deep-scrub",
        };
        self.run_checked(&self.ceph_bin, &["pg", op, pg.as_str()])
            .await
            .map_err(source_err)
    }

    async fn set_osd_config(&self, name: &str, value: &str) -> Result<(), SourceError> {
        self.run_checked(&self.ceph_bin, &["config", "set", "osd", name, value])
            .await
            .map_err(source_err)
    }

    async fn remove_osd_config(&self, name: &str) -> Result<(), SourceError> {
        self.run_checked(&self.ceph_bin, &["config", "rm", "osd", name])
            .await
            .map_err(source_err)
    }

    async fn set_osd_flag(&self, flag: &str) -> Result<(), SourceError> {
        self.run_checked(&self.ceph_bin, &["osd", "set", flag])
            .await
            .map_err(source_err)
    }

    async fn unset_osd_flag(&self, flag: &str) -> Result<(), SourceError> {
        self.run_checked(&self.ceph_bin, &["osd", "unset", flag])
            .await
            .map_err(source_err)
    }
}

#[derive(Debug, Deserialize)]
struct PgDump {
    pg_stats: Vec<PgStat>,
}

#[derive(Debug, Deserialize)]
struct PgStat {
    pgid: String,
    #[serde(default)]
    last_scrub_stamp: Option<String>,
    #[serde(default)]
    last_deep_scrub_stamp: Option<String>,
    #[serde(default)]
    scrub_schedule: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PgQuery {
    acting_primary: i64,
}

#[derive(Debug, Deserialize)]
struct DumpScrubsEntry {
    pgid: String,
    forced: bool,
    sched_time: String,
}

#[derive(Debug, Deserialize)]
struct InconsistentListing {
    inconsistents: Vec<serde_json::Value>,
}

/// An error from invoking the ceph or rados binary
#[derive(Debug)]
pub struct CephCliError {
    kind: ErrorKind,
    internal: InternalError,
}

impl fmt::Display for CephCliError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} error in cluster cli: {}", self.kind, self.internal)
    }
}

impl std::error::Error for CephCliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.internal {
            InternalError::IO(ref e) => Some(e),
            InternalError::Json(ref e) => Some(e),
            InternalError::Message(_) => None,
        }
    }
}

/// The part of the command invocation the error originated in.
#[derive(Debug)]
pub enum ErrorKind {
    /// Spawning or waiting on the process failed.
    IO,
    /// The process ran but reported failure.
    Runtime,
    /// The process output could not be parsed.
    Format,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ErrorKind::IO => "I/O",
                ErrorKind::Runtime => "Runtime",
                ErrorKind::Format => "Format",
            }
        )
    }
}

#[derive(Debug)]
enum InternalError {
    IO(io::Error),
    Json(serde_json::Error),
    Message(String),
}

impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                InternalError::IO(ref e) => e as &dyn fmt::Display,
                InternalError::Json(ref e) => e,
                InternalError::Message(ref e) => e,
            }
        )
    }
}

impl From<io::Error> for CephCliError {
    fn from(e: io::Error) -> Self {
        CephCliError {
            kind: ErrorKind::IO,
            internal: InternalError::IO(e),
        }
    }
}

impl From<serde_json::Error> for CephCliError {
    fn from(e: serde_json::Error) -> Self {
        CephCliError {
            kind: ErrorKind::Format,
            internal: InternalError::Json(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DumpScrubsEntry, InconsistentListing, PgDump, PgQuery};

    #[test]
    fn pg_dump_parses_stats() {
        let raw = r#"{
            "pg_ready": true,
            "pg_stats": [
                {
                    "pgid": "1.0",
                    "state": "active+clean",
                    "last_scrub_stamp": "2024-01-07T10:00:00.000000+0000",
                    "last_deep_scrub_stamp": "2024-01-06T10:00:00.000000+0000",
                    "scrub_schedule": "periodic scrub scheduled @ 2024-01-07T11:00:00",
                    "reported_epoch": 123
                },
                {
                    "pgid": "1.1",
                    "state": "active+clean",
                    "last_scrub_stamp": "2024-01-07T10:00:00.000000+0000",
                    "last_deep_scrub_stamp": "2024-01-06T10:00:00.000000+0000"
                }
            ]
        }"#;
        let dump: PgDump = serde_json::from_str(raw).unwrap();
        assert_eq!(dump.pg_stats.len(), 2);
        assert_eq!(dump.pg_stats[0].pgid, "1.0");
        assert_eq!(
            dump.pg_stats[0].scrub_schedule.as_deref(),
            Some("periodic scrub scheduled @ 2024-01-07T11:00:00")
        );
        assert!(dump.pg_stats[1].scrub_schedule.is_none());
    }

    #[test]
    fn pg_query_parses_acting_primary() {
        let raw = r#"{
            "snap_trimq": "[]",
            "state": "active+clean",
            "epoch": 210,
            "up": [2, 0, 1],
            "acting": [2, 0, 1],
            "acting_primary": 2,
            "up_primary": 2,
            "info": {"pgid": "1.0"}
        }"#;
        let query: PgQuery = serde_json::from_str(raw).unwrap();
        assert_eq!(query.acting_primary, 2);
    }

    #[test]
    fn dump_scrubs_parses_entries() {
        let raw = r#"[
            {
                "pgid": "1.0",
                "sched_time": "2024-01-07T11:00:00.000000+0000",
                "orig_sched_time": "2024-01-07T11:00:00.000000+0000",
                "deadline": "2024-01-08T11:00:00.000000+0000",
                "forced": false
            },
            {
                "pgid": "1.1",
                "sched_time": "2024-01-07T11:30:00.000000+0000",
                "orig_sched_time": "2024-01-07T11:30:00.000000+0000",
                "deadline": "2024-01-08T11:30:00.000000+0000",
                "forced": true
            }
        ]"#;
        let entries: Vec<DumpScrubsEntry> = serde_json::from_str(raw).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].forced);
        assert!(entries[1].forced);
        assert_eq!(entries[1].pgid, "1.1");
    }

    #[test]
    fn inconsistent_listing_counts_objects() {
        let raw = r#"{
            "epoch": 210,
            "inconsistents": [
                {"object": {"name": "obj1"}},
                {"object": {"name": "obj2"}},
                {"object": {"name": "obj3"}}
            ]
        }"#;
        let listing: InconsistentListing = serde_json::from_str(raw).unwrap();
        assert_eq!(listing.inconsistents.len(), 3);
    }
}
