use crate::stamps::ScrubKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// The full configuration for a verification run. This covers the binaries used to reach the
/// cluster, the scrub interval and window parameters applied during a scenario, and the cadence
/// and deadlines of the polling loops.
///
/// All knobs have defaults matching the values the scenarios were calibrated against on real
/// clusters, so an empty config file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Path to the ceph binary used to query and configure the cluster.
    #[serde(default = "default_ceph_bin_path")]
    ceph_bin_path: PathBuf,
    /// Path to the rados binary used for inconsistent object listings.
    #[serde(default = "default_rados_bin_path")]
    rados_bin_path: PathBuf,
    /// Value applied as osd_scrub_min_interval while a scenario runs, in seconds.
    #[serde(default = "default_scrub_min_interval_secs")]
    scrub_min_interval_secs: u64,
    /// Value applied as osd_scrub_max_interval while a shallow scrub scenario runs, in seconds.
    #[serde(default = "default_scrub_max_interval_secs")]
    scrub_max_interval_secs: u64,
    /// Value applied as osd_deep_scrub_interval while a deep scrub scenario runs, in seconds.
    #[serde(default = "default_deep_scrub_interval_secs")]
    deep_scrub_interval_secs: u64,
    /// Hours added to the reference time to get the start of the scrub allowance window.
    #[serde(default = "default_window_begin_offset_hours")]
    window_begin_offset_hours: i64,
    /// Hours added to the reference time to get the end of the scrub allowance window.
    #[serde(default = "default_window_end_offset_hours")]
    window_end_offset_hours: i64,
    /// Seconds between consecutive polls of the cluster state.
    #[serde(default = "default_poll_interval_secs")]
    poll_interval_secs: u64,
    /// Deadline for a scheduled shallow scrub to complete on all monitored PGs, in seconds.
    #[serde(default = "default_scrub_timeout_secs")]
    scrub_timeout_secs: u64,
    /// Deadline for a scheduled deep scrub to complete on all monitored PGs, in seconds.
    #[serde(default = "default_deep_scrub_timeout_secs")]
    deep_scrub_timeout_secs: u64,
    /// How long stamps are watched for (forbidden) changes while the noscrub flags are set, in
    /// seconds.
    #[serde(default = "default_suppression_window_secs")]
    suppression_window_secs: u64,
    /// Scrub interval value applied during the flag suppression scenario, in seconds. Kept short
    /// so a scrub would certainly be due if the flags failed to suppress it.
    #[serde(default = "default_suppression_interval_secs")]
    suppression_interval_secs: u64,
    /// Deadline for the per-PG forced flag to reach an expected value, in seconds. This is an
    /// empirical bound depending on cluster load, not a protocol guarantee.
    #[serde(default = "default_forced_flag_timeout_secs")]
    forced_flag_timeout_secs: u64,
    /// The amount of per-PG detail queries which may be in flight at once.
    #[serde(default = "default_query_concurrency")]
    query_concurrency: usize,
}

impl Config {
    /// validate the config. This makes sure the polling cadence is usable with the configured
    /// deadlines.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err("poll_interval_secs must be at least 1".to_string().into());
        }
        if self.query_concurrency == 0 {
            return Err("query_concurrency must be at least 1".to_string().into());
        }
        let min_timeout = self
            .scrub_timeout_secs
            .min(self.deep_scrub_timeout_secs)
            .min(self.suppression_window_secs)
            .min(self.forced_flag_timeout_secs);
        if self.poll_interval_secs >= min_timeout {
            return Err(format!(
                "poll_interval_secs ({}) must be smaller than every configured deadline (smallest is {})",
                self.poll_interval_secs, min_timeout
            )
            .into());
        }

        Ok(())
    }

    /// Path of the ceph binary to invoke.
    pub fn ceph_bin_path(&self) -> &PathBuf {
        &self.ceph_bin_path
    }

    /// Path of the rados binary to invoke.
    pub fn rados_bin_path(&self) -> &PathBuf {
        &self.rados_bin_path
    }

    /// The osd_scrub_min_interval value applied during scenarios, in seconds.
    pub fn scrub_min_interval_secs(&self) -> u64 {
        self.scrub_min_interval_secs
    }

    /// The osd_scrub_max_interval value applied during shallow scrub scenarios, in seconds.
    pub fn scrub_max_interval_secs(&self) -> u64 {
        self.scrub_max_interval_secs
    }

    /// The osd_deep_scrub_interval value applied during deep scrub scenarios, in seconds.
    pub fn deep_scrub_interval_secs(&self) -> u64 {
        self.deep_scrub_interval_secs
    }

    /// Hour offset from the reference time to the window begin.
    pub fn window_begin_offset_hours(&self) -> i64 {
        self.window_begin_offset_hours
    }

    /// Hour offset from the reference time to the window end.
    pub fn window_end_offset_hours(&self) -> i64 {
        self.window_end_offset_hours
    }

    /// Time between consecutive polls of the cluster state.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Deadline for the given scrub kind to complete on all monitored PGs.
    pub fn monitor_timeout(&self, kind: ScrubKind) -> Duration {
        match kind {
            ScrubKind::Scrub => Duration::from_secs(self.scrub_timeout_secs),
            ScrubKind::DeepScrub => Duration::from_secs(self.deep_scrub_timeout_secs),
        }
    }

    /// How long stamps are watched for changes while the suppression flags are set.
    pub fn suppression_window(&self) -> Duration {
        Duration::from_secs(self.suppression_window_secs)
    }

    /// Scrub interval value applied during the flag suppression scenario, in seconds.
    pub fn suppression_interval_secs(&self) -> u64 {
        self.suppression_interval_secs
    }

    /// Deadline for the per-PG forced flag to reach an expected value.
    pub fn forced_flag_timeout(&self) -> Duration {
        Duration::from_secs(self.forced_flag_timeout_secs)
    }

    /// The amount of per-PG detail queries which may be in flight at once.
    pub fn query_concurrency(&self) -> usize {
        self.query_concurrency
    }
}

fn default_ceph_bin_path() -> PathBuf {
    PathBuf::from("ceph")
}

fn default_rados_bin_path() -> PathBuf {
    PathBuf::from("rados")
}

fn default_scrub_min_interval_secs() -> u64 {
    240
}

fn default_scrub_max_interval_secs() -> u64 {
    900
}

fn default_deep_scrub_interval_secs() -> u64 {
    900
}

fn default_window_begin_offset_hours() -> i64 {
    0
}

fn default_window_end_offset_hours() -> i64 {
    1
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_scrub_timeout_secs() -> u64 {
    900
}

fn default_deep_scrub_timeout_secs() -> u64 {
    1200
}

fn default_suppression_window_secs() -> u64 {
    600
}

fn default_suppression_interval_secs() -> u64 {
    60
}

fn default_forced_flag_timeout_secs() -> u64 {
    1200
}

fn default_query_concurrency() -> usize {
    5
}

/// An error in the configuration
#[derive(Debug)]
pub struct ConfigError {
    msg: String,
}

use std::fmt;
impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

// default impls are fine here
impl std::error::Error for ConfigError {}

impl From<String> for ConfigError {
    fn from(s: String) -> Self {
        ConfigError { msg: s }
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use crate::stamps::ScrubKind;
    use std::time::Duration;

    fn full_config() -> Config {
        Config {
            ceph_bin_path: "/usr/bin/ceph".parse().unwrap(),
            rados_bin_path: "/usr/bin/rados".parse().unwrap(),
            scrub_min_interval_secs: 240,
            scrub_max_interval_secs: 900,
            deep_scrub_interval_secs: 900,
            window_begin_offset_hours: 0,
            window_end_offset_hours: 1,
            poll_interval_secs: 2,
            scrub_timeout_secs: 900,
            deep_scrub_timeout_secs: 1200,
            suppression_window_secs: 600,
            suppression_interval_secs: 60,
            forced_flag_timeout_secs: 1200,
            query_concurrency: 5,
        }
    }

    const FULL_CONFIG_TOML: &str = r#"ceph_bin_path = "/usr/bin/ceph"
rados_bin_path = "/usr/bin/rados"
scrub_min_interval_secs = 240
scrub_max_interval_secs = 900
deep_scrub_interval_secs = 900
window_begin_offset_hours = 0
window_end_offset_hours = 1
poll_interval_secs = 2
scrub_timeout_secs = 900
deep_scrub_timeout_secs = 1200
suppression_window_secs = 600
suppression_interval_secs = 60
forced_flag_timeout_secs = 1200
query_concurrency = 5
"#;

    #[test]
    fn encoding() {
        assert_eq!(toml::to_string(&full_config()).unwrap(), FULL_CONFIG_TOML);
    }

    #[test]
    fn decoding() {
        assert_eq!(
            toml::from_str::<Config>(FULL_CONFIG_TOML).unwrap(),
            full_config()
        );
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.ceph_bin_path(), &"ceph".parse::<std::path::PathBuf>().unwrap());
        assert_eq!(cfg.poll_interval(), Duration::from_secs(2));
        assert_eq!(cfg.monitor_timeout(ScrubKind::Scrub), Duration::from_secs(900));
        assert_eq!(
            cfg.monitor_timeout(ScrubKind::DeepScrub),
            Duration::from_secs(1200)
        );
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let cfg: Config = toml::from_str("poll_interval_secs = 0").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn poll_interval_must_fit_deadlines() {
        let cfg: Config =
            toml::from_str("poll_interval_secs = 700\nsuppression_window_secs = 600").unwrap();
        assert!(cfg.validate().is_err());
    }
}
