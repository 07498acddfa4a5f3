use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use std::fmt;

/// The scrub schedule parameters a scenario may apply, in the order they are removed again at
/// teardown. Removal is idempotent, so a teardown can always sweep the full list.
pub const SCHEDULE_PARAMS: [&str; 7] = [
    "osd_scrub_min_interval",
    "osd_scrub_max_interval",
    "osd_deep_scrub_interval",
    "osd_scrub_begin_week_day",
    "osd_scrub_end_week_day",
    "osd_scrub_begin_hour",
    "osd_scrub_end_hour",
];

/// A scrub allowance window: the hour of day and day of week between which the scheduler is
/// allowed to start periodic scrubs.
///
/// Weekdays use the cron convention where Sunday is 0, which is what the cluster-side
/// `osd_scrub_*_week_day` options expect. This differs from the Monday-is-0 convention most
/// calendar libraries default to.
///
/// A window is computed fresh from the cluster clock for every scenario, applied as
/// configuration, and removed again at teardown. Begin and end are derived independently from
/// the same reference instant; nothing checks that the begin lies before the end, because an
/// inverted window is itself a state the cluster must handle and scenarios construct one on
/// purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrubWindow {
    begin_hour: u32,
    begin_weekday: u32,
    end_hour: u32,
    end_weekday: u32,
}

impl ScrubWindow {
    /// Compute the window from a reference time and two hour offsets. The reference is truncated
    /// to the hour, then each offset is added to the truncated reference (not to the other
    /// boundary) to get the begin and end instants. Offsets may be zero, positive or negative.
    pub fn compute(reference: NaiveDateTime, begin_offset_hours: i64, end_offset_hours: i64) -> ScrubWindow {
        // and_hms_opt cannot fail here, the hour comes from a valid datetime
        let reference = reference
            .date()
            .and_hms_opt(reference.hour(), 0, 0)
            .unwrap();
        let begin = reference + Duration::hours(begin_offset_hours);
        let end = reference + Duration::hours(end_offset_hours);
        ScrubWindow {
            begin_hour: begin.hour(),
            begin_weekday: begin.weekday().num_days_from_sunday(),
            end_hour: end.hour(),
            end_weekday: end.weekday().num_days_from_sunday(),
        }
    }

    /// Hour of day (0-23) at which the window opens.
    pub fn begin_hour(&self) -> u32 {
        self.begin_hour
    }

    /// Day of week (Sunday is 0) on which the window opens.
    pub fn begin_weekday(&self) -> u32 {
        self.begin_weekday
    }

    /// Hour of day (0-23) at which the window closes.
    pub fn end_hour(&self) -> u32 {
        self.end_hour
    }

    /// Day of week (Sunday is 0) on which the window closes.
    pub fn end_weekday(&self) -> u32 {
        self.end_weekday
    }

    /// Return the window as the cluster configuration parameters expressing it, ready to be
    /// applied through a state source.
    pub fn config_params(&self) -> [(&'static str, u32); 4] {
        [
            ("osd_scrub_begin_hour", self.begin_hour),
            ("osd_scrub_begin_week_day", self.begin_weekday),
            ("osd_scrub_end_hour", self.end_hour),
            ("osd_scrub_end_week_day", self.end_weekday),
        ]
    }
}

impl fmt::Display for ScrubWindow {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "begin_hour={} begin_weekday={} end_hour={} end_weekday={}",
            self.begin_hour, self.begin_weekday, self.end_hour, self.end_weekday
        )
    }
}
