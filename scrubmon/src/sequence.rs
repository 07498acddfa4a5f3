use crate::stamps::PgId;
use std::collections::HashMap;
use std::fmt;

/// Messages marking a PG as queued for an upcoming scrub. The schedule descriptions reported by
/// the cluster are free text, so all keyword sets are matched by substring, never by equality.
pub const QUEUED_KEYWORDS: [&str; 2] = ["queued for scrub", "queued for deep scrub"];

/// Messages marking a periodic scrub as scheduled for a PG.
pub const PERIODIC_KEYWORDS: [&str; 2] = [
    "periodic deep scrub scheduled",
    "periodic scrub scheduled",
];

/// Messages marking a PG as actively scrubbing.
pub const SCRUBBING_KEYWORDS: [&str; 2] = ["scrubbing for", "deep scrubbing for"];

/// The schedule events observed for a single PG over a monitoring window, in observation order.
/// Appending is deduplicated on exact message content: the schedule description is sampled far
/// more often than it changes, and only changes are events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventLog {
    messages: Vec<String>,
}

impl EventLog {
    /// Create a new, empty event log.
    pub fn new() -> EventLog {
        EventLog {
            messages: Vec::new(),
        }
    }

    /// Create an event log from messages already collected in observation order. No deduplication
    /// is applied, the messages are taken as observed.
    pub fn from_messages(messages: Vec<String>) -> EventLog {
        EventLog { messages }
    }

    /// Record a newly sampled schedule message. Returns true if the message was new for this PG
    /// and has been appended, false if an identical message was recorded before.
    pub fn record(&mut self, message: String) -> bool {
        if self.messages.contains(&message) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// The recorded messages, in observation order.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// The amount of distinct messages recorded.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if no message was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// The event logs of all monitored PGs. Ordering between PGs carries no meaning, only the order
/// within a single PG's log does.
pub type EventsByPg = HashMap<PgId, EventLog>;

/// Why a single PG's event log did not contain the full scheduling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchFailure {
    /// No queued and no scrubbing message was observed at all.
    NoAnchor,
    /// No periodic schedule message was observed before the scrub activity.
    NoPeriodicBefore,
    /// A queued message was observed, but no scrubbing message after it.
    NoScrubbingAfterQueue,
    /// No periodic schedule message was observed after the scrubbing, so the queue never
    /// re-armed.
    NoRearm,
}

impl fmt::Display for MatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                MatchFailure::NoAnchor => "no queued or scrubbing message observed",
                MatchFailure::NoPeriodicBefore =>
                    "no periodic schedule message before the scrub activity",
                MatchFailure::NoScrubbingAfterQueue =>
                    "no scrubbing message after the queued message",
                MatchFailure::NoRearm => "no periodic schedule message after the scrubbing",
            }
        )
    }
}

/// A complete scheduling cycle found in one PG's event log. The indices point into that PG's
/// message list and are kept for logging and audit only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceMatch {
    pg: PgId,
    periodic_index: usize,
    main_index: usize,
    scrubbing_index: usize,
    rearm_index: usize,
}

impl SequenceMatch {
    /// The PG whose log contained the full cycle.
    pub fn pg(&self) -> &PgId {
        &self.pg
    }

    /// Index of the periodic schedule message anchoring the cycle.
    pub fn periodic_index(&self) -> usize {
        self.periodic_index
    }

    /// Index of the queued message, or of the scrubbing message if no queued state was observed.
    pub fn main_index(&self) -> usize {
        self.main_index
    }

    /// Index of the scrubbing message.
    pub fn scrubbing_index(&self) -> usize {
        self.scrubbing_index
    }

    /// Index of the periodic schedule message proving the queue re-armed.
    pub fn rearm_index(&self) -> usize {
        self.rearm_index
    }
}

/// The outcome of a sequence verification over all monitored PGs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceVerdict {
    matched: Option<SequenceMatch>,
    failures: Vec<(PgId, MatchFailure)>,
}

impl SequenceVerdict {
    /// Check if some PG exhibited the full scheduling cycle.
    pub fn is_match(&self) -> bool {
        self.matched.is_some()
    }

    /// The first full cycle found, if any.
    pub fn matched(&self) -> Option<&SequenceMatch> {
        self.matched.as_ref()
    }

    /// Why each inspected PG failed to match, for diagnostics. PGs inspected after a match was
    /// found are not listed, since the search stops at the first match.
    pub fn failures(&self) -> &[(PgId, MatchFailure)] {
        &self.failures
    }
}

/// Verify that at least one PG's event log contains the canonical scheduling cycle: a periodic
/// schedule message, followed by a queued message (or directly a scrubbing message when the
/// queued state was too short-lived to observe), followed by a scrubbing message, followed by
/// another periodic schedule message proving the queue re-armed.
///
/// One matching PG is sufficient. The scheduler spreads periodic scrubs over time, so requiring
/// the cycle on every PG would make the verdict depend on how the monitoring window happened to
/// align per PG, not on whether the queue works.
pub fn verify_sequence(events: &EventsByPg) -> SequenceVerdict {
    let mut failures = Vec::new();
    for (pg, log) in events {
        match match_single(log.messages()) {
            Ok((periodic_index, main_index, scrubbing_index, rearm_index)) => {
                return SequenceVerdict {
                    matched: Some(SequenceMatch {
                        pg: pg.clone(),
                        periodic_index,
                        main_index,
                        scrubbing_index,
                        rearm_index,
                    }),
                    failures,
                };
            }
            Err(reason) => failures.push((pg.clone(), reason)),
        }
    }
    failures.sort_by(|(a, _), (b, _)| a.cmp(b));
    SequenceVerdict {
        matched: None,
        failures,
    }
}

// The order of the scans matters: the queued message is preferred as the anchor, and the
// backward scan for the periodic message runs from the anchor, not from the end of the log.
fn match_single(messages: &[String]) -> Result<(usize, usize, usize, usize), MatchFailure> {
    let mut used_scrubbing_as_main = false;
    let main_index = match find_forward(messages, 0, &QUEUED_KEYWORDS) {
        Some(idx) => idx,
        None => match find_forward(messages, 0, &SCRUBBING_KEYWORDS) {
            Some(idx) => {
                used_scrubbing_as_main = true;
                idx
            }
            None => return Err(MatchFailure::NoAnchor),
        },
    };

    let periodic_index =
        find_backward(messages, main_index, &PERIODIC_KEYWORDS).ok_or(MatchFailure::NoPeriodicBefore)?;

    let scrubbing_index = if used_scrubbing_as_main {
        main_index
    } else {
        find_forward(messages, main_index + 1, &SCRUBBING_KEYWORDS)
            .ok_or(MatchFailure::NoScrubbingAfterQueue)?
    };

    let rearm_index = find_forward(messages, scrubbing_index + 1, &PERIODIC_KEYWORDS)
        .ok_or(MatchFailure::NoRearm)?;

    Ok((periodic_index, main_index, scrubbing_index, rearm_index))
}

fn matches_any(message: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| message.contains(keyword))
}

/// Find the first message at or after `from` containing any of the keywords.
fn find_forward(messages: &[String], from: usize, keywords: &[&str]) -> Option<usize> {
    (from..messages.len()).find(|&idx| matches_any(&messages[idx], keywords))
}

/// Find the last message strictly before `before` containing any of the keywords.
fn find_backward(messages: &[String], before: usize, keywords: &[&str]) -> Option<usize> {
    (0..before).rev().find(|&idx| matches_any(&messages[idx], keywords))
}

#[cfg(test)]
mod tests {
    use super::{verify_sequence, EventLog, EventsByPg, MatchFailure};
    use crate::stamps::PgId;

    fn log(messages: &[&str]) -> EventLog {
        EventLog::from_messages(messages.iter().map(|m| m.to_string()).collect())
    }

    fn single_pg(messages: &[&str]) -> EventsByPg {
        let mut events = EventsByPg::new();
        events.insert(PgId::from("1.2"), log(messages));
        events
    }

    #[test]
    fn canonical_cycle_matches() {
        let events = single_pg(&[
            "periodic scrub scheduled @ 2024-01-01T10:00:00",
            "queued for scrub",
            "scrubbing for pg 1.2",
            "periodic scrub scheduled @ 2024-01-01T10:05:00",
        ]);
        let verdict = verify_sequence(&events);
        let matched = verdict.matched().expect("cycle should be found");
        assert_eq!(matched.pg(), &PgId::from("1.2"));
        assert_eq!(matched.periodic_index(), 0);
        assert_eq!(matched.main_index(), 1);
        assert_eq!(matched.scrubbing_index(), 2);
        assert_eq!(matched.rearm_index(), 3);
    }

    #[test]
    fn deep_scrub_cycle_matches() {
        let events = single_pg(&[
            "periodic deep scrub scheduled @ 2024-01-01T10:00:00",
            "queued for deep scrub",
            "deep scrubbing for pg 1.2",
            "periodic deep scrub scheduled @ 2024-01-01T10:05:00",
        ]);
        assert!(verify_sequence(&events).is_match());
    }

    #[test]
    fn scrubbing_serves_as_anchor_when_queued_was_not_observed() {
        let events = single_pg(&[
            "periodic scrub scheduled @ 2024-01-01T10:00:00",
            "scrubbing for pg 1.2",
            "periodic scrub scheduled @ 2024-01-01T10:05:00",
        ]);
        let verdict = verify_sequence(&events);
        let matched = verdict.matched().expect("fallback anchor should match");
        assert_eq!(matched.main_index(), 1);
        assert_eq!(matched.scrubbing_index(), 1);
        assert_eq!(matched.rearm_index(), 2);
    }

    #[test]
    fn missing_periodic_anchor_fails() {
        let events = single_pg(&["queued for scrub", "scrubbing for pg 1.2"]);
        let verdict = verify_sequence(&events);
        assert!(!verdict.is_match());
        assert_eq!(
            verdict.failures(),
            &[(PgId::from("1.2"), MatchFailure::NoPeriodicBefore)]
        );
    }

    #[test]
    fn missing_rearm_fails() {
        let events = single_pg(&[
            "periodic scrub scheduled @ 2024-01-01T10:00:00",
            "queued for scrub",
            "scrubbing for pg 1.2",
        ]);
        let verdict = verify_sequence(&events);
        assert!(!verdict.is_match());
        assert_eq!(verdict.failures()[0].1, MatchFailure::NoRearm);
    }

    #[test]
    fn queued_without_scrubbing_fails() {
        let events = single_pg(&[
            "periodic scrub scheduled @ 2024-01-01T10:00:00",
            "queued for scrub",
            "periodic scrub scheduled @ 2024-01-01T10:05:00",
        ]);
        let verdict = verify_sequence(&events);
        assert!(!verdict.is_match());
        assert_eq!(verdict.failures()[0].1, MatchFailure::NoScrubbingAfterQueue);
    }

    #[test]
    fn empty_logs_report_no_anchor() {
        let mut events = EventsByPg::new();
        events.insert(PgId::from("1.0"), EventLog::new());
        events.insert(
            PgId::from("1.1"),
            log(&["periodic scrub scheduled @ 2024-01-01T10:00:00"]),
        );
        let verdict = verify_sequence(&events);
        assert!(!verdict.is_match());
        assert_eq!(
            verdict.failures(),
            &[
                (PgId::from("1.0"), MatchFailure::NoAnchor),
                (PgId::from("1.1"), MatchFailure::NoAnchor),
            ]
        );
    }

    #[test]
    fn one_matching_pg_is_sufficient() {
        let mut events = EventsByPg::new();
        events.insert(PgId::from("1.0"), log(&["queued for scrub"]));
        events.insert(
            PgId::from("1.1"),
            log(&[
                "periodic scrub scheduled @ 2024-01-01T10:00:00",
                "queued for scrub",
                "scrubbing for pg 1.1",
                "periodic scrub scheduled @ 2024-01-01T10:05:00",
            ]),
        );
        events.insert(PgId::from("1.2"), log(&["scrubbing for pg 1.2"]));
        let verdict = verify_sequence(&events);
        assert_eq!(
            verdict.matched().expect("one full cycle present").pg(),
            &PgId::from("1.1")
        );
    }

    #[test]
    fn keywords_match_by_substring() {
        // the cluster wraps the state in additional detail, only the keyword core is stable
        let events = single_pg(&[
            "periodic scrub scheduled @ 2024-01-01T10:00:00 (planned)",
            "pg 1.2 queued for scrub, waiting for reservation",
            "pg 1.2 is scrubbing for 12s",
            "periodic scrub scheduled @ 2024-01-01T10:05:00 (planned)",
        ]);
        assert!(verify_sequence(&events).is_match());
    }

    #[test]
    fn periodic_anchor_after_the_queue_does_not_count() {
        // a periodic message only anchors the cycle if it precedes the queue entry
        let events = single_pg(&[
            "queued for scrub",
            "periodic scrub scheduled @ 2024-01-01T10:00:00",
            "scrubbing for pg 1.2",
        ]);
        let verdict = verify_sequence(&events);
        assert!(!verdict.is_match());
        assert_eq!(verdict.failures()[0].1, MatchFailure::NoPeriodicBefore);
    }

    #[test]
    fn event_log_deduplicates_repeated_samples() {
        let mut log = EventLog::new();
        assert!(log.record("periodic scrub scheduled @ t1".to_string()));
        assert!(!log.record("periodic scrub scheduled @ t1".to_string()));
        assert!(log.record("queued for scrub".to_string()));
        assert!(!log.record("periodic scrub scheduled @ t1".to_string()));
        assert_eq!(log.len(), 2);
        assert_eq!(
            log.messages(),
            &[
                "periodic scrub scheduled @ t1".to_string(),
                "queued for scrub".to_string(),
            ]
        );
    }
}
