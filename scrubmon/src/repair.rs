use std::fmt;

/// The auto-repair policy applied to a scrub scenario: whether scrub-detected inconsistencies
/// are repaired automatically, and up to how many errors the cluster is willing to do so.
///
/// The threshold is exclusive: a PG holding exactly `num_errors_threshold` inconsistent objects
/// is NOT repaired. The cluster documents the option as "auto repair will not occur if more than
/// this many errors are found" but implements it as a greater-or-equal check, and scenarios rely
/// on that boundary by setting the threshold to one below or one above the injected error count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairPolicy {
    auto_repair: bool,
    num_errors_threshold: u64,
}

impl RepairPolicy {
    /// Create a new policy from the osd_scrub_auto_repair and osd_scrub_auto_repair_num_errors
    /// values applied to the cluster.
    pub fn new(auto_repair: bool, num_errors_threshold: u64) -> RepairPolicy {
        RepairPolicy {
            auto_repair,
            num_errors_threshold,
        }
    }

    /// Whether automatic repair is enabled at all.
    pub fn auto_repair(&self) -> bool {
        self.auto_repair
    }

    /// The error count from which on the cluster refuses to repair automatically.
    pub fn num_errors_threshold(&self) -> u64 {
        self.num_errors_threshold
    }

    /// Whether a scrub is expected to repair a PG holding the given amount of inconsistent
    /// objects.
    pub fn repair_expected(&self, inconsistent_before: u64) -> bool {
        self.auto_repair && inconsistent_before < self.num_errors_threshold
    }

    /// Check an observed before/after inconsistent object count pair against this policy. When
    /// repair is expected the count must have dropped to zero; when it is not, the count must be
    /// untouched. Anything else means the cluster did not follow the policy.
    pub fn verify(&self, inconsistent_before: u64, inconsistent_after: u64) -> bool {
        if self.repair_expected(inconsistent_before) {
            inconsistent_after == 0
        } else {
            inconsistent_after == inconsistent_before
        }
    }
}

impl fmt::Display for RepairPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "auto_repair={} num_errors_threshold={}",
            self.auto_repair, self.num_errors_threshold
        )
    }
}

#[cfg(test)]
mod tests {
    use super::RepairPolicy;

    #[test]
    fn count_at_threshold_is_not_repaired() {
        // equality is the negative case, no repair may happen
        let policy = RepairPolicy::new(true, 5);
        assert!(!policy.repair_expected(5));
        assert!(policy.verify(5, 5));
        assert!(!policy.verify(5, 0));
    }

    #[test]
    fn count_below_threshold_is_repaired() {
        let policy = RepairPolicy::new(true, 5);
        assert!(policy.repair_expected(4));
        assert!(policy.verify(4, 0));
        // repair was expected but the count did not move
        assert!(!policy.verify(4, 4));
    }

    #[test]
    fn disabled_policy_never_repairs() {
        let policy = RepairPolicy::new(false, 5);
        assert!(!policy.repair_expected(1));
        assert!(policy.verify(1, 1));
        assert!(!policy.verify(1, 0));
    }

    #[test]
    fn partial_repair_is_a_violation() {
        let policy = RepairPolicy::new(true, 5);
        assert!(!policy.verify(4, 2));
    }

    #[test]
    fn clean_pg_stays_clean() {
        let policy = RepairPolicy::new(true, 5);
        assert!(policy.repair_expected(0));
        assert!(policy.verify(0, 0));
    }
}
