/// Accumulates per-PG scrub schedule events while a scenario monitors the cluster.
pub mod collector;
