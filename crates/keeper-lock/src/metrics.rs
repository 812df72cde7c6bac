// Metric names published by lock instances through the `metrics` facade.
// Without an installed recorder the counters are no-ops.

use ::metrics::describe_counter;

pub const LOCK_ACQUISITIONS_TOTAL: &str = "keeper_lock_acquisitions_total";
pub const LOCK_CONTENDED_TOTAL: &str = "keeper_lock_contended_total";
pub const LOCK_RELEASES_TOTAL: &str = "keeper_lock_releases_total";
pub const LOCK_RELEASE_FAILURES_TOTAL: &str = "keeper_lock_release_failures_total";

/// Register metric descriptions. Call once at startup, after installing a
/// recorder.
pub fn describe_lock_metrics() {
    describe_counter!(
        LOCK_ACQUISITIONS_TOTAL,
        "Total number of successful lock acquisitions"
    );
    describe_counter!(
        LOCK_CONTENDED_TOTAL,
        "Total number of lock create attempts that found the lock held"
    );
    describe_counter!(LOCK_RELEASES_TOTAL, "Total number of lock releases");
    describe_counter!(
        LOCK_RELEASE_FAILURES_TOTAL,
        "Total number of lock releases that failed"
    );
}
