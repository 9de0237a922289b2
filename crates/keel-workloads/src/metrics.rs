//! Convergence metrics.
//!
//! Uses the `metrics` facade; the hosting process installs a recorder and
//! calls [`register_metrics`] once at startup.

use metrics::counter;
use metrics::describe_counter;
use metrics::describe_histogram;
use metrics::histogram;

/// LRP convergence passes started.
pub const CONVERGENCE_LRP_RUNS: &str = "ConvergenceLRPRuns";
/// Duration of an LRP convergence pass in nanoseconds.
pub const CONVERGENCE_LRP_DURATION: &str = "ConvergenceLRPDuration";
/// Records deleted by LRP convergence (invalid payloads).
pub const CONVERGENCE_LRPS_DELETED: &str = "ConvergenceLRPsDeleted";
/// Records kicked by LRP convergence (unclaims, creates, re-auctions).
pub const CONVERGENCE_LRPS_KICKED: &str = "ConvergenceLRPsKicked";
/// Records stopped by LRP convergence (extra-index retirements).
pub const CONVERGENCE_LRPS_STOPPED: &str = "ConvergenceLRPsStopped";

/// Task convergence passes started.
pub const CONVERGENCE_TASK_RUNS: &str = "ConvergenceTaskRuns";
/// Duration of a task convergence pass in nanoseconds.
pub const CONVERGENCE_TASK_DURATION: &str = "ConvergenceTaskDuration";
/// Tasks kicked by task convergence (expiry, re-auction, demotion).
pub const CONVERGENCE_TASKS_KICKED: &str = "ConvergenceTasksKicked";
/// Tasks pruned by task convergence (invalid payloads).
pub const CONVERGENCE_TASKS_PRUNED: &str = "ConvergenceTasksPruned";

/// Registers all convergence metric descriptions.
pub fn register_metrics() {
    describe_counter!(CONVERGENCE_LRP_RUNS, "LRP convergence passes started");
    describe_histogram!(CONVERGENCE_LRP_DURATION, "Duration of LRP convergence passes in nanoseconds");
    describe_counter!(CONVERGENCE_LRPS_DELETED, "Invalid LRP records deleted by convergence");
    describe_counter!(CONVERGENCE_LRPS_KICKED, "LRP records kicked by convergence");
    describe_counter!(CONVERGENCE_LRPS_STOPPED, "LRP records stopped by convergence");
    describe_counter!(CONVERGENCE_TASK_RUNS, "Task convergence passes started");
    describe_histogram!(CONVERGENCE_TASK_DURATION, "Duration of task convergence passes in nanoseconds");
    describe_counter!(CONVERGENCE_TASKS_KICKED, "Tasks kicked by convergence");
    describe_counter!(CONVERGENCE_TASKS_PRUNED, "Invalid task records pruned by convergence");
}

pub(crate) fn record_lrp_convergence(duration_nanos: u64, deleted: u64, kicked: u64, stopped: u64) {
    histogram!(CONVERGENCE_LRP_DURATION).record(duration_nanos as f64);
    counter!(CONVERGENCE_LRPS_DELETED).increment(deleted);
    counter!(CONVERGENCE_LRPS_KICKED).increment(kicked);
    counter!(CONVERGENCE_LRPS_STOPPED).increment(stopped);
}

pub(crate) fn record_lrp_convergence_started() {
    counter!(CONVERGENCE_LRP_RUNS).increment(1);
}

pub(crate) fn record_task_convergence(duration_nanos: u64, kicked: u64, pruned: u64) {
    histogram!(CONVERGENCE_TASK_DURATION).record(duration_nanos as f64);
    counter!(CONVERGENCE_TASKS_KICKED).increment(kicked);
    counter!(CONVERGENCE_TASKS_PRUNED).increment(pruned);
}

pub(crate) fn record_task_convergence_started() {
    counter!(CONVERGENCE_TASK_RUNS).increment(1);
}
