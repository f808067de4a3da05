use clap::Args;
use std::time::Duration;

/// Worker poll intervals and failure gating.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ScheduleArgs {
    /// Seconds between execution-layer pipeline cycles.
    #[arg(long = "interval.el", env = "EL_POLL_INTERVAL_SECS", default_value_t = 15)]
    pub el_secs: u64,
    /// Seconds between absence worker cycles.
    #[arg(long = "interval.cl", env = "CL_POLL_INTERVAL_SECS", default_value_t = 30)]
    pub cl_secs: u64,
    /// Seconds between validator snapshot checks.
    #[arg(long = "interval.snapshot", env = "SNAPSHOT_POLL_INTERVAL_SECS", default_value_t = 300)]
    pub snapshot_secs: u64,
    /// Seconds between failed-block retry cycles.
    #[arg(long = "interval.retry", env = "RETRY_POLL_INTERVAL_SECS", default_value_t = 60)]
    pub retry_secs: u64,
    /// Consecutive failed cycles after which a worker stops.
    #[arg(long = "failure-threshold", env = "FAILURE_THRESHOLD", default_value_t = 5)]
    pub failure_threshold: u32,
}

impl ScheduleArgs {
    /// Interval of the execution-layer pipeline.
    pub const fn el(&self) -> Duration {
        Duration::from_secs(self.el_secs)
    }

    /// Interval of the absence worker.
    pub const fn cl(&self) -> Duration {
        Duration::from_secs(self.cl_secs)
    }

    /// Interval of the snapshot worker.
    pub const fn snapshot(&self) -> Duration {
        Duration::from_secs(self.snapshot_secs)
    }

    /// Interval of the retry worker.
    pub const fn retry(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }
}
