use crate::Role;

/// Metric identifiers and recording helpers for the RPC clients.
#[derive(Debug, Clone)]
pub struct Metrics;

impl Metrics {
    /// Counter of endpoint requests, labelled by role, method and outcome.
    pub const RPC_REQUESTS_TOTAL: &'static str = "tally_rpc_requests_total";
    /// Counter of calls that succeeded only after at least one endpoint failed.
    pub const RPC_FAILOVERS_TOTAL: &'static str = "tally_rpc_failovers_total";

    /// Describes the RPC metrics on the installed recorder.
    pub fn init() {
        metrics::describe_counter!(
            Self::RPC_REQUESTS_TOTAL,
            metrics::Unit::Count,
            "Endpoint requests issued by the failover clients",
        );
        metrics::describe_counter!(
            Self::RPC_FAILOVERS_TOTAL,
            metrics::Unit::Count,
            "Calls served by a fallback endpoint after the first attempt failed",
        );
    }

    pub(crate) fn record_request(role: Role, method: &'static str, success: bool) {
        metrics::counter!(
            Self::RPC_REQUESTS_TOTAL,
            "role" => role.as_str(),
            "method" => method,
            "outcome" => if success { "success" } else { "failure" },
        )
        .increment(1);
    }

    pub(crate) fn record_failover(role: Role, method: &'static str) {
        metrics::counter!(Self::RPC_FAILOVERS_TOTAL, "role" => role.as_str(), "method" => method)
            .increment(1);
    }
}
