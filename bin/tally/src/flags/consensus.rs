use crate::flags::EndpointList;
use clap::Args;
use tally_ingest::AbsenceConfig;

/// Consensus-layer worker arguments.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ConsensusArgs {
    /// CometBFT RPC endpoints, separated by `,` or `;`.
    #[arg(id = "cl.rpc", long = "cl.rpc", env = "CL_RPC_URLS")]
    pub rpc: EndpointList,
    /// Heights processed and committed together per cycle.
    #[arg(id = "cl.batch-size", long = "cl.batch-size", env = "CL_BATCH_SIZE", default_value_t = 100)]
    pub batch_size: u64,
    /// Heights between validator-set refreshes.
    #[arg(
        long = "cl.validator-refresh-interval",
        env = "CL_VALIDATOR_REFRESH_INTERVAL",
        default_value_t = 1000
    )]
    pub validator_refresh_interval: u64,
}

impl ConsensusArgs {
    /// Returns the absence worker configuration.
    pub const fn absence_config(&self) -> AbsenceConfig {
        AbsenceConfig {
            batch_size: self.batch_size,
            refresh_interval: self.validator_refresh_interval,
        }
    }
}
