//! RPC clients for the execution and consensus nodes the indexer reads from.
//!
//! Both layers are served by a [`FailoverClient`] that rotates over a list of equivalent endpoints
//! and only reports an error once every endpoint failed for a call.
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod error;
pub use error::{EndpointFailure, RpcError};

mod failover;
pub use failover::{FailoverClient, Role};

mod metrics;
pub use metrics::Metrics;

mod execution;
pub use execution::{ExecutionClient, ExecutionProvider, execution_client};

mod consensus;
pub use consensus::{
    CometClient, CometError, ConsensusClient, ConsensusProvider, VALIDATORS_PER_PAGE,
    consensus_client,
};
