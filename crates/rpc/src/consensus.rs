//! Consensus-layer reads over the CometBFT HTTP RPC.

use crate::{FailoverClient, RpcError, Role};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};
use tally_types::{CometBlock, NodeStatus, RpcEnvelope, StatusResult, Validator, ValidatorsPage};
use thiserror::Error;
use url::Url;

/// Page size used when walking `/validators`.
pub const VALIDATORS_PER_PAGE: u64 = 100;

/// Read access to a consensus-layer node.
#[async_trait]
pub trait ConsensusProvider: Send + Sync {
    /// Returns the node's latest and earliest served heights.
    async fn status(&self) -> Result<NodeStatus, RpcError>;

    /// Returns the block at `height`, including the commit for `height - 1`.
    async fn block(&self, height: u64) -> Result<CometBlock, RpcError>;

    /// Returns the full validator set at `height`, in validator-set index order.
    async fn validators(&self, height: u64) -> Result<Vec<Validator>, RpcError>;
}

/// Errors returned by a single CometBFT endpoint.
#[derive(Debug, Error)]
pub enum CometError {
    /// The HTTP request failed.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// The endpoint answered with a non-success status.
    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),
    /// The body did not match the expected schema.
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    /// The requested path could not be joined onto the endpoint URL.
    #[error("invalid request path: {0}")]
    Path(#[from] url::ParseError),
}

/// HTTP client for a single CometBFT RPC endpoint.
#[derive(Debug, Clone)]
pub struct CometClient {
    base: Url,
    http: Client,
}

impl CometClient {
    /// Creates a client for the endpoint at `base`.
    pub fn new(base: Url) -> Self {
        Self { base, http: Client::new() }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, u64)],
    ) -> Result<T, CometError> {
        let url = self.base.join(path)?;
        let response = self.http.get(url).query(query).send().await?;
        if !response.status().is_success() {
            return Err(CometError::Status(response.status()));
        }
        let body = response.bytes().await?;
        let envelope: RpcEnvelope<T> = serde_json::from_slice(&body)?;
        Ok(envelope.result)
    }

    /// Fetches `/status`.
    pub async fn status(&self) -> Result<NodeStatus, CometError> {
        let status: StatusResult = self.get("status", &[]).await?;
        Ok(status.sync_info.into())
    }

    /// Fetches `/block?height=`.
    pub async fn block(&self, height: u64) -> Result<CometBlock, CometError> {
        #[derive(Deserialize)]
        struct BlockResult {
            block: CometBlock,
        }
        let result: BlockResult = self.get("block", &[("height", height)]).await?;
        Ok(result.block)
    }

    /// Fetches every page of `/validators?height=`.
    pub async fn validators(&self, height: u64) -> Result<Vec<Validator>, CometError> {
        let mut validators = Vec::new();
        let mut page = 1;
        loop {
            let result: ValidatorsPage = self
                .get(
                    "validators",
                    &[("height", height), ("per_page", VALIDATORS_PER_PAGE), ("page", page)],
                )
                .await?;
            let received = result.validators.len();
            validators.extend(result.validators);
            if received == 0 || validators.len() as u64 >= result.total {
                return Ok(validators);
            }
            page += 1;
        }
    }
}

/// Failover client over consensus-layer RPC endpoints.
pub type ConsensusClient = FailoverClient<CometClient>;

/// Builds a [`ConsensusClient`] with one HTTP client per URL.
///
/// Endpoint paths are joined relative to the URL, so a trailing slash is added when missing.
pub fn consensus_client(urls: &[Url]) -> Result<ConsensusClient, RpcError> {
    FailoverClient::connect(Role::Consensus, urls, |url| CometClient::new(directory_url(url)))
}

fn directory_url(url: &Url) -> Url {
    let mut base = url.clone();
    if !base.path().ends_with('/') {
        base.set_path(&format!("{}/", base.path()));
    }
    base
}

#[async_trait]
impl ConsensusProvider for ConsensusClient {
    async fn status(&self) -> Result<NodeStatus, RpcError> {
        self.request("status", |client| async move { client.status().await }).await
    }

    async fn block(&self, height: u64) -> Result<CometBlock, RpcError> {
        self.request("block", |client| async move { client.block(height).await }).await
    }

    async fn validators(&self, height: u64) -> Result<Vec<Validator>, RpcError> {
        self.request("validators", |client| async move { client.validators(height).await }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("http://localhost:26657", "http://localhost:26657/status")]
    #[case("http://localhost:26657/", "http://localhost:26657/status")]
    #[case("https://rpc.example.org/cometbft", "https://rpc.example.org/cometbft/status")]
    fn test_paths_join_below_endpoint(#[case] input: &str, #[case] expected: &str) {
        let base = directory_url(&Url::parse(input).unwrap());
        assert_eq!(CometClient::new(base).base.join("status").unwrap().as_str(), expected);
    }

    #[tokio::test]
    async fn test_unreachable_endpoints_exhaust() {
        let client = consensus_client(&[
            Url::parse("http://127.0.0.1:1").unwrap(),
            Url::parse("http://127.0.0.1:2").unwrap(),
        ])
        .unwrap();
        let err = client.status().await.unwrap_err();
        assert!(matches!(err, RpcError::Exhausted { ref failures, .. } if failures.len() == 2));
        assert!(err.is_retryable());
    }
}
