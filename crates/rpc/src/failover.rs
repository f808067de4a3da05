//! Round-robin failover over a set of equivalent endpoints.

use crate::{EndpointFailure, Metrics, RpcError};
use std::{
    fmt::{self, Display},
    future::Future,
    sync::atomic::{AtomicUsize, Ordering},
};
use tracing::{debug, warn};
use url::Url;

/// The data source an endpoint set serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Execution-layer JSON-RPC nodes.
    Execution,
    /// Consensus-layer CometBFT RPC nodes.
    Consensus,
}

impl Role {
    /// Short label used in logs and metric labels.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Execution => "el",
            Self::Consensus => "cl",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct Endpoint<C> {
    url: Url,
    client: C,
}

/// A single logical client over several equivalent endpoints.
///
/// Every attempt takes the endpoint under the shared pointer and advances it, so consecutive calls
/// rotate through the set and a failing call probes the following endpoints until one answers. No
/// health state is kept between calls. A call fails only after each endpoint failed once.
#[derive(Debug)]
pub struct FailoverClient<C> {
    role: Role,
    endpoints: Vec<Endpoint<C>>,
    next: AtomicUsize,
}

impl<C> FailoverClient<C> {
    /// Creates a client from an ordered, non-empty list of endpoints.
    pub fn new(role: Role, endpoints: Vec<(Url, C)>) -> Result<Self, RpcError> {
        if endpoints.is_empty() {
            return Err(RpcError::NoEndpoints(role));
        }
        let endpoints = endpoints.into_iter().map(|(url, client)| Endpoint { url, client }).collect();
        Ok(Self { role, endpoints, next: AtomicUsize::new(0) })
    }

    /// Creates a client by building one endpoint client per URL.
    pub fn connect(role: Role, urls: &[Url], build: impl Fn(&Url) -> C) -> Result<Self, RpcError> {
        Self::new(role, urls.iter().map(|url| (url.clone(), build(url))).collect())
    }

    /// Returns the role of the endpoint set.
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Returns the number of endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Always false, a client cannot be built without endpoints.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Returns the number of attempts made so far, the round-robin pointer.
    pub fn position(&self) -> usize {
        self.next.load(Ordering::Relaxed)
    }

    /// Returns the endpoint URLs in configuration order.
    pub fn urls(&self) -> impl Iterator<Item = &Url> {
        self.endpoints.iter().map(|e| &e.url)
    }
}

impl<C: Clone> FailoverClient<C> {
    /// Runs `call` against the endpoint under the pointer, moving on to the next endpoint on error.
    ///
    /// Returns the first successful result, or [`RpcError::Exhausted`] listing every endpoint's
    /// error once all of them failed.
    pub async fn request<T, E, F, Fut>(&self, method: &'static str, mut call: F) -> Result<T, RpcError>
    where
        F: FnMut(C) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let total = self.endpoints.len();
        let mut failures = Vec::new();

        for attempt in 0..total {
            let index = self.next.fetch_add(1, Ordering::Relaxed) % total;
            let endpoint = &self.endpoints[index];

            match call(endpoint.client.clone()).await {
                Ok(value) => {
                    Metrics::record_request(self.role, method, true);
                    if attempt > 0 {
                        Metrics::record_failover(self.role, method);
                        debug!(
                            target: "rpc::failover",
                            role = %self.role,
                            method,
                            url = %endpoint.url,
                            attempt,
                            "Request served after failover"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    Metrics::record_request(self.role, method, false);
                    warn!(
                        target: "rpc::failover",
                        role = %self.role,
                        method,
                        url = %endpoint.url,
                        %err,
                        "Endpoint request failed"
                    );
                    failures.push(EndpointFailure { url: endpoint.url.to_string(), error: err.to_string() });
                }
            }
        }

        Err(RpcError::Exhausted { role: self.role, method, failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::{Sequence, automock};
    use std::sync::Arc;

    #[automock]
    trait Node {
        fn answer(&self) -> Result<u64, String>;
    }

    fn client(nodes: Vec<MockNode>) -> FailoverClient<Arc<MockNode>> {
        let endpoints = nodes
            .into_iter()
            .enumerate()
            .map(|(i, node)| (Url::parse(&format!("http://node-{i}:8545")).unwrap(), Arc::new(node)))
            .collect();
        FailoverClient::new(Role::Execution, endpoints).unwrap()
    }

    async fn ask(client: &FailoverClient<Arc<MockNode>>) -> Result<u64, RpcError> {
        client.request("eth_blockNumber", |node| async move { node.answer() }).await
    }

    #[test]
    fn test_requires_an_endpoint() {
        let result = FailoverClient::<Arc<MockNode>>::new(Role::Consensus, vec![]);
        assert!(matches!(result, Err(RpcError::NoEndpoints(Role::Consensus))));
    }

    #[tokio::test]
    async fn test_all_endpoints_fail_in_round_robin_order() {
        let mut seq = Sequence::new();
        let mut nodes = Vec::new();
        for i in 0..3 {
            let mut node = MockNode::new();
            node.expect_answer()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move || Err(format!("node {i} down")));
            nodes.push(node);
        }
        let client = client(nodes);

        let err = ask(&client).await.unwrap_err();
        let RpcError::Exhausted { failures, method, .. } = err else {
            panic!("expected exhausted error");
        };
        assert_eq!(method, "eth_blockNumber");
        assert_eq!(failures.len(), 3);
        assert_eq!(failures[0].error, "node 0 down");
        assert_eq!(failures[2].url, "http://node-2:8545/");
        assert_eq!(client.position(), 3);
    }

    #[tokio::test]
    async fn test_second_endpoint_serves_after_first_fails() {
        let mut first = MockNode::new();
        first.expect_answer().times(1).returning(|| Err("refused".to_string()));
        let mut second = MockNode::new();
        second.expect_answer().times(1).returning(|| Ok(42));
        let mut third = MockNode::new();
        third.expect_answer().never();
        let client = client(vec![first, second, third]);

        assert_eq!(ask(&client).await.unwrap(), 42);
        assert_eq!(client.position(), 2);
    }

    #[tokio::test]
    async fn test_consecutive_calls_rotate_endpoints() {
        let mut nodes = Vec::new();
        for i in 0..2u64 {
            let mut node = MockNode::new();
            node.expect_answer().times(2).returning(move || Ok(i));
            nodes.push(node);
        }
        let client = client(nodes);

        let mut answers = Vec::new();
        for _ in 0..4 {
            answers.push(ask(&client).await.unwrap());
        }
        assert_eq!(answers, vec![0, 1, 0, 1]);
    }

    #[tokio::test]
    async fn test_failed_call_leaves_pointer_on_next_endpoint() {
        let mut first = MockNode::new();
        first.expect_answer().times(2).returning(|| Err("flaky".to_string()));
        let mut second = MockNode::new();
        second.expect_answer().times(2).returning(|| Ok(7));
        let client = client(vec![first, second]);

        assert_eq!(ask(&client).await.unwrap(), 7);
        // The next call starts from the first endpoint again, fails there and recovers.
        assert_eq!(ask(&client).await.unwrap(), 7);
        assert_eq!(client.position(), 4);
    }
}
