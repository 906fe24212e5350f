use std::{num::NonZeroU32, sync::Arc, time::Duration};

use alloy_primitives::{Address, Bytes, B256};
use alloy_provider::{network::Ethereum, Provider, ProviderBuilder};
use alloy_rpc_types::{BlockNumberOrTag, Filter, Log, TransactionRequest};
use alloy_transport::BoxTransport;
use backon::{ExponentialBuilder, Retryable};
use error_stack::{Result, ResultExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::Semaphore;
use url::Url;

use crate::reader::ReceiptLog;

#[derive(Debug)]
pub enum JsonRpcProviderError {
    Request,
    Timeout,
    NotFound,
}

#[derive(Debug, Clone)]
pub struct JsonRpcProviderOptions {
    /// Per-request timeout. A timed-out request is a retryable failure of
    /// the whole window.
    pub timeout: Duration,
    /// Requests per second against the upstream node.
    pub rate_limit: u32,
    /// Exponential backoff applied inside each call.
    pub exponential_backoff: ExponentialBuilder,
}

#[derive(Clone)]
pub struct JsonRpcProvider {
    provider: Arc<dyn Provider<BoxTransport, Ethereum>>,
    limiter: Arc<DefaultDirectRateLimiter>,
    semaphore: Arc<Semaphore>,
    options: JsonRpcProviderOptions,
}

impl JsonRpcProvider {
    pub fn new(url: Url, options: JsonRpcProviderOptions) -> Self {
        let provider = ProviderBuilder::default().on_http(url).boxed();
        let limiter = new_limiter(options.rate_limit);
        Self {
            provider: Arc::new(provider),
            limiter: Arc::new(limiter),
            semaphore: Arc::new(Semaphore::new(64)),
            options,
        }
    }

    /// Returns the chain's current head block number.
    pub async fn get_block_number(&self) -> Result<u64, JsonRpcProviderError> {
        let _permit = self.acquire().await?;
        let request =
            (|| async { self.provider.get_block_number().await }).retry(&self.options.exponential_backoff);

        let Ok(response) = tokio::time::timeout(self.options.timeout, request).await else {
            return Err(JsonRpcProviderError::Timeout)
                .attach_printable("failed to get block number");
        };

        response.change_context(JsonRpcProviderError::Request)
    }

    /// Returns all logs matching the filter. Either the full range's logs
    /// come back or the call fails as a whole.
    pub async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, JsonRpcProviderError> {
        let _permit = self.acquire().await?;
        let request = (|| async { self.provider.get_logs(filter).await })
            .retry(&self.options.exponential_backoff);

        let Ok(response) = tokio::time::timeout(self.options.timeout, request).await else {
            return Err(JsonRpcProviderError::Timeout)
                .attach_printable("failed to get logs")
                .attach_printable_lazy(|| format!("filter: {filter:?}"));
        };

        response.change_context(JsonRpcProviderError::Request)
    }

    /// Returns the timestamp of the given block.
    pub async fn get_block_timestamp(&self, number: u64) -> Result<u64, JsonRpcProviderError> {
        let _permit = self.acquire().await?;
        let request = (|| async {
            self.provider
                .get_block_by_number(BlockNumberOrTag::Number(number), false)
                .await
        })
        .retry(&self.options.exponential_backoff);

        let Ok(response) = tokio::time::timeout(self.options.timeout, request).await else {
            return Err(JsonRpcProviderError::Timeout)
                .attach_printable("failed to get block header")
                .attach_printable_lazy(|| format!("block number: {number}"));
        };

        let block = response
            .change_context(JsonRpcProviderError::Request)?
            .ok_or(JsonRpcProviderError::NotFound)
            .attach_printable_lazy(|| format!("block number: {number}"))?;

        Ok(block.header.timestamp)
    }

    /// Returns the sender of the given transaction.
    pub async fn get_transaction_sender(
        &self,
        hash: B256,
    ) -> Result<Address, JsonRpcProviderError> {
        let _permit = self.acquire().await?;
        let request = (|| async { self.provider.get_transaction_by_hash(hash).await })
            .retry(&self.options.exponential_backoff);

        let Ok(response) = tokio::time::timeout(self.options.timeout, request).await else {
            return Err(JsonRpcProviderError::Timeout)
                .attach_printable("failed to get transaction")
                .attach_printable_lazy(|| format!("transaction hash: {hash}"));
        };

        let transaction = response
            .change_context(JsonRpcProviderError::Request)?
            .ok_or(JsonRpcProviderError::NotFound)
            .attach_printable_lazy(|| format!("transaction hash: {hash}"))?;

        Ok(transaction.from)
    }

    /// Returns the logs emitted by the given transaction.
    pub async fn get_transaction_logs(
        &self,
        hash: B256,
    ) -> Result<Vec<ReceiptLog>, JsonRpcProviderError> {
        let _permit = self.acquire().await?;
        let request = (|| async { self.provider.get_transaction_receipt(hash).await })
            .retry(&self.options.exponential_backoff);

        let Ok(response) = tokio::time::timeout(self.options.timeout, request).await else {
            return Err(JsonRpcProviderError::Timeout)
                .attach_printable("failed to get transaction receipt")
                .attach_printable_lazy(|| format!("transaction hash: {hash}"));
        };

        let receipt = response
            .change_context(JsonRpcProviderError::Request)?
            .ok_or(JsonRpcProviderError::NotFound)
            .attach_printable_lazy(|| format!("transaction hash: {hash}"))?;

        let logs = receipt
            .inner
            .logs()
            .iter()
            .map(|log| ReceiptLog {
                address: log.address(),
                topics: log.topics().to_vec(),
                data: log.data().data.clone(),
            })
            .collect();

        Ok(logs)
    }

    /// Executes a read-only contract call and returns the raw output.
    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, JsonRpcProviderError> {
        let _permit = self.acquire().await?;
        let tx = TransactionRequest::default().to(to).input(data.into());
        let request = (|| async { self.provider.call(&tx).await })
            .retry(&self.options.exponential_backoff);

        let Ok(response) = tokio::time::timeout(self.options.timeout, request).await else {
            return Err(JsonRpcProviderError::Timeout)
                .attach_printable("failed to execute call")
                .attach_printable_lazy(|| format!("to: {to}"));
        };

        response.change_context(JsonRpcProviderError::Request)
    }

    async fn acquire(
        &self,
    ) -> Result<tokio::sync::OwnedSemaphorePermit, JsonRpcProviderError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .change_context(JsonRpcProviderError::Request)?;
        self.limiter.until_ready().await;
        Ok(permit)
    }
}

impl Default for JsonRpcProviderOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            rate_limit: 100,
            exponential_backoff: ExponentialBuilder::default(),
        }
    }
}

fn new_limiter(rate_limit: u32) -> DefaultDirectRateLimiter {
    let quota = NonZeroU32::new(u32::max(rate_limit, 1)).expect("rate limit must be positive");
    let quota = Quota::per_second(quota).allow_burst(quota);
    RateLimiter::direct(quota)
}

impl error_stack::Context for JsonRpcProviderError {}

impl std::fmt::Display for JsonRpcProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsonRpcProviderError::Request => write!(f, "failed to send request"),
            JsonRpcProviderError::Timeout => write!(f, "request timed out"),
            JsonRpcProviderError::NotFound => write!(f, "not found"),
        }
    }
}
