//! JSON-RPC access to one network.
//!
//! Every endpoint is an alloy [`RootProvider`] over its own transport.
//! [`RoundRobinClient`] rotates over them:
//! - every call is retried against the selected endpoint with exponential backoff
//! - an endpoint that exhausts its attempts is put on cooldown and skipped
//! - the last endpoint is never skipped, and gets a final fallback round
//!   once every other endpoint has failed

use super::erc20::{
    DecodeError, balance_of_calldata, decimals_calldata, decode_word, transfer_calldata,
};
use super::signer::{LegacyTx, sign_legacy};
use super::types::{NativeTransferReceipt, TokenTransferReceipt};
use crate::config::RpcSettings;
use crate::units::scale_by;
use alloy::eips::BlockId;
use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::client::RpcClient;
use alloy::rpc::json_rpc::{RpcRecv, RpcSend};
use alloy::rpc::types::{Filter, Log, TransactionInput, TransactionReceipt, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::TransportError;
use alloy::transports::http::{Http, reqwest};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

/// Gas limit of a plain native-token transfer.
pub const NATIVE_TRANSFER_GAS: u64 = 21_000;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Transport failure or a JSON-RPC error object returned by the node
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The response could not be interpreted
    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("ABI decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("no RPC endpoints configured")]
    NoEndpoints,

    #[error("all RPC endpoints failed: {0}")]
    Exhausted(Box<RpcError>),

    #[error("insufficient native balance: have {balance}, need {required}")]
    InsufficientBalance { balance: U256, required: U256 },

    #[error("signing error: {0}")]
    Signing(String),

    #[error("transaction {0} not mined within the receipt timeout")]
    ReceiptTimeout(B256),
}

/// One JSON-RPC endpoint.
#[derive(Clone)]
pub struct Endpoint {
    client: RpcClient,
    provider: RootProvider,
}

impl Endpoint {
    pub fn new(client: RpcClient) -> Self {
        let provider = RootProvider::new(client.clone());
        Self { client, provider }
    }

    /// HTTP endpoint with its own connection pool.
    pub fn http(url: Url, timeout: Duration) -> Result<Self, RpcError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        let transport = Http::with_client(http_client, url);
        Ok(Self::new(RpcClient::new(transport, false)))
    }
}

struct Rotation {
    next: usize,
    cooldowns: HashMap<usize, Instant>,
}

/// Round-robin JSON-RPC client with retry, per-endpoint cooldown and
/// transaction submission.
pub struct RoundRobinClient {
    endpoints: Vec<Endpoint>,
    settings: RpcSettings,
    chain_id: u64,
    rotation: Mutex<Rotation>,
}

impl RoundRobinClient {
    pub fn new(endpoints: Vec<Endpoint>, settings: RpcSettings, chain_id: u64) -> Self {
        Self {
            endpoints,
            settings,
            chain_id,
            rotation: Mutex::new(Rotation {
                next: 0,
                cooldowns: HashMap::new(),
            }),
        }
    }

    /// One HTTP endpoint per URL, in configuration order.
    pub fn http(urls: &[Url], settings: RpcSettings, chain_id: u64) -> Result<Self, RpcError> {
        let endpoints = urls
            .iter()
            .map(|url| Endpoint::http(url.clone(), settings.request_timeout))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(endpoints, settings, chain_id))
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn rotation(&self) -> std::sync::MutexGuard<'_, Rotation> {
        self.rotation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn endpoint(&self, index: usize) -> Result<&Endpoint, RpcError> {
        self.endpoints.get(index).ok_or(RpcError::NoEndpoints)
    }

    fn provider(&self, index: usize) -> Result<&RootProvider, RpcError> {
        Ok(&self.endpoint(index)?.provider)
    }

    /// Next endpoint that is not cooling down. The last endpoint is always eligible.
    fn select_endpoint(&self, count: usize) -> usize {
        let now = Instant::now();
        let mut rotation = self.rotation();
        for _ in 0..count {
            let index = rotation.next % count;
            rotation.next = (index + 1) % count;
            let cooling = rotation
                .cooldowns
                .get(&index)
                .is_some_and(|until| *until > now);
            if !cooling || index == count - 1 {
                return index;
            }
        }
        count - 1
    }

    fn mark_failed(&self, index: usize) {
        let until = Instant::now() + self.settings.endpoint_cooldown;
        self.rotation().cooldowns.insert(index, until);
    }

    fn mark_healthy(&self, index: usize) {
        self.rotation().cooldowns.remove(&index);
    }

    /// Run `call` against one endpoint, retrying with exponential backoff.
    async fn attempt<T, F, Fut>(
        &self,
        endpoint: usize,
        method: &str,
        call: &F,
    ) -> Result<T, RpcError>
    where
        F: Fn(usize) -> Fut + Sync,
        Fut: Future<Output = Result<T, RpcError>> + Send,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match call(endpoint).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    debug!(endpoint, method, attempt, error = %e, "RPC attempt failed");
                    if attempt >= max_attempts {
                        return Err(e);
                    }
                    let backoff = self.settings.retry_delay * 2u32.saturating_pow(attempt - 1);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Execute `call` with round-robin failover. `call` receives the endpoint index.
    pub async fn execute<T, F, Fut>(&self, method: &str, call: F) -> Result<T, RpcError>
    where
        F: Fn(usize) -> Fut + Sync,
        Fut: Future<Output = Result<T, RpcError>> + Send,
    {
        let count = self.endpoints.len();
        if count == 0 {
            return Err(RpcError::NoEndpoints);
        }

        for _ in 0..count {
            let endpoint = self.select_endpoint(count);
            match self.attempt(endpoint, method, &call).await {
                Ok(value) => {
                    self.mark_healthy(endpoint);
                    return Ok(value);
                }
                Err(e) => {
                    warn!(
                        endpoint,
                        method,
                        error = %e,
                        "RPC endpoint exhausted retries, cooling down"
                    );
                    self.mark_failed(endpoint);
                }
            }
        }

        let last = count - 1;
        info!(endpoint = last, method, "All RPC endpoints failed, falling back to last endpoint");
        self.attempt(last, method, &call)
            .await
            .map_err(|e| RpcError::Exhausted(Box::new(e)))
    }

    async fn eth_call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        let request = call_request(to, data);
        let request = &request;
        self.execute("eth_call", |i| async move {
            Ok(self.provider(i)?.call(request.clone()).await?)
        })
        .await
    }

    pub async fn latest_block_number(&self) -> Result<u64, RpcError> {
        self.execute("eth_blockNumber", |i| async move {
            Ok(self.provider(i)?.get_block_number().await?)
        })
        .await
    }

    pub async fn poll_logs(
        &self,
        addresses: &[Address],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, RpcError> {
        let filter = Filter::new()
            .address(addresses.to_vec())
            .from_block(from_block)
            .to_block(to_block);
        let filter = &filter;
        self.execute("eth_getLogs", |i| async move {
            Ok(self.provider(i)?.get_logs(filter).await?)
        })
        .await
    }

    pub async fn token_decimals(&self, token: Address) -> Result<u8, RpcError> {
        let data = self.eth_call(token, decimals_calldata()).await?;
        let word = decode_word(&data)?;
        u8::try_from(word)
            .map_err(|_| RpcError::Malformed(format!("decimals out of range: {word}")))
    }

    pub async fn token_balance(&self, token: Address, owner: Address) -> Result<U256, RpcError> {
        let data = self.eth_call(token, balance_of_calldata(owner)).await?;
        Ok(decode_word(&data)?)
    }

    pub async fn native_balance(&self, owner: Address) -> Result<U256, RpcError> {
        self.execute("eth_getBalance", |i| async move {
            Ok(self.provider(i)?.get_balance(owner).await?)
        })
        .await
    }

    /// Send one call per owner as JSON-RPC batches of `batch_size`.
    ///
    /// A failed batch is retried as a whole; owners whose individual call
    /// failed are logged and left out.
    async fn batch_per_owner<P, R>(
        &self,
        method: &'static str,
        owners: &[Address],
        params: impl Fn(Address) -> P,
    ) -> Result<HashMap<Address, R>, RpcError>
    where
        P: RpcSend,
        R: RpcRecv,
    {
        let mut results = HashMap::with_capacity(owners.len());
        let batch_size = self.settings.batch_size.max(1);

        for (batch_index, chunk) in owners.chunks(batch_size).enumerate() {
            if batch_index > 0 {
                tokio::time::sleep(self.settings.batch_delay).await;
            }
            let calls: Vec<P> = chunk.iter().map(|owner| params(*owner)).collect();
            let calls = &calls;
            let answers = self
                .execute(method, |i| async move {
                    let mut batch = self.endpoint(i)?.client.new_batch();
                    let waiters = calls
                        .iter()
                        .map(|call| batch.add_call::<P, R>(method, call))
                        .collect::<Result<Vec<_>, _>>()?;
                    batch.send().await?;

                    let mut answers = Vec::with_capacity(waiters.len());
                    for waiter in waiters {
                        answers.push(waiter.await);
                    }
                    Ok(answers)
                })
                .await?;

            for (owner, answer) in chunk.iter().zip(answers) {
                match answer {
                    Ok(value) => {
                        results.insert(*owner, value);
                    }
                    Err(e) => warn!(owner = %owner, method, error = %e, "Batched call failed"),
                }
            }
        }
        Ok(results)
    }

    /// `balanceOf` for many owners, sent as JSON-RPC batches.
    pub async fn batch_token_balances(
        &self,
        token: Address,
        owners: &[Address],
    ) -> Result<HashMap<Address, U256>, RpcError> {
        let raw: HashMap<Address, Bytes> = self
            .batch_per_owner("eth_call", owners, |owner| {
                (call_request(token, balance_of_calldata(owner)), BlockId::latest())
            })
            .await?;

        let mut balances = HashMap::with_capacity(raw.len());
        for (owner, data) in raw {
            match decode_word(&data) {
                Ok(balance) => {
                    balances.insert(owner, balance);
                }
                Err(e) => warn!(owner = %owner, error = %e, "Undecodable balanceOf result"),
            }
        }
        Ok(balances)
    }

    /// Native balances of many owners, sent as JSON-RPC batches.
    pub async fn batch_native_balances(
        &self,
        owners: &[Address],
    ) -> Result<HashMap<Address, U256>, RpcError> {
        self.batch_per_owner("eth_getBalance", owners, |owner| (owner, BlockId::latest()))
            .await
    }

    pub async fn suggest_gas_price(&self) -> Result<U256, RpcError> {
        let price = self
            .execute("eth_gasPrice", |i| async move {
                Ok(self.provider(i)?.get_gas_price().await?)
            })
            .await?;
        Ok(U256::from(price))
    }

    pub async fn estimate_gas(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
        value: U256,
    ) -> Result<u64, RpcError> {
        let request = call_request(to, data).from(from).value(value);
        let request = &request;
        self.execute("eth_estimateGas", |i| async move {
            Ok(self.provider(i)?.estimate_gas(request.clone()).await?)
        })
        .await
    }

    /// Gas needed by an ERC-20 `transfer` of `amount` from `from` to `to`.
    pub async fn estimate_token_transfer_gas(
        &self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<u64, RpcError> {
        self.estimate_gas(from, token, transfer_calldata(to, amount), U256::ZERO)
            .await
    }

    async fn nonce_at(&self, owner: Address, pending: bool) -> Result<u64, RpcError> {
        self.execute("eth_getTransactionCount", |i| async move {
            let count = self.provider(i)?.get_transaction_count(owner);
            let count = if pending { count.pending() } else { count.latest() };
            Ok(count.await?)
        })
        .await
    }

    /// Nonce and gas price for a new transaction from `from`.
    ///
    /// When a transaction is already pending, it is replaced: the latest
    /// confirmed nonce is reused and the gas price doubled.
    pub async fn transaction_params(&self, from: Address) -> Result<(u64, U256), RpcError> {
        let pending = self.nonce_at(from, true).await?;
        let latest = self.nonce_at(from, false).await?;
        let suggested = self.suggest_gas_price().await?;
        let gas_price = scale_by(suggested, self.settings.gas_price_multiplier)
            .map_err(|e| RpcError::Malformed(e.to_string()))?;
        if pending != latest {
            info!(from = %from, pending, latest, "Replacing in-flight transaction");
            return Ok((latest, gas_price.saturating_mul(U256::from(2))));
        }
        Ok((pending, gas_price))
    }

    pub async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, RpcError> {
        let raw = &raw;
        self.execute("eth_sendRawTransaction", |i| async move {
            let pending = self.provider(i)?.send_raw_transaction(raw).await?;
            Ok(*pending.tx_hash())
        })
        .await
    }

    pub async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        self.execute("eth_getTransactionReceipt", |i| async move {
            Ok(self.provider(i)?.get_transaction_receipt(hash).await?)
        })
        .await
    }

    async fn wait_for_receipt(&self, hash: B256) -> Result<TransactionReceipt, RpcError> {
        let deadline = Instant::now() + self.settings.receipt_timeout;
        loop {
            if let Some(receipt) = self.transaction_receipt(hash).await? {
                return Ok(receipt);
            }
            if Instant::now() >= deadline {
                return Err(RpcError::ReceiptTimeout(hash));
            }
            tokio::time::sleep(self.settings.receipt_poll_interval).await;
        }
    }

    /// Send `amount` of `token` from the signer to `to` and wait for the receipt.
    pub async fn transfer_token(
        &self,
        signer: &PrivateKeySigner,
        token: Address,
        to: Address,
        amount: U256,
    ) -> Result<TokenTransferReceipt, RpcError> {
        let from = signer.address();
        let input = transfer_calldata(to, amount);
        let gas_limit = self
            .estimate_gas(from, token, input.clone(), U256::ZERO)
            .await?;
        let (nonce, gas_price) = self.transaction_params(from).await?;

        let raw = sign_legacy(
            signer,
            LegacyTx {
                chain_id: self.chain_id,
                nonce,
                gas_price,
                gas_limit,
                to: token,
                value: U256::ZERO,
                input,
            },
        )?;
        let tx_hash = self.send_raw_transaction(raw).await?;
        info!(
            tx_hash = %tx_hash,
            from = %from,
            to = %to,
            amount = %amount,
            "Token transfer submitted"
        );

        let receipt = self.wait_for_receipt(tx_hash).await?;
        Ok(TokenTransferReceipt {
            tx_hash,
            gas_used: receipt.gas_used,
            gas_price: U256::from(receipt.effective_gas_price),
            status: receipt.status(),
        })
    }

    /// Send `amount` of the native token and wait for the receipt.
    ///
    /// Fails before signing if the sender cannot cover `amount` plus gas.
    pub async fn transfer_native(
        &self,
        signer: &PrivateKeySigner,
        to: Address,
        amount: U256,
    ) -> Result<NativeTransferReceipt, RpcError> {
        let from = signer.address();
        let (nonce, gas_price) = self.transaction_params(from).await?;
        let gas_cost = gas_price.saturating_mul(U256::from(NATIVE_TRANSFER_GAS));
        let required = amount.saturating_add(gas_cost);
        let balance = self.native_balance(from).await?;
        if balance < required {
            return Err(RpcError::InsufficientBalance { balance, required });
        }

        let raw = sign_legacy(
            signer,
            LegacyTx {
                chain_id: self.chain_id,
                nonce,
                gas_price,
                gas_limit: NATIVE_TRANSFER_GAS,
                to,
                value: amount,
                input: Bytes::new(),
            },
        )?;
        let tx_hash = self.send_raw_transaction(raw).await?;
        info!(
            tx_hash = %tx_hash,
            from = %from,
            to = %to,
            amount = %amount,
            "Native transfer submitted"
        );

        let receipt = self.wait_for_receipt(tx_hash).await?;
        Ok(NativeTransferReceipt {
            tx_hash,
            gas_used: receipt.gas_used,
            gas_price: U256::from(receipt.effective_gas_price),
        })
    }
}

fn call_request(to: Address, data: Bytes) -> TransactionRequest {
    TransactionRequest::default()
        .to(to)
        .input(TransactionInput::new(data))
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-process nodes for tests.

    #![allow(clippy::unwrap_used)]

    use super::*;
    use alloy::rpc::json_rpc::{
        ErrorPayload, RequestPacket, Response, ResponsePacket, ResponsePayload, SerializedRequest,
    };
    use alloy::transports::{TransportErrorKind, TransportFut};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use tower::Service;

    type Handler = dyn Fn(&str, &Value) -> Result<Value, String> + Send + Sync;

    /// Answers every JSON-RPC call through `handler`; an `Err` becomes a
    /// JSON-RPC error object. A node that is down fails at the transport level.
    #[derive(Clone)]
    pub struct MockNode {
        handler: Arc<Handler>,
        down: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
    }

    impl MockNode {
        pub fn new(
            handler: impl Fn(&str, &Value) -> Result<Value, String> + Send + Sync + 'static,
        ) -> Self {
            Self {
                handler: Arc::new(handler),
                down: Arc::new(AtomicBool::new(false)),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn set_down(&self, down: bool) {
            self.down.store(down, Ordering::SeqCst);
        }

        /// Request packets and batched calls received so far.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn endpoint(&self) -> Endpoint {
            Endpoint::new(RpcClient::new(self.clone(), false))
        }

        fn answer(&self, request: &SerializedRequest) -> Response {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let params = request
                .params()
                .map(|raw| serde_json::from_str(raw.get()).unwrap())
                .unwrap_or(Value::Null);
            let payload = match (self.handler)(request.method(), &params) {
                Ok(value) => {
                    ResponsePayload::Success(serde_json::value::to_raw_value(&value).unwrap())
                }
                Err(message) => ResponsePayload::Failure(ErrorPayload {
                    code: -32000,
                    message: message.into(),
                    data: None,
                }),
            };
            Response {
                id: request.id().clone(),
                payload,
            }
        }
    }

    impl Service<RequestPacket> for MockNode {
        type Response = ResponsePacket;
        type Error = TransportError;
        type Future = TransportFut<'static>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, request: RequestPacket) -> Self::Future {
            let node = self.clone();
            Box::pin(async move {
                if node.down.load(Ordering::SeqCst) {
                    node.calls.fetch_add(1, Ordering::SeqCst);
                    return Err(TransportErrorKind::custom_str("endpoint down"));
                }
                Ok(match request {
                    RequestPacket::Single(request) => ResponsePacket::Single(node.answer(&request)),
                    RequestPacket::Batch(requests) => {
                        ResponsePacket::Batch(requests.iter().map(|r| node.answer(r)).collect())
                    }
                })
            })
        }
    }

    pub fn client(nodes: &[MockNode], settings: RpcSettings) -> RoundRobinClient {
        RoundRobinClient::new(nodes.iter().map(MockNode::endpoint).collect(), settings, 56)
    }

    pub fn quantity(value: &Value) -> u64 {
        u64::from_str_radix(value.as_str().unwrap().trim_start_matches("0x"), 16).unwrap()
    }

    /// ABI word holding `value`, as returned by `eth_call`.
    pub fn word(value: u64) -> Value {
        json!(format!("0x{value:064x}"))
    }

    /// Calldata of an `eth_call`/`eth_estimateGas` request.
    pub fn call_input(params: &Value) -> String {
        let call = &params[0];
        call["input"]
            .as_str()
            .or_else(|| call["data"].as_str())
            .unwrap_or_default()
            .to_string()
    }

    /// Mined legacy-transaction receipt.
    pub fn receipt(hash: B256, success: bool, gas_used: u64, gas_price: u64) -> Value {
        json!({
            "type": "0x0",
            "status": if success { "0x1" } else { "0x0" },
            "cumulativeGasUsed": format!("0x{gas_used:x}"),
            "logs": [],
            "logsBloom": format!("0x{}", "00".repeat(256)),
            "transactionHash": format!("{hash:#x}"),
            "transactionIndex": "0x0",
            "blockHash": format!("{:#x}", B256::repeat_byte(0xbb)),
            "blockNumber": "0x1",
            "gasUsed": format!("0x{gas_used:x}"),
            "effectiveGasPrice": format!("0x{gas_price:x}"),
            "from": format!("{:#x}", Address::ZERO),
            "to": format!("{:#x}", Address::ZERO),
            "contractAddress": null,
        })
    }

    /// A node at chain head `head` serving `logs` by block range.
    pub fn log_chain(head: u64, logs: Vec<Log>) -> MockNode {
        MockNode::new(move |method, params| match method {
            "eth_blockNumber" => Ok(json!(format!("0x{head:x}"))),
            "eth_getLogs" => {
                let from = quantity(&params[0]["fromBlock"]);
                let to = quantity(&params[0]["toBlock"]);
                let hits: Vec<&Log> = logs
                    .iter()
                    .filter(|log| log.block_number.is_some_and(|b| (from..=to).contains(&b)))
                    .collect();
                serde_json::to_value(hits).map_err(|e| e.to_string())
            }
            other => Err(format!("unexpected method {other}")),
        })
    }

    pub fn fast_settings() -> RpcSettings {
        RpcSettings {
            retry_delay: Duration::ZERO,
            batch_delay: Duration::ZERO,
            receipt_poll_interval: Duration::ZERO,
            ..RpcSettings::default()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::mock::{MockNode, call_input, client, fast_settings, word};
    use super::*;
    use serde_json::{Value, json};

    fn block_number_node() -> MockNode {
        MockNode::new(|method, _| match method {
            "eth_blockNumber" => Ok(json!("0x64")),
            other => Err(format!("unexpected {other}")),
        })
    }

    fn nodes(count: usize, down: &[usize]) -> Vec<MockNode> {
        (0..count)
            .map(|i| {
                let node = block_number_node();
                node.set_down(down.contains(&i));
                node
            })
            .collect()
    }

    #[tokio::test]
    async fn test_succeeds_when_all_but_last_endpoint_fail() {
        let nodes = nodes(4, &[0, 1, 2]);
        let client = client(&nodes, fast_settings());

        assert_eq!(client.latest_block_number().await.unwrap(), 100);
        for node in &nodes[..3] {
            assert_eq!(node.calls(), 3);
        }
        assert_eq!(nodes[3].calls(), 1);
    }

    #[tokio::test]
    async fn test_cooling_endpoints_are_skipped() {
        let nodes = nodes(3, &[0]);
        let client = client(&nodes, fast_settings());

        client.latest_block_number().await.unwrap();
        assert_eq!(nodes[0].calls(), 3);

        // Endpoint 0 is cooling down; the rotation never selects it again.
        for _ in 0..6 {
            client.latest_block_number().await.unwrap();
        }
        assert_eq!(nodes[0].calls(), 3);
    }

    #[tokio::test]
    async fn test_last_endpoint_gets_fallback_round() {
        let nodes = nodes(2, &[0, 1]);
        let client = client(&nodes, fast_settings());

        let err = client.latest_block_number().await.unwrap_err();
        assert!(matches!(err, RpcError::Exhausted(_)));
        assert_eq!(nodes[0].calls(), 3);
        assert_eq!(nodes[1].calls(), 6);

        nodes[1].set_down(false);
        assert_eq!(client.latest_block_number().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_node_error_object_is_retried() {
        let node = MockNode::new(|_, _| Err("header not found".to_string()));
        let client = client(std::slice::from_ref(&node), fast_settings());

        let err = client.latest_block_number().await.unwrap_err();
        assert!(matches!(err, RpcError::Exhausted(_)));
        assert_eq!(node.calls(), 6);
    }

    #[tokio::test]
    async fn test_no_endpoints() {
        let client = client(&[], fast_settings());
        assert!(matches!(
            client.latest_block_number().await,
            Err(RpcError::NoEndpoints)
        ));
    }

    #[tokio::test]
    async fn test_token_calls_decode_words() {
        let node = MockNode::new(|method, params| {
            assert_eq!(method, "eth_call");
            if call_input(params).starts_with("0x313ce567") {
                Ok(word(6))
            } else {
                Ok(word(1_000_000))
            }
        });
        let client = client(&[node], fast_settings());
        assert_eq!(client.token_decimals(Address::ZERO).await.unwrap(), 6);
        assert_eq!(
            client
                .token_balance(Address::ZERO, Address::repeat_byte(1))
                .await
                .unwrap(),
            U256::from(1_000_000u64)
        );
    }

    #[tokio::test]
    async fn test_transaction_params_replace_pending() {
        let node = MockNode::new(|method, params| match (method, params[1].as_str()) {
            ("eth_getTransactionCount", Some("pending")) => Ok(json!("0x6")),
            ("eth_getTransactionCount", Some("latest")) => Ok(json!("0x5")),
            ("eth_gasPrice", _) => Ok(json!("0x3b9aca00")),
            (other, _) => Err(other.to_string()),
        });
        let client = client(&[node], fast_settings());
        let (nonce, gas_price) = client
            .transaction_params(Address::repeat_byte(1))
            .await
            .unwrap();
        assert_eq!(nonce, 5);
        // 1 gwei x 2 multiplier x 2 replacement bump
        assert_eq!(gas_price, U256::from(4_000_000_000u64));
    }

    #[tokio::test]
    async fn test_batch_balances_skip_failed_owners() {
        let bad = Address::repeat_byte(9);
        let node = MockNode::new(|_, params| {
            if call_input(params).ends_with(&"09".repeat(20)) {
                Err("execution reverted".to_string())
            } else {
                Ok(word(7))
            }
        });
        let mut settings = fast_settings();
        settings.batch_size = 2;
        settings.max_attempts = 1;
        let client = client(std::slice::from_ref(&node), settings);

        let owners = vec![Address::repeat_byte(1), bad, Address::repeat_byte(2)];
        let balances = client
            .batch_token_balances(Address::ZERO, &owners)
            .await
            .unwrap();
        assert_eq!(balances.len(), 2);
        assert_eq!(balances[&Address::repeat_byte(2)], U256::from(7));
        assert!(!balances.contains_key(&bad));
        assert_eq!(node.calls(), 3);
    }

    #[tokio::test]
    async fn test_batch_native_balances() {
        let node = MockNode::new(|method, params| {
            assert_eq!(method, "eth_getBalance");
            let owner: Address = serde_json::from_value(params[0].clone()).unwrap();
            Ok(Value::String(format!("0x{:x}", owner.as_slice()[0])))
        });
        let client = client(&[node], fast_settings());

        let owners = [Address::repeat_byte(3), Address::repeat_byte(4)];
        let balances = client.batch_native_balances(&owners).await.unwrap();
        assert_eq!(balances[&owners[0]], U256::from(3));
        assert_eq!(balances[&owners[1]], U256::from(4));
    }
}
