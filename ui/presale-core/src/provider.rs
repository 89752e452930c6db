//! Wallet provider seam: an EIP-1193 style `request` plus pushed account/chain events.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::abi;
use crate::error::{Result, WalletError};

/// Notifications a wallet pushes without being asked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
}

#[async_trait]
pub trait Eip1193Provider: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value>;

    /// A fresh receiver for pushed events. Dropping it deregisters the listener.
    fn events(&self) -> broadcast::Receiver<ProviderEvent>;
}

/// Finds the wallet, if one is installed and reachable.
#[async_trait]
pub trait WalletDetector: Send + Sync {
    async fn detect(&self) -> Option<Arc<dyn Eip1193Provider>>;
}

// ---------------------------------------------------------------------------
// Signer
// ---------------------------------------------------------------------------

/// Capability to submit transactions as one account. Only the session hands these out.
#[derive(Clone)]
pub struct Signer {
    address: Address,
    chain_id: u64,
    provider: Arc<dyn Eip1193Provider>,
}

impl Signer {
    pub(crate) fn new(address: Address, chain_id: u64, provider: Arc<dyn Eip1193Provider>) -> Self {
        Self {
            address,
            chain_id,
            provider,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn provider(&self) -> &Arc<dyn Eip1193Provider> {
        &self.provider
    }

    /// `eth_sendTransaction` from this account. Returns the transaction hash.
    pub async fn send_transaction(&self, to: Address, data: &[u8]) -> Result<B256> {
        let params = json!([{
            "from": self.address,
            "to": to,
            "data": abi::to_hex(data),
        }]);
        let result = self.provider.request("eth_sendTransaction", params).await?;
        parse_b256(&result)
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Signer {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
            && self.chain_id == other.chain_id
            && Arc::ptr_eq(&self.provider, &other.provider)
    }
}

impl Eq for Signer {}

// ---------------------------------------------------------------------------
// JSON-RPC helpers
// ---------------------------------------------------------------------------

/// Split a JSON-RPC response into its result or a typed error.
pub fn rpc_result(response: Value) -> Result<Value> {
    if let Some(err) = response.get("error").filter(|e| !e.is_null()) {
        return Err(rpc_error(err));
    }
    response
        .get("result")
        .cloned()
        .ok_or_else(|| WalletError::Decode("response has neither result nor error".into()))
}

/// Map a JSON-RPC error object onto the error taxonomy.
pub fn rpc_error(err: &Value) -> WalletError {
    let code = err["code"].as_i64().unwrap_or_default();
    let message = err["message"].as_str().unwrap_or("unknown RPC error").to_string();
    let revert_data = match &err["data"] {
        Value::String(s) => Some(s.clone()),
        Value::Object(o) => o.get("data").and_then(Value::as_str).map(String::from),
        _ => None,
    };

    if code == 4001 {
        return WalletError::UserRejected;
    }
    if code == 3 || message.to_lowercase().contains("revert") {
        let reason = revert_data
            .and_then(|d| abi::from_hex(&d).ok())
            .and_then(|bytes| abi::decode_revert_reason(&bytes))
            .or_else(|| {
                message
                    .split_once("reverted:")
                    .map(|(_, reason)| reason.trim().to_string())
            });
        return WalletError::Reverted(reason);
    }
    WalletError::Rpc { code, message }
}

pub fn parse_quantity(value: &Value) -> Result<u64> {
    let text = value
        .as_str()
        .ok_or_else(|| WalletError::Decode(format!("expected hex quantity, got {value}")))?;
    u64::from_str_radix(text.trim_start_matches("0x"), 16)
        .map_err(|e| WalletError::Decode(format!("bad quantity {text:?}: {e}")))
}

pub fn parse_b256(value: &Value) -> Result<B256> {
    let bytes = abi::from_hex(value.as_str().unwrap_or_default())?;
    if bytes.len() != 32 {
        return Err(WalletError::Decode(format!("expected 32-byte hash, got {value}")));
    }
    Ok(B256::from_slice(&bytes))
}

pub fn parse_accounts(value: &Value) -> Result<Vec<Address>> {
    let items = value
        .as_array()
        .ok_or_else(|| WalletError::Decode(format!("expected account list, got {value}")))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .and_then(|s| s.parse::<Address>().ok())
                .ok_or_else(|| WalletError::Decode(format!("bad account {item}")))
        })
        .collect()
}

pub fn quantity(value: u64) -> String {
    format!("{value:#x}")
}

// ---------------------------------------------------------------------------
// HTTP provider
// ---------------------------------------------------------------------------

/// How often the HTTP provider re-reads accounts and chain id to synthesize events.
const WATCH_INTERVAL: Duration = Duration::from_secs(2);
const EVENT_CAPACITY: usize = 16;
/// Requests that wait on the user in the wallet get this long instead of the client timeout.
const APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

fn awaits_approval(method: &str) -> bool {
    matches!(method, "eth_requestAccounts" | "eth_sendTransaction")
}

/// JSON-RPC over HTTP to a desktop wallet (or a node with unlocked accounts).
pub struct HttpProvider {
    inner: Arc<HttpInner>,
    watcher: JoinHandle<()>,
}

struct HttpInner {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
    events: broadcast::Sender<ProviderEvent>,
}

impl HttpInner {
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        debug!(method, id, "rpc request");
        let mut request = self.client.post(&self.url).json(&body);
        if awaits_approval(method) {
            request = request.timeout(APPROVAL_TIMEOUT);
        }
        let response = request.send().await.map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(WalletError::Network(format!("HTTP {}", response.status())));
        }
        let value: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                WalletError::Timeout
            } else {
                WalletError::Decode(e.to_string())
            }
        })?;
        rpc_result(value)
    }
}

fn transport_error(e: reqwest::Error) -> WalletError {
    if e.is_timeout() {
        WalletError::Timeout
    } else {
        WalletError::Network(e.to_string())
    }
}

impl HttpProvider {
    /// Must be called from within a tokio runtime; spawns the account/chain watcher.
    /// Every request is abandoned with [`WalletError::Timeout`] after `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WalletError::Network(e.to_string()))?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(HttpInner {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
            events,
        });
        let watcher = tokio::spawn(watch_wallet(Arc::clone(&inner)));
        Ok(Self { inner, watcher })
    }
}

impl Drop for HttpProvider {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

#[async_trait]
impl Eip1193Provider for HttpProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.inner.call(method, params).await
    }

    fn events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.inner.events.subscribe()
    }
}

async fn watch_wallet(inner: Arc<HttpInner>) {
    let mut accounts: Option<Vec<Address>> = None;
    let mut chain: Option<u64> = None;
    loop {
        tokio::time::sleep(WATCH_INTERVAL).await;
        // Nobody listening yet; nothing to compare against either.
        if inner.events.receiver_count() == 0 {
            continue;
        }

        match inner.call("eth_accounts", json!([])).await.and_then(|v| parse_accounts(&v)) {
            Ok(current) => {
                if accounts.as_ref().is_some_and(|prev| *prev != current) {
                    let _ = inner.events.send(ProviderEvent::AccountsChanged(current.clone()));
                }
                accounts = Some(current);
            }
            Err(e) => warn!(error = %e, "wallet account poll failed"),
        }

        match inner.call("eth_chainId", json!([])).await.and_then(|v| parse_quantity(&v)) {
            Ok(current) => {
                if chain.is_some_and(|prev| prev != current) {
                    let _ = inner.events.send(ProviderEvent::ChainChanged(current));
                }
                chain = Some(current);
            }
            Err(e) => warn!(error = %e, "wallet chain poll failed"),
        }
    }
}

/// Reports an [`HttpProvider`] when the endpoint answers `eth_chainId`.
pub struct HttpWalletDetector {
    url: String,
    timeout: Duration,
}

impl HttpWalletDetector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl WalletDetector for HttpWalletDetector {
    async fn detect(&self) -> Option<Arc<dyn Eip1193Provider>> {
        let provider = match HttpProvider::new(self.url.clone(), self.timeout) {
            Ok(provider) => provider,
            Err(e) => {
                warn!(error = %e, "cannot build wallet client");
                return None;
            }
        };
        match provider.request("eth_chainId", json!([])).await {
            Ok(_) => Some(Arc::new(provider)),
            Err(e) => {
                debug!(url = %self.url, error = %e, "no wallet at endpoint");
                None
            }
        }
    }
}
