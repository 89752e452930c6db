//! Typed view of the presale contract, and its JSON-RPC implementation.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::abi::{self, Arg, Words};
use crate::error::{Result, WalletError};
use crate::provider::{parse_b256, parse_quantity, quantity, Eip1193Provider, Signer};

const SECONDS_PER_YEAR: u64 = 365 * 86_400;
const BPS: u64 = 10_000;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresaleStage {
    #[default]
    NotStarted,
    Active,
    Ended,
    ClaimOpen,
}

impl PresaleStage {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::NotStarted),
            1 => Ok(Self::Active),
            2 => Ok(Self::Ended),
            3 => Ok(Self::ClaimOpen),
            other => Err(WalletError::Decode(format!("unknown presale stage {other}"))),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::Active => "Live",
            Self::Ended => "Ended",
            Self::ClaimOpen => "Claim open",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresaleStats {
    pub sold: U256,
    pub raised: U256,
    pub cap: U256,
    pub start_time: u64,
    pub end_time: u64,
    pub participants: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub total_purchased: U256,
    pub total_claimed: U256,
}

/// One stake/purchase entry. `end_time == start_time + lock_duration` is the contract's
/// invariant; it is read, never computed here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participation {
    pub amount: U256,
    pub apr_bps: u64,
    pub lock_duration: u64,
    pub start_time: u64,
    pub end_time: u64,
    pub last_reward_time: u64,
}

impl Participation {
    pub fn is_unlocked(&self, now: u64) -> bool {
        now >= self.end_time
    }

    /// Client-side estimate of rewards accrued since the last on-chain calculation.
    /// Non-decreasing in `now`; stops growing at `end_time`.
    pub fn accrued_estimate(&self, now: u64) -> U256 {
        let until = now.min(self.end_time);
        let elapsed = until.saturating_sub(self.last_reward_time);
        self.amount
            .saturating_mul(U256::from(self.apr_bps))
            .saturating_mul(U256::from(elapsed))
            / U256::from(BPS * SECONDS_PER_YEAR)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresaleEventKind {
    Purchase,
    TokensClaimed,
    RewardsClaimed,
}

impl PresaleEventKind {
    pub const ALL: [Self; 3] = [Self::Purchase, Self::TokensClaimed, Self::RewardsClaimed];

    pub fn signature(self) -> &'static str {
        match self {
            Self::Purchase => "TokensPurchased(address,uint256,uint256)",
            Self::TokensClaimed => "TokensClaimed(address,uint256)",
            Self::RewardsClaimed => "RewardsClaimed(address,uint256)",
        }
    }

    pub fn from_topic(topic: B256) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| abi::event_topic(kind.signature()) == topic)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Purchase => "Purchase",
            Self::TokensClaimed => "Token claim",
            Self::RewardsClaimed => "Reward claim",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresaleEvent {
    pub kind: PresaleEventKind,
    pub participant: Address,
    pub amount: U256,
    pub block_number: u64,
    pub tx_hash: B256,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockInfo {
    pub number: u64,
    pub timestamp: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
}

// ---------------------------------------------------------------------------
// Event subscription
// ---------------------------------------------------------------------------

/// A stream of events for one participant. Dropping it stops the underlying watcher.
pub struct EventSubscription {
    rx: mpsc::UnboundedReceiver<PresaleEvent>,
    task: Option<JoinHandle<()>>,
}

impl EventSubscription {
    pub fn new(rx: mpsc::UnboundedReceiver<PresaleEvent>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    pub async fn next(&mut self) -> Option<PresaleEvent> {
        self.rx.recv().await
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Contract seam
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PresaleContract: Send + Sync {
    async fn stage(&self) -> Result<PresaleStage>;
    async fn stats(&self) -> Result<PresaleStats>;
    async fn participant(&self, who: Address) -> Result<ParticipantInfo>;
    async fn participations(&self, who: Address) -> Result<Vec<Participation>>;
    async fn claimable_rewards(&self, who: Address) -> Result<U256>;
    async fn paused(&self) -> Result<bool>;
    /// Decimals of the token being sold.
    async fn token_decimals(&self) -> Result<u8>;
    /// Decimals of the stablecoin used for payment.
    async fn payment_decimals(&self) -> Result<u8>;
    async fn payment_balance(&self, who: Address) -> Result<U256>;
    /// How much of the payment token the presale contract may spend for `owner`.
    async fn payment_allowance(&self, owner: Address) -> Result<U256>;
    async fn latest_block(&self) -> Result<BlockInfo>;
    async fn block_timestamp(&self, number: u64) -> Result<u64>;
    /// Historical events for `who` from `from_block` to the chain head.
    async fn events(&self, who: Address, from_block: u64) -> Result<Vec<PresaleEvent>>;
    /// Live events for `who` from now on.
    fn subscribe(&self, who: Address) -> EventSubscription;

    async fn approve_payment(&self, amount: U256) -> Result<TxReceipt>;
    async fn participate(&self, amount: U256, lock_duration: u64) -> Result<TxReceipt>;
    async fn claim_tokens(&self) -> Result<TxReceipt>;
    async fn claim_rewards(&self) -> Result<TxReceipt>;
}

/// Produces a contract handle bound to the session's signer.
pub trait ContractBinder: Send + Sync {
    fn bind(&self, signer: &Signer) -> Result<Arc<dyn PresaleContract>>;
}

// ---------------------------------------------------------------------------
// JSON-RPC implementation
// ---------------------------------------------------------------------------

const RECEIPT_POLL: Duration = Duration::from_secs(1);
const RECEIPT_ATTEMPTS: u32 = 120;

mod sig {
    pub const PRESALE_STATE: &str = "presaleState()";
    pub const PRESALE_STATS: &str = "getPresaleStats()";
    pub const PARTICIPANT_INFO: &str = "getParticipantInfo(address)";
    pub const PARTICIPATIONS: &str = "getParticipations(address)";
    pub const CALCULATE_REWARDS: &str = "calculateRewards(address)";
    pub const PAUSED: &str = "paused()";
    pub const SALE_TOKEN: &str = "saleToken()";
    pub const PAYMENT_TOKEN: &str = "paymentToken()";
    pub const PARTICIPATE: &str = "participate(uint256,uint256)";
    pub const CLAIM_TOKENS: &str = "claimTokens()";
    pub const CLAIM_REWARDS: &str = "claimRewards()";

    pub const DECIMALS: &str = "decimals()";
    pub const BALANCE_OF: &str = "balanceOf(address)";
    pub const ALLOWANCE: &str = "allowance(address,address)";
    pub const APPROVE: &str = "approve(address,uint256)";
}

#[derive(Clone, Copy, Debug)]
struct TokenAddresses {
    sale: Address,
    payment: Address,
}

/// The presale contract over a wallet provider, sending as the signer's account.
pub struct RpcPresale {
    signer: Signer,
    address: Address,
    tokens: OnceCell<TokenAddresses>,
    event_poll: Duration,
}

impl RpcPresale {
    pub fn new(signer: Signer, address: Address, event_poll: Duration) -> Self {
        Self {
            signer,
            address,
            tokens: OnceCell::new(),
            event_poll,
        }
    }

    fn provider(&self) -> &Arc<dyn Eip1193Provider> {
        self.signer.provider()
    }

    async fn call(&self, to: Address, signature: &str, args: &[Arg]) -> Result<Vec<u8>> {
        let data = abi::encode_call(signature, args);
        let params = json!([{ "to": to, "data": abi::to_hex(&data) }, "latest"]);
        let result = self.provider().request("eth_call", params).await?;
        let bytes = abi::from_hex(result.as_str().unwrap_or_default())?;
        if bytes.is_empty() {
            return Err(WalletError::Decode(format!(
                "{signature} returned no data (wrong contract address or network?)"
            )));
        }
        Ok(bytes)
    }

    async fn tokens(&self) -> Result<TokenAddresses> {
        self.tokens
            .get_or_try_init(|| async {
                let (sale, payment) = tokio::try_join!(
                    self.call(self.address, sig::SALE_TOKEN, &[]),
                    self.call(self.address, sig::PAYMENT_TOKEN, &[]),
                )?;
                Ok::<_, WalletError>(TokenAddresses {
                    sale: Words::new(&sale).address(0)?,
                    payment: Words::new(&payment).address(0)?,
                })
            })
            .await
            .copied()
    }

    async fn decimals_of(&self, token: Address) -> Result<u8> {
        Words::new(&self.call(token, sig::DECIMALS, &[]).await?).u8(0)
    }

    async fn send(&self, to: Address, signature: &str, args: &[Arg]) -> Result<TxReceipt> {
        let data = abi::encode_call(signature, args);
        let tx_hash = self.signer.send_transaction(to, &data).await?;
        info!(%tx_hash, call = signature, "transaction submitted");
        self.wait_for_receipt(tx_hash, to, &data).await
    }

    async fn wait_for_receipt(&self, tx_hash: B256, to: Address, data: &[u8]) -> Result<TxReceipt> {
        for _ in 0..RECEIPT_ATTEMPTS {
            let receipt = match self
                .provider()
                .request("eth_getTransactionReceipt", json!([tx_hash]))
                .await
            {
                Ok(receipt) => receipt,
                // The transaction is already broadcast; a flaky poll says nothing about it.
                Err(e) if e.is_retryable() => {
                    warn!(%tx_hash, error = %e, "receipt poll failed; retrying");
                    tokio::time::sleep(RECEIPT_POLL).await;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if receipt.is_null() {
                tokio::time::sleep(RECEIPT_POLL).await;
                continue;
            }
            let block_number = parse_quantity(&receipt["blockNumber"])?;
            if parse_quantity(&receipt["status"])? == 1 {
                return Ok(TxReceipt {
                    tx_hash,
                    block_number,
                });
            }
            return Err(self.revert_reason(to, data, block_number).await);
        }
        Err(WalletError::Timeout)
    }

    /// Replay a reverted transaction as a call to recover its reason.
    async fn revert_reason(&self, to: Address, data: &[u8], block: u64) -> WalletError {
        let params = json!([
            { "from": self.signer.address(), "to": to, "data": abi::to_hex(data) },
            quantity(block),
        ]);
        match self.provider().request("eth_call", params).await {
            Err(err @ WalletError::Reverted(_)) => err,
            _ => WalletError::Reverted(None),
        }
    }
}

#[async_trait]
impl PresaleContract for RpcPresale {
    async fn stage(&self) -> Result<PresaleStage> {
        let data = self.call(self.address, sig::PRESALE_STATE, &[]).await?;
        PresaleStage::from_u8(Words::new(&data).u8(0)?)
    }

    async fn stats(&self) -> Result<PresaleStats> {
        let data = self.call(self.address, sig::PRESALE_STATS, &[]).await?;
        let w = Words::new(&data);
        Ok(PresaleStats {
            sold: w.uint(0)?,
            raised: w.uint(1)?,
            cap: w.uint(2)?,
            start_time: w.u64(3)?,
            end_time: w.u64(4)?,
            participants: w.u64(5)?,
        })
    }

    async fn participant(&self, who: Address) -> Result<ParticipantInfo> {
        let data = self
            .call(self.address, sig::PARTICIPANT_INFO, &[Arg::Address(who)])
            .await?;
        let w = Words::new(&data);
        Ok(ParticipantInfo {
            total_purchased: w.uint(0)?,
            total_claimed: w.uint(1)?,
        })
    }

    async fn participations(&self, who: Address) -> Result<Vec<Participation>> {
        let data = self
            .call(self.address, sig::PARTICIPATIONS, &[Arg::Address(who)])
            .await?;
        Words::new(&data)
            .tuple_array(0, 6)?
            .into_iter()
            .map(|row| {
                Ok(Participation {
                    amount: row.uint(0)?,
                    apr_bps: row.u64(1)?,
                    lock_duration: row.u64(2)?,
                    start_time: row.u64(3)?,
                    end_time: row.u64(4)?,
                    last_reward_time: row.u64(5)?,
                })
            })
            .collect()
    }

    async fn claimable_rewards(&self, who: Address) -> Result<U256> {
        let data = self
            .call(self.address, sig::CALCULATE_REWARDS, &[Arg::Address(who)])
            .await?;
        Words::new(&data).uint(0)
    }

    async fn paused(&self) -> Result<bool> {
        Words::new(&self.call(self.address, sig::PAUSED, &[]).await?).bool(0)
    }

    async fn token_decimals(&self) -> Result<u8> {
        let tokens = self.tokens().await?;
        self.decimals_of(tokens.sale).await
    }

    async fn payment_decimals(&self) -> Result<u8> {
        let tokens = self.tokens().await?;
        self.decimals_of(tokens.payment).await
    }

    async fn payment_balance(&self, who: Address) -> Result<U256> {
        let tokens = self.tokens().await?;
        let data = self
            .call(tokens.payment, sig::BALANCE_OF, &[Arg::Address(who)])
            .await?;
        Words::new(&data).uint(0)
    }

    async fn payment_allowance(&self, owner: Address) -> Result<U256> {
        let tokens = self.tokens().await?;
        let data = self
            .call(
                tokens.payment,
                sig::ALLOWANCE,
                &[Arg::Address(owner), Arg::Address(self.address)],
            )
            .await?;
        Words::new(&data).uint(0)
    }

    async fn latest_block(&self) -> Result<BlockInfo> {
        let block = self
            .provider()
            .request("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        parse_block(&block)
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64> {
        let block = self
            .provider()
            .request("eth_getBlockByNumber", json!([quantity(number), false]))
            .await?;
        Ok(parse_block(&block)?.timestamp)
    }

    async fn events(&self, who: Address, from_block: u64) -> Result<Vec<PresaleEvent>> {
        fetch_logs(self.provider().as_ref(), self.address, who, from_block, None).await
    }

    fn subscribe(&self, who: Address) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(poll_logs(
            Arc::clone(self.provider()),
            self.address,
            who,
            self.event_poll,
            tx,
        ));
        EventSubscription::new(rx, Some(task))
    }

    async fn approve_payment(&self, amount: U256) -> Result<TxReceipt> {
        let tokens = self.tokens().await?;
        self.send(
            tokens.payment,
            sig::APPROVE,
            &[Arg::Address(self.address), Arg::Uint(amount)],
        )
        .await
    }

    async fn participate(&self, amount: U256, lock_duration: u64) -> Result<TxReceipt> {
        self.send(
            self.address,
            sig::PARTICIPATE,
            &[Arg::Uint(amount), Arg::Uint(U256::from(lock_duration))],
        )
        .await
    }

    async fn claim_tokens(&self) -> Result<TxReceipt> {
        self.send(self.address, sig::CLAIM_TOKENS, &[]).await
    }

    async fn claim_rewards(&self) -> Result<TxReceipt> {
        self.send(self.address, sig::CLAIM_REWARDS, &[]).await
    }
}

fn parse_block(block: &Value) -> Result<BlockInfo> {
    if block.is_null() {
        return Err(WalletError::Decode("block not found".into()));
    }
    Ok(BlockInfo {
        number: parse_quantity(&block["number"])?,
        timestamp: parse_quantity(&block["timestamp"])?,
    })
}

async fn fetch_logs(
    provider: &dyn Eip1193Provider,
    contract: Address,
    who: Address,
    from_block: u64,
    to_block: Option<u64>,
) -> Result<Vec<PresaleEvent>> {
    let topics: Vec<B256> = PresaleEventKind::ALL
        .iter()
        .map(|kind| abi::event_topic(kind.signature()))
        .collect();
    let filter = json!({
        "address": contract,
        "fromBlock": quantity(from_block),
        "toBlock": to_block.map(quantity).unwrap_or_else(|| "latest".to_string()),
        "topics": [topics, abi::address_topic(who)],
    });
    let logs = provider.request("eth_getLogs", json!([filter])).await?;
    let logs = logs
        .as_array()
        .ok_or_else(|| WalletError::Decode("eth_getLogs did not return a list".into()))?;
    logs.iter().filter_map(|log| parse_log(log).transpose()).collect()
}

/// `None` for logs that are not one of ours.
fn parse_log(log: &Value) -> Result<Option<PresaleEvent>> {
    let topics = log["topics"].as_array().cloned().unwrap_or_default();
    let Some(topic0) = topics.first() else {
        return Ok(None);
    };
    let Some(kind) = PresaleEventKind::from_topic(parse_b256(topic0)?) else {
        return Ok(None);
    };
    let participant = topics
        .get(1)
        .ok_or_else(|| WalletError::Decode("event without participant topic".into()))
        .and_then(parse_b256)
        .map(Address::from_word)?;
    let data = abi::from_hex(log["data"].as_str().unwrap_or_default())?;
    Ok(Some(PresaleEvent {
        kind,
        participant,
        amount: Words::new(&data).uint(0)?,
        block_number: parse_quantity(&log["blockNumber"])?,
        tx_hash: parse_b256(&log["transactionHash"])?,
    }))
}

async fn poll_logs(
    provider: Arc<dyn Eip1193Provider>,
    contract: Address,
    who: Address,
    interval: Duration,
    tx: mpsc::UnboundedSender<PresaleEvent>,
) {
    let mut next_block: Option<u64> = None;
    loop {
        tokio::time::sleep(interval).await;
        if tx.is_closed() {
            return;
        }
        let head = match provider
            .request("eth_blockNumber", json!([]))
            .await
            .and_then(|v| parse_quantity(&v))
        {
            Ok(head) => head,
            Err(e) => {
                warn!(error = %e, "event watcher could not read block number");
                continue;
            }
        };
        let from = match next_block {
            // First tick only establishes where "new" starts.
            None => {
                next_block = Some(head + 1);
                continue;
            }
            Some(from) if from > head => continue,
            Some(from) => from,
        };
        match fetch_logs(provider.as_ref(), contract, who, from, Some(head)).await {
            Ok(events) => {
                for event in events {
                    debug!(kind = ?event.kind, block = event.block_number, "contract event");
                    if tx.send(event).is_err() {
                        return;
                    }
                }
                next_block = Some(head + 1);
            }
            Err(e) => warn!(error = %e, "event watcher could not read logs"),
        }
    }
}

/// Binds [`RpcPresale`] to whichever signer the session currently holds.
pub struct RpcBinder {
    address: Result<Address>,
    event_poll: Duration,
}

impl RpcBinder {
    pub fn new(address: Result<Address>, event_poll: Duration) -> Self {
        Self {
            address,
            event_poll,
        }
    }
}

impl ContractBinder for RpcBinder {
    fn bind(&self, signer: &Signer) -> Result<Arc<dyn PresaleContract>> {
        let address = self.address.clone()?;
        Ok(Arc::new(RpcPresale::new(signer.clone(), address, self.event_poll)))
    }
}
