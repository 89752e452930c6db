//! In-memory stand-ins for the wallet and the presale contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

use crate::contract::{
    BlockInfo, ContractBinder, EventSubscription, ParticipantInfo, Participation, PresaleContract,
    PresaleEvent, PresaleEventKind, PresaleStage, PresaleStats, TxReceipt,
};
use crate::error::{Result, WalletError};
use crate::provider::{quantity, Eip1193Provider, ProviderEvent, Signer, WalletDetector};
use crate::session::WalletSession;
use crate::storage::MemoryStore;

/// APR the mock contract assigns to every new participation.
pub const MOCK_APR_BPS: u64 = 1_000;
const BLOCK_TIME: u64 = 12;

pub fn account(n: u8) -> Address {
    Address::with_last_byte(n)
}

/// Let spawned tasks drain their queues. Under paused time this costs nothing.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// A session already connected to `address` through a [`MockWallet`].
pub async fn connected_session(address: Address, chain_id: u64) -> (WalletSession, Arc<MockWallet>) {
    let wallet = MockWallet::authorized(vec![address], chain_id);
    let session = WalletSession::new(
        Arc::new(MockDetector::present(wallet.clone())),
        Arc::new(MemoryStore::new()),
    );
    session.connect().await;
    (session, wallet)
}

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

pub struct MockWallet {
    accounts: Mutex<Vec<Address>>,
    chain_id: AtomicU64,
    reject: AtomicBool,
    approval_delay: Mutex<Duration>,
    calls: Mutex<Vec<String>>,
    events: broadcast::Sender<ProviderEvent>,
}

impl MockWallet {
    pub fn authorized(accounts: Vec<Address>, chain_id: u64) -> Arc<Self> {
        Arc::new(Self {
            accounts: Mutex::new(accounts),
            chain_id: AtomicU64::new(chain_id),
            reject: AtomicBool::new(false),
            approval_delay: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
            events: broadcast::channel(16).0,
        })
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// How long account queries take to answer, as if the user were reading the prompt.
    pub fn set_approval_delay(&self, delay: Duration) {
        *self.approval_delay.lock() = delay;
    }

    pub fn set_chain(&self, chain_id: u64) {
        self.chain_id.store(chain_id, Ordering::SeqCst);
    }

    pub fn set_accounts(&self, accounts: Vec<Address>) {
        *self.accounts.lock() = accounts;
    }

    pub fn emit(&self, event: ProviderEvent) {
        if let ProviderEvent::AccountsChanged(accounts) = &event {
            self.set_accounts(accounts.clone());
        }
        let _ = self.events.send(event);
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|m| *m == method).count()
    }

    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn accounts_json(&self) -> Value {
        json!(*self.accounts.lock())
    }
}

#[async_trait]
impl Eip1193Provider for MockWallet {
    async fn request(&self, method: &str, _params: Value) -> Result<Value> {
        self.calls.lock().push(method.to_string());
        match method {
            "eth_accounts" | "eth_requestAccounts" => {
                let delay = *self.approval_delay.lock();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if method == "eth_requestAccounts" && self.reject.load(Ordering::SeqCst) {
                    return Err(WalletError::UserRejected);
                }
                Ok(self.accounts_json())
            }
            "eth_chainId" => Ok(json!(quantity(self.chain_id.load(Ordering::SeqCst)))),
            other => Err(WalletError::Rpc {
                code: -32601,
                message: format!("method {other} not supported"),
            }),
        }
    }

    fn events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

/// Reports the wallet from the `available_from`-th detection attempt on.
pub struct MockDetector {
    wallet: Option<Arc<MockWallet>>,
    available_from: u32,
    attempts: AtomicU32,
}

impl MockDetector {
    pub fn present(wallet: Arc<MockWallet>) -> Self {
        Self::present_from(wallet, 1)
    }

    pub fn present_from(wallet: Arc<MockWallet>, attempt: u32) -> Self {
        Self {
            wallet: Some(wallet),
            available_from: attempt,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn absent() -> Self {
        Self {
            wallet: None,
            available_from: u32::MAX,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletDetector for MockDetector {
    async fn detect(&self) -> Option<Arc<dyn Eip1193Provider>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt < self.available_from {
            return None;
        }
        self.wallet
            .clone()
            .map(|wallet| wallet as Arc<dyn Eip1193Provider>)
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Everything the mock contract knows. Mutate it through [`MockPresale::update`].
#[derive(Clone, Debug)]
pub struct ChainState {
    pub stage: PresaleStage,
    pub stats: PresaleStats,
    pub paused: bool,
    pub token_decimals: u8,
    pub payment_decimals: u8,
    pub participants: HashMap<Address, ParticipantInfo>,
    pub participations: HashMap<Address, Vec<Participation>>,
    pub rewards: HashMap<Address, U256>,
    pub balances: HashMap<Address, U256>,
    pub allowances: HashMap<Address, U256>,
    pub history: Vec<PresaleEvent>,
    pub block: BlockInfo,
    pub block_times: HashMap<u64, u64>,
}

impl Default for ChainState {
    fn default() -> Self {
        let block = BlockInfo {
            number: 1,
            timestamp: 1_700_000_000,
        };
        Self {
            stage: PresaleStage::Active,
            stats: PresaleStats {
                cap: U256::from(1_000_000_000_000_000_000_000_000u128),
                start_time: block.timestamp - 86_400,
                end_time: block.timestamp + 30 * 86_400,
                ..PresaleStats::default()
            },
            paused: false,
            token_decimals: 18,
            payment_decimals: 6,
            participants: HashMap::new(),
            participations: HashMap::new(),
            rewards: HashMap::new(),
            balances: HashMap::new(),
            allowances: HashMap::new(),
            history: Vec::new(),
            block,
            block_times: HashMap::from([(block.number, block.timestamp)]),
        }
    }
}

impl ChainState {
    fn mine(&mut self) -> BlockInfo {
        self.block = BlockInfo {
            number: self.block.number + 1,
            timestamp: self.block.timestamp + BLOCK_TIME,
        };
        self.block_times.insert(self.block.number, self.block.timestamp);
        self.block
    }

    /// Payment units scaled to sale-token units.
    fn tokens_for(&self, payment: U256) -> U256 {
        let (token, pay) = (self.token_decimals, self.payment_decimals);
        if token >= pay {
            payment * U256::from(10u8).pow(U256::from(token - pay))
        } else {
            payment / U256::from(10u8).pow(U256::from(pay - token))
        }
    }
}

struct MockChain {
    state: Mutex<ChainState>,
    calls: Mutex<Vec<&'static str>>,
    failing: Mutex<Option<WalletError>>,
    write_error: Mutex<Option<WalletError>>,
    read_delay: Mutex<Duration>,
    subscribers: Mutex<Vec<(Address, mpsc::UnboundedSender<PresaleEvent>)>>,
}

/// A presale contract held in memory. Clones share the same chain; [`MockPresale::for_account`]
/// picks the sending account for writes.
#[derive(Clone)]
pub struct MockPresale {
    chain: Arc<MockChain>,
    sender: Address,
}

impl Default for MockPresale {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPresale {
    pub fn new() -> Self {
        Self {
            chain: Arc::new(MockChain {
                state: Mutex::new(ChainState::default()),
                calls: Mutex::new(Vec::new()),
                failing: Mutex::new(None),
                write_error: Mutex::new(None),
                read_delay: Mutex::new(Duration::ZERO),
                subscribers: Mutex::new(Vec::new()),
            }),
            sender: Address::ZERO,
        }
    }

    pub fn for_account(&self, sender: Address) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
            sender,
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut ChainState)) {
        f(&mut self.chain.state.lock());
    }

    pub fn snapshot(&self) -> ChainState {
        self.chain.state.lock().clone()
    }

    pub fn set_block(&self, number: u64, timestamp: u64) {
        self.update(|s| {
            s.block = BlockInfo { number, timestamp };
            s.block_times.insert(number, timestamp);
        });
    }

    pub fn fund(&self, who: Address, balance: U256) {
        self.update(|s| {
            s.balances.insert(who, balance);
        });
    }

    /// Every read fails with `error` until cleared with `None`.
    pub fn set_failing(&self, error: Option<WalletError>) {
        *self.chain.failing.lock() = error;
    }

    /// The next writes fail with `error` until cleared with `None`.
    pub fn set_write_error(&self, error: Option<WalletError>) {
        *self.chain.write_error.lock() = error;
    }

    pub fn set_read_delay(&self, delay: Duration) {
        *self.chain.read_delay.lock() = delay;
    }

    /// How many times the named trait method was called.
    pub fn calls(&self, method: &str) -> usize {
        self.chain.calls.lock().iter().filter(|m| **m == method).count()
    }

    pub fn call_log(&self) -> Vec<&'static str> {
        self.chain.calls.lock().clone()
    }

    /// Append an event to history and push it to live subscribers.
    pub fn push_event(&self, event: PresaleEvent) {
        self.chain.state.lock().history.push(event);
        self.chain
            .subscribers
            .lock()
            .retain(|(who, tx)| *who != event.participant || tx.send(event).is_ok());
    }

    async fn read<T>(&self, method: &'static str, f: impl FnOnce(&ChainState) -> T) -> Result<T> {
        self.chain.calls.lock().push(method);
        let delay = *self.chain.read_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.chain.failing.lock().clone() {
            return Err(err);
        }
        Ok(f(&self.chain.state.lock()))
    }

    /// Run a state transition as one mined transaction from `sender`.
    fn write(
        &self,
        method: &'static str,
        f: impl FnOnce(&mut ChainState, Address) -> std::result::Result<Option<(PresaleEventKind, U256)>, &'static str>,
    ) -> Result<TxReceipt> {
        self.chain.calls.lock().push(method);
        if let Some(err) = self.chain.write_error.lock().clone() {
            return Err(err);
        }
        let (block, event) = {
            let mut state = self.chain.state.lock();
            let outcome = f(&mut state, self.sender)
                .map_err(|reason| WalletError::Reverted(Some(reason.to_string())))?;
            (state.mine(), outcome)
        };
        let tx_hash = B256::left_padding_from(&block.number.to_be_bytes());
        if let Some((kind, amount)) = event {
            self.push_event(PresaleEvent {
                kind,
                participant: self.sender,
                amount,
                block_number: block.number,
                tx_hash,
            });
        }
        Ok(TxReceipt {
            tx_hash,
            block_number: block.number,
        })
    }
}

#[async_trait]
impl PresaleContract for MockPresale {
    async fn stage(&self) -> Result<PresaleStage> {
        self.read("stage", |s| s.stage).await
    }

    async fn stats(&self) -> Result<PresaleStats> {
        self.read("stats", |s| s.stats).await
    }

    async fn participant(&self, who: Address) -> Result<ParticipantInfo> {
        self.read("participant", |s| s.participants.get(&who).copied().unwrap_or_default())
            .await
    }

    async fn participations(&self, who: Address) -> Result<Vec<Participation>> {
        self.read("participations", |s| {
            s.participations.get(&who).cloned().unwrap_or_default()
        })
        .await
    }

    async fn claimable_rewards(&self, who: Address) -> Result<U256> {
        self.read("claimable_rewards", |s| s.rewards.get(&who).copied().unwrap_or_default())
            .await
    }

    async fn paused(&self) -> Result<bool> {
        self.read("paused", |s| s.paused).await
    }

    async fn token_decimals(&self) -> Result<u8> {
        self.read("token_decimals", |s| s.token_decimals).await
    }

    async fn payment_decimals(&self) -> Result<u8> {
        self.read("payment_decimals", |s| s.payment_decimals).await
    }

    async fn payment_balance(&self, who: Address) -> Result<U256> {
        self.read("payment_balance", |s| s.balances.get(&who).copied().unwrap_or_default())
            .await
    }

    async fn payment_allowance(&self, owner: Address) -> Result<U256> {
        self.read("payment_allowance", |s| {
            s.allowances.get(&owner).copied().unwrap_or_default()
        })
        .await
    }

    async fn latest_block(&self) -> Result<BlockInfo> {
        self.read("latest_block", |s| s.block).await
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64> {
        self.read("block_timestamp", |s| s.block_times.get(&number).copied())
            .await?
            .ok_or_else(|| WalletError::Decode(format!("unknown block {number}")))
    }

    async fn events(&self, who: Address, from_block: u64) -> Result<Vec<PresaleEvent>> {
        self.read("events", |s| {
            s.history
                .iter()
                .filter(|e| e.participant == who && e.block_number >= from_block)
                .copied()
                .collect()
        })
        .await
    }

    fn subscribe(&self, who: Address) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.chain.subscribers.lock().push((who, tx));
        EventSubscription::new(rx, None)
    }

    async fn approve_payment(&self, amount: U256) -> Result<TxReceipt> {
        self.write("approve_payment", |s, sender| {
            s.allowances.insert(sender, amount);
            Ok(None)
        })
    }

    async fn participate(&self, amount: U256, lock_duration: u64) -> Result<TxReceipt> {
        self.write("participate", |s, sender| {
            if s.paused || s.stage != PresaleStage::Active {
                return Err("Presale: not active");
            }
            let allowance = s.allowances.get(&sender).copied().unwrap_or_default();
            if allowance < amount {
                return Err("ERC20: insufficient allowance");
            }
            let balance = s.balances.get(&sender).copied().unwrap_or_default();
            if balance < amount {
                return Err("ERC20: transfer amount exceeds balance");
            }
            let tokens = s.tokens_for(amount);
            let start_time = s.block.timestamp + BLOCK_TIME;

            s.allowances.insert(sender, allowance - amount);
            s.balances.insert(sender, balance - amount);
            let info = s.participants.entry(sender).or_default();
            if info.total_purchased.is_zero() {
                s.stats.participants += 1;
            }
            info.total_purchased += tokens;
            s.stats.sold += tokens;
            s.stats.raised += amount;
            s.participations.entry(sender).or_default().push(Participation {
                amount: tokens,
                apr_bps: MOCK_APR_BPS,
                lock_duration,
                start_time,
                end_time: start_time + lock_duration,
                last_reward_time: start_time,
            });
            Ok(Some((PresaleEventKind::Purchase, tokens)))
        })
    }

    async fn claim_tokens(&self) -> Result<TxReceipt> {
        self.write("claim_tokens", |s, sender| {
            if s.stage != PresaleStage::ClaimOpen {
                return Err("Presale: claim not open");
            }
            let info = s.participants.entry(sender).or_default();
            let claimable = info.total_purchased.saturating_sub(info.total_claimed);
            if claimable.is_zero() {
                return Err("Presale: nothing to claim");
            }
            info.total_claimed = info.total_purchased;
            Ok(Some((PresaleEventKind::TokensClaimed, claimable)))
        })
    }

    async fn claim_rewards(&self) -> Result<TxReceipt> {
        self.write("claim_rewards", |s, sender| {
            let rewards = s.rewards.remove(&sender).unwrap_or_default();
            if rewards.is_zero() {
                return Err("Presale: no rewards");
            }
            Ok(Some((PresaleEventKind::RewardsClaimed, rewards)))
        })
    }
}

/// Binds the shared [`MockPresale`] to whichever account the signer holds.
pub struct MockBinder {
    presale: MockPresale,
    binds: AtomicU32,
}

impl MockBinder {
    pub fn new(presale: MockPresale) -> Self {
        Self {
            presale,
            binds: AtomicU32::new(0),
        }
    }

    pub fn binds(&self) -> u32 {
        self.binds.load(Ordering::SeqCst)
    }
}

impl ContractBinder for MockBinder {
    fn bind(&self, signer: &Signer) -> Result<Arc<dyn PresaleContract>> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.presale.for_account(signer.address())))
    }
}
