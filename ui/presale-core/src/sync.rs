//! Keeps one page's contract snapshot fresh.
//!
//! A [`Synchronizer`] owns a worker task that reacts to four triggers: session changes,
//! contract events for the connected account, a polling interval and explicit requests.
//! Triggers are debounced into one load; loads are serialized; failures retry with
//! exponential backoff and fall back to the last cached snapshot while it is within its
//! TTL. Dropping the synchronizer stops the worker, its timers and its event subscription.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::cache::SnapshotCache;
use crate::chain_time::ChainClock;
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::contract::{ContractBinder, EventSubscription, PresaleContract, PresaleEvent, PresaleEventKind};
use crate::error::{ErrorKind, Result, WalletError};
use crate::session::{SessionState, WalletSession};
use crate::storage::KeyValueStore;

/// What a load gets to work with. Only built while the session is connected.
pub struct LoadContext {
    pub contract: Arc<dyn PresaleContract>,
    pub account: Address,
    pub chain_id: u64,
    pub chain_clock: Arc<ChainClock>,
}

impl LoadContext {
    /// Chain-adjusted now, resyncing the offset if it is due.
    pub async fn chain_now(&self) -> Result<u64> {
        self.chain_clock.sync(self.contract.as_ref(), self.chain_id).await
    }
}

/// The reads and decoding behind one page.
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    type Snapshot: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Cache key namespace, also used in logs.
    fn page(&self) -> &'static str;

    /// Contract events that should refresh this page.
    fn event_kinds(&self) -> &'static [PresaleEventKind] {
        &PresaleEventKind::ALL
    }

    async fn load(&self, ctx: &LoadContext) -> Result<Self::Snapshot>;
}

/// Services shared by every synchronizer in the application.
#[derive(Clone)]
pub struct SyncContext {
    pub session: WalletSession,
    pub binder: Arc<dyn ContractBinder>,
    pub cache: SnapshotCache,
    pub chain_clock: Arc<ChainClock>,
    pub clock: Arc<dyn Clock>,
}

impl SyncContext {
    pub fn new(
        session: WalletSession,
        binder: Arc<dyn ContractBinder>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: &AppConfig,
    ) -> Self {
        Self {
            session,
            binder,
            cache: SnapshotCache::new(store, Arc::clone(&clock), config.cache_ttl()),
            chain_clock: Arc::new(ChainClock::new(Arc::clone(&clock), config.chain_time_resync())),
            clock,
        }
    }

    /// The contract bound to the session's current signer, for writes.
    pub fn contract(&self) -> Result<Arc<dyn PresaleContract>> {
        let signer = self.session.signer().ok_or(WalletError::NotConnected)?;
        self.binder.bind(&signer)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncSettings {
    pub poll: Duration,
    pub debounce: Duration,
    pub timeout: Duration,
    pub backoff: Backoff,
}

impl SyncSettings {
    pub fn new(config: &AppConfig, poll: Duration) -> Self {
        Self {
            poll,
            debounce: config.debounce(),
            timeout: config.request_timeout(),
            backoff: Backoff::default(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(30),
            debounce: Duration::from_millis(500),
            timeout: Duration::from_secs(20),
            backoff: Backoff::default(),
        }
    }
}

/// Where the displayed snapshot came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Freshness {
    #[default]
    None,
    Live,
    Cached { saved_at_ms: u64 },
}

/// What a page should render.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewStatus {
    /// No session; show the connect call-to-action.
    Disconnected,
    Loading,
    Ready,
    /// Showing a cached snapshot after a failed load.
    Stale,
    /// A load failed and nothing valid is cached.
    NoData,
    /// The page cannot work at all, e.g. the contract address is misconfigured.
    Failed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SyncState<T> {
    pub active: bool,
    pub snapshot: Option<T>,
    pub freshness: Freshness,
    pub loading: bool,
    pub error: Option<WalletError>,
    pub last_updated_ms: Option<u64>,
    pub retry_attempt: u32,
}

impl<T> Default for SyncState<T> {
    fn default() -> Self {
        Self {
            active: false,
            snapshot: None,
            freshness: Freshness::None,
            loading: false,
            error: None,
            last_updated_ms: None,
            retry_attempt: 0,
        }
    }
}

impl<T> SyncState<T> {
    pub fn view(&self) -> ViewStatus {
        if !self.active {
            return match &self.error {
                Some(e) if e.kind() == ErrorKind::Config => ViewStatus::Failed,
                _ => ViewStatus::Disconnected,
            };
        }
        match (&self.snapshot, self.freshness) {
            (Some(_), Freshness::Live) => ViewStatus::Ready,
            (Some(_), _) => ViewStatus::Stale,
            (None, _) if self.loading || self.error.is_none() => ViewStatus::Loading,
            (None, _) => ViewStatus::NoData,
        }
    }
}

enum Command {
    Trigger,
    ReloadNow(oneshot::Sender<()>),
    DismissError,
}

/// Handle to a running page synchronizer.
pub struct Synchronizer<S: SnapshotSource> {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SyncState<S::Snapshot>>,
    worker: JoinHandle<()>,
}

impl<S: SnapshotSource> Synchronizer<S> {
    pub fn spawn(source: S, ctx: SyncContext, settings: SyncSettings) -> Self {
        let (state_tx, state) = watch::channel(SyncState::default());
        let (commands, command_rx) = mpsc::unbounded_channel();
        let session = ctx.session.subscribe();
        let worker = Worker {
            source,
            backoff: settings.backoff.clone(),
            ctx,
            settings,
            state: state_tx,
            binding: None,
            debounce_at: None,
            retry_at: None,
            poll_at: None,
            waiters: Vec::new(),
        };
        Self {
            commands,
            state,
            worker: tokio::spawn(worker.run(session, command_rx)),
        }
    }

    /// Debounced request for a fresh load.
    pub fn refresh(&self) {
        let _ = self.commands.send(Command::Trigger);
    }

    /// Load now, bypassing the debounce, and wait until the load has been applied.
    pub async fn reload(&self) -> SyncState<S::Snapshot> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::ReloadNow(tx)).is_ok() {
            let _ = rx.await;
        }
        self.state()
    }

    /// Await a state-changing transaction, then reload whatever its outcome.
    pub async fn after_write<T>(&self, write: impl Future<Output = Result<T>>) -> Result<T> {
        let result = write.await;
        if let Err(e) = &result {
            warn!(error = %e, "transaction failed");
        }
        self.reload().await;
        result
    }

    pub fn dismiss_error(&self) {
        let _ = self.commands.send(Command::DismissError);
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState<S::Snapshot>> {
        self.state.clone()
    }

    pub fn state(&self) -> SyncState<S::Snapshot> {
        self.state.borrow().clone()
    }
}

impl<S: SnapshotSource> Drop for Synchronizer<S> {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

struct Binding {
    contract: Arc<dyn PresaleContract>,
    account: Address,
    chain_id: u64,
    events: Option<EventSubscription>,
}

struct Worker<S: SnapshotSource> {
    source: S,
    ctx: SyncContext,
    settings: SyncSettings,
    backoff: Backoff,
    state: watch::Sender<SyncState<S::Snapshot>>,
    binding: Option<Binding>,
    debounce_at: Option<Instant>,
    retry_at: Option<Instant>,
    poll_at: Option<Instant>,
    waiters: Vec<oneshot::Sender<()>>,
}

impl<S: SnapshotSource> Worker<S> {
    async fn run(
        mut self,
        mut session: watch::Receiver<SessionState>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let initial = session.borrow_and_update().clone();
        self.rebind(&initial);
        loop {
            let deadline = [self.debounce_at, self.retry_at, self.poll_at]
                .into_iter()
                .flatten()
                .min();
            tokio::select! {
                changed = session.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let state = session.borrow_and_update().clone();
                    self.on_session(&state);
                }
                command = commands.recv() => match command {
                    None => return,
                    Some(Command::Trigger) => self.trigger(),
                    Some(Command::ReloadNow(done)) => {
                        self.waiters.push(done);
                        self.load().await;
                    }
                    Some(Command::DismissError) => self.state.send_modify(|s| s.error = None),
                },
                event = next_event(&mut self.binding) => self.on_event(event),
                _ = sleep_until(deadline) => self.load().await,
            }
        }
    }

    fn key(&self, chain_id: u64, account: Address) -> String {
        SnapshotCache::key(self.source.page(), chain_id, &account)
    }

    fn on_session(&mut self, state: &SessionState) {
        let target = state.ready_signer().map(|s| (s.address(), s.chain_id()));
        let current = self.binding.as_ref().map(|b| (b.account, b.chain_id));
        if target != current {
            self.rebind(state);
        }
    }

    /// Drop everything tied to the previous account and start over for the new one.
    fn rebind(&mut self, state: &SessionState) {
        self.binding = None;
        self.debounce_at = None;
        self.retry_at = None;
        self.poll_at = None;
        self.backoff.reset();
        let page = self.source.page();

        let Some(signer) = state.ready_signer() else {
            debug!(page, "no session; synchronizer idle");
            self.state.send_replace(SyncState::default());
            self.notify_waiters();
            return;
        };
        let contract = match self.ctx.binder.bind(signer) {
            Ok(contract) => contract,
            Err(e) => {
                warn!(page, error = %e, "cannot bind contract");
                self.state.send_replace(SyncState {
                    error: Some(e),
                    ..SyncState::default()
                });
                self.notify_waiters();
                return;
            }
        };

        let account = signer.address();
        debug!(page, %account, chain_id = signer.chain_id(), "binding synchronizer");
        let cached = self.ctx.cache.load::<S::Snapshot>(&self.key(signer.chain_id(), account));
        self.binding = Some(Binding {
            events: Some(contract.subscribe(account)),
            contract,
            account,
            chain_id: signer.chain_id(),
        });
        self.state.send_replace(SyncState {
            active: true,
            freshness: cached
                .as_ref()
                .map_or(Freshness::None, |c| Freshness::Cached { saved_at_ms: c.saved_at_ms }),
            snapshot: cached.map(|c| c.data),
            ..SyncState::default()
        });
        self.trigger();
    }

    /// Open the debounce window if it is not already open.
    fn trigger(&mut self) {
        if self.binding.is_some() && self.debounce_at.is_none() {
            self.debounce_at = Some(Instant::now() + self.settings.debounce);
        }
    }

    fn on_event(&mut self, event: Option<PresaleEvent>) {
        match event {
            Some(event) if self.source.event_kinds().contains(&event.kind) => {
                debug!(page = self.source.page(), kind = ?event.kind, "refreshing on contract event");
                self.trigger();
            }
            Some(_) => {}
            None => {
                warn!(page = self.source.page(), "event subscription closed; relying on polling");
                if let Some(binding) = self.binding.as_mut() {
                    binding.events = None;
                }
            }
        }
    }

    async fn load(&mut self) {
        self.debounce_at = None;
        self.retry_at = None;
        self.poll_at = None;

        let Some(binding) = &self.binding else {
            self.notify_waiters();
            return;
        };
        let ctx = LoadContext {
            contract: Arc::clone(&binding.contract),
            account: binding.account,
            chain_id: binding.chain_id,
            chain_clock: Arc::clone(&self.ctx.chain_clock),
        };
        let page = self.source.page();
        self.state.send_modify(|s| s.loading = true);

        let result = match tokio::time::timeout(self.settings.timeout, self.source.load(&ctx)).await {
            Ok(result) => result,
            Err(_) => Err(WalletError::Timeout),
        };

        let current = self
            .ctx
            .session
            .state()
            .ready_signer()
            .map(|s| (s.address(), s.chain_id()));
        if current != Some((ctx.account, ctx.chain_id)) {
            debug!(page, account = %ctx.account, "discarding result for a previous session");
        } else {
            match result {
                Ok(snapshot) => self.apply(ctx.chain_id, ctx.account, snapshot),
                Err(e) => self.fail(ctx.chain_id, ctx.account, e),
            }
        }
        self.notify_waiters();
    }

    fn apply(&mut self, chain_id: u64, account: Address, snapshot: S::Snapshot) {
        let page = self.source.page();
        if let Err(e) = self.ctx.cache.save(&self.key(chain_id, account), &snapshot) {
            warn!(page, error = %e, "could not cache snapshot");
        }
        self.backoff.reset();
        self.poll_at = Some(Instant::now() + self.settings.poll);
        let now = self.ctx.clock.now_ms();
        self.state.send_modify(|s| {
            s.snapshot = Some(snapshot);
            s.freshness = Freshness::Live;
            s.loading = false;
            s.error = None;
            s.last_updated_ms = Some(now);
            s.retry_attempt = 0;
        });
        debug!(page, %account, "snapshot loaded");
    }

    fn fail(&mut self, chain_id: u64, account: Address, error: WalletError) {
        let page = self.source.page();
        if error.is_retryable() {
            let delay = self.backoff.next_delay();
            info!(page, error = %error, attempt = self.backoff.attempt(), delay_secs = delay.as_secs(), "load failed; retrying");
            self.retry_at = Some(Instant::now() + delay);
        } else {
            warn!(page, error = %error, "load failed");
            self.poll_at = Some(Instant::now() + self.settings.poll);
        }

        let cached = self.ctx.cache.load::<S::Snapshot>(&self.key(chain_id, account));
        let attempt = self.backoff.attempt();
        self.state.send_modify(|s| {
            s.loading = false;
            s.error = Some(error);
            s.retry_attempt = attempt;
            match cached {
                Some(c) => {
                    s.snapshot = Some(c.data);
                    s.freshness = Freshness::Cached { saved_at_ms: c.saved_at_ms };
                }
                None => {
                    s.snapshot = None;
                    s.freshness = Freshness::None;
                }
            }
        });
    }

    fn notify_waiters(&mut self) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(());
        }
    }
}

async fn next_event(binding: &mut Option<Binding>) -> Option<PresaleEvent> {
    match binding.as_mut().and_then(|b| b.events.as_mut()) {
        Some(events) => events.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::U256;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::clock::SystemClock;
    use crate::contract::{ParticipantInfo, PresaleEvent, PresaleStage};
    use crate::storage::MemoryStore;
    use crate::testing::{account, connected_session, settle, MockBinder, MockDetector, MockPresale};

    struct ParticipantSource;

    #[async_trait]
    impl SnapshotSource for ParticipantSource {
        type Snapshot = ParticipantInfo;

        fn page(&self) -> &'static str {
            "participant"
        }

        async fn load(&self, ctx: &LoadContext) -> Result<ParticipantInfo> {
            ctx.contract.participant(ctx.account).await
        }
    }

    struct Harness {
        ctx: SyncContext,
        presale: MockPresale,
        binder: Arc<MockBinder>,
        store: Arc<MemoryStore>,
    }

    fn harness(session: WalletSession) -> Harness {
        let presale = MockPresale::new();
        let binder = Arc::new(MockBinder::new(presale.clone()));
        let store = Arc::new(MemoryStore::new());
        let ctx = SyncContext::new(
            session,
            binder.clone(),
            store.clone(),
            Arc::new(SystemClock::new()),
            &AppConfig::default(),
        );
        Harness {
            ctx,
            presale,
            binder,
            store,
        }
    }

    fn purchased(amount: u64) -> ParticipantInfo {
        ParticipantInfo {
            total_purchased: U256::from(amount),
            total_claimed: U256::ZERO,
        }
    }

    fn spawn(h: &Harness) -> Synchronizer<ParticipantSource> {
        Synchronizer::spawn(ParticipantSource, h.ctx.clone(), SyncSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn no_session_means_no_contract_calls() {
        let session = WalletSession::new(Arc::new(MockDetector::absent()), Arc::new(MemoryStore::new()));
        session.init().await;
        let h = harness(session);
        let sync = spawn(&h);

        sync.refresh();
        tokio::time::sleep(Duration::from_secs(120)).await;
        let state = sync.reload().await;

        assert_eq!(state.view(), ViewStatus::Disconnected);
        assert!(h.presale.call_log().is_empty());
        assert_eq!(h.binder.binds(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn triggers_within_debounce_window_coalesce() {
        let (session, _wallet) = connected_session(account(1), 1).await;
        let h = harness(session);
        let sync = spawn(&h);

        // Mount opened the window; an event and a manual refresh land inside it.
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.presale.push_event(PresaleEvent {
            kind: PresaleEventKind::Purchase,
            participant: account(1),
            amount: U256::from(1u8),
            block_number: 2,
            tx_hash: Default::default(),
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        sync.refresh();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(h.presale.calls("participant"), 1);
        assert_eq!(sync.state().view(), ViewStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn contract_event_refreshes_page() {
        let (session, _wallet) = connected_session(account(1), 1).await;
        let h = harness(session);
        let sync = spawn(&h);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sync.state().snapshot, Some(ParticipantInfo::default()));

        h.presale.update(|s| {
            s.participants.insert(account(1), purchased(50));
        });
        h.presale.push_event(PresaleEvent {
            kind: PresaleEventKind::Purchase,
            participant: account(1),
            amount: U256::from(50u8),
            block_number: 2,
            tx_hash: Default::default(),
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(h.presale.calls("participant"), 2);
        assert_eq!(sync.state().snapshot, Some(purchased(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_load_retries_with_backoff_over_stale_cache() {
        let (session, _wallet) = connected_session(account(1), 1).await;
        let h = harness(session);
        h.ctx
            .cache
            .save(&SnapshotCache::key("participant", 1, &account(1)), &purchased(10))
            .unwrap();
        h.presale.update(|s| {
            s.participants.insert(account(1), purchased(20));
        });
        h.presale.set_failing(Some(WalletError::Network("connection reset".into())));
        let sync = spawn(&h);

        tokio::time::sleep(Duration::from_millis(600)).await;
        let state = sync.state();
        assert_eq!(h.presale.calls("participant"), 1);
        assert_eq!(state.view(), ViewStatus::Stale);
        assert_eq!(state.snapshot, Some(purchased(10)));
        assert_eq!(state.retry_attempt, 1);
        assert!(state.error.is_some());

        // First retry after 10s fails too.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.presale.calls("participant"), 2);
        assert_eq!(sync.state().retry_attempt, 2);

        // Second retry 20s later succeeds without user action.
        h.presale.set_failing(None);
        tokio::time::sleep(Duration::from_secs(19)).await;
        assert_eq!(h.presale.calls("participant"), 2);
        tokio::time::sleep(Duration::from_secs(1)).await;
        let state = sync.state();
        assert_eq!(h.presale.calls("participant"), 3);
        assert_eq!(state.view(), ViewStatus::Ready);
        assert_eq!(state.snapshot, Some(purchased(20)));
        assert_eq!(state.error, None);
        assert_eq!(state.retry_attempt, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_is_not_served_after_ttl() {
        let (session, _wallet) = connected_session(account(1), 1).await;
        let h = harness(session);
        h.presale.update(|s| {
            s.participants.insert(account(1), purchased(5));
        });
        let sync = spawn(&h);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sync.state().view(), ViewStatus::Ready);

        h.presale.set_failing(Some(WalletError::Timeout));
        tokio::time::sleep(Duration::from_secs(200)).await;
        let state = sync.state();
        assert_eq!(state.view(), ViewStatus::Stale);
        assert_eq!(state.snapshot, Some(purchased(5)));

        tokio::time::sleep(Duration::from_secs(150)).await;
        let state = sync.state();
        assert_eq!(state.view(), ViewStatus::NoData);
        assert_eq!(state.snapshot, None);
        assert_eq!(state.error, Some(WalletError::Timeout));
        assert!(h.store.keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn after_write_shows_post_transaction_state() {
        let (session, _wallet) = connected_session(account(1), 1).await;
        let h = harness(session);
        h.presale.update(|s| {
            s.stage = PresaleStage::ClaimOpen;
            s.participants.insert(account(1), purchased(70));
        });
        let sync = spawn(&h);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sync.state().snapshot.unwrap().total_claimed, U256::ZERO);

        let contract = h.ctx.contract().unwrap();
        let receipt = sync.after_write(contract.claim_tokens()).await.unwrap();
        assert!(receipt.block_number > 1);

        let snapshot = sync.state().snapshot.unwrap();
        assert_eq!(snapshot.total_claimed, U256::from(70u8));
        assert_eq!(h.presale.calls("participant"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_still_reloads() {
        let (session, _wallet) = connected_session(account(1), 1).await;
        let h = harness(session);
        let sync = spawn(&h);
        tokio::time::sleep(Duration::from_secs(1)).await;

        let contract = h.ctx.contract().unwrap();
        let err = sync.after_write(contract.claim_rewards()).await.unwrap_err();
        assert_eq!(err, WalletError::Reverted(Some("Presale: no rewards".into())));
        assert_eq!(h.presale.calls("participant"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_write_leaves_page_state_alone() {
        let (session, _wallet) = connected_session(account(1), 1).await;
        let h = harness(session);
        h.presale.update(|s| {
            s.stage = PresaleStage::ClaimOpen;
            s.participants.insert(account(1), purchased(70));
        });
        let sync = spawn(&h);
        tokio::time::sleep(Duration::from_secs(1)).await;

        h.presale.set_write_error(Some(WalletError::UserRejected));
        let contract = h.ctx.contract().unwrap();
        let err = sync.after_write(contract.claim_tokens()).await.unwrap_err();
        assert_eq!(err, WalletError::UserRejected);

        let state = sync.state();
        assert_eq!(state.view(), ViewStatus::Ready);
        assert_eq!(state.error, None);
        assert_eq!(state.snapshot.unwrap().total_claimed, U256::ZERO);
        assert_eq!(h.presale.calls("participant"), 2);

        h.presale.set_write_error(None);
        sync.after_write(contract.claim_tokens()).await.unwrap();
        assert_eq!(sync.state().snapshot.unwrap().total_claimed, U256::from(70u8));
    }

    #[tokio::test(start_paused = true)]
    async fn account_switch_rebinds_and_reloads() {
        let (session, wallet) = connected_session(account(1), 1).await;
        let h = harness(session);
        h.presale.update(|s| {
            s.participants.insert(account(2), purchased(99));
        });
        let sync = spawn(&h);
        tokio::time::sleep(Duration::from_secs(1)).await;

        wallet.emit(crate::provider::ProviderEvent::AccountsChanged(vec![account(2)]));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(h.binder.binds(), 2);
        assert_eq!(sync.state().snapshot, Some(purchased(99)));
    }

    #[tokio::test(start_paused = true)]
    async fn network_switch_does_not_serve_other_chain_cache() {
        let (session, wallet) = connected_session(account(1), 1).await;
        let h = harness(session);
        h.presale.update(|s| {
            s.participants.insert(account(1), purchased(111));
        });
        let sync = spawn(&h);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sync.state().snapshot, Some(purchased(111)));

        h.presale.set_failing(Some(WalletError::Network("connection reset".into())));
        wallet.set_chain(56);
        wallet.emit(crate::provider::ProviderEvent::ChainChanged(56));
        tokio::time::sleep(Duration::from_secs(1)).await;

        let state = sync.state();
        assert_eq!(state.snapshot, None);
        assert_eq!(state.view(), ViewStatus::NoData);

        // Back on the first network the saved snapshot applies again.
        wallet.set_chain(1);
        wallet.emit(crate::provider::ProviderEvent::ChainChanged(1));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sync.state().snapshot, Some(purchased(111)));
        assert_eq!(sync.state().view(), ViewStatus::Stale);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_clears_page_and_stops_polling() {
        let (session, _wallet) = connected_session(account(1), 1).await;
        let h = harness(session.clone());
        let sync = spawn(&h);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sync.state().view(), ViewStatus::Ready);

        session.disconnect();
        settle().await;
        let calls = h.presale.call_log().len();
        tokio::time::sleep(Duration::from_secs(300)).await;

        let state = sync.state();
        assert_eq!(state.view(), ViewStatus::Disconnected);
        assert_eq!(state.snapshot, None);
        assert_eq!(h.presale.call_log().len(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_on_interval() {
        let (session, _wallet) = connected_session(account(1), 1).await;
        let h = harness(session);
        let _sync = spawn(&h);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(h.presale.calls("participant"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reads_time_out() {
        let (session, _wallet) = connected_session(account(1), 1).await;
        let h = harness(session);
        h.presale.set_read_delay(Duration::from_secs(60));
        let sync = spawn(&h);

        tokio::time::sleep(Duration::from_secs(21)).await;
        let state = sync.state();
        assert_eq!(state.error, Some(WalletError::Timeout));
        assert_eq!(state.view(), ViewStatus::NoData);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_contract_address_fails_the_page_only() {
        let (session, _wallet) = connected_session(account(1), 1).await;
        let config = AppConfig {
            contract_address: "0x1234".into(),
            ..AppConfig::default()
        };
        let binder = Arc::new(crate::contract::RpcBinder::new(
            config.contract_address(),
            config.event_poll(),
        ));
        let ctx = SyncContext::new(
            session.clone(),
            binder,
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock::new()),
            &config,
        );
        let sync = Synchronizer::spawn(ParticipantSource, ctx, SyncSettings::default());
        settle().await;

        let state = sync.state();
        assert_eq!(state.view(), ViewStatus::Failed);
        assert!(matches!(state.error, Some(WalletError::Config(_))));
        assert!(session.state().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn dismissing_error_keeps_data() {
        let (session, _wallet) = connected_session(account(1), 1).await;
        let h = harness(session);
        let sync = spawn(&h);
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.presale.set_failing(Some(WalletError::Timeout));
        sync.reload().await;
        assert_eq!(sync.state().view(), ViewStatus::Stale);

        sync.dismiss_error();
        settle().await;
        let state = sync.state();
        assert_eq!(state.error, None);
        assert_eq!(state.view(), ViewStatus::Stale);
    }
}
