//! The wallet session: one per application, shared by cloning the handle.
//!
//! State is published on a `watch` channel so every page sees the same connection status.
//! The session alone creates [`Signer`]s; a signer is replaced whenever the account or the
//! network changes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use alloy_primitives::Address;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, WalletError};
use crate::provider::{
    parse_accounts, parse_quantity, Eip1193Provider, ProviderEvent, Signer, WalletDetector,
};
use crate::storage::{self, KeyValueStore};

pub const PROBE_ATTEMPTS: u32 = 3;
pub const PROBE_DELAY: Duration = Duration::from_secs(1);

/// Coarse connection status for display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    NoWallet,
    Disconnected,
    Connecting,
    Connected,
}

/// Everything consumers may know about the session. `connected` implies `address` and
/// `signer` are set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionState {
    pub connected: bool,
    pub connecting: bool,
    pub wallet_available: bool,
    pub address: Option<Address>,
    pub chain_id: Option<u64>,
    pub signer: Option<Signer>,
    pub last_error: Option<WalletError>,
}

impl SessionState {
    pub fn status(&self) -> ConnectionStatus {
        if self.connected {
            ConnectionStatus::Connected
        } else if self.connecting {
            ConnectionStatus::Connecting
        } else if self.last_error == Some(WalletError::WalletNotFound) {
            ConnectionStatus::NoWallet
        } else {
            ConnectionStatus::Disconnected
        }
    }

    pub fn is_ready(&self) -> bool {
        self.connected && self.signer.is_some()
    }

    /// Connected signer, if the session is usable for contract calls.
    pub fn ready_signer(&self) -> Option<&Signer> {
        self.signer.as_ref().filter(|_| self.connected)
    }

    fn reset(&mut self) {
        *self = Self {
            wallet_available: self.wallet_available,
            connecting: self.connecting,
            ..Self::default()
        };
    }
}

#[derive(Clone)]
pub struct WalletSession {
    inner: Arc<Inner>,
}

struct Inner {
    detector: Arc<dyn WalletDetector>,
    store: Arc<dyn KeyValueStore>,
    state: watch::Sender<SessionState>,
    provider: Mutex<Option<Arc<dyn Eip1193Provider>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    connecting: AtomicBool,
    /// Bumped by `disconnect` and `teardown`; an authorization that started under an older
    /// epoch is discarded when it completes.
    epoch: AtomicU64,
    probe_attempts: u32,
    probe_delay: Duration,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}

/// Clears the in-flight flag on every exit path out of `connect`.
struct ConnectingGuard<'a>(&'a Inner);

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.connecting.store(false, Ordering::SeqCst);
        self.0.state.send_modify(|s| s.connecting = false);
    }
}

impl WalletSession {
    pub fn new(detector: Arc<dyn WalletDetector>, store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_probe_schedule(detector, store, PROBE_ATTEMPTS, PROBE_DELAY)
    }

    pub fn with_probe_schedule(
        detector: Arc<dyn WalletDetector>,
        store: Arc<dyn KeyValueStore>,
        attempts: u32,
        delay: Duration,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            inner: Arc::new(Inner {
                detector,
                store,
                state,
                provider: Mutex::new(None),
                listener: Mutex::new(None),
                connecting: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                probe_attempts: attempts.max(1),
                probe_delay: delay,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn signer(&self) -> Option<Signer> {
        self.inner.state.borrow().ready_signer().cloned()
    }

    /// Startup: find the wallet and silently restore an existing authorization.
    pub async fn init(&self) -> bool {
        self.probe().await
    }

    /// Look for the wallet (retrying while it may still be injecting) and adopt an already
    /// authorized account, unless the user explicitly disconnected last time.
    pub async fn probe(&self) -> bool {
        let epoch = self.epoch();
        let Some(provider) = self.find_provider().await else {
            warn!(attempts = self.inner.probe_attempts, "wallet not found");
            self.inner.state.send_modify(|s| {
                s.reset();
                s.wallet_available = false;
                s.last_error = Some(WalletError::WalletNotFound);
            });
            return false;
        };
        self.attach(&provider);
        self.inner.state.send_modify(|s| {
            s.wallet_available = true;
            if s.last_error == Some(WalletError::WalletNotFound) {
                s.last_error = None;
            }
        });

        if storage::user_disconnected(self.inner.store.as_ref()) {
            debug!("user disconnected earlier; not restoring session");
            self.inner.state.send_modify(SessionState::reset);
            return false;
        }

        let authorized = authorize(provider.as_ref(), "eth_accounts").await;
        if self.superseded(epoch) {
            debug!("session ended while restoring; discarding authorization");
            return false;
        }
        match authorized {
            Ok(Some(_)) if storage::user_disconnected(self.inner.store.as_ref()) => false,
            Ok(Some((address, chain_id))) => {
                info!(%address, chain_id, "restored wallet session");
                self.adopt(address, chain_id, provider);
                true
            }
            Ok(None) => {
                self.inner.state.send_modify(SessionState::reset);
                false
            }
            Err(e) => {
                warn!(error = %e, "authorization probe failed");
                self.inner.state.send_modify(|s| {
                    s.reset();
                    s.last_error = Some(e);
                });
                false
            }
        }
    }

    /// Ask the wallet for access. Returns `false` without doing anything if a connection
    /// attempt is already in flight.
    pub async fn connect(&self) -> bool {
        if self.inner.connecting.swap(true, Ordering::SeqCst) {
            debug!("connect already in flight");
            return false;
        }
        let _guard = ConnectingGuard(&self.inner);
        let epoch = self.epoch();
        self.inner.state.send_modify(|s| {
            s.connecting = true;
            s.last_error = None;
        });

        let Some(provider) = self.find_provider().await else {
            self.inner.state.send_modify(|s| {
                s.wallet_available = false;
                s.last_error = Some(WalletError::WalletNotFound);
            });
            return false;
        };
        self.attach(&provider);
        self.inner.state.send_modify(|s| s.wallet_available = true);

        let authorized = authorize(provider.as_ref(), "eth_requestAccounts").await;
        if self.superseded(epoch) {
            info!("wallet disconnected while connecting; discarding approval");
            return false;
        }
        match authorized {
            Ok(Some((address, chain_id))) => {
                if let Err(e) = storage::set_user_disconnected(self.inner.store.as_ref(), false) {
                    warn!(error = %e, "could not clear disconnect flag");
                }
                info!(%address, chain_id, "wallet connected");
                self.adopt(address, chain_id, provider);
                true
            }
            Ok(None) => {
                self.inner
                    .state
                    .send_modify(|s| s.last_error = Some(WalletError::UserRejected));
                false
            }
            Err(e) => {
                warn!(error = %e, "wallet connection failed");
                self.inner.state.send_modify(|s| s.last_error = Some(e));
                false
            }
        }
    }

    /// Forget the session and remember that the user asked for it.
    pub fn disconnect(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.state.send_modify(SessionState::reset);
        if let Err(e) = storage::set_user_disconnected(self.inner.store.as_ref(), true) {
            warn!(error = %e, "could not persist disconnect flag");
            self.inner.state.send_modify(|s| s.last_error = Some(e));
        }
        info!("wallet disconnected by user");
    }

    pub fn dismiss_error(&self) {
        self.inner.state.send_modify(|s| s.last_error = None);
    }

    /// Deregister provider listeners and drop back to the initial state.
    pub fn teardown(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(listener) = self.inner.listener.lock().take() {
            listener.abort();
        }
        self.inner.provider.lock().take();
        self.inner.state.send_replace(SessionState::default());
    }

    fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    fn superseded(&self, epoch: u64) -> bool {
        self.epoch() != epoch
    }

    async fn find_provider(&self) -> Option<Arc<dyn Eip1193Provider>> {
        if let Some(provider) = self.inner.provider.lock().clone() {
            return Some(provider);
        }
        for attempt in 1..=self.inner.probe_attempts {
            if let Some(provider) = self.inner.detector.detect().await {
                return Some(provider);
            }
            debug!(attempt, "wallet not injected yet");
            if attempt < self.inner.probe_attempts {
                tokio::time::sleep(self.inner.probe_delay).await;
            }
        }
        None
    }

    /// Keep `provider` and listen to its events, once.
    fn attach(&self, provider: &Arc<dyn Eip1193Provider>) {
        {
            let mut current = self.inner.provider.lock();
            if current.as_ref().is_some_and(|p| Arc::ptr_eq(p, provider)) {
                return;
            }
            *current = Some(Arc::clone(provider));
        }
        let task = tokio::spawn(listen(Arc::downgrade(&self.inner), provider.events()));
        if let Some(previous) = self.inner.listener.lock().replace(task) {
            previous.abort();
        }
    }

    fn adopt(&self, address: Address, chain_id: u64, provider: Arc<dyn Eip1193Provider>) {
        let signer = Signer::new(address, chain_id, provider);
        self.inner.state.send_modify(|s| {
            s.connected = true;
            s.wallet_available = true;
            s.address = Some(address);
            s.chain_id = Some(chain_id);
            s.signer = Some(signer);
            s.last_error = None;
        });
    }

    async fn on_accounts_changed(&self, accounts: Vec<Address>) {
        let Some(&address) = accounts.first() else {
            if self.state().connected {
                info!("wallet reports no accounts; disconnecting");
            }
            self.inner.state.send_modify(SessionState::reset);
            return;
        };
        let state = self.state();
        if !state.connected && storage::user_disconnected(self.inner.store.as_ref()) {
            debug!(%address, "ignoring account change while disconnected by user");
            return;
        }
        let Some(provider) = self.inner.provider.lock().clone() else {
            return;
        };
        let epoch = self.epoch();
        let chain_id = match provider.request("eth_chainId", json!([])).await {
            Ok(value) => parse_quantity(&value).ok().or(state.chain_id),
            Err(_) => state.chain_id,
        };
        if self.superseded(epoch) {
            return;
        }
        let Some(chain_id) = chain_id else {
            warn!(%address, "account changed but chain id is unknown");
            return;
        };
        info!(%address, "active account changed");
        self.adopt(address, chain_id, provider);
    }

    async fn on_chain_changed(&self, chain_id: u64) {
        info!(chain_id, "network changed; re-authorizing");
        self.probe().await;
    }
}

async fn authorize(provider: &dyn Eip1193Provider, method: &str) -> Result<Option<(Address, u64)>> {
    let accounts = parse_accounts(&provider.request(method, json!([])).await?)?;
    let Some(&address) = accounts.first() else {
        return Ok(None);
    };
    let chain_id = parse_quantity(&provider.request("eth_chainId", json!([])).await?)?;
    Ok(Some((address, chain_id)))
}

async fn listen(session: Weak<Inner>, mut events: broadcast::Receiver<ProviderEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "missed wallet events");
                continue;
            }
            Err(RecvError::Closed) => return,
        };
        let Some(inner) = session.upgrade() else {
            return;
        };
        let session = WalletSession { inner };
        match event {
            ProviderEvent::AccountsChanged(accounts) => session.on_accounts_changed(accounts).await,
            ProviderEvent::ChainChanged(chain_id) => session.on_chain_changed(chain_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::storage::{MemoryStore, DISCONNECTED_KEY};
    use crate::testing::{account, settle, MockDetector, MockWallet};

    fn session_with(wallet: &Arc<MockWallet>, store: &Arc<MemoryStore>) -> WalletSession {
        WalletSession::new(Arc::new(MockDetector::present(wallet.clone())), store.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn restores_existing_authorization() {
        let wallet = MockWallet::authorized(vec![account(1)], 1);
        let store = Arc::new(MemoryStore::new());
        let session = session_with(&wallet, &store);

        assert!(session.init().await);
        let state = session.state();
        assert!(state.is_ready());
        assert_eq!(state.address, Some(account(1)));
        assert_eq!(state.chain_id, Some(1));
        assert_eq!(state.status(), ConnectionStatus::Connected);
        assert_eq!(wallet.calls("eth_requestAccounts"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_connects_issue_one_request() {
        let wallet = MockWallet::authorized(vec![account(1)], 1);
        wallet.set_approval_delay(Duration::from_secs(2));
        let session = session_with(&wallet, &Arc::new(MemoryStore::new()));

        let (a, b, c) = tokio::join!(session.connect(), session.connect(), session.connect());

        assert_eq!((a, b, c), (true, false, false));
        assert_eq!(wallet.calls("eth_requestAccounts"), 1);
        assert!(!session.state().connecting);
        assert!(session.state().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_pending_approval_wins() {
        let wallet = MockWallet::authorized(vec![account(1)], 1);
        wallet.set_approval_delay(Duration::from_secs(2));
        let store = Arc::new(MemoryStore::new());
        let session = session_with(&wallet, &store);

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.connect().await }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        session.disconnect();

        assert!(!pending.await.unwrap());
        let state = session.state();
        assert!(!state.connected);
        assert!(!state.connecting);
        assert_eq!(state.signer, None);
        assert_eq!(store.get(DISCONNECTED_KEY).as_deref(), Some("true"));

        // A reload still honours the disconnect.
        let reloaded = session_with(&wallet, &store);
        wallet.set_approval_delay(Duration::ZERO);
        assert!(!reloaded.init().await);
        assert!(!reloaded.state().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_startup_check_wins() {
        let wallet = MockWallet::authorized(vec![account(1)], 1);
        wallet.set_approval_delay(Duration::from_secs(2));
        let store = Arc::new(MemoryStore::new());
        let session = session_with(&wallet, &store);

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.init().await }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        session.disconnect();

        assert!(!pending.await.unwrap());
        assert!(!session.state().connected);
        assert_eq!(store.get(DISCONNECTED_KEY).as_deref(), Some("true"));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_available_again_after_completion() {
        let wallet = MockWallet::authorized(vec![account(1)], 1);
        wallet.set_reject(true);
        let session = session_with(&wallet, &Arc::new(MemoryStore::new()));

        assert!(!session.connect().await);
        assert_eq!(session.state().last_error, Some(WalletError::UserRejected));
        assert!(!session.state().connecting);

        wallet.set_reject(false);
        assert!(session.connect().await);
        assert_eq!(wallet.calls("eth_requestAccounts"), 2);
        assert_eq!(session.state().last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_sticky_across_reloads() {
        let wallet = MockWallet::authorized(vec![account(1)], 1);
        let store = Arc::new(MemoryStore::new());

        let first = session_with(&wallet, &store);
        assert!(first.connect().await);
        first.disconnect();
        assert!(!first.state().connected);
        assert_eq!(first.state().signer, None);
        assert_eq!(store.get(DISCONNECTED_KEY).as_deref(), Some("true"));
        first.teardown();

        // Fresh page load: the wallet still reports the account.
        let reloaded = session_with(&wallet, &store);
        assert!(!reloaded.init().await);
        assert!(!reloaded.state().connected);
        assert!(reloaded.state().wallet_available);

        assert!(reloaded.connect().await);
        assert!(reloaded.state().connected);
        assert_eq!(store.get(DISCONNECTED_KEY), None);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_wallet_is_reported_after_three_attempts() {
        let detector = Arc::new(MockDetector::absent());
        let session = WalletSession::new(detector.clone(), Arc::new(MemoryStore::new()));

        let started = tokio::time::Instant::now();
        assert!(!session.init().await);

        assert_eq!(detector.attempts(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        let state = session.state();
        assert_eq!(state.status(), ConnectionStatus::NoWallet);
        assert!(!state.wallet_available);
        assert_eq!(state.last_error, Some(WalletError::WalletNotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn late_injected_wallet_is_found_on_retry() {
        let wallet = MockWallet::authorized(vec![account(2)], 1);
        let detector = Arc::new(MockDetector::present_from(wallet.clone(), 2));
        let session = WalletSession::new(detector.clone(), Arc::new(MemoryStore::new()));

        assert!(session.init().await);
        assert_eq!(detector.attempts(), 2);
        assert_eq!(session.state().address, Some(account(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_accounts_event_disconnects() {
        let wallet = MockWallet::authorized(vec![account(1)], 1);
        let store = Arc::new(MemoryStore::new());
        let session = session_with(&wallet, &store);
        assert!(session.init().await);

        wallet.emit(ProviderEvent::AccountsChanged(vec![]));
        settle().await;

        let state = session.state();
        assert!(!state.connected);
        assert_eq!(state.address, None);
        assert_eq!(state.signer, None);
        // Wallet-initiated: no sticky flag.
        assert_eq!(store.get(DISCONNECTED_KEY), None);
    }

    #[tokio::test(start_paused = true)]
    async fn account_switch_replaces_signer() {
        let wallet = MockWallet::authorized(vec![account(1)], 1);
        let session = session_with(&wallet, &Arc::new(MemoryStore::new()));
        assert!(session.init().await);
        let before = session.signer().unwrap();

        wallet.emit(ProviderEvent::AccountsChanged(vec![account(7), account(1)]));
        settle().await;

        let after = session.signer().unwrap();
        assert_eq!(after.address(), account(7));
        assert_ne!(before, after);
    }

    #[tokio::test(start_paused = true)]
    async fn chain_switch_rebuilds_signer_for_new_network() {
        let wallet = MockWallet::authorized(vec![account(1)], 1);
        let session = session_with(&wallet, &Arc::new(MemoryStore::new()));
        assert!(session.init().await);

        wallet.set_chain(56);
        wallet.emit(ProviderEvent::ChainChanged(56));
        settle().await;

        let state = session.state();
        assert_eq!(state.chain_id, Some(56));
        assert_eq!(state.signer.map(|s| s.chain_id()), Some(56));
    }

    #[tokio::test(start_paused = true)]
    async fn account_events_ignored_after_user_disconnect() {
        let wallet = MockWallet::authorized(vec![account(1)], 1);
        let session = session_with(&wallet, &Arc::new(MemoryStore::new()));
        assert!(session.connect().await);
        session.disconnect();

        wallet.emit(ProviderEvent::AccountsChanged(vec![account(3)]));
        settle().await;
        assert!(!session.state().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_deregisters_listeners() {
        let wallet = MockWallet::authorized(vec![account(1)], 1);
        let session = session_with(&wallet, &Arc::new(MemoryStore::new()));
        assert!(session.init().await);
        assert_eq!(wallet.listener_count(), 1);

        // A second probe reuses the provider rather than stacking listeners.
        session.probe().await;
        assert_eq!(wallet.listener_count(), 1);

        session.teardown();
        settle().await;
        assert_eq!(wallet.listener_count(), 0);
        assert_eq!(session.state(), SessionState::default());
    }
}
