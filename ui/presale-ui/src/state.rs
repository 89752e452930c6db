//! Application-scoped services, provided to every component through context.

use std::sync::Arc;

use presale_core::clock::{Clock, SystemClock};
use presale_core::config::AppConfig;
use presale_core::contract::RpcBinder;
use presale_core::provider::HttpWalletDetector;
use presale_core::session::WalletSession;
use presale_core::storage::{FileStore, KeyValueStore};
use presale_core::sync::SyncContext;
use presale_core::WalletError;
use tracing::{error, info};

/// Everything the pages share. Cloning is cheap; all fields are handles.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<AppConfig>,
    /// Set when the environment or config file could not be read; defaults are in use.
    pub config_error: Option<WalletError>,
    pub store: Arc<dyn KeyValueStore>,
    pub session: WalletSession,
    pub sync: SyncContext,
}

impl Services {
    pub fn from_env() -> Self {
        let (config, config_error) = match AppConfig::from_env() {
            Ok(config) => (config, None),
            Err(e) => {
                error!(error = %e, "could not load configuration; using defaults");
                (AppConfig::default(), Some(e))
            }
        };
        info!(wallet = %config.wallet_rpc_url, contract = %config.contract_address, "starting presale dashboard");

        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&config.state_file));
        let session = WalletSession::new(
            Arc::new(HttpWalletDetector::new(
                config.wallet_rpc_url.clone(),
                config.request_timeout(),
            )),
            Arc::clone(&store),
        );
        let binder = Arc::new(RpcBinder::new(config.contract_address(), config.event_poll()));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let sync = SyncContext::new(session.clone(), binder, Arc::clone(&store), clock, &config);
        sync.cache.prune();

        Self {
            config: Arc::new(config),
            config_error,
            store,
            session,
            sync,
        }
    }
}
