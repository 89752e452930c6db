//! Bridges from the core's watch channels into Dioxus signals.

use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use dioxus::prelude::*;
use presale_core::pages::Page;
use presale_core::session::SessionState;
use presale_core::sync::{SnapshotSource, SyncState, Synchronizer};
use presale_core::Result;

use crate::state::Services;

/// Mirror the session into a signal and start the startup probe. The session is torn down
/// when the owning component unmounts.
pub fn use_session_state(services: &Services) -> Signal<SessionState> {
    let session = services.session.clone();
    let mut state = use_signal(|| session.state());

    let probe = session.clone();
    use_hook(move || {
        spawn(async move {
            probe.init().await;
        });
    });

    let watched = session.clone();
    use_future(move || {
        let mut rx = watched.subscribe();
        async move {
            loop {
                let next = rx.borrow_and_update().clone();
                state.set(next);
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
    });

    use_drop(move || session.teardown());
    state
}

/// A page's synchronizer plus a signal of its state.
pub struct PageSync<S: SnapshotSource> {
    pub state: Signal<SyncState<S::Snapshot>>,
    sync: Rc<Synchronizer<S>>,
}

impl<S: SnapshotSource> Clone for PageSync<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state,
            sync: Rc::clone(&self.sync),
        }
    }
}

impl<S: SnapshotSource> PageSync<S> {
    pub fn refresh(&self) {
        self.sync.refresh();
    }

    pub fn dismiss_error(&self) {
        self.sync.dismiss_error();
    }

    pub async fn after_write<T>(&self, write: impl Future<Output = Result<T>>) -> Result<T> {
        self.sync.after_write(write).await
    }
}

/// Spawn the synchronizer for `page` on mount and drop it (timers, subscription, worker)
/// on unmount.
pub fn use_synchronizer<S: SnapshotSource>(page: Page, source: impl FnOnce() -> S) -> PageSync<S> {
    let services = use_context::<Services>();
    let sync = use_hook(|| {
        Rc::new(Synchronizer::spawn(
            source(),
            services.sync.clone(),
            page.settings(&services.config),
        ))
    });
    let mut state = use_signal(|| sync.state());

    let watched = Rc::clone(&sync);
    use_future(move || {
        let mut rx = watched.subscribe();
        async move {
            while rx.changed().await.is_ok() {
                let next = rx.borrow_and_update().clone();
                state.set(next);
            }
        }
    });

    PageSync { state, sync }
}

/// Chain-adjusted time in seconds, ticking once a second for countdowns.
pub fn use_chain_now() -> Signal<u64> {
    let services = use_context::<Services>();
    let chain_clock = services.sync.chain_clock.clone();
    let mut now = use_signal(|| chain_clock.now_secs());
    use_future(move || {
        let chain_clock = chain_clock.clone();
        async move {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                now.set(chain_clock.now_secs());
            }
        }
    });
    now
}
