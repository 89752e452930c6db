//! Shared loading / error / stale / empty presentation for synchronized pages.

use dioxus::prelude::*;
use presale_core::config::AppConfig;
use presale_core::contract::TxReceipt;
use presale_core::sync::{Freshness, SyncState, ViewStatus};
use presale_core::{Result, WalletError};

use crate::components::age;

/// Props-friendly summary of a page's sync state.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncSummary {
    pub view: ViewStatus,
    pub loading: bool,
    pub error: Option<String>,
    pub cached_at_ms: Option<u64>,
    pub retry_attempt: u32,
}

impl SyncSummary {
    pub fn of<T>(state: &SyncState<T>) -> Self {
        Self {
            view: state.view(),
            loading: state.loading,
            error: state.error.as_ref().map(ToString::to_string),
            cached_at_ms: match state.freshness {
                Freshness::Cached { saved_at_ms } => Some(saved_at_ms),
                _ => None,
            },
            retry_attempt: state.retry_attempt,
        }
    }
}

#[component]
pub fn SyncBanner(
    summary: SyncSummary,
    now: u64,
    on_retry: EventHandler<()>,
    on_dismiss: EventHandler<()>,
) -> Element {
    rsx! {
        match summary.view {
            ViewStatus::Loading => rsx! {
                div { class: "banner banner-info",
                    span { class: "spinner" }
                    span { "Loading on-chain data…" }
                }
            },
            ViewStatus::NoData => rsx! {
                div { class: "banner banner-empty",
                    p { "No data available right now." }
                    button { class: "btn btn-secondary", onclick: move |_| on_retry.call(()), "Retry now" }
                }
            },
            ViewStatus::Failed => rsx! {
                div { class: "banner banner-error",
                    p { "This page is unavailable." }
                }
            },
            ViewStatus::Stale => rsx! {
                div { class: "banner banner-warn",
                    if let Some(saved) = summary.cached_at_ms {
                        span { {format!("Showing saved data from {}.", age(saved / 1_000, now))} }
                    }
                    button { class: "btn btn-link", onclick: move |_| on_retry.call(()), "Refresh" }
                }
            },
            ViewStatus::Ready | ViewStatus::Disconnected => rsx! {},
        }
        if let Some(error) = summary.error.clone() {
            div { class: "banner banner-error",
                span { "{error}" }
                if summary.retry_attempt > 0 {
                    span { class: "hint", " (retry #{summary.retry_attempt} scheduled)" }
                }
                button { class: "btn btn-link", onclick: move |_| on_dismiss.call(()), "Dismiss" }
            }
        }
    }
}

/// Shown instead of page content when no wallet session is live.
#[component]
pub fn ConnectPrompt() -> Element {
    rsx! {
        div { class: "empty-state",
            p { class: "empty-title", "Connect your wallet" }
            p { class: "empty-desc", "Connect a wallet to see your presale position." }
            crate::components::connection_status::ConnectButton {}
        }
    }
}

/// A labelled figure.
#[component]
pub fn Stat(#[props(into)] label: String, #[props(into)] value: String) -> Element {
    rsx! {
        div { class: "stat",
            span { class: "stat-label", "{label}" }
            span { class: "stat-value", "{value}" }
        }
    }
}

/// Result of a submitted transaction, shown under the form that sent it.
#[derive(Clone, Debug, PartialEq)]
pub enum TxOutcome {
    Confirmed { message: String, link: String },
    Failed(String),
}

impl TxOutcome {
    pub fn confirmed(message: impl Into<String>, link: &str) -> Self {
        Self::Confirmed {
            message: message.into(),
            link: link.to_string(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn of(result: Result<TxReceipt>, success: &str, config: &AppConfig) -> Self {
        match result {
            Ok(receipt) => Self::confirmed(
                success,
                &config.explorer_tx_url(&receipt.tx_hash.to_string()),
            ),
            Err(WalletError::UserRejected) => Self::failed("Transaction cancelled in wallet"),
            Err(e) => Self::failed(e.to_string()),
        }
    }
}

#[component]
pub fn TxNotice(outcome: TxOutcome) -> Element {
    rsx! {
        match outcome {
            TxOutcome::Confirmed { message, link } => rsx! {
                p { class: "success-text",
                    "{message} "
                    a { href: "{link}", target: "_blank", "View on explorer" }
                }
            },
            TxOutcome::Failed(message) => rsx! {
                p { class: "error-text", "{message}" }
            },
        }
    }
}
