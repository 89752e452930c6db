use dioxus::prelude::*;
use presale_core::session::{ConnectionStatus, SessionState};

use crate::components::short_address;
use crate::state::Services;

#[component]
pub fn ConnectionStatusIndicator() -> Element {
    let services = use_context::<Services>();
    let session = use_context::<Signal<SessionState>>();

    let state = session.read().clone();
    let (dot_class, label) = match state.status() {
        ConnectionStatus::Disconnected => ("dot disconnected", "Disconnected".to_string()),
        ConnectionStatus::Connecting => ("dot connecting", "Connecting".to_string()),
        ConnectionStatus::NoWallet => ("dot error", "No wallet".to_string()),
        ConnectionStatus::Connected => (
            "dot connected",
            state.address.as_ref().map(short_address).unwrap_or_default(),
        ),
    };

    let dismiss = {
        let session = services.session.clone();
        move |_| session.dismiss_error()
    };
    let disconnect = {
        let session = services.session.clone();
        move |_| session.disconnect()
    };

    rsx! {
        div { class: "conn-indicator",
            span { class: dot_class }
            span { class: "conn-label mono", "{label}" }
            if let Some(chain_id) = state.chain_id.filter(|_| state.connected) {
                span { class: "conn-chain", "chain {chain_id}" }
            }
            if state.connected {
                button { class: "conn-btn conn-btn-disconnect", onclick: disconnect, "Disconnect" }
            } else {
                ConnectButton {}
            }
        }
        if let Some(error) = state.last_error.as_ref() {
            div { class: "conn-error",
                span { class: "error-text", "{error}" }
                button { class: "btn btn-link", onclick: dismiss, "×" }
            }
        }
    }
}

#[component]
pub fn ConnectButton() -> Element {
    let services = use_context::<Services>();
    let session = use_context::<Signal<SessionState>>();
    let connecting = session.read().connecting;
    let wallet_missing = session.read().status() == ConnectionStatus::NoWallet;

    let connect = move |_| {
        let session = services.session.clone();
        spawn(async move {
            session.connect().await;
        });
    };

    rsx! {
        button {
            class: "conn-btn conn-btn-connect",
            disabled: connecting,
            onclick: connect,
            if connecting {
                span { class: "spinner" }
                "Connecting..."
            } else if wallet_missing {
                "Retry wallet"
            } else {
                "Connect Wallet"
            }
        }
    }
}
