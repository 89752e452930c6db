use dioxus::prelude::*;
use presale_core::contract::PresaleStage;
use presale_core::pages::{ClaimTokensSource, Page};
use presale_core::session::SessionState;
use presale_core::units::format_bps;

use super::days;
use super::status::{ConnectPrompt, Stat, SyncBanner, SyncSummary, TxNotice, TxOutcome};
use crate::hooks::{use_chain_now, use_synchronizer};
use crate::state::Services;

#[component]
pub fn ClaimTokensPage() -> Element {
    let services = use_context::<Services>();
    let session = use_context::<Signal<SessionState>>();
    let page = use_synchronizer(Page::ClaimTokens, || ClaimTokensSource);
    let now = *use_chain_now().read();
    let mut submitting = use_signal(|| false);
    let mut outcome = use_signal(|| None::<TxOutcome>);

    if !session.read().connected {
        return rsx! { ConnectPrompt {} };
    }

    let state = page.state.read().clone();
    let summary = SyncSummary::of(&state);
    let places = services.config.display_decimals;
    let token = services.config.token_symbol.clone();
    let (retry, dismiss) = (page.clone(), page.clone());

    let claim = {
        let page = page.clone();
        let services = services.clone();
        move |_| {
            let page = page.clone();
            let contract = services.sync.contract();
            let config = services.config.clone();
            submitting.set(true);
            outcome.set(None);
            spawn(async move {
                let result = page
                    .after_write(async move { contract?.claim_tokens().await })
                    .await;
                outcome.set(Some(TxOutcome::of(result, "Tokens claimed", &config)));
                submitting.set(false);
            });
        }
    };

    rsx! {
        div { class: "page",
            h1 { "Claim Tokens" }
            SyncBanner {
                summary,
                now,
                on_retry: move |_| retry.refresh(),
                on_dismiss: move |_| dismiss.dismiss_error(),
            }
            if let Some(snapshot) = state.snapshot {
                div { class: "stat-grid",
                    Stat { label: "Purchased", value: format!("{} {token}", snapshot.purchased.display(places)) }
                    Stat { label: "Claimed", value: format!("{} {token}", snapshot.claimed.display(places)) }
                    Stat { label: "Claimable", value: format!("{} {token}", snapshot.claimable().display(places)) }
                }
                div { class: "card",
                    if snapshot.stage != PresaleStage::ClaimOpen {
                        p { class: "hint", {format!("Claiming opens once the presale is finalized ({}).", snapshot.stage.label())} }
                    }
                    button {
                        class: "btn btn-primary",
                        disabled: !snapshot.can_claim() || *submitting.read(),
                        onclick: claim,
                        if *submitting.read() {
                            span { class: "spinner" }
                            "Claiming…"
                        } else {
                            {format!("Claim {} {token}", snapshot.claimable().display(places))}
                        }
                    }
                    if let Some(notice) = outcome.read().clone() {
                        TxNotice { outcome: notice }
                    }
                }
                if snapshot.stakes.is_empty() {
                    p { class: "empty-desc", "You have no purchases yet." }
                } else {
                    table { class: "table",
                        thead {
                            tr {
                                th { "Amount" }
                                th { "APR" }
                                th { "Lock" }
                                th { "Unlocks" }
                            }
                        }
                        tbody {
                            for (i, stake) in snapshot.stakes.iter().enumerate() {
                                tr { key: "{i}",
                                    td { class: "mono", {format!("{} {token}", stake.amount.display(places))} }
                                    td { {format_bps(stake.participation.apr_bps)} }
                                    td { {format!("{} days", days(stake.participation.lock_duration))} }
                                    td {
                                        match stake.unlocks_in(now) {
                                            Some(left) => rsx! { "in {left}" },
                                            None => rsx! { span { class: "success-text", "Unlocked" } },
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}
