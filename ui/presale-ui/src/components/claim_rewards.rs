use dioxus::prelude::*;
use presale_core::pages::{ClaimRewardsSource, Page};
use presale_core::session::SessionState;
use presale_core::units::format_bps;

use super::status::{ConnectPrompt, Stat, SyncBanner, SyncSummary, TxNotice, TxOutcome};
use crate::hooks::{use_chain_now, use_synchronizer};
use crate::state::Services;

#[component]
pub fn ClaimRewardsPage() -> Element {
    let services = use_context::<Services>();
    let session = use_context::<Signal<SessionState>>();
    let page = use_synchronizer(Page::ClaimRewards, || ClaimRewardsSource);
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
                    .after_write(async move { contract?.claim_rewards().await })
                    .await;
                outcome.set(Some(TxOutcome::of(result, "Rewards claimed", &config)));
                submitting.set(false);
            });
        }
    };

    rsx! {
        div { class: "page",
            h1 { "Claim Rewards" }
            SyncBanner {
                summary,
                now,
                on_retry: move |_| retry.refresh(),
                on_dismiss: move |_| dismiss.dismiss_error(),
            }
            if let Some(snapshot) = state.snapshot {
                div { class: "stat-grid",
                    Stat { label: "Staked", value: format!("{} {token}", snapshot.staked().display(places)) }
                    Stat { label: "Claimable now", value: format!("{} {token}", snapshot.claimable.display(places)) }
                    // Ticks between reads; the claimable figure above is the contract's.
                    Stat { label: "Accrued (estimate)", value: format!("{} {token}", snapshot.estimated_accrued(now).display(places)) }
                }
                div { class: "card",
                    if snapshot.paused {
                        p { class: "banner banner-warn", "Reward claims are paused." }
                    }
                    button {
                        class: "btn btn-primary",
                        disabled: !snapshot.can_claim() || *submitting.read(),
                        onclick: claim,
                        if *submitting.read() {
                            span { class: "spinner" }
                            "Claiming…"
                        } else {
                            "Claim rewards"
                        }
                    }
                    if let Some(notice) = outcome.read().clone() {
                        TxNotice { outcome: notice }
                    }
                }
                if snapshot.stakes.is_empty() {
                    p { class: "empty-desc", "Stake tokens from the purchase page to start earning." }
                } else {
                    div { class: "tier-grid",
                        for (i, stake) in snapshot.stakes.iter().enumerate() {
                            div { class: "tier-card", key: "{i}",
                                p { class: "tier-name", {format!("{} {token}", stake.amount.display(places))} }
                                p { class: "tier-apr", {format!("{} APR", format_bps(stake.participation.apr_bps))} }
                                p { class: "hint", {format!("Accrued {} {token}", stake.accrued(now).display(places))} }
                                if stake.is_unlocked(now) {
                                    p { class: "success-text", "Lock complete" }
                                } else if let Some(left) = stake.unlocks_in(now) {
                                    p { class: "tier-lock", "Unlocks in {left}" }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}
