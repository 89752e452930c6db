use dioxus::prelude::*;
use presale_core::contract::PresaleStage;
use presale_core::pages::{OverviewSnapshot, OverviewSource, Page};
use presale_core::session::SessionState;
use presale_core::units::format_bps;

use super::status::{ConnectPrompt, Stat, SyncBanner, SyncSummary};
use crate::hooks::{use_chain_now, use_synchronizer};
use crate::state::Services;

#[component]
pub fn OverviewPage() -> Element {
    let session = use_context::<Signal<SessionState>>();
    let page = use_synchronizer(Page::Overview, || OverviewSource);
    let now = *use_chain_now().read();

    if !session.read().connected {
        return rsx! { ConnectPrompt {} };
    }

    let state = page.state.read().clone();
    let summary = SyncSummary::of(&state);
    let (retry, dismiss) = (page.clone(), page.clone());

    rsx! {
        div { class: "page",
            h1 { "Overview" }
            SyncBanner {
                summary,
                now,
                on_retry: move |_| retry.refresh(),
                on_dismiss: move |_| dismiss.dismiss_error(),
            }
            if let Some(snapshot) = state.snapshot {
                OverviewBody { snapshot, now }
            }
        }
    }
}

#[component]
fn OverviewBody(snapshot: OverviewSnapshot, now: u64) -> Element {
    let services = use_context::<Services>();
    let places = services.config.display_decimals;
    let token = services.config.token_symbol.clone();
    let payment = services.config.payment_symbol.clone();
    let stage = snapshot.display_stage(now);
    let progress = snapshot.progress_bps();
    let width = progress as f64 / 100.0;
    let unclaimed = snapshot.purchased.saturating_sub(snapshot.claimed.raw);

    rsx! {
        div { class: "card",
            div { class: "card-row",
                span { class: "stage-pill stage-{stage:?}", {stage.label()} }
                if snapshot.paused {
                    span { class: "stage-pill stage-paused", "Paused" }
                }
                // Only a fresh read moves the on-chain stage.
                if stage != snapshot.stage {
                    span { class: "hint", "awaiting on-chain confirmation" }
                }
            }
            if let Some((label, countdown)) = snapshot.countdown(now) {
                p { class: "countdown", "{label} {countdown}" }
            }
            div { class: "progress",
                div { class: "progress-bar", style: "width: {width}%" }
            }
            p { class: "hint",
                {format!("{} / {} {token} sold ({})", snapshot.sold.display(places), snapshot.cap.display(places), format_bps(progress))}
            }
        }
        div { class: "stat-grid",
            Stat { label: "Raised", value: format!("{} {payment}", snapshot.raised.display(2)) }
            Stat { label: "Participants", value: snapshot.stats.participants.to_string() }
            Stat { label: "Your purchases", value: format!("{} {token}", snapshot.purchased.display(places)) }
            Stat { label: "Claimed", value: format!("{} {token}", snapshot.claimed.display(places)) }
            Stat { label: "Staked", value: format!("{} {token}", snapshot.staked.display(places)) }
            Stat { label: "Claimable rewards", value: format!("{} {token}", snapshot.claimable_rewards.display(places)) }
        }
        if stage == PresaleStage::ClaimOpen && !unclaimed.is_zero() {
            p { class: "success-text", "Your tokens are ready to claim." }
        }
    }
}
