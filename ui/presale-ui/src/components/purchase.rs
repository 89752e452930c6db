use dioxus::prelude::*;
use presale_core::contract::PresaleStage;
use presale_core::pages::{Page, PurchaseSource};
use presale_core::purchase::{check_amount, purchase_allowed, submit_purchase};
use presale_core::session::SessionState;
use presale_core::units::format_bps;

use super::status::{ConnectPrompt, Stat, SyncBanner, SyncSummary, TxNotice, TxOutcome};
use crate::hooks::{use_chain_now, use_synchronizer};
use crate::state::Services;

#[component]
pub fn PurchasePage() -> Element {
    let services = use_context::<Services>();
    let session = use_context::<Signal<SessionState>>();
    let config = services.config.clone();
    let page = use_synchronizer(Page::Purchase, || PurchaseSource::new(&config));
    let now = *use_chain_now().read();

    let mut amount = use_signal(String::new);
    let mut tier = use_signal(|| 0usize);
    let mut submitting = use_signal(|| false);
    let mut outcome = use_signal(|| None::<TxOutcome>);

    if !session.read().connected {
        return rsx! { ConnectPrompt {} };
    }

    let state = page.state.read().clone();
    let summary = SyncSummary::of(&state);
    let places = services.config.display_decimals;
    let token = services.config.token_symbol.clone();
    let payment = services.config.payment_symbol.clone();
    let options = services.config.staking_options.clone();
    let (retry, dismiss) = (page.clone(), page.clone());

    let Some(snapshot) = state.snapshot else {
        return rsx! {
            div { class: "page",
                h1 { "Buy & Stake" }
                SyncBanner {
                    summary,
                    now,
                    on_retry: move |_| retry.refresh(),
                    on_dismiss: move |_| dismiss.dismiss_error(),
                }
            }
        };
    };

    let check = check_amount(&amount.read(), snapshot.min_purchase, &snapshot);
    let message = check.message(&payment);
    let allowed = purchase_allowed(&check, &snapshot, now) && !*submitting.read();
    let selected = options.get(*tier.read()).cloned();

    let submit = {
        let page = page.clone();
        let services = services.clone();
        let check = check.clone();
        let selected = selected.clone();
        move |_| {
            let (Some(value), Some(option)) = (check.amount(), selected.clone()) else {
                return;
            };
            let Some(owner) = session.read().address else {
                return;
            };
            let page = page.clone();
            let contract = services.sync.contract();
            let explorer = services.config.clone();
            submitting.set(true);
            outcome.set(None);
            spawn(async move {
                let result = page
                    .after_write(async move {
                        let contract = contract?;
                        submit_purchase(contract.as_ref(), owner, value, &option).await
                    })
                    .await;
                if result.is_ok() {
                    amount.set(String::new());
                }
                let receipt = result.map(|r| r.purchase);
                outcome.set(Some(TxOutcome::of(receipt, "Purchase confirmed", &explorer)));
                submitting.set(false);
            });
        }
    };

    let closed_reason = if snapshot.paused {
        Some("The presale is paused.")
    } else if snapshot.stage != PresaleStage::Active || now >= snapshot.end_time {
        Some("The presale is not accepting purchases.")
    } else {
        None
    };

    rsx! {
        div { class: "page",
            h1 { "Buy & Stake" }
            SyncBanner {
                summary,
                now,
                on_retry: move |_| retry.refresh(),
                on_dismiss: move |_| dismiss.dismiss_error(),
            }
            div { class: "stat-grid",
                Stat { label: "Your balance", value: format!("{} {payment}", snapshot.balance.display(2)) }
                Stat { label: "Minimum", value: format!("{} {payment}", snapshot.min_purchase) }
                Stat { label: "Remaining", value: format!("{} {token}", snapshot.remaining().display(places)) }
            }
            div { class: "card form",
                if let Some(reason) = closed_reason {
                    p { class: "banner banner-warn", "{reason}" }
                }
                label { class: "field-label", "Amount ({payment})" }
                input {
                    class: "input",
                    r#type: "text",
                    inputmode: "decimal",
                    placeholder: "0.00",
                    value: "{amount}",
                    oninput: move |e| amount.set(e.value()),
                }
                if let Some(message) = message {
                    p { class: "error-text", "{message}" }
                }
                label { class: "field-label", "Staking tier" }
                select {
                    class: "input",
                    onchange: move |e| tier.set(e.value().parse().unwrap_or(0)),
                    for (i, choice) in options.iter().enumerate() {
                        option {
                            key: "{i}",
                            value: "{i}",
                            selected: i == *tier.read(),
                            {format!("{}: {} APR, {} days", choice.name, format_bps(choice.apr_bps), choice.lock_days)}
                        }
                    }
                }
                if !snapshot.allowance.is_zero() {
                    p { class: "hint", {format!("Current allowance: {} {payment}", snapshot.allowance.display(2))} }
                }
                button {
                    class: "btn btn-primary",
                    disabled: !allowed,
                    onclick: submit,
                    if *submitting.read() {
                        span { class: "spinner" }
                        "Waiting for wallet…"
                    } else {
                        "Buy & Stake"
                    }
                }
                if let Some(notice) = outcome.read().clone() {
                    TxNotice { outcome: notice }
                }
            }
        }
    }
}
