use dioxus::prelude::*;
use presale_core::pages::{Page, TransactionsSource};
use presale_core::session::SessionState;

use super::age;
use super::status::{ConnectPrompt, SyncBanner, SyncSummary};
use crate::hooks::{use_chain_now, use_synchronizer};
use crate::state::Services;

#[component]
pub fn TransactionsPage() -> Element {
    let services = use_context::<Services>();
    let session = use_context::<Signal<SessionState>>();
    let from_block = services.config.deployment_block;
    let page = use_synchronizer(Page::Transactions, move || TransactionsSource::new(from_block));
    let now = *use_chain_now().read();

    if !session.read().connected {
        return rsx! { ConnectPrompt {} };
    }

    let state = page.state.read().clone();
    let summary = SyncSummary::of(&state);
    let places = services.config.display_decimals;
    let token = services.config.token_symbol.clone();
    let config = services.config.clone();
    let (retry, dismiss) = (page.clone(), page.clone());

    rsx! {
        div { class: "page",
            h1 { "Transactions" }
            SyncBanner {
                summary,
                now,
                on_retry: move |_| retry.refresh(),
                on_dismiss: move |_| dismiss.dismiss_error(),
            }
            if let Some(snapshot) = state.snapshot {
                if snapshot.rows.is_empty() {
                    div { class: "empty-state",
                        p { class: "empty-title", "No transactions yet" }
                        p { class: "empty-desc", "Purchases and claims from this wallet will show up here." }
                    }
                } else {
                    table { class: "table",
                        thead {
                            tr {
                                th { "Type" }
                                th { "Amount" }
                                th { "When" }
                                th { "Transaction" }
                            }
                        }
                        tbody {
                            for row in snapshot.rows.iter() {
                                tr { key: "{row.tx_hash}-{row.block_number}",
                                    td { {row.kind.label()} }
                                    td { class: "mono", {format!("{} {token}", row.amount.display(places))} }
                                    td { title: "block {row.block_number}", {age(row.timestamp, now)} }
                                    td {
                                        a {
                                            class: "mono",
                                            href: config.explorer_tx_url(&row.tx_hash.to_string()),
                                            target: "_blank",
                                            {short_hash(&row.tx_hash.to_string())}
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

fn short_hash(hash: &str) -> String {
    match (hash.get(..10), hash.get(hash.len().saturating_sub(6)..)) {
        (Some(head), Some(tail)) if hash.len() > 16 => format!("{head}…{tail}"),
        _ => hash.to_string(),
    }
}
