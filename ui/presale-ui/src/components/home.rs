use dioxus::prelude::*;
use presale_core::session::SessionState;
use presale_core::units::format_bps;

use super::connection_status::ConnectButton;
use crate::state::Services;
use crate::Route;

#[component]
pub fn HomePage() -> Element {
    let services = use_context::<Services>();
    let session = use_context::<Signal<SessionState>>();
    let connected = session.read().connected;
    let config = services.config.clone();

    rsx! {
        div { class: "landing",
            section { class: "hero",
                h1 { "{config.token_name}" }
                p { class: "subtitle",
                    "Buy {config.token_symbol} with {config.payment_symbol} and stake it from day one."
                }
                div { class: "hero-actions",
                    if connected {
                        Link { class: "btn btn-primary", to: Route::Overview {}, "Open dashboard" }
                    } else {
                        ConnectButton {}
                    }
                }
            }
            section { class: "tiers",
                h2 { "Staking tiers" }
                div { class: "tier-grid",
                    for option in config.staking_options.iter() {
                        div { class: "tier-card", key: "{option.name}",
                            p { class: "tier-name", "{option.name}" }
                            p { class: "tier-apr", {format!("{} APR", format_bps(option.apr_bps))} }
                            p { class: "tier-lock", "{option.lock_days} day lock" }
                        }
                    }
                }
            }
            if let Some(error) = services.config_error.as_ref() {
                p { class: "error-text", "{error}" }
            }
        }
    }
}
