#![allow(non_snake_case)]

mod components;
mod hooks;
mod state;

use dioxus::prelude::*;
use presale_core::storage::Theme;
use tracing_subscriber::EnvFilter;

use state::Services;

const STYLE: &str = include_str!("../assets/style.css");

#[derive(Routable, Clone, PartialEq)]
enum Route {
    #[route("/")]
    Home {},
    #[layout(Layout)]
    #[route("/dashboard")]
    Overview {},
    #[route("/buy")]
    Purchase {},
    #[route("/claim")]
    ClaimTokens {},
    #[route("/rewards")]
    ClaimRewards {},
    #[route("/transactions")]
    Transactions {},
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("presale=info")),
        )
        .init();

    dioxus::launch(App);
}

#[component]
fn App() -> Element {
    let services = use_context_provider(Services::from_env);
    let session = hooks::use_session_state(&services);
    use_context_provider(|| session);
    let theme = use_context_provider(|| Signal::new(Theme::load(services.store.as_ref())));
    let theme_class = theme.read().as_str();

    rsx! {
        document::Style { {STYLE} }
        div { class: "theme-{theme_class}",
            Router::<Route> {}
        }
    }
}

// ---------------------------------------------------------------------------
// Layout: sidebar, top bar, content
// ---------------------------------------------------------------------------

#[component]
fn Layout() -> Element {
    rsx! {
        div { class: "app-container",
            components::layout::Sidebar {}
            div { class: "main-panel",
                components::layout::TopBar {}
                div { class: "main-content",
                    Outlet::<Route> {}
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Route components
// ---------------------------------------------------------------------------

#[component]
fn Home() -> Element {
    rsx! { components::home::HomePage {} }
}

#[component]
fn Overview() -> Element {
    rsx! { components::overview::OverviewPage {} }
}

#[component]
fn Purchase() -> Element {
    rsx! { components::purchase::PurchasePage {} }
}

#[component]
fn ClaimTokens() -> Element {
    rsx! { components::claim_tokens::ClaimTokensPage {} }
}

#[component]
fn ClaimRewards() -> Element {
    rsx! { components::claim_rewards::ClaimRewardsPage {} }
}

#[component]
fn Transactions() -> Element {
    rsx! { components::transactions::TransactionsPage {} }
}
