use dioxus::prelude::*;
use presale_core::storage::Theme;

use super::connection_status::ConnectionStatusIndicator;
use crate::state::Services;
use crate::Route;

#[component]
pub fn Sidebar() -> Element {
    let services = use_context::<Services>();
    let token = services.config.token_symbol.clone();

    rsx! {
        nav { class: "sidebar",
            Link { class: "sidebar-brand", to: Route::Home {},
                span { class: "brand-icon", "◈" }
                span { class: "brand-text", "{token} Presale" }
            }
            div { class: "sidebar-nav",
                NavSection { label: "Presale" }
                NavLink { to: Route::Overview {}, label: "Overview", icon: "⌂" }
                NavLink { to: Route::Purchase {}, label: "Buy & Stake", icon: "+" }
                NavSection { label: "Claims" }
                NavLink { to: Route::ClaimTokens {}, label: "Claim Tokens", icon: "↓" }
                NavLink { to: Route::ClaimRewards {}, label: "Claim Rewards", icon: "✦" }
                NavSection { label: "History" }
                NavLink { to: Route::Transactions {}, label: "Transactions", icon: "≡" }
            }
            div { class: "sidebar-footer",
                span { class: "sidebar-footer-text", "{services.config.token_name}" }
            }
        }
    }
}

#[component]
pub fn TopBar() -> Element {
    rsx! {
        header { class: "topbar",
            div { class: "topbar-left",
                ThemeToggle {}
            }
            div { class: "topbar-right",
                ConnectionStatusIndicator {}
            }
        }
    }
}

#[component]
pub fn ThemeToggle() -> Element {
    let services = use_context::<Services>();
    let mut theme = use_context::<Signal<Theme>>();
    let current = *theme.read();

    let toggle = move |_| {
        let next = theme.read().toggled();
        if let Err(e) = next.save(services.store.as_ref()) {
            tracing::warn!(error = %e, "could not save theme");
        }
        theme.set(next);
    };

    rsx! {
        button { class: "theme-toggle", onclick: toggle,
            if current == Theme::Dark { "☀ Light" } else { "☾ Dark" }
        }
    }
}

#[component]
fn NavSection(label: &'static str) -> Element {
    rsx! {
        div { class: "nav-section-label", "{label}" }
    }
}

#[component]
fn NavLink(to: Route, label: &'static str, icon: &'static str) -> Element {
    rsx! {
        Link { class: "nav-link", active_class: "nav-link-active", to: to,
            span { class: "nav-icon", "{icon}" }
            span { "{label}" }
        }
    }
}
