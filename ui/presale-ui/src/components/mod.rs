pub mod claim_rewards;
pub mod claim_tokens;
pub mod connection_status;
pub mod home;
pub mod layout;
pub mod overview;
pub mod purchase;
pub mod status;
pub mod transactions;

use presale_core::chain_time::Countdown;
use presale_core::Address;

/// `0x1234…abcd`
pub fn short_address(address: &Address) -> String {
    let full = address.to_string();
    format!("{}…{}", &full[..6], &full[full.len() - 4..])
}

/// Coarse "time ago" for a block timestamp against chain time.
pub fn age(timestamp: u64, now: u64) -> String {
    match Countdown::until(timestamp, now) {
        None => "just now".to_string(),
        Some(c) if c.days > 0 => format!("{}d {}h ago", c.days, c.hours),
        Some(c) if c.hours > 0 => format!("{}h {}m ago", c.hours, c.minutes),
        Some(c) if c.minutes > 0 => format!("{}m ago", c.minutes),
        Some(c) => format!("{}s ago", c.seconds),
    }
}

/// Whole days, for lock durations.
pub fn days(secs: u64) -> u64 {
    secs / 86_400
}
