//! Purchase form validation and submission.

use alloy_primitives::{Address, U256};
use tracing::info;

use crate::config::StakingOption;
use crate::contract::{PresaleContract, PresaleStage, TxReceipt};
use crate::error::Result;
use crate::pages::PurchaseSnapshot;
use crate::units::{parse_units, Amount};

/// Outcome of validating the amount field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AmountCheck {
    Empty,
    Invalid(String),
    BelowMinimum { minimum: Amount },
    ExceedsBalance { balance: Amount },
    Valid(U256),
}

impl AmountCheck {
    pub fn amount(&self) -> Option<U256> {
        match self {
            Self::Valid(amount) => Some(*amount),
            _ => None,
        }
    }

    /// Inline message for the form, if any.
    pub fn message(&self, symbol: &str) -> Option<String> {
        match self {
            Self::Empty | Self::Valid(_) => None,
            Self::Invalid(reason) => Some(reason.clone()),
            Self::BelowMinimum { minimum } => Some(format!("Below minimum of {minimum} {symbol}")),
            Self::ExceedsBalance { balance } => {
                Some(format!("Exceeds your balance of {balance} {symbol}"))
            }
        }
    }
}

/// Validate user input against the minimum purchase and the stablecoin balance. Amounts are
/// parsed with the payment token's decimals as read for this session.
pub fn check_amount(input: &str, minimum: Amount, snapshot: &PurchaseSnapshot) -> AmountCheck {
    if input.trim().is_empty() {
        return AmountCheck::Empty;
    }
    let amount = match parse_units(input, snapshot.payment_decimals()) {
        Ok(amount) => amount,
        Err(e) => return AmountCheck::Invalid(e.to_string()),
    };
    if amount.is_zero() {
        return AmountCheck::Invalid("amount must be greater than zero".into());
    }
    if amount < minimum.raw {
        return AmountCheck::BelowMinimum { minimum };
    }
    if amount > snapshot.balance.raw {
        return AmountCheck::ExceedsBalance {
            balance: snapshot.balance,
        };
    }
    AmountCheck::Valid(amount)
}

/// Whether the purchase button should be enabled at chain time `now`.
pub fn purchase_allowed(check: &AmountCheck, snapshot: &PurchaseSnapshot, now: u64) -> bool {
    matches!(check, AmountCheck::Valid(_))
        && snapshot.stage == PresaleStage::Active
        && !snapshot.paused
        && now < snapshot.end_time
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PurchaseReceipt {
    pub approval: Option<TxReceipt>,
    pub purchase: TxReceipt,
}

/// Approve the presale to spend `amount` if the current allowance is short, then
/// participate with the chosen lock.
pub async fn submit_purchase(
    contract: &dyn PresaleContract,
    owner: Address,
    amount: U256,
    option: &StakingOption,
) -> Result<PurchaseReceipt> {
    let allowance = contract.payment_allowance(owner).await?;
    let approval = if allowance < amount {
        info!(%owner, %amount, %allowance, "approving payment token");
        Some(contract.approve_payment(amount).await?)
    } else {
        None
    };
    let purchase = contract
        .participate(amount, option.lock_duration_secs())
        .await?;
    info!(%owner, %amount, tier = %option.name, tx = %purchase.tx_hash, "purchase confirmed");
    Ok(PurchaseReceipt { approval, purchase })
}
