//! Snapshot sources for the dashboard pages.
//!
//! Each load reads the decimals of the tokens it formats in the same concurrent batch as
//! the amounts themselves, so every [`Amount`] carries the decimals its contract reported.

use std::collections::BTreeSet;
use std::time::Duration;

use alloy_primitives::{B256, U256};
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

use crate::chain_time::Countdown;
use crate::config::AppConfig;
use crate::contract::{Participation, PresaleEventKind, PresaleStage, PresaleStats};
use crate::error::Result;
use crate::sync::{LoadContext, SnapshotSource, SyncSettings};
use crate::units::{ratio_bps, Amount};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Page {
    Overview,
    Purchase,
    ClaimTokens,
    ClaimRewards,
    Transactions,
}

impl Page {
    pub fn key(self) -> &'static str {
        match self {
            Self::Overview => "overview",
            Self::Purchase => "purchase",
            Self::ClaimTokens => "claim-tokens",
            Self::ClaimRewards => "claim-rewards",
            Self::Transactions => "transactions",
        }
    }

    /// Live sale figures poll faster than per-account history.
    pub fn poll_interval(self, config: &AppConfig) -> Duration {
        match self {
            Self::Overview | Self::Purchase => Duration::from_secs(config.poll_interval_secs),
            Self::ClaimTokens | Self::ClaimRewards | Self::Transactions => {
                Duration::from_secs(config.slow_poll_interval_secs)
            }
        }
    }

    pub fn settings(self, config: &AppConfig) -> SyncSettings {
        SyncSettings::new(config, self.poll_interval(config))
    }
}

/// One participation with its amount in sale-token units.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stake {
    pub participation: Participation,
    pub amount: Amount,
}

impl Stake {
    fn new(participation: Participation, token_decimals: u8) -> Self {
        Self {
            amount: Amount::new(participation.amount, token_decimals),
            participation,
        }
    }

    pub fn is_unlocked(&self, now: u64) -> bool {
        self.participation.is_unlocked(now)
    }

    pub fn unlocks_in(&self, now: u64) -> Option<Countdown> {
        Countdown::until(now, self.participation.end_time)
    }

    pub fn accrued(&self, now: u64) -> Amount {
        Amount::new(self.participation.accrued_estimate(now), self.amount.decimals)
    }
}

fn total(stakes: &[Stake], decimals: u8) -> Amount {
    let raw = stakes
        .iter()
        .fold(U256::ZERO, |sum, s| sum.saturating_add(s.amount.raw));
    Amount::new(raw, decimals)
}

// ---------------------------------------------------------------------------
// Overview
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverviewSnapshot {
    pub stage: PresaleStage,
    pub paused: bool,
    pub stats: PresaleStats,
    pub sold: Amount,
    pub cap: Amount,
    pub raised: Amount,
    pub purchased: Amount,
    pub claimed: Amount,
    pub staked: Amount,
    pub claimable_rewards: Amount,
    pub chain_now: u64,
}

impl OverviewSnapshot {
    pub fn progress_bps(&self) -> u64 {
        ratio_bps(self.sold.raw, self.cap.raw)
    }

    /// Stage to show at chain time `now`. Advances locally as soon as a boundary passes,
    /// before a fresh read confirms the transition on-chain.
    pub fn display_stage(&self, now: u64) -> PresaleStage {
        match self.stage {
            PresaleStage::NotStarted if now >= self.stats.start_time => PresaleStage::Active,
            PresaleStage::Active if now >= self.stats.end_time => PresaleStage::Ended,
            stage => stage,
        }
    }

    /// Label and time left until the next boundary of the displayed stage.
    pub fn countdown(&self, now: u64) -> Option<(&'static str, Countdown)> {
        match self.display_stage(now) {
            PresaleStage::NotStarted => {
                Countdown::until(now, self.stats.start_time).map(|c| ("Starts in", c))
            }
            PresaleStage::Active => Countdown::until(now, self.stats.end_time).map(|c| ("Ends in", c)),
            PresaleStage::Ended | PresaleStage::ClaimOpen => None,
        }
    }
}

pub struct OverviewSource;

#[async_trait]
impl SnapshotSource for OverviewSource {
    type Snapshot = OverviewSnapshot;

    fn page(&self) -> &'static str {
        Page::Overview.key()
    }

    async fn load(&self, ctx: &LoadContext) -> Result<OverviewSnapshot> {
        let c = ctx.contract.as_ref();
        let (stage, paused, stats, info, participations, rewards, token, payment, chain_now) = tokio::try_join!(
            c.stage(),
            c.paused(),
            c.stats(),
            c.participant(ctx.account),
            c.participations(ctx.account),
            c.claimable_rewards(ctx.account),
            c.token_decimals(),
            c.payment_decimals(),
            ctx.chain_now(),
        )?;
        let stakes: Vec<Stake> = participations
            .into_iter()
            .map(|p| Stake::new(p, token))
            .collect();
        Ok(OverviewSnapshot {
            stage,
            paused,
            stats,
            sold: Amount::new(stats.sold, token),
            cap: Amount::new(stats.cap, token),
            raised: Amount::new(stats.raised, payment),
            purchased: Amount::new(info.total_purchased, token),
            claimed: Amount::new(info.total_claimed, token),
            staked: total(&stakes, token),
            claimable_rewards: Amount::new(rewards, token),
            chain_now,
        })
    }
}

// ---------------------------------------------------------------------------
// Purchase
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseSnapshot {
    pub stage: PresaleStage,
    pub paused: bool,
    pub balance: Amount,
    pub allowance: Amount,
    pub min_purchase: Amount,
    pub sold: Amount,
    pub cap: Amount,
    pub token_decimals: u8,
    pub end_time: u64,
    pub chain_now: u64,
}

impl PurchaseSnapshot {
    pub fn payment_decimals(&self) -> u8 {
        self.balance.decimals
    }

    /// Tokens still available under the cap.
    pub fn remaining(&self) -> Amount {
        self.cap.saturating_sub(self.sold.raw)
    }
}

pub struct PurchaseSource {
    config: AppConfig,
}

impl PurchaseSource {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

#[async_trait]
impl SnapshotSource for PurchaseSource {
    type Snapshot = PurchaseSnapshot;

    fn page(&self) -> &'static str {
        Page::Purchase.key()
    }

    fn event_kinds(&self) -> &'static [PresaleEventKind] {
        &[PresaleEventKind::Purchase]
    }

    async fn load(&self, ctx: &LoadContext) -> Result<PurchaseSnapshot> {
        let c = ctx.contract.as_ref();
        let (stage, paused, stats, balance, allowance, token, payment, chain_now) = tokio::try_join!(
            c.stage(),
            c.paused(),
            c.stats(),
            c.payment_balance(ctx.account),
            c.payment_allowance(ctx.account),
            c.token_decimals(),
            c.payment_decimals(),
            ctx.chain_now(),
        )?;
        Ok(PurchaseSnapshot {
            stage,
            paused,
            balance: Amount::new(balance, payment),
            allowance: Amount::new(allowance, payment),
            min_purchase: Amount::new(self.config.min_purchase_raw(payment)?, payment),
            sold: Amount::new(stats.sold, token),
            cap: Amount::new(stats.cap, token),
            token_decimals: token,
            end_time: stats.end_time,
            chain_now,
        })
    }
}

// ---------------------------------------------------------------------------
// Claim tokens
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimTokensSnapshot {
    pub stage: PresaleStage,
    pub purchased: Amount,
    pub claimed: Amount,
    pub stakes: Vec<Stake>,
    pub chain_now: u64,
}

impl ClaimTokensSnapshot {
    pub fn claimable(&self) -> Amount {
        self.purchased.saturating_sub(self.claimed.raw)
    }

    pub fn can_claim(&self) -> bool {
        self.stage == PresaleStage::ClaimOpen && !self.claimable().is_zero()
    }
}

pub struct ClaimTokensSource;

#[async_trait]
impl SnapshotSource for ClaimTokensSource {
    type Snapshot = ClaimTokensSnapshot;

    fn page(&self) -> &'static str {
        Page::ClaimTokens.key()
    }

    fn event_kinds(&self) -> &'static [PresaleEventKind] {
        &[PresaleEventKind::Purchase, PresaleEventKind::TokensClaimed]
    }

    async fn load(&self, ctx: &LoadContext) -> Result<ClaimTokensSnapshot> {
        let c = ctx.contract.as_ref();
        let (stage, info, participations, token, chain_now) = tokio::try_join!(
            c.stage(),
            c.participant(ctx.account),
            c.participations(ctx.account),
            c.token_decimals(),
            ctx.chain_now(),
        )?;
        Ok(ClaimTokensSnapshot {
            stage,
            purchased: Amount::new(info.total_purchased, token),
            claimed: Amount::new(info.total_claimed, token),
            stakes: participations
                .into_iter()
                .map(|p| Stake::new(p, token))
                .collect(),
            chain_now,
        })
    }
}

// ---------------------------------------------------------------------------
// Claim rewards
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRewardsSnapshot {
    pub paused: bool,
    pub claimable: Amount,
    pub stakes: Vec<Stake>,
    pub chain_now: u64,
}

impl ClaimRewardsSnapshot {
    pub fn staked(&self) -> Amount {
        total(&self.stakes, self.claimable.decimals)
    }

    /// Client-side estimate of everything accrued so far, for display between reads.
    pub fn estimated_accrued(&self, now: u64) -> Amount {
        let raw = self
            .stakes
            .iter()
            .fold(U256::ZERO, |sum, s| sum.saturating_add(s.accrued(now).raw));
        Amount::new(raw, self.claimable.decimals)
    }

    pub fn can_claim(&self) -> bool {
        !self.paused && !self.claimable.is_zero()
    }
}

pub struct ClaimRewardsSource;

#[async_trait]
impl SnapshotSource for ClaimRewardsSource {
    type Snapshot = ClaimRewardsSnapshot;

    fn page(&self) -> &'static str {
        Page::ClaimRewards.key()
    }

    fn event_kinds(&self) -> &'static [PresaleEventKind] {
        &[PresaleEventKind::Purchase, PresaleEventKind::RewardsClaimed]
    }

    async fn load(&self, ctx: &LoadContext) -> Result<ClaimRewardsSnapshot> {
        let c = ctx.contract.as_ref();
        let (paused, rewards, participations, token, chain_now) = tokio::try_join!(
            c.paused(),
            c.claimable_rewards(ctx.account),
            c.participations(ctx.account),
            c.token_decimals(),
            ctx.chain_now(),
        )?;
        Ok(ClaimRewardsSnapshot {
            paused,
            claimable: Amount::new(rewards, token),
            stakes: participations
                .into_iter()
                .map(|p| Stake::new(p, token))
                .collect(),
            chain_now,
        })
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub kind: PresaleEventKind,
    pub amount: Amount,
    pub block_number: u64,
    pub timestamp: u64,
    pub tx_hash: B256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionsSnapshot {
    /// Newest first.
    pub rows: Vec<TransactionRow>,
}

pub struct TransactionsSource {
    from_block: u64,
}

impl TransactionsSource {
    pub fn new(from_block: u64) -> Self {
        Self { from_block }
    }
}

#[async_trait]
impl SnapshotSource for TransactionsSource {
    type Snapshot = TransactionsSnapshot;

    fn page(&self) -> &'static str {
        Page::Transactions.key()
    }

    async fn load(&self, ctx: &LoadContext) -> Result<TransactionsSnapshot> {
        let c = ctx.contract.as_ref();
        let (events, token) = tokio::try_join!(
            c.events(ctx.account, self.from_block),
            c.token_decimals(),
        )?;

        let blocks: Vec<u64> = events
            .iter()
            .map(|e| e.block_number)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let timestamps = try_join_all(blocks.iter().map(|&n| c.block_timestamp(n))).await?;

        let mut rows: Vec<TransactionRow> = events
            .into_iter()
            .map(|e| {
                let timestamp = blocks
                    .binary_search(&e.block_number)
                    .ok()
                    .and_then(|i| timestamps.get(i).copied())
                    .unwrap_or_default();
                TransactionRow {
                    kind: e.kind,
                    amount: Amount::new(e.amount, token),
                    block_number: e.block_number,
                    timestamp,
                    tx_hash: e.tx_hash,
                }
            })
            .collect();
        rows.sort_by(|a, b| b.block_number.cmp(&a.block_number));
        Ok(TransactionsSnapshot { rows })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy_primitives::Address;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::chain_time::ChainClock;
    use crate::clock::ManualClock;
    use crate::contract::{ParticipantInfo, PresaleContract, PresaleEvent};
    use crate::testing::{account, MockPresale};

    fn ctx(presale: &MockPresale, who: Address) -> LoadContext {
        LoadContext {
            contract: Arc::new(presale.for_account(who)),
            account: who,
            chain_id: 1,
            chain_clock: Arc::new(ChainClock::new(
                Arc::new(ManualClock::at(1_700_000_000_000)),
                Duration::from_secs(300),
            )),
        }
    }

    #[tokio::test]
    async fn amounts_use_decimals_read_from_the_token() {
        let raw = U256::from(1_500_000u64);
        let mut shown = Vec::new();
        for decimals in [6u8, 18] {
            let presale = MockPresale::new();
            presale.update(|s| {
                s.token_decimals = decimals;
                s.participants.insert(
                    account(1),
                    ParticipantInfo {
                        total_purchased: raw,
                        total_claimed: U256::ZERO,
                    },
                );
            });
            let snapshot = OverviewSource.load(&ctx(&presale, account(1))).await.unwrap();
            assert_eq!(snapshot.purchased.decimals, decimals);
            shown.push(snapshot.purchased.display(4));
        }
        assert_eq!(shown[0], "1.5");
        assert_ne!(shown[0], shown[1]);
    }

    #[tokio::test]
    async fn overview_reads_chain_time_and_progress() {
        let presale = MockPresale::new();
        presale.update(|s| {
            s.stats.sold = s.stats.cap / U256::from(4u8);
        });
        let snapshot = OverviewSource.load(&ctx(&presale, account(1))).await.unwrap();
        assert_eq!(snapshot.progress_bps(), 2_500);
        assert_eq!(snapshot.chain_now, presale.snapshot().block.timestamp);
        assert_eq!(snapshot.staked, Amount::zero(18));
    }

    #[test]
    fn display_stage_advances_optimistically() {
        let snapshot = OverviewSnapshot {
            stage: PresaleStage::NotStarted,
            paused: false,
            stats: PresaleStats {
                start_time: 100,
                end_time: 200,
                ..PresaleStats::default()
            },
            sold: Amount::zero(18),
            cap: Amount::zero(18),
            raised: Amount::zero(6),
            purchased: Amount::zero(18),
            claimed: Amount::zero(18),
            staked: Amount::zero(18),
            claimable_rewards: Amount::zero(18),
            chain_now: 50,
        };
        assert_eq!(snapshot.display_stage(99), PresaleStage::NotStarted);
        assert_eq!(snapshot.countdown(90).map(|(label, c)| (label, c.seconds)), Some(("Starts in", 10)));
        assert_eq!(snapshot.display_stage(100), PresaleStage::Active);

        let active = OverviewSnapshot {
            stage: PresaleStage::Active,
            ..snapshot
        };
        assert_eq!(active.countdown(150).map(|(label, _)| label), Some("Ends in"));
        assert_eq!(active.display_stage(200), PresaleStage::Ended);
        assert_eq!(active.countdown(200), None);
    }

    #[tokio::test]
    async fn purchase_minimum_uses_payment_decimals() {
        let presale = MockPresale::new();
        presale.fund(account(1), U256::from(50_000_000u64));
        let config = AppConfig {
            min_purchase: "12.5".into(),
            ..AppConfig::default()
        };
        let snapshot = PurchaseSource::new(&config)
            .load(&ctx(&presale, account(1)))
            .await
            .unwrap();
        assert_eq!(snapshot.min_purchase, Amount::new(U256::from(12_500_000u64), 6));
        assert_eq!(snapshot.balance.to_string(), "50");
        assert_eq!(snapshot.payment_decimals(), 6);
    }

    #[tokio::test]
    async fn claimable_tokens_need_claim_stage() {
        let presale = MockPresale::new();
        presale.update(|s| {
            s.participants.insert(
                account(1),
                ParticipantInfo {
                    total_purchased: U256::from(100u8),
                    total_claimed: U256::from(40u8),
                },
            );
        });
        let snapshot = ClaimTokensSource.load(&ctx(&presale, account(1))).await.unwrap();
        assert_eq!(snapshot.claimable().raw, U256::from(60u8));
        assert!(!snapshot.can_claim());

        presale.update(|s| s.stage = PresaleStage::ClaimOpen);
        let snapshot = ClaimTokensSource.load(&ctx(&presale, account(1))).await.unwrap();
        assert!(snapshot.can_claim());
    }

    #[tokio::test]
    async fn rewards_page_totals_stakes() {
        let presale = MockPresale::new();
        let stake = Participation {
            amount: U256::from(1_000u64),
            apr_bps: 1_000,
            lock_duration: 100,
            start_time: 0,
            end_time: 100,
            last_reward_time: 0,
        };
        presale.update(|s| {
            s.participations.insert(account(1), vec![stake, stake]);
            s.rewards.insert(account(1), U256::from(3u8));
        });
        let snapshot = ClaimRewardsSource.load(&ctx(&presale, account(1))).await.unwrap();
        assert_eq!(snapshot.staked().raw, U256::from(2_000u64));
        assert!(snapshot.can_claim());
        assert!(snapshot.estimated_accrued(50).raw <= snapshot.estimated_accrued(100).raw);
        assert!(snapshot.stakes[0].is_unlocked(100));
        assert!(snapshot.stakes[0].unlocks_in(40).is_some());
    }

    #[tokio::test]
    async fn transactions_are_newest_first_with_block_times() {
        let presale = MockPresale::new();
        presale.fund(account(1), U256::from(1_000_000_000u64));
        let buyer = presale.for_account(account(1));
        buyer.approve_payment(U256::from(1_000_000_000u64)).await.unwrap();
        buyer.participate(U256::from(10_000_000u64), 86_400).await.unwrap();
        buyer.participate(U256::from(20_000_000u64), 86_400).await.unwrap();
        presale.push_event(PresaleEvent {
            kind: PresaleEventKind::Purchase,
            participant: account(9),
            amount: U256::from(1u8),
            block_number: 2,
            tx_hash: B256::ZERO,
        });

        let snapshot = TransactionsSource::new(0)
            .load(&ctx(&presale, account(1)))
            .await
            .unwrap();
        assert_eq!(snapshot.rows.len(), 2);
        assert!(snapshot.rows[0].block_number > snapshot.rows[1].block_number);
        assert_eq!(snapshot.rows[0].amount.to_string(), "20");
        assert_eq!(snapshot.rows[0].timestamp - snapshot.rows[1].timestamp, 12);
    }

    #[tokio::test]
    async fn empty_history_is_a_valid_snapshot() {
        let presale = MockPresale::new();
        let snapshot = TransactionsSource::new(0)
            .load(&ctx(&presale, account(1)))
            .await
            .unwrap();
        assert_eq!(snapshot, TransactionsSnapshot::default());
    }
}
