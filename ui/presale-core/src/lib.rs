//! Wallet session management and chain data synchronization for the presale dashboard.
//!
//! The UI crate renders what this crate publishes: a [`session::WalletSession`] shared by
//! every page, and one [`sync::Synchronizer`] per mounted page.

pub mod abi;
pub mod backoff;
pub mod cache;
pub mod chain_time;
pub mod clock;
pub mod config;
pub mod contract;
pub mod error;
pub mod pages;
pub mod provider;
pub mod purchase;
pub mod session;
pub mod storage;
pub mod sync;
pub mod units;

#[cfg(any(test, feature = "testutils"))]
pub mod testing;

pub use alloy_primitives::{Address, B256, U256};
pub use error::{ErrorKind, Result, WalletError};
