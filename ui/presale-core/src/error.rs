//! Error type shared by the session, the contract bindings and the synchronizers.

use thiserror::Error;

/// Every failure the client can report. Nothing in this crate panics on these; callers map
/// them onto UI state through [`WalletError::kind`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error("wallet not found")]
    WalletNotFound,
    #[error("wallet is not connected")]
    NotConnected,
    #[error("request rejected by the user")]
    UserRejected,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("{}", revert_message(.0))]
    Reverted(Option<String>),
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("storage error: {0}")]
    Storage(String),
}

fn revert_message(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!("transaction reverted: {reason}"),
        None => "transaction reverted".to_string(),
    }
}

/// Coarse classification used to decide how a failure is presented and whether it is
/// retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed configuration. Blocks the affected page only.
    Config,
    /// No wallet provider could be found. Shown as a connect prompt.
    WalletUnavailable,
    /// The user declined a prompt. Shown inline, never retried.
    UserRejected,
    /// Network or RPC failure. Retried with backoff.
    Transient,
    /// A write reverted on-chain. The user has to try again.
    Reverted,
    /// Something the user typed is unusable. Shown beside the field, never retried.
    InvalidInput,
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::InvalidAmount(_) => ErrorKind::InvalidInput,
            Self::WalletNotFound | Self::NotConnected => ErrorKind::WalletUnavailable,
            Self::UserRejected => ErrorKind::UserRejected,
            Self::Reverted(_) => ErrorKind::Reverted,
            Self::Rpc { .. }
            | Self::Network(_)
            | Self::Timeout
            | Self::Decode(_)
            | Self::Storage(_) => ErrorKind::Transient,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

pub type Result<T, E = WalletError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revert_display_uses_reason_when_present() {
        assert_eq!(
            WalletError::Reverted(Some("Presale: paused".into())).to_string(),
            "transaction reverted: Presale: paused"
        );
        assert_eq!(WalletError::Reverted(None).to_string(), "transaction reverted");
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(WalletError::Timeout.is_retryable());
        assert!(WalletError::Network("reset".into()).is_retryable());
        assert!(!WalletError::UserRejected.is_retryable());
        assert!(!WalletError::Reverted(None).is_retryable());
        assert!(!WalletError::Config("bad address".into()).is_retryable());
        assert_eq!(WalletError::WalletNotFound.kind(), ErrorKind::WalletUnavailable);
    }

    #[test]
    fn bad_amount_is_input_not_configuration() {
        let err = crate::units::parse_units("1.2.3", 6).unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(!err.is_retryable());
    }
}
