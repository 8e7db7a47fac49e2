//! Terminal failure taxonomy and best-effort revert classification.
//!
//! Revert text depends on the RPC provider; matching is a heuristic only and
//! anything not recognised is reported as [`Revert::Unknown`].

use std::fmt;

use super::OperationKind;
use crate::error::ChainError;

pub const REVERT_MARKER: &str = "execution reverted:";

/// Sub-classification of a rejected main action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Revert {
    InsufficientBalance,
    InvalidItem,
    InvalidAmount,
    WithdrawalLocked,
    AlreadyWithdrawn,
    InsufficientAllowance,
    NotMerchant,
    NotItemOwner,
    AlreadyRegistered,
    /// The wallet declined to sign.
    Declined,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    InvalidInput,
    ApprovalRejected,
    ActionRejected(Revert),
    ChainError,
    ConcurrentOperation,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::InvalidInput => f.write_str("invalid input"),
            FailureReason::ApprovalRejected => f.write_str("approval rejected"),
            FailureReason::ActionRejected(revert) => write!(f, "action rejected ({revert:?})"),
            FailureReason::ChainError => f.write_str("chain error"),
            FailureReason::ConcurrentOperation => f.write_str("concurrent operation"),
        }
    }
}

/// Which transaction of the operation a chain error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Approval,
    Action,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub reason: FailureReason,
    /// Shown to the user.
    pub message: String,
    /// Provider text, kept for diagnostics.
    pub raw: Option<String>,
}

/// Text after `execution reverted:`, if present and non-empty.
pub fn revert_reason(raw: &str) -> Option<&str> {
    let (_, reason) = raw.split_once(REVERT_MARKER)?;
    let reason = reason.trim();
    (!reason.is_empty()).then_some(reason)
}

pub fn classify_revert(reason: &str) -> Revert {
    let lower = reason.to_ascii_lowercase();

    if reason.contains("InsufficientYield") || reason.contains("InsufficientBalance") {
        Revert::InsufficientBalance
    } else if lower.contains("insufficientallowance") || lower.contains("insufficient allowance") {
        Revert::InsufficientAllowance
    } else if reason.contains("InvalidItem") {
        Revert::InvalidItem
    } else if reason.contains("InvalidAmount") || reason.contains("InvalidPrice") {
        Revert::InvalidAmount
    } else if reason.contains("WithdrawalLocked") {
        Revert::WithdrawalLocked
    } else if reason.contains("AlreadyWithdrawn") {
        Revert::AlreadyWithdrawn
    } else if reason.contains("NotRegisteredMerchant") {
        Revert::NotMerchant
    } else if reason.contains("NotItemOwner") {
        Revert::NotItemOwner
    } else if reason.contains("AlreadyRegistered") {
        Revert::AlreadyRegistered
    } else {
        Revert::Unknown
    }
}

fn is_declined(lower: &str) -> bool {
    lower.contains("user rejected") || lower.contains("user denied")
}

fn is_out_of_gas_funds(lower: &str) -> bool {
    lower.contains("insufficient funds")
}

impl Failure {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            reason: FailureReason::InvalidInput,
            message: message.into(),
            raw: None,
        }
    }

    pub fn concurrent(kind: OperationKind) -> Self {
        Self {
            reason: FailureReason::ConcurrentOperation,
            message: format!(
                "A {} is already in progress. Wait for it to finish before starting another.",
                kind.noun()
            ),
            raw: None,
        }
    }

    /// A read or receipt wait failed without the chain rejecting anything.
    pub fn chain(err: &ChainError) -> Self {
        Self {
            reason: FailureReason::ChainError,
            message: "Could not reach the network. Check your connection and try again.".into(),
            raw: Some(err.raw()),
        }
    }

    /// `submit_transaction` failed: the wallet declined, gas could not be
    /// paid, the call was simulated as reverting, or the RPC failed.
    pub fn submission(kind: OperationKind, stage: Stage, err: &ChainError, symbol: &str) -> Self {
        let raw = err.raw();
        let lower = raw.to_ascii_lowercase();

        if is_declined(&lower) {
            let reason = match stage {
                Stage::Approval => FailureReason::ApprovalRejected,
                Stage::Action => FailureReason::ActionRejected(Revert::Declined),
            };
            return Self {
                reason,
                message: "You rejected the transaction in your wallet. You can try again when ready."
                    .into(),
                raw: Some(raw),
            };
        }

        if is_out_of_gas_funds(&lower) {
            return Self {
                reason: FailureReason::ChainError,
                message: "You don't have enough funds to pay for the transaction gas fees.".into(),
                raw: Some(raw),
            };
        }

        if revert_reason(&raw).is_some() {
            return Self::reverted(kind, stage, &raw, symbol);
        }

        Self::chain(err)
    }

    /// The transaction was included and reverted, or its simulation did.
    pub fn reverted(kind: OperationKind, stage: Stage, raw: &str, symbol: &str) -> Self {
        let reason_text = revert_reason(raw).unwrap_or(raw.trim());

        match stage {
            Stage::Approval => Self {
                reason: FailureReason::ApprovalRejected,
                message: format!("The contract rejected the approval: {reason_text}"),
                raw: Some(raw.to_string()),
            },
            Stage::Action => {
                let revert = classify_revert(reason_text);
                Self {
                    reason: FailureReason::ActionRejected(revert),
                    message: action_message(kind, revert, reason_text, symbol),
                    raw: Some(raw.to_string()),
                }
            }
        }
    }
}

fn action_message(kind: OperationKind, revert: Revert, reason_text: &str, symbol: &str) -> String {
    match revert {
        Revert::InsufficientBalance => match kind {
            OperationKind::Purchase => {
                format!("You don't have enough {symbol} tokens to make this purchase.")
            }
            OperationKind::Withdraw => {
                format!("You don't have enough {symbol} tokens to withdraw this amount.")
            }
            _ => format!(
                "You don't have enough {symbol} in your wallet. Please check your balance and try again."
            ),
        },
        Revert::InvalidItem => match kind {
            OperationKind::UpdateItem => "This item does not exist.".into(),
            _ => "This item is no longer available for purchase.".into(),
        },
        Revert::InvalidAmount => match kind {
            OperationKind::ListItem | OperationKind::UpdateItem => {
                "The price is invalid. Prices must be greater than zero.".into()
            }
            _ => format!(
                "The {} amount is invalid. Please try a different amount.",
                kind.noun()
            ),
        },
        Revert::WithdrawalLocked => {
            "Your deposit is still locked. There is a minimum lock period before you can withdraw."
                .into()
        }
        Revert::AlreadyWithdrawn => "You have already withdrawn your deposit.".into(),
        Revert::InsufficientAllowance => format!(
            "The approval had not taken effect when the {} was sent. Please try again.",
            kind.noun()
        ),
        Revert::NotMerchant => format!(
            "You need to be registered as a merchant to {}.",
            match kind {
                OperationKind::ListItem => "list items",
                OperationKind::UpdateItem => "update items",
                _ => "update your information",
            }
        ),
        Revert::NotItemOwner => "You can only update items you listed.".into(),
        Revert::AlreadyRegistered => "This address is already registered as a merchant.".into(),
        Revert::Declined => {
            "You rejected the transaction in your wallet. You can try again when ready.".into()
        }
        Revert::Unknown => format!("The contract rejected the transaction: {reason_text}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_extracted_after_marker() {
        assert_eq!(
            revert_reason("call failed: execution reverted: InsufficientYield()"),
            Some("InsufficientYield()")
        );
        assert_eq!(revert_reason("execution reverted:   "), None);
        assert_eq!(revert_reason("nonce too low"), None);
    }

    #[test]
    fn known_reverts_classified() {
        assert_eq!(classify_revert("InsufficientYield()"), Revert::InsufficientBalance);
        assert_eq!(classify_revert("InsufficientBalance()"), Revert::InsufficientBalance);
        assert_eq!(classify_revert("InvalidItem()"), Revert::InvalidItem);
        assert_eq!(classify_revert("WithdrawalLocked()"), Revert::WithdrawalLocked);
        assert_eq!(classify_revert("AlreadyWithdrawn()"), Revert::AlreadyWithdrawn);
        assert_eq!(
            classify_revert("ERC20InsufficientAllowance()"),
            Revert::InsufficientAllowance
        );
        assert_eq!(
            classify_revert("ERC20: insufficient allowance"),
            Revert::InsufficientAllowance
        );
    }

    #[test]
    fn merchant_reverts_explain_the_missing_role() {
        let listing = Failure::reverted(
            OperationKind::ListItem,
            Stage::Action,
            "execution reverted: NotRegisteredMerchant()",
            "",
        );
        let update = Failure::reverted(
            OperationKind::UpdateItem,
            Stage::Action,
            "execution reverted: NotItemOwner()",
            "",
        );

        assert_eq!(listing.reason, FailureReason::ActionRejected(Revert::NotMerchant));
        assert_eq!(
            listing.message,
            "You need to be registered as a merchant to list items."
        );
        assert!(matches!(
            update.reason,
            FailureReason::ActionRejected(Revert::NotItemOwner)
        ));
        assert_eq!(
            classify_revert("MerchantAlreadyRegistered()"),
            Revert::AlreadyRegistered
        );
        assert_eq!(classify_revert("InvalidPrice()"), Revert::InvalidAmount);
    }

    #[test]
    fn unmatched_text_is_unknown() {
        assert_eq!(classify_revert("Pausable: paused"), Revert::Unknown);
        assert_eq!(classify_revert(""), Revert::Unknown);
    }

    #[test]
    fn purchase_revert_keeps_raw_and_explains() {
        let failure = Failure::reverted(
            OperationKind::Purchase,
            Stage::Action,
            "execution reverted: InsufficientYield()",
            "ySYLD",
        );

        assert_eq!(
            failure.reason,
            FailureReason::ActionRejected(Revert::InsufficientBalance)
        );
        assert_eq!(
            failure.message,
            "You don't have enough ySYLD tokens to make this purchase."
        );
        assert_eq!(
            failure.raw.as_deref(),
            Some("execution reverted: InsufficientYield()")
        );
    }

    #[test]
    fn declined_signature_depends_on_stage() {
        let err = ChainError::Rpc("User rejected the request.".into());

        let approval = Failure::submission(OperationKind::Deposit, Stage::Approval, &err, "USDC");
        let action = Failure::submission(OperationKind::Deposit, Stage::Action, &err, "USDC");

        assert_eq!(approval.reason, FailureReason::ApprovalRejected);
        assert_eq!(action.reason, FailureReason::ActionRejected(Revert::Declined));
    }

    #[test]
    fn gas_and_transport_errors_are_chain_errors() {
        let gas = ChainError::Rpc("insufficient funds for gas * price + value".into());
        let transport = ChainError::Rpc("connection reset".into());

        let gas = Failure::submission(OperationKind::Withdraw, Stage::Action, &gas, "pSYLD");
        let transport =
            Failure::submission(OperationKind::Withdraw, Stage::Action, &transport, "pSYLD");

        assert_eq!(gas.reason, FailureReason::ChainError);
        assert!(gas.message.contains("gas"));
        assert_eq!(transport.reason, FailureReason::ChainError);
        assert_eq!(transport.raw.as_deref(), Some("connection reset"));
    }

    #[test]
    fn simulated_revert_on_submission_is_classified() {
        let err = ChainError::Rpc("execution reverted: WithdrawalLocked()".into());

        let failure = Failure::submission(OperationKind::Withdraw, Stage::Action, &err, "pSYLD");

        assert_eq!(
            failure.reason,
            FailureReason::ActionRejected(Revert::WithdrawalLocked)
        );
        assert_ne!(failure.message, failure.raw.clone().unwrap_or_default());
    }
}
