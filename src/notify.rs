//! Turns orchestrator events into user-facing notifications.

use log::{error, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::config::NetworkConfig;
use crate::error::Error;
use crate::orchestrator::{
    EventDetail, Failure, OperationEvent, OperationId, OperationKind, OperationState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub operation_id: Option<OperationId>,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    /// Block explorer link of the transaction the event refers to.
    pub link: Option<String>,
}

impl Notification {
    fn new(
        operation_id: Option<OperationId>,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            operation_id,
            title: title.into(),
            description: description.into(),
            severity,
            link: None,
        }
    }

    /// `None` for events not worth surfacing.
    pub fn from_event(event: &OperationEvent, network: &NetworkConfig) -> Option<Self> {
        let id = Some(event.operation_id);
        let kind = event.kind;

        let (to, failure, transaction) = match &event.detail {
            EventDetail::StillWaiting { elapsed, .. } => {
                return Some(Self::new(
                    id,
                    Severity::Warning,
                    "Still waiting for confirmation",
                    format!(
                        "Your {} has been pending for {}s. It completes once the network includes it.",
                        kind.noun(),
                        elapsed.as_secs()
                    ),
                ));
            }
            EventDetail::Transition {
                to,
                failure,
                transaction,
                ..
            } => (*to, failure.as_ref(), *transaction),
        };

        let notification = match to {
            OperationState::Idle | OperationState::Validating => return None,
            OperationState::ApprovalPending => Self::new(
                id,
                Severity::Info,
                "Approval required",
                "Please confirm the approval transaction in your wallet (1/2).",
            ),
            OperationState::ApprovalConfirmed => Self::new(
                id,
                Severity::Info,
                "Approval confirmed",
                format!("Now confirm the {} in your wallet (2/2).", kind.noun()),
            ),
            OperationState::ActionPending => Self::new(
                id,
                Severity::Info,
                format!("{} initiated", capitalize(kind.noun())),
                format!("Please confirm the {} in your wallet.", kind.noun()),
            ),
            OperationState::ActionConfirmed => Self::new(
                id,
                Severity::Info,
                "Transaction confirmed on blockchain",
                "Updating balances...",
            ),
            OperationState::Settling => return None,
            OperationState::Done => Self::new(
                id,
                Severity::Success,
                success_title(kind),
                success_text(kind),
            ),
            OperationState::Failed => {
                let message = failure
                    .map(|failure| failure.message.clone())
                    .unwrap_or_else(|| "The transaction failed.".to_string());
                Self::new(id, Severity::Error, failure_title(kind), message)
            }
            OperationState::Cancelled => Self::new(
                id,
                Severity::Info,
                format!("{} cancelled", capitalize(kind.noun())),
                "Nothing was sent to the network.",
            ),
        };

        Some(Self {
            link: transaction.map(|tx| network.explorer_link(&tx)),
            ..notification
        })
    }

    /// Shown when [`crate::orchestrator::Orchestrator::start`] refuses a request.
    pub fn rejected(err: &Error) -> Option<Self> {
        match err {
            Error::ConcurrentOperation { kind, .. } => {
                let failure = Failure::concurrent(*kind);
                Some(Self::new(
                    None,
                    Severity::Warning,
                    format!("{} in progress", capitalize(kind.noun())),
                    failure.message,
                ))
            }
            _ => None,
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn success_title(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Deposit => "Deposit successful!",
        OperationKind::Withdraw => "Withdrawal successful!",
        OperationKind::Purchase => "Purchase successful!",
        OperationKind::Claim => "Tokens claimed successfully!",
        OperationKind::RegisterMerchant => "Registration successful!",
        OperationKind::UpdateMerchant => "Update successful!",
        OperationKind::ListItem => "Item listed!",
        OperationKind::UpdateItem => "Item updated!",
    }
}

fn success_text(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Deposit => "Your pSYLD and upfront ySYLD rewards are in your wallet.",
        OperationKind::Withdraw => "Your USDC has been returned to your wallet.",
        OperationKind::Purchase => "Your ySYLD was burned and the merchant has been paid.",
        OperationKind::Claim => "Test USDC has been sent to your wallet.",
        OperationKind::RegisterMerchant => "You are now registered as a merchant.",
        OperationKind::UpdateMerchant => "Your merchant information has been updated.",
        OperationKind::ListItem => "Your item is now available in the marketplace.",
        OperationKind::UpdateItem => "Your item has been updated.",
    }
}

fn failure_title(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Deposit => "Deposit failed",
        OperationKind::Withdraw => "Withdrawal failed",
        OperationKind::Purchase => "Purchase failed",
        OperationKind::Claim => "Failed to claim tokens",
        OperationKind::RegisterMerchant => "Registration error",
        OperationKind::UpdateMerchant | OperationKind::UpdateItem => "Update error",
        OperationKind::ListItem => "Listing error",
    }
}

pub trait NotificationSink: Send + 'static {
    fn notify(&mut self, notification: Notification);
}

/// Writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&mut self, notification: Notification) {
        let link = notification.link.as_deref().unwrap_or("");
        match notification.severity {
            Severity::Info | Severity::Success => {
                info!("{}: {} {}", notification.title, notification.description, link)
            }
            Severity::Warning => {
                warn!("{}: {} {}", notification.title, notification.description, link)
            }
            Severity::Error => {
                error!("{}: {} {}", notification.title, notification.description, link)
            }
        }
    }
}

impl NotificationSink for Vec<Notification> {
    fn notify(&mut self, notification: Notification) {
        self.push(notification);
    }
}

/// Feeds events to `sink` until the channel closes, then hands the sink back.
pub fn spawn_sink<S: NotificationSink>(
    mut events: broadcast::Receiver<OperationEvent>,
    mut sink: S,
    network: NetworkConfig,
) -> JoinHandle<S> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(notification) = Notification::from_event(&event, &network) {
                        sink.notify(notification);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Notification sink fell behind, {} events skipped", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
        sink
    })
}
