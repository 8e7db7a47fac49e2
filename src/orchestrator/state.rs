use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationState {
    Idle,
    Validating,
    ApprovalPending,
    ApprovalConfirmed,
    ActionPending,
    ActionConfirmed,
    Settling,
    Done,
    Failed,
    Cancelled,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("operation already finished as {0}")]
    AlreadyTerminal(OperationState),
    #[error("cannot move from {from} to {to}")]
    Illegal {
        from: OperationState,
        to: OperationState,
    },
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationState::Done | OperationState::Failed | OperationState::Cancelled
        )
    }

    /// Nothing has been submitted yet, so local state can simply be dropped.
    pub fn is_cancellable(self) -> bool {
        matches!(self, OperationState::Idle | OperationState::Validating)
    }

    /// States in which a receipt is outstanding.
    pub fn is_awaiting_chain(self) -> bool {
        matches!(
            self,
            OperationState::ApprovalPending | OperationState::ActionPending
        )
    }

    pub fn advance(&mut self, to: OperationState) -> Result<(), TransitionError> {
        use OperationState::*;

        if self.is_terminal() {
            return Err(TransitionError::AlreadyTerminal(*self));
        }

        let allowed = match (*self, to) {
            (_, Failed) => true,
            (Idle | Validating, Cancelled) => true,
            (Idle, Validating) => true,
            (Validating, ApprovalPending | ActionPending) => true,
            (ApprovalPending, ApprovalConfirmed) => true,
            (ApprovalConfirmed, ActionPending) => true,
            (ActionPending, ActionConfirmed) => true,
            (ActionConfirmed, Settling) => true,
            (Settling, Done) => true,
            _ => false,
        };

        if allowed {
            *self = to;
            Ok(())
        } else {
            Err(TransitionError::Illegal { from: *self, to })
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationState::Idle => "idle",
            OperationState::Validating => "validating",
            OperationState::ApprovalPending => "approval-pending",
            OperationState::ApprovalConfirmed => "approval-confirmed",
            OperationState::ActionPending => "action-pending",
            OperationState::ActionConfirmed => "action-confirmed",
            OperationState::Settling => "settling",
            OperationState::Done => "done",
            OperationState::Failed => "failed",
            OperationState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}
