use crate::context::LeaveStatus;
use crate::types::{LeaveType, Role};

/// Why an extension request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionIneligibility {
    ParentNotApproved,
    NotStarted,
    AlreadyEnded,
    PendingExtensionExists,
    EndNotAfterParent,
}

#[derive(thiserror::Error, Debug)]
pub enum LeaveError {
    #[error("No valid identity could be resolved for {actor_id}")]
    Unauthorized { actor_id: String },
    #[error("Role {role} may not {action} this request: {reason}")]
    Forbidden {
        role: Role,
        action: &'static str,
        reason: &'static str,
    },
    #[error("Requesters may not approve their own leave")]
    SelfApprovalForbidden,
    #[error("Role {role} cannot approve before the final step held by {final_role}")]
    NotFinalApprover { role: Role, final_role: Role },
    #[error("Cannot {action} a request in status {status}")]
    InvalidStatus {
        status: LeaveStatus,
        action: &'static str,
    },
    #[error("Insufficient {leave_type} balance: available {available}, required {required}")]
    InsufficientBalance {
        leave_type: LeaveType,
        available: u32,
        required: u32,
    },
    #[error("No capacity left for {leave_type}: {allocated} of {requested} days allocated")]
    NoCapacityAvailable {
        leave_type: LeaveType,
        requested: u32,
        allocated: u32,
    },
    #[error("End date {end} is before start date {start}")]
    InvalidDateRange { start: String, end: String },
    #[error("The requested range contains no working days")]
    NoWorkingDays,
    #[error("Extension not eligible: {0:?}")]
    ExtensionNotEligible(ExtensionIneligibility),
    #[error("Approval step {step} has already been decided")]
    AlreadyDecided { step: u32 },
    #[error("No {leave_type} balance for {employee_id} in {year}")]
    BalanceNotFound {
        employee_id: String,
        leave_type: LeaveType,
        year: i32,
    },
    #[error("A {leave_type} balance for {employee_id} in {year} already exists")]
    BalanceExists {
        employee_id: String,
        leave_type: LeaveType,
        year: i32,
    },
    #[error("No approver holds role {role} for this request")]
    NoApproverAvailable { role: Role },
    #[error("Leave request {0} not found")]
    NotFound(String),
    #[error("Comment must be at least {min_len} characters")]
    CommentTooShort { min_len: usize },
    #[error("Dates overlap existing request {existing}")]
    OverlappingRequest { existing: String },
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Collaborator failed: {0}")]
    Collaborator(String),
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("Transaction interrupted: {0}")]
    Transaction(#[from] sled::transaction::UnabortableTransactionError),
}

/// Stable reason codes handed to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    SelfApprovalForbidden,
    NotFinalApprover,
    InvalidStatus,
    InsufficientBalance,
    NoCapacityAvailable,
    InvalidDateRange,
    NoWorkingDays,
    ExtensionNotEligible,
    AlreadyDecided,
    BalanceNotFound,
    BalanceExists,
    NoApproverAvailable,
    NotFound,
    InvalidInput,
    Conflict,
    System,
}

impl LeaveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LeaveError::Unauthorized { .. } => ErrorKind::Unauthorized,
            LeaveError::Forbidden { .. } => ErrorKind::Forbidden,
            LeaveError::SelfApprovalForbidden => ErrorKind::SelfApprovalForbidden,
            LeaveError::NotFinalApprover { .. } => ErrorKind::NotFinalApprover,
            LeaveError::InvalidStatus { .. } => ErrorKind::InvalidStatus,
            LeaveError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            LeaveError::NoCapacityAvailable { .. } => ErrorKind::NoCapacityAvailable,
            LeaveError::InvalidDateRange { .. } => ErrorKind::InvalidDateRange,
            LeaveError::NoWorkingDays => ErrorKind::NoWorkingDays,
            LeaveError::ExtensionNotEligible(_) => ErrorKind::ExtensionNotEligible,
            LeaveError::AlreadyDecided { .. } => ErrorKind::AlreadyDecided,
            LeaveError::BalanceNotFound { .. } => ErrorKind::BalanceNotFound,
            LeaveError::BalanceExists { .. } => ErrorKind::BalanceExists,
            LeaveError::NoApproverAvailable { .. } => ErrorKind::NoApproverAvailable,
            LeaveError::NotFound(_) => ErrorKind::NotFound,
            LeaveError::CommentTooShort { .. } => ErrorKind::InvalidInput,
            LeaveError::OverlappingRequest { .. } => ErrorKind::Conflict,
            LeaveError::Config(_)
            | LeaveError::Collaborator(_)
            | LeaveError::Storage(_)
            | LeaveError::Encoding(_)
            | LeaveError::Transaction(_) => ErrorKind::System,
        }
    }

    /// Errors caused by organisational data or storage rather than the user.
    pub fn is_system(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::System | ErrorKind::BalanceNotFound | ErrorKind::NoApproverAvailable
        )
    }
}

impl From<minicbor::decode::Error> for LeaveError {
    fn from(error: minicbor::decode::Error) -> Self {
        LeaveError::Encoding(error.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for LeaveError {
    fn from(error: minicbor::encode::Error<E>) -> Self {
        LeaveError::Encoding(error.to_string())
    }
}
