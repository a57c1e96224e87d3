//! Persisted leave records. A [`LeaveContext`] holds the request together
//! with its append-only approval history.
use super::conversion::{Allocation, ConversionDetails};
use super::types::{Action, CalendarDay, LeaveType, Role, TimeStamp};
use chrono::Utc;
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaveStatus {
    #[n(0)]
    Submitted,
    #[n(1)]
    Pending,
    #[n(2)]
    Returned,
    #[n(3)]
    Approved,
    #[n(4)]
    Rejected,
    #[n(5)]
    Cancelled,
    #[n(6)]
    CancellationRequested,
}

impl LeaveStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LeaveStatus::Approved | LeaveStatus::Rejected | LeaveStatus::Cancelled
        )
    }

    /// Statuses in which exactly one approval step is pending.
    pub fn awaits_decision(&self) -> bool {
        matches!(
            self,
            LeaveStatus::Submitted | LeaveStatus::Pending | LeaveStatus::CancellationRequested
        )
    }

    /// Whether the request still occupies its dates on the calendar.
    pub fn holds_dates(&self) -> bool {
        !matches!(self, LeaveStatus::Rejected | LeaveStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveStatus::Submitted => "SUBMITTED",
            LeaveStatus::Pending => "PENDING",
            LeaveStatus::Returned => "RETURNED",
            LeaveStatus::Approved => "APPROVED",
            LeaveStatus::Rejected => "REJECTED",
            LeaveStatus::Cancelled => "CANCELLED",
            LeaveStatus::CancellationRequested => "CANCELLATION_REQUESTED",
        }
    }
}

impl fmt::Display for LeaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
    #[n(3)]
    Forwarded,
    /// The requester cancelled while the step was still open.
    #[n(4)]
    Withdrawn,
}

/// Which review a step belongs to.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    #[n(0)]
    Leave,
    #[n(1)]
    Cancellation,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    #[n(0)]
    pub step: u32, // 1-based, contiguous across rounds
    #[n(1)]
    pub round: u32,
    #[n(2)]
    pub kind: StepKind,
    #[n(3)]
    pub role: Role,
    #[n(4)]
    pub chain_position: u32,
    #[n(5)]
    pub approver_id: String,
    #[n(6)]
    pub decision: Decision,
    #[n(7)]
    pub to_role: Option<Role>, // None on a forward means "returned to requester"
    #[n(8)]
    pub comment: Option<String>,
    #[n(9)]
    pub decided_by: Option<String>,
    #[n(10)]
    pub decided_at: Option<TimeStamp<Utc>>,
    #[n(11)]
    pub created_at: TimeStamp<Utc>,
}

impl Approval {
    pub fn pending(
        step: u32,
        round: u32,
        kind: StepKind,
        role: Role,
        chain_position: u32,
        approver_id: String,
    ) -> Self {
        Self {
            step,
            round,
            kind,
            role,
            chain_position,
            approver_id,
            decision: Decision::Pending,
            to_role: None,
            comment: None,
            decided_by: None,
            decided_at: None,
            created_at: TimeStamp::new(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.decision == Decision::Pending
    }

    pub fn decide(
        &mut self,
        decision: Decision,
        to_role: Option<Role>,
        comment: Option<String>,
        actor_id: &str,
    ) {
        self.decision = decision;
        self.to_role = to_role;
        self.comment = comment;
        self.decided_by = Some(actor_id.to_string());
        self.decided_at = Some(TimeStamp::new());
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct LeaveRequest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub requester_id: String,
    #[n(2)]
    pub requester_role: Role,
    #[n(3)]
    pub department: String,
    #[n(4)]
    pub leave_type: LeaveType,
    #[n(5)]
    pub start_date: CalendarDay,
    #[n(6)]
    pub end_date: CalendarDay,
    #[n(7)]
    pub working_days: u32,
    #[n(8)]
    pub status: LeaveStatus,
    #[n(9)]
    pub reason: String,
    #[n(10)]
    pub is_extension: bool,
    #[n(11)]
    pub parent_leave_id: Option<String>, // lookup only
    #[n(12)]
    pub conversion: Option<ConversionDetails>,
    #[n(13)]
    pub allocations: Vec<Allocation>,
    #[n(14)]
    pub round: u32,
    #[n(15)]
    pub cancellation_reason: Option<String>,
    #[n(16)]
    pub created_at: TimeStamp<Utc>,
    #[n(17)]
    pub updated_at: TimeStamp<Utc>,
}

impl LeaveRequest {
    /// Ledger year the allocations are charged against.
    pub fn balance_year(&self) -> i32 {
        self.start_date.year()
    }

    pub fn overlaps(&self, start: CalendarDay, end: CalendarDay) -> bool {
        self.start_date <= end && start <= self.end_date
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct LeaveContext {
    #[n(0)]
    pub request: LeaveRequest,
    #[n(1)]
    pub approvals: Vec<Approval>,
}

impl LeaveContext {
    pub fn new(request: LeaveRequest) -> Self {
        Self {
            request,
            approvals: vec![],
        }
    }

    pub fn id(&self) -> &str {
        &self.request.id
    }

    pub fn current_state(&self) -> LeaveStatus {
        self.request.status
    }

    pub fn insert_approval(&mut self, approval: Approval) {
        self.approvals.push(approval);
    }

    pub fn next_step_number(&self) -> u32 {
        self.approvals.len() as u32 + 1
    }

    /// The single open step, if the request is awaiting a decision.
    pub fn current_step(&self) -> Option<&Approval> {
        self.approvals.iter().rev().find(|a| a.is_pending())
    }

    pub fn current_step_mut(&mut self) -> Option<&mut Approval> {
        self.approvals.iter_mut().rev().find(|a| a.is_pending())
    }

    pub fn step(&self, step: u32) -> Option<&Approval> {
        self.approvals.iter().find(|a| a.step == step)
    }

    pub fn step_mut(&mut self, step: u32) -> Option<&mut Approval> {
        self.approvals.iter_mut().find(|a| a.step == step)
    }

    pub fn pending_count(&self) -> usize {
        self.approvals.iter().filter(|a| a.is_pending()).count()
    }

    /// Steps of the most recent submission round, oldest first. A
    /// cancellation review belongs to the round it cancels.
    pub fn current_round(&self) -> impl DoubleEndedIterator<Item = &Approval> {
        let round = self.request.round;
        self.approvals.iter().filter(move |a| a.round == round)
    }

    /// The step an actor holding `role` is acting on: the open step if the
    /// role holds it, otherwise the latest step of this round the role has
    /// already decided. Falls back to the open step.
    pub fn step_for_role(&self, role: Role) -> Option<&Approval> {
        if let Some(open) = self.current_step().filter(|a| a.role == role) {
            return Some(open);
        }
        self.current_round()
            .rev()
            .find(|a| a.role == role && !a.is_pending() && a.decision != Decision::Withdrawn)
            .or_else(|| self.current_step())
    }

    pub fn set_status(&mut self, status: LeaveStatus) {
        self.request.status = status;
        self.request.updated_at = TimeStamp::new();
    }

    /// Renders the decision history, one line per step.
    pub fn history(&self) -> Vec<String> {
        self.approvals
            .iter()
            .map(|a| {
                let decided_by = a.decided_by.as_deref().unwrap_or("-");
                format!(
                    "#{} {:?} {} -> {:?} by {}",
                    a.step, a.kind, a.role, a.decision, decided_by
                )
            })
            .collect()
    }
}

/// Maps an approver action onto the decision recorded on the step.
pub fn decision_for(action: Action, is_final: bool) -> Decision {
    match action {
        Action::Approve if is_final => Decision::Approved,
        Action::Approve | Action::Forward | Action::Return => Decision::Forwarded,
        Action::Reject => Decision::Rejected,
    }
}
