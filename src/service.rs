//! Service layer API for the leave approval workflow.
//!
//! Each operation validates against a snapshot of the request first, so
//! authorization failures never open a transaction. The mutation itself is
//! re-checked and applied inside one unit of work, which is what turns a
//! racing second approver into `AlreadyDecided`.
use super::audit::{self, AuditEntry, AuditEvent, AuditSink, SledAuditSink};
use super::calendar::{Clock, HolidayCalendar, SystemClock, WorkingDaysCalculator};
use super::config::EngineConfig;
use super::context::{
    Approval, Decision, LeaveContext, LeaveRequest, LeaveStatus, StepKind, decision_for,
};
use super::conversion::{Allocation, ConversionDetails, ConversionEngine, ConversionPolicy};
use super::directory::{ApproverResolver, IdentityResolver};
use super::error::{ExtensionIneligibility, LeaveError};
use super::ledger::{self, BalanceLedger};
use super::notify::{LeaveEvent, Notification, Notifier, TracingNotifier};
use super::store::{Store, UnitOfWork};
use super::types::{Action, CalendarDay, Identity, LeaveType, Role, TimeStamp};
use super::utils;
use super::workflow::{AuthorizationRequest, WorkflowEngine, WorkflowPolicy};
use chrono::{Datelike, NaiveDate};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub id: String,
    pub status: LeaveStatus,
    pub working_days: u32,
    pub allocations: Vec<Allocation>,
    pub conversion: Option<ConversionDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub request_id: String,
    pub status: LeaveStatus,
    /// The step now awaiting a decision, if any.
    pub step: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub extension_id: String,
    pub status: LeaveStatus,
    pub working_days: u32,
    pub start_date: NaiveDate,
}

/// Result of evaluating a new date range for one requester.
struct Prepared {
    working_days: u32,
    allocations: Vec<Allocation>,
    conversion: Option<ConversionDetails>,
    first_role: Role,
    approver_id: String,
}

enum Transition {
    Advance { role: Role, approver_id: String },
    Complete,
    Reject,
    Return,
}

fn require_comment(comment: Option<&str>, min_len: usize) -> Result<(), LeaveError> {
    let len = comment.map_or(0, |c| c.trim().chars().count());
    if len < min_len {
        return Err(LeaveError::CommentTooShort { min_len });
    }
    Ok(())
}

fn requester_identity(request: &LeaveRequest) -> Identity {
    Identity::new(
        request.requester_id.clone(),
        request.requester_role,
        request.department.clone(),
    )
}

/// Fails when another live request of `employee_id` shares a day with
/// `start..=end`. Runs inside the unit of work that files the request.
fn ensure_no_overlap(
    work: &UnitOfWork<'_>,
    employee_id: &str,
    start: NaiveDate,
    end: NaiveDate,
    skip: Option<&str>,
) -> Result<(), LeaveError> {
    let (start, end) = (CalendarDay::from(start), CalendarDay::from(end));
    for id in work.request_ids_for(employee_id)? {
        if Some(id.as_str()) == skip {
            continue;
        }
        let ctx = work.load_context(&id)?;
        if ctx.current_state().holds_dates() && ctx.request.overlaps(start, end) {
            return Err(LeaveError::OverlappingRequest { existing: id });
        }
    }
    Ok(())
}

fn has_open_extension(work: &UnitOfWork<'_>, parent_id: &str) -> Result<bool, LeaveError> {
    for id in work.extension_ids(parent_id)? {
        if !work.load_context(&id)?.current_state().is_terminal() {
            return Ok(true);
        }
    }
    Ok(false)
}

pub struct LeaveService {
    store: Store,
    ledger: BalanceLedger,
    workflow: WorkflowEngine,
    conversion: ConversionPolicy,
    calendar: WorkingDaysCalculator,
    holidays: Arc<dyn HolidayCalendar>,
    identities: Arc<dyn IdentityResolver>,
    approvers: Arc<dyn ApproverResolver>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl LeaveService {
    pub fn new<D>(
        instance: Arc<sled::Db>,
        directory: Arc<D>,
        holidays: Arc<dyn HolidayCalendar>,
        config: EngineConfig,
    ) -> Result<Self, LeaveError>
    where
        D: IdentityResolver + ApproverResolver + 'static,
    {
        let offset = config
            .utc_offset()
            .map_err(|e| LeaveError::Config(e.to_string()))?;
        let audit: Arc<dyn AuditSink> = Arc::new(SledAuditSink::open(&instance)?);
        let store = Store::open(instance)?;
        let identities: Arc<dyn IdentityResolver> = directory.clone();
        let approvers: Arc<dyn ApproverResolver> = directory;

        Ok(Self {
            ledger: BalanceLedger::new(store.clone(), audit.clone()),
            store,
            workflow: WorkflowEngine::new(WorkflowPolicy::standard()),
            conversion: ConversionPolicy::standard(config.policy_version.clone()),
            calendar: WorkingDaysCalculator::new(config.weekend.clone()),
            holidays,
            identities,
            approvers,
            audit,
            notifier: Arc::new(TracingNotifier),
            clock: Arc::new(SystemClock::new(offset)),
            config,
        })
    }

    /// Opens the database at `config.db_path` and builds the service on it.
    pub fn open<D>(
        config: EngineConfig,
        directory: Arc<D>,
        holidays: Arc<dyn HolidayCalendar>,
    ) -> Result<Self, LeaveError>
    where
        D: IdentityResolver + ApproverResolver + 'static,
    {
        let instance = Arc::new(sled::open(&config.db_path)?);
        tracing::info!(path = %config.db_path, "leave store opened");
        Self::new(instance, directory, holidays, config)
    }

    pub fn with_workflow_policy(mut self, policy: WorkflowPolicy) -> Self {
        self.workflow = WorkflowEngine::new(policy);
        self
    }

    pub fn with_conversion_policy(mut self, policy: ConversionPolicy) -> Self {
        self.conversion = policy;
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.ledger = BalanceLedger::new(self.store.clone(), sink.clone());
        self.audit = sink;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ledger(&self) -> &BalanceLedger {
        &self.ledger
    }

    pub fn workflow(&self) -> &WorkflowEngine {
        &self.workflow
    }

    pub fn get(&self, request_id: &str) -> Result<LeaveContext, LeaveError> {
        self.store.load_context(request_id)
    }

    pub fn list_for_employee(&self, employee_id: &str) -> Result<Vec<LeaveContext>, LeaveError> {
        self.store
            .request_ids_for(employee_id)?
            .iter()
            .map(|id| self.store.load_context(id))
            .collect()
    }

    fn identify(&self, user_id: &str) -> Result<Identity, LeaveError> {
        self.identities
            .resolve(user_id)
            .ok_or_else(|| LeaveError::Unauthorized {
                actor_id: user_id.to_string(),
            })
    }

    fn notify(&self, request_id: &str, event: LeaveEvent, actor_id: &str, recipient_id: &str) {
        let notification = Notification {
            request_id: request_id.to_string(),
            event,
            actor_id: actor_id.to_string(),
            recipient_id: recipient_id.to_string(),
        };
        if let Err(error) = self.notifier.notify(&notification) {
            tracing::warn!(request_id, ?event, %error, "failed to send notification");
        }
    }

    /// Working days, allocations and the first approver for a date range.
    /// Read-only: the balance check here is advisory, the deduction at
    /// final approval is authoritative.
    fn prepare(
        &self,
        requester: &Identity,
        leave_type: LeaveType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Prepared, LeaveError> {
        if end < start {
            return Err(LeaveError::InvalidDateRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }

        let holidays = self
            .holidays
            .holidays_between(start, end)
            .map_err(|e| LeaveError::Collaborator(format!("holiday calendar: {e}")))?;
        let working_days = self.calendar.count(start, end, &holidays)?;
        if working_days == 0 {
            return Err(LeaveError::NoWorkingDays);
        }

        let year = start.year();
        let snapshot = self.ledger.snapshot(&requester.id, year)?;
        let (allocations, conversion) = if self.conversion.is_cap_eligible(leave_type) {
            let outcome = ConversionEngine::new(&self.conversion).convert(
                leave_type,
                working_days,
                &snapshot,
            )?;
            (outcome.allocations, outcome.details)
        } else {
            (
                vec![Allocation::new(leave_type, working_days, "requested")],
                None,
            )
        };

        for (leave_type, required) in ledger::totals_by_type(&allocations) {
            let view = snapshot
                .get(&leave_type)
                .ok_or_else(|| LeaveError::BalanceNotFound {
                    employee_id: requester.id.clone(),
                    leave_type,
                    year,
                })?;
            if required > view.available {
                return Err(LeaveError::InsufficientBalance {
                    leave_type,
                    available: view.available,
                    required,
                });
            }
        }

        let chain = self.workflow.chain_for(leave_type, requester.role)?;
        let first_role = *chain.first().ok_or_else(|| {
            LeaveError::Config(format!("empty approval chain for {leave_type}"))
        })?;
        let approver_id = self
            .approvers
            .approver_for(first_role, requester)
            .ok_or(LeaveError::NoApproverAvailable { role: first_role })?;

        Ok(Prepared {
            working_days,
            allocations,
            conversion,
            first_role,
            approver_id,
        })
    }

    /// Files a new request and opens step 1 of its chain.
    pub fn submit(
        &self,
        employee_id: &str,
        leave_type: LeaveType,
        start: NaiveDate,
        end: NaiveDate,
        reason: &str,
    ) -> Result<Submission, LeaveError> {
        let requester = self.identify(employee_id)?;
        let prepared = self.prepare(&requester, leave_type, start, end)?;

        let id = utils::new_request_id().map_err(|e| LeaveError::Encoding(e.to_string()))?;
        let mut ctx = LeaveContext::new(LeaveRequest {
            id: id.clone(),
            requester_id: requester.id.clone(),
            requester_role: requester.role,
            department: requester.department.clone(),
            leave_type,
            start_date: start.into(),
            end_date: end.into(),
            working_days: prepared.working_days,
            status: LeaveStatus::Submitted,
            reason: reason.to_string(),
            is_extension: false,
            parent_leave_id: None,
            conversion: prepared.conversion.clone(),
            allocations: prepared.allocations.clone(),
            round: 1,
            cancellation_reason: None,
            created_at: TimeStamp::new(),
            updated_at: TimeStamp::new(),
        });
        ctx.insert_approval(Approval::pending(
            1,
            1,
            StepKind::Leave,
            prepared.first_role,
            0,
            prepared.approver_id.clone(),
        ));

        let ((), journal) = self.store.unit_of_work(|work| {
            ensure_no_overlap(work, &requester.id, start, end, None)?;
            work.insert_context(&ctx)?;
            work.record(AuditEntry::new(
                &id,
                &requester.id,
                AuditEvent::Submitted {
                    working_days: prepared.working_days,
                    round: 1,
                },
            ));
            Ok(())
        })?;

        audit::publish(&self.audit, journal);
        self.notify(&id, LeaveEvent::Submitted, &requester.id, &prepared.approver_id);
        tracing::info!(
            request_id = %id,
            employee = %requester.id,
            leave_type = %leave_type,
            days = prepared.working_days,
            "leave submitted"
        );

        Ok(Submission {
            id,
            status: LeaveStatus::Submitted,
            working_days: prepared.working_days,
            allocations: prepared.allocations,
            conversion: prepared.conversion,
        })
    }

    /// Applies an approver action to an open step. When `expected_step` is
    /// given the action only succeeds if that exact step is still pending;
    /// otherwise the step is the one the actor's role holds, so a late
    /// second approver on a step already decided gets `AlreadyDecided`.
    pub fn decide(
        &self,
        request_id: &str,
        actor_id: &str,
        action: Action,
        expected_step: Option<u32>,
        comment: Option<String>,
    ) -> Result<ActionOutcome, LeaveError> {
        let actor = self.identify(actor_id)?;
        let ctx = self.store.load_context(request_id)?;
        let status = ctx.current_state();

        let step = match expected_step {
            Some(number) => ctx
                .step(number)
                .ok_or_else(|| LeaveError::NotFound(format!("{request_id} step {number}")))?,
            None => ctx.step_for_role(actor.role).ok_or(LeaveError::InvalidStatus {
                status,
                action: action.as_str(),
            })?,
        };
        if !step.is_pending() {
            return Err(LeaveError::AlreadyDecided { step: step.step });
        }
        if !status.awaits_decision() {
            return Err(LeaveError::InvalidStatus {
                status,
                action: action.as_str(),
            });
        }

        match action {
            Action::Return => {
                require_comment(comment.as_deref(), self.config.return_comment_min_len)?
            }
            Action::Reject => {
                require_comment(comment.as_deref(), self.config.reject_comment_min_len)?
            }
            Action::Approve | Action::Forward => {}
        }

        let request = &ctx.request;
        let position = step.chain_position as usize;
        let kind = step.kind;
        let step_number = step.step;
        self.workflow.authorize(&AuthorizationRequest {
            actor_id: &actor.id,
            actor_role: actor.role,
            requester_id: &request.requester_id,
            requester_role: request.requester_role,
            action,
            leave_type: request.leave_type,
            kind,
            position,
            same_department: actor.department == request.department,
        })?;

        let chain = self
            .workflow
            .chain_for_kind(kind, request.leave_type, request.requester_role)?;
        let transition = match action {
            Action::Approve if position + 1 == chain.len() => Transition::Complete,
            Action::Approve | Action::Forward => {
                let role = *chain.get(position + 1).ok_or(LeaveError::Forbidden {
                    role: actor.role,
                    action: action.as_str(),
                    reason: "final step must approve or reject",
                })?;
                let approver_id = self
                    .approvers
                    .approver_for(role, &requester_identity(request))
                    .ok_or(LeaveError::NoApproverAvailable { role })?;
                Transition::Advance { role, approver_id }
            }
            Action::Reject => Transition::Reject,
            Action::Return => Transition::Return,
        };

        let ((to, open_step), journal) = self.store.unit_of_work(|work| {
            let mut ctx = work.load_context(request_id)?;
            let from = ctx.current_state();
            let round = match ctx.step(step_number) {
                Some(step) if step.is_pending() => step.round,
                Some(_) => return Err(LeaveError::AlreadyDecided { step: step_number }),
                None => {
                    return Err(LeaveError::NotFound(format!(
                        "{request_id} step {step_number}"
                    )));
                }
            };
            if !from.awaits_decision() {
                return Err(LeaveError::InvalidStatus {
                    status: from,
                    action: action.as_str(),
                });
            }

            let (decision, to_role) = match &transition {
                Transition::Advance { role, .. } => (decision_for(action, false), Some(*role)),
                Transition::Complete => (decision_for(action, true), None),
                Transition::Reject | Transition::Return => (decision_for(action, false), None),
            };
            if let Some(step) = ctx.step_mut(step_number) {
                step.decide(decision, to_role, comment.clone(), &actor.id);
            }

            let to = match (&transition, kind) {
                (Transition::Advance { role, approver_id }, _) => {
                    ctx.insert_approval(Approval::pending(
                        ctx.next_step_number(),
                        round,
                        kind,
                        *role,
                        position as u32 + 1,
                        approver_id.clone(),
                    ));
                    match kind {
                        StepKind::Leave => LeaveStatus::Pending,
                        StepKind::Cancellation => LeaveStatus::CancellationRequested,
                    }
                }
                (Transition::Complete, StepKind::Leave) => {
                    BalanceLedger::deduct_in(
                        work,
                        &actor.id,
                        &ctx.request.requester_id,
                        &ctx.request.allocations,
                        ctx.request.balance_year(),
                    )?;
                    LeaveStatus::Approved
                }
                (Transition::Complete, StepKind::Cancellation) => {
                    BalanceLedger::restore_in(
                        work,
                        &actor.id,
                        &ctx.request.requester_id,
                        &ctx.request.allocations,
                        ctx.request.balance_year(),
                        "cancellation approved",
                    )?;
                    LeaveStatus::Cancelled
                }
                (Transition::Reject, StepKind::Leave) => LeaveStatus::Rejected,
                (Transition::Reject, StepKind::Cancellation) => LeaveStatus::Approved,
                (Transition::Return, _) => LeaveStatus::Returned,
            };

            ctx.set_status(to);
            work.save_context(&ctx)?;
            work.record(AuditEntry::new(
                request_id,
                &actor.id,
                AuditEvent::Decided {
                    step: step_number,
                    action,
                    status: to,
                },
            ));
            if from != to {
                work.record(AuditEntry::new(
                    request_id,
                    &actor.id,
                    AuditEvent::StatusChanged { from, to },
                ));
            }

            Ok((to, ctx.current_step().map(|a| a.step)))
        })?;

        audit::publish(&self.audit, journal);

        let requester_id = ctx.request.requester_id.as_str();
        let (event, recipient) = match (&transition, kind) {
            (Transition::Advance { approver_id, .. }, _) => {
                (LeaveEvent::Forwarded, approver_id.as_str())
            }
            (Transition::Complete, StepKind::Leave) => (LeaveEvent::Approved, requester_id),
            (Transition::Complete, StepKind::Cancellation) => (LeaveEvent::Cancelled, requester_id),
            (Transition::Reject, StepKind::Leave) => (LeaveEvent::Rejected, requester_id),
            (Transition::Reject, StepKind::Cancellation) => {
                (LeaveEvent::CancellationDenied, requester_id)
            }
            (Transition::Return, _) => (LeaveEvent::Returned, requester_id),
        };
        self.notify(request_id, event, &actor.id, recipient);
        tracing::info!(
            request_id,
            actor = %actor.id,
            action = %action,
            step = step_number,
            status = %to,
            "leave decision recorded"
        );

        Ok(ActionOutcome {
            request_id: request_id.to_string(),
            status: to,
            step: open_step,
        })
    }

    pub fn forward(
        &self,
        request_id: &str,
        actor_id: &str,
        comment: Option<String>,
    ) -> Result<ActionOutcome, LeaveError> {
        self.decide(request_id, actor_id, Action::Forward, None, comment)
    }

    pub fn approve(
        &self,
        request_id: &str,
        actor_id: &str,
        comment: Option<String>,
    ) -> Result<ActionOutcome, LeaveError> {
        self.decide(request_id, actor_id, Action::Approve, None, comment)
    }

    pub fn reject(
        &self,
        request_id: &str,
        actor_id: &str,
        comment: &str,
    ) -> Result<ActionOutcome, LeaveError> {
        self.decide(
            request_id,
            actor_id,
            Action::Reject,
            None,
            Some(comment.to_string()),
        )
    }

    pub fn return_to_requester(
        &self,
        request_id: &str,
        actor_id: &str,
        comment: &str,
    ) -> Result<ActionOutcome, LeaveError> {
        self.decide(
            request_id,
            actor_id,
            Action::Return,
            None,
            Some(comment.to_string()),
        )
    }

    /// Cancels immediately before approval; after approval opens a
    /// cancellation review and restores balances only once it is approved.
    pub fn cancel(
        &self,
        request_id: &str,
        actor_id: &str,
        reason: Option<String>,
    ) -> Result<ActionOutcome, LeaveError> {
        let actor = self.identify(actor_id)?;
        let ctx = self.store.load_context(request_id)?;
        let request = &ctx.request;
        if actor.id != request.requester_id {
            return Err(LeaveError::Forbidden {
                role: actor.role,
                action: "CANCEL",
                reason: "only the requester may cancel",
            });
        }

        let status = ctx.current_state();
        let review = match status {
            LeaveStatus::Submitted | LeaveStatus::Pending | LeaveStatus::Returned => None,
            LeaveStatus::Approved => {
                let chain = self
                    .workflow
                    .cancellation_chain_for(request.leave_type, request.requester_role)?;
                let role = *chain.first().ok_or_else(|| {
                    LeaveError::Config(format!(
                        "empty cancellation chain for {}",
                        request.leave_type
                    ))
                })?;
                let approver_id = self
                    .approvers
                    .approver_for(role, &requester_identity(request))
                    .ok_or(LeaveError::NoApproverAvailable { role })?;
                Some((role, approver_id))
            }
            _ => {
                return Err(LeaveError::InvalidStatus {
                    status,
                    action: "cancel",
                });
            }
        };

        let ((to, open_step), journal) = self.store.unit_of_work(|work| {
            let mut ctx = work.load_context(request_id)?;
            let from = ctx.current_state();
            let to = match (&review, from) {
                (
                    None,
                    LeaveStatus::Submitted | LeaveStatus::Pending | LeaveStatus::Returned,
                ) => {
                    if let Some(step) = ctx.current_step_mut() {
                        step.decide(Decision::Withdrawn, None, reason.clone(), &actor.id);
                    }
                    LeaveStatus::Cancelled
                }
                (Some((role, approver_id)), LeaveStatus::Approved) => {
                    ctx.insert_approval(Approval::pending(
                        ctx.next_step_number(),
                        ctx.request.round,
                        StepKind::Cancellation,
                        *role,
                        0,
                        approver_id.clone(),
                    ));
                    LeaveStatus::CancellationRequested
                }
                _ => {
                    return Err(LeaveError::InvalidStatus {
                        status: from,
                        action: "cancel",
                    });
                }
            };

            ctx.request.cancellation_reason = reason.clone();
            ctx.set_status(to);
            work.save_context(&ctx)?;
            work.record(AuditEntry::new(
                request_id,
                &actor.id,
                AuditEvent::StatusChanged { from, to },
            ));
            Ok((to, ctx.current_step().map(|a| a.step)))
        })?;

        audit::publish(&self.audit, journal);
        match &review {
            Some((_, approver_id)) => self.notify(
                request_id,
                LeaveEvent::CancellationRequested,
                &actor.id,
                approver_id,
            ),
            None => self.notify(request_id, LeaveEvent::Cancelled, &actor.id, &actor.id),
        }
        tracing::info!(request_id, status = %to, "leave cancellation recorded");

        Ok(ActionOutcome {
            request_id: request_id.to_string(),
            status: to,
            step: open_step,
        })
    }

    /// Sends a returned request through a fresh chain. Unchanged fields
    /// keep their previous values.
    pub fn resubmit(
        &self,
        request_id: &str,
        actor_id: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        reason: Option<String>,
    ) -> Result<Submission, LeaveError> {
        let actor = self.identify(actor_id)?;
        let ctx = self.store.load_context(request_id)?;
        let request = &ctx.request;
        if actor.id != request.requester_id {
            return Err(LeaveError::Forbidden {
                role: actor.role,
                action: "RESUBMIT",
                reason: "only the requester may resubmit",
            });
        }
        if ctx.current_state() != LeaveStatus::Returned {
            return Err(LeaveError::InvalidStatus {
                status: ctx.current_state(),
                action: "resubmit",
            });
        }

        let current_start = request.start_date.date();
        let start = start.unwrap_or(current_start);
        if request.is_extension && start != current_start {
            return Err(LeaveError::Forbidden {
                role: actor.role,
                action: "RESUBMIT",
                reason: "an extension always starts the day after its parent",
            });
        }
        let end = end.unwrap_or(request.end_date.date());
        let reason = reason.unwrap_or_else(|| request.reason.clone());

        let prepared = self.prepare(&actor, request.leave_type, start, end)?;

        let (round, journal) = self.store.unit_of_work(|work| {
            let mut ctx = work.load_context(request_id)?;
            let from = ctx.current_state();
            if from != LeaveStatus::Returned {
                return Err(LeaveError::InvalidStatus {
                    status: from,
                    action: "resubmit",
                });
            }
            ensure_no_overlap(work, &actor.id, start, end, Some(request_id))?;

            let request = &mut ctx.request;
            request.round += 1;
            request.requester_role = actor.role;
            request.department = actor.department.clone();
            request.start_date = start.into();
            request.end_date = end.into();
            request.working_days = prepared.working_days;
            request.allocations = prepared.allocations.clone();
            request.conversion = prepared.conversion.clone();
            request.reason = reason.clone();
            let round = request.round;

            ctx.insert_approval(Approval::pending(
                ctx.next_step_number(),
                round,
                StepKind::Leave,
                prepared.first_role,
                0,
                prepared.approver_id.clone(),
            ));
            ctx.set_status(LeaveStatus::Submitted);
            work.save_context(&ctx)?;
            work.record(AuditEntry::new(
                request_id,
                &actor.id,
                AuditEvent::Submitted {
                    working_days: prepared.working_days,
                    round,
                },
            ));
            work.record(AuditEntry::new(
                request_id,
                &actor.id,
                AuditEvent::StatusChanged {
                    from,
                    to: LeaveStatus::Submitted,
                },
            ));
            Ok(round)
        })?;

        audit::publish(&self.audit, journal);
        self.notify(
            request_id,
            LeaveEvent::Resubmitted,
            &actor.id,
            &prepared.approver_id,
        );
        tracing::info!(request_id, round, days = prepared.working_days, "leave resubmitted");

        Ok(Submission {
            id: request_id.to_string(),
            status: LeaveStatus::Submitted,
            working_days: prepared.working_days,
            allocations: prepared.allocations,
            conversion: prepared.conversion,
        })
    }

    /// Files an extension running from the day after an approved leave ends
    /// to `new_end`. The extension is a request of its own; the parent is
    /// only read.
    pub fn extend(
        &self,
        request_id: &str,
        actor_id: &str,
        new_end: NaiveDate,
        reason: &str,
    ) -> Result<Extension, LeaveError> {
        let actor = self.identify(actor_id)?;
        let parent = self.store.load_context(request_id)?;
        let request = &parent.request;
        if actor.id != request.requester_id {
            return Err(LeaveError::Forbidden {
                role: actor.role,
                action: "EXTEND",
                reason: "only the requester may extend",
            });
        }
        require_comment(Some(reason), self.config.extension_reason_min_len)?;

        if parent.current_state() != LeaveStatus::Approved {
            return Err(LeaveError::ExtensionNotEligible(
                ExtensionIneligibility::ParentNotApproved,
            ));
        }
        let today = self.clock.today();
        if today < request.start_date.date() {
            return Err(LeaveError::ExtensionNotEligible(
                ExtensionIneligibility::NotStarted,
            ));
        }
        if today > request.end_date.date() {
            return Err(LeaveError::ExtensionNotEligible(
                ExtensionIneligibility::AlreadyEnded,
            ));
        }
        if new_end <= request.end_date.date() {
            return Err(LeaveError::ExtensionNotEligible(
                ExtensionIneligibility::EndNotAfterParent,
            ));
        }
        for id in self.store.extension_ids(request_id)? {
            if !self.store.load_context(&id)?.current_state().is_terminal() {
                return Err(LeaveError::ExtensionNotEligible(
                    ExtensionIneligibility::PendingExtensionExists,
                ));
            }
        }

        let start = request.end_date.next().date();
        let prepared = self.prepare(&actor, request.leave_type, start, new_end)?;

        let id = utils::new_request_id().map_err(|e| LeaveError::Encoding(e.to_string()))?;
        let mut ctx = LeaveContext::new(LeaveRequest {
            id: id.clone(),
            requester_id: actor.id.clone(),
            requester_role: actor.role,
            department: actor.department.clone(),
            leave_type: request.leave_type,
            start_date: start.into(),
            end_date: new_end.into(),
            working_days: prepared.working_days,
            status: LeaveStatus::Submitted,
            reason: reason.to_string(),
            is_extension: true,
            parent_leave_id: Some(request_id.to_string()),
            conversion: prepared.conversion.clone(),
            allocations: prepared.allocations.clone(),
            round: 1,
            cancellation_reason: None,
            created_at: TimeStamp::new(),
            updated_at: TimeStamp::new(),
        });
        ctx.insert_approval(Approval::pending(
            1,
            1,
            StepKind::Leave,
            prepared.first_role,
            0,
            prepared.approver_id.clone(),
        ));

        let ((), journal) = self.store.unit_of_work(|work| {
            let parent_status = work.load_context(request_id)?.current_state();
            if parent_status != LeaveStatus::Approved {
                return Err(LeaveError::ExtensionNotEligible(
                    ExtensionIneligibility::ParentNotApproved,
                ));
            }
            if has_open_extension(work, request_id)? {
                return Err(LeaveError::ExtensionNotEligible(
                    ExtensionIneligibility::PendingExtensionExists,
                ));
            }
            ensure_no_overlap(work, &actor.id, start, new_end, None)?;

            work.insert_context(&ctx)?;
            work.add_extension(request_id, &id)?;
            work.record(AuditEntry::new(
                &id,
                &actor.id,
                AuditEvent::Submitted {
                    working_days: prepared.working_days,
                    round: 1,
                },
            ));
            work.record(AuditEntry::new(
                &id,
                &actor.id,
                AuditEvent::ExtensionOpened {
                    parent_id: request_id.to_string(),
                },
            ));
            Ok(())
        })?;

        audit::publish(&self.audit, journal);
        self.notify(&id, LeaveEvent::Extended, &actor.id, &prepared.approver_id);
        tracing::info!(
            request_id = %id,
            parent = request_id,
            days = prepared.working_days,
            "leave extension submitted"
        );

        Ok(Extension {
            extension_id: id,
            status: LeaveStatus::Submitted,
            working_days: prepared.working_days,
            start_date: start,
        })
    }
}
