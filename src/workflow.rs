//! Static approval chains and the authorization decision. Nothing here
//! touches storage; every answer is a pure function of the policy table.
use super::context::StepKind;
use super::error::LeaveError;
use super::types::{Action, LeaveType, Role};
use std::collections::{HashMap, HashSet};

pub type ChainTable = HashMap<(LeaveType, Role), Vec<Role>>;

#[derive(Debug, Clone)]
pub struct WorkflowPolicy {
    chains: ChainTable,
    cancellation_chains: ChainTable,
    non_approving: HashSet<Role>,
    department_scoped: HashSet<Role>,
}

fn validate_chain(
    leave_type: LeaveType,
    requester: Role,
    chain: &[Role],
    non_approving: &HashSet<Role>,
) -> Result<(), LeaveError> {
    let Some(last) = chain.last() else {
        return Err(LeaveError::Config(format!(
            "empty approval chain for {leave_type} requested by {requester}"
        )));
    };
    if non_approving.contains(last) {
        return Err(LeaveError::Config(format!(
            "{last} cannot close the chain for {leave_type} requested by {requester}"
        )));
    }
    if chain.contains(&requester) {
        return Err(LeaveError::Config(format!(
            "chain for {leave_type} requested by {requester} routes back to the requester's role"
        )));
    }
    Ok(())
}

impl WorkflowPolicy {
    /// Every `(LeaveType, Role)` pair must be mapped. Cancellation review
    /// defaults to the final approver of each leave chain.
    pub fn new(
        chains: ChainTable,
        non_approving: HashSet<Role>,
        department_scoped: HashSet<Role>,
    ) -> Result<Self, LeaveError> {
        for leave_type in LeaveType::ALL {
            for requester in Role::ALL {
                let chain = chains.get(&(leave_type, requester)).ok_or_else(|| {
                    LeaveError::Config(format!(
                        "no approval chain for {leave_type} requested by {requester}"
                    ))
                })?;
                validate_chain(leave_type, requester, chain, &non_approving)?;
            }
        }

        let cancellation_chains = chains
            .iter()
            .filter_map(|(key, chain)| chain.last().map(|last| (*key, vec![*last])))
            .collect();

        Ok(Self {
            chains,
            cancellation_chains,
            non_approving,
            department_scoped,
        })
    }

    /// Overrides the cancellation review for one pair.
    pub fn with_cancellation_chain(
        mut self,
        leave_type: LeaveType,
        requester: Role,
        chain: Vec<Role>,
    ) -> Result<Self, LeaveError> {
        validate_chain(leave_type, requester, &chain, &self.non_approving)?;
        self.cancellation_chains.insert((leave_type, requester), chain);
        Ok(self)
    }

    pub fn standard() -> Self {
        let mut chains = ChainTable::new();
        for leave_type in LeaveType::ALL {
            let needs_ceo = matches!(
                leave_type,
                LeaveType::Special | LeaveType::Maternity | LeaveType::ExtraWithoutPay
            );
            let with_ceo = |mut chain: Vec<Role>| {
                if needs_ceo {
                    chain.push(Role::Ceo);
                }
                chain
            };

            chains.insert(
                (leave_type, Role::Employee),
                with_ceo(vec![Role::DeptHead, Role::HrAdmin, Role::HrHead]),
            );
            chains.insert(
                (leave_type, Role::DeptHead),
                with_ceo(vec![Role::HrAdmin, Role::HrHead]),
            );
            chains.insert((leave_type, Role::HrAdmin), vec![Role::HrHead, Role::Ceo]);
            chains.insert((leave_type, Role::HrHead), vec![Role::Ceo]);
            chains.insert((leave_type, Role::Ceo), vec![Role::HrHead]);
        }

        let cancellation_chains = chains
            .iter()
            .filter_map(|(key, chain)| chain.last().map(|last| (*key, vec![*last])))
            .collect();

        Self {
            chains,
            cancellation_chains,
            non_approving: HashSet::from([Role::HrAdmin]),
            department_scoped: HashSet::from([Role::DeptHead]),
        }
    }

    pub fn is_department_scoped(&self, role: Role) -> bool {
        self.department_scoped.contains(&role)
    }

    pub fn is_non_approving(&self, role: Role) -> bool {
        self.non_approving.contains(&role)
    }
}

/// Everything the authorization step needs to know about one action.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest<'a> {
    pub actor_id: &'a str,
    pub actor_role: Role,
    pub requester_id: &'a str,
    pub requester_role: Role,
    pub action: Action,
    pub leave_type: LeaveType,
    pub kind: StepKind,
    /// Zero-based position of the open step in its chain.
    pub position: usize,
    pub same_department: bool,
}

#[derive(Debug, Clone)]
pub struct WorkflowEngine {
    policy: WorkflowPolicy,
}

impl WorkflowEngine {
    pub fn new(policy: WorkflowPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    pub fn chain_for(&self, leave_type: LeaveType, requester: Role) -> Result<&[Role], LeaveError> {
        self.policy
            .chains
            .get(&(leave_type, requester))
            .map(Vec::as_slice)
            .ok_or_else(|| {
                LeaveError::Config(format!(
                    "no approval chain for {leave_type} requested by {requester}"
                ))
            })
    }

    pub fn cancellation_chain_for(
        &self,
        leave_type: LeaveType,
        requester: Role,
    ) -> Result<&[Role], LeaveError> {
        self.policy
            .cancellation_chains
            .get(&(leave_type, requester))
            .map(Vec::as_slice)
            .ok_or_else(|| {
                LeaveError::Config(format!(
                    "no cancellation chain for {leave_type} requested by {requester}"
                ))
            })
    }

    pub fn chain_for_kind(
        &self,
        kind: StepKind,
        leave_type: LeaveType,
        requester: Role,
    ) -> Result<&[Role], LeaveError> {
        match kind {
            StepKind::Leave => self.chain_for(leave_type, requester),
            StepKind::Cancellation => self.cancellation_chain_for(leave_type, requester),
        }
    }

    pub fn is_final_approver(
        &self,
        actor_role: Role,
        leave_type: LeaveType,
        requester: Role,
    ) -> bool {
        self.chain_for(leave_type, requester)
            .map(|chain| chain.last() == Some(&actor_role))
            .unwrap_or(false)
    }

    /// Role-level eligibility only. The caller compares identities and
    /// supplies whether the actor shares the requester's department.
    pub fn can_perform_action(
        &self,
        actor_role: Role,
        action: Action,
        leave_type: LeaveType,
        requester: Role,
        position: usize,
        same_department: bool,
    ) -> bool {
        self.check_role(
            actor_role,
            action,
            StepKind::Leave,
            leave_type,
            requester,
            position,
            same_department,
        )
        .is_ok()
    }

    /// The single allow/deny decision for an approver action.
    pub fn authorize(&self, request: &AuthorizationRequest<'_>) -> Result<(), LeaveError> {
        if request.actor_id == request.requester_id
            && matches!(request.action, Action::Approve | Action::Forward)
        {
            return Err(LeaveError::SelfApprovalForbidden);
        }

        self.check_role(
            request.actor_role,
            request.action,
            request.kind,
            request.leave_type,
            request.requester_role,
            request.position,
            request.same_department,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn check_role(
        &self,
        actor_role: Role,
        action: Action,
        kind: StepKind,
        leave_type: LeaveType,
        requester: Role,
        position: usize,
        same_department: bool,
    ) -> Result<(), LeaveError> {
        let chain = self.chain_for_kind(kind, leave_type, requester)?;
        let step_role = *chain.get(position).ok_or(LeaveError::Forbidden {
            role: actor_role,
            action: action.as_str(),
            reason: "no open step at this position",
        })?;
        let last = chain.len() - 1;
        let final_role = chain[last];

        if action == Action::Approve && actor_role == final_role && position != last {
            return Err(LeaveError::NotFinalApprover {
                role: actor_role,
                final_role,
            });
        }
        if actor_role != step_role {
            return Err(LeaveError::Forbidden {
                role: actor_role,
                action: action.as_str(),
                reason: "role does not hold the current step",
            });
        }
        if self.policy.is_department_scoped(actor_role) && !same_department {
            return Err(LeaveError::Forbidden {
                role: actor_role,
                action: action.as_str(),
                reason: "requester is outside the approver's department",
            });
        }
        if action == Action::Approve && self.policy.is_non_approving(actor_role) {
            return Err(LeaveError::Forbidden {
                role: actor_role,
                action: action.as_str(),
                reason: "role may forward, return or reject but not approve",
            });
        }
        if action == Action::Forward && position == last {
            return Err(LeaveError::Forbidden {
                role: actor_role,
                action: action.as_str(),
                reason: "final step must approve or reject",
            });
        }
        if action == Action::Return && kind == StepKind::Cancellation {
            return Err(LeaveError::Forbidden {
                role: actor_role,
                action: action.as_str(),
                reason: "cancellation reviews cannot be returned",
            });
        }

        Ok(())
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new(WorkflowPolicy::standard())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth<'a>(
        actor_id: &'a str,
        actor_role: Role,
        action: Action,
        position: usize,
    ) -> AuthorizationRequest<'a> {
        AuthorizationRequest {
            actor_id,
            actor_role,
            requester_id: "emp",
            requester_role: Role::Employee,
            action,
            leave_type: LeaveType::Casual,
            kind: StepKind::Leave,
            position,
            same_department: true,
        }
    }

    #[test]
    fn standard_chains_route_through_hr() {
        let engine = WorkflowEngine::default();

        assert_eq!(
            engine.chain_for(LeaveType::Casual, Role::Employee).unwrap(),
            &[Role::DeptHead, Role::HrAdmin, Role::HrHead]
        );
        assert_eq!(
            engine.chain_for(LeaveType::Maternity, Role::Employee).unwrap(),
            &[Role::DeptHead, Role::HrAdmin, Role::HrHead, Role::Ceo]
        );
        assert_eq!(
            engine.chain_for(LeaveType::Earned, Role::HrAdmin).unwrap(),
            &[Role::HrHead, Role::Ceo]
        );
        assert!(engine.is_final_approver(Role::HrHead, LeaveType::Casual, Role::Employee));
        assert!(!engine.is_final_approver(Role::DeptHead, LeaveType::Casual, Role::Employee));
    }

    #[test]
    fn standard_table_passes_validation() {
        let standard = WorkflowPolicy::standard();
        let rebuilt = WorkflowPolicy::new(
            standard.chains.clone(),
            standard.non_approving.clone(),
            standard.department_scoped.clone(),
        );
        assert!(rebuilt.is_ok());
    }

    #[test]
    fn unmapped_pair_is_a_config_error() {
        let mut chains = WorkflowPolicy::standard().chains;
        chains.remove(&(LeaveType::Paternity, Role::Employee));

        let result = WorkflowPolicy::new(chains, HashSet::new(), HashSet::new());
        assert!(matches!(result, Err(LeaveError::Config(_))));
    }

    #[test]
    fn non_approving_role_cannot_close_a_chain() {
        let mut chains = WorkflowPolicy::standard().chains;
        chains.insert((LeaveType::Casual, Role::Employee), vec![Role::DeptHead, Role::HrAdmin]);

        let result = WorkflowPolicy::new(chains, HashSet::from([Role::HrAdmin]), HashSet::new());
        assert!(matches!(result, Err(LeaveError::Config(_))));
    }

    #[test]
    fn self_approval_is_refused_before_role_checks() {
        let engine = WorkflowEngine::default();
        let mut request = auth("emp", Role::DeptHead, Action::Approve, 0);
        request.requester_role = Role::Employee;

        assert!(matches!(
            engine.authorize(&request),
            Err(LeaveError::SelfApprovalForbidden)
        ));
    }

    #[test]
    fn hr_admin_forwards_but_never_approves() {
        let engine = WorkflowEngine::default();

        assert!(engine.authorize(&auth("hr", Role::HrAdmin, Action::Forward, 1)).is_ok());
        assert!(engine.authorize(&auth("hr", Role::HrAdmin, Action::Reject, 1)).is_ok());
        assert!(matches!(
            engine.authorize(&auth("hr", Role::HrAdmin, Action::Approve, 1)),
            Err(LeaveError::Forbidden { .. })
        ));
    }

    #[test]
    fn final_role_cannot_jump_ahead() {
        let engine = WorkflowEngine::default();

        assert!(matches!(
            engine.authorize(&auth("boss", Role::HrHead, Action::Approve, 0)),
            Err(LeaveError::NotFinalApprover {
                role: Role::HrHead,
                final_role: Role::HrHead
            })
        ));
    }

    #[test]
    fn final_step_cannot_forward() {
        let engine = WorkflowEngine::default();

        assert!(matches!(
            engine.authorize(&auth("boss", Role::HrHead, Action::Forward, 2)),
            Err(LeaveError::Forbidden { .. })
        ));
        assert!(engine.authorize(&auth("boss", Role::HrHead, Action::Approve, 2)).is_ok());
    }

    #[test]
    fn department_head_is_scoped() {
        let engine = WorkflowEngine::default();

        assert!(engine.can_perform_action(
            Role::DeptHead,
            Action::Approve,
            LeaveType::Casual,
            Role::Employee,
            0,
            true
        ));
        assert!(!engine.can_perform_action(
            Role::DeptHead,
            Action::Approve,
            LeaveType::Casual,
            Role::Employee,
            0,
            false
        ));
    }

    #[test]
    fn cancellation_review_defaults_to_final_approver() {
        let engine = WorkflowEngine::default();

        assert_eq!(
            engine
                .cancellation_chain_for(LeaveType::Special, Role::Employee)
                .unwrap(),
            &[Role::Ceo]
        );

        let mut request = auth("boss", Role::HrHead, Action::Return, 0);
        request.kind = StepKind::Cancellation;
        assert!(matches!(
            engine.authorize(&request),
            Err(LeaveError::Forbidden { .. })
        ));
    }

    #[test]
    fn cancellation_chain_override_is_validated() {
        let policy = WorkflowPolicy::standard()
            .with_cancellation_chain(
                LeaveType::Casual,
                Role::Employee,
                vec![Role::HrAdmin, Role::HrHead],
            )
            .unwrap();
        let engine = WorkflowEngine::new(policy);
        assert_eq!(
            engine
                .cancellation_chain_for(LeaveType::Casual, Role::Employee)
                .unwrap(),
            &[Role::HrAdmin, Role::HrHead]
        );
        // other pairs keep the default
        assert_eq!(
            engine
                .cancellation_chain_for(LeaveType::Earned, Role::Employee)
                .unwrap(),
            &[Role::HrHead]
        );

        let ends_with_hr_admin = WorkflowPolicy::standard().with_cancellation_chain(
            LeaveType::Casual,
            Role::Employee,
            vec![Role::HrHead, Role::HrAdmin],
        );
        assert!(matches!(ends_with_hr_admin, Err(LeaveError::Config(_))));
    }
}
