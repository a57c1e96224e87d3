//! Policy-driven splitting of one leave request across several balance
//! buckets when a single type's cap would be exceeded.
use super::error::LeaveError;
use super::types::{LeaveType, TimeStamp};
use chrono::Utc;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapRule {
    /// Days of this type that may be consumed per calendar year.
    AnnualCap(u32),
    /// Days of this type that may be taken in a single request.
    ConsecutiveCap(u32),
}

impl CapRule {
    fn limit(&self) -> u32 {
        match self {
            CapRule::AnnualCap(n) | CapRule::ConsecutiveCap(n) => *n,
        }
    }

    fn remaining(&self, used_this_year: u32) -> u32 {
        match self {
            CapRule::AnnualCap(n) => n.saturating_sub(used_this_year),
            CapRule::ConsecutiveCap(n) => *n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypePolicy {
    pub cap: CapRule,
    /// Fallback types in priority order.
    pub fallbacks: Vec<LeaveType>,
    /// Conversion tag cited when this cap is the first one crossed.
    pub tag: String,
}

impl TypePolicy {
    pub fn new(cap: CapRule, fallbacks: Vec<LeaveType>, tag: impl Into<String>) -> Self {
        Self {
            cap,
            fallbacks,
            tag: tag.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversionPolicy {
    version: String,
    entries: HashMap<LeaveType, TypePolicy>,
}

impl ConversionPolicy {
    pub fn new(
        version: impl Into<String>,
        entries: HashMap<LeaveType, TypePolicy>,
    ) -> Result<Self, LeaveError> {
        for (leave_type, policy) in &entries {
            if policy.cap.limit() == 0 {
                return Err(LeaveError::Config(format!(
                    "cap for {leave_type} must be greater than zero"
                )));
            }
            if policy.fallbacks.contains(leave_type) {
                return Err(LeaveError::Config(format!(
                    "{leave_type} cannot fall back to itself"
                )));
            }
            let unique: HashSet<_> = policy.fallbacks.iter().collect();
            if unique.len() != policy.fallbacks.len() {
                return Err(LeaveError::Config(format!(
                    "{leave_type} lists a fallback type twice"
                )));
            }
        }

        Ok(Self {
            version: version.into(),
            entries,
        })
    }

    pub fn standard(version: impl Into<String>) -> Self {
        let entries = HashMap::from([
            (
                LeaveType::Medical,
                TypePolicy::new(
                    CapRule::AnnualCap(14),
                    vec![LeaveType::Earned, LeaveType::Casual],
                    "medical-split",
                ),
            ),
            (
                LeaveType::Casual,
                TypePolicy::new(
                    CapRule::ConsecutiveCap(3),
                    vec![LeaveType::Earned],
                    "casual-to-earned",
                ),
            ),
            (
                LeaveType::Earned,
                TypePolicy::new(
                    CapRule::AnnualCap(60),
                    vec![LeaveType::Special],
                    "earned-overflow",
                ),
            ),
            (
                LeaveType::Special,
                TypePolicy::new(CapRule::AnnualCap(120), vec![], "special-overflow"),
            ),
        ]);

        Self {
            version: version.into(),
            entries,
        }
    }

    /// A policy with no caps; every request maps onto its own type.
    pub fn uncapped(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            entries: HashMap::new(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn is_cap_eligible(&self, leave_type: LeaveType) -> bool {
        self.entries.contains_key(&leave_type)
    }

    pub fn policy_for(&self, leave_type: LeaveType) -> Option<&TypePolicy> {
        self.entries.get(&leave_type)
    }
}

/// Current-year view of one balance row, as consumed by the conversion walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceView {
    pub available: u32,
    pub used: u32,
}

pub type BalanceSnapshot = HashMap<LeaveType, BalanceView>;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    #[n(0)]
    pub leave_type: LeaveType,
    #[n(1)]
    pub days: u32,
    #[n(2)]
    pub reason: String,
}

impl Allocation {
    pub fn new(leave_type: LeaveType, days: u32, reason: impl Into<String>) -> Self {
        Self {
            leave_type,
            days,
            reason: reason.into(),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ConversionDetails {
    #[n(0)]
    pub original_type: LeaveType,
    #[n(1)]
    pub original_days: u32,
    #[n(2)]
    pub allocations: Vec<Allocation>,
    #[n(3)]
    pub conversion_type: String,
    #[n(4)]
    pub converted_at: TimeStamp<Utc>,
    #[n(5)]
    pub policy_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOutcome {
    pub allocations: Vec<Allocation>,
    pub details: Option<ConversionDetails>,
}

impl ConversionOutcome {
    pub fn total_days(&self) -> u32 {
        self.allocations.iter().map(|a| a.days).sum()
    }
}

pub struct ConversionEngine<'a> {
    policy: &'a ConversionPolicy,
}

impl<'a> ConversionEngine<'a> {
    pub fn new(policy: &'a ConversionPolicy) -> Self {
        Self { policy }
    }

    /// Allocates `days` of `leave_type` against the policy caps. The primary
    /// type is bounded by its cap only; each fallback is bounded by its cap
    /// and by the balance left in `snapshot`.
    pub fn convert(
        &self,
        leave_type: LeaveType,
        days: u32,
        snapshot: &BalanceSnapshot,
    ) -> Result<ConversionOutcome, LeaveError> {
        if days == 0 {
            return Err(LeaveError::NoWorkingDays);
        }

        let mut walk = Walk {
            snapshot,
            visited: HashSet::new(),
            allocations: Vec::new(),
            first_tag: None,
        };
        let remaining = self.allocate(&mut walk, leave_type, days, None);

        if remaining > 0 {
            return Err(LeaveError::NoCapacityAvailable {
                leave_type,
                requested: days,
                allocated: days - remaining,
            });
        }

        let Walk {
            allocations,
            first_tag,
            ..
        } = walk;

        let details = first_tag.map(|conversion_type| ConversionDetails {
            original_type: leave_type,
            original_days: days,
            allocations: allocations.clone(),
            conversion_type,
            converted_at: TimeStamp::new(),
            policy_version: self.policy.version().to_string(),
        });

        Ok(ConversionOutcome {
            allocations,
            details,
        })
    }

    fn allocate(
        &self,
        walk: &mut Walk<'_>,
        leave_type: LeaveType,
        days: u32,
        overflow_from: Option<LeaveType>,
    ) -> u32 {
        if !walk.visited.insert(leave_type) {
            return days;
        }

        let balance = walk.snapshot.get(&leave_type).copied().unwrap_or_default();
        let policy = self.policy.policy_for(leave_type);

        let mut capacity = policy.map_or(u32::MAX, |p| p.cap.remaining(balance.used));
        if overflow_from.is_some() {
            capacity = capacity.min(balance.available);
        }

        let taken = days.min(capacity);
        if taken > 0 {
            let reason = match overflow_from {
                None => "requested".to_string(),
                Some(source) => format!("overflow from {source}"),
            };
            walk.allocations.push(Allocation::new(leave_type, taken, reason));
        }

        let mut remaining = days - taken;
        if remaining == 0 {
            return 0;
        }

        if let Some(policy) = policy {
            if walk.first_tag.is_none() {
                walk.first_tag = Some(policy.tag.clone());
            }
            for fallback in &policy.fallbacks {
                if remaining == 0 {
                    break;
                }
                remaining = self.allocate(walk, *fallback, remaining, Some(leave_type));
            }
        }

        remaining
    }
}

struct Walk<'s> {
    snapshot: &'s BalanceSnapshot,
    visited: HashSet<LeaveType>,
    allocations: Vec<Allocation>,
    first_tag: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(available: u32, used: u32) -> BalanceView {
        BalanceView { available, used }
    }

    #[test]
    fn within_cap_yields_single_allocation_without_details() {
        let policy = ConversionPolicy::standard("test");
        let snapshot = BalanceSnapshot::from([(LeaveType::Medical, view(14, 0))]);

        let outcome = ConversionEngine::new(&policy)
            .convert(LeaveType::Medical, 5, &snapshot)
            .unwrap();

        assert_eq!(
            outcome.allocations,
            vec![Allocation::new(LeaveType::Medical, 5, "requested")]
        );
        assert!(outcome.details.is_none());
    }

    #[test]
    fn medical_overflow_splits_into_earned() {
        let policy = ConversionPolicy::standard("test");
        let snapshot = BalanceSnapshot::from([
            (LeaveType::Medical, view(14, 0)),
            (LeaveType::Earned, view(20, 0)),
        ]);

        let outcome = ConversionEngine::new(&policy)
            .convert(LeaveType::Medical, 18, &snapshot)
            .unwrap();

        let split: Vec<_> = outcome
            .allocations
            .iter()
            .map(|a| (a.leave_type, a.days))
            .collect();
        assert_eq!(split, vec![(LeaveType::Medical, 14), (LeaveType::Earned, 4)]);

        let details = outcome.details.unwrap();
        assert_eq!(details.conversion_type, "medical-split");
        assert_eq!(details.original_days, 18);
        assert_eq!(details.policy_version, "test");
    }

    #[test]
    fn annual_cap_accounts_for_days_already_used() {
        let policy = ConversionPolicy::standard("test");
        let snapshot = BalanceSnapshot::from([
            (LeaveType::Medical, view(4, 10)),
            (LeaveType::Earned, view(0, 0)),
            (LeaveType::Casual, view(10, 0)),
        ]);

        let outcome = ConversionEngine::new(&policy)
            .convert(LeaveType::Medical, 6, &snapshot)
            .unwrap();

        let split: Vec<_> = outcome
            .allocations
            .iter()
            .map(|a| (a.leave_type, a.days))
            .collect();
        // earned has no balance, so the second-priority fallback absorbs it
        assert_eq!(split, vec![(LeaveType::Medical, 4), (LeaveType::Casual, 2)]);
    }

    #[test]
    fn casual_overflow_chains_through_earned_into_special() {
        let policy = ConversionPolicy::standard("test");
        let snapshot = BalanceSnapshot::from([
            (LeaveType::Casual, view(10, 0)),
            (LeaveType::Earned, view(2, 0)),
            (LeaveType::Special, view(30, 0)),
        ]);

        let outcome = ConversionEngine::new(&policy)
            .convert(LeaveType::Casual, 8, &snapshot)
            .unwrap();

        let split: Vec<_> = outcome
            .allocations
            .iter()
            .map(|a| (a.leave_type, a.days))
            .collect();
        assert_eq!(
            split,
            vec![
                (LeaveType::Casual, 3),
                (LeaveType::Earned, 2),
                (LeaveType::Special, 3)
            ]
        );
        assert_eq!(
            outcome.details.as_ref().unwrap().conversion_type,
            "casual-to-earned"
        );
        assert_eq!(outcome.total_days(), 8);
    }

    #[test]
    fn exhausted_fallbacks_fail() {
        let policy = ConversionPolicy::standard("test");
        let snapshot = BalanceSnapshot::from([(LeaveType::Casual, view(10, 0))]);

        let err = ConversionEngine::new(&policy)
            .convert(LeaveType::Casual, 5, &snapshot)
            .unwrap_err();

        assert!(matches!(
            err,
            LeaveError::NoCapacityAvailable {
                leave_type: LeaveType::Casual,
                requested: 5,
                allocated: 3
            }
        ));
    }

    #[test]
    fn uncapped_types_pass_through() {
        let policy = ConversionPolicy::standard("test");
        let outcome = ConversionEngine::new(&policy)
            .convert(LeaveType::Paternity, 10, &BalanceSnapshot::new())
            .unwrap();

        assert_eq!(outcome.allocations.len(), 1);
        assert!(outcome.details.is_none());
    }

    #[test]
    fn self_fallback_is_a_configuration_error() {
        let entries = HashMap::from([(
            LeaveType::Earned,
            TypePolicy::new(CapRule::AnnualCap(60), vec![LeaveType::Earned], "loop"),
        )]);

        assert!(matches!(
            ConversionPolicy::new("bad", entries),
            Err(LeaveError::Config(_))
        ));
    }
}
