//! The balance ledger: the only code path that mutates balance rows.
//!
//! Every mutation reads, validates and writes inside one unit of work, so a
//! concurrent writer either observes the committed row or is re-run by the
//! store. The `*_in` variants run inside a caller's unit of work, which is
//! how the final approval couples its status change to the deduction.
use super::audit::{self, AuditEntry, AuditEvent, AuditSink};
use super::conversion::{Allocation, BalanceSnapshot, BalanceView};
use super::error::LeaveError;
use super::store::{Store, UnitOfWork, keys};
use super::types::LeaveType;
use std::collections::BTreeMap;
use std::sync::Arc;

const LEDGER_ACTOR: &str = "ledger";

/// Per-employee, per-type, per-year entitlement row.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    #[n(0)]
    pub employee_id: String,
    #[n(1)]
    pub leave_type: LeaveType,
    #[n(2)]
    pub year: i32,
    #[n(3)]
    pub opening: u32, // carried forward
    #[n(4)]
    pub accrued: u32,
    #[n(5)]
    pub used: u32,
    #[n(6)]
    pub closing: u32, // always opening + accrued - used
}

impl Balance {
    pub fn new(
        employee_id: impl Into<String>,
        leave_type: LeaveType,
        year: i32,
        opening: u32,
        accrued: u32,
    ) -> Self {
        Self {
            employee_id: employee_id.into(),
            leave_type,
            year,
            opening,
            accrued,
            used: 0,
            closing: opening + accrued,
        }
    }

    pub fn entitlement(&self) -> u32 {
        self.opening + self.accrued
    }

    pub fn available(&self) -> u32 {
        self.entitlement().saturating_sub(self.used)
    }

    pub fn is_consistent(&self) -> bool {
        self.used <= self.entitlement() && self.closing == self.entitlement() - self.used
    }

    fn view(&self) -> BalanceView {
        BalanceView {
            available: self.available(),
            used: self.used,
        }
    }
}

/// Sums allocations per type so a split touching one type twice is
/// validated against the combined requirement.
pub fn totals_by_type(allocations: &[Allocation]) -> BTreeMap<LeaveType, u32> {
    let mut combined = BTreeMap::new();
    for allocation in allocations {
        *combined.entry(allocation.leave_type).or_insert(0) += allocation.days;
    }
    combined
}

#[derive(Clone)]
pub struct BalanceLedger {
    store: Store,
    audit: Arc<dyn AuditSink>,
}

impl BalanceLedger {
    pub fn new(store: Store, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    pub fn balance(
        &self,
        employee_id: &str,
        leave_type: LeaveType,
        year: i32,
    ) -> Result<Option<Balance>, LeaveError> {
        self.store.load_balance(employee_id, leave_type, year)
    }

    /// Current-year view of every provisioned type for `employee_id`.
    pub fn snapshot(&self, employee_id: &str, year: i32) -> Result<BalanceSnapshot, LeaveError> {
        let mut snapshot = BalanceSnapshot::new();
        for leave_type in LeaveType::ALL {
            if let Some(balance) = self.balance(employee_id, leave_type, year)? {
                snapshot.insert(leave_type, balance.view());
            }
        }
        Ok(snapshot)
    }

    /// Creates a balance row. Provisioning is owned by HR; the ledger only
    /// refuses to overwrite an existing row.
    pub fn provision(
        &self,
        employee_id: &str,
        leave_type: LeaveType,
        year: i32,
        opening: u32,
        accrued: u32,
    ) -> Result<Balance, LeaveError> {
        let (balance, journal) = self.store.unit_of_work(|work| {
            if work.load_balance(employee_id, leave_type, year)?.is_some() {
                return Err(LeaveError::BalanceExists {
                    employee_id: employee_id.to_string(),
                    leave_type,
                    year,
                });
            }
            let balance = Balance::new(employee_id, leave_type, year, opening, accrued);
            work.save_balance(&balance)?;
            work.record(AuditEntry::new(
                keys::balance(employee_id, leave_type, year),
                LEDGER_ACTOR,
                AuditEvent::BalanceProvisioned {
                    leave_type,
                    year,
                    opening,
                    accrued,
                },
            ));
            Ok(balance)
        })?;

        audit::publish(&self.audit, journal);
        Ok(balance)
    }

    /// Rolls a row into the next year, carrying at most `max_carry` days.
    pub fn carry_forward(
        &self,
        employee_id: &str,
        leave_type: LeaveType,
        from_year: i32,
        max_carry: u32,
    ) -> Result<Balance, LeaveError> {
        let to_year = from_year + 1;
        let (balance, journal) = self.store.unit_of_work(|work| {
            let previous = work
                .load_balance(employee_id, leave_type, from_year)?
                .ok_or_else(|| LeaveError::BalanceNotFound {
                    employee_id: employee_id.to_string(),
                    leave_type,
                    year: from_year,
                })?;
            if work.load_balance(employee_id, leave_type, to_year)?.is_some() {
                return Err(LeaveError::BalanceExists {
                    employee_id: employee_id.to_string(),
                    leave_type,
                    year: to_year,
                });
            }

            let opening = previous.closing.min(max_carry);
            let balance = Balance::new(employee_id, leave_type, to_year, opening, 0);
            work.save_balance(&balance)?;
            work.record(AuditEntry::new(
                keys::balance(employee_id, leave_type, to_year),
                LEDGER_ACTOR,
                AuditEvent::BalanceProvisioned {
                    leave_type,
                    year: to_year,
                    opening,
                    accrued: 0,
                },
            ));
            Ok(balance)
        })?;

        audit::publish(&self.audit, journal);
        Ok(balance)
    }

    pub fn deduct(
        &self,
        employee_id: &str,
        leave_type: LeaveType,
        days: u32,
        year: i32,
    ) -> Result<Balance, LeaveError> {
        let allocation = [Allocation::new(leave_type, days, "deduct")];
        let mut rows = self.deduct_multiple(employee_id, &allocation, year)?;
        rows.pop().ok_or_else(|| LeaveError::BalanceNotFound {
            employee_id: employee_id.to_string(),
            leave_type,
            year,
        })
    }

    pub fn restore(
        &self,
        employee_id: &str,
        leave_type: LeaveType,
        days: u32,
        year: i32,
        reason: &str,
    ) -> Result<Balance, LeaveError> {
        let allocation = [Allocation::new(leave_type, days, reason)];
        let mut rows = self.restore_multiple(employee_id, &allocation, year, reason)?;
        rows.pop().ok_or_else(|| LeaveError::BalanceNotFound {
            employee_id: employee_id.to_string(),
            leave_type,
            year,
        })
    }

    /// Deducts every allocation or none of them.
    pub fn deduct_multiple(
        &self,
        employee_id: &str,
        allocations: &[Allocation],
        year: i32,
    ) -> Result<Vec<Balance>, LeaveError> {
        let (rows, journal) = self.store.unit_of_work(|work| {
            Self::deduct_in(work, LEDGER_ACTOR, employee_id, allocations, year)
        })?;

        audit::publish(&self.audit, journal);
        Ok(rows)
    }

    pub fn restore_multiple(
        &self,
        employee_id: &str,
        allocations: &[Allocation],
        year: i32,
        reason: &str,
    ) -> Result<Vec<Balance>, LeaveError> {
        let (rows, journal) = self.store.unit_of_work(|work| {
            Self::restore_in(work, LEDGER_ACTOR, employee_id, allocations, year, reason)
        })?;

        audit::publish(&self.audit, journal);
        Ok(rows)
    }

    /// Validates every row before writing any of them; nothing is written
    /// if one allocation exceeds its available balance.
    pub fn deduct_in(
        work: &mut UnitOfWork<'_>,
        actor_id: &str,
        employee_id: &str,
        allocations: &[Allocation],
        year: i32,
    ) -> Result<Vec<Balance>, LeaveError> {
        let combined = totals_by_type(allocations);

        let mut rows = Vec::with_capacity(combined.len());
        for (&leave_type, &days) in &combined {
            let balance = work
                .load_balance(employee_id, leave_type, year)?
                .ok_or_else(|| LeaveError::BalanceNotFound {
                    employee_id: employee_id.to_string(),
                    leave_type,
                    year,
                })?;
            let available = balance.available();
            if days > available {
                return Err(LeaveError::InsufficientBalance {
                    leave_type,
                    available,
                    required: days,
                });
            }
            rows.push((balance, days));
        }

        let mut updated = Vec::with_capacity(rows.len());
        for (mut balance, days) in rows {
            balance.used += days;
            balance.closing -= days;
            work.save_balance(&balance)?;
            work.record(AuditEntry::new(
                keys::balance(employee_id, balance.leave_type, year),
                actor_id,
                AuditEvent::BalanceDeducted {
                    leave_type: balance.leave_type,
                    year,
                    days,
                    used_after: balance.used,
                },
            ));
            tracing::debug!(
                employee = employee_id,
                leave_type = %balance.leave_type,
                days,
                used = balance.used,
                "balance deducted"
            );
            updated.push(balance);
        }

        Ok(updated)
    }

    /// Returns days to each row; `used` never drops below zero.
    pub fn restore_in(
        work: &mut UnitOfWork<'_>,
        actor_id: &str,
        employee_id: &str,
        allocations: &[Allocation],
        year: i32,
        reason: &str,
    ) -> Result<Vec<Balance>, LeaveError> {
        let combined = totals_by_type(allocations);

        let mut updated = Vec::with_capacity(combined.len());
        for (&leave_type, &days) in &combined {
            let mut balance = work
                .load_balance(employee_id, leave_type, year)?
                .ok_or_else(|| LeaveError::BalanceNotFound {
                    employee_id: employee_id.to_string(),
                    leave_type,
                    year,
                })?;

            balance.used = balance.used.saturating_sub(days);
            balance.closing = balance.entitlement() - balance.used;
            work.save_balance(&balance)?;
            work.record(AuditEntry::new(
                keys::balance(employee_id, leave_type, year),
                actor_id,
                AuditEvent::BalanceRestored {
                    leave_type,
                    year,
                    days,
                    used_after: balance.used,
                    reason: reason.to_string(),
                },
            ));
            tracing::debug!(
                employee = employee_id,
                leave_type = %leave_type,
                days,
                used = balance.used,
                reason,
                "balance restored"
            );
            updated.push(balance);
        }

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;

    fn ledger() -> (tempfile::TempDir, BalanceLedger, Arc<MemoryAuditSink>) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(sled::open(dir.path().join("ledger.db")).unwrap());
        let sink = Arc::new(MemoryAuditSink::new());
        let ledger = BalanceLedger::new(Store::open(db).unwrap(), sink.clone());
        (dir, ledger, sink)
    }

    #[test]
    fn deduct_then_restore_returns_the_row() {
        let (_dir, ledger, sink) = ledger();
        let before = ledger.provision("emp", LeaveType::Earned, 2025, 5, 15).unwrap();

        let after = ledger.deduct("emp", LeaveType::Earned, 6, 2025).unwrap();
        assert_eq!(after.used, 6);
        assert_eq!(after.closing, 14);
        assert!(after.is_consistent());

        let restored = ledger
            .restore("emp", LeaveType::Earned, 6, 2025, "CORRECTION")
            .unwrap();
        assert_eq!(restored, before);
        assert_eq!(sink.entries().len(), 3);
    }

    #[test]
    fn insufficient_balance_leaves_row_untouched() {
        let (_dir, ledger, _sink) = ledger();
        let before = ledger.provision("emp", LeaveType::Casual, 2025, 0, 5).unwrap();

        let err = ledger.deduct("emp", LeaveType::Casual, 7, 2025).unwrap_err();
        assert!(matches!(
            err,
            LeaveError::InsufficientBalance {
                leave_type: LeaveType::Casual,
                available: 5,
                required: 7
            }
        ));
        assert_eq!(
            ledger.balance("emp", LeaveType::Casual, 2025).unwrap(),
            Some(before)
        );
    }

    #[test]
    fn multiple_deduction_is_all_or_nothing() {
        let (_dir, ledger, _sink) = ledger();
        ledger.provision("emp", LeaveType::Medical, 2025, 0, 14).unwrap();
        ledger.provision("emp", LeaveType::Earned, 2025, 0, 2).unwrap();

        let allocations = [
            Allocation::new(LeaveType::Medical, 14, "requested"),
            Allocation::new(LeaveType::Earned, 4, "overflow from MEDICAL"),
        ];
        let err = ledger
            .deduct_multiple("emp", &allocations, 2025)
            .unwrap_err();
        assert!(matches!(err, LeaveError::InsufficientBalance { .. }));

        let medical = ledger.balance("emp", LeaveType::Medical, 2025).unwrap().unwrap();
        assert_eq!(medical.used, 0);
    }

    #[test]
    fn missing_row_is_reported() {
        let (_dir, ledger, _sink) = ledger();
        assert!(matches!(
            ledger.deduct("ghost", LeaveType::Casual, 1, 2025),
            Err(LeaveError::BalanceNotFound { .. })
        ));
        assert!(matches!(
            ledger.restore("ghost", LeaveType::Casual, 1, 2025, "CORRECTION"),
            Err(LeaveError::BalanceNotFound { .. })
        ));
    }

    #[test]
    fn restore_floors_used_at_zero() {
        let (_dir, ledger, _sink) = ledger();
        ledger.provision("emp", LeaveType::Casual, 2025, 0, 10).unwrap();
        ledger.deduct("emp", LeaveType::Casual, 2, 2025).unwrap();

        let row = ledger
            .restore("emp", LeaveType::Casual, 5, 2025, "CORRECTION")
            .unwrap();
        assert_eq!(row.used, 0);
        assert_eq!(row.closing, 10);
    }

    #[test]
    fn provisioning_twice_is_refused() {
        let (_dir, ledger, _sink) = ledger();
        ledger.provision("emp", LeaveType::Casual, 2025, 0, 10).unwrap();
        assert!(matches!(
            ledger.provision("emp", LeaveType::Casual, 2025, 0, 10),
            Err(LeaveError::BalanceExists { .. })
        ));
    }

    #[test]
    fn carry_forward_caps_the_opening() {
        let (_dir, ledger, _sink) = ledger();
        ledger.provision("emp", LeaveType::Earned, 2024, 0, 30).unwrap();
        ledger.deduct("emp", LeaveType::Earned, 5, 2024).unwrap();

        let next = ledger
            .carry_forward("emp", LeaveType::Earned, 2024, 20)
            .unwrap();
        assert_eq!((next.year, next.opening, next.closing), (2025, 20, 20));

        let snapshot = ledger.snapshot("emp", 2025).unwrap();
        assert_eq!(snapshot[&LeaveType::Earned].available, 20);
    }
}
