//! Property-based tests for the balance ledger
//!
//! Every case opens its own sled database, so the case count is kept low.
//! The ledger is checked against a trivial model: `used` only moves by the
//! requested amount, and a refused deduction leaves the row exactly as it was.

use leave_approval::{
    LeaveError,
    audit::MemoryAuditSink,
    conversion::Allocation,
    ledger::{Balance, BalanceLedger},
    store::Store,
    types::LeaveType,
};
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::TempDir;

const EMPLOYEE: &str = "emp_prop";
const YEAR: i32 = 2025;

fn open_ledger() -> (TempDir, BalanceLedger) {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(sled::open(dir.path().join("ledger.db")).unwrap());
    let ledger = BalanceLedger::new(Store::open(db).unwrap(), Arc::new(MemoryAuditSink::new()));
    (dir, ledger)
}

fn row(ledger: &BalanceLedger, leave_type: LeaveType) -> Balance {
    ledger.balance(EMPLOYEE, leave_type, YEAR).unwrap().unwrap()
}

/// Deduct (true) or restore (false) a number of days.
fn operations() -> impl Strategy<Value = Vec<(bool, u32)>> {
    prop::collection::vec((any::<bool>(), 0u32..12), 1..20)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: no sequence of deductions and restorations drives a row
    /// negative, and `closing` always equals the derived value.
    #[test]
    fn prop_balance_never_goes_negative(
        opening in 0u32..10,
        accrued in 0u32..30,
        ops in operations(),
    ) {
        let (_dir, ledger) = open_ledger();
        ledger.provision(EMPLOYEE, LeaveType::Casual, YEAR, opening, accrued).unwrap();
        let entitlement = opening + accrued;
        let mut used = 0u32;

        for (deduct, days) in ops {
            let before = row(&ledger, LeaveType::Casual);

            if deduct {
                match ledger.deduct(EMPLOYEE, LeaveType::Casual, days, YEAR) {
                    Ok(after) => {
                        prop_assert!(days <= entitlement - used);
                        used += days;
                        prop_assert_eq!(after.used, used);
                    }
                    Err(LeaveError::InsufficientBalance { available, required, .. }) => {
                        prop_assert_eq!(available, entitlement - used);
                        prop_assert_eq!(required, days);
                        prop_assert_eq!(row(&ledger, LeaveType::Casual), before);
                    }
                    Err(other) => prop_assert!(false, "unexpected error: {}", other),
                }
            } else {
                let after = ledger
                    .restore(EMPLOYEE, LeaveType::Casual, days, YEAR, "CORRECTION")
                    .unwrap();
                used = used.saturating_sub(days);
                prop_assert_eq!(after.used, used);
            }

            let current = row(&ledger, LeaveType::Casual);
            prop_assert!(current.is_consistent());
            prop_assert!(current.used <= entitlement);
            prop_assert_eq!(current.closing, entitlement - current.used);
        }
    }

    /// Property: a deduction followed by a restoration of the same amount
    /// returns the row to its exact previous value.
    #[test]
    fn prop_deduct_then_restore_round_trips(
        accrued in 1u32..40,
        already_used in 0u32..40,
        days in 0u32..40,
    ) {
        let (_dir, ledger) = open_ledger();
        ledger.provision(EMPLOYEE, LeaveType::Earned, YEAR, 0, accrued).unwrap();
        let prior = already_used.min(accrued);
        ledger.deduct(EMPLOYEE, LeaveType::Earned, prior, YEAR).unwrap();
        let before = row(&ledger, LeaveType::Earned);

        prop_assume!(days <= before.available());

        ledger.deduct(EMPLOYEE, LeaveType::Earned, days, YEAR).unwrap();
        ledger
            .restore(EMPLOYEE, LeaveType::Earned, days, YEAR, "CORRECTION")
            .unwrap();

        prop_assert_eq!(row(&ledger, LeaveType::Earned), before);
    }

    /// Property: a multi-type deduction either applies to every row or to
    /// none of them.
    #[test]
    fn prop_multiple_deduction_is_all_or_nothing(
        medical in 0u32..20,
        earned in 0u32..20,
        want_medical in 0u32..20,
        want_earned in 0u32..20,
    ) {
        let (_dir, ledger) = open_ledger();
        ledger.provision(EMPLOYEE, LeaveType::Medical, YEAR, 0, medical).unwrap();
        ledger.provision(EMPLOYEE, LeaveType::Earned, YEAR, 0, earned).unwrap();

        let allocations = [
            Allocation::new(LeaveType::Medical, want_medical, "requested"),
            Allocation::new(LeaveType::Earned, want_earned, "overflow from MEDICAL"),
        ];
        let result = ledger.deduct_multiple(EMPLOYEE, &allocations, YEAR);

        let fits = want_medical <= medical && want_earned <= earned;
        prop_assert_eq!(result.is_ok(), fits);

        let (medical_used, earned_used) = if fits { (want_medical, want_earned) } else { (0, 0) };
        prop_assert_eq!(row(&ledger, LeaveType::Medical).used, medical_used);
        prop_assert_eq!(row(&ledger, LeaveType::Earned).used, earned_used);
    }
}
