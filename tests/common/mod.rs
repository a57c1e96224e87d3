//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use anyhow::Context;
use chrono::NaiveDate;
use leave_approval::{
    LeaveService,
    audit::MemoryAuditSink,
    calendar::{FixedClock, StaticHolidays},
    config::EngineConfig,
    conversion::ConversionPolicy,
    directory::StaticDirectory,
    notify::RecordingNotifier,
    types::{Identity, LeaveType, Role},
};
use std::sync::Arc;
use tempfile::TempDir;

pub const EMPLOYEE: &str = "emp_alice";
pub const COLLEAGUE: &str = "emp_bob";
pub const DEPT_HEAD: &str = "head_carol";
pub const SECOND_HEAD: &str = "head_dave";
pub const OTHER_HEAD: &str = "head_erin";
pub const HR_ADMIN: &str = "hr_frank";
pub const HR_HEAD: &str = "hrhead_grace";
pub const CEO: &str = "ceo_heidi";

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn directory() -> StaticDirectory {
    StaticDirectory::new()
        .with_user(Identity::new(EMPLOYEE, Role::Employee, "eng"))
        .with_user(Identity::new(COLLEAGUE, Role::Employee, "eng"))
        .with_user(Identity::new(DEPT_HEAD, Role::DeptHead, "eng"))
        .with_user(Identity::new(SECOND_HEAD, Role::DeptHead, "eng"))
        .with_user(Identity::new(OTHER_HEAD, Role::DeptHead, "ops"))
        .with_user(Identity::new(HR_ADMIN, Role::HrAdmin, "people"))
        .with_user(Identity::new(HR_HEAD, Role::HrHead, "people"))
        .with_user(Identity::new(CEO, Role::Ceo, "exec"))
}

pub struct Harness {
    // keeps the database directory alive for the test
    _dir: TempDir,
    pub service: LeaveService,
    pub audit: Arc<MemoryAuditSink>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new(today: NaiveDate) -> anyhow::Result<Self> {
        Self::build(today, directory(), None)
    }

    pub fn with_conversion(today: NaiveDate, policy: ConversionPolicy) -> anyhow::Result<Self> {
        Self::build(today, directory(), Some(policy))
    }

    pub fn with_directory(today: NaiveDate, directory: StaticDirectory) -> anyhow::Result<Self> {
        Self::build(today, directory, None)
    }

    fn build(
        today: NaiveDate,
        directory: StaticDirectory,
        policy: Option<ConversionPolicy>,
    ) -> anyhow::Result<Self> {
        // Sled locks its directory, so every test gets its own database.
        let dir = tempfile::tempdir()?;
        let db = Arc::new(sled::open(dir.path().join("leave.db"))?);

        let audit = Arc::new(MemoryAuditSink::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let holidays = Arc::new(StaticHolidays::new([date(2025, 12, 25)]));

        let mut service = LeaveService::new(
            db,
            Arc::new(directory),
            holidays,
            EngineConfig::default(),
        )
        .context("building service")?
        .with_audit_sink(audit.clone())
        .with_notifier(notifier.clone())
        .with_clock(Arc::new(FixedClock(today)));
        if let Some(policy) = policy {
            service = service.with_conversion_policy(policy);
        }

        Ok(Self {
            _dir: dir,
            service,
            audit,
            notifier,
        })
    }

    /// Rebuilds the service with extra builder calls applied.
    pub fn configure(mut self, f: impl FnOnce(LeaveService) -> LeaveService) -> Self {
        self.service = f(self.service);
        self
    }

    pub fn provision(
        &self,
        employee_id: &str,
        leave_type: LeaveType,
        opening: u32,
        accrued: u32,
    ) -> anyhow::Result<()> {
        self.service
            .ledger()
            .provision(employee_id, leave_type, 2025, opening, accrued)
            .with_context(|| format!("provisioning {leave_type} for {employee_id}"))?;
        Ok(())
    }

    pub fn used(&self, employee_id: &str, leave_type: LeaveType) -> anyhow::Result<u32> {
        let row = self
            .service
            .ledger()
            .balance(employee_id, leave_type, 2025)?
            .context("balance row missing")?;
        Ok(row.used)
    }

    /// Walks an employee request through DEPT_HEAD, HR_ADMIN and HR_HEAD.
    pub fn approve_through_chain(&self, request_id: &str) -> anyhow::Result<()> {
        self.service
            .approve(request_id, DEPT_HEAD, None)
            .context("department head approval")?;
        self.service
            .forward(request_id, HR_ADMIN, Some("documents checked".into()))
            .context("hr admin forward")?;
        self.service
            .approve(request_id, HR_HEAD, None)
            .context("hr head approval")?;
        Ok(())
    }
}
