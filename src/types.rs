//! Shared vocabulary: leave types, roles, actions and the date/time wrappers
//! used by every persisted record.
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use std::fmt;

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum LeaveType {
    #[n(0)]
    Casual,
    #[n(1)]
    Medical,
    #[n(2)]
    Earned,
    #[n(3)]
    Special,
    #[n(4)]
    ExtraWithPay,
    #[n(5)]
    ExtraWithoutPay,
    #[n(6)]
    Maternity,
    #[n(7)]
    Paternity,
}

impl LeaveType {
    pub const ALL: [LeaveType; 8] = [
        LeaveType::Casual,
        LeaveType::Medical,
        LeaveType::Earned,
        LeaveType::Special,
        LeaveType::ExtraWithPay,
        LeaveType::ExtraWithoutPay,
        LeaveType::Maternity,
        LeaveType::Paternity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveType::Casual => "CASUAL",
            LeaveType::Medical => "MEDICAL",
            LeaveType::Earned => "EARNED",
            LeaveType::Special => "SPECIAL",
            LeaveType::ExtraWithPay => "EXTRA_WITH_PAY",
            LeaveType::ExtraWithoutPay => "EXTRA_WITHOUT_PAY",
            LeaveType::Maternity => "MATERNITY",
            LeaveType::Paternity => "PATERNITY",
        }
    }
}

impl fmt::Display for LeaveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Organisational roles that take part in an approval chain.
#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum Role {
    #[n(0)]
    Employee,
    #[n(1)]
    DeptHead,
    #[n(2)]
    HrAdmin,
    #[n(3)]
    HrHead,
    #[n(4)]
    Ceo,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Employee,
        Role::DeptHead,
        Role::HrAdmin,
        Role::HrHead,
        Role::Ceo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Employee => "EMPLOYEE",
            Role::DeptHead => "DEPT_HEAD",
            Role::HrAdmin => "HR_ADMIN",
            Role::HrHead => "HR_HEAD",
            Role::Ceo => "CEO",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decisions an approver can take on the current step.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    #[n(0)]
    Approve,
    #[n(1)]
    Reject,
    #[n(2)]
    Forward,
    #[n(3)]
    Return,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Approve => "APPROVE",
            Action::Reject => "REJECT",
            Action::Forward => "FORWARD",
            Action::Return => "RETURN",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The acting user as resolved by the host's session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub role: Role,
    pub department: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, role: Role, department: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            department: department.into(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// A calendar date already normalised to the organisation's midnight.
/// Persisted as days from the common era so it carries no timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CalendarDay(NaiveDate);

impl CalendarDay {
    pub fn date(&self) -> NaiveDate {
        self.0
    }
    pub fn year(&self) -> i32 {
        self.0.year()
    }
    pub fn next(&self) -> CalendarDay {
        CalendarDay(self.0 + Duration::days(1))
    }
}

impl From<NaiveDate> for CalendarDay {
    fn from(value: NaiveDate) -> Self {
        CalendarDay(value)
    }
}

impl fmt::Display for CalendarDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<C> minicbor::Encode<C> for CalendarDay {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.i32(self.0.num_days_from_ce())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for CalendarDay {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let days = d.i32()?;

        NaiveDate::from_num_days_from_ce_opt(days)
            .map(CalendarDay)
            .ok_or(minicbor::decode::Error::message(
                "failed to convert day number to a calendar date",
            ))
    }
}
