//! Append-only audit trail. Entries are produced inside a unit of work and
//! handed to the sink only after the unit commits; a failing sink is logged
//! and never rolls back the primary transaction.
use super::context::LeaveStatus;
use super::types::{Action, LeaveType, TimeStamp};
use chrono::Utc;
use std::sync::{Arc, Mutex};

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub enum AuditEvent {
    #[n(0)]
    Submitted {
        #[n(0)]
        working_days: u32,
        #[n(1)]
        round: u32,
    },
    #[n(1)]
    Decided {
        #[n(0)]
        step: u32,
        #[n(1)]
        action: Action,
        #[n(2)]
        status: LeaveStatus,
    },
    #[n(2)]
    StatusChanged {
        #[n(0)]
        from: LeaveStatus,
        #[n(1)]
        to: LeaveStatus,
    },
    #[n(3)]
    BalanceDeducted {
        #[n(0)]
        leave_type: LeaveType,
        #[n(1)]
        year: i32,
        #[n(2)]
        days: u32,
        #[n(3)]
        used_after: u32,
    },
    #[n(4)]
    BalanceRestored {
        #[n(0)]
        leave_type: LeaveType,
        #[n(1)]
        year: i32,
        #[n(2)]
        days: u32,
        #[n(3)]
        used_after: u32,
        #[n(4)]
        reason: String,
    },
    #[n(5)]
    BalanceProvisioned {
        #[n(0)]
        leave_type: LeaveType,
        #[n(1)]
        year: i32,
        #[n(2)]
        opening: u32,
        #[n(3)]
        accrued: u32,
    },
    #[n(6)]
    ExtensionOpened {
        #[n(0)]
        parent_id: String,
    },
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct AuditEntry {
    #[n(0)]
    pub subject: String, // request id or balance key
    #[n(1)]
    pub actor_id: String,
    #[n(2)]
    pub recorded_at: TimeStamp<Utc>,
    #[n(3)]
    pub event: AuditEvent,
}

impl AuditEntry {
    pub fn new(subject: impl Into<String>, actor_id: impl Into<String>, event: AuditEvent) -> Self {
        Self {
            subject: subject.into(),
            actor_id: actor_id.into(),
            recorded_at: TimeStamp::new(),
            event,
        }
    }

    /// Content address and CBOR body of the entry.
    pub fn build(&self) -> anyhow::Result<(String, Vec<u8>)> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}

pub trait AuditSink: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> anyhow::Result<()>;
}

/// Stores entries in their own sled tree, keyed by content hash.
pub struct SledAuditSink {
    tree: sled::Tree,
}

impl SledAuditSink {
    pub const TREE: &'static str = "audit";

    pub fn open(instance: &sled::Db) -> Result<Self, sled::Error> {
        Ok(Self {
            tree: instance.open_tree(Self::TREE)?,
        })
    }

    pub fn entries(&self) -> anyhow::Result<Vec<AuditEntry>> {
        let mut entries: Vec<AuditEntry> = Vec::new();
        for item in self.tree.iter() {
            let (_, value) = item?;
            entries.push(minicbor::decode(&value)?);
        }
        entries.sort_by_key(|entry| entry.recorded_at.to_datetime_utc());
        Ok(entries)
    }
}

impl AuditSink for SledAuditSink {
    fn append(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        let (hash, cbor) = entry.build()?;
        self.tree.insert(hash.as_bytes(), cbor)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("audit buffer poisoned"))?
            .push(entry.clone());
        Ok(())
    }
}

/// Hands committed entries to the sink, logging failures.
pub fn publish(sink: &Arc<dyn AuditSink>, entries: Vec<AuditEntry>) {
    for entry in entries {
        if let Err(error) = sink.append(&entry) {
            tracing::warn!(
                subject = %entry.subject,
                %error,
                "failed to write audit entry"
            );
        }
    }
}
