//! Sled-backed persistence and the scoped unit of work.
//!
//! Every durable record lives in one tree so that a single serializable
//! transaction can cover a request, its approval steps and the balance rows
//! it touches. Keys are prefixed by record kind:
//!
//! - `request/{id}` -> [`LeaveContext`]
//! - `balance/{employee}/{type}/{year}` -> [`Balance`]
//! - `employee/{employee}` -> list of the employee's request ids
//! - `extension/{parent}` -> list of extension request ids
use super::audit::AuditEntry;
use super::context::LeaveContext;
use super::error::LeaveError;
use super::ledger::Balance;
use super::types::LeaveType;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use std::sync::Arc;

pub mod keys {
    use crate::types::LeaveType;

    pub fn request(id: &str) -> String {
        format!("request/{id}")
    }

    pub fn balance(employee_id: &str, leave_type: LeaveType, year: i32) -> String {
        format!("balance/{employee_id}/{}/{year}", leave_type.as_str())
    }

    pub fn employee(employee_id: &str) -> String {
        format!("employee/{employee_id}")
    }

    pub fn extensions(parent_id: &str) -> String {
        format!("extension/{parent_id}")
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
struct IdList(#[n(0)] Vec<String>);

#[derive(Clone)]
pub struct Store {
    tree: sled::Tree,
}

impl Store {
    pub const TREE: &'static str = "leave";

    pub fn open(instance: Arc<sled::Db>) -> Result<Self, LeaveError> {
        let tree = instance.open_tree(Self::TREE)?;
        Ok(Self { tree })
    }

    /// Runs `f` as one atomic unit. `f` may be re-run when sled detects a
    /// conflicting writer, so it must only touch state through the handle.
    /// On commit the audit entries journalled by `f` are returned.
    pub fn unit_of_work<T, F>(&self, f: F) -> Result<(T, Vec<AuditEntry>), LeaveError>
    where
        F: Fn(&mut UnitOfWork<'_>) -> Result<T, LeaveError>,
    {
        let outcome = self.tree.transaction(|tx| {
            let mut work = UnitOfWork {
                tx,
                journal: Vec::new(),
            };
            match f(&mut work) {
                Ok(value) => Ok((value, work.journal)),
                Err(LeaveError::Transaction(interrupted)) => Err(interrupted.into()),
                Err(error) => Err(ConflictableTransactionError::Abort(error)),
            }
        });

        match outcome {
            Ok(committed) => Ok(committed),
            Err(TransactionError::Abort(error)) => Err(error),
            Err(TransactionError::Storage(error)) => Err(LeaveError::Storage(error)),
        }
    }

    fn get<T>(&self, key: &str) -> Result<Option<T>, LeaveError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match self.tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn load_context(&self, request_id: &str) -> Result<LeaveContext, LeaveError> {
        self.get(&keys::request(request_id))?
            .ok_or_else(|| LeaveError::NotFound(request_id.to_string()))
    }

    pub fn load_balance(
        &self,
        employee_id: &str,
        leave_type: LeaveType,
        year: i32,
    ) -> Result<Option<Balance>, LeaveError> {
        self.get(&keys::balance(employee_id, leave_type, year))
    }

    /// Ids of every request filed by `employee_id`, oldest first.
    pub fn request_ids_for(&self, employee_id: &str) -> Result<Vec<String>, LeaveError> {
        let ids: Option<IdList> = self.get(&keys::employee(employee_id))?;
        Ok(ids.unwrap_or_default().0)
    }

    pub fn extension_ids(&self, parent_id: &str) -> Result<Vec<String>, LeaveError> {
        let ids: Option<IdList> = self.get(&keys::extensions(parent_id))?;
        Ok(ids.unwrap_or_default().0)
    }
}

/// Transactional handle passed to a unit of work.
pub struct UnitOfWork<'t> {
    tx: &'t TransactionalTree,
    journal: Vec<AuditEntry>,
}

impl UnitOfWork<'_> {
    fn get<T>(&self, key: &str) -> Result<Option<T>, LeaveError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match self.tx.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put<T: minicbor::Encode<()>>(&self, key: &str, value: &T) -> Result<(), LeaveError> {
        let cbor = minicbor::to_vec(value)?;
        self.tx.insert(key.as_bytes(), cbor)?;
        Ok(())
    }

    pub fn record(&mut self, entry: AuditEntry) {
        self.journal.push(entry);
    }

    pub fn load_context(&self, request_id: &str) -> Result<LeaveContext, LeaveError> {
        self.get(&keys::request(request_id))?
            .ok_or_else(|| LeaveError::NotFound(request_id.to_string()))
    }

    pub fn save_context(&self, ctx: &LeaveContext) -> Result<(), LeaveError> {
        self.put(&keys::request(ctx.id()), ctx)
    }

    /// Stores a new request and indexes it under its requester. Two
    /// requests filed at once both write the index, so sled serializes them.
    pub fn insert_context(&self, ctx: &LeaveContext) -> Result<(), LeaveError> {
        self.save_context(ctx)?;
        let mut ids = self.request_ids_for(&ctx.request.requester_id)?;
        ids.push(ctx.id().to_string());
        self.put(&keys::employee(&ctx.request.requester_id), &IdList(ids))
    }

    pub fn request_ids_for(&self, employee_id: &str) -> Result<Vec<String>, LeaveError> {
        let ids: Option<IdList> = self.get(&keys::employee(employee_id))?;
        Ok(ids.unwrap_or_default().0)
    }

    pub fn load_balance(
        &self,
        employee_id: &str,
        leave_type: LeaveType,
        year: i32,
    ) -> Result<Option<Balance>, LeaveError> {
        self.get(&keys::balance(employee_id, leave_type, year))
    }

    pub fn save_balance(&self, balance: &Balance) -> Result<(), LeaveError> {
        self.put(
            &keys::balance(&balance.employee_id, balance.leave_type, balance.year),
            balance,
        )
    }

    pub fn extension_ids(&self, parent_id: &str) -> Result<Vec<String>, LeaveError> {
        let ids: Option<IdList> = self.get(&keys::extensions(parent_id))?;
        Ok(ids.unwrap_or_default().0)
    }

    pub fn add_extension(&self, parent_id: &str, extension_id: &str) -> Result<(), LeaveError> {
        let mut ids = self.extension_ids(parent_id)?;
        ids.push(extension_id.to_string());
        self.put(&keys::extensions(parent_id), &IdList(ids))
    }
}
