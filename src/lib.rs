pub mod audit;
pub mod calendar;
pub mod config;
pub mod context;
pub mod conversion;
pub mod directory;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;
pub mod workflow;

pub use error::{ErrorKind, LeaveError};
pub use service::LeaveService;
