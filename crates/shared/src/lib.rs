//! creditsync Shared Types and Utilities
//!
//! Ledger, subscription and payment records shared by the billing engine,
//! the HTTP API and the maintenance worker.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
