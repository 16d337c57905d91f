//! Transactions with snapshot isolation and optimistic concurrency.
//!
//! VineDB transactions provide:
//! - **Atomicity**: record versions and index changes publish together or not at all
//! - **Isolation**: snapshot reads; readers never see uncommitted changes
//! - **Read-your-writes**: index reads overlay the transaction's staged changes
//! - **Conflict detection**: record versions are validated at commit

mod manager;
mod state;

pub use manager::{CleanupStats, TransactionManager};
pub use state::{Transaction, TransactionState};
