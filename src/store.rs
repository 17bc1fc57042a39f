//! Relational store: typed gateway trait, MySQL implementation, and the
//! persisted sync cursor.

pub mod cursor;
pub mod gateway;
pub mod mysql;
pub mod types;

pub use cursor::SyncCursor;
pub use gateway::Store;
pub use mysql::MySqlStore;
pub use types::{ChannelRecord, PostRecord, StaffRole, ThreadRecord};
