//! Forum mirror: syncs a chat platform's forum conversations into a
//! relational store so they become durable, searchable, and publishable.

pub mod config;
pub mod error;
pub mod identity;
pub mod media;
pub mod platform;
pub mod sanitize;
pub mod store;
pub mod sync;

pub use error::{Error, Result};
