//! The ingestion and synchronization core: traversal, reconciliation,
//! orchestration, and the live-update path.

pub mod live;
pub mod orchestrator;
pub mod reconcile;
pub mod traversal;

pub use live::LiveHandler;
pub use orchestrator::{SyncOptions, SyncOrchestrator, SyncStats};
pub use reconcile::Reconciler;
pub use traversal::{SyncMode, Traversal};
