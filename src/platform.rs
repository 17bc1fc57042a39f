//! Chat-platform seam: internal types, the narrow client trait, and the
//! serenity-backed adapter.

pub mod discord;
pub mod traits;
pub mod types;

pub use traits::Platform;
pub use types::{ForumChannelRef, GuildRef, SourceAttachment, SourceMessage, ThreadRef};
