//! The persisted sync cursor and its wire format.
//!
//! One row in the `config` table, key `sync_state`, value
//! `{"last_sync":"1970-01-01T00:00:00.000Z","is_first_run":1}`.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Config-table key under which the cursor lives.
pub const CURSOR_KEY: &str = "sync_state";

/// Sync watermark state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCursor {
    /// Start-of-run timestamp of the last successful sync.
    pub last_sync: DateTime<Utc>,
    pub is_first_run: bool,
}

impl Default for SyncCursor {
    fn default() -> Self {
        Self {
            last_sync: DateTime::<Utc>::UNIX_EPOCH,
            is_first_run: true,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CursorWire {
    last_sync: String,
    is_first_run: u8,
}

impl SyncCursor {
    /// Serialize to the stored JSON blob.
    pub fn to_wire(self) -> String {
        let wire = CursorWire {
            last_sync: format_iso_millis(self.last_sync),
            is_first_run: u8::from(self.is_first_run),
        };
        serde_json::to_string(&wire).expect("cursor wire struct serializes")
    }

    /// Parse the stored JSON blob.
    pub fn from_wire(value: &str) -> Result<Self, StoreError> {
        let wire: CursorWire = serde_json::from_str(value)
            .map_err(|error| StoreError::MalformedCursor(error.to_string()))?;
        let last_sync = DateTime::parse_from_rfc3339(&wire.last_sync)
            .map_err(|error| StoreError::MalformedCursor(error.to_string()))?
            .with_timezone(&Utc);

        Ok(Self {
            last_sync,
            is_first_run: wire.is_first_run != 0,
        })
    }
}

/// ISO-8601 with millisecond precision and a `Z` suffix.
pub fn format_iso_millis(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}
