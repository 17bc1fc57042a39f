//! Staff-role bootstrap from a CSV file.
//!
//! Two columns, no header: `discord_user_id,tag`. Whitespace is trimmed,
//! empty rows are skipped, and re-import overwrites `public_tag` keyed by
//! the hashed ID.

use crate::error::Result;
use crate::identity::IdentityHasher;
use crate::store::{StaffRole, Store};
use anyhow::Context as _;
use std::path::Path;

/// Parse and import staff roles, returning how many were upserted.
pub async fn import_staff_csv(
    path: &Path,
    hasher: &IdentityHasher,
    store: &dyn Store,
) -> Result<usize> {
    let rows = parse_staff_csv(path)?;
    let mut imported = 0;

    for (user_id, tag) in rows {
        let role = StaffRole {
            user_id_hash: hasher.alias(user_id),
            public_tag: tag,
            added_by: "csv-import".into(),
            added_at: chrono::Utc::now(),
        };
        store.upsert_staff_role(&role).await?;
        imported += 1;
    }

    tracing::info!(imported, path = %path.display(), "staff roles imported");
    Ok(imported)
}

fn parse_staff_csv(path: &Path) -> Result<Vec<(u64, String)>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open staff CSV at {}", path.display()))?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("failed to read staff CSV record")?;

        let user_id = match record.get(0) {
            None | Some("") => continue,
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("invalid user id in staff CSV: {raw}"))?,
        };
        let tag = match record.get(1) {
            None | Some("") => continue,
            Some(tag) => tag.to_string(),
        };

        rows.push((user_id, tag));
    }

    Ok(rows)
}
