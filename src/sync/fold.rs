//! Folding a batch of retrieved records into a snapshot. No I/O.

use crate::snapshot::Snapshot;
use crate::store::EmbeddingRecord;
use crate::sync::{SyncError, SyncOutcome};

/// Applies retrieved records to `snapshot`.
///
/// Records are ingested oldest first (ties by external id) so internal ids
/// follow arrival order. Records at or below the watermark are dropped as
/// stale; records whose external id is already mapped are skipped as
/// duplicates. The watermark advances to the newest retrieved timestamp and
/// never moves backwards.
///
/// # Errors
/// Any fresh record with the wrong dimension aborts the fold before the
/// index is touched. Stale records are dropped unchecked.
pub fn fold_records(
    mut snapshot: Snapshot,
    mut records: Vec<EmbeddingRecord>,
) -> Result<(Snapshot, SyncOutcome), SyncError> {
    let retrieved = records.len();
    let watermark = snapshot.metadata.last_timestamp;

    // Newest first, so the watermark candidate leads
    records.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.external_id.cmp(&a.external_id))
    });
    let newest = records.first().map(|r| r.timestamp);

    let (fresh, stale): (Vec<_>, Vec<_>) =
        records.into_iter().partition(|r| r.timestamp > watermark);
    for record in &stale {
        tracing::debug!(
            "Dropping stale record '{}' at {} (watermark {watermark})",
            record.external_id,
            record.timestamp
        );
    }

    let dimension = snapshot.index.dimension();
    for record in &fresh {
        dimension.validate_vector(&record.vector).map_err(|source| {
            SyncError::InvalidRecord {
                external_id: record.external_id.clone(),
                source,
            }
        })?;
    }

    let mut outcome = SyncOutcome {
        retrieved,
        stale: stale.len(),
        ..SyncOutcome::unchanged(&snapshot)
    };

    for record in fresh.iter().rev() {
        match snapshot.mapping.assign(&record.external_id) {
            Some(id) => {
                snapshot.index.append(&record.vector, id)?;
                outcome.ingested += 1;
            }
            None => {
                tracing::debug!(
                    "Skipping '{}': already indexed as {}",
                    record.external_id,
                    snapshot
                        .mapping
                        .internal_id(&record.external_id)
                        .map(|id| id.to_string())
                        .unwrap_or_default()
                );
                outcome.duplicates += 1;
            }
        }
    }

    if let Some(newest) = newest {
        snapshot.metadata.last_timestamp = watermark.max(newest);
    }
    snapshot.metadata.last_index = snapshot.index.len() as u64;

    outcome.last_timestamp = snapshot.metadata.last_timestamp;
    outcome.index_size = snapshot.index.len();
    Ok((snapshot, outcome))
}
