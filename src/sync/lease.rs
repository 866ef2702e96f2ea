//! Single-writer lease over the snapshot.
//!
//! The snapshot is read, modified and rewritten as three separate objects,
//! so two concurrent syncs would lose each other's updates. Each sync first
//! claims a lease object through the store's compare-and-swap:
//!
//! - no lease: create it, expecting absence
//! - lease expired (or unreadable): replace it, expecting its version
//! - lease held: back off and retry, then give up
//!
//! Before writing, the holder renews the lease by rewriting it against the
//! version it last wrote. A run that stalled past its TTL and was taken over
//! fails that renewal and must not write. The holder releases the lease with
//! a conditional delete, so a lease taken over after expiring is never
//! deleted by its previous owner.

use crate::store::{ObjectStore, ObjectVersion, StoreError};
use crate::sync::SyncError;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Lease timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseConfig {
    /// How long a claimed lease stays valid.
    pub ttl: Duration,
    /// Extra attempts after the first failed claim.
    pub retries: u32,
    /// Base delay between attempts; grows linearly per attempt.
    pub backoff: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            retries: 5,
            backoff: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaseRecord {
    holder: String,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    fn encode(holder: &str, ttl: TimeDelta) -> Result<Vec<u8>, SyncError> {
        let now = Utc::now();
        let record = LeaseRecord {
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        serde_json::to_vec(&record).map_err(|e| {
            SyncError::Store(StoreError::Codec {
                what: "sync lease".to_string(),
                reason: e.to_string(),
            })
        })
    }
}

/// A claimed lease. Released explicitly or, failing that, on drop.
pub struct SyncLease {
    store: Arc<dyn ObjectStore>,
    key: String,
    holder: String,
    ttl: TimeDelta,
    /// Version of the lease object as last written by us; `None` once
    /// released or lost.
    version: Option<ObjectVersion>,
}

impl SyncLease {
    /// Claims the lease at `key`, retrying while another holder has it.
    ///
    /// # Errors
    /// [`SyncError::LeaseUnavailable`] once all attempts are used up, or a
    /// store error other than a lost race.
    pub fn acquire(
        store: Arc<dyn ObjectStore>,
        key: &str,
        config: &LeaseConfig,
    ) -> Result<Self, SyncError> {
        let holder = format!("{}-{:016x}", std::process::id(), rand::random::<u64>());
        let ttl = TimeDelta::from_std(config.ttl).unwrap_or(TimeDelta::MAX);
        let attempts = config.retries.saturating_add(1);
        let mut last_holder = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                std::thread::sleep(config.backoff.saturating_mul(attempt));
            }

            let now = Utc::now();
            let bytes = LeaseRecord::encode(&holder, ttl)?;

            let expected = match store.get(key)? {
                None => None,
                Some(current) => match serde_json::from_slice::<LeaseRecord>(&current.bytes) {
                    Ok(existing) if existing.expires_at > now => {
                        tracing::debug!(
                            "Lease '{key}' held by {} until {} (attempt {}/{attempts})",
                            existing.holder,
                            existing.expires_at,
                            attempt + 1
                        );
                        last_holder = Some(existing.holder);
                        continue;
                    }
                    Ok(existing) => {
                        tracing::warn!(
                            "Taking over lease '{key}' from {} which expired at {}",
                            existing.holder,
                            existing.expires_at
                        );
                        Some(current.version)
                    }
                    Err(e) => {
                        tracing::warn!("Taking over unreadable lease '{key}': {e}");
                        Some(current.version)
                    }
                },
            };

            match store.put_if(key, &bytes, expected.as_ref()) {
                Ok(version) => {
                    tracing::debug!("Acquired lease '{key}' as {holder}");
                    return Ok(Self {
                        store,
                        key: key.to_string(),
                        holder,
                        ttl,
                        version: Some(version),
                    });
                }
                Err(StoreError::Conflict { .. }) => {
                    tracing::debug!("Lost the race for lease '{key}', retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SyncError::LeaseUnavailable {
            key: key.to_string(),
            holder: last_holder,
            attempts,
        })
    }

    #[must_use]
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Extends the lease by a full TTL, proving it is still ours.
    ///
    /// # Errors
    /// [`SyncError::LeaseLost`] if the lease object changed since we last
    /// wrote it, i.e. it expired and another writer claimed it. The lease is
    /// then treated as released.
    pub fn renew(&mut self) -> Result<(), SyncError> {
        let lost = || SyncError::LeaseLost {
            key: self.key.clone(),
            holder: self.holder.clone(),
        };
        let Some(current) = self.version.as_ref() else {
            return Err(lost());
        };

        let bytes = LeaseRecord::encode(&self.holder, self.ttl)?;
        match self.store.put_if(&self.key, &bytes, Some(current)) {
            Ok(version) => {
                self.version = Some(version);
                Ok(())
            }
            Err(StoreError::Conflict { .. }) => {
                let error = lost();
                self.version = None;
                tracing::warn!("{error}");
                Err(error)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Releases the lease.
    ///
    /// A conflict means the lease expired and someone else took it over;
    /// that is reported so the caller can log it.
    pub fn release(mut self) -> Result<(), StoreError> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<(), StoreError> {
        match self.version.take() {
            Some(version) => self.store.delete_if(&self.key, &version),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for SyncLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncLease")
            .field("key", &self.key)
            .field("holder", &self.holder)
            .field("version", &self.version)
            .finish()
    }
}

impl Drop for SyncLease {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            tracing::warn!("Failed to release lease '{}': {e}", self.key);
        }
    }
}
