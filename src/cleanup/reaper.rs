//! Background sweep over persisted session records
//!
//! A record is removed when it is older than the staleness bound, when it is
//! empty and nothing is connected for it, or when its occupancy stopped
//! changing between sweeps. Removing a record also drops the live session
//! bound to it so it can no longer be picked for admission.

use crate::config::CleanupSettings;
use crate::error::{MatchmakingError, Result};
use crate::registry::SessionRegistry;
use crate::store::{SessionRecord, SessionStore};
use crate::types::SessionId;
use crate::utils::current_timestamp;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Why a record was removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapReason {
    /// Not updated within the staleness bound
    Stale,
    /// No occupants and no live socket
    Empty,
    /// Live, but neither heartbeating nor changing occupancy
    Stagnant,
    /// Occupied but without a live socket for too long
    Orphaned,
}

impl ReapReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReapReason::Stale => "stale",
            ReapReason::Empty => "empty",
            ReapReason::Stagnant => "stagnant",
            ReapReason::Orphaned => "orphaned",
        }
    }
}

/// Result of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub examined: usize,
    pub stale: usize,
    pub empty: usize,
    pub stagnant: usize,
    pub orphaned: usize,
    pub errors: usize,
}

impl CleanupReport {
    pub fn removed(&self) -> usize {
        self.stale + self.empty + self.stagnant + self.orphaned
    }

    fn count(&mut self, reason: ReapReason) {
        match reason {
            ReapReason::Stale => self.stale += 1,
            ReapReason::Empty => self.empty += 1,
            ReapReason::Stagnant => self.stagnant += 1,
            ReapReason::Orphaned => self.orphaned += 1,
        }
    }
}

/// Retires abandoned session records
pub struct SessionReaper {
    store: Arc<dyn SessionStore>,
    sessions: Arc<SessionRegistry>,
    settings: CleanupSettings,
    previous_occupancy: Mutex<HashMap<SessionId, usize>>,
}

impl SessionReaper {
    pub fn new(
        store: Arc<dyn SessionStore>,
        sessions: Arc<SessionRegistry>,
        settings: CleanupSettings,
    ) -> Self {
        Self {
            store,
            sessions,
            settings,
            previous_occupancy: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &CleanupSettings {
        &self.settings
    }

    /// Sweep every persisted record now
    pub async fn sweep(&self) -> Result<CleanupReport> {
        self.sweep_at(current_timestamp()).await
    }

    /// Sweep every persisted record as of `now`.
    ///
    /// Only a failure to list the records fails the sweep; per-record
    /// failures are logged, counted and skipped.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        let records = self.store.list_sessions().await?;
        let mut report = CleanupReport {
            examined: records.len(),
            ..CleanupReport::default()
        };
        debug!("Running cleanup sweep - records: {}", records.len());

        for record in &records {
            match self.check(record, now) {
                Ok(Some(reason)) => match self.reap(record, reason).await {
                    Ok(()) => report.count(reason),
                    Err(e) => {
                        warn!(
                            "Failed to remove session record - session: '{}', reason: {}, error: {}",
                            record.session_id,
                            reason.as_str(),
                            e
                        );
                        report.errors += 1;
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "Failed to check session record - session: '{}', error: {}",
                        record.session_id, e
                    );
                    report.errors += 1;
                }
            }
        }

        self.forget_missing(&records)?;

        if report.removed() > 0 {
            info!(
                "Cleanup removed {} sessions - stale: {}, empty: {}, stagnant: {}, orphaned: {}",
                report.removed(),
                report.stale,
                report.empty,
                report.stagnant,
                report.orphaned
            );
        }
        Ok(report)
    }

    /// Decide what to do with one record; records its occupancy when kept
    fn check(&self, record: &SessionRecord, now: DateTime<Utc>) -> Result<Option<ReapReason>> {
        let age = now.signed_duration_since(record.last_updated);
        let live = self.sessions.contains(&record.session_id)?;
        let occupancy = record.occupancy();

        if age > self.settings.stale_after() {
            return Ok(Some(ReapReason::Stale));
        }

        if occupancy == 0 {
            return Ok(if live { None } else { Some(ReapReason::Empty) });
        }

        let mut previous = self
            .previous_occupancy
            .lock()
            .map_err(|_| MatchmakingError::lock_failed("reaper occupancy"))?;

        if let Some(&last) = previous.get(&record.session_id) {
            if age > self.settings.orphan_after() {
                if !live {
                    return Ok(Some(ReapReason::Orphaned));
                }
                if last == occupancy {
                    return Ok(Some(ReapReason::Stagnant));
                }
            }
        }

        previous.insert(record.session_id.clone(), occupancy);
        Ok(None)
    }

    async fn reap(&self, record: &SessionRecord, reason: ReapReason) -> Result<()> {
        if let Some(handle) = self.sessions.remove(&record.session_id)? {
            handle.connection.close();
        }
        self.store.delete_session(&record.session_id).await?;

        let mut previous = self
            .previous_occupancy
            .lock()
            .map_err(|_| MatchmakingError::lock_failed("reaper occupancy"))?;
        previous.remove(&record.session_id);

        info!(
            "Removed session record - session: '{}', reason: {}, players: {}",
            record.session_id,
            reason.as_str(),
            record.occupancy()
        );
        Ok(())
    }

    fn forget_missing(&self, records: &[SessionRecord]) -> Result<()> {
        let mut previous = self
            .previous_occupancy
            .lock()
            .map_err(|_| MatchmakingError::lock_failed("reaper occupancy"))?;
        previous.retain(|id, _| records.iter().any(|r| &r.session_id == id));
        Ok(())
    }
}
