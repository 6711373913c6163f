//! Rolling queue-size statistics per region and playlist
//!
//! Every admission cycle adds the queued-player count it observed for each
//! playlist. The running average feeds the admission threshold, but only
//! while the statistic is fresh.

use crate::error::{MatchmakingError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

/// Identifies one rolling statistic
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsKey {
    pub region: String,
    pub playlist: String,
}

impl StatsKey {
    pub fn new(region: impl Into<String>, playlist: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            playlist: playlist.into(),
        }
    }
}

/// Observed queue sizes for one (region, playlist) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistStat {
    /// Sum of observed queued-player counts
    pub sum: u64,
    /// Number of observations
    pub hits: u64,
    pub last_updated: DateTime<Utc>,
}

impl PlaylistStat {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            sum: 0,
            hits: 0,
            last_updated: now,
        }
    }

    pub fn observe(&mut self, player_count: usize, now: DateTime<Utc>) {
        self.sum = self.sum.saturating_add(player_count as u64);
        self.hits = self.hits.saturating_add(1);
        self.last_updated = now;
    }

    /// Average observed queue size
    pub fn average(&self) -> f64 {
        if self.hits == 0 {
            return 0.0;
        }
        self.sum as f64 / self.hits as f64
    }

    /// Whether the statistic was updated within the window
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        let age = now.signed_duration_since(self.last_updated);
        match chrono::Duration::from_std(window) {
            Ok(window) => age < window,
            Err(_) => true,
        }
    }
}

/// Admission threshold for a playlist.
///
/// A fresh statistic with at least one hit raises the threshold to half its
/// average queue size; otherwise the floor applies.
pub fn admission_threshold(
    stat: Option<&PlaylistStat>,
    now: DateTime<Utc>,
    window: Duration,
    floor: usize,
) -> usize {
    match stat {
        Some(stat) if stat.hits > 0 && stat.is_fresh(now, window) => {
            let candidate = (stat.average() / 2.0).floor() as usize;
            floor.max(candidate)
        }
        _ => floor,
    }
}

/// Process-wide store of rolling playlist statistics
#[derive(Debug)]
pub struct PlaylistStatistics {
    stats: RwLock<HashMap<StatsKey, PlaylistStat>>,
    window: Duration,
    floor: usize,
}

impl PlaylistStatistics {
    pub fn new(window: Duration, floor: usize) -> Self {
        Self {
            stats: RwLock::new(HashMap::new()),
            window,
            floor,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn floor(&self) -> usize {
        self.floor
    }

    /// Record one cycle's queued-player counts for a region
    pub fn record_observations(
        &self,
        region: &str,
        counts: &HashMap<String, usize>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut stats = self
            .stats
            .write()
            .map_err(|_| MatchmakingError::lock_failed("statistics"))?;

        for (playlist, count) in counts {
            stats
                .entry(StatsKey::new(region, playlist.as_str()))
                .or_insert_with(|| PlaylistStat::new(now))
                .observe(*count, now);
        }
        Ok(())
    }

    pub fn get(&self, region: &str, playlist: &str) -> Result<Option<PlaylistStat>> {
        let stats = self
            .stats
            .read()
            .map_err(|_| MatchmakingError::lock_failed("statistics"))?;
        Ok(stats.get(&StatsKey::new(region, playlist)).cloned())
    }

    /// Current admission threshold for a playlist
    pub fn threshold(&self, region: &str, playlist: &str, now: DateTime<Utc>) -> Result<usize> {
        let stat = self.get(region, playlist)?;
        Ok(admission_threshold(stat.as_ref(), now, self.window, self.floor))
    }

    /// Copy of every tracked statistic
    pub fn snapshot(&self) -> Result<HashMap<StatsKey, PlaylistStat>> {
        let stats = self
            .stats
            .read()
            .map_err(|_| MatchmakingError::lock_failed("statistics"))?;
        Ok(stats.clone())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.snapshot()?.len())
    }
}
