//! Health check endpoints and monitoring
//!
//! This module provides health check functionality for the matchgate broker,
//! including readiness and liveness probes.

use crate::matchmaker::Matchmaker;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value exported to Prometheus
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn worst(self, other: &HealthStatus) -> HealthStatus {
        match (&self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// What health checks look at
#[derive(Clone)]
pub struct ServiceProbe {
    pub service_name: String,
    pub matchmaker: Arc<Matchmaker>,
    pub is_running: Arc<RwLock<bool>>,
}

impl ServiceProbe {
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional error message if not healthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    pub tickets_waiting: usize,
    pub live_sessions: usize,
    pub sessions_by_state: HashMap<String, usize>,
    pub admission_cycles: u64,
    pub playlists_selected: u64,
    pub admission_errors: u64,
    pub persisted_sessions: usize,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(probe: &ServiceProbe) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(probe).await,
            Self::check_registries(probe),
            Self::check_record_store(probe).await,
        ];

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |status, check| status.worst(&check.status));
        let stats = Self::gather_service_stats(probe).await;

        Ok(HealthCheck {
            status,
            service: probe.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(probe: &ServiceProbe) -> Result<HealthStatus> {
        if probe.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify service can handle requests
    pub async fn readiness_check(probe: &ServiceProbe) -> Result<HealthStatus> {
        if !probe.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        let registries = Self::check_registries(probe).status;
        let store = Self::check_record_store(probe).await.status;
        Ok(registries.worst(&store))
    }

    async fn check_service_running(probe: &ServiceProbe) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if probe.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Registries are readable as long as none of their locks is poisoned
    fn check_registries(probe: &ServiceProbe) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match probe.matchmaker.stats() {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Registry check failed: {}", e);
                (HealthStatus::Unhealthy, Some(e.to_string()))
            }
        };

        ComponentCheck {
            name: "registries".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn check_record_store(probe: &ServiceProbe) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match probe.matchmaker.store().list_sessions().await {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Record store check failed: {}", e);
                (
                    HealthStatus::Degraded,
                    Some(format!("Record store unreachable: {}", e)),
                )
            }
        };

        ComponentCheck {
            name: "record_store".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn gather_service_stats(probe: &ServiceProbe) -> ServiceStats {
        let mut stats = match probe.matchmaker.stats() {
            Ok(mm) => ServiceStats {
                tickets_waiting: mm.tickets_waiting,
                live_sessions: mm.live_sessions,
                sessions_by_state: mm
                    .sessions_by_state
                    .iter()
                    .map(|(state, count)| (state.to_string(), *count))
                    .collect(),
                admission_cycles: mm.admission_cycles,
                playlists_selected: mm.playlists_selected,
                admission_errors: mm.admission_errors,
                persisted_sessions: 0,
            },
            Err(e) => {
                debug!("Failed to get matchmaker stats for health check: {}", e);
                ServiceStats::default()
            }
        };

        if let Ok(records) = probe.matchmaker.store().list_sessions().await {
            stats.persisted_sessions = records.len();
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchmakingSettings;
    use crate::metrics::MetricsCollector;
    use crate::store::InMemorySessionStore;

    fn probe(running: bool) -> ServiceProbe {
        ServiceProbe {
            service_name: "matchgate".to_string(),
            matchmaker: Arc::new(Matchmaker::new(
                Arc::new(InMemorySessionStore::new()),
                MatchmakingSettings::without_delays(),
                Arc::new(MetricsCollector::new().unwrap()),
            )),
            is_running: Arc::new(RwLock::new(running)),
        }
    }

    #[tokio::test]
    async fn test_running_service_is_healthy() {
        let probe = probe(true);
        let health = HealthCheck::check(&probe).await.unwrap();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.checks.len(), 3);
        assert_eq!(health.stats.tickets_waiting, 0);
        assert_eq!(
            HealthCheck::readiness_check(&probe).await.unwrap(),
            HealthStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_stopped_service_is_unhealthy() {
        let probe = probe(false);
        assert_eq!(
            HealthCheck::liveness_check(&probe).await.unwrap(),
            HealthStatus::Unhealthy
        );
        let health = HealthCheck::check(&probe).await.unwrap();
        assert_eq!(health.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_worst_status_wins() {
        assert_eq!(
            HealthStatus::Healthy.worst(&HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Degraded.worst(&HealthStatus::Unhealthy),
            HealthStatus::Unhealthy
        );
        assert_eq!(HealthStatus::Degraded.as_gauge(), 1);
    }
}
