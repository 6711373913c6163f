//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the matchgate broker using
//! Prometheus metrics.

use crate::matchmaker::MatchmakerStats;
use crate::session::SessionState;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the broker
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Ticket queue metrics
    queue_metrics: QueueMetrics,

    /// Session socket and lifecycle metrics
    session_metrics: SessionMetrics,

    /// Admission cycle metrics
    selection_metrics: SelectionMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Socket connections accepted, by kind
    pub connections_total: IntCounterVec,

    /// Rejected socket credentials, by kind
    pub auth_failures_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Ticket queue metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Tickets currently connected
    pub tickets_waiting: IntGauge,

    /// Queued status updates pushed to tickets
    pub queued_updates_total: IntCounter,

    /// Tickets told about a session, by message
    pub ticket_notifications_total: IntCounterVec,
}

/// Session metrics
#[derive(Clone)]
pub struct SessionMetrics {
    /// Live sessions by lifecycle state
    pub live_sessions: IntGaugeVec,

    /// Assignment results reported by dedicated servers
    pub assign_results_total: IntCounterVec,

    /// Session records removed by the reaper, by reason
    pub sessions_reaped_total: IntCounterVec,

    /// Reaper errors
    pub reaper_errors_total: IntCounter,
}

/// Admission cycle metrics
#[derive(Clone)]
pub struct SelectionMetrics {
    /// Admission cycles by outcome
    pub cycles_total: IntCounterVec,

    /// Admission cycle duration
    pub selection_duration: Histogram,

    /// Rolling statistics tracked
    pub tracked_playlists: IntGauge,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let session_metrics = SessionMetrics::new(&registry)?;
        let selection_metrics = SelectionMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            session_metrics,
            selection_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn session(&self) -> &SessionMetrics {
        &self.session_metrics
    }

    pub fn selection(&self) -> &SelectionMetrics {
        &self.selection_metrics
    }

    /// Refresh gauges from matchmaker stats
    pub fn update_from_matchmaker_stats(&self, stats: &MatchmakerStats) {
        self.queue_metrics
            .tickets_waiting
            .set(stats.tickets_waiting as i64);

        for state in [
            SessionState::Registered,
            SessionState::Idle,
            SessionState::Admitting,
            SessionState::Assigning,
            SessionState::Assigned,
            SessionState::Locked,
        ] {
            let count = stats.sessions_by_state.get(&state).copied().unwrap_or(0);
            self.session_metrics
                .live_sessions
                .with_label_values(&[state.as_str()])
                .set(count as i64);
        }

        self.selection_metrics
            .tracked_playlists
            .set(stats.tracked_playlists as i64);
    }

    /// Record an accepted socket connection
    pub fn record_connection(&self, kind: &str) {
        self.service_metrics
            .connections_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Record a rejected credential
    pub fn record_auth_failure(&self, kind: &str) {
        self.service_metrics
            .auth_failures_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Record one admission cycle
    pub fn record_selection(&self, outcome: &str, duration: Duration) {
        self.selection_metrics
            .cycles_total
            .with_label_values(&[outcome])
            .inc();
        self.selection_metrics
            .selection_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_queued_update(&self) {
        self.queue_metrics.queued_updates_total.inc();
    }

    pub fn record_ticket_notifications(&self, message: &str, count: usize) {
        self.queue_metrics
            .ticket_notifications_total
            .with_label_values(&[message])
            .inc_by(count as u64);
    }

    pub fn record_assign_result(&self, result: &str) {
        self.session_metrics
            .assign_results_total
            .with_label_values(&[result])
            .inc();
    }

    /// Record a record removed by the reaper
    pub fn record_reaped(&self, reason: &str, count: usize) {
        self.session_metrics
            .sessions_reaped_total
            .with_label_values(&[reason])
            .inc_by(count as u64);
    }

    pub fn record_reaper_errors(&self, count: usize) {
        self.session_metrics
            .reaper_errors_total
            .inc_by(count as u64);
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds = IntGauge::new("matchgate_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let connections_total = IntCounterVec::new(
            Opts::new(
                "matchgate_connections_total",
                "Socket connections accepted",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(connections_total.clone()))?;

        let auth_failures_total = IntCounterVec::new(
            Opts::new(
                "matchgate_auth_failures_total",
                "Rejected socket credentials",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(auth_failures_total.clone()))?;

        let health_status = IntGauge::new(
            "matchgate_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("matchgate_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            connections_total,
            auth_failures_total,
            health_status,
            component_health,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let tickets_waiting =
            IntGauge::new("matchgate_tickets_waiting", "Tickets currently connected")?;
        registry.register(Box::new(tickets_waiting.clone()))?;

        let queued_updates_total = IntCounter::new(
            "matchgate_queued_updates_total",
            "Queued status updates pushed to tickets",
        )?;
        registry.register(Box::new(queued_updates_total.clone()))?;

        let ticket_notifications_total = IntCounterVec::new(
            Opts::new(
                "matchgate_ticket_notifications_total",
                "Session notifications sent to tickets",
            ),
            &["message"],
        )?;
        registry.register(Box::new(ticket_notifications_total.clone()))?;

        Ok(Self {
            tickets_waiting,
            queued_updates_total,
            ticket_notifications_total,
        })
    }
}

impl SessionMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let live_sessions = IntGaugeVec::new(
            Opts::new("matchgate_live_sessions", "Live sessions by state"),
            &["state"],
        )?;
        registry.register(Box::new(live_sessions.clone()))?;

        let assign_results_total = IntCounterVec::new(
            Opts::new(
                "matchgate_assign_results_total",
                "Assignment results reported by dedicated servers",
            ),
            &["result"],
        )?;
        registry.register(Box::new(assign_results_total.clone()))?;

        let sessions_reaped_total = IntCounterVec::new(
            Opts::new(
                "matchgate_sessions_reaped_total",
                "Session records removed by the reaper",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(sessions_reaped_total.clone()))?;

        let reaper_errors_total =
            IntCounter::new("matchgate_reaper_errors_total", "Reaper record errors")?;
        registry.register(Box::new(reaper_errors_total.clone()))?;

        Ok(Self {
            live_sessions,
            assign_results_total,
            sessions_reaped_total,
            reaper_errors_total,
        })
    }
}

impl SelectionMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let cycles_total = IntCounterVec::new(
            Opts::new("matchgate_admission_cycles_total", "Admission cycles run"),
            &["outcome"],
        )?;
        registry.register(Box::new(cycles_total.clone()))?;

        let selection_duration = Histogram::with_opts(
            HistogramOpts::new(
                "matchgate_selection_duration_seconds",
                "Admission cycle duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0]),
        )?;
        registry.register(Box::new(selection_duration.clone()))?;

        let tracked_playlists = IntGauge::new(
            "matchgate_tracked_playlists",
            "Rolling playlist statistics tracked",
        )?;
        registry.register(Box::new(tracked_playlists.clone()))?;

        Ok(Self {
            cycles_total,
            selection_duration,
            tracked_playlists,
        })
    }
}
