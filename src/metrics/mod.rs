//! Metrics and monitoring for the matchgate broker
//!
//! Prometheus collectors plus the HTTP server exposing them alongside the
//! health probes.

pub mod collector;
pub mod health;

pub use collector::{
    MetricsCollector, MetricsTimer, QueueMetrics, SelectionMetrics, ServiceMetrics,
    SessionMetrics,
};
pub use health::{HealthServer, HealthServerConfig, HealthServerState};

use std::sync::Arc;

/// Unified metrics service that combines all monitoring capabilities
#[derive(Clone)]
pub struct MetricsService {
    collector: Arc<MetricsCollector>,
    health_server: Arc<HealthServer>,
}

impl MetricsService {
    pub fn new(collector: Arc<MetricsCollector>, health_server: Arc<HealthServer>) -> Self {
        Self {
            collector,
            health_server,
        }
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn health_server(&self) -> Arc<HealthServer> {
        self.health_server.clone()
    }

    /// Serve health and metrics endpoints until stopped
    pub async fn start(&self) -> anyhow::Result<()> {
        self.health_server.start().await
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.health_server.stop().await
    }
}
