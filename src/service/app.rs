//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the record store,
//! the matchmaker, the socket gateway, the reaper and the background tasks.

use crate::cleanup::{ReapReason, SessionReaper};
use crate::config::AppConfig;
use crate::gateway::{GatewayConfig, GatewayServer, GatewayState, JwtVerifier};
use crate::matchmaker::Matchmaker;
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector, MetricsService};
use crate::service::health::{HealthCheck, ServiceProbe};
use crate::store::{InMemorySessionStore, SessionStore};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Queues, live sessions and playlist selection
    matchmaker: Arc<Matchmaker>,

    /// Retires abandoned session records
    reaper: Arc<SessionReaper>,

    /// Socket and admin HTTP listeners
    gateway: Arc<GatewayServer>,

    /// Metrics service for monitoring and health checks
    metrics_service: Arc<MetricsService>,

    /// Background task handles
    background_tasks: Vec<JoinHandle<()>>,

    /// Service status
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Initialize the application with an in-memory record store
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        Self::with_store(config, Arc::new(InMemorySessionStore::new())).await
    }

    /// Initialize the application around an existing record store
    pub async fn with_store(
        config: AppConfig,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, ServiceError> {
        info!("Initializing matchgate broker");
        info!(
            "Configuration: service={}, mode={}, trigger={:?}, http_port={}",
            config.service.name,
            config.matchmaking.mode,
            config.matchmaking.admission_trigger,
            config.service.http_port
        );

        let collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let matchmaker = Arc::new(Matchmaker::new(
            store.clone(),
            config.matchmaking.clone(),
            collector.clone(),
        ));

        let reaper = Arc::new(SessionReaper::new(
            store,
            matchmaker.sessions().clone(),
            config.cleanup.clone(),
        ));

        let verifier =
            JwtVerifier::new(&config.auth).map_err(|e| ServiceError::Configuration {
                message: format!("Failed to create credential verifier: {}", e),
            })?;

        let gateway = Arc::new(GatewayServer::new(
            GatewayConfig {
                host: config.service.bind_host.clone(),
                http_port: config.service.http_port,
                secure_port: config.service.secure_port,
            },
            GatewayState::new(
                matchmaker.clone(),
                Arc::new(verifier),
                config.service.outbound_buffer,
            ),
        ));

        let is_running = Arc::new(RwLock::new(false));
        let metrics_service =
            Self::initialize_metrics(&config, collector, &matchmaker, is_running.clone());

        Ok(Self {
            config,
            matchmaker,
            reaper,
            gateway,
            metrics_service,
            background_tasks: Vec::new(),
            is_running,
        })
    }

    /// Start the listeners and background tasks
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting matchgate broker");

        *self.is_running.write().await = true;

        self.start_metrics_service().await?;
        self.start_gateway().await?;
        self.start_background_tasks().await?;

        info!("✅ Matchgate broker started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of matchgate");

        *self.is_running.write().await = false;

        if let Err(e) = self.gateway.stop().await {
            warn!("Failed to stop gateway: {}", e);
        } else {
            info!("✅ Gateway stopped accepting connections");
        }

        let closed = self.close_connections();
        info!("Closed {} live connections", closed);

        self.stop_background_tasks().await;

        info!("Stopping metrics service...");
        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        } else {
            info!("✅ Metrics service stopped");
        }

        let final_stats =
            self.matchmaker
                .stats()
                .map_err(|e| ServiceError::BackgroundTask {
                    message: format!("Failed to get final stats: {}", e),
                })?;

        info!("Final service statistics: {:?}", final_stats);
        info!("✅ Matchgate shutdown completed");

        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn matchmaker(&self) -> Arc<Matchmaker> {
        self.matchmaker.clone()
    }

    pub fn reaper(&self) -> Arc<SessionReaper> {
        self.reaper.clone()
    }

    pub fn gateway(&self) -> Arc<GatewayServer> {
        self.gateway.clone()
    }

    /// Get metrics service
    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    /// What the health checks inspect
    pub fn probe(&self) -> ServiceProbe {
        ServiceProbe {
            service_name: self.config.service.name.clone(),
            matchmaker: self.matchmaker.clone(),
            is_running: self.is_running.clone(),
        }
    }

    fn initialize_metrics(
        config: &AppConfig,
        collector: Arc<MetricsCollector>,
        matchmaker: &Arc<Matchmaker>,
        is_running: Arc<RwLock<bool>>,
    ) -> Arc<MetricsService> {
        info!(
            "Initializing metrics service on port {}",
            config.service.metrics_port
        );

        let health_config = HealthServerConfig {
            port: config.service.metrics_port,
            host: config.service.bind_host.clone(),
        };

        let probe = ServiceProbe {
            service_name: config.service.name.clone(),
            matchmaker: matchmaker.clone(),
            is_running,
        };
        let health_server =
            Arc::new(HealthServer::new(health_config, collector.clone()).with_probe(probe));

        Arc::new(MetricsService::new(collector, health_server))
    }

    async fn start_metrics_service(&mut self) -> Result<(), ServiceError> {
        info!("Starting metrics and health endpoints");

        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.metrics_port;

        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });
        self.background_tasks.push(metrics_handle);

        // Give the server a moment to start up
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        info!("✅ Metrics service started on port {}", port);
        Ok(())
    }

    async fn start_gateway(&mut self) -> Result<(), ServiceError> {
        info!("Starting socket gateway");

        let gateway = self.gateway.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = gateway.start().await {
                error!("Gateway failed: {:#}", e);
            }
        });
        self.background_tasks.push(handle);

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        match self.config.service.secure_port {
            Some(secure) => info!(
                "✅ Gateway started on ports {} and {}",
                self.config.service.http_port, secure
            ),
            None => info!("✅ Gateway started on port {}", self.config.service.http_port),
        }
        Ok(())
    }

    /// Start background maintenance tasks
    async fn start_background_tasks(&mut self) -> Result<(), ServiceError> {
        info!("Starting background maintenance tasks...");

        info!(
            "Starting session cleanup task ({}s interval)...",
            self.config.cleanup_interval().as_secs()
        );
        let cleanup_task = {
            let reaper = self.reaper.clone();
            let metrics_collector = self.metrics_service.collector();
            let cleanup_interval = self.config.cleanup_interval();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(cleanup_interval);
                info!("Session cleanup task started");

                while *is_running.read().await {
                    interval.tick().await;

                    match reaper.sweep().await {
                        Ok(report) => {
                            for (reason, count) in [
                                (ReapReason::Stale, report.stale),
                                (ReapReason::Empty, report.empty),
                                (ReapReason::Stagnant, report.stagnant),
                                (ReapReason::Orphaned, report.orphaned),
                            ] {
                                if count > 0 {
                                    metrics_collector.record_reaped(reason.as_str(), count);
                                }
                            }
                            if report.errors > 0 {
                                metrics_collector.record_reaper_errors(report.errors);
                            }

                            if report.removed() > 0 {
                                info!(
                                    "Cleaned up {} session records - examined: {}, errors: {}",
                                    report.removed(),
                                    report.examined,
                                    report.errors
                                );
                            } else {
                                debug!("Cleanup check completed - no abandoned records found");
                            }
                        }
                        Err(e) => {
                            metrics_collector.record_reaper_errors(1);
                            warn!("Session cleanup failed: {}", e);
                        }
                    }
                }

                info!("Session cleanup task stopped");
            })
        };

        info!("Starting matchmaker metrics update task (15s interval)...");
        let metrics_task = {
            let matchmaker = self.matchmaker.clone();
            let metrics_collector = self.metrics_service.collector();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(15));
                info!("Metrics update task started");

                while *is_running.read().await {
                    interval.tick().await;

                    match matchmaker.stats() {
                        Ok(stats) => {
                            debug!(
                                "Updating metrics - tickets: {}, sessions: {}, cycles: {}",
                                stats.tickets_waiting, stats.live_sessions, stats.admission_cycles
                            );
                            metrics_collector.update_from_matchmaker_stats(&stats);
                        }
                        Err(e) => {
                            warn!("Failed to get matchmaker stats for metrics update: {}", e);
                        }
                    }
                }

                info!("Metrics update task stopped");
            })
        };

        info!("Starting health metrics task (60s interval)...");
        let health_metrics_task = {
            let metrics_collector = self.metrics_service.collector();
            let probe = self.probe();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                let start_time = tokio::time::Instant::now();
                info!("Health metrics task started");

                while *is_running.read().await {
                    interval.tick().await;

                    let uptime_seconds = start_time.elapsed().as_secs() as i64;
                    metrics_collector
                        .service()
                        .uptime_seconds
                        .set(uptime_seconds);

                    match HealthCheck::check(&probe).await {
                        Ok(health) => {
                            metrics_collector.update_health_status(health.status.as_gauge());
                            for check in &health.checks {
                                metrics_collector.update_component_health(
                                    &check.name,
                                    check.status.as_gauge() == 2,
                                );
                            }
                            debug!(
                                "Updated service health metrics - uptime: {}s, status: {}",
                                uptime_seconds, health.status
                            );
                        }
                        Err(e) => {
                            metrics_collector.update_health_status(0);
                            warn!("Health check failed: {}", e);
                        }
                    }
                }

                info!("Health metrics task stopped");
            })
        };

        self.background_tasks.push(cleanup_task);
        self.background_tasks.push(metrics_task);
        self.background_tasks.push(health_metrics_task);

        info!("3 background maintenance tasks started successfully");
        Ok(())
    }

    /// Close every live ticket and session socket
    fn close_connections(&self) -> usize {
        let mut closed = 0;

        match self.matchmaker.tickets().list() {
            Ok(tickets) => {
                for ticket in tickets {
                    ticket.connection.close();
                    closed += 1;
                }
            }
            Err(e) => warn!("Failed to list tickets for shutdown: {}", e),
        }

        match self.matchmaker.sessions().list() {
            Ok(sessions) => {
                for session in sessions {
                    session.connection.close();
                    closed += 1;
                }
            }
            Err(e) => warn!("Failed to list sessions for shutdown: {}", e),
        }

        closed
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", task_count);

        for (i, task) in self.background_tasks.drain(..).enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }

        // Give tasks time to clean up gracefully
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;

        info!("✅ All {} background tasks stopped", task_count);
    }
}
