//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every subsystem from a validated config, in dependency order
//! - Start background tasks (health monitor, store purge, signal handler)
//! - Bind listeners last, so traffic only arrives when the gateway is ready
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The transport is chosen by `upstream.mode`, never by probing the network

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::admin::setup_admin_router;
use crate::cache::{MemoryStore, SharedStore};
use crate::config::{GatewayConfig, UpstreamMode};
use crate::health::{HealthAggregator, HealthMonitor};
use crate::http::{AppState, HttpServer};
use crate::lifecycle::signals::spawn_signal_handler;
use crate::lifecycle::Shutdown;
use crate::observability::{SharedSink, TracingSink};
use crate::resilience::{SharedClock, SystemClock};
use crate::security::{AbuseBlocker, AdmissionControl, BurstLimiter, FixedWindowLimiter};
use crate::upstream::{HttpTransport, OfflineTransport, StatsClient, Transport};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to build upstream transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// A fully wired gateway, ready to bind.
pub struct Gateway {
    state: AppState,
    monitor: HealthMonitor,
    store: Option<MemoryStore>,
    shutdown: Arc<Shutdown>,
}

/// Build the gateway with the system clock, an in-process store and the
/// transport selected by configuration.
pub fn build_gateway(config: GatewayConfig) -> Result<Gateway, StartupError> {
    let transport: Arc<dyn Transport> = match config.upstream.mode {
        UpstreamMode::Live => {
            tracing::info!(base_url = %config.upstream.base_url, "Using live upstream");
            Arc::new(HttpTransport::new(&config.upstream)?)
        }
        UpstreamMode::Offline => {
            tracing::warn!("OFFLINE MODE: serving synthetic data, no upstream calls will be made");
            Arc::new(OfflineTransport::new())
        }
    };

    let clock: SharedClock = Arc::new(SystemClock);
    let memory = MemoryStore::with_clock(clock.clone());
    let store: SharedStore = Arc::new(memory.clone());
    let sink: SharedSink = Arc::new(TracingSink);

    let mut gateway = Gateway::assemble(config, transport, store, clock, sink);
    gateway.store = Some(memory);
    Ok(gateway)
}

impl Gateway {
    /// Wire the subsystems around caller-supplied dependencies.
    pub fn assemble(
        config: GatewayConfig,
        transport: Arc<dyn Transport>,
        store: SharedStore,
        clock: SharedClock,
        sink: SharedSink,
    ) -> Self {
        let client = Arc::new(StatsClient::new(
            &config,
            transport,
            store.clone(),
            clock.clone(),
            sink.clone(),
        ));

        let health = Arc::new(HealthAggregator::new(
            client.clone(),
            store.clone(),
            clock.clone(),
            sink.clone(),
            Duration::from_millis(config.health.probe_timeout_ms),
        )
        .with_max_age(Duration::from_millis(config.health.report_max_age_ms)));
        let monitor = HealthMonitor::new(health.clone(), config.health.clone(), sink.clone());

        let admission = Arc::new(AdmissionControl::new(
            Arc::new(AbuseBlocker::new(
                store.clone(),
                config.abuse.clone(),
                clock.clone(),
                sink.clone(),
            )),
            Arc::new(FixedWindowLimiter::new(
                store.clone(),
                config.limits.clone(),
                clock.clone(),
                sink.clone(),
            )),
            Arc::new(BurstLimiter::new(store, clock.clone(), sink)),
            config.limits.burst,
            clock,
            config.limits.enabled,
        ));

        tracing::info!(
            transport = client.transport_name(),
            limits_enabled = config.limits.enabled,
            "Gateway assembled"
        );

        Self {
            state: AppState {
                client,
                health,
                admission,
                config: Arc::new(config),
                started_at: Instant::now(),
            },
            monitor,
            store: None,
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn shutdown(&self) -> Arc<Shutdown> {
        self.shutdown.clone()
    }

    /// Bind listeners and serve until a signal or `shutdown().trigger()`.
    pub async fn run(self) -> Result<(), StartupError> {
        let Gateway {
            state,
            monitor,
            store,
            shutdown,
        } = self;
        let config = state.config.clone();

        let listener = bind(&config.listener.bind_address).await?;

        if config.admin.enabled {
            let admin_listener = bind(&config.admin.bind_address).await?;
            let admin = setup_admin_router(state.clone());
            let mut stop = shutdown.subscribe();
            tracing::info!(address = %config.admin.bind_address, "Admin API listening");
            tokio::spawn(async move {
                let served = axum::serve(
                    admin_listener,
                    admin.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "Admin server failed");
                }
            });
        }

        tokio::spawn(monitor.run(shutdown.subscribe()));
        if let Some(memory) = store {
            tokio::spawn(purge_loop(memory, shutdown.subscribe()));
        }
        spawn_signal_handler(shutdown.clone(), state.client.clone());

        HttpServer::new(state).run(listener, shutdown.subscribe()).await?;
        tracing::info!("Shutdown complete");
        Ok(())
    }
}

async fn bind(address: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(address).await.map_err(|source| StartupError::Bind {
        address: address.to_string(),
        source,
    })
}

async fn purge_loop(store: MemoryStore, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(PURGE_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = store.purge_expired();
                if removed > 0 {
                    tracing::debug!(removed, remaining = store.len(), "Purged expired store entries");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}
