//! Server lifecycle management
//!
//! Starts every background loop and listener, then waits for a shutdown
//! signal and gives them a bounded time to stop.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gslb_api::{create_router, AppState, PeerAuthenticator};
use gslb_cluster::{HeartbeatMonitor, Synchronizer};
use gslb_core::notify::RedisNotifier;
use gslb_core::{Config, HealthState, HostChangeNotifier, HostStateStore};
use gslb_dns::{DnsServer, Resolver};

/// Upper bound on how long shutdown waits for background loops
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything built during bootstrap
pub struct Components {
    pub store: Arc<dyn HostStateStore>,
    pub notifier: Arc<dyn HostChangeNotifier>,
    /// Present when change notifications travel over Redis and need a subscriber task
    pub redis_notifier: Option<Arc<RedisNotifier>>,
    pub synchronizer: Arc<Synchronizer>,
    pub monitor: Arc<HeartbeatMonitor>,
    pub resolver: Arc<Resolver>,
    pub health: Arc<HealthState>,
}

pub struct GslbServer {
    config: Config,
    components: Components,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl GslbServer {
    pub fn new(config: Config, components: Components) -> Self {
        Self {
            config,
            components,
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Start all components and wait for shutdown signal
    pub async fn start(mut self) -> anyhow::Result<()> {
        if let Some(redis_notifier) = &self.components.redis_notifier {
            self.handles.push(redis_notifier.start(self.cancel.clone()));
        }

        // Subscribe before the initial load so nothing written in between is missed.
        let changes = self.components.notifier.subscribe();
        if let Err(e) = self.components.resolver.rebuild_all().await {
            warn!(error = %e, "Initial resolver index load failed, continuing with an empty index");
        }
        self.handles.push(
            self.components
                .resolver
                .clone()
                .run(changes, self.cancel.clone()),
        );

        self.handles
            .push(self.components.synchronizer.clone().run(self.cancel.clone()));
        self.handles
            .push(self.components.monitor.clone().start(self.cancel.clone()));

        let dns = Arc::new(
            DnsServer::bind(&self.config.dns_address(), self.components.resolver.clone())
                .await
                .with_context(|| format!("Failed to bind DNS on {}", self.config.dns_address()))?,
        );
        self.handles.push(dns.serve(self.cancel.clone()));

        let mut http_handle = self.start_http_server().await?;

        self.components.health.mark_ready();
        info!("All components started successfully");

        let http_finished = tokio::select! {
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
                false
            }
            _ = &mut http_handle => {
                error!("HTTP server stopped unexpectedly");
                true
            }
        };
        if !http_finished {
            self.handles.push(http_handle);
        }

        self.shutdown().await;
        Ok(())
    }

    async fn start_http_server(&self) -> anyhow::Result<JoinHandle<()>> {
        let addr = self.config.http_address();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind HTTP on {addr}"))?;
        info!(addr = %addr, "HTTP listening");

        let state = AppState::new(
            self.components.store.clone(),
            self.components.health.clone(),
            PeerAuthenticator::new(&self.config.cluster.peers),
            &self.config.cluster.identifier,
        );
        let router = create_router(state);
        let shutdown = self.cancel.clone().cancelled_owned();

        Ok(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "HTTP server error");
            }
        }))
    }

    /// Stop accepting work, cancel every loop and wait a bounded time for them
    async fn shutdown(self) {
        info!("Shutting down GSLB...");
        self.components.health.mark_not_ready();
        self.cancel.cancel();

        let pending = self.handles.len();
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join_all(self.handles)).await {
            Ok(results) => {
                let panicked = results.iter().filter(|r| r.is_err()).count();
                if panicked > 0 {
                    warn!(panicked, "Some tasks ended abnormally");
                }
                info!(tasks = pending, "Shutdown complete");
            }
            Err(_) => {
                warn!(
                    timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                    "Timed out waiting for background tasks, exiting anyway"
                );
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
