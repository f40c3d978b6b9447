use crate::api;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::evaluator::Evaluator;
use crate::router;
use arbiter_runtime::{capabilities, ExecutionBackend, ProcessBackend};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Engine {
    config: Arc<EngineConfig>,
    evaluator: Arc<Evaluator>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let backend = Arc::new(ProcessBackend::new(&config.runtime_config()));
        Self::with_backend(config, backend)
    }

    /// Builds an engine around a custom execution backend.
    pub fn with_backend(config: EngineConfig, backend: Arc<dyn ExecutionBackend>) -> Result<Self> {
        info!("Initializing Arbiter engine");

        let registry = config
            .build_registry()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        let evaluator = Arc::new(Evaluator::new(
            Arc::new(registry),
            backend,
            config.judge.workspace_root.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            evaluator,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn evaluator(&self) -> Arc<Evaluator> {
        self.evaluator.clone()
    }

    pub fn router(&self) -> Router {
        let router = api::build_router(self.evaluator.clone(), self.config.clone());

        if self.config.server.enable_cors {
            router::with_cors(router)
        } else {
            router
        }
    }

    pub async fn start_server(&self) -> Result<()> {
        let host = &self.config.server.host;
        let ip = host
            .parse::<std::net::IpAddr>()
            .map_err(|e| EngineError::Config(format!("Invalid host '{}': {}", host, e)))?;
        let addr = SocketAddr::from((ip, self.config.server.port));

        tokio::fs::create_dir_all(&self.config.judge.workspace_root).await?;
        self.log_startup_banner(addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Listening on http://{}", listener.local_addr()?);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| EngineError::Api(e.to_string()))?;

        info!("Server stopped");
        Ok(())
    }

    pub async fn run(&self) -> Result<()> {
        self.start_server().await
    }

    fn log_startup_banner(&self, addr: SocketAddr) {
        let caps = capabilities();
        let languages: Vec<&str> = self
            .evaluator
            .registry()
            .profiles()
            .map(|p| p.id())
            .collect();

        info!("Starting Arbiter judge on {}", addr);
        info!(
            "Platform: {} ({})",
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        info!("Languages: {}", languages.join(", "));
        info!(
            "Workspace root: {}",
            self.config.judge.workspace_root.display()
        );
        info!(
            "Concurrent evaluations: {}",
            self.config.judge.max_concurrent_evaluations
        );

        if caps.cpu_time_limit {
            info!("CPU time limits enforced per process");
        } else {
            warn!("CPU time limits unavailable on this platform; only wall-clock timeouts apply");
        }
        if caps.address_space_limit {
            info!("Address space limits enforced per process");
        } else {
            warn!("Memory limits cannot be enforced on this platform; relying on out-of-memory detection in program output");
        }
        if !caps.memory_measurement {
            warn!("Peak memory measurement unavailable; memory usage is reported as N/A");
        }
        if !caps.process_group_kill {
            warn!("Process-tree termination unavailable; only the direct child is killed on timeout");
        }
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C signal, shutting down..."),
        Err(e) => {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
