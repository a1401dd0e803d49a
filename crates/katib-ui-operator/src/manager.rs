//! # Operator Manager
//!
//! Sequential event loop for the Katib UI operator

use crate::config::{CharmConfig, ConfigSource};
use crate::controller::{CharmEvent, Controller, Handler, HandlerOutcome, MetricsSnapshot};
use crate::error::{ConfigError, HostError};
use crate::host::HostHandles;
use crate::image::ImageResource;
use crate::reconciler::KatibUiReconciler;
use crate::status::UnitStatus;
use crate::OperatorConfig;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Main operator manager
pub struct OperatorManager {
    operator: OperatorConfig,
    config_source: ConfigSource,
    controller: Controller,
    handles: HostHandles,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl OperatorManager {
    pub fn new(
        operator: OperatorConfig,
        config_source: ConfigSource,
        controller: Controller,
        handles: HostHandles,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        Self {
            operator,
            config_source,
            controller,
            handles,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Handle one event with freshly loaded configuration
    pub async fn handle_event(&self, event: &CharmEvent) -> Result<HandlerOutcome, HostError> {
        let config = match event.handler() {
            // Sidebar handlers read only the operator identity
            Handler::SidebarJoined(_) | Handler::SidebarDeparted(_) => CharmConfig::default(),
            Handler::SetPodSpec => match self.config_source.load().await {
                Ok(config) => config,
                Err(e) => {
                    // The reconciler stops at the leadership check before reading the config
                    if !self.handles.leadership.is_leader().await? {
                        debug!(%event, error = %e, "Configuration rejected on a non-leader unit");
                        CharmConfig::default()
                    } else {
                        return self.reject_config(event, e).await;
                    }
                }
            },
        };

        let ctx = self.handles.context(&self.operator, &config);
        self.controller.handle(event, &ctx).await
    }

    async fn reject_config(&self, event: &CharmEvent, err: ConfigError) -> Result<HandlerOutcome, HostError> {
        warn!(%event, error = %err, "Configuration rejected, skipping event");
        let status = UnitStatus::blocked(format!("Invalid config: {err}"));
        self.handles.status.set_status(status.clone()).await?;
        Ok(HandlerOutcome::ConfigRejected(status))
    }

    /// Process events until the channel closes or a shutdown signal arrives
    pub async fn run(mut self, mut events: mpsc::Receiver<CharmEvent>) -> MetricsSnapshot {
        info!("Starting Katib UI operator v{}", env!("CARGO_PKG_VERSION"));
        info!(
            app = %self.operator.app_name,
            model = %self.operator.model_name,
            "Operator configuration"
        );

        let mut shutdown_rx = std::mem::replace(&mut self.shutdown_rx, self.shutdown_tx.subscribe());
        let ctrl_c = signal::ctrl_c();
        let terminate = terminate_signal();
        tokio::pin!(ctrl_c, terminate);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        // Host failures are left for redelivery
                        if let Err(e) = self.handle_event(&event).await {
                            error!(%event, error = %e, "Host rejected event handling");
                        }
                    }
                    None => {
                        info!("Event channel closed");
                        break;
                    }
                },
                _ = &mut ctrl_c => {
                    info!("Received SIGINT, shutting down");
                    break;
                }
                _ = &mut terminate => {
                    info!("Received SIGTERM, shutting down");
                    break;
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal from internal component");
                    break;
                }
            }
        }

        let metrics = self.controller.metrics();
        info!(
            handled = metrics.events_handled,
            failed = metrics.events_failed,
            published = metrics.specs_published,
            "Katib UI operator stopped"
        );
        metrics
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.operator
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Sender that stops [`OperatorManager::run`]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Send shutdown signal
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}

/// Operator builder for fluent configuration
pub struct OperatorBuilder {
    operator: OperatorConfig,
    config_source: ConfigSource,
    image: Arc<dyn ImageResource>,
    handles: HostHandles,
}

impl OperatorBuilder {
    pub fn new(image: Arc<dyn ImageResource>, handles: HostHandles) -> Self {
        Self {
            operator: OperatorConfig::default(),
            config_source: ConfigSource::default(),
            image,
            handles,
        }
    }

    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.operator.app_name = app_name.into();
        self
    }

    pub fn model_name(mut self, model_name: impl Into<String>) -> Self {
        self.operator.model_name = model_name.into();
        self
    }

    pub fn field_manager(mut self, field_manager: impl Into<String>) -> Self {
        self.operator.field_manager = field_manager.into();
        self
    }

    pub fn config_source(mut self, source: ConfigSource) -> Self {
        self.config_source = source;
        self
    }

    pub fn build(self) -> OperatorManager {
        let controller = Controller::new(Arc::new(KatibUiReconciler::new(self.image)));
        OperatorManager::new(self.operator, self.config_source, controller, self.handles)
    }
}
