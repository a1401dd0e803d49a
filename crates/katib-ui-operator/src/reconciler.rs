//! # Katib UI Reconciler
//!
//! Pod spec reconciliation and sidebar publishing.
//!
//! Checks run strictly in order and stop at the first failure; a failed
//! check only changes the unit status and leaves the previous pod spec in
//! place at the host.

use crate::error::{CheckFailed, HostError};
use crate::host::{Context, RelationId};
use crate::image::ImageResource;
use crate::interface::{get_interfaces, related_endpoints, IngressRequest, InterfaceSchema, InterfaceSet};
use crate::pod_spec::PodSpec;
use crate::sidebar::{self, SidebarEntry, SIDEBAR_KEY};
use crate::status::UnitStatus;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const INGRESS_PREFIX: &str = "/katib/";
pub const WAITING_FOR_LEADERSHIP: &str = "Waiting for leadership";
pub const SETTING_POD_SPEC: &str = "Setting pod spec";

/// Why the checks stopped
#[derive(Debug)]
enum ReconcileError {
    Check(CheckFailed),
    Host(HostError),
}

impl From<CheckFailed> for ReconcileError {
    fn from(failed: CheckFailed) -> Self {
        ReconcileError::Check(failed)
    }
}

impl From<HostError> for ReconcileError {
    fn from(err: HostError) -> Self {
        ReconcileError::Host(err)
    }
}

/// Reconciler for the Katib UI workload
pub struct KatibUiReconciler {
    image: Arc<dyn ImageResource>,
    schemas: Vec<InterfaceSchema>,
}

impl KatibUiReconciler {
    pub fn new(image: Arc<dyn ImageResource>) -> Self {
        Self {
            image,
            schemas: vec![InterfaceSchema::ingress()],
        }
    }

    /// Replace the declared relation schemas
    pub fn with_schemas(mut self, schemas: Vec<InterfaceSchema>) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn image_resource(&self) -> &dyn ImageResource {
        self.image.as_ref()
    }

    /// Main reconciliation logic.
    ///
    /// Returns the final status. Errors are host failures only.
    pub async fn set_pod_spec(&self, ctx: &Context<'_>) -> Result<UnitStatus, HostError> {
        info!(app = ctx.app_name(), model = ctx.model_name(), "Reconciling pod spec");

        let interfaces = match self.run_checks(ctx).await {
            Ok(interfaces) => interfaces,
            Err(ReconcileError::Check(failed)) => {
                info!(status = %failed, "Pod spec not updated");
                return publish_status(ctx, failed.status()).await;
            }
            Err(ReconcileError::Host(e)) => return Err(e),
        };

        self.configure_ingress(ctx, &interfaces).await?;

        ctx.status.set_status(UnitStatus::maintenance(SETTING_POD_SPEC)).await?;

        // The pre-check result is not reused; the resource may have changed since
        let image_details = match self.image.fetch().await {
            Ok(details) => details,
            Err(e) => {
                warn!(resource = self.image.name(), error = %e, "Image resource unavailable");
                return publish_status(ctx, e.status()).await;
            }
        };

        let spec = PodSpec::katib_ui(ctx.config.port, ctx.model_name(), image_details);
        ctx.pod_spec.set_spec(&spec).await?;
        info!(port = ctx.config.port, namespace = ctx.model_name(), "Pod spec published");

        publish_status(ctx, UnitStatus::Active).await
    }

    async fn run_checks(&self, ctx: &Context<'_>) -> Result<InterfaceSet, ReconcileError> {
        self.check_leader(ctx).await?;
        let interfaces = self.get_interfaces(ctx).await?;
        self.check_image_details().await?;
        Ok(interfaces)
    }

    async fn check_leader(&self, ctx: &Context<'_>) -> Result<(), ReconcileError> {
        if ctx.leadership.is_leader().await? {
            Ok(())
        } else {
            Err(CheckFailed::waiting(WAITING_FOR_LEADERSHIP).into())
        }
    }

    async fn get_interfaces(&self, ctx: &Context<'_>) -> Result<InterfaceSet, ReconcileError> {
        let related = related_endpoints(ctx.relations, &self.schemas).await?;
        get_interfaces(&self.schemas, &related).map_err(|e| ReconcileError::Check(e.into()))
    }

    async fn check_image_details(&self) -> Result<(), ReconcileError> {
        self.image
            .fetch()
            .await
            .map(|_| ())
            .map_err(|e| ReconcileError::Check(e.into()))
    }

    async fn configure_ingress(&self, ctx: &Context<'_>, interfaces: &InterfaceSet) -> Result<(), HostError> {
        let Some(ingress) = interfaces.ingress() else {
            debug!("No ingress relation, skipping ingress configuration");
            return Ok(());
        };

        let request = IngressRequest {
            prefix: INGRESS_PREFIX.to_string(),
            service: ctx.app_name().to_string(),
            port: ctx.config.port,
        };
        ingress.send_data(ctx.relations, &request).await?;
        info!(prefix = INGRESS_PREFIX, port = ctx.config.port, "Ingress configured");
        Ok(())
    }

    /// Advertise the sidebar entry. Returns whether anything was written.
    pub async fn on_sidebar_relation_joined(
        &self,
        ctx: &Context<'_>,
        relation_id: RelationId,
    ) -> Result<bool, HostError> {
        let entries = [SidebarEntry::katib(ctx.app_name())];
        publish_sidebar(ctx, relation_id, &entries).await
    }

    /// Withdraw the sidebar entry. Returns whether anything was written.
    pub async fn on_sidebar_relation_departed(
        &self,
        ctx: &Context<'_>,
        relation_id: RelationId,
    ) -> Result<bool, HostError> {
        publish_sidebar(ctx, relation_id, &[]).await
    }
}

async fn publish_status(ctx: &Context<'_>, status: UnitStatus) -> Result<UnitStatus, HostError> {
    ctx.status.set_status(status.clone()).await?;
    Ok(status)
}

/// Only the leader's application data is authoritative
async fn publish_sidebar(
    ctx: &Context<'_>,
    relation_id: RelationId,
    entries: &[SidebarEntry],
) -> Result<bool, HostError> {
    if !ctx.leadership.is_leader().await? {
        debug!(relation_id, "Not leader, leaving sidebar data alone");
        return Ok(false);
    }

    let payload = sidebar::encode(entries)?;
    ctx.relations.set_local_app_data(relation_id, SIDEBAR_KEY, payload).await?;
    info!(relation_id, entries = entries.len(), "Sidebar data published");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CharmConfig;
    use crate::host::{HostHandles, MemoryHost};
    use crate::image::{ImageDetails, StaticImageResource};
    use crate::OperatorConfig;

    fn reconciler() -> KatibUiReconciler {
        KatibUiReconciler::new(Arc::new(StaticImageResource::new(
            "oci-image",
            ImageDetails::new("kubeflowkatib/katib-ui:v0.11.1"),
        )))
    }

    #[tokio::test]
    async fn test_non_leader_waits() {
        let host = Arc::new(MemoryHost::new());
        let handles = HostHandles::in_memory(host.clone());
        let operator = OperatorConfig::default();
        let config = CharmConfig::default();

        let status = reconciler()
            .set_pod_spec(&handles.context(&operator, &config))
            .await
            .unwrap();

        assert_eq!(status, UnitStatus::waiting(WAITING_FOR_LEADERSHIP));
        assert!(host.pod_specs().await.is_empty());
    }

    #[tokio::test]
    async fn test_leader_publishes_spec_and_goes_active() {
        let host = Arc::new(MemoryHost::leader());
        let handles = HostHandles::in_memory(host.clone());
        let operator = OperatorConfig::default();
        let config = CharmConfig::new(5000);

        let status = reconciler()
            .set_pod_spec(&handles.context(&operator, &config))
            .await
            .unwrap();

        assert_eq!(status, UnitStatus::Active);
        let spec = host.last_pod_spec().await.unwrap();
        assert_eq!(spec.port(), Some(5000));

        let statuses = host.statuses().await;
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].status, UnitStatus::maintenance(SETTING_POD_SPEC));
    }

    #[tokio::test]
    async fn test_sidebar_non_leader_writes_nothing() {
        let host = Arc::new(MemoryHost::new());
        let id = host.add_relation("sidebar", "kubeflow-dashboard").await;
        let handles = HostHandles::in_memory(host.clone());
        let operator = OperatorConfig::default();
        let config = CharmConfig::default();
        let ctx = handles.context(&operator, &config);

        assert!(!reconciler().on_sidebar_relation_joined(&ctx, id).await.unwrap());
        assert!(!reconciler().on_sidebar_relation_departed(&ctx, id).await.unwrap());
        assert!(host.local_app_data(id).await.unwrap().is_empty());
    }
}
