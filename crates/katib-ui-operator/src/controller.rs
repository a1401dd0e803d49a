//! # Event Controller
//!
//! Explicit table from charm events to their handlers

use crate::error::HostError;
use crate::host::{Context, RelationId};
use crate::reconciler::KatibUiReconciler;
use crate::sidebar::SidebarEntry;
use crate::status::UnitStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Lifecycle and relation events the charm observes
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum CharmEvent {
    Install,
    UpgradeCharm,
    LeaderElected,
    IngressRelationChanged { relation_id: RelationId },
    SidebarRelationJoined { relation_id: RelationId },
    SidebarRelationDeparted { relation_id: RelationId },
}

/// Handler an event is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    SetPodSpec,
    SidebarJoined(RelationId),
    SidebarDeparted(RelationId),
}

impl CharmEvent {
    pub fn handler(&self) -> Handler {
        match self {
            CharmEvent::Install
            | CharmEvent::UpgradeCharm
            | CharmEvent::LeaderElected
            | CharmEvent::IngressRelationChanged { .. } => Handler::SetPodSpec,
            CharmEvent::SidebarRelationJoined { relation_id } => Handler::SidebarJoined(*relation_id),
            CharmEvent::SidebarRelationDeparted { relation_id } => Handler::SidebarDeparted(*relation_id),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CharmEvent::Install => "install",
            CharmEvent::UpgradeCharm => "upgrade-charm",
            CharmEvent::LeaderElected => "leader-elected",
            CharmEvent::IngressRelationChanged { .. } => "ingress-relation-changed",
            CharmEvent::SidebarRelationJoined { .. } => "sidebar-relation-joined",
            CharmEvent::SidebarRelationDeparted { .. } => "sidebar-relation-departed",
        }
    }
}

impl fmt::Display for CharmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What handling one event did
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    Reconciled(UnitStatus),
    SidebarPublished {
        relation_id: RelationId,
        entries: Vec<SidebarEntry>,
    },
    SkippedNotLeader,
    /// The configuration failed to load; the event was not dispatched
    ConfigRejected(UnitStatus),
}

/// Routes events through [`KatibUiReconciler`]
pub struct Controller {
    reconciler: Arc<KatibUiReconciler>,
    metrics: ControllerMetrics,
}

impl Controller {
    pub fn new(reconciler: Arc<KatibUiReconciler>) -> Self {
        Self {
            reconciler,
            metrics: ControllerMetrics::default(),
        }
    }

    pub fn reconciler(&self) -> &KatibUiReconciler {
        &self.reconciler
    }

    /// Handle a single event to completion
    pub async fn handle(&self, event: &CharmEvent, ctx: &Context<'_>) -> Result<HandlerOutcome, HostError> {
        let started = Instant::now();
        info!(%event, handler = ?event.handler(), "Handling event");

        let result = self.dispatch(event, ctx).await;

        self.metrics.events_handled.fetch_add(1, Ordering::Relaxed);
        match &result {
            Ok(outcome) => {
                if outcome == &HandlerOutcome::Reconciled(UnitStatus::Active) {
                    self.metrics.specs_published.fetch_add(1, Ordering::Relaxed);
                }
                info!(%event, elapsed_ms = started.elapsed().as_millis() as u64, "Event handled");
            }
            Err(e) => {
                self.metrics.events_failed.fetch_add(1, Ordering::Relaxed);
                error!(%event, error = %e, "Event handling failed");
            }
        }
        result
    }

    async fn dispatch(&self, event: &CharmEvent, ctx: &Context<'_>) -> Result<HandlerOutcome, HostError> {
        match event.handler() {
            Handler::SetPodSpec => self.reconciler.set_pod_spec(ctx).await.map(HandlerOutcome::Reconciled),
            Handler::SidebarJoined(relation_id) => {
                let published = self.reconciler.on_sidebar_relation_joined(ctx, relation_id).await?;
                Ok(sidebar_outcome(published, relation_id, vec![SidebarEntry::katib(ctx.app_name())]))
            }
            Handler::SidebarDeparted(relation_id) => {
                let published = self.reconciler.on_sidebar_relation_departed(ctx, relation_id).await?;
                Ok(sidebar_outcome(published, relation_id, Vec::new()))
            }
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

fn sidebar_outcome(published: bool, relation_id: RelationId, entries: Vec<SidebarEntry>) -> HandlerOutcome {
    if published {
        HandlerOutcome::SidebarPublished { relation_id, entries }
    } else {
        HandlerOutcome::SkippedNotLeader
    }
}

/// Controller counters
#[derive(Debug, Default)]
pub struct ControllerMetrics {
    events_handled: AtomicU64,
    events_failed: AtomicU64,
    specs_published: AtomicU64,
}

impl ControllerMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_handled: self.events_handled.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            specs_published: self.specs_published.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ControllerMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub events_handled: u64,
    pub events_failed: u64,
    pub specs_published: u64,
}
