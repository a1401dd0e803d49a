//! # Host Handles
//!
//! Everything the operator reads from or writes to the host platform goes
//! through these traits. Handlers receive them explicitly in a [`Context`].

use crate::config::CharmConfig;
use crate::error::HostError;
use crate::pod_spec::PodSpec;
use crate::status::UnitStatus;
use crate::OperatorConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub type RelationId = usize;

/// Application data bag of one relation
pub type DataBag = BTreeMap<String, String>;

/// Leadership query for the local unit
#[async_trait]
pub trait Leadership: Send + Sync {
    async fn is_leader(&self) -> Result<bool, HostError>;
}

/// Receives the unit status
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn set_status(&self, status: UnitStatus) -> Result<(), HostError>;
}

/// Accepts the desired pod spec
#[async_trait]
pub trait PodSpecSink: Send + Sync {
    async fn set_spec(&self, spec: &PodSpec) -> Result<(), HostError>;
}

/// One remote application on a relation endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub relation_id: RelationId,
    pub app: String,
    pub app_data: DataBag,
}

/// Relation data access
#[async_trait]
pub trait RelationStore: Send + Sync {
    /// Remote applications currently related on `endpoint`
    async fn remote_endpoints(&self, endpoint: &str) -> Result<Vec<RemoteEndpoint>, HostError>;

    /// Write a key into the local application's bag on a relation
    async fn set_local_app_data(&self, relation_id: RelationId, key: &str, value: String) -> Result<(), HostError>;
}

/// Handles and inputs for handling a single event
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub operator: &'a OperatorConfig,
    pub config: &'a CharmConfig,
    pub leadership: &'a dyn Leadership,
    pub status: &'a dyn StatusSink,
    pub relations: &'a dyn RelationStore,
    pub pod_spec: &'a dyn PodSpecSink,
}

impl<'a> Context<'a> {
    pub fn app_name(&self) -> &str {
        &self.operator.app_name
    }

    /// Model name, which is also the Kubernetes namespace
    pub fn model_name(&self) -> &str {
        &self.operator.model_name
    }
}

/// Owned set of host handles that outlives individual events
#[derive(Clone)]
pub struct HostHandles {
    pub leadership: Arc<dyn Leadership>,
    pub status: Arc<dyn StatusSink>,
    pub relations: Arc<dyn RelationStore>,
    pub pod_spec: Arc<dyn PodSpecSink>,
}

impl HostHandles {
    /// All handles served by one in-memory host
    pub fn in_memory(host: Arc<MemoryHost>) -> Self {
        Self {
            leadership: host.clone(),
            status: host.clone(),
            relations: host.clone(),
            pod_spec: host,
        }
    }

    pub fn with_pod_spec_sink(mut self, sink: Arc<dyn PodSpecSink>) -> Self {
        self.pod_spec = sink;
        self
    }

    pub fn context<'a>(&'a self, operator: &'a OperatorConfig, config: &'a CharmConfig) -> Context<'a> {
        Context {
            operator,
            config,
            leadership: self.leadership.as_ref(),
            status: self.status.as_ref(),
            relations: self.relations.as_ref(),
            pod_spec: self.pod_spec.as_ref(),
        }
    }
}

/// A status as it was recorded
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    pub status: UnitStatus,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct RelationState {
    endpoint: String,
    remote_app: String,
    remote_app_data: DataBag,
    local_app_data: DataBag,
}

/// In-process host: records statuses, relation data and published pod specs
#[derive(Debug, Default)]
pub struct MemoryHost {
    leader: AtomicBool,
    next_relation_id: AtomicUsize,
    statuses: Mutex<Vec<StatusRecord>>,
    relations: Mutex<BTreeMap<RelationId, RelationState>>,
    pod_specs: Mutex<Vec<PodSpec>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn leader() -> Self {
        let host = Self::default();
        host.set_leader(true);
        host
    }

    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }

    /// Relate a remote application on `endpoint` and return the relation id
    pub async fn add_relation(&self, endpoint: &str, remote_app: &str) -> RelationId {
        let id = self.next_relation_id.fetch_add(1, Ordering::SeqCst);
        self.relations.lock().await.insert(
            id,
            RelationState {
                endpoint: endpoint.to_string(),
                remote_app: remote_app.to_string(),
                remote_app_data: DataBag::new(),
                local_app_data: DataBag::new(),
            },
        );
        id
    }

    /// Register a relation under an externally assigned id unless it already exists.
    /// Returns whether it was added.
    pub async fn ensure_relation(&self, relation_id: RelationId, endpoint: &str, remote_app: &str) -> bool {
        let mut relations = self.relations.lock().await;
        if relations.contains_key(&relation_id) {
            return false;
        }
        relations.insert(
            relation_id,
            RelationState {
                endpoint: endpoint.to_string(),
                remote_app: remote_app.to_string(),
                remote_app_data: DataBag::new(),
                local_app_data: DataBag::new(),
            },
        );
        self.next_relation_id.fetch_max(relation_id + 1, Ordering::SeqCst);
        true
    }

    pub async fn remove_relation(&self, relation_id: RelationId) {
        self.relations.lock().await.remove(&relation_id);
    }

    pub async fn set_remote_app_data(
        &self,
        relation_id: RelationId,
        key: &str,
        value: impl Into<String>,
    ) -> Result<(), HostError> {
        let mut relations = self.relations.lock().await;
        let relation = relations
            .get_mut(&relation_id)
            .ok_or(HostError::UnknownRelation(relation_id))?;
        relation.remote_app_data.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Local application bag of a relation, if the relation exists
    pub async fn local_app_data(&self, relation_id: RelationId) -> Option<DataBag> {
        self.relations
            .lock()
            .await
            .get(&relation_id)
            .map(|relation| relation.local_app_data.clone())
    }

    pub async fn statuses(&self) -> Vec<StatusRecord> {
        self.statuses.lock().await.clone()
    }

    pub async fn current_status(&self) -> Option<UnitStatus> {
        self.statuses.lock().await.last().map(|record| record.status.clone())
    }

    pub async fn pod_specs(&self) -> Vec<PodSpec> {
        self.pod_specs.lock().await.clone()
    }

    pub async fn last_pod_spec(&self) -> Option<PodSpec> {
        self.pod_specs.lock().await.last().cloned()
    }
}

#[async_trait]
impl Leadership for MemoryHost {
    async fn is_leader(&self) -> Result<bool, HostError> {
        Ok(self.leader.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl StatusSink for MemoryHost {
    async fn set_status(&self, status: UnitStatus) -> Result<(), HostError> {
        debug!(%status, "Recording status");
        self.statuses.lock().await.push(StatusRecord {
            status,
            recorded_at: Utc::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl PodSpecSink for MemoryHost {
    async fn set_spec(&self, spec: &PodSpec) -> Result<(), HostError> {
        self.pod_specs.lock().await.push(spec.clone());
        Ok(())
    }
}

#[async_trait]
impl RelationStore for MemoryHost {
    async fn remote_endpoints(&self, endpoint: &str) -> Result<Vec<RemoteEndpoint>, HostError> {
        Ok(self
            .relations
            .lock()
            .await
            .iter()
            .filter(|(_, relation)| relation.endpoint == endpoint)
            .map(|(id, relation)| RemoteEndpoint {
                relation_id: *id,
                app: relation.remote_app.clone(),
                app_data: relation.remote_app_data.clone(),
            })
            .collect())
    }

    async fn set_local_app_data(&self, relation_id: RelationId, key: &str, value: String) -> Result<(), HostError> {
        let mut relations = self.relations.lock().await;
        let relation = relations
            .get_mut(&relation_id)
            .ok_or(HostError::UnknownRelation(relation_id))?;
        relation.local_app_data.insert(key.to_string(), value);
        Ok(())
    }
}
