//! # Relation Interfaces
//!
//! Versioned relation data: both sides list `_supported_versions`, the
//! highest common version wins, payloads travel as YAML under `data`.

use crate::error::{HostError, InterfaceError};
use crate::host::{RelationId, RelationStore, RemoteEndpoint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub const INGRESS: &str = "ingress";

/// Data bag key holding a side's supported schema versions
pub const VERSIONS_KEY: &str = "_supported_versions";

/// Data bag key holding the payload
pub const DATA_KEY: &str = "data";

/// Local schema declaration for one relation endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSchema {
    pub endpoint: String,
    /// Supported versions, lowest preference first
    pub versions: Vec<String>,
}

impl InterfaceSchema {
    pub fn new(endpoint: impl Into<String>, versions: &[&str]) -> Self {
        Self {
            endpoint: endpoint.into(),
            versions: versions.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn ingress() -> Self {
        Self::new(INGRESS, &["v1"])
    }
}

/// A negotiated relation interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationInterface {
    pub endpoint: String,
    pub version: String,
    pub relation_ids: Vec<RelationId>,
    local_versions: Vec<String>,
}

impl RelationInterface {
    /// Publish `payload` to every relation on this endpoint
    pub async fn send_data<T: Serialize + ?Sized>(
        &self,
        store: &dyn RelationStore,
        payload: &T,
    ) -> Result<(), HostError> {
        let data = serde_yaml::to_string(payload)?;
        let versions = serde_yaml::to_string(&self.local_versions)?;

        for relation_id in &self.relation_ids {
            store
                .set_local_app_data(*relation_id, VERSIONS_KEY, versions.clone())
                .await?;
            store.set_local_app_data(*relation_id, DATA_KEY, data.clone()).await?;
            debug!(endpoint = %self.endpoint, relation_id, version = %self.version, "Sent interface data");
        }
        Ok(())
    }
}

/// Negotiated interfaces keyed by endpoint; `None` when nothing is related
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceSet {
    interfaces: BTreeMap<String, Option<RelationInterface>>,
}

impl InterfaceSet {
    pub fn get(&self, endpoint: &str) -> Option<&RelationInterface> {
        self.interfaces.get(endpoint).and_then(Option::as_ref)
    }

    pub fn ingress(&self) -> Option<&RelationInterface> {
        self.get(INGRESS)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.interfaces.keys().map(String::as_str)
    }
}

/// Remote applications of every declared endpoint
pub async fn related_endpoints(
    store: &dyn RelationStore,
    schemas: &[InterfaceSchema],
) -> Result<BTreeMap<String, Vec<RemoteEndpoint>>, HostError> {
    let mut related = BTreeMap::new();
    for schema in schemas {
        let remotes = store.remote_endpoints(&schema.endpoint).await?;
        related.insert(schema.endpoint.clone(), remotes);
    }
    Ok(related)
}

/// Negotiate every declared endpoint, in declaration order
pub fn get_interfaces(
    schemas: &[InterfaceSchema],
    related: &BTreeMap<String, Vec<RemoteEndpoint>>,
) -> Result<InterfaceSet, InterfaceError> {
    let mut set = InterfaceSet::default();

    for schema in schemas {
        let remotes = related.get(&schema.endpoint).map(Vec::as_slice).unwrap_or_default();

        let interface = if remotes.is_empty() {
            None
        } else {
            let listed = remotes
                .iter()
                .map(|remote| (remote.app.clone(), remote_versions(remote.app_data.get(VERSIONS_KEY))))
                .collect::<Vec<_>>();
            let version = negotiate(schema, &listed)?;

            Some(RelationInterface {
                endpoint: schema.endpoint.clone(),
                version,
                relation_ids: remotes.iter().map(|remote| remote.relation_id).collect(),
                local_versions: schema.versions.clone(),
            })
        };

        set.interfaces.insert(schema.endpoint.clone(), interface);
    }

    Ok(set)
}

fn remote_versions(raw: Option<&String>) -> Option<Vec<String>> {
    raw.and_then(|raw| serde_yaml::from_str::<Vec<String>>(raw).ok())
}

/// Pick the most preferred local version every remote app supports
pub fn negotiate(
    schema: &InterfaceSchema,
    remotes: &[(String, Option<Vec<String>>)],
) -> Result<String, InterfaceError> {
    let unlisted = remotes
        .iter()
        .filter(|(_, versions)| versions.as_ref().map_or(true, Vec::is_empty))
        .map(|(app, _)| app.clone())
        .collect::<Vec<_>>();
    if !unlisted.is_empty() {
        return Err(InterfaceError::NoVersionsListed {
            relation: schema.endpoint.clone(),
            apps: unlisted,
        });
    }

    let supports = |version: &String| {
        remotes
            .iter()
            .all(|(_, versions)| versions.as_ref().is_some_and(|v| v.contains(version)))
    };

    match schema.versions.iter().rev().find(|version| supports(version)) {
        Some(version) => Ok(version.clone()),
        None => {
            let incompatible = remotes
                .iter()
                .filter(|(_, versions)| {
                    versions
                        .as_ref()
                        .is_some_and(|v| !v.iter().any(|version| schema.versions.contains(version)))
                })
                .map(|(app, _)| app.clone())
                .collect::<Vec<_>>();
            let apps = if incompatible.is_empty() {
                remotes.iter().map(|(app, _)| app.clone()).collect()
            } else {
                incompatible
            };
            Err(InterfaceError::NoCompatibleVersions {
                relation: schema.endpoint.clone(),
                apps,
            })
        }
    }
}

/// Ingress route request
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct IngressRequest {
    pub prefix: String,
    pub service: String,
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;

    fn remote(app: &str, versions: Option<&[&str]>) -> (String, Option<Vec<String>>) {
        (
            app.to_string(),
            versions.map(|v| v.iter().map(|s| s.to_string()).collect()),
        )
    }

    #[test]
    fn test_negotiate_picks_highest_common_version() {
        let schema = InterfaceSchema::new("ingress", &["v1", "v2"]);
        let version = negotiate(&schema, &[remote("a", Some(&["v1", "v2"])), remote("b", Some(&["v1"]))]).unwrap();
        assert_eq!(version, "v1");

        let version = negotiate(&schema, &[remote("a", Some(&["v1", "v2"]))]).unwrap();
        assert_eq!(version, "v2");
    }

    #[test]
    fn test_unlisted_versions_come_first() {
        let schema = InterfaceSchema::ingress();
        let err = negotiate(&schema, &[remote("a", Some(&["v9"])), remote("b", None)]).unwrap_err();
        assert_eq!(
            err,
            InterfaceError::NoVersionsListed {
                relation: "ingress".to_string(),
                apps: vec!["b".to_string()],
            }
        );
    }

    #[test]
    fn test_incompatible_versions() {
        let schema = InterfaceSchema::ingress();
        let err = negotiate(&schema, &[remote("a", Some(&["v2"])), remote("b", Some(&["v1"]))]).unwrap_err();
        assert_eq!(
            err,
            InterfaceError::NoCompatibleVersions {
                relation: "ingress".to_string(),
                apps: vec!["a".to_string()],
            }
        );
    }

    #[tokio::test]
    async fn test_unrelated_endpoint_is_none() {
        let host = MemoryHost::new();
        let schemas = [InterfaceSchema::ingress()];
        let related = related_endpoints(&host, &schemas).await.unwrap();
        let set = get_interfaces(&schemas, &related).unwrap();
        assert!(set.ingress().is_none());
        assert_eq!(set.endpoints().collect::<Vec<_>>(), vec!["ingress"]);
    }

    #[tokio::test]
    async fn test_send_data_writes_yaml_payload_and_versions() {
        let host = MemoryHost::new();
        let id = host.add_relation("ingress", "istio-pilot").await;
        host.set_remote_app_data(id, VERSIONS_KEY, "[v1]").await.unwrap();

        let schemas = [InterfaceSchema::ingress()];
        let related = related_endpoints(&host, &schemas).await.unwrap();
        let set = get_interfaces(&schemas, &related).unwrap();
        let ingress = set.ingress().unwrap();
        assert_eq!(ingress.version, "v1");

        let request = IngressRequest {
            prefix: "/katib/".to_string(),
            service: "katib-ui".to_string(),
            port: 8080,
        };
        ingress.send_data(&host, &request).await.unwrap();

        let bag = host.local_app_data(id).await.unwrap();
        let sent: IngressRequest = serde_yaml::from_str(&bag[DATA_KEY]).unwrap();
        assert_eq!(sent, request);
        let versions: Vec<String> = serde_yaml::from_str(&bag[VERSIONS_KEY]).unwrap();
        assert_eq!(versions, vec!["v1"]);
    }
}
