//! # Pod Spec
//!
//! Desired state handed to the host platform (pod spec format version 3)

use crate::image::ImageDetails;
use k8s_openapi::api::rbac::v1::PolicyRule;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const POD_SPEC_VERSION: u32 = 3;

pub const CONTAINER_NAME: &str = "katib-ui";
pub const CONTAINER_COMMAND: &str = "./katib-ui";
pub const HTTP_PORT_NAME: &str = "http";
pub const NAMESPACE_ENV: &str = "KATIB_CORE_NAMESPACE";
pub const KUBEFLOW_API_GROUP: &str = "kubeflow.org";

/// Pod spec published by the leader
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub version: u32,
    pub service_account: ServiceAccountSpec,
    pub containers: Vec<ContainerSpec>,
}

/// Service account of the workload
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountSpec {
    pub roles: Vec<RoleSpec>,
}

/// RBAC role bundle; `global` roles are cluster scoped
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    pub global: bool,
    pub rules: Vec<PolicyRule>,
}

/// Container definition
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub name: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub image_details: ImageDetails,
    pub ports: Vec<ContainerPortSpec>,
    pub env_config: BTreeMap<String, String>,
}

/// Named container port
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPortSpec {
    pub name: String,
    pub container_port: u16,
}

impl PodSpec {
    /// Katib UI pod spec for `port`, running in `namespace`, from `image`
    pub fn katib_ui(port: u16, namespace: &str, image: ImageDetails) -> Self {
        let container = ContainerSpec {
            name: CONTAINER_NAME.to_string(),
            command: vec![CONTAINER_COMMAND.to_string()],
            args: vec![format!("--port={port}")],
            image_details: image,
            ports: vec![ContainerPortSpec {
                name: HTTP_PORT_NAME.to_string(),
                container_port: port,
            }],
            env_config: BTreeMap::from([(NAMESPACE_ENV.to_string(), namespace.to_string())]),
        };

        Self {
            version: POD_SPEC_VERSION,
            service_account: ServiceAccountSpec {
                roles: vec![katib_ui_role()],
            },
            containers: vec![container],
        }
    }

    /// The single workload container
    pub fn container(&self) -> Option<&ContainerSpec> {
        self.containers.first()
    }

    /// Declared port of the workload container
    pub fn port(&self) -> Option<u16> {
        self.container()
            .and_then(|c| c.ports.first())
            .map(|p| p.container_port)
    }
}

/// Full access to configmaps and namespaces, and to Katib's own resources
fn katib_ui_role() -> RoleSpec {
    RoleSpec {
        global: true,
        rules: vec![
            full_access_rule("", &["configmaps", "namespaces"]),
            full_access_rule(KUBEFLOW_API_GROUP, &["experiments", "trials", "suggestions"]),
        ],
    }
}

fn full_access_rule(api_group: &str, resources: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![api_group.to_string()]),
        resources: Some(resources.iter().map(|r| r.to_string()).collect()),
        verbs: vec!["*".to_string()],
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_pod_spec_wire_shape() {
        let spec = PodSpec::katib_ui(8080, "kubeflow", ImageDetails::new("katib-ui:v0.11"));
        let value = serde_json::to_value(&spec).unwrap();

        assert_eq!(
            value,
            json!({
                "version": 3,
                "serviceAccount": {
                    "roles": [{
                        "global": true,
                        "rules": [
                            {
                                "apiGroups": [""],
                                "resources": ["configmaps", "namespaces"],
                                "verbs": ["*"]
                            },
                            {
                                "apiGroups": ["kubeflow.org"],
                                "resources": ["experiments", "trials", "suggestions"],
                                "verbs": ["*"]
                            }
                        ]
                    }]
                },
                "containers": [{
                    "name": "katib-ui",
                    "command": ["./katib-ui"],
                    "args": ["--port=8080"],
                    "imageDetails": { "imagePath": "katib-ui:v0.11" },
                    "ports": [{ "name": "http", "containerPort": 8080 }],
                    "envConfig": { "KATIB_CORE_NAMESPACE": "kubeflow" }
                }]
            })
        );
    }

    #[test]
    fn test_pod_spec_roundtrips_through_json() {
        let spec = PodSpec::katib_ui(5000, "ns", ImageDetails::new("img").with_credentials("u", "p"));
        let text = serde_json::to_string(&spec).unwrap();
        let back: PodSpec = serde_json::from_str(&text).unwrap();
        assert_eq!(back, spec);
    }

    proptest! {
        #[test]
        fn prop_port_argument_matches_container_port(port in 1u16..=u16::MAX) {
            let spec = PodSpec::katib_ui(port, "kubeflow", ImageDetails::new("img"));
            prop_assert_eq!(spec.containers.len(), 1);
            let container = &spec.containers[0];
            prop_assert_eq!(container.args.clone(), vec![format!("--port={}", port)]);
            prop_assert_eq!(spec.port(), Some(port));
        }
    }
}
