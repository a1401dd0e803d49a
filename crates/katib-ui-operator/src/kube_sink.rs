//! # Kubernetes Pod Spec Sink
//!
//! Renders a [`PodSpec`] into Kubernetes objects and applies them with
//! server-side apply.

use crate::error::HostError;
use crate::host::PodSpecSink;
use crate::image::ImageDetails;
use crate::pod_spec::{PodSpec, RoleSpec};
use crate::OperatorConfig;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, LocalObjectReference, PodSpec as KubePodSpec, PodTemplateSpec, Secret,
    ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{Api, Patch, PatchParams, ResourceExt};
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::info;

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";
const DOCKER_HUB_REGISTRY: &str = "https://index.docker.io/v1/";
const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";
const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";

/// RBAC objects for one role of the service account
#[derive(Debug, Clone, PartialEq)]
pub enum RenderedRole {
    Cluster {
        role: ClusterRole,
        binding: ClusterRoleBinding,
    },
    Namespaced {
        role: Role,
        binding: RoleBinding,
    },
}

/// Kubernetes objects backing one pod spec
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedObjects {
    pub service_account: ServiceAccount,
    pub roles: Vec<RenderedRole>,
    pub pull_secret: Option<Secret>,
    pub deployment: Deployment,
}

/// Render the objects for `spec`, deployed as `app_name` in `namespace`
pub fn render(spec: &PodSpec, app_name: &str, namespace: &str) -> Result<RenderedObjects, HostError> {
    let container = spec
        .container()
        .ok_or_else(|| HostError::PodSpec("pod spec has no container".to_string()))?;

    let service_account = ServiceAccount {
        metadata: metadata(app_name, Some(namespace), app_name),
        ..Default::default()
    };

    let roles = spec
        .service_account
        .roles
        .iter()
        .enumerate()
        .map(|(index, role)| render_role(role, &role_name(app_name, index), app_name, namespace))
        .collect();

    let pull_secret = pull_secret(&container.image_details, app_name, namespace)?;

    let env = container
        .env_config
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            value_from: None,
        })
        .collect::<Vec<_>>();

    let ports = container
        .ports
        .iter()
        .map(|port| ContainerPort {
            name: Some(port.name.clone()),
            container_port: i32::from(port.container_port),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .collect::<Vec<_>>();

    let kube_container = Container {
        name: container.name.clone(),
        image: Some(container.image_details.image_path.clone()),
        command: Some(container.command.clone()),
        args: Some(container.args.clone()),
        ports: Some(ports),
        env: Some(env),
        ..Default::default()
    };

    let pod_spec = KubePodSpec {
        containers: vec![kube_container],
        service_account_name: Some(app_name.to_string()),
        image_pull_secrets: pull_secret.as_ref().map(|secret| {
            vec![LocalObjectReference {
                name: secret.metadata.name.clone(),
            }]
        }),
        ..Default::default()
    };

    let deployment = Deployment {
        metadata: metadata(app_name, Some(namespace), app_name),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector_labels(app_name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(app_name)),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        ..Default::default()
    };

    Ok(RenderedObjects {
        service_account,
        roles,
        pull_secret,
        deployment,
    })
}

fn role_name(app_name: &str, index: usize) -> String {
    if index == 0 {
        app_name.to_string()
    } else {
        format!("{app_name}-{index}")
    }
}

fn render_role(role: &RoleSpec, name: &str, app_name: &str, namespace: &str) -> RenderedRole {
    let subjects = Some(vec![Subject {
        kind: "ServiceAccount".to_string(),
        name: app_name.to_string(),
        namespace: Some(namespace.to_string()),
        api_group: None,
    }]);

    if role.global {
        RenderedRole::Cluster {
            role: ClusterRole {
                metadata: metadata(name, None, app_name),
                rules: Some(role.rules.clone()),
                ..Default::default()
            },
            binding: ClusterRoleBinding {
                metadata: metadata(name, None, app_name),
                role_ref: role_ref("ClusterRole", name),
                subjects,
            },
        }
    } else {
        RenderedRole::Namespaced {
            role: Role {
                metadata: metadata(name, Some(namespace), app_name),
                rules: Some(role.rules.clone()),
            },
            binding: RoleBinding {
                metadata: metadata(name, Some(namespace), app_name),
                role_ref: role_ref("Role", name),
                subjects,
            },
        }
    }
}

fn role_ref(kind: &str, name: &str) -> RoleRef {
    RoleRef {
        api_group: RBAC_API_GROUP.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

/// Docker config secret, only when the image carries credentials
fn pull_secret(image: &ImageDetails, app_name: &str, namespace: &str) -> Result<Option<Secret>, HostError> {
    let (Some(username), Some(password)) = (&image.username, &image.password) else {
        return Ok(None);
    };

    let auth = STANDARD.encode(format!("{username}:{password}"));
    let config = json!({
        "auths": {
            registry_host(&image.image_path): {
                "username": username,
                "password": password,
                "auth": auth,
            }
        }
    });

    Ok(Some(Secret {
        metadata: metadata(&format!("{app_name}-registry"), Some(namespace), app_name),
        string_data: Some(BTreeMap::from([(
            DOCKER_CONFIG_JSON_KEY.to_string(),
            serde_json::to_string(&config)?,
        )])),
        type_: Some(DOCKER_CONFIG_JSON_TYPE.to_string()),
        ..Default::default()
    }))
}

/// Registry part of an image path, Docker Hub when there is none
fn registry_host(image_path: &str) -> String {
    match image_path.split_once('/') {
        Some((host, _)) if host.contains('.') || host.contains(':') || host == "localhost" => host.to_string(),
        _ => DOCKER_HUB_REGISTRY.to_string(),
    }
}

fn metadata(name: &str, namespace: Option<&str>, app_name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(labels(app_name)),
        ..Default::default()
    }
}

fn selector_labels(app_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app.kubernetes.io/name".to_string(), app_name.to_string())])
}

fn labels(app_name: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(app_name);
    labels.insert("app.kubernetes.io/component".to_string(), "katib-ui".to_string());
    labels.insert("app.kubernetes.io/part-of".to_string(), "kubeflow".to_string());
    labels.insert("app.kubernetes.io/managed-by".to_string(), "katib-ui-operator".to_string());
    labels
}

/// Applies pod specs to a live cluster
#[derive(Clone)]
pub struct KubePodSpecSink {
    client: Client,
    namespace: String,
    app_name: String,
    field_manager: String,
}

impl KubePodSpecSink {
    pub fn new(client: Client, operator: &OperatorConfig) -> Self {
        Self {
            client,
            namespace: operator.model_name.clone(),
            app_name: operator.app_name.clone(),
            field_manager: operator.field_manager.clone(),
        }
    }

    /// Connect with the inferred kubeconfig or in-cluster configuration
    pub async fn try_default(operator: &OperatorConfig) -> Result<Self, HostError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, operator))
    }

    async fn apply_resource<K>(&self, api: Api<K>, resource: &K) -> Result<(), HostError>
    where
        K: kube::Resource + Clone + DeserializeOwned + Serialize + Debug,
    {
        let name = resource.name_any();
        let params = PatchParams::apply(&self.field_manager).force();
        api.patch(&name, &params, &Patch::Apply(resource)).await?;
        info!("Applied {} {}", std::any::type_name::<K>(), name);
        Ok(())
    }
}

#[async_trait]
impl PodSpecSink for KubePodSpecSink {
    async fn set_spec(&self, spec: &PodSpec) -> Result<(), HostError> {
        let objects = render(spec, &self.app_name, &self.namespace)?;
        let client = self.client.clone();

        self.apply_resource(Api::namespaced(client.clone(), &self.namespace), &objects.service_account)
            .await?;

        for role in &objects.roles {
            match role {
                RenderedRole::Cluster { role, binding } => {
                    self.apply_resource(Api::<ClusterRole>::all(client.clone()), role).await?;
                    self.apply_resource(Api::<ClusterRoleBinding>::all(client.clone()), binding)
                        .await?;
                }
                RenderedRole::Namespaced { role, binding } => {
                    self.apply_resource(Api::<Role>::namespaced(client.clone(), &self.namespace), role)
                        .await?;
                    self.apply_resource(Api::<RoleBinding>::namespaced(client.clone(), &self.namespace), binding)
                        .await?;
                }
            }
        }

        if let Some(secret) = &objects.pull_secret {
            self.apply_resource(Api::<Secret>::namespaced(client.clone(), &self.namespace), secret)
                .await?;
        }

        self.apply_resource(Api::<Deployment>::namespaced(client, &self.namespace), &objects.deployment)
            .await?;

        info!(app = %self.app_name, namespace = %self.namespace, "Pod spec applied to cluster");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(image: ImageDetails) -> RenderedObjects {
        let spec = PodSpec::katib_ui(8080, "kubeflow", image);
        render(&spec, "katib-ui", "kubeflow").unwrap()
    }

    #[test]
    fn test_deployment_matches_pod_spec() {
        let objects = rendered(ImageDetails::new("kubeflowkatib/katib-ui:v0.11.1"));
        let spec = objects.deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.service_account_name.as_deref(), Some("katib-ui"));
        assert!(pod.image_pull_secrets.is_none());

        let container = &pod.containers[0];
        assert_eq!(container.name, "katib-ui");
        assert_eq!(container.image.as_deref(), Some("kubeflowkatib/katib-ui:v0.11.1"));
        assert_eq!(container.command, Some(vec!["./katib-ui".to_string()]));
        assert_eq!(container.args, Some(vec!["--port=8080".to_string()]));

        let ports = container.ports.as_ref().unwrap();
        assert_eq!(ports[0].container_port, 8080);
        assert_eq!(ports[0].name.as_deref(), Some("http"));

        let env = container.env.as_ref().unwrap();
        assert_eq!(env[0].name, "KATIB_CORE_NAMESPACE");
        assert_eq!(env[0].value.as_deref(), Some("kubeflow"));
    }

    #[test]
    fn test_global_role_renders_cluster_role() {
        let objects = rendered(ImageDetails::new("katib-ui"));
        assert_eq!(objects.roles.len(), 1);

        match &objects.roles[0] {
            RenderedRole::Cluster { role, binding } => {
                assert_eq!(role.metadata.name.as_deref(), Some("katib-ui"));
                assert!(role.metadata.namespace.is_none());
                assert_eq!(role.rules.as_ref().map(Vec::len), Some(2));
                assert_eq!(binding.role_ref.kind, "ClusterRole");
                let subject = &binding.subjects.as_ref().unwrap()[0];
                assert_eq!(subject.kind, "ServiceAccount");
                assert_eq!(subject.namespace.as_deref(), Some("kubeflow"));
            }
            other => panic!("expected cluster role, got {other:?}"),
        }
    }

    #[test]
    fn test_namespaced_role_renders_role() {
        let mut spec = PodSpec::katib_ui(8080, "kubeflow", ImageDetails::new("katib-ui"));
        spec.service_account.roles[0].global = false;
        let objects = render(&spec, "katib-ui", "kubeflow").unwrap();

        match &objects.roles[0] {
            RenderedRole::Namespaced { role, binding } => {
                assert_eq!(role.metadata.namespace.as_deref(), Some("kubeflow"));
                assert_eq!(binding.role_ref.kind, "Role");
            }
            other => panic!("expected namespaced role, got {other:?}"),
        }
    }

    #[test]
    fn test_credentials_produce_pull_secret() {
        let image = ImageDetails::new("registry.example.com/katib/katib-ui:v1").with_credentials("user", "pass");
        let objects = rendered(image);

        let secret = objects.pull_secret.unwrap();
        assert_eq!(secret.type_.as_deref(), Some("kubernetes.io/dockerconfigjson"));

        let raw = &secret.string_data.as_ref().unwrap()[".dockerconfigjson"];
        let config: serde_json::Value = serde_json::from_str(raw).unwrap();
        assert_eq!(
            config["auths"]["registry.example.com"]["auth"],
            STANDARD.encode("user:pass")
        );

        let pod = objects.deployment.spec.unwrap().template.spec.unwrap();
        assert_eq!(
            pod.image_pull_secrets.unwrap()[0].name.as_deref(),
            Some("katib-ui-registry")
        );
    }

    #[test]
    fn test_registry_host() {
        assert_eq!(registry_host("localhost:32000/katib-ui"), "localhost:32000");
        assert_eq!(registry_host("kubeflowkatib/katib-ui"), DOCKER_HUB_REGISTRY);
        assert_eq!(registry_host("katib-ui"), DOCKER_HUB_REGISTRY);
    }

    #[test]
    fn test_empty_pod_spec_is_rejected() {
        let mut spec = PodSpec::katib_ui(8080, "kubeflow", ImageDetails::new("katib-ui"));
        spec.containers.clear();
        assert!(matches!(
            render(&spec, "katib-ui", "kubeflow"),
            Err(HostError::PodSpec(_))
        ));
    }
}
