//! # Katib UI Operator
//!
//! Operator for the Katib UI microservice. Turns leadership, the ingress
//! relation, the image resource and the `port` option into a pod spec, and
//! advertises the Katib entry to the dashboard sidebar.

pub mod config;
pub mod controller;
pub mod error;
pub mod host;
pub mod image;
pub mod interface;
pub mod kube_sink;
pub mod manager;
pub mod pod_spec;
pub mod reconciler;
pub mod sidebar;
pub mod status;

pub use config::{CharmConfig, ConfigSource};
pub use controller::*;
pub use error::{CheckFailed, ConfigError, HostError, ImageResourceError, InterfaceError};
pub use host::{Context, HostHandles, MemoryHost, RelationId};
pub use image::{FileImageResource, ImageDetails, ImageResource, StaticImageResource};
pub use kube_sink::KubePodSpecSink;
pub use manager::*;
pub use pod_spec::PodSpec;
pub use reconciler::*;
pub use sidebar::SidebarEntry;
pub use status::{StatusKind, UnitStatus};

/// Operator configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Application name, also the workload and service name
    pub app_name: String,

    /// Model name, also the namespace the workload runs in
    pub model_name: String,

    /// Name of the OCI image resource
    pub image_resource: String,

    /// Field manager for server-side apply
    pub field_manager: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            app_name: "katib-ui".to_string(),
            model_name: "kubeflow".to_string(),
            image_resource: "oci-image".to_string(),
            field_manager: "katib-ui-operator".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_config_default() {
        let config = OperatorConfig::default();
        assert_eq!(config.app_name, "katib-ui");
        assert_eq!(config.model_name, "kubeflow");
        assert_eq!(config.image_resource, "oci-image");
        assert_eq!(config.field_manager, "katib-ui-operator");
    }
}
