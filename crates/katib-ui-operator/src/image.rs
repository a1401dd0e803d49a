//! # OCI Image Resource
//!
//! Resolves the container image the pod spec points at

use crate::error::ImageResourceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Image reference as it appears in the pod spec `imageDetails`
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageDetails {
    pub image_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ImageDetails {
    pub fn new(image_path: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Whether pulling the image needs registry credentials
    pub fn has_credentials(&self) -> bool {
        self.username.is_some()
    }
}

/// Provider of the workload image.
///
/// Every call fetches afresh; callers must not assume two fetches agree.
#[async_trait]
pub trait ImageResource: Send + Sync {
    /// Resource name, e.g. `oci-image`
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<ImageDetails, ImageResourceError>;
}

/// Resource file attached to the charm:
///
/// ```yaml
/// registrypath: docker.io/kubeflowkatib/katib-ui:v0.11.1
/// username: ""
/// password: ""
/// ```
#[derive(Deserialize, Debug)]
struct ResourceFile {
    registrypath: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Image resource backed by a YAML file on disk
#[derive(Debug, Clone)]
pub struct FileImageResource {
    name: String,
    path: PathBuf,
}

impl FileImageResource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    fn parse(&self, contents: &str) -> Result<ImageDetails, ImageResourceError> {
        let invalid = |reason: String| ImageResourceError::Invalid {
            resource: self.name.clone(),
            reason,
        };

        let file: ResourceFile = serde_yaml::from_str(contents).map_err(|e| invalid(e.to_string()))?;
        let image_path = file
            .registrypath
            .filter(|path| !path.trim().is_empty())
            .ok_or_else(|| invalid("registrypath is missing".to_string()))?;

        let mut details = ImageDetails::new(image_path);
        if let Some(username) = file.username.filter(|u| !u.is_empty()) {
            details = details.with_credentials(username, file.password.unwrap_or_default());
        }
        Ok(details)
    }
}

#[async_trait]
impl ImageResource for FileImageResource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<ImageDetails, ImageResourceError> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            debug!(resource = %self.name, path = %self.path.display(), error = %e, "Resource file unavailable");
            ImageResourceError::Missing {
                resource: self.name.clone(),
            }
        })?;

        // An empty upload counts as no resource at all
        if contents.trim().is_empty() {
            return Err(ImageResourceError::Missing {
                resource: self.name.clone(),
            });
        }

        self.parse(&contents)
    }
}

/// Image resource with a fixed reference
#[derive(Debug, Clone)]
pub struct StaticImageResource {
    name: String,
    details: ImageDetails,
}

impl StaticImageResource {
    pub fn new(name: impl Into<String>, details: ImageDetails) -> Self {
        Self {
            name: name.into(),
            details,
        }
    }
}

#[async_trait]
impl ImageResource for StaticImageResource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<ImageDetails, ImageResourceError> {
        Ok(self.details.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::UnitStatus;

    fn resource_with(contents: &str) -> (tempfile::NamedTempFile, FileImageResource) {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), contents).unwrap();
        let resource = FileImageResource::new("oci-image", file.path());
        (file, resource)
    }

    #[tokio::test]
    async fn test_fetch_registry_path() {
        let (_file, resource) = resource_with("registrypath: kubeflowkatib/katib-ui:v0.11.1\n");
        let details = resource.fetch().await.unwrap();
        assert_eq!(details.image_path, "kubeflowkatib/katib-ui:v0.11.1");
        assert!(!details.has_credentials());
    }

    #[tokio::test]
    async fn test_fetch_with_credentials() {
        let (_file, resource) = resource_with(
            "registrypath: registry.example.com/katib-ui:dev\nusername: bot\npassword: hunter2\n",
        );
        let details = resource.fetch().await.unwrap();
        assert_eq!(details.username.as_deref(), Some("bot"));
        assert_eq!(details.password.as_deref(), Some("hunter2"));
    }

    #[tokio::test]
    async fn test_missing_file_is_blocked() {
        let resource = FileImageResource::new("oci-image", "/nonexistent/oci-image.yaml");
        let err = resource.fetch().await.unwrap_err();
        assert_eq!(
            err,
            ImageResourceError::Missing {
                resource: "oci-image".to_string()
            }
        );
        assert_eq!(err.to_string(), "Missing resource: oci-image");
    }

    #[tokio::test]
    async fn test_empty_file_is_missing() {
        let (_file, resource) = resource_with("\n");
        let err = resource.fetch().await.unwrap_err();
        assert!(matches!(err, ImageResourceError::Missing { .. }));
        assert_eq!(err.status(), UnitStatus::blocked("Missing resource: oci-image"));
    }

    #[tokio::test]
    async fn test_missing_registry_path_is_invalid() {
        let (_file, resource) = resource_with("username: bot\n");
        let err = resource.fetch().await.unwrap_err();
        assert!(matches!(err, ImageResourceError::Invalid { .. }));
        assert_eq!(err.to_string(), "Invalid resource: oci-image");
    }

    #[test]
    fn test_image_details_serialize_camel_case() {
        let json = serde_json::to_value(ImageDetails::new("katib-ui:latest")).unwrap();
        assert_eq!(json, serde_json::json!({ "imagePath": "katib-ui:latest" }));
    }
}
