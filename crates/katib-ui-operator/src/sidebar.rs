//! # Dashboard Sidebar
//!
//! Navigation entry advertised to the dashboard over the `sidebar` relation

use serde::{Deserialize, Serialize};

pub const SIDEBAR: &str = "sidebar";

/// Relation app-data key the dashboard reads
pub const SIDEBAR_KEY: &str = "config";

/// One link in the dashboard sidebar
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct SidebarEntry {
    pub app: String,
    pub position: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub link: String,
    pub text: String,
    pub icon: String,
}

impl SidebarEntry {
    /// The Katib "Experiments (AutoML)" entry
    pub fn katib(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            position: 5,
            kind: "item".to_string(),
            link: "/katib/".to_string(),
            text: "Experiments (AutoML)".to_string(),
            icon: "kubeflow:katib".to_string(),
        }
    }
}

/// JSON list stored under [`SIDEBAR_KEY`]
pub fn encode(entries: &[SidebarEntry]) -> Result<String, serde_json::Error> {
    serde_json::to_string(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_katib_entry_payload() {
        let payload = encode(&[SidebarEntry::katib("katib-ui")]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(
            value,
            json!([{
                "app": "katib-ui",
                "position": 5,
                "type": "item",
                "link": "/katib/",
                "text": "Experiments (AutoML)",
                "icon": "kubeflow:katib"
            }])
        );
    }

    #[test]
    fn test_withdrawn_payload_is_empty_list() {
        assert_eq!(encode(&[]).unwrap(), "[]");
    }
}
