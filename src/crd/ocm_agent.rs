//! OcmAgent Custom Resource Definition

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// OcmAgent resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ocmagent.managed.openshift.io",
    version = "v1alpha1",
    kind = "OcmAgent",
    plural = "ocmagents",
    singular = "ocmagent",
    shortname = "oa",
    namespaced,
    status = "OcmAgentStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Image", "type": "string", "jsonPath": ".spec.ocmAgentImage"}"#,
    printcolumn = r#"{"name": "Replicas", "type": "integer", "jsonPath": ".spec.replicas"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OcmAgentSpec {
    /// Container image of the OCM Agent
    pub ocm_agent_image: String,

    /// Name of the Secret holding the OCM access token
    pub token_secret: String,

    /// Name of the ConfigMap holding the agent configuration
    pub ocm_agent_config: String,

    /// OCM services the agent talks to
    #[serde(default)]
    pub services: Vec<String>,

    /// Base URL of the OCM API
    pub ocm_base_url: String,

    /// Number of agent replicas
    #[serde(default = "default_replicas")]
    pub replicas: i32,
}

fn default_replicas() -> i32 {
    1
}

/// OcmAgent status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OcmAgentStatus {
    /// Current phase (Ready, Terminating, Failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation of the spec last acted on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Time of the last status write
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reconcile_time: Option<DateTime<Utc>>,

    /// Managed resources as `Kind/name`, in registration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_resources: Vec<String>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl OcmAgentStatus {
    /// Whether two statuses differ in anything but timestamps
    pub fn differs_from(&self, other: &OcmAgentStatus) -> bool {
        self.phase != other.phase
            || self.message != other.message
            || self.observed_generation != other.observed_generation
            || self.managed_resources != other.managed_resources
    }
}

/// Status condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,

    /// Status (True, False, Unknown)
    pub status: String,

    /// Last transition time
    pub last_transition_time: DateTime<Utc>,

    /// Reason for the condition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
