//! Shared constants used throughout the operator.
//!
//! Naming rules for managed objects and the agent's on-disk layout live here so
//! that every resource manager derives names the same way.

/// Finalizer placed on OcmAgent resources while managed objects may exist
pub const FINALIZER_NAME: &str = "ocmagent.managed.openshift.io/ocmagent";

/// Field manager used for status patches
pub const FIELD_MANAGER: &str = "ocm-agent-operator";

/// Name of the agent workload, its container, and its `app` label value
pub const OCM_AGENT_NAME: &str = "ocm-agent";

/// Name of the agent Service
pub const OCM_AGENT_SERVICE_NAME: &str = "ocm-agent";

/// Service account the agent pods run as
pub const OCM_AGENT_SERVICE_ACCOUNT: &str = "ocm-agent";

/// Binary invoked inside the agent container
pub const OCM_AGENT_COMMAND: &str = "ocm-agent";

/// Container port the agent listens on
pub const OCM_AGENT_PORT: i32 = 8081;

/// Port exposed by the agent Service
pub const OCM_AGENT_SERVICE_PORT: i32 = 8081;

/// Name of the agent container and Service port
pub const OCM_AGENT_PORT_NAME: &str = "ocm-agent";

/// Mount root for Secret volumes
pub const OCM_AGENT_SECRET_MOUNT_PATH: &str = "/secrets";

/// Mount root for ConfigMap volumes
pub const OCM_AGENT_CONFIG_MOUNT_PATH: &str = "/configs";

/// ConfigMap key holding the comma-separated service list
pub const OCM_AGENT_CONFIG_SERVICES_KEY: &str = "services";

/// ConfigMap key holding the OCM base URL
pub const OCM_AGENT_CONFIG_URL_KEY: &str = "serviceURL";

/// Secret key holding the OCM access token
pub const OCM_AGENT_ACCESS_TOKEN_SECRET_KEY: &str = "access_token";

/// Node role label used for infra scheduling
pub const INFRA_NODE_ROLE_KEY: &str = "node-role.kubernetes.io/infra";

/// Default namespace of the cluster pull secret
pub const DEFAULT_PULL_SECRET_NAMESPACE: &str = "openshift-config";

/// Default name of the cluster pull secret
pub const DEFAULT_PULL_SECRET_NAME: &str = "pull-secret";

/// Default data key of the cluster pull secret
pub const DEFAULT_PULL_SECRET_KEY: &str = ".dockerconfigjson";

/// Default registry entry in the pull secret carrying the OCM token
pub const DEFAULT_PULL_SECRET_AUTH_REGISTRY: &str = "cloud.openshift.com";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default deadline for one reconciliation pass (seconds)
pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 60;

/// Default number of write attempts when a write conflicts
pub const DEFAULT_CONFLICT_RETRY_ATTEMPTS: u32 = 4;

/// Default delay before the first conflict retry (milliseconds)
pub const DEFAULT_CONFLICT_RETRY_INITIAL_MS: u64 = 10;

/// Default multiplier applied to the conflict retry delay
pub const DEFAULT_CONFLICT_RETRY_FACTOR: u32 = 5;

/// Default ceiling for the conflict retry delay (milliseconds)
pub const DEFAULT_CONFLICT_RETRY_MAX_MS: u64 = 1000;
