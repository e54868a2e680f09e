//! cnpg core types: resource references, intents and the result envelope.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

mod error;

pub use error::{CnpgError, CnpgResult, ErrorKind};

/// A live custom resource as returned by the API server (metadata, spec, status).
pub type Document = serde_json::Value;

/// API group served by the CloudNativePG operator.
pub const GROUP: &str = "postgresql.cnpg.io";
/// API version used for every kind.
pub const VERSION: &str = "v1";
/// `apiVersion` field value for documents we build.
pub const API_VERSION: &str = "postgresql.cnpg.io/v1";

/// Annotation the operator watches to hibernate a cluster.
pub const HIBERNATION_ANNOTATION: &str = "cnpg.io/hibernation";
/// Annotation carrying a requested switchover target.
pub const TARGET_PRIMARY_ANNOTATION: &str = "cnpg.io/targetPrimary";
/// Annotation bumped to trigger a rolling restart.
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";
/// Label the operator puts on every instance pod.
pub const CLUSTER_LABEL: &str = "cnpg.io/cluster";

/// The closed set of CloudNativePG kinds this workspace addresses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CnpgKind {
    Cluster,
    Backup,
    ScheduledBackup,
    Pooler,
}

impl CnpgKind {
    pub const ALL: [CnpgKind; 4] = [CnpgKind::Cluster, CnpgKind::Backup, CnpgKind::ScheduledBackup, CnpgKind::Pooler];

    pub fn kind(&self) -> &'static str {
        match self {
            CnpgKind::Cluster => "Cluster",
            CnpgKind::Backup => "Backup",
            CnpgKind::ScheduledBackup => "ScheduledBackup",
            CnpgKind::Pooler => "Pooler",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            CnpgKind::Cluster => "clusters",
            CnpgKind::Backup => "backups",
            CnpgKind::ScheduledBackup => "scheduledbackups",
            CnpgKind::Pooler => "poolers",
        }
    }

    /// Lower-case noun used in user-facing messages ("backup 'x' not found ...").
    pub fn noun(&self) -> &'static str {
        match self {
            CnpgKind::Cluster => "cluster",
            CnpgKind::Backup => "backup",
            CnpgKind::ScheduledBackup => "scheduled backup",
            CnpgKind::Pooler => "pooler",
        }
    }

    pub fn from_plural(plural: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.plural() == plural)
    }
}

impl std::fmt::Display for CnpgKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

/// Identifies exactly one custom resource instance. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    kind: CnpgKind,
    namespace: String,
    name: String,
}

impl ResourceRef {
    pub fn new(kind: CnpgKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { kind, namespace: namespace.into(), name: name.into() }
    }

    pub fn group(&self) -> &'static str { GROUP }
    pub fn version(&self) -> &'static str { VERSION }
    pub fn plural(&self) -> &'static str { self.kind.plural() }
    pub fn kind(&self) -> CnpgKind { self.kind }
    pub fn namespace(&self) -> &str { &self.namespace }
    pub fn name(&self) -> &str { &self.name }

    /// Error for a missing object, worded the way callers see it.
    pub fn not_found(&self) -> CnpgError {
        CnpgError::NotFound(format!("{} '{}' not found in namespace '{}'", self.kind.noun(), self.name, self.namespace))
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}/{}/{}", GROUP, VERSION, self.kind.plural(), self.namespace, self.name)
    }
}

/// A named operation plus its argument bag, as received from the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Intent {
    pub operation: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

impl Intent {
    pub fn new(operation: impl Into<String>, arguments: serde_json::Value) -> Self {
        let arguments = match arguments {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self { operation: operation.into(), arguments }
    }
}

/// Uniform envelope returned for every intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub ok: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
}

impl OperationResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self { ok: true, message: message.into(), error_kind: None, detail: None, retryable: false }
    }

    pub fn failure(operation: &str, err: &CnpgError) -> Self {
        Self {
            ok: false,
            message: format!("{} failed: {}", operation, err),
            error_kind: Some(err.kind()),
            detail: Some(err.detail().to_string()),
            retryable: err.is_retryable(),
        }
    }
}

/// Read a string at a dotted path, e.g. `metadata.name`.
pub fn str_at<'a>(doc: &'a Document, path: &str) -> Option<&'a str> {
    value_at(doc, path).and_then(|v| v.as_str())
}

/// Walk a dotted path through nested maps.
pub fn value_at<'a>(doc: &'a Document, path: &str) -> Option<&'a serde_json::Value> {
    path.split('.').try_fold(doc, |cur, seg| cur.get(seg))
}
