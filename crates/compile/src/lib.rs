//! cnpg compile: pure builders from validated arguments to complete documents.
//!
//! Nothing here touches the network. Every builder fills required fields from
//! its arguments or a documented default and leaves optional blocks out of the
//! document entirely when the caller did not ask for them.

#![forbid(unsafe_code)]

use cnpg_core::{CnpgKind, Document, ResourceRef, API_VERSION};
use serde_json::{Map, Value as Json};

mod backup;
mod cluster;
mod pooler;
mod sql;

pub use backup::{generate_backup_name, normalize_schedule, BackupRequest, ScheduledBackupRequest};
pub use cluster::{image_for_version, tablespace_element, Bootstrap, ClusterRequest, StorageRequest};
pub use pooler::{PoolerRequest, PoolerType};
pub use sql::{create_database_sql, create_extension_sql, quote_ident};

/// Default instance count for new clusters.
pub const DEFAULT_INSTANCES: i64 = 3;
/// Default PVC size for new clusters.
pub const DEFAULT_STORAGE_SIZE: &str = "10Gi";
/// Operand image repository used when only a version is given.
pub const IMAGE_REPOSITORY: &str = "ghcr.io/cloudnative-pg/postgresql";

/// A compiled document together with the reference it will be created at.
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub reference: ResourceRef,
    pub document: Document,
}

fn skeleton(kind: CnpgKind, namespace: &str, name: &str, spec: Map<String, Json>) -> Compiled {
    let document = serde_json::json!({
        "apiVersion": API_VERSION,
        "kind": kind.kind(),
        "metadata": { "name": name, "namespace": namespace },
        "spec": Json::Object(spec),
    });
    Compiled { reference: ResourceRef::new(kind, namespace, name), document }
}

/// Insert only when present.
fn put_opt<T: Into<Json>>(map: &mut Map<String, Json>, key: &str, value: Option<T>) {
    if let Some(v) = value {
        map.insert(key.to_string(), v.into());
    }
}
