use cnpg_core::{CnpgError, CnpgKind, CnpgResult};
use cnpg_schema::Args;
use serde_json::{json, Map, Value as Json};

use crate::{put_opt, skeleton, Compiled, DEFAULT_INSTANCES, DEFAULT_STORAGE_SIZE, IMAGE_REPOSITORY};

/// Official operand image for a PostgreSQL version.
pub fn image_for_version(version: &str) -> String {
    format!("{}:{}", IMAGE_REPOSITORY, version)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRequest {
    pub size: String,
    pub storage_class: Option<String>,
}

impl StorageRequest {
    fn from_args(args: &Args) -> Self {
        Self {
            size: args.opt_str("storageSize").unwrap_or(DEFAULT_STORAGE_SIZE).to_string(),
            storage_class: args.opt_str("storageClass").map(str::to_string),
        }
    }

    fn to_json(&self) -> Json {
        let mut m = Map::new();
        m.insert("size".into(), Json::String(self.size.clone()));
        put_opt(&mut m, "storageClass", self.storage_class.clone());
        Json::Object(m)
    }
}

/// How the first instance gets its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bootstrap {
    /// Operator defaults; no bootstrap block is written.
    Default,
    InitDb { database: String, owner: String },
    /// Recover from a Backup in the same namespace.
    Recovery { backup: String },
    /// Stream from another cluster's read-write service.
    Replica { source: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterRequest {
    pub name: String,
    pub namespace: String,
    pub instances: i64,
    pub storage: StorageRequest,
    pub image_name: Option<String>,
    pub parameters: Map<String, Json>,
    pub bootstrap: Bootstrap,
}

impl ClusterRequest {
    fn base(args: &Args, bootstrap: Bootstrap) -> CnpgResult<Self> {
        Ok(Self {
            name: args.str("name")?.to_string(),
            namespace: args.str("namespace")?.to_string(),
            instances: args.opt_int("instances").unwrap_or(DEFAULT_INSTANCES),
            storage: StorageRequest::from_args(args),
            image_name: None,
            parameters: Map::new(),
            bootstrap,
        })
    }

    /// `create_cluster` arguments. A database without an owner is owned by a role of the same name.
    pub fn from_args(args: &Args) -> CnpgResult<Self> {
        let bootstrap = match args.opt_str("database") {
            Some(db) => Bootstrap::InitDb { database: db.to_string(), owner: args.opt_str("owner").unwrap_or(db).to_string() },
            None if args.has("owner") => return Err(CnpgError::Validation("'owner': requires 'database'".into())),
            None => Bootstrap::Default,
        };
        let mut req = Self::base(args, bootstrap)?;
        req.image_name = match (args.opt_str("imageName"), args.opt_str("postgresVersion")) {
            (Some(image), _) => Some(image.to_string()),
            (None, Some(version)) => Some(image_for_version(version)),
            (None, None) => None,
        };
        req.parameters = args.key_values("parameters");
        Ok(req)
    }

    /// `restore_cluster` arguments.
    pub fn recovery_from_args(args: &Args) -> CnpgResult<Self> {
        let backup = args.str("backupName")?.to_string();
        Self::base(args, Bootstrap::Recovery { backup })
    }

    /// `create_replica_cluster` arguments.
    pub fn replica_from_args(args: &Args) -> CnpgResult<Self> {
        let source = args.str("sourceCluster")?.to_string();
        let req = Self::base(args, Bootstrap::Replica { source })?;
        if let Bootstrap::Replica { source } = &req.bootstrap {
            if *source == req.name {
                return Err(CnpgError::Validation(format!("'sourceCluster': a cluster cannot replicate itself ('{}')", source)));
            }
        }
        Ok(req)
    }

    pub fn compile(&self) -> Compiled {
        let mut spec = Map::new();
        spec.insert("instances".into(), Json::from(self.instances));
        put_opt(&mut spec, "imageName", self.image_name.clone());
        spec.insert("storage".into(), self.storage.to_json());
        if !self.parameters.is_empty() {
            spec.insert("postgresql".into(), json!({ "parameters": Json::Object(self.parameters.clone()) }));
        }
        match &self.bootstrap {
            Bootstrap::Default => {}
            Bootstrap::InitDb { database, owner } => {
                spec.insert("bootstrap".into(), json!({ "initdb": { "database": database, "owner": owner } }));
            }
            Bootstrap::Recovery { backup } => {
                spec.insert("bootstrap".into(), json!({ "recovery": { "backup": { "name": backup } } }));
            }
            Bootstrap::Replica { source } => {
                spec.insert("bootstrap".into(), json!({ "pg_basebackup": { "source": source } }));
                spec.insert("replica".into(), json!({ "enabled": true, "source": source }));
                spec.insert("externalClusters".into(), json!([external_cluster(source)]));
            }
        }
        tracing::debug!(name = %self.name, ns = %self.namespace, bootstrap = ?self.bootstrap, "compiled cluster");
        skeleton(CnpgKind::Cluster, &self.namespace, &self.name, spec)
    }
}

/// Connection to a sibling cluster using the certificates the operator issues for it.
fn external_cluster(source: &str) -> Json {
    let replication = format!("{}-replication", source);
    json!({
        "name": source,
        "connectionParameters": {
            "host": format!("{}-rw", source),
            "user": "streaming_replica",
            "sslmode": "verify-full",
            "dbname": "postgres",
        },
        "sslKey": { "name": replication, "key": "tls.key" },
        "sslCert": { "name": replication, "key": "tls.crt" },
        "sslRootCert": { "name": format!("{}-ca", source), "key": "ca.crt" },
    })
}

/// Entry appended to `spec.tablespaces`.
pub fn tablespace_element(name: &str, size: &str, storage_class: Option<&str>, owner: Option<&str>, temporary: Option<bool>) -> Json {
    let mut storage = Map::new();
    storage.insert("size".into(), Json::String(size.to_string()));
    put_opt(&mut storage, "storageClass", storage_class);
    let mut ts = Map::new();
    ts.insert("name".into(), Json::String(name.to_string()));
    ts.insert("storage".into(), Json::Object(storage));
    if let Some(o) = owner {
        ts.insert("owner".into(), json!({ "name": o }));
    }
    put_opt(&mut ts, "temporary", temporary);
    Json::Object(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(op: &str, v: Json) -> Args {
        let bag = v.as_object().cloned().unwrap_or_default();
        cnpg_schema::lookup(op).unwrap().validate(&bag).unwrap()
    }

    #[test]
    fn minimal_cluster_uses_defaults_and_omits_optionals() {
        let c = ClusterRequest::from_args(&args("create_cluster", json!({"name": "prod", "namespace": "db"}))).unwrap().compile();
        assert_eq!(c.reference.name(), "prod");
        assert_eq!(
            c.document,
            json!({
                "apiVersion": "postgresql.cnpg.io/v1",
                "kind": "Cluster",
                "metadata": {"name": "prod", "namespace": "db"},
                "spec": {"instances": 3, "storage": {"size": "10Gi"}},
            })
        );
    }

    #[test]
    fn full_cluster() {
        let a = args(
            "create_cluster",
            json!({
                "name": "prod", "namespace": "db", "instances": 5, "storageSize": "50Gi", "storageClass": "fast",
                "postgresVersion": "16", "database": "app", "parameters": ["max_connections=200"],
            }),
        );
        let doc = ClusterRequest::from_args(&a).unwrap().compile().document;
        assert_eq!(doc["spec"]["instances"], 5);
        assert_eq!(doc["spec"]["imageName"], "ghcr.io/cloudnative-pg/postgresql:16");
        assert_eq!(doc["spec"]["storage"], json!({"size": "50Gi", "storageClass": "fast"}));
        assert_eq!(doc["spec"]["bootstrap"]["initdb"], json!({"database": "app", "owner": "app"}));
        assert_eq!(doc["spec"]["postgresql"]["parameters"]["max_connections"], "200");
    }

    #[test]
    fn explicit_image_is_used_verbatim() {
        let a = args("create_cluster", json!({"name": "prod", "namespace": "db", "imageName": "registry.local/pg:16.4-custom"}));
        let doc = ClusterRequest::from_args(&a).unwrap().compile().document;
        assert_eq!(doc["spec"]["imageName"], "registry.local/pg:16.4-custom");
    }

    #[test]
    fn recovery_points_at_backup() {
        let a = args("restore_cluster", json!({"name": "prod-restored", "namespace": "db", "backupName": "prod-backup-1"}));
        let doc = ClusterRequest::recovery_from_args(&a).unwrap().compile().document;
        assert_eq!(doc["spec"]["bootstrap"], json!({"recovery": {"backup": {"name": "prod-backup-1"}}}));
        assert!(doc["spec"].get("replica").is_none());
    }

    #[test]
    fn replica_wires_external_cluster() {
        let a = args("create_replica_cluster", json!({"name": "prod-dr", "namespace": "db", "sourceCluster": "prod", "instances": 1}));
        let doc = ClusterRequest::replica_from_args(&a).unwrap().compile().document;
        assert_eq!(doc["spec"]["instances"], 1);
        assert_eq!(doc["spec"]["bootstrap"]["pg_basebackup"]["source"], "prod");
        assert_eq!(doc["spec"]["replica"], json!({"enabled": true, "source": "prod"}));
        let ext = &doc["spec"]["externalClusters"][0];
        assert_eq!(ext["connectionParameters"]["host"], "prod-rw");
        assert_eq!(ext["sslCert"]["name"], "prod-replication");
        assert_eq!(ext["sslRootCert"], json!({"name": "prod-ca", "key": "ca.crt"}));
    }

    #[test]
    fn replica_of_itself_is_rejected() {
        let a = args("create_replica_cluster", json!({"name": "prod", "namespace": "db", "sourceCluster": "prod"}));
        assert!(ClusterRequest::replica_from_args(&a).is_err());
    }

    #[test]
    fn tablespace_omits_absent_fields() {
        assert_eq!(tablespace_element("idx", "5Gi", None, None, None), json!({"name": "idx", "storage": {"size": "5Gi"}}));
        assert_eq!(
            tablespace_element("tmp", "1Gi", Some("fast"), Some("app"), Some(true)),
            json!({"name": "tmp", "storage": {"size": "1Gi", "storageClass": "fast"}, "owner": {"name": "app"}, "temporary": true})
        );
    }
}
