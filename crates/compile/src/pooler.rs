use cnpg_core::{CnpgKind, CnpgResult};
use cnpg_schema::Args;
use serde_json::{json, Map, Value as Json};

use crate::{skeleton, Compiled};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolerType {
    Rw,
    Ro,
}

impl PoolerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolerType::Rw => "rw",
            PoolerType::Ro => "ro",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolerRequest {
    pub name: String,
    pub namespace: String,
    pub cluster: String,
    pub pooler_type: PoolerType,
    pub instances: i64,
    pub pool_mode: String,
    pub max_client_conn: Option<i64>,
    pub default_pool_size: Option<i64>,
}

impl PoolerRequest {
    pub fn from_args(args: &Args) -> CnpgResult<Self> {
        let cluster = args.str("clusterName")?.to_string();
        let pooler_type = match args.opt_str("type") {
            Some("ro") => PoolerType::Ro,
            _ => PoolerType::Rw,
        };
        let name = match args.opt_str("name") {
            Some(n) => n.to_string(),
            None => format!("{}-pooler-{}", cluster, pooler_type.as_str()),
        };
        Ok(Self {
            name,
            namespace: args.str("namespace")?.to_string(),
            cluster,
            pooler_type,
            instances: args.opt_int("instances").unwrap_or(1),
            pool_mode: args.opt_str("poolMode").unwrap_or("session").to_string(),
            max_client_conn: args.opt_int("maxClientConn"),
            default_pool_size: args.opt_int("defaultPoolSize"),
        })
    }

    pub fn compile(&self) -> Compiled {
        // PgBouncer settings are strings in the CRD.
        let mut params = Map::new();
        if let Some(n) = self.max_client_conn {
            params.insert("max_client_conn".into(), Json::String(n.to_string()));
        }
        if let Some(n) = self.default_pool_size {
            params.insert("default_pool_size".into(), Json::String(n.to_string()));
        }
        let mut pgbouncer = Map::new();
        pgbouncer.insert("poolMode".into(), Json::String(self.pool_mode.clone()));
        if !params.is_empty() {
            pgbouncer.insert("parameters".into(), Json::Object(params));
        }
        let mut spec = Map::new();
        spec.insert("cluster".into(), json!({ "name": self.cluster }));
        spec.insert("instances".into(), Json::from(self.instances));
        spec.insert("type".into(), Json::String(self.pooler_type.as_str().to_string()));
        spec.insert("pgbouncer".into(), Json::Object(pgbouncer));
        skeleton(CnpgKind::Pooler, &self.namespace, &self.name, spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: Json) -> Args {
        let bag = v.as_object().cloned().unwrap_or_default();
        cnpg_schema::lookup("create_pooler").unwrap().validate(&bag).unwrap()
    }

    #[test]
    fn defaults() {
        let c = PoolerRequest::from_args(&args(json!({"clusterName": "prod", "namespace": "db"}))).unwrap().compile();
        assert_eq!(c.reference.name(), "prod-pooler-rw");
        assert_eq!(
            c.document["spec"],
            json!({"cluster": {"name": "prod"}, "instances": 1, "type": "rw", "pgbouncer": {"poolMode": "session"}})
        );
    }

    #[test]
    fn read_only_pooler_with_parameters() {
        let a = args(json!({"clusterName": "prod", "namespace": "db", "type": "ro", "poolMode": "transaction", "maxClientConn": 500, "instances": 2}));
        let c = PoolerRequest::from_args(&a).unwrap().compile();
        assert_eq!(c.reference.name(), "prod-pooler-ro");
        assert_eq!(c.document["spec"]["type"], "ro");
        assert_eq!(c.document["spec"]["instances"], 2);
        assert_eq!(c.document["spec"]["pgbouncer"], json!({"poolMode": "transaction", "parameters": {"max_client_conn": "500"}}));
    }

    #[test]
    fn explicit_name_wins() {
        let a = args(json!({"clusterName": "prod", "namespace": "db", "name": "edge"}));
        assert_eq!(PoolerRequest::from_args(&a).unwrap().name, "edge");
    }
}
