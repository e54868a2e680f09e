use cnpg_core::{CnpgError, CnpgKind, CnpgResult};
use cnpg_schema::Args;
use serde_json::{json, Map, Value as Json};

use crate::{put_opt, skeleton, Compiled};

/// `<cluster>-backup-<YYYYMMDDHHMMSS>-<8 hex>`. The random suffix keeps two
/// names generated in the same clock tick apart.
pub fn generate_backup_name(cluster: &str) -> String {
    let ts = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-backup-{}-{}", cluster, ts, &suffix[..8])
}

/// Accept 6-field cron (seconds first) or 5-field cron, which runs at second 0.
pub fn normalize_schedule(schedule: &str) -> CnpgResult<String> {
    let fields: Vec<&str> = schedule.split_whitespace().collect();
    match fields.len() {
        6 => Ok(fields.join(" ")),
        5 => Ok(format!("0 {}", fields.join(" "))),
        n => Err(CnpgError::Validation(format!("'schedule': expected 5 or 6 cron fields, got {}", n))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRequest {
    pub name: String,
    pub namespace: String,
    pub cluster: String,
    pub method: Option<String>,
}

impl BackupRequest {
    pub fn from_args(args: &Args) -> CnpgResult<Self> {
        let cluster = args.str("clusterName")?.to_string();
        let name = match args.opt_str("backupName") {
            Some(n) => n.to_string(),
            None => generate_backup_name(&cluster),
        };
        Ok(Self { name, namespace: args.str("namespace")?.to_string(), cluster, method: args.opt_str("method").map(str::to_string) })
    }

    pub fn compile(&self) -> Compiled {
        let mut spec = Map::new();
        spec.insert("cluster".into(), json!({ "name": self.cluster }));
        put_opt(&mut spec, "method", self.method.clone());
        skeleton(CnpgKind::Backup, &self.namespace, &self.name, spec)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledBackupRequest {
    pub name: String,
    pub namespace: String,
    pub cluster: String,
    pub schedule: String,
    pub suspend: Option<bool>,
    pub immediate: Option<bool>,
    pub method: Option<String>,
    /// Belongs to the Cluster, not the schedule; applied separately.
    pub retention_policy: Option<String>,
}

impl ScheduledBackupRequest {
    pub fn from_args(args: &Args) -> CnpgResult<Self> {
        Ok(Self {
            name: args.str("name")?.to_string(),
            namespace: args.str("namespace")?.to_string(),
            cluster: args.str("clusterName")?.to_string(),
            schedule: normalize_schedule(args.str("schedule")?)?,
            suspend: args.opt_bool("suspend"),
            immediate: args.opt_bool("immediate"),
            method: args.opt_str("method").map(str::to_string),
            retention_policy: args.opt_str("backupRetentionPolicy").map(str::to_string),
        })
    }

    pub fn compile(&self) -> Compiled {
        let mut spec = Map::new();
        spec.insert("schedule".into(), Json::String(self.schedule.clone()));
        spec.insert("cluster".into(), json!({ "name": self.cluster }));
        put_opt(&mut spec, "suspend", self.suspend);
        put_opt(&mut spec, "immediate", self.immediate);
        put_opt(&mut spec, "method", self.method.clone());
        skeleton(CnpgKind::ScheduledBackup, &self.namespace, &self.name, spec)
    }
}
