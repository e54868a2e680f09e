use cnpg_apply::{MergeStrategy, Presence};
use cnpg_compile::{create_database_sql, create_extension_sql, image_for_version, tablespace_element};
use cnpg_core::{str_at, value_at, CnpgError, CnpgKind, CnpgResult, Document, ResourceRef, HIBERNATION_ANNOTATION, RESTARTED_AT_ANNOTATION, TARGET_PRIMARY_ANNOTATION};
use cnpg_kubehub::ResourceClient;
use cnpg_schema::Args;
use serde_json::Value as Json;

use crate::rmw::{read_modify_write_if, Precondition};

/// Strategies for one update intent, plus what to tell the caller on success.
struct Plan {
    kind: CnpgKind,
    strategies: Vec<MergeStrategy>,
    done: String,
    precondition: Option<Precondition>,
}

impl Plan {
    fn cluster(strategies: Vec<MergeStrategy>, done: impl Into<String>) -> Self {
        Self { kind: CnpgKind::Cluster, strategies, done: done.into(), precondition: None }
    }

    fn requiring(mut self, precondition: Precondition) -> Self {
        self.precondition = Some(precondition);
        self
    }
}

/// Bootstrap SQL only runs under `initdb`; a cluster bootstrapped any other way
/// must not gain a second method.
fn bootstrapped_by_initdb(doc: &Document) -> CnpgResult<()> {
    let Some(bootstrap) = value_at(doc, "spec.bootstrap").and_then(|b| b.as_object()) else {
        return Ok(());
    };
    match bootstrap.keys().find(|k| k.as_str() != "initdb") {
        Some(method) => Err(CnpgError::StructuralMismatch(format!(
            "cluster '{}' is bootstrapped with '{}'; bootstrap SQL applies only to initdb clusters",
            str_at(doc, "metadata.name").unwrap_or("-"),
            method
        ))),
        None => Ok(()),
    }
}

fn plan(op: &str, args: &Args) -> CnpgResult<Plan> {
    let name = args.str("name")?;
    Ok(match op {
        "scale_cluster" => {
            let n = args.int("instances")?;
            Plan::cluster(vec![MergeStrategy::set("spec.instances", n)?], format!("scaled to {} instance(s)", n))
        }
        "upgrade_cluster" => {
            let image = match args.opt_str("imageName") {
                Some(i) => i.to_string(),
                None => image_for_version(args.str("postgresVersion")?),
            };
            Plan::cluster(vec![MergeStrategy::set("spec.imageName", image.as_str())?], format!("image set to {}", image))
        }
        "pause_cluster" => Plan::cluster(
            vec![MergeStrategy::annotate(HIBERNATION_ANNOTATION, Presence::On("on".into()))],
            "hibernation requested; instances shut down, volumes are kept",
        ),
        "resume_cluster" => Plan::cluster(vec![MergeStrategy::annotate(HIBERNATION_ANNOTATION, Presence::Off)], "hibernation lifted; instances start again"),
        "restart_cluster" => {
            let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
            Plan::cluster(vec![MergeStrategy::annotate(RESTARTED_AT_ANNOTATION, Presence::On(now))], "rolling restart requested")
        }
        "switchover_cluster" => {
            let target = args.str("targetPrimary")?;
            let instance = target.strip_prefix(name).and_then(|rest| rest.strip_prefix('-')).unwrap_or("");
            if instance.is_empty() {
                return Err(CnpgError::Validation(format!(
                    "'targetPrimary': '{}' is not an instance of cluster '{}' (expected {}-<n>)",
                    target, name, name
                )));
            }
            Plan::cluster(
                vec![MergeStrategy::annotate(TARGET_PRIMARY_ANNOTATION, Presence::On(target.to_string()))],
                format!("switchover to '{}' requested", target),
            )
        }
        "update_parameters" => {
            let params = args.key_values("parameters");
            let keys: Vec<String> = params.keys().cloned().collect();
            Plan::cluster(vec![MergeStrategy::merge("spec.postgresql.parameters", params)?], format!("parameters updated: {}", keys.join(", ")))
        }
        "set_replica_mode" => {
            let enabled = args.bool("enabled")?;
            let mut strategies = vec![MergeStrategy::set("spec.replica.enabled", enabled)?];
            if let Some(src) = args.opt_str("source") {
                strategies.push(MergeStrategy::set("spec.replica.source", src)?);
            }
            Plan::cluster(strategies, if enabled { "replica mode enabled" } else { "replica mode disabled" })
        }
        "add_tablespace" => {
            let ts = args.str("tablespaceName")?;
            let element = tablespace_element(
                ts,
                args.str("size")?,
                args.opt_str("storageClass"),
                args.opt_str("owner"),
                args.opt_bool("temporary"),
            );
            Plan::cluster(vec![MergeStrategy::append("spec.tablespaces", element)?], format!("tablespace '{}' added", ts))
        }
        "enable_extension" => {
            let ext = args.str("extension")?;
            Plan::cluster(
                vec![MergeStrategy::append("spec.bootstrap.initdb.postInitApplicationSQL", create_extension_sql(ext))?],
                format!("extension '{}' added to the application database bootstrap SQL", ext),
            )
            .requiring(bootstrapped_by_initdb)
        }
        "create_database" => {
            let db = args.str("database")?;
            Plan::cluster(
                vec![MergeStrategy::append("spec.bootstrap.initdb.postInitSQL", create_database_sql(db, args.opt_str("owner")))?],
                format!("database '{}' added to the bootstrap SQL", db),
            )
            .requiring(bootstrapped_by_initdb)
        }
        "configure_pooler" => {
            let mut strategies = Vec::new();
            let mut changed = Vec::new();
            if let Some(mode) = args.opt_str("poolMode") {
                strategies.push(MergeStrategy::set("spec.pgbouncer.poolMode", mode)?);
                changed.push(format!("poolMode={}", mode));
            }
            if let Some(n) = args.opt_int("instances") {
                strategies.push(MergeStrategy::set("spec.instances", n)?);
                changed.push(format!("instances={}", n));
            }
            let params = args.key_values("parameters");
            if !params.is_empty() {
                changed.extend(params.iter().map(|(k, v)| format!("{}={}", k, v.as_str().unwrap_or_default())));
                strategies.push(MergeStrategy::merge("spec.pgbouncer.parameters", params)?);
            }
            Plan { kind: CnpgKind::Pooler, strategies, done: format!("reconfigured: {}", changed.join(", ")), precondition: None }
        }
        "suspend_scheduled_backup" => {
            let suspend = args.bool("suspend")?;
            Plan {
                kind: CnpgKind::ScheduledBackup,
                strategies: vec![MergeStrategy::set("spec.suspend", Json::Bool(suspend))?],
                done: if suspend { "suspended".into() } else { "resumed".into() },
                precondition: None,
            }
        }
        other => return Err(CnpgError::UnknownOperation(other.to_string())),
    })
}

/// Appends to arrays are not idempotent; repeating one of these adds another entry.
const APPENDS: &[&str] = &["add_tablespace", "enable_extension", "create_database"];

pub(crate) async fn run(client: &dyn ResourceClient, op: &str, args: &Args) -> CnpgResult<String> {
    let plan = plan(op, args)?;
    let reference = ResourceRef::new(plan.kind, args.str("namespace")?, args.str("name")?);
    let out = read_modify_write_if(client, &reference, &plan.strategies, plan.precondition).await?;
    let subject = format!("{} '{}' in namespace '{}'", capitalize(reference.kind().noun()), reference.name(), reference.namespace());
    if !out.changed {
        return Ok(format!("{}: no change ({} already in effect)", subject, plan.done));
    }
    let mut msg = format!("{}: {}", subject, plan.done);
    if APPENDS.contains(&op) {
        msg.push_str(" (not idempotent: repeating this adds another entry)");
    }
    Ok(msg)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
