//! cnpg ops: one entry point from intents to the API server.
//!
//! [`Dispatcher::dispatch`] validates the argument bag against the operation's
//! static schema, routes by operation class and always returns an
//! [`OperationResult`]; errors never escape as panics or `Err`.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use cnpg_core::{CnpgError, CnpgKind, CnpgResult, Intent, OperationResult, ResourceRef};
use cnpg_kubehub::ResourceClient;
use cnpg_schema::{lookup, Args, OpClass};
use metrics::{counter, histogram};
use tracing::{info, warn};

mod create;
mod format;
mod query;
mod rmw;
mod update;

pub use rmw::{read_modify_write, read_modify_write_if, Precondition, RmwOutcome, Stage};

/// Holds the adapter built at start-up; shares nothing else between intents.
#[derive(Clone)]
pub struct Dispatcher {
    client: Arc<dyn ResourceClient>,
}

impl Dispatcher {
    pub fn new(client: Arc<dyn ResourceClient>) -> Self {
        Self { client }
    }

    pub async fn dispatch(&self, intent: &Intent) -> OperationResult {
        let t0 = Instant::now();
        // Label by catalog name only so unknown input cannot grow label cardinality.
        let op_label: &'static str = lookup(&intent.operation).map(|s| s.name).unwrap_or("unknown");
        counter!("cnpg_ops_total", 1u64, "op" => op_label);
        let res = self.run(intent).await;
        let took_ms = t0.elapsed().as_secs_f64() * 1000.0;
        histogram!("cnpg_op_latency_ms", took_ms, "op" => op_label);
        match res {
            Ok(message) => {
                info!(op = %intent.operation, took_ms = took_ms as u64, "operation done");
                OperationResult::success(message)
            }
            Err(err) => {
                counter!("cnpg_ops_err", 1u64, "op" => op_label, "kind" => err.kind().as_str());
                warn!(op = %intent.operation, kind = %err.kind(), took_ms = took_ms as u64, error = %err.detail(), "operation failed");
                OperationResult::failure(&intent.operation, &err)
            }
        }
    }

    async fn run(&self, intent: &Intent) -> CnpgResult<String> {
        let spec = lookup(&intent.operation).ok_or_else(|| {
            CnpgError::UnknownOperation(format!("'{}' is not a known operation (list them with `cnpgctl tools`)", intent.operation))
        })?;
        let args = spec.validate(&intent.arguments)?;
        info!(op = spec.name, class = ?spec.class, "dispatching");
        let client = self.client.as_ref();
        match spec.class {
            OpClass::Read => query::run(client, spec.name, &args).await,
            OpClass::Create => create::run(client, spec.name, &args).await,
            OpClass::Update => update::run(client, spec.name, &args).await,
            OpClass::Delete => delete(client, spec.name, &args).await,
        }
    }
}

async fn delete(client: &dyn ResourceClient, op: &str, args: &Args) -> CnpgResult<String> {
    let kind = match op {
        "delete_cluster" => CnpgKind::Cluster,
        "delete_backup" => CnpgKind::Backup,
        "delete_scheduled_backup" => CnpgKind::ScheduledBackup,
        "delete_pooler" => CnpgKind::Pooler,
        other => return Err(CnpgError::UnknownOperation(other.to_string())),
    };
    let reference = ResourceRef::new(kind, args.str("namespace")?, args.str("name")?);
    client.delete(&reference).await?;
    Ok(format!("{} '{}' deleted from namespace '{}'", kind, reference.name(), reference.namespace()))
}
