use cnpg_apply::MergeStrategy;
use cnpg_compile::{BackupRequest, ClusterRequest, Compiled, PoolerRequest, ScheduledBackupRequest};
use cnpg_core::{str_at, CnpgError, CnpgKind, CnpgResult, ResourceRef};
use cnpg_kubehub::ResourceClient;
use cnpg_schema::Args;
use tracing::info;

use crate::rmw::read_modify_write;

pub(crate) async fn run(client: &dyn ResourceClient, op: &str, args: &Args) -> CnpgResult<String> {
    match op {
        "create_cluster" => {
            let req = ClusterRequest::from_args(args)?;
            submit(client, req.compile()).await?;
            Ok(format!("Cluster '{}' created in namespace '{}' with {} instance(s)", req.name, req.namespace, req.instances))
        }
        "restore_cluster" => {
            let req = ClusterRequest::recovery_from_args(args)?;
            let backup_name = args.str("backupName")?;
            let backup = client.get(&ResourceRef::new(CnpgKind::Backup, &req.namespace, backup_name)).await?;
            if let Some(phase) = str_at(&backup, "status.phase").filter(|p| *p != "completed") {
                return Err(CnpgError::Validation(format!("backup '{}' is not completed (phase: {})", backup_name, phase)));
            }
            submit(client, req.compile()).await?;
            Ok(format!("Cluster '{}' is being restored from backup '{}' in namespace '{}'", req.name, backup_name, req.namespace))
        }
        "create_replica_cluster" => {
            let req = ClusterRequest::replica_from_args(args)?;
            let source = args.str("sourceCluster")?;
            client.get(&ResourceRef::new(CnpgKind::Cluster, &req.namespace, source)).await?;
            submit(client, req.compile()).await?;
            Ok(format!("Replica cluster '{}' created in namespace '{}', following '{}'", req.name, req.namespace, source))
        }
        "create_backup" => {
            let req = BackupRequest::from_args(args)?;
            submit(client, req.compile()).await?;
            Ok(format!("Backup '{}' of cluster '{}' started in namespace '{}'", req.name, req.cluster, req.namespace))
        }
        "create_scheduled_backup" => create_scheduled_backup(client, args).await,
        "create_pooler" => {
            let req = PoolerRequest::from_args(args)?;
            submit(client, req.compile()).await?;
            Ok(format!(
                "Pooler '{}' ({}, {} mode) created for cluster '{}' in namespace '{}'",
                req.name,
                req.pooler_type.as_str(),
                req.pool_mode,
                req.cluster,
                req.namespace
            ))
        }
        other => Err(CnpgError::UnknownOperation(other.to_string())),
    }
}

async fn submit(client: &dyn ResourceClient, compiled: Compiled) -> CnpgResult<()> {
    let Compiled { reference, document } = compiled;
    client.create(&reference, document).await?;
    info!(kind = %reference.kind(), ns = %reference.namespace(), name = %reference.name(), "created");
    Ok(())
}

/// Retention lives on the Cluster, so it is a second, separate update after the
/// schedule exists. The cluster is fetched first so a missing one leaves no schedule behind.
async fn create_scheduled_backup(client: &dyn ResourceClient, args: &Args) -> CnpgResult<String> {
    let req = ScheduledBackupRequest::from_args(args)?;
    let cluster = ResourceRef::new(CnpgKind::Cluster, &req.namespace, &req.cluster);
    if req.retention_policy.is_some() {
        client.get(&cluster).await?;
    }
    submit(client, req.compile()).await?;
    let mut msg = format!(
        "Scheduled backup '{}' created for cluster '{}' in namespace '{}' (schedule '{}')",
        req.name, req.cluster, req.namespace, req.schedule
    );
    if let Some(policy) = &req.retention_policy {
        let set = MergeStrategy::set("spec.backup.retentionPolicy", policy.as_str())?;
        read_modify_write(client, &cluster, &[set])
            .await
            .map_err(|e| e.context(&format!("scheduled backup '{}' was created, but setting the retention policy failed", req.name)))?;
        msg.push_str(&format!("; cluster retention policy set to {}", policy));
    }
    Ok(msg)
}
