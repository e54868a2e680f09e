//! Read-only passthrough queries. No mutation, no caching.

use cnpg_apply::strip_managed_fields;
use cnpg_core::{str_at, CnpgError, CnpgKind, CnpgResult, Document, ResourceRef, CLUSTER_LABEL, HIBERNATION_ANNOTATION};
use cnpg_kubehub::ResourceClient;
use cnpg_schema::Args;

use crate::format::{age, name, table, text};

pub(crate) const DEFAULT_TAIL_LINES: i64 = 100;
pub(crate) const DEFAULT_CONTAINER: &str = "postgres";
const MAX_EVENTS: usize = 50;

pub(crate) async fn run(client: &dyn ResourceClient, op: &str, args: &Args) -> CnpgResult<String> {
    match op {
        "list_clusters" => list_clusters(client, args.opt_str("namespace")).await,
        "get_cluster" => get_cluster(client, &cluster_ref(args)?).await,
        "cluster_status" => cluster_status(client, &cluster_ref(args)?).await,
        "list_backups" => list_backups(client, args.str("namespace")?, args.opt_str("clusterName")).await,
        "list_scheduled_backups" => list_scheduled_backups(client, args.str("namespace")?).await,
        "list_poolers" => list_poolers(client, args.str("namespace")?).await,
        "list_pods" => list_pods(client, args.str("namespace")?, args.str("name")?).await,
        "list_events" => list_events(client, args.str("namespace")?, args.str("name")?).await,
        "get_logs" => {
            let ns = args.str("namespace")?;
            let pod = args.str("pod")?;
            let container = args.opt_str("container").unwrap_or(DEFAULT_CONTAINER);
            let tail = args.opt_int("tailLines").unwrap_or(DEFAULT_TAIL_LINES);
            let logs = client.pod_logs(ns, pod, Some(container), Some(tail)).await?;
            Ok(if logs.trim().is_empty() { format!("No log output from pod '{}' in namespace '{}'", pod, ns) } else { logs })
        }
        other => Err(CnpgError::UnknownOperation(other.to_string())),
    }
}

fn cluster_ref(args: &Args) -> CnpgResult<ResourceRef> {
    Ok(ResourceRef::new(CnpgKind::Cluster, args.str("namespace")?, args.str("name")?))
}

fn scope(namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("in namespace '{}'", ns),
        None => "in any namespace".to_string(),
    }
}

async fn list_clusters(client: &dyn ResourceClient, namespace: Option<&str>) -> CnpgResult<String> {
    let items = client.list(CnpgKind::Cluster, namespace).await?;
    if items.is_empty() {
        return Ok(format!("No clusters found {}", scope(namespace)));
    }
    let rows: Vec<Vec<String>> = items
        .iter()
        .map(|c| {
            vec![
                name(c),
                text(c, "metadata.namespace"),
                text(c, "spec.instances"),
                text(c, "status.readyInstances"),
                text(c, "status.phase"),
                age(c, "metadata.creationTimestamp"),
            ]
        })
        .collect();
    Ok(table(&["NAME", "NAMESPACE", "INSTANCES", "READY", "PHASE", "AGE"], &rows))
}

async fn get_cluster(client: &dyn ResourceClient, reference: &ResourceRef) -> CnpgResult<String> {
    let doc = strip_managed_fields(client.get(reference).await?);
    serde_yaml::to_string(&doc).map_err(|e| CnpgError::Transport(format!("cannot render {} as YAML: {}", reference, e)))
}

fn hibernated(doc: &Document) -> bool {
    doc.get("metadata")
        .and_then(|m| m.get("annotations"))
        .and_then(|a| a.get(HIBERNATION_ANNOTATION))
        .and_then(|v| v.as_str())
        == Some("on")
}

async fn cluster_status(client: &dyn ResourceClient, reference: &ResourceRef) -> CnpgResult<String> {
    let c = client.get(reference).await?;
    let lines = [
        format!("Cluster:        {}/{}", reference.namespace(), reference.name()),
        format!("Phase:          {}", text(&c, "status.phase")),
        format!("Instances:      {} (ready {})", text(&c, "spec.instances"), text(&c, "status.readyInstances")),
        format!("Primary:        {}", text(&c, "status.currentPrimary")),
        format!("Target primary: {}", text(&c, "status.targetPrimary")),
        format!("Image:          {}", text(&c, "spec.imageName")),
        format!("Hibernated:     {}", if hibernated(&c) { "yes" } else { "no" }),
    ];
    Ok(lines.join("\n"))
}

async fn list_backups(client: &dyn ResourceClient, namespace: &str, cluster: Option<&str>) -> CnpgResult<String> {
    let items: Vec<Document> = client
        .list(CnpgKind::Backup, Some(namespace))
        .await?
        .into_iter()
        .filter(|b| cluster.map(|c| str_at(b, "spec.cluster.name") == Some(c)).unwrap_or(true))
        .collect();
    if items.is_empty() {
        return Ok(match cluster {
            Some(c) => format!("No backups of cluster '{}' found in namespace '{}'", c, namespace),
            None => format!("No backups found in namespace '{}'", namespace),
        });
    }
    let rows: Vec<Vec<String>> = items
        .iter()
        .map(|b| vec![name(b), text(b, "spec.cluster.name"), text(b, "spec.method"), text(b, "status.phase"), age(b, "metadata.creationTimestamp")])
        .collect();
    Ok(table(&["NAME", "CLUSTER", "METHOD", "PHASE", "AGE"], &rows))
}

async fn list_scheduled_backups(client: &dyn ResourceClient, namespace: &str) -> CnpgResult<String> {
    let items = client.list(CnpgKind::ScheduledBackup, Some(namespace)).await?;
    if items.is_empty() {
        return Ok(format!("No scheduled backups found in namespace '{}'", namespace));
    }
    let rows: Vec<Vec<String>> = items
        .iter()
        .map(|s| {
            let suspended = s.get("spec").and_then(|sp| sp.get("suspend")).and_then(|v| v.as_bool()).unwrap_or(false);
            vec![
                name(s),
                text(s, "spec.cluster.name"),
                text(s, "spec.schedule"),
                if suspended { "yes".into() } else { "no".into() },
                text(s, "status.lastScheduleTime"),
            ]
        })
        .collect();
    Ok(table(&["NAME", "CLUSTER", "SCHEDULE", "SUSPENDED", "LAST BACKUP"], &rows))
}

async fn list_poolers(client: &dyn ResourceClient, namespace: &str) -> CnpgResult<String> {
    let items = client.list(CnpgKind::Pooler, Some(namespace)).await?;
    if items.is_empty() {
        return Ok(format!("No poolers found in namespace '{}'", namespace));
    }
    let rows: Vec<Vec<String>> = items
        .iter()
        .map(|p| vec![name(p), text(p, "spec.cluster.name"), text(p, "spec.type"), text(p, "spec.instances"), text(p, "spec.pgbouncer.poolMode")])
        .collect();
    Ok(table(&["NAME", "CLUSTER", "TYPE", "INSTANCES", "POOL MODE"], &rows))
}

fn pod_role(pod: &Document) -> String {
    let labels = pod.get("metadata").and_then(|m| m.get("labels"));
    ["cnpg.io/instanceRole", "role"]
        .iter()
        .find_map(|k| labels.and_then(|l| l.get(*k)).and_then(|v| v.as_str()))
        .unwrap_or("-")
        .to_string()
}

async fn list_pods(client: &dyn ResourceClient, namespace: &str, cluster: &str) -> CnpgResult<String> {
    let pods = client.list_pods(namespace, &format!("{}={}", CLUSTER_LABEL, cluster)).await?;
    if pods.is_empty() {
        return Ok(format!("No pods found for cluster '{}' in namespace '{}'", cluster, namespace));
    }
    let rows: Vec<Vec<String>> = pods
        .iter()
        .map(|p| vec![name(p), pod_role(p), text(p, "status.phase"), text(p, "spec.nodeName"), age(p, "metadata.creationTimestamp")])
        .collect();
    Ok(table(&["NAME", "ROLE", "PHASE", "NODE", "AGE"], &rows))
}

fn event_time(e: &Document) -> &str {
    str_at(e, "lastTimestamp").or_else(|| str_at(e, "eventTime")).or_else(|| str_at(e, "metadata.creationTimestamp")).unwrap_or("")
}

async fn list_events(client: &dyn ResourceClient, namespace: &str, cluster: &str) -> CnpgResult<String> {
    let mut events = client.list_events(namespace, &format!("involvedObject.name={}", cluster)).await?;
    if events.is_empty() {
        return Ok(format!("No events found for cluster '{}' in namespace '{}'", cluster, namespace));
    }
    // RFC3339 strings sort chronologically; newest last.
    events.sort_by(|a, b| event_time(a).cmp(event_time(b)));
    let skip = events.len().saturating_sub(MAX_EVENTS);
    let rows: Vec<Vec<String>> = events[skip..]
        .iter()
        .map(|e| vec![event_time(e).to_string(), text(e, "type"), text(e, "reason"), text(e, "message")])
        .collect();
    Ok(table(&["LAST SEEN", "TYPE", "REASON", "MESSAGE"], &rows))
}
