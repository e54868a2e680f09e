use std::sync::Arc;

use cnpg_core::{CnpgError, CnpgKind, CnpgResult, Document, ErrorKind, Intent, ResourceRef};
use cnpg_kubehub::memory::{Call, MemoryClient};
use cnpg_kubehub::ResourceClient;
use cnpg_ops::Dispatcher;
use serde_json::{json, Value};

fn prod_cluster() -> Value {
    json!({
        "apiVersion": "postgresql.cnpg.io/v1",
        "kind": "Cluster",
        "metadata": {
            "name": "prod",
            "namespace": "db",
            "labels": {"team": "payments"},
            "managedFields": [{"manager": "cnpg", "operation": "Update"}]
        },
        "spec": {
            "instances": 3,
            "imageName": "ghcr.io/cloudnative-pg/postgresql:16",
            "storage": {"size": "10Gi"},
            "postgresql": {"parameters": {"shared_buffers": "256MB"}},
            "x-vendor-extension": {"keep": true}
        },
        "status": {"phase": "Cluster in healthy state", "readyInstances": 3, "currentPrimary": "prod-1"}
    })
}

fn setup() -> (Arc<MemoryClient>, Dispatcher, ResourceRef) {
    let mc = Arc::new(MemoryClient::new());
    let r = mc.insert(CnpgKind::Cluster, prod_cluster());
    let d = Dispatcher::new(mc.clone());
    (mc, d, r)
}

fn replace_count(mc: &MemoryClient) -> usize {
    mc.calls().iter().filter(|c| matches!(c, Call::Replace(..))).count()
}

#[tokio::test]
async fn scale_replaces_only_instances() {
    let (mc, d, r) = setup();
    let fetched = mc.object(&r).unwrap();
    let res = d.dispatch(&Intent::new("scale_cluster", json!({"name": "prod", "namespace": "db", "instances": 5}))).await;
    assert!(res.ok, "{:?}", res);
    assert_eq!(replace_count(&mc), 1);
    let body = &mc.replaced_bodies()[0];
    assert_eq!(body["spec"]["instances"], 5);
    assert!(body.get("status").is_none());
    let (b, f) = (body.as_object().unwrap(), fetched.as_object().unwrap());
    for key in ["apiVersion", "kind", "metadata"] {
        assert_eq!(b[key], f[key], "{}", key);
    }
    let mut expected_spec = f["spec"].clone();
    expected_spec["instances"] = json!(5);
    assert_eq!(b["spec"], expected_spec);
    assert_eq!(mc.object(&r).unwrap()["spec"]["instances"], 5);
}

#[tokio::test]
async fn scaling_to_current_size_is_a_no_op() {
    let (mc, d, _) = setup();
    let res = d.dispatch(&Intent::new("scale_cluster", json!({"name": "prod", "namespace": "db", "instances": 3}))).await;
    assert!(res.ok);
    assert!(res.message.contains("no change"), "{}", res.message);
    assert_eq!(replace_count(&mc), 0);
}

#[tokio::test]
async fn validation_happens_before_any_call() {
    let (mc, d, _) = setup();
    let res = d.dispatch(&Intent::new("scale_cluster", json!({"name": "prod", "namespace": "db", "replicas": 5}))).await;
    assert!(!res.ok);
    assert_eq!(res.error_kind, Some(ErrorKind::Validation));
    assert!(mc.calls().is_empty());

    let res = d.dispatch(&Intent::new("drop_cluster", json!({}))).await;
    assert_eq!(res.error_kind, Some(ErrorKind::UnknownOperation));
    assert!(mc.calls().is_empty());
}

#[tokio::test]
async fn pause_then_resume_never_leaves_hibernation_on() {
    let (mc, d, r) = setup();
    let args = json!({"name": "prod", "namespace": "db"});
    assert!(d.dispatch(&Intent::new("pause_cluster", args.clone())).await.ok);
    assert_eq!(mc.object(&r).unwrap()["metadata"]["annotations"]["cnpg.io/hibernation"], "on");
    assert!(d.dispatch(&Intent::new("resume_cluster", args)).await.ok);
    let annotations = mc.object(&r).unwrap()["metadata"]["annotations"].clone();
    assert_ne!(annotations.get("cnpg.io/hibernation"), Some(&json!("on")));
    assert_eq!(annotations, json!({}));
}

#[tokio::test]
async fn create_backup_names_are_unique() {
    let (mc, d, _) = setup();
    let intent = Intent::new("create_backup", json!({"clusterName": "prod", "namespace": "db"}));
    let (a, b) = (d.dispatch(&intent).await, d.dispatch(&intent).await);
    assert!(a.ok && b.ok, "{:?} {:?}", a, b);
    let names: Vec<String> = mc
        .calls()
        .iter()
        .filter_map(|c| match c {
            Call::Create(r, _) => Some(r.name().to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.iter().all(|n| n.starts_with("prod-backup-")));
    assert_ne!(names[0], names[1]);
}

/// Lets another writer bump the object between our get and our replace.
struct RacingClient {
    inner: Arc<MemoryClient>,
    drop_version: bool,
}

#[async_trait::async_trait]
impl ResourceClient for RacingClient {
    async fn get(&self, reference: &ResourceRef) -> CnpgResult<Document> {
        let mut doc = self.inner.get(reference).await?;
        if self.drop_version {
            if let Some(meta) = doc.get_mut("metadata").and_then(|m| m.as_object_mut()) {
                meta.remove("resourceVersion");
            }
        } else {
            self.inner.external_write(reference, |d| d["spec"]["instances"] = json!(4));
        }
        Ok(doc)
    }
    async fn list(&self, kind: CnpgKind, namespace: Option<&str>) -> CnpgResult<Vec<Document>> {
        self.inner.list(kind, namespace).await
    }
    async fn create(&self, reference: &ResourceRef, body: Document) -> CnpgResult<Document> {
        self.inner.create(reference, body).await
    }
    async fn replace(&self, reference: &ResourceRef, body: Document) -> CnpgResult<Document> {
        self.inner.replace(reference, body).await
    }
    async fn delete(&self, reference: &ResourceRef) -> CnpgResult<()> {
        self.inner.delete(reference).await
    }
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> CnpgResult<Vec<Document>> {
        self.inner.list_pods(namespace, label_selector).await
    }
    async fn list_events(&self, namespace: &str, field_selector: &str) -> CnpgResult<Vec<Document>> {
        self.inner.list_events(namespace, field_selector).await
    }
    async fn pod_logs(&self, namespace: &str, pod: &str, container: Option<&str>, tail_lines: Option<i64>) -> CnpgResult<String> {
        self.inner.pod_logs(namespace, pod, container, tail_lines).await
    }
}

#[tokio::test]
async fn concurrent_write_surfaces_as_retryable_conflict() {
    let mc = Arc::new(MemoryClient::new());
    let r = mc.insert(CnpgKind::Cluster, prod_cluster());
    let d = Dispatcher::new(Arc::new(RacingClient { inner: mc.clone(), drop_version: false }));
    let res = d.dispatch(&Intent::new("scale_cluster", json!({"name": "prod", "namespace": "db", "instances": 5}))).await;
    assert!(!res.ok);
    assert_eq!(res.error_kind, Some(ErrorKind::Conflict));
    assert_ne!(res.error_kind, Some(ErrorKind::Transport));
    assert!(res.retryable);
    // The other writer's change survives.
    assert_eq!(mc.object(&r).unwrap()["spec"]["instances"], 4);
}

#[tokio::test]
async fn document_without_resource_version_is_not_replaced() {
    let mc = Arc::new(MemoryClient::new());
    mc.insert(CnpgKind::Cluster, prod_cluster());
    let d = Dispatcher::new(Arc::new(RacingClient { inner: mc.clone(), drop_version: true }));
    let res = d.dispatch(&Intent::new("pause_cluster", json!({"name": "prod", "namespace": "db"}))).await;
    assert_eq!(res.error_kind, Some(ErrorKind::StructuralMismatch));
    assert_eq!(replace_count(&mc), 0);
}

#[tokio::test]
async fn transport_failure_is_not_retryable() {
    let (mc, d, _) = setup();
    mc.fail_next(CnpgError::Transport("connection refused".into()));
    let res = d.dispatch(&Intent::new("pause_cluster", json!({"name": "prod", "namespace": "db"}))).await;
    assert_eq!(res.error_kind, Some(ErrorKind::Transport));
    assert!(!res.retryable);
    assert!(res.message.starts_with("pause_cluster failed:"), "{}", res.message);
}

#[tokio::test]
async fn restore_from_missing_backup_names_it() {
    let (mc, d, _) = setup();
    let res = d
        .dispatch(&Intent::new("restore_cluster", json!({"name": "prod-restore", "namespace": "db", "backupName": "nightly-1"})))
        .await;
    assert_eq!(res.error_kind, Some(ErrorKind::NotFound));
    assert_eq!(res.detail.as_deref(), Some("backup 'nightly-1' not found in namespace 'db'"));
    assert!(mc.calls().iter().all(|c| !matches!(c, Call::Create(..))));
}

#[tokio::test]
async fn restore_from_completed_backup() {
    let (mc, d, _) = setup();
    mc.insert(
        CnpgKind::Backup,
        json!({"kind": "Backup", "metadata": {"name": "nightly-1", "namespace": "db"}, "spec": {"cluster": {"name": "prod"}}, "status": {"phase": "completed"}}),
    );
    let res = d
        .dispatch(&Intent::new("restore_cluster", json!({"name": "prod-restore", "namespace": "db", "backupName": "nightly-1"})))
        .await;
    assert!(res.ok, "{:?}", res);
    let created = mc.object(&ResourceRef::new(CnpgKind::Cluster, "db", "prod-restore")).unwrap();
    assert_eq!(created["spec"]["bootstrap"]["recovery"]["backup"]["name"], "nightly-1");
}

#[tokio::test]
async fn scheduled_backup_retention_goes_to_the_cluster() {
    let (mc, d, r) = setup();
    let res = d
        .dispatch(&Intent::new(
            "create_scheduled_backup",
            json!({"name": "nightly", "namespace": "db", "clusterName": "prod", "schedule": "0 2 * * *", "backupRetentionPolicy": "30d"}),
        ))
        .await;
    assert!(res.ok, "{:?}", res);
    let sched = mc.object(&ResourceRef::new(CnpgKind::ScheduledBackup, "db", "nightly")).unwrap();
    assert_eq!(sched["spec"]["schedule"], "0 0 2 * * *");
    assert_eq!(mc.object(&r).unwrap()["spec"]["backup"]["retentionPolicy"], "30d");
}

#[tokio::test]
async fn retention_for_missing_cluster_creates_nothing() {
    let mc = Arc::new(MemoryClient::new());
    let d = Dispatcher::new(mc.clone());
    let intent = Intent::new(
        "create_scheduled_backup",
        json!({"name": "nightly", "namespace": "db", "clusterName": "prod", "schedule": "0 2 * * *", "backupRetentionPolicy": "30d"}),
    );
    let res = d.dispatch(&intent).await;
    assert_eq!(res.error_kind, Some(ErrorKind::NotFound));
    assert_eq!(res.detail.as_deref(), Some("cluster 'prod' not found in namespace 'db'"));
    assert!(mc.object(&ResourceRef::new(CnpgKind::ScheduledBackup, "db", "nightly")).is_none());
    assert!(mc.calls().iter().all(|c| !matches!(c, Call::Create(..))));

    let r = mc.insert(CnpgKind::Cluster, prod_cluster());
    let res = d.dispatch(&intent).await;
    assert!(res.ok, "{:?}", res);
    assert_eq!(mc.object(&r).unwrap()["spec"]["backup"]["retentionPolicy"], "30d");
}

#[tokio::test]
async fn timeout_is_reported_as_retryable() {
    let (mc, d, _) = setup();
    mc.fail_next(CnpgError::Timeout("get of cluster 'prod' did not complete within 30s".into()));
    let res = d.dispatch(&Intent::new("scale_cluster", json!({"name": "prod", "namespace": "db", "instances": 4}))).await;
    assert!(!res.ok);
    assert_eq!(res.error_kind, Some(ErrorKind::Timeout));
    assert!(res.retryable);
    assert_eq!(replace_count(&mc), 0);
    let v = serde_json::to_value(&res).unwrap();
    assert_eq!(v["errorKind"], "timeout");
    assert_eq!(v["retryable"], true);
}

#[tokio::test]
async fn create_cluster_twice_reports_already_exists() {
    let (_, d, _) = setup();
    let res = d.dispatch(&Intent::new("create_cluster", json!({"name": "prod", "namespace": "db"}))).await;
    assert_eq!(res.error_kind, Some(ErrorKind::AlreadyExists));
    assert!(!res.retryable);
}

#[tokio::test]
async fn create_database_twice_appends_twice() {
    let (mc, d, r) = setup();
    let intent = Intent::new("create_database", json!({"name": "prod", "namespace": "db", "database": "sales", "owner": "app"}));
    let first = d.dispatch(&intent).await;
    assert!(first.ok);
    assert!(first.message.contains("not idempotent"));
    assert!(d.dispatch(&intent).await.ok);
    let sql = mc.object(&r).unwrap()["spec"]["bootstrap"]["initdb"]["postInitSQL"].clone();
    assert_eq!(sql, json!(["CREATE DATABASE \"sales\" OWNER \"app\";", "CREATE DATABASE \"sales\" OWNER \"app\";"]));
}

#[tokio::test]
async fn bootstrap_sql_on_a_restored_cluster_is_refused() {
    let (mc, d, _) = setup();
    let restored = mc.insert(
        CnpgKind::Cluster,
        json!({
            "apiVersion": "postgresql.cnpg.io/v1", "kind": "Cluster",
            "metadata": {"name": "prod-restore", "namespace": "db"},
            "spec": {"instances": 3, "bootstrap": {"recovery": {"backup": {"name": "b1"}}}}
        }),
    );
    for intent in [
        Intent::new("enable_extension", json!({"name": "prod-restore", "namespace": "db", "extension": "pg_trgm"})),
        Intent::new("create_database", json!({"name": "prod-restore", "namespace": "db", "database": "sales"})),
    ] {
        let res = d.dispatch(&intent).await;
        assert_eq!(res.error_kind, Some(ErrorKind::StructuralMismatch), "{:?}", res);
        assert!(res.message.contains("recovery"), "{}", res.message);
    }
    assert_eq!(replace_count(&mc), 0);
    assert_eq!(mc.object(&restored).unwrap()["spec"]["bootstrap"], json!({"recovery": {"backup": {"name": "b1"}}}));
}

#[tokio::test]
async fn empty_parameter_list_is_rejected() {
    let (mc, d, _) = setup();
    let res = d.dispatch(&Intent::new("update_parameters", json!({"name": "prod", "namespace": "db", "parameters": []}))).await;
    assert_eq!(res.error_kind, Some(ErrorKind::Validation));
    mc.insert(CnpgKind::Pooler, json!({"kind": "Pooler", "metadata": {"name": "p", "namespace": "db"}, "spec": {"cluster": {"name": "prod"}}}));
    let res = d.dispatch(&Intent::new("configure_pooler", json!({"name": "p", "namespace": "db", "parameters": []}))).await;
    assert_eq!(res.error_kind, Some(ErrorKind::Validation));
    assert!(mc.calls().iter().all(|c| !matches!(c, Call::Get(..) | Call::Replace(..))));
}

#[tokio::test]
async fn update_parameters_merges() {
    let (mc, d, r) = setup();
    let res = d
        .dispatch(&Intent::new("update_parameters", json!({"name": "prod", "namespace": "db", "parameters": ["max_connections=200"]})))
        .await;
    assert!(res.ok);
    assert_eq!(
        mc.object(&r).unwrap()["spec"]["postgresql"]["parameters"],
        json!({"shared_buffers": "256MB", "max_connections": "200"})
    );
}

#[tokio::test]
async fn pooler_lifecycle() {
    let (mc, d, _) = setup();
    assert!(d.dispatch(&Intent::new("create_pooler", json!({"clusterName": "prod", "namespace": "db"}))).await.ok);
    let res = d
        .dispatch(&Intent::new("configure_pooler", json!({"name": "prod-pooler-rw", "namespace": "db", "poolMode": "transaction", "instances": 2})))
        .await;
    assert!(res.ok, "{:?}", res);
    let p = mc.object(&ResourceRef::new(CnpgKind::Pooler, "db", "prod-pooler-rw")).unwrap();
    assert_eq!(p["spec"]["pgbouncer"]["poolMode"], "transaction");
    assert_eq!(p["spec"]["instances"], 2);
    let listing = d.dispatch(&Intent::new("list_poolers", json!({"namespace": "db"}))).await;
    assert!(listing.message.contains("prod-pooler-rw"));
    assert!(d.dispatch(&Intent::new("delete_pooler", json!({"name": "prod-pooler-rw", "namespace": "db"}))).await.ok);
    let again = d.dispatch(&Intent::new("delete_pooler", json!({"name": "prod-pooler-rw", "namespace": "db"}))).await;
    assert_eq!(again.error_kind, Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn read_layer_lists_and_renders() {
    let (mc, d, _) = setup();
    mc.add_pod("db", json!({"metadata": {"name": "prod-1", "labels": {"cnpg.io/cluster": "prod", "cnpg.io/instanceRole": "primary"}}, "status": {"phase": "Running"}}));
    mc.add_pod("db", json!({"metadata": {"name": "else-1", "labels": {"cnpg.io/cluster": "else"}}}));
    mc.set_logs("db", "prod-1", "a\nb\nc");

    let clusters = d.dispatch(&Intent::new("list_clusters", json!({}))).await;
    assert!(clusters.ok);
    assert!(clusters.message.starts_with("NAME"));
    assert!(clusters.message.contains("prod"));

    let yaml = d.dispatch(&Intent::new("get_cluster", json!({"name": "prod", "namespace": "db"}))).await;
    assert!(yaml.message.contains("instances: 3"));
    assert!(!yaml.message.contains("managedFields"));

    let status = d.dispatch(&Intent::new("cluster_status", json!({"name": "prod", "namespace": "db"}))).await;
    assert!(status.message.contains("prod-1"));
    assert!(status.message.contains("Hibernated:     no"));

    let pods = d.dispatch(&Intent::new("list_pods", json!({"name": "prod", "namespace": "db"}))).await;
    assert!(pods.message.contains("primary"));
    assert!(!pods.message.contains("else-1"));

    let logs = d.dispatch(&Intent::new("get_logs", json!({"pod": "prod-1", "namespace": "db", "tailLines": 2}))).await;
    assert_eq!(logs.message, "b\nc");

    let none = d.dispatch(&Intent::new("list_backups", json!({"namespace": "db", "clusterName": "prod"}))).await;
    assert_eq!(none.message, "No backups of cluster 'prod' found in namespace 'db'");
}
