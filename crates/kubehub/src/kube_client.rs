use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use cnpg_core::{CnpgError, CnpgKind, CnpgResult, Document, ResourceRef, GROUP, VERSION};
use k8s_openapi::api::core::v1::{Event, Pod};
use kube::{
    api::{Api, DeleteParams, ListParams, LogParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client,
};
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{debug, info};

use crate::ResourceClient;

/// Connection settings, read once at process start.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API server URL. When absent, kubeconfig / in-cluster config is inferred.
    pub endpoint: Option<String>,
    /// Bearer token for `endpoint`.
    pub token: Option<String>,
    /// Upper bound for every remote call.
    pub timeout: Duration,
    pub insecure_skip_tls_verify: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { endpoint: None, token: None, timeout: Duration::from_secs(30), insecure_skip_tls_verify: false }
    }
}

impl ClientConfig {
    /// Single-context kubeconfig for an explicit endpoint + bearer token.
    fn kubeconfig(&self, endpoint: &str) -> Result<Kubeconfig> {
        let user = match self.token.as_deref() {
            Some(t) => serde_json::json!({ "token": t }),
            None => serde_json::json!({}),
        };
        let raw = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Config",
            "clusters": [{
                "name": "cnpg",
                "cluster": { "server": endpoint, "insecure-skip-tls-verify": self.insecure_skip_tls_verify }
            }],
            "users": [{ "name": "cnpg", "user": user }],
            "contexts": [{ "name": "cnpg", "context": { "cluster": "cnpg", "user": "cnpg" } }],
            "current-context": "cnpg"
        });
        serde_json::from_value(raw).context("building kubeconfig for endpoint")
    }
}

/// [`ResourceClient`] backed by a kube-rs `Client` and `DynamicObject`s.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    timeout: Duration,
}

impl KubeClient {
    pub async fn connect(cfg: &ClientConfig) -> Result<Self> {
        let mut config = match cfg.endpoint.as_deref() {
            Some(endpoint) => {
                let kc = cfg.kubeconfig(endpoint)?;
                kube::Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                    .await
                    .context("loading client config for endpoint")?
            }
            None => kube::Config::infer().await.context("inferring kube config (kubeconfig or in-cluster)")?,
        };
        config.connect_timeout = Some(cfg.timeout);
        config.read_timeout = Some(cfg.timeout);
        let url = config.cluster_url.to_string();
        let client = Client::try_from(config).context("constructing kube client")?;
        info!(url = %url, timeout_secs = cfg.timeout.as_secs(), "kube client ready");
        Ok(Self { client, timeout: cfg.timeout })
    }

    pub fn from_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn dynamic_api(&self, kind: CnpgKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = api_resource(kind);
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }

    /// Run one remote call under the configured timeout and classify its error.
    async fn bounded<T, F>(&self, op: &'static str, reference: Option<&ResourceRef>, fut: F) -> CnpgResult<T>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        let t0 = Instant::now();
        let res = match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(classify(e, reference)),
            Err(_) => Err(CnpgError::Timeout(match reference {
                Some(r) => format!("{} of {} '{}' did not complete within {}s", op, r.kind().noun(), r.name(), self.timeout.as_secs()),
                None => format!("{} did not complete within {}s", op, self.timeout.as_secs()),
            })),
        };
        histogram!("cnpg_remote_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        if let Err(e) = &res {
            counter!("cnpg_remote_err", 1u64);
            debug!(op, error = %e, "remote call failed");
        }
        res
    }
}

fn api_resource(kind: CnpgKind) -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(GROUP, VERSION, kind.kind()), kind.plural())
}

fn to_document<T: Serialize>(obj: &T) -> CnpgResult<Document> {
    serde_json::to_value(obj).map_err(|e| CnpgError::Transport(format!("decoding response: {}", e)))
}

fn to_dynamic(body: Document) -> CnpgResult<DynamicObject> {
    serde_json::from_value(body).map_err(|e| CnpgError::StructuralMismatch(format!("document is not a valid object: {}", e)))
}

/// Map a kube error onto the cnpg taxonomy, naming the resource when known.
pub fn classify(err: kube::Error, reference: Option<&ResourceRef>) -> CnpgError {
    match err {
        kube::Error::Api(ae) => match (ae.code, reference) {
            (404, Some(r)) => r.not_found(),
            (404, None) => CnpgError::NotFound(ae.message),
            (409, Some(r)) if ae.reason == "AlreadyExists" => CnpgError::AlreadyExists(format!(
                "{} '{}' already exists in namespace '{}'",
                r.kind().noun(), r.name(), r.namespace()
            )),
            (409, _) if ae.reason == "AlreadyExists" => CnpgError::AlreadyExists(ae.message),
            (409, Some(r)) => CnpgError::Conflict(format!(
                "{} '{}' in namespace '{}' was modified after it was read; re-fetch and retry ({})",
                r.kind().noun(), r.name(), r.namespace(), ae.message
            )),
            (409, None) => CnpgError::Conflict(ae.message),
            (400 | 422, _) => CnpgError::Rejected(ae.message),
            (401 | 403, _) => CnpgError::Transport(format!("access denied ({}): {}", ae.code, ae.message)),
            (408 | 504, _) => CnpgError::Timeout(ae.message),
            (code, _) => CnpgError::Transport(format!("api error {}: {}", code, ae.message)),
        },
        other => CnpgError::Transport(other.to_string()),
    }
}

#[async_trait::async_trait]
impl ResourceClient for KubeClient {
    async fn get(&self, reference: &ResourceRef) -> CnpgResult<Document> {
        let api = self.dynamic_api(reference.kind(), Some(reference.namespace()));
        let obj = self.bounded("get", Some(reference), api.get(reference.name())).await?;
        to_document(&obj)
    }

    async fn list(&self, kind: CnpgKind, namespace: Option<&str>) -> CnpgResult<Vec<Document>> {
        let api = self.dynamic_api(kind, namespace);
        let lp = ListParams::default();
        let list = self.bounded("list", None, api.list(&lp)).await?;
        list.items.iter().map(to_document).collect()
    }

    async fn create(&self, reference: &ResourceRef, body: Document) -> CnpgResult<Document> {
        let api = self.dynamic_api(reference.kind(), Some(reference.namespace()));
        let obj = to_dynamic(body)?;
        let pp = PostParams::default();
        let created = self.bounded("create", Some(reference), api.create(&pp, &obj)).await?;
        to_document(&created)
    }

    async fn replace(&self, reference: &ResourceRef, body: Document) -> CnpgResult<Document> {
        let api = self.dynamic_api(reference.kind(), Some(reference.namespace()));
        let obj = to_dynamic(body)?;
        let pp = PostParams::default();
        let replaced = self.bounded("replace", Some(reference), api.replace(reference.name(), &pp, &obj)).await?;
        to_document(&replaced)
    }

    async fn delete(&self, reference: &ResourceRef) -> CnpgResult<()> {
        let api = self.dynamic_api(reference.kind(), Some(reference.namespace()));
        let dp = DeleteParams::default();
        let _ = self.bounded("delete", Some(reference), api.delete(reference.name(), &dp)).await?;
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> CnpgResult<Vec<Document>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(label_selector);
        let pods = self.bounded("list pods", None, api.list(&lp)).await?;
        pods.items.iter().map(to_document).collect()
    }

    async fn list_events(&self, namespace: &str, field_selector: &str) -> CnpgResult<Vec<Document>> {
        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().fields(field_selector);
        let events = self.bounded("list events", None, api.list(&lp)).await?;
        events.items.iter().map(to_document).collect()
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, container: Option<&str>, tail_lines: Option<i64>) -> CnpgResult<String> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = LogParams { container: container.map(|c| c.to_string()), tail_lines, ..LogParams::default() };
        self.bounded("logs", None, api.logs(pod, &lp)).await
    }
}
