//! cnpg kubehub – uniform access to CloudNativePG custom resources.
//!
//! Everything above this crate talks to the API server through [`ResourceClient`].
//! [`KubeClient`] is the real implementation; [`MemoryClient`] is an in-memory
//! double with the same optimistic-concurrency rules, used by tests.

#![forbid(unsafe_code)]

use cnpg_core::{CnpgKind, CnpgResult, Document, ResourceRef};

mod kube_client;
pub mod memory;

pub use kube_client::{classify, ClientConfig, KubeClient};
pub use memory::MemoryClient;

/// Remote operations against the generic object store.
///
/// Calls are single round-trips: nothing here retries, caches or waits for
/// reconciliation. Failures come back classified (`NotFound`, `Conflict`,
/// `Timeout`, ...) but otherwise unmodified.
#[async_trait::async_trait]
pub trait ResourceClient: Send + Sync {
    async fn get(&self, reference: &ResourceRef) -> CnpgResult<Document>;

    /// Namespace-scoped when `namespace` is given, cluster-wide otherwise.
    async fn list(&self, kind: CnpgKind, namespace: Option<&str>) -> CnpgResult<Vec<Document>>;

    async fn create(&self, reference: &ResourceRef, body: Document) -> CnpgResult<Document>;

    /// Full-object update. `body.metadata.resourceVersion` is the concurrency token;
    /// a stale token fails with `Conflict`.
    async fn replace(&self, reference: &ResourceRef, body: Document) -> CnpgResult<Document>;

    async fn delete(&self, reference: &ResourceRef) -> CnpgResult<()>;

    // Read-only surface over core objects.
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> CnpgResult<Vec<Document>>;
    async fn list_events(&self, namespace: &str, field_selector: &str) -> CnpgResult<Vec<Document>>;
    async fn pod_logs(&self, namespace: &str, pod: &str, container: Option<&str>, tail_lines: Option<i64>) -> CnpgResult<String>;
}
