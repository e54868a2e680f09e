//! In-memory [`ResourceClient`] for tests and offline runs.
//!
//! Mirrors the API server rules the dispatcher depends on: resourceVersion
//! checks on replace (stale token → `Conflict`), `AlreadyExists` on create,
//! immutable name/namespace, and `status` owned by the server.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use cnpg_core::{str_at, CnpgError, CnpgKind, CnpgResult, Document, ResourceRef};
use serde_json::Value as Json;

use crate::ResourceClient;

/// One recorded adapter call, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Get(ResourceRef),
    List(CnpgKind, Option<String>),
    Create(ResourceRef, Document),
    Replace(ResourceRef, Document),
    Delete(ResourceRef),
    ListPods(String, String),
    ListEvents(String, String),
    Logs(String, String),
}

type Key = (CnpgKind, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Document>,
    last_rv: u64,
    pods: Vec<(String, Document)>,
    events: Vec<(String, Document)>,
    logs: HashMap<(String, String), String>,
    calls: Vec<Call>,
    fail_next: Option<CnpgError>,
}

impl State {
    fn next_rv(&mut self) -> String {
        self.last_rv += 1;
        self.last_rv.to_string()
    }
}

#[derive(Default)]
pub struct MemoryClient {
    state: Mutex<State>,
}

fn key(r: &ResourceRef) -> Key {
    (r.kind(), r.namespace().to_string(), r.name().to_string())
}

fn meta_mut(doc: &mut Document) -> CnpgResult<&mut serde_json::Map<String, Json>> {
    doc.as_object_mut()
        .and_then(|o| o.entry("metadata").or_insert_with(|| Json::Object(Default::default())).as_object_mut())
        .ok_or_else(|| CnpgError::Rejected("metadata must be an object".into()))
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed an object as if the operator/server already held it.
    /// `kind` must be one of the cnpg kinds; `metadata.name`/`namespace` are required.
    pub fn insert(&self, kind: CnpgKind, mut doc: Document) -> ResourceRef {
        let name = str_at(&doc, "metadata.name").unwrap_or_default().to_string();
        let namespace = str_at(&doc, "metadata.namespace").unwrap_or("default").to_string();
        let reference = ResourceRef::new(kind, namespace, name);
        let mut st = self.lock();
        let rv = st.next_rv();
        if let Ok(meta) = meta_mut(&mut doc) {
            meta.insert("resourceVersion".into(), Json::String(rv));
            meta.entry("uid").or_insert_with(|| Json::String(uuid::Uuid::new_v4().to_string()));
        }
        st.objects.insert(key(&reference), doc);
        reference
    }

    /// Current stored copy, if any.
    pub fn object(&self, reference: &ResourceRef) -> Option<Document> {
        self.lock().objects.get(&key(reference)).cloned()
    }

    /// Mutate a stored object out-of-band (as the operator or another client
    /// would) and bump its resourceVersion.
    pub fn external_write(&self, reference: &ResourceRef, f: impl FnOnce(&mut Document)) -> bool {
        let mut st = self.lock();
        let rv = st.next_rv();
        match st.objects.get_mut(&key(reference)) {
            Some(doc) => {
                f(doc);
                if let Ok(meta) = meta_mut(doc) {
                    meta.insert("resourceVersion".into(), Json::String(rv));
                }
                true
            }
            None => false,
        }
    }

    /// Make the next remote call fail with `err`.
    pub fn fail_next(&self, err: CnpgError) {
        self.lock().fail_next = Some(err);
    }

    pub fn add_pod(&self, namespace: &str, pod: Document) {
        self.lock().pods.push((namespace.to_string(), pod));
    }

    pub fn add_event(&self, namespace: &str, event: Document) {
        self.lock().events.push((namespace.to_string(), event));
    }

    pub fn set_logs(&self, namespace: &str, pod: &str, text: &str) {
        self.lock().logs.insert((namespace.to_string(), pod.to_string()), text.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Bodies submitted through `replace`, in order.
    pub fn replaced_bodies(&self) -> Vec<Document> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Replace(_, body) => Some(body.clone()),
                _ => None,
            })
            .collect()
    }

    /// Record the call and consume an injected failure, if any.
    fn enter(&self, call: Call) -> CnpgResult<MutexGuard<'_, State>> {
        let mut st = self.lock();
        st.calls.push(call);
        match st.fail_next.take() {
            Some(err) => Err(err),
            None => Ok(st),
        }
    }
}

/// Equality-based label selector (`k=v,k2=v2`), enough for cluster pod lookups.
fn labels_match(doc: &Document, selector: &str) -> bool {
    selector.split(',').filter(|s| !s.is_empty()).all(|term| match term.split_once('=') {
        Some((k, v)) => doc
            .get("metadata")
            .and_then(|m| m.get("labels"))
            .and_then(|l| l.get(k.trim()))
            .and_then(|x| x.as_str())
            == Some(v.trim()),
        None => false,
    })
}

/// Field selector on dotted paths (`involvedObject.name=prod`).
fn fields_match(doc: &Document, selector: &str) -> bool {
    selector.split(',').filter(|s| !s.is_empty()).all(|term| match term.split_once('=') {
        Some((path, v)) => str_at(doc, path.trim()) == Some(v.trim()),
        None => false,
    })
}

#[async_trait::async_trait]
impl ResourceClient for MemoryClient {
    async fn get(&self, reference: &ResourceRef) -> CnpgResult<Document> {
        let st = self.enter(Call::Get(reference.clone()))?;
        st.objects.get(&key(reference)).cloned().ok_or_else(|| reference.not_found())
    }

    async fn list(&self, kind: CnpgKind, namespace: Option<&str>) -> CnpgResult<Vec<Document>> {
        let st = self.enter(Call::List(kind, namespace.map(|s| s.to_string())))?;
        Ok(st
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && namespace.map(|n| n == ns).unwrap_or(true))
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    async fn create(&self, reference: &ResourceRef, mut body: Document) -> CnpgResult<Document> {
        let mut st = self.enter(Call::Create(reference.clone(), body.clone()))?;
        if st.objects.contains_key(&key(reference)) {
            return Err(CnpgError::AlreadyExists(format!(
                "{} '{}' already exists in namespace '{}'",
                reference.kind().noun(), reference.name(), reference.namespace()
            )));
        }
        if str_at(&body, "kind") != Some(reference.kind().kind()) {
            return Err(CnpgError::Rejected(format!("body kind does not match {}", reference.kind())));
        }
        if str_at(&body, "metadata.name") != Some(reference.name()) {
            return Err(CnpgError::Rejected("metadata.name does not match the request".into()));
        }
        if let Some(ns) = str_at(&body, "metadata.namespace") {
            if ns != reference.namespace() {
                return Err(CnpgError::Rejected("metadata.namespace does not match the request".into()));
            }
        }
        if str_at(&body, "metadata.resourceVersion").is_some() {
            return Err(CnpgError::Rejected("resourceVersion should not be set on objects to be created".into()));
        }
        let rv = st.next_rv();
        {
            let meta = meta_mut(&mut body)?;
            meta.insert("namespace".into(), Json::String(reference.namespace().to_string()));
            meta.insert("resourceVersion".into(), Json::String(rv));
            meta.insert("uid".into(), Json::String(uuid::Uuid::new_v4().to_string()));
            meta.insert("generation".into(), Json::from(1));
            meta.insert("creationTimestamp".into(), Json::String(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()));
        }
        if let Some(obj) = body.as_object_mut() {
            obj.remove("status");
        }
        st.objects.insert(key(reference), body.clone());
        Ok(body)
    }

    async fn replace(&self, reference: &ResourceRef, mut body: Document) -> CnpgResult<Document> {
        let mut st = self.enter(Call::Replace(reference.clone(), body.clone()))?;
        let stored = st.objects.get(&key(reference)).cloned().ok_or_else(|| reference.not_found())?;
        let stored_rv = str_at(&stored, "metadata.resourceVersion").unwrap_or_default().to_string();
        match str_at(&body, "metadata.resourceVersion") {
            Some(rv) if rv == stored_rv => {}
            Some(rv) => {
                return Err(CnpgError::Conflict(format!(
                    "{} '{}' in namespace '{}' was modified after it was read (resourceVersion {} != {}); re-fetch and retry",
                    reference.kind().noun(), reference.name(), reference.namespace(), rv, stored_rv
                )))
            }
            None => return Err(CnpgError::Rejected("metadata.resourceVersion must be specified for an update".into())),
        }
        if str_at(&body, "metadata.name") != Some(reference.name())
            || str_at(&body, "metadata.namespace").map(|ns| ns != reference.namespace()).unwrap_or(false)
        {
            return Err(CnpgError::Rejected("metadata.name and metadata.namespace are immutable".into()));
        }
        let rv = st.next_rv();
        let spec_changed = body.get("spec") != stored.get("spec");
        let generation = stored.get("metadata").and_then(|m| m.get("generation")).and_then(|g| g.as_i64()).unwrap_or(1);
        {
            let meta = meta_mut(&mut body)?;
            meta.insert("resourceVersion".into(), Json::String(rv));
            meta.insert("generation".into(), Json::from(if spec_changed { generation + 1 } else { generation }));
        }
        // The main resource endpoint ignores status; keep whatever the operator wrote.
        if let Some(obj) = body.as_object_mut() {
            match stored.get("status") {
                Some(s) => { obj.insert("status".into(), s.clone()); }
                None => { obj.remove("status"); }
            }
        }
        st.objects.insert(key(reference), body.clone());
        Ok(body)
    }

    async fn delete(&self, reference: &ResourceRef) -> CnpgResult<()> {
        let mut st = self.enter(Call::Delete(reference.clone()))?;
        st.objects.remove(&key(reference)).map(|_| ()).ok_or_else(|| reference.not_found())
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> CnpgResult<Vec<Document>> {
        let st = self.enter(Call::ListPods(namespace.to_string(), label_selector.to_string()))?;
        Ok(st.pods.iter().filter(|(ns, p)| ns == namespace && labels_match(p, label_selector)).map(|(_, p)| p.clone()).collect())
    }

    async fn list_events(&self, namespace: &str, field_selector: &str) -> CnpgResult<Vec<Document>> {
        let st = self.enter(Call::ListEvents(namespace.to_string(), field_selector.to_string()))?;
        Ok(st.events.iter().filter(|(ns, e)| ns == namespace && fields_match(e, field_selector)).map(|(_, e)| e.clone()).collect())
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, _container: Option<&str>, tail_lines: Option<i64>) -> CnpgResult<String> {
        let st = self.enter(Call::Logs(namespace.to_string(), pod.to_string()))?;
        let text = st
            .logs
            .get(&(namespace.to_string(), pod.to_string()))
            .cloned()
            .ok_or_else(|| CnpgError::NotFound(format!("pod '{}' not found in namespace '{}'", pod, namespace)))?;
        Ok(match tail_lines {
            Some(n) if n >= 0 => {
                let lines: Vec<&str> = text.lines().collect();
                let start = lines.len().saturating_sub(n as usize);
                lines[start..].join("\n")
            }
            _ => text,
        })
    }
}
