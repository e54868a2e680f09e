//! cnpg apply: merge strategies over fetched documents + minimal diffs.
//!
//! Every function here is pure: it takes a document, returns a new one, and
//! touches exactly the field the strategy names. Unknown fields pass through.

#![forbid(unsafe_code)]

use cnpg_core::{CnpgError, CnpgResult, Document};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::debug;

/// Dotted path into a document, e.g. `spec.postgresql.parameters`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn parse(path: &str) -> CnpgResult<Self> {
        let segs: Vec<String> = path.split('.').map(str::to_string).collect();
        if segs.iter().any(|s| s.is_empty()) {
            return Err(CnpgError::Validation(format!("bad field path '{}'", path)));
        }
        Ok(Self(segs))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    fn prefix(&self, len: usize) -> String {
        self.0[..len].join(".")
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Presence {
    On(String),
    Off,
}

/// One intended change to a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// Only valid when there is no document yet.
    Create(Document),
    SetField { path: FieldPath, value: Json },
    ToggleAnnotation { key: String, presence: Presence },
    /// Not idempotent: the same element applied twice is present twice.
    AppendToArray { path: FieldPath, element: Json },
    /// Shallow merge; keys not named are left alone.
    MergeMap { path: FieldPath, entries: Map<String, Json> },
}

impl MergeStrategy {
    pub fn set(path: &str, value: impl Into<Json>) -> CnpgResult<Self> {
        Ok(MergeStrategy::SetField { path: FieldPath::parse(path)?, value: value.into() })
    }

    pub fn append(path: &str, element: impl Into<Json>) -> CnpgResult<Self> {
        Ok(MergeStrategy::AppendToArray { path: FieldPath::parse(path)?, element: element.into() })
    }

    pub fn merge(path: &str, entries: Map<String, Json>) -> CnpgResult<Self> {
        Ok(MergeStrategy::MergeMap { path: FieldPath::parse(path)?, entries })
    }

    pub fn annotate(key: &str, presence: Presence) -> Self {
        MergeStrategy::ToggleAnnotation { key: key.to_string(), presence }
    }

    /// Short label for logs.
    pub fn label(&self) -> String {
        match self {
            MergeStrategy::Create(_) => "create".into(),
            MergeStrategy::SetField { path, .. } => format!("set {}", path),
            MergeStrategy::ToggleAnnotation { key, presence: Presence::On(_) } => format!("annotate {}", key),
            MergeStrategy::ToggleAnnotation { key, presence: Presence::Off } => format!("unannotate {}", key),
            MergeStrategy::AppendToArray { path, .. } => format!("append {}", path),
            MergeStrategy::MergeMap { path, .. } => format!("merge {}", path),
        }
    }
}

fn mismatch(msg: impl Into<String>) -> CnpgError {
    CnpgError::StructuralMismatch(msg.into())
}

/// Map holding the last segment of `path`. The root segment must already be a
/// map in the document; deeper intermediate maps are created (or replace null).
fn container<'a>(doc: &'a mut Json, path: &FieldPath) -> CnpgResult<&'a mut Map<String, Json>> {
    let segs = path.segments();
    let parents = &segs[..segs.len().saturating_sub(1)];
    let mut cur = doc.as_object_mut().ok_or_else(|| mismatch("document is not a map"))?;
    for (i, seg) in parents.iter().enumerate() {
        let entry = if i == 0 {
            cur.get_mut(seg).ok_or_else(|| mismatch(format!("document has no '{}'", seg)))?
        } else {
            let e = cur.entry(seg.clone()).or_insert_with(|| Json::Object(Map::new()));
            if e.is_null() {
                *e = Json::Object(Map::new());
            }
            e
        };
        cur = entry
            .as_object_mut()
            .ok_or_else(|| mismatch(format!("'{}' is not a map (while resolving '{}')", path.prefix(i + 1), path)))?;
    }
    Ok(cur)
}

fn last(path: &FieldPath) -> &str {
    path.segments().last().map(String::as_str).unwrap_or_default()
}

/// Map at `path`, created when absent.
fn map_at<'a>(doc: &'a mut Json, path: &FieldPath) -> CnpgResult<&'a mut Map<String, Json>> {
    let slot = container(doc, path)?.entry(last(path).to_string()).or_insert_with(|| Json::Object(Map::new()));
    if slot.is_null() {
        *slot = Json::Object(Map::new());
    }
    slot.as_object_mut().ok_or_else(|| mismatch(format!("'{}' is not a map", path)))
}

fn apply_in_place(doc: &mut Json, strategy: &MergeStrategy) -> CnpgResult<()> {
    match strategy {
        MergeStrategy::Create(template) => {
            if !doc.is_null() {
                return Err(mismatch("create applied to an existing document"));
            }
            *doc = template.clone();
        }
        _ if doc.is_null() => return Err(mismatch(format!("cannot {} without a document", strategy.label()))),
        MergeStrategy::SetField { path, value } => {
            container(doc, path)?.insert(last(path).to_string(), value.clone());
        }
        MergeStrategy::ToggleAnnotation { key, presence } => {
            let path = FieldPath(vec!["metadata".into(), "annotations".into()]);
            let annotations = map_at(doc, &path)?;
            match presence {
                Presence::On(v) => {
                    annotations.insert(key.clone(), Json::String(v.clone()));
                }
                Presence::Off => {
                    annotations.remove(key);
                }
            }
        }
        MergeStrategy::AppendToArray { path, element } => {
            let slot = container(doc, path)?.entry(last(path).to_string()).or_insert_with(|| Json::Array(Vec::new()));
            if slot.is_null() {
                *slot = Json::Array(Vec::new());
            }
            slot.as_array_mut()
                .ok_or_else(|| mismatch(format!("'{}' is not a list", path)))?
                .push(element.clone());
        }
        MergeStrategy::MergeMap { path, entries } => {
            let target = map_at(doc, path)?;
            for (k, v) in entries {
                target.insert(k.clone(), v.clone());
            }
        }
    }
    Ok(())
}

/// Apply one strategy to a copy of `base`. `Json::Null` stands for "no document".
pub fn apply(base: &Document, strategy: &MergeStrategy) -> CnpgResult<Document> {
    apply_all(base, std::slice::from_ref(strategy))
}

/// Apply strategies in order; all or nothing.
pub fn apply_all(base: &Document, strategies: &[MergeStrategy]) -> CnpgResult<Document> {
    let mut doc = base.clone();
    for s in strategies {
        apply_in_place(&mut doc, s)?;
        debug!(strategy = %s.label(), "applied");
    }
    Ok(doc)
}

/// Drop operator-owned `status` before a replace.
pub fn strip_status(mut v: Document) -> Document {
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
    }
    v
}

/// Drop server bookkeeping that only clutters human output.
pub fn strip_managed_fields(mut v: Document) -> Document {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("managedFields");
    }
    v
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.adds + self.updates + self.removes == 0
    }
}

impl std::fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "+{} ~{} -{}", self.adds, self.updates, self.removes)
    }
}

pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    fn walk(a: &Json, b: &Json, out: &mut DiffSummary) {
        match (a, b) {
            (Json::Object(ao), Json::Object(bo)) => {
                for (k, av) in ao {
                    match bo.get(k) {
                        Some(bv) if av == bv => {}
                        Some(bv) => walk(av, bv, out),
                        None => out.adds += 1,
                    }
                }
                out.removes += bo.keys().filter(|k| !ao.contains_key(*k)).count();
            }
            (Json::Array(aa), Json::Array(bb)) => {
                out.updates += aa.iter().zip(bb.iter()).filter(|(x, y)| x != y).count();
                out.adds += aa.len().saturating_sub(bb.len());
                out.removes += bb.len().saturating_sub(aa.len());
            }
            // Scalars differ or type differs
            (av, bv) => {
                if av != bv {
                    out.updates += 1;
                }
            }
        }
    }
    let mut out = DiffSummary::default();
    walk(target, base, &mut out);
    out
}
