//! The read-modify-write cycle behind every update-style operation.
//!
//! `get` → patch in memory → `replace`, with nothing else in between. The
//! replace body carries the fetched `metadata.resourceVersion`, so a write that
//! landed after our read surfaces as `Conflict` instead of being overwritten.

use cnpg_apply::{apply_all, diff_summary, strip_status, DiffSummary, MergeStrategy};
use cnpg_core::{str_at, CnpgError, CnpgResult, Document, ResourceRef};
use cnpg_kubehub::ResourceClient;
use metrics::counter;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validated,
    Fetched,
    Patched,
    Submitted,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RmwOutcome {
    /// False when the patch was a no-op and nothing was submitted.
    pub changed: bool,
    pub summary: DiffSummary,
    /// Server copy after replace, or the fetched copy for a no-op.
    pub document: Document,
    pub stages: Vec<Stage>,
}

struct Tracker<'a> {
    reference: &'a ResourceRef,
    stages: Vec<Stage>,
}

impl<'a> Tracker<'a> {
    fn advance(&mut self, stage: Stage) {
        debug!(ns = %self.reference.namespace(), name = %self.reference.name(), stage = ?stage, "rmw");
        self.stages.push(stage);
    }

    fn fail(&mut self, err: CnpgError) -> CnpgError {
        let at = self.stages.last().copied().unwrap_or(Stage::Validated);
        warn!(ns = %self.reference.namespace(), name = %self.reference.name(), at = ?at, kind = %err.kind(), "rmw failed");
        self.stages.push(Stage::Failed);
        err
    }
}

/// Checked against the fetched document before any strategy is applied.
pub type Precondition = fn(&Document) -> CnpgResult<()>;

/// Run one cycle for already-validated strategies. Never retries.
pub async fn read_modify_write(client: &dyn ResourceClient, reference: &ResourceRef, strategies: &[MergeStrategy]) -> CnpgResult<RmwOutcome> {
    read_modify_write_if(client, reference, strategies, None).await
}

/// Like [`read_modify_write`], but refuses to patch when `precondition` rejects the fetched document.
pub async fn read_modify_write_if(
    client: &dyn ResourceClient,
    reference: &ResourceRef,
    strategies: &[MergeStrategy],
    precondition: Option<Precondition>,
) -> CnpgResult<RmwOutcome> {
    let mut t = Tracker { reference, stages: Vec::with_capacity(5) };
    t.advance(Stage::Validated);

    let fetched = client.get(reference).await.map_err(|e| t.fail(e))?;
    t.advance(Stage::Fetched);
    if str_at(&fetched, "metadata.resourceVersion").is_none() {
        return Err(t.fail(CnpgError::StructuralMismatch(format!(
            "{} '{}' in namespace '{}' has no metadata.resourceVersion; refusing to replace it blind",
            reference.kind().noun(),
            reference.name(),
            reference.namespace()
        ))));
    }

    if let Some(check) = precondition {
        check(&fetched).map_err(|e| t.fail(e))?;
    }

    let base = strip_status(fetched);
    let patched = apply_all(&base, strategies).map_err(|e| t.fail(e))?;
    t.advance(Stage::Patched);

    let summary = diff_summary(&patched, &base);
    if summary.is_empty() {
        counter!("cnpg_patch_noop_total", 1u64);
        t.advance(Stage::Done);
        return Ok(RmwOutcome { changed: false, summary, document: base, stages: t.stages });
    }

    t.advance(Stage::Submitted);
    let stored = client.replace(reference, patched).await.map_err(|e| {
        if matches!(e, CnpgError::Conflict(_)) {
            counter!("cnpg_conflicts_total", 1u64);
        }
        t.fail(e)
    })?;
    t.advance(Stage::Done);
    Ok(RmwOutcome { changed: true, summary, document: stored, stages: t.stages })
}
