use serde::{Deserialize, Serialize};

/// Error classes surfaced to callers in `OperationResult::error_kind`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    UnknownOperation,
    NotFound,
    Conflict,
    AlreadyExists,
    StructuralMismatch,
    Rejected,
    Timeout,
    Transport,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::UnknownOperation => "unknown_operation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::StructuralMismatch => "structural_mismatch",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Transport => "transport",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced anywhere below the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum CnpgError {
    /// Malformed or missing intent arguments; never reaches the network.
    #[error("validation: {0}")]
    Validation(String),
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Stale resourceVersion on replace. Re-fetch and re-issue.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// Patch path does not match the fetched document's shape.
    #[error("structural mismatch: {0}")]
    StructuralMismatch(String),
    /// The API server refused the document (admission/schema).
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("transport: {0}")]
    Transport(String),
}

pub type CnpgResult<T> = Result<T, CnpgError>;

impl CnpgError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CnpgError::Validation(_) => ErrorKind::Validation,
            CnpgError::UnknownOperation(_) => ErrorKind::UnknownOperation,
            CnpgError::NotFound(_) => ErrorKind::NotFound,
            CnpgError::Conflict(_) => ErrorKind::Conflict,
            CnpgError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            CnpgError::StructuralMismatch(_) => ErrorKind::StructuralMismatch,
            CnpgError::Rejected(_) => ErrorKind::Rejected,
            CnpgError::Timeout(_) => ErrorKind::Timeout,
            CnpgError::Transport(_) => ErrorKind::Transport,
        }
    }

    /// The message without the kind prefix.
    pub fn detail(&self) -> &str {
        match self {
            CnpgError::Validation(s)
            | CnpgError::UnknownOperation(s)
            | CnpgError::NotFound(s)
            | CnpgError::Conflict(s)
            | CnpgError::AlreadyExists(s)
            | CnpgError::StructuralMismatch(s)
            | CnpgError::Rejected(s)
            | CnpgError::Timeout(s)
            | CnpgError::Transport(s) => s,
        }
    }

    /// Same kind, detail prefixed with `context`.
    pub fn context(self, context: &str) -> Self {
        let wrap = |s: String| format!("{}: {}", context, s);
        match self {
            CnpgError::Validation(s) => CnpgError::Validation(wrap(s)),
            CnpgError::UnknownOperation(s) => CnpgError::UnknownOperation(wrap(s)),
            CnpgError::NotFound(s) => CnpgError::NotFound(wrap(s)),
            CnpgError::Conflict(s) => CnpgError::Conflict(wrap(s)),
            CnpgError::AlreadyExists(s) => CnpgError::AlreadyExists(wrap(s)),
            CnpgError::StructuralMismatch(s) => CnpgError::StructuralMismatch(wrap(s)),
            CnpgError::Rejected(s) => CnpgError::Rejected(wrap(s)),
            CnpgError::Timeout(s) => CnpgError::Timeout(wrap(s)),
            CnpgError::Transport(s) => CnpgError::Transport(wrap(s)),
        }
    }

    /// Whether re-issuing the same intent may succeed without changing it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CnpgError::Conflict(_) | CnpgError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_distinct_from_transport() {
        let c = CnpgError::Conflict("rv 4 != 5".into());
        let t = CnpgError::Transport("connection reset".into());
        assert_ne!(c.kind(), t.kind());
        assert!(c.is_retryable());
        assert!(!t.is_retryable());
    }

    #[test]
    fn context_keeps_kind() {
        let e = CnpgError::Conflict("stale".into()).context("setting retention policy");
        assert_eq!(e.kind(), ErrorKind::Conflict);
        assert_eq!(e.detail(), "setting retention policy: stale");
    }

    #[test]
    fn kind_serializes_snake_case() {
        let v = serde_json::to_value(ErrorKind::StructuralMismatch).unwrap();
        assert_eq!(v, "structural_mismatch");
        assert_eq!(ErrorKind::UnknownOperation.to_string(), "unknown_operation");
    }
}
