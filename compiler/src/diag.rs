// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used by every normalization pass.
// Diagnostics are accumulated, never thrown: each pass returns its list and
// `ready_for_backend` is derived from the presence of error-level entries.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::id::{EdgeId, NodeId, PortKey};

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0200`, `W0100`).
///
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Diagnostic kind ──────────────────────────────────────────────────────

/// Closed set of problems the normalizer can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DiagKind {
    InvalidPayloadUnitPair,
    PayloadConflict,
    UnitConflict,
    UnresolvedPayload,
    UnresolvedUnit,
    CardinalityConflict,
    UnresolvedCardinality,
    NoConversionPath,
    AmbiguousAdapter,
    IllegalInstantaneousCycle,
    UnknownBlockType,
    DanglingEdge,
    MultipleDrivers,
    NonConvergence,
    UnknownPortOverride,
}

impl DiagKind {
    pub fn code(self) -> DiagCode {
        match self {
            DiagKind::InvalidPayloadUnitPair => DiagCode("E0100"),
            DiagKind::PayloadConflict => DiagCode("E0101"),
            DiagKind::UnitConflict => DiagCode("E0102"),
            DiagKind::UnresolvedPayload => DiagCode("E0103"),
            DiagKind::UnresolvedUnit => DiagCode("E0104"),
            DiagKind::CardinalityConflict => DiagCode("E0110"),
            DiagKind::UnresolvedCardinality => DiagCode("E0111"),
            DiagKind::NoConversionPath => DiagCode("E0200"),
            DiagKind::AmbiguousAdapter => DiagCode("E0201"),
            DiagKind::IllegalInstantaneousCycle => DiagCode("E0300"),
            DiagKind::UnknownBlockType => DiagCode("E0400"),
            DiagKind::DanglingEdge => DiagCode("E0401"),
            DiagKind::MultipleDrivers => DiagCode("E0402"),
            DiagKind::NonConvergence => DiagCode("E0900"),
            DiagKind::UnknownPortOverride => DiagCode("W0100"),
        }
    }

    pub fn level(self) -> DiagLevel {
        match self {
            DiagKind::UnknownPortOverride => DiagLevel::Warning,
            _ => DiagLevel::Error,
        }
    }
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Target ───────────────────────────────────────────────────────────────

/// A graph element a diagnostic is attached to, for UI highlighting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum DiagTarget {
    Node(NodeId),
    Port(PortKey),
    Edge(EdgeId),
}

impl fmt::Display for DiagTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagTarget::Node(id) => write!(f, "node {}", id),
            DiagTarget::Port(key) => write!(f, "port {}", key),
            DiagTarget::Edge(id) => write!(f, "edge {}", id),
        }
    }
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any normalization pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagKind,
    pub code: DiagCode,
    pub level: DiagLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<DiagTarget>,
    /// Explanations of how the failing constraint came about.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cause_chain: Vec<String>,
}

impl Diagnostic {
    /// Create a diagnostic; code and level follow from `kind`.
    pub fn new(kind: DiagKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code(),
            level: kind.level(),
            message: message.into(),
            hint: None,
            targets: Vec::new(),
            cause_chain: Vec::new(),
        }
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_node(mut self, node: &NodeId) -> Self {
        self.targets.push(DiagTarget::Node(node.clone()));
        self
    }

    pub fn with_port(mut self, port: &PortKey) -> Self {
        self.targets.push(DiagTarget::Port(port.clone()));
        self
    }

    pub fn with_edge(mut self, edge: &EdgeId) -> Self {
        self.targets.push(DiagTarget::Edge(edge.clone()));
        self
    }

    /// Attach a cause record to the chain.
    pub fn with_cause(mut self, message: impl Into<String>) -> Self {
        self.cause_chain.push(message.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        write!(f, "{}[{}]: {}", level, self.code, self.message)?;
        for cause in &self.cause_chain {
            write!(f, "\n  note: {}", cause)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// True if any diagnostic in the list is error-level.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(Diagnostic::is_error)
}
