//! Recovery actions taken while normalizing one backend response.
//!
//! Nothing in the pipeline fails a request. Every repair or drop is recorded
//! here instead, logged through `tracing` at the moment it happens, and handed
//! back to the caller in the [`NormalizationReport`](super::NormalizationReport).

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// No extraction strategy produced text.
    ExtractionFailed { reason: String },
    /// The tagged block was not JSON, even after the trailing-comma pass.
    ParseFailed { reason: String },
    /// The tagged block only parsed after stripping trailing commas.
    ParseRepaired,
    /// A candidate entry was not a JSON object.
    EntryNotObject { index: usize },
    /// The entry had no name and the name policy supplied one.
    NameAdopted { index: usize, name: String },
    /// The entry had no name and none could be resolved.
    NameUnresolved { index: usize },
    /// Arguments were not a mapping or JSON text and were wrapped as `{"value": ...}`.
    ArgumentsWrapped { index: usize, name: String },
    /// A supplied id was empty or already used in this response.
    IdRegenerated { index: usize, previous: String },
    /// The repaired call still failed the compliance check.
    NonCompliant { index: usize, reason: String },
    /// The backend returned more than one choice; only the first is kept.
    ChoicesDiscarded { count: usize },
}

impl Diagnostic {
    /// Whether the action changed or dropped something the client would see.
    pub fn is_lossy(&self) -> bool {
        !matches!(
            self,
            Diagnostic::ParseRepaired | Diagnostic::ExtractionFailed { .. }
        )
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::ExtractionFailed { reason } => write!(f, "no text extracted: {reason}"),
            Diagnostic::ParseFailed { reason } => {
                write!(f, "function_calls block is not valid JSON: {reason}")
            }
            Diagnostic::ParseRepaired => write!(f, "stripped trailing commas from function_calls block"),
            Diagnostic::EntryNotObject { index } => write!(f, "entry {index} is not an object, dropped"),
            Diagnostic::NameAdopted { index, name } => {
                write!(f, "entry {index} has no name, adopted the only declared tool '{name}'")
            }
            Diagnostic::NameUnresolved { index } => {
                write!(f, "entry {index} has no resolvable function name, dropped")
            }
            Diagnostic::ArgumentsWrapped { index, name } => {
                write!(f, "entry {index} ('{name}') arguments are not JSON, wrapped as {{\"value\": ..}}")
            }
            Diagnostic::IdRegenerated { index, previous } => {
                write!(f, "entry {index} id '{previous}' is empty or duplicated, regenerated")
            }
            Diagnostic::NonCompliant { index, reason } => {
                write!(f, "entry {index} is not a compliant tool call ({reason}), dropped")
            }
            Diagnostic::ChoicesDiscarded { count } => {
                write!(f, "discarded {count} additional choice(s)")
            }
        }
    }
}

/// Ordered collector for [`Diagnostic`]s.
#[derive(Debug, Default)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn record(&mut self, diagnostic: Diagnostic) {
        if diagnostic.is_lossy() {
            tracing::warn!(diagnostic = %diagnostic, "normalization repair");
        } else {
            tracing::debug!(diagnostic = %diagnostic, "normalization repair");
        }
        self.0.push(diagnostic);
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.0
    }
}
