// error.rs — Fatal lowering errors
//
// Every variant aborts compilation of the current program. Each carries the
// offending symbol and, when known, the source location of the member that
// triggered it.

use thiserror::Error;

use crate::diag::{codes, DiagCode, DiagLevel, Diagnostic};
use crate::tree::SourceLoc;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LowerError {
    #[error("unresolved reference '{name}' at {loc}")]
    UnresolvedReference { name: String, loc: SourceLoc },

    #[error("domain mismatch in {construct}: '{left}' vs '{right}' at {loc}")]
    DomainMismatch {
        construct: &'static str,
        left: String,
        right: String,
        loc: SourceLoc,
    },

    #[error("unsupported {what} '{name}' at {loc}")]
    UnsupportedType {
        what: &'static str,
        name: String,
        loc: SourceLoc,
    },

    #[error("dependency graph is not acyclic: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("unbalanced rate stack in stream {stream} at {loc}: entered at depth {entry}, left at depth {exit}")]
    UnbalancedRateStack {
        stream: usize,
        entry: usize,
        exit: usize,
        loc: SourceLoc,
    },

    #[error("missing platform domain declaration")]
    MissingPlatformDomain,

    #[error("invalid program tree: {0}")]
    InvalidTree(String),

    #[error("assembly verification failed: {}", .failed.join(", "))]
    VerificationFailed { failed: Vec<String> },
}

impl LowerError {
    pub fn code(&self) -> DiagCode {
        match self {
            LowerError::UnresolvedReference { .. } => codes::E0001,
            LowerError::DomainMismatch { .. } => codes::E0002,
            LowerError::UnsupportedType { .. } => codes::E0003,
            LowerError::CyclicDependency { .. } => codes::E0004,
            LowerError::UnbalancedRateStack { .. } => codes::E0005,
            LowerError::MissingPlatformDomain => codes::E0006,
            LowerError::InvalidTree(_) => codes::E0007,
            LowerError::VerificationFailed { .. } => codes::E0008,
        }
    }

    pub fn loc(&self) -> SourceLoc {
        match self {
            LowerError::UnresolvedReference { loc, .. }
            | LowerError::DomainMismatch { loc, .. }
            | LowerError::UnsupportedType { loc, .. }
            | LowerError::UnbalancedRateStack { loc, .. } => loc.clone(),
            _ => SourceLoc::default(),
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        let diag = Diagnostic::new(DiagLevel::Error, self.loc(), self.to_string()).with_code(self.code());
        match self {
            LowerError::MissingPlatformDomain => {
                diag.with_hint("declare the platform domain in the tree's `platform.domain` field")
            }
            LowerError::CyclicDependency { .. } => {
                diag.with_hint("a generated declaration refers to itself through its dependents")
            }
            _ => diag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_path() {
        let e = LowerError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(e.to_string(), "dependency graph is not acyclic: a -> b -> a");
        assert_eq!(e.code(), codes::E0004);
    }

    #[test]
    fn unresolved_names_symbol_and_location() {
        let e = LowerError::UnresolvedReference {
            name: "Foo".into(),
            loc: SourceLoc::new("main.dl", 12),
        };
        assert_eq!(e.to_string(), "unresolved reference 'Foo' at main.dl:12");
        let d = e.to_diagnostic();
        assert!(d.is_error());
        assert_eq!(d.code, Some(codes::E0001));
        assert_eq!(d.loc.line, Some(12));
    }
}
