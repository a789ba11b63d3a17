// diag.rs — Diagnostics model shared by the lowering phases
//
// Warnings are collected as `Diagnostic`s in the lowering context; fatal
// conditions travel as `LowerError` and are converted here for display.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::tree::SourceLoc;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0001`, `W0101`).
///
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // Fatal lowering errors
    pub const E0001: DiagCode = DiagCode("E0001"); // unresolved reference
    pub const E0002: DiagCode = DiagCode("E0002"); // domain mismatch
    pub const E0003: DiagCode = DiagCode("E0003"); // unsupported type
    pub const E0004: DiagCode = DiagCode("E0004"); // cyclic dependency
    pub const E0005: DiagCode = DiagCode("E0005"); // unbalanced rate stack
    pub const E0006: DiagCode = DiagCode("E0006"); // missing platform domain
    pub const E0007: DiagCode = DiagCode("E0007"); // invalid program tree
    pub const E0008: DiagCode = DiagCode("E0008"); // assembly verification failed

    // Warnings
    pub const W0101: DiagCode = DiagCode("W0101"); // default value fallback
    pub const W0102: DiagCode = DiagCode("W0102"); // module input left unconnected
    pub const W0201: DiagCode = DiagCode("W0201"); // rate boundary closed in another domain
    pub const W0202: DiagCode = DiagCode("W0202"); // reaction never triggered
    pub const W0301: DiagCode = DiagCode("W0301"); // cross-domain access without bridge
    pub const W0401: DiagCode = DiagCode("W0401"); // domain has no default rate
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related location ─────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedLoc {
    pub loc: SourceLoc,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub loc: SourceLoc,
    pub message: String,
    pub hint: Option<String>,
    pub related: Vec<RelatedLoc>,
}

impl Diagnostic {
    pub fn new(level: DiagLevel, loc: SourceLoc, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            loc,
            message: message.into(),
            hint: None,
            related: Vec::new(),
        }
    }

    pub fn warning(code: DiagCode, loc: SourceLoc, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, loc, message).with_code(code)
    }

    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_related(mut self, loc: SourceLoc, label: impl Into<String>) -> Self {
        self.related.push(RelatedLoc {
            loc,
            label: label.into(),
        });
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
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if self.loc.is_known() {
            write!(f, "\n  --> {}", self.loc)?;
        }
        for rel in &self.related {
            write!(f, "\n  note: {} ({})", rel.label, rel.loc)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, SourceLoc::default(), "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code_and_location() {
        let d = Diagnostic::warning(codes::W0101, SourceLoc::new("a.dl", 4), "forced default");
        assert_eq!(format!("{d}"), "warning[W0101]: forced default\n  --> a.dl:4");
    }

    #[test]
    fn display_with_hint_and_related() {
        let d = Diagnostic::warning(codes::W0301, SourceLoc::default(), "hazard")
            .with_related(SourceLoc::new("b.dl", 9), "read here")
            .with_hint("use a signal bridge");
        assert_eq!(
            format!("{d}"),
            "warning[W0301]: hazard\n  note: read here (b.dl:9)\n  hint: use a signal bridge"
        );
    }

    #[test]
    fn builder_sets_code() {
        let d = Diagnostic::new(DiagLevel::Warning, SourceLoc::default(), "w").with_code(codes::W0202);
        assert_eq!(d.code, Some(codes::W0202));
        assert!(!d.is_error());
    }
}
