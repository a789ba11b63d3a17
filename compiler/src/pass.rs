// pass.rs — Pass descriptor module: metadata, dependency resolution, certificates
//
// Declares the compiler's passes (tree parsing is outside the runner),
// their dependency edges, and the artifacts they produce. Used by the
// pipeline runner to compute the minimal pass subset for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass (tree parsing happens before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Validate,
    Lower,
    Assemble,
    Render,
}

/// Machine-readable artifact identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Tree,     // validated Program
    Scope,    // ScopeCode of the root scope
    Graph,    // ElementGraph
    Output,   // ProgramOutput
    Cert,     // AssemblyCert
    Rendered, // target text
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// What invalidates this pass's output.
    pub invalidation_key: &'static str,
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Validate => PassDescriptor {
            name: "validate",
            inputs: &[],
            outputs: &[ArtifactId::Tree],
            invalidation_key: "tree",
            invariants: "platform domain present, block names unique per scope",
        },
        PassId::Lower => PassDescriptor {
            name: "lower",
            inputs: &[PassId::Validate],
            outputs: &[ArtifactId::Scope, ArtifactId::Graph],
            invalidation_key: "tree + framework",
            invariants: "all names resolved, rate stack balanced per stream",
        },
        PassId::Assemble => PassDescriptor {
            name: "assemble",
            inputs: &[PassId::Lower],
            outputs: &[ArtifactId::Output, ArtifactId::Cert],
            invalidation_key: "scope + graph",
            invariants: "A1-A3 obligations verified",
        },
        PassId::Render => PassDescriptor {
            name: "render",
            inputs: &[PassId::Assemble],
            outputs: &[ArtifactId::Rendered],
            invalidation_key: "output + emitter",
            invariants: "sections emitted in domain order",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 4] = [
    PassId::Validate,
    PassId::Lower,
    PassId::Assemble,
    PassId::Render,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Stage certificates ─────────────────────────────────────────────────────

/// Postcondition evidence produced by a pass.
pub trait StageCert {
    /// True if all obligations pass.
    fn all_pass(&self) -> bool;
    /// Each obligation with its outcome, in a stable order.
    fn obligations(&self) -> Vec<(&'static str, bool)>;

    /// Names of the failed obligations.
    fn failures(&self) -> Vec<&'static str> {
        self.obligations()
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name)
            .collect()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
