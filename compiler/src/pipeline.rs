// pipeline.rs — Compilation state and pass orchestration
//
// Runs the minimal set of passes for a given terminal PassId over one
// program tree and collects every artifact the CLI can emit.
//
// Preconditions: the tree was parsed with `Program::from_json`.
// Postconditions: artifacts for all required passes are populated, or a
//   `PipelineError` names the failing pass with the diagnostics so far.
// Failure modes: any `LowerError`; assembly obligations not met (E0008).
// Side effects: `log::info!` per pass with its timing.

use std::fmt;
use std::time::{Duration, Instant};

use crate::assemble::{self, AssemblyCert, ProgramOutput};
use crate::context::{LowerOptions, LoweringContext};
use crate::diag::Diagnostic;
use crate::emitter::CodeEmitter;
use crate::error::LowerError;
use crate::graph::ElementGraph;
use crate::pass::{descriptor, required_passes, PassId, StageCert};
use crate::tree::Program;

// ── Options ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Overrides the tree's platform framework.
    pub framework: Option<String>,
    /// Last pass to run.
    pub terminal: PassId,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            framework: None,
            terminal: PassId::Render,
        }
    }
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for reproducible output.
///
/// `tree_hash`: SHA-256 of the canonical compact JSON of the input tree.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub tree_hash: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the tree hash (64 characters).
    pub fn tree_hash_hex(&self) -> String {
        bytes_to_hex(&self.tree_hash)
    }

    /// One-line banner placed at the top of rendered code.
    pub fn banner(&self, e: &dyn CodeEmitter) -> String {
        e.comment(&format!(
            "generated by dlc {} from tree {}",
            self.compiler_version,
            self.tree_hash_hex()
        ))
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Compute provenance from the parsed tree. Hashing the re-serialized tree
/// makes the fingerprint independent of input whitespace and key order.
pub fn compute_provenance(program: &Program) -> Provenance {
    use sha2::{Digest, Sha256};

    let canonical = serde_json::to_string(program).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let result = hasher.finalize();
    let mut tree_hash = [0u8; 32];
    tree_hash.copy_from_slice(&result);

    Provenance {
        tree_hash,
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Results ────────────────────────────────────────────────────────────────

/// Everything produced by one compilation.
pub struct Compilation {
    pub output: Option<ProgramOutput>,
    pub rendered: Option<String>,
    pub cert: Option<AssemblyCert>,
    pub graph: ElementGraph,
    /// Warnings collected while lowering.
    pub diagnostics: Vec<Diagnostic>,
    pub provenance: Provenance,
}

/// Pipeline execution stopped at `failing_pass`.
#[derive(Debug)]
pub struct PipelineError {
    pub failing_pass: PassId,
    pub error: LowerError,
    /// Warnings collected before the failure, then the error itself.
    pub diagnostics: Vec<Diagnostic>,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", descriptor(self.failing_pass).name, self.error)
    }
}

impl std::error::Error for PipelineError {}

fn fail(pass: PassId, error: LowerError, mut diagnostics: Vec<Diagnostic>) -> PipelineError {
    diagnostics.push(error.to_diagnostic());
    PipelineError {
        failing_pass: pass,
        error,
        diagnostics,
    }
}

fn finish_pass(pass: PassId, elapsed: Duration) {
    log::info!(
        "dlc: {} complete, {:.1}ms",
        descriptor(pass).name,
        elapsed.as_secs_f64() * 1000.0
    );
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `options.terminal`.
pub fn compile(
    program: &Program,
    emitter: &dyn CodeEmitter,
    options: &CompileOptions,
) -> Result<Compilation, PipelineError> {
    let passes = required_passes(options.terminal);
    let mut compilation = Compilation {
        output: None,
        rendered: None,
        cert: None,
        graph: ElementGraph::new(),
        diagnostics: Vec::new(),
        provenance: compute_provenance(program),
    };

    let t = Instant::now();
    program
        .validate()
        .map_err(|e| fail(PassId::Validate, e, Vec::new()))?;
    finish_pass(PassId::Validate, t.elapsed());
    if !passes.contains(&PassId::Lower) {
        return Ok(compilation);
    }

    let t = Instant::now();
    let lower_options = LowerOptions {
        framework: options.framework.clone(),
    };
    let mut ctx =
        LoweringContext::new(program, emitter, &lower_options).map_err(|e| fail(PassId::Lower, e, Vec::new()))?;
    let scope = match assemble::lower_streams(&mut ctx, program.streams()) {
        Ok(scope) => scope,
        Err(e) => return Err(fail(PassId::Lower, e, std::mem::take(&mut ctx.diagnostics))),
    };
    finish_pass(PassId::Lower, t.elapsed());

    if passes.contains(&PassId::Assemble) {
        let t = Instant::now();
        let assembled = assemble::assemble_program(&mut ctx, scope);
        if !assembled.cert.all_pass() {
            let failed = assembled.cert.failures().into_iter().map(String::from).collect();
            return Err(fail(
                PassId::Assemble,
                LowerError::VerificationFailed { failed },
                std::mem::take(&mut ctx.diagnostics),
            ));
        }
        compilation.cert = Some(assembled.cert);
        compilation.output = Some(assembled.output);
        finish_pass(PassId::Assemble, t.elapsed());
    }

    if passes.contains(&PassId::Render) {
        let t = Instant::now();
        if let Some(output) = &compilation.output {
            let mut text = compilation.provenance.banner(emitter);
            text.push_str(&output.render(emitter));
            compilation.rendered = Some(text);
        }
        finish_pass(PassId::Render, t.elapsed());
    }

    compilation.diagnostics = std::mem::take(&mut ctx.diagnostics);
    compilation.graph = std::mem::take(&mut ctx.graph);
    Ok(compilation)
}

// ── Tests ──────────────────────────────────────────────────────────────────
