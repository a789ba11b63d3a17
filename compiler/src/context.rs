// context.rs — Mutable state threaded through one lowering run
//
// One `LoweringContext` exists per compilation. It owns every piece of
// state the atoms and the stream driver share: id allocation, the rate
// boundary stack, the scope and parent stacks, the element arena and the
// collected warnings.
//
// Preconditions: the program passed `Program::validate`.
// Postconditions: after a successful run the scope stack holds only the
//   root frame and the parent stack is empty.
// Failure modes: `MissingPlatformDomain` at construction; unresolved names.
// Side effects: none beyond `log` output.

use std::collections::HashSet;

use crate::diag::{DiagCode, Diagnostic};
use crate::emitter::CodeEmitter;
use crate::error::LowerError;
use crate::graph::ElementGraph;
use crate::id::IdAllocator;
use crate::rate::RateStack;
use crate::scope::{lookup_port_property, ParentFrame, Resolved, ScopeStack};
use crate::tree::{Block, DomainKey, DomainRef, Literal, Program, SourceLoc};

/// Options that change how a tree is lowered.
#[derive(Debug, Clone, Default)]
pub struct LowerOptions {
    /// Overrides the platform framework used for namespace filtering.
    pub framework: Option<String>,
}

pub struct LoweringContext<'t> {
    pub program: &'t Program,
    pub emitter: &'t dyn CodeEmitter,
    pub ids: IdAllocator,
    pub rates: RateStack,
    pub scopes: ScopeStack<'t>,
    pub parents: Vec<ParentFrame>,
    pub graph: ElementGraph,
    pub diagnostics: Vec<Diagnostic>,
    platform_domain: String,
    domain_order: Vec<String>,
    framework: Option<String>,
    /// Keys of one-shot events (warnings, run-once snippets) already seen.
    seen: HashSet<String>,
    next_stream: usize,
}

impl<'t> LoweringContext<'t> {
    pub fn new(
        program: &'t Program,
        emitter: &'t dyn CodeEmitter,
        options: &LowerOptions,
    ) -> Result<Self, LowerError> {
        let platform_domain = program
            .platform
            .domain
            .clone()
            .filter(|d| !d.is_empty())
            .ok_or(LowerError::MissingPlatformDomain)?;
        let mut domain_order = program.platform.domain_order.clone();
        if !domain_order.contains(&platform_domain) {
            domain_order.insert(0, platform_domain.clone());
        }
        let framework = options
            .framework
            .clone()
            .or_else(|| program.platform.framework.clone());
        let mut scopes = ScopeStack::new();
        scopes.push(program.root_blocks().collect(), false);
        Ok(LoweringContext {
            program,
            emitter,
            ids: IdAllocator::new(),
            rates: RateStack::new(),
            scopes,
            parents: Vec::new(),
            graph: ElementGraph::new(),
            diagnostics: Vec::new(),
            platform_domain,
            domain_order,
            framework,
            seen: HashSet::new(),
            next_stream: 0,
        })
    }

    pub fn platform_domain(&self) -> &str {
        &self.platform_domain
    }

    /// Declared order, with the platform domain prepended when missing.
    pub fn domain_order(&self) -> &[String] {
        &self.domain_order
    }

    pub fn framework(&self) -> Option<&str> {
        self.framework.as_deref()
    }

    /// Depth of the innermost scope frame.
    pub fn scope_index(&self) -> usize {
        self.scopes.current()
    }

    // ── Scopes ──

    pub fn push_scope(&mut self, blocks: Vec<&'t Block>, parent: Option<ParentFrame>) {
        let has_parent = parent.is_some();
        if let Some(frame) = parent {
            log::trace!("scope: enter '{}'", frame.handle);
            self.parents.push(frame);
        }
        self.scopes.push(blocks, has_parent);
    }

    /// Pop the innermost scope frame and the parent frame pushed with it.
    pub fn pop_scope(&mut self) -> Option<ParentFrame> {
        match self.scopes.pop() {
            Some(true) => self.parents.pop(),
            _ => None,
        }
    }

    pub fn try_resolve(&self, name: &str) -> Option<Resolved<'t>> {
        self.scopes.find(name, self.framework()).or_else(|| {
            self.program
                .root_blocks()
                .find(|b| b.name == name && b.visible_in(self.framework()))
                .map(|block| Resolved { block, depth: 0 })
        })
    }

    pub fn resolve(&self, name: &str, loc: &SourceLoc) -> Result<Resolved<'t>, LowerError> {
        self.try_resolve(name).ok_or_else(|| LowerError::UnresolvedReference {
            name: name.to_string(),
            loc: loc.clone(),
        })
    }

    // ── Port properties and domains ──

    pub fn port_property(&self, port: &str, property: &str) -> Option<Literal> {
        lookup_port_property(&self.parents, port, property)
    }

    /// Resolve a block's domain reference; port-property domains go through
    /// the parent stack.
    pub fn resolve_domain(&self, domain: Option<&DomainRef>) -> DomainKey {
        match domain? {
            DomainRef::Named(d) => Some(d.clone()),
            DomainRef::Property { portproperty } => {
                match self.port_property(&portproperty.port, &portproperty.property) {
                    Some(Literal::Str(d)) => Some(d),
                    _ => {
                        log::debug!(
                            "domain: '{}.{}' unresolved, inheriting",
                            portproperty.port,
                            portproperty.property
                        );
                        None
                    }
                }
            }
        }
    }

    /// Default rate of a domain: its definition block, else the platform
    /// rate for the platform domain. Unknown domains warn once.
    pub fn domain_rate(&mut self, domain: &DomainKey) -> Option<f64> {
        let name = domain.as_deref()?;
        if let Some(def) = self.program.domain_definition(name) {
            if let Some(rate) = def.rate.filter(|r| *r > 0.0) {
                return Some(rate);
            }
        }
        if name == self.platform_domain && self.program.platform.rate > 0.0 {
            return Some(self.program.platform.rate);
        }
        if self.first_time(format!("rate:{}", name)) {
            self.warn(
                crate::diag::codes::W0401,
                SourceLoc::default(),
                format!("domain '{}' declares no default rate", name),
            );
        }
        None
    }

    /// Framework a domain belongs to, if its definition names one.
    pub fn domain_framework(&self, domain: &str) -> Option<&'t str> {
        self.program
            .domain_definition(domain)
            .and_then(|d| d.framework.as_deref())
    }

    // ── Bookkeeping ──

    pub fn warn(&mut self, code: DiagCode, loc: SourceLoc, message: impl Into<String>) {
        let diag = Diagnostic::warning(code, loc, message);
        log::debug!("{}", diag.message);
        self.diagnostics.push(diag);
    }

    pub fn alloc_stream(&mut self) -> usize {
        let serial = self.next_stream;
        self.next_stream += 1;
        serial
    }

    /// True the first time `key` is seen in this run.
    pub fn first_time(&mut self, key: impl Into<String>) -> bool {
        self.seen.insert(key.into())
    }
}
