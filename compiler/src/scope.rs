// scope.rs — Scope stack, parent frames, and name resolution
//
// Names in a stream resolve against a stack of block lists: the innermost
// module body first, the program's root blocks last. Module bodies also
// push a parent frame describing how the enclosing call site wired the
// module's ports, which is what `Port.property` references and
// port-property domains resolve against.
//
// Preconditions: frame 0 holds the program's root blocks.
// Postconditions: a successful lookup reports the depth of the frame that
//   declared the block; pushes and pops stay paired.
// Failure modes: unresolved names → `LowerError::UnresolvedReference`.
// Side effects: none.

use indexmap::IndexMap;

use crate::tree::{Block, DomainKey, Literal, PortKind};

// ── Scope stack ─────────────────────────────────────────────────────────────

/// A block found by name together with the depth of its declaring frame.
#[derive(Debug, Clone, Copy)]
pub struct Resolved<'t> {
    pub block: &'t Block,
    pub depth: usize,
}

#[derive(Debug)]
struct ScopeFrame<'t> {
    blocks: Vec<&'t Block>,
    /// Module bodies push a parent frame alongside their scope frame.
    has_parent: bool,
}

#[derive(Debug, Default)]
pub struct ScopeStack<'t> {
    frames: Vec<ScopeFrame<'t>>,
}

impl<'t> ScopeStack<'t> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, blocks: Vec<&'t Block>, has_parent: bool) {
        self.frames.push(ScopeFrame { blocks, has_parent });
    }

    /// Pop the innermost frame; returns whether it carried a parent frame.
    pub fn pop(&mut self) -> Option<bool> {
        self.frames.pop().map(|f| f.has_parent)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Depth of the innermost frame (0 for the root).
    pub fn current(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }

    /// Innermost-first lookup honoring the namespace filter.
    pub fn find(&self, name: &str, framework: Option<&str>) -> Option<Resolved<'t>> {
        self.frames.iter().enumerate().rev().find_map(|(depth, frame)| {
            frame
                .blocks
                .iter()
                .find(|b| b.name == name && b.visible_in(framework))
                .map(|&block| Resolved { block, depth })
        })
    }
}

// ── Parent frames ───────────────────────────────────────────────────────────

/// External side of one module port at a call site.
#[derive(Debug, Clone, PartialEq)]
pub struct PortEndpoint {
    pub port: String,
    pub kind: PortKind,
    /// Internal block the port is bound to.
    pub block: String,
    /// Domain of whatever is connected outside.
    pub domain: DomainKey,
    /// `size`, `rate`, `default` of the external connection, when known.
    pub properties: IndexMap<String, Literal>,
}

impl PortEndpoint {
    pub fn property(&self, name: &str) -> Option<Literal> {
        if name == "domain" {
            return self.domain.clone().map(Literal::Str);
        }
        self.properties.get(name).cloned()
    }
}

/// Call-site description pushed while a module body is lowered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParentFrame {
    /// Handle of the construct being lowered.
    pub handle: String,
    pub ports: Vec<PortEndpoint>,
    /// Port-property values the body referenced, keyed by constant name.
    pub consts: IndexMap<String, Literal>,
}

impl ParentFrame {
    pub fn new(handle: impl Into<String>, ports: Vec<PortEndpoint>) -> Self {
        ParentFrame {
            handle: handle.into(),
            ports,
            consts: IndexMap::new(),
        }
    }

    pub fn endpoint(&self, port: &str) -> Option<&PortEndpoint> {
        self.ports.iter().find(|p| p.port == port)
    }

    pub fn is_port_block(&self, block: &str) -> bool {
        self.ports.iter().any(|p| p.block == block)
    }
}

/// Search `frames` innermost-first for `port.property`.
pub fn lookup_port_property(frames: &[ParentFrame], port: &str, property: &str) -> Option<Literal> {
    frames
        .iter()
        .rev()
        .find_map(|f| f.endpoint(port).and_then(|e| e.property(property)))
}

/// Name of the constant a `Port.property` reference lowers to.
pub fn port_property_handle(port: &str, property: &str) -> String {
    format!("__{}_{}", port, property)
}

/// Properties a connected block exposes to a module port.
pub fn block_properties(block: &Block) -> IndexMap<String, Literal> {
    ["size", "rate", "default"]
        .iter()
        .filter_map(|p| block.property(p).map(|v| (p.to_string(), v)))
        .collect()
}
