// graph.rs — Declaration/instance elements and their dependency graph
//
// Every storage allocation (instance) and type-level code chunk
// (declaration) produced by lowering lives in one arena, addressed by
// `ElementId`. An edge A→B ("B is a dependent of A") means B's text refers
// to A, so A must be emitted first.
//
// Preconditions: ids passed in were allocated by the same graph.
// Postconditions: `sort` returns dependencies before dependents, or a
//   `CyclicDependency` error naming the cycle.
// Failure modes: cycles among the listed elements.
// Side effects: none.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};

use crate::error::LowerError;
use crate::tree::{DomainKey, ValueType};

/// Index of an element in the `ElementGraph` arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u32);

// ── Elements ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum InstanceKind {
    Scalar { ty: ValueType },
    Bundle { ty: ValueType, size: usize },
    Module { type_name: String, consts: Vec<String> },
    Reaction { type_name: String },
    Buffer { type_name: String, size: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
    Instance(InstanceKind),
    Declaration { code: String },
}

#[derive(Debug, Clone)]
pub struct Element {
    pub name: String,
    pub kind: ElementKind,
    /// Depth of the scope that owns this element.
    pub scope: usize,
    /// Domain whose header/init sections receive this element.
    pub domain: DomainKey,
    pub reads: Vec<String>,
    pub writes: Vec<String>,
    pub dependents: Vec<ElementId>,
    /// Suppressed aliases stay in the graph but produce no text.
    pub enabled: bool,
    /// Rendered initial values, one per bundle element.
    pub init: Vec<String>,
    /// Signal-bridge cells are legitimately shared between domains.
    pub bridge: bool,
}

impl Element {
    pub fn instance(name: impl Into<String>, kind: InstanceKind, scope: usize) -> Self {
        Element {
            name: name.into(),
            kind: ElementKind::Instance(kind),
            scope,
            domain: None,
            reads: Vec::new(),
            writes: Vec::new(),
            dependents: Vec::new(),
            enabled: true,
            init: Vec::new(),
            bridge: false,
        }
    }

    pub fn declaration(name: impl Into<String>, code: impl Into<String>, scope: usize) -> Self {
        Element {
            kind: ElementKind::Declaration { code: code.into() },
            ..Element::instance(name, InstanceKind::Scalar { ty: ValueType::Real }, scope)
        }
    }

    pub fn in_domain(mut self, domain: DomainKey) -> Self {
        self.domain = domain;
        self
    }

    pub fn with_init(mut self, init: Vec<String>) -> Self {
        self.init = init;
        self
    }

    pub fn with_access(mut self, reads: Vec<String>, writes: Vec<String>) -> Self {
        self.reads = reads;
        self.writes = writes;
        self
    }

    pub fn is_instance(&self) -> bool {
        matches!(self.kind, ElementKind::Instance(_))
    }

    pub fn is_declaration(&self) -> bool {
        matches!(self.kind, ElementKind::Declaration { .. })
    }

    /// Module and reaction instances are invocation handles, not data.
    pub fn is_data(&self) -> bool {
        matches!(
            self.kind,
            ElementKind::Instance(InstanceKind::Scalar { .. } | InstanceKind::Bundle { .. })
        )
    }

    pub fn kind_label(&self) -> &'static str {
        match &self.kind {
            ElementKind::Declaration { .. } => "declaration",
            ElementKind::Instance(InstanceKind::Scalar { .. }) => "scalar",
            ElementKind::Instance(InstanceKind::Bundle { .. }) => "bundle",
            ElementKind::Instance(InstanceKind::Module { .. }) => "module",
            ElementKind::Instance(InstanceKind::Reaction { .. }) => "reaction",
            ElementKind::Instance(InstanceKind::Buffer { .. }) => "buffer",
        }
    }
}

// ── Arena ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ElementGraph {
    nodes: Vec<Element>,
    /// Duplicates dropped by `dedupe` forward to the element that was kept.
    redirect: HashMap<ElementId, ElementId>,
}

impl ElementGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, element: Element) -> ElementId {
        let id = ElementId(self.nodes.len() as u32);
        self.nodes.push(element);
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: ElementId) -> &Element {
        &self.nodes[self.resolve(id).0 as usize]
    }

    pub fn get_mut(&mut self, id: ElementId) -> &mut Element {
        let id = self.resolve(id);
        &mut self.nodes[id.0 as usize]
    }

    /// Follow dedupe redirects to the surviving element.
    pub fn resolve(&self, mut id: ElementId) -> ElementId {
        while let Some(&next) = self.redirect.get(&id) {
            id = next;
        }
        id
    }

    /// Record that `dependent` must be emitted after `of`.
    pub fn add_dependent(&mut self, of: ElementId, dependent: ElementId) {
        let of = self.resolve(of);
        let dependent = self.resolve(dependent);
        if of == dependent {
            return;
        }
        let deps = &mut self.nodes[of.0 as usize].dependents;
        if !deps.contains(&dependent) {
            deps.push(dependent);
        }
    }

    /// Dependents of `id`, with redirects applied.
    pub fn dependents(&self, id: ElementId) -> Vec<ElementId> {
        let mut out: IndexSet<ElementId> = IndexSet::new();
        for &d in &self.get(id).dependents {
            let d = self.resolve(d);
            if d != self.resolve(id) {
                out.insert(d);
            }
        }
        out.into_iter().collect()
    }

    /// Collapse elements sharing a name: the first occurrence is kept and
    /// absorbs the dependents of later ones, which redirect to it.
    pub fn dedupe(&mut self, ids: &[ElementId]) -> Vec<ElementId> {
        let mut kept: IndexMap<String, ElementId> = IndexMap::new();
        for &id in ids {
            let id = self.resolve(id);
            let name = self.nodes[id.0 as usize].name.clone();
            match kept.get(&name) {
                None => {
                    kept.insert(name, id);
                }
                Some(&first) if first == id => {}
                Some(&first) => {
                    log::trace!("dedupe: '{}' merges into element {}", name, first.0);
                    let moved = std::mem::take(&mut self.nodes[id.0 as usize].dependents);
                    self.redirect.insert(id, first);
                    for d in moved {
                        self.add_dependent(first, d);
                    }
                }
            }
        }
        kept.into_values().collect()
    }

    /// Order `ids` so every element follows all listed elements it depends
    /// on. Edges to elements outside the list are ignored.
    pub fn sort(&self, ids: &[ElementId]) -> Result<Vec<ElementId>, LowerError> {
        let list: Vec<ElementId> = ids
            .iter()
            .map(|&id| self.resolve(id))
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();
        let position: HashMap<ElementId, usize> =
            list.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        // preds[i]: listed elements that must precede list[i]
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); list.len()];
        for (j, &id) in list.iter().enumerate() {
            for dep in self.dependents(id) {
                if let Some(&i) = position.get(&dep) {
                    preds[i].push(j);
                }
            }
        }

        let mut sorter = Sorter {
            preds: &preds,
            state: vec![Mark::Unvisited; list.len()],
            path: Vec::new(),
            order: Vec::with_capacity(list.len()),
        };
        for i in 0..list.len() {
            if sorter.state[i] == Mark::Unvisited {
                if let Err(cycle) = sorter.visit(i) {
                    return Err(LowerError::CyclicDependency {
                        cycle: cycle.into_iter().map(|k| self.get(list[k]).name.clone()).collect(),
                    });
                }
            }
        }
        Ok(sorter.order.into_iter().map(|i| list[i]).collect())
    }

    /// True when every edge between listed elements points forward.
    pub fn respects_order(&self, sorted: &[ElementId]) -> bool {
        let position: HashMap<ElementId, usize> = sorted
            .iter()
            .enumerate()
            .map(|(i, &id)| (self.resolve(id), i))
            .collect();
        sorted.iter().enumerate().all(|(i, &id)| {
            self.dependents(id)
                .iter()
                .all(|d| position.get(d).map_or(true, |&j| j > i))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

struct Sorter<'a> {
    preds: &'a [Vec<usize>],
    state: Vec<Mark>,
    path: Vec<usize>,
    order: Vec<usize>,
}

impl Sorter<'_> {
    /// Depth-first: emit every dependency of `i`, then `i`. Returns the
    /// cycle (as list positions) when one is found on the active path.
    fn visit(&mut self, i: usize) -> Result<(), Vec<usize>> {
        self.state[i] = Mark::OnPath;
        self.path.push(i);
        let preds = self.preds;
        for &p in &preds[i] {
            match self.state[p] {
                Mark::Unvisited => self.visit(p)?,
                Mark::OnPath => {
                    let start = self.path.iter().position(|&k| k == p).unwrap_or(0);
                    let mut cycle: Vec<usize> = self.path[start..].to_vec();
                    cycle.push(p);
                    return Err(cycle);
                }
                Mark::Done => {}
            }
        }
        self.path.pop();
        self.state[i] = Mark::Done;
        self.order.push(i);
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
