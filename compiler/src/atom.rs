// atom.rs — Stream atoms: the unit of lowering
//
// Every stream member becomes one `Atom`. The atom owns the fields shared by
// all variants (`AtomHead`) and a variant payload (`AtomKind`) that knows how
// to produce its elements and code fragments. The stream driver only talks
// to `Atom`; variant behavior sits behind the `AtomBehavior` trait.
//
// This module also holds the simple variants: Value, Expression, List and
// PortProperty. Signals live in `signal.rs`, module-like constructs in
// `module.rs`, platform types in `platform.rs` and buffers in `buffer.rs`.
//
// Preconditions: atoms are built by `factory::make_atom` in stream order.
// Postconditions: `collect_elements` registers each element in the graph
//   exactly once; `processing_code` records the atom's out tokens.
// Failure modes: domain disagreement between children, unresolved port
//   properties.
// Side effects: adds elements to the context's graph; may record warnings.

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use crate::buffer::BufferAtom;
use crate::context::LoweringContext;
use crate::emitter::CodeEmitter;
use crate::error::LowerError;
use crate::graph::{Element, ElementId, InstanceKind};
use crate::id::AtomId;
use crate::module::BodyAtom;
use crate::platform::PlatformAtom;
use crate::scope::port_property_handle;
use crate::signal::SignalAtom;
use crate::tree::{BinaryOp, DomainKey, Literal, NativeCode, SourceLoc, UnaryOp, ValueType};

// ── Global groups ───────────────────────────────────────────────────────────

/// Build-level requirements (`include`, `linkTo`, ...) gathered from native
/// snippets; each section keeps insertion order without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlobalGroups(IndexMap<String, IndexSet<String>>);

impl GlobalGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_native(native: &NativeCode) -> Self {
        let mut groups = GlobalGroups::new();
        for (section, values) in [
            ("include", &native.include),
            ("includeDir", &native.include_dir),
            ("linkTo", &native.link_to),
            ("linkDir", &native.link_dir),
        ] {
            for v in values {
                groups.add(section, v);
            }
        }
        groups
    }

    pub fn add(&mut self, section: &str, value: &str) {
        self.0
            .entry(section.to_string())
            .or_default()
            .insert(value.to_string());
    }

    pub fn merge(&mut self, other: &GlobalGroups) {
        for (section, values) in &other.0 {
            for v in values {
                self.add(section, v);
            }
        }
    }

    pub fn section(&self, name: &str) -> impl Iterator<Item = &String> {
        self.0.get(name).into_iter().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &IndexSet<String>)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(IndexSet::is_empty)
    }
}

// ── Code fragments ──────────────────────────────────────────────────────────

/// Processing output keyed by domain: code plus the out tokens published
/// in that domain. `None` means "the stream's current domain".
pub type DomainCode = IndexMap<DomainKey, (String, Vec<String>)>;

pub fn push_code(map: &mut DomainCode, domain: DomainKey, code: &str, tokens: Vec<String>) {
    let entry = map.entry(domain).or_default();
    entry.0.push_str(code);
    entry.1.extend(tokens);
}

/// First token published in any domain.
pub fn first_token(code: &DomainCode) -> Option<String> {
    code.values().find_map(|(_, t)| t.first().cloned())
}

/// Elements an atom contributes, plus the domain accesses its lowered body
/// recorded.
#[derive(Debug, Default)]
pub struct AtomElements {
    pub declarations: Vec<ElementId>,
    pub instances: Vec<ElementId>,
    pub reads: IndexMap<DomainKey, Vec<ElementId>>,
    pub writes: IndexMap<DomainKey, Vec<ElementId>>,
}

impl AtomElements {
    pub fn extend(&mut self, other: AtomElements) {
        self.declarations.extend(other.declarations);
        self.instances.extend(other.instances);
        for (d, ids) in other.reads {
            self.reads.entry(d).or_default().extend(ids);
        }
        for (d, ids) in other.writes {
            self.writes.entry(d).or_default().extend(ids);
        }
    }

    pub fn all(&self) -> impl Iterator<Item = ElementId> + '_ {
        self.declarations.iter().chain(self.instances.iter()).copied()
    }
}

// ── Atom ────────────────────────────────────────────────────────────────────

/// Fields shared by every atom variant.
#[derive(Debug, Clone)]
pub struct AtomHead {
    pub id: AtomId,
    pub handle: String,
    pub domain: DomainKey,
    pub rate: Option<f64>,
    /// Depth of the scope the atom was built in.
    pub scope: usize,
    pub inline: bool,
    pub globals: GlobalGroups,
    pub loc: SourceLoc,
    pub out_tokens: Vec<String>,
}

impl AtomHead {
    pub fn new(id: AtomId, handle: impl Into<String>, scope: usize, loc: SourceLoc) -> Self {
        AtomHead {
            id,
            handle: handle.into(),
            domain: None,
            rate: None,
            scope,
            inline: false,
            globals: GlobalGroups::new(),
            loc,
            out_tokens: Vec::new(),
        }
    }
}

pub enum AtomKind<'t> {
    Value(ValueAtom),
    Expression(ExpressionAtom<'t>),
    List(ListAtom<'t>),
    Name(SignalAtom<'t>),
    Bundle(SignalAtom<'t>),
    Module(BodyAtom<'t>),
    Reaction(BodyAtom<'t>),
    Loop(BodyAtom<'t>),
    PlatformType(PlatformAtom<'t>),
    Buffer(BufferAtom<'t>),
    PortProperty(PortPropertyAtom),
}

pub struct Atom<'t> {
    pub head: AtomHead,
    pub kind: AtomKind<'t>,
}

/// Per-variant lowering behavior. Defaults produce nothing.
pub trait AtomBehavior<'t> {
    fn elements(
        &mut self,
        _head: &AtomHead,
        _ctx: &mut LoweringContext<'t>,
    ) -> Result<AtomElements, LowerError> {
        Ok(AtomElements::default())
    }

    /// Declarations placed in the current domain's header.
    fn header_code(&self, _head: &AtomHead, _ctx: &LoweringContext<'t>) -> String {
        String::new()
    }

    fn initialization_code(
        &self,
        _head: &AtomHead,
        _ctx: &mut LoweringContext<'t>,
        _in_tokens: &[String],
    ) -> String {
        String::new()
    }

    fn preprocessing_code(&self, _head: &AtomHead, _ctx: &LoweringContext<'t>, _in_tokens: &[String]) -> String {
        String::new()
    }

    fn processing_code(
        &mut self,
        head: &AtomHead,
        ctx: &mut LoweringContext<'t>,
        in_tokens: &[String],
    ) -> Result<DomainCode, LowerError>;

    fn postprocessing_code(&self, _head: &AtomHead, _ctx: &LoweringContext<'t>, _in_tokens: &[String]) -> String {
        String::new()
    }

    /// `(key, code)` snippets emitted once per domain before processing.
    fn preprocessing_once(&self, _head: &AtomHead, _ctx: &LoweringContext<'t>) -> Vec<(String, String)> {
        Vec::new()
    }

    /// `(key, code)` snippets emitted once per domain after processing.
    fn postprocessing_once(&self, _head: &AtomHead, _ctx: &LoweringContext<'t>) -> Vec<(String, String)> {
        Vec::new()
    }

    fn handles(&self, head: &AtomHead, _emitter: &dyn CodeEmitter) -> Vec<String> {
        vec![head.handle.clone()]
    }

    /// Hook for variants whose children follow the atom's inline status.
    fn propagate_inline(&mut self, _inline: bool) {}

    /// Properties the atom exposes to a module port it is connected to.
    fn properties(&self, _head: &AtomHead) -> IndexMap<String, Literal> {
        IndexMap::new()
    }
}

impl<'t> Atom<'t> {
    fn behavior(&self) -> &dyn AtomBehavior<'t> {
        match &self.kind {
            AtomKind::Value(a) => a,
            AtomKind::Expression(a) => a,
            AtomKind::List(a) => a,
            AtomKind::Name(a) | AtomKind::Bundle(a) => a,
            AtomKind::Module(a) | AtomKind::Reaction(a) | AtomKind::Loop(a) => a,
            AtomKind::PlatformType(a) => a,
            AtomKind::Buffer(a) => a,
            AtomKind::PortProperty(a) => a,
        }
    }

    fn split(&mut self) -> (&AtomHead, &mut dyn AtomBehavior<'t>) {
        let behavior: &mut dyn AtomBehavior<'t> = match &mut self.kind {
            AtomKind::Value(a) => a,
            AtomKind::Expression(a) => a,
            AtomKind::List(a) => a,
            AtomKind::Name(a) | AtomKind::Bundle(a) => a,
            AtomKind::Module(a) | AtomKind::Reaction(a) | AtomKind::Loop(a) => a,
            AtomKind::PlatformType(a) => a,
            AtomKind::Buffer(a) => a,
            AtomKind::PortProperty(a) => a,
        };
        (&self.head, behavior)
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            AtomKind::Value(_) => "value",
            AtomKind::Expression(_) => "expression",
            AtomKind::List(_) => "list",
            AtomKind::Name(_) => "name",
            AtomKind::Bundle(_) => "bundle",
            AtomKind::Module(_) => "module",
            AtomKind::Reaction(_) => "reaction",
            AtomKind::Loop(_) => "loop",
            AtomKind::PlatformType(_) => "platform",
            AtomKind::Buffer(_) => "buffer",
            AtomKind::PortProperty(_) => "portproperty",
        }
    }

    /// Module-like constructs own a lowered body.
    pub fn is_body(&self) -> bool {
        matches!(
            self.kind,
            AtomKind::Module(_) | AtomKind::Reaction(_) | AtomKind::Loop(_)
        )
    }

    /// Signal references whose storage the driver tracks for the
    /// cross-domain hazard check.
    pub fn tracks_access(&self) -> bool {
        matches!(self.kind, AtomKind::Name(_) | AtomKind::Bundle(_))
    }

    pub fn literal(&self) -> Option<&Literal> {
        match &self.kind {
            AtomKind::Value(v) => Some(&v.value),
            _ => None,
        }
    }

    pub fn is_inline(&self) -> bool {
        self.head.inline
    }

    pub fn set_inline(&mut self, inline: bool) {
        self.head.inline = inline;
        let (_, behavior) = self.split();
        behavior.propagate_inline(inline);
    }

    pub fn out_tokens(&self) -> &[String] {
        &self.head.out_tokens
    }

    pub fn handles(&self, emitter: &dyn CodeEmitter) -> Vec<String> {
        self.behavior().handles(&self.head, emitter)
    }

    pub fn properties(&self) -> IndexMap<String, Literal> {
        let mut props = self.behavior().properties(&self.head);
        if let Some(rate) = self.head.rate {
            props.entry("rate".to_string()).or_insert(Literal::Real(rate));
        }
        props
    }

    pub fn collect_elements(&mut self, ctx: &mut LoweringContext<'t>) -> Result<AtomElements, LowerError> {
        let (head, behavior) = self.split();
        behavior.elements(head, ctx)
    }

    pub fn header_code(&self, ctx: &LoweringContext<'t>) -> String {
        self.behavior().header_code(&self.head, ctx)
    }

    pub fn initialization_code(&self, ctx: &mut LoweringContext<'t>, in_tokens: &[String]) -> String {
        self.behavior().initialization_code(&self.head, ctx, in_tokens)
    }

    pub fn preprocessing_code(&self, ctx: &LoweringContext<'t>, in_tokens: &[String]) -> String {
        self.behavior().preprocessing_code(&self.head, ctx, in_tokens)
    }

    pub fn processing_code(
        &mut self,
        ctx: &mut LoweringContext<'t>,
        in_tokens: &[String],
    ) -> Result<DomainCode, LowerError> {
        let code = {
            let (head, behavior) = self.split();
            behavior.processing_code(head, ctx, in_tokens)?
        };
        self.head.out_tokens = code.values().flat_map(|(_, t)| t.iter().cloned()).collect();
        Ok(code)
    }

    pub fn postprocessing_code(&self, ctx: &LoweringContext<'t>, in_tokens: &[String]) -> String {
        self.behavior().postprocessing_code(&self.head, ctx, in_tokens)
    }

    pub fn preprocessing_once(&self, ctx: &LoweringContext<'t>) -> Vec<(String, String)> {
        self.behavior().preprocessing_once(&self.head, ctx)
    }

    pub fn postprocessing_once(&self, ctx: &LoweringContext<'t>) -> Vec<(String, String)> {
        self.behavior().postprocessing_once(&self.head, ctx)
    }
}

// ── Value ───────────────────────────────────────────────────────────────────

pub struct ValueAtom {
    pub value: Literal,
}

pub fn value<'t>(ctx: &mut LoweringContext<'t>, value: Literal, loc: SourceLoc) -> Atom<'t> {
    let id = ctx.ids.alloc_atom();
    let mut head = AtomHead::new(id, format!("__value_{}", id), ctx.scope_index(), loc);
    head.inline = true;
    Atom {
        head,
        kind: AtomKind::Value(ValueAtom { value }),
    }
}

impl<'t> AtomBehavior<'t> for ValueAtom {
    fn elements(&mut self, head: &AtomHead, ctx: &mut LoweringContext<'t>) -> Result<AtomElements, LowerError> {
        let mut out = AtomElements::default();
        if head.inline {
            return Ok(out);
        }
        let ty = self.value.value_type();
        let kind = match &self.value {
            Literal::List(items) => InstanceKind::Bundle {
                ty,
                size: items.len(),
            },
            _ => InstanceKind::Scalar { ty },
        };
        let init = self.value.elements().into_iter().map(|l| ctx.emitter.literal(l)).collect();
        let element = Element::instance(&head.handle, kind, head.scope)
            .in_domain(head.domain.clone())
            .with_init(init);
        out.instances.push(ctx.graph.add(element));
        Ok(out)
    }

    fn processing_code(
        &mut self,
        head: &AtomHead,
        ctx: &mut LoweringContext<'t>,
        _in_tokens: &[String],
    ) -> Result<DomainCode, LowerError> {
        let mut code = DomainCode::new();
        push_code(&mut code, None, "", self.handles(head, ctx.emitter));
        Ok(code)
    }

    fn handles(&self, head: &AtomHead, emitter: &dyn CodeEmitter) -> Vec<String> {
        if head.inline {
            vec![emitter.literal(&self.value)]
        } else {
            vec![head.handle.clone()]
        }
    }

    fn properties(&self, _head: &AtomHead) -> IndexMap<String, Literal> {
        [("default".to_string(), self.value.clone())].into_iter().collect()
    }
}

// ── Expression ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Binary(BinaryOp),
    Unary(UnaryOp),
}

impl Operator {
    pub fn result_type(self) -> ValueType {
        match self {
            Operator::Binary(op) => op.result_type(),
            Operator::Unary(op) => op.result_type(),
        }
    }
}

pub struct ExpressionAtom<'t> {
    pub op: Operator,
    pub operands: Vec<Atom<'t>>,
}

/// Combine operand domains; two different explicit domains are an error.
pub fn expression<'t>(
    ctx: &mut LoweringContext<'t>,
    op: Operator,
    operands: Vec<Atom<'t>>,
    id: AtomId,
    loc: SourceLoc,
) -> Result<Atom<'t>, LowerError> {
    let mut domain: DomainKey = None;
    for operand in &operands {
        match (&domain, &operand.head.domain) {
            (Some(left), Some(right)) if left != right => {
                return Err(LowerError::DomainMismatch {
                    construct: "expression",
                    left: left.clone(),
                    right: right.clone(),
                    loc,
                });
            }
            (None, Some(d)) => domain = Some(d.clone()),
            _ => {}
        }
    }
    let mut head = AtomHead::new(id, format!("__expr_{}", id), ctx.scope_index(), loc);
    head.domain = domain;
    head.inline = !operands.iter().any(Atom::is_body);
    for operand in &operands {
        head.globals.merge(&operand.head.globals);
    }
    Ok(Atom {
        head,
        kind: AtomKind::Expression(ExpressionAtom { op, operands }),
    })
}

impl ExpressionAtom<'_> {
    fn render(&self, emitter: &dyn CodeEmitter, tokens: &[String]) -> String {
        let token = |i: usize| tokens.get(i).cloned().unwrap_or_default();
        match self.op {
            Operator::Binary(op) => emitter.binary(op, &token(0), &token(1)),
            Operator::Unary(op) => emitter.unary(op, &token(0)),
        }
    }
}

impl<'t> AtomBehavior<'t> for ExpressionAtom<'t> {
    fn elements(&mut self, head: &AtomHead, ctx: &mut LoweringContext<'t>) -> Result<AtomElements, LowerError> {
        let mut out = AtomElements::default();
        for operand in &mut self.operands {
            out.extend(operand.collect_elements(ctx)?);
        }
        if !head.inline {
            let element = Element::instance(
                &head.handle,
                InstanceKind::Scalar {
                    ty: self.op.result_type(),
                },
                head.scope,
            )
            .in_domain(head.domain.clone());
            out.instances.push(ctx.graph.add(element));
        }
        Ok(out)
    }

    fn header_code(&self, _head: &AtomHead, ctx: &LoweringContext<'t>) -> String {
        self.operands.iter().map(|o| o.header_code(ctx)).collect()
    }

    fn initialization_code(&self, _head: &AtomHead, ctx: &mut LoweringContext<'t>, _in_tokens: &[String]) -> String {
        let mut code = String::new();
        for operand in &self.operands {
            code.push_str(&operand.initialization_code(ctx, &[]));
        }
        code
    }

    fn preprocessing_code(&self, _head: &AtomHead, ctx: &LoweringContext<'t>, _in_tokens: &[String]) -> String {
        self.operands.iter().map(|o| o.preprocessing_code(ctx, &[])).collect()
    }

    fn processing_code(
        &mut self,
        head: &AtomHead,
        ctx: &mut LoweringContext<'t>,
        _in_tokens: &[String],
    ) -> Result<DomainCode, LowerError> {
        let mut code = DomainCode::new();
        let mut tokens = Vec::with_capacity(self.operands.len());
        for operand in &mut self.operands {
            let child = operand.processing_code(ctx, &[])?;
            let token = first_token(&child)
                .or_else(|| operand.handles(ctx.emitter).into_iter().next())
                .unwrap_or_default();
            for (d, (c, _)) in child {
                push_code(&mut code, d.or_else(|| head.domain.clone()), &c, Vec::new());
            }
            tokens.push(token);
        }
        let expr = self.render(ctx.emitter, &tokens);
        if head.inline {
            push_code(&mut code, head.domain.clone(), "", vec![expr]);
        } else {
            let assign = ctx.emitter.assign(&head.handle, &expr, None);
            push_code(&mut code, head.domain.clone(), &assign, vec![head.handle.clone()]);
        }
        Ok(code)
    }

    fn postprocessing_code(&self, _head: &AtomHead, ctx: &LoweringContext<'t>, _in_tokens: &[String]) -> String {
        self.operands.iter().map(|o| o.postprocessing_code(ctx, &[])).collect()
    }

    fn preprocessing_once(&self, _head: &AtomHead, ctx: &LoweringContext<'t>) -> Vec<(String, String)> {
        self.operands.iter().flat_map(|o| o.preprocessing_once(ctx)).collect()
    }

    fn postprocessing_once(&self, _head: &AtomHead, ctx: &LoweringContext<'t>) -> Vec<(String, String)> {
        self.operands.iter().flat_map(|o| o.postprocessing_once(ctx)).collect()
    }

    fn handles(&self, head: &AtomHead, emitter: &dyn CodeEmitter) -> Vec<String> {
        if head.inline {
            let tokens: Vec<String> = self
                .operands
                .iter()
                .map(|o| o.handles(emitter).into_iter().next().unwrap_or_default())
                .collect();
            vec![self.render(emitter, &tokens)]
        } else {
            vec![head.handle.clone()]
        }
    }

    fn propagate_inline(&mut self, inline: bool) {
        for operand in &mut self.operands {
            operand.set_inline(inline);
        }
    }
}

// ── List ────────────────────────────────────────────────────────────────────

pub struct ListAtom<'t> {
    pub items: Vec<Atom<'t>>,
}

pub fn list<'t>(ctx: &mut LoweringContext<'t>, items: Vec<Atom<'t>>, id: AtomId, loc: SourceLoc) -> Result<Atom<'t>, LowerError> {
    let mut domain: DomainKey = None;
    for item in &items {
        match (&domain, &item.head.domain) {
            (Some(left), Some(right)) if left != right => {
                return Err(LowerError::DomainMismatch {
                    construct: "list",
                    left: left.clone(),
                    right: right.clone(),
                    loc,
                });
            }
            (None, Some(d)) => domain = Some(d.clone()),
            _ => {}
        }
    }
    let first_rate = items.first().and_then(|i| i.head.rate);
    let rate = if items.iter().all(|i| i.head.rate == first_rate) {
        first_rate
    } else {
        None
    };
    let mut head = AtomHead::new(id, format!("__list_{}", id), ctx.scope_index(), loc);
    head.domain = domain;
    head.rate = rate;
    for item in &items {
        head.globals.merge(&item.head.globals);
    }
    Ok(Atom {
        head,
        kind: AtomKind::List(ListAtom { items }),
    })
}

/// The single input token routed to list item `index`.
fn routed(in_tokens: &[String], index: usize) -> &[String] {
    if in_tokens.is_empty() {
        &[]
    } else {
        let i = index % in_tokens.len();
        &in_tokens[i..=i]
    }
}

impl<'t> AtomBehavior<'t> for ListAtom<'t> {
    fn elements(&mut self, _head: &AtomHead, ctx: &mut LoweringContext<'t>) -> Result<AtomElements, LowerError> {
        let mut out = AtomElements::default();
        for item in &mut self.items {
            out.extend(item.collect_elements(ctx)?);
        }
        Ok(out)
    }

    fn header_code(&self, _head: &AtomHead, ctx: &LoweringContext<'t>) -> String {
        self.items.iter().map(|i| i.header_code(ctx)).collect()
    }

    fn initialization_code(&self, _head: &AtomHead, ctx: &mut LoweringContext<'t>, in_tokens: &[String]) -> String {
        let mut code = String::new();
        for (i, item) in self.items.iter().enumerate() {
            code.push_str(&item.initialization_code(ctx, routed(in_tokens, i)));
        }
        code
    }

    fn preprocessing_code(&self, _head: &AtomHead, ctx: &LoweringContext<'t>, in_tokens: &[String]) -> String {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| item.preprocessing_code(ctx, routed(in_tokens, i)))
            .collect()
    }

    fn processing_code(
        &mut self,
        head: &AtomHead,
        ctx: &mut LoweringContext<'t>,
        in_tokens: &[String],
    ) -> Result<DomainCode, LowerError> {
        let mut code = DomainCode::new();
        for (i, item) in self.items.iter_mut().enumerate() {
            let child = item.processing_code(ctx, routed(in_tokens, i))?;
            for (d, (c, t)) in child {
                push_code(&mut code, d.or_else(|| head.domain.clone()), &c, t);
            }
        }
        Ok(code)
    }

    fn postprocessing_code(&self, _head: &AtomHead, ctx: &LoweringContext<'t>, in_tokens: &[String]) -> String {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| item.postprocessing_code(ctx, routed(in_tokens, i)))
            .collect()
    }

    fn preprocessing_once(&self, _head: &AtomHead, ctx: &LoweringContext<'t>) -> Vec<(String, String)> {
        self.items.iter().flat_map(|i| i.preprocessing_once(ctx)).collect()
    }

    fn postprocessing_once(&self, _head: &AtomHead, ctx: &LoweringContext<'t>) -> Vec<(String, String)> {
        self.items.iter().flat_map(|i| i.postprocessing_once(ctx)).collect()
    }

    fn handles(&self, _head: &AtomHead, emitter: &dyn CodeEmitter) -> Vec<String> {
        self.items.iter().flat_map(|i| i.handles(emitter)).collect()
    }

    fn properties(&self, _head: &AtomHead) -> IndexMap<String, Literal> {
        [("size".to_string(), Literal::Real(self.items.len() as f64))]
            .into_iter()
            .collect()
    }
}

// ── Port property ───────────────────────────────────────────────────────────

pub struct PortPropertyAtom {
    pub port: String,
    pub property: String,
    pub value: Literal,
}

/// `Port.property` inside a module body. The resolved value becomes a
/// constant of the innermost parent frame.
pub fn port_property<'t>(
    ctx: &mut LoweringContext<'t>,
    port: &str,
    property: &str,
    loc: SourceLoc,
) -> Result<Atom<'t>, LowerError> {
    let unresolved = || LowerError::UnresolvedReference {
        name: format!("{}.{}", port, property),
        loc: loc.clone(),
    };
    let value = ctx.port_property(port, property).ok_or_else(unresolved)?;
    let handle = port_property_handle(port, property);
    let frame = ctx.parents.last_mut().ok_or_else(unresolved)?;
    frame.consts.insert(handle.clone(), value.clone());
    let id = ctx.ids.alloc_atom();
    let mut head = AtomHead::new(id, handle, ctx.scope_index(), loc);
    head.inline = true;
    Ok(Atom {
        head,
        kind: AtomKind::PortProperty(PortPropertyAtom {
            port: port.to_string(),
            property: property.to_string(),
            value,
        }),
    })
}

impl<'t> AtomBehavior<'t> for PortPropertyAtom {
    fn processing_code(
        &mut self,
        head: &AtomHead,
        _ctx: &mut LoweringContext<'t>,
        _in_tokens: &[String],
    ) -> Result<DomainCode, LowerError> {
        let mut code = DomainCode::new();
        push_code(&mut code, None, "", vec![head.handle.clone()]);
        Ok(code)
    }

    fn properties(&self, _head: &AtomHead) -> IndexMap<String, Literal> {
        [("default".to_string(), self.value.clone())].into_iter().collect()
    }
}
