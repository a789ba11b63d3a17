// module.rs — Module, Reaction and Loop atoms
//
// The three module-like constructs share one body-lowering path: the body's
// blocks are pushed as a new scope together with a parent frame describing
// the call site, the body streams are lowered like a small program, and the
// resulting elements are split between the generated type and the
// enclosing scope.
//
//   Module    inner elements become fields of the generated type;
//             elements declared further out are hoisted.
//   Reaction  no local declarations: everything is hoisted, and the calls
//             run under the trigger token.
//   Loop      one collapsed `process` method that repeats the body until
//             the termination flag is set.
//
// Preconditions: the block was resolved through the scope stack.
// Postconditions: scope and parent stacks are restored even on error.
// Failure modes: unknown port names in a call, plus anything the body's
//   streams raise.
// Side effects: adds the body's elements to the graph while building;
//   warns W0102 and W0202.

use indexmap::{IndexMap, IndexSet};

use crate::assemble::{self, render_element, ScopeCode};
use crate::atom::{first_token, push_code, Atom, AtomBehavior, AtomElements, AtomHead, AtomKind, DomainCode};
use crate::context::LoweringContext;
use crate::diag::codes;
use crate::emitter::{CodeEmitter, Ctor, Param};
use crate::error::LowerError;
use crate::factory;
use crate::graph::{Element, ElementId, InstanceKind};
use crate::scope::{ParentFrame, PortEndpoint, Resolved};
use crate::tree::{
    Block, BlockKind, DomainKey, FunctionCall, Literal, Member, ModulePorts, PortDecl, PortKind,
    SourceLoc, UnaryOp, ValueType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFlavor {
    Module,
    Reaction,
    Loop,
}

/// A port as seen from inside the body.
#[derive(Debug, Clone, PartialEq)]
pub struct PortInfo {
    pub name: String,
    pub kind: PortKind,
    pub block: String,
    pub domain: DomainKey,
    pub ty: ValueType,
    pub size: Option<usize>,
    pub default: Option<Literal>,
}

/// Storage materialized outside the construct.
#[derive(Debug, Clone)]
pub struct Slot {
    pub name: String,
    pub ty: ValueType,
    pub size: Option<usize>,
    pub domain: DomainKey,
}

/// Everything the body-lowering helper returns.
pub struct LoweredBody {
    pub scope: ScopeCode,
    pub ports: Vec<PortInfo>,
    pub domain: DomainKey,
    pub consts: IndexMap<String, Literal>,
}

pub struct BodyAtom<'t> {
    pub flavor: BodyFlavor,
    pub block: &'t Block,
    pub body: &'t ModulePorts,
    /// Depth of the frame that declared the construct's block.
    pub depth: usize,
    pub ports: Vec<PortInfo>,
    pub bindings: Vec<(String, Atom<'t>)>,
    pub scope: ScopeCode,
    pub consts: IndexMap<String, Literal>,
    pub inner: Vec<ElementId>,
    pub hoisted: Vec<ElementId>,
    pub output: Option<Slot>,
    pub scratch: Vec<Slot>,
    pub connector: Option<Slot>,
    /// Literal feeding a reaction's trigger, if any.
    pub trigger: Option<Literal>,
}

// ── Body lowering ───────────────────────────────────────────────────────────

/// Lower a module-like body under `frame`. Pushes the body's blocks and the
/// frame, lowers its streams, and pops both before returning.
pub fn lower_body<'t>(
    ctx: &mut LoweringContext<'t>,
    block: &'t Block,
    body: &'t ModulePorts,
    frame: ParentFrame,
) -> Result<LoweredBody, LowerError> {
    ctx.push_scope(body.blocks.iter().collect(), Some(frame));
    let result = lower_in_scope(ctx, block, body);
    let frame = ctx.pop_scope();
    let (scope, ports, domain) = result?;
    Ok(LoweredBody {
        scope,
        ports,
        domain,
        consts: frame.map(|f| f.consts).unwrap_or_default(),
    })
}

fn lower_in_scope<'t>(
    ctx: &mut LoweringContext<'t>,
    block: &'t Block,
    body: &'t ModulePorts,
) -> Result<(ScopeCode, Vec<PortInfo>, DomainKey), LowerError> {
    let ports = body
        .ports
        .iter()
        .map(|p| port_info(ctx, block, body, p))
        .collect::<Result<Vec<_>, _>>()?;
    let domain = ctx.resolve_domain(body.domain.as_ref());
    let scope = assemble::lower_streams(ctx, &body.streams)?;
    Ok((scope, ports, domain))
}

fn port_info(
    ctx: &LoweringContext<'_>,
    owner: &Block,
    body: &ModulePorts,
    port: &PortDecl,
) -> Result<PortInfo, LowerError> {
    let block = body.block(&port.block).ok_or_else(|| {
        LowerError::InvalidTree(format!(
            "port '{}' of '{}' refers to undeclared block '{}'",
            port.name, owner.name, port.block
        ))
    })?;
    Ok(PortInfo {
        name: port.name.clone(),
        kind: port.kind,
        block: block.name.clone(),
        domain: ctx.resolve_domain(block.domain_ref()),
        ty: block.value_type(),
        size: block.size,
        default: block.default_value().cloned(),
    })
}

// ── Construction ────────────────────────────────────────────────────────────

pub fn build<'t>(
    ctx: &mut LoweringContext<'t>,
    resolved: Resolved<'t>,
    call: Option<&'t FunctionCall>,
    previous: Option<&Atom<'t>>,
    next: Option<&'t Member>,
    loc: SourceLoc,
) -> Result<Atom<'t>, LowerError> {
    let block = resolved.block;
    let (flavor, body) = match &block.kind {
        BlockKind::Module(b) => (BodyFlavor::Module, b),
        BlockKind::Reaction(b) => (BodyFlavor::Reaction, b),
        BlockKind::Loop(b) => (BodyFlavor::Loop, b),
        _ => {
            return Err(LowerError::UnsupportedType {
                what: "module",
                name: block.name.clone(),
                loc,
            })
        }
    };
    let id = ctx.ids.alloc_atom();
    let handle = format!("{}_{}", block.name, id);
    let atom_scope = ctx.scope_index();
    let call_domain = call.and_then(|c| ctx.resolve_domain(c.domain.as_ref()));

    let mut bindings = Vec::new();
    for pv in call.map(|c| c.ports.as_slice()).unwrap_or_default() {
        if !body.ports.iter().any(|p| p.name == pv.name) {
            return Err(LowerError::UnresolvedReference {
                name: format!("{}.{}", block.name, pv.name),
                loc,
            });
        }
        let atom = factory::make_atom(ctx, &pv.value, None, None, &loc)?;
        bindings.push((pv.name.clone(), atom));
    }

    let endpoints = body
        .ports
        .iter()
        .map(|p| {
            let (domain, properties) = match p.kind {
                PortKind::MainInput => previous
                    .map(|a| (a.head.domain.clone(), a.properties()))
                    .unwrap_or_default(),
                PortKind::MainOutput => next
                    .map(|m| (factory::member_domain(ctx, m), factory::member_properties(ctx, m)))
                    .unwrap_or_default(),
                PortKind::PropertyInput | PortKind::PropertyOutput => bindings
                    .iter()
                    .find(|(name, _)| name == &p.name)
                    .map(|(_, a)| (a.head.domain.clone(), a.properties()))
                    .unwrap_or_default(),
            };
            PortEndpoint {
                port: p.name.clone(),
                kind: p.kind,
                block: p.block.clone(),
                domain,
                properties,
            }
        })
        .collect();

    log::debug!("module: lowering body of '{}' as {}", block.name, handle);
    let lowered = lower_body(ctx, block, body, ParentFrame::new(handle.clone(), endpoints))?;
    let domain = match flavor {
        BodyFlavor::Loop => None,
        _ => call_domain.or_else(|| lowered.domain.clone()),
    };

    // Split the body's elements between the generated type and the
    // enclosing scope.
    let port_blocks: Vec<&str> = body.ports.iter().map(|p| p.block.as_str()).collect();
    let mut inner = Vec::new();
    let mut hoisted = Vec::new();
    for &eid in &lowered.scope.elements {
        let el = ctx.graph.get_mut(eid);
        if el.is_instance() && port_blocks.contains(&el.name.as_str()) {
            el.enabled = false;
        }
        match flavor {
            BodyFlavor::Module if el.scope > atom_scope => inner.push(eid),
            BodyFlavor::Module => hoisted.push(eid),
            _ if !el.enabled => {}
            _ => {
                el.scope = el.scope.min(atom_scope);
                hoisted.push(eid);
            }
        }
    }

    if flavor == BodyFlavor::Loop {
        if let Some(flag) = &body.terminate_when {
            if !hoisted.iter().any(|&h| &ctx.graph.get(h).name == flag) {
                let init = vec![ctx.emitter.literal(&Literal::Bool(false))];
                let element = Element::instance(flag, InstanceKind::Scalar { ty: ValueType::Bool }, atom_scope)
                    .with_init(init);
                hoisted.push(ctx.graph.add(element));
            }
        }
    }

    let trigger = match flavor {
        BodyFlavor::Reaction => previous.and_then(|a| a.literal().cloned()),
        _ => None,
    };
    if trigger == Some(Literal::Bool(false)) {
        ctx.warn(
            codes::W0202,
            loc.clone(),
            format!("reaction '{}' is triggered by constant false and never runs", block.name),
        );
    }
    if previous.is_none() && body.port(PortKind::MainInput).is_some() {
        ctx.warn(
            codes::W0102,
            loc.clone(),
            format!("input of '{}' is not connected; its default is used", block.name),
        );
    }

    let slot_domain = |p: &PortInfo| match flavor {
        BodyFlavor::Loop => None,
        _ => p.domain.clone().or_else(|| domain.clone()),
    };
    let output = lowered
        .ports
        .iter()
        .find(|p| p.kind == PortKind::MainOutput)
        .map(|p| Slot {
            name: format!("_{}_out", handle),
            ty: p.ty,
            size: p.size,
            domain: slot_domain(p),
        });
    let scratch = lowered
        .ports
        .iter()
        .filter(|p| p.kind == PortKind::PropertyOutput && !bindings.iter().any(|(n, _)| n == &p.name))
        .map(|p| Slot {
            name: format!("_{}_{}", handle, p.name),
            ty: p.ty,
            size: p.size,
            domain: slot_domain(p),
        })
        .collect();
    let connector = lowered
        .ports
        .iter()
        .find(|p| p.kind == PortKind::MainInput && p.size.is_some())
        .map(|p| Slot {
            name: format!("_bundle_connector_{}", id),
            ty: p.ty,
            size: p.size,
            domain: slot_domain(p),
        });

    let mut head = AtomHead::new(id, handle, atom_scope, loc);
    head.domain = domain;
    head.rate = call
        .and_then(|c| c.rate)
        .filter(|r| *r > 0.0)
        .or_else(|| block.rate());
    head.globals.merge(&lowered.scope.globals);
    for (_, b) in &bindings {
        head.globals.merge(&b.head.globals);
    }

    let atom = BodyAtom {
        flavor,
        block,
        body,
        depth: resolved.depth,
        ports: lowered.ports,
        bindings,
        scope: lowered.scope,
        consts: lowered.consts,
        inner,
        hoisted,
        output,
        scratch,
        connector,
        trigger,
    };
    let kind = match flavor {
        BodyFlavor::Module => AtomKind::Module(atom),
        BodyFlavor::Reaction => AtomKind::Reaction(atom),
        BodyFlavor::Loop => AtomKind::Loop(atom),
    };
    Ok(Atom { head, kind })
}

// ── Generated type ──────────────────────────────────────────────────────────

pub fn method_name(domain: &DomainKey) -> String {
    match domain {
        Some(d) => format!("process_{}", d),
        None => "process".to_string(),
    }
}

fn slot_element(slot: &Slot, scope: usize) -> Element {
    let kind = match slot.size {
        Some(size) => InstanceKind::Bundle { ty: slot.ty, size },
        None => InstanceKind::Scalar { ty: slot.ty },
    };
    Element::instance(&slot.name, kind, scope).in_domain(slot.domain.clone())
}

fn slot_tokens(slot: &Slot, emitter: &dyn CodeEmitter) -> Vec<String> {
    match slot.size {
        Some(size) => (0..size)
            .map(|i| emitter.bundle_index(&slot.name, &i.to_string()))
            .collect(),
        None => vec![slot.name.clone()],
    }
}

impl BodyAtom<'_> {
    /// One method per inner domain with code or ports; the loop has one.
    fn method_domains(&self) -> Vec<DomainKey> {
        if self.flavor == BodyFlavor::Loop {
            return vec![None];
        }
        let mut domains: IndexSet<DomainKey> = IndexSet::new();
        for (d, section) in &self.scope.sections {
            if !section.processing.is_empty() {
                domains.insert(d.clone());
            }
        }
        for p in &self.ports {
            if p.domain.is_some() {
                domains.insert(p.domain.clone());
            }
        }
        if domains.is_empty() {
            domains.insert(None);
        }
        domains.into_iter().collect()
    }

    /// Ports passed to the method of `domain`; unplaced ports go to all.
    fn method_ports(&self, domain: &DomainKey) -> Vec<&PortInfo> {
        self.ports
            .iter()
            .filter(|p| self.flavor == BodyFlavor::Loop || p.domain.is_none() || &p.domain == domain)
            .collect()
    }

    fn params(&self, domain: &DomainKey) -> Vec<Param> {
        self.method_ports(domain)
            .into_iter()
            .map(|p| Param {
                name: p.block.clone(),
                ty: p.ty,
                size: p.size,
                by_ref: p.kind.is_output(),
            })
            .collect()
    }

    fn processing_body(&self, domain: &DomainKey) -> String {
        self.scope
            .sections
            .get(domain)
            .map(|s| s.processing.concat())
            .unwrap_or_default()
    }

    fn declaration_code(&self, ctx: &LoweringContext<'_>) -> String {
        let e = ctx.emitter;
        let mut fields = String::new();
        let mut ctor = Ctor::default();
        for (name, value) in &self.consts {
            let ty = value.value_type();
            fields.push_str(&e.declare_scalar(name, ty));
            match self.flavor {
                BodyFlavor::Module => {
                    let param = format!("_{}", name);
                    ctor.body.push_str(&e.assign(name, &param, None));
                    ctor.params.push(Param {
                        name: param,
                        ty,
                        size: None,
                        by_ref: false,
                    });
                }
                _ => ctor.body.push_str(&e.assign(name, &e.literal(value), None)),
            }
        }
        if self.flavor == BodyFlavor::Module {
            for &id in &self.inner {
                let el = ctx.graph.get(id);
                if !el.enabled {
                    continue;
                }
                let (header, init) = render_element(e, el);
                fields.push_str(&header);
                ctor.body.push_str(&init);
            }
            for section in self.scope.sections.values() {
                fields.push_str(&section.header.concat());
                ctor.body.push_str(&section.init.concat());
            }
        }
        let methods: Vec<String> = match self.flavor {
            BodyFlavor::Loop => {
                let flag = self.body.terminate_when.clone().unwrap_or_default();
                let repeated: String = self
                    .scope
                    .sections
                    .values()
                    .flat_map(|s| s.processing.iter())
                    .cloned()
                    .collect();
                let mut code = e.assign(&flag, &e.literal(&Literal::Bool(false)), None);
                code.push_str(&e.while_loop(&e.unary(UnaryOp::LogicalNot, &flag), &repeated));
                vec![e.method("process", &self.params(&None), &code)]
            }
            _ => self
                .method_domains()
                .iter()
                .map(|d| e.method(&method_name(d), &self.params(d), &self.processing_body(d)))
                .collect(),
        };
        e.module_type(&self.block.name, &fields, &ctor, &methods)
    }

    fn fallback(&self, port: &PortInfo, emitter: &dyn CodeEmitter) -> String {
        let value = port.default.clone().unwrap_or_else(|| Literal::default_for(port.ty));
        emitter.literal(&value)
    }

    fn argument(
        &self,
        port: &PortInfo,
        head: &AtomHead,
        emitter: &dyn CodeEmitter,
        in_tokens: &[String],
        bound: &IndexMap<String, String>,
    ) -> String {
        match port.kind {
            PortKind::MainInput => match (&self.connector, in_tokens.first()) {
                (Some(c), _) => c.name.clone(),
                (None, Some(t)) => t.clone(),
                (None, None) => self.fallback(port, emitter),
            },
            PortKind::MainOutput => match &self.output {
                Some(slot) => slot.name.clone(),
                None => self.fallback(port, emitter),
            },
            PortKind::PropertyInput => bound
                .get(&port.name)
                .cloned()
                .unwrap_or_else(|| self.fallback(port, emitter)),
            PortKind::PropertyOutput => bound
                .get(&port.name)
                .cloned()
                .unwrap_or_else(|| format!("_{}_{}", head.handle, port.name)),
        }
    }
}

impl<'t> AtomBehavior<'t> for BodyAtom<'t> {
    fn elements(&mut self, head: &AtomHead, ctx: &mut LoweringContext<'t>) -> Result<AtomElements, LowerError> {
        let mut out = AtomElements::default();
        for (_, binding) in &mut self.bindings {
            out.extend(binding.collect_elements(ctx)?);
        }

        let code = self.declaration_code(ctx);
        let platform = Some(ctx.platform_domain().to_string());
        // A type declared inside a module body is a member of that body's
        // generated type, so it carries the depth of its declaring block.
        let decl = ctx
            .graph
            .add(Element::declaration(&self.block.name, code, self.depth).in_domain(platform));
        let type_name = self.block.name.clone();
        let kind = match self.flavor {
            BodyFlavor::Module => InstanceKind::Module {
                type_name,
                consts: self.consts.values().map(|v| ctx.emitter.literal(v)).collect(),
            },
            _ => InstanceKind::Reaction { type_name },
        };
        let inst = ctx
            .graph
            .add(Element::instance(&head.handle, kind, head.scope).in_domain(head.domain.clone()));
        ctx.graph.add_dependent(decl, inst);

        for &h in &self.hoisted {
            ctx.graph.add_dependent(h, decl);
            if ctx.graph.get(h).is_declaration() {
                out.declarations.push(h);
            } else {
                out.instances.push(h);
            }
        }
        out.declarations.push(decl);
        out.instances.push(inst);
        for slot in self.output.iter().chain(&self.scratch).chain(&self.connector) {
            out.instances.push(ctx.graph.add(slot_element(slot, head.scope)));
        }
        for (d, ids) in &self.scope.reads {
            out.reads.entry(d.clone()).or_default().extend(ids);
        }
        for (d, ids) in &self.scope.writes {
            out.writes.entry(d.clone()).or_default().extend(ids);
        }
        Ok(out)
    }

    fn header_code(&self, _head: &AtomHead, ctx: &LoweringContext<'t>) -> String {
        let mut code: String = self.bindings.iter().map(|(_, b)| b.header_code(ctx)).collect();
        if self.flavor != BodyFlavor::Module {
            for section in self.scope.sections.values() {
                code.push_str(&section.header.concat());
            }
        }
        code
    }

    fn initialization_code(&self, _head: &AtomHead, ctx: &mut LoweringContext<'t>, _in_tokens: &[String]) -> String {
        let mut code = String::new();
        for (_, binding) in &self.bindings {
            code.push_str(&binding.initialization_code(ctx, &[]));
        }
        if self.flavor != BodyFlavor::Module {
            for section in self.scope.sections.values() {
                code.push_str(&section.init.concat());
            }
        }
        code
    }

    fn preprocessing_code(&self, _head: &AtomHead, ctx: &LoweringContext<'t>, _in_tokens: &[String]) -> String {
        self.bindings
            .iter()
            .map(|(_, b)| b.preprocessing_code(ctx, &[]))
            .collect()
    }

    fn processing_code(
        &mut self,
        head: &AtomHead,
        ctx: &mut LoweringContext<'t>,
        in_tokens: &[String],
    ) -> Result<DomainCode, LowerError> {
        let e = ctx.emitter;
        let mut out = DomainCode::new();
        let mut bound: IndexMap<String, String> = IndexMap::new();
        for (port, binding) in &mut self.bindings {
            let code = binding.processing_code(ctx, &[])?;
            let token = first_token(&code).or_else(|| binding.handles(e).into_iter().next());
            for (d, (c, _)) in code {
                push_code(&mut out, d.or_else(|| head.domain.clone()), &c, Vec::new());
            }
            if let Some(t) = token {
                bound.insert(port.clone(), t);
            }
        }

        let mut prelude = String::new();
        if let Some(connector) = &self.connector {
            if !in_tokens.is_empty() {
                for (i, slot) in slot_tokens(connector, e).iter().enumerate() {
                    prelude.push_str(&e.assign(slot, &in_tokens[i % in_tokens.len()], None));
                }
            }
        }

        let mut calls: IndexMap<DomainKey, String> = IndexMap::new();
        for d in self.method_domains() {
            let args: Vec<String> = self
                .method_ports(&d)
                .into_iter()
                .map(|p| self.argument(p, head, e, in_tokens, &bound))
                .collect();
            let call = e.expression_statement(&e.call(&head.handle, &method_name(&d), &args));
            let target = d.or_else(|| head.domain.clone());
            calls.entry(target).or_insert_with(|| prelude.clone()).push_str(&call);
        }

        for (d, code) in calls {
            let code = match (self.flavor, &self.trigger, in_tokens.first()) {
                (BodyFlavor::Reaction, Some(Literal::Bool(false)), _) => continue,
                (BodyFlavor::Reaction, Some(Literal::Bool(true)), _) | (BodyFlavor::Reaction, _, None) => code,
                (BodyFlavor::Reaction, _, Some(trigger)) => e.conditional(trigger, &code),
                _ => code,
            };
            push_code(&mut out, d, &code, Vec::new());
        }

        if let Some(slot) = &self.output {
            push_code(&mut out, slot.domain.clone(), "", slot_tokens(slot, e));
        }
        Ok(out)
    }

    fn handles(&self, head: &AtomHead, emitter: &dyn CodeEmitter) -> Vec<String> {
        match &self.output {
            Some(slot) => slot_tokens(slot, emitter),
            None => vec![head.handle.clone()],
        }
    }

    fn properties(&self, head: &AtomHead) -> IndexMap<String, Literal> {
        let mut props = IndexMap::new();
        if let Some(size) = self.output.as_ref().and_then(|s| s.size) {
            props.insert("size".to_string(), Literal::Real(size as f64));
        }
        if let Some(d) = self.output.as_ref().and_then(|s| s.domain.clone()).or_else(|| head.domain.clone()) {
            props.insert("domain".to_string(), Literal::Str(d));
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::LowerOptions;
    use crate::emitter::CppEmitter;
    use crate::graph::ElementKind;
    use crate::tree::Program;

    const GAIN: &str = r#"{"block": {"name": "Gain", "type": "module",
        "blocks": [
            {"name": "In", "type": "signal", "default": 0.0},
            {"name": "Out", "type": "signal", "default": 0.0},
            {"name": "Amount", "type": "signal", "default": 0.5},
            {"name": "Scaled", "type": "signal", "default": 0.0}
        ],
        "ports": [
            {"name": "Input", "type": "mainInput", "block": "In"},
            {"name": "Output", "type": "mainOutput", "block": "Out"},
            {"name": "Amount", "type": "propertyInput", "block": "Amount"}
        ],
        "streams": [{"members": [
            {"expression": {"type": "Multiply", "left": {"name": {"name": "In"}},
                                                 "right": {"name": {"name": "Amount"}}}},
            {"name": {"name": "Out"}}
        ]}]}}"#;

    fn program(extra: &str) -> Program {
        Program::from_json(&format!(
            r#"{{"platform": {{"domain": "Audio"}}, "nodes": [
                {{"block": {{"name": "Osc", "type": "signal", "domain": "Audio", "default": 0.0}}}},
                {{"block": {{"name": "Spk", "type": "signal", "domain": "Audio", "default": 0.0}}}},
                {}, {}]}}"#,
            GAIN, extra
        ))
        .expect("tree")
    }

    fn call(json: &str) -> Member {
        serde_json::from_str(json).expect("member")
    }

    #[test]
    fn module_call_generates_type_instance_and_output() {
        let p = program(r#"{"block": {"name": "Unused", "type": "signal"}}"#);
        let osc = call(r#"{"name": {"name": "Osc"}}"#);
        let gain = call(r#"{"function": {"name": "Gain", "ports": [{"name": "Amount", "value": {"value": 2.0}}]}}"#);
        let spk = call(r#"{"name": {"name": "Spk"}}"#);
        let mut ctx = LoweringContext::new(&p, &CppEmitter, &LowerOptions::default()).expect("ctx");
        let loc = SourceLoc::default();
        let prev = factory::make_atom(&mut ctx, &osc, None, Some(&gain), &loc).expect("osc");
        let mut atom = factory::make_atom(&mut ctx, &gain, Some(&prev), Some(&spk), &loc).expect("gain");
        assert_eq!(atom.kind_name(), "module");
        assert_eq!(ctx.scope_index(), 0);
        assert!(ctx.parents.is_empty());

        let els = atom.collect_elements(&mut ctx).expect("elements");
        let decl = ctx.graph.get(*els.declarations.last().expect("declaration"));
        let ElementKind::Declaration { code } = &decl.kind else {
            panic!("expected a declaration");
        };
        assert!(code.starts_with("class Gain {\npublic:\n"));
        assert!(code.contains("void process(float In, float &Out, float Amount)"));
        assert!(code.contains("Out = (In * Amount);\n"));

        let processed = atom.processing_code(&mut ctx, &["Osc".to_string()]).expect("code");
        let (code, tokens) = &processed[&None];
        assert_eq!(code, "Gain_001.process(Osc, _Gain_001_out, 2.0);\n");
        assert_eq!(tokens, &vec!["_Gain_001_out".to_string()]);
    }

    #[test]
    fn unknown_port_in_call_is_unresolved() {
        let p = program(r#"{"block": {"name": "Unused", "type": "signal"}}"#);
        let gain = call(r#"{"function": {"name": "Gain", "ports": [{"name": "Bogus", "value": {"value": 1.0}}]}}"#);
        let mut ctx = LoweringContext::new(&p, &CppEmitter, &LowerOptions::default()).expect("ctx");
        let err = factory::make_atom(&mut ctx, &gain, None, None, &SourceLoc::default()).err();
        assert!(matches!(err, Some(LowerError::UnresolvedReference { name, .. }) if name == "Gain.Bogus"));
    }

    #[test]
    fn reaction_with_false_trigger_emits_nothing() {
        let p = program(
            r#"{"block": {"name": "OnHit", "type": "reaction",
                "blocks": [{"name": "Count", "type": "signal", "default": 0.0}],
                "ports": [],
                "streams": [{"members": [{"value": 1.0}, {"name": {"name": "Count"}}]}]}}"#,
        );
        let trigger = call(r#"{"value": false}"#);
        let reaction = call(r#"{"name": {"name": "OnHit"}}"#);
        let mut ctx = LoweringContext::new(&p, &CppEmitter, &LowerOptions::default()).expect("ctx");
        let loc = SourceLoc::default();
        let prev = factory::make_atom(&mut ctx, &trigger, None, Some(&reaction), &loc).expect("value");
        let mut atom = factory::make_atom(&mut ctx, &reaction, Some(&prev), None, &loc).expect("reaction");
        assert!(ctx.diagnostics.iter().any(|d| d.code == Some(codes::W0202)));
        let els = atom.collect_elements(&mut ctx).expect("elements");
        assert!(els
            .instances
            .iter()
            .any(|&id| ctx.graph.get(id).name == "Count" && ctx.graph.get(id).scope == 0));
        let code = atom.processing_code(&mut ctx, &["false".to_string()]).expect("code");
        assert!(code.values().all(|(c, _)| c.is_empty()));
    }

    #[test]
    fn reaction_runs_under_trigger_token() {
        let p = program(
            r#"{"block": {"name": "OnHit", "type": "reaction",
                "blocks": [{"name": "Count", "type": "signal", "default": 0.0}],
                "ports": [],
                "streams": [{"members": [{"value": 1.0}, {"name": {"name": "Count"}}]}]}}"#,
        );
        let reaction = call(r#"{"name": {"name": "OnHit"}}"#);
        let mut ctx = LoweringContext::new(&p, &CppEmitter, &LowerOptions::default()).expect("ctx");
        let mut atom = factory::make_atom(&mut ctx, &reaction, None, None, &SourceLoc::default()).expect("reaction");
        atom.collect_elements(&mut ctx).expect("elements");
        let code = atom.processing_code(&mut ctx, &["Hit".to_string()]).expect("code");
        assert_eq!(code[&None].0, "if (Hit) {\n    OnHit_000.process();\n}\n");
    }

    #[test]
    fn loop_materializes_flag_and_collapses_body() {
        let p = program(
            r#"{"block": {"name": "Fill", "type": "loop", "terminateWhen": "Done",
                "blocks": [{"name": "Done", "type": "switch", "default": false},
                           {"name": "Acc", "type": "signal", "default": 0.0}],
                "ports": [],
                "streams": [{"members": [{"value": 1.0}, {"name": {"name": "Acc"}}]}]}}"#,
        );
        let l = call(r#"{"name": {"name": "Fill"}}"#);
        let mut ctx = LoweringContext::new(&p, &CppEmitter, &LowerOptions::default()).expect("ctx");
        let mut atom = factory::make_atom(&mut ctx, &l, None, None, &SourceLoc::default()).expect("loop");
        assert_eq!(atom.head.domain, None);
        let els = atom.collect_elements(&mut ctx).expect("elements");
        let done = els
            .instances
            .iter()
            .map(|&id| ctx.graph.get(id))
            .find(|el| el.name == "Done")
            .expect("flag hoisted");
        assert_eq!(done.kind, ElementKind::Instance(InstanceKind::Scalar { ty: ValueType::Bool }));
        let decl = ctx.graph.get(*els.declarations.last().expect("declaration"));
        let ElementKind::Declaration { code } = &decl.kind else {
            panic!("expected a declaration");
        };
        assert!(code.contains("Done = false;\n        while ((!Done)) {\n"));
        let code = atom.processing_code(&mut ctx, &[]).expect("code");
        assert_eq!(code[&None].0, "Fill_000.process();\n");
    }

    fn body_of<'a, 't>(atom: &'a Atom<'t>) -> &'a BodyAtom<'t> {
        match &atom.kind {
            AtomKind::Module(b) | AtomKind::Reaction(b) | AtomKind::Loop(b) => b,
            _ => panic!("expected a module-like atom"),
        }
    }

    #[test]
    fn port_block_instances_are_disabled() {
        let p = program(r#"{"block": {"name": "Unused", "type": "signal"}}"#);
        let gain = call(r#"{"function": {"name": "Gain", "ports": []}}"#);
        let mut ctx = LoweringContext::new(&p, &CppEmitter, &LowerOptions::default()).expect("ctx");
        let atom = factory::make_atom(&mut ctx, &gain, None, None, &SourceLoc::default()).expect("gain");
        let body = body_of(&atom);
        for port_block in ["In", "Out", "Amount"] {
            let el = body
                .inner
                .iter()
                .map(|&id| ctx.graph.get(id))
                .find(|el| el.name == port_block)
                .unwrap_or_else(|| panic!("{} should be an inner element", port_block));
            assert!(!el.enabled, "{} should be suppressed", port_block);
        }
        assert!(body.hoisted.is_empty());
    }

    #[test]
    fn module_keeps_inner_elements_and_hoists_outer_ones() {
        let p = program(
            r#"{"block": {"name": "Tap", "type": "module",
                "blocks": [{"name": "In", "type": "signal", "default": 0.0},
                           {"name": "Held", "type": "signal", "default": 0.0}],
                "ports": [{"name": "Input", "type": "mainInput", "block": "In"}],
                "streams": [{"members": [{"name": {"name": "In"}}, {"name": {"name": "Held"}},
                                         {"name": {"name": "Spk"}}]}]}}"#,
        );
        let osc = call(r#"{"name": {"name": "Osc"}}"#);
        let tap = call(r#"{"function": {"name": "Tap", "ports": []}}"#);
        let mut ctx = LoweringContext::new(&p, &CppEmitter, &LowerOptions::default()).expect("ctx");
        let loc = SourceLoc::default();
        let prev = factory::make_atom(&mut ctx, &osc, None, Some(&tap), &loc).expect("osc");
        let mut atom = factory::make_atom(&mut ctx, &tap, Some(&prev), None, &loc).expect("tap");

        let (inner, hoisted) = {
            let body = body_of(&atom);
            let names = |ids: &[ElementId]| -> Vec<String> {
                ids.iter().map(|&id| ctx.graph.get(id).name.clone()).collect()
            };
            (names(&body.inner), body.hoisted.clone())
        };
        assert!(inner.contains(&"Held".to_string()));
        assert!(!inner.contains(&"Spk".to_string()));
        assert_eq!(hoisted.len(), 1);
        assert_eq!(ctx.graph.get(hoisted[0]).name, "Spk");
        assert_eq!(ctx.graph.get(hoisted[0]).scope, 0);

        let els = atom.collect_elements(&mut ctx).expect("elements");
        let decl = *els.declarations.last().expect("declaration");
        assert!(ctx.graph.dependents(hoisted[0]).contains(&decl));
        let ElementKind::Declaration { code } = &ctx.graph.get(decl).kind else {
            panic!("expected a declaration");
        };
        assert!(code.contains("float Held;\n"));
        assert!(!code.contains("float Spk;\n"));
    }

    #[test]
    fn reaction_hoists_every_body_element() {
        let p = program(
            r#"{"block": {"name": "OnHit", "type": "reaction",
                "blocks": [{"name": "Count", "type": "signal", "default": 0.0}],
                "ports": [],
                "streams": [{"members": [{"value": 1.0}, {"name": {"name": "Count"}}]}]}}"#,
        );
        let reaction = call(r#"{"name": {"name": "OnHit"}}"#);
        let mut ctx = LoweringContext::new(&p, &CppEmitter, &LowerOptions::default()).expect("ctx");
        let atom = factory::make_atom(&mut ctx, &reaction, None, None, &SourceLoc::default()).expect("reaction");
        let body = body_of(&atom);
        assert!(body.inner.is_empty());
        assert!(body
            .hoisted
            .iter()
            .all(|&id| ctx.graph.get(id).scope == 0));
    }

    #[test]
    fn nested_module_type_stays_inside_its_parent_type() {
        let p = program(
            r#"{"block": {"name": "Outer", "type": "module",
                "blocks": [
                    {"name": "In", "type": "signal", "default": 0.0},
                    {"name": "Out", "type": "signal", "default": 0.0},
                    {"name": "Inner", "type": "module",
                     "blocks": [{"name": "X", "type": "signal", "default": 0.0},
                                {"name": "Y", "type": "signal", "default": 0.0}],
                     "ports": [{"name": "Input", "type": "mainInput", "block": "X"},
                               {"name": "Output", "type": "mainOutput", "block": "Y"}],
                     "streams": [{"members": [{"name": {"name": "X"}}, {"name": {"name": "Y"}}]}]}
                ],
                "ports": [{"name": "Input", "type": "mainInput", "block": "In"},
                          {"name": "Output", "type": "mainOutput", "block": "Out"}],
                "streams": [{"members": [{"name": {"name": "In"}},
                                         {"function": {"name": "Inner", "ports": []}},
                                         {"name": {"name": "Out"}}]}]}}"#,
        );
        let outer = call(r#"{"function": {"name": "Outer", "ports": []}}"#);
        let mut ctx = LoweringContext::new(&p, &CppEmitter, &LowerOptions::default()).expect("ctx");
        let mut atom = factory::make_atom(&mut ctx, &outer, None, None, &SourceLoc::default()).expect("outer");
        let inner_type = body_of(&atom)
            .inner
            .iter()
            .map(|&id| ctx.graph.get(id))
            .find(|el| el.name == "Inner" && el.is_declaration())
            .expect("inner type kept inside");
        assert_eq!(inner_type.scope, 1);

        let els = atom.collect_elements(&mut ctx).expect("elements");
        assert_eq!(els.declarations.len(), 1);
        let ElementKind::Declaration { code } = &ctx.graph.get(els.declarations[0]).kind else {
            panic!("expected a declaration");
        };
        assert!(code.starts_with("class Outer {"));
        assert!(code.contains("class Inner {"));
    }
}
