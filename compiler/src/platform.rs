// platform.rs — PlatformType atoms: opaque platform-native operations
//
// A `platformBlock` or `platformModule` is a type supplied by the target
// platform. Its class text is either given verbatim (`declaration`) or
// generated around the native processing snippet as a `process` method
// taking `Input_0..Input_{n-1}`. Each use becomes one instance, and the
// out token is the call `handle.process(inputs)`.
//
// Preconditions: the block was resolved through the scope stack.
// Postconditions: one declaration per type (deduplicated by name) and one
//   instance per use.
// Failure modes: resolving a non-platform block here is `UnsupportedType`.
// Side effects: none.

use indexmap::IndexMap;

use crate::atom::{push_code, Atom, AtomBehavior, AtomElements, AtomHead, AtomKind, DomainCode, GlobalGroups};
use crate::context::LoweringContext;
use crate::emitter::{real_literal, CodeEmitter, Ctor, Param};
use crate::error::LowerError;
use crate::factory;
use crate::graph::{Element, InstanceKind};
use crate::scope::Resolved;
use crate::snippet::{input_arity, substitute, with_newline, writes_output, SnippetArgs};
use crate::tree::{Block, BlockKind, DomainKey, Literal, Member, PlatformPorts, SourceLoc, ValueType};

const OUTPUT: &str = "Output";
const INDEX_PARAM: &str = "_index";

pub struct PlatformAtom<'t> {
    pub block: &'t Block,
    pub ports: &'t PlatformPorts,
    pub depth: usize,
    /// Rendered 0-based index when the type is accessed as a bundle.
    pub index: Option<String>,
    /// Domain of the producer feeding this atom.
    pub reads: DomainKey,
    /// Domain of the member consuming the result.
    pub writes: DomainKey,
}

pub fn build<'t>(
    ctx: &mut LoweringContext<'t>,
    resolved: Resolved<'t>,
    index: Option<String>,
    previous: Option<&Atom<'t>>,
    next: Option<&'t Member>,
    loc: SourceLoc,
) -> Result<Atom<'t>, LowerError> {
    let block = resolved.block;
    let ports = match &block.kind {
        BlockKind::PlatformBlock(p) | BlockKind::PlatformModule(p) => p,
        _ => {
            return Err(LowerError::UnsupportedType {
                what: "platform type",
                name: block.name.clone(),
                loc,
            })
        }
    };
    let id = ctx.ids.alloc_atom();
    let reads = previous.and_then(|a| a.head.domain.clone());
    let writes = next.and_then(|m| factory::member_domain(ctx, m));

    let mut head = AtomHead::new(id, format!("{}_{}", block.name, id), ctx.scope_index(), loc);
    head.domain = ctx
        .resolve_domain(ports.domain.as_ref())
        .or_else(|| reads.clone())
        .or_else(|| writes.clone());
    head.rate = block.rate();
    head.globals = GlobalGroups::from_native(&ports.native);

    Ok(Atom {
        head,
        kind: AtomKind::PlatformType(PlatformAtom {
            block,
            ports,
            depth: resolved.depth,
            index,
            reads,
            writes,
        }),
    })
}

impl PlatformAtom<'_> {
    fn arity(&self) -> usize {
        let native = &self.ports.native;
        let used = native.processing.as_deref().map_or(0, input_arity);
        native.inputs.len().max(used)
    }

    fn returns_value(&self) -> bool {
        !self.ports.native.outputs.is_empty()
    }

    fn declaration_code(&self, emitter: &dyn CodeEmitter) -> String {
        if let Some(text) = &self.ports.declaration {
            return with_newline(text.clone());
        }
        let native = &self.ports.native;
        let inputs: Vec<String> = (0..self.arity()).map(|i| format!("Input_{}", i)).collect();
        let mut params: Vec<Param> = inputs
            .iter()
            .map(|name| Param {
                name: name.clone(),
                ty: ValueType::Real,
                size: None,
                by_ref: false,
            })
            .collect();
        if self.index.is_some() {
            params.push(Param {
                name: INDEX_PARAM.to_string(),
                ty: ValueType::Int,
                size: None,
                by_ref: false,
            });
        }

        let snippet = native.processing.as_deref().unwrap_or_default();
        let outputs = vec![OUTPUT.to_string()];
        let code = substitute(
            snippet,
            SnippetArgs {
                inputs: &inputs,
                outputs: &outputs,
                bundle_index: self.index.as_ref().map(|_| INDEX_PARAM),
            },
        )
        .code;

        let method = if !self.returns_value() {
            emitter.method("process", &params, &with_newline(code))
        } else if writes_output(snippet) {
            let mut body = emitter.declare_scalar(OUTPUT, ValueType::Real);
            body.push_str(&with_newline(code));
            body.push_str(&emitter.return_value(OUTPUT));
            emitter.value_method("process", ValueType::Real, &params, &body)
        } else {
            let expr = code.trim_end().trim_end_matches(';');
            emitter.value_method("process", ValueType::Real, &params, &emitter.return_value(expr))
        };
        let ctor = Ctor {
            params: Vec::new(),
            body: native
                .initializations
                .iter()
                .map(|i| with_newline(i.clone()))
                .collect(),
        };
        emitter.module_type(&self.block.name, "", &ctor, &[method])
    }

    fn arguments(&self, in_tokens: &[String]) -> Vec<String> {
        let mut args: Vec<String> = (0..self.arity())
            .map(|i| in_tokens.get(i).cloned().unwrap_or_else(|| real_literal(0.0)))
            .collect();
        if let Some(index) = &self.index {
            args.push(index.clone());
        }
        args
    }
}

impl<'t> AtomBehavior<'t> for PlatformAtom<'t> {
    fn elements(&mut self, head: &AtomHead, ctx: &mut LoweringContext<'t>) -> Result<AtomElements, LowerError> {
        let code = self.declaration_code(ctx.emitter);
        let platform = Some(ctx.platform_domain().to_string());
        let decl = ctx
            .graph
            .add(Element::declaration(&self.block.name, code, self.depth).in_domain(platform));
        let kind = InstanceKind::Module {
            type_name: self.block.name.clone(),
            consts: Vec::new(),
        };
        let instance = Element::instance(&head.handle, kind, head.scope)
            .in_domain(head.domain.clone())
            .with_access(
                self.reads.iter().cloned().collect(),
                self.writes.iter().cloned().collect(),
            );
        let inst = ctx.graph.add(instance);
        ctx.graph.add_dependent(decl, inst);
        Ok(AtomElements {
            declarations: vec![decl],
            instances: vec![inst],
            ..AtomElements::default()
        })
    }

    fn preprocessing_code(&self, _head: &AtomHead, _ctx: &LoweringContext<'t>, _in_tokens: &[String]) -> String {
        self.ports
            .native
            .pre_processing
            .clone()
            .map(with_newline)
            .unwrap_or_default()
    }

    fn processing_code(
        &mut self,
        head: &AtomHead,
        ctx: &mut LoweringContext<'t>,
        in_tokens: &[String],
    ) -> Result<DomainCode, LowerError> {
        let e = ctx.emitter;
        let call = e.call(&head.handle, "process", &self.arguments(in_tokens));
        let mut out = DomainCode::new();
        if self.returns_value() {
            push_code(&mut out, head.domain.clone(), "", vec![call]);
        } else {
            push_code(&mut out, head.domain.clone(), &e.expression_statement(&call), Vec::new());
        }
        Ok(out)
    }

    fn postprocessing_code(&self, _head: &AtomHead, _ctx: &LoweringContext<'t>, _in_tokens: &[String]) -> String {
        self.ports
            .native
            .post_processing
            .clone()
            .map(with_newline)
            .unwrap_or_default()
    }

    fn properties(&self, head: &AtomHead) -> IndexMap<String, Literal> {
        let mut props = IndexMap::new();
        if let Some(d) = head.domain.clone() {
            props.insert("domain".to_string(), Literal::Str(d));
        }
        props
    }
}
