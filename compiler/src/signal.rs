// signal.rs — Name and Bundle atoms: references to storage blocks
//
// A Name atom refers to a whole `signal`, `constant`, `switch`, `trigger`
// or `signalbridge` block; a Bundle atom to one element of a sized block.
// Both materialize the block's storage as one instance at the block's
// declaring depth. Signal bridges carry values between domains: their cell
// is named after both endpoint domains, written in the input domain and
// read in the output domain.
//
// Preconditions: the block was resolved through the scope stack.
// Postconditions: one storage element per atom, deduplicated by name later.
// Failure modes: none beyond what the factory checks.
// Side effects: may warn W0101 for missing defaults.

use indexmap::IndexMap;

use crate::atom::{push_code, Atom, AtomBehavior, AtomElements, AtomHead, AtomKind, DomainCode, GlobalGroups};
use crate::context::LoweringContext;
use crate::diag::codes;
use crate::emitter::CodeEmitter;
use crate::error::LowerError;
use crate::graph::{Element, InstanceKind};
use crate::rate::bridge_handle;
use crate::scope::{block_properties, Resolved};
use crate::snippet::{substitute, with_newline, SnippetArgs};
use crate::tree::{Block, BlockKind, DomainKey, Literal, NativeCode, SourceLoc};

pub struct SignalAtom<'t> {
    pub block: &'t Block,
    /// Depth of the frame that declared the block.
    pub depth: usize,
    /// Rendered 0-based index for bundle access.
    pub index: Option<String>,
    /// `(input, output)` domains of a signal bridge.
    pub bridge: Option<(DomainKey, DomainKey)>,
}

/// Build a Name (`index == None`) or Bundle atom for a storage block.
pub fn build<'t>(
    ctx: &mut LoweringContext<'t>,
    resolved: Resolved<'t>,
    index: Option<String>,
    has_previous: bool,
    loc: SourceLoc,
) -> Result<Atom<'t>, LowerError> {
    let block = resolved.block;
    let id = ctx.ids.alloc_atom();
    let (handle, domain, bridge) = match &block.kind {
        BlockKind::SignalBridge(ports) => {
            let input = ctx.resolve_domain(ports.input_domain.as_ref());
            let output = ctx.resolve_domain(ports.output_domain.as_ref());
            let handle = bridge_handle(&block.name, &input, &output);
            let domain = if has_previous { input.clone() } else { output.clone() };
            (handle, domain, Some((input, output)))
        }
        BlockKind::Signal(_) | BlockKind::Constant(_) | BlockKind::Switch(_) | BlockKind::Trigger(_) => {
            (block.name.clone(), ctx.resolve_domain(block.domain_ref()), None)
        }
        _ => {
            return Err(LowerError::UnsupportedType {
                what: "signal reference",
                name: block.name.clone(),
                loc,
            })
        }
    };
    let mut head = AtomHead::new(id, handle, ctx.scope_index(), loc);
    head.domain = domain;
    head.rate = block.rate();
    if let Some(native) = block.native() {
        head.globals = GlobalGroups::from_native(native);
        head.inline = native.processing.is_some() && !native.outputs.is_empty();
    }
    let atom = SignalAtom {
        block,
        depth: resolved.depth,
        index,
        bridge,
    };
    let kind = if atom.index.is_some() {
        AtomKind::Bundle(atom)
    } else {
        AtomKind::Name(atom)
    };
    Ok(Atom { head, kind })
}

impl SignalAtom<'_> {
    fn native(&self) -> Option<&NativeCode> {
        self.block.native()
    }

    /// Token naming the storage this atom reads or writes.
    fn target(&self, head: &AtomHead, emitter: &dyn CodeEmitter) -> String {
        match &self.index {
            Some(i) => emitter.bundle_index(&head.handle, i),
            None => head.handle.clone(),
        }
    }

    /// Whole-bundle references address every element.
    fn whole_bundle(&self) -> Option<usize> {
        match self.index {
            None => self.block.size,
            Some(_) => None,
        }
    }

    fn snippet(&self, snippet: &str, head: &AtomHead, emitter: &dyn CodeEmitter, in_tokens: &[String]) -> String {
        let outputs = vec![self.target(head, emitter)];
        let s = substitute(
            snippet,
            SnippetArgs {
                inputs: in_tokens,
                outputs: &outputs,
                bundle_index: self.index.as_deref(),
            },
        );
        if !s.missing_inputs.is_empty() {
            log::debug!(
                "signal: '{}' snippet left inputs {:?} unfilled",
                self.block.name,
                s.missing_inputs
            );
        }
        s.code
    }

    fn storage_domain(&self, head: &AtomHead) -> DomainKey {
        match &self.bridge {
            Some((input, _)) => input.clone(),
            None => head.domain.clone(),
        }
    }

    fn access_lists(&self) -> (Vec<String>, Vec<String>) {
        match (&self.block.kind, &self.bridge) {
            (_, Some((input, output))) => (
                output.iter().cloned().collect(),
                input.iter().cloned().collect(),
            ),
            (BlockKind::Signal(p) | BlockKind::Switch(p) | BlockKind::Trigger(p), None) => {
                (p.reads.clone(), p.writes.clone())
            }
            _ => (Vec::new(), Vec::new()),
        }
    }
}

impl<'t> AtomBehavior<'t> for SignalAtom<'t> {
    fn elements(&mut self, head: &AtomHead, ctx: &mut LoweringContext<'t>) -> Result<AtomElements, LowerError> {
        let ty = self.block.value_type();
        let default = match self.block.default_value() {
            Some(v) => v.clone(),
            None => {
                let fallback = Literal::default_for(ty);
                if ctx.first_time(format!("default:{}", head.handle)) {
                    ctx.warn(
                        codes::W0101,
                        head.loc.clone(),
                        format!(
                            "{} '{}' has no default value; using {}",
                            self.block.kind_name(),
                            self.block.name,
                            ctx.emitter.literal(&fallback)
                        ),
                    );
                }
                fallback
            }
        };
        let values = default.elements();
        let (kind, init) = match self.block.size {
            Some(size) => {
                let fill = Literal::default_for(ty);
                let init = (0..size)
                    .map(|i| match values.is_empty() {
                        true => ctx.emitter.literal(&fill),
                        false => ctx.emitter.literal(values[i % values.len()]),
                    })
                    .collect();
                (InstanceKind::Bundle { ty, size }, init)
            }
            None => (InstanceKind::Scalar { ty }, vec![ctx.emitter.literal(&default)]),
        };
        let (reads, writes) = self.access_lists();
        let mut element = Element::instance(&head.handle, kind, self.depth)
            .in_domain(self.storage_domain(head))
            .with_init(init)
            .with_access(reads, writes);
        element.bridge = self.bridge.is_some();
        let mut out = AtomElements::default();
        out.instances.push(ctx.graph.add(element));
        Ok(out)
    }

    fn initialization_code(&self, head: &AtomHead, ctx: &mut LoweringContext<'t>, in_tokens: &[String]) -> String {
        let Some(native) = self.native() else {
            return String::new();
        };
        if native.initializations.is_empty() || !ctx.first_time(format!("init:{}", self.block.name)) {
            return String::new();
        }
        native
            .initializations
            .iter()
            .map(|s| with_newline(self.snippet(s, head, ctx.emitter, in_tokens)))
            .collect()
    }

    fn preprocessing_code(&self, head: &AtomHead, ctx: &LoweringContext<'t>, in_tokens: &[String]) -> String {
        self.native()
            .and_then(|n| n.pre_processing.as_deref())
            .map(|s| with_newline(self.snippet(s, head, ctx.emitter, in_tokens)))
            .unwrap_or_default()
    }

    fn processing_code(
        &mut self,
        head: &AtomHead,
        ctx: &mut LoweringContext<'t>,
        in_tokens: &[String],
    ) -> Result<DomainCode, LowerError> {
        let emitter = ctx.emitter;
        let target = self.target(head, emitter);
        let (code, tokens) = match self.native().and_then(|n| n.processing.as_deref()) {
            Some(snippet) if head.inline => {
                let expr = self.snippet(snippet, head, emitter, in_tokens);
                (String::new(), vec![expr.trim_end().trim_end_matches(';').to_string()])
            }
            Some(snippet) => (
                with_newline(self.snippet(snippet, head, emitter, in_tokens)),
                vec![target],
            ),
            None => match self.whole_bundle() {
                Some(size) => {
                    let tokens: Vec<String> = (0..size)
                        .map(|i| emitter.bundle_index(&head.handle, &i.to_string()))
                        .collect();
                    let code = if in_tokens.is_empty() {
                        String::new()
                    } else {
                        tokens
                            .iter()
                            .enumerate()
                            .map(|(i, t)| emitter.assign(t, &in_tokens[i % in_tokens.len()], None))
                            .collect()
                    };
                    (code, tokens)
                }
                None => {
                    let code = in_tokens
                        .first()
                        .map(|t| emitter.assign(&target, t, None))
                        .unwrap_or_default();
                    (code, vec![target])
                }
            },
        };
        let mut out = DomainCode::new();
        match &self.bridge {
            Some((input, output)) => {
                push_code(&mut out, input.clone(), &code, Vec::new());
                push_code(&mut out, output.clone(), "", tokens);
            }
            None => push_code(&mut out, head.domain.clone(), &code, tokens),
        }
        Ok(out)
    }

    fn postprocessing_code(&self, head: &AtomHead, ctx: &LoweringContext<'t>, in_tokens: &[String]) -> String {
        self.native()
            .and_then(|n| n.post_processing.as_deref())
            .map(|s| with_newline(self.snippet(s, head, ctx.emitter, in_tokens)))
            .unwrap_or_default()
    }

    fn preprocessing_once(&self, head: &AtomHead, ctx: &LoweringContext<'t>) -> Vec<(String, String)> {
        self.native()
            .and_then(|n| n.pre_processing_once.as_deref())
            .map(|s| vec![(self.block.name.clone(), with_newline(self.snippet(s, head, ctx.emitter, &[])))])
            .unwrap_or_default()
    }

    fn postprocessing_once(&self, head: &AtomHead, ctx: &LoweringContext<'t>) -> Vec<(String, String)> {
        self.native()
            .and_then(|n| n.post_processing_once.as_deref())
            .map(|s| vec![(self.block.name.clone(), with_newline(self.snippet(s, head, ctx.emitter, &[])))])
            .unwrap_or_default()
    }

    fn handles(&self, head: &AtomHead, emitter: &dyn CodeEmitter) -> Vec<String> {
        match self.whole_bundle() {
            Some(size) => (0..size)
                .map(|i| emitter.bundle_index(&head.handle, &i.to_string()))
                .collect(),
            None => vec![self.target(head, emitter)],
        }
    }

    fn properties(&self, head: &AtomHead) -> IndexMap<String, Literal> {
        let mut props = block_properties(self.block);
        if self.index.is_some() {
            props.shift_remove("size");
        }
        if let Some(d) = &head.domain {
            props.insert("domain".to_string(), Literal::Str(d.clone()));
        }
        props
    }
}
