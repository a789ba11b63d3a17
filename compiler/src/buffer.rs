// buffer.rs — Buffer atoms: ring-buffer endpoints between domains
//
// A buffer decouples a writer domain from a reader domain with no rate
// relationship between them. The writer is the previous atom's domain and
// pushes with `write`; the reader is the next member's domain and pulls
// with `read` (scalar), `copy` (whole bundle) or one `read` per list
// element. A literal feeding the buffer is written once at initialization.
//
// Preconditions: the buffer's internal type names a `ringBufferType`.
// Postconditions: elements are the ring-buffer class, the buffer instance
//   and the reader's output cell.
// Failure modes: internal type missing or of another kind.
// Side effects: none.

use crate::atom::{push_code, Atom, AtomBehavior, AtomElements, AtomHead, AtomKind, DomainCode};
use crate::context::LoweringContext;
use crate::emitter::CodeEmitter;
use crate::error::LowerError;
use crate::factory;
use crate::graph::{Element, InstanceKind};
use crate::scope::Resolved;
use crate::tree::{Block, BlockKind, BufferPorts, DomainKey, Literal, Member, RingBufferPorts, SourceLoc, ValueType};

/// How the reader side consumes the buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum ReaderShape {
    /// No reader follows the buffer.
    None,
    Scalar,
    /// A sized reader receives the whole buffer at once.
    Bundle(usize),
    /// A list reader takes one read per element.
    List(Vec<String>),
}

pub struct BufferAtom<'t> {
    pub block: &'t Block,
    pub ports: &'t BufferPorts,
    pub class: &'t RingBufferPorts,
    /// Depth of the scope declaring the ring-buffer type.
    pub class_depth: usize,
    pub depth: usize,
    pub size: usize,
    /// `Some` when an atom feeds the buffer.
    pub writer: Option<DomainKey>,
    pub reader: DomainKey,
    pub shape: ReaderShape,
    /// Literal written once instead of on every activation.
    pub constant_input: Option<Literal>,
}

pub fn build<'t>(
    ctx: &mut LoweringContext<'t>,
    resolved: Resolved<'t>,
    previous: Option<&Atom<'t>>,
    next: Option<&'t Member>,
    loc: SourceLoc,
) -> Result<Atom<'t>, LowerError> {
    let block = resolved.block;
    let BlockKind::Buffer(ports) = &block.kind else {
        return Err(LowerError::UnsupportedType {
            what: "buffer",
            name: block.name.clone(),
            loc,
        });
    };
    let class_ref = ctx.resolve(&ports.internal_type, &loc)?;
    let class_depth = class_ref.depth;
    let class = match class_ref.block {
        Block {
            kind: BlockKind::RingBufferType(class),
            ..
        } => class,
        _ => {
            return Err(LowerError::UnsupportedType {
                what: "ring buffer type",
                name: ports.internal_type.clone(),
                loc,
            })
        }
    };

    let id = ctx.ids.alloc_atom();
    let writer = previous.map(|a| a.head.domain.clone());
    let reader = next.and_then(|m| factory::member_domain(ctx, m));
    let shape = match next {
        None => ReaderShape::None,
        Some(Member::List(items)) => ReaderShape::List(
            items
                .iter()
                .filter_map(|m| factory::member_target(ctx, m))
                .collect(),
        ),
        Some(m) => match factory::member_size(ctx, m) {
            Some(n) => ReaderShape::Bundle(n),
            None => ReaderShape::Scalar,
        },
    };

    let mut head = AtomHead::new(id, format!("_{}_{}_out", block.name, id), ctx.scope_index(), loc);
    head.domain = writer.clone().flatten().or_else(|| reader.clone());

    Ok(Atom {
        head,
        kind: AtomKind::Buffer(BufferAtom {
            block,
            ports,
            class,
            class_depth,
            depth: resolved.depth,
            size: block.size.unwrap_or(1),
            writer,
            reader,
            shape,
            constant_input: previous.and_then(|a| a.literal().cloned()),
        }),
    })
}

impl BufferAtom<'_> {
    fn value_type(&self) -> ValueType {
        self.ports
            .default
            .as_ref()
            .map_or(ValueType::Real, Literal::value_type)
    }

    fn output_tokens(&self, head: &AtomHead, emitter: &dyn CodeEmitter) -> Vec<String> {
        match &self.shape {
            ReaderShape::Bundle(n) => (0..*n)
                .map(|i| emitter.bundle_index(&head.handle, &i.to_string()))
                .collect(),
            ReaderShape::List(targets) => targets.clone(),
            ReaderShape::None | ReaderShape::Scalar => vec![head.handle.clone()],
        }
    }
}

impl<'t> AtomBehavior<'t> for BufferAtom<'t> {
    fn elements(&mut self, head: &AtomHead, ctx: &mut LoweringContext<'t>) -> Result<AtomElements, LowerError> {
        let platform = Some(ctx.platform_domain().to_string());
        let class = ctx.graph.add(
            Element::declaration(&self.class.class_name, self.class.declaration.clone(), self.class_depth)
                .in_domain(platform),
        );
        let buffer = Element::instance(
            &self.block.name,
            InstanceKind::Buffer {
                type_name: self.class.class_name.clone(),
                size: self.size,
            },
            self.depth,
        )
        .in_domain(head.domain.clone())
        .with_access(
            self.reader.iter().cloned().collect(),
            self.writer.clone().flatten().into_iter().collect(),
        );
        let buffer = ctx.graph.add(buffer);
        ctx.graph.add_dependent(class, buffer);

        let mut out = AtomElements {
            declarations: vec![class],
            instances: vec![buffer],
            ..AtomElements::default()
        };
        let ty = self.value_type();
        let output = match &self.shape {
            ReaderShape::Bundle(size) => Some(InstanceKind::Bundle { ty, size: *size }),
            ReaderShape::Scalar => Some(InstanceKind::Scalar { ty }),
            ReaderShape::None | ReaderShape::List(_) => None,
        };
        if let Some(kind) = output {
            let domain = self.reader.clone().or_else(|| head.domain.clone());
            out.instances
                .push(ctx.graph.add(Element::instance(&head.handle, kind, head.scope).in_domain(domain)));
        }
        Ok(out)
    }

    fn initialization_code(&self, _head: &AtomHead, ctx: &mut LoweringContext<'t>, _in_tokens: &[String]) -> String {
        let e = ctx.emitter;
        match &self.constant_input {
            Some(value) => e.expression_statement(&e.buffer_write(&self.block.name, &e.literal(value))),
            None => String::new(),
        }
    }

    fn processing_code(
        &mut self,
        head: &AtomHead,
        ctx: &mut LoweringContext<'t>,
        in_tokens: &[String],
    ) -> Result<DomainCode, LowerError> {
        let e = ctx.emitter;
        let name = &self.block.name;
        let mut out = DomainCode::new();
        if let (Some(writer), None, Some(token)) = (&self.writer, &self.constant_input, in_tokens.first()) {
            push_code(
                &mut out,
                writer.clone(),
                &e.expression_statement(&e.buffer_write(name, token)),
                Vec::new(),
            );
        }
        let read = match &self.shape {
            ReaderShape::None => return Ok(out),
            ReaderShape::Scalar => e.expression_statement(&e.buffer_read(name, &head.handle)),
            ReaderShape::Bundle(_) => e.expression_statement(&e.buffer_copy(name, &head.handle)),
            ReaderShape::List(targets) => targets
                .iter()
                .map(|t| e.expression_statement(&e.buffer_read(name, t)))
                .collect(),
        };
        push_code(&mut out, self.reader.clone(), &read, self.output_tokens(head, e));
        Ok(out)
    }

    fn handles(&self, head: &AtomHead, emitter: &dyn CodeEmitter) -> Vec<String> {
        self.output_tokens(head, emitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::LowerOptions;
    use crate::emitter::CppEmitter;
    use crate::tree::Program;

    fn program() -> Program {
        Program::from_json(
            r#"{"platform": {"domain": "Audio"}, "nodes": [
                {"block": {"name": "Ring", "type": "ringBufferType", "className": "Ring",
                           "declaration": "template<int N> class Ring {};\n"}},
                {"block": {"name": "Fifo", "type": "buffer", "size": 16, "internalType": "Ring"}},
                {"block": {"name": "Bad", "type": "buffer", "size": 4, "internalType": "Osc"}},
                {"block": {"name": "Osc", "type": "signal", "domain": "Audio", "default": 0.0}},
                {"block": {"name": "Meter", "type": "signal", "domain": "Control", "default": 0.0}},
                {"block": {"name": "Frame", "type": "signal", "domain": "Control", "size": 4, "default": 0.0}}
            ]}"#,
        )
        .expect("tree")
    }

    fn member(json: &str) -> Member {
        serde_json::from_str(json).expect("member")
    }

    #[test]
    fn writer_and_reader_domains_split_the_code() {
        let p = program();
        let osc = member(r#"{"name": {"name": "Osc"}}"#);
        let fifo = member(r#"{"name": {"name": "Fifo"}}"#);
        let meter = member(r#"{"name": {"name": "Meter"}}"#);
        let mut ctx = LoweringContext::new(&p, &CppEmitter, &LowerOptions::default()).expect("ctx");
        let loc = SourceLoc::default();
        let prev = factory::make_atom(&mut ctx, &osc, None, Some(&fifo), &loc).expect("osc");
        let mut atom = factory::make_atom(&mut ctx, &fifo, Some(&prev), Some(&meter), &loc).expect("fifo");
        assert_eq!(atom.head.handle, "_Fifo_001_out");
        assert_eq!(atom.head.rate, None);

        let els = atom.collect_elements(&mut ctx).expect("elements");
        assert_eq!(els.declarations.len(), 1);
        assert_eq!(els.instances.len(), 2);
        let buffer = ctx.graph.get(els.instances[0]);
        assert_eq!(buffer.writes, vec!["Audio".to_string()]);
        assert_eq!(buffer.reads, vec!["Control".to_string()]);

        let code = atom.processing_code(&mut ctx, &["Osc".to_string()]).expect("code");
        assert_eq!(code[&Some("Audio".to_string())].0, "Fifo.write(Osc);\n");
        let (read, tokens) = &code[&Some("Control".to_string())];
        assert_eq!(read, "Fifo.read(_Fifo_001_out);\n");
        assert_eq!(tokens, &vec!["_Fifo_001_out".to_string()]);
    }

    #[test]
    fn literal_input_is_written_at_init_and_bundle_reader_copies() {
        let p = program();
        let value = member(r#"{"value": 1.0}"#);
        let fifo = member(r#"{"name": {"name": "Fifo"}}"#);
        let frame = member(r#"{"name": {"name": "Frame"}}"#);
        let mut ctx = LoweringContext::new(&p, &CppEmitter, &LowerOptions::default()).expect("ctx");
        let loc = SourceLoc::default();
        let prev = factory::make_atom(&mut ctx, &value, None, Some(&fifo), &loc).expect("value");
        let mut atom = factory::make_atom(&mut ctx, &fifo, Some(&prev), Some(&frame), &loc).expect("fifo");
        assert_eq!(atom.initialization_code(&mut ctx, &[]), "Fifo.write(1.0);\n");
        let code = atom.processing_code(&mut ctx, &["1.0".to_string()]).expect("code");
        assert_eq!(code.len(), 1);
        let (copy, tokens) = &code[&Some("Control".to_string())];
        assert_eq!(copy, "Fifo.copy(_Fifo_001_out);\n");
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[3], "_Fifo_001_out[3]");
    }

    #[test]
    fn internal_type_must_be_a_ring_buffer() {
        let p = program();
        let bad = member(r#"{"name": {"name": "Bad"}}"#);
        let mut ctx = LoweringContext::new(&p, &CppEmitter, &LowerOptions::default()).expect("ctx");
        let err = factory::make_atom(&mut ctx, &bad, None, None, &SourceLoc::default()).err();
        assert!(matches!(
            err,
            Some(LowerError::UnsupportedType { what: "ring buffer type", name, .. }) if name == "Osc"
        ));
    }
}
