// factory.rs — Stream member → atom dispatch
//
// Chooses the atom variant for a stream member from the member's shape and
// the kind of the block it references. Every atom receives the atom built
// before it and the raw member that follows it; list members are paired
// element-wise with neighboring lists of the same length.
//
// Preconditions: the context's scope stack reflects the enclosing body.
// Postconditions: each successful call allocates at least one atom id.
// Failure modes: `UnresolvedReference`, `UnsupportedType`, `DomainMismatch`.
// Side effects: module-like members lower their bodies while being built.

use indexmap::IndexMap;

use crate::atom::{self, Atom, AtomKind, Operator};
use crate::buffer;
use crate::context::LoweringContext;
use crate::error::LowerError;
use crate::module;
use crate::platform;
use crate::rate::bridge_handle;
use crate::scope::block_properties;
use crate::signal;
use crate::tree::{BlockKind, BundleIndex, DomainKey, Expression, Literal, Member, SourceLoc};

pub fn make_atom<'t>(
    ctx: &mut LoweringContext<'t>,
    member: &'t Member,
    previous: Option<&Atom<'t>>,
    next: Option<&'t Member>,
    fallback: &SourceLoc,
) -> Result<Atom<'t>, LowerError> {
    let loc = member
        .loc()
        .filter(|l| l.is_known())
        .unwrap_or(fallback)
        .clone();
    match member {
        Member::Value(v) => Ok(atom::value(ctx, v.clone(), loc)),
        Member::PortProperty(p) => atom::port_property(ctx, &p.port, &p.property, loc),
        Member::Expression(e) => {
            let id = ctx.ids.alloc_atom();
            let (op, operands) = match e {
                Expression::Binary { op, left, right } => (
                    Operator::Binary(*op),
                    vec![
                        make_atom(ctx, left, None, None, &loc)?,
                        make_atom(ctx, right, None, None, &loc)?,
                    ],
                ),
                Expression::Unary { op, value } => {
                    (Operator::Unary(*op), vec![make_atom(ctx, value, None, None, &loc)?])
                }
            };
            atom::expression(ctx, op, operands, id, loc)
        }
        Member::List(items) => {
            let id = ctx.ids.alloc_atom();
            let prev_items = match previous.map(|p| &p.kind) {
                Some(AtomKind::List(l)) if l.items.len() == items.len() => Some(&l.items),
                _ => None,
            };
            let next_items = match next {
                Some(Member::List(n)) if n.len() == items.len() => Some(n),
                _ => None,
            };
            let mut built = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let prev = match prev_items {
                    Some(p) => p.get(i),
                    None => previous,
                };
                let nxt = match next_items {
                    Some(n) => n.get(i),
                    None => next,
                };
                built.push(make_atom(ctx, item, prev, nxt, &loc)?);
            }
            atom::list(ctx, built, id, loc)
        }
        Member::Name(n) => {
            let resolved = ctx.resolve(&n.name, &loc)?;
            match &resolved.block.kind {
                BlockKind::Buffer(_) => buffer::build(ctx, resolved, previous, next, loc),
                BlockKind::PlatformBlock(_) | BlockKind::PlatformModule(_) => {
                    platform::build(ctx, resolved, None, previous, next, loc)
                }
                BlockKind::Module(_) | BlockKind::Reaction(_) | BlockKind::Loop(_) => {
                    module::build(ctx, resolved, None, previous, next, loc)
                }
                BlockKind::Signal(_)
                | BlockKind::Constant(_)
                | BlockKind::Switch(_)
                | BlockKind::Trigger(_)
                | BlockKind::SignalBridge(_) => signal::build(ctx, resolved, None, previous.is_some(), loc),
                _ => Err(LowerError::UnsupportedType {
                    what: resolved.block.kind_name(),
                    name: n.name.clone(),
                    loc,
                }),
            }
        }
        Member::Bundle(b) => {
            let resolved = ctx.resolve(&b.name, &loc)?;
            let index = match &b.index {
                BundleIndex::Literal(k) => k.saturating_sub(1).to_string(),
                BundleIndex::Name(name) => {
                    ctx.resolve(name, &loc)?;
                    ctx.emitter.zero_based(name)
                }
            };
            match &resolved.block.kind {
                BlockKind::PlatformBlock(_) | BlockKind::PlatformModule(_) => {
                    platform::build(ctx, resolved, Some(index), previous, next, loc)
                }
                BlockKind::Signal(_)
                | BlockKind::Constant(_)
                | BlockKind::Switch(_)
                | BlockKind::Trigger(_)
                | BlockKind::SignalBridge(_)
                    if resolved.block.size.is_some() =>
                {
                    signal::build(ctx, resolved, Some(index), previous.is_some(), loc)
                }
                _ => Err(LowerError::UnsupportedType {
                    what: "bundle access",
                    name: b.name.clone(),
                    loc,
                }),
            }
        }
        Member::Function(f) => {
            let resolved = ctx.resolve(&f.name, &loc)?;
            match &resolved.block.kind {
                BlockKind::Module(_) | BlockKind::Reaction(_) | BlockKind::Loop(_) => {
                    module::build(ctx, resolved, Some(f), previous, next, loc)
                }
                BlockKind::PlatformBlock(_) | BlockKind::PlatformModule(_) => {
                    platform::build(ctx, resolved, None, previous, next, loc)
                }
                _ => Err(LowerError::UnsupportedType {
                    what: "function call",
                    name: f.name.clone(),
                    loc,
                }),
            }
        }
    }
}

// ── Raw member inspection ───────────────────────────────────────────────────

/// Domain a member would have once built, used for next-member inference.
/// A bridge that follows another atom is written, so it reports its input
/// domain.
pub fn member_domain(ctx: &LoweringContext<'_>, member: &Member) -> DomainKey {
    match member {
        Member::Name(_) | Member::Bundle(_) | Member::Function(_) => {
            let name = member.reference_name()?;
            let block = ctx.try_resolve(name)?.block;
            if let Member::Function(f) = member {
                if let Some(d) = ctx.resolve_domain(f.domain.as_ref()) {
                    return Some(d);
                }
            }
            match &block.kind {
                BlockKind::SignalBridge(p) => ctx.resolve_domain(p.input_domain.as_ref()),
                BlockKind::Buffer(_) | BlockKind::Loop(_) => None,
                _ => ctx.resolve_domain(block.domain_ref()),
            }
        }
        Member::List(items) => items.iter().find_map(|m| member_domain(ctx, m)),
        Member::Expression(Expression::Binary { left, right, .. }) => {
            member_domain(ctx, left).or_else(|| member_domain(ctx, right))
        }
        Member::Expression(Expression::Unary { value, .. }) => member_domain(ctx, value),
        Member::Value(_) | Member::PortProperty(_) => None,
    }
}

/// Properties a raw member would expose to a module port.
pub fn member_properties(ctx: &LoweringContext<'_>, member: &Member) -> IndexMap<String, Literal> {
    match member {
        Member::Name(n) => ctx
            .try_resolve(&n.name)
            .map(|r| block_properties(r.block))
            .unwrap_or_default(),
        Member::Bundle(b) => ctx
            .try_resolve(&b.name)
            .map(|r| {
                let mut props = block_properties(r.block);
                props.shift_remove("size");
                props
            })
            .unwrap_or_default(),
        Member::List(items) => [("size".to_string(), Literal::Real(items.len() as f64))]
            .into_iter()
            .collect(),
        Member::Value(v) => [("default".to_string(), v.clone())].into_iter().collect(),
        _ => IndexMap::new(),
    }
}

/// Storage token a raw member names, for readers that write into it
/// directly.
pub fn member_target(ctx: &LoweringContext<'_>, member: &Member) -> Option<String> {
    match member {
        Member::Name(n) => {
            let block = ctx.try_resolve(&n.name)?.block;
            match &block.kind {
                BlockKind::SignalBridge(p) => Some(bridge_handle(
                    &block.name,
                    &ctx.resolve_domain(p.input_domain.as_ref()),
                    &ctx.resolve_domain(p.output_domain.as_ref()),
                )),
                _ => Some(block.name.clone()),
            }
        }
        Member::Bundle(b) => match &b.index {
            BundleIndex::Literal(k) => Some(ctx.emitter.bundle_index(&b.name, &k.saturating_sub(1).to_string())),
            BundleIndex::Name(name) => Some(ctx.emitter.bundle_index(&b.name, &ctx.emitter.zero_based(name))),
        },
        _ => None,
    }
}

/// Element count of the storage a member names, when sized.
pub fn member_size(ctx: &LoweringContext<'_>, member: &Member) -> Option<usize> {
    match member {
        Member::Name(n) => ctx.try_resolve(&n.name)?.block.size,
        _ => None,
    }
}
