// stream.rs — Stream lowering driver
//
// Lowers one stream: builds its atoms left to right, plans the rate
// transitions, then walks the atoms threading each one's out tokens into
// the next. Code is routed per domain; while a rate boundary of the
// stream is open in a domain, that domain's code accumulates inside the
// boundary and is wrapped in the guard when the boundary closes.
//
// Boundary policy: each boundary records the domain that opened it and is
// always closed there. At most one boundary per domain is open for a given
// stream; a new transition closes the previous one first. Whatever is
// still open at stream end is closed in its own domain, with W0201 when
// that is not the domain the stream ended in.
//
// Preconditions: the scope stack holds the frames the stream's names
//   resolve against.
// Postconditions: the rate stack is back at its entry depth.
// Failure modes: anything atom construction raises; `UnbalancedRateStack`
//   when another stream's boundary is left on top.
// Side effects: adds elements to the graph; records warnings.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::atom::{Atom, GlobalGroups};
use crate::context::LoweringContext;
use crate::diag::codes;
use crate::error::LowerError;
use crate::factory;
use crate::graph::ElementId;
use crate::rate::{plan_transitions, RateBoundary, RateGuard};
use crate::tree::{DomainKey, SourceLoc, Stream};

/// Code one stream contributes to one domain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionCode {
    pub header: String,
    pub init: String,
    pub processing: String,
}

#[derive(Debug, Default)]
pub struct StreamCode {
    /// Serial of the stream within the run.
    pub serial: usize,
    pub loc: SourceLoc,
    /// First explicit domain among the stream's atoms.
    pub domain: DomainKey,
    pub sections: IndexMap<DomainKey, SectionCode>,
    pub elements: Vec<ElementId>,
    pub reads: IndexMap<DomainKey, Vec<ElementId>>,
    pub writes: IndexMap<DomainKey, Vec<ElementId>>,
    pub globals: GlobalGroups,
}

impl StreamCode {
    fn section(&mut self, domain: &DomainKey) -> &mut SectionCode {
        self.sections.entry(domain.clone()).or_default()
    }

    fn add_header(&mut self, domain: &DomainKey, code: &str) {
        if !code.is_empty() {
            self.section(domain).header.push_str(code);
        }
    }

    fn add_init(&mut self, domain: &DomainKey, code: &str) {
        if !code.is_empty() {
            self.section(domain).init.push_str(code);
        }
    }
}

/// Route processing code to the innermost open boundary of `domain` owned
/// by this stream, or straight into the section.
fn emit(ctx: &mut LoweringContext<'_>, out: &mut StreamCode, domain: &DomainKey, code: &str) {
    if code.is_empty() {
        return;
    }
    match ctx.rates.container_mut(domain, out.serial) {
        Some(boundary) => boundary.body.push_str(code),
        None => out.section(domain).processing.push_str(code),
    }
}

fn close_top(ctx: &mut LoweringContext<'_>, out: &mut StreamCode) -> Option<DomainKey> {
    let (boundary, text) = ctx.rates.close_top(ctx.emitter)?;
    emit(ctx, out, &boundary.domain, &text);
    Some(boundary.domain)
}

/// Close every boundary the stream still owns, each in the domain that
/// opened it, then require the stack to be back at `entry_depth`. A
/// boundary of another owner left above the stream's own is an error.
fn close_stream_boundaries(
    ctx: &mut LoweringContext<'_>,
    out: &mut StreamCode,
    entry_depth: usize,
    end_domain: &DomainKey,
) -> Result<(), LowerError> {
    let serial = out.serial;
    while ctx.rates.top_owned_by(serial) {
        let Some(closed) = close_top(ctx, out) else {
            break;
        };
        if closed.is_some() && &closed != end_domain {
            ctx.warn(
                codes::W0201,
                out.loc.clone(),
                format!(
                    "rate boundary of {} still open when stream {:02} ended in {}",
                    closed.as_deref().unwrap_or("none"),
                    serial,
                    end_domain.as_deref().unwrap_or("none")
                ),
            );
        }
    }
    let exit_depth = ctx.rates.depth();
    if exit_depth != entry_depth {
        return Err(LowerError::UnbalancedRateStack {
            stream: serial,
            entry: entry_depth,
            exit: exit_depth,
            loc: out.loc.clone(),
        });
    }
    Ok(())
}

/// Pick the tokens handed to the next atom: those published in the next
/// atom's domain, else the current domain, else any.
fn select_tokens(produced: &IndexMap<DomainKey, Vec<String>>, next: &DomainKey, current: &DomainKey) -> Vec<String> {
    [next, current]
        .into_iter()
        .filter_map(|d| produced.get(d))
        .chain(produced.values())
        .find(|t| !t.is_empty())
        .cloned()
        .unwrap_or_default()
}

/// Domain each atom runs in: its own, else the one in effect before it.
fn effective_domains(atoms: &[Atom<'_>], start: &DomainKey) -> Vec<DomainKey> {
    let mut current = start.clone();
    atoms
        .iter()
        .map(|a| {
            if a.head.domain.is_some() {
                current = a.head.domain.clone();
            }
            current.clone()
        })
        .collect()
}

/// Atom indices where a rate boundary opens, with the base rate of each
/// domain. Transitions are planned per run of consecutive atoms sharing a
/// domain.
fn plan(
    ctx: &mut LoweringContext<'_>,
    atoms: &[Atom<'_>],
    domains: &[DomainKey],
) -> (HashSet<usize>, IndexMap<DomainKey, Option<f64>>) {
    let mut segments: Vec<(DomainKey, Vec<usize>)> = Vec::new();
    for (i, d) in domains.iter().enumerate() {
        match segments.last_mut() {
            Some((seg, idx)) if seg == d => idx.push(i),
            _ => segments.push((d.clone(), vec![i])),
        }
    }
    let mut bases: IndexMap<DomainKey, Option<f64>> = IndexMap::new();
    let mut transitions = HashSet::new();
    for (domain, idx) in segments {
        let rates: Vec<Option<f64>> = idx.iter().map(|&i| atoms[i].head.rate).collect();
        let base = match bases.get(&domain) {
            Some(&b) => b,
            None => {
                let b = ctx
                    .domain_rate(&domain)
                    .or_else(|| rates.iter().flatten().next().copied());
                bases.insert(domain.clone(), b);
                b
            }
        };
        transitions.extend(plan_transitions(&rates, base).into_iter().map(|k| idx[k]));
    }
    (transitions, bases)
}

pub fn lower_stream<'t>(ctx: &mut LoweringContext<'t>, stream: &'t Stream) -> Result<StreamCode, LowerError> {
    let serial = ctx.alloc_stream();
    let entry_depth = ctx.rates.depth();
    log::debug!("stream {:02}: {} members", serial, stream.members.len());

    let mut atoms: Vec<Atom<'t>> = Vec::with_capacity(stream.members.len());
    for (i, member) in stream.members.iter().enumerate() {
        let atom = factory::make_atom(ctx, member, atoms.last(), stream.members.get(i + 1), &stream.loc)?;
        atoms.push(atom);
    }

    let stream_domain = atoms.iter().find_map(|a| a.head.domain.clone());
    let domains = effective_domains(&atoms, &stream_domain);
    let (transitions, bases) = plan(ctx, &atoms, &domains);
    for &t in &transitions {
        atoms[t].set_inline(false);
        if t > 0 {
            atoms[t - 1].set_inline(false);
        }
    }

    let mut out = StreamCode {
        serial,
        loc: stream.loc.clone(),
        domain: stream_domain,
        ..StreamCode::default()
    };
    let mut pre_once: IndexMap<DomainKey, String> = IndexMap::new();
    let mut post_once: IndexMap<DomainKey, String> = IndexMap::new();
    let mut tokens: Vec<String> = Vec::new();
    let last = atoms.len().saturating_sub(1);

    for i in 0..atoms.len() {
        let current = domains[i].clone();
        let atom = &mut atoms[i];
        out.globals.merge(&atom.head.globals);

        let els = atom.collect_elements(ctx)?;
        if atom.tracks_access() {
            for &id in &els.instances {
                if i > 0 {
                    out.writes.entry(current.clone()).or_default().push(id);
                }
                if i < last {
                    out.reads.entry(domains[i + 1].clone()).or_default().push(id);
                }
            }
        }
        out.elements.extend(els.all());
        for (d, ids) in els.reads {
            out.reads.entry(d).or_default().extend(ids);
        }
        for (d, ids) in els.writes {
            out.writes.entry(d).or_default().extend(ids);
        }

        let header = atom.header_code(ctx);
        out.add_header(&current, &header);
        let init = atom.initialization_code(ctx, &tokens);
        out.add_init(&current, &init);

        if transitions.contains(&i) {
            if ctx.rates.top_owned_by(serial) && ctx.rates.top().map(|b| &b.domain) == Some(&current) {
                close_top(ctx, &mut out);
            }
            let base = bases.get(&current).copied().flatten();
            let parent = ctx.rates.innermost_rate(&current, serial).or(base);
            if let Some(guard) = atom.head.rate.zip(parent).and_then(|(r, p)| RateGuard::new(r, p)) {
                let boundary = RateBoundary {
                    id: ctx.ids.alloc_boundary(),
                    guard,
                    domain: current.clone(),
                    owner: serial,
                    body: String::new(),
                };
                let (header, init) = boundary.counter_code(ctx.emitter);
                out.add_header(&current, &header);
                out.add_init(&current, &init);
                ctx.rates.open(boundary);
            }
        }

        for (key, code) in atom.preprocessing_once(ctx) {
            if ctx.first_time(format!("pre:{:?}:{}", current, key)) {
                pre_once.entry(current.clone()).or_default().push_str(&code);
            }
        }
        for (key, code) in atom.postprocessing_once(ctx) {
            if ctx.first_time(format!("post:{:?}:{}", current, key)) {
                post_once.entry(current.clone()).or_default().push_str(&code);
            }
        }

        let pre = atom.preprocessing_code(ctx, &tokens);
        emit(ctx, &mut out, &current, &pre);

        let mut produced: IndexMap<DomainKey, Vec<String>> = IndexMap::new();
        for (d, (code, toks)) in atom.processing_code(ctx, &tokens)? {
            let d = d.or_else(|| current.clone());
            emit(ctx, &mut out, &d, &code);
            produced.entry(d).or_default().extend(toks);
        }

        let post = atom.postprocessing_code(ctx, &tokens);
        emit(ctx, &mut out, &current, &post);

        let next = domains.get(i + 1).cloned().unwrap_or_else(|| current.clone());
        tokens = select_tokens(&produced, &next, &current);
    }

    let end_domain = domains.last().cloned().flatten();
    close_stream_boundaries(ctx, &mut out, entry_depth, &end_domain)?;

    for (domain, section) in out.sections.iter_mut() {
        if let Some(code) = pre_once.shift_remove(domain) {
            section.processing.insert_str(0, &code);
        }
        if let Some(code) = post_once.shift_remove(domain) {
            section.processing.push_str(&code);
        }
    }
    for (domain, code) in pre_once.into_iter().chain(post_once) {
        out.section(&domain).processing.push_str(&code);
    }
    Ok(out)
}
