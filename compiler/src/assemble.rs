// assemble.rs — Program assembly: streams into per-domain sections
//
// `lower_streams` drives the stream lowering over one scope (the program
// root or a module body) and merges the results into a `ScopeCode`.
// `assemble_program` turns the root `ScopeCode` into the final
// `ProgramOutput`: element text goes to the header/init sections of the
// owning domain (declarations to the first section), moved further down
// when something it depends on lands later; stream code follows, and the
// assembly obligations are checked on the way out.
//
// Preconditions: streams resolve against the scope frames currently pushed.
// Postconditions: `ScopeCode.elements` is deduplicated and sorted with
//   dependencies first; sections follow the domain order; every element's
//   text follows the text of its dependencies.
// Failure modes: any stream lowering error; `CyclicDependency` from sort.
// Side effects: records `W0301` cross-domain hazards.

use std::collections::{HashMap, HashSet};
use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use crate::atom::GlobalGroups;
use crate::context::LoweringContext;
use crate::diag::codes;
use crate::emitter::{CodeEmitter, CppEmitter};
use crate::error::LowerError;
use crate::factory;
use crate::graph::{Element, ElementId, ElementKind, InstanceKind};
use crate::pass::StageCert;
use crate::stream;
use crate::tree::{DomainKey, SourceLoc, Stream};

// ── Assembled code ──────────────────────────────────────────────────────────

/// Code fragments of one domain, kept as separate chunks until rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DomainSection {
    pub header: Vec<String>,
    pub init: Vec<String>,
    pub processing: Vec<String>,
}

impl DomainSection {
    pub fn is_empty(&self) -> bool {
        self.header.is_empty() && self.init.is_empty() && self.processing.is_empty()
    }
}

/// Everything lowered in one scope.
#[derive(Debug, Default)]
pub struct ScopeCode {
    pub sections: IndexMap<DomainKey, DomainSection>,
    /// Deduplicated, dependencies first.
    pub elements: Vec<ElementId>,
    pub globals: GlobalGroups,
    pub reads: IndexMap<DomainKey, Vec<ElementId>>,
    pub writes: IndexMap<DomainKey, Vec<ElementId>>,
}

/// Lower every stream of a scope and merge the results.
pub fn lower_streams<'t>(
    ctx: &mut LoweringContext<'t>,
    streams: impl IntoIterator<Item = &'t Stream>,
) -> Result<ScopeCode, LowerError> {
    let mut scope = ScopeCode::default();
    let mut elements: Vec<ElementId> = Vec::new();

    for s in streams {
        if let Some(other) = foreign_framework(ctx, s) {
            log::debug!("skipping stream at {}: domain belongs to framework '{}'", s.loc, other);
            continue;
        }
        let code = stream::lower_stream(ctx, s)?;
        scope.globals.merge(&code.globals);
        elements.extend(code.elements);
        for (d, ids) in code.reads {
            scope.reads.entry(d).or_default().extend(ids);
        }
        for (d, ids) in code.writes {
            scope.writes.entry(d).or_default().extend(ids);
        }
        for (domain, section) in code.sections {
            let out = scope.sections.entry(domain).or_default();
            if !section.header.is_empty() {
                out.header.push(section.header);
            }
            if !section.init.is_empty() {
                out.init.push(section.init);
            }
            if !section.processing.is_empty() {
                let mut text = ctx.emitter.stream_begin(code.serial, &code.loc);
                text.push_str(&section.processing);
                text.push_str(&ctx.emitter.stream_end(code.serial));
                out.processing.push(text);
            }
        }
    }

    let order = ctx.domain_order().to_vec();
    let rank = |d: &DomainKey| {
        d.as_ref()
            .and_then(|name| order.iter().position(|o| o == name))
            .unwrap_or(usize::MAX)
    };
    scope.sections.sort_by(|a, _, b, _| rank(a).cmp(&rank(b)));

    let kept = ctx.graph.dedupe(&elements);
    scope.elements = ctx.graph.sort(&kept)?;
    log::debug!(
        "scope {}: {} elements, {} domains",
        ctx.scope_index(),
        scope.elements.len(),
        scope.sections.len()
    );
    Ok(scope)
}

/// The framework owning the stream's domain, when it is not the active one.
fn foreign_framework<'t>(ctx: &LoweringContext<'t>, s: &Stream) -> Option<&'t str> {
    let active = ctx.framework()?;
    let domain = s.members.iter().find_map(|m| factory::member_domain(ctx, m))?;
    ctx.domain_framework(&domain).filter(|f| *f != active)
}

/// Header and initialization text of one element. Disabled elements and
/// declarations without text render nothing.
pub fn render_element(e: &dyn CodeEmitter, el: &Element) -> (String, String) {
    if !el.enabled {
        return (String::new(), String::new());
    }
    let kind = match &el.kind {
        ElementKind::Declaration { code } => return (code.clone(), String::new()),
        ElementKind::Instance(kind) => kind,
    };
    let header = match kind {
        InstanceKind::Scalar { ty } => e.declare_scalar(&el.name, *ty),
        InstanceKind::Bundle { ty, size } => e.declare_bundle(&el.name, *ty, *size),
        InstanceKind::Module { type_name, consts } => e.declare_module(&el.name, type_name, consts),
        InstanceKind::Reaction { type_name } => e.declare_reaction(&el.name, type_name),
        InstanceKind::Buffer { type_name, size } => e.declare_buffer(&el.name, type_name, *size),
    };
    let init = match kind {
        InstanceKind::Bundle { .. } => el
            .init
            .iter()
            .enumerate()
            .map(|(i, v)| e.assign(&e.bundle_index(&el.name, &i.to_string()), v, None))
            .collect(),
        _ => el
            .init
            .first()
            .map(|v| e.assign(&el.name, v, None))
            .unwrap_or_default(),
    };
    (header, init)
}

// ── Program output ──────────────────────────────────────────────────────────

/// Assembly postconditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyCert {
    /// A1: no two listed elements share a name.
    pub a1_unique_names: bool,
    /// A2: every element's text follows the text of what it depends on.
    pub a2_order_respected: bool,
    /// A3: no rate boundary is left open.
    pub a3_rate_stack_balanced: bool,
}

impl StageCert for AssemblyCert {
    fn all_pass(&self) -> bool {
        self.a1_unique_names && self.a2_order_respected && self.a3_rate_stack_balanced
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("A1_unique_names", self.a1_unique_names),
            ("A2_order_respected", self.a2_order_respected),
            ("A3_rate_stack_balanced", self.a3_rate_stack_balanced),
        ]
    }
}

/// Final per-domain code, in emission order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProgramOutput {
    pub domains: IndexMap<String, DomainSection>,
    pub globals: GlobalGroups,
    /// Sorted element list, for graph rendering.
    #[serde(skip)]
    pub elements: Vec<ElementId>,
}

impl ProgramOutput {
    pub fn render(&self, e: &dyn CodeEmitter) -> String {
        let mut out = String::new();
        for header in self.globals.section("include") {
            out.push_str(&e.include(header));
        }
        for (domain, section) in &self.domains {
            for (part, chunks) in [
                ("header", &section.header),
                ("init", &section.init),
                ("processing", &section.processing),
            ] {
                if chunks.is_empty() {
                    continue;
                }
                out.push_str(&e.comment(&format!("{} {}", domain, part)));
                for chunk in chunks {
                    out.push_str(chunk);
                }
            }
        }
        out
    }
}

impl fmt::Display for ProgramOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(&CppEmitter))
    }
}

pub struct AssembledProgram {
    pub output: ProgramOutput,
    pub cert: AssemblyCert,
}

/// Build the program output from the root scope.
pub fn assemble_program(ctx: &mut LoweringContext<'_>, scope: ScopeCode) -> AssembledProgram {
    let platform = ctx.platform_domain().to_string();
    let name_of = |d: &DomainKey| d.clone().unwrap_or_else(|| platform.clone());

    let mut domains: IndexMap<String, DomainSection> = ctx
        .domain_order()
        .iter()
        .map(|d| (d.clone(), DomainSection::default()))
        .collect();
    for &id in &scope.elements {
        domains.entry(name_of(&ctx.graph.get(id).domain)).or_default();
    }
    for d in scope.sections.keys() {
        domains.entry(name_of(d)).or_default();
    }

    let placed = place_elements(ctx, &scope.elements, |d| {
        domains.get_index_of(&name_of(d)).unwrap_or(0)
    });
    let mut slots: Vec<Vec<ElementId>> = vec![Vec::new(); domains.len()];
    for (id, slot) in placed {
        slots[slot].push(id);
    }
    // Element ids in the order their text appears in the output.
    let mut emitted = Vec::with_capacity(scope.elements.len());
    for (ids, (_, section)) in slots.into_iter().zip(domains.iter_mut()) {
        for id in ids {
            let (header, init) = render_element(ctx.emitter, ctx.graph.get(id));
            if !header.is_empty() {
                section.header.push(header);
            }
            if !init.is_empty() {
                section.init.push(init);
            }
            emitted.push(id);
        }
    }
    for (d, code) in &scope.sections {
        let section = domains.entry(name_of(d)).or_default();
        section.header.extend(code.header.iter().cloned());
        section.init.extend(code.init.iter().cloned());
        section.processing.extend(code.processing.iter().cloned());
    }
    domains.retain(|_, s| !s.is_empty());

    check_hazards(ctx, &scope);
    let cert = verify(ctx, &scope.elements, &emitted);
    AssembledProgram {
        output: ProgramOutput {
            domains,
            globals: scope.globals,
            elements: scope.elements,
        },
        cert,
    }
}

/// Section index for each sorted element. An instance goes to its own
/// domain's section and a declaration to the first one, unless an element
/// it depends on was placed further down: then it follows that element.
fn place_elements(
    ctx: &LoweringContext<'_>,
    sorted: &[ElementId],
    rank: impl Fn(&DomainKey) -> usize,
) -> Vec<(ElementId, usize)> {
    let mut floor: HashMap<ElementId, usize> = HashMap::new();
    let mut placed = Vec::with_capacity(sorted.len());
    for &id in sorted {
        let el = ctx.graph.get(id);
        let own = if el.is_declaration() { 0 } else { rank(&el.domain) };
        let slot = own.max(floor.get(&id).copied().unwrap_or(0));
        if slot != own && el.is_instance() {
            log::debug!("assemble: '{}' moved to section {} after its dependencies", el.name, slot);
        }
        for dependent in ctx.graph.dependents(id) {
            let f = floor.entry(dependent).or_insert(0);
            *f = (*f).max(slot);
        }
        placed.push((id, slot));
    }
    placed
}

/// Warn for data written in one domain and read in another without a
/// bridge between them. An element's own domain counts as a writer.
fn check_hazards(ctx: &mut LoweringContext<'_>, scope: &ScopeCode) {
    let mut writers: IndexMap<ElementId, IndexSet<String>> = IndexMap::new();
    let mut readers: IndexMap<ElementId, IndexSet<String>> = IndexMap::new();
    for (map, access) in [(&mut writers, &scope.writes), (&mut readers, &scope.reads)] {
        for (d, ids) in access {
            let Some(d) = d else { continue };
            for &id in ids {
                map.entry(ctx.graph.resolve(id)).or_default().insert(d.clone());
            }
        }
    }
    for &id in &scope.elements {
        let el = ctx.graph.get(id);
        let owner = writers.entry(id).or_default();
        owner.extend(el.domain.iter().cloned());
        owner.extend(el.writes.iter().cloned());
        readers.entry(id).or_default().extend(el.reads.iter().cloned());
    }

    let mut warned: HashSet<ElementId> = HashSet::new();
    let mut hazards = Vec::new();
    for (&id, written) in &writers {
        let el = ctx.graph.get(id);
        if !el.is_data() || el.bridge || !el.enabled {
            continue;
        }
        let Some(read) = readers.get(&id) else { continue };
        if let Some((w, r)) = written
            .iter()
            .flat_map(|w| read.iter().map(move |r| (w, r)))
            .find(|(w, r)| w != r)
        {
            if warned.insert(id) {
                hazards.push(format!(
                    "'{}' is written in {} and read in {} without a signal bridge",
                    el.name, w, r
                ));
            }
        }
    }
    for message in hazards {
        ctx.warn(codes::W0301, SourceLoc::default(), message);
    }
}

/// `emitted` is the order element text appears in the rendered output.
fn verify(ctx: &LoweringContext<'_>, sorted: &[ElementId], emitted: &[ElementId]) -> AssemblyCert {
    let mut names = HashSet::new();
    let a1 = sorted.iter().all(|&id| names.insert(ctx.graph.get(id).name.as_str()));
    AssemblyCert {
        a1_unique_names: a1,
        a2_order_respected: emitted.len() == sorted.len() && ctx.graph.respects_order(emitted),
        a3_rate_stack_balanced: ctx.rates.depth() == 0,
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::LowerOptions;
    use crate::tree::{Program, ValueType};

    fn program(json: &str) -> Program {
        Program::from_json(json).expect("tree")
    }

    fn assemble(p: &Program) -> (AssembledProgram, Vec<String>) {
        let mut ctx = LoweringContext::new(p, &CppEmitter, &LowerOptions::default()).expect("ctx");
        let scope = lower_streams(&mut ctx, p.streams()).expect("lowered");
        let assembled = assemble_program(&mut ctx, scope);
        let codes = ctx
            .diagnostics
            .iter()
            .filter_map(|d| d.code.map(|c| c.0.to_string()))
            .collect();
        (assembled, codes)
    }

    #[test]
    fn chain_renders_declarations_then_stream() {
        let p = program(
            r#"{"platform": {"domain": "Audio", "rate": 44100}, "nodes": [
                {"block": {"name": "A", "type": "signal", "domain": "Audio", "default": 0.0}},
                {"block": {"name": "B", "type": "signal", "domain": "Audio", "default": 0.0}},
                {"block": {"name": "C", "type": "signal", "domain": "Audio", "default": 0.0}},
                {"stream": {"members": [{"name": {"name": "A"}}, {"name": {"name": "B"}}, {"name": {"name": "C"}}]}}
            ]}"#,
        );
        let (assembled, codes) = assemble(&p);
        assert!(codes.is_empty());
        assert!(assembled.cert.all_pass());
        let audio = &assembled.output.domains["Audio"];
        assert_eq!(audio.header, vec!["float A;\n", "float B;\n", "float C;\n"]);
        assert_eq!(audio.init, vec!["A = 0.0;\n", "B = 0.0;\n", "C = 0.0;\n"]);
        assert_eq!(
            audio.processing,
            vec!["// Starting stream 00 -------------------------\nB = A;\nC = B;\n// Stream End 00\n"]
        );
    }

    #[test]
    fn shared_names_collapse_across_streams() {
        let p = program(
            r#"{"platform": {"domain": "Audio"}, "nodes": [
                {"block": {"name": "x", "type": "signal", "domain": "Audio", "default": 0.0}},
                {"block": {"name": "y", "type": "signal", "domain": "Audio", "default": 0.0}},
                {"block": {"name": "z", "type": "signal", "domain": "Audio", "default": 0.0}},
                {"stream": {"members": [{"name": {"name": "x"}}, {"name": {"name": "y"}}]}},
                {"stream": {"members": [{"name": {"name": "x"}}, {"name": {"name": "z"}}]}}
            ]}"#,
        );
        let (assembled, _) = assemble(&p);
        let audio = &assembled.output.domains["Audio"];
        assert_eq!(audio.header.iter().filter(|h| h.as_str() == "float x;\n").count(), 1);
        assert_eq!(audio.processing.len(), 2);
        assert_eq!(assembled.output.elements.len(), 3);
    }

    #[test]
    fn sections_follow_domain_order() {
        let p = program(
            r#"{"platform": {"domain": "Audio", "domainOrder": ["Audio", "Control"]}, "nodes": [
                {"block": {"name": "Knob", "type": "signal", "domain": "Control", "default": 0.0}},
                {"block": {"name": "Level", "type": "signal", "domain": "Control", "default": 0.0}},
                {"block": {"name": "A", "type": "signal", "domain": "Audio", "default": 0.0}},
                {"block": {"name": "B", "type": "signal", "domain": "Audio", "default": 0.0}},
                {"stream": {"members": [{"name": {"name": "Knob"}}, {"name": {"name": "Level"}}]}},
                {"stream": {"members": [{"name": {"name": "A"}}, {"name": {"name": "B"}}]}}
            ]}"#,
        );
        let (assembled, _) = assemble(&p);
        let keys: Vec<&str> = assembled.output.domains.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["Audio", "Control"]);
    }

    #[test]
    fn module_type_leads_its_instance_in_leading_domain() {
        let p = program(
            r#"{"platform": {"domain": "Audio", "domainOrder": ["Control", "Audio"]}, "nodes": [
                {"block": {"name": "Knob", "type": "signal", "domain": "Control", "default": 0.0}},
                {"block": {"name": "Level", "type": "signal", "domain": "Control", "default": 0.0}},
                {"block": {"name": "Gain", "type": "module", "domain": "Control",
                    "blocks": [{"name": "In", "type": "signal", "default": 0.0},
                               {"name": "Out", "type": "signal", "default": 0.0}],
                    "ports": [{"name": "Input", "type": "mainInput", "block": "In"},
                              {"name": "Output", "type": "mainOutput", "block": "Out"}],
                    "streams": [{"members": [{"name": {"name": "In"}}, {"name": {"name": "Out"}}]}]}},
                {"stream": {"members": [{"name": {"name": "Knob"}}, {"function": {"name": "Gain"}},
                                        {"name": {"name": "Level"}}]}}
            ]}"#,
        );
        let (assembled, _) = assemble(&p);
        assert!(assembled.cert.all_pass());
        let keys: Vec<&str> = assembled.output.domains.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["Control"]);
        let text = assembled.output.to_string();
        let class = text.find("class Gain {").expect("type");
        let instance = text.find("Gain Gain_001;").expect("instance");
        assert!(class < instance);
    }

    #[test]
    fn declaration_follows_a_dependency_placed_further_down() {
        let p = program(r#"{"platform": {"domain": "Audio"}, "nodes": []}"#);
        let mut ctx = LoweringContext::new(&p, &CppEmitter, &LowerOptions::default()).expect("ctx");
        let real = InstanceKind::Scalar { ty: ValueType::Real };
        let field = ctx
            .graph
            .add(Element::instance("Shared", real.clone(), 0).in_domain(Some("Audio".into())));
        let decl = ctx.graph.add(Element::declaration("Tap", "class Tap {};\n", 0));
        let inst = ctx
            .graph
            .add(Element::instance("Tap_001", real, 0).in_domain(Some("Control".into())));
        ctx.graph.add_dependent(field, decl);
        ctx.graph.add_dependent(decl, inst);

        let rank = |d: &DomainKey| match d.as_deref() {
            Some("Audio") => 1,
            _ => 0,
        };
        let placed = place_elements(&ctx, &[field, decl, inst], rank);
        assert_eq!(placed, vec![(field, 1), (decl, 1), (inst, 1)]);
    }

    #[test]
    fn order_obligation_checks_emitted_positions() {
        let p = program(r#"{"platform": {"domain": "Audio"}, "nodes": []}"#);
        let mut ctx = LoweringContext::new(&p, &CppEmitter, &LowerOptions::default()).expect("ctx");
        let decl = ctx.graph.add(Element::declaration("Tap", "class Tap {};\n", 0));
        let inst = ctx.graph.add(Element::instance(
            "Tap_001",
            InstanceKind::Module {
                type_name: "Tap".into(),
                consts: Vec::new(),
            },
            0,
        ));
        ctx.graph.add_dependent(decl, inst);
        let sorted = [decl, inst];
        assert!(verify(&ctx, &sorted, &[decl, inst]).a2_order_respected);
        assert!(!verify(&ctx, &sorted, &[inst, decl]).a2_order_respected);
        assert!(!verify(&ctx, &sorted, &[decl]).a2_order_respected);
    }

    #[test]
    fn cross_domain_access_without_bridge_warns() {
        let p = program(
            r#"{"platform": {"domain": "Audio"}, "nodes": [
                {"block": {"name": "Knob", "type": "signal", "domain": "Control", "default": 0.0}},
                {"block": {"name": "Gain", "type": "signal", "domain": "Audio", "default": 0.0}},
                {"stream": {"members": [{"name": {"name": "Knob"}}, {"name": {"name": "Gain"}}]}}
            ]}"#,
        );
        let (_, codes) = assemble(&p);
        assert!(codes.contains(&"W0301".to_string()));
    }

    #[test]
    fn streams_of_foreign_frameworks_are_skipped() {
        let p = program(
            r#"{"platform": {"domain": "Audio", "framework": "Gamma"}, "nodes": [
                {"block": {"name": "Led", "type": "_domainDefinition", "domainName": "Led", "framework": "Arduino"}},
                {"block": {"name": "P", "type": "signal", "domain": "Led", "default": 0.0}},
                {"block": {"name": "Q", "type": "signal", "domain": "Led", "default": 0.0}},
                {"stream": {"members": [{"name": {"name": "P"}}, {"name": {"name": "Q"}}]}}
            ]}"#,
        );
        let (assembled, _) = assemble(&p);
        assert!(assembled.output.domains.is_empty());
    }

    #[test]
    fn disabled_elements_render_nothing() {
        let mut el = Element::instance("x", InstanceKind::Scalar { ty: ValueType::Real }, 0)
            .with_init(vec!["1.0".to_string()]);
        assert_eq!(
            render_element(&CppEmitter, &el),
            ("float x;\n".to_string(), "x = 1.0;\n".to_string())
        );
        el.enabled = false;
        assert_eq!(render_element(&CppEmitter, &el), (String::new(), String::new()));
    }

    #[test]
    fn bundle_init_is_per_element() {
        let el = Element::instance("v", InstanceKind::Bundle { ty: ValueType::Real, size: 2 }, 0)
            .with_init(vec!["0.0".to_string(), "1.0".to_string()]);
        let (_, init) = render_element(&CppEmitter, &el);
        assert_eq!(init, "v[0] = 0.0;\nv[1] = 1.0;\n");
    }

    #[test]
    fn display_labels_each_part() {
        let mut out = ProgramOutput::default();
        out.globals.add("include", "cmath");
        out.domains.insert(
            "Audio".to_string(),
            DomainSection {
                header: vec!["float A;\n".to_string()],
                init: Vec::new(),
                processing: vec!["A = 1.0;\n".to_string()],
            },
        );
        assert_eq!(
            out.to_string(),
            "#include <cmath>\n// Audio header\nfloat A;\n// Audio processing\nA = 1.0;\n"
        );
    }
}
